/// How a directory path is turned into an album name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum AlbumNaming {
    /// Path relative to the base directory: `pics/south-america/brazil` -> `south-america-brazil`
    #[default]
    Relative,
    /// Relative path prefixed with the base directory name: `pics-south-america-brazil`
    Full,
    /// Leaf directory name only: `brazil`
    Leaf,
}

/// What to do when an album with the computed name was already created by
/// this tool but is not in the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExistingAlbumPolicy {
    /// Defer the directory for this run.
    Skip,
    /// Upload into the existing album.
    Merge,
    /// Always create a new album, even if the name repeats.
    #[default]
    Create,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
