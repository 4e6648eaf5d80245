//! Which files can be uploaded, and how large they may be.

use std::fmt;
use std::path::Path;

use thiserror::Error;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "heic", "heif", "webp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "m4v", "webm", "3gp"];

pub const MAX_IMAGE_BYTES: u64 = 200 * 1024 * 1024;
pub const MAX_VIDEO_BYTES: u64 = 10 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

impl MediaKind {
    /// Kind by (case-insensitive) extension, `None` if unsupported.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = extension(path)?;
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

pub fn is_supported(path: &Path) -> bool {
    MediaKind::from_path(path).is_some()
}

pub fn mime_type(path: &Path) -> &'static str {
    match extension(path).as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        Some("heic" | "heif") => "image/heic",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        Some("mkv") => "video/x-matroska",
        Some("m4v") => "video/x-m4v",
        Some("webm") => "video/webm",
        Some("3gp") => "video/3gpp",
        _ => "application/octet-stream",
    }
}

/// Per-kind size ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaLimits {
    pub max_image_bytes: u64,
    pub max_video_bytes: u64,
}

impl Default for MediaLimits {
    fn default() -> Self {
        Self {
            max_image_bytes: MAX_IMAGE_BYTES,
            max_video_bytes: MAX_VIDEO_BYTES,
        }
    }
}

impl MediaLimits {
    pub fn max_bytes(&self, kind: MediaKind) -> u64 {
        match kind {
            MediaKind::Image => self.max_image_bytes,
            MediaKind::Video => self.max_video_bytes,
        }
    }
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Unsupported file format")]
    Unsupported,

    #[error("Empty file")]
    Empty,

    #[error("File too large: {size} > {max}")]
    TooLarge { size: ByteSize, max: ByteSize },

    #[error("Cannot access file: {0}")]
    Unreadable(#[from] std::io::Error),
}

/// Check extension and size. Reads metadata only.
pub async fn validate(path: &Path, limits: &MediaLimits) -> Result<MediaKind, ValidationError> {
    let kind = MediaKind::from_path(path).ok_or(ValidationError::Unsupported)?;
    let metadata = tokio::fs::metadata(path).await?;
    if !metadata.is_file() {
        return Err(ValidationError::Unreadable(std::io::Error::other(
            "not a regular file",
        )));
    }
    let size = metadata.len();
    if size == 0 {
        return Err(ValidationError::Empty);
    }
    let max = limits.max_bytes(kind);
    if size > max {
        return Err(ValidationError::TooLarge {
            size: ByteSize(size),
            max: ByteSize(max),
        });
    }
    Ok(kind)
}

/// Byte count displayed human-readably (`1.5MB`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSize(pub u64);

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
        let mut size = self.0 as f64;
        for unit in UNITS {
            if size < 1024.0 {
                return write!(f, "{:.1}{}", size, unit);
            }
            size /= 1024.0;
        }
        write!(f, "{:.1}TB", size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_by_extension_case_insensitive() {
        assert_eq!(MediaKind::from_path(Path::new("a.JPG")), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_path(Path::new("a.heif")), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_path(Path::new("b.MoV")), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_path(Path::new("b.3gp")), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_path(Path::new("notes.txt")), None);
        assert_eq!(MediaKind::from_path(Path::new("noext")), None);
    }

    #[test]
    fn test_mime_types() {
        assert_eq!(mime_type(Path::new("x.jpeg")), "image/jpeg");
        assert_eq!(mime_type(Path::new("x.HEIC")), "image/heic");
        assert_eq!(mime_type(Path::new("x.mov")), "video/quicktime");
        assert_eq!(mime_type(Path::new("x.bin")), "application/octet-stream");
    }

    #[test]
    fn test_byte_size_display() {
        assert_eq!(ByteSize(512).to_string(), "512.0B");
        assert_eq!(ByteSize(1536).to_string(), "1.5KB");
        assert_eq!(ByteSize(200 * 1024 * 1024).to_string(), "200.0MB");
        assert_eq!(ByteSize(MAX_VIDEO_BYTES).to_string(), "10.0GB");
    }

    #[tokio::test]
    async fn test_validate() {
        let dir = tempfile::tempdir().unwrap();
        let limits = MediaLimits {
            max_image_bytes: 10,
            max_video_bytes: 20,
        };

        let ok = dir.path().join("ok.jpg");
        std::fs::write(&ok, b"12345").unwrap();
        assert_eq!(validate(&ok, &limits).await.unwrap(), MediaKind::Image);

        let empty = dir.path().join("empty.png");
        std::fs::write(&empty, b"").unwrap();
        assert!(matches!(
            validate(&empty, &limits).await,
            Err(ValidationError::Empty)
        ));

        let big = dir.path().join("big.mp4");
        std::fs::write(&big, vec![0u8; 21]).unwrap();
        match validate(&big, &limits).await {
            Err(ValidationError::TooLarge { size, max }) => {
                assert_eq!(size, ByteSize(21));
                assert_eq!(max, ByteSize(20));
            }
            other => panic!("unexpected {other:?}"),
        }

        let txt = dir.path().join("notes.txt");
        std::fs::write(&txt, b"x").unwrap();
        assert!(matches!(
            validate(&txt, &limits).await,
            Err(ValidationError::Unsupported)
        ));

        assert!(matches!(
            validate(&dir.path().join("gone.jpg"), &limits).await,
            Err(ValidationError::Unreadable(_))
        ));
    }
}
