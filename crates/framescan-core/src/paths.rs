use std::path::{Path, PathBuf};

pub const PROCESSED_POSTFIX: &str = "_processed";
pub const METADATA_POSTFIX: &str = "_metadata";
pub const IFRAME_POSTFIX: &str = "_iframes";

/// The three sidecar files the preprocessor leaves next to each input video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarPaths {
    pub processed: PathBuf,
    pub metadata: PathBuf,
    pub iframes: PathBuf,
}

impl SidecarPaths {
    pub fn for_video(video_path: &Path) -> Self {
        Self {
            processed: with_postfix(video_path, PROCESSED_POSTFIX, "mp4"),
            metadata: with_postfix(video_path, METADATA_POSTFIX, "bin"),
            iframes: with_postfix(video_path, IFRAME_POSTFIX, "bin"),
        }
    }
}

fn with_postfix(path: &Path, postfix: &str, extension: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let file = format!("{stem}{postfix}.{extension}");
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(file),
        _ => PathBuf::from(file),
    }
}
