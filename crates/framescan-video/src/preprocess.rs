use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::info;

use framescan_core::paths::SidecarPaths;
use framescan_storage::{StorageBackend, StorageError};

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("failed to spawn preprocessor {program:?}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("preprocessor {program:?} failed on {video} ({status})")]
    Failed {
        program: String,
        video: String,
        status: std::process::ExitStatus,
    },
}

/// Produces the re-muxed stream, metadata record, and keyframe index for one
/// input video. Runs on the master only, for inputs whose processed file is
/// missing; the evaluation run is then restarted against the outputs.
pub trait Preprocessor: Send + Sync {
    fn preprocess(&self, video: &Path, sidecars: &SidecarPaths) -> Result<(), PreprocessError>;
}

/// Invokes an external preprocessing command as
/// `<program> <video> <processed> <metadata> <iframes>`.
#[derive(Debug, Clone)]
pub struct CommandPreprocessor {
    program: String,
}

impl CommandPreprocessor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Preprocessor for CommandPreprocessor {
    fn preprocess(&self, video: &Path, sidecars: &SidecarPaths) -> Result<(), PreprocessError> {
        info!(video = %video.display(), program = %self.program, "preprocessing video");
        let status = Command::new(&self.program)
            .arg(video)
            .arg(&sidecars.processed)
            .arg(&sidecars.metadata)
            .arg(&sidecars.iframes)
            .status()
            .map_err(|source| PreprocessError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !status.success() {
            return Err(PreprocessError::Failed {
                program: self.program.clone(),
                video: video.display().to_string(),
                status,
            });
        }
        Ok(())
    }
}

/// Indices of the videos whose processed file does not exist yet.
pub fn missing_preprocessed(
    storage: &dyn StorageBackend,
    videos: &[PathBuf],
) -> Result<Vec<usize>, StorageError> {
    let mut missing = Vec::new();
    for (index, video) in videos.iter().enumerate() {
        let sidecars = SidecarPaths::for_video(video);
        if !storage.get_file_info(&sidecars.processed)?.exists {
            missing.push(index);
        }
    }
    Ok(missing)
}

/// Gate evaluation on preprocessing. When any input lacks its processed
/// file, the master runs the preprocessor for each missing one and the run
/// stops there — a subsequent invocation consumes the outputs. Returns
/// `true` only when every input was already processed.
pub fn ensure_preprocessed(
    storage: &dyn StorageBackend,
    videos: &[PathBuf],
    preprocessor: &dyn Preprocessor,
    is_master: bool,
) -> Result<bool, crate::VideoError> {
    let missing = missing_preprocessed(storage, videos)?;
    if missing.is_empty() {
        return Ok(true);
    }
    if is_master {
        for index in missing {
            let video = &videos[index];
            let sidecars = SidecarPaths::for_video(video);
            preprocessor.preprocess(video, &sidecars)?;
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use framescan_storage::posix::PosixStorage;

    fn temp_root(test_name: &str) -> anyhow::Result<PathBuf> {
        let mut root = std::env::temp_dir();
        root.push(format!(
            "framescan-preprocess-{test_name}-{}-{}",
            std::process::id(),
            framescan_observe::time::unix_time_ms()
        ));
        std::fs::create_dir_all(&root)?;
        Ok(root)
    }

    #[test]
    fn missing_scan_reports_unprocessed_videos() -> anyhow::Result<()> {
        let root = temp_root("missing")?;
        std::fs::write(root.join("a_processed.mp4"), b"x")?;

        let storage = PosixStorage::new(&root);
        let videos = vec![PathBuf::from("a.mp4"), PathBuf::from("b.mp4")];
        let missing = missing_preprocessed(&storage, &videos)?;
        assert_eq!(missing, vec![1]);
        Ok(())
    }

    struct RecordingPreprocessor {
        calls: std::sync::Mutex<Vec<PathBuf>>,
    }

    impl Preprocessor for RecordingPreprocessor {
        fn preprocess(
            &self,
            video: &Path,
            _sidecars: &SidecarPaths,
        ) -> Result<(), PreprocessError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(video.to_path_buf());
            }
            Ok(())
        }
    }

    #[test]
    fn master_preprocesses_missing_inputs_and_interrupts_the_run() -> anyhow::Result<()> {
        let root = temp_root("ensure-master")?;
        std::fs::write(root.join("a_processed.mp4"), b"x")?;

        let storage = PosixStorage::new(&root);
        let videos = vec![PathBuf::from("a.mp4"), PathBuf::from("b.mp4")];
        let pre = RecordingPreprocessor {
            calls: std::sync::Mutex::new(Vec::new()),
        };

        let ready = ensure_preprocessed(&storage, &videos, &pre, true)?;
        assert!(!ready, "missing outputs must interrupt the run");
        let calls = pre.calls.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        assert_eq!(calls.as_slice(), &[PathBuf::from("b.mp4")]);
        Ok(())
    }

    #[test]
    fn non_master_nodes_never_invoke_the_preprocessor() -> anyhow::Result<()> {
        let root = temp_root("ensure-node")?;
        let storage = PosixStorage::new(&root);
        let videos = vec![PathBuf::from("a.mp4")];
        let pre = RecordingPreprocessor {
            calls: std::sync::Mutex::new(Vec::new()),
        };

        let ready = ensure_preprocessed(&storage, &videos, &pre, false)?;
        assert!(!ready);
        let calls = pre.calls.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        assert!(calls.is_empty());
        Ok(())
    }

    #[test]
    fn fully_processed_inputs_proceed_to_evaluation() -> anyhow::Result<()> {
        let root = temp_root("ensure-ready")?;
        std::fs::write(root.join("a_processed.mp4"), b"x")?;

        let storage = PosixStorage::new(&root);
        let videos = vec![PathBuf::from("a.mp4")];
        let pre = RecordingPreprocessor {
            calls: std::sync::Mutex::new(Vec::new()),
        };
        assert!(ensure_preprocessed(&storage, &videos, &pre, true)?);
        Ok(())
    }

    #[test]
    fn failing_command_surfaces_status() {
        let pre = CommandPreprocessor::new("false");
        let sidecars = SidecarPaths::for_video(Path::new("/tmp/clip.mp4"));
        let err = pre.preprocess(Path::new("/tmp/clip.mp4"), &sidecars);
        match err {
            Err(PreprocessError::Failed { .. }) | Err(PreprocessError::Spawn { .. }) => {}
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
