use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::{FileInfo, RandomReadFile, StorageBackend, StorageError};

#[derive(Debug, Clone)]
pub struct PosixStorage {
    root: PathBuf,
}

impl PosixStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl StorageBackend for PosixStorage {
    fn open_random_read(&self, path: &Path) -> Result<Box<dyn RandomReadFile>, StorageError> {
        let resolved = self.resolve(path);
        let file = match File::open(&resolved) {
            Ok(f) => f,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(resolved.display().to_string()));
            }
            Err(err) => return Err(StorageError::Io(err)),
        };
        let size = file.metadata()?.len();
        Ok(Box::new(PosixFile {
            path: resolved,
            file,
            size,
        }))
    }

    fn get_file_info(&self, path: &Path) -> Result<FileInfo, StorageError> {
        let resolved = self.resolve(path);
        match std::fs::metadata(&resolved) {
            Ok(meta) => Ok(FileInfo {
                exists: true,
                size: meta.len(),
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(FileInfo {
                exists: false,
                size: 0,
            }),
            Err(err) => Err(StorageError::Io(err)),
        }
    }
}

struct PosixFile {
    path: PathBuf,
    file: File,
    size: u64,
}

impl RandomReadFile for PosixFile {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let len = buf.len() as u64;
        if offset.saturating_add(len) > self.size {
            return Err(StorageError::OutOfRange {
                path: self.path.display().to_string(),
                offset,
                len,
                size: self.size,
            });
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(test_name: &str) -> anyhow::Result<PathBuf> {
        let mut root = std::env::temp_dir();
        root.push(format!(
            "framescan-storage-{test_name}-{}-{}",
            std::process::id(),
            framescan_observe::time::unix_time_ms()
        ));
        std::fs::create_dir_all(&root)?;
        Ok(root)
    }

    #[test]
    fn ranged_reads_return_exact_bytes() -> anyhow::Result<()> {
        let root = temp_root("ranged")?;
        std::fs::write(root.join("blob.bin"), (0u8..32).collect::<Vec<_>>())?;

        let storage = PosixStorage::new(&root);
        let mut file = storage.open_random_read(Path::new("blob.bin"))?;
        assert_eq!(file.size(), 32);

        let mut buf = [0u8; 4];
        file.read_at(10, &mut buf)?;
        assert_eq!(buf, [10, 11, 12, 13]);

        let err = file.read_at(30, &mut buf).unwrap_err();
        assert!(matches!(err, StorageError::OutOfRange { .. }));
        Ok(())
    }

    #[test]
    fn file_info_reports_missing_files() -> anyhow::Result<()> {
        let root = temp_root("info")?;
        let storage = PosixStorage::new(&root);

        let info = storage.get_file_info(Path::new("absent.bin"))?;
        assert!(!info.exists);

        std::fs::write(root.join("present.bin"), b"12345")?;
        let info = storage.get_file_info(Path::new("present.bin"))?;
        assert!(info.exists);
        assert_eq!(info.size, 5);
        Ok(())
    }

    #[test]
    fn missing_open_is_a_not_found_error() -> anyhow::Result<()> {
        let root = temp_root("missing")?;
        let storage = PosixStorage::new(&root);
        let err = storage
            .open_random_read(Path::new("nope.bin"))
            .err()
            .ok_or_else(|| anyhow::anyhow!("open must fail"))?;
        assert!(matches!(err, StorageError::NotFound(_)));
        Ok(())
    }
}
