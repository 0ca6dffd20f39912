// src/server/storage.rs

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::common::error::Result;

/// On-disk home of uploaded payloads, one flat file per catalog key.
pub struct FileStorage {
    dir: PathBuf,
}

/// An upload being written. Dropping it without [`PendingFile::commit`]
/// removes the partial file.
pub struct PendingFile {
    writer: BufWriter<File>,
    part_path: PathBuf,
    final_path: PathBuf,
    committed: bool,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), "file storage ready");
        Ok(FileStorage { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    pub fn create(&self, key: &str) -> Result<PendingFile> {
        let final_path = self.file_path(key);
        let part_path = self.dir.join(format!("{}.part", key));
        let file = File::create(&part_path)?;
        Ok(PendingFile {
            writer: BufWriter::new(file),
            part_path,
            final_path,
            committed: false,
        })
    }

    /// Open a stored payload together with its length.
    pub fn open(&self, key: &str) -> Result<Option<(File, u64)>> {
        let path = self.file_path(key);
        match File::open(&path) {
            Ok(file) => {
                let len = file.metadata()?.len();
                Ok(Some((file, len)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl PendingFile {
    pub fn writer(&mut self) -> &mut BufWriter<File> {
        &mut self.writer
    }

    pub fn commit(mut self) -> Result<()> {
        self.writer.flush()?;
        fs::rename(&self.part_path, &self.final_path)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = fs::remove_file(&self.part_path) {
                warn!(path = %self.part_path.display(), error = %e, "failed to remove partial upload");
            }
        }
    }
}
