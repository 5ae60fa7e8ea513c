use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::common::timeutils::short_epoch_millis;

const MAX_CREATE_ATTEMPTS: usize = 16;

/// Creates uniquely named record files.
///
/// Names consist of a prefix, a shortened millisecond timestamp, the process id and a
/// per-instance sequence number, so concurrent processes never share a file.
pub struct TransientFiles {
    directory: PathBuf,
    prefix: String,
    sequence: u64,
}

impl TransientFiles {
    pub fn new(directory: PathBuf, prefix: &str) -> Self {
        Self {
            directory,
            prefix: prefix.to_string(),
            sequence: 0,
        }
    }

    fn next_path(&mut self) -> PathBuf {
        self.sequence += 1;
        self.directory.join(format!(
            "{}_{}_{}_{}",
            self.prefix,
            short_epoch_millis(),
            std::process::id(),
            self.sequence
        ))
    }

    /// Creates a new empty file.
    pub fn create(&mut self) -> std::io::Result<TransientFile> {
        let mut attempt = 0;
        loop {
            let path = self.next_path();
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    log::debug!("Writing {}", path.display());
                    return Ok(TransientFile {
                        path,
                        file: Some(file),
                    });
                }
                Err(error)
                    if error.kind() == std::io::ErrorKind::AlreadyExists
                        && attempt < MAX_CREATE_ATTEMPTS =>
                {
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Creates a file holding `content`, closed and ready to be handed to a transport.
    pub fn write(&mut self, content: &str) -> std::io::Result<TransientFile> {
        let mut file = self.create()?;
        file.write(content)?;
        file.finish()?;
        Ok(file)
    }
}

/// Record file removed from disk when dropped.
pub struct TransientFile {
    path: PathBuf,
    file: Option<File>,
}

impl TransientFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, data: &str) -> std::io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(data.as_bytes()),
            None => Err(std::io::Error::other("transient file is already closed")),
        }
    }

    /// Flushes and closes the handle, the file stays on disk until drop.
    pub fn finish(&mut self) -> std::io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

impl Drop for TransientFile {
    fn drop(&mut self) {
        self.file.take();
        if let Err(error) = std::fs::remove_file(&self.path) {
            log::warn!(
                "Cannot remove transient file {}: {error}",
                self.path.display()
            );
        }
    }
}
