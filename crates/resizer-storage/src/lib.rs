use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use resizer_core::CoreError;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::{Builder, NamedTempFile};
use thiserror::Error;

pub const OUTPUT_EXTENSION: &str = "jpg";

const MAX_NAME_ATTEMPTS: u32 = 1000;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("could not determine a default output directory")]
    NoDefaultRoot,
    #[error("not a file:// locator: {0}")]
    NotAFileUri(String),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        CoreError::StorageFailure(err.to_string())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredOutput {
    pub path: PathBuf,
    pub uri: String,
    pub size: u64,
    pub sha256: String,
}

/// Configured root, else the picture directory, else home.
pub fn resolve_output_root(configured: Option<&Path>) -> Result<PathBuf, StorageError> {
    if let Some(root) = configured {
        return Ok(root.to_path_buf());
    }
    dirs::picture_dir()
        .or_else(dirs::home_dir)
        .ok_or(StorageError::NoDefaultRoot)
}

/// `<epoch-millis>.jpg` for `now`.
pub fn millis_file_name(now: SystemTime) -> String {
    let millis = now.duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0);
    format!("{}.{}", millis, OUTPUT_EXTENSION)
}

/// `<stem>-<n>.jpg` for the n-th collision on a millisecond name.
fn collision_file_name(base: &str, attempt: u32) -> String {
    let stem = base.strip_suffix(".jpg").unwrap_or(base);
    format!("{}-{}.{}", stem, attempt, OUTPUT_EXTENSION)
}

pub fn file_uri(path: &Path) -> String {
    format!("file://{}", path.to_string_lossy().replace('\\', "/"))
}

pub fn path_from_file_uri(uri: &str) -> Result<PathBuf, StorageError> {
    uri.strip_prefix("file://")
        .map(PathBuf::from)
        .ok_or_else(|| StorageError::NotAFileUri(uri.to_string()))
}

pub fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn sha256_file(path: &Path) -> Result<String, StorageError> {
    let mut file = File::open(path).map_err(|e| io_error(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 16 * 1024];
    loop {
        let read = file.read(&mut buf).map_err(|e| io_error(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Writes encoded outputs under one root directory.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    root: PathBuf,
}

impl OutputWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stores under `<epoch-millis>.jpg`. Never replaces an existing output: a name
    /// already taken in the same millisecond gets a `-1`, `-2`, ... suffix.
    pub fn write(&self, folder_name: &str, bytes: &[u8]) -> Result<StoredOutput, StorageError> {
        let (folder, mut temp) = self.stage(folder_name, bytes)?;
        let base = millis_file_name(SystemTime::now());
        let mut destination = folder.join(&base);
        for attempt in 1..=MAX_NAME_ATTEMPTS {
            match temp.persist_noclobber(&destination) {
                Ok(_) => return Ok(stored(destination, bytes)),
                Err(err) if err.error.kind() == ErrorKind::AlreadyExists => {
                    temp = err.file;
                    destination = folder.join(collision_file_name(&base, attempt));
                }
                Err(err) => return Err(io_error(&destination, err.error)),
            }
        }
        Err(io_error(
            &destination,
            std::io::Error::new(ErrorKind::AlreadyExists, "no free output name"),
        ))
    }

    /// Like `write` with a caller-chosen name; a same-named file is replaced.
    pub fn write_named(&self, folder_name: &str, file_name: &str, bytes: &[u8]) -> Result<StoredOutput, StorageError> {
        let (folder, temp) = self.stage(folder_name, bytes)?;
        let destination = folder.join(file_name);
        temp.persist(&destination).map_err(|e| io_error(&destination, e.error))?;
        Ok(stored(destination, bytes))
    }

    /// Creates the folder when missing and writes the bytes to a temp file inside it,
    /// so readers never see a partial image.
    fn stage(&self, folder_name: &str, bytes: &[u8]) -> Result<(PathBuf, NamedTempFile), StorageError> {
        let folder = self.root.join(folder_name);
        fs::create_dir_all(&folder).map_err(|e| io_error(&folder, e))?;
        let folder = fs::canonicalize(&folder).map_err(|e| io_error(&folder, e))?;

        let mut temp = Builder::new()
            .prefix(".resizer-")
            .suffix(".part")
            .tempfile_in(&folder)
            .map_err(|e| io_error(&folder, e))?;
        temp.write_all(bytes).map_err(|e| io_error(temp.path(), e))?;
        temp.flush().map_err(|e| io_error(temp.path(), e))?;
        Ok((folder, temp))
    }
}

fn stored(destination: PathBuf, bytes: &[u8]) -> StoredOutput {
    StoredOutput {
        uri: file_uri(&destination),
        path: destination,
        size: bytes.len() as u64,
        sha256: sha256_bytes(bytes),
    }
}
