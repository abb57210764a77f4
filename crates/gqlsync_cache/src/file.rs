//! File-based storage backend for persistent storage.
//!
//! Layout:
//!
//! ```text
//! <dir>/
//! ├─ LOCK              # Advisory lock for single-writer
//! ├─ <encoded key>     # One file per blob
//! └─ <encoded key>.tmp # Transient, during atomic replace
//! ```

use crate::backend::StorageBackend;
use crate::error::{CacheError, CacheResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const TEMP_SUFFIX: &str = ".tmp";

/// A directory-backed storage backend.
///
/// Each blob lives in its own file. Writes go to a temporary file that is
/// synced and renamed over the old one, so a crash never leaves a torn blob.
///
/// # Thread Safety
///
/// The backend holds an exclusive advisory lock on its directory; only one
/// instance (in any process) can use a directory at a time. Writes within
/// the instance are serialized.
///
/// # Example
///
/// ```no_run
/// use gqlsync_cache::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("offline-state")).unwrap();
/// backend.set("app::appsync", "{}").unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    write_lock: Mutex<()>,
    _lock_file: File,
}

impl FileBackend {
    /// Opens or creates a storage directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The path exists but is not a directory
    /// - Another instance holds the lock (returns `Locked`)
    /// - I/O errors occur
    pub fn open(path: &Path) -> CacheResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(CacheError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("path is not a directory: {}", path.display()),
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CacheError::Locked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
            _lock_file: lock_file,
        })
    }

    /// Returns the storage directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.path.join(encode_key(key))
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, key: &str) -> CacheResult<Option<String>> {
        match fs::read_to_string(self.blob_path(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> CacheResult<()> {
        let _guard = self.write_lock.lock();
        let target = self.blob_path(key);
        let temp = self.path.join(format!("{}{}", encode_key(key), TEMP_SUFFIX));

        {
            let mut file = File::create(&temp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp, &target)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> CacheResult<()> {
        let _guard = self.write_lock.lock();
        match fs::remove_file(self.blob_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> CacheResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if name == LOCK_FILE || name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            if let Some(key) = decode_key(&name) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Escapes anything outside `[A-Za-z0-9._-]` as `%XX` so keys are portable
/// file names.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => out.push(byte as char),
            b'.' if !out.is_empty() => out.push('.'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
