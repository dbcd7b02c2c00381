//! File-backed emergency cache.
//!
//! One file per cache. Saves go to a sibling temp file which is fsynced and
//! then renamed over the target, so a crash mid-save leaves the previous copy
//! intact.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::flat::FlatConfig;

use super::codec;
use super::EmergencyCache;

#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
    saved_at: DateTime<Utc>,
    config: FlatConfig,
}

/// Emergency cache stored in a single checksummed file.
#[derive(Debug, Clone)]
pub struct FileCache {
    path: PathBuf,
    sync_on_write: bool,
}

impl FileCache {
    /// Cache at `path`. Parent directories are created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sync_on_write: true,
        }
    }

    /// Whether to fsync before the rename (default: true).
    #[must_use]
    pub fn sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }

    /// Location of the cache file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// When the cached copy was written, if one exists and is readable.
    pub fn saved_at(&self) -> Result<Option<DateTime<Utc>>, CacheError> {
        Ok(self.read_record()?.map(|r| r.saved_at))
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn read_record(&self) -> Result<Option<CacheRecord>, CacheError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Io(e)),
        };

        let mut reader = BufReader::new(file);
        match codec::decode::<CacheRecord>(&mut reader) {
            Ok(record) => Ok(Some(record)),
            Err(e) if matches!(e.kind(), ErrorKind::InvalidData | ErrorKind::UnexpectedEof) => {
                Err(CacheError::Corrupted { reason: e.to_string() })
            }
            Err(e) => Err(CacheError::Io(e)),
        }
    }
}

impl EmergencyCache for FileCache {
    fn try_load(&self) -> Result<Option<FlatConfig>, CacheError> {
        Ok(self.read_record()?.map(|r| r.config))
    }

    fn save(&self, config: &FlatConfig) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let record = CacheRecord {
            saved_at: Utc::now(),
            config: config.clone(),
        };

        let tmp = self.temp_path();
        let file = OpenOptions::new().write(true).create(true).truncate(true).open(&tmp)?;
        let mut writer = BufWriter::new(file);
        codec::encode(&record, &mut writer).map_err(|e| {
            if e.kind() == ErrorKind::InvalidData {
                CacheError::Serialization { message: e.to_string() }
            } else {
                CacheError::Io(e)
            }
        })?;
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| CacheError::Io(e.into_error()))?;
        if self.sync_on_write {
            file.sync_all()?;
        }
        drop(file);

        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
