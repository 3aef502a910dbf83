//! Document names stored next to the index as JSON.

use crate::error::{IoContext, LexdexError, Result};
use crate::index::types::DocId;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const DOCSTORE_VERSION: u32 = 1;

/// `<index>.docs.json`
pub fn sidecar_path(index_path: &Path) -> PathBuf {
    let mut name = index_path.as_os_str().to_owned();
    name.push(".docs.json");
    PathBuf::from(name)
}

/// DocId to display name mapping
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocStore {
    pub version: u32,
    /// Seconds since the Unix epoch
    pub created_at: u64,
    pub documents: Vec<String>,
}

impl DocStore {
    pub fn new(documents: Vec<String>) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            version: DOCSTORE_VERSION,
            created_at,
            documents,
        }
    }

    pub fn name(&self, doc_id: DocId) -> Option<&str> {
        self.documents.get(doc_id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Write to `<path>.tmp` and rename into place
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let result = self.write_to(&tmp).and_then(|()| fs::rename(&tmp, path).with_path(path));
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    fn write_to(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_path(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self)
            .map_err(|e| LexdexError::io(path, e.into()))?;
        writer.flush().with_path(path)?;
        let file = writer
            .into_inner()
            .map_err(|e| LexdexError::io(path, e.into_error()))?;
        file.sync_all().with_path(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_path(path)?;
        let store: DocStore = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| LexdexError::CorruptIndex(format!("{}: {}", path.display(), e)))?;
        if store.version != DOCSTORE_VERSION {
            return Err(LexdexError::CorruptIndex(format!(
                "{}: unsupported docstore version {}",
                path.display(),
                store.version
            )));
        }
        Ok(store)
    }

    /// Load the sidecar of `index_path` if one exists
    pub fn load_for_index(index_path: &Path) -> Result<Option<Self>> {
        let path = sidecar_path(index_path);
        if !path.exists() {
            return Ok(None);
        }
        Self::load(&path).map(Some)
    }
}
