//! File-backed [`ConfigStore`].
//!
//! # Storage layout
//!
//! ```text
//! ~/.gatherd/
//!   cache.yaml              (persisted document, mode 0600)
//!   streams/
//!     <stream>.meta.json    (stream definition)
//!     <stream>.jsonl        (one datapoint per line, append-only)
//! ```
//!
//! Document writes are atomic: serialize → `.tmp` sibling → `chmod 0600` →
//! `rename`. The in-memory copy is only replaced after the rename succeeds.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{io_err, StoreError};
use crate::store::ConfigStore;
use crate::types::{validate_stream_name, Datapoint, Document, StreamDefinition};

pub const DOCUMENT_FILE: &str = "cache.yaml";
pub const STREAMS_DIR: &str = "streams";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.gatherd/`
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".gatherd")
}

/// `root_at` for the current user's home directory.
pub fn root() -> Result<PathBuf, StoreError> {
    Ok(root_at(&home()?))
}

pub fn document_path(root: &Path) -> PathBuf {
    root.join(DOCUMENT_FILE)
}

pub fn streams_dir(root: &Path) -> PathBuf {
    root.join(STREAMS_DIR)
}

fn meta_path(root: &Path, stream: &str) -> PathBuf {
    streams_dir(root).join(format!("{stream}.meta.json"))
}

fn data_path(root: &Path, stream: &str) -> PathBuf {
    streams_dir(root).join(format!("{stream}.jsonl"))
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    document: Mutex<Document>,
    syncing: AtomicBool,
}

impl FileStore {
    /// Open the store rooted at `root`, creating it on first use.
    ///
    /// When no document exists yet, `on_create` is called exactly once with a
    /// document holding the system defaults. The document is only committed
    /// if `on_create` succeeds; its error is returned unchanged.
    pub fn open_at<F>(root: impl Into<PathBuf>, on_create: F) -> Result<Self, StoreError>
    where
        F: FnOnce(&mut Document) -> Result<(), StoreError>,
    {
        let root = root.into();
        let path = document_path(&root);

        let document = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse {
                path: path.clone(),
                source: e,
            })?
        } else {
            tracing::info!(path = %path.display(), "creating new cache file");
            let mut document = Document::default();
            on_create(&mut document)?;
            ensure_dir(&root)?;
            write_document(&path, &document)?;
            document
        };

        Ok(Self {
            root,
            document: Mutex::new(document),
            syncing: AtomicBool::new(false),
        })
    }

    /// `open_at` for `~/.gatherd/`.
    pub fn open<F>(on_create: F) -> Result<Self, StoreError>
    where
        F: FnOnce(&mut Document) -> Result<(), StoreError>,
    {
        Self::open_at(root()?, on_create)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// All datapoints recorded in `stream`, oldest first.
    pub fn datapoints(&self, stream: &str) -> Result<Vec<Datapoint>, StoreError> {
        validate_stream_name(stream)?;
        let path = data_path(&self.root, stream);
        if !path.exists() {
            return Ok(vec![]);
        }
        let contents = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StoreError::from))
            .collect()
    }

    /// The stored definition of `stream`, if it was added.
    pub fn stream_definition(&self, stream: &str) -> Result<Option<StreamDefinition>, StoreError> {
        validate_stream_name(stream)?;
        let path = meta_path(&self.root, stream);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        Ok(Some(serde_json::from_str(&contents)?))
    }
}

impl ConfigStore for FileStore {
    fn get(&self) -> Result<Document, StoreError> {
        Ok(self.document.lock().clone())
    }

    fn set(&self, document: Document) -> Result<(), StoreError> {
        let mut current = self.document.lock();
        write_document(&document_path(&self.root), &document)?;
        *current = document;
        Ok(())
    }

    fn update(&self, mutate: &mut dyn FnMut(&mut Document)) -> Result<Document, StoreError> {
        let mut current = self.document.lock();
        let mut next = current.clone();
        mutate(&mut next);
        if next != *current {
            write_document(&document_path(&self.root), &next)?;
            *current = next.clone();
        }
        Ok(next)
    }

    fn contains(&self, stream: &str) -> Result<bool, StoreError> {
        validate_stream_name(stream)?;
        Ok(meta_path(&self.root, stream).exists())
    }

    fn add_stream(&self, definition: &StreamDefinition) -> Result<(), StoreError> {
        validate_stream_name(&definition.name)?;
        let dir = streams_dir(&self.root);
        ensure_dir(&dir)?;

        let path = meta_path(&self.root, &definition.name);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(definition)?;
        fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        set_file_permissions(&tmp)?;
        fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
        Ok(())
    }

    fn insert(&self, stream: &str, value: Value) -> Result<(), StoreError> {
        if !self.contains(stream)? {
            return Err(StoreError::UnknownStream(stream.to_string()));
        }
        let point = Datapoint {
            t: Utc::now().timestamp_micros() as f64 / 1_000_000.0,
            d: value,
        };
        let mut line = serde_json::to_string(&point)?;
        line.push('\n');

        let path = data_path(&self.root, stream);
        let created = !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        if created {
            set_file_permissions(&path)?;
        }
        file.write_all(line.as_bytes())
            .map_err(|e| io_err(&path, e))?;
        Ok(())
    }

    fn start_sync(&self) -> Result<(), StoreError> {
        let period = self.document.lock().sync_period_seconds;
        if !self.syncing.swap(true, Ordering::SeqCst) {
            tracing::info!(period_secs = period, "store background sync enabled");
        }
        Ok(())
    }

    fn stop_sync(&self) -> Result<(), StoreError> {
        if self.syncing.swap(false, Ordering::SeqCst) {
            tracing::info!("store background sync disabled");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, StoreError> {
    dirs::home_dir().ok_or(StoreError::HomeNotFound)
}

fn ensure_dir(dir: &Path) -> Result<(), StoreError> {
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        set_dir_permissions(dir)?;
    }
    Ok(())
}

fn write_document(path: &Path, document: &Document) -> Result<(), StoreError> {
    let tmp = path.with_extension("yaml.tmp");
    let yaml = serde_yaml::to_string(document)?;
    fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700)).map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
