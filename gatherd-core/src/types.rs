//! Domain types for gatherd.
//!
//! The persisted [`Document`] keeps the legacy on-disk key names so existing
//! cache files keep loading. Every field has a default; a missing key never
//! fails a load.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// Seconds between polling cycles on a freshly created document.
pub const DEFAULT_GATHER_INTERVAL: f64 = 4.0;

/// Seconds between background sync rounds on a freshly created document.
pub const DEFAULT_SYNC_PERIOD: u64 = 60 * 60;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:3124";

// ---------------------------------------------------------------------------
// Persisted document
// ---------------------------------------------------------------------------

/// The persisted agent configuration plus the store's own settings.
///
/// The orchestration flags (`run_local`, `is_running`, `is_background_sync`,
/// `disabled_gatherers`) are only ever written by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Document {
    /// Whether to supervise a local server process.
    #[serde(rename = "runlocal")]
    pub run_local: bool,

    /// Last user intent for acquisition.
    #[serde(rename = "isrunning")]
    pub is_running: bool,

    /// Last user intent for background sync.
    #[serde(rename = "isbgsync")]
    pub is_background_sync: bool,

    #[serde(rename = "gathertime")]
    pub gather_interval_seconds: f64,

    pub disabled_gatherers: BTreeSet<String>,

    #[serde(rename = "serverurl")]
    pub server_url: String,

    #[serde(rename = "apikey", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(rename = "syncperiod")]
    pub sync_period_seconds: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            run_local: false,
            is_running: false,
            is_background_sync: false,
            gather_interval_seconds: DEFAULT_GATHER_INTERVAL,
            disabled_gatherers: BTreeSet::new(),
            server_url: DEFAULT_SERVER_URL.to_string(),
            api_key: None,
            sync_period_seconds: DEFAULT_SYNC_PERIOD,
        }
    }
}

// ---------------------------------------------------------------------------
// Streams and gatherers
// ---------------------------------------------------------------------------

/// JSON-schema-like structural description of the values a stream holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamSchema(pub Value);

impl StreamSchema {
    pub fn of_type(kind: &str) -> Self {
        Self(serde_json::json!({ "type": kind }))
    }
}

impl fmt::Display for StreamSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of a gatherer and the stream it writes into.
///
/// `nickname` and `datatype` are resolved at construction; an unset value is
/// the empty string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GathererDescriptor {
    pub stream_name: String,
    pub stream_schema: StreamSchema,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub datatype: String,
    pub description: String,
}

impl GathererDescriptor {
    pub fn new(
        stream_name: impl Into<String>,
        stream_schema: StreamSchema,
        description: impl Into<String>,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            stream_schema,
            nickname: String::new(),
            datatype: String::new(),
            description: description.into(),
        }
    }

    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = nickname.into();
        self
    }

    pub fn with_datatype(mut self, datatype: impl Into<String>) -> Self {
        self.datatype = datatype.into();
        self
    }

    /// The stream definition registered in the store for this gatherer.
    pub fn stream_definition(&self) -> StreamDefinition {
        StreamDefinition {
            name: self.stream_name.clone(),
            schema: self.stream_schema.clone(),
            description: self.description.clone(),
            nickname: self.nickname.clone(),
            datatype: self.datatype.clone(),
        }
    }
}

/// Arguments of `ConfigStore::add_stream`, persisted as stream metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDefinition {
    pub name: String,
    pub schema: StreamSchema,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub datatype: String,
}

/// Stream names double as file names, so only `[A-Za-z0-9_-]` is accepted.
pub fn validate_stream_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidStreamName(name.to_string()))
    }
}

/// One timestamped value appended to a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    /// Unix seconds with sub-second precision.
    pub t: f64,
    pub d: Value,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
