//! Module for publishing records to the realtime datastore.
use serde_json::Value;
use thiserror::Error;

use crate::path::{DatastorePath, NodePath};
use crate::record::Record;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PublishError {
    /// The datastore could not be reached.
    #[error("network failure: {0}")]
    NetworkFailed(String),
    /// The datastore answered but refused the request.
    #[error("rejected with status {status}: {reason}")]
    Rejected { status: u16, reason: String },
    /// Request or response body could not be (de)serialized.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Path addressed JSON tree store.
pub trait Datastore {
    /// Replaces the value at `path`.
    fn put(&self, path: &DatastorePath, body: &Value, auth: Option<&str>) -> Result<(), PublishError>;
    /// Appends `body` under `path` and returns the key the store generated for it.
    fn push(&self, path: &DatastorePath, body: &Value, auth: Option<&str>) -> Result<String, PublishError>;
    /// Reads the value at `path`. A missing value is `Value::Null`.
    fn get(&self, path: &DatastorePath, auth: Option<&str>) -> Result<Value, PublishError>;
}

#[derive(Debug, Clone, PartialEq)]
/// Outcome of a publish to one destination.
pub struct PublishResult {
    pub success: bool,
    pub reason: Option<String>,
}

impl PublishResult {
    pub fn ok() -> Self {
        PublishResult { success: true, reason: None }
    }

    pub fn failed(err: &PublishError) -> Self {
        PublishResult { success: false, reason: Some(err.to_string()) }
    }
}

/// Writes records to the latest snapshot and the history of a node.
///
/// The two destinations are independent. There is no retry here, the next cycle writes
/// the full snapshot again.
pub struct SyncClient {
    store: Box<dyn Datastore>,
}

impl SyncClient {
    pub fn new(store: Box<dyn Datastore>) -> Self {
        SyncClient { store }
    }

    /// Overwrites `nodes/<identity>/latest` with `record`.
    pub fn publish_latest(&self, node: &NodePath, auth: Option<&str>, record: &Record) -> PublishResult {
        let path = node.latest();
        let result = encode(record).and_then(|body| self.store.put(&path, &body, auth));
        match result {
            Ok(()) => {
                log::debug!(target: "gianode::sync", "Wrote \'{}\'", path);
                PublishResult::ok()
            }
            Err(err) => {
                log::warn!(target: "gianode::sync", "Could not write latest record to \'{}\': \'{}\'", path, err);
                PublishResult::failed(&err)
            }
        }
    }

    /// Appends `record` to `nodes/<identity>/history` under a store generated key.
    pub fn publish_history(&self, node: &NodePath, auth: Option<&str>, record: &Record) -> PublishResult {
        let path = node.history();
        let result = encode(record).and_then(|body| self.store.push(&path, &body, auth));
        match result {
            Ok(key) => {
                log::debug!(target: "gianode::sync", "Appended \'{}/{}\'", path, key);
                PublishResult::ok()
            }
            Err(err) => {
                log::warn!(target: "gianode::sync", "Could not append history record to \'{}\': \'{}\'", path, err);
                PublishResult::failed(&err)
            }
        }
    }
}

fn encode(record: &Record) -> Result<Value, PublishError> {
    serde_json::to_value(record).map_err(|err| PublishError::Malformed(err.to_string()))
}
