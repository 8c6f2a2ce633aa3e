use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;
use uuid::Uuid;

use crate::endpoint::Endpoint;

pub const NORMALIZED_LOGS_PATH: &str = "/api/execution-processes/{id}/normalized-logs/ws";
pub const RAW_LOGS_PATH: &str = "/api/execution-processes/{id}/raw-logs/ws";

/// One transcript entry. Normalized entries and diffs are kept opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationEntry {
    NormalizedEntry(Value),
    Stdout(String),
    Stderr(String),
    Diff(Value),
}

impl ConversationEntry {
    /// Text of raw output entries.
    pub fn output(&self) -> Option<&str> {
        match self {
            ConversationEntry::Stdout(text) | ConversationEntry::Stderr(text) => Some(text),
            _ => None,
        }
    }
}

/// `{ "entries": [ {type, content}, ... ] }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(default)]
    pub entries: Vec<ConversationEntry>,
}

impl Conversation {
    /// Concatenated stdout and stderr, in arrival order.
    pub fn raw_output(&self) -> String {
        self.entries
            .iter()
            .filter_map(ConversationEntry::output)
            .collect()
    }
}

pub fn normalized_logs(base: &Url, process_id: Uuid) -> Endpoint {
    Endpoint::new(base, NORMALIZED_LOGS_PATH).path_param("id", process_id)
}

pub fn raw_logs(base: &Url, process_id: Uuid) -> Endpoint {
    Endpoint::new(base, RAW_LOGS_PATH).path_param("id", process_id)
}

pub fn placeholder() -> Value {
    json!({ "entries": [] })
}
