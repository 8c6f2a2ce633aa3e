//! Worktree diff of a task attempt.
//!
//! Entries are keyed by file path. Paths contain `/`, so every patch that
//! touches an entry addresses it through an escaped pointer segment; use
//! [`entry_pointer`] to build one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;
use uuid::Uuid;

use crate::endpoint::Endpoint;
use crate::pointer::Pointer;

pub const STREAM_PATH: &str = "/api/task-attempts/{id}/diff/ws";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiffChangeKind {
    Added,
    Deleted,
    Modified,
    Renamed,
    Copied,
    PermissionChange,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub change: DiffChangeKind,
    #[serde(default)]
    pub old_path: Option<String>,
    #[serde(default)]
    pub new_path: Option<String>,
    #[serde(default)]
    pub old_content: Option<String>,
    #[serde(default)]
    pub new_content: Option<String>,
    /// Set when the server dropped the contents and only sent line stats.
    #[serde(default)]
    pub content_omitted: bool,
    #[serde(default)]
    pub additions: Option<u64>,
    #[serde(default)]
    pub deletions: Option<u64>,
}

impl FileDiff {
    /// New path, or the old one for deletions.
    pub fn path(&self) -> Option<&str> {
        self.new_path.as_deref().or(self.old_path.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiffEntry {
    Diff(FileDiff),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffTotals {
    pub files: usize,
    pub additions: u64,
    pub deletions: u64,
}

/// `{ "entries": { <file path>: {"type": "DIFF", "content": FileDiff} } }`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diffs {
    #[serde(default)]
    pub entries: BTreeMap<String, DiffEntry>,
}

impl Diffs {
    pub fn get(&self, path: &str) -> Option<&FileDiff> {
        self.entries.get(path).map(|DiffEntry::Diff(diff)| diff)
    }

    /// Files in path order.
    pub fn files(&self) -> impl Iterator<Item = (&str, &FileDiff)> {
        self.entries
            .iter()
            .map(|(path, DiffEntry::Diff(diff))| (path.as_str(), diff))
    }

    pub fn totals(&self) -> DiffTotals {
        self.files().fold(DiffTotals::default(), |mut totals, (_, diff)| {
            totals.files += 1;
            totals.additions += diff.additions.unwrap_or(0);
            totals.deletions += diff.deletions.unwrap_or(0);
            totals
        })
    }
}

/// Pointer to the entry for `path`.
pub fn entry_pointer(path: &str) -> Pointer {
    Pointer::from_segments(["entries", path])
}

pub fn endpoint(base: &Url, attempt_id: Uuid, stats_only: bool) -> Endpoint {
    Endpoint::new(base, STREAM_PATH)
        .path_param("id", attempt_id)
        .query("stats_only", stats_only)
}

pub fn placeholder() -> Value {
    json!({ "entries": {} })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode;
    use crate::document::{DocumentStore, Effect};

    fn diff(path: &str, change: &str, additions: u64, deletions: u64) -> Value {
        json!({
            "type": "DIFF",
            "content": {
                "change": change,
                "old_path": path,
                "new_path": path,
                "old_content": null,
                "new_content": null,
                "content_omitted": true,
                "additions": additions,
                "deletions": deletions,
            }
        })
    }

    fn op(kind: &str, path: &str, value: Option<Value>) -> crate::decoder::Operation {
        let mut raw = json!({ "op": kind, "path": entry_pointer(path).as_str() });
        if let Some(value) = value {
            raw["value"] = value;
        }
        decode(&raw.to_string()).unwrap()
    }

    #[test]
    fn entry_pointers_escape_path_separators() {
        assert_eq!(entry_pointer("src/lib.rs").as_str(), "/entries/src~1lib.rs");
        assert_eq!(entry_pointer("a~b/50%.md").as_str(), "/entries/a~0b~150%25.md");
        assert_eq!(
            Pointer::parse(entry_pointer("a~b/50%.md").as_str())
                .unwrap()
                .segments(),
            ["entries", "a~b/50%.md"]
        );
    }

    #[test]
    fn files_are_keyed_by_their_unescaped_path() {
        let mut store = DocumentStore::new(placeholder());
        let ops = [
            op("add", "src/lib.rs", Some(diff("src/lib.rs", "modified", 3, 1))),
            op("add", "docs/a~b.md", Some(diff("docs/a~b.md", "added", 10, 0))),
            op("replace", "src/lib.rs", Some(diff("src/lib.rs", "modified", 5, 2))),
            op("add", "old.txt", Some(diff("old.txt", "deleted", 0, 4))),
            op("remove", "old.txt", None),
        ];
        for op in &ops {
            store.apply(op).unwrap();
        }
        assert_eq!(store.apply(&op("remove", "gone.rs", None)), Ok(Effect::Unchanged));
        assert!(store.commit());

        let diffs: Diffs = store.data().to_typed().unwrap();
        let paths: Vec<_> = diffs.files().map(|(path, _)| path).collect();
        assert_eq!(paths, ["docs/a~b.md", "src/lib.rs"]);
        assert_eq!(diffs.get("src/lib.rs").unwrap().additions, Some(5));
        assert_eq!(diffs.get("docs/a~b.md").unwrap().change, DiffChangeKind::Added);
        assert_eq!(
            diffs.totals(),
            DiffTotals {
                files: 2,
                additions: 15,
                deletions: 2
            }
        );
    }

    #[test]
    fn unknown_change_kinds_still_decode() {
        let entry: DiffEntry = serde_json::from_value(json!({
            "type": "DIFF",
            "content": {"change": "typeChange", "new_path": "bin/run"}
        }))
        .unwrap();
        let DiffEntry::Diff(diff) = entry;
        assert_eq!(diff.change, DiffChangeKind::Unknown);
        assert_eq!(diff.path(), Some("bin/run"));
        assert!(!diff.content_omitted);
    }

    #[test]
    fn endpoint_embeds_the_attempt() {
        let base = Url::parse("http://localhost:3000").unwrap();
        let id = Uuid::from_u128(9);
        let resolved = endpoint(&base, id, true).resolve().unwrap();
        assert_eq!(
            resolved.url.as_str(),
            format!("ws://localhost:3000/api/task-attempts/{id}/diff/ws?stats_only=true")
        );
    }
}
