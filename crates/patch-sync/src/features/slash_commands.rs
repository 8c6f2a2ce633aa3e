use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;
use uuid::Uuid;

use crate::endpoint::Endpoint;

pub const STREAM_PATH: &str = "/api/agents/slash-commands/ws";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashCommand {
    /// Without the leading slash.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// `{ "commands": [..], "discovering": bool, "error": string | null }`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashCommands {
    #[serde(default)]
    pub commands: Vec<SlashCommand>,
    #[serde(default)]
    pub discovering: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl SlashCommands {
    /// Commands whose name starts with `prefix`, as typed after the slash.
    pub fn matching<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a SlashCommand> + 'a {
        let prefix = prefix.trim_start_matches('/');
        self.commands
            .iter()
            .filter(move |command| command.name.starts_with(prefix))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub workspace_id: Option<Uuid>,
    pub repo_id: Option<Uuid>,
}

pub fn endpoint(base: &Url, executor: &str, scope: &Scope) -> Endpoint {
    let mut endpoint = Endpoint::new(base, STREAM_PATH).query("executor", executor);
    if let Some(workspace_id) = scope.workspace_id {
        endpoint = endpoint.query("workspace_id", workspace_id);
    }
    if let Some(repo_id) = scope.repo_id {
        endpoint = endpoint.query("repo_id", repo_id);
    }
    endpoint
}

pub fn placeholder() -> Value {
    json!({ "commands": [], "discovering": false, "error": null })
}
