use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use patch_sync::features::{conversation, diffs, execution_processes, slash_commands};
use patch_sync::{Endpoint, SyncConfig};
use serde_json::Value;
use url::Url;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "patch-watch",
    about = "Follow a JSON-patch stream and print the synchronized document",
    version
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "PATCH_WATCH_BASE_URL",
        default_value = "http://127.0.0.1:3000",
        help = "Base URL of the server; http(s) is dialed as ws(s)"
    )]
    pub base_url: String,

    #[arg(
        long,
        global = true,
        value_name = "MS",
        help = "Give up when no snapshot arrives this long after connecting (0 waits forever)"
    )]
    pub snapshot_timeout_ms: Option<u64>,

    #[arg(
        long,
        global = true,
        value_name = "N",
        help = "Stop after this many failed reconnects (default: retry forever)"
    )]
    pub max_attempts: Option<u32>,

    #[arg(long, global = true, help = "Print the full document on every change")]
    pub print_data: bool,

    #[arg(long, global = true, help = "Print prometheus metrics on exit")]
    pub metrics: bool,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Applies command-line overrides on top of the environment configuration.
    pub fn sync_config(&self, mut config: SyncConfig) -> SyncConfig {
        if let Some(ms) = self.snapshot_timeout_ms {
            config.snapshot_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if self.max_attempts.is_some() {
            config.backoff.max_attempts = self.max_attempts;
        }
        config
    }

    pub fn base(&self) -> Result<Url> {
        Url::parse(&self.base_url).with_context(|| format!("invalid --base-url `{}`", self.base_url))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "PATCH_WATCH_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-filter",
        global = true,
        env = "RUST_LOG",
        value_name = "FILTER",
        help = "Full tracing filter directive; overrides --log-level"
    )]
    pub filter: Option<String>,
}

impl LoggingArgs {
    pub fn directive(&self) -> String {
        if let Some(filter) = &self.filter {
            return filter.clone();
        }
        let level = match self.level {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        level.to_string()
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execution processes of one session
    Processes(ProcessesArgs),
    /// Conversation log of one execution process
    Logs(LogsArgs),
    /// Slash commands offered by an executor
    SlashCommands(SlashCommandsArgs),
    /// Worktree diff of a task attempt
    Diff(DiffArgs),
    /// Any stream, addressed by path template
    Raw(RawArgs),
}

#[derive(Args, Debug)]
pub struct ProcessesArgs {
    #[arg(long, value_name = "UUID")]
    pub session_id: Uuid,

    #[arg(long, help = "Include processes dropped from the history view")]
    pub show_soft_deleted: bool,
}

#[derive(Args, Debug)]
pub struct LogsArgs {
    #[arg(long, value_name = "UUID")]
    pub process_id: Uuid,

    #[arg(long, help = "Follow raw stdout/stderr instead of normalized entries")]
    pub raw: bool,
}

#[derive(Args, Debug)]
pub struct SlashCommandsArgs {
    #[arg(long, value_name = "NAME")]
    pub executor: String,

    #[arg(long, value_name = "UUID")]
    pub workspace_id: Option<Uuid>,

    #[arg(long, value_name = "UUID")]
    pub repo_id: Option<Uuid>,
}

#[derive(Args, Debug)]
pub struct DiffArgs {
    #[arg(long, value_name = "UUID")]
    pub attempt_id: Uuid,

    #[arg(long, help = "Only stream line counts, not file contents")]
    pub stats_only: bool,
}

#[derive(Args, Debug)]
pub struct RawArgs {
    #[arg(long, value_name = "TEMPLATE", help = "Path template, e.g. /api/things/{id}/ws")]
    pub path: String,

    #[arg(long = "param", value_name = "NAME=VALUE", value_parser = parse_pair)]
    pub params: Vec<(String, String)>,

    #[arg(long = "query", value_name = "NAME=VALUE", value_parser = parse_pair)]
    pub query: Vec<(String, String)>,

    #[arg(long, value_name = "JSON", default_value = "{}", value_parser = parse_json)]
    pub placeholder: Value,
}

/// Which typed summary to print for a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Processes,
    Conversation,
    SlashCommands,
    Diffs,
    Raw,
}

pub struct Target {
    pub endpoint: Endpoint,
    pub placeholder: Value,
    pub shape: Shape,
}

impl Command {
    pub fn target(&self, base: &Url) -> Target {
        match self {
            Command::Processes(args) => Target {
                endpoint: execution_processes::endpoint(base, args.session_id, args.show_soft_deleted),
                placeholder: execution_processes::placeholder(),
                shape: Shape::Processes,
            },
            Command::Logs(args) => Target {
                endpoint: if args.raw {
                    conversation::raw_logs(base, args.process_id)
                } else {
                    conversation::normalized_logs(base, args.process_id)
                },
                placeholder: conversation::placeholder(),
                shape: Shape::Conversation,
            },
            Command::SlashCommands(args) => {
                let scope = slash_commands::Scope {
                    workspace_id: args.workspace_id,
                    repo_id: args.repo_id,
                };
                Target {
                    endpoint: slash_commands::endpoint(base, &args.executor, &scope),
                    placeholder: slash_commands::placeholder(),
                    shape: Shape::SlashCommands,
                }
            }
            Command::Diff(args) => Target {
                endpoint: diffs::endpoint(base, args.attempt_id, args.stats_only),
                placeholder: diffs::placeholder(),
                shape: Shape::Diffs,
            },
            Command::Raw(args) => {
                let mut endpoint = Endpoint::new(base, args.path.clone());
                for (name, value) in &args.params {
                    endpoint = endpoint.path_param(name.clone(), value);
                }
                for (name, value) in &args.query {
                    endpoint = endpoint.query(name.clone(), value);
                }
                Target {
                    endpoint,
                    placeholder: args.placeholder.clone(),
                    shape: Shape::Raw,
                }
            }
        }
    }
}

fn parse_pair(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected NAME=VALUE, got `{raw}`"))?;
    if name.is_empty() {
        return Err(anyhow!("empty name in `{raw}`"));
    }
    Ok((name.to_string(), value.to_string()))
}

fn parse_json(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).context("placeholder must be valid JSON")
}
