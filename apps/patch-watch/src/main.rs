mod cli;
mod telemetry;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use patch_sync::features::conversation::Conversation;
use patch_sync::features::diffs::Diffs;
use patch_sync::features::execution_processes::ExecutionProcesses;
use patch_sync::features::slash_commands::SlashCommands;
use patch_sync::{metrics, ConnectionState, SyncClient, SyncConfig, SyncView};
use tracing::{info, warn};

use cli::{Cli, Shape};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    telemetry::init_tracing(&cli.logging.directive());

    let config = cli.sync_config(SyncConfig::from_env());
    let base = cli.base()?;
    let target = cli.command.target(&base);
    let resolved = target.endpoint.resolve()?;
    info!(url = %resolved.url, "subscribing");

    let client = SyncClient::websocket(config);
    let mut subscription = client.subscribe(target.placeholder);
    subscription.update(Some(&target.endpoint), true)?;
    let mut views = subscription.watch();

    let outcome = loop {
        let view = views.borrow_and_update().clone();
        println!("{}", describe(&view, target.shape));
        if cli.print_data {
            println!("{}", serde_json::to_string_pretty(view.data().value())?);
        }
        match view.state() {
            ConnectionState::Completed => break ExitCode::SUCCESS,
            ConnectionState::Errored => break ExitCode::FAILURE,
            _ => {}
        }

        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break ExitCode::FAILURE;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break ExitCode::SUCCESS;
            }
        }
    };

    let counters = subscription.counters();
    info!(
        frames = counters.frames,
        operations = counters.operations_applied,
        snapshots = counters.snapshots,
        decode_errors = counters.decode_errors,
        apply_errors = counters.apply_errors,
        reconnects = counters.reconnects,
        "stream summary"
    );
    subscription.close();

    if cli.metrics {
        print!("{}", metrics::render());
    }
    Ok(outcome)
}

fn describe(view: &SyncView, shape: Shape) -> String {
    let status = format!(
        "[{}] connected={} initialized={}",
        view.state(),
        view.is_connected(),
        view.is_initialized()
    );
    let error = view
        .error()
        .map(|err| format!(" error=\"{err}\""))
        .unwrap_or_default();
    format!("{status}{error} {}", summarize(view, shape))
}

fn summarize(view: &SyncView, shape: Shape) -> String {
    let summary = match shape {
        Shape::Processes => view.decode::<ExecutionProcesses>().map(|doc| {
            let visible = doc.visible();
            format!(
                "processes={} visible={} running={}",
                doc.execution_processes.len(),
                visible.len(),
                doc.is_any_running()
            )
        }),
        Shape::Conversation => view
            .decode::<Conversation>()
            .map(|doc| format!("entries={}", doc.entries.len())),
        Shape::SlashCommands => view.decode::<SlashCommands>().map(|doc| {
            let names: Vec<_> = doc.commands.iter().map(|c| format!("/{}", c.name)).collect();
            format!(
                "commands=[{}] discovering={}",
                names.join(", "),
                doc.discovering
            )
        }),
        Shape::Diffs => view.decode::<Diffs>().map(|doc| {
            let totals = doc.totals();
            format!(
                "files={} +{} -{}",
                totals.files, totals.additions, totals.deletions
            )
        }),
        Shape::Raw => Ok(format!("bytes={}", view.data().to_string().len())),
    };
    summary.unwrap_or_else(|err| {
        warn!(error = %err, "document does not match the expected shape");
        "shape=unexpected".to_string()
    })
}
