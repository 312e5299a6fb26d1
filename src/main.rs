//! front-export: a resumable exporter for Front helpdesk data.
//!
//! Lists the conversations of an inbox or a search into a cached manifest,
//! then writes each conversation with its messages, attachments and comments
//! to disk. Finished conversation IDs are appended to a progress log so an
//! interrupted run picks up where it stopped with `--resume`.

#![warn(clippy::all)]

mod cli;
mod config;
mod export;
mod front;
mod logging;
mod retry;
mod types;

use anyhow::Context;
use clap::Parser;
use indicatif::MultiProgress;

use cli::{Command, ExportInboxArgs, ExportSearchArgs, ResumeArgs, StatusArgs};
use config::Config;
use export::{CurrentProgress, ExportOutcome, ExportTarget, Exporter};
use front::{FrontClient, Inbox};

fn build_client(config: &Config) -> anyhow::Result<FrontClient> {
    FrontClient::new(&config.client_config()).context("Failed to create Front API client")
}

/// List inboxes, pointing at the token when Front rejects it.
async fn list_inboxes(client: &FrontClient) -> anyhow::Result<Vec<Inbox>> {
    client.list_inboxes().await.map_err(|e| match e.status() {
        Some(401) | Some(403) => {
            anyhow::Error::new(e).context("Front rejected the API token; check API_KEY")
        }
        _ => e.into(),
    })
}

async fn exporter<'a>(
    config: &Config,
    client: &'a FrontClient,
    progress: &MultiProgress,
    resume: &ResumeArgs,
) -> anyhow::Result<Exporter<'a>> {
    let mut exporter = Exporter::new(client, &config.export_dir, config.options)
        .with_progress_bar(!config.no_progress_bar)
        .with_progress(progress.clone());
    if let Some(path) = &resume.only {
        let ids = export::read_id_list(path)
            .await
            .with_context(|| format!("Failed to read conversation list {}", path.display()))?;
        tracing::info!("{} conversation IDs listed in {}", ids.len(), path.display());
        exporter = exporter.with_only(ids);
    }
    Ok(exporter)
}

fn print_summary(label: &str, outcome: &ExportOutcome) {
    println!();
    println!("Summary for {}:", label);
    println!("  {} conversations in manifest", outcome.conversations.len());
    println!("  {} exported", outcome.exported);
    if outcome.skipped > 0 {
        println!("  {} skipped (already exported)", outcome.skipped);
    }
    if outcome.failed > 0 {
        println!("  {} failed (will be retried on --resume)", outcome.failed);
    }
    if outcome.sub_resource_failures > 0 {
        println!(
            "  {} messages, comments or attachments could not be saved",
            outcome.sub_resource_failures
        );
    }
    println!("  elapsed: {}", export::format_duration(outcome.elapsed));
}

/// Run the list-inboxes command.
async fn run_list_inboxes(config: &Config) -> anyhow::Result<()> {
    let client = build_client(config)?;
    let inboxes = list_inboxes(&client).await?;
    for inbox in inboxes {
        println!("{}\t{}", inbox.id, inbox.name);
    }
    Ok(())
}

async fn run_export_target(
    config: &Config,
    client: &FrontClient,
    progress: &MultiProgress,
    target: ExportTarget,
    resume: &ResumeArgs,
) -> anyhow::Result<()> {
    let outcome = exporter(config, client, progress, resume)
        .await?
        .export_target(&target, resume.resume, resume.refresh_manifest)
        .await?;
    print_summary(&target.label(), &outcome);
    if outcome.failed > 0 {
        anyhow::bail!(
            "{} conversations of {} failed to export",
            outcome.failed,
            target.label()
        );
    }
    Ok(())
}

/// Run the export-inbox command.
async fn run_export_inbox(
    config: &Config,
    progress: &MultiProgress,
    args: ExportInboxArgs,
) -> anyhow::Result<()> {
    let client = build_client(config)?;
    let inbox = export::find_inbox(list_inboxes(&client).await?, &args.inbox_id)?;
    let target = ExportTarget::Inbox(inbox);
    run_export_target(config, &client, progress, target, &args.resume).await
}

/// Run the export-search command.
async fn run_export_search(
    config: &Config,
    progress: &MultiProgress,
    args: ExportSearchArgs,
) -> anyhow::Result<()> {
    let query = config::search_query_from_args(&args)?;
    if query.range.is_empty() && query.statuses.is_empty() {
        tracing::warn!(
            "No date or status filter given; every conversation matching the text is exported"
        );
    }
    tracing::info!("Search query: {}", query.to_query_string());
    let client = build_client(config)?;
    let target = ExportTarget::Search(query);
    run_export_target(config, &client, progress, target, &args.resume).await
}

/// Run the export-all command.
async fn run_export_all(
    config: &Config,
    progress: &MultiProgress,
    args: ResumeArgs,
) -> anyhow::Result<()> {
    let client = build_client(config)?;
    let inboxes = list_inboxes(&client).await?;
    tracing::info!("Exporting {} inboxes", inboxes.len());

    let results = exporter(config, &client, progress, &args)
        .await?
        .export_inboxes(inboxes, args.resume, args.refresh_manifest)
        .await;

    let mut failed_inboxes = 0usize;
    let mut failed_conversations = 0usize;
    for (inbox, result) in &results {
        let label = ExportTarget::Inbox(inbox.clone()).label();
        match result {
            Ok(outcome) => {
                print_summary(&label, outcome);
                failed_conversations += outcome.failed;
            }
            Err(e) => {
                println!();
                println!("Summary for {}:", label);
                println!("  export failed: {}", e);
                failed_inboxes += 1;
            }
        }
    }

    if failed_inboxes > 0 || failed_conversations > 0 {
        anyhow::bail!(
            "{} of {} inboxes failed, {} conversations failed to export",
            failed_inboxes,
            results.len(),
            failed_conversations
        );
    }
    Ok(())
}

/// Run the status command.
async fn run_status(config: &Config, args: StatusArgs) -> anyhow::Result<()> {
    let client = build_client(config)?;
    let inbox = export::find_inbox(list_inboxes(&client).await?, &args.inbox_id)?;
    let target = ExportTarget::Inbox(inbox);

    let manifest = target.manifest(&config.export_dir);
    let Some(conversations) = manifest.load().await? else {
        println!("No manifest found at {}", manifest.path().display());
        println!("Run export-inbox first to create it.");
        return Ok(());
    };
    let completed = target
        .progress_log(&config.export_dir)
        .completed()
        .await?;
    let progress = CurrentProgress::compute(conversations, completed, true);

    println!("Export of {}", target.label());
    println!("  Directory: {}", target.dir(&config.export_dir).display());
    println!("  Total:     {}", progress.total());
    println!("  Done:      {}", progress.done());
    println!("  Remaining: {}", progress.required.len());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = cli::Cli::parse();

    let config = Config::from_cli(&cli.global)?;

    let progress = MultiProgress::new();
    logging::init(
        cli.global.log_level,
        progress.clone(),
        config.log_file.as_deref(),
    )?;
    tracing::debug!(?config, "Starting front-export");

    match cli.command {
        Command::ListInboxes => run_list_inboxes(&config).await,
        Command::ExportInbox(args) => run_export_inbox(&config, &progress, args).await,
        Command::ExportAll(args) => run_export_all(&config, &progress, args).await,
        Command::ExportSearch(args) => run_export_search(&config, &progress, args).await,
        Command::Status(args) => run_status(&config, args).await,
    }
}
