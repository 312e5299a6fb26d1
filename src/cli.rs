use clap::builder::BoolishValueParser;
use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::types::{LogLevel, SearchStatus};

#[derive(Parser, Debug)]
#[command(
    name = "front-export",
    version,
    about = "Export Front conversations, messages, comments and attachments to local files"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command. Each also reads an environment
/// variable, and a `.env` file is loaded before parsing.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Front API token
    #[arg(long, env = "API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// Base URL of the Front core API
    #[arg(
        long,
        env = "FRONT_API_BASE",
        default_value = crate::front::client::DEFAULT_API_BASE,
        global = true
    )]
    pub api_base: String,

    /// Directory exports are written under
    #[arg(short = 'd', long, env = "EXPORT_DIR", default_value = "./export", global = true)]
    pub export_dir: String,

    /// Export the messages of each conversation
    #[arg(
        long,
        env = "INCLUDEMESSAGES",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub include_messages: bool,

    /// Write messages as raw .eml sources instead of JSON
    #[arg(
        long,
        env = "EXPORTASEML",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub export_as_eml: bool,

    /// Download message attachments (requires messages)
    #[arg(
        long,
        env = "INCLUDEATTACHMENTS",
        default_value_t = false,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub include_attachments: bool,

    /// Export the comments of each conversation
    #[arg(
        long,
        env = "INCLUDECOMMENTS",
        default_value_t = false,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub include_comments: bool,

    /// Give up after this many 429 responses without a retry-after header
    #[arg(long, env = "MAX_RETRIES", default_value_t = 5, global = true)]
    pub max_retries: u32,

    /// Base delay in seconds for the backoff on those responses
    #[arg(long, env = "RETRY_DELAY", default_value_t = 1, global = true)]
    pub retry_delay: u64,

    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Disable progress bar
    #[arg(long, global = true)]
    pub no_progress_bar: bool,

    /// File every log line is also appended to [default: <EXPORT_DIR>/conversations.log]
    #[arg(long, env = "LOG_FILE", global = true)]
    pub log_file: Option<String>,

    /// Only log to the console
    #[arg(long, global = true, conflicts_with = "log_file")]
    pub no_log_file: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List every inbox the token can see
    ListInboxes,
    /// Export every conversation of one inbox
    ExportInbox(ExportInboxArgs),
    /// Export every inbox in turn
    ExportAll(ResumeArgs),
    /// Export the conversations matching a search query
    ExportSearch(ExportSearchArgs),
    /// Show export progress of an inbox without exporting
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ResumeArgs {
    /// Skip conversations already recorded in the progress log
    #[arg(long)]
    pub resume: bool,

    /// Discard the cached conversation manifest and list it again
    #[arg(long)]
    pub refresh_manifest: bool,

    /// Only export the conversation IDs listed in this file, one per line
    #[arg(long, value_name = "FILE")]
    pub only: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ExportInboxArgs {
    /// Inbox ID (see `list-inboxes`)
    pub inbox_id: String,

    #[command(flatten)]
    pub resume: ResumeArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ExportSearchArgs {
    /// Free-text search
    pub text: String,

    /// Only conversations before this date (ISO date, datetime, or interval like 20d)
    #[arg(long)]
    pub before: Option<String>,

    /// Only conversations after this date (ISO date, datetime, or interval like 20d)
    #[arg(long)]
    pub after: Option<String>,

    /// Only conversations on the day of this date; overrides --before/--after
    #[arg(long)]
    pub during: Option<String>,

    /// Conversation status filter (repeatable)
    #[arg(long = "status", value_enum)]
    pub statuses: Vec<SearchStatus>,

    #[command(flatten)]
    pub resume: ResumeArgs,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Inbox ID (see `list-inboxes`)
    pub inbox_id: String,
}
