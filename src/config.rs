use crate::cli::{ExportSearchArgs, GlobalArgs};
use crate::export::ExportOptions;
use crate::front::{ClientConfig, DateRange, SearchQuery};
use crate::retry::BackoffConfig;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use std::path::PathBuf;

const LOG_FILENAME: &str = "conversations.log";

/// Application configuration.
pub struct Config {
    pub api_key: String,
    pub api_base: String,
    pub export_dir: PathBuf,
    pub backoff: BackoffConfig,
    pub options: ExportOptions,
    pub no_progress_bar: bool,
    /// `None` when file logging is disabled.
    pub log_file: Option<PathBuf>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("export_dir", &self.export_dir)
            .field("options", &self.options)
            .field("log_file", &self.log_file)
            .finish_non_exhaustive()
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_cli(args: &GlobalArgs) -> anyhow::Result<Self> {
        let api_key = args
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "API_KEY is not set; set it in the environment, a .env file, or pass --api-key"
                )
            })?;
        let export_dir = expand_tilde(&args.export_dir);
        let log_file = if args.no_log_file {
            None
        } else {
            Some(match &args.log_file {
                Some(path) => expand_tilde(path),
                None => export_dir.join(LOG_FILENAME),
            })
        };
        Ok(Self {
            api_key: api_key.to_string(),
            api_base: args.api_base.clone(),
            export_dir,
            backoff: BackoffConfig {
                max_retries: args.max_retries,
                base_delay_secs: args.retry_delay,
                ..BackoffConfig::default()
            },
            options: ExportOptions {
                include_messages: args.include_messages,
                export_as_eml: args.export_as_eml,
                include_attachments: args.include_attachments,
                include_comments: args.include_comments,
            },
            no_progress_bar: args.no_progress_bar,
            log_file,
        })
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            api_base: self.api_base.clone(),
            token: self.api_key.clone(),
            backoff: self.backoff,
        }
    }
}

/// Build the search query for `export-search`, resolving date arguments to
/// unix seconds.
pub fn search_query_from_args(args: &ExportSearchArgs) -> anyhow::Result<SearchQuery> {
    let to_unix = |s: &Option<String>| -> anyhow::Result<Option<i64>> {
        Ok(s.as_deref()
            .map(parse_date_or_interval)
            .transpose()?
            .map(|dt| dt.timestamp()))
    };
    Ok(SearchQuery {
        text: args.text.clone(),
        range: DateRange {
            before: to_unix(&args.before)?,
            after: to_unix(&args.after)?,
            during: to_unix(&args.during)?,
        },
        statuses: args.statuses.clone(),
    })
}

/// Parse a human-friendly date string into a concrete timestamp.
///
/// Supports three formats:
/// - Relative interval: `"20d"` (20 days ago from now)
/// - ISO date: `"2025-01-02"` (midnight local time)
/// - ISO datetime: `"2025-01-02T14:30:00"` (local time)
pub(crate) fn parse_date_or_interval(s: &str) -> anyhow::Result<DateTime<Local>> {
    if let Some(days_str) = s.strip_suffix('d') {
        if let Ok(days) = days_str.parse::<i64>() {
            return Ok(Local::now() - chrono::Duration::days(days));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive_dt) = date.and_hms_opt(0, 0, 0) {
            if let Some(dt) = naive_dt.and_local_timezone(Local).single() {
                return Ok(dt);
            }
        }
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        if let Some(local) = dt.and_local_timezone(Local).single() {
            return Ok(local);
        }
    }
    anyhow::bail!(
        "Cannot parse '{}' as a date. Expected ISO date (2025-01-02), \
         datetime (2025-01-02T14:30:00), or interval (20d)",
        s
    )
}
