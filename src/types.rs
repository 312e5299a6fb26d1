#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Statuses accepted by the `is:` search filter. Includes the searchable
/// states beyond those stored on a conversation (`open`, `snoozed`,
/// `unreplied`). See <https://dev.frontapp.com/docs/search-1>.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum SearchStatus {
    Archived,
    Deleted,
    Waiting,
    Assigned,
    Unassigned,
    Open,
    Snoozed,
    Unreplied,
}

impl SearchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStatus::Archived => "archived",
            SearchStatus::Deleted => "deleted",
            SearchStatus::Waiting => "waiting",
            SearchStatus::Assigned => "assigned",
            SearchStatus::Unassigned => "unassigned",
            SearchStatus::Open => "open",
            SearchStatus::Snoozed => "snoozed",
            SearchStatus::Unreplied => "unreplied",
        }
    }
}
