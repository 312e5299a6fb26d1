use std::path::{Path, PathBuf};

use super::error::ExportError;
use super::paths;
use super::progress::{Manifest, ProgressLog};
use crate::front::{Conversation, FrontClient, FrontError, Inbox, SearchQuery};

/// A collection of conversations exported into one directory.
#[derive(Debug, Clone)]
pub enum ExportTarget {
    Inbox(Inbox),
    Search(SearchQuery),
}

impl ExportTarget {
    /// Human-readable name for logs and summaries.
    pub fn label(&self) -> String {
        match self {
            ExportTarget::Inbox(inbox) => format!("inbox '{}' ({})", inbox.name, inbox.id),
            ExportTarget::Search(query) => format!("search '{}'", query.to_query_string()),
        }
    }

    /// Directory the target exports into, under `export_root`.
    pub fn dir(&self, export_root: &Path) -> PathBuf {
        match self {
            ExportTarget::Inbox(inbox) => {
                export_root.join(paths::inbox_dir_name(&inbox.name, &inbox.id))
            }
            ExportTarget::Search(_) => export_root.join(paths::SEARCH_DIRNAME),
        }
    }

    pub fn manifest(&self, export_root: &Path) -> Manifest {
        let name = match self {
            ExportTarget::Inbox(inbox) => format!("{}.json", paths::clean_filename(&inbox.id)),
            ExportTarget::Search(query) => paths::search_manifest_name(&query.to_query_string()),
        };
        Manifest::new(self.dir(export_root).join(name))
    }

    pub fn progress_log(&self, export_root: &Path) -> ProgressLog {
        ProgressLog::in_dir(&self.dir(export_root))
    }

    /// List every conversation of the target from the API.
    pub async fn list_conversations(
        &self,
        client: &FrontClient,
    ) -> Result<Vec<Conversation>, FrontError> {
        match self {
            ExportTarget::Inbox(inbox) => client.list_inbox_conversations(&inbox.id).await,
            ExportTarget::Search(query) => client.search_conversations(&query.encoded()).await,
        }
    }
}

/// Pick the inbox with `inbox_id` out of a listing.
pub fn find_inbox(inboxes: Vec<Inbox>, inbox_id: &str) -> Result<Inbox, ExportError> {
    inboxes
        .into_iter()
        .find(|inbox| inbox.id == inbox_id)
        .ok_or_else(|| ExportError::TargetNotFound(inbox_id.to_string()))
}
