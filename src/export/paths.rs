use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_json::Number;
use sha2::{Digest, Sha256};

pub const PROGRESS_LOG_FILENAME: &str = "progress.log";
pub const SEARCH_DIRNAME: &str = "search";
const ATTACHMENTS_DIRNAME: &str = "attachments";
const FALLBACK_ATTACHMENT_NAME: &str = "attachment";

/// Clean a filename by removing characters that are invalid on common
/// filesystems: `/`, `\`, `:`, `*`, `?`, `"`, `<`, `>`, `|`.
pub fn clean_filename(filename: &str) -> String {
    filename
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .filter(|c| !c.is_control())
        .collect()
}

/// Directory name for an inbox export. Falls back to the inbox id when the
/// cleaned name is empty or would escape the export root.
pub fn inbox_dir_name(inbox_name: &str, inbox_id: &str) -> String {
    let cleaned = clean_filename(inbox_name);
    let trimmed = cleaned.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        clean_filename(inbox_id)
    } else {
        trimmed.to_string()
    }
}

/// Manifest filename for a search, keyed by a short hash of the query so
/// different searches sharing `export/search` keep separate manifests.
pub fn search_manifest_name(query: &str) -> String {
    let digest = Sha256::digest(query.as_bytes());
    let hex: String = digest.iter().take(6).map(|b| format!("{:02x}", b)).collect();
    format!("search-{}.json", hex)
}

/// Render an API timestamp (unix seconds, possibly fractional) the way it
/// appears in filenames: exactly as the API sent it, `1453770984.123` or
/// `1453770984`.
pub fn format_timestamp(ts: &Number) -> String {
    ts.to_string()
}

pub fn conversation_dir(target_dir: &Path, conversation_id: &str) -> PathBuf {
    target_dir.join(clean_filename(conversation_id))
}

pub fn conversation_record_path(conversation_dir: &Path, conversation_id: &str) -> PathBuf {
    conversation_dir.join(format!("{}.json", clean_filename(conversation_id)))
}

pub fn message_json_path(
    conversation_dir: &Path,
    created_at: &Number,
    message_id: &str,
) -> PathBuf {
    conversation_dir.join(format!(
        "{}-message-{}.json",
        format_timestamp(created_at),
        clean_filename(message_id)
    ))
}

pub fn message_eml_path(conversation_dir: &Path, created_at: &Number, message_id: &str) -> PathBuf {
    conversation_dir.join(format!(
        "{}-{}.eml",
        format_timestamp(created_at),
        clean_filename(message_id)
    ))
}

pub fn comment_path(conversation_dir: &Path, posted_at: &Number, comment_id: &str) -> PathBuf {
    conversation_dir.join(format!(
        "{}-comment-{}.json",
        format_timestamp(posted_at),
        clean_filename(comment_id)
    ))
}

pub fn attachment_dir(conversation_dir: &Path, message_id: &str) -> PathBuf {
    conversation_dir
        .join(ATTACHMENTS_DIRNAME)
        .join(clean_filename(message_id))
}

/// Path for an attachment of one message. `taken` holds the names already
/// used for that message; a repeated name gets a `-1`, `-2`, ... suffix
/// before its extension.
pub fn attachment_path(
    attachment_dir: &Path,
    filename: &str,
    taken: &mut HashSet<String>,
) -> PathBuf {
    let cleaned = clean_filename(filename);
    let name = match cleaned.trim() {
        "" | "." | ".." => FALLBACK_ATTACHMENT_NAME,
        name => name,
    };

    let mut candidate = name.to_string();
    let mut n = 1;
    while !taken.insert(candidate.clone()) {
        candidate = suffixed(name, n);
        n += 1;
    }
    attachment_dir.join(candidate)
}

fn suffixed(name: &str, n: usize) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}-{}{}", &name[..dot], n, &name[dot..]),
        _ => format!("{}-{}", name, n),
    }
}

/// Create `path` and its parents. An existing directory is not an error and
/// its contents are left untouched.
pub async fn ensure_dir(path: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(path).await
}
