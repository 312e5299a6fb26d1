//! Export engine: resolves what a target still needs, then exports each
//! required conversation in manifest order, one at a time. A conversation is
//! appended to the progress log only after its record, messages,
//! attachments and comments have all been handled, so an interrupted run
//! redoes at most the conversation it was working on.

pub mod error;
pub mod paths;
pub mod progress;
pub mod target;

use std::collections::HashSet;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Serialize;

pub use error::ExportError;
pub use progress::{read_id_list, CurrentProgress, ProgressLog};
pub use target::{find_inbox, ExportTarget};

use crate::front::{Conversation, FrontClient, Inbox, Message};

/// Which parts of each conversation to export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    pub include_messages: bool,
    /// Write raw `.eml` sources instead of message JSON.
    pub export_as_eml: bool,
    /// Attachments are discovered through messages, so this only takes
    /// effect together with `include_messages`.
    pub include_attachments: bool,
    pub include_comments: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_messages: true,
            export_as_eml: true,
            include_attachments: false,
            include_comments: false,
        }
    }
}

/// Result of exporting one target.
#[derive(Debug, Default)]
pub struct ExportOutcome {
    /// Every conversation that was considered, in manifest order.
    pub conversations: Vec<Conversation>,
    pub exported: usize,
    /// Conversations not in the required set.
    pub skipped: usize,
    /// Conversations that could not be exported and stay pending.
    pub failed: usize,
    /// Individual message, comment or attachment files that were lost.
    pub sub_resource_failures: usize,
    pub elapsed: Duration,
}

/// Drives exports for one API client and export root.
pub struct Exporter<'a> {
    client: &'a FrontClient,
    export_root: PathBuf,
    options: ExportOptions,
    no_progress_bar: bool,
    progress: MultiProgress,
    only: Option<HashSet<String>>,
}

impl<'a> Exporter<'a> {
    pub fn new(
        client: &'a FrontClient,
        export_root: impl Into<PathBuf>,
        options: ExportOptions,
    ) -> Self {
        Self {
            client,
            export_root: export_root.into(),
            options,
            no_progress_bar: false,
            progress: MultiProgress::new(),
            only: None,
        }
    }

    pub fn with_progress_bar(mut self, enabled: bool) -> Self {
        self.no_progress_bar = !enabled;
        self
    }

    /// Draw progress bars through `progress`, the handle the console log
    /// writer suspends.
    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Only export conversations whose ids are in `ids`.
    pub fn with_only(mut self, ids: HashSet<String>) -> Self {
        self.only = Some(ids);
        self
    }

    /// Work out what `target` still needs.
    ///
    /// The manifest is listed from the API and cached on the first run;
    /// later runs reuse the cached copy. With `refresh_manifest` the cache is
    /// dropped first.
    pub async fn get_current_progress(
        &self,
        target: &ExportTarget,
        resume: bool,
        refresh_manifest: bool,
    ) -> Result<CurrentProgress, ExportError> {
        let dir = target.dir(&self.export_root);
        paths::ensure_dir(&dir)
            .await
            .map_err(|source| ExportError::DirectoryCreation {
                path: dir.clone(),
                source,
            })?;

        let manifest = target.manifest(&self.export_root);
        if refresh_manifest && manifest.remove().await? {
            tracing::info!("Discarded cached manifest {}", manifest.path().display());
        }

        let conversations = match manifest.load().await? {
            Some(conversations) => {
                tracing::info!(
                    "Using cached manifest {} ({} conversations)",
                    manifest.path().display(),
                    conversations.len()
                );
                conversations
            }
            None => {
                tracing::warn!("Loading conversations from API, this may take a while...");
                let conversations = target.list_conversations(self.client).await?;
                manifest.save(&conversations).await?;
                tracing::info!(
                    "Saved manifest {} ({} conversations)",
                    manifest.path().display(),
                    conversations.len()
                );
                conversations
            }
        };

        let completed = target.progress_log(&self.export_root).completed().await?;
        Ok(CurrentProgress::compute(conversations, completed, resume))
    }

    /// Export one target, resuming from its progress log when `resume`.
    pub async fn export_target(
        &self,
        target: &ExportTarget,
        resume: bool,
        refresh_manifest: bool,
    ) -> Result<ExportOutcome, ExportError> {
        tracing::info!("Exporting {}", target.label());
        let mut progress = self
            .get_current_progress(target, resume, refresh_manifest)
            .await?;
        if let Some(only) = &self.only {
            progress.restrict_to(only);
            tracing::info!(
                "Restricted to {} of {} listed conversations",
                progress.required.len(),
                only.len()
            );
        }
        if resume {
            tracing::info!(
                "Resuming: {} of {} conversations already exported, {} remaining",
                progress.done(),
                progress.total(),
                progress.required.len()
            );
        }
        let dir = target.dir(&self.export_root);
        self.export_conversations(progress.conversations, &dir, &progress.required)
            .await
    }

    /// Export every inbox in turn. A failing inbox is reported and the
    /// remaining inboxes still run.
    pub async fn export_inboxes(
        &self,
        inboxes: Vec<Inbox>,
        resume: bool,
        refresh_manifest: bool,
    ) -> Vec<(Inbox, Result<ExportOutcome, ExportError>)> {
        let mut results = Vec::with_capacity(inboxes.len());
        for inbox in inboxes {
            let target = ExportTarget::Inbox(inbox.clone());
            let result = self.export_target(&target, resume, refresh_manifest).await;
            if let Err(e) = &result {
                tracing::error!("Export of {} failed: {}", target.label(), e);
            }
            results.push((inbox, result));
        }
        results
    }

    /// Export the conversations whose ids are in `required` into
    /// `destination`, in list order, and return the list back with counts.
    pub async fn export_conversations(
        &self,
        conversations: Vec<Conversation>,
        destination: &Path,
        required: &HashSet<String>,
    ) -> Result<ExportOutcome, ExportError> {
        let started = Instant::now();
        let progress_log = ProgressLog::in_dir(destination);
        let pb = create_progress_bar(self.no_progress_bar, required.len() as u64);
        // Adding a hidden bar would hand it the multi's draw target.
        let pb = if pb.is_hidden() {
            pb
        } else {
            self.progress.add(pb)
        };
        let mut outcome = ExportOutcome::default();

        for conversation in &conversations {
            if !required.contains(&conversation.id) {
                tracing::debug!("Skipping {}", conversation.id);
                outcome.skipped += 1;
                continue;
            }

            pb.set_message(conversation.id.clone());
            match self.export_conversation(conversation, destination).await {
                Ok(sub_failures) => {
                    outcome.sub_resource_failures += sub_failures;
                    progress_log.append(&conversation.id).await?;
                    outcome.exported += 1;
                }
                Err(e) => {
                    tracing::error!("Failed to export conversation {}: {}", conversation.id, e);
                    outcome.failed += 1;
                }
            }
            pb.inc(1);
        }

        pb.finish_and_clear();
        self.progress.remove(&pb);
        outcome.conversations = conversations;
        outcome.elapsed = started.elapsed();
        Ok(outcome)
    }

    /// Export one conversation. Returns how many sub-resources were lost.
    ///
    /// Errors mean the conversation itself could not be handled and must
    /// not be marked done.
    #[tracing::instrument(skip_all, fields(conversation = %conversation.id))]
    async fn export_conversation(
        &self,
        conversation: &Conversation,
        destination: &Path,
    ) -> Result<usize, ExportError> {
        tracing::debug!("Using: {}", conversation.id);
        let conversation_dir = paths::conversation_dir(destination, &conversation.id);
        paths::ensure_dir(&conversation_dir)
            .await
            .map_err(|source| ExportError::DirectoryCreation {
                path: conversation_dir.clone(),
                source,
            })?;

        let record_path = paths::conversation_record_path(&conversation_dir, &conversation.id);
        write_json(&record_path, conversation)
            .await
            .map_err(|e| ExportError::io(&record_path, e))?;

        let mut failures = 0usize;

        if self.options.include_messages {
            let messages = self.client.list_messages(&conversation.id).await?;
            for message in &messages {
                if !self.export_message(&conversation_dir, message).await {
                    failures += 1;
                }
            }
            if self.options.include_attachments {
                for message in &messages {
                    failures += self.export_attachments(&conversation_dir, message).await;
                }
            }
        }

        if self.options.include_comments {
            let comments = self.client.list_comments(&conversation.id).await?;
            for comment in &comments {
                let path =
                    paths::comment_path(&conversation_dir, &comment.posted_at, &comment.id);
                if let Err(e) = write_json(&path, comment).await {
                    log_sub_resource_failure(&path, &e);
                    failures += 1;
                }
            }
        }

        Ok(failures)
    }

    /// Write a message as JSON, or fetch and write its `.eml` source.
    async fn export_message(&self, conversation_dir: &Path, message: &Message) -> bool {
        if self.options.export_as_eml {
            let path =
                paths::message_eml_path(conversation_dir, &message.created_at, &message.id);
            let source = match self.client.fetch_message_source(&message.id).await {
                Ok(source) => source,
                Err(e) => {
                    log_sub_resource_failure(&path, &e);
                    return false;
                }
            };
            if let Err(e) = tokio::fs::write(&path, &source).await {
                log_sub_resource_failure(&path, &e);
                return false;
            }
        } else {
            let path =
                paths::message_json_path(conversation_dir, &message.created_at, &message.id);
            if let Err(e) = write_json(&path, message).await {
                log_sub_resource_failure(&path, &e);
                return false;
            }
        }
        true
    }

    /// Download every attachment of `message`. Returns the number lost.
    async fn export_attachments(&self, conversation_dir: &Path, message: &Message) -> usize {
        if message.attachments().is_empty() {
            return 0;
        }
        let dir = paths::attachment_dir(conversation_dir, &message.id);
        if let Err(e) = paths::ensure_dir(&dir).await {
            log_sub_resource_failure(&dir, &e);
            return message.attachments().len();
        }

        let mut failures = 0;
        let mut taken = HashSet::new();
        for attachment in message.attachments() {
            let path = paths::attachment_path(&dir, &attachment.filename, &mut taken);
            tracing::debug!("Request: {}", attachment.url);
            let bytes = match self.client.fetch_attachment(&attachment.url).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    log_sub_resource_failure(&path, &e);
                    failures += 1;
                    continue;
                }
            };
            if let Err(e) = tokio::fs::write(&path, &bytes).await {
                log_sub_resource_failure(&path, &e);
                failures += 1;
            }
        }
        failures
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let json = serde_json::to_vec(value)?;
    tokio::fs::write(path, json).await
}

fn log_sub_resource_failure(path: &Path, error: &dyn std::fmt::Display) {
    tracing::warn!("Skipping {}: {}", path.display(), error);
}

/// Create a progress bar with a consistent template.
///
/// Hidden when disabled or when stdout is not a terminal.
fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    match ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        Ok(style) => pb.set_style(style.progress_chars("=> ")),
        Err(e) => tracing::debug!("Invalid progress bar template: {}", e),
    }
    pb
}

pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::rate_limit::RecordingSleeper;
    use crate::front::ClientConfig;
    use crate::retry::BackoffConfig;
    use serde_json::{json, Map};
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer) -> FrontClient {
        let config = ClientConfig {
            api_base: server.uri(),
            token: "test-token".to_string(),
            backoff: BackoffConfig {
                max_retries: 1,
                base_delay_secs: 0,
                max_delay_secs: 0,
            },
        };
        FrontClient::with_sleeper(&config, Arc::new(RecordingSleeper::default())).unwrap()
    }

    fn inbox() -> Inbox {
        Inbox {
            id: "inb_1".to_string(),
            name: "Support".to_string(),
            extra: Map::new(),
        }
    }

    fn conv(id: &str) -> Conversation {
        Conversation {
            id: id.to_string(),
            extra: Map::new(),
        }
    }

    fn all_options() -> ExportOptions {
        ExportOptions {
            include_messages: true,
            export_as_eml: false,
            include_attachments: true,
            include_comments: true,
        }
    }

    /// Relative paths of every file under `root`.
    fn list_files(root: &Path) -> BTreeSet<String> {
        fn walk(root: &Path, dir: &Path, out: &mut BTreeSet<String>) {
            for entry in std::fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    walk(root, &path, out);
                } else {
                    let rel = path.strip_prefix(root).unwrap();
                    out.insert(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        let mut out = BTreeSet::new();
        walk(root, root, &mut out);
        out
    }

    async fn mount_json(server: &MockServer, p: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn mount_cnv_1(server: &MockServer) {
        mount_json(
            server,
            "/inboxes/inb_1/conversations",
            json!({"_results": [{"id": "cnv_1", "subject": "Hello"}]}),
        )
        .await;
        mount_json(
            server,
            "/conversations/cnv_1/messages",
            json!({"_results": [{
                "id": "msg_1",
                "created_at": 1700000000.25,
                "attachments": [{
                    "filename": "invoice.pdf",
                    "url": format!("{}/download/fil_1", server.uri())
                }]
            }]}),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/download/fil_1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4".to_vec()))
            .mount(server)
            .await;
        mount_json(
            server,
            "/conversations/cnv_1/comments",
            json!({"_results": [{"id": "com_1", "posted_at": 1700000100, "body": "note"}]}),
        )
        .await;
    }

    #[tokio::test]
    async fn test_end_to_end_single_conversation() {
        let server = MockServer::start().await;
        mount_cnv_1(&server).await;
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("export");

        let client = test_client(&server);
        let exporter = Exporter::new(&client, &root, all_options()).with_progress_bar(false);
        let outcome = exporter
            .export_target(&ExportTarget::Inbox(inbox()), false, false)
            .await
            .unwrap();

        assert_eq!(outcome.exported, 1);
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.sub_resource_failures, 0);
        assert_eq!(outcome.conversations.len(), 1);

        let files = list_files(&root.join("Support"));
        let expected: BTreeSet<String> = [
            "inb_1.json",
            "progress.log",
            "cnv_1/cnv_1.json",
            "cnv_1/1700000000.25-message-msg_1.json",
            "cnv_1/attachments/msg_1/invoice.pdf",
            "cnv_1/1700000100-comment-com_1.json",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(files, expected);

        let progress = std::fs::read_to_string(root.join("Support/progress.log")).unwrap();
        assert_eq!(progress, "cnv_1\n");
        assert_eq!(
            std::fs::read(root.join("Support/cnv_1/attachments/msg_1/invoice.pdf")).unwrap(),
            b"%PDF-1.4"
        );
        let record: serde_json::Value = serde_json::from_slice(
            &std::fs::read(root.join("Support/cnv_1/cnv_1.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(record, json!({"id": "cnv_1", "subject": "Hello"}));
    }

    #[tokio::test]
    async fn test_fresh_runs_are_idempotent() {
        let server = MockServer::start().await;
        mount_cnv_1(&server).await;
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("export");
        let client = test_client(&server);
        let exporter = Exporter::new(&client, &root, all_options()).with_progress_bar(false);
        let target = ExportTarget::Inbox(inbox());

        exporter.export_target(&target, false, false).await.unwrap();
        let first = list_files(&root);
        exporter.export_target(&target, false, false).await.unwrap();
        let second = list_files(&root);

        assert_eq!(first, second);
        // The conversation listing is fetched once; the second run uses the manifest.
        let listings = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.url.path() == "/inboxes/inb_1/conversations")
            .count();
        assert_eq!(listings, 1);
    }

    #[tokio::test]
    async fn test_resume_touches_only_remaining_conversations() {
        let server = MockServer::start().await;
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("export");
        let target = ExportTarget::Inbox(inbox());
        let dir = target.dir(&root);
        std::fs::create_dir_all(&dir).unwrap();
        target
            .manifest(&root)
            .save(&[conv("A"), conv("B"), conv("C"), conv("D")])
            .await
            .unwrap();
        std::fs::write(dir.join("progress.log"), "A\nB\n").unwrap();

        for id in ["C", "D"] {
            Mock::given(method("GET"))
                .and(path(format!("/conversations/{}/messages", id)))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_results": []})))
                .expect(1)
                .mount(&server)
                .await;
        }
        for id in ["A", "B"] {
            Mock::given(method("GET"))
                .and(path(format!("/conversations/{}/messages", id)))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_results": []})))
                .expect(0)
                .mount(&server)
                .await;
        }

        let client = test_client(&server);
        let options = ExportOptions {
            include_messages: true,
            export_as_eml: false,
            include_attachments: false,
            include_comments: false,
        };
        let exporter = Exporter::new(&client, &root, options).with_progress_bar(false);

        let progress = exporter.get_current_progress(&target, true, false).await.unwrap();
        let mut required: Vec<&str> = progress.required.iter().map(String::as_str).collect();
        required.sort();
        assert_eq!(required, vec!["C", "D"]);

        let outcome = exporter.export_target(&target, true, false).await.unwrap();
        assert_eq!(outcome.exported, 2);
        assert_eq!(outcome.skipped, 2);
        assert!(!dir.join("A").exists());
        assert!(!dir.join("B").exists());
        assert!(dir.join("C/C.json").exists());
        assert!(dir.join("D/D.json").exists());
        assert_eq!(
            std::fs::read_to_string(dir.join("progress.log")).unwrap(),
            "A\nB\nC\nD\n"
        );
    }

    #[tokio::test]
    async fn test_no_attachment_fetch_without_messages() {
        let server = MockServer::start().await;
        mount_json(
            &server,
            "/inboxes/inb_1/conversations",
            json!({"_results": [{"id": "cnv_1"}]}),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/conversations/cnv_1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_results": []})))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/download/fil_1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let client = test_client(&server);
        let options = ExportOptions {
            include_messages: false,
            export_as_eml: false,
            include_attachments: true,
            include_comments: false,
        };
        let exporter = Exporter::new(&client, tmp.path(), options).with_progress_bar(false);
        let outcome = exporter
            .export_target(&ExportTarget::Inbox(inbox()), false, false)
            .await
            .unwrap();
        assert_eq!(outcome.exported, 1);
        assert!(!tmp.path().join("Support/cnv_1/attachments").exists());
    }

    #[tokio::test]
    async fn test_eml_export_writes_raw_source() {
        let server = MockServer::start().await;
        mount_json(
            &server,
            "/inboxes/inb_1/conversations",
            json!({"_results": [{"id": "cnv_1"}]}),
        )
        .await;
        mount_json(
            &server,
            "/conversations/cnv_1/messages",
            json!({"_results": [{"id": "msg_1", "created_at": 1700000000}]}),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/messages/msg_1"))
            .and(header("accept", "message/rfc822"))
            .respond_with(
                ResponseTemplate::new(200).set_body_bytes(b"Subject: hi\r\n\r\nbody".to_vec()),
            )
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let client = test_client(&server);
        let options = ExportOptions {
            include_messages: true,
            export_as_eml: true,
            include_attachments: false,
            include_comments: false,
        };
        let exporter = Exporter::new(&client, tmp.path(), options).with_progress_bar(false);
        exporter
            .export_target(&ExportTarget::Inbox(inbox()), false, false)
            .await
            .unwrap();

        let eml = tmp.path().join("Support/cnv_1/1700000000-msg_1.eml");
        assert_eq!(std::fs::read(eml).unwrap(), b"Subject: hi\r\n\r\nbody");
        assert!(!tmp
            .path()
            .join("Support/cnv_1/1700000000-message-msg_1.json")
            .exists());
    }

    #[tokio::test]
    async fn test_failed_attachment_still_marks_conversation_done() {
        let server = MockServer::start().await;
        mount_json(
            &server,
            "/inboxes/inb_1/conversations",
            json!({"_results": [{"id": "cnv_1"}]}),
        )
        .await;
        mount_json(
            &server,
            "/conversations/cnv_1/messages",
            json!({"_results": [{
                "id": "msg_1",
                "created_at": 1,
                "attachments": [
                    {"filename": "a.txt", "url": format!("{}/download/missing", server.uri())},
                    {"filename": "b.txt", "url": format!("{}/download/ok", server.uri())}
                ]
            }]}),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/download/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/download/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let client = test_client(&server);
        let options = ExportOptions {
            include_comments: false,
            ..all_options()
        };
        let exporter = Exporter::new(&client, tmp.path(), options).with_progress_bar(false);
        let outcome = exporter
            .export_target(&ExportTarget::Inbox(inbox()), false, false)
            .await
            .unwrap();

        assert_eq!(outcome.exported, 1);
        assert_eq!(outcome.sub_resource_failures, 1);
        let dir = tmp.path().join("Support/cnv_1/attachments/msg_1");
        assert!(!dir.join("a.txt").exists());
        assert!(dir.join("b.txt").exists());
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("Support/progress.log")).unwrap(),
            "cnv_1\n"
        );
    }

    #[tokio::test]
    async fn test_failed_message_listing_leaves_conversation_pending() {
        let server = MockServer::start().await;
        mount_json(
            &server,
            "/inboxes/inb_1/conversations",
            json!({"_results": [{"id": "cnv_bad"}, {"id": "cnv_good"}]}),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/conversations/cnv_bad/messages"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        mount_json(&server, "/conversations/cnv_good/messages", json!({"_results": []})).await;

        let tmp = TempDir::new().unwrap();
        let client = test_client(&server);
        let options = ExportOptions {
            include_messages: true,
            export_as_eml: false,
            include_attachments: false,
            include_comments: false,
        };
        let exporter = Exporter::new(&client, tmp.path(), options).with_progress_bar(false);
        let outcome = exporter
            .export_target(&ExportTarget::Inbox(inbox()), false, false)
            .await
            .unwrap();

        assert_eq!(outcome.exported, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("Support/progress.log")).unwrap(),
            "cnv_good\n"
        );
    }

    #[tokio::test]
    async fn test_unwritable_export_root_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/inboxes/inb_1/conversations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_results": []})))
            .expect(0)
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("export");
        std::fs::write(&root, b"not a directory").unwrap();

        let client = test_client(&server);
        let exporter = Exporter::new(&client, &root, all_options()).with_progress_bar(false);
        let err = exporter
            .export_target(&ExportTarget::Inbox(inbox()), false, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::DirectoryCreation { .. }));
    }

    #[tokio::test]
    async fn test_refresh_manifest_relists_conversations() {
        let server = MockServer::start().await;
        mount_json(
            &server,
            "/inboxes/inb_1/conversations",
            json!({"_results": [{"id": "cnv_new"}]}),
        )
        .await;

        let tmp = TempDir::new().unwrap();
        let target = ExportTarget::Inbox(inbox());
        std::fs::create_dir_all(target.dir(tmp.path())).unwrap();
        target
            .manifest(tmp.path())
            .save(&[conv("cnv_old")])
            .await
            .unwrap();

        let client = test_client(&server);
        let exporter = Exporter::new(&client, tmp.path(), all_options()).with_progress_bar(false);

        let cached = exporter.get_current_progress(&target, false, false).await.unwrap();
        assert_eq!(cached.conversations[0].id, "cnv_old");

        let refreshed = exporter.get_current_progress(&target, false, true).await.unwrap();
        assert_eq!(refreshed.conversations[0].id, "cnv_new");
    }

    #[tokio::test]
    async fn test_export_inboxes_isolates_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/inboxes/inb_broken/conversations"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        mount_json(
            &server,
            "/inboxes/inb_1/conversations",
            json!({"_results": [{"id": "cnv_1"}]}),
        )
        .await;

        let tmp = TempDir::new().unwrap();
        let client = test_client(&server);
        let options = ExportOptions {
            include_messages: false,
            export_as_eml: false,
            include_attachments: false,
            include_comments: false,
        };
        let exporter = Exporter::new(&client, tmp.path(), options).with_progress_bar(false);
        let broken = Inbox {
            id: "inb_broken".to_string(),
            name: "Broken".to_string(),
            extra: Map::new(),
        };

        let results = exporter.export_inboxes(vec![broken, inbox()], false, false).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_err());
        assert_eq!(results[1].1.as_ref().unwrap().exported, 1);
        // The failed listing leaves no manifest behind.
        assert!(!tmp.path().join("Broken/inb_broken.json").exists());
        assert!(tmp.path().join("Support/cnv_1/cnv_1.json").exists());
    }

    #[tokio::test]
    async fn test_only_listed_conversations_are_exported() {
        let server = MockServer::start().await;
        let tmp = TempDir::new().unwrap();
        let target = ExportTarget::Inbox(inbox());
        let dir = target.dir(tmp.path());
        std::fs::create_dir_all(&dir).unwrap();
        target
            .manifest(tmp.path())
            .save(&[conv("A"), conv("B"), conv("C")])
            .await
            .unwrap();

        for (id, hits) in [("A", 0), ("B", 1), ("C", 0)] {
            Mock::given(method("GET"))
                .and(path(format!("/conversations/{}/messages", id)))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_results": []})))
                .expect(hits)
                .mount(&server)
                .await;
        }

        let list = tmp.path().join("required.txt");
        std::fs::write(&list, "B\nZ\n").unwrap();
        let only = read_id_list(&list).await.unwrap();

        let client = test_client(&server);
        let options = ExportOptions {
            include_messages: true,
            export_as_eml: false,
            include_attachments: false,
            include_comments: false,
        };
        let exporter = Exporter::new(&client, tmp.path(), options)
            .with_progress_bar(false)
            .with_only(only);
        let outcome = exporter.export_target(&target, false, false).await.unwrap();

        assert_eq!(outcome.exported, 1);
        assert_eq!(outcome.skipped, 2);
        assert!(dir.join("B/B.json").exists());
        assert!(!dir.join("A").exists());
        assert!(!dir.join("C").exists());
        assert_eq!(std::fs::read_to_string(dir.join("progress.log")).unwrap(), "B\n");
    }

    #[tokio::test]
    async fn test_unwritable_progress_log_is_fatal() {
        let server = MockServer::start().await;
        let tmp = TempDir::new().unwrap();
        let destination = tmp.path().join("Support");
        std::fs::create_dir_all(destination.join("progress.log")).unwrap();

        let client = test_client(&server);
        let options = ExportOptions {
            include_messages: false,
            export_as_eml: false,
            include_attachments: false,
            include_comments: false,
        };
        let exporter = Exporter::new(&client, tmp.path(), options).with_progress_bar(false);
        let required: HashSet<String> = ["cnv_1", "cnv_2"].iter().map(|s| s.to_string()).collect();
        let err = exporter
            .export_conversations(vec![conv("cnv_1"), conv("cnv_2")], &destination, &required)
            .await
            .unwrap_err();

        assert!(matches!(err, ExportError::Io { .. }));
        // The run stops right after the first conversation.
        assert!(destination.join("cnv_1/cnv_1.json").exists());
        assert!(!destination.join("cnv_2").exists());
    }

    #[tokio::test]
    async fn test_failed_comment_write_still_marks_conversation_done() {
        let server = MockServer::start().await;
        mount_json(
            &server,
            "/inboxes/inb_1/conversations",
            json!({"_results": [{"id": "cnv_1"}]}),
        )
        .await;
        mount_json(
            &server,
            "/conversations/cnv_1/comments",
            json!({"_results": [
                {"id": "com_1", "posted_at": 1700000100},
                {"id": "com_2", "posted_at": 1700000200}
            ]}),
        )
        .await;

        let tmp = TempDir::new().unwrap();
        // A directory squatting on the comment's file name makes the write fail.
        std::fs::create_dir_all(tmp.path().join("Support/cnv_1/1700000100-comment-com_1.json"))
            .unwrap();

        let client = test_client(&server);
        let options = ExportOptions {
            include_messages: false,
            export_as_eml: false,
            include_attachments: false,
            include_comments: true,
        };
        let exporter = Exporter::new(&client, tmp.path(), options).with_progress_bar(false);
        let outcome = exporter
            .export_target(&ExportTarget::Inbox(inbox()), false, false)
            .await
            .unwrap();

        assert_eq!(outcome.exported, 1);
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.sub_resource_failures, 1);
        assert!(tmp
            .path()
            .join("Support/cnv_1/1700000200-comment-com_2.json")
            .is_file());
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("Support/progress.log")).unwrap(),
            "cnv_1\n"
        );
    }

    #[tokio::test]
    async fn test_same_named_attachments_are_kept_apart() {
        let server = MockServer::start().await;
        mount_json(
            &server,
            "/inboxes/inb_1/conversations",
            json!({"_results": [{"id": "cnv_1"}]}),
        )
        .await;
        mount_json(
            &server,
            "/conversations/cnv_1/messages",
            json!({"_results": [{
                "id": "msg_1",
                "created_at": 1,
                "attachments": [
                    {"filename": "scan.pdf", "url": format!("{}/download/fil_1", server.uri())},
                    {"filename": "scan.pdf", "url": format!("{}/download/fil_2", server.uri())}
                ]
            }]}),
        )
        .await;
        for (p, body) in [("/download/fil_1", "first"), ("/download/fil_2", "second")] {
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(body.as_bytes().to_vec()))
                .mount(&server)
                .await;
        }

        let tmp = TempDir::new().unwrap();
        let client = test_client(&server);
        let options = ExportOptions {
            include_comments: false,
            ..all_options()
        };
        let exporter = Exporter::new(&client, tmp.path(), options).with_progress_bar(false);
        exporter
            .export_target(&ExportTarget::Inbox(inbox()), false, false)
            .await
            .unwrap();

        let dir = tmp.path().join("Support/cnv_1/attachments/msg_1");
        assert_eq!(std::fs::read_to_string(dir.join("scan.pdf")).unwrap(), "first");
        assert_eq!(std::fs::read_to_string(dir.join("scan-1.pdf")).unwrap(), "second");
    }

    #[tokio::test]
    async fn test_message_json_keeps_integer_timestamp() {
        let server = MockServer::start().await;
        mount_json(
            &server,
            "/inboxes/inb_1/conversations",
            json!({"_results": [{"id": "cnv_1"}]}),
        )
        .await;
        mount_json(
            &server,
            "/conversations/cnv_1/messages",
            json!({"_results": [{"id": "msg_1", "created_at": 1700000000, "body": "hi"}]}),
        )
        .await;

        let tmp = TempDir::new().unwrap();
        let client = test_client(&server);
        let options = ExportOptions {
            include_messages: true,
            export_as_eml: false,
            include_attachments: false,
            include_comments: false,
        };
        let exporter = Exporter::new(&client, tmp.path(), options).with_progress_bar(false);
        exporter
            .export_target(&ExportTarget::Inbox(inbox()), false, false)
            .await
            .unwrap();

        let written =
            std::fs::read(tmp.path().join("Support/cnv_1/1700000000-message-msg_1.json")).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&written).unwrap();
        assert_eq!(value, json!({"id": "msg_1", "created_at": 1700000000, "body": "hi"}));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 05s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 02m 05s");
    }

    #[test]
    fn test_default_options() {
        let options = ExportOptions::default();
        assert!(options.include_messages);
        assert!(options.export_as_eml);
        assert!(!options.include_attachments);
        assert!(!options.include_comments);
    }
}
