//! Recursive enumeration of archive members.

use crate::config::ArchiveExtensions;
use crate::encryption::EncryptionDetector;
use crate::error::ProcessError;
use crate::process::ProcessRunner;
use crate::session::SessionState;
use crate::tempfiles::{TempAllocation, TempFileManager};
use crate::tool::ArchiveTool;
use crate::types::ArchiveEntry;
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

/// Lists containers and expands nested ones for a single session.
pub struct ArchiveWalker {
    tool: ArchiveTool,
    runner: ProcessRunner,
    extensions: ArchiveExtensions,
    detector: Arc<dyn EncryptionDetector>,
    temp: Arc<TempFileManager>,
    state: Arc<SessionState>,
}

impl ArchiveWalker {
    pub(crate) fn new(
        tool: ArchiveTool,
        runner: ProcessRunner,
        extensions: ArchiveExtensions,
        detector: Arc<dyn EncryptionDetector>,
        temp: Arc<TempFileManager>,
        state: Arc<SessionState>,
    ) -> Self {
        Self {
            tool,
            runner,
            extensions,
            detector,
            temp,
            state,
        }
    }

    /// Member names of `archive`, in listing order.
    ///
    /// Listing is a pure read and is never cached. A listing failure means
    /// the file is not a container the tool understands (a bare gzip stream,
    /// a corrupt file) and yields no members. A listing that runs past the
    /// session deadline latches the timeout; one that could not run at all
    /// (spawn or pipe failure) is fatal to the session.
    pub async fn list(&self, archive: &Path) -> Vec<String> {
        let args = self.tool.list_args(archive);
        match self
            .runner
            .run(self.tool.path(), &args, self.state.remaining(), None)
            .await
        {
            Ok(output) => output.lines(),
            Err(e) if e.is_timeout() => {
                self.state.latch_timeout();
                Vec::new()
            }
            Err(e) if e.is_resource() => {
                self.state
                    .latch_failure(format!("listing {}: {}", archive.display(), e));
                Vec::new()
            }
            Err(e) => {
                debug!("treating {} as having no members: {}", archive.display(), e);
                Vec::new()
            }
        }
    }

    /// Record every member of `in_file` under `prefix` and descend into the
    /// ones that are themselves containers.
    ///
    /// Siblings are expanded concurrently; the returned future resolves only
    /// after every descendant has finished. Entries are also appended to the
    /// session as they are found, so a session that ends early keeps them.
    pub fn expand<'a>(
        &'a self,
        in_file: &'a Path,
        prefix: &'a str,
        depth: u32,
    ) -> BoxFuture<'a, Vec<ArchiveEntry>> {
        Box::pin(async move {
            if self.state.is_terminal() {
                return Vec::new();
            }
            if depth >= self.state.max_depth() {
                self.state.latch_depth_exceeded();
                return Vec::new();
            }

            let members = self.list(in_file).await;
            let mut found = Vec::with_capacity(members.len());
            let mut nested = FuturesUnordered::new();

            for member in members {
                let entry = ArchiveEntry::new(prefix, &member, depth);
                debug!("file: {} depth={}", entry.full_path, depth);
                self.state.record(entry.clone());

                if self.extensions.matches_file(&member) {
                    debug!("need to extract file: {}", entry.full_path);
                    let full_path = entry.full_path.clone();
                    nested.push(self.expand_member(in_file, member, full_path, depth));
                }
                found.push(entry);
            }

            while let Some(sub) = nested.next().await {
                found.extend(sub);
            }
            found
        })
    }

    /// Stage one nested container and walk it.
    async fn expand_member(
        &self,
        in_file: &Path,
        member: String,
        full_path: String,
        depth: u32,
    ) -> Vec<ArchiveEntry> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        // The child would sit at the ceiling; skip staging it at all
        if depth + 1 >= self.state.max_depth() {
            self.state.latch_depth_exceeded();
            return Vec::new();
        }

        let mut allocation = match self.temp.allocate() {
            Ok(allocation) => allocation,
            Err(e) => {
                self.state.latch_failure(e.to_string());
                return Vec::new();
            }
        };

        let found = match self.extract_member(in_file, &member, &mut allocation).await {
            Ok(()) => self.expand(allocation.path(), &full_path, depth + 1).await,
            Err(e) => {
                self.absorb_extract_error(&full_path, e);
                Vec::new()
            }
        };

        self.temp.release(allocation).await;
        found
    }

    /// Stream `member` out of `in_file` into the allocation.
    async fn extract_member(
        &self,
        in_file: &Path,
        member: &str,
        allocation: &mut TempAllocation,
    ) -> Result<(), ExtractFailure> {
        let mut writer = allocation
            .take_writer()
            .map_err(|e| ExtractFailure::Resource(e.to_string()))?;
        let args = self.tool.extract_args(in_file, member);

        self.runner
            .run(
                self.tool.path(),
                &args,
                self.state.remaining(),
                Some(&mut writer as &mut (dyn AsyncWrite + Unpin + Send)),
            )
            .await
            .map(|_| ())
            .map_err(ExtractFailure::Process)
    }

    /// Archive-level failures only latch flags and the walk goes on. Local
    /// resource failures (staging, spawn, pipes) end the session.
    fn absorb_extract_error(&self, full_path: &str, failure: ExtractFailure) {
        match failure {
            ExtractFailure::Resource(reason) => self.state.latch_failure(reason),
            ExtractFailure::Process(e) if e.is_resource() => {
                self.state
                    .latch_failure(format!("extracting {}: {}", full_path, e));
            }
            ExtractFailure::Process(e) if e.is_timeout() => {
                warn!("timed out extracting {}", full_path);
                self.state.latch_timeout();
            }
            ExtractFailure::Process(e) => {
                let encrypted = e
                    .stderr()
                    .map(|stderr| self.detector.is_encrypted(stderr))
                    .unwrap_or(false);
                if encrypted {
                    info!("encrypted member: {}", full_path);
                    self.state.latch_encrypted();
                } else {
                    warn!("could not extract {}: {}", full_path, e);
                }
            }
        }
    }
}

enum ExtractFailure {
    Resource(String),
    Process(ProcessError),
}
