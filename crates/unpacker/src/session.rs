//! Top-level extraction sessions.
//!
//! A session owns one deadline, one set of latched flags, one entry list and
//! one temp file ledger. It drives an [`ArchiveWalker`] over the attachment
//! and produces exactly one [`ExtractionOutcome`].

use crate::tempfiles::TempFileManager;
use crate::types::{ArchiveEntry, ExtractionOutcome};
use crate::walker::ArchiveWalker;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// State shared by every branch of one walk.
///
/// Flags only ever go from unset to set.
#[derive(Debug)]
pub struct SessionState {
    deadline: Instant,
    max_depth: u32,
    timed_out: AtomicBool,
    depth_exceeded: AtomicBool,
    encrypted: AtomicBool,
    failure: Mutex<Option<String>>,
    fatal: Notify,
    entries: Mutex<Vec<ArchiveEntry>>,
}

impl SessionState {
    pub(crate) fn new(timeout: Duration, max_depth: u32) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            max_depth,
            timed_out: AtomicBool::new(false),
            depth_exceeded: AtomicBool::new(false),
            encrypted: AtomicBool::new(false),
            failure: Mutex::new(None),
            fatal: Notify::new(),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Time left before the session deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether no new work may be started.
    pub fn is_terminal(&self) -> bool {
        if self.remaining().is_zero() {
            self.latch_timeout();
        }
        self.timed_out.load(Ordering::SeqCst) || self.failure.lock().is_some()
    }

    pub fn latch_timeout(&self) {
        self.timed_out.store(true, Ordering::SeqCst);
    }

    pub fn latch_depth_exceeded(&self) {
        self.depth_exceeded.store(true, Ordering::SeqCst);
    }

    pub fn latch_encrypted(&self) {
        self.encrypted.store(true, Ordering::SeqCst);
    }

    /// Record a session-fatal error; the first reason wins.
    pub fn latch_failure(&self, reason: String) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            error!("{}", reason);
            *failure = Some(reason);
            self.fatal.notify_one();
        }
    }

    pub(crate) fn record(&self, entry: ArchiveEntry) {
        self.entries.lock().push(entry);
    }

    /// Entries recorded so far.
    pub fn entries(&self) -> Vec<ArchiveEntry> {
        self.entries.lock().clone()
    }

    /// Resolve the latched flags into an outcome, draining the entry list.
    ///
    /// Precedence: timeout, failure, depth exceeded, encrypted, success.
    pub(crate) fn classify(&self) -> ExtractionOutcome {
        let entries = std::mem::take(&mut *self.entries.lock());

        if self.timed_out.load(Ordering::SeqCst) {
            return ExtractionOutcome::TimedOut(entries);
        }
        if let Some(reason) = self.failure.lock().clone() {
            return ExtractionOutcome::Failed { reason, entries };
        }
        if self.depth_exceeded.load(Ordering::SeqCst) {
            return ExtractionOutcome::DepthExceeded(entries);
        }
        if self.encrypted.load(Ordering::SeqCst) {
            return ExtractionOutcome::Encrypted(entries);
        }
        ExtractionOutcome::Success(entries)
    }
}

/// One top-level extraction request.
pub struct ExtractionSession {
    id: Uuid,
    file: PathBuf,
    display_name: String,
    state: Arc<SessionState>,
    temp: Arc<TempFileManager>,
    walker: ArchiveWalker,
    finalized: AtomicBool,
}

impl ExtractionSession {
    pub(crate) fn new(
        file: PathBuf,
        display_name: String,
        state: Arc<SessionState>,
        temp: Arc<TempFileManager>,
        walker: ArchiveWalker,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            file,
            display_name,
            state,
            temp,
            walker,
            finalized: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// The walker bound to this session.
    pub fn walker(&self) -> &ArchiveWalker {
        &self.walker
    }

    /// Shared flags and entries.
    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    /// The session's temp file ledger, for inspecting its counters.
    pub fn temp_files(&self) -> Arc<TempFileManager> {
        Arc::clone(&self.temp)
    }

    /// Walk the attachment until it is exhausted, the deadline fires or a
    /// fatal error is latched, then finalize.
    ///
    /// Whichever comes first drops the walk; dropping it kills any child
    /// process still running and closes every staging handle. Consuming the
    /// session makes this the single producer of its outcome.
    pub async fn run(self) -> ExtractionOutcome {
        let span = info_span!(
            "unpack",
            session = %self.id,
            attachment = %self.display_name
        );

        async {
            if !self.finalized.load(Ordering::SeqCst) {
                let walk = self.walker.expand(&self.file, &self.display_name, 0);
                tokio::select! {
                    biased;
                    found = walk => {
                        debug!("walk finished with {} entries", found.len());
                    }
                    _ = tokio::time::sleep_until(self.state.deadline) => {
                        self.state.latch_timeout();
                    }
                    _ = self.state.fatal.notified() => {}
                }
            }

            // A session finalized before it ran has nothing left to report
            self.finalize()
                .await
                .unwrap_or(ExtractionOutcome::Success(Vec::new()))
        }
        .instrument(span)
        .await
    }

    /// Release every staging file and produce the outcome.
    ///
    /// Cleanup runs on every call. Only the first call yields an outcome;
    /// later calls return `None`.
    pub(crate) async fn finalize(&self) -> Option<ExtractionOutcome> {
        self.temp.release_all().await;
        if self.finalized.swap(true, Ordering::SeqCst) {
            return None;
        }

        let outcome = self.state.classify();

        match outcome.classification() {
            None => info!(
                "unpacked {}: {} entries",
                self.display_name,
                outcome.entries().len()
            ),
            Some(class) => warn!(
                "unpacking {} ended with {} after {} entries",
                self.display_name,
                class,
                outcome.entries().len()
            ),
        }
        Some(outcome)
    }
}
