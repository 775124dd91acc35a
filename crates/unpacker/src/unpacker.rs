//! Entry point that builds sessions from resolved configuration.

use crate::config::{ArchiveExtensions, UnpackerConfig};
use crate::encryption::{EncryptionDetector, PassphraseRejection};
use crate::process::ProcessRunner;
use crate::session::{ExtractionSession, SessionState};
use crate::tempfiles::TempFileManager;
use crate::tool::ToolAvailability;
use crate::types::{ArchiveEntry, Classification, ExtractionOutcome};
use crate::walker::ArchiveWalker;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Archive inspection engine.
///
/// Cheap to share; every call to [`Unpacker::extract`] runs an independent
/// session with its own deadline and temp file ledger.
#[derive(Clone)]
pub struct Unpacker {
    tool: ToolAvailability,
    timeout: Duration,
    max_depth: u32,
    extensions: ArchiveExtensions,
    work_dir: PathBuf,
    detector: Arc<dyn EncryptionDetector>,
}

impl Unpacker {
    /// Build an engine from configuration and an already resolved tool.
    pub fn new(config: &UnpackerConfig, tool: ToolAvailability) -> Self {
        Self {
            tool,
            timeout: config.timeout,
            max_depth: config.max_depth,
            extensions: config.extensions.clone(),
            work_dir: config.work_dir.clone(),
            detector: Arc::new(PassphraseRejection::default()),
        }
    }

    /// Replace the encryption classifier.
    pub fn with_detector(mut self, detector: Arc<dyn EncryptionDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Whether archives are expanded at all.
    pub fn is_enabled(&self) -> bool {
        self.tool.tool().is_some()
    }

    pub fn tool(&self) -> &ToolAvailability {
        &self.tool
    }

    /// Directory staging files are created in.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Prepare a session for `file`; `None` when the engine is disabled.
    ///
    /// The session deadline starts counting now.
    pub fn session(&self, file: &Path, display_name: &str) -> Option<ExtractionSession> {
        let tool = self.tool.tool()?.clone();
        let state = Arc::new(SessionState::new(self.timeout, self.max_depth));
        let temp = Arc::new(TempFileManager::new(&self.work_dir));
        let walker = ArchiveWalker::new(
            tool,
            ProcessRunner::new(&self.work_dir),
            self.extensions.clone(),
            Arc::clone(&self.detector),
            Arc::clone(&temp),
            Arc::clone(&state),
        );

        Some(ExtractionSession::new(
            file.to_path_buf(),
            display_name.to_string(),
            state,
            temp,
            walker,
        ))
    }

    /// Recursively list the members of `file`.
    ///
    /// A disabled engine treats every file as a non-archive.
    pub async fn extract(&self, file: &Path, display_name: &str) -> ExtractionOutcome {
        match self.session(file, display_name) {
            Some(session) => session.run().await,
            None => {
                debug!("archive support disabled");
                ExtractionOutcome::Success(Vec::new())
            }
        }
    }

    /// Callback flavour of [`Unpacker::extract`]; `callback` runs exactly once,
    /// after every staging file has been removed.
    pub async fn extract_with<F>(&self, file: &Path, display_name: &str, callback: F)
    where
        F: FnOnce(Option<Classification>, Vec<ArchiveEntry>),
    {
        let (classification, entries) = self.extract(file, display_name).await.into_parts();
        callback(classification, entries);
    }
}

impl std::fmt::Debug for Unpacker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unpacker")
            .field("tool", &self.tool)
            .field("timeout", &self.timeout)
            .field("max_depth", &self.max_depth)
            .field("work_dir", &self.work_dir)
            .finish_non_exhaustive()
    }
}
