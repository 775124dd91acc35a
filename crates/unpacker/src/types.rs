//! Type definitions for archive inspection.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One path discovered inside a (possibly nested) archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Member path qualified by every enclosing container,
    /// e.g. `outer.zip/inner.tar/readme.txt`
    pub full_path: String,

    /// Nesting level; 0 is a direct child of the top-level attachment
    pub depth: u32,
}

impl ArchiveEntry {
    pub(crate) fn new(prefix: &str, member: &str, depth: u32) -> Self {
        let full_path = if prefix.is_empty() {
            member.to_string()
        } else {
            format!("{}/{}", prefix, member)
        };
        Self { full_path, depth }
    }
}

/// Host-visible error classification of one extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// The session deadline fired before the walk concluded
    Timeout,

    /// A container was nested deeper than the configured ceiling
    DepthExceeded,

    /// A member was rejected for requiring a passphrase
    Encrypted,

    /// A resource failure ended the session
    GenericFailure,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Classification::Timeout => "timeout",
            Classification::DepthExceeded => "depth_exceeded",
            Classification::Encrypted => "encrypted",
            Classification::GenericFailure => "generic_failure",
        };
        f.write_str(s)
    }
}

/// Terminal state of one extraction session.
///
/// Every variant carries the entries discovered before the session ended so
/// that policy checks still run against what was seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    /// The walk finished with no latched condition
    Success(Vec<ArchiveEntry>),

    /// The session deadline fired
    TimedOut(Vec<ArchiveEntry>),

    /// The nesting ceiling was hit somewhere in the tree
    DepthExceeded(Vec<ArchiveEntry>),

    /// Some member required a passphrase
    Encrypted(Vec<ArchiveEntry>),

    /// A session-fatal resource error
    Failed {
        /// Human readable cause
        reason: String,
        /// Entries seen before the failure
        entries: Vec<ArchiveEntry>,
    },
}

impl ExtractionOutcome {
    /// The classification reported to the host, `None` on success.
    pub fn classification(&self) -> Option<Classification> {
        match self {
            ExtractionOutcome::Success(_) => None,
            ExtractionOutcome::TimedOut(_) => Some(Classification::Timeout),
            ExtractionOutcome::DepthExceeded(_) => Some(Classification::DepthExceeded),
            ExtractionOutcome::Encrypted(_) => Some(Classification::Encrypted),
            ExtractionOutcome::Failed { .. } => Some(Classification::GenericFailure),
        }
    }

    /// Entries discovered, whatever the outcome.
    pub fn entries(&self) -> &[ArchiveEntry] {
        match self {
            ExtractionOutcome::Success(e)
            | ExtractionOutcome::TimedOut(e)
            | ExtractionOutcome::DepthExceeded(e)
            | ExtractionOutcome::Encrypted(e) => e,
            ExtractionOutcome::Failed { entries, .. } => entries,
        }
    }

    /// Flat list of member paths.
    pub fn paths(&self) -> Vec<String> {
        self.entries().iter().map(|e| e.full_path.clone()).collect()
    }

    /// Split into the `(classification, entries)` pair the host consumes.
    pub fn into_parts(self) -> (Option<Classification>, Vec<ArchiveEntry>) {
        let classification = self.classification();
        let entries = match self {
            ExtractionOutcome::Success(e)
            | ExtractionOutcome::TimedOut(e)
            | ExtractionOutcome::DepthExceeded(e)
            | ExtractionOutcome::Encrypted(e) => e,
            ExtractionOutcome::Failed { entries, .. } => entries,
        };
        (classification, entries)
    }
}

/// Serializable summary of an outcome, used by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionReport {
    /// Display name of the inspected attachment
    pub attachment: String,

    /// Error classification, absent on success
    pub classification: Option<Classification>,

    /// Failure cause for `generic_failure`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Every member path discovered
    pub entries: Vec<ArchiveEntry>,
}

impl ExtractionReport {
    pub fn new(attachment: impl Into<String>, outcome: ExtractionOutcome) -> Self {
        let reason = match &outcome {
            ExtractionOutcome::Failed { reason, .. } => Some(reason.clone()),
            _ => None,
        };
        let (classification, entries) = outcome.into_parts();
        Self {
            attachment: attachment.into(),
            classification,
            reason,
            entries,
        }
    }
}
