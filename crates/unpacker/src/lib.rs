//! # Unpacker
//!
//! Bounded recursive inspection of archive attachments.
//!
//! The library drives an external archive tool (`bsdtar`) to list the members
//! of an attachment, stages nested containers in temp files and walks them in
//! turn, so that every path inside a message can be checked against policy.
//! Each top-level request runs as a session with one deadline, a nesting
//! ceiling and a single temp file cleanup pass.
//!
//! ## Outcomes
//!
//! A session always produces a value: the member paths it saw plus one of
//! `timeout`, `depth_exceeded`, `encrypted`, `generic_failure`, or nothing.
//!
//! ## Example
//!
//! ```rust,no_run
//! use unpacker::{ToolAvailability, Unpacker, UnpackerConfig};
//! use std::path::Path;
//!
//! # async fn run() {
//! let config = UnpackerConfig::default();
//! let tool = ToolAvailability::resolve(config.tool_path.as_deref());
//! let unpacker = Unpacker::new(&config, tool);
//!
//! let outcome = unpacker
//!     .extract(Path::new("/var/spool/att-1234"), "invoice.zip")
//!     .await;
//! println!("{:?}: {:?}", outcome.classification(), outcome.paths());
//! # }
//! ```

pub mod attachment;
pub mod config;
pub mod encryption;
pub mod error;
pub mod inspect;
pub mod policy;
pub mod process;
pub mod session;
pub mod tempfiles;
pub mod tool;
pub mod types;
pub mod unpacker;
pub mod walker;

// Re-export main types
pub use config::UnpackerConfig;
pub use encryption::{EncryptionDetector, PassphraseRejection};
pub use error::{ConfigError, ProcessError, TempFileError, UnpackError};
pub use inspect::{AttachmentSource, Inspector};
pub use policy::{Inspection, Policy, Verdict};
pub use session::ExtractionSession;
pub use tempfiles::{TempFileManager, TempStats};
pub use tool::{ArchiveTool, ToolAvailability};
pub use types::{ArchiveEntry, Classification, ExtractionOutcome, ExtractionReport};
pub use unpacker::Unpacker;
