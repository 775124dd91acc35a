//! Deny/allow decisions over what was found in a message.

use crate::config::{RegexSection, UnpackerConfig};
use crate::types::Classification;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Final decision for a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "message", rename_all = "snake_case")]
pub enum Verdict {
    /// Nothing objectionable found
    Accept,
    /// Permanent rejection
    Deny(String),
    /// Temporary rejection; the sender should retry
    DenySoft(String),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

/// Everything collected from one message's attachments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inspection {
    /// Per-attachment summaries
    pub records: Vec<crate::attachment::AttachmentRecord>,
    /// Content types of every part, including ones the host adds from headers
    pub ctypes: Vec<String>,
    /// Top-level attachment filenames
    pub files: Vec<String>,
    /// Member paths found inside archives
    pub archive_files: Vec<String>,
    /// Verdict stored while an archive was being unpacked
    pub archive_verdict: Option<Verdict>,
}

/// Compiled deny lists.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    bad_extension: Option<Regex>,
    filename: Vec<Regex>,
    ctype: Vec<Regex>,
    archive_filename: Vec<Regex>,
    allow_encrypted: bool,
}

impl Policy {
    /// Compile the policy; invalid patterns are skipped and logged.
    pub fn from_config(config: &UnpackerConfig) -> Self {
        let RegexSection {
            filename,
            ctype,
            archive_filename,
        } = &config.patterns;

        Self {
            bad_extension: bad_extension_regex(&config.disallowed_extensions),
            filename: compile_all(filename),
            ctype: compile_all(ctype),
            archive_filename: compile_all(archive_filename),
            allow_encrypted: config.allow_encrypted,
        }
    }

    /// Verdict stored for an archive that could not be fully inspected.
    pub fn verdict_for(&self, classification: Classification) -> Option<Verdict> {
        match classification {
            Classification::DepthExceeded => Some(Verdict::Deny(
                "Message contains nested archives exceeding the maximum depth".to_string(),
            )),
            Classification::Encrypted if self.allow_encrypted => None,
            Classification::Encrypted => Some(Verdict::Deny(
                "Message contains encrypted archive".to_string(),
            )),
            Classification::Timeout | Classification::GenericFailure => {
                Some(Verdict::DenySoft("Error unpacking archive".to_string()))
            }
        }
    }

    /// Extension of the first top-level file, then archive member, whose
    /// name ends in a disallowed extension.
    pub fn disallowed_extension(&self, inspection: &Inspection) -> Option<String> {
        let re = self.bad_extension.as_ref()?;
        [&inspection.files, &inspection.archive_files]
            .into_iter()
            .flatten()
            .find(|item| re.is_match(item))
            .and_then(|item| item.rsplit('.').next())
            .map(str::to_string)
    }

    /// Apply every check in order and return the first rejection.
    pub fn evaluate(&self, inspection: &Inspection) -> Verdict {
        if let Some(verdict) = &inspection.archive_verdict {
            return verdict.clone();
        }

        if let Some(ext) = self.disallowed_extension(inspection) {
            return Verdict::Deny(format!(
                "Message contains disallowed file extension ({})",
                ext
            ));
        }

        if let Some((item, re)) = check_items(&inspection.ctypes, &self.ctype) {
            info!("match ctype=\"{}\" regexp=/{}/", item, re);
            return Verdict::Deny(format!(
                "Message contains unacceptable content type ({})",
                item
            ));
        }

        if let Some((item, re)) = check_items(&inspection.files, &self.filename) {
            info!("match file=\"{}\" regexp=/{}/", item, re);
            return Verdict::Deny(format!(
                "Message contains unacceptable attachment ({})",
                item
            ));
        }

        if let Some((item, re)) = check_items(&inspection.archive_files, &self.archive_filename) {
            info!("match file=\"{}\" regexp=/{}/", item, re);
            return Verdict::Deny(format!(
                "Message contains unacceptable attachment ({})",
                item
            ));
        }

        Verdict::Accept
    }
}

/// First `(item, pattern)` pair that matches, trying each pattern against
/// every item before moving to the next pattern.
pub fn check_items<'a>(items: &'a [String], patterns: &'a [Regex]) -> Option<(&'a str, &'a Regex)> {
    patterns.iter().find_map(|re| {
        items
            .iter()
            .find(|item| re.is_match(item))
            .map(|item| (item.as_str(), re))
    })
}

fn compile_all(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match RegexBuilder::new(p).case_insensitive(true).build() {
            Ok(re) => Some(re),
            Err(e) => {
                error!("skipping invalid regexp: /{}/ ({})", p, e);
                None
            }
        })
        .collect()
}

fn bad_extension_regex(extensions: &[String]) -> Option<Regex> {
    if extensions.is_empty() {
        return None;
    }
    let alternatives: Vec<String> = extensions.iter().map(|e| regex::escape(e)).collect();
    let pattern = format!(r"\.(?:{})$", alternatives.join("|"));
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| error!("invalid disallowed_extensions: {}", e))
        .ok()
}
