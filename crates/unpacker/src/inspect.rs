//! Message-level driver: digest every attachment, unpack the archives among
//! them and collect what the policy needs.

use crate::attachment::{self, AttachmentDigest, AttachmentRecord};
use crate::config::UnpackerConfig;
use crate::error::UnpackError;
use crate::policy::{Inspection, Policy, Verdict};
use crate::tempfiles::TempFileManager;
use crate::types::{ExtractionOutcome, ExtractionReport};
use crate::unpacker::Unpacker;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::path::Path;
use tokio::io::AsyncRead;
use tracing::{debug, error, info};

/// One attachment as handed over by the MIME parser.
pub struct AttachmentSource {
    /// Declared filename, if the part had one
    pub filename: Option<String>,
    /// Raw Content-Type header value
    pub content_type: String,
    /// Decoded body
    pub body: Box<dyn AsyncRead + Unpin + Send>,
}

impl AttachmentSource {
    /// Open a file on disk as an attachment named after it.
    pub async fn from_path(path: &Path, content_type: &str) -> Result<Self, UnpackError> {
        if !path.exists() {
            return Err(UnpackError::NotFound(path.to_path_buf()));
        }
        let file = tokio::fs::File::open(path).await?;
        Ok(Self {
            filename: path.file_name().map(|n| n.to_string_lossy().into_owned()),
            content_type: content_type.to_string(),
            body: Box::new(file),
        })
    }
}

/// Result of inspecting a single attachment.
struct AttachmentResult {
    record: AttachmentRecord,
    ctype: String,
    filename: Option<String>,
    report: Option<ExtractionReport>,
    verdict: Option<Verdict>,
}

/// Inspects all attachments of a message.
#[derive(Debug, Clone)]
pub struct Inspector {
    unpacker: Unpacker,
    policy: Policy,
    config: UnpackerConfig,
}

impl Inspector {
    pub fn new(config: UnpackerConfig, unpacker: Unpacker) -> Self {
        Self {
            policy: Policy::from_config(&config),
            unpacker,
            config,
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn unpacker(&self) -> &Unpacker {
        &self.unpacker
    }

    /// Process every attachment concurrently and merge the results in input
    /// order. Member paths are merged whatever the session classification;
    /// the first stored archive verdict is kept.
    pub async fn inspect(
        &self,
        attachments: Vec<AttachmentSource>,
    ) -> (Inspection, Vec<ExtractionReport>) {
        let mut pending: FuturesUnordered<_> = attachments
            .into_iter()
            .enumerate()
            .map(|(index, a)| async move { (index, self.inspect_one(a).await) })
            .collect();

        let mut results = Vec::with_capacity(pending.len());
        while let Some(done) = pending.next().await {
            results.push(done);
        }
        results.sort_by_key(|(index, _)| *index);

        let mut inspection = Inspection::default();
        let mut reports = Vec::new();
        for (_, result) in results {
            inspection.records.push(result.record);
            inspection.ctypes.push(result.ctype);
            if let Some(name) = result.filename {
                inspection.files.push(name);
            }
            if let Some(report) = result.report {
                inspection
                    .archive_files
                    .extend(report.entries.iter().map(|e| e.full_path.clone()));
                reports.push(report);
            }
            if inspection.archive_verdict.is_none() {
                inspection.archive_verdict = result.verdict;
            }
        }
        (inspection, reports)
    }

    /// Apply the policy.
    pub fn evaluate(&self, inspection: &Inspection) -> Verdict {
        self.policy.evaluate(inspection)
    }

    async fn inspect_one(&self, source: AttachmentSource) -> AttachmentResult {
        let AttachmentSource {
            filename,
            content_type,
            mut body,
        } = source;

        let ctype = attachment::content_type(&content_type);
        if !ctype.is_empty() {
            debug!("found content type: {}", ctype);
        }
        let name = filename.clone().unwrap_or_default();
        let extension = attachment::file_extension(&name);

        let wants_unpack = filename.is_some()
            && self.unpacker.is_enabled()
            && self.config.has_archive_extension(&extension);

        let mut digest = AttachmentDigest::new();
        let mut report = None;
        let mut verdict = None;

        if wants_unpack {
            debug!("found {} on archive list", extension);
            match self.stage_and_unpack(&mut body, &mut digest, &name).await {
                Ok(outcome) => {
                    if let Some(class) = outcome.classification() {
                        verdict = self.policy.verdict_for(class);
                    }
                    report = Some(ExtractionReport::new(&name, outcome));
                }
                Err(e) => {
                    error!("Error writing tempfile: {}", e);
                    verdict = Some(Verdict::DenySoft(e.to_string()));
                }
            }
        } else if let Err(e) = digest.consume::<_, tokio::io::Sink>(&mut body, None).await {
            error!("failed reading attachment {}: {}", name, e);
        }

        let (md5, bytes) = digest.finish();
        let record = AttachmentRecord {
            file: name.clone(),
            ctype: attachment::declared_content_type(&content_type, &name),
            extension: format!(".{}", extension),
            md5,
            bytes,
        };
        info!(
            "file=\"{}\" ctype=\"{}\" md5={} bytes={}",
            record.file, record.ctype, record.md5, record.bytes
        );

        AttachmentResult {
            record,
            ctype: if ctype.is_empty() {
                "unknown/unknown".to_string()
            } else {
                ctype
            },
            filename,
            report,
            verdict,
        }
    }

    /// Copy the body into a staging file while digesting it, then run a
    /// session over the staged copy.
    async fn stage_and_unpack(
        &self,
        body: &mut (dyn AsyncRead + Unpin + Send),
        digest: &mut AttachmentDigest,
        name: &str,
    ) -> Result<ExtractionOutcome, UnpackError> {
        let staging = TempFileManager::new(self.unpacker.work_dir());
        let mut allocation = staging.allocate()?;
        debug!(
            "Got tmpfile: attachment=\"{}\" tmpfile=\"{}\"",
            name,
            allocation.path().display()
        );

        let copied = {
            let mut writer = allocation.take_writer()?;
            digest.consume(body, Some(&mut writer)).await
        };

        let outcome = match copied {
            Ok(()) => {
                debug!("end of stream reached");
                Ok(self.unpacker.extract(allocation.path(), name).await)
            }
            Err(e) => Err(UnpackError::Io(e)),
        };

        staging.release(allocation).await;
        outcome
    }
}
