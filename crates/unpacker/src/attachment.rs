//! Per-attachment bookkeeping: digests, content types and extensions.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

static CONTENT_TYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^/]+/[^;\r\n ]+)").unwrap());

static NAMED_CONTENT_TYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^(.*)?;\s+name="(.*)?""#).unwrap());

static EXTENSION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.([^. ]+)$").unwrap());

/// Summary of one attachment, logged and kept with the message results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    /// Declared filename, empty when the part had none
    pub file: String,
    /// Content type as declared, minus a redundant `name=` parameter
    pub ctype: String,
    /// Lower-cased extension with a leading dot
    pub extension: String,
    /// Hex MD5 of the decoded body
    pub md5: String,
    /// Decoded body size
    pub bytes: u64,
}

/// Streaming MD5 and byte counter.
pub struct AttachmentDigest {
    context: md5::Context,
    bytes: u64,
}

impl AttachmentDigest {
    pub fn new() -> Self {
        Self {
            context: md5::Context::new(),
            bytes: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.context.consume(data);
        self.bytes += data.len() as u64;
    }

    /// Read `body` to the end, digesting it and copying it into `sink` when
    /// one is given.
    pub async fn consume<R, W>(&mut self, body: &mut R, mut sink: Option<&mut W>) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = body.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            self.update(&buf[..n]);
            if let Some(writer) = sink.as_deref_mut() {
                writer.write_all(&buf[..n]).await?;
            }
        }
        if let Some(writer) = sink {
            writer.flush().await?;
        }
        Ok(())
    }

    /// Hex digest and total byte count.
    pub fn finish(self) -> (String, u64) {
        (format!("{:x}", self.context.compute()), self.bytes)
    }
}

impl Default for AttachmentDigest {
    fn default() -> Self {
        Self::new()
    }
}

/// The `type/subtype` part of a Content-Type header value.
pub fn content_type(header: &str) -> String {
    CONTENT_TYPE_RE
        .captures(header)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// The header value without a trailing `name="..."` that repeats `filename`.
pub fn declared_content_type(header: &str, filename: &str) -> String {
    if let Some(caps) = NAMED_CONTENT_TYPE_RE.captures(header) {
        if caps.get(2).map(|m| m.as_str()) == Some(filename) {
            return caps.get(1).map(|m| m.as_str()).unwrap_or("").to_string();
        }
    }
    header.to_string()
}

/// Lower-cased text after the last dot of `filename`, without the dot.
pub fn file_extension(filename: &str) -> String {
    EXTENSION_RE
        .captures(filename)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type() {
        assert_eq!(
            content_type("application/zip; name=\"a.zip\""),
            "application/zip"
        );
        assert_eq!(content_type("text/plain"), "text/plain");
        assert_eq!(content_type("garbage"), "");
    }

    #[test]
    fn test_declared_content_type() {
        assert_eq!(
            declared_content_type("application/zip; name=\"a.zip\"", "a.zip"),
            "application/zip"
        );
        assert_eq!(
            declared_content_type("application/zip; name=\"b.zip\"", "a.zip"),
            "application/zip; name=\"b.zip\""
        );
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("Report.PDF"), "pdf");
        assert_eq!(file_extension("archive.tar.gz"), "gz");
        assert_eq!(file_extension("noext"), "");
        assert_eq!(file_extension("trailing."), "");
        assert_eq!(file_extension("odd.ex e"), "");
    }

    #[tokio::test]
    async fn test_digest_and_copy() {
        let mut body: &[u8] = b"test";
        let mut copy: Vec<u8> = Vec::new();
        let mut digest = AttachmentDigest::new();
        digest.consume(&mut body, Some(&mut copy)).await.unwrap();

        let (md5, bytes) = digest.finish();
        assert_eq!(md5, "098f6bcd4621d373cade4e832627b4f6");
        assert_eq!(bytes, 4);
        assert_eq!(copy, b"test");
    }

    #[tokio::test]
    async fn test_digest_without_sink() {
        let mut body: &[u8] = b"";
        let mut digest = AttachmentDigest::new();
        digest
            .consume::<_, tokio::io::Sink>(&mut body, None)
            .await
            .unwrap();
        let (md5, bytes) = digest.finish();
        assert_eq!(md5, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(bytes, 0);
    }
}
