#![cfg(unix)]

mod common;

use common::{tar_bytes, three_layer, Fixture};
use unpacker::{AttachmentSource, Classification, Inspector, UnpackerConfig, Verdict};

fn source(filename: &str, content_type: &str, body: Vec<u8>) -> AttachmentSource {
    AttachmentSource {
        filename: Some(filename.to_string()),
        content_type: content_type.to_string(),
        body: Box::new(std::io::Cursor::new(body)),
    }
}

fn inspector(fx: &Fixture, config: UnpackerConfig) -> Inspector {
    let unpacker = fx.unpacker(&config);
    Inspector::new(config, unpacker)
}

#[tokio::test]
async fn test_records_and_member_paths() {
    let fx = Fixture::new();
    let inspector = inspector(&fx, fx.config());

    let (inspection, reports) = inspector
        .inspect(vec![
            source("hello.txt", "text/plain; name=\"hello.txt\"", b"test".to_vec()),
            source("bundle.tar", "application/x-tar", three_layer()),
        ])
        .await;

    assert_eq!(inspection.files, vec!["hello.txt", "bundle.tar"]);
    assert_eq!(inspection.ctypes, vec!["text/plain", "application/x-tar"]);
    assert_eq!(inspection.records[0].ctype, "text/plain");
    assert_eq!(inspection.records[0].md5, "098f6bcd4621d373cade4e832627b4f6");
    assert_eq!(inspection.records[0].extension, ".txt");
    assert_eq!(inspection.records[1].bytes, three_layer().len() as u64);
    assert_eq!(inspection.archive_files.len(), 3);
    assert!(inspection
        .archive_files
        .contains(&"bundle.tar/b.tar/c.tar/d.txt".to_string()));
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].classification, None);
    assert_eq!(inspector.evaluate(&inspection), Verdict::Accept);
    assert!(fx.leftovers().is_empty());
}

#[tokio::test]
async fn test_disallowed_extension_inside_archive() {
    let fx = Fixture::new();
    let config = UnpackerConfig {
        disallowed_extensions: vec!["exe".to_string()],
        ..fx.config()
    };
    let inspector = inspector(&fx, config);

    let (inspection, _) = inspector
        .inspect(vec![source(
            "docs.tar",
            "application/x-tar",
            tar_bytes(&[("readme.txt", b"r"), ("setup.exe", b"MZ")]),
        )])
        .await;

    assert_eq!(
        inspector.evaluate(&inspection),
        Verdict::Deny("Message contains disallowed file extension (exe)".to_string())
    );
}

#[tokio::test]
async fn test_encrypted_archive_verdict() {
    let fx = Fixture::new();
    let body = tar_bytes(&[("locked.zip", b"??")]);

    let strict = inspector(&fx, fx.config());
    let (inspection, reports) = strict
        .inspect(vec![source("mail.tar", "application/x-tar", body.clone())])
        .await;
    assert_eq!(reports[0].classification, Some(Classification::Encrypted));
    assert_eq!(
        strict.evaluate(&inspection),
        Verdict::Deny("Message contains encrypted archive".to_string())
    );

    let lenient_config = UnpackerConfig {
        allow_encrypted: true,
        ..fx.config()
    };
    let lenient = inspector(&fx, lenient_config);
    let (inspection, _) = lenient
        .inspect(vec![source("mail.tar", "application/x-tar", body)])
        .await;
    assert_eq!(lenient.evaluate(&inspection), Verdict::Accept);
}

#[tokio::test]
async fn test_depth_verdict() {
    let fx = Fixture::new();
    let config = UnpackerConfig {
        max_depth: 1,
        ..fx.config()
    };
    let inspector = inspector(&fx, config);

    let (inspection, _) = inspector
        .inspect(vec![source("deep.tar", "application/x-tar", three_layer())])
        .await;

    assert_eq!(
        inspector.evaluate(&inspection),
        Verdict::Deny("Message contains nested archives exceeding the maximum depth".to_string())
    );
}

#[tokio::test]
async fn test_non_archive_extension_is_not_unpacked() {
    let fx = Fixture::new();
    let inspector = inspector(&fx, fx.config());

    let (inspection, reports) = inspector
        .inspect(vec![source("looks-like.bin", "application/octet-stream", three_layer())])
        .await;

    assert!(reports.is_empty());
    assert!(inspection.archive_files.is_empty());
    assert_eq!(inspection.records[0].extension, ".bin");
}

#[tokio::test]
async fn test_unnamed_part() {
    let fx = Fixture::new();
    let inspector = inspector(&fx, fx.config());

    let (inspection, _) = inspector
        .inspect(vec![AttachmentSource {
            filename: None,
            content_type: "garbage".to_string(),
            body: Box::new(std::io::Cursor::new(b"x".to_vec())),
        }])
        .await;

    assert!(inspection.files.is_empty());
    assert_eq!(inspection.ctypes, vec!["unknown/unknown"]);
    assert_eq!(inspection.records[0].file, "");
}
