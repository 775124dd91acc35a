//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use unpacker::{ArchiveTool, ToolAvailability, Unpacker, UnpackerConfig};

/// Stand-in for bsdtar that understands the two invocations the walker
/// makes and delegates to the system `tar`.
///
/// Members whose name contains `locked` fail like an encrypted entry;
/// members whose name contains `slow` hang.
const FAKE_TOOL: &str = r#"#!/bin/sh
PATH=/usr/local/bin:/usr/bin:/bin
export PATH
mode=""
archive=""
member=""
while [ $# -gt 0 ]; do
  case "$1" in
    -t) mode=list ;;
    -x) mode=extract ;;
    -f) shift; archive="$1" ;;
    --include=*) member="${1#--include=}" ;;
    --passphrase) shift ;;
  esac
  shift
done
if [ "$mode" = list ]; then
  exec tar -tf "$archive"
fi
case "$member" in
  *locked*) echo "bsdtar: $member: Incorrect passphrase" >&2; exit 1 ;;
  *slow*) exec sleep 30 ;;
esac
exec tar -xOf "$archive" "$member"
"#;

/// Scratch space for one test: the tool, fixtures and the work directory.
pub struct Fixture {
    pub root: TempDir,
    pub work: TempDir,
    pub tool: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let tool = root.path().join("bsdtar");
        fs::write(&tool, FAKE_TOOL).unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
        Self { root, work, tool }
    }

    pub fn config(&self) -> UnpackerConfig {
        UnpackerConfig {
            work_dir: self.work.path().to_path_buf(),
            timeout: Duration::from_secs(20),
            ..UnpackerConfig::default()
        }
    }

    pub fn unpacker(&self, config: &UnpackerConfig) -> Unpacker {
        Unpacker::new(
            config,
            ToolAvailability::Available(ArchiveTool::at(&self.tool)),
        )
    }

    /// Write `bytes` as a fixture file named `name`.
    pub fn file(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.root.path().join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    /// Staging files left behind in the work directory.
    pub fn leftovers(&self) -> Vec<PathBuf> {
        leftovers(self.work.path())
    }
}

pub fn leftovers(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect()
}

/// Build an uncompressed tar archive in memory.
pub fn tar_bytes(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

/// `a.tar` > `b.tar` > `c.tar` > `d.txt`
pub fn three_layer() -> Vec<u8> {
    let c = tar_bytes(&[("d.txt", b"innermost")]);
    let b = tar_bytes(&[("c.tar", &c)]);
    tar_bytes(&[("b.tar", &b)])
}
