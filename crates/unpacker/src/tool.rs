//! Discovery and argument construction for the external archive tool.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Executable name probed for at startup.
pub const TOOL_NAME: &str = "bsdtar";

/// Standard installation directories, searched in order.
pub const SEARCH_DIRS: [&str; 3] = ["/bin", "/usr/bin", "/usr/local/bin"];

/// Deliberately wrong passphrase handed to every extraction so encrypted
/// members fail with an identifiable message instead of prompting.
pub const PASSPHRASE_SENTINEL: &str = "unpacker-invalid-passphrase";

/// A located archive tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveTool {
    path: PathBuf,
}

impl ArchiveTool {
    /// Use the executable at `path` without probing.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Probe the standard installation directories.
    pub fn discover() -> Option<Self> {
        let dirs: Vec<&Path> = SEARCH_DIRS.iter().map(Path::new).collect();
        Self::discover_in(&dirs)
    }

    /// Probe `dirs` in order for the tool executable.
    pub fn discover_in(dirs: &[&Path]) -> Option<Self> {
        dirs.iter()
            .map(|dir| dir.join(TOOL_NAME))
            .find(|candidate| candidate.is_file())
            .map(Self::at)
    }

    /// Absolute path of the executable.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Arguments that list the members of `archive`, one per line.
    pub fn list_args(&self, archive: &Path) -> Vec<OsString> {
        vec!["-t".into(), "-f".into(), archive.as_os_str().to_os_string()]
    }

    /// Arguments that write `member` of `archive` to standard output.
    pub fn extract_args(&self, archive: &Path, member: &str) -> Vec<OsString> {
        vec![
            "-O".into(),
            "-x".into(),
            "-f".into(),
            archive.as_os_str().to_os_string(),
            format!("--include={}", member).into(),
            "--passphrase".into(),
            PASSPHRASE_SENTINEL.into(),
        ]
    }
}

/// Whether archive inspection can run at all, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolAvailability {
    /// The tool was found; archives are expanded
    Available(ArchiveTool),

    /// No tool; every attachment is treated as a non-archive
    Unavailable {
        /// Why the tool could not be used
        reason: String,
    },
}

impl ToolAvailability {
    /// Resolve from an optional configured path, falling back to probing.
    pub fn resolve(configured: Option<&Path>) -> Self {
        if let Some(path) = configured {
            if path.is_file() {
                debug!("using configured archive tool {}", path.display());
                return ToolAvailability::Available(ArchiveTool::at(path));
            }
            warn!(
                "configured archive tool {} does not exist, probing instead",
                path.display()
            );
        }

        match ArchiveTool::discover() {
            Some(tool) => {
                debug!("found {} in {}", TOOL_NAME, tool.path().display());
                ToolAvailability::Available(tool)
            }
            None => {
                warn!(
                    "the '{}' binary is required to extract filenames from archive files",
                    TOOL_NAME
                );
                ToolAvailability::Unavailable {
                    reason: format!("{} not found", TOOL_NAME),
                }
            }
        }
    }

    /// The tool, when available.
    pub fn tool(&self) -> Option<&ArchiveTool> {
        match self {
            ToolAvailability::Available(tool) => Some(tool),
            ToolAvailability::Unavailable { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_discover_in_picks_first_match() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        fs::write(second.path().join(TOOL_NAME), b"").unwrap();

        let tool = ArchiveTool::discover_in(&[first.path(), second.path()]).unwrap();
        assert_eq!(tool.path(), second.path().join(TOOL_NAME));
    }

    #[test]
    fn test_discover_in_nothing_found() {
        let empty = TempDir::new().unwrap();
        assert!(ArchiveTool::discover_in(&[empty.path()]).is_none());
    }

    #[test]
    fn test_resolve_configured_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mytar");
        fs::write(&path, b"").unwrap();

        let availability = ToolAvailability::resolve(Some(&path));
        assert_eq!(availability.tool().unwrap().path(), path);
    }

    #[test]
    fn test_extract_args_carry_sentinel() {
        let tool = ArchiveTool::at("/usr/bin/bsdtar");
        let args = tool.extract_args(Path::new("/tmp/a.zip"), "dir/b.tar");
        assert_eq!(args[0], "-O");
        assert!(args.contains(&OsString::from("--include=dir/b.tar")));
        assert_eq!(args.last().unwrap(), PASSPHRASE_SENTINEL);
    }
}
