//! Configuration for the inspection engine.
//!
//! The on-disk format is TOML. Several keys have legacy spellings that are
//! still honoured; [`UnpackerConfig::from_raw`] resolves them in precedence
//! order.

use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Archive extensions used when none are configured.
pub const DEFAULT_ARCHIVE_EXTENSIONS: &str = "zip tar tgz taz z gz rar 7z";

/// Nesting ceiling used when none is configured.
pub const DEFAULT_MAX_DEPTH: u32 = 5;

/// Timeout in seconds used when none is configured.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// The `[main]` section as written on disk.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MainSection {
    pub timeout: Option<u64>,
    pub disallowed_extensions: Option<String>,
    pub archive_extensions: Option<String>,
    pub archive_extns: Option<String>,
    pub archive_max_depth: Option<u32>,
    pub tool_path: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
}

/// The `[archive]` section as written on disk.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ArchiveSection {
    pub extensions: Option<String>,
    pub max_depth: Option<u32>,
    pub allow_encrypted: bool,
}

/// Deny-list regular expressions, one list per subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegexSection {
    /// Matched against top-level attachment filenames
    pub filename: Vec<String>,
    /// Matched against attachment content types
    pub ctype: Vec<String>,
    /// Matched against member paths found inside archives
    pub archive_filename: Vec<String>,
}

/// Unresolved config file contents.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub main: MainSection,
    pub archive: ArchiveSection,
    pub regex: RegexSection,
}

/// Lower-cased set of extensions that mark a file as a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveExtensions {
    exts: BTreeSet<String>,
}

impl ArchiveExtensions {
    /// Parse a list separated by commas, semicolons or whitespace.
    ///
    /// Returns `None` when the list has no usable entries.
    pub fn parse(list: &str) -> Option<Self> {
        let exts: BTreeSet<String> = split_list(list).collect();
        if exts.is_empty() {
            None
        } else {
            Some(Self { exts })
        }
    }

    /// Whether `ext` is listed, matched with and without a leading dot.
    pub fn contains(&self, ext: &str) -> bool {
        let ext = ext.to_lowercase();
        if self.exts.contains(&ext) {
            return true;
        }
        match ext.strip_prefix('.') {
            Some(bare) => self.exts.contains(bare),
            None => false,
        }
    }

    /// Whether the final component of `name` carries a listed extension.
    pub fn matches_file(&self, name: &str) -> bool {
        let ext = extname(name);
        !ext.is_empty() && self.contains(&ext)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.exts.iter().map(String::as_str)
    }
}

impl Default for ArchiveExtensions {
    fn default() -> Self {
        Self {
            exts: split_list(DEFAULT_ARCHIVE_EXTENSIONS).collect(),
        }
    }
}

/// Extension of the last path component including the dot, lower-cased.
///
/// Names starting with a dot and names without one have no extension.
pub fn extname(name: &str) -> String {
    let base = name.rsplit('/').next().unwrap_or(name);
    match base.rfind('.') {
        Some(pos) if pos > 0 => base[pos..].to_lowercase(),
        _ => String::new(),
    }
}

pub(crate) fn split_list(list: &str) -> impl Iterator<Item = String> + '_ {
    list.split(|c: char| c == ';' || c == ',' || c.is_whitespace())
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
}

/// Resolved configuration.
#[derive(Debug, Clone)]
pub struct UnpackerConfig {
    /// Per-invocation and per-session deadline
    pub timeout: Duration,

    /// Nesting ceiling; containers at this depth are not expanded
    pub max_depth: u32,

    /// Extensions that mark a member as a nested container
    pub extensions: ArchiveExtensions,

    /// Whether an encrypted archive is acceptable to the policy
    pub allow_encrypted: bool,

    /// Extensions that are rejected wherever they appear
    pub disallowed_extensions: Vec<String>,

    /// Deny-list patterns
    pub patterns: RegexSection,

    /// Archive tool override; probed for when absent
    pub tool_path: Option<PathBuf>,

    /// Directory for staging files and the tool's working directory
    pub work_dir: PathBuf,
}

impl Default for UnpackerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_depth: DEFAULT_MAX_DEPTH,
            extensions: ArchiveExtensions::default(),
            allow_encrypted: false,
            disallowed_extensions: Vec::new(),
            patterns: RegexSection::default(),
            tool_path: None,
            work_dir: std::env::temp_dir(),
        }
    }
}

impl UnpackerConfig {
    /// Load and resolve a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and resolve TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text)?;
        Ok(Self::from_raw(raw))
    }

    /// Resolve legacy keys and defaults.
    ///
    /// Zero values for timeout and depth count as unset.
    pub fn from_raw(raw: RawConfig) -> Self {
        let defaults = Self::default();

        let timeout = raw
            .main
            .timeout
            .filter(|t| *t > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);

        let max_depth = raw
            .archive
            .max_depth
            .filter(|d| *d > 0)
            .or(raw.main.archive_max_depth.filter(|d| *d > 0))
            .unwrap_or(defaults.max_depth);

        let extensions = [
            raw.archive.extensions.as_deref(),
            raw.main.archive_extensions.as_deref(),
            raw.main.archive_extns.as_deref(),
        ]
        .into_iter()
        .flatten()
        .find(|list| !list.trim().is_empty())
        .and_then(ArchiveExtensions::parse)
        .unwrap_or_default();

        let disallowed_extensions = raw
            .main
            .disallowed_extensions
            .as_deref()
            .map(|list| split_list(list).collect())
            .unwrap_or_default();

        Self {
            timeout,
            max_depth,
            extensions,
            allow_encrypted: raw.archive.allow_encrypted,
            disallowed_extensions,
            patterns: raw.regex,
            tool_path: raw.main.tool_path,
            work_dir: raw.main.work_dir.unwrap_or(defaults.work_dir),
        }
    }

    /// Whether an attachment extension marks a container.
    pub fn has_archive_extension(&self, ext: &str) -> bool {
        self.extensions.contains(ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = UnpackerConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_depth, 5);
        assert!(cfg.has_archive_extension("zip"));
        assert!(cfg.has_archive_extension(".7z"));
        assert!(!cfg.has_archive_extension("txt"));
        assert!(!cfg.allow_encrypted);
    }

    #[test]
    fn test_new_keys_win_over_legacy() {
        let cfg = UnpackerConfig::from_toml_str(
            r#"
            [main]
            timeout = 5
            archive_extensions = "cab"
            archive_extns = "arj"
            archive_max_depth = 2

            [archive]
            extensions = "zip, iso;lha"
            max_depth = 7
            allow_encrypted = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.timeout, Duration::from_secs(5));
        assert_eq!(cfg.max_depth, 7);
        assert!(cfg.has_archive_extension("iso"));
        assert!(cfg.has_archive_extension("LHA"));
        assert!(!cfg.has_archive_extension("cab"));
        assert!(cfg.allow_encrypted);
    }

    #[test]
    fn test_legacy_fallbacks() {
        let cfg = UnpackerConfig::from_toml_str(
            r#"
            [main]
            timeout = 0
            archive_extns = "arj"
            archive_max_depth = 3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_depth, 3);
        assert!(cfg.has_archive_extension("arj"));
        assert!(!cfg.has_archive_extension("zip"));
    }

    #[test]
    fn test_blank_extension_list_uses_default() {
        let cfg = UnpackerConfig::from_toml_str("[archive]\nextensions = \" ,; \"\n").unwrap();
        assert!(cfg.has_archive_extension("tgz"));
    }

    #[test]
    fn test_disallowed_extensions_and_patterns() {
        let cfg = UnpackerConfig::from_toml_str(
            r#"
            [main]
            disallowed_extensions = "EXE;scr  bat"

            [regex]
            ctype = ["^application/x-msdownload$"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.disallowed_extensions, vec!["exe", "scr", "bat"]);
        assert_eq!(cfg.patterns.ctype.len(), 1);
        assert!(cfg.patterns.filename.is_empty());
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            UnpackerConfig::from_toml_str("[main\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_extname() {
        assert_eq!(extname("a/b/Inner.TAR"), ".tar");
        assert_eq!(extname("archive.tar.gz"), ".gz");
        assert_eq!(extname(".zip"), "");
        assert_eq!(extname("README"), "");
        assert_eq!(extname("dir.d/file"), "");
    }

    #[test]
    fn test_matches_file() {
        let exts = ArchiveExtensions::default();
        assert!(exts.matches_file("outer/inner.ZIP"));
        assert!(!exts.matches_file("notes.txt"));
        assert!(!exts.matches_file("zip"));
    }
}
