//! Detection of passphrase-protected members from tool diagnostics.

/// Decides whether a failed extraction was caused by encryption.
///
/// The archive tool signals encryption only through its standard error
/// wording, so the match lives behind this trait and can be replaced when a
/// different tool or tool version is used.
pub trait EncryptionDetector: Send + Sync {
    /// Returns `true` when `stderr` reports a rejected or required passphrase.
    fn is_encrypted(&self, stderr: &str) -> bool;
}

/// Messages libarchive based tools print for encrypted content.
pub const DEFAULT_SIGNATURES: [&str; 4] = [
    "incorrect passphrase",
    "passphrase required",
    "encrypted file is unsupported",
    "encryption is not supported",
];

/// Case-insensitive substring match against known passphrase messages.
#[derive(Debug, Clone)]
pub struct PassphraseRejection {
    signatures: Vec<String>,
}

impl PassphraseRejection {
    /// Match against a custom set of messages.
    pub fn with_signatures<I, S>(signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            signatures: signatures
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .collect(),
        }
    }
}

impl Default for PassphraseRejection {
    fn default() -> Self {
        Self::with_signatures(DEFAULT_SIGNATURES)
    }
}

impl EncryptionDetector for PassphraseRejection {
    fn is_encrypted(&self, stderr: &str) -> bool {
        let stderr = stderr.to_lowercase();
        self.signatures.iter().any(|sig| stderr.contains(sig.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_signatures() {
        let detector = PassphraseRejection::default();
        assert!(detector.is_encrypted("bsdtar: Incorrect passphrase"));
        assert!(detector.is_encrypted("secret.txt: Passphrase required for this entry"));
        assert!(detector.is_encrypted("Encrypted file is unsupported"));
        assert!(!detector.is_encrypted("Unrecognized archive format"));
        assert!(!detector.is_encrypted(""));
    }

    #[test]
    fn test_custom_signatures() {
        let detector = PassphraseRejection::with_signatures(["Wrong Password"]);
        assert!(detector.is_encrypted("error: wrong password given"));
        assert!(!detector.is_encrypted("Incorrect passphrase"));
    }
}
