use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Root for UUID-derived UIDs (PS3.5 B.2).
const UUID_ROOT: &str = "2.25";

/// Seed for every UID minted during one conversion.
///
/// Built from the source file contents and the output name, so the same
/// invocation always yields the same identifiers.
#[derive(Debug, Clone)]
pub struct UidSeed {
    digest: [u8; 32],
}

impl UidSeed {
    pub fn from_file(path: &Path, output_name: &str) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut file = File::open(path)?;
        io::copy(&mut file, &mut hasher)?;
        hasher.update(b"\0");
        hasher.update(output_name.as_bytes());
        Ok(Self {
            digest: hasher.finalize().into(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            digest: Sha256::digest(bytes).into(),
        }
    }

    /// Short hex fingerprint, handy in log lines.
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.digest[..6])
    }

    /// UID for a named role ("study", "series", "instance-3", ...).
    pub fn derive(&self, role: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.digest);
        hasher.update(role.as_bytes());
        let hash = hasher.finalize();

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&hash[..16]);
        // Mark as a version 4 / RFC 4122 variant UUID.
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        format!("{}.{}", UUID_ROOT, u128::from_be_bytes(bytes))
    }
}

/// Basic UID syntax check: dot-separated numeric components, no leading zeros, at most 64 chars.
pub fn is_valid_uid(uid: &str) -> bool {
    if uid.is_empty() || uid.len() > 64 {
        return false;
    }
    uid.split('.').all(|part| {
        !part.is_empty()
            && part.bytes().all(|b| b.is_ascii_digit())
            && (part == "0" || !part.starts_with('0'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_uids_are_stable_and_distinct() {
        let seed = UidSeed::from_bytes(b"slide");
        let study = seed.derive("study");
        assert_eq!(study, UidSeed::from_bytes(b"slide").derive("study"));
        assert_ne!(study, seed.derive("series"));
        assert_ne!(study, UidSeed::from_bytes(b"other").derive("study"));
    }

    #[test]
    fn derived_uids_are_valid() {
        let seed = UidSeed::from_bytes(b"abc");
        for role in ["study", "series", "instance-0", "instance-12"] {
            let uid = seed.derive(role);
            assert!(uid.starts_with("2.25."));
            assert!(is_valid_uid(&uid), "{uid}");
        }
    }

    #[test]
    fn uid_syntax_check() {
        assert!(is_valid_uid("1.2.840.10008.1.2.1"));
        assert!(is_valid_uid("1.0.3"));
        assert!(!is_valid_uid(""));
        assert!(!is_valid_uid("1..2"));
        assert!(!is_valid_uid("1.02"));
        assert!(!is_valid_uid("1.2.a"));
        assert!(!is_valid_uid(&"1.".repeat(40)));
    }
}
