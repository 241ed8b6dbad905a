// casket-net/src/validation.rs
use std::fs::File;
use std::io;
use std::path::Path;

use casket_common::error::{CasketError, Result};
use sha2::{Digest, Sha256};
use url::Url;

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let bytes_copied = io::copy(&mut file, &mut hasher)?;
    let actual = hex::encode(hasher.finalize());
    tracing::debug!(
        "Calculated SHA256 for {}: {} ({} bytes read)",
        path.display(),
        actual,
        bytes_copied
    );
    Ok(actual)
}

pub fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    let actual = sha256_file(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(CasketError::ChecksumMismatch(format!(
            "{}: expected {}, got {}",
            path.display(),
            expected,
            actual
        )))
    }
}

/// Only https downloads are accepted.
pub fn validate_url(url_str: &str) -> Result<()> {
    let url = Url::parse(url_str)
        .map_err(|e| CasketError::Validation(format!("Failed to parse URL '{url_str}': {e}")))?;
    if url.scheme() == "https" {
        Ok(())
    } else {
        Err(CasketError::Validation(format!(
            "Invalid URL scheme for '{}': Must be https, but got '{}'",
            url_str,
            url.scheme()
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    // sha256("hello\n")
    const HELLO_SHA: &str = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";

    #[test]
    fn checksum_matches_case_insensitively() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("hello.txt");
        fs::write(&path, "hello\n").unwrap();

        assert_eq!(sha256_file(&path).unwrap(), HELLO_SHA);
        verify_checksum(&path, &HELLO_SHA.to_uppercase()).unwrap();
        assert!(matches!(
            verify_checksum(&path, "deadbeef"),
            Err(CasketError::ChecksumMismatch(_))
        ));
    }

    #[test]
    fn only_https_urls_pass() {
        validate_url("https://example.com/Foo.zip").unwrap();
        assert!(validate_url("http://example.com/Foo.zip").is_err());
        assert!(validate_url("not a url").is_err());
    }
}
