//! # Mount Prober
//!
//! Write-probe of the host mountpoint. A hung FUSE mount can block any
//! filesystem syscall indefinitely, so the probe body runs on the blocking
//! pool under a hard timeout; a timeout counts as "stuck".

use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use std::time::Duration;

/// Fixed-name sentinel written and removed by the probe.
pub const RW_PROBE_FILE: &str = ".volume-s3-rw-probe";

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Returns true when the path exists and (unless read-only) a sentinel file
/// can be written and unlinked.
pub async fn test_rw(path: &str, read_only: bool) -> bool {
    let path = path.to_owned();
    let probe = tokio::task::spawn_blocking(move || probe_blocking(&path, read_only));
    matches!(tokio::time::timeout(PROBE_TIMEOUT, probe).await, Ok(Ok(true)))
}

fn probe_blocking(path: &str, read_only: bool) -> bool {
    let dir = Path::new(path);
    if !dir.is_dir() {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true).mode(0o755);
        if builder.create(dir).is_err() {
            return false;
        }
    }
    if read_only {
        return dir.is_dir();
    }
    let sentinel = dir.join(RW_PROBE_FILE);
    if fs::write(&sentinel, b"rw-probe").is_err() {
        return false;
    }
    fs::remove_file(&sentinel).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writable_directory_probes_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert!(test_rw(dir.path().to_str().unwrap(), false).await);
        // sentinel cleaned up
        assert!(!dir.path().join(RW_PROBE_FILE).exists());
    }

    #[tokio::test]
    async fn missing_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        assert!(test_rw(nested.to_str().unwrap(), false).await);
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn read_only_mode_only_requires_existence() {
        let dir = tempfile::tempdir().unwrap();
        assert!(test_rw(dir.path().to_str().unwrap(), true).await);
    }
}
