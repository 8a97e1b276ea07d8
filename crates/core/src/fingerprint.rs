use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

use crate::domain::Fingerprint;

/// Compute the SHA-256 hash of a file's contents using streaming I/O.
/// Reads in 64KB chunks to avoid loading large files entirely into memory.
pub fn compute_sha256(path: &Path) -> std::io::Result<String> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::with_capacity(64 * 1024, file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let result = hasher.finalize();
    Ok(format!("{:x}", result))
}

/// Size and modification time (nanoseconds since the epoch) of a file.
pub fn stat(path: &Path) -> std::io::Result<(u64, i64)> {
    let meta = std::fs::metadata(path)?;
    let mtime_ns = meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);
    Ok((meta.len(), mtime_ns))
}

/// Full fingerprint of a file: stat plus content digest.
pub fn fingerprint(path: &Path) -> std::io::Result<Fingerprint> {
    let (size, mtime_ns) = stat(path)?;
    let sha256 = compute_sha256(path)?;
    Ok(Fingerprint {
        size,
        mtime_ns,
        sha256,
    })
}

/// Outcome of comparing a file on disk against a previously stored fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// Size and mtime match; the stored digest was trusted without reading the file.
    Unchanged,
    /// Stat changed but the content digest did not (the file was only touched).
    Touched(Fingerprint),
    /// Content differs, or there was nothing to compare against.
    Changed(Fingerprint),
}

/// Compare `path` against `previous`, hashing only when the stat fast path fails.
pub fn check(path: &Path, previous: Option<&Fingerprint>) -> std::io::Result<Freshness> {
    let (size, mtime_ns) = stat(path)?;

    if let Some(prev) = previous {
        if !prev.is_empty() && prev.same_stat(size, mtime_ns) {
            return Ok(Freshness::Unchanged);
        }
    }

    let current = Fingerprint {
        size,
        mtime_ns,
        sha256: compute_sha256(path)?,
    };

    match previous {
        Some(prev) if !prev.is_empty() && prev.sha256 == current.sha256 => {
            Ok(Freshness::Touched(current))
        }
        _ => Ok(Freshness::Changed(current)),
    }
}
