//! Binary on-disk records: the per-entry policy file and the scalar
//! bookkeeping files (`cache.size`, `cache.lcd`).
//!
//! Every binary file starts with the version tag. Readers must treat any
//! other tag as incompatible: the value reads as absent, never as an error
//! that stops the cache, and the next write simply overwrites the file.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{CdpError, Result};

/// Version tag: major 3, minor 0, patch 0.
pub const VERSION_TAG: [u8; 3] = [0x00, 0x03, 0x00];

/// Expiry metadata stored next to each payload.
///
/// `absolute_expiry_ms` and `sliding_ttl_ms` are milliseconds; the key is
/// stored verbatim so hashed layouts can tell collisions apart exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    /// Instant the entry dies, as milliseconds since the unix epoch.
    /// `i64::MAX` means never.
    pub absolute_expiry_ms: i64,
    /// Zero means no sliding refresh.
    pub sliding_ttl_ms: i64,
    /// The exact key this entry was stored under.
    pub key: String,
}

impl CachePolicy {
    pub fn new(absolute_ttl: Option<Duration>, sliding_ttl: Option<Duration>, key: String) -> Self {
        let now = now_ms();
        let sliding_ttl_ms = sliding_ttl.map(|d| d.as_millis() as i64).unwrap_or(0);
        let absolute_expiry_ms = match (sliding_ttl_ms, absolute_ttl) {
            (s, _) if s > 0 => now.saturating_add(s),
            (_, Some(ttl)) => now.saturating_add(ttl.as_millis() as i64),
            (_, None) => i64::MAX,
        };
        Self {
            absolute_expiry_ms,
            sliding_ttl_ms,
            key,
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.absolute_expiry_ms <= now_ms
    }

    /// Sliding entries move their expiry to `now + sliding` on access.
    pub fn refreshed(&self, now_ms: i64) -> Self {
        let mut next = self.clone();
        if self.sliding_ttl_ms > 0 {
            next.absolute_expiry_ms = now_ms.saturating_add(self.sliding_ttl_ms);
        }
        next
    }

    pub fn encode(&self) -> Vec<u8> {
        let key = self.key.as_bytes();
        let mut out = Vec::with_capacity(VERSION_TAG.len() + 16 + 4 + key.len());
        out.extend_from_slice(&VERSION_TAG);
        out.extend_from_slice(&self.absolute_expiry_ms.to_le_bytes());
        out.extend_from_slice(&self.sliding_ttl_ms.to_le_bytes());
        out.extend_from_slice(&(key.len() as u32).to_le_bytes());
        out.extend_from_slice(key);
        out
    }

    /// `None` when the tag does not match (incompatible layout, treat as
    /// miss); `Err` when the tag matches but the record is truncated.
    pub fn decode(bytes: &[u8]) -> Result<Option<Self>> {
        if bytes.len() < VERSION_TAG.len() || bytes[..VERSION_TAG.len()] != VERSION_TAG {
            return Ok(None);
        }
        let rest = &bytes[VERSION_TAG.len()..];
        if rest.len() < 20 {
            return Err(CdpError::CacheCorrupt("truncated policy record".into()));
        }
        let absolute_expiry_ms = i64::from_le_bytes(rest[0..8].try_into().unwrap_or_default());
        let sliding_ttl_ms = i64::from_le_bytes(rest[8..16].try_into().unwrap_or_default());
        let key_len = u32::from_le_bytes(rest[16..20].try_into().unwrap_or_default()) as usize;
        let key_bytes = rest
            .get(20..20 + key_len)
            .ok_or_else(|| CdpError::CacheCorrupt("truncated policy key".into()))?;
        let key = String::from_utf8(key_bytes.to_vec())
            .map_err(|_| CdpError::CacheCorrupt("policy key is not utf-8".into()))?;
        Ok(Some(Self {
            absolute_expiry_ms,
            sliding_ttl_ms,
            key,
        }))
    }
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Read a versioned little-endian i64 scalar file. Missing file or foreign
/// version tag both read as `None`.
pub fn read_scalar(path: &Path) -> Option<i64> {
    let bytes = std::fs::read(path).ok()?;
    if bytes.len() != VERSION_TAG.len() + 8 || bytes[..VERSION_TAG.len()] != VERSION_TAG {
        return None;
    }
    Some(i64::from_le_bytes(
        bytes[VERSION_TAG.len()..].try_into().ok()?,
    ))
}

pub fn write_scalar(path: &Path, value: i64) -> Result<()> {
    let mut out = Vec::with_capacity(VERSION_TAG.len() + 8);
    out.extend_from_slice(&VERSION_TAG);
    out.extend_from_slice(&value.to_le_bytes());
    std::fs::write(path, out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_record_round_trips() {
        let policy = CachePolicy {
            absolute_expiry_ms: 1_700_000_000_000,
            sliding_ttl_ms: 60_000,
            key: "https://example.test/img.png".into(),
        };
        let decoded = CachePolicy::decode(&policy.encode()).unwrap().unwrap();
        assert_eq!(decoded, policy);
    }

    #[test]
    fn foreign_version_tag_reads_as_absent() {
        let mut bytes = CachePolicy::new(None, None, "k".into()).encode();
        bytes[1] = 0x09;
        assert!(CachePolicy::decode(&bytes).unwrap().is_none());
        // A bare value with no tag at all is also just a miss.
        assert!(CachePolicy::decode(b"42").unwrap().is_none());
        assert!(CachePolicy::decode(b"").unwrap().is_none());
    }

    #[test]
    fn truncated_record_is_corrupt_not_a_panic() {
        let bytes = CachePolicy::new(None, None, "key".into()).encode();
        let err = CachePolicy::decode(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(err, CdpError::CacheCorrupt(_)));
    }

    #[test]
    fn sliding_refresh_moves_the_absolute_expiry() {
        let policy = CachePolicy::new(None, Some(Duration::from_secs(60)), "k".into());
        let later = policy.absolute_expiry_ms + 30_000;
        let refreshed = policy.refreshed(later);
        assert_eq!(refreshed.absolute_expiry_ms, later + 60_000);

        let fixed = CachePolicy::new(Some(Duration::from_secs(60)), None, "k".into());
        assert_eq!(
            fixed.refreshed(later).absolute_expiry_ms,
            fixed.absolute_expiry_ms
        );
    }

    #[test]
    fn scalar_files_round_trip_and_reject_foreign_tags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.size");
        write_scalar(&path, 123_456).unwrap();
        assert_eq!(read_scalar(&path), Some(123_456));

        std::fs::write(&path, b"123456").unwrap();
        assert_eq!(read_scalar(&path), None);
        assert_eq!(read_scalar(&dir.path().join("missing")), None);
    }
}
