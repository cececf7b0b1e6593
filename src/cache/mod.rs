//! On-disk HTTP fetch cache with TTL policies and size-capped eviction.
//!
//! The cache root holds two parallel subtrees (`cache/` for payloads,
//! `policy/` for expiry metadata) plus three bookkeeping files:
//! `cache.size` (total bytes), `cache.lcd` (last expiry sweep) and the
//! advisory lock `cache.sem`, held only while evicting or sweeping.
//! Routine reads and writes never take the lock; they retry on contention
//! in 50 ms increments until the configured access timeout turns a
//! persistent conflict into [`CdpError::CacheBusy`].

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{CdpError, Result};

mod layout;
mod policy;

pub use layout::CacheLayout;
pub use policy::{CachePolicy, VERSION_TAG};

use policy::{now_ms, read_scalar, write_scalar};

/// Shrink target once the size cap is exceeded, in percent of `max_size`.
const SHRINK_TARGET_PERCENT: u64 = 75;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// When false the cache becomes a passthrough fetcher: nothing is
    /// read from or written to disk.
    pub enabled: bool,
    pub root: PathBuf,
    /// Total bytes (payload plus policy files) before eviction kicks in.
    pub max_size: u64,
    /// Lifetime counted from the write. `None` means entries never expire
    /// on their own.
    pub absolute_ttl: Option<Duration>,
    /// When set, every hit pushes the expiry out to `now + sliding`.
    pub sliding_ttl: Option<Duration>,
    pub layout: CacheLayout,
    /// Bound on waiting out file contention. `None` waits forever.
    pub access_timeout: Option<Duration>,
    /// Cadence of the expiry sweep. `None` means never sweep.
    pub clean_interval: Option<Duration>,
}

impl CacheConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            root: root.into(),
            max_size: 100 * 1024 * 1024,
            absolute_ttl: Some(Duration::from_secs(24 * 60 * 60)),
            sliding_ttl: None,
            layout: CacheLayout::default(),
            access_timeout: None,
            clean_interval: None,
        }
    }
}

#[derive(Debug)]
struct Inner {
    config: CacheConfig,
    client: reqwest::Client,
    payload_dir: PathBuf,
    policy_dir: PathBuf,
    size_file: PathBuf,
    lcd_file: PathBuf,
    sem_file: PathBuf,
    /// Mirror of `cache.size`, persisted on every change.
    current_size: AtomicI64,
}

/// The fetch cache. Cheap to clone; clones share one on-disk state.
#[derive(Debug, Clone)]
pub struct FetchCache {
    inner: Arc<Inner>,
}

/// Where a key lives on disk, and what is currently stored there.
#[derive(Debug)]
struct Slot {
    payload: PathBuf,
    policy: PathBuf,
    existing: Option<CachePolicy>,
}

impl FetchCache {
    pub fn new(config: CacheConfig) -> Result<Self> {
        let payload_dir = config.root.join("cache");
        let policy_dir = config.root.join("policy");
        if config.enabled {
            std::fs::create_dir_all(&payload_dir)?;
            std::fs::create_dir_all(&policy_dir)?;
        }
        let size_file = config.root.join("cache.size");
        let lcd_file = config.root.join("cache.lcd");
        let sem_file = config.root.join("cache.sem");

        let current = if !config.enabled {
            0
        } else {
            match read_scalar(&size_file) {
                Some(size) => size,
                // Missing or incompatible: recount from what is on disk.
                None => {
                    let size = dir_size(&payload_dir)? + dir_size(&policy_dir)?;
                    write_scalar(&size_file, size)?;
                    size
                }
            }
        };

        Ok(Self {
            inner: Arc::new(Inner {
                client: reqwest::Client::new(),
                payload_dir,
                policy_dir,
                size_file,
                lcd_file,
                sem_file,
                current_size: AtomicI64::new(current),
                config,
            }),
        })
    }

    /// Serve `url` from disk or fetch it from the origin.
    ///
    /// The flag is `true` when the bytes came out of the cache.
    pub async fn get(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<(Bytes, bool)> {
        if !self.inner.config.enabled {
            let mut request = self.inner.client.get(url);
            for (name, value) in headers {
                request = request.header(name, value);
            }
            let body = request.send().await?.error_for_status()?.bytes().await?;
            return Ok((body, false));
        }

        let key = canonical_key(url);
        let slot = self.resolve_slot(&key).await?;
        let now = now_ms();

        if let Some(existing) = &slot.existing {
            if existing.is_expired(now) {
                tracing::debug!(%key, "cache entry expired");
                self.remove_entry(&slot.payload, &slot.policy)?;
            } else {
                match self.retrying(|| std::fs::read(&slot.payload)).await {
                    Ok(bytes) => {
                        if existing.sliding_ttl_ms > 0 {
                            let refreshed = existing.refreshed(now).encode();
                            self.retrying(|| std::fs::write(&slot.policy, &refreshed))
                                .await?;
                        }
                        tracing::debug!(%key, "cache hit");
                        return Ok((bytes.into(), true));
                    }
                    Err(CdpError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                        // Payload vanished under us; refetch below.
                        self.remove_entry(&slot.payload, &slot.policy)?;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        tracing::debug!(%key, "cache miss, fetching origin");
        let mut request = self.inner.client.get(url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let body = request.send().await?.error_for_status()?.bytes().await?;

        let record = CachePolicy::new(
            self.inner.config.absolute_ttl,
            self.inner.config.sliding_ttl,
            key.clone(),
        )
        .encode();
        {
            let body = body.clone();
            let path = slot.payload.clone();
            self.retrying(move || std::fs::write(&path, &body)).await?;
        }
        self.retrying(|| std::fs::write(&slot.policy, &record))
            .await?;
        self.adjust_size((body.len() + record.len()) as i64)?;

        if self.current_size() > self.inner.config.max_size as i64 {
            let cache = self.clone();
            tokio::spawn(async move {
                if let Err(e) = cache.shrink_to_target().await {
                    tracing::warn!(error = %e, "cache eviction failed");
                }
            });
        }
        self.maybe_schedule_sweep();

        Ok((body, false))
    }

    /// Total bytes currently accounted for.
    pub fn current_size(&self) -> i64 {
        self.inner.current_size.load(Ordering::SeqCst)
    }

    /// Evict least-recently-written entries until the cache fits the shrink
    /// target. Ties go to the larger entry, then key order.
    pub async fn shrink_to_target(&self) -> Result<()> {
        let target =
            (self.inner.config.max_size * SHRINK_TARGET_PERCENT / 100) as i64;
        if self.current_size() <= target {
            return Ok(());
        }
        let Some(_lock) = SemLock::try_acquire(&self.inner.sem_file)? else {
            // Another process is already cleaning.
            return Ok(());
        };

        let mut entries = self.scan_entries()?;
        entries.sort_by(|a, b| {
            a.last_access
                .cmp(&b.last_access)
                .then(b.len.cmp(&a.len))
                .then(a.key.cmp(&b.key))
        });
        for entry in entries {
            if self.current_size() <= target {
                break;
            }
            tracing::debug!(key = %entry.key, bytes = entry.len, "evicting cache entry");
            self.remove_entry(&entry.payload, &entry.policy)?;
        }
        Ok(())
    }

    /// Drop every entry whose absolute expiry has passed and stamp
    /// `cache.lcd`.
    pub async fn clean_expired(&self) -> Result<()> {
        let Some(_lock) = SemLock::try_acquire(&self.inner.sem_file)? else {
            return Ok(());
        };
        let now = now_ms();
        for entry in self.scan_entries()? {
            if entry.expiry_ms <= now {
                tracing::debug!(key = %entry.key, "sweeping expired cache entry");
                self.remove_entry(&entry.payload, &entry.policy)?;
            }
        }
        write_scalar(&self.inner.lcd_file, now)?;
        Ok(())
    }

    fn maybe_schedule_sweep(&self) {
        let Some(interval) = self.inner.config.clean_interval else {
            return;
        };
        let due = match read_scalar(&self.inner.lcd_file) {
            Some(last) => last + interval.as_millis() as i64 <= now_ms(),
            None => true,
        };
        if due {
            let cache = self.clone();
            tokio::spawn(async move {
                if let Err(e) = cache.clean_expired().await {
                    tracing::warn!(error = %e, "cache sweep failed");
                }
            });
        }
    }

    /// Walk collision slots until `key`'s home is found.
    async fn resolve_slot(&self, key: &str) -> Result<Slot> {
        for n in 0.. {
            let Some(stem) = self.inner.config.layout.stem(key, n) else {
                // The basic layout has a single slot per sanitized name and
                // knowingly overwrites on collision.
                break;
            };
            let payload = self.inner.payload_dir.join(format!("{stem}.dat"));
            let policy = self.inner.policy_dir.join(format!("{stem}.policy"));
            if !policy.exists() {
                return Ok(Slot {
                    payload,
                    policy,
                    existing: None,
                });
            }
            let bytes = self.retrying(|| std::fs::read(&policy)).await?;
            match CachePolicy::decode(&bytes) {
                Ok(Some(existing)) if existing.key == key => {
                    return Ok(Slot {
                        payload,
                        policy,
                        existing: Some(existing),
                    });
                }
                Ok(Some(_)) => {
                    // True collision: a different key owns this slot.
                    continue;
                }
                Ok(None) | Err(CdpError::CacheCorrupt(_)) => {
                    // Incompatible or damaged record: treat as miss and
                    // overwrite in place.
                    return Ok(Slot {
                        payload,
                        policy,
                        existing: None,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        // Basic layout fallback: reuse slot 0 unconditionally.
        let stem = self
            .inner
            .config
            .layout
            .stem(key, 0)
            .unwrap_or_else(|| "entry".to_string());
        Ok(Slot {
            payload: self.inner.payload_dir.join(format!("{stem}.dat")),
            policy: self.inner.policy_dir.join(format!("{stem}.policy")),
            existing: None,
        })
    }

    fn remove_entry(&self, payload: &Path, policy: &Path) -> Result<()> {
        let mut freed = 0i64;
        for path in [payload, policy] {
            match std::fs::metadata(path) {
                Ok(meta) => {
                    freed += meta.len() as i64;
                    if let Err(e) = std::fs::remove_file(path) {
                        if e.kind() != io::ErrorKind::NotFound {
                            return Err(e.into());
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if freed != 0 {
            self.adjust_size(-freed)?;
        }
        Ok(())
    }

    fn adjust_size(&self, delta: i64) -> Result<()> {
        let next = self
            .inner
            .current_size
            .fetch_add(delta, Ordering::SeqCst)
            .saturating_add(delta)
            .max(0);
        write_scalar(&self.inner.size_file, next)
    }

    fn scan_entries(&self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        for dirent in std::fs::read_dir(&self.inner.policy_dir)? {
            let dirent = dirent?;
            let policy_path = dirent.path();
            let Ok(bytes) = std::fs::read(&policy_path) else {
                continue;
            };
            let Ok(Some(record)) = CachePolicy::decode(&bytes) else {
                continue;
            };
            let stem = policy_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let payload_path = self.inner.payload_dir.join(format!("{stem}.dat"));
            let payload_len = std::fs::metadata(&payload_path)
                .map(|m| m.len())
                .unwrap_or(0);
            let last_access = std::fs::metadata(&policy_path)
                .and_then(|m| m.modified())
                .unwrap_or(std::time::UNIX_EPOCH);
            entries.push(Entry {
                key: record.key,
                expiry_ms: record.absolute_expiry_ms,
                payload: payload_path,
                policy: policy_path,
                len: payload_len + bytes.len() as u64,
                last_access,
            });
        }
        Ok(entries)
    }

    /// Run a filesystem operation, waiting out transient contention in
    /// growing 50 ms steps.
    async fn retrying<T>(&self, mut op: impl FnMut() -> io::Result<T>) -> Result<T> {
        let mut waited = Duration::ZERO;
        let mut attempt = 0u32;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if is_contention(&e) => {
                    attempt += 1;
                    let delay = Duration::from_millis(50) * attempt;
                    if let Some(limit) = self.inner.config.access_timeout {
                        if waited + delay > limit {
                            return Err(CdpError::CacheBusy(e.to_string()));
                        }
                    }
                    waited += delay;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[derive(Debug)]
struct Entry {
    key: String,
    expiry_ms: i64,
    payload: PathBuf,
    policy: PathBuf,
    len: u64,
    last_access: std::time::SystemTime,
}

fn is_contention(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::PermissionDenied
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
    )
}

fn canonical_key(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.to_string())
}

fn dir_size(dir: &Path) -> Result<i64> {
    let mut total = 0i64;
    for dirent in std::fs::read_dir(dir)? {
        total += dirent?.metadata()?.len() as i64;
    }
    Ok(total)
}

/// Advisory cross-process lock: the presence of `cache.sem` means held.
#[derive(Debug)]
struct SemLock {
    path: PathBuf,
}

impl SemLock {
    /// `None` when some other cleaner currently holds the lock.
    fn try_acquire(path: &Path) -> Result<Option<Self>> {
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(_) => Ok(Some(Self {
                path: path.to_path_buf(),
            })),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for SemLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cache_with(root: &Path, configure: impl FnOnce(&mut CacheConfig)) -> FetchCache {
        let mut config = CacheConfig::new(root);
        let () = configure(&mut config);
        FetchCache::new(config).unwrap()
    }

    async fn serve_bytes(server: &MockServer, at: &str, body: Vec<u8>, expected_hits: u64) {
        Mock::given(method("GET"))
            .and(path(at.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .expect(expected_hits)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn second_get_is_served_from_disk() {
        let server = MockServer::start().await;
        serve_bytes(&server, "/img.png", vec![7u8; 4096], 1).await;
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_with(dir.path(), |_| {});

        let url = format!("{}/img.png", server.uri());
        let (first, cached) = cache.get(&url, &HashMap::new()).await.unwrap();
        assert!(!cached);
        let (second, cached) = cache.get(&url, &HashMap::new()).await.unwrap();
        assert!(cached);
        assert_eq!(first, second);
        assert!(cache.current_size() > 4096);
    }

    #[tokio::test]
    async fn expired_entries_are_refetched() {
        let server = MockServer::start().await;
        serve_bytes(&server, "/img.png", b"payload".to_vec(), 2).await;
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_with(dir.path(), |c| {
            c.absolute_ttl = Some(Duration::from_millis(50));
        });

        let url = format!("{}/img.png", server.uri());
        cache.get(&url, &HashMap::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        let (_, cached) = cache.get(&url, &HashMap::new()).await.unwrap();
        assert!(!cached);
    }

    #[tokio::test]
    async fn sliding_access_keeps_an_entry_alive() {
        let server = MockServer::start().await;
        serve_bytes(&server, "/img.png", b"payload".to_vec(), 1).await;
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_with(dir.path(), |c| {
            c.absolute_ttl = None;
            c.sliding_ttl = Some(Duration::from_millis(1000));
        });

        let url = format!("{}/img.png", server.uri());
        cache.get(&url, &HashMap::new()).await.unwrap();
        // Each access pushes the expiry out; without the refresh the second
        // hit would land past the original deadline.
        tokio::time::sleep(Duration::from_millis(600)).await;
        let (_, cached) = cache.get(&url, &HashMap::new()).await.unwrap();
        assert!(cached);
        tokio::time::sleep(Duration::from_millis(600)).await;
        let (_, cached) = cache.get(&url, &HashMap::new()).await.unwrap();
        assert!(cached);
    }

    #[tokio::test]
    async fn oldest_entry_is_evicted_once_over_the_cap() {
        let server = MockServer::start().await;
        for p in ["/a", "/b", "/c"] {
            serve_bytes(&server, p, vec![1u8; 3584], 1).await;
        }
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_with(dir.path(), |c| {
            c.max_size = 10 * 1024;
        });

        let first_url = format!("{}/a", server.uri());
        cache.get(&first_url, &HashMap::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache
            .get(&format!("{}/b", server.uri()), &HashMap::new())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache
            .get(&format!("{}/c", server.uri()), &HashMap::new())
            .await
            .unwrap();

        // The third insert crossed the cap and kicked off the background
        // shrink to 75% of max.
        let target = (10 * 1024 * 75 / 100) as i64;
        let mut settled = false;
        for _ in 0..100 {
            if cache.current_size() <= target {
                settled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(settled, "size never shrank to {target}");

        let remaining: Vec<_> = std::fs::read_dir(dir.path().join("cache"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(remaining.len(), 2);
        // The oldest insert is the one that went.
        let first_stem = CacheLayout::Hashed
            .stem(&canonical_key(&first_url), 0)
            .unwrap();
        assert!(!dir
            .path()
            .join("cache")
            .join(format!("{first_stem}.dat"))
            .exists());
    }

    #[tokio::test]
    async fn foreign_version_policy_reads_as_a_miss() {
        let server = MockServer::start().await;
        serve_bytes(&server, "/img.png", b"payload".to_vec(), 2).await;
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_with(dir.path(), |_| {});

        let url = format!("{}/img.png", server.uri());
        cache.get(&url, &HashMap::new()).await.unwrap();

        // Stamp the policy with an incompatible version tag.
        let policy_dir = dir.path().join("policy");
        let policy_path = std::fs::read_dir(&policy_dir)
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        std::fs::write(&policy_path, [9u8, 9, 9, 1, 2, 3]).unwrap();

        let (_, cached) = cache.get(&url, &HashMap::new()).await.unwrap();
        assert!(!cached);
    }

    #[tokio::test]
    async fn hash_collisions_fall_through_to_suffixed_slots() {
        let server = MockServer::start().await;
        serve_bytes(&server, "/img.png", b"payload".to_vec(), 1).await;
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_with(dir.path(), |_| {});

        let url = format!("{}/img.png", server.uri());
        let key = canonical_key(&url);
        let stem = CacheLayout::Hashed.stem(&key, 0).unwrap();

        // Pretend a different key already owns the unsuffixed slot.
        let squatter = CachePolicy::new(None, None, "https://other.test/".into());
        std::fs::write(
            dir.path().join("policy").join(format!("{stem}.policy")),
            squatter.encode(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("cache").join(format!("{stem}.dat")),
            b"squatter",
        )
        .unwrap();

        let (body, cached) = cache.get(&url, &HashMap::new()).await.unwrap();
        assert!(!cached);
        assert_eq!(&body[..], b"payload");
        // The new entry landed in the `_1` slot; the squatter is intact.
        assert!(dir
            .path()
            .join("cache")
            .join(format!("{stem}_1.dat"))
            .exists());
        assert_eq!(
            std::fs::read(dir.path().join("cache").join(format!("{stem}.dat"))).unwrap(),
            b"squatter"
        );

        // And the true key is found again on the next lookup.
        let (_, cached) = cache.get(&url, &HashMap::new()).await.unwrap();
        assert!(cached);
    }

    #[tokio::test]
    async fn basic_layout_uses_sanitized_key_names() {
        let server = MockServer::start().await;
        serve_bytes(&server, "/img.png", b"payload".to_vec(), 1).await;
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_with(dir.path(), |c| {
            c.layout = CacheLayout::Basic;
        });

        let url = format!("{}/img.png", server.uri());
        cache.get(&url, &HashMap::new()).await.unwrap();
        let names: Vec<String> = std::fs::read_dir(dir.path().join("cache"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with("img_png.dat"), "got {names:?}");
    }

    #[tokio::test]
    async fn clean_expired_sweeps_and_stamps_lcd() {
        let server = MockServer::start().await;
        serve_bytes(&server, "/a", b"payload-a".to_vec(), 1).await;
        serve_bytes(&server, "/b", b"payload-b".to_vec(), 1).await;
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_with(dir.path(), |c| {
            c.absolute_ttl = Some(Duration::from_millis(40));
        });

        cache
            .get(&format!("{}/a", server.uri()), &HashMap::new())
            .await
            .unwrap();
        cache
            .get(&format!("{}/b", server.uri()), &HashMap::new())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        cache.clean_expired().await.unwrap();

        assert_eq!(std::fs::read_dir(dir.path().join("cache")).unwrap().count(), 0);
        assert_eq!(cache.current_size(), 0);
        assert!(read_scalar(&dir.path().join("cache.lcd")).is_some());
    }
}
