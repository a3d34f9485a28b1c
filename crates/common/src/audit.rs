//! Deduplicating audit logger.
//!
//! One logical playback typically produces several HTTP requests from the
//! same client for the same path in quick succession (HEAD probes, ranged
//! GET retries). The dedup cache collapses those into a single audit line
//! per (client IP, path) within a sliding window.
//!
//! The cache is an explicitly constructed object owned by the service
//! state, created at startup and torn down at shutdown; tests instantiate
//! isolated instances.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use parking_lot::RwLock;

use crate::classify::Behavior;
use crate::identity::Sharing;

pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(5);
pub const DEFAULT_RETENTION_WINDOW: Duration = Duration::from_secs(15);

/// Inline sweep kicks in once the map grows past this many entries, so the
/// cache stays bounded even when nobody schedules background sweeps.
const SWEEP_SIZE_THRESHOLD: usize = 1024;

/// How guests appear in audit lines.
pub const GUEST_DISPLAY_NAME: &str = "访客";

/// Identifies a distinct access for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AccessKey {
    client_ip: String,
    path: String,
}

/// Per-key state machine: unseen -> seen(last_emit) -> (window elapses) ->
/// unseen again. Lookups may run concurrently; insert/evict is exclusive.
pub struct DedupCache {
    entries: RwLock<HashMap<AccessKey, Instant>>,
    window: Duration,
    retention: Duration,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupCache {
    pub fn new() -> Self {
        Self::with_windows(DEFAULT_DEDUP_WINDOW, DEFAULT_RETENTION_WINDOW)
    }

    /// The retention window is clamped to at least the dedup window, so an
    /// entry is never evicted while it could still suppress a duplicate.
    pub fn with_windows(window: Duration, retention: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            window,
            retention: retention.max(window),
        }
    }

    /// True iff no emission for this (client, path) happened within the
    /// dedup window; records the emission timestamp when returning true.
    pub fn should_emit(&self, client_ip: &str, path: &str) -> bool {
        let key = AccessKey {
            client_ip: client_ip.to_string(),
            path: path.to_string(),
        };
        let now = Instant::now();

        {
            let entries = self.entries.read();
            if let Some(last) = entries.get(&key) {
                if now.duration_since(*last) < self.window {
                    return false;
                }
            }
        }

        let mut entries = self.entries.write();
        // Re-check: another request may have emitted between the read probe
        // and taking the exclusive lock.
        if let Some(last) = entries.get(&key) {
            if now.duration_since(*last) < self.window {
                return false;
            }
        }
        entries.insert(key, now);
        if entries.len() > SWEEP_SIZE_THRESHOLD {
            Self::evict_expired(&mut entries, now, self.retention);
        }
        true
    }

    /// Evict entries older than the retention window.
    pub fn sweep(&self) {
        let mut entries = self.entries.write();
        Self::evict_expired(&mut entries, Instant::now(), self.retention);
    }

    fn evict_expired(
        entries: &mut HashMap<AccessKey, Instant>,
        now: Instant,
        retention: Duration,
    ) {
        entries.retain(|_, last| now.duration_since(*last) <= retention);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// One audited access, write-once.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub timestamp: DateTime<Local>,
    pub client_ip: String,
    /// Display name of the caller; guests log as [`GUEST_DISPLAY_NAME`].
    pub username: String,
    pub behavior: Behavior,
    pub path: String,
    pub sharing: Option<Sharing>,
}

impl AuditEntry {
    pub fn now(client_ip: String, username: String, behavior: Behavior, path: String) -> Self {
        Self {
            timestamp: Local::now(),
            client_ip,
            username,
            behavior,
            path,
            sharing: None,
        }
    }

    pub fn with_sharing(mut self, sharing: Option<Sharing>) -> Self {
        self.sharing = sharing;
        self
    }

    /// Stable, parseable line format. The sharing segment is present only
    /// for share-link accesses.
    pub fn format_line(&self) -> String {
        let time = self.timestamp.format("%Y年%-m月%-d日 %H:%M:%S");
        match &self.sharing {
            Some(sharing) => format!(
                "时间：{} 访问IP：{} 用户：{} 行为：{} 共享ID：{} 共享创建者：{} 访问路径：{}",
                time, self.client_ip, self.username, self.behavior, sharing.id, sharing.creator,
                self.path
            ),
            None => format!(
                "时间：{} 访问IP：{} 用户：{} 行为：{} 访问路径：{}",
                time, self.client_ip, self.username, self.behavior, self.path
            ),
        }
    }
}

/// Where formatted audit lines go.
pub trait AuditSink: Send + Sync {
    fn write_line(&self, line: &str);
}

/// Default sink: the structured log plus stderr, which is never buffered,
/// so operators see accesses in real time even when the subscriber is.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn write_line(&self, line: &str) {
        tracing::info!(target: "media_access", "{line}");
        eprintln!("{line}");
    }
}

/// Dedup + emission. Logging never fails: a suppressed or emitted entry is
/// the only distinction the caller sees.
pub struct AuditLogger {
    cache: DedupCache,
    sink: Arc<dyn AuditSink>,
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLogger {
    pub fn new() -> Self {
        Self::with_sink(DedupCache::new(), Arc::new(TracingSink))
    }

    pub fn with_sink(cache: DedupCache, sink: Arc<dyn AuditSink>) -> Self {
        Self { cache, sink }
    }

    /// Emit `entry` unless a duplicate was emitted within the dedup window.
    /// Returns whether a line was written.
    pub fn log(&self, entry: &AuditEntry) -> bool {
        if !self.cache.should_emit(&entry.client_ip, &entry.path) {
            return false;
        }
        self.sink.write_line(&entry.format_line());
        true
    }

    pub fn cache(&self) -> &DedupCache {
        &self.cache
    }
}
