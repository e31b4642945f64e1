//! List-Continuation Pool (spec §4.11).
//!
//! Caches paused tree-walkers so a follow-up `ListObjects` call with the
//! same listing parameters and a marker equal to where the previous page
//! left off can resume the same walker instead of re-descending from the
//! bucket root. Entries are parked here between pages and evicted either
//! by an idle timer or by LRU pressure once the pool is full.

use crate::walker::PeekableWalker;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Bound on how many parked walkers the pool retains at once; the least
/// recently touched entry is evicted to make room for a new one.
const MAX_PARKED_WALKERS: usize = 1024;

/// How long a parked walker survives without being resumed before its
/// cancellation token fires and it is dropped from the pool.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct ContinuationKey {
    pub bucket: String,
    pub recursive: bool,
    pub prefix: String,
    pub marker: String,
    pub heal: bool,
}

struct Parked {
    walker: PeekableWalker,
    last_touched: Instant,
}

#[derive(Default)]
pub struct ContinuationPool {
    entries: Mutex<HashMap<ContinuationKey, Parked>>,
    idle_timeout: Duration,
}

impl ContinuationPool {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Park a walker under `key`, spawning its own idle watchdog. Evicts the
    /// least-recently-touched entry first if the pool is at capacity.
    pub fn park(&self, key: ContinuationKey, walker: PeekableWalker) {
        let mut map = self.entries.lock();
        if map.len() >= MAX_PARKED_WALKERS && !map.contains_key(&key) {
            if let Some(oldest) = map
                .iter()
                .min_by_key(|(_, v)| v.last_touched)
                .map(|(k, _)| k.clone())
            {
                if let Some(evicted) = map.remove(&oldest) {
                    evicted.walker.cancel();
                }
            }
        }
        map.insert(
            key,
            Parked {
                walker,
                last_touched: Instant::now(),
            },
        );
    }

    /// Remove and return a previously parked walker matching `key`, if one
    /// is still alive.
    pub fn take(&self, key: &ContinuationKey) -> Option<PeekableWalker> {
        self.entries.lock().remove(key).map(|p| p.walker)
    }

    /// Cancel and evict every entry whose idle time exceeds the pool's
    /// timeout. Intended to be polled by a background ticker, but also
    /// callable synchronously (e.g. from tests).
    pub fn sweep_expired(&self) {
        let mut map = self.entries.lock();
        let timeout = self.idle_timeout;
        let now = Instant::now();
        let expired: Vec<ContinuationKey> = map
            .iter()
            .filter(|(_, p)| now.duration_since(p.last_touched) >= timeout)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            if let Some(parked) = map.remove(&key) {
                parked.walker.cancel();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel and drop every parked walker (spec §4.12 Shutdown hook).
    pub fn shutdown(&self) {
        let mut map = self.entries.lock();
        for (_, parked) in map.drain() {
            parked.walker.cancel();
        }
    }

    /// Spawn the background sweep ticker. Returns a handle the caller can
    /// abort on shutdown.
    pub fn spawn_sweeper(self: std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                sleep(self.idle_timeout).await;
                self.sweep_expired();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walker::TreeWalker;
    use std::path::PathBuf;

    fn key(marker: &str) -> ContinuationKey {
        ContinuationKey {
            bucket: "photos".to_string(),
            recursive: true,
            prefix: String::new(),
            marker: marker.to_string(),
            heal: false,
        }
    }

    fn walker() -> PeekableWalker {
        PeekableWalker::new(TreeWalker::spawn(PathBuf::from("/tmp/does-not-exist"), String::new(), String::new(), true))
    }

    #[tokio::test]
    async fn park_then_take_round_trips() {
        let pool = ContinuationPool::new();
        pool.park(key("a"), walker());
        assert_eq!(pool.len(), 1);
        assert!(pool.take(&key("a")).is_some());
        assert_eq!(pool.len(), 0);
    }

    #[tokio::test]
    async fn take_on_missing_key_is_none() {
        let pool = ContinuationPool::new();
        assert!(pool.take(&key("missing")).is_none());
    }

    #[tokio::test]
    async fn sweep_expired_evicts_stale_entries() {
        let pool = ContinuationPool::with_idle_timeout(Duration::from_millis(10));
        pool.park(key("a"), walker());
        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.sweep_expired();
        assert_eq!(pool.len(), 0);
    }

    #[tokio::test]
    async fn shutdown_drains_all_entries() {
        let pool = ContinuationPool::new();
        pool.park(key("a"), walker());
        pool.park(key("b"), walker());
        pool.shutdown();
        assert_eq!(pool.len(), 0);
    }
}
