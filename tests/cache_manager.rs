//! Registry cache behaviour: tiers, coalescing, stale fallback

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hivemoji::cache::{
    CacheSettings, LogTransport, ManualClock, MemorySnapshotStore, RegistryCache, SnapshotStore,
    StoredSnapshot,
};
use hivemoji::encoding;
use hivemoji::error::{HivemojiError, TransportError};
use hivemoji::interpreter::{interpret, LedgerRecord};
use hivemoji::protocol::{Limits, PROTOCOL_ID};
use hivemoji::registry::{Registry, RegistryBuilder};
use parking_lot::Mutex;
use serde_json::json;

fn register(position: u64, name: &str) -> LedgerRecord {
    LedgerRecord::new(
        position,
        PROTOCOL_ID,
        json!({
            "version": 1, "op": "register", "name": name,
            "mime": "image/png", "data": encoding::encode(name.as_bytes()),
        }),
    )
}

fn registry_of(names: &[&str]) -> Registry {
    let limits = Limits::default();
    let records = names
        .iter()
        .enumerate()
        .map(|(i, name)| register(i as u64, name));
    RegistryBuilder::new("alice", limits).fold(interpret(records, &limits))
}

/// Transport with a mutable log and an optional failure or delay.
///
/// The log is read when the call starts; the delay applies afterwards.
#[derive(Default)]
struct FakeTransport {
    calls: AtomicUsize,
    log: Mutex<Vec<LedgerRecord>>,
    fail: Mutex<Option<TransportError>>,
    delay: Option<Duration>,
    /// Calls that panic before the transport behaves normally
    panics: AtomicUsize,
}

impl FakeTransport {
    fn with_log(log: Vec<LedgerRecord>) -> Self {
        Self {
            log: Mutex::new(log),
            ..Default::default()
        }
    }

    fn failing() -> Self {
        Self {
            fail: Mutex::new(Some(TransportError::Unavailable("node down".to_string()))),
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogTransport for FakeTransport {
    async fn fetch_log(&self, _owner: &str) -> Result<Vec<LedgerRecord>, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let panicking = self
            .panics
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if panicking {
            panic!("transport bug");
        }
        let outcome = match self.fail.lock().clone() {
            Some(error) => Err(error),
            None => Ok(self.log.lock().clone()),
        };
        match self.delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        outcome
    }
}

struct Harness {
    transport: Arc<FakeTransport>,
    store: Arc<MemorySnapshotStore>,
    clock: Arc<ManualClock>,
    cache: RegistryCache,
}

fn harness(transport: FakeTransport, settings: CacheSettings) -> Harness {
    let transport = Arc::new(transport);
    let store = Arc::new(MemorySnapshotStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let cache = RegistryCache::new(transport.clone(), store.clone(), clock.clone(), settings);
    Harness {
        transport,
        store,
        clock,
        cache,
    }
}

fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

fn hours_before_start(hours: i64) -> DateTime<Utc> {
    start() - chrono::Duration::hours(hours)
}

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);

// =============================================================================
// Tiers and TTLs
// =============================================================================

#[tokio::test]
async fn test_fetch_publishes_both_tiers() {
    let h = harness(FakeTransport::with_log(vec![register(1, "smile")]), CacheSettings::default());
    let registry = h.cache.get("alice", &["smile"]).await.unwrap();
    assert!(registry.get("smile").is_some());
    assert_eq!(h.transport.calls(), 1);

    let stored = h.store.load("alice").await.unwrap().unwrap();
    assert_eq!(stored.built_at(), start());
    assert!(stored.registry().get("smile").is_some());
}

#[tokio::test]
async fn test_memory_then_persistent_then_network() {
    let h = harness(FakeTransport::with_log(vec![register(1, "smile")]), CacheSettings::default());
    h.cache.get("alice", &["smile"]).await.unwrap();

    // Memory tier still fresh
    h.clock.advance(4 * MINUTE);
    h.cache.get("alice", &["smile"]).await.unwrap();
    assert_eq!(h.transport.calls(), 1);

    // Memory expired, persistent snapshot adopted
    h.clock.advance(2 * MINUTE);
    h.cache.get("alice", &["smile"]).await.unwrap();
    assert_eq!(h.transport.calls(), 1);

    // Both expired
    h.clock.advance(25 * HOUR);
    h.cache.get("alice", &["smile"]).await.unwrap();
    assert_eq!(h.transport.calls(), 2);
}

#[tokio::test]
async fn test_fresh_persistent_snapshot_skips_network() {
    let h = harness(FakeTransport::failing(), CacheSettings::default());
    h.store
        .insert("alice", StoredSnapshot::new(&registry_of(&["smile"]), hours_before_start(1)));

    let registry = h.cache.get("alice", &["smile"]).await.unwrap();
    assert!(registry.get("smile").is_some());
    assert_eq!(h.transport.calls(), 0);
    // Adopted into memory as of now
    assert_eq!(h.cache.peek("alice").unwrap().built_at, start());
}

#[tokio::test]
async fn test_missing_name_forces_fetch() {
    let h = harness(FakeTransport::with_log(vec![register(1, "smile")]), CacheSettings::default());
    h.cache.get("alice", &["smile"]).await.unwrap();

    h.transport.log.lock().push(register(2, "wave"));
    let registry = h.cache.get("alice", &["wave"]).await.unwrap();
    assert!(registry.get("wave").is_some());
    assert!(registry.get("smile").is_some());
    assert_eq!(h.transport.calls(), 2);
}

#[tokio::test]
async fn test_invalidate_drops_memory_tier() {
    let h = harness(FakeTransport::with_log(vec![register(1, "smile")]), CacheSettings::default());
    h.cache.get("alice", &["smile"]).await.unwrap();
    h.cache.invalidate("alice");
    assert!(h.cache.peek("alice").is_none());
}

// =============================================================================
// Coalescing
// =============================================================================

#[tokio::test]
async fn test_concurrent_gets_share_one_fetch() {
    let transport = FakeTransport {
        delay: Some(Duration::from_millis(20)),
        ..FakeTransport::with_log(vec![register(1, "smile")])
    };
    let h = harness(transport, CacheSettings::default());

    let (a, b, c) = tokio::join!(
        h.cache.get("alice", &["smile"]),
        h.cache.get("alice", &["smile"]),
        h.cache.get::<&str>("alice", &[]),
    );
    let a = a.unwrap();
    assert!(Arc::ptr_eq(&a, &b.unwrap()));
    assert!(Arc::ptr_eq(&a, &c.unwrap()));
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test]
async fn test_owners_fetch_independently() {
    let h = harness(FakeTransport::with_log(vec![register(1, "smile")]), CacheSettings::default());
    let (a, b) = tokio::join!(h.cache.get("alice", &["smile"]), h.cache.get("bob", &["smile"]));
    a.unwrap();
    b.unwrap();
    assert_eq!(h.transport.calls(), 2);
}

#[tokio::test]
async fn test_abandoned_caller_does_not_cancel_fetch() {
    let transport = FakeTransport {
        delay: Some(Duration::from_millis(20)),
        ..FakeTransport::with_log(vec![register(1, "smile")])
    };
    let h = harness(transport, CacheSettings::default());

    let gave_up = tokio::time::timeout(Duration::from_millis(1), h.cache.get("alice", &["smile"])).await;
    assert!(gave_up.is_err());

    // The orphaned fetch keeps running and is joined here
    h.cache.get("alice", &["smile"]).await.unwrap();
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test]
async fn test_joined_result_missing_a_name_triggers_one_more_fetch() {
    let transport = FakeTransport {
        delay: Some(Duration::from_millis(40)),
        ..FakeTransport::with_log(vec![register(1, "smile")])
    };
    let h = harness(transport, CacheSettings::default());

    let (a, b, _) = tokio::join!(
        h.cache.get("alice", &["smile"]),
        h.cache.get("alice", &["smile", "wave"]),
        async {
            // Lands after the first fetch has read the log
            tokio::time::sleep(Duration::from_millis(10)).await;
            h.transport.log.lock().push(register(2, "wave"));
        },
    );
    let a = a.unwrap();
    let b = b.unwrap();
    assert!(a.get("wave").is_none());
    assert!(b.get("smile").is_some());
    assert!(b.get("wave").is_some());
    assert_eq!(h.transport.calls(), 2);

    // Both callers are now served from memory
    h.cache.get("alice", &["smile", "wave"]).await.unwrap();
    assert_eq!(h.transport.calls(), 2);
}

#[tokio::test]
async fn test_joined_failure_still_serves_cached_names() {
    let transport = FakeTransport {
        delay: Some(Duration::from_millis(20)),
        ..FakeTransport::failing()
    };
    let h = harness(transport, CacheSettings::default());
    h.store
        .insert("alice", StoredSnapshot::new(&registry_of(&["smile"]), hours_before_start(48)));

    let (a, b) = tokio::join!(
        h.cache.get("alice", &["wave"]),
        h.cache.get("alice", &["smile"]),
    );
    assert!(matches!(
        a,
        Err(HivemojiError::Transport(TransportError::Unavailable(_)))
    ));
    assert!(b.unwrap().get("smile").is_some());
    assert_eq!(h.transport.calls(), 2);
}

// =============================================================================
// Failure handling
// =============================================================================

#[tokio::test]
async fn test_stale_snapshot_served_when_transport_fails() {
    let h = harness(FakeTransport::failing(), CacheSettings::default());
    h.store
        .insert("alice", StoredSnapshot::new(&registry_of(&["smile"]), hours_before_start(48)));

    let registry = h.cache.get("alice", &["smile"]).await.unwrap();
    assert!(registry.get("smile").is_some());
    assert_eq!(h.transport.calls(), 1);

    // Stale seed is republished to memory only
    assert_eq!(h.cache.peek("alice").unwrap().built_at, start());
    let stored = h.store.load("alice").await.unwrap().unwrap();
    assert_eq!(stored.built_at(), hours_before_start(48));
}

#[tokio::test]
async fn test_stale_snapshot_lacking_names_is_an_error() {
    let h = harness(FakeTransport::failing(), CacheSettings::default());
    h.store
        .insert("alice", StoredSnapshot::new(&registry_of(&["smile"]), hours_before_start(48)));

    let err = h.cache.get("alice", &["wave"]).await.unwrap_err();
    assert!(matches!(
        err,
        HivemojiError::Transport(TransportError::Unavailable(_))
    ));
}

#[tokio::test]
async fn test_failure_without_cache_is_an_error() {
    let h = harness(FakeTransport::failing(), CacheSettings::default());
    assert!(h.cache.get::<&str>("alice", &[]).await.is_err());

    // The failed fetch is not reused
    assert!(h.cache.get::<&str>("alice", &[]).await.is_err());
    assert_eq!(h.transport.calls(), 2);
}

#[tokio::test]
async fn test_slow_transport_times_out() {
    let transport = FakeTransport {
        delay: Some(Duration::from_secs(30)),
        ..FakeTransport::with_log(vec![])
    };
    let settings = CacheSettings {
        fetch_timeout: Duration::from_millis(10),
        ..CacheSettings::default()
    };
    let h = harness(transport, settings);

    let err = h.cache.get::<&str>("alice", &[]).await.unwrap_err();
    assert!(matches!(
        err,
        HivemojiError::Transport(TransportError::Timeout(_))
    ));
}

#[tokio::test]
async fn test_recovers_after_transport_returns() {
    let h = harness(FakeTransport::failing(), CacheSettings::default());
    assert!(h.cache.get("alice", &["smile"]).await.is_err());

    *h.transport.fail.lock() = None;
    h.transport.log.lock().push(register(1, "smile"));
    assert!(h.cache.get("alice", &["smile"]).await.unwrap().get("smile").is_some());
}

#[tokio::test]
async fn test_panicking_fetch_does_not_wedge_the_owner() {
    let transport = FakeTransport {
        panics: AtomicUsize::new(1),
        ..FakeTransport::with_log(vec![register(1, "smile")])
    };
    let h = harness(transport, CacheSettings::default());

    let err = h.cache.get("alice", &["smile"]).await.unwrap_err();
    assert!(matches!(
        err,
        HivemojiError::Transport(TransportError::Aborted(_))
    ));
    assert_eq!(h.transport.calls(), 1);

    let registry = h.cache.get("alice", &["smile"]).await.unwrap();
    assert!(registry.get("smile").is_some());
    assert_eq!(h.transport.calls(), 2);
}

#[tokio::test]
async fn test_panic_while_joined_is_retried_once() {
    let transport = FakeTransport {
        panics: AtomicUsize::new(1),
        ..FakeTransport::with_log(vec![register(1, "smile")])
    };
    let h = harness(transport, CacheSettings::default());

    let (a, b) = tokio::join!(
        h.cache.get("alice", &["smile"]),
        h.cache.get("alice", &["smile"]),
    );
    // The starter sees the panic; the joiner retries and succeeds
    assert!(a.is_err());
    assert!(b.unwrap().get("smile").is_some());
    assert_eq!(h.transport.calls(), 2);
}
