//! Registry Cache Manager
//!
//! The single entry point for renderers. Each owner's registry lives in two
//! tiers with separate freshness windows:
//!
//! - **memory**: the last published snapshot, short TTL
//! - **persistent**: a [`SnapshotStore`], longer TTL, survives restarts
//!
//! Concurrent requests for one owner share a single in-flight fetch. A fetch
//! runs as its own task, so a caller that gives up does not cancel it. When
//! the log transport fails, a cached snapshot that covers the requested names
//! is served instead.

mod clock;
mod store;
mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use store::{FsSnapshotStore, MemorySnapshotStore, SnapshotStore, StoredSnapshot};
pub use transport::{FileLogTransport, LogTransport};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::interpreter::interpret;
use crate::protocol::Limits;
use crate::registry::{Registry, RegistryBuilder};

/// Freshness windows and bounds for a [`RegistryCache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub memory_ttl: Duration,
    pub persistent_ttl: Duration,
    /// Bound on one log fetch
    pub fetch_timeout: Duration,
    pub limits: Limits,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            memory_ttl: Duration::from_secs(5 * 60),
            persistent_ttl: Duration::from_secs(24 * 60 * 60),
            fetch_timeout: Duration::from_secs(20),
            limits: Limits::default(),
        }
    }
}

/// A published registry and when it was built
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub registry: Arc<Registry>,
    pub built_at: DateTime<Utc>,
}

type FetchOutcome = std::result::Result<Arc<Registry>, TransportError>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

struct InFlight {
    generation: u64,
    fetch: SharedFetch,
}

#[derive(Default)]
struct SlotState {
    memory: Option<CacheEntry>,
    in_flight: Option<InFlight>,
}

/// Per-owner state; independent owners never contend on the same lock
#[derive(Default)]
struct OwnerSlot {
    state: Mutex<SlotState>,
}

/// Clears the slot's in-flight marker when a fetch task ends, by panic included
struct InFlightGuard {
    slot: Arc<OwnerSlot>,
    generation: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut state = self.slot.state.lock();
        if state
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.generation == self.generation)
        {
            state.in_flight = None;
        }
    }
}

struct Inner {
    transport: Arc<dyn LogTransport>,
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    settings: CacheSettings,
    slots: Mutex<HashMap<String, Arc<OwnerSlot>>>,
    next_generation: AtomicU64,
}

/// Two-tier, coalescing registry cache
#[derive(Clone)]
pub struct RegistryCache {
    inner: Arc<Inner>,
}

impl RegistryCache {
    pub fn new(
        transport: Arc<dyn LogTransport>,
        store: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
        settings: CacheSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                clock,
                settings,
                slots: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }

    /// Registry for `owner`, guaranteed fresh enough and, when possible,
    /// covering every name in `needed`.
    pub async fn get<S: AsRef<str>>(&self, owner: &str, needed: &[S]) -> Result<Arc<Registry>> {
        let needed: Vec<String> = needed.iter().map(|n| n.as_ref().to_string()).collect();
        let slot = self.inner.slot(owner);

        let joined = {
            let state = slot.state.lock();
            if let Some(entry) = &state.memory {
                if self.inner.is_fresh(entry.built_at, self.inner.settings.memory_ttl)
                    && entry.registry.satisfies(&needed)
                {
                    return Ok(Arc::clone(&entry.registry));
                }
            }
            state
                .in_flight
                .as_ref()
                .map(|in_flight| (in_flight.generation, in_flight.fetch.clone()))
        };

        let mut awaited = None;
        if let Some((generation, fetch)) = joined {
            debug!(owner, generation, "joining in-flight fetch");
            match fetch.await {
                Ok(registry) if registry.satisfies(&needed) => return Ok(registry),
                Ok(_) => debug!(owner, "in-flight result lacks requested names, escalating"),
                // Our own names may still be covered by a cached snapshot
                Err(error) => debug!(owner, %error, "joined fetch failed, retrying for own names"),
            }
            awaited = Some(generation);
        }

        let fetch = {
            let mut state = slot.state.lock();
            // Someone else may have started a newer fetch while we waited
            let newer = state
                .in_flight
                .as_ref()
                .filter(|in_flight| Some(in_flight.generation) != awaited)
                .map(|in_flight| in_flight.fetch.clone());
            match newer {
                Some(fetch) => fetch,
                None => {
                    let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                    let fetch = Inner::spawn_fetch(
                        &self.inner,
                        owner.to_string(),
                        needed,
                        Arc::clone(&slot),
                        generation,
                    );
                    state.in_flight = Some(InFlight {
                        generation,
                        fetch: fetch.clone(),
                    });
                    fetch
                }
            }
        };

        Ok(fetch.await?)
    }

    /// Memory-tier snapshot, without freshness checks
    pub fn peek(&self, owner: &str) -> Option<CacheEntry> {
        let slot = self.inner.slots.lock().get(owner).cloned()?;
        let state = slot.state.lock();
        state.memory.clone()
    }

    /// Drop the memory-tier snapshot so the next `get` consults the persistent tier
    pub fn invalidate(&self, owner: &str) {
        if let Some(slot) = self.inner.slots.lock().get(owner).cloned() {
            slot.state.lock().memory = None;
        }
    }
}

impl Inner {
    fn slot(&self, owner: &str) -> Arc<OwnerSlot> {
        let mut slots = self.slots.lock();
        Arc::clone(slots.entry(owner.to_string()).or_default())
    }

    fn is_fresh(&self, built_at: DateTime<Utc>, ttl: Duration) -> bool {
        match self.clock.now().signed_duration_since(built_at).to_std() {
            Ok(age) => age < ttl,
            // Built "in the future": clock moved backwards
            Err(_) => true,
        }
    }

    /// Start a refresh task and hand back a shareable handle to its result.
    ///
    /// Must be called with the slot locked; the task takes the same lock to
    /// publish its entry and clear the in-flight marker before completing.
    fn spawn_fetch(
        this: &Arc<Self>,
        owner: String,
        needed: Vec<String>,
        slot: Arc<OwnerSlot>,
        generation: u64,
    ) -> SharedFetch {
        let inner = Arc::clone(this);
        let handle = tokio::spawn(async move {
            let guard = InFlightGuard { slot, generation };
            let outcome = inner.refresh(&owner, &needed, &guard.slot).await;
            if let Ok(entry) = &outcome {
                guard.slot.state.lock().memory = Some(entry.clone());
            }
            drop(guard);
            outcome.map(|entry| entry.registry)
        });

        async move {
            handle
                .await
                .unwrap_or_else(|e| Err(TransportError::Aborted(e.to_string())))
        }
        .boxed()
        .shared()
    }

    async fn refresh(
        &self,
        owner: &str,
        needed: &[String],
        slot: &OwnerSlot,
    ) -> std::result::Result<CacheEntry, TransportError> {
        let stored = match self.store.load(owner).await {
            Ok(stored) => stored.map(|snapshot| CacheEntry {
                registry: Arc::new(snapshot.registry()),
                built_at: snapshot.built_at(),
            }),
            Err(error) => {
                warn!(owner, %error, "persistent snapshot unreadable");
                None
            }
        };

        if let Some(entry) = &stored {
            if self.is_fresh(entry.built_at, self.settings.persistent_ttl)
                && entry.registry.satisfies(needed)
            {
                debug!(owner, "adopting persistent snapshot");
                return Ok(CacheEntry {
                    registry: Arc::clone(&entry.registry),
                    built_at: self.clock.now(),
                });
            }
        }

        let current = slot.state.lock().memory.clone();
        let seed = [stored, current]
            .into_iter()
            .flatten()
            .max_by_key(|entry| entry.built_at);

        info!(owner, "fetching operation log");
        let fetched = match tokio::time::timeout(
            self.settings.fetch_timeout,
            self.transport.fetch_log(owner),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.settings.fetch_timeout)),
        };

        let records = match fetched {
            Ok(records) => records,
            Err(error) => {
                return match seed {
                    Some(seed) if seed.registry.satisfies(needed) => {
                        warn!(owner, %error, "log fetch failed, serving cached registry");
                        Ok(CacheEntry {
                            registry: seed.registry,
                            built_at: self.clock.now(),
                        })
                    }
                    _ => Err(error),
                };
            }
        };

        let limits = self.settings.limits;
        let owner_key = owner.to_string();
        let seed_registry = seed.map(|entry| entry.registry);
        let registry = tokio::task::spawn_blocking(move || {
            let ops = interpret(records, &limits);
            let builder = RegistryBuilder::new(owner_key, limits);
            match seed_registry {
                Some(seed) => builder.with_seed(&seed).fold(ops),
                None => builder.fold(ops),
            }
        })
        .await
        .map_err(|e| TransportError::Aborted(e.to_string()))?;

        let entry = CacheEntry {
            registry: Arc::new(registry),
            built_at: self.clock.now(),
        };
        let snapshot = StoredSnapshot::new(&entry.registry, entry.built_at);
        if let Err(error) = self.store.save(owner, &snapshot).await {
            warn!(owner, %error, "failed to persist registry snapshot");
        }
        info!(owner, entries = entry.registry.len(), "published registry");
        Ok(entry)
    }
}
