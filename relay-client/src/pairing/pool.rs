//! Pairing pool
//!
//! Keeps up to `size` pairings per relay server. A pairing is either idle
//! in the pool or leased to one request; the lease returns it on drop.
//! Callers that find the pool exhausted suspend on a `Notify` until a
//! lease is returned or the pool grows.
//!
//! Each server pool carries a generation counter. Re-pairing bumps it, so
//! leases taken before the re-pair are discarded instead of returned.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::{Pairing, PairingEngine};
use crate::error::{EngineError, RelayError};

/// Pool of pairings shared by all transfers
pub struct PairingPool {
    engine: Arc<dyn PairingEngine>,
    servers: DashMap<String, Arc<ServerPool>>,
    size: AtomicUsize,
    persist: AtomicBool,
}

/// Pairings for one relay server
struct ServerPool {
    origin: String,
    state: Mutex<PoolState>,
    available: Notify,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<Pairing>,
    leased: usize,
    generation: u64,
    /// Set on teardown; returned leases are not kept
    closed: bool,
}

enum Slot {
    Idle(Pairing, u64),
    Fresh(u64),
    Wait,
}

impl ServerPool {
    fn new(origin: &str) -> Self {
        Self {
            origin: origin.to_string(),
            state: Mutex::new(PoolState::default()),
            available: Notify::new(),
        }
    }
}

impl PairingPool {
    pub fn new(engine: Arc<dyn PairingEngine>, size: usize, persist: bool) -> Arc<Self> {
        Arc::new(Self {
            engine,
            servers: DashMap::new(),
            size: AtomicUsize::new(size),
            persist: AtomicBool::new(persist),
        })
    }

    /// Maximum pairings per server
    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    pub fn persist(&self) -> bool {
        self.persist.load(Ordering::SeqCst)
    }

    /// Idle pairings held for a server
    pub fn idle_count(&self, origin: &str) -> usize {
        self.servers
            .get(origin)
            .map(|server| server.state.lock().idle.len())
            .unwrap_or(0)
    }

    /// Pairings currently leased for a server
    pub fn leased_count(&self, origin: &str) -> usize {
        self.servers
            .get(origin)
            .map(|server| server.state.lock().leased)
            .unwrap_or(0)
    }

    fn server(&self, origin: &str) -> Arc<ServerPool> {
        let entry = self
            .servers
            .entry(origin.to_string())
            .or_insert_with(|| Arc::new(ServerPool::new(origin)));
        Arc::clone(entry.value())
    }

    fn all_servers(&self) -> Vec<Arc<ServerPool>> {
        self.servers
            .iter()
            .map(|server| Arc::clone(server.value()))
            .collect()
    }

    /// Lease a pairing for `origin`
    ///
    /// Reuses an idle pairing when one exists, handshakes when the pool
    /// has room, and otherwise waits for a lease to come back.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Relay` if a needed handshake fails.
    pub async fn acquire(self: &Arc<Self>, origin: &str) -> Result<PairingLease, RelayError> {
        loop {
            // A pool torn down while we waited yields None; retry on a fresh one
            if let Some(lease) = self.acquire_from(self.server(origin)).await? {
                return Ok(lease);
            }
        }
    }

    async fn acquire_from(
        self: &Arc<Self>,
        server: Arc<ServerPool>,
    ) -> Result<Option<PairingLease>, RelayError> {
        loop {
            let notified = server.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let slot = {
                let mut state = server.state.lock();
                if state.closed {
                    return Ok(None);
                } else if let Some(pairing) = state.idle.pop_front() {
                    state.leased += 1;
                    Slot::Idle(pairing, state.generation)
                } else if state.leased < self.size() {
                    state.leased += 1;
                    Slot::Fresh(state.generation)
                } else {
                    Slot::Wait
                }
            };

            match slot {
                Slot::Idle(pairing, generation) => {
                    return Ok(Some(PairingLease::new(
                        self,
                        Arc::clone(&server),
                        pairing,
                        generation,
                    )));
                }
                Slot::Fresh(generation) => {
                    let reservation = Reservation::new(Arc::clone(&server));
                    let pairing = self.handshake(&server.origin).await.map_err(|e| {
                        RelayError::Relay(format!("pairing with {} failed: {e}", server.origin))
                    })?;
                    reservation.commit();
                    return Ok(Some(PairingLease::new(
                        self,
                        Arc::clone(&server),
                        pairing,
                        generation,
                    )));
                }
                Slot::Wait => {
                    debug!(origin = %server.origin, size = self.size(), "pairing pool exhausted, waiting");
                    notified.await;
                }
            }
        }
    }

    /// Replace an invalid lease with a fresh pairing
    ///
    /// The old pairing is discarded, the server is re-paired, and a new
    /// lease is taken in its place.
    ///
    /// # Errors
    ///
    /// Returns `RePairFailed` if the handshake fails.
    pub async fn renew(self: &Arc<Self>, lease: &mut PairingLease) -> Result<(), RelayError> {
        let origin = lease.origin().to_string();
        lease.invalidate();
        lease.release();
        self.re_pair(&origin)
            .await
            .map_err(|e| RelayError::RePairFailed {
                url: origin.clone(),
                reason: e.to_string(),
            })?;
        *lease = self.acquire(&origin).await?;
        Ok(())
    }

    /// Discard all pairing state for `origin` and handshake again
    ///
    /// Idle pairings are forgotten immediately. Leased pairings are
    /// forgotten when their leases return. A transient handshake failure
    /// is retried once.
    ///
    /// # Errors
    ///
    /// Returns the engine error from the final handshake attempt.
    pub async fn re_pair(&self, origin: &str) -> Result<(), EngineError> {
        let server = self.server(origin);
        let stale: Vec<Pairing> = {
            let mut state = server.state.lock();
            state.generation += 1;
            state.idle.drain(..).collect()
        };
        for pairing in &stale {
            self.engine.forget(pairing);
        }

        let pairing = self.handshake(origin).await?;
        let surplus = {
            let mut state = server.state.lock();
            if state.idle.len() + state.leased < self.size() {
                state.idle.push_back(pairing);
                None
            } else {
                Some(pairing)
            }
        };
        if let Some(pairing) = surplus {
            self.engine.forget(&pairing);
        }
        server.available.notify_one();

        info!(origin, discarded = stale.len(), "re-paired with relay server");
        Ok(())
    }

    async fn handshake(&self, origin: &str) -> Result<Pairing, EngineError> {
        match self.engine.handshake(origin).await {
            Err(e) if e.is_transient() => {
                warn!(origin, error = %e, "handshake failed, retrying once");
                self.engine.handshake(origin).await
            }
            other => other,
        }
    }

    /// Change the per-server limit
    ///
    /// Shrinking forgets idle pairings above the new limit; leased
    /// pairings are left with their transfers and discarded on return.
    /// Growing wakes callers waiting for room.
    pub fn resize(&self, size: usize) {
        let previous = self.size.swap(size, Ordering::SeqCst);
        for server in self.all_servers() {
            let surplus: Vec<Pairing> = {
                let mut state = server.state.lock();
                let mut surplus = Vec::new();
                while state.idle.len() + state.leased > size {
                    match state.idle.pop_back() {
                        Some(pairing) => surplus.push(pairing),
                        None => break,
                    }
                }
                surplus
            };
            for pairing in &surplus {
                self.engine.forget(pairing);
            }
            if size > previous {
                server.available.notify_waiters();
            }
        }
        info!(from = previous, to = size, "pairing pool resized");
    }

    pub fn set_persist(&self, persist: bool) {
        self.persist.store(persist, Ordering::SeqCst);
        self.engine.set_persist_pairs(persist);
    }

    /// Release every idle pairing
    ///
    /// Pairings are forgotten through the engine unless persistence is on.
    /// Leases still out are handled the same way when they return.
    pub fn teardown(&self) {
        let persist = self.persist();
        let servers = self.all_servers();
        self.servers.clear();
        for server in servers {
            let idle: Vec<Pairing> = {
                let mut state = server.state.lock();
                state.closed = true;
                state.idle.drain(..).collect()
            };
            if !persist {
                for pairing in &idle {
                    self.engine.forget(pairing);
                }
            }
            server.available.notify_waiters();
        }
        info!(persist, "pairing pool torn down");
    }
}

/// Slot counted as leased while its handshake is in flight
///
/// Gives the slot back if the handshake fails or the caller goes away.
struct Reservation {
    server: Arc<ServerPool>,
    armed: bool,
}

impl Reservation {
    fn new(server: Arc<ServerPool>) -> Self {
        Self {
            server,
            armed: true,
        }
    }

    fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.server.state.lock();
            state.leased = state.leased.saturating_sub(1);
            drop(state);
            self.server.available.notify_one();
        }
    }
}

/// A pairing leased from the pool
///
/// Dropping the lease returns the pairing when it is still valid, belongs
/// to the current generation, and the pool has room. Otherwise it is
/// forgotten through the engine.
pub struct PairingLease {
    pool: Arc<PairingPool>,
    server: Arc<ServerPool>,
    pairing: Pairing,
    generation: u64,
    valid: bool,
    released: bool,
}

impl PairingLease {
    fn new(
        pool: &Arc<PairingPool>,
        server: Arc<ServerPool>,
        pairing: Pairing,
        generation: u64,
    ) -> Self {
        Self {
            pool: Arc::clone(pool),
            server,
            pairing,
            generation,
            valid: true,
            released: false,
        }
    }

    pub fn pairing(&self) -> &Pairing {
        &self.pairing
    }

    pub fn origin(&self) -> &str {
        &self.server.origin
    }

    /// Mark the pairing unusable so it is forgotten on release
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let (keep, closed) = {
            let mut state = self.server.state.lock();
            state.leased = state.leased.saturating_sub(1);
            let keep = self.valid
                && !state.closed
                && state.generation == self.generation
                && state.idle.len() + state.leased < self.pool.size();
            if keep {
                state.idle.push_back(self.pairing.clone());
            }
            (keep, state.closed)
        };

        if !keep {
            let retained = closed && self.valid && self.pool.persist();
            if !retained {
                self.pool.engine.forget(&self.pairing);
            }
        }
        self.server.available.notify_one();
    }
}

impl Drop for PairingLease {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for PairingLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingLease")
            .field("pairing", &self.pairing)
            .field("generation", &self.generation)
            .field("valid", &self.valid)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockEngine;
    use std::time::Duration;

    const ORIGIN: &str = "https://relay.example";

    fn pool(engine: &Arc<MockEngine>, size: usize) -> Arc<PairingPool> {
        PairingPool::new(Arc::clone(engine) as Arc<dyn PairingEngine>, size, true)
    }

    #[tokio::test]
    async fn test_lease_returns_to_pool() {
        let engine = MockEngine::new();
        let pool = pool(&engine, 2);

        let lease = pool.acquire(ORIGIN).await.unwrap();
        let id = lease.pairing().id().to_string();
        assert_eq!(pool.leased_count(ORIGIN), 1);
        drop(lease);

        assert_eq!(pool.leased_count(ORIGIN), 0);
        assert_eq!(pool.idle_count(ORIGIN), 1);

        let again = pool.acquire(ORIGIN).await.unwrap();
        assert_eq!(again.pairing().id(), id);
        assert_eq!(engine.handshakes(), 1);
    }

    #[tokio::test]
    async fn test_servers_are_independent() {
        let engine = MockEngine::new();
        let pool = pool(&engine, 1);

        let a = pool.acquire(ORIGIN).await.unwrap();
        let b = pool.acquire("https://other.example").await.unwrap();
        assert_ne!(a.pairing().id(), b.pairing().id());
        assert_eq!(b.pairing().origin(), "https://other.example");
    }

    #[tokio::test]
    async fn test_exhausted_pool_waits_for_release() {
        let engine = MockEngine::new();
        let pool = pool(&engine, 1);

        let held = pool.acquire(ORIGIN).await.unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire(ORIGIN).await.map(|l| l.pairing().clone()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        let held_pairing = held.pairing().clone();
        drop(held);
        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got, held_pairing);
        assert_eq!(engine.handshakes(), 1);
    }

    #[tokio::test]
    async fn test_growing_pool_wakes_waiters() {
        let engine = MockEngine::new();
        let pool = pool(&engine, 1);

        let _held = pool.acquire(ORIGIN).await.unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire(ORIGIN).await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.resize(2);
        assert!(waiter.await.unwrap());
        assert_eq!(engine.handshakes(), 2);
    }

    #[tokio::test]
    async fn test_shrink_forgets_idle_surplus() {
        let engine = MockEngine::new();
        let pool = pool(&engine, 3);

        let a = pool.acquire(ORIGIN).await.unwrap();
        let b = pool.acquire(ORIGIN).await.unwrap();
        let c = pool.acquire(ORIGIN).await.unwrap();
        drop(a);
        drop(b);
        assert_eq!(pool.idle_count(ORIGIN), 2);

        pool.resize(1);
        // One leased already fills the pool
        assert_eq!(pool.idle_count(ORIGIN), 0);
        assert_eq!(engine.forgotten().len(), 2);

        // The leased pairing stays with its holder and comes back once
        // there is room again
        assert_eq!(pool.leased_count(ORIGIN), 1);
        drop(c);
        assert_eq!(pool.idle_count(ORIGIN), 1);
    }

    #[tokio::test]
    async fn test_invalidated_lease_is_forgotten() {
        let engine = MockEngine::new();
        let pool = pool(&engine, 2);

        let mut lease = pool.acquire(ORIGIN).await.unwrap();
        let id = lease.pairing().id().to_string();
        lease.invalidate();
        drop(lease);

        assert_eq!(pool.idle_count(ORIGIN), 0);
        assert_eq!(engine.forgotten(), vec![id]);
    }

    #[tokio::test]
    async fn test_re_pair_discards_old_generation() {
        let engine = MockEngine::new();
        let pool = pool(&engine, 2);

        let idle = pool.acquire(ORIGIN).await.unwrap();
        let leased = pool.acquire(ORIGIN).await.unwrap();
        let idle_id = idle.pairing().id().to_string();
        let leased_id = leased.pairing().id().to_string();
        drop(idle);

        pool.re_pair(ORIGIN).await.unwrap();
        assert_eq!(engine.forgotten(), vec![idle_id]);

        // Returned lease belongs to the old generation
        drop(leased);
        assert!(engine.forgotten().contains(&leased_id));
        assert_eq!(pool.idle_count(ORIGIN), 1);
        assert_eq!(engine.handshakes(), 3);
    }

    #[tokio::test]
    async fn test_re_pair_retries_transient_once() {
        let engine = MockEngine::new();
        let pool = pool(&engine, 1);

        engine.fail_next_handshakes(1);
        pool.re_pair(ORIGIN).await.unwrap();
        assert_eq!(pool.idle_count(ORIGIN), 1);

        engine.fail_next_handshakes(2);
        let err = pool.re_pair(ORIGIN).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_re_pair_does_not_retry_fatal() {
        let engine = MockEngine::new();
        let pool = pool(&engine, 1);

        engine.refuse_handshakes(true);
        let err = pool.re_pair(ORIGIN).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(engine.handshakes(), 1);
    }

    #[tokio::test]
    async fn test_renew_with_single_slot() {
        let engine = MockEngine::new();
        let pool = pool(&engine, 1);

        let mut lease = pool.acquire(ORIGIN).await.unwrap();
        let old = lease.pairing().id().to_string();
        pool.renew(&mut lease).await.unwrap();

        assert_ne!(lease.pairing().id(), old);
        assert_eq!(pool.leased_count(ORIGIN), 1);
        assert!(engine.forgotten().contains(&old));
    }

    #[tokio::test]
    async fn test_failed_handshake_frees_slot() {
        let engine = MockEngine::new();
        let pool = pool(&engine, 1);

        engine.refuse_handshakes(true);
        assert!(pool.acquire(ORIGIN).await.is_err());
        assert_eq!(pool.leased_count(ORIGIN), 0);

        engine.refuse_handshakes(false);
        assert!(pool.acquire(ORIGIN).await.is_ok());
    }

    #[tokio::test]
    async fn test_teardown_respects_persist() {
        let engine = MockEngine::new();
        let pool = pool(&engine, 2);
        drop(pool.acquire(ORIGIN).await.unwrap());

        pool.teardown();
        assert!(engine.forgotten().is_empty());
        assert_eq!(pool.idle_count(ORIGIN), 0);

        let pool = PairingPool::new(Arc::clone(&engine) as Arc<dyn PairingEngine>, 2, false);
        drop(pool.acquire(ORIGIN).await.unwrap());
        pool.teardown();
        assert_eq!(engine.forgotten().len(), 1);
    }

    #[tokio::test]
    async fn test_lease_returned_after_teardown() {
        let engine = MockEngine::new();
        let pool = PairingPool::new(Arc::clone(&engine) as Arc<dyn PairingEngine>, 2, false);
        let lease = pool.acquire(ORIGIN).await.unwrap();

        pool.teardown();
        drop(lease);
        assert_eq!(engine.forgotten().len(), 1);
        assert_eq!(pool.idle_count(ORIGIN), 0);
    }

    #[tokio::test]
    async fn test_set_persist_reaches_engine() {
        let engine = MockEngine::new();
        let pool = pool(&engine, 1);
        pool.set_persist(false);
        assert!(!pool.persist());
        assert_eq!(engine.persist_pairs(), Some(false));
    }
}
