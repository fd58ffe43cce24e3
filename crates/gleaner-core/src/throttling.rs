//! Per-source pacing.
//!
//! Each source gets a gate made of a governor direct limiter (burst of one,
//! one cell per interval) and an async mutex. The mutex keeps a single call
//! in flight per source; the limiter spaces granted slots at least one
//! interval apart, successful calls included. Gates live in a map owned by
//! one [`RateLimiter`], so tests build isolated limiters per case.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::Quota;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::source::SourceId;

type DirectRateLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

struct Pacing {
    interval: Duration,
    limiter: Option<Arc<DirectRateLimiter>>,
    last_granted: Option<Instant>,
}

impl Pacing {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            limiter: Quota::with_period(interval).map(|quota| Arc::new(DirectRateLimiter::direct(quota))),
            last_granted: None,
        }
    }
}

/// One source's gate. The `in_flight` mutex lives as long as the gate;
/// re-registration only replaces the pacing.
struct SourceGate {
    pacing: Mutex<Pacing>,
    in_flight: Arc<AsyncMutex<()>>,
}

impl SourceGate {
    fn new(interval: Duration) -> Self {
        Self {
            pacing: Mutex::new(Pacing::new(interval)),
            in_flight: Arc::new(AsyncMutex::new(())),
        }
    }

    fn pacing(&self) -> MutexGuard<'_, Pacing> {
        self.pacing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn interval(&self) -> Duration {
        self.pacing().interval
    }

    /// Record a granted slot. When the pacing was replaced while the slot
    /// waited, the new limiter is charged for it.
    fn grant(&self, used: Option<&Arc<DirectRateLimiter>>) {
        let mut pacing = self.pacing();
        pacing.last_granted = Some(Instant::now());
        if let Some(current) = pacing.limiter.as_ref() {
            if !used.is_some_and(|used| Arc::ptr_eq(used, current)) {
                let _ = current.check();
            }
        }
    }

    /// Swap in a limiter for `interval`. A slot granted less than one new
    /// interval ago is charged to the new limiter so spacing carries over.
    fn repace(&self, interval: Duration) -> bool {
        let mut pacing = self.pacing();
        if pacing.interval == interval {
            return false;
        }

        let last_granted = pacing.last_granted;
        *pacing = Pacing::new(interval);
        pacing.last_granted = last_granted;
        if let (Some(limiter), Some(granted)) = (pacing.limiter.as_ref(), last_granted) {
            if granted.elapsed() < interval {
                let _ = limiter.check();
            }
        }
        true
    }
}

/// Injectable per-source rate limiter.
pub struct RateLimiter {
    default_interval: Duration,
    gates: Mutex<HashMap<SourceId, Arc<SourceGate>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl RateLimiter {
    /// Limiter applying `default_interval` to sources never registered explicitly.
    pub fn new(default_interval: Duration) -> Self {
        Self {
            default_interval,
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Set the interval for `source`. The latest registration wins; the
    /// source keeps its in-flight gate and its spacing from earlier slots.
    pub fn register(&self, source: &SourceId, interval: Duration) {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        let changed = match gates.get(source) {
            Some(gate) => gate.repace(interval),
            None => {
                gates.insert(source.clone(), Arc::new(SourceGate::new(interval)));
                true
            }
        };
        if changed {
            tracing::debug!(source = %source, interval_ms = interval.as_millis() as u64, "rate gate registered");
        }
    }

    pub fn interval_for(&self, source: &SourceId) -> Duration {
        let gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        gates
            .get(source)
            .map_or(self.default_interval, |gate| gate.interval())
    }

    /// Wait until `source` may be called again and return the slot.
    ///
    /// The slot keeps other callers of the same source waiting until it is
    /// dropped. Other sources are never blocked.
    pub async fn acquire(&self, source: &SourceId) -> RateSlot {
        let gate = self.gate(source);
        let started = Instant::now();

        let guard = Arc::clone(&gate.in_flight).lock_owned().await;
        let limiter = gate.pacing().limiter.clone();
        if let Some(limiter) = limiter.as_ref() {
            limiter.until_ready().await;
        }
        gate.grant(limiter.as_ref());

        let waited = started.elapsed();
        if waited >= Duration::from_millis(1) {
            tracing::debug!(source = %source, waited_ms = waited.as_millis() as u64, "rate slot granted after wait");
        }

        RateSlot {
            source: source.clone(),
            waited,
            _guard: guard,
        }
    }

    fn gate(&self, source: &SourceId) -> Arc<SourceGate> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            gates
                .entry(source.clone())
                .or_insert_with(|| Arc::new(SourceGate::new(self.default_interval))),
        )
    }
}

/// Permission to make one call to a source. Released on drop.
pub struct RateSlot {
    source: SourceId,
    waited: Duration,
    _guard: OwnedMutexGuard<()>,
}

impl RateSlot {
    pub fn source(&self) -> &SourceId {
        &self.source
    }

    /// Time spent waiting for this slot.
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

impl std::fmt::Debug for RateSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateSlot")
            .field("source", &self.source)
            .field("waited", &self.waited)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &str) -> SourceId {
        SourceId::parse(value).expect("source id")
    }

    #[tokio::test]
    async fn sequential_calls_are_spaced_by_interval() {
        let limiter = RateLimiter::new(Duration::ZERO);
        let source = id("conab");
        limiter.register(&source, Duration::from_millis(50));

        let started = Instant::now();
        for _ in 0..4 {
            let _slot = limiter.acquire(&source).await;
        }

        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn zero_interval_never_waits_between_released_slots() {
        let limiter = RateLimiter::new(Duration::ZERO);
        let source = id("local");

        let started = Instant::now();
        for _ in 0..20 {
            drop(limiter.acquire(&source).await);
        }
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn held_slot_blocks_same_source_until_dropped() {
        let limiter = Arc::new(RateLimiter::new(Duration::ZERO));
        let source = id("ibge");

        let slot = limiter.acquire(&source).await;
        let contender = {
            let limiter = Arc::clone(&limiter);
            let source = source.clone();
            tokio::spawn(async move {
                let _slot = limiter.acquire(&source).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!contender.is_finished());

        drop(slot);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("contender proceeds once the slot is released")
            .expect("task completes");
    }

    #[tokio::test]
    async fn re_registering_keeps_one_call_in_flight() {
        let limiter = Arc::new(RateLimiter::new(Duration::ZERO));
        let source = id("usda");
        limiter.register(&source, Duration::from_millis(50));
        let slot = limiter.acquire(&source).await;

        limiter.register(&source, Duration::from_millis(80));
        let contender = {
            let limiter = Arc::clone(&limiter);
            let source = source.clone();
            tokio::spawn(async move {
                let _slot = limiter.acquire(&source).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!contender.is_finished());
        assert_eq!(limiter.interval_for(&source), Duration::from_millis(80));

        drop(slot);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("contender proceeds once the slot is released")
            .expect("task completes");
    }

    #[tokio::test]
    async fn re_registering_keeps_spacing_from_the_last_slot() {
        let limiter = RateLimiter::new(Duration::ZERO);
        let source = id("conab");
        limiter.register(&source, Duration::from_millis(40));
        drop(limiter.acquire(&source).await);

        let started = Instant::now();
        limiter.register(&source, Duration::from_millis(120));
        drop(limiter.acquire(&source).await);

        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn re_registering_same_interval_is_a_no_op() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        let source = id("usda");

        assert_eq!(limiter.interval_for(&source), Duration::from_secs(1));
        limiter.register(&source, Duration::from_millis(200));
        limiter.register(&source, Duration::from_millis(200));
        assert_eq!(limiter.interval_for(&source), Duration::from_millis(200));
    }
}
