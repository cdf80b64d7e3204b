//! Chaotic bus wrapper for fault injection testing
//!
//! Bus wrapper that randomly fails publishes and subscribes to test that the
//! relay drops messages and retries subscriptions instead of tearing down
//! sessions or rooms.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use chatrelay_proto::Topic;

use super::{Bus, BusError, BusSubscription};

/// Chaotic bus wrapper that randomly injects failures
///
/// Delegates to an underlying bus but fails operations with the configured
/// probabilities. Publish and subscribe have separate rates so a test can keep
/// subscriptions healthy while dropping publishes, or the reverse.
#[derive(Clone)]
pub struct ChaoticBus<B: Bus> {
    inner: B,
    /// Publish failure rate (0.0 = never fail, 1.0 = always fail)
    publish_failure_rate: f64,
    /// Subscribe failure rate (0.0 = never fail, 1.0 = always fail)
    subscribe_failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    /// Operation counter
    operation_count: Arc<AtomicUsize>,
}

/// Simple deterministic RNG for chaos injection
///
/// Linear congruential generator, so chaos runs are reproducible per seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate next random value [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }

    fn should_fail(&mut self, failure_rate: f64) -> bool {
        self.next() < failure_rate
    }
}

impl<B: Bus> ChaoticBus<B> {
    /// Wrap `inner`, failing both publishes and subscribes at `failure_rate`.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: B, failure_rate: f64) -> Self {
        Self::with_rates(inner, failure_rate, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Wrap `inner` with explicit per-operation rates and seed.
    ///
    /// # Panics
    ///
    /// Panics if either rate is not in [0.0, 1.0]
    pub fn with_rates(
        inner: B,
        publish_failure_rate: f64,
        subscribe_failure_rate: f64,
        seed: u64,
    ) -> Self {
        for rate in [publish_failure_rate, subscribe_failure_rate] {
            assert!(
                (0.0..=1.0).contains(&rate),
                "failure_rate must be between 0.0 and 1.0, got {rate}"
            );
        }

        Self {
            inner,
            publish_failure_rate,
            subscribe_failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Underlying bus (for checking state after chaos).
    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Total number of bus operations attempted.
    pub fn operation_count(&self) -> usize {
        self.operation_count.load(Ordering::Relaxed)
    }

    fn should_fail(&self, failure_rate: f64) -> bool {
        self.operation_count.fetch_add(1, Ordering::Relaxed);
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).should_fail(failure_rate)
    }
}

#[async_trait]
impl<B: Bus> Bus for ChaoticBus<B> {
    async fn publish(&self, topic: &Topic, payload: Bytes) -> Result<(), BusError> {
        if self.should_fail(self.publish_failure_rate) {
            return Err(BusError::Unavailable("chaotic failure injection".to_string()));
        }
        self.inner.publish(topic, payload).await
    }

    async fn subscribe(&self, topic: &Topic) -> Result<BusSubscription, BusError> {
        if self.should_fail(self.subscribe_failure_rate) {
            return Err(BusError::Unavailable("chaotic failure injection".to_string()));
        }
        self.inner.subscribe(topic).await
    }
}
