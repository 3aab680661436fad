//! In-flight tracking for cross-node deliveries.
//!
//! Every batch handed to a remote peer stays tracked here until the peer
//! acknowledges it (the forward RPC succeeds) or the attempt budget is
//! exhausted. Redelivery is timing-wheel driven with exponential backoff:
//! `base_timeout * 2^attempts`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{CoreError, Result};
use crate::timing_wheel::TimingWheel;

/// Transport used to push a batch to a destination peer. The cluster
/// orchestrator implements this over the peer RPC; tests inject fakes.
#[async_trait]
pub trait PeerForwarder: Send + Sync {
    async fn forward(&self, peer_id: u64, payload: Vec<u8>) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct PeerInFlightConfig {
    pub base_timeout: Duration,
    pub max_attempts: u32,
    /// Above this many tracked entries new enqueues are refused.
    pub watermark: usize,
}

impl Default for PeerInFlightConfig {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_secs(5),
            max_attempts: 5,
            watermark: 4096,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeerInFlightData {
    pub no: u64,
    pub peer_id: u64,
    pub payload: Vec<u8>,
    pub attempts: u32,
}

/// Outbound queue of batches awaiting acknowledgement, grouped by
/// destination peer.
pub struct PeerInFlightQueue {
    entries: DashMap<u64, PeerInFlightData>,
    wheel_handles: DashMap<u64, u64>,
    wheel: Arc<TimingWheel>,
    forwarder: Arc<dyn PeerForwarder>,
    config: PeerInFlightConfig,
    next_no: AtomicU64,
}

impl PeerInFlightQueue {
    pub fn new(
        wheel: Arc<TimingWheel>,
        forwarder: Arc<dyn PeerForwarder>,
        config: PeerInFlightConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            wheel_handles: DashMap::new(),
            wheel,
            forwarder,
            config,
            next_no: AtomicU64::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tracks a batch and starts the first delivery attempt. Refuses with
    /// backpressure above the watermark; the caller requeues client-side.
    pub fn enqueue(self: &Arc<Self>, peer_id: u64, payload: Vec<u8>) -> Result<u64> {
        if self.entries.len() >= self.config.watermark {
            return Err(CoreError::Backpressure(format!(
                "peer in-flight queue above watermark ({})",
                self.config.watermark
            )));
        }

        let no = self.next_no.fetch_add(1, Ordering::SeqCst) + 1;
        self.entries.insert(
            no,
            PeerInFlightData {
                no,
                peer_id,
                payload,
                attempts: 0,
            },
        );
        self.start_inflight_timeout(no);
        self.spawn_delivery(no);
        Ok(no)
    }

    /// Removes a delivered entry. Safe to call twice: a late ack after a
    /// redelivery is a no-op.
    pub fn finish(&self, no: u64) {
        self.entries.remove(&no);
        if let Some((_, handle)) = self.wheel_handles.remove(&no) {
            self.wheel.cancel(handle);
        }
    }

    /// Arms (or re-arms) the redelivery deadline for an entry.
    fn start_inflight_timeout(self: &Arc<Self>, no: u64) {
        let attempts = match self.entries.get(&no) {
            Some(entry) => entry.attempts,
            None => return,
        };
        let deadline = self.config.base_timeout * 2u32.saturating_pow(attempts);
        let queue = self.clone();
        let handle = self.wheel.insert(deadline, move || {
            queue.on_timeout(no);
        });
        self.wheel_handles.insert(no, handle);
    }

    fn on_timeout(self: &Arc<Self>, no: u64) {
        let attempts = {
            let Some(mut entry) = self.entries.get_mut(&no) else {
                return;
            };
            entry.attempts += 1;
            entry.attempts
        };

        if attempts >= self.config.max_attempts {
            if let Some((_, entry)) = self.entries.remove(&no) {
                log::error!(
                    "Dropping delivery no={} to peer {} after {} attempts",
                    no,
                    entry.peer_id,
                    entry.attempts
                );
            }
            self.wheel_handles.remove(&no);
            return;
        }

        log::warn!("Delivery no={} timed out, redelivering (attempt {})", no, attempts);
        self.start_inflight_timeout(no);
        self.spawn_delivery(no);
    }

    fn spawn_delivery(self: &Arc<Self>, no: u64) {
        let Some(entry) = self.entries.get(&no).map(|e| e.clone()) else {
            return;
        };
        let queue = self.clone();
        tokio::spawn(async move {
            match queue.forwarder.forward(entry.peer_id, entry.payload).await {
                Ok(()) => queue.finish(no),
                Err(e) => {
                    log::warn!(
                        "Forward to peer {} failed (no={}): {}",
                        entry.peer_id,
                        no,
                        e
                    );
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Fails the first `failures` calls, then succeeds.
    struct FlakyForwarder {
        failures: Mutex<u32>,
        calls: AtomicU64,
    }

    impl FlakyForwarder {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures: Mutex::new(failures),
                calls: AtomicU64::new(0),
            })
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PeerForwarder for FlakyForwarder {
        async fn forward(&self, _peer_id: u64, _payload: Vec<u8>) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(CoreError::Transient("peer unreachable".to_string()));
            }
            Ok(())
        }
    }

    fn wheel() -> Arc<TimingWheel> {
        let wheel = TimingWheel::new(Duration::from_millis(10), 32);
        wheel.start();
        wheel
    }

    fn config() -> PeerInFlightConfig {
        PeerInFlightConfig {
            base_timeout: Duration::from_millis(30),
            max_attempts: 5,
            watermark: 8,
        }
    }

    #[tokio::test]
    async fn immediate_success_empties_the_queue() {
        let forwarder = FlakyForwarder::new(0);
        let queue = PeerInFlightQueue::new(wheel(), forwarder.clone(), config());

        queue.enqueue(2, b"batch".to_vec()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(queue.is_empty());
        assert_eq!(forwarder.calls(), 1);
    }

    #[tokio::test]
    async fn redelivers_until_the_peer_recovers() {
        let forwarder = FlakyForwarder::new(2);
        let queue = PeerInFlightQueue::new(wheel(), forwarder.clone(), config());

        queue.enqueue(2, b"batch".to_vec()).unwrap();
        // First two attempts fail; the third (after two timeouts) lands.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(queue.is_empty(), "entry should be acked after retries");
        assert_eq!(forwarder.calls(), 3);
    }

    #[tokio::test]
    async fn drops_after_max_attempts() {
        let forwarder = FlakyForwarder::new(u32::MAX);
        let queue = PeerInFlightQueue::new(
            wheel(),
            forwarder.clone(),
            PeerInFlightConfig {
                base_timeout: Duration::from_millis(20),
                max_attempts: 3,
                watermark: 8,
            },
        );

        queue.enqueue(2, b"batch".to_vec()).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(queue.is_empty(), "entry dropped after attempt budget");
        // Attempts 0, 1, 2 each spawned exactly one delivery; the drop at
        // max_attempts must not spawn another.
        assert_eq!(forwarder.calls(), 3);
    }

    #[tokio::test]
    async fn watermark_applies_backpressure() {
        let forwarder = FlakyForwarder::new(u32::MAX);
        let queue = PeerInFlightQueue::new(
            wheel(),
            forwarder,
            PeerInFlightConfig {
                base_timeout: Duration::from_secs(60),
                max_attempts: 3,
                watermark: 2,
            },
        );

        queue.enqueue(2, b"a".to_vec()).unwrap();
        queue.enqueue(2, b"b".to_vec()).unwrap();
        let err = queue.enqueue(2, b"c".to_vec()).unwrap_err();
        assert!(matches!(err, CoreError::Backpressure(_)));
    }
}
