//! Single-slot response rendezvous
//!
//! The gate sits between the transport's read loop and the one request
//! awaiting a response. At most one awaiter is ever registered — the
//! client's request lock guarantees it — and registration is synchronous,
//! so it can happen before the request bytes are written and no response
//! can slip through the gap. Inbound frames with nobody waiting are
//! discarded, never buffered: unsolicited traffic must not accumulate.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{Result, SolarmanError};

type Slot = Arc<Mutex<Option<oneshot::Sender<Result<Vec<u8>>>>>>;

/// Rendezvous point for the next inbound frame
#[derive(Debug, Default)]
pub struct ResponseGate {
    slot: Slot,
}

impl ResponseGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn take_sender(&self) -> Option<oneshot::Sender<Result<Vec<u8>>>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Register the awaiter for the next inbound frame
    ///
    /// Synchronous — must be called before the request is written so the
    /// response cannot arrive unclaimed. Dropping the returned guard
    /// (cancellation, timeout) clears the slot.
    pub fn register(&self) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        PendingResponse {
            rx,
            slot: Arc::clone(&self.slot),
        }
    }

    /// Deliver an inbound frame to the awaiter, if any
    ///
    /// Returns whether the frame was consumed. Taking the sender out of the
    /// slot makes completion idempotent: a second delivery finds the slot
    /// empty and is discarded.
    pub fn complete(&self, frame: Vec<u8>) -> bool {
        match self.take_sender() {
            Some(tx) => tx.send(Ok(frame)).is_ok(),
            None => {
                debug!("Discarding unsolicited frame ({} bytes)", frame.len());
                false
            }
        }
    }

    /// Propagate a transport error to the awaiter, if any
    pub fn fail(&self, err: SolarmanError) -> bool {
        match self.take_sender() {
            Some(tx) => tx.send(Err(err)).is_ok(),
            None => false,
        }
    }

    /// Notify the awaiter that the transport went inactive
    pub fn close(&self) {
        self.fail(SolarmanError::ChannelClosed);
    }

    /// Whether an awaiter is currently registered
    pub fn has_awaiter(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Guard held by the request awaiting its response
///
/// Resolves via [`PendingResponse::wait`]; dropping it without waiting (or
/// while a timeout races it) clears the gate slot so the eventual response
/// is treated as unsolicited and discarded.
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<Result<Vec<u8>>>,
    slot: Slot,
}

impl PendingResponse {
    /// Wait for the frame, transport error, or channel closure
    pub async fn wait(mut self) -> Result<Vec<u8>> {
        match (&mut self.rx).await {
            Ok(result) => result,
            // Sender vanished without completing: the slot was torn down
            Err(_) => Err(SolarmanError::ChannelClosed),
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        let _ = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    // ========================================================================
    // Delivery Tests
    // ========================================================================

    #[tokio::test]
    async fn test_frame_delivered_to_awaiter() {
        let gate = ResponseGate::new();
        let pending = gate.register();
        assert!(gate.has_awaiter());

        assert!(gate.complete(vec![0xA5, 0x01]));
        assert!(!gate.has_awaiter());

        let frame = pending.wait().await.unwrap();
        assert_eq!(frame, vec![0xA5, 0x01]);
    }

    #[tokio::test]
    async fn test_unsolicited_frame_discarded() {
        let gate = ResponseGate::new();
        assert!(!gate.complete(vec![0xA5, 0x01]));
    }

    #[tokio::test]
    async fn test_second_delivery_discarded() {
        let gate = ResponseGate::new();
        let pending = gate.register();

        assert!(gate.complete(vec![0x01]));
        assert!(!gate.complete(vec![0x02]));

        assert_eq!(pending.wait().await.unwrap(), vec![0x01]);
    }

    // ========================================================================
    // Error Propagation Tests
    // ========================================================================

    #[tokio::test]
    async fn test_transport_error_reaches_awaiter() {
        let gate = ResponseGate::new();
        let pending = gate.register();

        gate.fail(SolarmanError::io("connection reset"));

        match pending.wait().await {
            Err(SolarmanError::Io(msg)) => assert!(msg.contains("connection reset")),
            other => panic!("expected Io error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_yields_channel_closed() {
        let gate = ResponseGate::new();
        let pending = gate.register();

        gate.close();

        assert!(matches!(
            pending.wait().await,
            Err(SolarmanError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_without_awaiter_is_noop() {
        let gate = ResponseGate::new();
        gate.close();
        gate.close();
        assert!(!gate.has_awaiter());
    }

    // ========================================================================
    // Cancellation Tests
    // ========================================================================

    #[tokio::test]
    async fn test_dropped_guard_clears_slot() {
        let gate = ResponseGate::new();
        let pending = gate.register();
        drop(pending);

        assert!(!gate.has_awaiter());
        assert!(!gate.complete(vec![0x01]));
    }

    #[tokio::test]
    async fn test_timeout_race_clears_slot() {
        let gate = ResponseGate::new();
        let pending = gate.register();

        let result = timeout(Duration::from_millis(20), pending.wait()).await;
        assert!(result.is_err()); // elapsed

        // The late response must now be treated as unsolicited
        assert!(!gate.has_awaiter());
        assert!(!gate.complete(vec![0x01]));
    }

    #[tokio::test]
    async fn test_reregister_after_completion() {
        let gate = ResponseGate::new();

        let first = gate.register();
        gate.complete(vec![0x01]);
        assert_eq!(first.wait().await.unwrap(), vec![0x01]);

        let second = gate.register();
        gate.complete(vec![0x02]);
        assert_eq!(second.wait().await.unwrap(), vec![0x02]);
    }
}
