//! Result channel shared by the task invocations of one step.
//!
//! State machine: `running -> stopping -> closed`. Only the transition out of
//! `running` is contended; it is a compare-and-swap, so the close happens
//! exactly once. Producers check the state before every send and never block.

use serde_json::Value;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::ChainError;

/// What a single task invocation produced.
pub(crate) type Outcome = Result<Value, ChainError>;

const RUNNING: u8 = 0;
const STOPPING: u8 = 1;
const CLOSED: u8 = 2;

/// Producer side, shared by every invocation of the step.
pub(crate) struct ResultChannel {
    state: AtomicU8,
    tx: mpsc::Sender<Outcome>,
}

/// Consumer side, owned by the step.
pub(crate) struct ResultReceiver {
    rx: mpsc::Receiver<Outcome>,
    channel: Arc<ResultChannel>,
}

/// Create a channel able to buffer `capacity` outcomes without blocking.
pub(crate) fn result_channel(capacity: usize) -> (Arc<ResultChannel>, ResultReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let channel = Arc::new(ResultChannel {
        state: AtomicU8::new(RUNNING),
        tx,
    });
    let receiver = ResultReceiver {
        rx,
        channel: channel.clone(),
    };
    (channel, receiver)
}

impl ResultChannel {
    /// Forward an outcome unless the consumer has stopped. Returns whether it
    /// was accepted.
    pub(crate) fn respond(&self, outcome: Outcome) -> bool {
        if self.state.load(Ordering::Acquire) != RUNNING {
            return false;
        }
        self.tx.try_send(outcome).is_ok()
    }

    pub(crate) fn ack(&self, value: Value) -> bool {
        self.respond(Ok(value))
    }

    pub(crate) fn nack(&self, err: ChainError) -> bool {
        self.respond(Err(err))
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.state.load(Ordering::Acquire) != RUNNING
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == CLOSED
    }
}

impl ResultReceiver {
    pub(crate) async fn recv(&mut self) -> Option<Outcome> {
        self.rx.recv().await
    }

    /// Run the stop sequence: flip to `stopping`, close, drop whatever is
    /// still buffered, then mark `closed`. Idempotent. Returns the number of
    /// outcomes discarded.
    pub(crate) fn stop(&mut self) -> usize {
        let won = self
            .channel
            .state
            .compare_exchange(RUNNING, STOPPING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !won {
            return 0;
        }

        self.rx.close();
        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        self.channel.state.store(CLOSED, Ordering::Release);
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_outcomes_arrive_in_send_order() {
        let (channel, mut receiver) = result_channel(2);
        assert!(channel.ack(json!(1)));
        assert!(channel.nack(ChainError::NoPassed));

        assert_eq!(receiver.recv().await.unwrap().unwrap(), json!(1));
        assert!(matches!(
            receiver.recv().await.unwrap(),
            Err(ChainError::NoPassed)
        ));
    }

    #[tokio::test]
    async fn test_stop_discards_buffered_and_rejects_late_sends() {
        let (channel, mut receiver) = result_channel(3);
        channel.ack(json!(1));
        channel.ack(json!(2));

        assert_eq!(receiver.stop(), 2);
        assert!(channel.is_stopping());
        assert!(channel.is_closed());
        assert!(!channel.ack(json!(3)));
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (channel, mut receiver) = result_channel(1);
        channel.ack(json!(1));
        assert_eq!(receiver.stop(), 1);
        assert_eq!(receiver.stop(), 0);
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn test_concurrent_producers_never_block_after_stop() {
        let (channel, mut receiver) = result_channel(64);
        receiver.stop();

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let channel = channel.clone();
                tokio::spawn(async move { channel.ack(json!(i)) })
            })
            .collect();
        for handle in handles {
            assert!(!handle.await.unwrap());
        }
    }
}
