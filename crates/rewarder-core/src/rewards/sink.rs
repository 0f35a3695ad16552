use std::sync::Mutex;

use serde::Serialize;
use tracing::info;

use super::reward::{Recipient, Reward};

/// Executes rewards. Implemented by the host (command dispatcher, chat).
///
/// Delivery is fire-and-forget: retries and failures belong to the sink.
pub trait RewardSink: Send + Sync {
    fn deliver(&self, recipient: &Recipient, reward: &Reward);
}

/// Sink that only logs what would have been executed.
#[derive(Debug, Default)]
pub struct LoggingSink;

impl RewardSink for LoggingSink {
    fn deliver(&self, recipient: &Recipient, reward: &Reward) {
        info!(
            user = %recipient.id,
            kind = reward.kind(),
            "reward: {}",
            reward.render(recipient)
        );
    }
}

/// One delivery captured by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub recipient: Recipient,
    pub reward: Reward,
    pub rendered: String,
}

/// Sink that keeps every delivery in memory, in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Rendered texts in delivery order.
    pub fn rendered(&self) -> Vec<String> {
        self.deliveries().into_iter().map(|d| d.rendered).collect()
    }

    pub fn take(&self) -> Vec<Delivery> {
        std::mem::take(&mut *self.deliveries.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl RewardSink for RecordingSink {
    fn deliver(&self, recipient: &Recipient, reward: &Reward) {
        let rendered = reward.render(recipient);
        self.deliveries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Delivery {
                recipient: recipient.clone(),
                reward: reward.clone(),
                rendered,
            });
    }
}
