//! Reward descriptors and the delivery seam.

mod reward;
mod sink;

pub use reward::{apply_placeholders, Recipient, Reward, RewardCollection};
pub use sink::{Delivery, LoggingSink, RecordingSink, RewardSink};
