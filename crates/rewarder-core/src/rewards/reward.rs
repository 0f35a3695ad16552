//! Reward descriptors.
//!
//! A reward only knows how to describe itself for a recipient. Executing it
//! (dispatching the command, sending the chat line) is the sink's job.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who a reward is being delivered to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: Uuid,
    pub name: String,
    /// Global playtime at the moment of delivery.
    pub global_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Reward {
    /// Console command, e.g. `give %user% diamond 1`.
    Command { command: String },
    /// Private message to the recipient.
    Message { message: String },
    /// Message to everyone online.
    Broadcast { message: String },
}

impl Reward {
    pub fn command(command: impl Into<String>) -> Self {
        Reward::Command {
            command: command.into(),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Reward::Message {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Reward::Command { .. } => "command",
            Reward::Message { .. } => "message",
            Reward::Broadcast { .. } => "broadcast",
        }
    }

    /// The reward's text with placeholders filled in for `recipient`.
    pub fn render(&self, recipient: &Recipient) -> String {
        let template = match self {
            Reward::Command { command } => command,
            Reward::Message { message } | Reward::Broadcast { message } => message,
        };
        apply_placeholders(template, recipient)
    }
}

/// Substitute `%user%`, `%uuid%` and `%playtime%`.
pub fn apply_placeholders(template: &str, recipient: &Recipient) -> String {
    template
        .replace("%user%", &recipient.name)
        .replace("%uuid%", &recipient.id.to_string())
        .replace("%playtime%", &recipient.global_minutes.to_string())
}

/// Ordered rewards handed out together when a goal is reached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RewardCollection {
    rewards: Vec<Reward>,
}

impl RewardCollection {
    pub fn new(rewards: Vec<Reward>) -> Self {
        Self { rewards }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Reward> {
        self.rewards.iter()
    }

    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }

    /// Append another collection, keeping order.
    pub fn extend(&mut self, other: RewardCollection) {
        self.rewards.extend(other.rewards);
    }
}

impl<'a> IntoIterator for &'a RewardCollection {
    type Item = &'a Reward;
    type IntoIter = std::slice::Iter<'a, Reward>;

    fn into_iter(self) -> Self::IntoIter {
        self.rewards.iter()
    }
}
