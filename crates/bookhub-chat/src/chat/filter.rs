//! Echo and duplicate suppression.

use std::collections::{HashSet, VecDeque};

use super::message::CanonicalMessage;
use crate::config::{EchoPolicy, MessagingConfig};
use crate::logging::targets;

/// Which inbound stream a message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    /// `new_message` / `message_received`.
    Received,
    /// `message_sent` confirmations.
    Sent,
}

/// Outcome of [`MessageFilter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Deliver,
    /// The backend echoed the session user's own message.
    Echo,
    /// The id was already delivered on this stream.
    Duplicate,
}

/// Decides whether a normalized message reaches subscribers.
#[derive(Debug)]
pub struct MessageFilter {
    echo_policy: EchoPolicy,
    received: RecentIds,
    sent: RecentIds,
}

impl MessageFilter {
    pub fn new(config: &MessagingConfig) -> Self {
        Self {
            echo_policy: config.echo_policy,
            received: RecentIds::new(config.dedup_window),
            sent: RecentIds::new(config.dedup_window),
        }
    }

    pub fn echo_policy(&self) -> EchoPolicy {
        self.echo_policy
    }

    /// Judge `message` and remember its id when it is delivered.
    pub fn check(
        &mut self,
        stream: Stream,
        message: &CanonicalMessage,
        current_user: Option<i64>,
    ) -> Verdict {
        if stream == Stream::Received
            && self.echo_policy == EchoPolicy::Suppress
            && current_user == Some(message.sender_id)
        {
            tracing::debug!(target: targets::FILTER, id = %message.id, "suppressing echo of own message");
            return Verdict::Echo;
        }

        let window = match stream {
            Stream::Received => &mut self.received,
            Stream::Sent => &mut self.sent,
        };
        if !window.insert(&message.id) {
            tracing::debug!(target: targets::FILTER, id = %message.id, ?stream, "suppressing duplicate");
            return Verdict::Duplicate;
        }
        Verdict::Deliver
    }

    /// Forget every remembered id.
    pub fn clear(&mut self) {
        self.received.clear();
        self.sent.clear();
    }
}

/// Bounded set of the most recently inserted ids.
#[derive(Debug)]
struct RecentIds {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity.min(1024)),
            seen: HashSet::new(),
        }
    }

    /// Returns `false` if `id` is already in the window.
    fn insert(&mut self, id: &str) -> bool {
        if self.capacity == 0 {
            return true;
        }
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }

    fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }
}
