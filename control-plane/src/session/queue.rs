use flowgate_wire::codec::ServerToAgent;
use std::collections::VecDeque;

/// Semantic category of an outbound message, used purely to decide what can
/// supersede what in a full queue. Ordering within a kind
/// is still FIFO; only same-kind entries are ever replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    RemoteConfigOffer,
    ServerCapabilities,
    ConnectionSettings,
    /// Restart commands and anything else that must never be silently
    /// dropped in favor of a newer message of the same kind.
    NonSupersedable,
}

impl MessageKind {
    pub fn is_supersedable(self) -> bool {
        !matches!(self, MessageKind::NonSupersedable)
    }
}

#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub kind: MessageKind,
    pub payload: ServerToAgent,
}

pub enum EnqueueOutcome {
    Enqueued,
    SupersededOldest,
    Rejected,
}

/// A bounded FIFO of [`QueuedMessage`] that, on overflow, prefers to evict
/// the oldest message of the *same kind* as the one being enqueued rather
/// than the globally oldest message — a stale remote-config offer is
/// superseded by a newer one without reordering unrelated pending messages.
pub struct OutboundQueue {
    max_depth: usize,
    items: VecDeque<QueuedMessage>,
}

impl OutboundQueue {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            items: VecDeque::new(),
        }
    }

    pub fn push(&mut self, msg: QueuedMessage) -> EnqueueOutcome {
        if self.items.len() < self.max_depth {
            self.items.push_back(msg);
            return EnqueueOutcome::Enqueued;
        }

        if let Some(pos) = self.items.iter().position(|m| m.kind == msg.kind) {
            self.items.remove(pos);
            self.items.push_back(msg);
            EnqueueOutcome::SupersededOldest
        } else {
            EnqueueOutcome::Rejected
        }
    }

    pub fn drain_up_to(&mut self, limit: usize) -> Vec<QueuedMessage> {
        let take = limit.min(self.items.len());
        self.items.drain(..take).collect()
    }

    pub fn drain_all(&mut self) -> Vec<QueuedMessage> {
        self.items.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_wire::InstanceUid;

    fn msg(kind: MessageKind) -> QueuedMessage {
        QueuedMessage {
            kind,
            payload: ServerToAgent {
                instance_uid: InstanceUid::from_bytes(&[0u8; 16]).unwrap(),
                capabilities: 0,
                remote_config: None,
                error_response: None,
                command: None,
                flags: 0,
            },
        }
    }

    #[test]
    fn supersedes_same_kind_when_full() {
        let mut q = OutboundQueue::new(2);
        assert!(matches!(
            q.push(msg(MessageKind::RemoteConfigOffer)),
            EnqueueOutcome::Enqueued
        ));
        assert!(matches!(
            q.push(msg(MessageKind::ServerCapabilities)),
            EnqueueOutcome::Enqueued
        ));
        assert!(matches!(
            q.push(msg(MessageKind::RemoteConfigOffer)),
            EnqueueOutcome::SupersededOldest
        ));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn rejects_when_full_and_nothing_to_supersede() {
        let mut q = OutboundQueue::new(1);
        q.push(msg(MessageKind::ServerCapabilities));
        let outcome = q.push(msg(MessageKind::NonSupersedable));
        assert!(matches!(outcome, EnqueueOutcome::Rejected));
    }

    #[test]
    fn preserves_fifo_order_across_kinds() {
        let mut q = OutboundQueue::new(4);
        q.push(msg(MessageKind::ServerCapabilities));
        q.push(msg(MessageKind::RemoteConfigOffer));
        let drained = q.drain_all();
        assert_eq!(drained[0].kind, MessageKind::ServerCapabilities);
        assert_eq!(drained[1].kind, MessageKind::RemoteConfigOffer);
    }
}
