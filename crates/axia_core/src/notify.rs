use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{Id, PartitionId, Timestamp};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Created,
    Superseded,
    Deleted,
}

impl ChangeOperation {
    pub fn as_i16(self) -> i16 {
        match self {
            ChangeOperation::Created => 1,
            ChangeOperation::Superseded => 2,
            ChangeOperation::Deleted => 3,
        }
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            1 => Some(ChangeOperation::Created),
            2 => Some(ChangeOperation::Superseded),
            3 => Some(ChangeOperation::Deleted),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueChangeEvent {
    pub partition: PartitionId,
    pub operation: ChangeOperation,
    pub owner_entity_id: Id,
    pub attribute_id: Id,
    pub value_id: Id,
    pub previous_value_id: Option<Id>,
    pub timestamp: Timestamp,
}

/// A change event as recorded in the durable feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeFeedEntry {
    pub sequence: i64,
    pub event: ValueChangeEvent,
}

/// Invoked after commit. Implementations must not block; delivery is best-effort and
/// consumers needing at-least-once delivery read the durable feed instead.
pub trait ChangeNotifier: Send + Sync {
    fn notify(&self, event: &ValueChangeEvent);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
    fn notify(&self, _event: &ValueChangeEvent) {}
}

/// Forwards events into a bounded channel; a full or closed channel drops the event.
#[derive(Clone, Debug)]
pub struct ChannelNotifier {
    sender: mpsc::Sender<ValueChangeEvent>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ValueChangeEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl ChangeNotifier for ChannelNotifier {
    fn notify(&self, event: &ValueChangeEvent) {
        if let Err(err) = self.sender.try_send(event.clone()) {
            log::warn!(
                "dropped change notification for value {}: {err}",
                event.value_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeNotifier, ChangeOperation, ChannelNotifier, ValueChangeEvent};
    use crate::{Id, PartitionId, Timestamp};

    fn event() -> ValueChangeEvent {
        ValueChangeEvent {
            partition: PartitionId(Id::new()),
            operation: ChangeOperation::Created,
            owner_entity_id: Id::new(),
            attribute_id: Id::new(),
            value_id: Id::new(),
            previous_value_id: None,
            timestamp: Timestamp(1),
        }
    }

    #[test]
    fn channel_notifier_never_blocks_when_full() {
        let (notifier, mut receiver) = ChannelNotifier::new(1);
        let first = event();
        notifier.notify(&first);
        notifier.notify(&event());
        assert_eq!(receiver.try_recv().ok(), Some(first));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn operation_codes_roundtrip() {
        for op in [
            ChangeOperation::Created,
            ChangeOperation::Superseded,
            ChangeOperation::Deleted,
        ] {
            assert_eq!(ChangeOperation::from_i16(op.as_i16()), Some(op));
        }
    }
}
