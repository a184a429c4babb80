// Change notifications for collaborators (editor views, inspectors)
use crate::graph::{GroupId, LaneMask, NodeId, NodeMetadata, SurfaceId};
use crate::jit::ModuleKey;
use crossbeam::channel::{unbounded, Receiver, Sender};

/// Something collaborators may want to react to. Sent only once the graph
/// is consistent again.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    NodeCompiled {
        node: NodeId,
        key: ModuleKey,
    },
    CompileFailed {
        node: NodeId,
        message: String,
        retryable: bool,
    },
    NodeRemoved {
        node: NodeId,
    },
    SurfaceRemoved {
        surface: SurfaceId,
    },
    ActiveSlotsChanged {
        group: GroupId,
        active: LaneMask,
    },
    MetadataChanged {
        node: NodeId,
        metadata: NodeMetadata,
    },
}

/// Fan-out of events to every live subscriber
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<Sender<GraphEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Receiver<GraphEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Deliver to every subscriber; subscribers whose receiver is gone are dropped
    pub fn emit(&mut self, event: GraphEvent) {
        log::trace!("event {:?}", event);
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fan_out_and_pruning() {
        let mut bus = EventBus::new();
        let first = bus.subscribe();
        let second = bus.subscribe();
        drop(second);

        let event = GraphEvent::NodeRemoved {
            node: NodeId::new(3),
        };
        bus.emit(event.clone());
        assert_eq!(first.try_recv().unwrap(), event);
        assert_eq!(bus.subscriber_count(), 1);
    }
}
