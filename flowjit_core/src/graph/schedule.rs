use super::ids::NodeId;
use std::collections::{HashSet, VecDeque};

/// Pending compile requests of one surface, in request order.
///
/// Repeated requests for a node coalesce into one entry until the queue is
/// drained; removing a node cancels its entry.
#[derive(Debug, Default)]
pub struct CompileQueue {
    order: VecDeque<NodeId>,
    pending: HashSet<NodeId>,
}

impl CompileQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the node was already pending
    pub fn schedule(&mut self, node: NodeId) -> bool {
        if !self.pending.insert(node) {
            return false;
        }
        self.order.push_back(node);
        true
    }

    /// Drop a pending request. Returns whether one existed.
    pub fn cancel(&mut self, node: NodeId) -> bool {
        if !self.pending.remove(&node) {
            return false;
        }
        self.order.retain(|n| *n != node);
        true
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.pending.contains(&node)
    }

    /// Take every pending request in order, leaving the queue empty
    pub fn drain(&mut self) -> Vec<NodeId> {
        self.pending.clear();
        self.order.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_coalesce() {
        let mut queue = CompileQueue::new();
        let a = NodeId::new(1);
        let b = NodeId::new(2);
        assert!(queue.schedule(a));
        assert!(queue.schedule(b));
        assert!(!queue.schedule(a));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drain(), vec![a, b]);
        assert!(queue.is_empty());
        assert!(queue.schedule(a));
    }

    #[test]
    fn test_cancel() {
        let mut queue = CompileQueue::new();
        let a = NodeId::new(1);
        queue.schedule(a);
        queue.schedule(NodeId::new(2));
        assert!(queue.cancel(a));
        assert!(!queue.cancel(a));
        assert!(!queue.contains(a));
        assert_eq!(queue.drain(), vec![NodeId::new(2)]);
    }
}
