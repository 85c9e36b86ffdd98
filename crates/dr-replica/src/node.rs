use dr_types::NodeSlot;

use crate::error::{ReplicaError, ReplicaResult};

/// One worker slot (spec.md §4.3). A node does not own a reference to the
/// replica it serves — the binding lives on the `Replica` side
/// (`Replica::node_slot`), so a slot can never be double-bound by
/// construction of the caller's update order.
#[derive(Debug, Clone)]
pub struct Node {
    pub active: bool,
    pub ip: String,
    pub start_time: u64,
    pub awaiting_dump: bool,
    pub pending_message: Option<String>,
}

impl Node {
    fn empty() -> Self {
        Node {
            active: false,
            ip: String::new(),
            start_time: 0,
            awaiting_dump: false,
            pending_message: None,
        }
    }
}

/// Fixed-size table of worker slots, sized to `N_replicas /
/// N_samesystem_uncoupled` (spec.md §3).
#[derive(Debug, Clone)]
pub struct NodeTable {
    nodes: Vec<Node>,
}

impl NodeTable {
    pub fn new(size: usize) -> Self {
        NodeTable {
            nodes: (0..size).map(|_| Node::empty()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, slot: NodeSlot) -> ReplicaResult<&Node> {
        self.nodes.get(slot.0).ok_or(ReplicaError::NodeSlotEmpty(slot))
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeSlot, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeSlot(i), n))
    }

    pub fn find_by_ip(&self, ip: &str) -> Option<NodeSlot> {
        self.nodes
            .iter()
            .position(|n| n.active && n.ip == ip)
            .map(NodeSlot)
    }

    pub fn find_inactive(&self) -> Option<NodeSlot> {
        self.nodes.iter().position(|n| !n.active).map(NodeSlot)
    }

    pub fn obtain(&mut self, slot: NodeSlot, ip: &str, client_start_time: u64, now: u64) -> ReplicaResult<()> {
        let node = self
            .nodes
            .get_mut(slot.0)
            .ok_or(ReplicaError::NodeSlotEmpty(slot))?;
        if node.active {
            return Err(ReplicaError::NodeSlotOccupied(slot));
        }
        node.active = true;
        node.ip = ip.to_string();
        node.start_time = if client_start_time > 0 { client_start_time } else { now };
        node.awaiting_dump = false;
        node.pending_message = None;
        Ok(())
    }

    pub fn release(&mut self, slot: NodeSlot) -> ReplicaResult<()> {
        let node = self
            .nodes
            .get_mut(slot.0)
            .ok_or(ReplicaError::NodeSlotEmpty(slot))?;
        node.active = false;
        node.awaiting_dump = false;
        node.pending_message = None;
        Ok(())
    }

    /// Picks the oldest currently-running, not-already-`awaiting_dump` node
    /// and marks it for release once its shortened deadline passes
    /// (spec.md §4.3). Returns `None` ("no-op") when `cycle_clients < 0`
    /// or when no eligible candidate exists.
    pub fn drop_oldest(&mut self, node_time: u64, cycle_clients: f64, now: u64) -> Option<NodeSlot> {
        if cycle_clients < 0.0 {
            return None;
        }
        let victim = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.active && !n.awaiting_dump)
            .min_by_key(|(_, n)| n.start_time)
            .map(|(i, _)| i)?;

        let node = &mut self.nodes[victim];
        let age = now.saturating_sub(node.start_time);
        let threshold = (node_time as f64 * cycle_clients).ceil() as u64;
        if age < threshold {
            return None;
        }
        node.awaiting_dump = true;
        node.start_time = node.start_time.saturating_sub(node_time);
        Some(NodeSlot(victim))
    }

    pub fn queue_message(&mut self, slot: NodeSlot, message: String) -> ReplicaResult<()> {
        let node = self
            .nodes
            .get_mut(slot.0)
            .ok_or(ReplicaError::NodeSlotEmpty(slot))?;
        node.pending_message = Some(message);
        Ok(())
    }

    pub fn take_message(&mut self, slot: NodeSlot) -> ReplicaResult<Option<String>> {
        let node = self
            .nodes
            .get_mut(slot.0)
            .ok_or(ReplicaError::NodeSlotEmpty(slot))?;
        Ok(node.pending_message.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obtain_then_find_by_ip() {
        let mut table = NodeTable::new(4);
        let slot = table.find_inactive().unwrap();
        table.obtain(slot, "10.0.0.1", 0, 1_000).unwrap();
        assert_eq!(table.find_by_ip("10.0.0.1"), Some(slot));
        assert_eq!(table.get(slot).unwrap().start_time, 1_000);
    }

    #[test]
    fn obtaining_an_already_active_slot_errors() {
        let mut table = NodeTable::new(1);
        let slot = NodeSlot(0);
        table.obtain(slot, "10.0.0.1", 0, 1).unwrap();
        let err = table.obtain(slot, "10.0.0.2", 0, 2).unwrap_err();
        assert!(matches!(err, ReplicaError::NodeSlotOccupied(_)));
    }

    #[test]
    fn release_frees_the_slot_for_reuse() {
        let mut table = NodeTable::new(1);
        let slot = NodeSlot(0);
        table.obtain(slot, "10.0.0.1", 0, 1).unwrap();
        table.release(slot).unwrap();
        assert_eq!(table.find_inactive(), Some(slot));
    }

    #[test]
    fn negative_cycle_clients_disables_drop_oldest() {
        let mut table = NodeTable::new(1);
        table.obtain(NodeSlot(0), "10.0.0.1", 0, 0).unwrap();
        assert_eq!(table.drop_oldest(100, -1.0, 10_000), None);
    }

    #[test]
    fn drop_oldest_marks_the_victim_and_rewinds_its_deadline() {
        let mut table = NodeTable::new(2);
        table.obtain(NodeSlot(0), "10.0.0.1", 0, 0).unwrap();
        table.obtain(NodeSlot(1), "10.0.0.2", 0, 50).unwrap();
        let victim = table.drop_oldest(100, 1.0, 150).unwrap();
        assert_eq!(victim, NodeSlot(0));
        assert!(table.get(victim).unwrap().awaiting_dump);
        assert_eq!(table.get(victim).unwrap().start_time, 0u64.saturating_sub(100));
    }

    #[test]
    fn drop_oldest_never_picks_a_node_already_awaiting_dump() {
        let mut table = NodeTable::new(1);
        table.obtain(NodeSlot(0), "10.0.0.1", 0, 0).unwrap();
        table.drop_oldest(10, 1.0, 100).unwrap();
        assert_eq!(table.drop_oldest(10, 1.0, 10_000), None);
    }
}
