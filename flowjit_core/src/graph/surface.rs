use super::control::{Connection, Control, ControlGroup, ControlSpec, LaneMask};
use super::ids::{ControlId, GroupId, NodeId, SurfaceId};
use super::node::{CompileContext, ControlInfo, GroupInfo, Node, NodeState};
use super::schedule::CompileQueue;
use crate::codegen::{StateDef, UnitDescription};
use crate::error::{FlowError, FlowResult};
use std::collections::{BTreeMap, BTreeSet};

/// Graph container and topology consistency boundary.
///
/// Owns nodes, their controls, groups and the connections between controls,
/// plus the queue of pending compile requests. Every mutator leaves group
/// active slots recomputed and returns the groups whose flags changed so the
/// caller can push them into compiled code.
#[derive(Debug)]
pub struct Surface {
    id: SurfaceId,
    name: String,
    nodes: BTreeMap<NodeId, Node>,
    controls: BTreeMap<ControlId, Control>,
    groups: BTreeMap<GroupId, ControlGroup>,
    connections: BTreeSet<Connection>,
    queue: CompileQueue,
}

impl Surface {
    pub(crate) fn new(id: SurfaceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            nodes: BTreeMap::new(),
            controls: BTreeMap::new(),
            groups: BTreeMap::new(),
            connections: BTreeSet::new(),
            queue: CompileQueue::new(),
        }
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn control(&self, id: ControlId) -> Option<&Control> {
        self.controls.get(&id)
    }

    /// Controls of a node in ABI order
    pub fn controls_of(&self, node: NodeId) -> Vec<&Control> {
        self.nodes
            .get(&node)
            .map(|n| {
                n.controls()
                    .iter()
                    .filter_map(|c| self.controls.get(c))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn group(&self, id: GroupId) -> Option<&ControlGroup> {
        self.groups.get(&id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &ControlGroup> {
        self.groups.values()
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    pub fn is_connected(&self, a: ControlId, b: ControlId) -> bool {
        self.connections.contains(&Connection::new(a, b))
    }

    /// Controls linked to `control`
    pub fn peers(&self, control: ControlId) -> Vec<ControlId> {
        self.connections
            .iter()
            .filter_map(|c| c.other(control))
            .collect()
    }

    /// A control is wired while at least one connection touches it
    pub fn is_wired(&self, control: ControlId) -> bool {
        self.connections.iter().any(|c| c.touches(control))
    }

    pub fn pending(&self) -> &CompileQueue {
        &self.queue
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> FlowResult<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| FlowError::not_found(format!("node {}", id)))
    }

    fn require_node(&self, id: NodeId) -> FlowResult<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| FlowError::not_found(format!("node {}", id)))
    }

    fn require_control(&self, id: ControlId) -> FlowResult<&Control> {
        self.controls
            .get(&id)
            .ok_or_else(|| FlowError::not_found(format!("control {}", id)))
    }

    fn require_group(&self, id: GroupId) -> FlowResult<&ControlGroup> {
        self.groups
            .get(&id)
            .ok_or_else(|| FlowError::not_found(format!("group {}", id)))
    }

    pub(crate) fn add_node(&mut self, node: Node) {
        self.nodes.insert(node.id(), node);
    }

    /// Mark a node dirty and queue it. Coalesces with a pending request.
    pub(crate) fn schedule(&mut self, id: NodeId) -> FlowResult<bool> {
        let node = self.node_mut(id)?;
        if !node.mark_dirty() {
            return Err(FlowError::invalid_input(format!("node {} was removed", id)));
        }
        Ok(self.queue.schedule(id))
    }

    pub(crate) fn drain_queue(&mut self) -> Vec<NodeId> {
        self.queue.drain()
    }

    /// Append a control to a node; changes the node's ABI
    pub(crate) fn add_control(
        &mut self,
        id: ControlId,
        node: NodeId,
        spec: ControlSpec,
    ) -> FlowResult<()> {
        if self.controls_of(node).iter().any(|c| c.name() == spec.name) {
            return Err(FlowError::AlreadyExists(format!(
                "control '{}' on node {}",
                spec.name, node
            )));
        }
        self.node_mut(node)?.push_control(id);
        self.controls.insert(id, Control::new(id, node, spec));
        self.schedule(node)?;
        Ok(())
    }

    pub(crate) fn remove_control(&mut self, id: ControlId) -> FlowResult<Vec<GroupId>> {
        let owner = self.require_control(id)?.node();
        let mut affected = BTreeSet::new();
        self.detach_control(id, &mut affected);
        if let Some(node) = self.nodes.get_mut(&owner) {
            node.remove_control(id);
        }
        self.schedule(owner)?;
        Ok(self.recompute(affected))
    }

    /// Drop a control with its connections and membership, collecting the
    /// groups whose inputs changed
    fn detach_control(&mut self, id: ControlId, affected: &mut BTreeSet<GroupId>) {
        let touching: Vec<Connection> = self
            .connections
            .iter()
            .filter(|c| c.touches(id))
            .copied()
            .collect();
        for connection in touching {
            self.connections.remove(&connection);
            if let Some(peer) = connection.other(id).and_then(|p| self.controls.get(&p)) {
                affected.extend(peer.group());
            }
        }
        if let Some(control) = self.controls.remove(&id) {
            if let Some(group) = control.group() {
                if let Some(group) = self.groups.get_mut(&group) {
                    group.remove_member(id);
                    affected.insert(group.id());
                }
            }
        }
    }

    pub(crate) fn connect(&mut self, a: ControlId, b: ControlId) -> FlowResult<Vec<GroupId>> {
        if a == b {
            return Err(FlowError::invalid_input(format!(
                "cannot connect control {} to itself",
                a
            )));
        }
        let (ca, cb) = (self.require_control(a)?, self.require_control(b)?);
        if ca.value_type() != cb.value_type() {
            return Err(FlowError::incompatible(ca.value_type(), cb.value_type()));
        }
        let affected: BTreeSet<GroupId> = ca.group().into_iter().chain(cb.group()).collect();
        if !self.connections.insert(Connection::new(a, b)) {
            return Err(FlowError::AlreadyExists(format!("connection {} - {}", a, b)));
        }
        Ok(self.recompute(affected))
    }

    pub(crate) fn disconnect(&mut self, a: ControlId, b: ControlId) -> FlowResult<Vec<GroupId>> {
        if !self.connections.remove(&Connection::new(a, b)) {
            return Err(FlowError::not_found(format!("connection {} - {}", a, b)));
        }
        let affected: BTreeSet<GroupId> = [a, b]
            .iter()
            .filter_map(|c| self.controls.get(c))
            .filter_map(|c| c.group())
            .collect();
        Ok(self.recompute(affected))
    }

    /// The owner reads the group's state block, so it recompiles
    pub(crate) fn add_group(&mut self, group: ControlGroup) -> FlowResult<()> {
        let owner = group.owner();
        self.require_node(owner)?;
        self.groups.insert(group.id(), group);
        self.schedule(owner)?;
        Ok(())
    }

    pub(crate) fn remove_group(&mut self, id: GroupId) -> FlowResult<()> {
        let group = self
            .groups
            .remove(&id)
            .ok_or_else(|| FlowError::not_found(format!("group {}", id)))?;
        for member in group.members() {
            if let Some(control) = self.controls.get_mut(member) {
                control.leave();
            }
        }
        if self.nodes.contains_key(&group.owner()) {
            self.schedule(group.owner())?;
        }
        Ok(())
    }

    pub(crate) fn add_to_group(
        &mut self,
        group_id: GroupId,
        control_id: ControlId,
    ) -> FlowResult<Vec<GroupId>> {
        let group = self.require_group(group_id)?;
        let control = self.require_control(control_id)?;
        if control.value_type() != group.value_type() {
            return Err(FlowError::incompatible(group.value_type(), control.value_type()));
        }
        if let Some(existing) = control.group() {
            return Err(FlowError::AlreadyExists(format!(
                "control {} is already in group {}",
                control_id, existing
            )));
        }

        let lanes = if control.has_pinned_lanes() {
            if control.lanes().is_empty() || !control.lanes().is_subset_of(group.capacity()) {
                return Err(FlowError::invalid_input(format!(
                    "lanes {} of control {} do not fit group {} ({} lanes)",
                    control.lanes(),
                    control_id,
                    group_id,
                    group.lanes()
                )));
            }
            control.lanes()
        } else {
            let taken: LaneMask = group
                .members()
                .iter()
                .filter_map(|m| self.controls.get(m))
                .map(|c| c.lanes())
                .collect();
            let lane = taken.first_free(group.lanes()).ok_or_else(|| {
                FlowError::invalid_input(format!("group {} has no free lane", group_id))
            })?;
            LaneMask::lane(lane)
        };

        if let Some(control) = self.controls.get_mut(&control_id) {
            control.join(group_id, lanes);
        }
        if let Some(group) = self.groups.get_mut(&group_id) {
            group.add_member(control_id);
        }
        Ok(self.recompute([group_id]))
    }

    pub(crate) fn remove_from_group(
        &mut self,
        group_id: GroupId,
        control_id: ControlId,
    ) -> FlowResult<Vec<GroupId>> {
        self.require_group(group_id)?;
        if self.require_control(control_id)?.group() != Some(group_id) {
            return Err(FlowError::not_found(format!(
                "control {} in group {}",
                control_id, group_id
            )));
        }
        if let Some(control) = self.controls.get_mut(&control_id) {
            control.leave();
        }
        if let Some(group) = self.groups.get_mut(&group_id) {
            group.remove_member(control_id);
        }
        Ok(self.recompute([group_id]))
    }

    /// Resize a group's bus. Returns whether the lane count changed, in which
    /// case the owner was rescheduled.
    pub(crate) fn set_group_lanes(&mut self, group_id: GroupId, lanes: u32) -> FlowResult<bool> {
        let group = self.require_group(group_id)?;
        if group.lanes() == lanes {
            return Ok(false);
        }
        let capacity = LaneMask::first(lanes);
        for member in group.members() {
            if let Some(control) = self.controls.get(member) {
                if !control.lanes().is_subset_of(capacity) {
                    return Err(FlowError::invalid_input(format!(
                        "control {} occupies lanes {} outside {} lanes",
                        member,
                        control.lanes(),
                        lanes
                    )));
                }
            }
        }
        let owner = group.owner();
        if let Some(group) = self.groups.get_mut(&group_id) {
            group.set_lanes(lanes)?;
        }
        self.schedule(owner)?;
        Ok(true)
    }

    /// Detach a node with everything it owns. Returns the node (already
    /// `Removed`) and the groups whose flags changed.
    pub(crate) fn remove_node(&mut self, id: NodeId) -> FlowResult<(Node, Vec<GroupId>)> {
        let mut node = self
            .nodes
            .remove(&id)
            .ok_or_else(|| FlowError::not_found(format!("node {}", id)))?;
        if self.queue.cancel(id) {
            log::debug!("cancelled pending compile of {}", id);
        }
        node.mark_removed();

        let mut affected = BTreeSet::new();
        for control in node.controls().to_vec() {
            self.detach_control(control, &mut affected);
        }

        let owned: Vec<GroupId> = self
            .groups
            .values()
            .filter(|g| g.owner() == id)
            .map(|g| g.id())
            .collect();
        for group_id in owned {
            if let Some(group) = self.groups.remove(&group_id) {
                for member in group.members() {
                    if let Some(control) = self.controls.get_mut(member) {
                        control.leave();
                    }
                }
            }
            affected.remove(&group_id);
        }
        Ok((node, self.recompute(affected)))
    }

    /// Recompute active slots of `groups`; returns those that changed
    pub(crate) fn recompute(&mut self, groups: impl IntoIterator<Item = GroupId>) -> Vec<GroupId> {
        let mut changed = Vec::new();
        for group_id in groups {
            let wired: Vec<LaneMask> = match self.groups.get(&group_id) {
                Some(group) => group
                    .members()
                    .iter()
                    .filter(|m| self.is_wired(**m))
                    .filter_map(|m| self.controls.get(m))
                    .map(|c| c.lanes())
                    .collect(),
                None => continue,
            };
            if let Some(group) = self.groups.get_mut(&group_id) {
                if group.recompute(wired) {
                    changed.push(group_id);
                }
            }
        }
        changed
    }

    /// Structural view of a node for its logic
    pub fn compile_context(&self, id: NodeId) -> FlowResult<CompileContext> {
        let node = self.require_node(id)?;
        let controls = node
            .controls()
            .iter()
            .enumerate()
            .map(|(index, cid)| {
                let control = self.require_control(*cid)?;
                Ok(ControlInfo {
                    index,
                    id: *cid,
                    name: control.name().to_string(),
                    value_type: control.value_type(),
                    direction: control.direction(),
                    group: control.group(),
                })
            })
            .collect::<FlowResult<Vec<_>>>()?;
        let groups = self
            .groups
            .values()
            .filter(|g| g.owner() == id)
            .map(|g| GroupInfo {
                id: g.id(),
                state: g.state_name(),
                lanes: g.lanes(),
                value_type: g.value_type(),
            })
            .collect();
        Ok(CompileContext {
            node: id,
            controls,
            groups,
        })
    }

    /// Run a node's logic and attach the state blocks of the groups it owns,
    /// initialized with the current active slots
    pub(crate) fn describe(&self, id: NodeId) -> FlowResult<UnitDescription> {
        let node = self.require_node(id)?;
        if node.state() == NodeState::Removed {
            return Err(FlowError::invalid_input(format!("node {} was removed", id)));
        }
        let ctx = self.compile_context(id)?;
        let mut desc = node.logic().compile(&ctx)?;
        if desc.unit != ctx.unit() {
            return Err(FlowError::codegen(
                desc.unit.clone(),
                format!("{} logic must compile unit '{}'", node.kind(), ctx.unit()),
            ));
        }
        for group in self.groups.values().filter(|g| g.owner() == id) {
            desc.ensure_state(StateDef::with_initial(
                group.state_name(),
                vec![group.active().bits()],
            ));
        }
        Ok(desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::control::ValueType;
    use crate::graph::ids::IdAllocator;
    use crate::graph::node::NodeLogic;

    struct Passthrough;

    impl NodeLogic for Passthrough {
        fn kind(&self) -> &'static str {
            "passthrough"
        }

        fn compile(&self, ctx: &CompileContext) -> FlowResult<UnitDescription> {
            Ok(ctx.builder().build())
        }
    }

    struct Fixture {
        ids: IdAllocator,
        surface: Surface,
    }

    impl Fixture {
        fn new() -> Self {
            let mut ids = IdAllocator::default();
            let surface = Surface::new(ids.surface(), "main");
            Self { ids, surface }
        }

        fn node(&mut self) -> NodeId {
            let id = self.ids.node();
            self.surface
                .add_node(Node::new(id, self.surface.id(), "node", Box::new(Passthrough)));
            id
        }

        fn control(&mut self, node: NodeId, spec: ControlSpec) -> ControlId {
            let id = self.ids.control();
            self.surface.add_control(id, node, spec).unwrap();
            id
        }

        fn group(&mut self, owner: NodeId, lanes: u32) -> GroupId {
            let id = self.ids.group();
            let group = ControlGroup::new(id, owner, ValueType::Num, lanes).unwrap();
            self.surface.add_group(group).unwrap();
            id
        }
    }

    fn num(name: &str) -> ControlSpec {
        ControlSpec::input(name, ValueType::Num)
    }

    #[test]
    fn test_control_order_is_stable() {
        let mut f = Fixture::new();
        let node = f.node();
        let a = f.control(node, num("a"));
        let b = f.control(node, num("b"));
        let c = f.control(node, num("c"));

        let first = f.surface.compile_context(node).unwrap();
        let second = f.surface.compile_context(node).unwrap();
        assert_eq!(first.controls(), second.controls());
        assert_eq!(f.surface.node(node).unwrap().controls(), &[a, b, c]);

        f.surface.remove_control(b).unwrap();
        let ctx = f.surface.compile_context(node).unwrap();
        let names: Vec<_> = ctx.controls().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(ctx.index_of("c"), Some(1));
    }

    #[test]
    fn test_connect_validation() {
        let mut f = Fixture::new();
        let node = f.node();
        let a = f.control(node, num("a"));
        let b = f.control(node, num("b"));
        let m = f.control(node, ControlSpec::input("m", ValueType::Midi));

        assert!(f.surface.connect(a, a).is_err());
        assert!(matches!(
            f.surface.connect(a, m),
            Err(FlowError::IncompatibleTypes { .. })
        ));
        f.surface.connect(a, b).unwrap();
        assert!(matches!(
            f.surface.connect(b, a),
            Err(FlowError::AlreadyExists(_))
        ));
        assert!(f.surface.is_wired(a));
        assert_eq!(f.surface.peers(b), vec![a]);

        f.surface.disconnect(b, a).unwrap();
        assert!(!f.surface.is_wired(a));
        assert!(f.surface.disconnect(a, b).unwrap_err().is_not_found());
    }

    #[test]
    fn test_active_slots_follow_wiring() {
        let mut f = Fixture::new();
        let owner = f.node();
        let other = f.node();
        let group = f.group(owner, 4);
        let ins: Vec<ControlId> = (0..3).map(|i| f.control(owner, num(&format!("in{}", i)))).collect();
        let src = f.control(other, num("src"));

        for control in &ins {
            assert!(f.surface.add_to_group(group, *control).unwrap().is_empty());
        }
        assert_eq!(f.surface.control(ins[2]).unwrap().lanes(), LaneMask::lane(2));

        assert_eq!(f.surface.connect(src, ins[2]).unwrap(), vec![group]);
        assert_eq!(f.surface.group(group).unwrap().active().bits(), 0b100);
        assert_eq!(f.surface.connect(src, ins[0]).unwrap(), vec![group]);
        assert_eq!(f.surface.group(group).unwrap().active().bits(), 0b101);

        assert_eq!(f.surface.remove_control(src).unwrap(), vec![group]);
        assert!(f.surface.group(group).unwrap().active().is_empty());
    }

    #[test]
    fn test_group_membership_rules() {
        let mut f = Fixture::new();
        let owner = f.node();
        let group = f.group(owner, 1);
        let a = f.control(owner, num("a"));
        let b = f.control(owner, num("b"));
        let midi = f.control(owner, ControlSpec::input("m", ValueType::Midi));
        let wide = f.control(owner, num("w").with_lanes(LaneMask::lane(3)));

        f.surface.add_to_group(group, a).unwrap();
        assert!(matches!(
            f.surface.add_to_group(group, a),
            Err(FlowError::AlreadyExists(_))
        ));
        assert!(f.surface.add_to_group(group, b).is_err());
        assert!(matches!(
            f.surface.add_to_group(group, midi),
            Err(FlowError::IncompatibleTypes { .. })
        ));
        assert!(f.surface.add_to_group(group, wide).is_err());

        assert!(f.surface.set_group_lanes(group, 4).unwrap());
        f.surface.add_to_group(group, wide).unwrap();
        assert!(f.surface.set_group_lanes(group, 2).is_err());

        f.surface.remove_from_group(group, a).unwrap();
        assert!(f.surface.control(a).unwrap().group().is_none());
        assert!(f.surface.remove_from_group(group, a).is_err());
    }

    #[test]
    fn test_remove_node_cascades() {
        let mut f = Fixture::new();
        let owner = f.node();
        let other = f.node();
        let group = f.group(other, 2);
        let member = f.control(owner, num("in"));
        let peer = f.control(other, num("out"));
        f.surface.add_to_group(group, member).unwrap();
        f.surface.connect(member, peer).unwrap();
        assert_eq!(f.surface.group(group).unwrap().active().bits(), 0b1);

        let (node, changed) = f.surface.remove_node(owner).unwrap();
        assert_eq!(node.state(), NodeState::Removed);
        assert_eq!(changed, vec![group]);
        assert!(f.surface.control(member).is_none());
        assert!(!f.surface.is_wired(peer));
        assert!(f.surface.group(group).unwrap().members().is_empty());
        assert!(!f.surface.pending().contains(owner));

        let (_, changed) = f.surface.remove_node(other).unwrap();
        assert!(changed.is_empty());
        assert!(f.surface.group(group).is_none());
    }

    #[test]
    fn test_describe_attaches_group_state() {
        let mut f = Fixture::new();
        let owner = f.node();
        let group = f.group(owner, 2);
        let a = f.control(owner, num("a"));
        let b = f.control(owner, num("b"));
        f.surface.add_to_group(group, a).unwrap();
        f.surface.add_to_group(group, b).unwrap();
        f.surface.connect(a, b).unwrap();

        let desc = f.surface.describe(owner).unwrap();
        let state = desc.state_def(&group.state_name()).unwrap();
        assert_eq!(state.initial, vec![0b11]);
        assert_eq!(desc.process.unwrap().control_count, 2);
    }

    #[test]
    fn test_edits_coalesce_in_queue() {
        let mut f = Fixture::new();
        let node = f.node();
        f.control(node, num("a"));
        f.control(node, num("b"));
        assert_eq!(f.surface.pending().len(), 1);
        assert!(f.surface.node(node).unwrap().needs_compile());
        assert_eq!(f.surface.drain_queue(), vec![node]);
    }
}
