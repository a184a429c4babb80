// Ports, multi-lane groups and connections
use super::ids::{ControlId, GroupId, NodeId};
use crate::error::{FlowError, FlowResult};
use crate::jit::MAX_LANE;
use std::fmt;

/// Largest number of lanes a group can carry
pub const MAX_LANES: u32 = MAX_LANE + 1;

/// Type of the values a control carries; only equal types connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Num,
    Midi,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Num => write!(f, "num"),
            ValueType::Midi => write!(f, "midi"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

/// Set of lanes, one bit per lane
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LaneMask(u32);

impl LaneMask {
    pub const EMPTY: LaneMask = LaneMask(0);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Mask with only `lane` set. Lanes past the last one give an empty mask.
    pub fn lane(lane: u32) -> Self {
        Self(1u32.checked_shl(lane).unwrap_or(0))
    }

    /// Lanes `0..count`
    pub fn first(count: u32) -> Self {
        if count >= MAX_LANES {
            Self(u32::MAX)
        } else {
            Self((1u32 << count) - 1)
        }
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn union(self, other: LaneMask) -> LaneMask {
        Self(self.0 | other.0)
    }

    pub fn contains(&self, lane: u32) -> bool {
        lane < MAX_LANES && self.0 & (1 << lane) != 0
    }

    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn is_subset_of(&self, other: LaneMask) -> bool {
        self.0 & !other.0 == 0
    }

    /// Lowest lane below `limit` not in the mask
    pub fn first_free(&self, limit: u32) -> Option<u32> {
        (0..limit.min(MAX_LANES)).find(|lane| !self.contains(*lane))
    }
}

impl fmt::Display for LaneMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#b}", self.0)
    }
}

impl FromIterator<LaneMask> for LaneMask {
    fn from_iter<I: IntoIterator<Item = LaneMask>>(iter: I) -> Self {
        iter.into_iter().fold(LaneMask::EMPTY, LaneMask::union)
    }
}

/// Parameters for a new control
#[derive(Debug, Clone)]
pub struct ControlSpec {
    pub name: String,
    pub value_type: ValueType,
    pub direction: Direction,
    /// Lanes the control occupies inside a group. When `None`, joining a
    /// group assigns the lowest free lane.
    pub lanes: Option<LaneMask>,
}

impl ControlSpec {
    pub fn input(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            direction: Direction::Input,
            lanes: None,
        }
    }

    pub fn output(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            direction: Direction::Output,
            ..Self::input(name, value_type)
        }
    }

    pub fn with_lanes(mut self, lanes: LaneMask) -> Self {
        self.lanes = Some(lanes);
        self
    }
}

/// A typed port owned by one node
#[derive(Debug, Clone)]
pub struct Control {
    id: ControlId,
    node: NodeId,
    name: String,
    value_type: ValueType,
    direction: Direction,
    lanes: LaneMask,
    pinned_lanes: bool,
    group: Option<GroupId>,
}

impl Control {
    pub(crate) fn new(id: ControlId, node: NodeId, spec: ControlSpec) -> Self {
        Self {
            id,
            node,
            name: spec.name,
            value_type: spec.value_type,
            direction: spec.direction,
            lanes: spec.lanes.unwrap_or_default(),
            pinned_lanes: spec.lanes.is_some(),
            group: None,
        }
    }

    pub fn id(&self) -> ControlId {
        self.id
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Lanes this control fills in its group while wired
    pub fn lanes(&self) -> LaneMask {
        self.lanes
    }

    pub fn group(&self) -> Option<GroupId> {
        self.group
    }

    pub(crate) fn join(&mut self, group: GroupId, lanes: LaneMask) {
        self.group = Some(group);
        self.lanes = lanes;
    }

    pub(crate) fn leave(&mut self) {
        self.group = None;
        if !self.pinned_lanes {
            self.lanes = LaneMask::EMPTY;
        }
    }

    pub(crate) fn has_pinned_lanes(&self) -> bool {
        self.pinned_lanes
    }
}

/// Controls of one type bundled into a multi-lane bus
///
/// `active` is derived: the union of the lanes of every member that is
/// currently wired. The surface recomputes it after each edit.
#[derive(Debug, Clone)]
pub struct ControlGroup {
    id: GroupId,
    owner: NodeId,
    value_type: ValueType,
    lanes: u32,
    members: Vec<ControlId>,
    active: LaneMask,
}

impl ControlGroup {
    pub(crate) fn new(
        id: GroupId,
        owner: NodeId,
        value_type: ValueType,
        lanes: u32,
    ) -> FlowResult<Self> {
        check_lane_count(lanes)?;
        Ok(Self {
            id,
            owner,
            value_type,
            lanes,
            members: Vec::new(),
            active: LaneMask::EMPTY,
        })
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Node whose compiled unit reads the active slots
    pub fn owner(&self) -> NodeId {
        self.owner
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn lanes(&self) -> u32 {
        self.lanes
    }

    pub fn capacity(&self) -> LaneMask {
        LaneMask::first(self.lanes)
    }

    /// Members in join order
    pub fn members(&self) -> &[ControlId] {
        &self.members
    }

    pub fn contains(&self, control: ControlId) -> bool {
        self.members.contains(&control)
    }

    pub fn active(&self) -> LaneMask {
        self.active
    }

    pub fn state_name(&self) -> String {
        self.id.state_name()
    }

    pub(crate) fn add_member(&mut self, control: ControlId) {
        if !self.contains(control) {
            self.members.push(control);
        }
    }

    pub(crate) fn remove_member(&mut self, control: ControlId) -> bool {
        let before = self.members.len();
        self.members.retain(|c| *c != control);
        self.members.len() != before
    }

    pub(crate) fn set_lanes(&mut self, lanes: u32) -> FlowResult<()> {
        check_lane_count(lanes)?;
        self.lanes = lanes;
        Ok(())
    }

    /// Replace the active set with the union of the wired members' lanes.
    /// Returns whether it changed.
    pub fn recompute(&mut self, wired: impl IntoIterator<Item = LaneMask>) -> bool {
        let active: LaneMask = wired.into_iter().collect();
        let changed = active != self.active;
        self.active = active;
        changed
    }
}

fn check_lane_count(lanes: u32) -> FlowResult<()> {
    if lanes == 0 || lanes > MAX_LANES {
        return Err(FlowError::invalid_input(format!(
            "group lane count must be 1..={}, got {}",
            MAX_LANES, lanes
        )));
    }
    Ok(())
}

/// Unordered link between two controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Connection {
    a: ControlId,
    b: ControlId,
}

impl Connection {
    pub fn new(x: ControlId, y: ControlId) -> Self {
        if x <= y {
            Self { a: x, b: y }
        } else {
            Self { a: y, b: x }
        }
    }

    pub fn ends(&self) -> (ControlId, ControlId) {
        (self.a, self.b)
    }

    pub fn touches(&self, control: ControlId) -> bool {
        self.a == control || self.b == control
    }

    pub fn other(&self, control: ControlId) -> Option<ControlId> {
        if self.a == control {
            Some(self.b)
        } else if self.b == control {
            Some(self.a)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_mask() {
        let mask = LaneMask::lane(0).union(LaneMask::lane(3));
        assert!(mask.contains(0));
        assert!(mask.contains(3));
        assert!(!mask.contains(1));
        assert!(!mask.contains(40));
        assert_eq!(mask.count(), 2);
        assert_eq!(mask.first_free(8), Some(1));
        assert_eq!(LaneMask::first(2).first_free(2), None);
        assert_eq!(LaneMask::first(32).bits(), u32::MAX);
        assert!(LaneMask::lane(32).is_empty());
        assert!(mask.is_subset_of(LaneMask::first(4)));
        assert!(!mask.is_subset_of(LaneMask::first(3)));
    }

    #[test]
    fn test_group_recompute_reports_changes() {
        let mut group =
            ControlGroup::new(GroupId::new(1), NodeId::new(2), ValueType::Num, 4).unwrap();
        assert!(group.recompute([LaneMask::lane(0), LaneMask::lane(2)]));
        assert_eq!(group.active().bits(), 0b101);
        assert!(!group.recompute([LaneMask::lane(2), LaneMask::lane(0)]));
        assert!(group.recompute(std::iter::empty()));
        assert!(group.active().is_empty());
    }

    #[test]
    fn test_group_lane_bounds() {
        assert!(ControlGroup::new(GroupId::new(1), NodeId::new(2), ValueType::Num, 0).is_err());
        assert!(ControlGroup::new(GroupId::new(1), NodeId::new(2), ValueType::Num, 33).is_err());
        assert!(ControlGroup::new(GroupId::new(1), NodeId::new(2), ValueType::Midi, 32).is_ok());
    }

    #[test]
    fn test_connection_is_unordered() {
        let x = ControlId::new(5);
        let y = ControlId::new(3);
        assert_eq!(Connection::new(x, y), Connection::new(y, x));
        assert_eq!(Connection::new(x, y).other(x), Some(y));
        assert_eq!(Connection::new(x, y).other(ControlId::new(9)), None);
    }

    #[test]
    fn test_unpinned_lanes_reset_on_leave() {
        let mut control = Control::new(
            ControlId::new(1),
            NodeId::new(2),
            ControlSpec::input("in", ValueType::Num),
        );
        control.join(GroupId::new(3), LaneMask::lane(1));
        assert_eq!(control.lanes(), LaneMask::lane(1));
        control.leave();
        assert!(control.lanes().is_empty());

        let mut pinned = Control::new(
            ControlId::new(4),
            NodeId::new(2),
            ControlSpec::input("in", ValueType::Num).with_lanes(LaneMask::lane(5)),
        );
        pinned.join(GroupId::new(3), LaneMask::lane(5));
        pinned.leave();
        assert_eq!(pinned.lanes(), LaneMask::lane(5));
    }
}
