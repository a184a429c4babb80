use super::control::{Direction, ValueType};
use super::ids::{ControlId, GroupId, NodeId, SurfaceId};
use crate::codegen::{GlobalRef, UnitBuilder, UnitDescription};
use crate::error::FlowResult;
use crate::jit::ModuleKey;
use crate::runtime::RuntimeUnit;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Compile lifecycle of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Created, nothing requested yet
    Uninstalled,
    /// Waiting for the scheduler
    Dirty,
    Compiling,
    Installed,
    /// Terminal
    Removed,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Uninstalled => write!(f, "Uninstalled"),
            NodeState::Dirty => write!(f, "Dirty"),
            NodeState::Compiling => write!(f, "Compiling"),
            NodeState::Installed => write!(f, "Installed"),
            NodeState::Removed => write!(f, "Removed"),
        }
    }
}

/// Editor placement, carried through untouched
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// What a node's logic sees of one of its controls
#[derive(Debug, Clone, PartialEq)]
pub struct ControlInfo {
    /// Slot in the process buffer
    pub index: usize,
    pub id: ControlId,
    pub name: String,
    pub value_type: ValueType,
    pub direction: Direction,
    pub group: Option<GroupId>,
}

/// A group owned by the compiling node
#[derive(Debug, Clone, PartialEq)]
pub struct GroupInfo {
    pub id: GroupId,
    /// State block to read active slots from
    pub state: String,
    pub lanes: u32,
    pub value_type: ValueType,
}

/// Structural view of a node handed to [`NodeLogic::compile`]
#[derive(Debug, Clone)]
pub struct CompileContext {
    pub(crate) node: NodeId,
    pub(crate) controls: Vec<ControlInfo>,
    pub(crate) groups: Vec<GroupInfo>,
}

impl CompileContext {
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Unit name the description must use
    pub fn unit(&self) -> String {
        self.node.unit_name()
    }

    /// Controls in ABI order
    pub fn controls(&self) -> &[ControlInfo] {
        &self.controls
    }

    pub fn control(&self, name: &str) -> Option<&ControlInfo> {
        self.controls.iter().find(|c| c.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.control(name).map(|c| c.index)
    }

    pub fn groups(&self) -> &[GroupInfo] {
        &self.groups
    }

    pub fn group(&self, id: GroupId) -> Option<&GroupInfo> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// Reference to one of this unit's globals
    pub fn global(&self, local: &str) -> GlobalRef {
        GlobalRef::new(self.unit(), local)
    }

    /// Builder for this unit with the process entry sized to the controls
    pub fn builder(&self) -> UnitBuilder {
        UnitDescription::builder(self.unit()).controls(self.controls.len())
    }
}

/// Behavior of a concrete node kind
pub trait NodeLogic {
    /// Short kind name used in logs
    fn kind(&self) -> &'static str;

    /// Produce the description of this node's unit. Must depend only on the
    /// structure in `ctx`, so equal structure gives an equal ABI.
    fn compile(&self, ctx: &CompileContext) -> FlowResult<UnitDescription>;
}

/// A compilable element of a surface
pub struct Node {
    id: NodeId,
    surface: SurfaceId,
    name: String,
    logic: Box<dyn NodeLogic>,
    state: NodeState,
    controls: Vec<ControlId>,
    unit: RuntimeUnit,
    metadata: NodeMetadata,
    last_error: Option<String>,
}

impl Node {
    pub(crate) fn new(
        id: NodeId,
        surface: SurfaceId,
        name: impl Into<String>,
        logic: Box<dyn NodeLogic>,
    ) -> Self {
        Self {
            id,
            surface,
            name: name.into(),
            logic,
            state: NodeState::Uninstalled,
            controls: Vec::new(),
            unit: RuntimeUnit::new(id.unit_name()),
            metadata: NodeMetadata::default(),
            last_error: None,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &'static str {
        self.logic.kind()
    }

    pub fn logic(&self) -> &dyn NodeLogic {
        self.logic.as_ref()
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn needs_compile(&self) -> bool {
        self.state == NodeState::Dirty
    }

    /// Owned controls in stable ABI order
    pub fn controls(&self) -> &[ControlId] {
        &self.controls
    }

    pub fn unit(&self) -> &RuntimeUnit {
        &self.unit
    }

    pub fn module_key(&self) -> Option<ModuleKey> {
        self.unit.key()
    }

    pub fn metadata(&self) -> NodeMetadata {
        self.metadata
    }

    /// Message of the most recent failed compile, cleared on success
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub(crate) fn unit_mut(&mut self) -> &mut RuntimeUnit {
        &mut self.unit
    }

    pub(crate) fn set_logic(&mut self, logic: Box<dyn NodeLogic>) {
        self.logic = logic;
    }

    pub(crate) fn set_metadata(&mut self, metadata: NodeMetadata) {
        self.metadata = metadata;
    }

    pub(crate) fn push_control(&mut self, control: ControlId) {
        self.controls.push(control);
    }

    pub(crate) fn remove_control(&mut self, control: ControlId) {
        self.controls.retain(|c| *c != control);
    }

    /// Any state but `Removed` becomes `Dirty`. Returns false for removed nodes.
    pub(crate) fn mark_dirty(&mut self) -> bool {
        if self.state == NodeState::Removed {
            return false;
        }
        self.state = NodeState::Dirty;
        true
    }

    pub(crate) fn begin_compile(&mut self) {
        self.state = NodeState::Compiling;
    }

    pub(crate) fn compile_succeeded(&mut self) {
        self.state = NodeState::Installed;
        self.last_error = None;
    }

    pub(crate) fn compile_failed(&mut self, message: String) {
        self.state = NodeState::Dirty;
        self.last_error = Some(message);
    }

    pub(crate) fn mark_removed(&mut self) {
        self.state = NodeState::Removed;
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("surface", &self.surface)
            .field("name", &self.name)
            .field("kind", &self.logic.kind())
            .field("state", &self.state)
            .field("controls", &self.controls)
            .field("module", &self.unit.key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::Expr;

    struct Constant;

    impl NodeLogic for Constant {
        fn kind(&self) -> &'static str {
            "constant"
        }

        fn compile(&self, ctx: &CompileContext) -> FlowResult<UnitDescription> {
            Ok(ctx.builder().output(0, Expr::constant(1.0)).build())
        }
    }

    #[test]
    fn test_state_machine() {
        let mut node = Node::new(NodeId::new(1), SurfaceId::new(2), "k", Box::new(Constant));
        assert_eq!(node.state(), NodeState::Uninstalled);
        assert!(!node.needs_compile());

        assert!(node.mark_dirty());
        assert!(node.needs_compile());
        node.begin_compile();
        assert_eq!(node.state(), NodeState::Compiling);
        node.compile_failed("boom".into());
        assert!(node.needs_compile());
        assert_eq!(node.last_error(), Some("boom"));

        node.begin_compile();
        node.compile_succeeded();
        assert_eq!(node.state(), NodeState::Installed);
        assert!(node.last_error().is_none());

        node.mark_removed();
        assert!(!node.mark_dirty());
        assert_eq!(node.state().to_string(), "Removed");
    }

    #[test]
    fn test_context_builder_sizes_process() {
        let ctx = CompileContext {
            node: NodeId::new(7),
            controls: vec![ControlInfo {
                index: 0,
                id: ControlId::new(8),
                name: "out".into(),
                value_type: ValueType::Num,
                direction: Direction::Output,
                group: None,
            }],
            groups: Vec::new(),
        };
        let desc = Constant.compile(&ctx).unwrap();
        assert_eq!(desc.unit, "n7");
        assert_eq!(desc.process.unwrap().control_count, 1);
        assert_eq!(ctx.index_of("out"), Some(0));
        assert_eq!(ctx.global("gain").mangled(), "n7.gain");
    }
}
