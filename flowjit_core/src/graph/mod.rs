//! Graph model: surfaces, nodes, controls and groups
//!
//! A [`Surface`] is the consistency boundary. It owns its [`Node`]s, their
//! [`Control`]s, the [`ControlGroup`]s bundling controls into multi-lane
//! buses, the connections between controls, and the [`CompileQueue`] of
//! nodes waiting to be compiled. Concrete node behavior is supplied through
//! the [`NodeLogic`] trait.

pub mod control;
pub mod ids;
pub mod node;
pub mod schedule;
pub mod surface;

pub use control::{
    Connection, Control, ControlGroup, ControlSpec, Direction, LaneMask, ValueType, MAX_LANES,
};
pub use ids::{ControlId, GroupId, IdAllocator, NodeId, SurfaceId};
pub use node::{
    CompileContext, ControlInfo, GroupInfo, Node, NodeLogic, NodeMetadata, NodeState,
};
pub use schedule::CompileQueue;
pub use surface::Surface;
