//! # flowjit - live JIT compilation for dataflow graphs
//!
//! flowjit turns a graph of nodes connected through typed controls into
//! native code, keeps that code in sync while the graph is edited, and hands
//! callable entry points to a real-time host.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flowjit::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let mut runtime = Runtime::new(RuntimeConfig::editor())?;
//!     let surface = runtime.create_surface("main");
//!
//!     // out = in * 2
//!     let logic = ExprNode::new().output("out", Expr::mul(Expr::control(0), Expr::constant(2.0)));
//!     let node = runtime.create_node(surface, "double", logic)?;
//!     runtime.create_control(node, ControlSpec::input("in", ValueType::Num))?;
//!     runtime.create_control(node, ControlSpec::output("out", ValueType::Num))?;
//!
//!     let report = runtime.compile_pending();
//!     assert!(report.is_clean());
//!
//!     // Execution side
//!     let process = unsafe {
//!         runtime
//!             .process_symbol(node)?
//!             .as_fn::<extern "C" fn(*mut f32)>()
//!     };
//!     let mut slots = [1.5f32, 0.0];
//!     process(slots.as_mut_ptr());
//!     assert_eq!(slots[1], 3.0);
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Per-node native modules** with atomic hot swap
//! - **Layered symbol resolution**: sibling nodes, the process, built-in intrinsics
//! - **Runtime-state pushes** for wiring changes, no recompile needed
//! - **Change notifications** over channels

// Re-export core components
pub use flowjit_core::{self, *};

// Re-export serde at crate root for collaborator code
pub use serde;

/// The flowjit prelude - everything needed to build and run a graph
pub mod prelude {
    // ============================================
    // Runtime & Graph Editing
    // ============================================
    pub use flowjit_core::runtime::{CompileReport, GraphEvent, Runtime, RuntimeUnit};
    pub use flowjit_core::graph::{
        CompileContext, ControlId, ControlSpec, Direction, GroupId, LaneMask, NodeId,
        NodeLogic, NodeMetadata, NodeState, SurfaceId, ValueType,
    };

    // ============================================
    // Built-in Nodes
    // ============================================
    pub use flowjit_core::nodes::{BusNode, CallNode, ExprNode};

    // ============================================
    // Codegen Descriptions
    // ============================================
    pub use flowjit_core::codegen::{
        BinaryOp, CompareOp, Expr, GlobalRef, HostGlobal, Intrinsic, UnaryOp, UnitDescription,
    };

    // ============================================
    // JIT Engine & Symbols
    // ============================================
    pub use flowjit_core::jit::{
        JitEngine, LayeredResolver, ModuleKey, SymbolAddress, SymbolResolver, SymbolTable,
    };

    // ============================================
    // Configuration
    // ============================================
    pub use flowjit_core::config::{OptLevel, RuntimeConfig};

    // ============================================
    // Error Types
    // ============================================
    pub use flowjit_core::error::{FlowError, FlowResult};
    pub type Result<T> = FlowResult<T>;

    // ============================================
    // Common Traits
    // ============================================
    pub use serde::{Deserialize, Serialize};
}
