//! # flowjit Core
//!
//! The engine behind flowjit: a live, incremental JIT compilation runtime
//! for a mutable node-and-port dataflow graph.
//!
//! - **Graph**: surfaces owning nodes, typed controls, multi-lane control
//!   groups and connections
//! - **Codegen**: backend-agnostic descriptions nodes compile to
//! - **JIT**: Cranelift-based engine installing one module per node and
//!   resolving symbols through layered resolvers
//! - **Runtime**: the edit API, the compile scheduler, live state pushes and
//!   change notifications
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flowjit_core::codegen::Expr;
//! use flowjit_core::graph::{ControlSpec, ValueType};
//! use flowjit_core::nodes::ExprNode;
//! use flowjit_core::{Runtime, RuntimeConfig};
//!
//! let mut runtime = Runtime::new(RuntimeConfig::default()).unwrap();
//! let surface = runtime.create_surface("main");
//! let node = runtime
//!     .create_node(surface, "osc", ExprNode::new().output(
//!         "out",
//!         Expr::intrinsic(flowjit_core::codegen::Intrinsic::Sin, vec![Expr::control(0)]),
//!     ))
//!     .unwrap();
//! runtime.create_control(node, ControlSpec::input("phase", ValueType::Num)).unwrap();
//! runtime.create_control(node, ControlSpec::output("out", ValueType::Num)).unwrap();
//! assert!(runtime.compile_pending().is_clean());
//! ```

pub mod codegen;
pub mod config;
pub mod error;
pub mod graph;
pub mod jit;
pub mod nodes;
pub mod runtime;

// Re-export commonly used types for easy access
pub use config::{OptLevel, RuntimeConfig};
pub use error::{FlowError, FlowResult};
pub use graph::{NodeLogic, Surface};
pub use jit::{JitEngine, ModuleKey, SymbolAddress, SymbolTable};
pub use runtime::{CompileReport, GraphEvent, Runtime};
