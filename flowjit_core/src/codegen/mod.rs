//! Codegen descriptions
//!
//! A node compiles to a [`UnitDescription`]: an intermediate form that says
//! what a unit computes without naming any backend. The JIT engine plans and
//! lowers it into native code; a different backend could consume the same
//! description.

mod expr;
mod unit;

pub use expr::{
    mangle, BinaryOp, Callee, CompareOp, Expr, GlobalRef, HostGlobal, Intrinsic, UnaryOp,
    HOST_UNIT,
};
pub use unit::{FunctionDef, ProcessDef, StateDef, UnitBuilder, UnitDescription, PROCESS_ENTRY};
