//! Native code generation, linking and symbol lookup
//!
//! Descriptions are validated by [`plan`], lowered to Cranelift IR and
//! installed into a [`JitEngine`]. While linking, imports are resolved through
//! a [`LayeredResolver`]; once installed, exports are looked up through the
//! engine's [`SymbolTable`], which is also the handle the execution side holds.

pub mod engine;
pub mod intrinsics;
mod lower;
pub mod plan;
pub mod resolver;
pub mod symbol;

pub use engine::{InstalledModule, JitEngine};
pub use plan::{plan, Export, ImportKind, ModulePlan, MAX_LANE};
pub use resolver::{
    FallbackSymbols, InstalledSymbols, LayeredResolver, ProcessSymbols, Resolution,
    SymbolResolver,
};
pub use symbol::{ModuleKey, SymbolAddress, SymbolEntry, SymbolKind, SymbolTable};
