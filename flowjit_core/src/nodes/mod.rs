//! Built-in node kinds
//!
//! - [`ExprNode`]: outputs computed from expressions over the node's controls,
//!   plus exported helper functions other nodes can call
//! - [`CallNode`]: forwards inputs to a function exported by another node
//! - [`BusNode`]: reports how many lanes of its groups are wired

mod bus;
mod call;
mod expr;

pub use bus::BusNode;
pub use call::CallNode;
pub use expr::ExprNode;

use crate::error::{FlowError, FlowResult};
use crate::graph::{CompileContext, Direction};

/// Slot of a named control, which must be an output
fn output_slot(ctx: &CompileContext, name: &str) -> FlowResult<usize> {
    let control = ctx
        .control(name)
        .ok_or_else(|| FlowError::codegen(ctx.unit(), format!("no control named '{}'", name)))?;
    if control.direction != Direction::Output {
        return Err(FlowError::codegen(
            ctx.unit(),
            format!("control '{}' is not an output", name),
        ));
    }
    Ok(control.index)
}

fn input_slot(ctx: &CompileContext, name: &str) -> FlowResult<usize> {
    ctx.index_of(name)
        .ok_or_else(|| FlowError::codegen(ctx.unit(), format!("no control named '{}'", name)))
}
