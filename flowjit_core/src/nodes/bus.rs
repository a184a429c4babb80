use super::output_slot;
use crate::codegen::{Expr, UnitDescription};
use crate::error::FlowResult;
use crate::graph::{CompileContext, NodeLogic};

/// Writes the number of active lanes across every group it owns to one
/// output. Wiring changes reach the compiled code as state pushes.
#[derive(Debug, Clone)]
pub struct BusNode {
    output: String,
}

impl BusNode {
    pub fn new(output: &str) -> Self {
        Self {
            output: output.to_string(),
        }
    }
}

impl NodeLogic for BusNode {
    fn kind(&self) -> &'static str {
        "bus"
    }

    fn compile(&self, ctx: &CompileContext) -> FlowResult<UnitDescription> {
        let count = ctx
            .groups()
            .iter()
            .map(|group| Expr::active_count(group.state.as_str()))
            .reduce(Expr::add)
            .unwrap_or(Expr::constant(0.0));

        // State blocks of owned groups are attached by the surface
        Ok(ctx
            .builder()
            .output(output_slot(ctx, &self.output)?, count)
            .build())
    }
}
