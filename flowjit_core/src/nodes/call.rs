use super::{input_slot, output_slot};
use crate::codegen::{Expr, GlobalRef, UnitDescription};
use crate::error::FlowResult;
use crate::graph::{CompileContext, NodeId, NodeLogic};

/// Node calling a function exported by another node:
/// `output = target.function(inputs...)`
#[derive(Debug, Clone)]
pub struct CallNode {
    target: NodeId,
    function: String,
    inputs: Vec<String>,
    output: String,
}

impl CallNode {
    pub fn new(target: NodeId, function: &str, output: &str) -> Self {
        Self {
            target,
            function: function.to_string(),
            inputs: Vec::new(),
            output: output.to_string(),
        }
    }

    /// Append an argument read from the named control
    pub fn input(mut self, control: &str) -> Self {
        self.inputs.push(control.to_string());
        self
    }

    pub fn target(&self) -> GlobalRef {
        GlobalRef::new(self.target.unit_name(), self.function.as_str())
    }
}

impl NodeLogic for CallNode {
    fn kind(&self) -> &'static str {
        "call"
    }

    fn compile(&self, ctx: &CompileContext) -> FlowResult<UnitDescription> {
        let args = self
            .inputs
            .iter()
            .map(|name| input_slot(ctx, name).map(Expr::control))
            .collect::<FlowResult<Vec<_>>>()?;
        let slot = output_slot(ctx, &self.output)?;
        Ok(ctx
            .builder()
            .output(slot, Expr::call(self.target(), args))
            .build())
    }
}
