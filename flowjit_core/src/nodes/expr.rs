use super::output_slot;
use crate::codegen::{Expr, UnitDescription};
use crate::error::FlowResult;
use crate::graph::{CompileContext, NodeLogic};

/// Node whose outputs are expressions over its controls.
///
/// Expressions refer to controls by slot ([`Expr::control`]); outputs are
/// named so they survive reordering elsewhere on the node.
///
/// # Example
/// ```ignore
/// use flowjit_core::codegen::Expr;
/// use flowjit_core::nodes::ExprNode;
///
/// // out = in * 0.5, and export `half(x)` for other nodes
/// let logic = ExprNode::new()
///     .output("out", Expr::mul(Expr::control(0), Expr::constant(0.5)))
///     .function("half", 1, Expr::mul(Expr::arg(0), Expr::constant(0.5)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ExprNode {
    outputs: Vec<(String, Expr)>,
    functions: Vec<(String, usize, Expr)>,
}

impl ExprNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(mut self, control: &str, value: Expr) -> Self {
        self.outputs.push((control.to_string(), value));
        self
    }

    pub fn function(mut self, name: &str, arity: usize, body: Expr) -> Self {
        self.functions.push((name.to_string(), arity, body));
        self
    }
}

impl NodeLogic for ExprNode {
    fn kind(&self) -> &'static str {
        "expr"
    }

    fn compile(&self, ctx: &CompileContext) -> FlowResult<UnitDescription> {
        let mut builder = ctx.builder();
        for (control, value) in &self.outputs {
            builder = builder.output(output_slot(ctx, control)?, value.clone());
        }
        for (name, arity, body) in &self.functions {
            builder = builder.function(name, *arity, body.clone());
        }
        Ok(builder.build())
    }
}
