// Lowering of planned descriptions into Cranelift IR
use super::plan::{Export, ImportKind, ModulePlan};
use super::symbol::SymbolKind;
use crate::codegen::{
    mangle, BinaryOp, Callee, CompareOp, Expr, FunctionDef, ProcessDef, UnaryOp, PROCESS_ENTRY,
};
use crate::error::{FlowError, FlowResult};
use cranelift::prelude::*;
use cranelift_jit::JITModule;
use cranelift_module::{DataDescription, DataId, FuncId, Linkage, Module};
use std::collections::HashMap;

/// Every symbol declared in one module, by mangled name
#[derive(Default)]
struct Declarations {
    funcs: HashMap<String, FuncId>,
    data: HashMap<String, DataId>,
    int_returns: HashMap<String, bool>,
}

/// Ids of the definitions a module exports
pub(crate) enum Defined {
    Function(FuncId),
    Data(DataId),
}

/// Declare imports, define state data and compile every function of `plan`
/// into `module`. Does not finalize.
pub(crate) fn define(
    module: &mut JITModule,
    plan: &ModulePlan,
) -> FlowResult<Vec<(Export, Defined)>> {
    let desc = plan.description();
    let unit = desc.unit.as_str();
    let mut decls = Declarations::default();

    for (name, kind) in plan.imports() {
        match kind {
            ImportKind::Function {
                params,
                returns_int,
            } => {
                let sig = scalar_signature(module, *params, *returns_int);
                let id = module
                    .declare_function(name, Linkage::Import, &sig)
                    .map_err(|e| FlowError::link(unit, format!("Failed to declare '{}': {}", name, e)))?;
                decls.funcs.insert(name.clone(), id);
                decls.int_returns.insert(name.clone(), *returns_int);
            }
            ImportKind::Data => {
                let id = module
                    .declare_data(name, Linkage::Import, false, false)
                    .map_err(|e| FlowError::link(unit, format!("Failed to declare '{}': {}", name, e)))?;
                decls.data.insert(name.clone(), id);
            }
        }
    }

    let mut defined = Vec::new();

    for state in &desc.state {
        let name = mangle(unit, &state.name);
        let id = module
            .declare_data(&name, Linkage::Export, true, false)
            .map_err(|e| FlowError::link(unit, format!("Failed to declare '{}': {}", name, e)))?;

        let bytes: Vec<u8> = state.initial.iter().flat_map(|w| w.to_ne_bytes()).collect();
        let mut data = DataDescription::new();
        data.define(bytes.into_boxed_slice());
        data.set_align(8);
        module
            .define_data(id, &data)
            .map_err(|e| FlowError::link(unit, format!("Failed to define '{}': {}", name, e)))?;
        decls.data.insert(name, id);
    }

    // Declare all local functions first so they can call each other
    let mut process_id = None;
    if desc.process.is_some() {
        let mut sig = module.make_signature();
        sig.params
            .push(AbiParam::new(module.target_config().pointer_type()));
        let name = mangle(unit, PROCESS_ENTRY);
        let id = module
            .declare_function(&name, Linkage::Export, &sig)
            .map_err(|e| FlowError::link(unit, format!("Failed to declare '{}': {}", name, e)))?;
        decls.funcs.insert(name, id);
        process_id = Some((id, sig));
    }
    let mut function_ids = Vec::new();
    for function in &desc.functions {
        let sig = scalar_signature(module, function.arity, false);
        let name = mangle(unit, &function.name);
        let id = module
            .declare_function(&name, Linkage::Export, &sig)
            .map_err(|e| FlowError::link(unit, format!("Failed to declare '{}': {}", name, e)))?;
        decls.funcs.insert(name.clone(), id);
        decls.int_returns.insert(name, false);
        function_ids.push((id, sig));
    }

    let mut ctx = module.make_context();
    let mut func_ctx = FunctionBuilderContext::new();

    if let (Some(process), Some((id, sig))) = (&desc.process, process_id) {
        ctx.func.signature = sig;
        lower_process(module, &mut ctx.func, &mut func_ctx, &decls, unit, process)?;
        module
            .define_function(id, &mut ctx)
            .map_err(|e| FlowError::link(unit, format!("Failed to define process: {}", e)))?;
        module.clear_context(&mut ctx);
    }

    for (function, (id, sig)) in desc.functions.iter().zip(function_ids) {
        ctx.func.signature = sig;
        lower_function(module, &mut ctx.func, &mut func_ctx, &decls, unit, function)?;
        module.define_function(id, &mut ctx).map_err(|e| {
            FlowError::link(unit, format!("Failed to define '{}': {}", function.name, e))
        })?;
        module.clear_context(&mut ctx);
    }

    for export in plan.exports() {
        let id = match export.kind {
            SymbolKind::Function => decls.funcs.get(&export.name).copied().map(Defined::Function),
            SymbolKind::Data => decls.data.get(&export.name).copied().map(Defined::Data),
        }
        .ok_or_else(|| FlowError::internal(format!("export '{}' was not declared", export.name)))?;
        defined.push((export.clone(), id));
    }

    Ok(defined)
}

/// `fn(f32 × params) -> f32` (or `-> i32` for C int results)
fn scalar_signature(module: &JITModule, params: usize, returns_int: bool) -> Signature {
    let mut sig = module.make_signature();
    for _ in 0..params {
        sig.params.push(AbiParam::new(types::F32));
    }
    let ret = if returns_int { types::I32 } else { types::F32 };
    sig.returns.push(AbiParam::new(ret));
    sig
}

fn lower_process(
    module: &mut JITModule,
    func: &mut codegen::ir::Function,
    func_ctx: &mut FunctionBuilderContext,
    decls: &Declarations,
    unit: &str,
    process: &ProcessDef,
) -> FlowResult<()> {
    let ptr_type = module.target_config().pointer_type();
    let mut builder = FunctionBuilder::new(func, func_ctx);

    let entry_block = builder.create_block();
    builder.append_block_params_for_function_params(entry_block);
    builder.switch_to_block(entry_block);
    builder.seal_block(entry_block);
    let slots = builder.block_params(entry_block)[0];

    {
        let mut translator = Translator {
            builder: &mut builder,
            module,
            decls,
            unit,
            ptr_type,
            slots: Some(slots),
            args: Vec::new(),
        };
        for (slot, value) in &process.outputs {
            let result = translator.translate(value)?;
            translator
                .builder
                .ins()
                .store(MemFlags::trusted(), result, slots, slot_offset(*slot)?);
        }
    }

    builder.ins().return_(&[]);
    builder.finalize();
    Ok(())
}

fn lower_function(
    module: &mut JITModule,
    func: &mut codegen::ir::Function,
    func_ctx: &mut FunctionBuilderContext,
    decls: &Declarations,
    unit: &str,
    function: &FunctionDef,
) -> FlowResult<()> {
    let ptr_type = module.target_config().pointer_type();
    let mut builder = FunctionBuilder::new(func, func_ctx);

    let entry_block = builder.create_block();
    builder.append_block_params_for_function_params(entry_block);
    builder.switch_to_block(entry_block);
    builder.seal_block(entry_block);
    let args = builder.block_params(entry_block).to_vec();

    let result = {
        let mut translator = Translator {
            builder: &mut builder,
            module,
            decls,
            unit,
            ptr_type,
            slots: None,
            args,
        };
        translator.translate(&function.body)?
    };

    builder.ins().return_(&[result]);
    builder.finalize();
    Ok(())
}

fn slot_offset(slot: usize) -> FlowResult<i32> {
    i32::try_from(slot * std::mem::size_of::<f32>())
        .map_err(|_| FlowError::invalid_input(format!("control slot {} too large", slot)))
}

/// Recursive expression lowering for one function body
struct Translator<'a, 'b> {
    builder: &'a mut FunctionBuilder<'b>,
    module: &'a mut JITModule,
    decls: &'a Declarations,
    unit: &'a str,
    ptr_type: Type,
    slots: Option<Value>,
    args: Vec<Value>,
}

impl Translator<'_, '_> {
    fn missing(&self, what: String) -> FlowError {
        FlowError::internal(format!("{}: {} missing during lowering", self.unit, what))
    }

    fn translate(&mut self, expr: &Expr) -> FlowResult<Value> {
        match expr {
            Expr::Const(value) => Ok(self.builder.ins().f32const(*value)),

            Expr::Control(index) => {
                let slots = self
                    .slots
                    .ok_or_else(|| self.missing("control buffer".into()))?;
                Ok(self.builder.ins().load(
                    types::F32,
                    MemFlags::trusted(),
                    slots,
                    slot_offset(*index)?,
                ))
            }

            Expr::Arg(index) => self
                .args
                .get(*index)
                .copied()
                .ok_or_else(|| self.missing(format!("argument {}", index))),

            Expr::Unary { op, expr: inner } => {
                let value = self.translate(inner)?;
                let ins = self.builder.ins();
                Ok(match op {
                    UnaryOp::Neg => ins.fneg(value),
                    UnaryOp::Abs => ins.fabs(value),
                    UnaryOp::Sqrt => ins.sqrt(value),
                    UnaryOp::Floor => ins.floor(value),
                    UnaryOp::Ceil => ins.ceil(value),
                    UnaryOp::Nearest => ins.nearest(value),
                    UnaryOp::Trunc => ins.trunc(value),
                })
            }

            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.translate(lhs)?;
                let rhs = self.translate(rhs)?;
                let ins = self.builder.ins();
                Ok(match op {
                    BinaryOp::Add => ins.fadd(lhs, rhs),
                    BinaryOp::Sub => ins.fsub(lhs, rhs),
                    BinaryOp::Mul => ins.fmul(lhs, rhs),
                    BinaryOp::Div => ins.fdiv(lhs, rhs),
                    BinaryOp::Min => ins.fmin(lhs, rhs),
                    BinaryOp::Max => ins.fmax(lhs, rhs),
                })
            }

            Expr::Compare { op, lhs, rhs } => {
                let lhs = self.translate(lhs)?;
                let rhs = self.translate(rhs)?;
                let cc = match op {
                    CompareOp::Eq => FloatCC::Equal,
                    CompareOp::Ne => FloatCC::NotEqual,
                    CompareOp::Lt => FloatCC::LessThan,
                    CompareOp::Le => FloatCC::LessThanOrEqual,
                    CompareOp::Gt => FloatCC::GreaterThan,
                    CompareOp::Ge => FloatCC::GreaterThanOrEqual,
                };
                let flag = self.builder.ins().fcmp(cc, lhs, rhs);
                Ok(self.bool_to_float(flag))
            }

            // Both arms are evaluated; only the result is selected
            Expr::Select {
                cond,
                then,
                otherwise,
            } => {
                let cond = self.translate(cond)?;
                let then = self.translate(then)?;
                let otherwise = self.translate(otherwise)?;
                let zero = self.builder.ins().f32const(0.0);
                let flag = self.builder.ins().fcmp(FloatCC::NotEqual, cond, zero);
                Ok(self.builder.ins().select(flag, then, otherwise))
            }

            Expr::Call { callee, args } => {
                let name = match callee {
                    Callee::Intrinsic(intrinsic) => intrinsic.symbol_name().to_string(),
                    Callee::Global(target) => target.mangled(),
                };
                let func_id = *self
                    .decls
                    .funcs
                    .get(&name)
                    .ok_or_else(|| self.missing(format!("function '{}'", name)))?;
                let returns_int = self.decls.int_returns.get(&name).copied().unwrap_or(false);

                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.translate(arg)?);
                }

                let func_ref = self
                    .module
                    .declare_func_in_func(func_id, self.builder.func);
                let call = self.builder.ins().call(func_ref, &values);
                let result = self.builder.inst_results(call)[0];
                if returns_int {
                    Ok(self.builder.ins().fcvt_from_sint(types::F32, result))
                } else {
                    Ok(result)
                }
            }

            Expr::Global(global) => {
                let address = self.data_address(&global.global_ref().mangled())?;
                Ok(self
                    .builder
                    .ins()
                    .load(types::F32, MemFlags::trusted(), address, 0))
            }

            Expr::LaneActive { state, lane } => {
                let word = self.state_word(state)?;
                let shifted = self.builder.ins().ushr_imm(word, i64::from(*lane));
                let bit = self.builder.ins().band_imm(shifted, 1);
                Ok(self.builder.ins().fcvt_from_uint(types::F32, bit))
            }

            Expr::ActiveCount { state } => {
                let word = self.state_word(state)?;
                let count = self.builder.ins().popcnt(word);
                Ok(self.builder.ins().fcvt_from_uint(types::F32, count))
            }
        }
    }

    fn bool_to_float(&mut self, flag: Value) -> Value {
        let one = self.builder.ins().f32const(1.0);
        let zero = self.builder.ins().f32const(0.0);
        self.builder.ins().select(flag, one, zero)
    }

    fn data_address(&mut self, name: &str) -> FlowResult<Value> {
        let data_id = *self
            .decls
            .data
            .get(name)
            .ok_or_else(|| self.missing(format!("data '{}'", name)))?;
        let global = self.module.declare_data_in_func(data_id, self.builder.func);
        Ok(self.builder.ins().symbol_value(self.ptr_type, global))
    }

    /// Current first word of a local state block
    fn state_word(&mut self, state: &str) -> FlowResult<Value> {
        let address = self.data_address(&mangle(self.unit, state))?;
        Ok(self
            .builder
            .ins()
            .load(types::I32, MemFlags::trusted(), address, 0))
    }
}
