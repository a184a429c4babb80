// Validation of codegen descriptions and collection of imports/exports
use super::symbol::SymbolKind;
use crate::codegen::{Callee, Expr, GlobalRef, UnitDescription, HOST_UNIT, PROCESS_ENTRY};
use crate::error::{FlowError, FlowResult};
use std::collections::{BTreeMap, BTreeSet};

/// Highest lane index a state word can address
pub const MAX_LANE: u32 = 31;

/// Symbol the module needs from outside
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportKind {
    /// Function taking `params` f32 values, returning f32 (or C int)
    Function { params: usize, returns_int: bool },
    /// Data read as one f32
    Data,
}

/// A symbol the module defines and publishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub local: String,
    pub name: String,
    pub kind: SymbolKind,
}

/// A validated description ready for [`JitEngine::add_module`].
///
/// [`JitEngine::add_module`]: super::JitEngine::add_module
#[derive(Debug, Clone)]
pub struct ModulePlan {
    desc: UnitDescription,
    imports: BTreeMap<String, ImportKind>,
    exports: Vec<Export>,
}

impl ModulePlan {
    pub fn unit(&self) -> &str {
        &self.desc.unit
    }

    pub fn description(&self) -> &UnitDescription {
        &self.desc
    }

    pub fn imports(&self) -> &BTreeMap<String, ImportKind> {
        &self.imports
    }

    pub fn exports(&self) -> &[Export] {
        &self.exports
    }

    pub fn export_names(&self) -> impl Iterator<Item = &str> {
        self.exports.iter().map(|e| e.name.as_str())
    }
}

/// Where an expression is evaluated, which decides what it may reference
#[derive(Clone, Copy)]
enum Scope {
    Process { controls: usize },
    Function { arity: usize },
}

/// Validate a description and compute what it imports and exports.
///
/// Violations are codegen contract errors: the description references a
/// control, argument or state block it does not have.
pub fn plan(desc: UnitDescription) -> FlowResult<ModulePlan> {
    let unit = desc.unit.clone();
    let fail = |message: String| FlowError::codegen(unit.clone(), message);

    if unit.is_empty() || unit.contains('.') {
        return Err(fail(format!("invalid unit name '{}'", unit)));
    }

    let mut exports = Vec::new();
    let mut locals = BTreeSet::new();
    let mut claim = |local: &str, kind: SymbolKind| -> FlowResult<()> {
        if !locals.insert(local.to_string()) {
            return Err(FlowError::codegen(
                desc.unit.clone(),
                format!("'{}' is defined more than once", local),
            ));
        }
        exports.push(Export {
            local: local.to_string(),
            name: desc.mangled(local),
            kind,
        });
        Ok(())
    };

    if desc.process.is_some() {
        claim(PROCESS_ENTRY, SymbolKind::Function)?;
    }
    for function in &desc.functions {
        claim(&function.name, SymbolKind::Function)?;
    }
    for state in &desc.state {
        if state.initial.is_empty() {
            return Err(fail(format!("state block '{}' has no words", state.name)));
        }
        claim(&state.name, SymbolKind::Data)?;
    }

    let mut imports = BTreeMap::new();
    let mut checker = Checker {
        desc: &desc,
        imports: &mut imports,
    };

    if let Some(process) = &desc.process {
        let scope = Scope::Process {
            controls: process.control_count,
        };
        for (slot, value) in &process.outputs {
            if *slot >= process.control_count {
                return Err(fail(format!(
                    "output slot {} outside {} controls",
                    slot, process.control_count
                )));
            }
            checker.check(value, scope)?;
        }
    }
    for function in &desc.functions {
        checker.check(
            &function.body,
            Scope::Function {
                arity: function.arity,
            },
        )?;
    }

    Ok(ModulePlan {
        desc,
        imports,
        exports,
    })
}

struct Checker<'a> {
    desc: &'a UnitDescription,
    imports: &'a mut BTreeMap<String, ImportKind>,
}

impl Checker<'_> {
    fn fail(&self, message: String) -> FlowError {
        FlowError::codegen(self.desc.unit.clone(), message)
    }

    fn import(&mut self, name: String, kind: ImportKind) -> FlowResult<()> {
        match self.imports.get(&name) {
            Some(existing) if *existing != kind => Err(self.fail(format!(
                "'{}' imported with conflicting signatures",
                name
            ))),
            Some(_) => Ok(()),
            None => {
                self.imports.insert(name, kind);
                Ok(())
            }
        }
    }

    fn check_state(&self, state: &str) -> FlowResult<()> {
        if self.desc.state_def(state).is_none() {
            return Err(self.fail(format!("unknown state block '{}'", state)));
        }
        Ok(())
    }

    fn check_local_call(&self, target: &GlobalRef, args: usize) -> FlowResult<()> {
        match self.desc.functions.iter().find(|f| f.name == target.name) {
            Some(function) if function.arity == args => Ok(()),
            Some(function) => Err(self.fail(format!(
                "'{}' takes {} arguments, called with {}",
                target, function.arity, args
            ))),
            None => Err(self.fail(format!("call to undefined local function '{}'", target))),
        }
    }

    fn check(&mut self, expr: &Expr, scope: Scope) -> FlowResult<()> {
        let mut nodes = Vec::new();
        expr.walk(&mut |e| nodes.push(e));

        for node in nodes {
            match node {
                Expr::Control(index) => match scope {
                    Scope::Process { controls } if *index < controls => {}
                    Scope::Process { controls } => {
                        return Err(self.fail(format!(
                            "control {} outside {} controls",
                            index, controls
                        )))
                    }
                    Scope::Function { .. } => {
                        return Err(self.fail(format!(
                            "control {} referenced outside the process entry",
                            index
                        )))
                    }
                },
                Expr::Arg(index) => match scope {
                    Scope::Function { arity } if *index < arity => {}
                    Scope::Function { arity } => {
                        return Err(self.fail(format!(
                            "argument {} outside arity {}",
                            index, arity
                        )))
                    }
                    Scope::Process { .. } => {
                        return Err(self.fail(format!(
                            "argument {} referenced in the process entry",
                            index
                        )))
                    }
                },
                Expr::LaneActive { state, lane } => {
                    self.check_state(state)?;
                    if *lane > MAX_LANE {
                        return Err(self.fail(format!("lane {} out of range", lane)));
                    }
                }
                Expr::ActiveCount { state } => self.check_state(state)?,
                Expr::Global(global) => {
                    if self.desc.unit == HOST_UNIT {
                        return Err(self.fail("host unit cannot read host globals".into()));
                    }
                    self.import(global.global_ref().mangled(), ImportKind::Data)?;
                }
                Expr::Call { callee, args } => match callee {
                    Callee::Intrinsic(intrinsic) => {
                        if args.len() != intrinsic.arity() {
                            return Err(self.fail(format!(
                                "{} takes {} arguments, called with {}",
                                intrinsic.symbol_name(),
                                intrinsic.arity(),
                                args.len()
                            )));
                        }
                        self.import(
                            intrinsic.symbol_name().to_string(),
                            ImportKind::Function {
                                params: intrinsic.arity(),
                                returns_int: intrinsic.returns_int(),
                            },
                        )?;
                    }
                    Callee::Global(target) if target.unit == self.desc.unit => {
                        self.check_local_call(target, args.len())?;
                    }
                    Callee::Global(target) => {
                        self.import(
                            target.mangled(),
                            ImportKind::Function {
                                params: args.len(),
                                returns_int: false,
                            },
                        )?;
                    }
                },
                Expr::Const(_)
                | Expr::Unary { .. }
                | Expr::Binary { .. }
                | Expr::Compare { .. }
                | Expr::Select { .. } => {}
            }
        }
        Ok(())
    }
}
