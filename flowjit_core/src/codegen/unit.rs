use super::expr::{mangle, Expr, GlobalRef};

/// Name of the exported process entry of every unit
pub const PROCESS_ENTRY: &str = "process";

/// Backend-agnostic description of one compiled unit.
///
/// Produced by a node's logic, consumed by the planner in [`crate::jit`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UnitDescription {
    /// Unit name, prefix of every exported symbol
    pub unit: String,
    /// Process entry writing output controls
    pub process: Option<ProcessDef>,
    /// Exported scalar functions
    pub functions: Vec<FunctionDef>,
    /// Writable runtime-state blocks
    pub state: Vec<StateDef>,
}

/// The `extern "C" fn(*mut f32)` process entry.
///
/// The argument points at one `f32` slot per control, in control order.
/// Outputs are stored back into their slot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessDef {
    /// Number of control slots the entry may touch
    pub control_count: usize,
    /// (control index, value) pairs, evaluated in order
    pub outputs: Vec<(usize, Expr)>,
}

/// An exported `extern "C" fn(f32 × arity) -> f32`
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub arity: usize,
    pub body: Expr,
}

/// Block of 32-bit words the host can rewrite while the code runs
#[derive(Debug, Clone, PartialEq)]
pub struct StateDef {
    pub name: String,
    pub initial: Vec<u32>,
}

impl StateDef {
    pub fn new(name: impl Into<String>, words: usize) -> Self {
        Self {
            name: name.into(),
            initial: vec![0; words.max(1)],
        }
    }

    pub fn with_initial(name: impl Into<String>, initial: Vec<u32>) -> Self {
        let mut def = Self {
            name: name.into(),
            initial,
        };
        if def.initial.is_empty() {
            def.initial.push(0);
        }
        def
    }

    pub fn words(&self) -> usize {
        self.initial.len()
    }
}

impl UnitDescription {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            ..Self::default()
        }
    }

    pub fn builder(unit: impl Into<String>) -> UnitBuilder {
        UnitBuilder::new(unit)
    }

    /// Reference to a global of this unit
    pub fn global(&self, local: &str) -> GlobalRef {
        GlobalRef::new(self.unit.clone(), local)
    }

    /// Exported symbol name of a local global
    pub fn mangled(&self, local: &str) -> String {
        mangle(&self.unit, local)
    }

    pub fn state_def(&self, name: &str) -> Option<&StateDef> {
        self.state.iter().find(|s| s.name == name)
    }

    /// Add a state block unless one with the same name exists
    pub fn ensure_state(&mut self, def: StateDef) {
        match self.state.iter_mut().find(|s| s.name == def.name) {
            Some(existing) => {
                if existing.initial.len() < def.initial.len() {
                    existing.initial.resize(def.initial.len(), 0);
                }
                existing.initial[..def.initial.len()].copy_from_slice(&def.initial);
            }
            None => self.state.push(def),
        }
    }
}

/// Fluent builder for [`UnitDescription`]
///
/// # Example
/// ```ignore
/// use flowjit_core::codegen::{Expr, UnitDescription};
///
/// // out = in * 0.5, plus an exported helper `twice(x) = x + x`
/// let desc = UnitDescription::builder("n1")
///     .controls(2)
///     .output(1, Expr::mul(Expr::control(0), Expr::constant(0.5)))
///     .function("twice", 1, Expr::add(Expr::arg(0), Expr::arg(0)))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct UnitBuilder {
    desc: UnitDescription,
}

impl UnitBuilder {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            desc: UnitDescription::new(unit),
        }
    }

    /// Declare a process entry over `count` control slots
    pub fn controls(mut self, count: usize) -> Self {
        self.desc
            .process
            .get_or_insert_with(ProcessDef::default)
            .control_count = count;
        self
    }

    /// Compute an output control
    pub fn output(mut self, control: usize, value: Expr) -> Self {
        self.desc
            .process
            .get_or_insert_with(ProcessDef::default)
            .outputs
            .push((control, value));
        self
    }

    pub fn function(mut self, name: &str, arity: usize, body: Expr) -> Self {
        self.desc.functions.push(FunctionDef {
            name: name.to_string(),
            arity,
            body,
        });
        self
    }

    pub fn state(mut self, name: &str, words: usize) -> Self {
        self.desc.state.push(StateDef::new(name, words));
        self
    }

    pub fn build(self) -> UnitDescription {
        self.desc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let desc = UnitDescription::builder("n1")
            .controls(2)
            .output(1, Expr::mul(Expr::control(0), Expr::constant(0.5)))
            .function("twice", 1, Expr::add(Expr::arg(0), Expr::arg(0)))
            .state("mode", 2)
            .build();

        let process = desc.process.as_ref().unwrap();
        assert_eq!(process.control_count, 2);
        assert_eq!(process.outputs.len(), 1);
        assert_eq!(desc.functions[0].name, "twice");
        assert_eq!(desc.state_def("mode").unwrap().words(), 2);
        assert_eq!(desc.mangled("twice"), "n1.twice");
    }

    #[test]
    fn test_ensure_state_overwrites_initial() {
        let mut desc = UnitDescription::builder("n1").state("g4", 1).build();
        desc.ensure_state(StateDef::with_initial("g4", vec![0b101]));
        desc.ensure_state(StateDef::with_initial("g5", vec![]));

        assert_eq!(desc.state.len(), 2);
        assert_eq!(desc.state_def("g4").unwrap().initial, vec![0b101]);
        assert_eq!(desc.state_def("g5").unwrap().initial, vec![0]);
    }
}
