use std::fmt;

/// Reference to a global exported by a compiled unit.
///
/// Units export functions and state blocks under a mangled name made from
/// the unit name and the local name, so a reference stays valid across
/// recompiles of the same unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalRef {
    pub unit: String,
    pub name: String,
}

impl GlobalRef {
    pub fn new(unit: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            name: name.into(),
        }
    }

    /// Symbol name the global is exported under
    pub fn mangled(&self) -> String {
        mangle(&self.unit, &self.name)
    }
}

impl fmt::Display for GlobalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.unit, self.name)
    }
}

/// Build the exported symbol name for a global of `unit`
pub fn mangle(unit: &str, local: &str) -> String {
    format!("{}.{}", unit, local)
}

/// Values published by the host that every unit can read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostGlobal {
    SampleRate,
    Bpm,
}

impl HostGlobal {
    pub const ALL: [HostGlobal; 2] = [HostGlobal::SampleRate, HostGlobal::Bpm];

    /// Local name inside the host globals unit
    pub fn local_name(&self) -> &'static str {
        match self {
            HostGlobal::SampleRate => "sample_rate",
            HostGlobal::Bpm => "bpm",
        }
    }

    pub fn global_ref(&self) -> GlobalRef {
        GlobalRef::new(HOST_UNIT, self.local_name())
    }
}

/// Unit name of the module holding the host globals
pub const HOST_UNIT: &str = "rt";

/// Numeric intrinsics called by name.
///
/// All take and return `f32`, except `Rand` which takes nothing and returns a
/// C `int` in `0..=i32::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Pow,
    Exp,
    Log,
    Log2,
    Log10,
    Logb,
    Hypot,
    Sqrt,
    Ceil,
    Floor,
    Round,
    Trunc,
    Fmin,
    Fmax,
    Fmod,
    Rand,
}

impl Intrinsic {
    pub const ALL: [Intrinsic; 23] = [
        Intrinsic::Sin,
        Intrinsic::Cos,
        Intrinsic::Tan,
        Intrinsic::Asin,
        Intrinsic::Acos,
        Intrinsic::Atan,
        Intrinsic::Atan2,
        Intrinsic::Pow,
        Intrinsic::Exp,
        Intrinsic::Log,
        Intrinsic::Log2,
        Intrinsic::Log10,
        Intrinsic::Logb,
        Intrinsic::Hypot,
        Intrinsic::Sqrt,
        Intrinsic::Ceil,
        Intrinsic::Floor,
        Intrinsic::Round,
        Intrinsic::Trunc,
        Intrinsic::Fmin,
        Intrinsic::Fmax,
        Intrinsic::Fmod,
        Intrinsic::Rand,
    ];

    /// C symbol name the intrinsic links against
    pub fn symbol_name(&self) -> &'static str {
        match self {
            Intrinsic::Sin => "sinf",
            Intrinsic::Cos => "cosf",
            Intrinsic::Tan => "tanf",
            Intrinsic::Asin => "asinf",
            Intrinsic::Acos => "acosf",
            Intrinsic::Atan => "atanf",
            Intrinsic::Atan2 => "atan2f",
            Intrinsic::Pow => "powf",
            Intrinsic::Exp => "expf",
            Intrinsic::Log => "logf",
            Intrinsic::Log2 => "log2f",
            Intrinsic::Log10 => "log10f",
            Intrinsic::Logb => "logbf",
            Intrinsic::Hypot => "hypotf",
            Intrinsic::Sqrt => "sqrtf",
            Intrinsic::Ceil => "ceilf",
            Intrinsic::Floor => "floorf",
            Intrinsic::Round => "roundf",
            Intrinsic::Trunc => "truncf",
            Intrinsic::Fmin => "fminf",
            Intrinsic::Fmax => "fmaxf",
            Intrinsic::Fmod => "fmodf",
            Intrinsic::Rand => "rand",
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Intrinsic::Rand => 0,
            Intrinsic::Atan2
            | Intrinsic::Pow
            | Intrinsic::Hypot
            | Intrinsic::Fmin
            | Intrinsic::Fmax
            | Intrinsic::Fmod => 2,
            _ => 1,
        }
    }

    /// Whether the result is a C `int` rather than an `f32`
    pub fn returns_int(&self) -> bool {
        matches!(self, Intrinsic::Rand)
    }

    pub fn from_symbol(name: &str) -> Option<Intrinsic> {
        Self::ALL.iter().copied().find(|i| i.symbol_name() == name)
    }
}

/// Target of a call expression
#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    /// Numeric intrinsic resolved by its C name
    Intrinsic(Intrinsic),
    /// `extern "C" fn(f32...) -> f32` exported by another unit
    Global(GlobalRef),
}

/// Binary arithmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
}

/// Unary arithmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Abs,
    Sqrt,
    Floor,
    Ceil,
    /// Round half to even
    Nearest,
    Trunc,
}

/// Comparison producing `1.0` or `0.0`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Expression over `f32` values.
///
/// Truth values are floats: anything non-zero is true, comparisons yield
/// `1.0`/`0.0`.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant value
    Const(f32),

    /// Current value of the control at this index (process entry only)
    Control(usize),

    /// Function argument (exported functions only)
    Arg(usize),

    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },

    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    /// `cond != 0 ? then : otherwise`
    Select {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },

    Call {
        callee: Callee,
        args: Vec<Expr>,
    },

    /// Host global published by the runtime
    Global(HostGlobal),

    /// `1.0` when bit `lane` of the first word of a state block is set
    LaneActive {
        state: String,
        lane: u32,
    },

    /// Number of set bits in the first word of a state block
    ActiveCount {
        state: String,
    },
}

impl Expr {
    pub fn constant(value: f32) -> Self {
        Expr::Const(value)
    }

    pub fn control(index: usize) -> Self {
        Expr::Control(index)
    }

    pub fn arg(index: usize) -> Self {
        Expr::Arg(index)
    }

    pub fn unary(op: UnaryOp, expr: Expr) -> Self {
        Expr::Unary {
            op,
            expr: Box::new(expr),
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn sub(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Sub, lhs, rhs)
    }

    pub fn mul(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Mul, lhs, rhs)
    }

    pub fn div(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Div, lhs, rhs)
    }

    pub fn compare(op: CompareOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn select(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::Select {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn intrinsic(intrinsic: Intrinsic, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: Callee::Intrinsic(intrinsic),
            args,
        }
    }

    pub fn call(target: GlobalRef, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: Callee::Global(target),
            args,
        }
    }

    pub fn lane_active(state: impl Into<String>, lane: u32) -> Self {
        Expr::LaneActive {
            state: state.into(),
            lane,
        }
    }

    pub fn active_count(state: impl Into<String>) -> Self {
        Expr::ActiveCount {
            state: state.into(),
        }
    }

    /// Visit this expression and every sub-expression, parents first
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::Unary { expr, .. } => expr.walk(visit),
            Expr::Binary { lhs, rhs, .. } | Expr::Compare { lhs, rhs, .. } => {
                lhs.walk(visit);
                rhs.walk(visit);
            }
            Expr::Select {
                cond,
                then,
                otherwise,
            } => {
                cond.walk(visit);
                then.walk(visit);
                otherwise.walk(visit);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.walk(visit);
                }
            }
            Expr::Const(_)
            | Expr::Control(_)
            | Expr::Arg(_)
            | Expr::Global(_)
            | Expr::LaneActive { .. }
            | Expr::ActiveCount { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intrinsic_table_is_consistent() {
        for intrinsic in Intrinsic::ALL {
            assert_eq!(
                Intrinsic::from_symbol(intrinsic.symbol_name()),
                Some(intrinsic)
            );
        }
        assert_eq!(Intrinsic::Rand.arity(), 0);
        assert_eq!(Intrinsic::Pow.arity(), 2);
        assert_eq!(Intrinsic::Sin.arity(), 1);
        assert_eq!(Intrinsic::from_symbol("sin"), None);
    }

    #[test]
    fn test_walk_visits_every_node() {
        let expr = Expr::select(
            Expr::lane_active("g1", 2),
            Expr::intrinsic(Intrinsic::Pow, vec![Expr::control(0), Expr::constant(2.0)]),
            Expr::call(GlobalRef::new("n3", "gain"), vec![Expr::arg(1)]),
        );
        let mut count = 0;
        expr.walk(&mut |_| count += 1);
        assert_eq!(count, 7);
    }

    #[test]
    fn test_mangling() {
        assert_eq!(GlobalRef::new("n7", "process").mangled(), "n7.process");
        assert_eq!(HostGlobal::Bpm.global_ref().mangled(), "rt.bpm");
    }
}
