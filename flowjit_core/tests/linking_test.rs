// Import resolution through layered resolvers
use approx::assert_relative_eq;
use flowjit_core::codegen::{Expr, Intrinsic, UnitDescription};
use flowjit_core::jit::{
    plan, FallbackSymbols, InstalledSymbols, LayeredResolver, ModulePlan, SymbolAddress,
    SymbolResolver,
};
use flowjit_core::{FlowError, JitEngine, RuntimeConfig};
use std::f32::consts::FRAC_PI_2;

type Unary = extern "C" fn(f32) -> f32;
type Binary = extern "C" fn(f32, f32) -> f32;

/// Resolves a single name to a host function
struct Override {
    name: &'static str,
    address: SymbolAddress,
}

impl SymbolResolver for Override {
    fn layer(&self) -> &'static str {
        "override"
    }

    fn resolve(&self, name: &str) -> Option<SymbolAddress> {
        (name == self.name).then_some(self.address)
    }
}

extern "C" fn constant_sine(_: f32) -> f32 {
    42.0
}

fn fallback_engine() -> JitEngine {
    JitEngine::with_resolver(&RuntimeConfig::default(), |table| {
        Ok(LayeredResolver::new()
            .with_layer(InstalledSymbols::new(table))
            .with_layer(FallbackSymbols))
    })
    .unwrap()
}

fn wave_unit(unit: &str) -> ModulePlan {
    plan(
        UnitDescription::builder(unit)
            .function(
                "wave",
                1,
                Expr::intrinsic(Intrinsic::Sin, vec![Expr::arg(0)]),
            )
            .build(),
    )
    .unwrap()
}

#[test]
fn test_fallback_table_resolves_sine() {
    let mut engine = fallback_engine();
    assert_eq!(
        engine.resolver().layers(),
        vec!["installed", "fallback"]
    );
    engine.add_module(wave_unit("u1")).unwrap();

    let wave = unsafe { engine.get_symbol_address("u1.wave").unwrap().as_fn::<Unary>() };
    assert_relative_eq!(wave(0.0), 0.0, epsilon = 1e-6);
    assert_relative_eq!(wave(FRAC_PI_2), 1.0, epsilon = 1e-6);

    // Linking through the fallback never publishes the intrinsic itself
    assert!(engine.find_symbol("sinf").is_none());
}

#[test]
fn test_earlier_layer_shadows_fallback() {
    let mut engine = JitEngine::with_resolver(&RuntimeConfig::default(), |table| {
        Ok(LayeredResolver::new()
            .with_layer(InstalledSymbols::new(table))
            .with_layer(Override {
                name: "sinf",
                address: SymbolAddress::from_ptr(constant_sine as *const u8),
            })
            .with_layer(FallbackSymbols))
    })
    .unwrap();
    engine.add_module(wave_unit("u1")).unwrap();

    let wave = unsafe { engine.get_symbol_address("u1.wave").unwrap().as_fn::<Unary>() };
    assert_eq!(wave(1.0), 42.0);
}

#[test]
fn test_missing_imports_are_reported_together() {
    let mut engine = JitEngine::with_resolver(&RuntimeConfig::default(), |table| {
        Ok(LayeredResolver::new().with_layer(InstalledSymbols::new(table)))
    })
    .unwrap();
    let desc = UnitDescription::builder("u1")
        .function(
            "mix",
            1,
            Expr::add(
                Expr::intrinsic(Intrinsic::Sin, vec![Expr::arg(0)]),
                Expr::intrinsic(Intrinsic::Cos, vec![Expr::arg(0)]),
            ),
        )
        .build();

    match engine.add_module(plan(desc).unwrap()) {
        Err(FlowError::UnresolvedSymbol { unit, symbols }) => {
            assert_eq!(unit, "u1");
            assert_eq!(symbols, vec!["cosf".to_string(), "sinf".to_string()]);
        }
        other => panic!("expected an unresolved-symbol error, got {:?}", other.map(|_| ())),
    }
    assert_eq!(engine.module_count(), 0);
    assert!(engine.symbols().is_empty());
}

#[test]
fn test_every_intrinsic_links_through_fallback() {
    let mut engine = fallback_engine();
    for (i, intrinsic) in Intrinsic::ALL.iter().enumerate() {
        let args = (0..intrinsic.arity()).map(Expr::arg).collect();
        let desc = UnitDescription::builder(format!("u{}", i))
            .function("f", intrinsic.arity(), Expr::intrinsic(*intrinsic, args))
            .build();
        engine
            .add_module(plan(desc).unwrap())
            .unwrap_or_else(|e| panic!("{} failed to link: {}", intrinsic.symbol_name(), e));
    }
    assert_eq!(engine.module_count(), Intrinsic::ALL.len());

    let index = |target: Intrinsic| Intrinsic::ALL.iter().position(|i| *i == target).unwrap();
    let sqrt = unsafe {
        engine
            .get_symbol_address(&format!("u{}.f", index(Intrinsic::Sqrt)))
            .unwrap()
            .as_fn::<Unary>()
    };
    assert_eq!(sqrt(16.0), 4.0);

    let hypot = unsafe {
        engine
            .get_symbol_address(&format!("u{}.f", index(Intrinsic::Hypot)))
            .unwrap()
            .as_fn::<Binary>()
    };
    assert_relative_eq!(hypot(3.0, 4.0), 5.0, epsilon = 1e-5);

    let rand = unsafe {
        engine
            .get_symbol_address(&format!("u{}.f", index(Intrinsic::Rand)))
            .unwrap()
            .as_fn::<extern "C" fn() -> f32>()
    };
    let value = rand();
    assert!(value >= 0.0 && value.fract() == 0.0);
}

#[cfg(unix)]
#[test]
fn test_process_symbols_link_intrinsics() {
    let mut engine = JitEngine::new(&RuntimeConfig::editor()).unwrap();
    assert_eq!(
        engine.resolver().layers(),
        vec!["installed", "process", "fallback"]
    );
    assert_eq!(engine.resolver().resolve("sinf").unwrap().layer, "process");

    engine.add_module(wave_unit("u1")).unwrap();
    let wave = unsafe { engine.get_symbol_address("u1.wave").unwrap().as_fn::<Unary>() };
    assert_relative_eq!(wave(0.0), 0.0, epsilon = 1e-6);
    assert_relative_eq!(wave(FRAC_PI_2), 1.0, epsilon = 1e-6);
}
