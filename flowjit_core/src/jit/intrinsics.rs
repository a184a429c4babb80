//! Fallback numeric intrinsics
//!
//! The process symbol table does not reliably expose single-precision libm
//! functions on every platform, so linking falls back to these
//! implementations. The table is keyed by the C symbol name and covers
//! exactly [`Intrinsic::ALL`].

use super::symbol::SymbolAddress;
use crate::codegen::Intrinsic;
use once_cell::sync::Lazy;
use rand::Rng;
use std::collections::HashMap;
use std::os::raw::c_int;

extern "C" fn fallback_sinf(x: f32) -> f32 {
    x.sin()
}

extern "C" fn fallback_cosf(x: f32) -> f32 {
    x.cos()
}

extern "C" fn fallback_tanf(x: f32) -> f32 {
    x.tan()
}

extern "C" fn fallback_asinf(x: f32) -> f32 {
    x.asin()
}

extern "C" fn fallback_acosf(x: f32) -> f32 {
    x.acos()
}

extern "C" fn fallback_atanf(x: f32) -> f32 {
    x.atan()
}

extern "C" fn fallback_atan2f(y: f32, x: f32) -> f32 {
    y.atan2(x)
}

extern "C" fn fallback_powf(x: f32, y: f32) -> f32 {
    x.powf(y)
}

extern "C" fn fallback_expf(x: f32) -> f32 {
    x.exp()
}

extern "C" fn fallback_logf(x: f32) -> f32 {
    x.ln()
}

extern "C" fn fallback_log2f(x: f32) -> f32 {
    x.log2()
}

extern "C" fn fallback_log10f(x: f32) -> f32 {
    x.log10()
}

/// Unbiased binary exponent, as C `logbf`
extern "C" fn fallback_logbf(x: f32) -> f32 {
    if x.is_nan() {
        return x;
    }
    if x == 0.0 {
        return f32::NEG_INFINITY;
    }
    if x.is_infinite() {
        return f32::INFINITY;
    }
    let bits = x.to_bits();
    let exponent = ((bits >> 23) & 0xff) as i32;
    if exponent == 0 {
        // subnormal: value is mantissa * 2^-149
        let mantissa = bits & 0x007f_ffff;
        return (-118 - mantissa.leading_zeros() as i32) as f32;
    }
    (exponent - 127) as f32
}

extern "C" fn fallback_hypotf(x: f32, y: f32) -> f32 {
    x.hypot(y)
}

extern "C" fn fallback_sqrtf(x: f32) -> f32 {
    x.sqrt()
}

extern "C" fn fallback_ceilf(x: f32) -> f32 {
    x.ceil()
}

extern "C" fn fallback_floorf(x: f32) -> f32 {
    x.floor()
}

/// Half away from zero, as C `roundf`
extern "C" fn fallback_roundf(x: f32) -> f32 {
    x.round()
}

extern "C" fn fallback_truncf(x: f32) -> f32 {
    x.trunc()
}

extern "C" fn fallback_fminf(x: f32, y: f32) -> f32 {
    x.min(y)
}

extern "C" fn fallback_fmaxf(x: f32, y: f32) -> f32 {
    x.max(y)
}

extern "C" fn fallback_fmodf(x: f32, y: f32) -> f32 {
    x % y
}

extern "C" fn fallback_rand() -> c_int {
    rand::thread_rng().gen_range(0..=c_int::MAX)
}

fn address_of(intrinsic: Intrinsic) -> SymbolAddress {
    type F1 = extern "C" fn(f32) -> f32;
    type F2 = extern "C" fn(f32, f32) -> f32;
    let unary = |f: F1| SymbolAddress::from_ptr(f as *const u8);
    let binary = |f: F2| SymbolAddress::from_ptr(f as *const u8);
    match intrinsic {
        Intrinsic::Sin => unary(fallback_sinf),
        Intrinsic::Cos => unary(fallback_cosf),
        Intrinsic::Tan => unary(fallback_tanf),
        Intrinsic::Asin => unary(fallback_asinf),
        Intrinsic::Acos => unary(fallback_acosf),
        Intrinsic::Atan => unary(fallback_atanf),
        Intrinsic::Atan2 => binary(fallback_atan2f),
        Intrinsic::Pow => binary(fallback_powf),
        Intrinsic::Exp => unary(fallback_expf),
        Intrinsic::Log => unary(fallback_logf),
        Intrinsic::Log2 => unary(fallback_log2f),
        Intrinsic::Log10 => unary(fallback_log10f),
        Intrinsic::Logb => unary(fallback_logbf),
        Intrinsic::Hypot => binary(fallback_hypotf),
        Intrinsic::Sqrt => unary(fallback_sqrtf),
        Intrinsic::Ceil => unary(fallback_ceilf),
        Intrinsic::Floor => unary(fallback_floorf),
        Intrinsic::Round => unary(fallback_roundf),
        Intrinsic::Trunc => unary(fallback_truncf),
        Intrinsic::Fmin => binary(fallback_fminf),
        Intrinsic::Fmax => binary(fallback_fmaxf),
        Intrinsic::Fmod => binary(fallback_fmodf),
        Intrinsic::Rand => {
            SymbolAddress::from_ptr(fallback_rand as extern "C" fn() -> c_int as *const u8)
        }
    }
}

static FALLBACK_TABLE: Lazy<HashMap<&'static str, SymbolAddress>> = Lazy::new(|| {
    Intrinsic::ALL
        .iter()
        .map(|intrinsic| (intrinsic.symbol_name(), address_of(*intrinsic)))
        .collect()
});

/// Look up a fallback implementation by C symbol name
pub fn lookup(name: &str) -> Option<SymbolAddress> {
    FALLBACK_TABLE.get(name).copied()
}

/// Every symbol name the fallback table provides
pub fn names() -> impl Iterator<Item = &'static str> {
    Intrinsic::ALL.iter().map(|i| i.symbol_name())
}

extern "C" fn libcall_nearbyintf(x: f32) -> f32 {
    x.round_ties_even()
}

extern "C" fn libcall_fmaf(a: f32, b: f32, c: f32) -> f32 {
    a.mul_add(b, c)
}

/// Symbols the code generator may call on its own when the target lacks an
/// instruction (rounding, fused multiply-add), plus the whole fallback table.
pub(crate) fn libcall_symbols() -> Vec<(&'static str, *const u8)> {
    let mut symbols: Vec<(&'static str, *const u8)> = FALLBACK_TABLE
        .iter()
        .map(|(name, address)| (*name, address.as_ptr()))
        .collect();
    symbols.push((
        "nearbyintf",
        libcall_nearbyintf as extern "C" fn(f32) -> f32 as *const u8,
    ));
    symbols.push((
        "fmaf",
        libcall_fmaf as extern "C" fn(f32, f32, f32) -> f32 as *const u8,
    ));
    symbols
}
