//! Standard math functions seeded into every symbol table, plus the
//! reciprocal helper the code generator calls to realise division.
//!
//! Everything here is a plain `extern "C" fn` over doubles so the emitted
//! `call` goes straight to it with no trampoline.

use crate::symbols::{NativeFn, SymbolTable};

/// 1/x. The node vocabulary has no divide: `a/b` compiles to
/// `a * recip(b)`.
pub(crate) extern "C" fn recip(x: f64) -> f64 {
    1.0 / x
}

extern "C" fn abs(x: f64) -> f64 {
    x.abs()
}
extern "C" fn sqrt(x: f64) -> f64 {
    x.sqrt()
}
extern "C" fn exp(x: f64) -> f64 {
    x.exp()
}
extern "C" fn exp2(x: f64) -> f64 {
    x.exp2()
}
extern "C" fn log(x: f64) -> f64 {
    x.ln()
}
extern "C" fn log2(x: f64) -> f64 {
    x.log2()
}
extern "C" fn log10(x: f64) -> f64 {
    x.log10()
}
extern "C" fn sin(x: f64) -> f64 {
    x.sin()
}
extern "C" fn cos(x: f64) -> f64 {
    x.cos()
}
extern "C" fn tan(x: f64) -> f64 {
    x.tan()
}
extern "C" fn asin(x: f64) -> f64 {
    x.asin()
}
extern "C" fn acos(x: f64) -> f64 {
    x.acos()
}
extern "C" fn atan(x: f64) -> f64 {
    x.atan()
}
extern "C" fn sinh(x: f64) -> f64 {
    x.sinh()
}
extern "C" fn cosh(x: f64) -> f64 {
    x.cosh()
}
extern "C" fn tanh(x: f64) -> f64 {
    x.tanh()
}
extern "C" fn asinh(x: f64) -> f64 {
    x.asinh()
}
extern "C" fn acosh(x: f64) -> f64 {
    x.acosh()
}
extern "C" fn atanh(x: f64) -> f64 {
    x.atanh()
}
extern "C" fn round(x: f64) -> f64 {
    x.round()
}
extern "C" fn ceil(x: f64) -> f64 {
    x.ceil()
}
extern "C" fn floor(x: f64) -> f64 {
    x.floor()
}

// min/max compare with `<`/`>` rather than f64::min/max, so a NaN operand
// propagates the way the comparison falls out.
extern "C" fn min(x: f64, y: f64) -> f64 {
    if x < y {
        x
    } else {
        y
    }
}
extern "C" fn max(x: f64, y: f64) -> f64 {
    if x > y {
        x
    } else {
        y
    }
}
extern "C" fn pow(x: f64, y: f64) -> f64 {
    x.powf(y)
}
extern "C" fn fmod(x: f64, y: f64) -> f64 {
    x % y
}
extern "C" fn atan2(x: f64, y: f64) -> f64 {
    x.atan2(y)
}
extern "C" fn hypot(x: f64, y: f64) -> f64 {
    x.hypot(y)
}

extern "C" fn clamp(x: f64, a: f64, b: f64) -> f64 {
    if x < a {
        a
    } else if x > b {
        b
    } else {
        x
    }
}

pub(crate) fn install(table: &mut SymbolTable) {
    let unary: &[(&str, crate::symbols::Fn1)] = &[
        ("abs", abs),
        ("sqrt", sqrt),
        ("exp", exp),
        ("exp2", exp2),
        ("log", log),
        ("log2", log2),
        ("log10", log10),
        ("sin", sin),
        ("cos", cos),
        ("tan", tan),
        ("asin", asin),
        ("acos", acos),
        ("atan", atan),
        ("sinh", sinh),
        ("cosh", cosh),
        ("tanh", tanh),
        ("asinh", asinh),
        ("acosh", acosh),
        ("atanh", atanh),
        ("round", round),
        ("ceil", ceil),
        ("floor", floor),
    ];
    for &(name, f) in unary {
        table.bind_fn(name, NativeFn::Unary(f));
    }

    let binary: &[(&str, crate::symbols::Fn2)] = &[
        ("min", min),
        ("max", max),
        ("pow", pow),
        ("mod", fmod),
        ("atan2", atan2),
        ("hypot", hypot),
    ];
    for &(name, f) in binary {
        table.bind_fn(name, NativeFn::Binary(f));
    }

    table.bind_fn("clamp", NativeFn::Ternary(clamp));
}
