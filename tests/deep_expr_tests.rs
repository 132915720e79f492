use abacus::Abacus;

// Each nesting level folds its constant head into the accumulator, so the
// residual graph is a thin chain over x rather than 23 pending additions.
#[test]
fn deeply_nested_constants_fold_per_level() {
    let mut src = String::from("x");
    for i in (1..=23).rev() {
        src = format!("{i} + ({src})");
    }
    let mut jit = Abacus::new();
    jit.bind_var("x", 24.0);
    jit.compile(&src).unwrap();
    assert_eq!(jit.eval(), 300.0);
}

#[test]
fn deep_nesting_with_variables_spills() {
    let mut jit = Abacus::new();
    let names: Vec<String> = (1..=16).map(|i| format!("v{i}")).collect();
    for (i, name) in names.iter().enumerate() {
        jit.bind_var(name, (i + 1) as f64);
    }
    let mut src = names.last().unwrap().clone();
    for name in names.iter().rev().skip(1) {
        src = format!("{name} + ({src})");
    }
    jit.compile(&src).unwrap();
    assert_eq!(jit.eval(), 136.0);

    jit.bind_var("v16", 116.0);
    assert_eq!(jit.eval(), 236.0);
}

#[test]
fn calls_with_many_live_values() {
    let mut jit = Abacus::new();
    for (name, v) in [
        ("a", 1.0),
        ("b", 4.0),
        ("c", 9.0),
        ("d", 16.0),
        ("e", 25.0),
        ("f", 36.0),
        ("g", 49.0),
        ("h", 64.0),
    ] {
        jit.bind_var(name, v);
    }
    jit.compile("sqrt(a) + sqrt(b) + sqrt(c) + sqrt(d) + sqrt(e) + sqrt(f) + sqrt(g) + sqrt(h)")
        .unwrap();
    assert_eq!(jit.eval(), 36.0);
}

#[test]
fn pythagorean_identity_with_shared_variable() {
    let mut jit = Abacus::new();
    jit.bind_var("x", 0.739);
    jit.compile("sin(x)*sin(x) + cos(x)*cos(x)").unwrap();
    assert!((jit.eval() - 1.0).abs() < 1e-15);
}

#[test]
fn very_deep_parentheses() {
    let depth = 100;
    let src = format!("{}7{}", "(".repeat(depth), ")".repeat(depth));
    let mut jit = Abacus::new();
    jit.compile(&src).unwrap();
    assert_eq!(jit.eval(), 7.0);
}

#[test]
fn long_flat_sum_folds_its_constant_part() {
    // 99 constant terms merge into the accumulator; only x + 4950 is emitted
    let terms: Vec<String> = (1..=99).map(|i| i.to_string()).collect();
    let src = format!("x + {}", terms.join(" + "));
    let mut jit = Abacus::new();
    jit.bind_var("x", 50.0);
    jit.compile(&src).unwrap();
    assert_eq!(jit.eval(), 5000.0);
}
