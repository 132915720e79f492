use abacus::{Abacus, JitError};

#[test]
fn error_starts_empty() {
    let jit = Abacus::new();
    assert_eq!(jit.error(), "");
}

#[test]
fn unknown_function_mentions_the_name() {
    let mut jit = Abacus::new();
    let err = jit.compile("undefined(0.0)").unwrap_err();
    match err {
        JitError::UnknownSymbol { offset, name } => {
            assert_eq!(offset, 0);
            assert_eq!(name, "undefined");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(jit.error().contains("undefined"));
    assert!(jit.error().starts_with("0:"));
}

#[test]
fn unknown_variable_mentions_the_name() {
    let mut jit = Abacus::new();
    assert!(jit.compile("x").is_err());
    assert!(jit.error().contains('x'));
}

#[test]
fn arity_mismatch_reports_unknown_symbol() {
    let mut jit = Abacus::new();
    assert!(matches!(
        jit.compile("min(1)"),
        Err(JitError::UnknownSymbol { .. })
    ));
    assert!(matches!(
        jit.compile("sqrt(1, 2)"),
        Err(JitError::UnknownSymbol { .. })
    ));
}

#[test]
fn too_many_arguments() {
    let mut jit = Abacus::new();
    let err = jit.compile("clamp(1, 2, 3, 4)").unwrap_err();
    match err {
        JitError::TooManyArguments { name, .. } => assert_eq!(name, "clamp"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn missing_close_paren() {
    let mut jit = Abacus::new();
    assert!(matches!(
        jit.compile("(1 + 2"),
        Err(JitError::ExpectedCloseParen { .. })
    ));
    assert!(matches!(
        jit.compile("min(1, 2"),
        Err(JitError::ExpectedCloseParen { .. })
    ));
}

#[test]
fn stray_byte_reports_its_offset() {
    let mut jit = Abacus::new();
    let err = jit.compile("1 + $2").unwrap_err();
    match err {
        JitError::UnexpectedChar { offset, found } => {
            assert_eq!(offset, 4);
            assert_eq!(found, '$');
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(jit.error().starts_with("4:"));
}

#[test]
fn truncated_expression() {
    let mut jit = Abacus::new();
    assert!(matches!(
        jit.compile("1 +"),
        Err(JitError::UnexpectedEnd { .. })
    ));
    assert!(matches!(jit.compile(""), Err(JitError::UnexpectedEnd { .. })));
}

#[test]
fn operator_where_a_term_belongs() {
    let mut jit = Abacus::new();
    let err = jit.compile("1 + * 2").unwrap_err();
    match err {
        JitError::UnexpectedChar { offset, found } => {
            assert_eq!(offset, 4);
            assert_eq!(found, '*');
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

// Call arguments are terms, not full expressions; an additive argument
// needs its own parentheses.
#[test]
fn call_arguments_are_terms() {
    let mut jit = Abacus::new();
    assert!(matches!(
        jit.compile("sqrt(1 + 2)"),
        Err(JitError::ExpectedCloseParen { .. })
    ));
    jit.compile("sqrt((1 + 2))").unwrap();
    assert_eq!(jit.eval(), 3.0f64.sqrt());
}

#[test]
fn latest_error_replaces_the_previous_one() {
    let mut jit = Abacus::new();
    assert!(jit.compile("foo(1)").is_err());
    assert!(jit.error().contains("foo"));

    assert!(jit.compile("bar(1)").is_err());
    assert!(jit.error().contains("bar"));
    assert!(!jit.error().contains("foo"));

    jit.compile("1 + 1").unwrap();
    assert_eq!(jit.error(), "");
}
