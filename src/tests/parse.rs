use super::*;
use crate::RegisterError;

#[test]
fn infix_display_is_canonical() {
    let parser = Parser::new();
    let cases = [
        ("1 + 2 * 3", "(1+(2*3))"),
        ("-a", "(-a)"),
        ("Sqrt(x) ^ 2", "(Sqrt(x)^2)"),
        ("Ts_Mean(close, 5)", "Ts_Mean(close,5)"),
        ("a and b or c", "((a and b) or c)"),
        ("f()", "f()"),
        ("Tail(x, 0, 1, 'lo\\'w')", "Tail(x,0,1,'lo\\'w')"),
    ];
    for (formula, expected) in cases {
        let expr = parser.parse(formula).expect(formula);
        assert_eq!(expr.to_string(), expected, "{formula}");
    }
}

#[test]
fn display_reparses_to_same_program() {
    let parser = Parser::new();
    for formula in [
        "-1 * Rank(Ts_Max(Delta(vwap, 7), 11))",
        "2 ^ -1 + 3 % 2",
        "If(close > open, Log(close), -Abs(open)) / 2",
        "(a || b) && c != 0",
        "GroupRank(x, industry) - ConditionRank(x, x > 0)",
        "Decay_exp(close, 0.5, 3) * PI",
    ] {
        let expr = parser.parse(formula).expect(formula);
        let again = parser.parse(&expr.to_string()).expect("display should re-parse");
        assert_eq!(again.tokens(), expr.tokens(), "{formula}");
    }
}

#[test]
fn variables_in_first_occurrence_order() {
    let expr = Parser::new()
        .parse("Ts_Skewness(open, 4) + close / what")
        .expect("parse");
    assert_eq!(expr.variables(), vec!["open", "close", "what"]);

    let expr = Parser::new()
        .parse("x * y + x * PI + Rank(y)")
        .expect("parse");
    assert_eq!(expr.variables(), vec!["x", "y"]);
}

#[test]
fn simplify_folds_literals_and_bound_names() {
    let parser = Parser::new();
    let expr = parser.parse("x * (2 + 3) + y").expect("parse");
    let simplified = expr.simplify(&HashMap::new()).expect("simplify");
    assert_eq!(simplified.to_string(), "((x*5)+y)");
    assert!(simplified.tokens().len() < expr.tokens().len());

    let bound = HashMap::from([("y".to_string(), 4.0)]);
    let simplified = parser
        .parse("x * 2 + y * 3")
        .expect("parse")
        .simplify(&bound)
        .expect("simplify");
    assert_eq!(simplified.to_string(), "((x*2)+12)");
    assert_eq!(simplified.variables(), vec!["x"]);
}

#[test]
fn simplify_keeps_calls_and_argument_lists() {
    let expr = Parser::new()
        .parse("Ts_Mean(close, 2 + 1) * (1 - 3)")
        .expect("parse");
    let simplified = expr.simplify(&HashMap::new()).expect("simplify");
    assert_eq!(simplified.to_string(), "(Ts_Mean(close,3)*(-2))");
    let again = Parser::new()
        .parse(&simplified.to_string())
        .expect("simplified text re-parses");
    assert_eq!(again.to_string(), simplified.to_string());
}

#[test]
fn negative_folded_literal_keeps_precedence() {
    let parser = Parser::new();
    let folded = parser
        .parse("(0 - 3) ^ 2")
        .expect("parse")
        .simplify(&HashMap::new())
        .expect("simplify");
    assert_eq!(folded.to_string(), "9");

    let partial = parser
        .parse("(0 - 3) ^ x")
        .expect("parse")
        .simplify(&HashMap::new())
        .expect("simplify");
    let bindings = Bindings::new().with("x", 2.0);
    let reparsed = parser.parse(&partial.to_string()).expect("re-parse");
    assert_eq!(
        reparsed.evaluate(&bindings).expect("eval").as_scalar(),
        Some(9.0)
    );
}

#[test]
fn substitute_splices_replacement() {
    let parser = Parser::new();
    let expr = parser.parse("x * 2 + x").expect("parse");
    let replacement = parser.parse("y + 1").expect("parse");
    let substituted = expr.substitute("x", &replacement);
    assert_eq!(substituted.to_string(), "(((y+1)*2)+(y+1))");
    let bindings = Bindings::new().with("y", 2.0);
    assert_eq!(
        substituted.evaluate(&bindings).expect("eval").as_scalar(),
        Some(9.0)
    );

    let textual = expr.substitute_formula("x", "Sqrt(z)").expect("parse replacement");
    assert_eq!(textual.variables(), vec!["z"]);
    let err = expr
        .substitute_formula("x", "(1 +")
        .expect_err("bad replacement");
    assert!(matches!(err, CompileError::Syntax { .. }));
}

#[test]
fn lower_case_style_parses_lowercase_names() {
    let parser = Parser::with_options(&CompileOptions {
        case_style: CaseStyle::Lower,
    });
    let expr = parser.parse("ts_mean(x, 2) + sqrt(4)").expect("parse");
    assert_eq!(expr.variables(), vec!["x"]);
    let bindings = Bindings::new().with("x", series(&[1.0, 3.0]));
    let out = expr.evaluate(&bindings).expect("eval");
    let out = out.as_panel().expect("panel");
    assert!(out.values()[0].is_nan());
    assert_eq!(out.values()[1], 4.0);

    // capitalized names are plain identifiers under the lower style
    let expr = parser.parse("Ts_Mean + 1").expect("parse");
    assert_eq!(expr.variables(), vec!["Ts_Mean"]);
}

#[test]
fn compiled_expressions_share_tables() {
    let parser = Parser::new();
    let a = parser.parse("1 + 1").expect("parse");
    let b = parser.parse("2 + 2").expect("parse");
    assert!(std::sync::Arc::ptr_eq(a.tables(), b.tables()));
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<crate::Expression>();
}

#[test]
fn lex_errors_surface_through_parse() {
    let err = Parser::new().parse("close # 2").expect_err("bad char");
    assert_eq!(
        err,
        CompileError::Lex {
            column: 6,
            reason: "unknown character `#`".to_string()
        }
    );
}

#[test]
fn registered_operator_keeps_call_arguments_together() {
    let mut parser = Parser::new();
    let err = parser
        .register_binary("xor", 9, scalar_binary(|a, b| a * 100.0 + b))
        .expect_err("priority above call level");
    assert!(matches!(err, RegisterError::InvalidPriority { priority: 9, .. }));

    parser
        .register_binary("xor", 7, scalar_binary(|a, b| a * 100.0 + b))
        .expect("register");
    for (formula, expected) in [("1 xor Max(2, 3)", 103.0), ("5 xor (2 + 3)", 505.0)] {
        let expr = parser.parse(formula).expect(formula);
        let value = expr.evaluate(&Bindings::new()).expect(formula);
        assert_eq!(value.as_scalar(), Some(expected), "{formula}");
    }
    let expr = parser.parse("1 xor Max(2, 3)").expect("parse");
    assert_eq!(expr.to_string(), "(1 xor Max(2,3))");
}

fn scalar_binary(f: fn(f64, f64) -> f64) -> crate::BinaryFn {
    std::sync::Arc::new(
        move |_ctx: &crate::EvalContext<'_>, lhs: Value, rhs: Value| {
            match (lhs.as_scalar(), rhs.as_scalar()) {
                (Some(a), Some(b)) => Ok(Value::Scalar(f(a, b))),
                _ => Err(EvalError::TypeMismatch {
                    func: "xor".to_string(),
                    expected: "scalar",
                    actual: "panel",
                }),
            }
        },
    )
}
