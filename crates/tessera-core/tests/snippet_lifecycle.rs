//! Integration tests for snippet status transitions through the engine.
//!
//! Every test runs against the in-process backend.

use tessera_core::{Engine, Error, RunException, SnippetEvent, SnippetKey, Status, UserIo};

// =============================================================================
// Test Helpers
// =============================================================================

fn engine() -> Engine {
    Engine::builder()
        .execution("direct")
        .io(UserIo::sink())
        .build()
        .unwrap()
}

/// Evaluate and return the key of the snippet created by `source`.
fn declare(engine: &mut Engine, source: &str) -> SnippetKey {
    let events = engine.eval(source).unwrap();
    events[0].snippet
}

fn key(engine: &Engine, name: &str) -> SnippetKey {
    *engine
        .find_by_name(name)
        .last()
        .unwrap_or_else(|| panic!("no snippet named {name}"))
}

fn value(engine: &mut Engine, source: &str) -> String {
    let events = engine.eval(source).unwrap();
    assert_eq!(events[0].exception, None, "{source} raised");
    events[0].value.clone().unwrap()
}

fn transitions(events: &[SnippetEvent]) -> Vec<(SnippetKey, Status, Status)> {
    events
        .iter()
        .filter(|e| !e.is_noop())
        .map(|e| (e.snippet, e.previous, e.status))
        .collect()
}

// =============================================================================
// Acceptance
// =============================================================================

#[test]
fn test_identical_declaration_is_idempotent() {
    let mut engine = engine();
    let first = declare(&mut engine, "int triple(int n) { return n * 3; }");
    let events = engine.eval("int triple(int n) { return n * 3; }").unwrap();
    assert!(transitions(&events).is_empty());
    assert_eq!(events[0].snippet, first);
    assert_eq!(engine.status(first).unwrap(), Status::Valid);
    assert_eq!(engine.snippets().count(), 1);
}

#[test]
fn test_variable_with_initializer_is_redeclared() {
    let mut engine = engine();
    let first = declare(&mut engine, "int n = 1;");
    let events = engine.eval("int n = 1;").unwrap();
    assert_ne!(events[0].snippet, first);
    assert_eq!(engine.status(first).unwrap(), Status::Overwritten);
}

#[test]
fn test_x_mu_scenario() {
    let mut engine = engine();
    let x = declare(&mut engine, "int x;");
    assert_eq!(engine.status(x).unwrap(), Status::Valid);
    let mu = declare(&mut engine, "int mu() { return x * 4; }");
    assert_eq!(engine.status(mu).unwrap(), Status::Valid);
    assert_eq!(engine.dependents(x).unwrap(), vec![mu]);

    let events = engine.drop(x).unwrap();
    assert_eq!(
        transitions(&events),
        vec![
            (x, Status::Valid, Status::Dropped),
            (mu, Status::Valid, Status::RecoverableDefined),
        ]
    );
    assert_eq!(events[1].cause, Some(x));
    assert_eq!(engine.unresolved_dependencies(mu).unwrap(), vec!["x"]);

    let events = engine.eval("int x = 10;").unwrap();
    let new_x = events[0].snippet;
    assert_eq!(events[0].status, Status::Valid);
    assert_eq!(events[0].value.as_deref(), Some("10"));
    assert!(
        events
            .iter()
            .any(|e| e.snippet == mu && e.status == Status::Valid && e.cause == Some(new_x))
    );
    assert_eq!(engine.status(mu).unwrap(), Status::Valid);
    assert_eq!(value(&mut engine, "mu()"), "40");
}

#[test]
fn test_corralled_method_reports_resolution() {
    let mut engine = engine();
    let helper = declare(&mut engine, "int helper() { return missing + 1; }");
    assert_eq!(engine.status(helper).unwrap(), Status::RecoverableDefined);
    let events = engine.eval("int caller() { return helper(); }").unwrap();
    assert_eq!(events[0].status, Status::Valid);

    let events = engine.eval("caller()").unwrap();
    match &events[0].exception {
        Some(RunException::Resolution { names, .. }) => assert_eq!(names, &["missing"]),
        other => panic!("expected a resolution exception, got {other:?}"),
    }
    assert_eq!(events[0].value, None);

    engine.eval("int missing = 41;").unwrap();
    assert_eq!(value(&mut engine, "caller()"), "42");
}

#[test]
fn test_header_reference_is_not_defined() {
    let mut engine = engine();
    let m = declare(&mut engine, "Shape make() { return new Shape(); }");
    assert_eq!(engine.status(m).unwrap(), Status::RecoverableNotDefined);
    let events = engine.eval("class Shape {}").unwrap();
    assert!(
        events
            .iter()
            .any(|e| e.snippet == m && e.previous == Status::RecoverableNotDefined && e.status == Status::Valid)
    );
}

#[test]
fn test_overwrite_keeps_dependents_valid() {
    let mut engine = engine();
    declare(&mut engine, "int base() { return 1; }");
    let user = declare(&mut engine, "int twice() { return base() * 2; }");
    engine.eval("int base() { return 5; }").unwrap();
    assert_eq!(engine.status(user).unwrap(), Status::Valid);
    assert_eq!(value(&mut engine, "twice()"), "10");
}

#[test]
fn test_incompatible_overwrite_corrals_dependent() {
    let mut engine = engine();
    declare(&mut engine, "int base() { return 1; }");
    let user = declare(&mut engine, "int twice() { return base() * 2; }");
    engine.eval("String base() { return \"s\"; }").unwrap();
    assert_eq!(engine.status(user).unwrap(), Status::RecoverableNotDefined);
    assert!(engine.diagnostics(user).unwrap().iter().any(|d| d.is_error));
}

// =============================================================================
// Drop
// =============================================================================

#[test]
fn test_drop_redeclare_duality() {
    let mut engine = engine();
    let b = declare(&mut engine, "int b() { return 2; }");
    let a = declare(&mut engine, "int a() { return b() + 1; }");
    engine.drop(b).unwrap();
    assert!(engine.status(a).unwrap().is_active());
    assert_ne!(engine.status(a).unwrap(), Status::Valid);

    engine.eval("int b() { return 3; }").unwrap();
    assert_eq!(engine.status(a).unwrap(), Status::Valid);
    assert_eq!(value(&mut engine, "a()"), "4");
}

#[test]
fn test_drop_cascade_is_shallow_to_deep() {
    let mut engine = engine();
    let a = declare(&mut engine, "class A {}");
    let b = declare(&mut engine, "class B extends A {}");
    let c = declare(&mut engine, "class C extends B {}");
    let d = declare(&mut engine, "class D extends C {}");

    let events = engine.drop(a).unwrap();
    let order: Vec<SnippetKey> = transitions(&events).iter().map(|t| t.0).collect();
    assert_eq!(order, vec![a, b, c, d]);
    assert_eq!(events[0].status, Status::Dropped);
    for k in [b, c, d] {
        assert_eq!(engine.status(k).unwrap(), Status::RecoverableNotDefined);
    }
}

#[test]
fn test_drop_reaches_subtype_directly_and_through_supertype() {
    let mut engine = engine();
    let a = declare(&mut engine, "class A {}");
    let c = declare(&mut engine, "class C extends B { void f() { A q = null; } }");
    assert_eq!(engine.status(c).unwrap(), Status::RecoverableNotDefined);
    let b = declare(&mut engine, "class B extends A {}");
    assert_eq!(engine.status(c).unwrap(), Status::Valid);

    let events = engine.drop(a).unwrap();
    assert_eq!(
        transitions(&events),
        vec![
            (a, Status::Valid, Status::Dropped),
            (b, Status::Valid, Status::RecoverableNotDefined),
            (c, Status::Valid, Status::RecoverableNotDefined),
        ]
    );
    assert!(events[1..].iter().all(|e| e.cause == Some(a)));

    engine.eval("class A {}").unwrap();
    assert_eq!(engine.status(b).unwrap(), Status::Valid);
    assert_eq!(engine.status(c).unwrap(), Status::Valid);
}

#[test]
fn test_drop_twice_is_rejected() {
    let mut engine = engine();
    let x = declare(&mut engine, "int x = 3;");
    engine.drop(x).unwrap();
    assert!(matches!(engine.drop(x), Err(Error::InvalidOperation(_))));
}

#[test]
fn test_drop_expression_is_rejected() {
    let mut engine = engine();
    let expr = declare(&mut engine, "System.out.println(1)");
    assert!(matches!(engine.drop(expr), Err(Error::InvalidOperation(_))));
}

// =============================================================================
// Ids and queries
// =============================================================================

#[test]
fn test_ids_and_names() {
    let mut engine = engine();
    declare(&mut engine, "int x = 1;");
    let bad = declare(&mut engine, "int y = \"no\";");
    declare(&mut engine, "x + 1");
    let x = key(&engine, "x");
    assert_eq!(engine.snippet(x).unwrap().id, "1");
    assert_eq!(engine.snippet(bad).unwrap().id, "e1");
    assert_eq!(engine.find_by_id("2"), Some(key(&engine, "$1")));
    assert_eq!(engine.status(bad).unwrap(), Status::Rejected);
}

#[test]
fn test_listing_queries() {
    let mut engine = engine();
    engine.eval("import java.util.List;").unwrap();
    engine.eval("int x = 1;").unwrap();
    engine.eval("int f() { return x; }").unwrap();
    engine.eval("record P(int a, int b) {}").unwrap();
    assert_eq!(engine.variables().len(), 1);
    assert_eq!(engine.methods().len(), 1);
    assert_eq!(engine.types().len(), 1);
    assert_eq!(engine.imports().len(), 1);
    assert_eq!(value(&mut engine, "new P(1, 2)"), "P[a=1, b=2]");
}

#[test]
fn test_var_value_of_string() {
    let mut engine = engine();
    let s = declare(&mut engine, "String s = \"hi\";");
    assert_eq!(engine.var_value(s).unwrap(), "\"hi\"");
    let f = declare(&mut engine, "void f() {}");
    assert!(matches!(engine.var_value(f), Err(Error::WrongKind { .. })));
}

#[test]
fn test_boolean_builtins() {
    let mut engine = engine();
    assert_eq!(value(&mut engine, "Boolean.logicalXor(true, false)"), "true");
    assert_eq!(value(&mut engine, "Boolean.toString(1 > 2)"), "\"false\"");
}

#[test]
fn test_runtime_failure_keeps_engine_live() {
    let mut engine = engine();
    let events = engine.eval("int boom() { throw new RuntimeException(\"bang\"); }").unwrap();
    assert_eq!(events[0].status, Status::Valid);
    let events = engine.eval("boom()").unwrap();
    match &events[0].exception {
        Some(RunException::User { class, message }) => {
            assert!(class.ends_with("RuntimeException"));
            assert_eq!(message.as_deref(), Some("bang"));
        }
        other => panic!("expected a user exception, got {other:?}"),
    }
    assert!(!engine.is_closed());
    assert_eq!(value(&mut engine, "1 + 1"), "2");
}

#[test]
fn test_closed_engine_answers_queries_only() {
    let mut engine = engine();
    let x = declare(&mut engine, "int x = 1;");
    engine.close();
    engine.close();
    assert!(matches!(engine.eval("int y = 2;"), Err(Error::Closed)));
    assert!(matches!(engine.drop(x), Err(Error::Closed)));
    assert!(matches!(engine.var_value(x), Err(Error::Closed)));
    assert_eq!(engine.status(x).unwrap(), Status::Valid);
    assert!(engine.diagnostics(x).unwrap().is_empty());
    assert_eq!(engine.snippets().count(), 1);
}

#[test]
fn test_startup_snippets_are_not_replayed() {
    let config = tessera_core::EngineConfig {
        execution: "direct".into(),
        startup: vec!["int base = 100;".into()],
        ..Default::default()
    };
    let mut engine = Engine::builder()
        .config(config)
        .io(UserIo::sink())
        .build()
        .unwrap();
    assert_eq!(engine.snippet(key(&engine, "base")).unwrap().id, "s1");
    engine.eval("int more = base + 1;").unwrap();
    assert_eq!(engine.replay_sources(), vec!["int more = base + 1;"]);
}
