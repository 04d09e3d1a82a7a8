//! Compiler pipeline integration tests
//!
//! Source text in, artifacts and listings out; the VM only runs programs
//! where a compile-time property is easiest to observe at runtime.

use bytes::Bytes;
use lumen_script::{
    Artifact, BindingContext, CompileOptions, ModuleContext, Script, Severity, Value, VmConfig,
    compile, compile_with, decompile,
};

fn build(source: &str) -> Artifact {
    let compilation = compile(source, &ModuleContext::new());
    assert!(compilation.success, "{:#?}", compilation.diagnostics);
    compilation.artifact.unwrap()
}

fn run(source: &str) -> Script {
    Script::run(&build(source), &BindingContext::new(), VmConfig::default()).unwrap()
}

fn call(script: &Script, name: &str, args: &[Value]) -> Value {
    let function = script.function(name).expect("function exists");
    script.call_function(&function, args).unwrap()
}

#[test]
fn test_enum_auto_numbering() {
    let script = run("enum E { A, B = 5, C, D = 2, E } \
         fn all() -> array<i32> { \
             return [E.A as i32, E.B as i32, E.C as i32, E.D as i32, E.E as i32]; \
         }");
    let values = script.values(call(&script, "all", &[])).unwrap();
    assert_eq!(
        values,
        vec![Value::I32(0), Value::I32(5), Value::I32(6), Value::I32(2), Value::I32(3)]
    );
}

#[test]
fn test_non_constant_enum_initializer_falls_back() {
    let compilation = compile(
        "let x = 3; enum E { A, B = x, C }",
        &ModuleContext::new(),
    );
    assert!(compilation.success);
    let errors: Vec<_> = compilation
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect();
    assert_eq!(errors.len(), 1);
}

#[test]
fn test_compilation_is_deterministic() {
    let source = "struct P { x: i32; y: string; } \
                  let greeting = \"hi\"; \
                  fn make(v: i32) -> P { return new P { x: v, y: greeting }; } \
                  fn id<T>(v: T) -> T { return v; } \
                  fn f() -> i32 { try { return id(make(3).x); } catch { return 0; } }";
    let first = build(source).to_bytes();
    let second = build(source).to_bytes();
    assert_eq!(first, second);
}

#[test]
fn test_artifact_survives_persistence() {
    let artifact = build("fn square(v: i64) -> i64 { return v * v; }");
    let restored = Artifact::from_bytes(artifact.to_bytes()).unwrap();
    assert_eq!(restored, artifact);

    let script = Script::run(&restored, &BindingContext::new(), VmConfig::default()).unwrap();
    assert_eq!(call(&script, "square", &[Value::I64(12)]), Value::I64(144));
}

#[test]
fn test_corrupt_artifact_is_rejected() {
    let bytes = build("fn f() {}").to_bytes();
    assert!(Artifact::from_bytes(bytes.slice(..bytes.len() - 1)).is_err());
    assert!(Artifact::from_bytes(Bytes::from_static(b"nope")).is_err());
}

#[test]
fn test_while_false_body_is_not_emitted() {
    let with_loop = build("let g = 0; fn f() { while (false) { g = g + 1; } }");
    let without = build("let g = 0; fn f() { }");
    assert_eq!(with_loop.to_bytes(), without.to_bytes());
}

#[test]
fn test_while_condition_side_effects_are_kept() {
    let script = run("let ticks = 0; \
         fn tick() -> bool { ticks += 1; return false; } \
         fn f() { while (tick()) { ticks = 100; } } \
         fn count() -> i32 { return ticks; }");
    call(&script, "f", &[]);
    assert_eq!(call(&script, "count", &[]), Value::I32(1));
}

#[test]
fn test_optimizer_does_not_change_results() {
    let source = "fn f(n: i32) -> i32 { \
                      let total = 2 * 3 + 1; \
                      for (let i = 0; i < n; i++) { if (true && i % 2 == 0) { total += i; } } \
                      return total; \
                  }";
    let plain = compile_with(
        source,
        &ModuleContext::new(),
        &CompileOptions::default().with_optimize(false),
    )
    .into_result()
    .unwrap();
    let optimized = build(source);
    assert_ne!(plain.to_bytes(), optimized.to_bytes());

    for artifact in [plain, optimized] {
        let script = Script::run(&artifact, &BindingContext::new(), VmConfig::default()).unwrap();
        assert_eq!(call(&script, "f", &[Value::I32(10)]), Value::I32(27));
    }
}

#[test]
fn test_warnings_and_infos_do_not_fail() {
    let compilation = compile(
        "fn f() { let a = 1; { let a = 2; } if (true) { } }",
        &ModuleContext::new(),
    );
    assert!(compilation.success);
    let severities: Vec<_> = compilation.diagnostics.iter().map(|d| d.severity).collect();
    assert!(severities.contains(&Severity::Warning));
    assert!(severities.contains(&Severity::Info));
}

#[test]
fn test_all_errors_are_reported_at_once() {
    let compilation = compile(
        "fn f() -> i32 { return a; } fn g() -> i32 { return b; }",
        &ModuleContext::new(),
    );
    assert!(!compilation.success);
    let fatal: Vec<_> = compilation
        .diagnostics
        .iter()
        .filter(|d| d.is_fatal())
        .map(|d| d.message.as_str())
        .collect();
    assert!(fatal.iter().any(|m| m.contains("'a'")));
    assert!(fatal.iter().any(|m| m.contains("'b'")));
}

#[test]
fn test_decompile_lists_code_and_statics() {
    let artifact = build("fn greet() -> string { return \"hello\"; }");
    let listing = decompile(&artifact).unwrap();
    assert!(listing.starts_with("chunk 0:"));
    assert!(listing.contains("statics:"));
    assert!(listing.contains("greet"));
    assert!(listing.contains("\"hello\""));
}

#[test]
fn test_linked_chunks_keep_their_own_globals() {
    let a = build("let value = 1; fn first() -> i32 { return value; }");
    let b = build("let value = 2; fn second() -> i32 { return value; }");
    let linked = Artifact::link([a, b]);
    assert_eq!(linked.chunks().len(), 2);

    let script = Script::run(&linked, &BindingContext::new(), VmConfig::default()).unwrap();
    assert_eq!(call(&script, "first", &[]), Value::I32(1));
    assert_eq!(call(&script, "second", &[]), Value::I32(2));
}

#[test]
fn test_constant_condition_matches_runtime_value() {
    let source = "const tiny: f32 = 1e-50; \
                  fn folded() -> i32 { if (tiny) { return 1; } return 0; } \
                  fn copied() -> i32 { let x: f32 = tiny; if (x) { return 1; } return 0; }";
    let compilation = compile(source, &ModuleContext::new());
    assert!(compilation.success);
    assert!(
        !compilation
            .diagnostics
            .iter()
            .any(|d| d.message.contains("always true"))
    );

    let script = run(source);
    assert_eq!(call(&script, "folded", &[]), Value::I32(0));
    assert_eq!(call(&script, "copied", &[]), Value::I32(0));
}

#[test]
fn test_oversized_enumerator_is_reported() {
    let source = "enum E { A = 3000000000, B } fn f() -> i64 { return E.B as i64; }";
    let compilation = compile(source, &ModuleContext::new());
    assert!(compilation.success);
    assert!(
        compilation
            .diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error && d.message.contains("does not fit in i32"))
    );
    assert_eq!(call(&run(source), "f", &[]), Value::I64(1));
}
