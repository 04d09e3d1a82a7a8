//! Virtual machine integration tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::channel;
use lumen_script::{
    BindingContext, Error, ModuleContext, NativeStatus, Script, Value, VmConfig, compile,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn load_with(
    source: &str,
    context: &ModuleContext,
    bindings: &BindingContext,
    config: VmConfig,
) -> Script {
    init_tracing();
    let artifact = compile(source, context).into_result().unwrap();
    Script::run(&artifact, bindings, config).unwrap()
}

fn load(source: &str) -> Script {
    load_with(source, &ModuleContext::new(), &BindingContext::new(), VmConfig::default())
}

fn call(script: &Script, name: &str, args: &[Value]) -> lumen_script::Result<Value> {
    let function = script.function(name).expect("function exists");
    script.call_function(&function, args)
}

#[test]
fn test_arithmetic_and_recursion() {
    let script = load("fn fib(n: i32) -> i32 { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); }");
    assert_eq!(call(&script, "fib", &[Value::I32(20)]).unwrap(), Value::I32(6765));
}

#[test]
fn test_void_function_returns_none() {
    let script = load("let hits = 0; fn hit() { hits += 1; } fn count() -> i32 { return hits; }");
    assert_eq!(call(&script, "hit", &[]).unwrap(), Value::None);
    assert_eq!(call(&script, "count", &[]).unwrap(), Value::I32(1));
}

#[test]
fn test_wrong_argument_count_is_rejected() {
    let script = load("fn f(a: i32) -> i32 { return a; }");
    assert!(matches!(call(&script, "f", &[]), Err(Error::InvalidCall(_))));
    assert!(script.is_good());
}

#[test]
fn test_catch_returns_value() {
    let script = load("fn f() -> i32 { try { throw 1; } catch { return 42; } return 0; }");
    assert_eq!(call(&script, "f", &[]).unwrap(), Value::I32(42));
    assert!(script.is_good());
}

#[test]
fn test_exception_crosses_frames() {
    let script = load(
        "fn inner(v: i32) -> i32 { if (v > 2) { throw v; } return v; } \
         fn middle(v: i32) -> i32 { return inner(v) * 10; } \
         fn outer(v: i32) -> i32 { try { return middle(v); } catch (e) { return -1; } }",
    );
    assert_eq!(call(&script, "outer", &[Value::I32(2)]).unwrap(), Value::I32(20));
    assert_eq!(call(&script, "outer", &[Value::I32(3)]).unwrap(), Value::I32(-1));
}

#[test]
fn test_unhandled_exception_makes_vm_bad() {
    let script = load("fn f() -> i32 { throw 1; } fn g() -> i32 { return 3; }");
    let err = call(&script, "f", &[]).unwrap_err();
    assert!(matches!(err, Error::Unhandled { thread: 0, ref message } if message == "1"));
    assert!(!script.is_good());
    assert!(matches!(call(&script, "g", &[]), Err(Error::VmNotGood)));

    script.reset().unwrap();
    assert!(script.is_good());
    assert_eq!(call(&script, "g", &[]).unwrap(), Value::I32(3));
}

#[test]
fn test_runtime_errors_are_catchable() {
    let script = load(
        "fn div(a: i32, b: i32) -> i32 { try { return a / b; } catch { return -1; } } \
         fn at(i: i32) -> i32 { let a = [1, 2, 3]; try { return a[i]; } catch { return -1; } }",
    );
    assert_eq!(call(&script, "div", &[Value::I32(9), Value::I32(3)]).unwrap(), Value::I32(3));
    assert_eq!(call(&script, "div", &[Value::I32(1), Value::I32(0)]).unwrap(), Value::I32(-1));
    assert_eq!(call(&script, "at", &[Value::I32(2)]).unwrap(), Value::I32(3));
    assert_eq!(call(&script, "at", &[Value::I32(3)]).unwrap(), Value::I32(-1));
    assert_eq!(call(&script, "at", &[Value::I32(-1)]).unwrap(), Value::I32(-1));
    assert!(script.is_good());
}

#[test]
fn test_uncaught_runtime_error_message() {
    let script = load("fn f(a: i32) -> i32 { return 10 / a; }");
    let err = call(&script, "f", &[Value::I32(0)]).unwrap_err();
    assert!(matches!(err, Error::Unhandled { ref message, .. } if message == "division by zero"));
}

#[test]
fn test_strings() {
    let script = load(
        "fn greet(name: string) -> string { return \"hello \" + name; } \
         fn same(a: string, b: string) -> bool { return a == b; } \
         fn size(s: string) -> i32 { return s.len; }",
    );
    let bob = script.new_string("bob").unwrap();
    let greeting = call(&script, "greet", &[bob]).unwrap();
    assert_eq!(script.read_string(greeting).as_deref(), Some("hello bob"));

    let other = script.new_string("bob").unwrap();
    assert_eq!(call(&script, "same", &[bob, other]).unwrap(), Value::Bool(true));
    assert_eq!(call(&script, "same", &[bob, greeting]).unwrap(), Value::Bool(false));
    assert_eq!(call(&script, "size", &[greeting]).unwrap(), Value::I32(9));
    script.release(bob);
    script.release(other);
}

#[test]
fn test_structs_and_arrays() {
    let script = load(
        "struct P { x: i32; y: i32; } \
         fn sum() -> i32 { \
             let p = new P { x: 3, y: 4 }; \
             p.x = p.x * 10; \
             let a = [1, 2, 3]; \
             a[1] = 20; \
             return p.x + p.y + a[1] + a.len; \
         } \
         fn make() -> P { return new P { y: 7 }; }",
    );
    assert_eq!(call(&script, "sum", &[]).unwrap(), Value::I32(57));
    let p = call(&script, "make", &[]).unwrap();
    assert_eq!(script.values(p).unwrap(), vec![Value::I32(0), Value::I32(7)]);
}

#[test]
fn test_derived_struct_passes_as_base() {
    let script = load(
        "struct Shape { x: f64; } struct Circle : Shape { r: f64; } \
         fn left(s: Shape) -> f64 { return s.x; } \
         fn f() -> f64 { let c = new Circle { x: 1.5, r: 2.0 }; return left(c) + c.r; }",
    );
    assert_eq!(call(&script, "f", &[]).unwrap(), Value::F64(3.5));
}

#[test]
fn test_globals_and_reset() {
    let script = load("let counter = 10; fn bump() -> i32 { counter += 1; return counter; }");
    assert_eq!(call(&script, "bump", &[]).unwrap(), Value::I32(11));
    assert_eq!(call(&script, "bump", &[]).unwrap(), Value::I32(12));
    script.reset().unwrap();
    assert_eq!(call(&script, "bump", &[]).unwrap(), Value::I32(11));
}

#[test]
fn test_function_values() {
    let mut context = ModuleContext::new();
    context.declare_native("triple", "fn(i32) -> i32");
    let mut bindings = BindingContext::new();
    bindings.bind_native("triple", |call| match call.arg(0) {
        Value::I32(v) => {
            call.set_result(Value::I32(v * 3));
            NativeStatus::Ok
        }
        _ => call.fail("expected i32"),
    });
    let script = load_with(
        "fn twice(x: i32) -> i32 { return x * 2; } \
         fn apply(f: fn(i32) -> i32, v: i32) -> i32 { return f(v); } \
         fn both() -> i32 { return apply(twice, 4) + apply(triple, 5); }",
        &context,
        &bindings,
        VmConfig::default(),
    );
    assert_eq!(call(&script, "both", &[]).unwrap(), Value::I32(23));
}

#[test]
fn test_generic_instances_run() {
    let script = load(
        "fn pick<T>(c: bool, a: T, b: T) -> T { if (c) { return a; } return b; } \
         fn f() -> f64 { return pick(true, 1.5, 2.5) + (pick(false, 1, 2) as f64); }",
    );
    assert_eq!(call(&script, "f", &[]).unwrap(), Value::F64(3.5));
}

#[test]
fn test_natives_and_native_globals() {
    let mut context = ModuleContext::new();
    context
        .declare_native("add", "fn(i32, i32) -> i32")
        .declare_native("label", "fn() -> string")
        .declare_global("limit", "i32", false);
    let mut bindings = BindingContext::new();
    bindings
        .bind_native("add", |call| {
            let (Value::I32(a), Value::I32(b)) = (call.arg(0), call.arg(1)) else {
                return call.fail("expected i32");
            };
            call.set_result(Value::I32(a + b));
            NativeStatus::Ok
        })
        .bind_native("label", |call| match call.new_string("from host") {
            Ok(s) => {
                call.set_result(s);
                NativeStatus::Ok
            }
            Err(err) => call.fail(err.to_string()),
        })
        .bind_global("limit", Value::I32(5));

    let script = load_with(
        "fn f() -> i32 { return add(limit, 2) * 2; } \
         fn g() -> i32 { let s = label(); return s.len; }",
        &context,
        &bindings,
        VmConfig::default(),
    );
    assert_eq!(call(&script, "f", &[]).unwrap(), Value::I32(14));
    assert_eq!(call(&script, "g", &[]).unwrap(), Value::I32(9));
}

#[test]
fn test_native_errors_are_exceptions() {
    let mut context = ModuleContext::new();
    context.declare_native("fail", "fn() -> i32");
    let mut bindings = BindingContext::new();
    bindings.bind_native("fail", |call| call.fail("boom"));

    let script = load_with(
        "fn caught() -> i32 { try { return fail(); } catch { return 7; } } \
         fn uncaught() -> i32 { return fail(); }",
        &context,
        &bindings,
        VmConfig::default(),
    );
    assert_eq!(call(&script, "caught", &[]).unwrap(), Value::I32(7));
    let err = call(&script, "uncaught", &[]).unwrap_err();
    assert!(matches!(err, Error::Unhandled { ref message, .. } if message == "boom"));
}

#[test]
fn test_missing_bindings_fail_to_load() {
    let mut context = ModuleContext::new();
    context
        .declare_native("now", "fn() -> i64")
        .declare_global("limit", "i32", false);
    let artifact = compile("fn f() -> i64 { return now() + (limit as i64); }", &context)
        .into_result()
        .unwrap();

    let result = Script::run(&artifact, &BindingContext::new(), VmConfig::default());
    assert!(matches!(result, Err(Error::UnboundNative(name)) if name == "now"));

    let mut bindings = BindingContext::new();
    bindings.bind_native("now", |_| NativeStatus::Ok);
    let result = Script::run(&artifact, &bindings, VmConfig::default());
    assert!(matches!(result, Err(Error::UnboundGlobal(name)) if name == "limit"));
}

#[test]
fn test_objects_survive_collections() {
    let config = VmConfig::default().with_gc_threshold(8).with_heap_limit(4096);
    let script = load_with(
        "struct Keep { name: string; items: array<i32>; } \
         let kept = new Keep { name: \"kept\", items: [1, 2, 3] }; \
         fn churn(n: i32) -> i32 { \
             let local = [100, 200]; \
             let total = 0; \
             for (let i = 0; i < n; i++) { \
                 let a = [i, i + 1]; \
                 let s = \"x\" + kept.name; \
                 total += a[1] + s.len; \
             } \
             return total + local[1] + kept.items[2] + kept.name.len; \
         }",
        &ModuleContext::new(),
        &BindingContext::new(),
        config,
    );
    // sum(1..=200) + 200 * 5 + 200 + 3 + 4
    assert_eq!(call(&script, "churn", &[Value::I32(200)]).unwrap(), Value::I32(21307));
    let stats = script.heap_stats();
    assert!(stats.collections > 0);
    assert!(stats.live < 64);

    script.collect_garbage();
    assert_eq!(call(&script, "churn", &[Value::I32(10)]).unwrap(), Value::I32(312));
}

#[test]
fn test_host_strings_stay_pinned() {
    let config = VmConfig::default().with_gc_threshold(4);
    let script = load_with(
        "fn churn() -> i32 { let t = 0; for (let i = 0; i < 50; i++) { let a = [i]; t += a.len; } return t; }",
        &ModuleContext::new(),
        &BindingContext::new(),
        config,
    );
    let pinned = script.new_string("pinned").unwrap();
    call(&script, "churn", &[]).unwrap();
    script.collect_garbage();
    assert_eq!(script.read_string(pinned).as_deref(), Some("pinned"));

    script.release(pinned);
    script.collect_garbage();
    assert_eq!(script.read_string(pinned), None);
}

#[test]
fn test_heap_overflow_is_fatal() {
    let config = VmConfig::default().with_gc_threshold(8).with_heap_limit(16);
    let script = load_with(
        "fn deep(n: i32) -> i32 { let a = [n]; if (n == 0) { return 0; } return deep(n - 1) + a[0]; }",
        &ModuleContext::new(),
        &BindingContext::new(),
        config,
    );
    assert!(matches!(call(&script, "deep", &[Value::I32(100)]), Err(Error::Fatal(_))));
    assert!(!script.is_good());
}

#[test]
fn test_stack_overflow_is_catchable() {
    let config = VmConfig::default().with_frame_limit(64);
    let script = load_with(
        "fn down(n: i32) -> i32 { return down(n + 1); } \
         fn f() -> i32 { try { return down(0); } catch { return -1; } }",
        &ModuleContext::new(),
        &BindingContext::new(),
        config,
    );
    assert_eq!(call(&script, "f", &[]).unwrap(), Value::I32(-1));
    assert!(script.is_good());
}

#[test]
fn test_stack_stays_balanced() {
    // Any value leaked per iteration would exceed the stack limit.
    let config = VmConfig::default().with_stack_limit(128);
    let script = load_with(
        "fn value(i: i32) -> i32 { return i; } \
         fn risky(i: i32) -> i32 { if (i % 3 == 0) { throw i; } return i; } \
         fn f() -> i32 { \
             let count = 0; \
             for (let i = 0; i < 5000; i++) { \
                 value(i); \
                 let s = \"a\" + \"b\"; \
                 try { count += risky(i); } catch (e) { count += 1; } \
             } \
             return count; \
         }",
        &ModuleContext::new(),
        &BindingContext::new(),
        config,
    );
    let expected: i32 = (0..5000).map(|i| if i % 3 == 0 { 1 } else { i }).sum();
    for _ in 0..3 {
        assert_eq!(call(&script, "f", &[]).unwrap(), Value::I32(expected));
    }
}

#[test]
fn test_break_and_continue_keep_the_stack_balanced() {
    let config = VmConfig::default().with_stack_limit(64);
    let script = load_with(
        "fn skip() -> i32 { \
             let total = 0; \
             for (let i = 0; i < 3000; i++) { \
                 let a = i * 2; \
                 { \
                     let b = a + 1; \
                     let c = [b]; \
                     if (i % 4 == 0) { continue; } \
                     try { \
                         let d = c[0]; \
                         if (i % 4 == 1) { continue; } \
                         total += d; \
                     } catch { } \
                 } \
                 total += 1; \
             } \
             return total; \
         } \
         fn stop() -> i32 { \
             let n = 0; \
             while (true) { \
                 let x = n; \
                 try { let y = x + 1; if (y > 2000) { break; } } catch { } \
                 { let z = x; n = z + 1; } \
             } \
             return n; \
         } \
         fn nested() -> i32 { \
             let inner = 0; \
             for (let i = 0; i < 1000; i++) { \
                 let s = \"x\" + \"y\"; \
                 for (let j = 0; j < 10; j++) { \
                     let k = j; \
                     try { if (k == 3) { break; } } catch { } \
                     inner += 1; \
                 } \
             } \
             return inner; \
         }",
        &ModuleContext::new(),
        &BindingContext::new(),
        config,
    );
    let expected: i32 = (0..3000).filter(|i| i % 4 >= 2).map(|i| 2 * i + 2).sum();
    for _ in 0..3 {
        assert_eq!(call(&script, "skip", &[]).unwrap(), Value::I32(expected));
        assert_eq!(call(&script, "stop", &[]).unwrap(), Value::I32(2000));
        assert_eq!(call(&script, "nested", &[]).unwrap(), Value::I32(3000));
    }
    assert!(script.is_good());
}

#[test]
fn test_spawned_threads_run_in_parallel() {
    let config = VmConfig::default().with_gc_threshold(16);
    let script = load_with(
        "let base: i64 = 1000; \
         fn work(n: i32) -> i64 { \
             let s: i64 = base; \
             for (let i = 0; i < n; i++) { let a = [i]; s += a[0] as i64; } \
             return s; \
         }",
        &ModuleContext::new(),
        &BindingContext::new(),
        config,
    );
    let work = script.function("work").unwrap();
    let handles: Vec<_> = (1..=4)
        .map(|k| script.spawn(&work, &[Value::I32(k * 500)]).unwrap())
        .collect();
    for (k, handle) in (1..=4i64).zip(handles) {
        assert_ne!(handle.id(), 0);
        let n = k * 500;
        assert_eq!(handle.join().unwrap(), Value::I64(1000 + n * (n - 1) / 2));
    }
    assert!(script.is_good());
}

#[test]
fn test_thread_limit() {
    let (release, wait) = channel::unbounded::<()>();
    let entered = Arc::new(AtomicUsize::new(0));
    let mut context = ModuleContext::new();
    context.declare_native("block", "fn()");
    let mut bindings = BindingContext::new();
    let counter = entered.clone();
    bindings.bind_native("block", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = wait.recv();
        NativeStatus::Ok
    });
    let script = load_with(
        "fn worker() -> i32 { block(); return 1; }",
        &context,
        &bindings,
        VmConfig::default().with_max_threads(2),
    );
    let worker = script.function("worker").unwrap();

    let running = script.spawn(&worker, &[]).unwrap();
    assert!(matches!(script.spawn(&worker, &[]), Err(Error::ThreadLimit(2))));
    assert!(matches!(script.reset(), Err(Error::InvalidCall(_))));

    release.send(()).unwrap();
    assert_eq!(running.join().unwrap(), Value::I32(1));
    assert_eq!(entered.load(Ordering::SeqCst), 1);

    let again = script.spawn(&worker, &[]).unwrap();
    release.send(()).unwrap();
    assert_eq!(again.join().unwrap(), Value::I32(1));
    script.reset().unwrap();
}

#[test]
fn test_unhandled_exception_on_spawned_thread() {
    let script = load("fn bad() -> i32 { throw 5; } fn good() -> i32 { return 1; }");
    let bad = script.function("bad").unwrap();
    let handle = script.spawn(&bad, &[]).unwrap();
    let id = handle.id();
    let err = handle.join().unwrap_err();
    assert!(matches!(err, Error::Unhandled { thread, ref message } if thread == id && message == "5"));
    assert!(script.is_good());
    assert_eq!(call(&script, "good", &[]).unwrap(), Value::I32(1));
}

#[test]
fn test_exceptions_survive_concurrent_collections() {
    let mut context = ModuleContext::new();
    context.declare_native("fail", "fn() -> i32");
    let mut bindings = BindingContext::new();
    bindings.bind_native("fail", |call| {
        for _ in 0..4 {
            if let Err(err) = call.new_string("scratch") {
                return call.fail(err.to_string());
            }
        }
        call.fail("boom")
    });
    let config = VmConfig::default()
        .with_gc_threshold(2)
        .with_safepoint_interval(1);
    let script = load_with(
        "fn churn(n: i32) -> i32 { \
             let total = 0; \
             for (let i = 0; i < n; i++) { let a = [i]; let s = \"c\" + \"d\"; total += a[0] + s.len; } \
             return total; \
         } \
         fn thrower() -> i32 { let s = \"lost \" + \"message\"; throw s; } \
         fn failer() -> i32 { return fail(); }",
        &context,
        &bindings,
        config,
    );
    let churn = script.function("churn").unwrap();
    let thrower = script.function("thrower").unwrap();
    let failer = script.function("failer").unwrap();

    for _ in 0..25 {
        let churners: Vec<_> = (0..3)
            .map(|_| script.spawn(&churn, &[Value::I32(200)]).unwrap())
            .collect();
        let throwers: Vec<_> = (0..4)
            .map(|_| script.spawn(&thrower, &[]).unwrap())
            .collect();
        let failers: Vec<_> = (0..4)
            .map(|_| script.spawn(&failer, &[]).unwrap())
            .collect();

        for handle in throwers {
            let err = handle.join().unwrap_err();
            assert!(matches!(err, Error::Unhandled { ref message, .. } if message == "lost message"));
        }
        for handle in failers {
            let err = handle.join().unwrap_err();
            assert!(matches!(err, Error::Unhandled { ref message, .. } if message == "boom"));
        }
        for handle in churners {
            handle.join().unwrap();
        }
    }
    assert!(script.is_good());
}
