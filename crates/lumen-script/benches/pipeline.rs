use criterion::{Criterion, black_box, criterion_group, criterion_main};
use lumen_script::{
    BindingContext, CompileOptions, ModuleContext, Script, Value, VmConfig, compile,
    compile_batch,
};

const SOURCE: &str = r#"
struct Point { x: i32; y: i32; }

enum Axis { X, Y = 4, Z }

let origin = new Point { x: 0, y: 0 };

fn fib(n: i32) -> i32 {
    if (n < 2) { return n; }
    return fib(n - 1) + fib(n - 2);
}

fn walk(n: i32) -> i32 {
    let total = 0;
    for (let i = 0; i < n; i++) {
        let p = new Point { x: i, y: i * 2 };
        let path = [p.x, p.y, origin.x];
        total += path[1] + (Axis.Z as i32);
        try {
            if (i % 7 == 0) { throw i; }
        } catch (e) {
            total -= 1;
        }
    }
    return total;
}
"#;

fn bench_compile(c: &mut Criterion) {
    let context = ModuleContext::new();
    c.bench_function("compile", |b| {
        b.iter(|| compile(black_box(SOURCE), &context))
    });

    let sources: Vec<(&str, &str)> = (0..16).map(|_| ("bench.lm", SOURCE)).collect();
    let options = CompileOptions::default();
    c.bench_function("compile_batch_16", |b| {
        b.iter(|| compile_batch(black_box(&sources), &context, &options))
    });
}

fn bench_execute(c: &mut Criterion) {
    let artifact = compile(SOURCE, &ModuleContext::new())
        .into_result()
        .expect("benchmark source compiles");
    let script = Script::run(&artifact, &BindingContext::new(), VmConfig::default())
        .expect("script starts");
    let fib = script.function("fib").expect("fib exists");
    let walk = script.function("walk").expect("walk exists");

    c.bench_function("fib_20", |b| {
        b.iter(|| script.call_function(&fib, black_box(&[Value::I32(20)])))
    });
    c.bench_function("walk_1000", |b| {
        b.iter(|| script.call_function(&walk, black_box(&[Value::I32(1000)])))
    });
}

criterion_group!(benches, bench_compile, bench_execute);
criterion_main!(benches);
