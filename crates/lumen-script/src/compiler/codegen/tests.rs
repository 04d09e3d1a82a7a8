//! Tests for the bytecode compiler.

use super::*;
use crate::bytecode::Static;
use crate::lexer::Scanner;
use crate::optimizer::Optimizer;
use crate::parser::Parser;
use crate::runtime::{ArithOp, CompareOp};
use crate::sema::Analyzer;
use crate::unit::CompilationUnit;

fn compile_ok(src: &str) -> Buildable {
    let mut unit = CompilationUnit::new("test.lm");
    let stream = Scanner::analyze(src, &mut unit);
    let program = Parser::parse(stream, &mut unit);
    let mut module = Analyzer::analyze(program, &mut unit);
    assert!(!unit.has_fatal(), "{:#?}", unit.diagnostics());
    Optimizer::optimize(&mut module, &mut unit);
    Compiler::compile(&module, &unit.types).expect("Compilation should succeed")
}

/// Instructions of one function, with jump targets as indices relative to
/// the function's entry.
fn function_code(build: &Buildable, name: &str) -> Vec<Instruction<usize>> {
    let entries: Vec<(String, usize)> = build
        .statics()
        .iter()
        .filter_map(|object| match object {
            StaticObject::Function {
                name,
                entry: Some(entry),
                ..
            } => Some((name.clone(), build.label_position(*entry)?)),
            _ => None,
        })
        .collect();
    let start = entries
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, at)| *at)
        .expect("no such function");
    let end = entries
        .iter()
        .map(|(_, at)| *at)
        .filter(|at| *at > start)
        .min()
        .unwrap_or(build.instructions().len());
    build.instructions()[start..end]
        .iter()
        .map(|i| i.map_jump(|label| build.label_position(label).unwrap() - start))
        .collect()
}

fn push_i32(v: i32) -> Instruction<usize> {
    Instruction::Push(Value::I32(v))
}

#[test]
fn test_function_statics_come_first() {
    let build = compile_ok("fn a() {} fn b() -> i32 { return 1; }");
    let names: Vec<_> = build
        .statics()
        .iter()
        .filter_map(|object| match object {
            StaticObject::Function { name, flags, .. } => Some((name.clone(), *flags)),
            _ => None,
        })
        .collect();
    assert_eq!(
        names,
        vec![
            ("<init>".to_string(), FLAG_INIT | FLAG_VOID),
            ("a".to_string(), FLAG_VOID),
            ("b".to_string(), 0),
        ]
    );
}

#[test]
fn test_init_sizes_globals() {
    let build = compile_ok("let a = 1; let b: i64;");
    assert_eq!(
        function_code(&build, "<init>"),
        vec![
            Instruction::InitGlobals(2),
            push_i32(1),
            Instruction::StoreGlobal(0),
            Instruction::Push(Value::I64(0)),
            Instruction::StoreGlobal(1),
            Instruction::RetVoid,
        ]
    );
}

#[test]
fn test_while_false_emits_nothing() {
    let build = compile_ok("let g = 0; fn f() { while (false) { g = g + 1; } }");
    assert_eq!(function_code(&build, "f"), vec![Instruction::RetVoid]);

    let build = compile_ok("let g = 0; const stop = false; fn f() { while (stop) { g = 1; } }");
    assert_eq!(function_code(&build, "f"), vec![Instruction::RetVoid]);
}

#[test]
fn test_while_unknown_condition() {
    let build = compile_ok("let go = true; fn f() { while (go) { go = false; } }");
    assert_eq!(
        function_code(&build, "f"),
        vec![
            Instruction::LoadGlobal(0),
            Instruction::TestZero,
            Instruction::JumpIfTrue(6),
            Instruction::Push(Value::Bool(false)),
            Instruction::StoreGlobal(0),
            Instruction::Jump(0),
            Instruction::RetVoid,
        ]
    );
}

#[test]
fn test_while_true_has_no_test() {
    let build = compile_ok("fn f() { while (true) { let a = 1; break; } }");
    assert_eq!(
        function_code(&build, "f"),
        vec![
            push_i32(1),
            Instruction::Pop,
            Instruction::Jump(5),
            Instruction::Pop,
            Instruction::Jump(0),
            Instruction::RetVoid,
        ]
    );
}

#[test]
fn test_if_specialization() {
    let build = compile_ok("let g = 0; fn f() { if (true) { g = 1; } else { g = 2; } }");
    assert_eq!(
        function_code(&build, "f"),
        vec![push_i32(1), Instruction::StoreGlobal(0), Instruction::RetVoid]
    );

    let build = compile_ok("let g = 0; fn f(c: bool) { if (c) { g = 1; } else { g = 2; } }");
    assert_eq!(
        function_code(&build, "f"),
        vec![
            Instruction::LoadLocal(0),
            Instruction::TestZero,
            Instruction::JumpIfTrue(6),
            push_i32(1),
            Instruction::StoreGlobal(0),
            Instruction::Jump(8),
            push_i32(2),
            Instruction::StoreGlobal(0),
            Instruction::RetVoid,
        ]
    );
}

#[test]
fn test_for_loop_layout() {
    let build = compile_ok("let s = 0; fn f() { for (let i = 0; i < 3; i++) { s += i; } }");
    assert_eq!(
        function_code(&build, "f"),
        vec![
            push_i32(0),
            Instruction::LoadLocal(0),
            push_i32(3),
            Instruction::Compare(CompareOp::Lt),
            Instruction::TestZero,
            Instruction::JumpIfTrue(15),
            Instruction::LoadGlobal(0),
            Instruction::LoadLocal(0),
            Instruction::Arith(ArithOp::Add),
            Instruction::StoreGlobal(0),
            Instruction::LoadLocal(0),
            push_i32(1),
            Instruction::Arith(ArithOp::Add),
            Instruction::StoreLocal(0),
            Instruction::Jump(1),
            Instruction::Pop,
            Instruction::RetVoid,
        ]
    );
}

#[test]
fn test_block_pops_locals() {
    let build = compile_ok("fn f() { { let a = 1; let b = 2; } }");
    assert_eq!(
        function_code(&build, "f"),
        vec![push_i32(1), push_i32(2), Instruction::PopN(2), Instruction::RetVoid]
    );
}

#[test]
fn test_postfix_keeps_old_value() {
    let build = compile_ok("fn f() -> i32 { let a = 1; let b = a++; return b; }");
    assert_eq!(
        function_code(&build, "f"),
        vec![
            push_i32(1),
            Instruction::LoadLocal(0),
            Instruction::Dup,
            push_i32(1),
            Instruction::Arith(ArithOp::Add),
            Instruction::StoreLocal(0),
            Instruction::LoadLocal(1),
            Instruction::Ret,
            push_i32(0),
            Instruction::Ret,
        ]
    );
}

#[test]
fn test_field_assignment_uses_scratch_register() {
    let build = compile_ok(
        "struct P { x: i32; } fn f(p: P) -> i32 { return p.x = 5; } fn g(p: P) { p.x = 5; }",
    );
    let f = function_code(&build, "f");
    assert_eq!(
        &f[..6],
        &[
            Instruction::LoadLocal(0),
            push_i32(5),
            Instruction::Dup,
            Instruction::StoreReg(2),
            Instruction::SetField(0),
            Instruction::LoadReg(2),
        ]
    );
    assert_eq!(
        function_code(&build, "g"),
        vec![
            Instruction::LoadLocal(0),
            push_i32(5),
            Instruction::SetField(0),
            Instruction::RetVoid,
        ]
    );
}

#[test]
fn test_logical_and_short_circuits() {
    let build = compile_ok("fn f(a: bool, b: bool) -> bool { return a && b; }");
    assert_eq!(
        &function_code(&build, "f")[..7],
        &[
            Instruction::LoadLocal(0),
            Instruction::Dup,
            Instruction::TestZero,
            Instruction::JumpIfTrue(6),
            Instruction::Pop,
            Instruction::LoadLocal(1),
            Instruction::Ret,
        ]
    );
}

#[test]
fn test_try_catch_layout() {
    let build = compile_ok("fn f() -> i32 { try { throw 1; } catch (e) { return 42; } return 0; }");
    let code = function_code(&build, "f");
    let Instruction::TryBegin(address) = code[0] else {
        panic!("expected TryBegin, got {:?}", code[0]);
    };
    let Some(StaticObject::Label(handler)) = build.statics().get(address) else {
        panic!("TryBegin must reference a label static");
    };
    assert_eq!(
        &code[1..],
        &[
            push_i32(1),
            Instruction::Throw,
            Instruction::TryEnd,
            Instruction::Jump(9),
            Instruction::LoadReg(1),
            push_i32(42),
            Instruction::Ret,
            Instruction::Pop,
            push_i32(0),
            Instruction::Ret,
            push_i32(0),
            Instruction::Ret,
        ]
    );
    assert!(build.label_position(*handler).is_some());
}

#[test]
fn test_return_inside_try_leaves_region() {
    let build = compile_ok("fn f() -> i32 { try { return 1; } catch { } return 0; }");
    let code = function_code(&build, "f");
    assert_eq!(&code[1..4], &[push_i32(1), Instruction::TryEnd, Instruction::Ret]);
}

#[test]
fn test_continue_inside_try_leaves_region_and_scope() {
    let build = compile_ok("fn f() { while (true) { let a = 1; try { let b = 2; continue; } catch { } } }");
    let code = function_code(&build, "f");
    assert!(code.windows(3).any(|w| matches!(
        w,
        [Instruction::TryEnd, Instruction::PopN(2), Instruction::Jump(_)]
    )));
}

#[test]
fn test_enum_member_and_cast() {
    let build = compile_ok("enum E { A, B = 5 } fn f() -> f64 { return E.B as f64; }");
    assert_eq!(
        &function_code(&build, "f")[..3],
        &[push_i32(5), Instruction::Convert(Tag::F64), Instruction::Ret]
    );
}

#[test]
fn test_new_fills_missing_fields() {
    let build = compile_ok("struct P { x: i32; y: bool; } fn f() -> P { return new P { y: true }; }");
    let code = function_code(&build, "f");
    assert_eq!(&code[..2], &[push_i32(0), Instruction::Push(Value::Bool(true))]);
    let Instruction::NewStruct(id) = code[2] else {
        panic!("expected NewStruct");
    };
    assert_eq!(
        build.statics().get(id),
        Some(&StaticObject::Aggregate {
            name: "P".into(),
            members: vec!["x".into(), "y".into()],
        })
    );
}

#[test]
fn test_default_return_value() {
    let build = compile_ok("fn f() -> i32 { }");
    assert_eq!(function_code(&build, "f"), vec![push_i32(0), Instruction::Ret]);
}

#[test]
fn test_baked_output_is_deterministic() {
    let src = "struct P { x: i32; } fn f(p: P) -> i32 { let s = \"hi\"; return p.x + s.len; }";
    let a = crate::bytecode::bake(&compile_ok(src)).unwrap();
    let b = crate::bytecode::bake(&compile_ok(src)).unwrap();
    assert_eq!(a, b);
    assert!(a.statics().iter().any(|s| matches!(s, Static::String(s) if s == "hi")));
}
