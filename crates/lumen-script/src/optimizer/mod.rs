//! AST-level optimization.
//!
//! The optimizer rewrites expressions in an analyzed [`Module`] in place:
//!
//! - `const` bindings with literal initializers are replaced by the literal
//! - unary, binary and cast expressions over literals are folded using the
//!   runtime's own [`Value`] arithmetic, so a folded result is bit-identical
//!   to what the VM would compute
//! - `&&` and `||` collapse when one side is a known, pure constant
//!
//! Control flow is never removed here. Instead the compiler asks each
//! condition [`Expression::is_true`] and [`Expression::may_have_side_effects`]
//! and specializes its emission.

mod tribool;

pub use tribool::Tribool;

use tracing::debug;

use crate::ast::*;
use crate::runtime::{Tag, Value};
use crate::sema::{Module, TypeTable};
use crate::unit::CompilationUnit;

/// Folds constants in an analyzed module.
pub struct Optimizer<'u> {
    unit: &'u mut CompilationUnit,
    folded: usize,
}

impl<'u> Optimizer<'u> {
    /// Optimizes every function of `module`. Does nothing if the unit has
    /// fatal diagnostics.
    pub fn optimize(module: &mut Module, unit: &'u mut CompilationUnit) {
        if unit.has_fatal() {
            return;
        }
        let mut optimizer = Optimizer { unit, folded: 0 };
        for function in &mut module.functions {
            for statement in &mut function.body {
                optimizer.statement(statement);
            }
        }
        debug!(folded = optimizer.folded, "optimized module");
    }

    fn statement(&mut self, statement: &mut Statement) {
        match statement {
            Statement::Let(decl) => {
                if let Some(init) = &mut decl.init {
                    self.expression(init);
                }
            }
            Statement::Expression(stmt) => self.expression(&mut stmt.expression),
            Statement::Block(block) => self.block(&mut block.body),
            Statement::If(stmt) => {
                self.condition("if", &mut stmt.test);
                self.statement(&mut stmt.consequent);
                if let Some(alternate) = &mut stmt.alternate {
                    self.statement(alternate);
                }
            }
            Statement::While(stmt) => {
                self.condition("while", &mut stmt.test);
                self.statement(&mut stmt.body);
            }
            Statement::For(stmt) => {
                if let Some(init) = &mut stmt.init {
                    self.statement(init);
                }
                if let Some(test) = &mut stmt.test {
                    self.condition("for", test);
                }
                if let Some(update) = &mut stmt.update {
                    self.expression(update);
                }
                self.statement(&mut stmt.body);
            }
            Statement::Return(stmt) => {
                if let Some(argument) = &mut stmt.argument {
                    self.expression(argument);
                }
            }
            Statement::Throw(stmt) => self.expression(&mut stmt.argument),
            Statement::Try(stmt) => {
                self.block(&mut stmt.block.body);
                if let Some(handler) = &mut stmt.handler {
                    self.block(&mut handler.body.body);
                }
            }
            Statement::Function(_)
            | Statement::Struct(_)
            | Statement::Enum(_)
            | Statement::Break(_)
            | Statement::Continue(_)
            | Statement::Empty(_)
            | Statement::Invalid(_) => {}
        }
    }

    fn block(&mut self, body: &mut [Statement]) {
        for statement in body {
            self.statement(statement);
        }
    }

    fn condition(&mut self, keyword: &str, test: &mut Expression) {
        self.expression(test);
        let truth = test.is_true();
        if truth.is_known() {
            self.unit.info(
                test.span,
                format!("condition of '{}' is always {}", keyword, truth),
            );
        }
    }

    /// Optimizes the operands of an assignment target, never the target
    /// itself.
    fn place(&mut self, target: &mut Expression) {
        match &mut target.kind {
            ExprKind::Member(member) => self.expression(&mut member.object),
            ExprKind::Index(index) => {
                self.expression(&mut index.object);
                self.expression(&mut index.index);
            }
            _ => {}
        }
    }

    fn expression(&mut self, expr: &mut Expression) {
        let replacement = match &mut expr.kind {
            ExprKind::Identifier(ident) => ident.constant.clone().map(ExprKind::Literal),
            ExprKind::Binary(binary) => {
                self.expression(&mut binary.left);
                self.expression(&mut binary.right);
                if binary.operator.is_logical() {
                    short_circuit(binary).map(|folded| folded.kind)
                } else {
                    self.fold_binary(binary).map(ExprKind::Literal)
                }
            }
            ExprKind::Unary(unary) => {
                self.expression(&mut unary.argument);
                self.fold_unary(unary).map(ExprKind::Literal)
            }
            ExprKind::Cast(cast) => {
                self.expression(&mut cast.expression);
                let target = expr.ty.and_then(|ty| self.unit.types.tag(ty));
                fold_cast(&cast.expression, target, &self.unit.types).map(ExprKind::Literal)
            }
            ExprKind::Assign(assign) => {
                self.place(&mut assign.target);
                self.expression(&mut assign.value);
                None
            }
            ExprKind::Update(update) => {
                self.place(&mut update.argument);
                None
            }
            ExprKind::Call(call) => {
                self.expression(&mut call.callee);
                for argument in &mut call.arguments {
                    self.expression(argument);
                }
                None
            }
            ExprKind::Member(member) => {
                if !matches!(member.access, Some(MemberAccess::EnumMember(_))) {
                    self.expression(&mut member.object);
                }
                None
            }
            ExprKind::Index(index) => {
                self.expression(&mut index.object);
                self.expression(&mut index.index);
                None
            }
            ExprKind::Array(elements) => {
                for element in elements {
                    self.expression(element);
                }
                None
            }
            ExprKind::New(new) => {
                for field in &mut new.fields {
                    self.expression(&mut field.value);
                }
                None
            }
            ExprKind::Literal(_) | ExprKind::Template(_) | ExprKind::Invalid => None,
        };

        if let Some(kind) = replacement {
            expr.kind = kind;
            self.folded += 1;
        }
    }

    fn fold_binary(&self, binary: &BinaryExpression) -> Option<Literal> {
        let (left, right) = (binary.left.as_literal()?, binary.right.as_literal()?);

        if let (Literal::String(a), Literal::String(b)) = (left, right) {
            return match binary.operator {
                BinaryOperator::Add => Some(Literal::String(format!("{}{}", a, b))),
                BinaryOperator::Eq => Some(Literal::Bool(a == b)),
                BinaryOperator::Ne => Some(Literal::Bool(a != b)),
                _ => None,
            };
        }

        let types = &self.unit.types;
        let a = literal_value(left, types.tag(binary.left.ty?)?)?;
        let b = literal_value(right, types.tag(binary.right.ty?)?)?;
        if let Some(op) = binary.operator.compare() {
            return Value::compare(op, a, b).ok().map(Literal::Bool);
        }
        // Division by zero is left for the VM to raise.
        Value::arith(binary.operator.arith()?, a, b)
            .ok()
            .and_then(value_literal)
    }

    fn fold_unary(&self, unary: &UnaryExpression) -> Option<Literal> {
        let literal = unary.argument.as_literal()?;
        if unary.operator == UnaryOperator::Not {
            return match literal {
                Literal::Bool(b) => Some(Literal::Bool(!b)),
                _ => None,
            };
        }
        let tag = self.unit.types.tag(unary.argument.ty?)?;
        let value = literal_value(literal, tag)?;
        let folded = match unary.operator {
            UnaryOperator::Minus => value.negate(),
            _ => value.complement(),
        };
        folded.ok().and_then(value_literal)
    }
}

fn fold_cast(inner: &Expression, target: Option<Tag>, types: &TypeTable) -> Option<Literal> {
    let literal = inner.as_literal()?;
    let value = literal_value(literal, types.tag(inner.ty?)?)?;
    value.convert(target?).and_then(value_literal)
}

/// Collapses `&&`/`||` when one operand is a known constant and the other
/// side's evaluation can be skipped or kept verbatim.
fn short_circuit(binary: &mut BinaryExpression) -> Option<Expression> {
    let is_and = binary.operator == BinaryOperator::And;
    let (left, right) = (binary.left.is_true(), binary.right.is_true());
    let absorbing = if is_and { Tribool::False } else { Tribool::True };

    let constant = |span, ty| Expression {
        kind: ExprKind::Literal(Literal::Bool(!is_and)),
        span,
        ty,
    };
    let take = |side: &mut Box<Expression>| {
        let span = side.span;
        std::mem::replace(&mut **side, Expression::new(ExprKind::Invalid, span))
    };

    if left == absorbing {
        // `false && x` never evaluates `x`.
        return Some(constant(binary.left.span, binary.left.ty));
    }
    if left.is_known() {
        return Some(take(&mut binary.right));
    }
    if right.is_known() && !binary.left.may_have_side_effects() {
        if right == absorbing {
            return Some(constant(binary.right.span, binary.right.ty));
        }
        return Some(take(&mut binary.left));
    }
    None
}

/// Converts a literal to the runtime value it denotes under `tag`.
pub(crate) fn literal_value(literal: &Literal, tag: Tag) -> Option<Value> {
    match literal {
        Literal::Integer(v) => Value::from_i128(tag, *v),
        Literal::Float(v) => Value::from_f64(tag, *v),
        Literal::Bool(b) if tag == Tag::Bool => Some(Value::Bool(*b)),
        Literal::None => Some(Value::None),
        _ => None,
    }
}

/// The literal denoting `value`, for scalar values.
pub(crate) fn value_literal(value: Value) -> Option<Literal> {
    match value {
        Value::None => Some(Literal::None),
        Value::Bool(b) => Some(Literal::Bool(b)),
        Value::F32(v) => Some(Literal::Float(v as f64)),
        Value::F64(v) => Some(Literal::Float(v)),
        other => other.as_i128().map(Literal::Integer),
    }
}
