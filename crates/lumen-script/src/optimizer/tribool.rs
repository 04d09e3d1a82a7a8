//! Compile-time truthiness and purity queries.

use std::fmt;

use crate::ast::{ExprKind, Expression, Literal, UnaryExpression, UnaryOperator};

/// Three-valued truthiness of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tribool {
    /// Known to be truthy
    True,
    /// Known to be falsy
    False,
    /// Only known at run time
    Unknown,
}

impl Tribool {
    /// Returns true if the value is known either way.
    pub fn is_known(self) -> bool {
        self != Tribool::Unknown
    }
}

impl From<bool> for Tribool {
    fn from(value: bool) -> Self {
        if value { Tribool::True } else { Tribool::False }
    }
}

impl fmt::Display for Tribool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tribool::True => write!(f, "true"),
            Tribool::False => write!(f, "false"),
            Tribool::Unknown => write!(f, "unknown"),
        }
    }
}

impl Literal {
    /// Truthiness of a literal under the runtime's zero test.
    pub fn truthiness(&self) -> Tribool {
        match self {
            Literal::Integer(v) => Tribool::from(*v != 0),
            Literal::Float(v) => Tribool::from(*v != 0.0),
            Literal::Bool(b) => Tribool::from(*b),
            Literal::String(_) => Tribool::True,
            Literal::None => Tribool::False,
        }
    }
}

impl Expression {
    /// Compile-time truthiness. Known only for literals, propagated
    /// constants and negations of those.
    pub fn is_true(&self) -> Tribool {
        match &self.kind {
            ExprKind::Literal(literal) => literal.truthiness(),
            ExprKind::Identifier(ident) => ident
                .constant
                .as_ref()
                .map_or(Tribool::Unknown, Literal::truthiness),
            ExprKind::Unary(UnaryExpression {
                operator: UnaryOperator::Not,
                argument,
            }) => match argument.is_true() {
                Tribool::True => Tribool::False,
                Tribool::False => Tribool::True,
                Tribool::Unknown => Tribool::Unknown,
            },
            _ => Tribool::Unknown,
        }
    }

    /// Returns true unless evaluating the expression is known to only
    /// produce a value.
    pub fn may_have_side_effects(&self) -> bool {
        match &self.kind {
            ExprKind::Literal(_)
            | ExprKind::Identifier(_)
            | ExprKind::Template(_)
            | ExprKind::Invalid => false,
            ExprKind::Call(_)
            | ExprKind::Assign(_)
            | ExprKind::Update(_)
            | ExprKind::New(_) => true,
            ExprKind::Binary(binary) => {
                binary.left.may_have_side_effects() || binary.right.may_have_side_effects()
            }
            ExprKind::Unary(unary) => unary.argument.may_have_side_effects(),
            ExprKind::Member(member) => member.object.may_have_side_effects(),
            ExprKind::Index(index) => {
                index.object.may_have_side_effects() || index.index.may_have_side_effects()
            }
            ExprKind::Cast(cast) => cast.expression.may_have_side_effects(),
            ExprKind::Array(elements) => elements.iter().any(Expression::may_have_side_effects),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryExpression, BinaryOperator, CallExpression, Identifier};
    use crate::lexer::Span;

    fn expr(kind: ExprKind) -> Expression {
        Expression::new(kind, Span::default())
    }

    fn lit(literal: Literal) -> Box<Expression> {
        Box::new(expr(ExprKind::Literal(literal)))
    }

    #[test]
    fn test_literal_truthiness() {
        assert_eq!(expr(ExprKind::Literal(Literal::Integer(0))).is_true(), Tribool::False);
        assert_eq!(expr(ExprKind::Literal(Literal::Integer(-3))).is_true(), Tribool::True);
        assert_eq!(expr(ExprKind::Literal(Literal::Float(0.0))).is_true(), Tribool::False);
        assert_eq!(expr(ExprKind::Literal(Literal::None)).is_true(), Tribool::False);
        assert_eq!(
            expr(ExprKind::Literal(Literal::String(String::new()))).is_true(),
            Tribool::True
        );
    }

    #[test]
    fn test_negation_and_constants() {
        let not = expr(ExprKind::Unary(UnaryExpression {
            operator: UnaryOperator::Not,
            argument: lit(Literal::Bool(false)),
        }));
        assert_eq!(not.is_true(), Tribool::True);

        let mut ident = Identifier::new("k");
        ident.constant = Some(Literal::Integer(0));
        assert_eq!(expr(ExprKind::Identifier(ident)).is_true(), Tribool::False);
        assert_eq!(
            expr(ExprKind::Identifier(Identifier::new("x"))).is_true(),
            Tribool::Unknown
        );
    }

    #[test]
    fn test_side_effects() {
        let call = expr(ExprKind::Call(CallExpression {
            callee: Box::new(expr(ExprKind::Identifier(Identifier::new("f")))),
            arguments: Vec::new(),
            target: None,
        }));
        assert!(call.may_have_side_effects());

        let sum = expr(ExprKind::Binary(BinaryExpression {
            operator: BinaryOperator::Add,
            left: lit(Literal::Integer(1)),
            right: lit(Literal::Integer(2)),
        }));
        assert!(!sum.may_have_side_effects());

        let array = expr(ExprKind::Array(vec![sum, call]));
        assert!(array.may_have_side_effects());
    }
}
