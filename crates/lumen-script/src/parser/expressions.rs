//! Expression parsing.
//!
//! Binary operators are parsed by precedence climbing over a single table;
//! prefix and postfix unary operators have their own tables.
//!
//! ## Precedence Table (lowest to highest)
//!
//! | Precedence | Operators |
//! |------------|-----------|
//! | 1 | `=` `+=` `-=` `*=` `/=` `%=` (right associative) |
//! | 2 | `\|\|` |
//! | 3 | `&&` |
//! | 4 | `\|` |
//! | 5 | `^` |
//! | 6 | `&` |
//! | 7 | `==` `!=` |
//! | 8 | `<` `<=` `>` `>=` |
//! | 9 | `<<` `>>` |
//! | 10 | `+` `-` |
//! | 11 | `*` `/` `%` |
//! | 12 | `as` |
//! | 13 | prefix `-` `!` `~` `++` `--` |
//! | 14 | postfix call, `.`, `[]`, `++`, `--` |

use super::parser::{PResult, Parser};
use crate::ast::*;
use crate::lexer::TokenKind;

/// Binary operator table: token to (precedence, operator).
fn binary_operator(kind: &TokenKind) -> Option<(u8, BinaryOperator)> {
    Some(match kind {
        TokenKind::PipePipe => (2, BinaryOperator::Or),
        TokenKind::AmpersandAmpersand => (3, BinaryOperator::And),
        TokenKind::Pipe => (4, BinaryOperator::BitOr),
        TokenKind::Caret => (5, BinaryOperator::BitXor),
        TokenKind::Ampersand => (6, BinaryOperator::BitAnd),
        TokenKind::EqualEqual => (7, BinaryOperator::Eq),
        TokenKind::NotEqual => (7, BinaryOperator::Ne),
        TokenKind::LessThan => (8, BinaryOperator::Lt),
        TokenKind::LessThanEqual => (8, BinaryOperator::Le),
        TokenKind::GreaterThan => (8, BinaryOperator::Gt),
        TokenKind::GreaterThanEqual => (8, BinaryOperator::Ge),
        TokenKind::LeftShift => (9, BinaryOperator::Shl),
        TokenKind::RightShift => (9, BinaryOperator::Shr),
        TokenKind::Plus => (10, BinaryOperator::Add),
        TokenKind::Minus => (10, BinaryOperator::Sub),
        TokenKind::Star => (11, BinaryOperator::Mul),
        TokenKind::Slash => (11, BinaryOperator::Div),
        TokenKind::Percent => (11, BinaryOperator::Rem),
        _ => return None,
    })
}

const CAST_PRECEDENCE: u8 = 12;

fn assign_operator(kind: &TokenKind) -> Option<AssignOperator> {
    Some(match kind {
        TokenKind::Equal => AssignOperator::Assign,
        TokenKind::PlusEqual => AssignOperator::Add,
        TokenKind::MinusEqual => AssignOperator::Sub,
        TokenKind::StarEqual => AssignOperator::Mul,
        TokenKind::SlashEqual => AssignOperator::Div,
        TokenKind::PercentEqual => AssignOperator::Rem,
        _ => return None,
    })
}

/// Prefix unary table.
enum Prefix {
    Unary(UnaryOperator),
    Update(UpdateOperator),
}

fn prefix_operator(kind: &TokenKind) -> Option<Prefix> {
    Some(match kind {
        TokenKind::Minus => Prefix::Unary(UnaryOperator::Minus),
        TokenKind::Bang => Prefix::Unary(UnaryOperator::Not),
        TokenKind::Tilde => Prefix::Unary(UnaryOperator::BitNot),
        TokenKind::PlusPlus => Prefix::Update(UpdateOperator::Increment),
        TokenKind::MinusMinus => Prefix::Update(UpdateOperator::Decrement),
        _ => return None,
    })
}

/// Postfix unary table.
fn postfix_operator(kind: &TokenKind) -> Option<UpdateOperator> {
    Some(match kind {
        TokenKind::PlusPlus => UpdateOperator::Increment,
        TokenKind::MinusMinus => UpdateOperator::Decrement,
        _ => return None,
    })
}

impl Parser {
    /// Parses a full expression, including assignment.
    pub fn parse_expression(&mut self) -> PResult<Expression> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> PResult<Expression> {
        let target = self.parse_binary(2)?;

        let Some(operator) = assign_operator(&self.current.kind) else {
            return Ok(target);
        };
        if !matches!(
            target.kind,
            ExprKind::Identifier(_) | ExprKind::Member(_) | ExprKind::Index(_)
        ) {
            return Err(self.error_here("invalid assignment target".into()));
        }
        self.advance();
        let value = self.parse_assignment()?;
        let span = target.span.to(value.span);
        Ok(Expression::new(
            ExprKind::Assign(AssignExpression {
                operator,
                target: Box::new(target),
                value: Box::new(value),
            }),
            span,
        ))
    }

    /// Precedence climbing over the binary table.
    fn parse_binary(&mut self, min_precedence: u8) -> PResult<Expression> {
        let mut left = self.parse_unary()?;

        loop {
            if self.check(&TokenKind::As) && CAST_PRECEDENCE >= min_precedence {
                self.advance();
                let proto = self.parse_prototype()?;
                let span = left.span.to(proto.span);
                left = Expression::new(
                    ExprKind::Cast(CastExpression {
                        expression: Box::new(left),
                        proto,
                    }),
                    span,
                );
                continue;
            }

            let Some((precedence, operator)) = binary_operator(&self.current.kind) else {
                break;
            };
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let right = self.parse_binary(precedence + 1)?;
            let span = left.span.to(right.span);
            left = Expression::new(
                ExprKind::Binary(BinaryExpression {
                    operator,
                    left: Box::new(left),
                    right: Box::new(right),
                }),
                span,
            );
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> PResult<Expression> {
        let Some(prefix) = prefix_operator(&self.current.kind) else {
            return self.parse_postfix();
        };
        let start = self.current.span;
        self.advance();
        let argument = Box::new(self.parse_unary()?);
        let span = start.to(argument.span);
        let kind = match prefix {
            Prefix::Unary(operator) => ExprKind::Unary(UnaryExpression { operator, argument }),
            Prefix::Update(operator) => ExprKind::Update(UpdateExpression {
                operator,
                prefix: true,
                argument,
            }),
        };
        Ok(Expression::new(kind, span))
    }

    fn parse_postfix(&mut self) -> PResult<Expression> {
        let mut expr = self.parse_primary()?;

        loop {
            match &self.current.kind {
                TokenKind::LeftParen => {
                    self.advance();
                    let mut arguments = Vec::new();
                    if !self.check(&TokenKind::RightParen) {
                        loop {
                            arguments.push(self.parse_expression()?);
                            if !self.check(&TokenKind::Comma) {
                                break;
                            }
                            self.advance();
                        }
                    }
                    self.expect(&TokenKind::RightParen)?;
                    let span = expr.span.to(self.previous.span);
                    expr = Expression::new(
                        ExprKind::Call(CallExpression {
                            callee: Box::new(expr),
                            arguments,
                            target: None,
                        }),
                        span,
                    );
                }
                TokenKind::Dot => {
                    self.advance();
                    let property = self.expect_identifier()?;
                    let span = expr.span.to(self.previous.span);
                    expr = Expression::new(
                        ExprKind::Member(MemberExpression {
                            object: Box::new(expr),
                            property,
                            access: None,
                        }),
                        span,
                    );
                }
                TokenKind::LeftBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(&TokenKind::RightBracket)?;
                    let span = expr.span.to(self.previous.span);
                    expr = Expression::new(
                        ExprKind::Index(IndexExpression {
                            object: Box::new(expr),
                            index: Box::new(index),
                        }),
                        span,
                    );
                }
                kind => {
                    let Some(operator) = postfix_operator(kind) else {
                        break;
                    };
                    self.advance();
                    let span = expr.span.to(self.previous.span);
                    expr = Expression::new(
                        ExprKind::Update(UpdateExpression {
                            operator,
                            prefix: false,
                            argument: Box::new(expr),
                        }),
                        span,
                    );
                }
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> PResult<Expression> {
        let span = self.current.span;
        let literal = match &self.current.kind {
            TokenKind::Integer(v) => Some(Literal::Integer(*v)),
            TokenKind::Float(v) => Some(Literal::Float(*v)),
            TokenKind::String(s) => Some(Literal::String(s.clone())),
            TokenKind::True => Some(Literal::Bool(true)),
            TokenKind::False => Some(Literal::Bool(false)),
            TokenKind::None => Some(Literal::None),
            _ => None,
        };
        if let Some(literal) = literal {
            self.advance();
            return Ok(Expression::new(ExprKind::Literal(literal), span));
        }

        match &self.current.kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                if self.check(&TokenKind::ColonColon) {
                    self.advance();
                    let args = self.parse_prototype_args()?;
                    return Ok(Expression::new(
                        ExprKind::Template(TemplateExpression {
                            name,
                            args,
                            function: None,
                        }),
                        span.to(self.previous.span),
                    ));
                }
                Ok(Expression::new(
                    ExprKind::Identifier(Identifier::new(name)),
                    span,
                ))
            }
            TokenKind::LeftParen => {
                self.advance();
                let mut inner = self.parse_expression()?;
                self.expect(&TokenKind::RightParen)?;
                inner.span = span.to(self.previous.span);
                Ok(inner)
            }
            TokenKind::LeftBracket => {
                self.advance();
                let mut elements = Vec::new();
                while !self.check(&TokenKind::RightBracket) && !self.is_at_end() {
                    elements.push(self.parse_expression()?);
                    if !self.check(&TokenKind::Comma) {
                        break;
                    }
                    self.advance();
                }
                self.expect(&TokenKind::RightBracket)?;
                Ok(Expression::new(
                    ExprKind::Array(elements),
                    span.to(self.previous.span),
                ))
            }
            TokenKind::New => self.parse_new_expression(),
            _ => Err(self.error_here(format!(
                "expected expression, found {}",
                self.current.kind
            ))),
        }
    }

    fn parse_new_expression(&mut self) -> PResult<Expression> {
        let start = self.current.span;
        self.advance(); // consume 'new'
        let proto = self.parse_prototype()?;

        self.expect(&TokenKind::LeftBrace)?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            let field_span = self.current.span;
            let name = self.expect_identifier()?;
            self.expect(&TokenKind::Colon)?;
            let value = self.parse_expression()?;
            fields.push(FieldInit {
                name,
                value,
                index: None,
                span: field_span.to(self.previous.span),
            });
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.expect(&TokenKind::RightBrace)?;

        Ok(Expression::new(
            ExprKind::New(NewExpression { proto, fields }),
            start.to(self.previous.span),
        ))
    }
}
