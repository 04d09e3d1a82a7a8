//! The prototype specification sub-grammar (type annotations).
//!
//! ```text
//! proto := IDENT ("<" proto ("," proto)* ">")?
//!        | "fn" "(" (proto ("," proto)*)? ")" ("->" proto)?
//! ```
//!
//! Prototypes are only parsed here; whether a name denotes a type is decided
//! by the analyzer.

use super::parser::{PResult, Parser};
use crate::ast::{Prototype, PrototypeKind};
use crate::lexer::TokenKind;
use crate::sema::Primitive;

impl Parser {
    /// Parses one prototype.
    pub fn parse_prototype(&mut self) -> PResult<Prototype> {
        let start = self.current.span;

        if self.check(&TokenKind::Fn) {
            self.advance();
            self.expect(&TokenKind::LeftParen)?;
            let mut params = Vec::new();
            if !self.check(&TokenKind::RightParen) {
                loop {
                    params.push(self.parse_prototype()?);
                    if !self.check(&TokenKind::Comma) {
                        break;
                    }
                    self.advance();
                }
            }
            self.expect(&TokenKind::RightParen)?;
            let ret = if self.check(&TokenKind::Arrow) {
                self.advance();
                Some(Box::new(self.parse_prototype()?))
            } else {
                None
            };
            return Ok(Prototype {
                kind: PrototypeKind::Function { params, ret },
                span: start.to(self.previous.span),
            });
        }

        let name = self.expect_identifier()?;
        // Scalars never take arguments, which keeps `x as i32 < y` a comparison.
        let args = if self.check(&TokenKind::LessThan) && !is_scalar(&name) {
            self.parse_prototype_args()?
        } else {
            Vec::new()
        };

        Ok(Prototype {
            kind: PrototypeKind::Named { name, args },
            span: start.to(self.previous.span),
        })
    }

    /// Parses a prototype that must make up the whole token stream.
    pub fn parse_standalone_prototype(&mut self) -> PResult<Prototype> {
        let proto = self.parse_prototype()?;
        if !self.is_at_end() {
            return Err(self.error_here(format!(
                "unexpected {:?} after prototype",
                self.current.kind
            )));
        }
        Ok(proto)
    }

    /// Parses `<proto, ...>`.
    pub(super) fn parse_prototype_args(&mut self) -> PResult<Vec<Prototype>> {
        self.expect(&TokenKind::LessThan)?;
        let mut args = Vec::new();
        loop {
            args.push(self.parse_prototype()?);
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.expect_closing_angle()?;
        Ok(args)
    }
}

fn is_scalar(name: &str) -> bool {
    Primitive::from_name(name).is_some()
}

#[cfg(test)]
mod tests {
    use crate::ast::{Prototype, PrototypeKind};
    use crate::lexer::Scanner;
    use crate::parser::Parser;
    use crate::unit::CompilationUnit;

    fn proto(src: &str) -> Prototype {
        let mut unit = CompilationUnit::new("test.lm");
        let stream = Scanner::analyze(src, &mut unit);
        Parser::new(stream).parse_prototype().expect("Should parse")
    }

    #[test]
    fn test_named() {
        let p = proto("i32");
        assert!(matches!(p.kind, PrototypeKind::Named { ref name, ref args } if name == "i32" && args.is_empty()));
    }

    #[test]
    fn test_generic_args() {
        let p = proto("Pair<i32, array<string>>");
        let PrototypeKind::Named { name, args } = p.kind else {
            panic!("expected named");
        };
        assert_eq!(name, "Pair");
        assert_eq!(args.len(), 2);
        assert!(matches!(&args[1].kind, PrototypeKind::Named { name, args } if name == "array" && args.len() == 1));
    }

    #[test]
    fn test_function_prototype() {
        let p = proto("fn(i32, f32) -> bool");
        let PrototypeKind::Function { params, ret } = p.kind else {
            panic!("expected function");
        };
        assert_eq!(params.len(), 2);
        assert!(ret.is_some());
    }

    #[test]
    fn test_scalar_does_not_take_arguments() {
        let mut unit = CompilationUnit::new("test.lm");
        let stream = Scanner::analyze("i32 < 3", &mut unit);
        let mut parser = Parser::new(stream);
        let p = parser.parse_prototype().unwrap();
        assert!(matches!(p.kind, PrototypeKind::Named { ref args, .. } if args.is_empty()));
    }
}
