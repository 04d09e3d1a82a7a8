//! The main parser implementation: token plumbing, recovery and statements.

use crate::ast::*;
use crate::lexer::{Span, Token, TokenKind, TokenStream};
use crate::unit::CompilationUnit;

/// A local syntax error. Recorded as a fatal diagnostic by the statement
/// loop, which then resynchronizes.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    /// Where the error was found
    pub span: Span,
    /// What was wrong
    pub message: String,
}

pub(super) type PResult<T> = Result<T, ParseError>;

/// A recursive descent parser over a [`TokenStream`].
pub struct Parser {
    tokens: std::vec::IntoIter<Token>,
    pub(super) current: Token,
    pub(super) previous: Token,
}

impl Parser {
    /// Creates a new parser for the given token stream.
    pub fn new(stream: TokenStream) -> Self {
        let mut tokens = stream.into_tokens().into_iter();
        let eof = Token::new(TokenKind::Eof, Span::new(0, 0, 1, 1));
        let current = tokens.next().unwrap_or_else(|| eof.clone());
        Self {
            tokens,
            current,
            previous: eof,
        }
    }

    /// Parses a whole token stream into a program, reporting syntax errors
    /// to `unit`.
    pub fn parse(stream: TokenStream, unit: &mut CompilationUnit) -> Program {
        Parser::new(stream).parse_program(unit)
    }

    /// Parses the remaining tokens into a Program AST node.
    ///
    /// Never fails: statements that do not parse become
    /// [`Statement::Invalid`] and parsing resumes at the next statement
    /// boundary.
    pub fn parse_program(&mut self, unit: &mut CompilationUnit) -> Program {
        let mut body = Vec::new();

        while !self.is_at_end() {
            body.push(self.parse_item_recovering(unit));
        }

        tracing::debug!(items = body.len(), "parsed program");
        Program { body }
    }

    fn parse_item_recovering(&mut self, unit: &mut CompilationUnit) -> Statement {
        let start = self.current.span;
        match self.parse_statement() {
            Ok(statement) => statement,
            Err(error) => {
                // The scanner already reported invalid tokens.
                if self.current.kind != TokenKind::Invalid
                    && self.previous.kind != TokenKind::Invalid
                {
                    unit.fatal(error.span, error.message);
                }
                self.synchronize();
                Statement::Invalid(start.to(self.previous.span))
            }
        }
    }

    /// Skips tokens until a statement boundary: just past `;` or `}`, or at
    /// a statement keyword.
    fn synchronize(&mut self) {
        if self.current.kind == TokenKind::Eof {
            return;
        }
        self.advance();
        while !self.is_at_end() {
            if matches!(
                self.previous.kind,
                TokenKind::Semicolon | TokenKind::RightBrace
            ) {
                return;
            }
            if self.current.kind.starts_statement() {
                return;
            }
            self.advance();
        }
    }

    /// Parses a single statement or declaration.
    pub fn parse_statement(&mut self) -> PResult<Statement> {
        match &self.current.kind {
            TokenKind::Fn => self.parse_function_declaration(),
            TokenKind::Struct => self.parse_struct_declaration(),
            TokenKind::Enum => self.parse_enum_declaration(),
            TokenKind::Let | TokenKind::Const => Ok(Statement::Let(self.parse_let()?)),
            TokenKind::If => self.parse_if_statement(),
            TokenKind::While => self.parse_while_statement(),
            TokenKind::For => self.parse_for_statement(),
            TokenKind::Return => self.parse_return_statement(),
            TokenKind::Throw => self.parse_throw_statement(),
            TokenKind::Try => self.parse_try_statement(),
            TokenKind::Break => {
                let span = self.current.span;
                self.advance();
                self.expect(&TokenKind::Semicolon)?;
                Ok(Statement::Break(span))
            }
            TokenKind::Continue => {
                let span = self.current.span;
                self.advance();
                self.expect(&TokenKind::Semicolon)?;
                Ok(Statement::Continue(span))
            }
            TokenKind::LeftBrace => Ok(Statement::Block(self.parse_block()?)),
            TokenKind::Semicolon => {
                let span = self.current.span;
                self.advance();
                Ok(Statement::Empty(span))
            }
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_function_declaration(&mut self) -> PResult<Statement> {
        let start = self.current.span;
        self.advance(); // consume 'fn'
        let name = self.expect_identifier()?;
        let type_params = self.parse_type_params()?;

        self.expect(&TokenKind::LeftParen)?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                let span = self.current.span;
                let name = self.expect_identifier()?;
                self.expect(&TokenKind::Colon)?;
                let proto = self.parse_prototype()?;
                params.push(Parameter {
                    name,
                    proto,
                    span: span.to(self.previous.span),
                });
                if !self.check(&TokenKind::Comma) {
                    break;
                }
                self.advance();
            }
        }
        self.expect(&TokenKind::RightParen)?;

        let return_type = if self.check(&TokenKind::Arrow) {
            self.advance();
            Some(self.parse_prototype()?)
        } else {
            None
        };

        let body = self.parse_block()?;
        Ok(Statement::Function(FunctionDeclaration {
            name,
            type_params,
            params,
            return_type,
            body,
            span: start.to(self.previous.span),
        }))
    }

    /// Parses `<T, U>` after a declaration name.
    fn parse_type_params(&mut self) -> PResult<Vec<String>> {
        let mut names = Vec::new();
        if !self.check(&TokenKind::LessThan) {
            return Ok(names);
        }
        self.advance();
        loop {
            names.push(self.expect_identifier()?);
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.expect_closing_angle()?;
        Ok(names)
    }

    fn parse_struct_declaration(&mut self) -> PResult<Statement> {
        let start = self.current.span;
        self.advance(); // consume 'struct'
        let name = self.expect_identifier()?;
        let type_params = self.parse_type_params()?;

        let base = if self.check(&TokenKind::Colon) {
            self.advance();
            Some(self.parse_prototype()?)
        } else {
            None
        };

        self.expect(&TokenKind::LeftBrace)?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            let span = self.current.span;
            let name = self.expect_identifier()?;
            self.expect(&TokenKind::Colon)?;
            let proto = self.parse_prototype()?;
            self.expect(&TokenKind::Semicolon)?;
            fields.push(FieldDeclaration {
                name,
                proto,
                span: span.to(self.previous.span),
            });
        }
        self.expect(&TokenKind::RightBrace)?;

        Ok(Statement::Struct(StructDeclaration {
            name,
            type_params,
            base,
            fields,
            span: start.to(self.previous.span),
        }))
    }

    fn parse_enum_declaration(&mut self) -> PResult<Statement> {
        let start = self.current.span;
        self.advance(); // consume 'enum'
        let name = self.expect_identifier()?;
        self.expect(&TokenKind::LeftBrace)?;

        let mut members = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            let span = self.current.span;
            let name = self.expect_identifier()?;
            let initializer = if self.check(&TokenKind::Equal) {
                self.advance();
                Some(self.parse_expression()?)
            } else {
                None
            };
            members.push(EnumMember {
                name,
                initializer,
                span: span.to(self.previous.span),
            });
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.expect(&TokenKind::RightBrace)?;

        Ok(Statement::Enum(EnumDeclaration {
            name,
            members,
            span: start.to(self.previous.span),
        }))
    }

    /// Parses `let`/`const` including the trailing semicolon.
    fn parse_let(&mut self) -> PResult<LetStatement> {
        let start = self.current.span;
        let mutable = self.current.kind == TokenKind::Let;
        self.advance();

        let name = self.expect_identifier()?;
        let proto = if self.check(&TokenKind::Colon) {
            self.advance();
            Some(self.parse_prototype()?)
        } else {
            None
        };
        let init = if self.check(&TokenKind::Equal) {
            self.advance();
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect(&TokenKind::Semicolon)?;

        Ok(LetStatement {
            name,
            mutable,
            proto,
            init,
            span: start.to(self.previous.span),
            target: None,
            ty: None,
        })
    }

    fn parse_if_statement(&mut self) -> PResult<Statement> {
        let start = self.current.span;
        self.advance(); // consume 'if'
        self.expect(&TokenKind::LeftParen)?;
        let test = self.parse_expression()?;
        self.expect(&TokenKind::RightParen)?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.check(&TokenKind::Else) {
            self.advance();
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Statement::If(IfStatement {
            test,
            consequent,
            alternate,
            span: start.to(self.previous.span),
        }))
    }

    fn parse_while_statement(&mut self) -> PResult<Statement> {
        let start = self.current.span;
        self.advance(); // consume 'while'
        self.expect(&TokenKind::LeftParen)?;
        let test = self.parse_expression()?;
        self.expect(&TokenKind::RightParen)?;
        let body = Box::new(self.parse_statement()?);
        Ok(Statement::While(WhileStatement {
            test,
            body,
            span: start.to(self.previous.span),
        }))
    }

    fn parse_for_statement(&mut self) -> PResult<Statement> {
        let start = self.current.span;
        self.advance(); // consume 'for'
        self.expect(&TokenKind::LeftParen)?;

        let init = match &self.current.kind {
            TokenKind::Let | TokenKind::Const => Some(Box::new(Statement::Let(self.parse_let()?))),
            TokenKind::Semicolon => {
                self.advance();
                None
            }
            _ => Some(Box::new(self.parse_expression_statement()?)),
        };

        let test = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&TokenKind::Semicolon)?;

        let update = if self.check(&TokenKind::RightParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&TokenKind::RightParen)?;

        let body = Box::new(self.parse_statement()?);
        Ok(Statement::For(ForStatement {
            init,
            test,
            update,
            body,
            span: start.to(self.previous.span),
        }))
    }

    fn parse_return_statement(&mut self) -> PResult<Statement> {
        let start = self.current.span;
        self.advance(); // consume 'return'
        let argument = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&TokenKind::Semicolon)?;
        Ok(Statement::Return(ReturnStatement {
            argument,
            span: start.to(self.previous.span),
        }))
    }

    fn parse_throw_statement(&mut self) -> PResult<Statement> {
        let start = self.current.span;
        self.advance(); // consume 'throw'
        let argument = self.parse_expression()?;
        self.expect(&TokenKind::Semicolon)?;
        Ok(Statement::Throw(ThrowStatement {
            argument,
            span: start.to(self.previous.span),
        }))
    }

    fn parse_try_statement(&mut self) -> PResult<Statement> {
        let start = self.current.span;
        self.advance(); // consume 'try'
        let block = self.parse_block()?;

        let handler = if self.check(&TokenKind::Catch) {
            let catch_start = self.current.span;
            self.advance();
            let param = if self.check(&TokenKind::LeftParen) {
                self.advance();
                let name = self.expect_identifier()?;
                self.expect(&TokenKind::RightParen)?;
                Some(name)
            } else {
                None
            };
            let body = self.parse_block()?;
            Some(CatchClause {
                param,
                body,
                local: None,
                span: catch_start.to(self.previous.span),
            })
        } else {
            None
        };

        Ok(Statement::Try(TryStatement {
            block,
            handler,
            span: start.to(self.previous.span),
        }))
    }

    pub(super) fn parse_block(&mut self) -> PResult<BlockStatement> {
        let start = self.current.span;
        self.expect(&TokenKind::LeftBrace)?;
        let mut body = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            body.push(self.parse_statement()?);
        }
        self.expect(&TokenKind::RightBrace)?;
        Ok(BlockStatement {
            body,
            span: start.to(self.previous.span),
        })
    }

    fn parse_expression_statement(&mut self) -> PResult<Statement> {
        let start = self.current.span;
        let expression = self.parse_expression()?;
        self.expect(&TokenKind::Semicolon)?;
        Ok(Statement::Expression(ExpressionStatement {
            expression,
            span: start.to(self.previous.span),
        }))
    }

    // ========================================================================
    // Token helpers
    // ========================================================================

    pub(super) fn advance(&mut self) {
        let next = self.tokens.next().unwrap_or_else(|| {
            let end = self.current.span;
            Token::new(TokenKind::Eof, Span::new(end.end, end.end, end.line, end.column))
        });
        self.previous = std::mem::replace(&mut self.current, next);
    }

    pub(super) fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current.kind) == std::mem::discriminant(kind)
    }

    pub(super) fn expect(&mut self, kind: &TokenKind) -> PResult<()> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error_here(format!("expected '{}', found {}", kind, self.current.kind)))
        }
    }

    /// Consumes a `>` closing a generic list, splitting `>>` in two.
    pub(super) fn expect_closing_angle(&mut self) -> PResult<()> {
        match self.current.kind {
            TokenKind::GreaterThan => {
                self.advance();
                Ok(())
            }
            TokenKind::RightShift => {
                let span = self.current.span;
                self.previous = Token::new(
                    TokenKind::GreaterThan,
                    Span::new(span.start, span.start + 1, span.line, span.column),
                );
                self.current = Token::new(
                    TokenKind::GreaterThan,
                    Span::new(span.start + 1, span.end, span.line, span.column + 1),
                );
                Ok(())
            }
            _ => Err(self.error_here(format!("expected '>', found {}", self.current.kind))),
        }
    }

    pub(super) fn expect_identifier(&mut self) -> PResult<String> {
        if let TokenKind::Identifier(name) = &self.current.kind {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.error_here(format!(
                "expected identifier, found {}",
                self.current.kind
            )))
        }
    }

    pub(super) fn error_here(&self, message: String) -> ParseError {
        ParseError {
            span: self.current.span,
            message,
        }
    }

    pub(super) fn is_at_end(&self) -> bool {
        matches!(self.current.kind, TokenKind::Eof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Scanner;

    fn parse(src: &str) -> (Program, CompilationUnit) {
        let mut unit = CompilationUnit::new("test.lm");
        let stream = Scanner::analyze(src, &mut unit);
        let program = Parser::parse(stream, &mut unit);
        (program, unit)
    }

    // Helper to parse and get first statement
    fn parse_stmt(src: &str) -> Statement {
        let (program, unit) = parse(src);
        assert!(!unit.has_fatal(), "{:?}", unit.diagnostics());
        program.body.into_iter().next().unwrap()
    }

    #[test]
    fn test_parse_let() {
        let Statement::Let(decl) = parse_stmt("let x: i32 = 42;") else {
            panic!("expected let");
        };
        assert_eq!(decl.name, "x");
        assert!(decl.mutable);
        assert!(decl.proto.is_some());
        assert!(matches!(
            decl.init.unwrap().kind,
            ExprKind::Literal(Literal::Integer(42))
        ));
    }

    #[test]
    fn test_parse_const() {
        let Statement::Let(decl) = parse_stmt("const LIMIT = 10;") else {
            panic!("expected const");
        };
        assert!(!decl.mutable);
    }

    #[test]
    fn test_parse_function_declaration() {
        let Statement::Function(func) = parse_stmt("fn add(a: i32, b: i32) -> i32 { return a + b; }")
        else {
            panic!("expected fn");
        };
        assert_eq!(func.name, "add");
        assert_eq!(func.params.len(), 2);
        assert!(func.return_type.is_some());
        assert_eq!(func.body.body.len(), 1);
    }

    #[test]
    fn test_parse_generic_function() {
        let Statement::Function(func) = parse_stmt("fn id<T>(x: T) -> T { return x; }") else {
            panic!("expected fn");
        };
        assert_eq!(func.type_params, vec!["T".to_string()]);
    }

    #[test]
    fn test_parse_struct_with_base() {
        let Statement::Struct(decl) =
            parse_stmt("struct Circle : Shape { radius: f32; tags: array<string>; }")
        else {
            panic!("expected struct");
        };
        assert_eq!(decl.name, "Circle");
        assert!(decl.base.is_some());
        assert_eq!(decl.fields.len(), 2);
    }

    #[test]
    fn test_parse_nested_generic_closing_shift() {
        let Statement::Let(decl) = parse_stmt("let grid: array<array<i32>> = [];") else {
            panic!("expected let");
        };
        let Some(Prototype {
            kind: PrototypeKind::Named { name, args },
            ..
        }) = decl.proto
        else {
            panic!("expected named prototype");
        };
        assert_eq!(name, "array");
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn test_parse_enum() {
        let Statement::Enum(decl) = parse_stmt("enum Color { Red, Green = 5, Blue, }") else {
            panic!("expected enum");
        };
        assert_eq!(decl.members.len(), 3);
        assert!(decl.members[1].initializer.is_some());
    }

    #[test]
    fn test_parse_control_flow() {
        assert!(matches!(parse_stmt("if (a) b; else c;"), Statement::If(_)));
        assert!(matches!(parse_stmt("while (true) {}"), Statement::While(_)));
        assert!(matches!(
            parse_stmt("for (let i = 0; i < 10; i++) {}"),
            Statement::For(_)
        ));
        let Statement::For(f) = parse_stmt("for (;;) break;") else {
            panic!("expected for");
        };
        assert!(f.init.is_none() && f.test.is_none() && f.update.is_none());
    }

    #[test]
    fn test_parse_try_catch() {
        let Statement::Try(t) = parse_stmt("try { throw 1; } catch (e) { }") else {
            panic!("expected try");
        };
        assert_eq!(t.handler.unwrap().param.as_deref(), Some("e"));

        let Statement::Try(t) = parse_stmt("try { } catch { }") else {
            panic!("expected try");
        };
        assert!(t.handler.unwrap().param.is_none());
    }

    #[test]
    fn test_recovery_continues_after_error() {
        let (program, unit) = parse("let = 5; let y = 1;");
        assert!(unit.has_fatal());
        assert_eq!(program.body.len(), 2);
        assert!(matches!(program.body[0], Statement::Invalid(_)));
        assert!(matches!(program.body[1], Statement::Let(_)));
    }

    #[test]
    fn test_recovery_at_statement_keyword() {
        let (program, unit) = parse("x + ; fn f() {}");
        assert_eq!(unit.diagnostics().len(), 1);
        assert!(matches!(program.body.last(), Some(Statement::Function(_))));
    }

    #[test]
    fn test_missing_semicolon_is_fatal() {
        let (_, unit) = parse("let x = 1");
        assert!(unit.has_fatal());
        assert!(unit.diagnostics()[0].message.contains("expected ';'"));
    }
}
