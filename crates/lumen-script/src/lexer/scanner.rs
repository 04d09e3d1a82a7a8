//! The scanner that produces tokens from source text.

use unicode_xid::UnicodeXID;

use super::{Span, Token, TokenKind, TokenStream};
use crate::unit::CompilationUnit;

/// A scanner that tokenizes script source code.
pub struct Scanner<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    current_pos: usize,
    line: u32,
    column: u32,
    /// Problems found while scanning, reported once the token is complete
    errors: Vec<(Span, String)>,
}

impl<'a> Scanner<'a> {
    /// Creates a new scanner for the given source code.
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            current_pos: 0,
            line: 1,
            column: 1,
            errors: Vec::new(),
        }
    }

    /// Scans all of `source`, recording every malformed token in `unit`.
    ///
    /// Never fails: bad input yields `Invalid` tokens and the stream always
    /// ends with `Eof`.
    pub fn analyze(source: &str, unit: &mut CompilationUnit) -> TokenStream {
        let mut scanner = Scanner::new(source);
        let mut tokens = Vec::new();
        loop {
            let token = scanner.next_token();
            for (span, message) in scanner.errors.drain(..) {
                unit.fatal(span, message);
            }
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        tracing::trace!(count = tokens.len(), "scanned tokens");
        TokenStream::new(tokens)
    }

    /// Returns the next token from the source.
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();

        let start = self.current_pos;
        let (line, column) = (self.line, self.column);

        let Some((_pos, ch)) = self.advance() else {
            return Token::new(TokenKind::Eof, Span::new(start, start, line, column));
        };

        let kind = match ch {
            // Single-character tokens
            '{' => TokenKind::LeftBrace,
            '}' => TokenKind::RightBrace,
            '(' => TokenKind::LeftParen,
            ')' => TokenKind::RightParen,
            '[' => TokenKind::LeftBracket,
            ']' => TokenKind::RightBracket,
            ';' => TokenKind::Semicolon,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            '~' => TokenKind::Tilde,
            '^' => TokenKind::Caret,

            // Multi-character tokens
            ':' => self.scan_colon(),
            '+' => self.scan_plus(),
            '-' => self.scan_minus(),
            '*' => self.either('=', TokenKind::StarEqual, TokenKind::Star),
            '/' => self.either('=', TokenKind::SlashEqual, TokenKind::Slash),
            '%' => self.either('=', TokenKind::PercentEqual, TokenKind::Percent),
            '<' => self.scan_less_than(),
            '>' => self.scan_greater_than(),
            '=' => self.either('=', TokenKind::EqualEqual, TokenKind::Equal),
            '!' => self.either('=', TokenKind::NotEqual, TokenKind::Bang),
            '&' => self.either('&', TokenKind::AmpersandAmpersand, TokenKind::Ampersand),
            '|' => self.either('|', TokenKind::PipePipe, TokenKind::Pipe),

            // String literals
            '"' => self.scan_string(start, line, column),

            // Numbers
            '0'..='9' => self.scan_number(ch, start, line, column),

            // Identifiers and keywords
            _ if is_id_start(ch) => self.scan_identifier(ch),

            _ => {
                self.error(start, line, column, format!("unexpected character '{}'", ch));
                TokenKind::Invalid
            }
        };

        Token::new(kind, Span::new(start, self.current_pos, line, column))
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        let result = self.chars.next();
        if let Some((pos, ch)) = result {
            self.current_pos = pos + ch.len_utf8();
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        result
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, ch)| *ch)
    }

    fn peek_next(&self) -> Option<char> {
        let mut iter = self.chars.clone();
        iter.next();
        iter.next().map(|(_, ch)| ch)
    }

    fn error(&mut self, start: usize, line: u32, column: u32, message: String) {
        let span = Span::new(start, self.current_pos, line, column);
        self.errors.push((span, message));
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\n' | '\r') => {
                    self.advance();
                }
                Some('/') => match self.peek_next() {
                    Some('/') => {
                        while let Some(ch) = self.peek() {
                            if ch == '\n' {
                                break;
                            }
                            self.advance();
                        }
                    }
                    Some('*') => {
                        let (start, line, column) = (self.current_pos, self.line, self.column);
                        self.advance();
                        self.advance();
                        let mut prev = ' ';
                        let mut closed = false;
                        while let Some((_, ch)) = self.advance() {
                            if prev == '*' && ch == '/' {
                                closed = true;
                                break;
                            }
                            prev = ch;
                        }
                        if !closed {
                            self.error(start, line, column, "unterminated block comment".into());
                        }
                    }
                    _ => break,
                },
                _ => break,
            }
        }
    }

    /// Consumes `next` if present and returns `matched`, else `single`.
    fn either(&mut self, next: char, matched: TokenKind, single: TokenKind) -> TokenKind {
        if self.peek() == Some(next) {
            self.advance();
            matched
        } else {
            single
        }
    }

    fn scan_colon(&mut self) -> TokenKind {
        self.either(':', TokenKind::ColonColon, TokenKind::Colon)
    }

    fn scan_plus(&mut self) -> TokenKind {
        match self.peek() {
            Some('+') => {
                self.advance();
                TokenKind::PlusPlus
            }
            Some('=') => {
                self.advance();
                TokenKind::PlusEqual
            }
            _ => TokenKind::Plus,
        }
    }

    fn scan_minus(&mut self) -> TokenKind {
        match self.peek() {
            Some('-') => {
                self.advance();
                TokenKind::MinusMinus
            }
            Some('=') => {
                self.advance();
                TokenKind::MinusEqual
            }
            Some('>') => {
                self.advance();
                TokenKind::Arrow
            }
            _ => TokenKind::Minus,
        }
    }

    fn scan_less_than(&mut self) -> TokenKind {
        match self.peek() {
            Some('<') => {
                self.advance();
                TokenKind::LeftShift
            }
            Some('=') => {
                self.advance();
                TokenKind::LessThanEqual
            }
            _ => TokenKind::LessThan,
        }
    }

    fn scan_greater_than(&mut self) -> TokenKind {
        match self.peek() {
            Some('>') => {
                self.advance();
                TokenKind::RightShift
            }
            Some('=') => {
                self.advance();
                TokenKind::GreaterThanEqual
            }
            _ => TokenKind::GreaterThan,
        }
    }

    fn scan_string(&mut self, start: usize, line: u32, column: u32) -> TokenKind {
        let mut value = String::new();

        loop {
            match self.advance() {
                None | Some((_, '\n')) => {
                    self.error(start, line, column, "unterminated string literal".into());
                    return TokenKind::Invalid;
                }
                Some((_, '"')) => break,
                Some((pos, '\\')) => {
                    let Some((_, escaped)) = self.advance() else {
                        continue;
                    };
                    match escaped {
                        'n' => value.push('\n'),
                        'r' => value.push('\r'),
                        't' => value.push('\t'),
                        '\\' => value.push('\\'),
                        '"' => value.push('"'),
                        '\'' => value.push('\''),
                        '0' => value.push('\0'),
                        'x' => match self.scan_hex_escape() {
                            Some(ch) => value.push(ch),
                            None => {
                                self.error(pos, line, column, "invalid \\x escape".into());
                                self.skip_to_quote();
                                return TokenKind::Invalid;
                            }
                        },
                        other => {
                            self.error(pos, line, column, format!("unknown escape '\\{}'", other));
                            self.skip_to_quote();
                            return TokenKind::Invalid;
                        }
                    }
                }
                Some((_, ch)) => value.push(ch),
            }
        }

        TokenKind::String(value)
    }

    fn scan_hex_escape(&mut self) -> Option<char> {
        let mut code = 0u32;
        for _ in 0..2 {
            let digit = self.peek()?.to_digit(16)?;
            self.advance();
            code = code * 16 + digit;
        }
        char::from_u32(code).filter(|c| c.is_ascii())
    }

    /// Resynchronizes after a bad escape so the rest of the literal is not
    /// re-scanned as code.
    fn skip_to_quote(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.advance();
            if ch == '"' {
                break;
            }
        }
    }

    fn scan_number(&mut self, first: char, start: usize, line: u32, column: u32) -> TokenKind {
        if first == '0' {
            let radix = match self.peek() {
                Some('x' | 'X') => Some(16),
                Some('b' | 'B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.advance();
                return self.scan_radix_integer(radix, start, line, column);
            }
        }

        let mut text = String::new();
        text.push(first);
        let mut is_float = false;

        self.scan_digits(&mut text);

        // A dot only belongs to the number if a digit follows (`arr.len`
        // after an integer is not valid anyway, but `1..` should not be eaten).
        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            text.push('.');
            self.scan_digits(&mut text);
        }

        if let Some('e' | 'E') = self.peek() {
            is_float = true;
            self.advance();
            text.push('e');
            if let Some(sign @ ('+' | '-')) = self.peek() {
                self.advance();
                text.push(sign);
            }
            if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.error(start, line, column, "missing exponent digits".into());
                return TokenKind::Invalid;
            }
            self.scan_digits(&mut text);
        }

        if self.peek().is_some_and(is_id_continue) {
            while self.peek().is_some_and(is_id_continue) {
                self.advance();
            }
            self.error(start, line, column, "invalid numeric literal".into());
            return TokenKind::Invalid;
        }

        if is_float {
            match text.parse::<f64>() {
                Ok(value) => TokenKind::Float(value),
                Err(_) => {
                    self.error(start, line, column, "invalid float literal".into());
                    TokenKind::Invalid
                }
            }
        } else {
            match text.parse::<i128>() {
                Ok(value) if value <= u64::MAX as i128 => TokenKind::Integer(value),
                _ => {
                    self.error(start, line, column, "integer literal is too large".into());
                    TokenKind::Invalid
                }
            }
        }
    }

    fn scan_digits(&mut self, text: &mut String) {
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                text.push(ch);
                self.advance();
            } else if ch == '_' {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn scan_radix_integer(&mut self, radix: u32, start: usize, line: u32, column: u32) -> TokenKind {
        let mut value: i128 = 0;
        let mut digits = 0;
        let mut overflow = false;
        while let Some(ch) = self.peek() {
            if ch == '_' {
                self.advance();
                continue;
            }
            let Some(digit) = ch.to_digit(radix) else {
                break;
            };
            self.advance();
            digits += 1;
            value = value * radix as i128 + digit as i128;
            if value > u64::MAX as i128 {
                overflow = true;
                value = 0;
            }
        }
        let trailing = self.peek().is_some_and(is_id_continue);
        while self.peek().is_some_and(is_id_continue) {
            self.advance();
        }
        if digits == 0 || trailing {
            self.error(start, line, column, "invalid numeric literal".into());
            TokenKind::Invalid
        } else if overflow {
            self.error(start, line, column, "integer literal is too large".into());
            TokenKind::Invalid
        } else {
            TokenKind::Integer(value)
        }
    }

    fn scan_identifier(&mut self, first: char) -> TokenKind {
        let start = self.current_pos - first.len_utf8();

        while let Some(ch) = self.peek() {
            if is_id_continue(ch) {
                self.advance();
            } else {
                break;
            }
        }

        let ident = &self.source[start..self.current_pos];
        TokenKind::keyword(ident).unwrap_or_else(|| TokenKind::Identifier(ident.to_string()))
    }
}

fn is_id_start(ch: char) -> bool {
    ch == '_' || UnicodeXID::is_xid_start(ch)
}

fn is_id_continue(ch: char) -> bool {
    UnicodeXID::is_xid_continue(ch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut unit = CompilationUnit::new("test.lm");
        Scanner::analyze(source, &mut unit)
            .tokens()
            .iter()
            .map(|t| t.kind.clone())
            .collect()
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            kinds("fn main let x"),
            vec![
                TokenKind::Fn,
                TokenKind::Identifier("main".into()),
                TokenKind::Let,
                TokenKind::Identifier("x".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unicode_identifier() {
        assert_eq!(kinds("größe")[0], TokenKind::Identifier("größe".into()));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("42")[0], TokenKind::Integer(42));
        assert_eq!(kinds("1_000")[0], TokenKind::Integer(1000));
        assert_eq!(kinds("0xff")[0], TokenKind::Integer(255));
        assert_eq!(kinds("0b101")[0], TokenKind::Integer(5));
        assert_eq!(kinds("2.5")[0], TokenKind::Float(2.5));
        assert_eq!(kinds("1e3")[0], TokenKind::Float(1000.0));
    }

    #[test]
    fn test_member_after_integer_is_not_float() {
        assert_eq!(
            kinds("a.len"),
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::Dot,
                TokenKind::Identifier("len".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""a\tb\x41\"""#)[0],
            TokenKind::String("a\tbA\"".into())
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds(":: -> += <= >> && ||"),
            vec![
                TokenKind::ColonColon,
                TokenKind::Arrow,
                TokenKind::PlusEqual,
                TokenKind::LessThanEqual,
                TokenKind::RightShift,
                TokenKind::AmpersandAmpersand,
                TokenKind::PipePipe,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            kinds("a // line\n /* block */ b"),
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::Identifier("b".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_line_and_column() {
        let mut unit = CompilationUnit::new("test.lm");
        let stream = Scanner::analyze("let\n  x", &mut unit);
        let x = &stream.tokens()[1];
        assert_eq!((x.span.line, x.span.column), (2, 3));
    }

    #[test]
    fn test_invalid_input_is_reported_and_scanning_continues() {
        let mut unit = CompilationUnit::new("test.lm");
        let stream = Scanner::analyze("let $ = \"open", &mut unit);
        let kinds: Vec<_> = stream.tokens().iter().map(|t| t.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Let,
                TokenKind::Invalid,
                TokenKind::Equal,
                TokenKind::Invalid,
                TokenKind::Eof,
            ]
        );
        assert_eq!(unit.diagnostics().len(), 2);
        assert!(unit.has_fatal());
    }

    #[test]
    fn test_integer_too_large() {
        let mut unit = CompilationUnit::new("test.lm");
        Scanner::analyze("99999999999999999999999", &mut unit);
        assert!(unit.diagnostics()[0].message.contains("too large"));
    }
}
