//! Tokenizer for Quartz source files.
//!
//! A straightforward hand-written scanner over the source bytes. Multi-byte
//! operators are matched longest-first, keywords are resolved through a lazy
//! table, and every token carries the byte span it was scanned from.

mod token;

pub use token::{keyword_kind, Token, TokenKind};

use crate::errors::{Error, Result};
use crate::source_map::Span;

pub struct Lexer<'a> {
    input: &'a [u8],
    position: usize,
    source: u16,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    /// `source` is the source map index of `input`, stamped into every span.
    pub fn new(input: &'a str, source: u16) -> Self {
        Lexer {
            input: input.as_bytes(),
            position: 0,
            source,
            tokens: Vec::new(),
        }
    }

    pub fn lex(mut self) -> Result<Vec<Token>> {
        loop {
            self.skip_trivia()?;
            if self.position >= self.input.len() {
                break;
            }

            let start = self.position;
            let byte = self.input[self.position];

            match byte {
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.lex_identifier(),
                b'0'..=b'9' => self.lex_number()?,
                b'"' => self.lex_string()?,
                b'\'' => self.lex_char()?,
                _ => self.lex_operator()?,
            }

            debug_assert!(self.position > start, "lexer did not advance");
        }

        let end = Span::new(self.input.len(), self.input.len(), self.source);
        self.tokens.push(Token::new(TokenKind::Eof, "", end));

        Ok(self.tokens)
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(start, self.position, self.source)
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.input.get(self.position + offset).copied()
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match self.peek(0) {
                Some(byte) if byte.is_ascii_whitespace() => self.position += 1,
                Some(b'/') if self.peek(1) == Some(b'/') => {
                    while let Some(byte) = self.peek(0) {
                        self.position += 1;
                        if byte == b'\n' {
                            break;
                        }
                    }
                }
                Some(b'/') if self.peek(1) == Some(b'*') => {
                    let start = self.position;
                    self.position += 2;

                    loop {
                        match (self.peek(0), self.peek(1)) {
                            (Some(b'*'), Some(b'/')) => {
                                self.position += 2;
                                break;
                            }
                            (Some(_), _) => self.position += 1,
                            (None, _) => {
                                return Err(Error::new(
                                    self.span_from(start),
                                    "unterminated block comment",
                                ));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn lex_identifier(&mut self) {
        let start = self.position;
        while let Some(byte) = self.peek(0) {
            if byte.is_ascii_alphanumeric() || byte == b'_' {
                self.position += 1;
            } else {
                break;
            }
        }

        let word = std::str::from_utf8(&self.input[start..self.position]).unwrap();
        let span = self.span_from(start);

        match keyword_kind(word) {
            Some(kind) => self.tokens.push(Token::new(kind, word, span)),
            None => self
                .tokens
                .push(Token::new(TokenKind::Identifier, word, span)),
        }
    }

    fn lex_number(&mut self) -> Result<()> {
        let start = self.position;

        // Base prefixes only apply to integer literals.
        if self.peek(0) == Some(b'0') {
            match self.peek(1) {
                Some(b'x') | Some(b'X') => return self.lex_radix_integer(start, 16),
                Some(b'b') | Some(b'B') => return self.lex_radix_integer(start, 2),
                Some(b'o') | Some(b'O') => return self.lex_radix_integer(start, 8),
                _ => {}
            }
        }

        while matches!(self.peek(0), Some(b'0'..=b'9')) {
            self.position += 1;
        }

        let mut is_float = false;
        if self.peek(0) == Some(b'.') && matches!(self.peek(1), Some(b'0'..=b'9')) {
            is_float = true;
            self.position += 1;
            while matches!(self.peek(0), Some(b'0'..=b'9')) {
                self.position += 1;
            }
        }

        let text = std::str::from_utf8(&self.input[start..self.position]).unwrap();
        let span = self.span_from(start);

        if is_float {
            self.tokens.push(Token::new(TokenKind::Float, text, span));
            return Ok(());
        }

        if text.parse::<u64>().is_err() {
            return Err(Error::new(span, format!("integer literal '{text}' is too large")));
        }

        self.tokens.push(Token::new(TokenKind::Integer, text, span));
        Ok(())
    }

    fn lex_radix_integer(&mut self, start: usize, radix: u32) -> Result<()> {
        self.position += 2;

        let digits_start = self.position;
        while let Some(byte) = self.peek(0) {
            if (byte as char).is_digit(radix) || byte == b'_' {
                self.position += 1;
            } else {
                break;
            }
        }

        let digits = std::str::from_utf8(&self.input[digits_start..self.position]).unwrap();
        let digits = digits.replace('_', "");
        let span = self.span_from(start);

        if digits.is_empty() {
            return Err(Error::new(span, "missing digits in integer literal"));
        }

        let Ok(value) = u64::from_str_radix(&digits, radix) else {
            return Err(Error::new(span, "integer literal is too large"));
        };

        // Normalized to decimal so the parser has a single representation.
        self.tokens
            .push(Token::new(TokenKind::Integer, value.to_string(), span));
        Ok(())
    }

    fn lex_string(&mut self) -> Result<()> {
        let start = self.position;
        self.position += 1;

        loop {
            match self.peek(0) {
                Some(b'"') => {
                    self.position += 1;
                    break;
                }
                Some(b'\\') => self.position += 2,
                Some(_) => self.position += 1,
                None => {
                    return Err(Error::new(self.span_from(start), "unterminated string literal"));
                }
            }
        }

        let raw = std::str::from_utf8(&self.input[start + 1..self.position - 1])
            .map_err(|_| Error::new(self.span_from(start), "string literal is not valid UTF-8"))?;
        let span = self.span_from(start);

        let Some(value) = unescape::unescape(raw) else {
            return Err(Error::new(span, "invalid escape sequence in string literal"));
        };

        self.tokens.push(Token::new(TokenKind::String, value, span));
        Ok(())
    }

    fn lex_char(&mut self) -> Result<()> {
        let start = self.position;
        self.position += 1;

        let mut raw = String::new();
        loop {
            match self.peek(0) {
                Some(b'\'') => {
                    self.position += 1;
                    break;
                }
                Some(b'\\') => {
                    raw.push('\\');
                    if let Some(next) = self.peek(1) {
                        raw.push(next as char);
                    }
                    self.position += 2;
                }
                Some(byte) => {
                    raw.push(byte as char);
                    self.position += 1;
                }
                None => {
                    return Err(Error::new(
                        self.span_from(start),
                        "unterminated character literal",
                    ));
                }
            }
        }

        let span = self.span_from(start);
        let Some(value) = unescape::unescape(&raw) else {
            return Err(Error::new(span, "invalid escape sequence in character literal"));
        };

        if value.chars().count() != 1 {
            return Err(Error::new(span, "character literal must contain exactly one character"));
        }

        self.tokens.push(Token::new(TokenKind::Char, value, span));
        Ok(())
    }

    fn lex_operator(&mut self) -> Result<()> {
        use TokenKind::*;

        let start = self.position;

        // Longest match first.
        static OPERATORS: &[(&str, TokenKind)] = &[
            ("...", Ellipsis),
            ("<<", Shl),
            (">>", Shr),
            ("==", Eq),
            ("!=", Neq),
            (">=", Gte),
            ("<=", Lte),
            ("&&", LogicalAnd),
            ("||", LogicalOr),
            ("::", DoubleColon),
            ("->", Arrow),
            ("=>", FatArrow),
            ("+=", AddAssign),
            ("-=", SubAssign),
            ("*=", MulAssign),
            ("/=", DivAssign),
            ("+", Add),
            ("-", Sub),
            ("*", Mul),
            ("/", Div),
            ("%", Mod),
            ("!", Not),
            ("|", Or),
            ("&", And),
            ("~", BinaryNot),
            ("^", Xor),
            (">", Gt),
            ("<", Lt),
            ("=", Assign),
            ("(", LParen),
            (")", RParen),
            ("{", LBrace),
            ("}", RBrace),
            ("[", LBracket),
            ("]", RBracket),
            (",", Comma),
            (";", SemiColon),
            (":", Colon),
            (".", Dot),
            ("?", Question),
            ("#", Hash),
        ];

        let remaining = &self.input[self.position..];
        for (text, kind) in OPERATORS {
            if remaining.starts_with(text.as_bytes()) {
                self.position += text.len();
                self.tokens
                    .push(Token::new(*kind, *text, self.span_from(start)));
                return Ok(());
            }
        }

        self.position += 1;
        Err(Error::new(
            self.span_from(start),
            format!("unknown character '{}'", self.input[start] as char),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input, 1)
            .lex()
            .unwrap()
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn test_lex_function_header() {
        use TokenKind::*;

        assert_eq!(
            kinds("func main() -> i32 {}"),
            vec![Func, Identifier, LParen, RParen, Arrow, Identifier, LBrace, RBrace, Eof]
        );
    }

    #[test]
    fn test_lex_numbers() {
        let tokens = Lexer::new("1337 0xff 0b1010 3.25", 1).lex().unwrap();

        assert_eq!(tokens[0].kind, TokenKind::Integer);
        assert_eq!(tokens[0].value, "1337");
        assert_eq!(tokens[1].value, "255");
        assert_eq!(tokens[2].value, "10");
        assert_eq!(tokens[3].kind, TokenKind::Float);
        assert_eq!(tokens[3].value, "3.25");
    }

    #[test]
    fn test_lex_spans() {
        let tokens = Lexer::new("let a = 1;", 7).lex().unwrap();

        assert_eq!(tokens[0].span, Span::new(0, 3, 7));
        assert_eq!(tokens[1].span, Span::new(4, 5, 7));
        assert_eq!(tokens[3].span, Span::new(8, 9, 7));
    }

    #[test]
    fn test_lex_string_escapes() {
        let tokens = Lexer::new(r#""a\nb""#, 1).lex().unwrap();
        assert_eq!(tokens[0].value, "a\nb");
    }

    #[test]
    fn test_lex_multi_byte_operators() {
        use TokenKind::*;

        assert_eq!(
            kinds("a << b >>= == != ..."),
            vec![
                Identifier, Shl, Identifier, Shr, Assign, Eq, Neq, Ellipsis, Eof
            ]
        );
    }

    #[test]
    fn test_lex_comments_are_skipped() {
        use TokenKind::*;

        assert_eq!(
            kinds("let // line\n/* block\n still */ x"),
            vec![Let, Identifier, Eof]
        );
    }

    #[test]
    fn test_lex_unknown_character() {
        let error = Lexer::new("let $", 1).lex().unwrap_err();
        assert!(error.message().contains("unknown character"));
        assert_eq!(error.span().start, 4);
    }

    #[test]
    fn test_lex_integer_overflow() {
        let error = Lexer::new("99999999999999999999999", 1).lex().unwrap_err();
        assert!(error.message().contains("too large"));
    }

    #[test]
    fn test_lex_unterminated_string() {
        let error = Lexer::new("\"oops", 1).lex().unwrap_err();
        assert!(error.message().contains("unterminated string"));
    }
}
