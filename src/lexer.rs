use crate::error::JitError;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Num(f64),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
    Eof,
}

pub(crate) struct Lexer<'a> {
    text: &'a str,
    src: &'a [u8],
    i: usize,
    start: usize,
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(s: &'a str) -> Self {
        Self {
            text: s,
            src: s.as_bytes(),
            i: 0,
            start: 0,
        }
    }

    /// Byte offset at which the most recently returned token started.
    pub(crate) fn token_start(&self) -> usize {
        self.start
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.i).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let ch = self.src.get(self.i).copied();
        if ch.is_some() {
            self.i += 1;
        }
        ch
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c == b' ' || c == b'\t' || c == b'\r' || c == b'\n' {
                self.i += 1;
            } else {
                break;
            }
        }
    }

    pub(crate) fn next_token(&mut self) -> Result<Token, JitError> {
        self.skip_ws();
        self.start = self.i;
        let c = match self.peek() {
            Some(c) => c,
            None => return Ok(Token::Eof),
        };
        match c {
            b'(' => {
                self.bump();
                Ok(Token::LParen)
            }
            b')' => {
                self.bump();
                Ok(Token::RParen)
            }
            b'+' => {
                self.bump();
                Ok(Token::Plus)
            }
            b'-' => {
                self.bump();
                Ok(Token::Minus)
            }
            b'*' => {
                self.bump();
                Ok(Token::Star)
            }
            b'/' => {
                self.bump();
                Ok(Token::Slash)
            }
            b',' => {
                self.bump();
                Ok(Token::Comma)
            }
            c if c.is_ascii_digit() => self.lex_number(),
            c if c.is_ascii_alphabetic() || c == b'_' => self.lex_ident(),
            _ => Err(JitError::UnexpectedChar {
                offset: self.i,
                // self.i sits on a char boundary: everything consumed so far was ASCII
                found: self.text[self.i..].chars().next().unwrap_or('\u{fffd}'),
            }),
        }
    }

    fn digits(&mut self) -> bool {
        let mut any = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.i += 1;
                any = true;
            } else {
                break;
            }
        }
        any
    }

    // NUMBER := [0-9]+ ( '.' [0-9]+ )? ( [Ee] '-'? [0-9]+ )?
    // No sign: a leading '-' belongs to the parser.
    fn lex_number(&mut self) -> Result<Token, JitError> {
        let start = self.i;
        self.digits();
        if self.peek() == Some(b'.') {
            self.bump();
            if !self.digits() {
                return Err(JitError::BadNumber { offset: start });
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            self.bump();
            if self.peek() == Some(b'-') {
                self.bump();
            }
            if !self.digits() {
                return Err(JitError::BadNumber { offset: start });
            }
        }
        let s = &self.text[start..self.i];
        let v: f64 = s.parse().map_err(|_| JitError::BadNumber { offset: start })?;
        Ok(Token::Num(v))
    }

    fn lex_ident(&mut self) -> Result<Token, JitError> {
        let start = self.i;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.i += 1;
            } else {
                break;
            }
        }
        Ok(Token::Ident(self.text[start..self.i].to_string()))
    }
}
