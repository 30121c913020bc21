//! Streaming JSON tokenizer and compact JSON writer.

use std::io::{self, BufRead, BufReader, Read, Write};

use num_bigint::BigInt;

use crate::errors::TokenError;
use crate::token::{Token, TokenSink, TokenSource};

/// Nesting depth accepted by [`JsonTokenReader`] unless configured otherwise.
pub const DEFAULT_MAX_DEPTH: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Value,
    ValueOrEndArray,
    KeyOrEndObject,
    Key,
    AfterValue,
    Done,
    Closed,
}

/// Pull tokenizer over UTF-8 JSON bytes.
///
/// The reader enforces the full JSON grammar, including a single root value
/// followed only by whitespace. It never holds more than one scalar and the
/// stack of open containers in memory.
pub struct JsonTokenReader<R> {
    input: BufReader<R>,
    offset: u64,
    stack: Vec<Container>,
    expect: Expect,
    max_depth: usize,
    scratch: Vec<u8>,
}

impl<R: Read> JsonTokenReader<R> {
    /// Creates a reader over `input`.
    pub fn new(input: R) -> Self {
        Self {
            input: BufReader::new(input),
            offset: 0,
            stack: Vec::new(),
            expect: Expect::Value,
            max_depth: DEFAULT_MAX_DEPTH,
            scratch: Vec::new(),
        }
    }

    /// Overrides the maximum container nesting depth.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Number of bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn syntax(&self, reason: impl Into<String>) -> TokenError {
        TokenError::Syntax {
            offset: self.offset,
            reason: reason.into(),
        }
    }

    fn eof(&self) -> TokenError {
        TokenError::UnexpectedEof {
            offset: self.offset,
        }
    }

    fn peek(&mut self) -> Result<Option<u8>, TokenError> {
        loop {
            match self.input.fill_buf() {
                Ok(buf) => return Ok(buf.first().copied()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn bump(&mut self) {
        self.input.consume(1);
        self.offset += 1;
    }

    fn require_byte(&mut self) -> Result<u8, TokenError> {
        match self.peek()? {
            Some(b) => {
                self.bump();
                Ok(b)
            }
            None => Err(self.eof()),
        }
    }

    fn expect_byte(&mut self, expected: u8) -> Result<(), TokenError> {
        let b = self.require_byte()?;
        if b != expected {
            return Err(self.syntax(format!(
                "expected '{}' but found '{}'",
                expected as char,
                b.escape_ascii()
            )));
        }
        Ok(())
    }

    fn skip_whitespace(&mut self) -> Result<Option<u8>, TokenError> {
        loop {
            match self.peek()? {
                Some(b' ' | b'\t' | b'\n' | b'\r') => self.bump(),
                other => return Ok(other),
            }
        }
    }

    fn open(&mut self, container: Container) -> Result<(), TokenError> {
        if self.stack.len() >= self.max_depth {
            return Err(self.syntax(format!(
                "maximum nesting depth {} exceeded",
                self.max_depth
            )));
        }
        self.stack.push(container);
        self.expect = match container {
            Container::Object => Expect::KeyOrEndObject,
            Container::Array => Expect::ValueOrEndArray,
        };
        Ok(())
    }

    fn close_container(&mut self, token: Token) -> Token {
        self.stack.pop();
        self.expect = Expect::AfterValue;
        token
    }

    fn read_value(&mut self) -> Result<Token, TokenError> {
        let Some(b) = self.skip_whitespace()? else {
            return Err(self.eof());
        };
        let token = match b {
            b'{' => {
                self.bump();
                self.open(Container::Object)?;
                return Ok(Token::StartObject);
            }
            b'[' => {
                self.bump();
                self.open(Container::Array)?;
                return Ok(Token::StartArray);
            }
            b'"' => {
                self.bump();
                Token::String(self.read_string()?)
            }
            b't' => self.read_literal(b"true", Token::Bool(true))?,
            b'f' => self.read_literal(b"false", Token::Bool(false))?,
            b'n' => self.read_literal(b"null", Token::Null)?,
            b'-' | b'0'..=b'9' => self.read_number()?,
            other => {
                return Err(self.syntax(format!(
                    "unexpected character '{}'",
                    other.escape_ascii()
                )))
            }
        };
        self.expect = Expect::AfterValue;
        Ok(token)
    }

    fn read_key(&mut self) -> Result<Token, TokenError> {
        self.bump();
        let name = self.read_string()?;
        match self.skip_whitespace()? {
            Some(b':') => self.bump(),
            Some(_) => return Err(self.syntax("expected ':' after field name")),
            None => return Err(self.eof()),
        }
        self.expect = Expect::Value;
        Ok(Token::FieldName(name))
    }

    fn read_literal(&mut self, word: &'static [u8], token: Token) -> Result<Token, TokenError> {
        for &expected in word {
            if self.require_byte()? != expected {
                return Err(self.syntax(format!(
                    "invalid literal, expected '{}'",
                    String::from_utf8_lossy(word)
                )));
            }
        }
        Ok(token)
    }

    fn read_string(&mut self) -> Result<String, TokenError> {
        let start = self.offset;
        self.scratch.clear();
        loop {
            let buf = self.input.fill_buf()?;
            if buf.is_empty() {
                return Err(self.eof());
            }
            let special = buf
                .iter()
                .position(|&b| b == b'"' || b == b'\\' || b < 0x20);
            let plain = special.unwrap_or(buf.len());
            self.scratch.extend_from_slice(&buf[..plain]);
            self.input.consume(plain);
            self.offset += plain as u64;
            if special.is_none() {
                continue;
            }
            match self.require_byte()? {
                b'"' => break,
                b'\\' => self.read_escape()?,
                _ => return Err(self.syntax("unescaped control character in string")),
            }
        }
        let bytes = std::mem::take(&mut self.scratch);
        String::from_utf8(bytes).map_err(|_| TokenError::Syntax {
            offset: start,
            reason: "invalid UTF-8 in string".to_string(),
        })
    }

    fn read_escape(&mut self) -> Result<(), TokenError> {
        let c = match self.require_byte()? {
            b'"' => '"',
            b'\\' => '\\',
            b'/' => '/',
            b'b' => '\u{8}',
            b'f' => '\u{c}',
            b'n' => '\n',
            b'r' => '\r',
            b't' => '\t',
            b'u' => {
                let first = self.read_hex4()?;
                let code = match first {
                    0xD800..=0xDBFF => {
                        self.expect_byte(b'\\')?;
                        self.expect_byte(b'u')?;
                        let second = self.read_hex4()?;
                        if !(0xDC00..=0xDFFF).contains(&second) {
                            return Err(self.syntax("invalid low surrogate in unicode escape"));
                        }
                        0x10000 + ((first - 0xD800) << 10) + (second - 0xDC00)
                    }
                    0xDC00..=0xDFFF => {
                        return Err(self.syntax("unpaired low surrogate in unicode escape"))
                    }
                    _ => first,
                };
                char::from_u32(code).ok_or_else(|| self.syntax("invalid unicode escape"))?
            }
            other => {
                return Err(self.syntax(format!(
                    "invalid escape '\\{}'",
                    other.escape_ascii()
                )))
            }
        };
        let mut utf8 = [0u8; 4];
        self.scratch
            .extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
        Ok(())
    }

    fn read_hex4(&mut self) -> Result<u32, TokenError> {
        let mut value = 0u32;
        for _ in 0..4 {
            let b = self.require_byte()?;
            let digit = (b as char)
                .to_digit(16)
                .ok_or_else(|| self.syntax("invalid hex digit in unicode escape"))?;
            value = (value << 4) | digit;
        }
        Ok(value)
    }

    fn read_digits(&mut self, text: &mut String) -> Result<(), TokenError> {
        while let Some(b @ b'0'..=b'9') = self.peek()? {
            text.push(b as char);
            self.bump();
        }
        Ok(())
    }

    fn require_digits(&mut self, text: &mut String, after: &str) -> Result<(), TokenError> {
        match self.peek()? {
            Some(b'0'..=b'9') => self.read_digits(text),
            Some(_) => Err(self.syntax(format!("expected digit after {after}"))),
            None => Err(self.eof()),
        }
    }

    fn read_number(&mut self) -> Result<Token, TokenError> {
        let start = self.offset;
        let mut text = String::new();
        if self.peek()? == Some(b'-') {
            text.push('-');
            self.bump();
        }
        match self.peek()? {
            Some(b'0') => {
                text.push('0');
                self.bump();
                if matches!(self.peek()?, Some(b'0'..=b'9')) {
                    return Err(self.syntax("leading zeros are not allowed"));
                }
            }
            Some(b'1'..=b'9') => self.read_digits(&mut text)?,
            Some(_) => return Err(self.syntax("expected digit after '-'")),
            None => return Err(self.eof()),
        }

        let mut is_float = false;
        if self.peek()? == Some(b'.') {
            is_float = true;
            text.push('.');
            self.bump();
            self.require_digits(&mut text, "decimal point")?;
        }
        if let Some(b'e' | b'E') = self.peek()? {
            is_float = true;
            text.push('e');
            self.bump();
            if let Some(sign @ (b'+' | b'-')) = self.peek()? {
                text.push(sign as char);
                self.bump();
            }
            self.require_digits(&mut text, "exponent")?;
        }

        let out_of_range = || TokenError::Syntax {
            offset: start,
            reason: format!("number {text} is out of range"),
        };
        if is_float {
            let value: f64 = text.parse().map_err(|_| out_of_range())?;
            if !value.is_finite() {
                return Err(out_of_range());
            }
            return Ok(Token::Float(value));
        }
        match text.parse::<i64>() {
            Ok(value) => Ok(Token::Int(value)),
            Err(_) => text
                .parse::<BigInt>()
                .map(Token::BigInt)
                .map_err(|_| out_of_range()),
        }
    }
}

impl<R: Read> TokenSource for JsonTokenReader<R> {
    fn next_token(&mut self) -> Result<Option<Token>, TokenError> {
        loop {
            match self.expect {
                Expect::Closed => return Ok(None),
                Expect::Done => {
                    return match self.skip_whitespace()? {
                        None => {
                            self.expect = Expect::Closed;
                            Ok(None)
                        }
                        Some(_) => Err(self.syntax("trailing characters after the root value")),
                    };
                }
                Expect::Value => return self.read_value().map(Some),
                Expect::ValueOrEndArray => {
                    if self.skip_whitespace()? == Some(b']') {
                        self.bump();
                        return Ok(Some(self.close_container(Token::EndArray)));
                    }
                    return self.read_value().map(Some);
                }
                Expect::KeyOrEndObject => {
                    return match self.skip_whitespace()? {
                        Some(b'}') => {
                            self.bump();
                            Ok(Some(self.close_container(Token::EndObject)))
                        }
                        Some(b'"') => self.read_key().map(Some),
                        Some(_) => Err(self.syntax("expected a field name or '}'")),
                        None => Err(self.eof()),
                    };
                }
                Expect::Key => {
                    return match self.skip_whitespace()? {
                        Some(b'"') => self.read_key().map(Some),
                        Some(_) => Err(self.syntax("expected a field name")),
                        None => Err(self.eof()),
                    };
                }
                Expect::AfterValue => {
                    let Some(container) = self.stack.last().copied() else {
                        self.expect = Expect::Done;
                        continue;
                    };
                    match (container, self.skip_whitespace()?) {
                        (_, None) => return Err(self.eof()),
                        (Container::Object, Some(b',')) => {
                            self.bump();
                            self.expect = Expect::Key;
                        }
                        (Container::Object, Some(b'}')) => {
                            self.bump();
                            return Ok(Some(self.close_container(Token::EndObject)));
                        }
                        (Container::Array, Some(b',')) => {
                            self.bump();
                            self.expect = Expect::Value;
                        }
                        (Container::Array, Some(b']')) => {
                            self.bump();
                            return Ok(Some(self.close_container(Token::EndArray)));
                        }
                        (Container::Object, Some(_)) => {
                            return Err(self.syntax("expected ',' or '}' after object member"))
                        }
                        (Container::Array, Some(_)) => {
                            return Err(self.syntax("expected ',' or ']' after array element"))
                        }
                    }
                }
            }
        }
    }

    fn is_exhausted(&self) -> bool {
        self.expect == Expect::Closed
    }

    fn close(&mut self) {
        self.expect = Expect::Closed;
        self.stack.clear();
    }
}

struct Frame {
    object: bool,
    members: u64,
    last_key: Option<String>,
}

/// Compact JSON serializer for token streams.
///
/// Output has no insignificant whitespace and escapes only what JSON
/// requires. While writing, the writer checks whether every object's keys
/// arrive in strictly increasing byte order; [`JsonTokenWriter::is_sorted`]
/// reports the result.
pub struct JsonTokenWriter<W: Write> {
    out: W,
    frames: Vec<Frame>,
    pending_value: bool,
    root_written: bool,
    sorted: bool,
    bytes_written: u64,
}

impl<W: Write> JsonTokenWriter<W> {
    /// Creates a writer emitting into `out`.
    pub fn new(out: W) -> Self {
        Self {
            out,
            frames: Vec::new(),
            pending_value: false,
            root_written: false,
            sorted: true,
            bytes_written: 0,
        }
    }

    /// True while every object written so far had strictly increasing keys.
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Total bytes emitted.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// True once a root value has been written and every container closed.
    pub fn is_complete(&self) -> bool {
        self.root_written && self.frames.is_empty()
    }

    /// Borrows the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.out
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<(), TokenError> {
        self.out.write_all(bytes)?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    fn emit_string(&mut self, s: &str) -> Result<(), TokenError> {
        self.emit(b"\"")?;
        let bytes = s.as_bytes();
        let mut start = 0;
        for (i, &b) in bytes.iter().enumerate() {
            let short: &[u8] = match b {
                b'"' => b"\\\"",
                b'\\' => b"\\\\",
                b'\n' => b"\\n",
                b'\r' => b"\\r",
                b'\t' => b"\\t",
                0x08 => b"\\b",
                0x0c => b"\\f",
                0x00..=0x1f => b"",
                _ => continue,
            };
            if start < i {
                self.emit(&bytes[start..i])?;
            }
            if short.is_empty() {
                self.emit(format!("\\u{b:04x}").as_bytes())?;
            } else {
                self.emit(short)?;
            }
            start = i + 1;
        }
        if start < bytes.len() {
            self.emit(&bytes[start..])?;
        }
        self.emit(b"\"")
    }

    fn begin_value(&mut self) -> Result<(), TokenError> {
        let comma = match self.frames.last_mut() {
            None => {
                if self.root_written {
                    return Err(TokenError::Sequence(
                        "more than one root value".to_string(),
                    ));
                }
                self.root_written = true;
                false
            }
            Some(frame) if frame.object => {
                if !self.pending_value {
                    return Err(TokenError::Sequence(
                        "object member value without a field name".to_string(),
                    ));
                }
                self.pending_value = false;
                false
            }
            Some(frame) => {
                frame.members += 1;
                frame.members > 1
            }
        };
        if comma {
            self.emit(b",")?;
        }
        Ok(())
    }

    fn end_container(&mut self, object: bool) -> Result<(), TokenError> {
        match self.frames.last() {
            Some(frame) if frame.object == object && !self.pending_value => {}
            _ => {
                return Err(TokenError::Sequence(format!(
                    "unbalanced {}",
                    if object { "END_OBJECT" } else { "END_ARRAY" }
                )))
            }
        }
        self.frames.pop();
        self.emit(if object { b"}" } else { b"]" })
    }

    fn field_name(&mut self, name: &str) -> Result<(), TokenError> {
        let frame = match self.frames.last_mut() {
            Some(frame) if frame.object && !self.pending_value => frame,
            _ => {
                return Err(TokenError::Sequence(format!(
                    "field name '{name}' outside of an object"
                )))
            }
        };
        if let Some(previous) = &frame.last_key {
            if previous.as_bytes() >= name.as_bytes() {
                self.sorted = false;
            }
        }
        frame.members += 1;
        let comma = frame.members > 1;
        frame.last_key = Some(name.to_string());
        if comma {
            self.emit(b",")?;
        }
        self.emit_string(name)?;
        self.emit(b":")?;
        self.pending_value = true;
        Ok(())
    }
}

impl<W: Write> TokenSink for JsonTokenWriter<W> {
    fn write_token(&mut self, token: &Token) -> Result<(), TokenError> {
        match token {
            Token::EndObject => return self.end_container(true),
            Token::EndArray => return self.end_container(false),
            Token::FieldName(name) => return self.field_name(name),
            _ => self.begin_value()?,
        }
        match token {
            Token::StartObject | Token::StartArray => {
                let object = matches!(token, Token::StartObject);
                self.frames.push(Frame {
                    object,
                    members: 0,
                    last_key: None,
                });
                self.emit(if object { b"{" } else { b"[" })
            }
            Token::String(s) => self.emit_string(s),
            Token::Int(v) => self.emit(v.to_string().as_bytes()),
            Token::BigInt(v) => self.emit(v.to_string().as_bytes()),
            Token::Float(v) => {
                let number = serde_json::Number::from_f64(*v).ok_or_else(|| {
                    TokenError::Sequence(format!("non-finite float {v} cannot be written"))
                })?;
                self.emit(number.to_string().as_bytes())
            }
            Token::Bool(true) => self.emit(b"true"),
            Token::Bool(false) => self.emit(b"false"),
            Token::Null => self.emit(b"null"),
            Token::EndObject | Token::EndArray | Token::FieldName(_) => Ok(()),
        }
    }

    fn flush(&mut self) -> Result<(), TokenError> {
        self.out.flush()?;
        Ok(())
    }
}
