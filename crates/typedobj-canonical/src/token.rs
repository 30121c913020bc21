use num_bigint::BigInt;
use std::fmt;

use crate::errors::TokenError;

/// One lexical unit of a streamed JSON document.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// `{`
    StartObject,
    /// `}`
    EndObject,
    /// `[`
    StartArray,
    /// `]`
    EndArray,
    /// Object member name.
    FieldName(String),
    /// String scalar.
    String(String),
    /// Integer scalar within `i64` range.
    Int(i64),
    /// Integer scalar outside `i64` range.
    BigInt(BigInt),
    /// Finite floating point scalar.
    Float(f64),
    /// Boolean scalar.
    Bool(bool),
    /// `null`
    Null,
}

/// Payload-free token discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// `{`
    StartObject,
    /// `}`
    EndObject,
    /// `[`
    StartArray,
    /// `]`
    EndArray,
    /// Object member name.
    FieldName,
    /// String scalar.
    String,
    /// Integer scalar of any width.
    Integer,
    /// Floating point scalar.
    Float,
    /// Boolean scalar.
    Bool,
    /// `null`
    Null,
}

impl Token {
    /// Returns the discriminant of this token.
    pub fn kind(&self) -> TokenKind {
        match self {
            Token::StartObject => TokenKind::StartObject,
            Token::EndObject => TokenKind::EndObject,
            Token::StartArray => TokenKind::StartArray,
            Token::EndArray => TokenKind::EndArray,
            Token::FieldName(_) => TokenKind::FieldName,
            Token::String(_) => TokenKind::String,
            Token::Int(_) | Token::BigInt(_) => TokenKind::Integer,
            Token::Float(_) => TokenKind::Float,
            Token::Bool(_) => TokenKind::Bool,
            Token::Null => TokenKind::Null,
        }
    }

    /// True for tokens that open a container.
    pub fn is_container_start(&self) -> bool {
        matches!(self, Token::StartObject | Token::StartArray)
    }

    /// True for tokens that are complete values on their own.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Token::String(_)
                | Token::Int(_)
                | Token::BigInt(_)
                | Token::Float(_)
                | Token::Bool(_)
                | Token::Null
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::StartObject => "START_OBJECT",
            TokenKind::EndObject => "END_OBJECT",
            TokenKind::StartArray => "START_ARRAY",
            TokenKind::EndArray => "END_ARRAY",
            TokenKind::FieldName => "FIELD_NAME",
            TokenKind::String => "VALUE_STRING",
            TokenKind::Integer => "VALUE_NUMBER_INT",
            TokenKind::Float => "VALUE_NUMBER_FLOAT",
            TokenKind::Bool => "VALUE_BOOLEAN",
            TokenKind::Null => "VALUE_NULL",
        };
        f.write_str(name)
    }
}

/// Pull interface over a token stream.
pub trait TokenSource {
    /// Returns the next token, or `None` once the stream is exhausted.
    fn next_token(&mut self) -> Result<Option<Token>, TokenError>;

    /// True once `next_token` has returned `None`.
    fn is_exhausted(&self) -> bool;

    /// Releases the underlying input. Further reads return `None`.
    fn close(&mut self) {}
}

/// Push interface mirroring [`TokenSource`].
pub trait TokenSink {
    /// Appends a token to the output.
    fn write_token(&mut self, token: &Token) -> Result<(), TokenError>;

    /// Flushes buffered output.
    fn flush(&mut self) -> Result<(), TokenError> {
        Ok(())
    }
}

impl<S: TokenSource + ?Sized> TokenSource for Box<S> {
    fn next_token(&mut self) -> Result<Option<Token>, TokenError> {
        (**self).next_token()
    }

    fn is_exhausted(&self) -> bool {
        (**self).is_exhausted()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

impl<S: TokenSink + ?Sized> TokenSink for &mut S {
    fn write_token(&mut self, token: &Token) -> Result<(), TokenError> {
        (**self).write_token(token)
    }

    fn flush(&mut self) -> Result<(), TokenError> {
        (**self).flush()
    }
}

/// Copies every remaining token of `source` into `sink` and flushes it.
pub fn copy_tokens(
    source: &mut dyn TokenSource,
    sink: &mut dyn TokenSink,
) -> Result<u64, TokenError> {
    let mut count = 0;
    while let Some(token) = source.next_token()? {
        sink.write_token(&token)?;
        count += 1;
    }
    sink.flush()?;
    Ok(count)
}
