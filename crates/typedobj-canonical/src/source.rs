use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::TokenError;
use crate::json::JsonTokenReader;
use crate::token::{Token, TokenSink, TokenSource};

/// In-memory token list usable as both a source and a sink.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenBuffer {
    tokens: Vec<Token>,
}

impl TokenBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing token list.
    pub fn from_tokens(tokens: Vec<Token>) -> Self {
        Self { tokens }
    }

    /// Tokenizes a complete JSON text into a buffer.
    pub fn from_json(json: &[u8]) -> Result<Self, TokenError> {
        let mut reader = JsonTokenReader::new(json);
        let mut buffer = Self::new();
        crate::token::copy_tokens(&mut reader, &mut buffer)?;
        Ok(buffer)
    }

    /// Buffered tokens.
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Consumes the buffer, returning its tokens.
    pub fn into_tokens(self) -> Vec<Token> {
        self.tokens
    }

    /// Number of buffered tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// True when no token has been buffered.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Returns a source that replays the buffered tokens from the start.
    pub fn cursor(&self) -> TokenCursor<'_> {
        TokenCursor {
            tokens: &self.tokens,
            position: 0,
        }
    }
}

impl TokenSink for TokenBuffer {
    fn write_token(&mut self, token: &Token) -> Result<(), TokenError> {
        self.tokens.push(token.clone());
        Ok(())
    }
}

/// Replaying reader over borrowed tokens.
#[derive(Debug, Clone)]
pub struct TokenCursor<'a> {
    tokens: &'a [Token],
    position: usize,
}

impl TokenSource for TokenCursor<'_> {
    fn next_token(&mut self) -> Result<Option<Token>, TokenError> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        } else {
            self.position = self.tokens.len();
        }
        Ok(token)
    }

    fn is_exhausted(&self) -> bool {
        self.position >= self.tokens.len()
    }

    fn close(&mut self) {
        self.position = self.tokens.len();
    }
}

/// A replayable document origin.
///
/// Reports keep their source so canonical bytes can be recomputed after
/// cached resources have been released.
pub trait DocumentSource: fmt::Debug + Send + Sync {
    /// Opens a fresh token stream positioned before the root value.
    fn open(&self) -> Result<Box<dyn TokenSource + '_>, TokenError>;
}

/// JSON text held in memory.
#[derive(Clone)]
pub struct JsonBytes {
    bytes: Arc<[u8]>,
}

impl JsonBytes {
    /// Wraps JSON text.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Arc::from(bytes.into()),
        }
    }

    /// The raw JSON text.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for JsonBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonBytes")
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl DocumentSource for JsonBytes {
    fn open(&self) -> Result<Box<dyn TokenSource + '_>, TokenError> {
        Ok(Box::new(JsonTokenReader::new(&self.bytes[..])))
    }
}

/// JSON text stored in a file, re-read on every open.
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    /// Refers to the JSON file at `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DocumentSource for JsonFile {
    fn open(&self) -> Result<Box<dyn TokenSource + '_>, TokenError> {
        let file = File::open(&self.path)?;
        Ok(Box::new(JsonTokenReader::new(file)))
    }
}

impl DocumentSource for TokenBuffer {
    fn open(&self) -> Result<Box<dyn TokenSource + '_>, TokenError> {
        Ok(Box::new(self.cursor()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(source: &dyn DocumentSource) -> Vec<Token> {
        let mut stream = source.open().unwrap();
        let mut out = Vec::new();
        while let Some(token) = stream.next_token().unwrap() {
            out.push(token);
        }
        assert!(stream.is_exhausted());
        out
    }

    #[test]
    fn test_sources_replay() {
        let bytes = JsonBytes::new(r#"{"a":[1,"b"]}"#);
        let first = drain(&bytes);
        assert_eq!(first, drain(&bytes));

        let buffer = TokenBuffer::from_json(bytes.as_bytes()).unwrap();
        assert_eq!(buffer.len(), 6);
        assert_eq!(drain(&buffer), first);
    }

    #[test]
    fn test_json_file_source() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, b"[true, null]").unwrap();
        let file = JsonFile::new(&path);
        assert_eq!(
            drain(&file),
            vec![
                Token::StartArray,
                Token::Bool(true),
                Token::Null,
                Token::EndArray
            ]
        );
    }

    #[test]
    fn test_cursor_close() {
        let buffer = TokenBuffer::from_tokens(vec![Token::Null]);
        let mut cursor = buffer.cursor();
        cursor.close();
        assert!(cursor.is_exhausted());
        assert_eq!(cursor.next_token().unwrap(), None);
    }
}
