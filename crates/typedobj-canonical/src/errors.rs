use thiserror::Error;

/// Errors raised while reading or writing a token stream.
#[derive(Error, Debug)]
pub enum TokenError {
    /// I/O error from the underlying reader or writer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The input bytes are not well-formed JSON.
    #[error("malformed JSON at byte {offset}: {reason}")]
    Syntax {
        /// Byte offset where the problem was detected.
        offset: u64,
        /// Reason for rejection.
        reason: String,
    },
    /// The input ended in the middle of a value.
    #[error("unexpected end of input at byte {offset}")]
    UnexpectedEof {
        /// Byte offset of the end of input.
        offset: u64,
    },
    /// A sink received tokens that do not form a JSON value.
    #[error("invalid token sequence: {0}")]
    Sequence(String),
}

impl TokenError {
    /// True when the error describes malformed input rather than an I/O failure.
    pub fn is_parse_error(&self) -> bool {
        !matches!(self, TokenError::Io(_))
    }
}

/// Errors raised by the key-sorting canonicalizer.
#[derive(Error, Debug)]
pub enum CanonicalizationError {
    /// Two members of one object carry the same key.
    #[error("Duplicated key '{key}' was found")]
    KeyDuplication {
        /// The repeated key.
        key: String,
    },
    /// Keys held for sorting exceeded the configured memory budget.
    #[error("memory necessary for sorting keys exceeds the limit {limit} bytes")]
    TooManyKeys {
        /// Configured limit in bytes.
        limit: u64,
    },
    /// The intermediate compact JSON could not be walked.
    #[error("invalid JSON structure at byte {offset}: {reason}")]
    InvalidStructure {
        /// Byte offset inside the intermediate buffer.
        offset: u64,
        /// Reason for rejection.
        reason: String,
    },
    /// Token stream failure while producing the intermediate form.
    #[error(transparent)]
    Token(#[from] TokenError),
    /// Temp file or buffer I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CanonicalizationError {
    /// True for failures of the environment (temp files, disks) rather than of the document.
    pub fn is_resource_error(&self) -> bool {
        matches!(
            self,
            CanonicalizationError::Io(_) | CanonicalizationError::Token(TokenError::Io(_))
        )
    }
}

/// Validation errors for canonical primitives.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// When a value does not match the required pattern.
    #[error("{field} ('{value}') is not allowed")]
    PatternMismatch {
        /// Field name that failed validation.
        field: &'static str,
        /// Offending value.
        value: String,
    },
}
