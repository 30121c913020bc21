//! Token streams and canonical bytes for typed objects.
//!
//! Documents move through the engine as pull-based token streams. This crate
//! owns the token vocabulary, the streaming JSON codec, replayable document
//! sources, and the key-sorting canonicalizer whose output (and SHA-256
//! checksum) is the content identity of a stored object.
//!
#![deny(missing_docs)]

/// Key-sorting canonicalizer with memory/temp-file crossover.
pub mod canonicalizer;
/// Checksums computed over canonical bytes.
pub mod digest;
/// Error types shared by the token layer and the canonicalizer.
pub mod errors;
/// Streaming JSON tokenizer and compact writer.
pub mod json;
/// Replayable document sources and token buffers.
pub mod source;
/// Token vocabulary and the source/sink traits.
pub mod token;

pub use canonicalizer::{
    CanonicalDocument, CanonicalStorage, Canonicalizer, CanonicalizerOptions, SpillBuffer,
    DEFAULT_MAX_IN_MEMORY_BYTES,
};
pub use digest::{Checksum, DigestAlg, DigestWriter};
pub use errors::{CanonicalizationError, TokenError, ValidationError};
pub use json::{JsonTokenReader, JsonTokenWriter};
pub use source::{DocumentSource, JsonBytes, JsonFile, TokenBuffer, TokenCursor};
pub use token::{copy_tokens, Token, TokenKind, TokenSink, TokenSource};
