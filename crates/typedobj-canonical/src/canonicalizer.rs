use std::cmp::min;
use std::fs::File;
use std::io::{self, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::digest::{Checksum, DigestWriter};
use crate::errors::{CanonicalizationError, TokenError};
use crate::json::{JsonTokenReader, JsonTokenWriter};
use crate::token::{copy_tokens, TokenSink, TokenSource};

/// Default in-memory budget before canonical output moves to a temp file.
pub const DEFAULT_MAX_IN_MEMORY_BYTES: u64 = 16 * 1024 * 1024;

const FILE_WINDOW: usize = 64 * 1024;

/// Options for canonicalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonicalizerOptions {
    /// Bytes kept in memory before spilling to a temp file (default: 16 MiB).
    pub max_in_memory_bytes: u64,
    /// Directory for temp files (default: the system temp dir).
    pub temp_dir: Option<PathBuf>,
    /// Cap on the bytes of keys held while sorting open objects (default: unlimited).
    pub max_key_bytes: Option<u64>,
}

impl Default for CanonicalizerOptions {
    fn default() -> Self {
        Self {
            max_in_memory_bytes: DEFAULT_MAX_IN_MEMORY_BYTES,
            temp_dir: None,
            max_key_bytes: None,
        }
    }
}

impl CanonicalizerOptions {
    /// Sets the in-memory budget.
    pub fn with_max_in_memory_bytes(mut self, bytes: u64) -> Self {
        self.max_in_memory_bytes = bytes;
        self
    }

    /// Sets the temp file directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Caps key memory used by the sorter.
    pub fn with_max_key_bytes(mut self, bytes: u64) -> Self {
        self.max_key_bytes = Some(bytes);
        self
    }
}

/// Where canonical bytes live.
#[derive(Debug)]
pub enum CanonicalStorage {
    /// Held in memory.
    Memory(Vec<u8>),
    /// Held in a temp file that is removed when dropped.
    TempFile(NamedTempFile),
}

impl CanonicalStorage {
    fn open(&self) -> io::Result<Box<dyn Read + '_>> {
        match self {
            CanonicalStorage::Memory(bytes) => Ok(Box::new(Cursor::new(&bytes[..]))),
            CanonicalStorage::TempFile(file) => Ok(Box::new(file.reopen()?)),
        }
    }
}

/// Byte sink that starts in memory and moves to a temp file past a size limit.
///
/// Both paths hold exactly the bytes written, in order.
pub struct SpillBuffer {
    limit: u64,
    temp_dir: Option<PathBuf>,
    len: u64,
    state: SpillState,
}

enum SpillState {
    Memory(Vec<u8>),
    File(BufWriter<NamedTempFile>),
}

impl SpillBuffer {
    /// Creates a buffer that spills once more than `limit` bytes are written.
    pub fn new(limit: u64, temp_dir: Option<PathBuf>) -> Self {
        Self {
            limit,
            temp_dir,
            len: 0,
            state: SpillState::Memory(Vec::new()),
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True when nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True once the contents moved to a temp file.
    pub fn is_spilled(&self) -> bool {
        matches!(self.state, SpillState::File(_))
    }

    fn spill(&mut self) -> io::Result<()> {
        let file = match &self.temp_dir {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };
        debug!(
            bytes = self.len,
            path = %file.path().display(),
            "spilling canonical buffer to temp file"
        );
        let mut writer = BufWriter::new(file);
        if let SpillState::Memory(bytes) = &self.state {
            writer.write_all(bytes)?;
        }
        self.state = SpillState::File(writer);
        Ok(())
    }

    /// Flushes and hands over the collected bytes.
    pub fn finish(self) -> io::Result<CanonicalStorage> {
        match self.state {
            SpillState::Memory(bytes) => Ok(CanonicalStorage::Memory(bytes)),
            SpillState::File(writer) => {
                let file = writer.into_inner().map_err(|e| e.into_error())?;
                Ok(CanonicalStorage::TempFile(file))
            }
        }
    }
}

impl Write for SpillBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if matches!(self.state, SpillState::Memory(_))
            && self.len + buf.len() as u64 > self.limit
        {
            self.spill()?;
        }
        match &mut self.state {
            SpillState::Memory(bytes) => bytes.extend_from_slice(buf),
            SpillState::File(writer) => writer.write_all(buf)?,
        }
        self.len += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.state {
            SpillState::Memory(_) => Ok(()),
            SpillState::File(writer) => writer.flush(),
        }
    }
}

/// Canonical bytes of one document together with their checksum.
#[derive(Debug)]
pub struct CanonicalDocument {
    checksum: Checksum,
    size: u64,
    naturally_sorted: bool,
    storage: CanonicalStorage,
}

impl CanonicalDocument {
    /// Checksum of the canonical bytes.
    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    /// Length of the canonical bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// True when the input already had sorted keys and no sort pass ran.
    pub fn is_naturally_sorted(&self) -> bool {
        self.naturally_sorted
    }

    /// True when the bytes live in a temp file.
    pub fn is_spilled(&self) -> bool {
        matches!(self.storage, CanonicalStorage::TempFile(_))
    }

    /// Underlying storage.
    pub fn storage(&self) -> &CanonicalStorage {
        &self.storage
    }

    /// Opens a reader over the canonical bytes.
    pub fn reader(&self) -> io::Result<Box<dyn Read + '_>> {
        self.storage.open()
    }

    /// Reads the canonical bytes into memory.
    pub fn to_vec(&self) -> io::Result<Vec<u8>> {
        if let CanonicalStorage::Memory(bytes) = &self.storage {
            return Ok(bytes.clone());
        }
        let mut out = Vec::with_capacity(self.size as usize);
        self.reader()?.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Copies the canonical bytes into `out`.
    pub fn write_to(&self, out: &mut dyn Write) -> io::Result<u64> {
        io::copy(&mut self.reader()?, out)
    }
}

/// Key-sorting canonicalizer that emits compact, deterministic JSON.
#[derive(Debug, Clone, Default)]
pub struct Canonicalizer {
    options: CanonicalizerOptions,
}

impl Canonicalizer {
    /// Creates a canonicalizer with the given options.
    pub fn new(options: CanonicalizerOptions) -> Self {
        Self { options }
    }

    /// Active options.
    pub fn options(&self) -> &CanonicalizerOptions {
        &self.options
    }

    /// Canonicalizes every token of `source`.
    pub fn canonicalize(
        &self,
        source: &mut dyn TokenSource,
    ) -> Result<CanonicalDocument, CanonicalizationError> {
        self.canonicalize_with(|sink| {
            copy_tokens(source, sink)?;
            Ok::<_, CanonicalizationError>(())
        })
    }

    /// Canonicalizes a complete JSON text.
    pub fn canonicalize_bytes(&self, json: &[u8]) -> Result<CanonicalDocument, CanonicalizationError> {
        self.canonicalize(&mut JsonTokenReader::new(json))
    }

    /// Canonicalizes the tokens that `produce` pushes into the provided sink.
    ///
    /// Tokens are written compactly while hashing; if some object arrived with
    /// unsorted keys, a byte-level sort pass rewrites the intermediate output.
    pub fn canonicalize_with<F, E>(&self, produce: F) -> Result<CanonicalDocument, E>
    where
        F: FnOnce(&mut dyn TokenSink) -> Result<(), E>,
        E: From<CanonicalizationError>,
    {
        let staging = SpillBuffer::new(
            self.options.max_in_memory_bytes,
            self.options.temp_dir.clone(),
        );
        let mut writer = JsonTokenWriter::new(DigestWriter::new(staging));
        produce(&mut writer)?;
        writer.flush().map_err(CanonicalizationError::from)?;
        if !writer.is_complete() {
            return Err(CanonicalizationError::from(TokenError::Sequence(
                "token stream ended before the root value was complete".to_string(),
            ))
            .into());
        }
        let naturally_sorted = writer.is_sorted();
        let (staging, checksum, size) = writer.into_inner().finish();
        let staged = staging.finish().map_err(CanonicalizationError::from)?;

        if naturally_sorted {
            debug!(size, "document already sorted, skipping sort pass");
            return Ok(CanonicalDocument {
                checksum,
                size,
                naturally_sorted,
                storage: staged,
            });
        }

        debug!(size, spilled = matches!(staged, CanonicalStorage::TempFile(_)), "sorting keys");
        let (storage, checksum, sorted_size) = self.sort(&staged, size)?;
        drop(staged);
        Ok(CanonicalDocument {
            checksum,
            size: sorted_size,
            naturally_sorted,
            storage,
        })
    }

    fn sort(
        &self,
        staged: &CanonicalStorage,
        len: u64,
    ) -> Result<(CanonicalStorage, Checksum, u64), CanonicalizationError> {
        let input = match staged {
            CanonicalStorage::Memory(bytes) => RandomAccess::Slice(bytes),
            CanonicalStorage::TempFile(file) => {
                RandomAccess::File(FileWindow::new(file.reopen()?))
            }
        };
        let output = SpillBuffer::new(
            self.options.max_in_memory_bytes,
            self.options.temp_dir.clone(),
        );
        let mut digest = DigestWriter::new(output);
        let mut sorter = KeySorter::new(input, len, self.options.max_key_bytes);
        let end = sorter.write_root(&mut digest)?;
        if end != len {
            return Err(sorter.invalid(end, "trailing bytes after the root value"));
        }
        digest.flush()?;
        let (output, checksum, size) = digest.finish();
        Ok((output.finish()?, checksum, size))
    }
}

struct FileWindow {
    file: File,
    buf: Vec<u8>,
    start: u64,
    filled: usize,
}

impl FileWindow {
    fn new(file: File) -> Self {
        Self {
            file,
            buf: vec![0; FILE_WINDOW],
            start: 0,
            filled: 0,
        }
    }

    fn load(&mut self, pos: u64) -> io::Result<usize> {
        if pos >= self.start && pos < self.start + self.filled as u64 {
            return Ok((pos - self.start) as usize);
        }
        self.file.seek(SeekFrom::Start(pos))?;
        let mut filled = 0;
        while filled < self.buf.len() {
            let n = self.file.read(&mut self.buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        self.start = pos;
        self.filled = filled;
        if filled == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "canonical temp file is shorter than expected",
            ));
        }
        Ok(0)
    }
}

enum RandomAccess<'a> {
    Slice(&'a [u8]),
    File(FileWindow),
}

impl RandomAccess<'_> {
    fn byte_at(&mut self, pos: u64) -> io::Result<u8> {
        match self {
            RandomAccess::Slice(bytes) => Ok(bytes[pos as usize]),
            RandomAccess::File(window) => {
                let offset = window.load(pos)?;
                Ok(window.buf[offset])
            }
        }
    }

    fn copy(&mut self, start: u64, end: u64, out: &mut dyn Write) -> io::Result<()> {
        match self {
            RandomAccess::Slice(bytes) => out.write_all(&bytes[start as usize..end as usize]),
            RandomAccess::File(window) => {
                let mut pos = start;
                while pos < end {
                    let offset = window.load(pos)?;
                    let n = min(window.filled - offset, (end - pos) as usize);
                    out.write_all(&window.buf[offset..offset + n])?;
                    pos += n as u64;
                }
                Ok(())
            }
        }
    }
}

struct Member {
    key: String,
    key_start: u64,
    value_start: u64,
    value_end: u64,
}

enum Frame {
    Array { cursor: u64, first: bool },
    Object { members: Vec<Member>, next: usize, held: u64 },
}

enum Step {
    Close(u8),
    Value { separator: bool, key: Option<(u64, u64)>, start: u64, end: u64 },
}

// Walks compact JSON produced by `JsonTokenWriter`; no whitespace handling.
// Container ends are indexed in one forward pass so every member is scanned
// once, and nesting lives on an explicit frame stack.
struct KeySorter<'a> {
    input: RandomAccess<'a>,
    len: u64,
    max_key_bytes: Option<u64>,
    held_key_bytes: u64,
    container_ends: Vec<(u64, u64)>,
    visited: u64,
}

impl<'a> KeySorter<'a> {
    fn new(input: RandomAccess<'a>, len: u64, max_key_bytes: Option<u64>) -> Self {
        Self {
            input,
            len,
            max_key_bytes,
            held_key_bytes: 0,
            container_ends: Vec::new(),
            visited: 0,
        }
    }

    fn invalid(&self, offset: u64, reason: &str) -> CanonicalizationError {
        CanonicalizationError::InvalidStructure {
            offset,
            reason: reason.to_string(),
        }
    }

    fn byte(&mut self, pos: u64) -> Result<u8, CanonicalizationError> {
        if pos >= self.len {
            return Err(self.invalid(pos, "unexpected end of input"));
        }
        self.visited += 1;
        Ok(self.input.byte_at(pos)?)
    }

    fn hold(&mut self, bytes: u64) -> Result<(), CanonicalizationError> {
        self.held_key_bytes += bytes;
        match self.max_key_bytes {
            Some(limit) if self.held_key_bytes > limit => {
                Err(CanonicalizationError::TooManyKeys { limit })
            }
            _ => Ok(()),
        }
    }

    /// Records `(start, end)` of every container, ordered by start.
    fn index_containers(&mut self) -> Result<(), CanonicalizationError> {
        let mut open = Vec::new();
        let mut p = 0;
        while p < self.len {
            match self.byte(p)? {
                b'"' => p = self.skip_string(p)?,
                b'{' | b'[' => {
                    open.push(self.container_ends.len());
                    self.container_ends.push((p, 0));
                    p += 1;
                }
                b'}' | b']' => {
                    let Some(index) = open.pop() else {
                        return Err(self.invalid(p, "unbalanced container end"));
                    };
                    self.container_ends[index].1 = p + 1;
                    p += 1;
                }
                _ => p += 1,
            }
        }
        if !open.is_empty() {
            return Err(self.invalid(self.len, "unexpected end of input"));
        }
        Ok(())
    }

    fn value_end(&mut self, pos: u64) -> Result<u64, CanonicalizationError> {
        match self.byte(pos)? {
            b'{' | b'[' => match self.container_ends.binary_search_by_key(&pos, |&(start, _)| start) {
                Ok(index) => Ok(self.container_ends[index].1),
                Err(_) => Err(self.invalid(pos, "unindexed container")),
            },
            b'"' => self.skip_string(pos),
            _ => {
                let mut p = pos;
                while p < self.len && !matches!(self.byte(p)?, b',' | b'}' | b']') {
                    p += 1;
                }
                Ok(p)
            }
        }
    }

    /// Writes the sorted document and returns the end offset of the root value.
    fn write_root(&mut self, out: &mut dyn Write) -> Result<u64, CanonicalizationError> {
        self.index_containers()?;
        let root_end = self.value_end(0)?;
        let mut stack = Vec::new();
        self.begin(0, root_end, out, &mut stack)?;

        while let Some(frame) = stack.last_mut() {
            let step = match frame {
                Frame::Array { cursor, first } => {
                    let mut p = *cursor;
                    let separator = match (self.byte(p)?, *first) {
                        (b']', _) => None,
                        (b',', false) => {
                            p += 1;
                            Some(true)
                        }
                        (_, true) => Some(false),
                        _ => return Err(self.invalid(p, "expected ',' or ']'")),
                    };
                    match separator {
                        None => Step::Close(b']'),
                        Some(separator) => {
                            let end = self.value_end(p)?;
                            *cursor = end;
                            *first = false;
                            Step::Value {
                                separator,
                                key: None,
                                start: p,
                                end,
                            }
                        }
                    }
                }
                Frame::Object { members, next, held } => match members.get(*next) {
                    None => {
                        self.held_key_bytes -= *held;
                        Step::Close(b'}')
                    }
                    Some(member) => {
                        let step = Step::Value {
                            separator: *next > 0,
                            key: Some((member.key_start, member.value_start)),
                            start: member.value_start,
                            end: member.value_end,
                        };
                        *next += 1;
                        step
                    }
                },
            };
            match step {
                Step::Close(byte) => {
                    out.write_all(&[byte])?;
                    stack.pop();
                }
                Step::Value {
                    separator,
                    key,
                    start,
                    end,
                } => {
                    if separator {
                        out.write_all(b",")?;
                    }
                    if let Some((key_start, key_end)) = key {
                        self.input.copy(key_start, key_end, out)?;
                    }
                    self.begin(start, end, out, &mut stack)?;
                }
            }
        }
        Ok(root_end)
    }

    /// Copies a scalar, or opens a container and pushes its frame.
    fn begin(
        &mut self,
        pos: u64,
        end: u64,
        out: &mut dyn Write,
        stack: &mut Vec<Frame>,
    ) -> Result<(), CanonicalizationError> {
        match self.byte(pos)? {
            b'[' => {
                out.write_all(b"[")?;
                stack.push(Frame::Array {
                    cursor: pos + 1,
                    first: true,
                });
            }
            b'{' => {
                let (members, held) = self.collect_members(pos)?;
                out.write_all(b"{")?;
                stack.push(Frame::Object {
                    members,
                    next: 0,
                    held,
                });
            }
            _ => self.input.copy(pos, end, out)?,
        }
        Ok(())
    }

    fn collect_members(&mut self, pos: u64) -> Result<(Vec<Member>, u64), CanonicalizationError> {
        let mut members = Vec::new();
        let mut held = 0;
        let mut p = pos + 1;
        if self.byte(p)? != b'}' {
            loop {
                let key_end = self.skip_string(p)?;
                let key = self.decode_key(p, key_end)?;
                held += key.len() as u64;
                self.hold(key.len() as u64)?;
                if self.byte(key_end)? != b':' {
                    return Err(self.invalid(key_end, "expected ':'"));
                }
                let value_start = key_end + 1;
                let value_end = self.value_end(value_start)?;
                members.push(Member {
                    key,
                    key_start: p,
                    value_start,
                    value_end,
                });
                p = value_end;
                match self.byte(p)? {
                    b',' => p += 1,
                    b'}' => break,
                    _ => return Err(self.invalid(p, "expected ',' or '}'")),
                }
            }
        }

        members.sort_by(|a, b| a.key.as_bytes().cmp(b.key.as_bytes()));
        if let Some(pair) = members.windows(2).find(|pair| pair[0].key == pair[1].key) {
            return Err(CanonicalizationError::KeyDuplication {
                key: pair[0].key.clone(),
            });
        }
        Ok((members, held))
    }

    fn decode_key(&mut self, start: u64, end: u64) -> Result<String, CanonicalizationError> {
        let mut raw = Vec::with_capacity((end - start) as usize);
        self.input.copy(start, end, &mut raw)?;
        serde_json::from_slice(&raw).map_err(|e| self.invalid(start, &format!("bad key: {e}")))
    }

    fn skip_string(&mut self, pos: u64) -> Result<u64, CanonicalizationError> {
        if self.byte(pos)? != b'"' {
            return Err(self.invalid(pos, "expected '\"'"));
        }
        let mut p = pos + 1;
        loop {
            match self.byte(p)? {
                b'\\' => p += 2,
                b'"' => return Ok(p + 1),
                _ => p += 1,
            }
        }
    }
}
