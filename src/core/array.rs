//! Fixed-width token arrays in NumPy `.npy` format.
//!
//! # Layout
//!
//! ```text
//! \x93NUMPY 0x01 0x00 <u16 LE header len>
//! {'descr': '<u2', 'fortran_order': False, 'shape': (N,), }   (space padded, '\n')
//! N little-endian u16 token ids
//! ```
//!
//! The preamble (magic, version, length and header) is always exactly
//! [`NPY_PREAMBLE_LEN`] bytes. That lets [`FileTokenWriter`] write it with
//! `N = 0` up front and patch in the real count once all ids are written, so an
//! interrupted file never claims more elements than it holds.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use thiserror::Error;

use super::tokenizer::TokenizerError;

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Size of magic, version, header length and padded header.
pub const NPY_PREAMBLE_LEN: usize = 128;

/// Element type: unsigned 16-bit little-endian.
pub const NPY_DESCR: &str = "<u2";

#[derive(Error, Debug)]
pub enum ArrayError {
    #[error("Not an .npy file (bad magic)")]
    BadMagic,
    #[error("Unsupported .npy version {0}.{1}")]
    UnsupportedVersion(u8, u8),
    #[error("Malformed .npy header: {0}")]
    BadHeader(String),
    #[error("Unsupported dtype {0:?}, expected '<u2'")]
    UnsupportedDtype(String),
    #[error("Fortran-ordered arrays are not supported")]
    FortranOrder,
    #[error("Expected a one-dimensional shape, found {0:?}")]
    BadShape(String),
    #[error("Header declares {expected} bytes of data but {actual} are present")]
    LengthMismatch { expected: u64, actual: u64 },
}

/// Destination for encoded token ids, written in order.
pub trait TokenSink {
    /// Append ids, failing with [`TokenizerError::TokenOverflow`] on any id
    /// that does not fit in 16 bits. Nothing from `tokens` is written on failure.
    fn append(&mut self, tokens: &[u32]) -> Result<(), TokenizerError>;

    /// Number of ids appended so far.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Narrow ids to `u16`, reporting the first one that does not fit.
fn narrow(tokens: &[u32], start: u64, out: &mut Vec<u16>) -> Result<(), TokenizerError> {
    out.reserve(tokens.len());
    for (i, &token) in tokens.iter().enumerate() {
        let id = u16::try_from(token).map_err(|_| TokenizerError::TokenOverflow {
            token,
            position: start + i as u64,
        })?;
        out.push(id);
    }
    Ok(())
}

/// Preamble for a 1-D `<u2` array of `len` elements.
fn npy_preamble(len: u64) -> Vec<u8> {
    let mut header =
        format!("{{'descr': '{NPY_DESCR}', 'fortran_order': False, 'shape': ({len},), }}");
    let header_len = NPY_PREAMBLE_LEN - NPY_MAGIC.len() - 4;
    while header.len() < header_len - 1 {
        header.push(' ');
    }
    header.push('\n');

    let mut preamble = Vec::with_capacity(NPY_PREAMBLE_LEN);
    preamble.extend_from_slice(NPY_MAGIC);
    preamble.extend_from_slice(&[1, 0]);
    preamble.extend_from_slice(&(header_len as u16).to_le_bytes());
    preamble.extend_from_slice(header.as_bytes());
    preamble
}

fn header_value<'h>(header: &'h str, key: &str) -> Result<&'h str, ArrayError> {
    let needle = format!("'{key}':");
    let start = header
        .find(&needle)
        .ok_or_else(|| ArrayError::BadHeader(format!("missing key {key:?}")))?;
    Ok(header[start + needle.len()..].trim_start())
}

/// Validate the header dict and return the declared element count.
fn parse_header(header: &str) -> Result<u64, ArrayError> {
    let descr = header_value(header, "descr")?;
    let descr = descr
        .strip_prefix('\'')
        .and_then(|rest| rest.split('\'').next())
        .ok_or_else(|| ArrayError::BadHeader("unquoted descr".to_string()))?;
    if descr != NPY_DESCR {
        return Err(ArrayError::UnsupportedDtype(descr.to_string()));
    }

    let fortran = header_value(header, "fortran_order")?;
    if fortran.starts_with("True") {
        return Err(ArrayError::FortranOrder);
    } else if !fortran.starts_with("False") {
        return Err(ArrayError::BadHeader("invalid fortran_order".to_string()));
    }

    let shape = header_value(header, "shape")?;
    let shape = shape
        .strip_prefix('(')
        .and_then(|rest| rest.split(')').next())
        .ok_or_else(|| ArrayError::BadHeader("shape is not a tuple".to_string()))?;
    let dims: Vec<&str> = shape
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .collect();
    match dims.as_slice() {
        [n] => n
            .parse()
            .map_err(|_| ArrayError::BadShape(format!("({shape})"))),
        _ => Err(ArrayError::BadShape(format!("({shape})"))),
    }
}

/// A finished token array.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputArray {
    tokens: Vec<u16>,
}

impl OutputArray {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.tokens
    }

    pub fn into_vec(self) -> Vec<u16> {
        self.tokens
    }

    /// Ids widened back to `u32`, as the encoder produced them.
    pub fn to_u32(&self) -> Vec<u32> {
        self.tokens.iter().map(|&t| u32::from(t)).collect()
    }

    pub fn to_npy_bytes(&self) -> Vec<u8> {
        let mut bytes = npy_preamble(self.tokens.len() as u64);
        bytes.reserve(self.tokens.len() * 2);
        for token in &self.tokens {
            bytes.extend_from_slice(&token.to_le_bytes());
        }
        bytes
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), TokenizerError> {
        writer.write_all(&self.to_npy_bytes())?;
        writer.flush()?;
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), TokenizerError> {
        self.write_to(BufWriter::new(File::create(path)?))
    }

    /// Parse an `.npy` array of `<u2` elements.
    pub fn from_npy_bytes(data: &[u8]) -> Result<Self, ArrayError> {
        if data.len() < 10 || &data[..6] != NPY_MAGIC {
            return Err(ArrayError::BadMagic);
        }

        let (header_len, header_start) = match (data[6], data[7]) {
            (1, 0) => (u16::from_le_bytes([data[8], data[9]]) as usize, 10),
            (2, 0) | (3, 0) if data.len() >= 12 => (
                u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize,
                12,
            ),
            (major, minor) => return Err(ArrayError::UnsupportedVersion(major, minor)),
        };

        let body_start = header_start + header_len;
        let header = data
            .get(header_start..body_start)
            .ok_or_else(|| ArrayError::BadHeader("header extends past end of data".to_string()))?;
        let header = std::str::from_utf8(header)
            .map_err(|_| ArrayError::BadHeader("header is not UTF-8".to_string()))?;
        let count = parse_header(header)?;

        let body = &data[body_start..];
        let expected = count.saturating_mul(2);
        if body.len() as u64 != expected {
            return Err(ArrayError::LengthMismatch {
                expected,
                actual: body.len() as u64,
            });
        }

        let tokens = body
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self { tokens })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TokenizerError> {
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;
        Ok(Self::from_npy_bytes(&data)?)
    }
}

/// In-memory accumulator producing an [`OutputArray`].
#[derive(Debug, Default)]
pub struct TokenArrayWriter {
    tokens: Vec<u16>,
}

impl TokenArrayWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finalize(self) -> OutputArray {
        OutputArray {
            tokens: self.tokens,
        }
    }
}

impl TokenSink for TokenArrayWriter {
    fn append(&mut self, tokens: &[u32]) -> Result<(), TokenizerError> {
        let start = self.tokens.len();
        narrow(tokens, start as u64, &mut self.tokens).inspect_err(|_| {
            self.tokens.truncate(start);
        })
    }

    fn len(&self) -> u64 {
        self.tokens.len() as u64
    }
}

/// Streams ids straight into a seekable `.npy` destination.
///
/// Memory use is bounded by the largest single `append`.
pub struct FileTokenWriter<W: Write + Seek> {
    writer: W,
    len: u64,
    scratch: Vec<u16>,
    bytes: Vec<u8>,
}

impl<W: Write + Seek> FileTokenWriter<W> {
    /// Write a zero-length preamble and position the writer for ids.
    pub fn new(mut writer: W) -> Result<Self, TokenizerError> {
        writer.write_all(&npy_preamble(0))?;
        Ok(Self {
            writer,
            len: 0,
            scratch: Vec::new(),
            bytes: Vec::new(),
        })
    }

    /// Rewrite the preamble with the final count and flush.
    pub fn finalize(mut self) -> Result<W, TokenizerError> {
        self.writer.flush()?;
        self.writer.seek(SeekFrom::Start(0))?;
        self.writer.write_all(&npy_preamble(self.len))?;
        self.writer.seek(SeekFrom::End(0))?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl FileTokenWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, TokenizerError> {
        Self::new(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write + Seek> TokenSink for FileTokenWriter<W> {
    fn append(&mut self, tokens: &[u32]) -> Result<(), TokenizerError> {
        self.scratch.clear();
        narrow(tokens, self.len, &mut self.scratch)?;

        self.bytes.clear();
        self.bytes.reserve(self.scratch.len() * 2);
        for token in &self.scratch {
            self.bytes.extend_from_slice(&token.to_le_bytes());
        }
        self.writer.write_all(&self.bytes)?;
        self.len += tokens.len() as u64;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.len
    }
}
