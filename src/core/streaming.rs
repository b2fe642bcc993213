//! Boundary-safe chunked reading of arbitrarily large corpora.
//!
//! Encoding a chunk independently of its neighbours is only correct if no
//! pretoken straddles the chunk boundary. Special tokens always terminate a
//! pretoken, so the reader only ever cuts directly after a special-token
//! occurrence whose match is final (see
//! [`SpecialTokenSet::last_boundary`]). Whatever follows the cut is carried
//! over and prepended to the next chunk.
//!
//! If a buffer holds no usable boundary the reader keeps reading rather than
//! splitting, up to a hard `max_buffer_bytes` limit, after which it fails with
//! [`TokenizerError::UnboundedUnit`].

use log::{debug, warn};
use std::io::{self, Read};

use super::config::EncodeConfig;
use super::special::SpecialTokenSet;
use super::tokenizer::TokenizerError;

/// A span of corpus text that can be encoded on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Byte offset of the first byte of `text` in the corpus.
    pub offset: u64,
    pub text: String,
}

impl TextChunk {
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Streams a byte source as [`TextChunk`]s that end on special-token boundaries.
///
/// # Example
///
/// ```ignore
/// let file = File::open("corpus.txt")?;
/// let mut reader = ChunkedCorpusReader::new(file, tokenizer.special_tokens().clone(), 1 << 20, 1 << 28);
///
/// while let Some(chunk) = reader.next_chunk(1 << 20)? {
///     tokens.extend(tokenizer.encode(&chunk.text)?);
/// }
/// ```
pub struct ChunkedCorpusReader<R> {
    source: R,
    special: SpecialTokenSet,
    /// Carried-over bytes; `buffer[0]` sits at corpus offset `offset`.
    buffer: Vec<u8>,
    /// No occurrence in `buffer` starts before this index.
    scan_from: usize,
    offset: u64,
    chunk_size: usize,
    max_buffer_bytes: usize,
    eof: bool,
    failed: bool,
}

impl<R: Read> ChunkedCorpusReader<R> {
    pub fn new(
        source: R,
        special: SpecialTokenSet,
        chunk_size: usize,
        max_buffer_bytes: usize,
    ) -> Self {
        Self {
            source,
            special,
            buffer: Vec::new(),
            scan_from: 0,
            offset: 0,
            chunk_size: chunk_size.max(1),
            max_buffer_bytes,
            eof: false,
            failed: false,
        }
    }

    /// Reader using the chunk size and buffer limit of `config`.
    pub fn with_config(source: R, special: SpecialTokenSet, config: &EncodeConfig) -> Self {
        Self::new(source, special, config.chunk_size, config.max_buffer_bytes)
    }

    /// Total bytes pulled from the source so far.
    pub fn bytes_read(&self) -> u64 {
        self.offset + self.buffer.len() as u64
    }

    /// Bytes read but not yet returned in a chunk.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Read up to `max_bytes` new bytes and return everything up to the last
    /// safe boundary. Returns `Ok(None)` once the corpus is exhausted.
    pub fn next_chunk(&mut self, max_bytes: usize) -> Result<Option<TextChunk>, TokenizerError> {
        let max_bytes = max_bytes.max(1);
        self.fill(max_bytes)?;

        let mut grew = false;
        loop {
            if let Some(end) = self
                .special
                .last_boundary_from(&self.buffer, self.scan_from, self.eof)
            {
                return self.emit(end).map(Some);
            }
            self.scan_from = self.buffer.len().saturating_sub(self.special.max_len());

            if self.eof {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let end = self.buffer.len();
                return self.emit(end).map(Some);
            }

            let room = self.max_buffer_bytes.saturating_sub(self.buffer.len());
            if room == 0 {
                // A full buffer is fine if the source ends right here
                self.fill(1)?;
                if !self.eof {
                    return Err(TokenizerError::UnboundedUnit {
                        offset: self.offset,
                        limit: self.max_buffer_bytes,
                    });
                }
                continue;
            }

            if !grew {
                warn!(
                    "No special-token boundary in {} bytes at offset {}; reading further",
                    self.buffer.len(),
                    self.offset
                );
                grew = true;
            }
            self.fill(max_bytes.min(room))?;
        }
    }

    /// Append up to `n` bytes from the source, noting end of input.
    fn fill(&mut self, n: usize) -> Result<(), TokenizerError> {
        if self.eof {
            return Ok(());
        }

        let before = self.buffer.len();
        let read = (&mut self.source)
            .take(n as u64)
            .read_to_end(&mut self.buffer)
            .map_err(|source| TokenizerError::CorpusRead {
                offset: self.offset + self.buffer.len() as u64,
                source,
            })?;
        debug_assert_eq!(read, self.buffer.len() - before);

        if read < n {
            self.eof = true;
        }
        Ok(())
    }

    /// Split off `buffer[..end]` as the next chunk.
    fn emit(&mut self, end: usize) -> Result<TextChunk, TokenizerError> {
        let rest = self.buffer.split_off(end);
        let bytes = std::mem::replace(&mut self.buffer, rest);
        self.scan_from = 0;
        let offset = self.offset;
        self.offset += bytes.len() as u64;

        let text = String::from_utf8(bytes).map_err(|e| {
            let utf8 = e.utf8_error();
            TokenizerError::CorpusRead {
                offset: offset + utf8.valid_up_to() as u64,
                source: io::Error::new(io::ErrorKind::InvalidData, utf8),
            }
        })?;

        debug!(
            "Chunk at offset {}: {} bytes, {} carried over",
            offset,
            text.len(),
            self.buffer.len()
        );
        Ok(TextChunk { offset, text })
    }
}

impl<R: Read> Iterator for ChunkedCorpusReader<R> {
    type Item = Result<TextChunk, TokenizerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let chunk_size = self.chunk_size;
        match self.next_chunk(chunk_size) {
            Ok(chunk) => chunk.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
