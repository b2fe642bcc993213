//! Vocabulary loading and the id <-> bytes table.
//!
//! A vocabulary is the bidirectional mapping between token ids and the exact
//! byte sequence each id stands for. It is loaded once, validated once, and
//! then shared read-only by every encode call.
//!
//! # Supported Formats
//!
//! The format is chosen from the file extension:
//!
//! - `.json`: an object from decimal id to token, as written by the BPE
//!   trainer. A token is either a string (bytes derived per
//!   [`TokenTextEncoding`]) or an array of byte values:
//!
//!   ```text
//!   {"0": [0], "97": "a", "256": " the", "257": "<|endoftext|>"}
//!   ```
//!
//! - `.tiktoken`: one `base64(bytes) id` pair per line:
//!
//!   ```text
//!   IHRoZQ== 256
//!   ```
//!
//! - `.pkl`: a pickled `dict[int, bytes]`, the trainer's lossless artifact.
//!
//! # Invariants
//!
//! Ids are contiguous from 0, no two ids share bytes, no token is empty, every
//! one of the 256 byte values has its own single-byte token, and the id space
//! fits the 16-bit output width (at most [`MAX_VOCAB_SIZE`] ids).

use base64::{engine::general_purpose::STANDARD, Engine};
use rustc_hash::FxHashMap;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use serde_pickle::{DeOptions, HashableValue, Value};
use std::fmt;
use std::path::Path;
use thiserror::Error;

use super::byte_level::byte_level_decode;
use super::config::TokenTextEncoding;

/// Largest vocabulary whose ids all fit in an unsigned 16-bit element.
pub const MAX_VOCAB_SIZE: usize = 1 << 16;

/// Errors that can occur when loading vocabulary files.
#[derive(Error, Debug)]
pub enum VocabError {
    #[error("Invalid base64 encoding: {0}")]
    Base64Error(#[from] base64::DecodeError),
    #[error("Invalid line format: {0}")]
    ParseError(String),
    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Invalid pickle: {0}")]
    PickleError(#[from] serde_pickle::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Unsupported vocabulary format: {0}")]
    UnsupportedFormat(String),
    #[error("Token id {0} is defined more than once")]
    DuplicateId(u32),
    #[error("Token ids {first} and {second} map to the same bytes")]
    DuplicateBytes { first: u32, second: u32 },
    #[error("Token id {0} has an empty byte sequence")]
    EmptyToken(u32),
    #[error("Vocabulary has {size} ids but at most {max} fit in 16-bit output", max = MAX_VOCAB_SIZE)]
    TooLarge { size: usize },
    #[error("Token ids are not contiguous: id {missing} is missing")]
    NonContiguous { missing: u32 },
    #[error("No single-byte token for byte 0x{0:02x}")]
    MissingByteToken(u8),
    #[error("Token id {id}: {text:?} is not valid byte-level text")]
    InvalidByteLevel { id: u32, text: String },
    #[error("Special token {0:?} is not in the vocabulary")]
    UnknownSpecialToken(String),
}

/// A token as persisted in a JSON definition file.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum TokenText {
    Text(String),
    Bytes(Vec<u8>),
}

impl TokenText {
    /// Resolve to raw bytes. `None` means the text is not valid under `encoding`.
    pub(crate) fn into_bytes(self, encoding: TokenTextEncoding) -> Option<Vec<u8>> {
        match (self, encoding) {
            (TokenText::Bytes(bytes), _) => Some(bytes),
            (TokenText::Text(text), TokenTextEncoding::Utf8) => Some(text.into_bytes()),
            (TokenText::Text(text), TokenTextEncoding::ByteLevel) => byte_level_decode(&text),
        }
    }

    pub(crate) fn display(&self) -> String {
        match self {
            TokenText::Text(text) => text.clone(),
            TokenText::Bytes(bytes) => bytes.escape_ascii().to_string(),
        }
    }
}

/// A pickled token: `bytes` as-is, `str` as text.
pub(crate) fn pickled_token(value: Value) -> Option<TokenText> {
    match value {
        Value::Bytes(bytes) => Some(TokenText::Bytes(bytes)),
        Value::String(text) => Some(TokenText::Text(text)),
        _ => None,
    }
}

/// JSON object entries in file order, keeping duplicate keys visible.
struct VocabEntries(Vec<(String, TokenText)>);

impl<'de> Deserialize<'de> for VocabEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = VocabEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping token ids to token bytes")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, TokenText>()? {
                    entries.push(entry);
                }
                Ok(VocabEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Bidirectional token id <-> byte sequence table.
#[derive(Debug, Clone)]
pub struct VocabularyTable {
    decoder: Vec<Vec<u8>>,
    encoder: FxHashMap<Vec<u8>, u32>,
    byte_tokens: [u32; 256],
}

impl VocabularyTable {
    /// Build and validate a vocabulary from `(id, bytes)` pairs in any order.
    pub fn from_entries<I>(entries: I) -> Result<Self, VocabError>
    where
        I: IntoIterator<Item = (u32, Vec<u8>)>,
    {
        let mut slots: FxHashMap<u32, Vec<u8>> = FxHashMap::default();
        let mut max_id = 0u32;
        for (id, bytes) in entries {
            if bytes.is_empty() {
                return Err(VocabError::EmptyToken(id));
            }
            if slots.insert(id, bytes).is_some() {
                return Err(VocabError::DuplicateId(id));
            }
            max_id = max_id.max(id);
        }

        let size = slots.len().max(max_id as usize + 1);
        if size > MAX_VOCAB_SIZE {
            return Err(VocabError::TooLarge { size });
        }

        let mut decoder = Vec::with_capacity(slots.len());
        let mut encoder = FxHashMap::default();
        encoder.reserve(slots.len());
        for id in 0..slots.len() as u32 {
            let bytes = slots
                .remove(&id)
                .ok_or(VocabError::NonContiguous { missing: id })?;
            if let Some(first) = encoder.insert(bytes.clone(), id) {
                return Err(VocabError::DuplicateBytes { first, second: id });
            }
            decoder.push(bytes);
        }

        let mut byte_tokens = [0u32; 256];
        for (byte, slot) in byte_tokens.iter_mut().enumerate() {
            *slot = *encoder
                .get([byte as u8].as_slice())
                .ok_or(VocabError::MissingByteToken(byte as u8))?;
        }

        Ok(Self {
            decoder,
            encoder,
            byte_tokens,
        })
    }

    /// Load a vocabulary file, choosing the parser from its extension.
    pub fn load(path: impl AsRef<Path>, encoding: TokenTextEncoding) -> Result<Self, VocabError> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&data, encoding),
            Some("tiktoken") => Self::from_tiktoken(&data),
            Some("pkl") => Self::from_pickle(&data, encoding),
            _ => Err(VocabError::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// Parse the trainer's JSON object format.
    pub fn from_json(data: &[u8], encoding: TokenTextEncoding) -> Result<Self, VocabError> {
        let VocabEntries(raw): VocabEntries = serde_json::from_slice(data)?;

        let mut entries = Vec::with_capacity(raw.len());
        for (key, token) in raw {
            let id: u32 = key
                .trim()
                .parse()
                .map_err(|_| VocabError::ParseError(format!("Invalid token id: {key:?}")))?;
            let text = token.display();
            let bytes = token
                .into_bytes(encoding)
                .ok_or(VocabError::InvalidByteLevel { id, text })?;
            entries.push((id, bytes));
        }

        Self::from_entries(entries)
    }

    /// Parse a pickled `dict[int, bytes]`.
    ///
    /// `str` values are accepted too and converted per `encoding`.
    pub fn from_pickle(data: &[u8], encoding: TokenTextEncoding) -> Result<Self, VocabError> {
        let Value::Dict(raw) = serde_pickle::value_from_slice(data, DeOptions::new())? else {
            return Err(VocabError::ParseError(
                "pickled vocabulary is not a dict".to_string(),
            ));
        };

        let mut entries = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            let id = match &key {
                HashableValue::I64(id) => u32::try_from(*id).ok(),
                _ => None,
            }
            .ok_or_else(|| VocabError::ParseError(format!("Invalid token id: {key:?}")))?;

            let token = pickled_token(value).ok_or_else(|| {
                VocabError::ParseError(format!("Token id {id} is not bytes or str"))
            })?;
            let text = token.display();
            let bytes = token
                .into_bytes(encoding)
                .ok_or(VocabError::InvalidByteLevel { id, text })?;
            entries.push((id, bytes));
        }

        Self::from_entries(entries)
    }

    /// Parse the tiktoken format: `base64_token id\n` per line.
    pub fn from_tiktoken(data: &[u8]) -> Result<Self, VocabError> {
        let mut entries = Vec::new();

        for line in data.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }

            let space_pos = line
                .iter()
                .rposition(|&b| b == b' ')
                .ok_or_else(|| VocabError::ParseError("Missing space separator".to_string()))?;

            let token = STANDARD.decode(&line[..space_pos])?;

            let id_str = std::str::from_utf8(&line[space_pos + 1..])
                .map_err(|_| VocabError::ParseError("Invalid UTF-8 in id".to_string()))?;
            let id: u32 = id_str
                .trim()
                .parse()
                .map_err(|_| VocabError::ParseError(format!("Invalid id: {}", id_str)))?;

            entries.push((id, token));
        }

        Self::from_entries(entries)
    }

    /// Number of ids (= largest id + 1).
    pub fn vocab_size(&self) -> usize {
        self.decoder.len()
    }

    pub fn id_of(&self, bytes: &[u8]) -> Option<u32> {
        self.encoder.get(bytes).copied()
    }

    /// Bytes of a token id.
    ///
    /// # Panics
    ///
    /// Panics if `id >= vocab_size()`. Every id produced by this crate's
    /// encoder is in range, so an out-of-range id is a caller bug.
    pub fn bytes_of(&self, id: u32) -> &[u8] {
        &self.decoder[id as usize]
    }

    pub fn get_bytes(&self, id: u32) -> Option<&[u8]> {
        self.decoder.get(id as usize).map(Vec::as_slice)
    }

    /// Single-byte base token for `byte`.
    #[inline]
    pub fn byte_token(&self, byte: u8) -> u32 {
        self.byte_tokens[byte as usize]
    }

    /// Length in bytes of the longest token.
    pub fn max_token_len(&self) -> usize {
        self.decoder.iter().map(Vec::len).max().unwrap_or(0)
    }

}
