//! Ranked merge rules.
//!
//! Rule `i` says: where token `left` is immediately followed by token `right`,
//! the pair may be replaced by `merged`. The rule's position in the file is its
//! rank, and lower ranks are applied first.
//!
//! # Supported Formats
//!
//! - `.json`: an array of `[left, right]` pairs in rank order. Each side is a
//!   string (bytes derived per [`TokenTextEncoding`]) or an array of byte values.
//! - `.txt`: GPT-2 `merges.txt`, one byte-level `left right` pair per line with
//!   an optional `#version` header.
//! - `.pkl`: a pickled `list[tuple[bytes, bytes]]` in rank order.
//!
//! Sides are resolved to ids through the vocabulary, and the merged id is the
//! id of `left ++ right`.

use rustc_hash::FxHashMap;
use serde_pickle::{DeOptions, Value};
use std::path::Path;
use thiserror::Error;

use super::config::TokenTextEncoding;
use super::vocab::{pickled_token, TokenText, VocabularyTable};

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Invalid pickle: {0}")]
    PickleError(#[from] serde_pickle::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Unsupported merges format: {0}")]
    UnsupportedFormat(String),
    #[error("Rule {rank}: invalid line format: {line:?}")]
    ParseError { rank: usize, line: String },
    #[error("Rule {rank}: {text:?} is not valid byte-level text")]
    InvalidByteLevel { rank: usize, text: String },
    #[error("Rule {rank}: {side} token \"{bytes}\" is not in the vocabulary")]
    UnknownToken {
        rank: usize,
        side: &'static str,
        bytes: String,
    },
    #[error("Rule {rank}: merged token \"{bytes}\" is not in the vocabulary")]
    UnknownMerged { rank: usize, bytes: String },
    #[error("Rule {rank}: token id {id} is not in the vocabulary")]
    UnknownId { rank: usize, id: u32 },
    #[error("Pair ({left}, {right}) appears at rank {first} and again at rank {second}")]
    DuplicatePair {
        left: u32,
        right: u32,
        first: u32,
        second: u32,
    },
}

/// Result of looking up a mergeable pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeRule {
    pub rank: u32,
    pub merged: u32,
}

/// Total order of merge rules keyed by `(left, right)`.
#[derive(Debug, Clone, Default)]
pub struct MergeRuleSet {
    rules: FxHashMap<(u32, u32), MergeRule>,
}

impl MergeRuleSet {
    /// Build from explicit `(left, right, merged)` id triples in rank order.
    pub fn from_ids(
        vocab: &VocabularyTable,
        triples: &[(u32, u32, u32)],
    ) -> Result<Self, MergeError> {
        let mut set = Self::default();
        set.rules.reserve(triples.len());
        for (rank, &(left, right, merged)) in triples.iter().enumerate() {
            for id in [left, right, merged] {
                if vocab.get_bytes(id).is_none() {
                    return Err(MergeError::UnknownId { rank, id });
                }
            }
            set.insert(rank, left, right, merged)?;
        }
        Ok(set)
    }

    /// Build from byte-sequence pairs in rank order.
    pub fn from_byte_pairs<I>(vocab: &VocabularyTable, pairs: I) -> Result<Self, MergeError>
    where
        I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    {
        let mut set = Self::default();
        for (rank, (left_bytes, right_bytes)) in pairs.into_iter().enumerate() {
            let left = resolve_side(vocab, rank, "left", &left_bytes)?;
            let right = resolve_side(vocab, rank, "right", &right_bytes)?;

            let mut merged_bytes = left_bytes;
            merged_bytes.extend_from_slice(&right_bytes);
            let merged = vocab
                .id_of(&merged_bytes)
                .ok_or_else(|| MergeError::UnknownMerged {
                    rank,
                    bytes: merged_bytes.escape_ascii().to_string(),
                })?;

            set.insert(rank, left, right, merged)?;
        }
        Ok(set)
    }

    /// Load a merges file, choosing the parser from its extension.
    pub fn load(
        path: impl AsRef<Path>,
        vocab: &VocabularyTable,
        encoding: TokenTextEncoding,
    ) -> Result<Self, MergeError> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&std::fs::read(path)?, vocab, encoding),
            Some("txt") => Self::from_merges_txt(&std::fs::read_to_string(path)?, vocab),
            Some("pkl") => Self::from_pickle(&std::fs::read(path)?, vocab, encoding),
            _ => Err(MergeError::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// Parse a JSON array of `[left, right]` pairs.
    pub fn from_json(
        data: &[u8],
        vocab: &VocabularyTable,
        encoding: TokenTextEncoding,
    ) -> Result<Self, MergeError> {
        let raw: Vec<(TokenText, TokenText)> = serde_json::from_slice(data)?;

        let mut pairs = Vec::with_capacity(raw.len());
        for (rank, (left, right)) in raw.into_iter().enumerate() {
            pairs.push((
                text_to_bytes(left, rank, encoding)?,
                text_to_bytes(right, rank, encoding)?,
            ));
        }

        Self::from_byte_pairs(vocab, pairs)
    }

    /// Parse a pickled list of `(left, right)` pairs.
    pub fn from_pickle(
        data: &[u8],
        vocab: &VocabularyTable,
        encoding: TokenTextEncoding,
    ) -> Result<Self, MergeError> {
        let raw = match serde_pickle::value_from_slice(data, DeOptions::new())? {
            Value::List(items) | Value::Tuple(items) => items,
            other => {
                return Err(MergeError::ParseError {
                    rank: 0,
                    line: format!("{other:?}"),
                })
            }
        };

        let mut pairs = Vec::with_capacity(raw.len());
        for (rank, item) in raw.into_iter().enumerate() {
            let [left, right]: [Value; 2] = match item {
                Value::Tuple(sides) | Value::List(sides) => {
                    sides.try_into().map_err(|sides: Vec<Value>| MergeError::ParseError {
                        rank,
                        line: format!("{sides:?}"),
                    })?
                }
                other => {
                    return Err(MergeError::ParseError {
                        rank,
                        line: format!("{other:?}"),
                    })
                }
            };
            pairs.push((
                pickled_side(left, rank, encoding)?,
                pickled_side(right, rank, encoding)?,
            ));
        }

        Self::from_byte_pairs(vocab, pairs)
    }

    /// Parse GPT-2 style `merges.txt` (byte-level text, one pair per line).
    pub fn from_merges_txt(text: &str, vocab: &VocabularyTable) -> Result<Self, MergeError> {
        let mut pairs = Vec::new();

        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() || (pairs.is_empty() && line.starts_with("#version")) {
                continue;
            }

            let rank = pairs.len();
            let (left, right) = line
                .split_once(' ')
                .filter(|(l, r)| !l.is_empty() && !r.is_empty() && !r.contains(' '))
                .ok_or_else(|| MergeError::ParseError {
                    rank,
                    line: line.to_string(),
                })?;

            pairs.push((
                text_to_bytes(TokenText::Text(left.to_string()), rank, TokenTextEncoding::ByteLevel)?,
                text_to_bytes(TokenText::Text(right.to_string()), rank, TokenTextEncoding::ByteLevel)?,
            ));
        }

        Self::from_byte_pairs(vocab, pairs)
    }

    /// Rank and result of merging `left` followed by `right`, if mergeable.
    #[inline]
    pub fn rank_of(&self, left: u32, right: u32) -> Option<MergeRule> {
        self.rules.get(&(left, right)).copied()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn insert(&mut self, rank: usize, left: u32, right: u32, merged: u32) -> Result<(), MergeError> {
        let rank = rank as u32;
        if let Some(existing) = self.rules.get(&(left, right)) {
            return Err(MergeError::DuplicatePair {
                left,
                right,
                first: existing.rank,
                second: rank,
            });
        }
        self.rules.insert((left, right), MergeRule { rank, merged });
        Ok(())
    }
}

fn resolve_side(
    vocab: &VocabularyTable,
    rank: usize,
    side: &'static str,
    bytes: &[u8],
) -> Result<u32, MergeError> {
    vocab.id_of(bytes).ok_or_else(|| MergeError::UnknownToken {
        rank,
        side,
        bytes: bytes.escape_ascii().to_string(),
    })
}

fn pickled_side(side: Value, rank: usize, encoding: TokenTextEncoding) -> Result<Vec<u8>, MergeError> {
    let line = format!("{side:?}");
    let token = pickled_token(side).ok_or(MergeError::ParseError { rank, line })?;
    text_to_bytes(token, rank, encoding)
}

fn text_to_bytes(
    token: TokenText,
    rank: usize,
    encoding: TokenTextEncoding,
) -> Result<Vec<u8>, MergeError> {
    let text = token.display();
    token
        .into_bytes(encoding)
        .ok_or(MergeError::InvalidByteLevel { rank, text })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::byte_level::byte_level_encode;
    use crate::core::vocab::tests::byte_vocab_with;

    #[test]
    fn test_rank_of_follows_file_order() {
        let vocab = byte_vocab_with(&[b"th", b"the", b"he"]);
        let merges = MergeRuleSet::from_byte_pairs(
            &vocab,
            vec![
                (b"t".to_vec(), b"h".to_vec()),
                (b"th".to_vec(), b"e".to_vec()),
                (b"h".to_vec(), b"e".to_vec()),
            ],
        )
        .unwrap();

        assert_eq!(merges.len(), 3);
        assert_eq!(
            merges.rank_of(b't' as u32, b'h' as u32),
            Some(MergeRule { rank: 0, merged: 256 })
        );
        assert_eq!(
            merges.rank_of(256, b'e' as u32),
            Some(MergeRule { rank: 1, merged: 257 })
        );
        assert_eq!(merges.rank_of(b'e' as u32, b'h' as u32), None);
    }

    #[test]
    fn test_duplicate_pair_rejected() {
        let vocab = byte_vocab_with(&[b"ab"]);
        let result = MergeRuleSet::from_byte_pairs(
            &vocab,
            vec![
                (b"a".to_vec(), b"b".to_vec()),
                (b"a".to_vec(), b"b".to_vec()),
            ],
        );
        assert!(matches!(
            result,
            Err(MergeError::DuplicatePair { first: 0, second: 1, .. })
        ));
    }

    #[test]
    fn test_unknown_side_rejected() {
        let vocab = byte_vocab_with(&[b"ab"]);
        let result =
            MergeRuleSet::from_byte_pairs(&vocab, vec![(b"zz".to_vec(), b"b".to_vec())]);
        assert!(matches!(
            result,
            Err(MergeError::UnknownToken { rank: 0, side: "left", .. })
        ));
    }

    #[test]
    fn test_unknown_merged_rejected() {
        let vocab = byte_vocab_with(&[b"ab"]);
        let result = MergeRuleSet::from_byte_pairs(
            &vocab,
            vec![
                (b"a".to_vec(), b"b".to_vec()),
                (b"b".to_vec(), b"c".to_vec()),
            ],
        );
        assert!(matches!(result, Err(MergeError::UnknownMerged { rank: 1, .. })));
    }

    #[test]
    fn test_from_ids_checks_every_id() {
        let vocab = byte_vocab_with(&[b"ab"]);
        assert!(MergeRuleSet::from_ids(&vocab, &[(97, 98, 256)]).is_ok());
        assert!(matches!(
            MergeRuleSet::from_ids(&vocab, &[(97, 98, 999)]),
            Err(MergeError::UnknownId { rank: 0, id: 999 })
        ));
    }

    #[test]
    fn test_from_json_mixed_sides() {
        let vocab = byte_vocab_with(&[b"ab", &[0xe4, 0xb8]]);
        let json = br#"[["a", "b"], [[228], [184]]]"#;
        let merges = MergeRuleSet::from_json(json, &vocab, TokenTextEncoding::Utf8).unwrap();
        assert_eq!(merges.rank_of(228, 184), Some(MergeRule { rank: 1, merged: 257 }));
    }

    #[test]
    fn test_from_json_rejects_triples() {
        let vocab = byte_vocab_with(&[b"ab"]);
        let json = br#"[["a", "b", "c"]]"#;
        assert!(matches!(
            MergeRuleSet::from_json(json, &vocab, TokenTextEncoding::Utf8),
            Err(MergeError::JsonError(_))
        ));
    }

    #[test]
    fn test_from_merges_txt() {
        let vocab = byte_vocab_with(&[b" t", b" th"]);
        let text = format!(
            "#version: 0.2\n{} t\n\n{} h\n",
            byte_level_encode(b" "),
            byte_level_encode(b" t")
        );
        let merges = MergeRuleSet::from_merges_txt(&text, &vocab).unwrap();
        assert_eq!(merges.rank_of(32, b't' as u32), Some(MergeRule { rank: 0, merged: 256 }));
        assert_eq!(merges.rank_of(256, b'h' as u32), Some(MergeRule { rank: 1, merged: 257 }));
    }

    #[test]
    fn test_merges_txt_bad_line() {
        let vocab = byte_vocab_with(&[]);
        assert!(matches!(
            MergeRuleSet::from_merges_txt("abc\n", &vocab),
            Err(MergeError::ParseError { rank: 0, .. })
        ));
    }

    fn pickle(value: &Value) -> Vec<u8> {
        serde_pickle::value_to_vec(value, serde_pickle::SerOptions::new()).unwrap()
    }

    fn byte_pair(left: &[u8], right: &[u8]) -> Value {
        Value::Tuple(vec![Value::Bytes(left.to_vec()), Value::Bytes(right.to_vec())])
    }

    #[test]
    fn test_from_pickle_tuples_of_bytes() {
        let vocab = byte_vocab_with(&[b"\xe4\xb8", b"\xe4\xb8\x96"]);
        let data = pickle(&Value::List(vec![
            byte_pair(b"\xe4", b"\xb8"),
            byte_pair(b"\xe4\xb8", b"\x96"),
        ]));

        let merges = MergeRuleSet::from_pickle(&data, &vocab, TokenTextEncoding::Utf8).unwrap();
        assert_eq!(merges.len(), 2);
        assert_eq!(merges.rank_of(0xe4, 0xb8), Some(MergeRule { rank: 0, merged: 256 }));
        assert_eq!(merges.rank_of(256, 0x96), Some(MergeRule { rank: 1, merged: 257 }));
    }

    #[test]
    fn test_from_pickle_rejects_non_pairs() {
        let vocab = byte_vocab_with(&[b"ab"]);
        let data = pickle(&Value::List(vec![
            byte_pair(b"a", b"b"),
            Value::Tuple(vec![Value::Bytes(b"a".to_vec())]),
        ]));
        assert!(matches!(
            MergeRuleSet::from_pickle(&data, &vocab, TokenTextEncoding::Utf8),
            Err(MergeError::ParseError { rank: 1, .. })
        ));
    }

    #[test]
    fn test_load_pickle_by_extension() {
        let vocab = byte_vocab_with(&[b"ab"]);
        let mut file = tempfile::Builder::new().suffix(".pkl").tempfile().unwrap();
        std::io::Write::write_all(&mut file, &pickle(&Value::List(vec![byte_pair(b"a", b"b")])))
            .unwrap();

        let merges = MergeRuleSet::load(file.path(), &vocab, TokenTextEncoding::Utf8).unwrap();
        assert_eq!(merges.rank_of(b'a' as u32, b'b' as u32), Some(MergeRule { rank: 0, merged: 256 }));
    }
}
