use log::info;
use lru::LruCache;
use rayon::prelude::*;
use std::io;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

use super::array::ArrayError;
use super::bpe::byte_pair_encode;
use super::config::EncodeConfig;
use super::merges::{MergeError, MergeRuleSet};
use super::pipeline::load_vocabulary_and_merges;
use super::pretokenizer::{Pretoken, Pretokenizer};
use super::special::SpecialTokenSet;
use super::vocab::{VocabError, VocabularyTable};

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("Malformed vocabulary: {0}")]
    MalformedVocabulary(#[from] VocabError),
    #[error("Malformed merge rules: {0}")]
    MalformedMergeRules(#[from] MergeError),
    #[error("Corpus read failed at byte offset {offset}: {source}")]
    CorpusRead {
        offset: u64,
        #[source]
        source: io::Error,
    },
    #[error("Token id {token} at output position {position} does not fit in 16 bits")]
    TokenOverflow { token: u32, position: u64 },
    #[error("No special-token boundary within {limit} bytes starting at corpus offset {offset}")]
    UnboundedUnit { offset: u64, limit: usize },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Pretokenization pattern error: {0}")]
    Pattern(#[from] fancy_regex::Error),
    #[error("Aho-Corasick build error: {0}")]
    AhoCorasickError(#[from] aho_corasick::BuildError),
    #[error("Decoding error: invalid UTF-8")]
    Utf8Error,
    #[error("Invalid token array: {0}")]
    InvalidArray(#[from] ArrayError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// GPT-2 pretokenization pattern: contractions, letter runs, digit runs,
/// punctuation runs (each with an optional leading space), then whitespace.
pub const GPT2_PATTERN: &str =
    r"'(?:[sdmt]|ll|ve|re)| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

/// Default cache size for encoded pretokens
pub const DEFAULT_CACHE_SIZE: usize = 4096;

/// Byte-pair encoder over a fixed vocabulary and merge rule set.
///
/// # Performance Characteristics
///
/// - **Single chunk encoding**: [`encode`](Self::encode) runs sequentially.
///   Corpus chunks are already large, and parallelism across chunks happens
///   one level up in the pipeline.
/// - **Batch encoding**: [`encode_batch`](Self::encode_batch) parallelizes
///   across independent texts with Rayon.
/// - **Very large single texts**: [`encode_rayon`](Self::encode_rayon)
///   pretokenizes sequentially and encodes pretokens on the Rayon pool.
///
/// Pretokens repeat heavily in natural text, so merge results are kept in an
/// LRU cache keyed by the exact pretoken bytes. The vocabulary and merge rules
/// are read-only after construction; a `&Tokenizer` can be shared across any
/// number of worker threads.
pub struct Tokenizer {
    vocab: VocabularyTable,
    merges: MergeRuleSet,
    pretokenizer: Pretokenizer,
    cache: Option<Mutex<LruCache<Vec<u8>, Vec<u32>>>>,
    cache_size: usize,
}

impl Tokenizer {
    /// Create a tokenizer from loaded tables.
    ///
    /// # Arguments
    /// * `vocab` - Validated id <-> bytes table
    /// * `merges` - Ranked merge rules resolved against `vocab`
    /// * `special_tokens` - Atomic token strings, each already present in `vocab`
    /// * `pattern` - Pretokenization regex
    /// * `cache_size` - LRU entries for pretoken encodings (0 disables caching)
    pub fn new<S: AsRef<str>>(
        vocab: VocabularyTable,
        merges: MergeRuleSet,
        special_tokens: &[S],
        pattern: &str,
        cache_size: usize,
    ) -> Result<Self, TokenizerError> {
        let special = SpecialTokenSet::new(&vocab, special_tokens)?;
        let pretokenizer = Pretokenizer::new(pattern, special)?;

        Ok(Self {
            vocab,
            merges,
            pretokenizer,
            cache: new_cache(cache_size),
            cache_size,
        })
    }

    /// Create a tokenizer using the special tokens, pattern and cache size of `config`.
    pub fn from_config(
        vocab: VocabularyTable,
        merges: MergeRuleSet,
        config: &EncodeConfig,
    ) -> Result<Self, TokenizerError> {
        Self::new(
            vocab,
            merges,
            &config.special_tokens,
            &config.pattern,
            config.cache_size,
        )
    }

    /// Load vocabulary and merge files and build a tokenizer from them.
    pub fn from_files(
        vocab_path: impl AsRef<Path>,
        merges_path: impl AsRef<Path>,
        config: &EncodeConfig,
    ) -> Result<Self, TokenizerError> {
        let (vocab, merges) =
            load_vocabulary_and_merges(vocab_path, merges_path, config.text_encoding)?;
        let tokenizer = Self::from_config(vocab, merges, config)?;
        info!(
            "Tokenizer ready: {} ids, {} merge rules, {} special tokens",
            tokenizer.vocab_size(),
            tokenizer.merges.len(),
            tokenizer.special_tokens().len()
        );
        Ok(tokenizer)
    }

    /// Encode one pretoken's bytes, consulting the cache first.
    pub fn encode_pretoken(&self, bytes: &[u8]) -> Vec<u32> {
        let Some(cache) = &self.cache else {
            return byte_pair_encode(bytes, &self.vocab, &self.merges);
        };

        if let Ok(mut cache) = cache.lock() {
            if let Some(cached) = cache.get(bytes) {
                return cached.clone();
            }
        }

        let result = byte_pair_encode(bytes, &self.vocab, &self.merges);

        if let Ok(mut cache) = cache.lock() {
            cache.put(bytes.to_vec(), result.clone());
        }

        result
    }

    /// Encode text, emitting special tokens as their ids without merging.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        let mut tokens = Vec::with_capacity(text.len() / 3);
        self.encode_into(text, &mut tokens)?;
        Ok(tokens)
    }

    /// Append the encoding of `text` to `tokens`.
    ///
    /// On error `tokens` may hold a prefix of the encoding.
    pub fn encode_into(&self, text: &str, tokens: &mut Vec<u32>) -> Result<(), TokenizerError> {
        for pretoken in self.pretokenizer.pretokenize(text) {
            self.push_pretoken(pretoken?, tokens);
        }
        Ok(())
    }

    /// Encode text treating special token strings as ordinary text.
    pub fn encode_ordinary(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        let mut tokens = Vec::with_capacity(text.len() / 3);
        for pretoken in self.pretokenizer.pretokenize_ordinary(text) {
            self.push_pretoken(pretoken?, &mut tokens);
        }
        Ok(tokens)
    }

    /// Encode text with pretokens merged on the Rayon pool.
    ///
    /// Output is identical to [`encode`](Self::encode). Only beneficial for
    /// very large texts.
    pub fn encode_rayon(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        let pretokens = self
            .pretokenizer
            .pretokenize(text)
            .collect::<Result<Vec<_>, _>>()?;

        let results: Vec<Vec<u32>> = pretokens
            .par_iter()
            .map(|pretoken| {
                let mut tokens = Vec::new();
                self.push_pretoken(*pretoken, &mut tokens);
                tokens
            })
            .collect();

        Ok(results.into_iter().flatten().collect())
    }

    /// Batch encode multiple texts in parallel.
    pub fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<u32>>, TokenizerError> {
        texts.par_iter().map(|text| self.encode(text)).collect()
    }

    #[inline]
    fn push_pretoken(&self, pretoken: Pretoken<'_>, tokens: &mut Vec<u32>) {
        match pretoken {
            Pretoken::Special { id, .. } => tokens.push(id),
            Pretoken::Piece { text, .. } => tokens.extend(self.encode_pretoken(text.as_bytes())),
        }
    }

    /// Decode token IDs back to bytes. Ids outside the vocabulary are skipped.
    pub fn decode_bytes(&self, tokens: &[u32]) -> Vec<u8> {
        let mut result = Vec::with_capacity(tokens.len() * 4);
        for &token in tokens {
            if let Some(bytes) = self.vocab.get_bytes(token) {
                result.extend_from_slice(bytes);
            }
        }
        result
    }

    /// Decode token IDs to a string.
    pub fn decode(&self, tokens: &[u32]) -> Result<String, TokenizerError> {
        String::from_utf8(self.decode_bytes(tokens)).map_err(|_| TokenizerError::Utf8Error)
    }

    /// Decode token IDs to a string, replacing invalid UTF-8 with replacement character.
    pub fn decode_lossy(&self, tokens: &[u32]) -> String {
        String::from_utf8_lossy(&self.decode_bytes(tokens)).into_owned()
    }

    /// Number of token ids, special tokens included.
    pub fn vocab_size(&self) -> usize {
        self.vocab.vocab_size()
    }

    pub fn vocab(&self) -> &VocabularyTable {
        &self.vocab
    }

    pub fn merges(&self) -> &MergeRuleSet {
        &self.merges
    }

    pub fn special_tokens(&self) -> &SpecialTokenSet {
        self.pretokenizer.special_tokens()
    }

    /// Clear the encoding cache.
    pub fn clear_cache(&self) {
        if let Some(Ok(mut cache)) = self.cache.as_ref().map(Mutex::lock) {
            cache.clear();
        }
    }

    /// Get the current cache size.
    pub fn cache_len(&self) -> usize {
        self.cache
            .as_ref()
            .and_then(|cache| cache.lock().ok().map(|c| c.len()))
            .unwrap_or(0)
    }
}

impl Clone for Tokenizer {
    fn clone(&self) -> Self {
        // Caches are not shared
        Self {
            vocab: self.vocab.clone(),
            merges: self.merges.clone(),
            pretokenizer: self.pretokenizer.clone(),
            cache: new_cache(self.cache_size),
            cache_size: self.cache_size,
        }
    }
}

fn new_cache(cache_size: usize) -> Option<Mutex<LruCache<Vec<u8>, Vec<u32>>>> {
    NonZeroUsize::new(cache_size).map(|size| Mutex::new(LruCache::new(size)))
}
