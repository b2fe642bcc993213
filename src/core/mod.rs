//! Core encoding engine for bpepack.
//!
//! Turns a large text corpus into a flat array of 16-bit token ids using a
//! previously trained byte-pair vocabulary and its ranked merge rules.
//!
//! # Architecture
//!
//! - [`VocabularyTable`]: validated id <-> bytes table (at most 65,536 ids)
//! - [`MergeRuleSet`]: ranked `(left, right) -> merged` rules
//! - [`Pretokenizer`]: regex segmentation with atomic special tokens
//! - [`bpe`]: rank-ordered merging of a single pretoken
//! - [`Tokenizer`]: encode/decode API with an LRU pretoken cache and Rayon parallelism
//! - [`ChunkedCorpusReader`]: streams a corpus in chunks that end on special-token boundaries
//! - [`TokenArrayWriter`] / [`FileTokenWriter`]: uint16 `.npy` output
//! - [`pipeline`]: `load_vocabulary_and_merges`, `encode_corpus`, `encode_file`
//!
//! # Performance Notes
//!
//! - **FxHashMap**: fast lookups for byte sequences and merge pairs
//! - **Aho-Corasick**: O(N) multi-pattern matching for special tokens
//! - **LRU Cache**: avoids redundant merging for repeated pretokens
//! - **Rayon**: batch encoding and two-phase parallel corpus encoding

mod array;
pub mod bpe;
pub mod byte_level;
mod config;
mod merges;
pub mod pipeline;
mod pretokenizer;
mod special;
mod streaming;
mod tokenizer;
mod vocab;

pub use array::{
    ArrayError, FileTokenWriter, OutputArray, TokenArrayWriter, TokenSink, NPY_PREAMBLE_LEN,
};
pub use bpe::byte_pair_encode;
pub use byte_level::{byte_level_decode, byte_level_encode};
pub use config::{
    EncodeConfig, TokenTextEncoding, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_BUFFER_BYTES, ENDOFTEXT,
};
pub use merges::{MergeError, MergeRule, MergeRuleSet};
pub use pipeline::{
    encode_corpus, encode_corpus_into, encode_file, load_vocabulary_and_merges, EncodeStats,
};
pub use pretokenizer::{Pretoken, Pretokenizer, Pretokens};
pub use special::{SpecialMatch, SpecialTokenSet};
pub use streaming::{ChunkedCorpusReader, TextChunk};
pub use tokenizer::{Tokenizer, TokenizerError, DEFAULT_CACHE_SIZE, GPT2_PATTERN};
pub use vocab::{VocabError, VocabularyTable, MAX_VOCAB_SIZE};
