pub mod core;
#[cfg(feature = "python")]
mod python;

pub use core::{
    encode_corpus, encode_corpus_into, encode_file, load_vocabulary_and_merges, EncodeConfig,
    EncodeStats, OutputArray, Tokenizer, TokenizerError, GPT2_PATTERN,
};
