//! Python bindings for the bpepack encoder.
//!
//! This module provides PyO3 wrappers around the core Rust tokenizer and
//! corpus pipeline, so dataset preparation scripts can drive encoding from
//! Python while the heavy lifting stays in Rust.
//!
//! # Thread Safety
//!
//! The tokenizer is thread-safe and can be shared across Python threads.
//! Batch operations use Rayon for true parallelism.
//!
//! # Example
//!
//! ```python
//! from bpepack import Tokenizer, load_token_array
//!
//! tokenizer = Tokenizer.from_files("vocab.json", "merges.json")
//! tokens = tokenizer.encode("Once upon a time<|endoftext|>")
//! text = tokenizer.decode(tokens)
//!
//! count = tokenizer.encode_file("train.txt", "train.npy")
//! ids = load_token_array("train.npy")
//! ```

use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;

use crate::core::{
    encode_file, EncodeConfig, OutputArray, TokenTextEncoding, Tokenizer, TokenizerError,
};

fn to_py_err(e: TokenizerError) -> PyErr {
    match e {
        TokenizerError::Io(_) | TokenizerError::CorpusRead { .. } => {
            PyIOError::new_err(e.to_string())
        }
        _ => PyValueError::new_err(e.to_string()),
    }
}

/// Python wrapper for the Rust Tokenizer.
#[pyclass(name = "Tokenizer")]
pub struct PyTokenizer {
    inner: Tokenizer,
    config: EncodeConfig,
}

#[pymethods]
impl PyTokenizer {
    /// Load a tokenizer from vocabulary and merge rule files.
    ///
    /// Args:
    ///     vocab_path: Path to a `.json` or `.tiktoken` vocabulary
    ///     merges_path: Path to a `.json` or GPT-2 `.txt` merges file
    ///     special_tokens: Optional list of special tokens (default: ["<|endoftext|>"])
    ///     config_path: Optional `.json`/`.toml` encode configuration
    ///     byte_level: Token strings use the GPT-2 byte-level alphabet
    ///
    /// Returns:
    ///     Tokenizer instance
    #[staticmethod]
    #[pyo3(signature = (vocab_path, merges_path, special_tokens=None, config_path=None, byte_level=false))]
    fn from_files(
        vocab_path: &str,
        merges_path: &str,
        special_tokens: Option<Vec<String>>,
        config_path: Option<&str>,
        byte_level: bool,
    ) -> PyResult<Self> {
        let mut config = match config_path {
            Some(path) => EncodeConfig::from_path(path).map_err(to_py_err)?,
            None => EncodeConfig::default(),
        };
        if let Some(special_tokens) = special_tokens {
            config.special_tokens = special_tokens;
        }
        if byte_level {
            config.text_encoding = TokenTextEncoding::ByteLevel;
        }
        config.validate().map_err(to_py_err)?;

        let inner = Tokenizer::from_files(vocab_path, merges_path, &config).map_err(to_py_err)?;
        Ok(Self { inner, config })
    }

    /// Encode text to token IDs, emitting special tokens atomically.
    ///
    /// Args:
    ///     text: Input text
    ///
    /// Returns:
    ///     List of token IDs
    fn encode(&self, text: &str) -> PyResult<Vec<u32>> {
        self.inner.encode(text).map_err(to_py_err)
    }

    /// Encode text treating special token strings as ordinary text.
    fn encode_ordinary(&self, text: &str) -> PyResult<Vec<u32>> {
        self.inner.encode_ordinary(text).map_err(to_py_err)
    }

    /// Encode text with pretokens merged in parallel.
    ///
    /// Only beneficial for very large texts.
    fn encode_rayon(&self, text: &str) -> PyResult<Vec<u32>> {
        self.inner.encode_rayon(text).map_err(to_py_err)
    }

    /// Batch encode multiple texts in parallel.
    ///
    /// Args:
    ///     texts: List of texts to encode
    ///
    /// Returns:
    ///     List of token ID lists
    fn encode_batch(&self, texts: Vec<String>) -> PyResult<Vec<Vec<u32>>> {
        self.inner.encode_batch(&texts).map_err(to_py_err)
    }

    /// Decode token IDs to string.
    ///
    /// Raises:
    ///     ValueError: If decoded bytes are not valid UTF-8
    fn decode(&self, tokens: Vec<u32>) -> PyResult<String> {
        self.inner.decode(&tokens).map_err(to_py_err)
    }

    /// Decode token IDs to bytes.
    fn decode_bytes(&self, tokens: Vec<u32>) -> Vec<u8> {
        self.inner.decode_bytes(&tokens)
    }

    /// Decode token IDs to string, replacing invalid UTF-8.
    fn decode_lossy(&self, tokens: Vec<u32>) -> String {
        self.inner.decode_lossy(&tokens)
    }

    /// Encode a text file into a uint16 `.npy` token array.
    ///
    /// Args:
    ///     input_path: Corpus text file (UTF-8)
    ///     output_path: Destination `.npy` file
    ///
    /// Returns:
    ///     Number of tokens written
    fn encode_file(&self, input_path: &str, output_path: &str) -> PyResult<u64> {
        let stats =
            encode_file(input_path, output_path, &self.inner, &self.config).map_err(to_py_err)?;
        Ok(stats.tokens)
    }

    /// Get the vocabulary size (including special tokens).
    #[getter]
    fn vocab_size(&self) -> usize {
        self.inner.vocab_size()
    }

    /// Clear the pretoken encoding cache.
    fn clear_cache(&self) {
        self.inner.clear_cache();
    }

    #[getter]
    fn cache_len(&self) -> usize {
        self.inner.cache_len()
    }

    fn __repr__(&self) -> String {
        format!(
            "Tokenizer(vocab_size={}, special_tokens={})",
            self.inner.vocab_size(),
            self.inner.special_tokens().len()
        )
    }
}

/// Read a uint16 `.npy` token array back as a list of ids.
#[pyfunction]
pub fn load_token_array(path: &str) -> PyResult<Vec<u16>> {
    OutputArray::load(path)
        .map(OutputArray::into_vec)
        .map_err(to_py_err)
}
