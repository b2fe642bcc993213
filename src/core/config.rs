//! Run configuration for corpus encoding.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::tokenizer::{TokenizerError, DEFAULT_CACHE_SIZE, GPT2_PATTERN};

/// Default number of new bytes pulled from the corpus per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Default ceiling for a single chunk while searching for a boundary.
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 256 * 1024 * 1024;

/// Default document separator used by the TinyStories/OpenWebText corpora.
pub const ENDOFTEXT: &str = "<|endoftext|>";

/// How token strings in JSON/text definition files map to bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenTextEncoding {
    /// The string's own UTF-8 bytes.
    #[default]
    Utf8,
    /// GPT-2 byte-to-unicode alphabet (see [`byte_level`](super::byte_level)).
    ByteLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncodeConfig {
    /// New bytes read from the corpus per chunk.
    pub chunk_size: usize,
    /// Hard limit on a chunk's size while no special-token boundary is found.
    pub max_buffer_bytes: usize,
    /// Atomic tokens; every entry must already exist in the vocabulary.
    pub special_tokens: Vec<String>,
    /// Pretokenization pattern (fancy-regex syntax).
    pub pattern: String,
    /// LRU cache entries for pretoken encodings; 0 disables the cache.
    pub cache_size: usize,
    /// Encode chunks on the rayon pool after a sequential boundary pass.
    pub parallel: bool,
    /// Chunks gathered per parallel batch.
    pub batch_chunks: usize,
    pub text_encoding: TokenTextEncoding,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            special_tokens: vec![ENDOFTEXT.to_string()],
            pattern: GPT2_PATTERN.to_string(),
            cache_size: DEFAULT_CACHE_SIZE,
            parallel: false,
            batch_chunks: 16,
            text_encoding: TokenTextEncoding::Utf8,
        }
    }
}

impl EncodeConfig {
    /// Load a configuration from a `.json` or `.toml` file and validate it.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TokenizerError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: EncodeConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)
                .map_err(|e| TokenizerError::InvalidConfig(e.to_string()))?,
            Some("toml") => toml::from_str(&contents)
                .map_err(|e| TokenizerError::InvalidConfig(e.to_string()))?,
            other => {
                return Err(TokenizerError::InvalidConfig(format!(
                    "unsupported configuration extension {:?}",
                    other.unwrap_or("")
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TokenizerError> {
        let mut errors = Vec::new();

        if self.chunk_size == 0 {
            errors.push("chunk_size must be greater than 0".to_string());
        }
        if self.max_buffer_bytes < self.chunk_size {
            errors.push(format!(
                "max_buffer_bytes ({}) must be at least chunk_size ({})",
                self.max_buffer_bytes, self.chunk_size
            ));
        }
        if self.batch_chunks == 0 {
            errors.push("batch_chunks must be greater than 0".to_string());
        }
        if self.special_tokens.iter().any(|s| s.is_empty()) {
            errors.push("special_tokens must not contain empty strings".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TokenizerError::InvalidConfig(errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() {
        let config = EncodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.special_tokens, vec![ENDOFTEXT.to_string()]);
    }

    #[test]
    fn test_validate_collects_all_problems() {
        let config = EncodeConfig {
            chunk_size: 0,
            batch_chunks: 0,
            ..EncodeConfig::default()
        };
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("chunk_size"));
        assert!(message.contains("batch_chunks"));
    }

    #[test]
    fn test_buffer_limit_below_chunk_size_is_rejected() {
        let config = EncodeConfig {
            chunk_size: 1024,
            max_buffer_bytes: 512,
            ..EncodeConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TokenizerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_from_toml_with_partial_fields() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "chunk_size = 4096").unwrap();
        writeln!(file, "special_tokens = [\"<sep>\"]").unwrap();
        writeln!(file, "text_encoding = \"byte_level\"").unwrap();

        let config = EncodeConfig::from_path(file.path()).unwrap();
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.special_tokens, vec!["<sep>".to_string()]);
        assert_eq!(config.text_encoding, TokenTextEncoding::ByteLevel);
        assert_eq!(config.max_buffer_bytes, DEFAULT_MAX_BUFFER_BYTES);
    }

    #[test]
    fn test_from_json_rejects_unknown_fields() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"chunk_size": 10, "chunk_sise": 20}}"#).unwrap();
        assert!(matches!(
            EncodeConfig::from_path(file.path()),
            Err(TokenizerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        assert!(matches!(
            EncodeConfig::from_path(file.path()),
            Err(TokenizerError::InvalidConfig(_))
        ));
    }
}
