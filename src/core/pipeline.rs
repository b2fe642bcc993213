//! Corpus-level entry points: load tables, stream a corpus through the
//! encoder, and pack the result into a token array.

use flate2::read::MultiGzDecoder;
use log::{debug, info};
use rayon::prelude::*;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use super::array::{FileTokenWriter, OutputArray, TokenArrayWriter, TokenSink};
use super::config::{EncodeConfig, TokenTextEncoding};
use super::merges::MergeRuleSet;
use super::streaming::ChunkedCorpusReader;
use super::tokenizer::{Tokenizer, TokenizerError};
use super::vocab::VocabularyTable;

/// Counters for one encoding run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeStats {
    pub bytes_read: u64,
    pub chunks: u64,
    pub tokens: u64,
}

impl EncodeStats {
    /// Average corpus bytes per emitted token (the compression ratio).
    pub fn bytes_per_token(&self) -> f64 {
        if self.tokens == 0 {
            0.0
        } else {
            self.bytes_read as f64 / self.tokens as f64
        }
    }
}

/// Load and cross-validate a vocabulary and its merge rules.
///
/// Fails with [`TokenizerError::MalformedVocabulary`] or
/// [`TokenizerError::MalformedMergeRules`] before any corpus is touched.
pub fn load_vocabulary_and_merges(
    vocab_path: impl AsRef<Path>,
    merges_path: impl AsRef<Path>,
    encoding: TokenTextEncoding,
) -> Result<(VocabularyTable, MergeRuleSet), TokenizerError> {
    let vocab_path = vocab_path.as_ref();
    let merges_path = merges_path.as_ref();

    let vocab = VocabularyTable::load(vocab_path, encoding)?;
    let merges = MergeRuleSet::load(merges_path, &vocab, encoding)?;
    info!(
        "Loaded {} ids from {} and {} merge rules from {}",
        vocab.vocab_size(),
        vocab_path.display(),
        merges.len(),
        merges_path.display()
    );
    Ok((vocab, merges))
}

/// Encode an entire corpus into an in-memory token array.
pub fn encode_corpus<R: Read>(
    source: R,
    tokenizer: &Tokenizer,
    config: &EncodeConfig,
) -> Result<OutputArray, TokenizerError> {
    let mut writer = TokenArrayWriter::new();
    encode_corpus_into(source, tokenizer, config, &mut writer)?;
    Ok(writer.finalize())
}

/// Encode a corpus chunk by chunk, appending ids to `sink` in corpus order.
///
/// With `config.parallel` set, chunk boundaries are still found sequentially,
/// but each batch of `config.batch_chunks` chunks is encoded on the Rayon pool
/// before being appended in order. Output is identical either way.
pub fn encode_corpus_into<R, S>(
    source: R,
    tokenizer: &Tokenizer,
    config: &EncodeConfig,
    sink: &mut S,
) -> Result<EncodeStats, TokenizerError>
where
    R: Read,
    S: TokenSink + ?Sized,
{
    config.validate()?;

    let mut reader =
        ChunkedCorpusReader::with_config(source, tokenizer.special_tokens().clone(), config);
    let mut stats = EncodeStats::default();

    if config.parallel {
        encode_batches(&mut reader, tokenizer, config.batch_chunks, sink, &mut stats)?;
    } else {
        let mut tokens = Vec::new();
        for chunk in reader.by_ref() {
            let chunk = chunk?;
            tokens.clear();
            tokenizer.encode_into(&chunk.text, &mut tokens)?;
            debug!("Chunk at offset {} -> {} tokens", chunk.offset, tokens.len());

            sink.append(&tokens)?;
            stats.chunks += 1;
            stats.tokens += tokens.len() as u64;
        }
    }

    stats.bytes_read = reader.bytes_read();
    info!(
        "Encoded {} bytes in {} chunks into {} tokens ({:.3} bytes/token)",
        stats.bytes_read,
        stats.chunks,
        stats.tokens,
        stats.bytes_per_token()
    );
    Ok(stats)
}

/// Sequential boundary pass, parallel encode, in-order append.
fn encode_batches<R, S>(
    reader: &mut ChunkedCorpusReader<R>,
    tokenizer: &Tokenizer,
    batch_chunks: usize,
    sink: &mut S,
    stats: &mut EncodeStats,
) -> Result<(), TokenizerError>
where
    R: Read,
    S: TokenSink + ?Sized,
{
    loop {
        let batch = reader
            .by_ref()
            .take(batch_chunks)
            .collect::<Result<Vec<_>, _>>()?;
        if batch.is_empty() {
            return Ok(());
        }

        let encoded = batch
            .par_iter()
            .map(|chunk| tokenizer.encode(&chunk.text))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            "Batch of {} chunks starting at offset {}",
            batch.len(),
            batch[0].offset
        );

        for tokens in &encoded {
            sink.append(tokens)?;
            stats.tokens += tokens.len() as u64;
        }
        stats.chunks += batch.len() as u64;
    }
}

/// Encode the file at `input` into an `.npy` array at `output`.
///
/// A `.gz` input is decompressed on the fly; offsets in
/// [`TokenizerError::CorpusRead`] then count decompressed bytes.
///
/// Ids are streamed to `<output>.partial`, which is renamed to `output` only
/// after the array header has been finalized. On failure the partial file is
/// removed and `output` is left untouched.
pub fn encode_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    tokenizer: &Tokenizer,
    config: &EncodeConfig,
) -> Result<EncodeStats, TokenizerError> {
    let input = input.as_ref();
    let output = output.as_ref();
    info!("Encoding {} -> {}", input.display(), output.display());

    let file =
        File::open(input).map_err(|source| TokenizerError::CorpusRead { offset: 0, source })?;
    let partial = partial_path(output);

    let result = if is_gzipped(input) {
        debug!("Decompressing {} as gzip", input.display());
        write_partial(BufReader::new(MultiGzDecoder::new(file)), &partial, tokenizer, config)
    } else {
        write_partial(file, &partial, tokenizer, config)
    }
    .and_then(|stats| {
        fs::rename(&partial, output)?;
        Ok(stats)
    });

    if result.is_err() {
        // Best effort; the original error is what matters
        let _ = fs::remove_file(&partial);
    }
    result
}

fn is_gzipped(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

fn write_partial<R: Read>(
    source: R,
    partial: &Path,
    tokenizer: &Tokenizer,
    config: &EncodeConfig,
) -> Result<EncodeStats, TokenizerError> {
    let mut writer = FileTokenWriter::create(partial)?;
    let stats = encode_corpus_into(source, tokenizer, config, &mut writer)?;
    let file = writer.finalize()?;
    file.get_ref().sync_all()?;
    Ok(stats)
}

/// `<output>.partial` next to the final output.
pub fn partial_path(output: &Path) -> PathBuf {
    let mut name: OsString = output.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}
