//! Integration tests for corpus encoding.
//!
//! These tests drive the public entry points the way a data preparation job
//! does: load definition files, encode a corpus, and read the array back.

use std::fs;
use std::path::Path;

use bpepack::core::{
    byte_level_encode, MergeRuleSet, TokenTextEncoding, VocabError, VocabularyTable,
};
use bpepack::{
    encode_corpus, encode_file, load_vocabulary_and_merges, EncodeConfig, OutputArray, Tokenizer,
    TokenizerError, GPT2_PATTERN,
};

const SEP: u32 = 256;
const TH: u32 = 300;

/// 256 byte tokens, `<sep>` at 256, filler tokens up to 299, and "Th" at 300.
fn scenario_tokenizer() -> Tokenizer {
    let mut entries: Vec<(u32, Vec<u8>)> = (0u32..256).map(|b| (b, vec![b as u8])).collect();
    entries.push((SEP, b"<sep>".to_vec()));
    for id in 257..TH {
        entries.push((id, format!("filler{id}").into_bytes()));
    }
    entries.push((TH, b"Th".to_vec()));

    let vocab = VocabularyTable::from_entries(entries).unwrap();
    let merges = MergeRuleSet::from_ids(&vocab, &[(b'T' as u32, b'h' as u32, TH)]).unwrap();
    Tokenizer::new(vocab, merges, &["<sep>"], GPT2_PATTERN, 256).unwrap()
}

fn config_with_chunk_size(chunk_size: usize) -> EncodeConfig {
    EncodeConfig {
        chunk_size,
        special_tokens: vec!["<sep>".to_string()],
        ..EncodeConfig::default()
    }
}

/// Test the single-pretoken merge.
#[test]
fn test_scenario_single_merge() {
    let tokenizer = scenario_tokenizer();
    assert_eq!(tokenizer.encode("Th").unwrap(), vec![TH]);
}

/// Test that every chunk size yields the same ids around a separator.
#[test]
fn test_scenario_chunk_size_is_not_observable() {
    let tokenizer = scenario_tokenizer();
    let corpus = "Th<sep>Th";

    for chunk_size in 1..=corpus.len() {
        let array =
            encode_corpus(corpus.as_bytes(), &tokenizer, &config_with_chunk_size(chunk_size))
                .unwrap();
        assert_eq!(
            array.to_u32(),
            vec![TH, SEP, TH],
            "chunk_size={chunk_size}"
        );
    }
}

/// Test that encoding is deterministic across calls and across fresh tokenizers.
#[test]
fn test_encoding_is_deterministic() {
    let corpus = "The Thing<sep>Th Th Th\n<sep>Thy".repeat(20);
    let first = encode_corpus(corpus.as_bytes(), &scenario_tokenizer(), &config_with_chunk_size(7))
        .unwrap();

    let tokenizer = scenario_tokenizer();
    for _ in 0..3 {
        let again = encode_corpus(corpus.as_bytes(), &tokenizer, &config_with_chunk_size(7))
            .unwrap();
        assert_eq!(again, first);
    }
}

/// Test merge priority through the public API: rank 0 wins over rank 1.
#[test]
fn test_merge_priority() {
    let mut entries: Vec<(u32, Vec<u8>)> = (0u32..256).map(|b| (b, vec![b as u8])).collect();
    entries.push((256, b"AB".to_vec()));
    entries.push((257, b"BC".to_vec()));
    let vocab = VocabularyTable::from_entries(entries).unwrap();

    let merges = MergeRuleSet::from_byte_pairs(
        &vocab,
        vec![(b"A".to_vec(), b"B".to_vec()), (b"B".to_vec(), b"C".to_vec())],
    )
    .unwrap();
    let tokenizer = Tokenizer::new(vocab, merges, &[] as &[&str], GPT2_PATTERN, 0).unwrap();

    assert_eq!(tokenizer.encode("ABC").unwrap(), vec![256, b'C' as u32]);
}

/// Test that text without mergeable pairs encodes one token per byte.
#[test]
fn test_unmergeable_text_is_one_token_per_byte() {
    let tokenizer = scenario_tokenizer();
    let text = "xyz héllo, wörld! 42";
    let expected: Vec<u32> = text.bytes().map(u32::from).collect();
    assert_eq!(tokenizer.encode(text).unwrap(), expected);
}

fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn vocab_json(extra: &[&str], encode: fn(&[u8]) -> String) -> String {
    let mut entries: Vec<String> = (0u8..=255)
        .map(|b| format!("\"{b}\": {}", serde_json::to_string(&encode(&[b])).unwrap()))
        .collect();
    for (i, token) in extra.iter().enumerate() {
        entries.push(format!(
            "\"{}\": {}",
            256 + i,
            serde_json::to_string(&encode(token.as_bytes())).unwrap()
        ));
    }
    format!("{{{}}}", entries.join(", "))
}

/// Test the full file workflow: JSON definitions in, `.npy` array out.
#[test]
fn test_encode_file_from_json_definitions() {
    let dir = tempfile::tempdir().unwrap();
    // Byte tokens 128..=255 are not valid UTF-8 on their own, so list them as byte arrays
    let mut vocab: Vec<String> = (0u32..256).map(|b| format!("\"{b}\": [{b}]")).collect();
    vocab.push("\"256\": \"<|endoftext|>\"".to_string());
    vocab.push("\"257\": \"th\"".to_string());
    vocab.push("\"258\": \" th\"".to_string());
    vocab.push("\"259\": \" the\"".to_string());
    let vocab_path = write(dir.path(), "vocab.json", &format!("{{{}}}", vocab.join(", ")));
    let merges_path = write(
        dir.path(),
        "merges.json",
        r#"[["t", "h"], [" ", "th"], [" th", "e"]]"#,
    );
    let corpus = "in the end<|endoftext|>the other".repeat(100);
    let input = write(dir.path(), "corpus.txt", &corpus);
    let output = dir.path().join("corpus.npy");

    let config = EncodeConfig {
        chunk_size: 64,
        ..EncodeConfig::default()
    };
    let tokenizer = Tokenizer::from_files(&vocab_path, &merges_path, &config).unwrap();
    let stats = encode_file(&input, &output, &tokenizer, &config).unwrap();

    let array = OutputArray::load(&output).unwrap();
    assert_eq!(array.len() as u64, stats.tokens);
    assert_eq!(stats.bytes_read, corpus.len() as u64);
    assert_eq!(array.to_u32(), tokenizer.encode(&corpus).unwrap());
    assert_eq!(tokenizer.decode(&array.to_u32()).unwrap(), corpus);
    assert!(array.to_u32().contains(&259));
}

/// Test GPT-2 style byte-level definition files (`vocab.json` + `merges.txt`).
#[test]
fn test_byte_level_definitions() {
    let dir = tempfile::tempdir().unwrap();
    let vocab_path = write(
        dir.path(),
        "vocab.json",
        &vocab_json(&["<|endoftext|>", " t", " th", " the"], byte_level_encode),
    );
    let merges_txt = format!(
        "#version: 0.2\n{} t\n{} h\n{} e\n",
        byte_level_encode(b" "),
        byte_level_encode(b" t"),
        byte_level_encode(b" th")
    );
    let merges_path = write(dir.path(), "merges.txt", &merges_txt);

    let config = EncodeConfig {
        text_encoding: TokenTextEncoding::ByteLevel,
        ..EncodeConfig::default()
    };
    let tokenizer = Tokenizer::from_files(&vocab_path, &merges_path, &config).unwrap();

    // "<|endoftext|>" was written byte-level encoded, which leaves ASCII unchanged
    assert_eq!(
        tokenizer.encode("a the<|endoftext|>").unwrap(),
        vec![b'a' as u32, 259, 256]
    );
    assert_eq!(tokenizer.decode(&[259]).unwrap(), " the");
}

/// Test that token strings are read according to the configured text encoding.
#[test]
fn test_vocab_json_text_tokens_follow_encoding() {
    let dir = tempfile::tempdir().unwrap();
    let vocab_path = write(dir.path(), "vocab.json", &vocab_json(&[], byte_level_encode));
    let merges_path = write(dir.path(), "merges.json", "[]");

    // Read as plain UTF-8, "\u{100}" is two bytes, so byte 0 has no token
    let result = load_vocabulary_and_merges(&vocab_path, &merges_path, TokenTextEncoding::Utf8);
    assert!(matches!(
        result,
        Err(TokenizerError::MalformedVocabulary(VocabError::MissingByteToken(0)))
    ));

    let (vocab, _) =
        load_vocabulary_and_merges(&vocab_path, &merges_path, TokenTextEncoding::ByteLevel)
            .unwrap();
    assert_eq!(vocab.id_of(&[0]), Some(0));
    assert_eq!(vocab.id_of(b" "), Some(32));
}

/// Test that a vocabulary of 65,537 ids is rejected before any encoding.
#[test]
fn test_oversized_tiktoken_vocabulary_is_rejected() {
    use base64::{engine::general_purpose::STANDARD, Engine};

    let dir = tempfile::tempdir().unwrap();
    let mut lines = String::new();
    for b in 0u32..256 {
        lines.push_str(&format!("{} {b}\n", STANDARD.encode([b as u8])));
    }
    for id in 256u32..65_537 {
        lines.push_str(&format!("{} {id}\n", STANDARD.encode(format!("tok{id}"))));
    }
    let vocab_path = write(dir.path(), "big.tiktoken", &lines);
    let merges_path = write(dir.path(), "merges.json", "[]");

    let result = load_vocabulary_and_merges(&vocab_path, &merges_path, TokenTextEncoding::Utf8);
    assert!(matches!(
        result,
        Err(TokenizerError::MalformedVocabulary(VocabError::TooLarge { size: 65_537 }))
    ));
}

/// Test the lossless trainer artifacts: pickled vocabulary and merges, gzipped corpus.
#[test]
fn test_pickle_definitions_and_gzip_corpus() {
    use serde_pickle::{HashableValue, SerOptions, Value};
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let extra: [&[u8]; 4] = [b"<|endoftext|>", b"\xe4\xb8", b"\xe4\xb8\x96", b"Th"];
    let vocab = (0u8..=255)
        .map(|b| vec![b])
        .chain(extra.iter().map(|t| t.to_vec()))
        .enumerate()
        .map(|(id, bytes)| (HashableValue::I64(id as i64), Value::Bytes(bytes)))
        .collect();
    let vocab_path = dir.path().join("vocab.pkl");
    fs::write(&vocab_path, serde_pickle::value_to_vec(&Value::Dict(vocab), SerOptions::new()).unwrap())
        .unwrap();

    let pair = |l: &[u8], r: &[u8]| Value::Tuple(vec![Value::Bytes(l.to_vec()), Value::Bytes(r.to_vec())]);
    let merges = Value::List(vec![
        pair(b"\xe4", b"\xb8"),
        pair(b"\xe4\xb8", b"\x96"),
        pair(b"T", b"h"),
    ]);
    let merges_path = dir.path().join("merges.pkl");
    fs::write(&merges_path, serde_pickle::value_to_vec(&merges, SerOptions::new()).unwrap())
        .unwrap();

    let corpus = "Th 世界<|endoftext|>Th".repeat(50);
    let input = dir.path().join("corpus.txt.gz");
    let mut gz = flate2::write::GzEncoder::new(
        fs::File::create(&input).unwrap(),
        flate2::Compression::default(),
    );
    gz.write_all(corpus.as_bytes()).unwrap();
    gz.finish().unwrap();
    let output = dir.path().join("corpus.npy");

    let config = EncodeConfig {
        chunk_size: 16,
        ..EncodeConfig::default()
    };
    let tokenizer = Tokenizer::from_files(&vocab_path, &merges_path, &config).unwrap();
    let stats = encode_file(&input, &output, &tokenizer, &config).unwrap();

    let ids = OutputArray::load(&output).unwrap().to_u32();
    assert_eq!(stats.bytes_read, corpus.len() as u64);
    assert_eq!(ids, tokenizer.encode(&corpus).unwrap());
    assert_eq!(&ids[..3], &[259, b' ' as u32, 258]);
    assert_eq!(tokenizer.decode(&ids).unwrap(), corpus);
}
