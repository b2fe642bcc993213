//! Special tokens: atomic byte strings that are never merged or split.

use aho_corasick::{AhoCorasick, MatchKind};

use super::tokenizer::TokenizerError;
use super::vocab::{VocabError, VocabularyTable};

/// One special-token occurrence in a haystack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialMatch {
    pub start: usize,
    pub end: usize,
    pub id: u32,
}

/// The registered special tokens and a matcher over them.
///
/// Overlapping tokens resolve leftmost-longest, so with `<|end|>` and
/// `<|end|><|end|>` both registered the longer one wins where it occurs.
/// Cloning is cheap; the automaton is reference counted.
#[derive(Debug, Clone, Default)]
pub struct SpecialTokenSet {
    tokens: Vec<(String, u32)>,
    matcher: Option<AhoCorasick>,
    max_len: usize,
}

impl SpecialTokenSet {
    /// Resolve each special token string to its existing vocabulary id.
    pub fn new<S: AsRef<str>>(
        vocab: &VocabularyTable,
        special_tokens: &[S],
    ) -> Result<Self, TokenizerError> {
        let mut tokens: Vec<(String, u32)> = Vec::with_capacity(special_tokens.len());
        for token in special_tokens {
            let token = token.as_ref();
            if tokens.iter().any(|(existing, _)| existing == token) {
                continue;
            }
            let id = vocab
                .id_of(token.as_bytes())
                .ok_or_else(|| VocabError::UnknownSpecialToken(token.to_string()))?;
            tokens.push((token.to_string(), id));
        }

        let matcher = if tokens.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::builder()
                    .match_kind(MatchKind::LeftmostLongest)
                    .build(tokens.iter().map(|(token, _)| token.as_str()))?,
            )
        };
        let max_len = tokens.iter().map(|(token, _)| token.len()).max().unwrap_or(0);

        Ok(Self {
            tokens,
            matcher,
            max_len,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Byte length of the longest special token.
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn id_of(&self, token: &str) -> Option<u32> {
        self.tokens
            .iter()
            .find(|(existing, _)| existing == token)
            .map(|&(_, id)| id)
    }

    pub fn contains_id(&self, id: u32) -> bool {
        self.tokens.iter().any(|&(_, existing)| existing == id)
    }

    /// Non-overlapping occurrences in `haystack`, left to right.
    pub fn find_iter<'a>(&'a self, haystack: &'a [u8]) -> impl Iterator<Item = SpecialMatch> + 'a {
        self.matcher
            .iter()
            .flat_map(move |matcher| matcher.find_iter(haystack))
            .map(|m| SpecialMatch {
                start: m.start(),
                end: m.end(),
                id: self.tokens[m.pattern().as_usize()].1,
            })
    }

    /// End offset of the last occurrence whose match decision is final.
    ///
    /// A leftmost-longest match starting at `s` only depends on
    /// `haystack[s..s + max_len]`, so an occurrence is final once that window
    /// lies inside `haystack` or `at_eof` is set. Splitting after a final
    /// occurrence yields the same segmentation as scanning the whole stream.
    pub fn last_boundary(&self, haystack: &[u8], at_eof: bool) -> Option<usize> {
        self.last_boundary_from(haystack, 0, at_eof)
    }

    /// [`last_boundary`](Self::last_boundary), scanning only `haystack[from..]`.
    ///
    /// Callers must know that no occurrence starts before `from`. That holds
    /// for `from = prev_len - max_len` when `haystack[..prev_len]` had no
    /// final occurrence.
    pub fn last_boundary_from(&self, haystack: &[u8], from: usize, at_eof: bool) -> Option<usize> {
        let from = from.min(haystack.len());
        let limit = haystack.len() - from;
        self.find_iter(&haystack[from..])
            .filter(|m| at_eof || m.start + self.max_len <= limit)
            .last()
            .map(|m| from + m.end)
    }
}
