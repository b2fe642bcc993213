//! Splitting text into independently encodable pretokens.
//!
//! Special-token occurrences are cut out first and emitted as atomic
//! [`Pretoken::Special`] items. The text between them is segmented with the
//! configured regex (word runs, number runs, punctuation runs, whitespace runs)
//! and each match is a [`Pretoken::Piece`]. Merges never cross a pretoken.

use fancy_regex::Regex;

use super::special::{SpecialMatch, SpecialTokenSet};
use super::tokenizer::TokenizerError;

/// One unit of pretokenized text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pretoken<'t> {
    /// A registered special token, already resolved to its id.
    Special { id: u32, offset: usize },
    /// A regex match to be byte-pair encoded.
    Piece { text: &'t str, offset: usize },
}

impl Pretoken<'_> {
    /// Byte offset of the pretoken within the text it came from.
    pub fn offset(&self) -> usize {
        match *self {
            Pretoken::Special { offset, .. } | Pretoken::Piece { offset, .. } => offset,
        }
    }
}

/// Regex segmentation plus atomic special-token handling.
#[derive(Debug, Clone)]
pub struct Pretokenizer {
    regex: Regex,
    special: SpecialTokenSet,
}

impl Pretokenizer {
    pub fn new(pattern: &str, special: SpecialTokenSet) -> Result<Self, TokenizerError> {
        let regex = Regex::new(pattern)?;
        Ok(Self { regex, special })
    }

    pub fn special_tokens(&self) -> &SpecialTokenSet {
        &self.special
    }

    /// Lazily pretokenize `text`. Call again to restart from the beginning.
    pub fn pretokenize<'a>(&'a self, text: &'a str) -> Pretokens<'a> {
        Pretokens {
            regex: &self.regex,
            text,
            specials: Box::new(self.special.find_iter(text.as_bytes())),
            pending_special: None,
            segment: None,
            segment_offset: 0,
            cursor: 0,
            finished: false,
        }
    }

    /// Pretokenize ignoring special tokens.
    pub fn pretokenize_ordinary<'a>(&'a self, text: &'a str) -> Pretokens<'a> {
        Pretokens {
            regex: &self.regex,
            text,
            specials: Box::new(std::iter::empty()),
            pending_special: None,
            segment: None,
            segment_offset: 0,
            cursor: 0,
            finished: false,
        }
    }
}

/// Iterator over the pretokens of one text.
///
/// Yields an error only if the regex engine gives up on a segment (for
/// example when its backtracking limit is exceeded); iteration ends after it.
pub struct Pretokens<'a> {
    regex: &'a Regex,
    text: &'a str,
    specials: Box<dyn Iterator<Item = SpecialMatch> + 'a>,
    pending_special: Option<SpecialMatch>,
    segment: Option<fancy_regex::Matches<'a, 'a>>,
    segment_offset: usize,
    cursor: usize,
    finished: bool,
}

impl<'a> Iterator for Pretokens<'a> {
    type Item = Result<Pretoken<'a>, TokenizerError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(matches) = self.segment.as_mut() {
                match matches.next() {
                    Some(Ok(m)) => {
                        return Some(Ok(Pretoken::Piece {
                            text: m.as_str(),
                            offset: self.segment_offset + m.start(),
                        }))
                    }
                    Some(Err(e)) => {
                        self.segment = None;
                        self.pending_special = None;
                        self.finished = true;
                        return Some(Err(e.into()));
                    }
                    None => self.segment = None,
                }
            }

            if let Some(special) = self.pending_special.take() {
                self.cursor = special.end;
                return Some(Ok(Pretoken::Special {
                    id: special.id,
                    offset: special.start,
                }));
            }

            if self.finished {
                return None;
            }

            // Next segment runs from the cursor to the next special token or the end
            let segment_end = match self.specials.next() {
                Some(special) => {
                    self.pending_special = Some(special);
                    special.start
                }
                None => {
                    self.finished = true;
                    self.text.len()
                }
            };

            if segment_end > self.cursor {
                let segment = &self.text[self.cursor..segment_end];
                self.segment_offset = self.cursor;
                self.segment = Some(self.regex.find_iter(segment));
            }
            self.cursor = segment_end;
        }
    }
}
