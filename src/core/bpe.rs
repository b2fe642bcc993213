//! Rank-ordered byte-pair merging for a single pretoken.
//!
//! The pretoken starts as one base token per byte. Each round scans every
//! adjacent pair, picks the pair with the lowest merge rank, and replaces all
//! non-overlapping occurrences of exactly that pair in one left-to-right pass.
//! Ranks are then re-evaluated on the shorter sequence. Encoding stops when no
//! adjacent pair has a rule.

use super::merges::{MergeRule, MergeRuleSet};
use super::vocab::VocabularyTable;

/// Encode one pretoken's bytes into token ids.
pub fn byte_pair_encode(piece: &[u8], vocab: &VocabularyTable, merges: &MergeRuleSet) -> Vec<u32> {
    let mut tokens: Vec<u32> = piece.iter().map(|&b| vocab.byte_token(b)).collect();

    while tokens.len() > 1 {
        let Some((left, right, rule)) = lowest_ranked_pair(&tokens, merges) else {
            break;
        };
        merge_all(&mut tokens, left, right, rule.merged);
    }

    tokens
}

/// Adjacent pair with the lowest rank. Ranks are unique, so there are no ties.
#[inline]
fn lowest_ranked_pair(tokens: &[u32], merges: &MergeRuleSet) -> Option<(u32, u32, MergeRule)> {
    tokens
        .windows(2)
        .filter_map(|w| merges.rank_of(w[0], w[1]).map(|rule| (w[0], w[1], rule)))
        .min_by_key(|&(_, _, rule)| rule.rank)
}

/// Replace every non-overlapping `left right` with `merged`, left to right, in place.
fn merge_all(tokens: &mut Vec<u32>, left: u32, right: u32, merged: u32) {
    let len = tokens.len();
    let mut read = 0;
    let mut write = 0;

    while read < len {
        if read + 1 < len && tokens[read] == left && tokens[read + 1] == right {
            tokens[write] = merged;
            read += 2;
        } else {
            tokens[write] = tokens[read];
            read += 1;
        }
        write += 1;
    }

    tokens.truncate(write);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vocab::tests::byte_vocab_with;

    fn ids(s: &[u8]) -> Vec<u32> {
        s.iter().map(|&b| b as u32).collect()
    }

    #[test]
    fn test_no_rules_yields_one_token_per_byte() {
        let vocab = byte_vocab_with(&[]);
        let merges = MergeRuleSet::default();
        let piece = "héllo\0".as_bytes();
        assert_eq!(byte_pair_encode(piece, &vocab, &merges), ids(piece));
    }

    #[test]
    fn test_empty_piece() {
        let vocab = byte_vocab_with(&[]);
        assert!(byte_pair_encode(b"", &vocab, &MergeRuleSet::default()).is_empty());
    }

    #[test]
    fn test_lower_rank_wins() {
        // (a,b)->X rank0, (b,c)->Y rank1 on "abc" gives [X, c]
        let vocab = byte_vocab_with(&[b"ab", b"bc"]);
        let merges = MergeRuleSet::from_ids(&vocab, &[(97, 98, 256), (98, 99, 257)]).unwrap();
        assert_eq!(byte_pair_encode(b"abc", &vocab, &merges), vec![256, 99]);

        // Swapping the ranks swaps the outcome
        let merges = MergeRuleSet::from_ids(&vocab, &[(98, 99, 257), (97, 98, 256)]).unwrap();
        assert_eq!(byte_pair_encode(b"abc", &vocab, &merges), vec![97, 257]);
    }

    #[test]
    fn test_rank_beats_position() {
        // The later pair in the text has the better rank
        let vocab = byte_vocab_with(&[b"ab", b"cd"]);
        let merges = MergeRuleSet::from_ids(&vocab, &[(99, 100, 257), (97, 98, 256)]).unwrap();
        assert_eq!(byte_pair_encode(b"abcd", &vocab, &merges), vec![256, 257]);
    }

    #[test]
    fn test_all_occurrences_merge_in_one_pass() {
        let vocab = byte_vocab_with(&[b"aa"]);
        let merges = MergeRuleSet::from_ids(&vocab, &[(97, 97, 256)]).unwrap();
        // left-to-right, non-overlapping: "aaa" -> [aa, a]
        assert_eq!(byte_pair_encode(b"aaa", &vocab, &merges), vec![256, 97]);
        assert_eq!(byte_pair_encode(b"aaaa", &vocab, &merges), vec![256, 256]);
    }

    #[test]
    fn test_chained_merges() {
        let vocab = byte_vocab_with(&[b"aa", b"aaaa"]);
        let merges =
            MergeRuleSet::from_ids(&vocab, &[(97, 97, 256), (256, 256, 257)]).unwrap();
        assert_eq!(byte_pair_encode(b"aaaaa", &vocab, &merges), vec![257, 97]);
    }

    #[test]
    fn test_merge_all_in_place() {
        let mut tokens = vec![1, 2, 1, 2, 2, 1];
        merge_all(&mut tokens, 1, 2, 9);
        assert_eq!(tokens, vec![9, 9, 2, 1]);
    }
}
