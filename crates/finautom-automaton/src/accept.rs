//! Sequential acceptance: plain depth-first recursion over the transition
//! graph.

use crate::graph::{StateId, TransitionGraph};

/// Decide whether the automaton accepts `word`, exploring branches
/// depth-first in one process.
///
/// At the end of the word, acceptance is membership in the accepting set.
/// Before that, a universal state accepts iff every successor on the
/// current letter accepts the rest of the word (vacuously true with no
/// successors), and an existential state iff some successor does (vacuously
/// false). Characters outside the alphabet simply have no successors.
pub fn accepts_sync(graph: &TransitionGraph, word: &str) -> bool {
    let letters = letter_indices(graph, word);
    accepts_from(graph, &letters, graph.initial_state(), 0)
}

/// Map each character of the word to its letter index, or `None` for
/// characters the automaton's alphabet does not cover.
pub(crate) fn letter_indices(graph: &TransitionGraph, word: &str) -> Vec<Option<usize>> {
    word.chars()
        .map(|c| TransitionGraph::letter_index(c).filter(|&index| index < graph.alphabet_size()))
        .collect()
}

fn accepts_from(
    graph: &TransitionGraph,
    letters: &[Option<usize>],
    state: StateId,
    pos: usize,
) -> bool {
    if pos == letters.len() {
        return graph.is_accepting(state);
    }
    let successors = match letters[pos] {
        Some(letter) => graph.successors(state, letter),
        None => &[],
    };
    if graph.is_universal(state) {
        successors.iter().all(|&next| accepts_from(graph, letters, next, pos + 1))
    } else {
        successors.iter().any(|&next| accepts_from(graph, letters, next, pos + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(text: &str) -> TransitionGraph {
        TransitionGraph::from_text(text).unwrap()
    }

    #[test]
    fn single_accepting_state_accepts_everything() {
        // one existential state, accepting, no transitions
        let g = graph("3 1 1 1 1\n0\n0\n");
        for word in ["", "a", "aaaa"] {
            assert!(accepts_sync(&g, word), "word {word:?}");
        }
    }

    #[test]
    fn existential_state_needs_one_good_branch() {
        let g = graph("4 1 2 0 1\n0\n1\n0 a 0 1\n");
        assert!(accepts_sync(&g, "aaa"));
        assert!(accepts_sync(&g, "a"));
        assert!(!accepts_sync(&g, ""));
    }

    #[test]
    fn universal_state_with_no_successors_accepts() {
        let g = graph("3 1 2 2 0\n0\n\n");
        assert!(accepts_sync(&g, "a"));
        // at the end of the word only the accepting set matters
        assert!(!accepts_sync(&g, ""));
    }

    #[test]
    fn universal_state_needs_every_branch() {
        let both_accepting = graph("4 1 2 2 2\n0\n0 1\n0 a 0 1\n");
        assert!(accepts_sync(&both_accepting, "a"));

        let one_rejecting = graph("4 1 2 2 1\n0\n0\n0 a 0 1\n");
        assert!(!accepts_sync(&one_rejecting, "a"));
    }

    #[test]
    fn existential_state_with_no_successors_rejects() {
        let g = graph("3 1 2 0 2\n0\n0 1\n");
        assert!(!accepts_sync(&g, "a"));
        assert!(accepts_sync(&g, ""));
    }

    #[test]
    fn out_of_alphabet_characters_behave_as_dead_letters() {
        let g = graph("4 1 2 0 1\n0\n1\n0 a 0 1\n");
        assert!(!accepts_sync(&g, "b"));
        assert!(!accepts_sync(&g, "a!a"));

        let all_universal = graph("3 1 1 1 0\n0\n\n");
        assert!(accepts_sync(&all_universal, "zzz"));
    }

    #[test]
    fn an_accepting_prefix_cannot_be_spoiled_by_later_branches() {
        // existential: successors [1, 0]; branch 1 accepts immediately, the
        // trailing branch loops into a rejecting subtree
        let with_trap = graph("5 1 3 0 1\n0\n1\n0 a 1 2\n2 a 2\n");
        let without_trap = graph("4 1 3 0 1\n0\n1\n0 a 1\n");
        for word in ["a", "aa", "aaa"] {
            assert_eq!(accepts_sync(&with_trap, word), accepts_sync(&without_trap, word));
        }
    }

    #[test]
    fn a_rejecting_prefix_decides_a_universal_state() {
        // universal: first successor leads to a rejecting dead end; whatever
        // follows cannot rescue the word
        let g = graph("5 1 3 1 1\n0\n2\n0 a 1 2\n2 a 2\n");
        assert!(!accepts_sync(&g, "aa"));
    }

    #[test]
    fn duplicate_successors_do_not_change_the_verdict() {
        let plain = graph("4 1 2 0 1\n0\n1\n0 a 0 1\n");
        let duplicated = graph("4 1 2 0 1\n0\n1\n0 a 0 0 1 1\n");
        for word in ["", "a", "aa", "aaa"] {
            assert_eq!(accepts_sync(&plain, word), accepts_sync(&duplicated, word));
        }
    }
}
