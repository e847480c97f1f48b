//! The transition graph of an alternating finite automaton and its
//! line-oriented text form.
//!
//! The text format, shared with the validator's standard input and with the
//! pipe that ships an automaton into a worker:
//!
//! ```text
//! N A Q U F
//! q0
//! f1 f2 … fF
//! q a r1 r2 … rk
//! …
//! ```
//!
//! `N` is a line-count hint and is ignored. `A` is the alphabet size
//! (letters are lowercase characters encoded as `c - 'a'`), `Q` the state
//! count, `U` the number of universal states (`[0, U)` universal, `[U, Q)`
//! existential), `F` the number of accepting states. Each transition line
//! appends successors to `δ(q, a)` in input order; duplicates are kept.

use finautom_core::limits::{MAX_ALPHABET, MAX_STATES};
use thiserror::Error;

/// States are small dense integers in `[0, Q)`.
pub type StateId = usize;

/// A description whose mandatory first three lines do not describe a valid
/// automaton. Trailing transition lines are never reported here; parsing is
/// total over them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("missing header line")]
    MissingHeader,
    #[error("malformed header line {line:?}")]
    MalformedHeader { line: String },
    #[error("alphabet size {0} out of range")]
    AlphabetOutOfRange(usize),
    #[error("state count {0} out of range")]
    StateCountOutOfRange(usize),
    #[error("universal count {universal} exceeds state count {states}")]
    UniversalOutOfRange { universal: usize, states: usize },
    #[error("missing initial state line")]
    MissingInitialState,
    #[error("malformed initial state line {line:?}")]
    MalformedInitialState { line: String },
    #[error("initial state {initial} out of range for {states} states")]
    InitialOutOfRange { initial: usize, states: usize },
    #[error("missing accepting states line")]
    MissingAcceptingStates,
    #[error("malformed accepting states line {line:?}")]
    MalformedAcceptingStates { line: String },
    #[error("accepting state {state} out of range for {states} states")]
    AcceptingOutOfRange { state: usize, states: usize },
}

/// Read-only transition structure of an alternating finite automaton.
///
/// Built once from text, then only read. Successor lists preserve input
/// order and may contain duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionGraph {
    alphabet_size: usize,
    state_count: usize,
    universal_count: usize,
    initial: StateId,
    accepting: Vec<bool>,
    transitions: Vec<Vec<Vec<StateId>>>,
}

impl TransitionGraph {
    /// The empty graph: no states, no transitions.
    pub fn new() -> Self {
        Self {
            alphabet_size: 0,
            state_count: 0,
            universal_count: 0,
            initial: 0,
            accepting: Vec::new(),
            transitions: Vec::new(),
        }
    }

    pub fn alphabet_size(&self) -> usize {
        self.alphabet_size
    }

    pub fn state_count(&self) -> usize {
        self.state_count
    }

    pub fn universal_count(&self) -> usize {
        self.universal_count
    }

    pub fn initial_state(&self) -> StateId {
        self.initial
    }

    /// Universal states demand that every successor branch accepts;
    /// everything from `universal_count` up is existential.
    pub fn is_universal(&self, state: StateId) -> bool {
        state < self.universal_count
    }

    pub fn is_accepting(&self, state: StateId) -> bool {
        self.accepting.get(state).copied().unwrap_or(false)
    }

    /// Ordered successors of `state` on the letter with the given index;
    /// empty for anything out of range.
    pub fn successors(&self, state: StateId, letter: usize) -> &[StateId] {
        self.transitions
            .get(state)
            .and_then(|row| row.get(letter))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Letter index of a character, if it denotes a letter at all.
    pub fn letter_index(c: char) -> Option<usize> {
        let index = (c as usize).checked_sub('a' as usize)?;
        (index < MAX_ALPHABET).then_some(index)
    }

    fn letter_char(index: usize) -> char {
        (b'a' + index as u8) as char
    }

    /// Parse the line-oriented description.
    ///
    /// The first three lines are mandatory and validated strictly. The
    /// transition lines after them are consumed until the first malformed
    /// or out-of-range one; trailing garbage therefore never fails a load
    /// that already produced a usable graph.
    pub fn from_text(text: &str) -> Result<Self, GraphError> {
        let mut lines = text.lines();

        let header = lines.next().ok_or(GraphError::MissingHeader)?;
        let fields: Vec<usize> = header
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<_, _>>()
            .map_err(|_| GraphError::MalformedHeader { line: header.to_string() })?;
        let &[_hint, alphabet_size, state_count, universal_count, accepting_count] =
            fields.as_slice()
        else {
            return Err(GraphError::MalformedHeader { line: header.to_string() });
        };
        if !(1..=MAX_ALPHABET).contains(&alphabet_size) {
            return Err(GraphError::AlphabetOutOfRange(alphabet_size));
        }
        if !(1..=MAX_STATES).contains(&state_count) {
            return Err(GraphError::StateCountOutOfRange(state_count));
        }
        if universal_count > state_count {
            return Err(GraphError::UniversalOutOfRange { universal: universal_count, states: state_count });
        }

        let initial_line = lines.next().ok_or(GraphError::MissingInitialState)?;
        let initial: StateId = initial_line
            .trim()
            .parse()
            .map_err(|_| GraphError::MalformedInitialState { line: initial_line.to_string() })?;
        if initial >= state_count {
            return Err(GraphError::InitialOutOfRange { initial, states: state_count });
        }

        let accepting_line = match lines.next() {
            Some(line) => line,
            None if accepting_count == 0 => "",
            None => return Err(GraphError::MissingAcceptingStates),
        };
        let mut accepting = vec![false; state_count];
        let mut tokens = accepting_line.split_whitespace();
        for _ in 0..accepting_count {
            let state: StateId = tokens
                .next()
                .ok_or_else(|| GraphError::MalformedAcceptingStates { line: accepting_line.to_string() })?
                .parse()
                .map_err(|_| GraphError::MalformedAcceptingStates { line: accepting_line.to_string() })?;
            if state >= state_count {
                return Err(GraphError::AcceptingOutOfRange { state, states: state_count });
            }
            accepting[state] = true;
        }

        let mut transitions = vec![vec![Vec::new(); alphabet_size]; state_count];
        'lines: for line in lines {
            let mut tokens = line.split_whitespace();
            let Some(state_token) = tokens.next() else {
                continue; // blank lines are allowed between transitions
            };
            let (Some(letter_token), Ok(state)) = (tokens.next(), state_token.parse::<StateId>())
            else {
                break;
            };
            let mut chars = letter_token.chars();
            let (Some(letter), None) = (chars.next(), chars.next()) else {
                break;
            };
            let Some(letter_index) = Self::letter_index(letter) else {
                break;
            };
            if state >= state_count || letter_index >= alphabet_size {
                break;
            }
            for token in tokens {
                let Ok(successor) = token.parse::<StateId>() else {
                    break 'lines;
                };
                if successor >= state_count {
                    break 'lines;
                }
                transitions[state][letter_index].push(successor);
            }
        }

        Ok(Self { alphabet_size, state_count, universal_count, initial, accepting, transitions })
    }

    /// Serialize into the input format; [`from_text`] round-trips.
    ///
    /// [`from_text`]: TransitionGraph::from_text
    pub fn to_text(&self) -> String {
        self.to_text_from(self.initial)
    }

    /// The same text with a substituted initial state. A branch subtask is
    /// shipped to a worker as the original automaton rerooted at the branch
    /// successor.
    pub fn to_text_from(&self, initial: StateId) -> String {
        let accepting: Vec<String> = (0..self.state_count)
            .filter(|&state| self.accepting[state])
            .map(|state| state.to_string())
            .collect();

        let mut body = String::new();
        let mut transition_lines = 0usize;
        for state in 0..self.state_count {
            for letter in 0..self.alphabet_size {
                let successors = &self.transitions[state][letter];
                if successors.is_empty() {
                    continue;
                }
                body.push_str(&format!("{state} {}", Self::letter_char(letter)));
                for successor in successors {
                    body.push_str(&format!(" {successor}"));
                }
                body.push('\n');
                transition_lines += 1;
            }
        }

        let mut text = format!(
            "{} {} {} {} {}\n{initial}\n{}\n",
            3 + transition_lines,
            self.alphabet_size,
            self.state_count,
            self.universal_count,
            accepting.len(),
            accepting.join(" "),
        );
        text.push_str(&body);
        text
    }

    /// Human-readable dump of the transition relation.
    pub fn render(&self) -> String {
        let mut out = String::from("Transition graph: {\n");
        for state in 0..self.state_count {
            for letter in 0..self.alphabet_size {
                let successors = &self.transitions[state][letter];
                if successors.is_empty() {
                    continue;
                }
                out.push_str(&format!("  {state} --[{}]--> {{ ", Self::letter_char(letter)));
                for successor in successors {
                    out.push_str(&format!("{successor} "));
                }
                out.push_str("}\n");
            }
        }
        out.push_str("}\n");
        out
    }
}

impl Default for TransitionGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;

    const EXISTENTIAL: &str = "4 1 2 0 1\n0\n1\n0 a 0 1\n";

    #[test]
    fn loads_the_header_and_partition() {
        let graph = TransitionGraph::from_text(EXISTENTIAL).unwrap();
        assert_eq!(graph.alphabet_size(), 1);
        assert_eq!(graph.state_count(), 2);
        assert_eq!(graph.universal_count(), 0);
        assert_eq!(graph.initial_state(), 0);
        assert!(!graph.is_universal(0));
        assert!(graph.is_accepting(1));
        assert!(!graph.is_accepting(0));
        assert_eq!(graph.successors(0, 0), &[0, 1]);
        assert_eq!(graph.successors(1, 0), &[] as &[StateId]);
    }

    #[test]
    fn successors_keep_input_order_and_duplicates() {
        let graph = TransitionGraph::from_text("4 2 4 2 1\n0\n3\n0 b 2 2 1\n").unwrap();
        assert_eq!(graph.successors(0, 1), &[2, 2, 1]);
        assert!(graph.is_universal(1));
        assert!(!graph.is_universal(2));
    }

    #[test]
    fn letters_are_indexed_from_a() {
        assert_eq!(TransitionGraph::letter_index('a'), Some(0));
        assert_eq!(TransitionGraph::letter_index('z'), Some(25));
        assert_eq!(TransitionGraph::letter_index('A'), None);
        assert_eq!(TransitionGraph::letter_index(' '), None);
    }

    #[test]
    fn out_of_alphabet_letters_have_no_successors() {
        let graph = TransitionGraph::from_text(EXISTENTIAL).unwrap();
        assert_eq!(graph.successors(0, 1), &[] as &[StateId]);
        assert_eq!(graph.successors(5, 0), &[] as &[StateId]);
    }

    #[test]
    fn malformed_trailing_lines_stop_parsing_without_failing() {
        let graph =
            TransitionGraph::from_text("5 1 3 0 1\n0\n2\n0 a 1\nnot a transition\n1 a 2\n").unwrap();
        assert_eq!(graph.successors(0, 0), &[1]);
        // everything after the malformed line is discarded
        assert_eq!(graph.successors(1, 0), &[] as &[StateId]);
    }

    #[test]
    fn out_of_range_successor_stops_parsing() {
        let graph = TransitionGraph::from_text("4 1 2 0 1\n0\n1\n0 a 0 7\n1 a 0\n").unwrap();
        assert_eq!(graph.successors(0, 0), &[0]);
        assert_eq!(graph.successors(1, 0), &[] as &[StateId]);
    }

    #[test]
    fn blank_lines_between_transitions_are_skipped() {
        let graph = TransitionGraph::from_text("5 1 3 0 1\n0\n2\n0 a 1\n\n1 a 2\n").unwrap();
        assert_eq!(graph.successors(0, 0), &[1]);
        assert_eq!(graph.successors(1, 0), &[2]);
    }

    #[test]
    fn header_errors_are_strict() {
        assert_eq!(TransitionGraph::from_text(""), Err(GraphError::MissingHeader));
        assert!(matches!(
            TransitionGraph::from_text("1 2 3\n"),
            Err(GraphError::MalformedHeader { .. })
        ));
        assert_eq!(
            TransitionGraph::from_text("3 0 2 0 0\n0\n\n"),
            Err(GraphError::AlphabetOutOfRange(0))
        );
        assert_eq!(
            TransitionGraph::from_text("3 1 500 0 0\n0\n\n"),
            Err(GraphError::StateCountOutOfRange(500))
        );
        assert_eq!(
            TransitionGraph::from_text("3 1 2 3 0\n0\n\n"),
            Err(GraphError::UniversalOutOfRange { universal: 3, states: 2 })
        );
        assert_eq!(
            TransitionGraph::from_text("3 1 2 0 0\n5\n\n"),
            Err(GraphError::InitialOutOfRange { initial: 5, states: 2 })
        );
        assert_eq!(
            TransitionGraph::from_text("3 1 2 0 1\n0\n9\n"),
            Err(GraphError::AcceptingOutOfRange { state: 9, states: 2 })
        );
        assert!(matches!(
            TransitionGraph::from_text("3 1 2 0 1\n0\n"),
            Err(GraphError::MissingAcceptingStates)
        ));
    }

    #[test]
    fn no_accepting_states_round_trips() {
        let graph = TransitionGraph::from_text("3 1 2 2 0\n0\n\n0 a 1\n").unwrap();
        assert!(!graph.is_accepting(0));
        assert_eq!(TransitionGraph::from_text(&graph.to_text()).unwrap(), graph);
    }

    #[test]
    fn text_round_trip_is_lossless() {
        let graph = TransitionGraph::from_text("6 3 4 2 2\n1\n0 3\n0 a 1 2\n1 c 3 3 0\n2 b 2\n")
            .unwrap();
        let reloaded = TransitionGraph::from_text(&graph.to_text()).unwrap();
        assert_eq!(reloaded, graph);
    }

    #[test]
    fn rerooting_only_moves_the_initial_state() {
        let graph = TransitionGraph::from_text(EXISTENTIAL).unwrap();
        let rerooted = TransitionGraph::from_text(&graph.to_text_from(1)).unwrap();
        assert_eq!(rerooted.initial_state(), 1);
        assert_eq!(rerooted.successors(0, 0), graph.successors(0, 0));
        assert_eq!(rerooted.state_count(), graph.state_count());
    }

    #[test]
    fn render_lists_every_edge() {
        let graph = TransitionGraph::from_text("4 2 2 1 1\n0\n1\n0 b 1 0\n").unwrap();
        let dump = graph.render();
        assert!(dump.starts_with("Transition graph: {\n"));
        assert!(dump.contains("  0 --[b]--> { 1 0 }\n"));
        assert!(dump.ends_with("}\n"));
    }

    pub(crate) fn arb_graph() -> impl Strategy<Value = TransitionGraph> {
        (1usize..=3, 1usize..=5)
            .prop_flat_map(|(alphabet, states)| {
                (
                    Just(alphabet),
                    Just(states),
                    0..=states,
                    0..states,
                    proptest::collection::vec(any::<bool>(), states),
                    proptest::collection::vec(
                        (0..states, 0..alphabet, proptest::collection::vec(0..states, 0..3)),
                        0..8,
                    ),
                )
            })
            .prop_map(|(alphabet, states, universal, initial, accepting, edges)| {
                let accepting_states: Vec<usize> = (0..states).filter(|&q| accepting[q]).collect();
                let mut text = format!(
                    "0 {alphabet} {states} {universal} {}\n{initial}\n{}\n",
                    accepting_states.len(),
                    accepting_states
                        .iter()
                        .map(|q| q.to_string())
                        .collect::<Vec<_>>()
                        .join(" "),
                );
                for (state, letter, successors) in edges {
                    if successors.is_empty() {
                        continue;
                    }
                    text.push_str(&format!(
                        "{state} {}{}\n",
                        TransitionGraph::letter_char(letter),
                        successors.iter().map(|r| format!(" {r}")).collect::<String>(),
                    ));
                }
                TransitionGraph::from_text(&text).unwrap()
            })
    }

    proptest! {
        #[test]
        fn any_graph_round_trips_through_text(graph in arb_graph()) {
            prop_assert_eq!(TransitionGraph::from_text(&graph.to_text()).unwrap(), graph);
        }
    }
}
