use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io;
use std::path::Path;

use petgraph::dot::Dot;
use petgraph::graph::{Graph, NodeIndex};
use petgraph::visit::Bfs;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::registry::StateId;
use super::Action;
use crate::error::{MdpError, Result};

/// Structured key of the relation: a state and the action applied in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateAction {
    pub state: StateId,
    pub action: Action,
}

impl StateAction {
    pub fn new(state: StateId, action: Action) -> StateAction {
        StateAction { state, action }
    }
}

/// For every (state, action) the set of next states that have been observed. A missing edge
/// means the outcome was never seen, not that it is impossible.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionRelation {
    edges: BTreeMap<StateAction, BTreeSet<StateId>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TransitionRow {
    state: StateId,
    action: usize,
    transitions: String,
}

const HEADER: [&str; 3] = ["state", "action", "transitions"];
const LEGACY_HEADER: [&str; 2] = ["state-action", "transitions"];

impl TransitionRelation {
    pub fn new() -> TransitionRelation {
        TransitionRelation::default()
    }

    /// Adds `next` to the outcome set of (`state`, `action`). Returns false if it was known.
    pub fn record(&mut self, state: StateId, action: Action, next: StateId) -> bool {
        let inserted = self
            .edges
            .entry(StateAction::new(state, action))
            .or_insert_with(BTreeSet::new)
            .insert(next);
        if inserted {
            debug!(state, %action, next, "recorded transition");
        }
        inserted
    }

    pub fn outcomes(&self, state: StateId, action: Action) -> Option<&BTreeSet<StateId>> {
        self.edges.get(&StateAction::new(state, action))
    }

    pub fn keys(&self) -> impl Iterator<Item = &StateAction> {
        self.edges.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StateAction, &BTreeSet<StateId>)> {
        self.edges.iter()
    }

    /// Number of (state, action) pairs with at least one outcome.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(|x| x.len()).sum()
    }

    /// Largest state id mentioned either as source or as outcome.
    pub fn max_state_id(&self) -> Option<StateId> {
        self.edges
            .iter()
            .flat_map(|(k, v)| std::iter::once(k.state).chain(v.iter().copied()))
            .max()
    }

    /// Support graph with one node per state id in `0..n_states` (extended to cover every id
    /// the relation mentions) and one edge per observed outcome, weighted by the action.
    pub fn to_graph(&self, n_states: usize) -> Graph<StateId, Action> {
        let n = self
            .max_state_id()
            .map_or(n_states, |m| n_states.max(m + 1));
        let mut g: Graph<StateId, Action> = Graph::with_capacity(n, self.edge_count());
        for s in 0..n {
            g.add_node(s);
        }
        for (key, outcomes) in self.edges.iter() {
            for next in outcomes.iter() {
                g.add_edge(NodeIndex::new(key.state), NodeIndex::new(*next), key.action);
            }
        }
        g
    }

    pub fn to_dot(&self, n_states: usize) -> String {
        let g = self.to_graph(n_states);
        format!("{}", Dot::new(&g))
    }

    /// Every state reachable from `starts` under any sequence of observed transitions,
    /// including the starts themselves.
    pub fn reachable_from(&self, starts: &BTreeSet<StateId>) -> BTreeSet<StateId> {
        let n = self.max_state_id().map_or(0, |m| m + 1);
        let g = self.to_graph(n);
        let mut reached: BTreeSet<StateId> = BTreeSet::new();
        for s in starts.iter() {
            if *s >= g.node_count() {
                reached.insert(*s);
                continue;
            }
            let mut bfs = Bfs::new(&g, NodeIndex::new(*s));
            while let Some(nx) = bfs.next(&g) {
                reached.insert(g[nx]);
            }
        }
        reached
    }

    /// Writes the transition table with one row per (state, action) and the outcome set as
    /// an integer list literal.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        wtr.write_record(&HEADER)?;
        for (key, outcomes) in self.edges.iter() {
            let list: Vec<StateId> = outcomes.iter().copied().collect();
            wtr.serialize(TransitionRow {
                state: key.state,
                action: key.action.index(),
                transitions: serde_json::to_string(&list)?,
            })?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Reads a transition table. Both the `state,action,transitions` layout and the older
    /// `state-action,transitions` layout with `"<s>-<a>"` keys and `{..}` set literals are
    /// accepted. Cells are parsed with a strict grammar and never evaluated.
    pub fn read_csv<R: io::Read>(reader: R) -> Result<TransitionRelation> {
        let mut rdr = csv::Reader::from_reader(reader);
        let headers = rdr.headers()?.clone();
        let columns: Vec<&str> = headers.iter().map(|h| h.trim()).collect();
        let mut relation = TransitionRelation::new();

        if columns == HEADER {
            for row in rdr.deserialize() {
                let row: TransitionRow = row?;
                let action = Action::from_index(row.action)?;
                relation.insert_outcomes(row.state, action, parse_transition_set(&row.transitions)?);
            }
        } else if columns == LEGACY_HEADER {
            let key_re = legacy_key_regex();
            let set_re = legacy_set_regex();
            for record in rdr.records() {
                let record = record?;
                let (state, action) = parse_legacy_key(&key_re, record.get(0).unwrap_or(""))?;
                let outcomes = match_legacy_set(&set_re, record.get(1).unwrap_or(""))?;
                relation.insert_outcomes(state, action, outcomes);
            }
        } else {
            return Err(MdpError::InvalidTable {
                table: "transition".to_string(),
                reason: format!("unexpected columns {:?}", columns),
            });
        }
        Ok(relation)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        self.write_csv(file)?;
        info!(
            path = %path.as_ref().display(),
            pairs = self.len(),
            edges = self.edge_count(),
            "saved transition table"
        );
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<TransitionRelation> {
        let file = File::open(path)?;
        TransitionRelation::read_csv(file)
    }

    fn insert_outcomes(&mut self, state: StateId, action: Action, outcomes: BTreeSet<StateId>) {
        if outcomes.is_empty() {
            return;
        }
        self.edges
            .entry(StateAction::new(state, action))
            .or_insert_with(BTreeSet::new)
            .extend(outcomes);
    }
}

/// Parses an integer list literal such as `[2, 3]`.
pub fn parse_transition_set(cell: &str) -> Result<BTreeSet<StateId>> {
    let list: Vec<StateId> = serde_json::from_str(cell.trim())
        .map_err(|_| MdpError::MalformedTransitionSet(cell.to_string()))?;
    Ok(list.into_iter().collect())
}

fn legacy_key_regex() -> Regex {
    Regex::new(r"^\s*(?P<state>[0-9]+)-(?P<action>[0-9]+)\s*$").expect("static key pattern")
}

fn legacy_set_regex() -> Regex {
    Regex::new(r"^\{\s*(?:[0-9]+\s*(?:,\s*[0-9]+\s*)*)?\}$").expect("static set pattern")
}

fn parse_legacy_key(re: &Regex, key: &str) -> Result<(StateId, Action)> {
    let caps = re
        .captures(key)
        .ok_or_else(|| MdpError::MalformedKey(key.to_string()))?;
    let state = caps["state"]
        .parse::<StateId>()
        .map_err(|_| MdpError::MalformedKey(key.to_string()))?;
    let action = caps["action"]
        .parse::<usize>()
        .map_err(|_| MdpError::MalformedKey(key.to_string()))?;
    Ok((state, Action::from_index(action)?))
}

/// Parses a set literal such as `{2, 3}` (or `set()` for the empty set).
pub fn parse_legacy_set(cell: &str) -> Result<BTreeSet<StateId>> {
    match_legacy_set(&legacy_set_regex(), cell)
}

fn match_legacy_set(set_re: &Regex, cell: &str) -> Result<BTreeSet<StateId>> {
    let c = cell.trim();
    if c == "set()" {
        return Ok(BTreeSet::new());
    }
    if !set_re.is_match(c) {
        return Err(MdpError::MalformedTransitionSet(cell.to_string()));
    }
    c[1..c.len() - 1]
        .split(',')
        .map(|x| x.trim())
        .filter(|x| !x.is_empty())
        .map(|x| {
            x.parse::<StateId>()
                .map_err(|_| MdpError::MalformedTransitionSet(cell.to_string()))
        })
        .collect()
}
