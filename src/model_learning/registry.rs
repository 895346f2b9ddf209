use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::Path;

use ndarray::Array2;
use ordered_float::OrderedFloat;
use tracing::{debug, info};

use super::features::FeatureSchema;
use crate::error::{MdpError, Result};

pub type StateId = usize;

type StateKey = Vec<OrderedFloat<f64>>;

/// Append-only table of the discrete states observed so far. Ids are handed out in first-seen
/// order and are never reassigned, so every other structure refers to states by id only.
#[derive(Debug, Clone)]
pub struct StateRegistry {
    schema: FeatureSchema,
    states: Vec<Vec<f64>>,
    index: HashMap<StateKey, StateId>,
}

fn state_key(features: &[f64]) -> StateKey {
    features.iter().map(|&x| OrderedFloat(x)).collect()
}

impl StateRegistry {
    pub fn new(schema: FeatureSchema) -> StateRegistry {
        StateRegistry {
            schema,
            states: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Returns the id of the state matching `features`, registering it first if unseen.
    pub fn add_state(&mut self, features: &[f64]) -> Result<StateId> {
        let canonical = self.schema.canonicalize(features)?;
        let key = state_key(&canonical);
        if let Some(&id) = self.index.get(&key) {
            return Ok(id);
        }
        let id = self.states.len();
        debug!(state = id, features = ?canonical, "registered new state");
        self.states.push(canonical);
        self.index.insert(key, id);
        Ok(id)
    }

    /// Resolves `features` against the registry without inserting.
    pub fn lookup(&self, features: &[f64]) -> Result<StateId> {
        let canonical = self.schema.canonicalize(features)?;
        self.index
            .get(&state_key(&canonical))
            .copied()
            .ok_or_else(|| MdpError::StateNotFound(features.to_vec()))
    }

    pub fn features(&self, id: StateId) -> Result<&[f64]> {
        self.states
            .get(id)
            .map(|f| f.as_slice())
            .ok_or(MdpError::UnknownStateId(id))
    }

    pub fn contains(&self, id: StateId) -> bool {
        id < self.states.len()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn iter(&self) -> impl Iterator<Item = (StateId, &[f64])> {
        self.states.iter().enumerate().map(|(id, f)| (id, f.as_slice()))
    }

    /// Dense state x feature matrix, row `i` holding the features of state `i`.
    pub fn feature_matrix(&self) -> Array2<f64> {
        let mut m = Array2::<f64>::zeros((self.states.len(), self.schema.arity()));
        for (i, features) in self.states.iter().enumerate() {
            for (j, value) in features.iter().enumerate() {
                m[[i, j]] = *value;
            }
        }
        m
    }

    /// Writes the state table: an `id` column followed by one column per feature.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        let mut header = vec!["id".to_string()];
        header.extend(self.schema.names().iter().cloned());
        wtr.write_record(&header)?;
        for (id, features) in self.iter() {
            let mut record = vec![id.to_string()];
            record.extend(features.iter().map(|x| x.to_string()));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Reads a state table written by [`StateRegistry::write_csv`]. Row order must match the
    /// ids, and the feature columns must match `schema` by name and order.
    pub fn read_csv<R: io::Read>(reader: R, schema: FeatureSchema) -> Result<StateRegistry> {
        let mut rdr = csv::Reader::from_reader(reader);
        let headers = rdr.headers()?.clone();
        let columns: Vec<&str> = headers.iter().skip(1).collect();
        let expected: Vec<&str> = schema.names().iter().map(|s| s.as_str()).collect();
        if columns != expected {
            return Err(MdpError::InvalidTable {
                table: "state".to_string(),
                reason: format!("expected feature columns {:?}, found {:?}", expected, columns),
            });
        }

        let mut registry = StateRegistry::new(schema);
        for (row, record) in rdr.records().enumerate() {
            let record = record?;
            let id: StateId = record
                .get(0)
                .and_then(|x| x.trim().parse().ok())
                .ok_or_else(|| MdpError::InvalidTable {
                    table: "state".to_string(),
                    reason: format!("row {} has no integer id", row),
                })?;
            if id != row {
                return Err(MdpError::InvalidTable {
                    table: "state".to_string(),
                    reason: format!("row {} carries id {}", row, id),
                });
            }
            let features = record
                .iter()
                .skip(1)
                .map(parse_feature_cell)
                .collect::<Result<Vec<f64>>>()?;
            let assigned = registry.add_state(&features)?;
            if assigned != id {
                return Err(MdpError::InvalidTable {
                    table: "state".to_string(),
                    reason: format!("state {} duplicates state {}", id, assigned),
                });
            }
        }
        Ok(registry)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        self.write_csv(file)?;
        info!(path = %path.as_ref().display(), states = self.len(), "saved state table");
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P, schema: FeatureSchema) -> Result<StateRegistry> {
        let file = File::open(path)?;
        StateRegistry::read_csv(file, schema)
    }
}

/// Feature cells are numeric, but boolean features have been written as `True`/`False`.
pub(crate) fn parse_feature_cell(cell: &str) -> Result<f64> {
    let c = cell.trim();
    match c.to_ascii_lowercase().as_str() {
        "true" => Ok(1.0),
        "false" => Ok(0.0),
        _ => c.parse::<f64>().map_err(|_| MdpError::InvalidTable {
            table: "feature".to_string(),
            reason: format!("'{}' is not a number", cell),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> StateRegistry {
        StateRegistry::new(FeatureSchema::intersection())
    }

    #[test]
    fn add_state_is_idempotent() {
        let mut r = registry();
        let a = r.add_state(&[1.0, 0.5]).unwrap();
        assert_eq!(r.len(), 1);
        let b = r.add_state(&[1.0, 0.5]).unwrap();
        assert_eq!(a, b);
        assert_eq!(r.len(), 1);
        let c = r.add_state(&[0.0, 0.5]).unwrap();
        assert_eq!(c, 1);
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn ids_follow_first_seen_order() {
        let mut r = registry();
        let seen = [[0.0, 1.0], [0.0, 0.9], [1.0, 0.9], [0.0, 1.0], [0.0, 0.8]];
        let ids: Vec<StateId> = seen.iter().map(|f| r.add_state(f).unwrap()).collect();
        assert_eq!(ids, vec![0, 1, 2, 0, 3]);
    }

    #[test]
    fn observations_within_resolution_share_a_state() {
        let mut r = registry();
        let a = r.add_state(&[0.0, 0.8431]).unwrap();
        let b = r.add_state(&[0.0, 0.8429]).unwrap();
        assert_eq!(a, b);
        assert_eq!(r.features(a).unwrap(), &[0.0, 0.843]);
    }

    #[test]
    fn lookup_reports_missing_state() {
        let mut r = registry();
        r.add_state(&[1.0, 0.5]).unwrap();
        assert_eq!(r.lookup(&[1.0, 0.5]).unwrap(), 0);
        match r.lookup(&[1.0, 0.4]) {
            Err(MdpError::StateNotFound(f)) => assert_eq!(f, vec![1.0, 0.4]),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn state_table_round_trip() {
        let mut r = registry();
        r.add_state(&[0.0, 1.0]).unwrap();
        r.add_state(&[1.0, 0.512]).unwrap();
        r.add_state(&[0.0, 0.1]).unwrap();
        let mut buf = Vec::new();
        r.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("id,lightIsRed,distanceToGoal\n"));

        let back = StateRegistry::read_csv(&buf[..], FeatureSchema::intersection()).unwrap();
        assert_eq!(back.len(), 3);
        for (id, f) in r.iter() {
            assert_eq!(back.features(id).unwrap(), f);
        }
    }

    #[test]
    fn read_csv_rejects_reordered_ids_and_columns() {
        let bad_ids = "id,lightIsRed,distanceToGoal\n1,0,1.0\n0,1,0.5\n";
        assert!(StateRegistry::read_csv(bad_ids.as_bytes(), FeatureSchema::intersection()).is_err());
        let bad_cols = ",distanceToGoal,lightIsRed\n0,1.0,0\n";
        assert!(StateRegistry::read_csv(bad_cols.as_bytes(), FeatureSchema::intersection()).is_err());
        let dupes = ",lightIsRed,distanceToGoal\n0,0,1.0\n1,0,1.0\n";
        assert!(StateRegistry::read_csv(dupes.as_bytes(), FeatureSchema::intersection()).is_err());
    }

    #[test]
    fn feature_matrix_rows_follow_ids() {
        let mut r = registry();
        r.add_state(&[0.0, 1.0]).unwrap();
        r.add_state(&[1.0, 0.25]).unwrap();
        let m = r.feature_matrix();
        assert_eq!(m.shape(), &[2, 2]);
        assert_eq!(m[[1, 0]], 1.0);
        assert_eq!(m[[1, 1]], 0.25);
    }
}
