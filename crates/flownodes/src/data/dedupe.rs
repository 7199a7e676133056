use flowcore::{Row, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Caller-supplied key extraction
pub type KeyFn = Arc<dyn Fn(&Row) -> String + Send + Sync>;

/// What makes two rows duplicates of each other
#[derive(Clone)]
pub enum DedupeKey {
    /// One field. Rows without it are never duplicates.
    Field(String),
    /// Several fields; a missing field compares as null.
    Fields(Vec<String>),
    /// Every field of the row, independent of insertion order.
    Row,
    Custom(KeyFn),
}

impl DedupeKey {
    /// `None` means the row has no identity and is always kept.
    fn key_of(&self, row: &Row) -> Option<String> {
        match self {
            DedupeKey::Field(field) => row.get(field).map(Value::canonical),
            DedupeKey::Fields(fields) => {
                let parts = fields
                    .iter()
                    .map(|field| row.get(field).cloned().unwrap_or(Value::Null))
                    .collect();
                Some(Value::Array(parts).canonical())
            }
            DedupeKey::Row => Some(Value::Object(row.clone()).canonical()),
            DedupeKey::Custom(key_fn) => Some(key_fn(row)),
        }
    }
}

impl fmt::Debug for DedupeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupeKey::Field(field) => f.debug_tuple("Field").field(field).finish(),
            DedupeKey::Fields(fields) => f.debug_tuple("Fields").field(fields).finish(),
            DedupeKey::Row => write!(f, "Row"),
            DedupeKey::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeepPolicy {
    #[default]
    First,
    Last,
}

impl FromStr for KeepPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(KeepPolicy::First),
            "last" => Ok(KeepPolicy::Last),
            other => Err(format!("keep must be 'first' or 'last', got '{}'", other)),
        }
    }
}

/// Removes duplicate rows. Kept rows stay in their original relative order.
pub fn dedupe(rows: &[Row], key: &DedupeKey, keep: KeepPolicy) -> Vec<Row> {
    let mut seen = HashSet::new();
    let mut kept = vec![false; rows.len()];

    let mut visit = |index: usize| {
        kept[index] = match key.key_of(&rows[index]) {
            Some(k) => seen.insert(k),
            None => true,
        };
    };
    match keep {
        KeepPolicy::First => (0..rows.len()).for_each(&mut visit),
        KeepPolicy::Last => (0..rows.len()).rev().for_each(&mut visit),
    }

    rows.iter()
        .zip(kept)
        .filter_map(|(row, keep)| keep.then(|| row.clone()))
        .collect()
}

/// Every row whose `field` value occurs more than once, in input order.
pub fn find_duplicates(rows: &[Row], field: &str) -> Vec<Row> {
    let mut occurrences: HashMap<String, usize> = HashMap::new();
    for value in rows.iter().filter_map(|row| row.get(field)) {
        *occurrences.entry(value.canonical()).or_default() += 1;
    }

    rows.iter()
        .filter(|row| {
            row.get(field)
                .is_some_and(|value| occurrences[&value.canonical()] > 1)
        })
        .cloned()
        .collect()
}

/// Occurrence count per distinct `field` value, in order of first appearance.
pub fn count_duplicates(rows: &[Row], field: &str) -> Vec<(Value, usize)> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut counts: Vec<(Value, usize)> = Vec::new();
    for value in rows.iter().filter_map(|row| row.get(field)) {
        let slot = *positions.entry(value.canonical()).or_insert_with(|| {
            counts.push((value.clone(), 0));
            counts.len() - 1
        });
        counts[slot].1 += 1;
    }
    counts
}
