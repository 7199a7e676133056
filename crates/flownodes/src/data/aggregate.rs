use super::ReduceError;
use flowcore::{coerce, Row, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Numeric values of `field`, in row order. Rows without a usable number
/// are skipped.
fn numbers(rows: &[Row], field: &str) -> Vec<f64> {
    rows.iter()
        .filter_map(|row| row.get(field))
        .filter_map(|value| coerce::to_number(value).ok())
        .collect()
}

fn numbers_or_empty(rows: &[Row], field: &str) -> Result<Vec<f64>, ReduceError> {
    let values = numbers(rows, field);
    if values.is_empty() {
        return Err(ReduceError::EmptyInput {
            field: field.to_string(),
        });
    }
    Ok(values)
}

pub fn sum(rows: &[Row], field: &str) -> Result<f64, ReduceError> {
    Ok(numbers_or_empty(rows, field)?.iter().sum())
}

pub fn average(rows: &[Row], field: &str) -> Result<f64, ReduceError> {
    let values = numbers_or_empty(rows, field)?;
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn min(rows: &[Row], field: &str) -> Result<f64, ReduceError> {
    let values = numbers_or_empty(rows, field)?;
    Ok(values.into_iter().fold(f64::INFINITY, f64::min))
}

pub fn max(rows: &[Row], field: &str) -> Result<f64, ReduceError> {
    let values = numbers_or_empty(rows, field)?;
    Ok(values.into_iter().fold(f64::NEG_INFINITY, f64::max))
}

/// Number of rows.
pub fn count(rows: &[Row]) -> usize {
    rows.len()
}

/// Number of distinct non-null values of `field`, compared exactly.
pub fn count_distinct(rows: &[Row], field: &str) -> usize {
    rows.iter()
        .filter_map(|row| row.get(field))
        .filter(|value| !value.is_null())
        .map(Value::canonical)
        .collect::<HashSet<_>>()
        .len()
}

pub fn median(rows: &[Row], field: &str) -> Result<f64, ReduceError> {
    percentile(rows, field, 50.0)
}

/// Linear interpolation between the closest ranks at `(p / 100) * (n - 1)`.
pub fn percentile(rows: &[Row], field: &str, p: f64) -> Result<f64, ReduceError> {
    if !(0.0..=100.0).contains(&p) {
        return Err(ReduceError::InvalidPercentile(p));
    }
    let mut values = numbers_or_empty(rows, field)?;
    values.sort_by(f64::total_cmp);
    Ok(interpolate(&values, p))
}

fn interpolate(sorted: &[f64], p: f64) -> f64 {
    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let weight = rank - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

/// Aggregation applied per group or over a whole row set
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregateMethod {
    Sum,
    Average,
    Min,
    Max,
    Count,
    CountDistinct,
    Median,
    Percentile(f64),
}

impl AggregateMethod {
    pub fn apply(&self, rows: &[Row], field: &str) -> Result<Value, ReduceError> {
        let value = match self {
            AggregateMethod::Sum => sum(rows, field)?,
            AggregateMethod::Average => average(rows, field)?,
            AggregateMethod::Min => min(rows, field)?,
            AggregateMethod::Max => max(rows, field)?,
            AggregateMethod::Count => return Ok(Value::from(count(rows))),
            AggregateMethod::CountDistinct => return Ok(Value::from(count_distinct(rows, field))),
            AggregateMethod::Median => median(rows, field)?,
            AggregateMethod::Percentile(p) => percentile(rows, field, *p)?,
        };
        Ok(Value::from(value))
    }

    /// Whether the method reads a field at all.
    pub fn needs_field(&self) -> bool {
        !matches!(self, AggregateMethod::Count)
    }
}

impl FromStr for AggregateMethod {
    type Err = ReduceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        let method = match name.as_str() {
            "sum" => AggregateMethod::Sum,
            "avg" | "average" | "mean" => AggregateMethod::Average,
            "min" => AggregateMethod::Min,
            "max" => AggregateMethod::Max,
            "count" => AggregateMethod::Count,
            "count_distinct" => AggregateMethod::CountDistinct,
            "median" => AggregateMethod::Median,
            other => {
                let p = other
                    .strip_prefix("percentile:")
                    .or_else(|| other.strip_prefix('p'))
                    .and_then(|digits| digits.parse::<f64>().ok())
                    .ok_or_else(|| ReduceError::UnknownMethod(s.to_string()))?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(ReduceError::InvalidPercentile(p));
                }
                AggregateMethod::Percentile(p)
            }
        };
        Ok(method)
    }
}

impl fmt::Display for AggregateMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateMethod::Sum => write!(f, "sum"),
            AggregateMethod::Average => write!(f, "average"),
            AggregateMethod::Min => write!(f, "min"),
            AggregateMethod::Max => write!(f, "max"),
            AggregateMethod::Count => write!(f, "count"),
            AggregateMethod::CountDistinct => write!(f, "count_distinct"),
            AggregateMethod::Median => write!(f, "median"),
            AggregateMethod::Percentile(p) => write!(f, "percentile:{}", p),
        }
    }
}

/// Partitions `rows` by the exact value of `key_field` and aggregates
/// `agg_field` within each partition.
///
/// Rows missing the key, or holding null there, belong to no partition.
/// Partitions come back in the order their key first appears, each as
/// `{key_field: key, agg_field: value}`. A partition with no valid values
/// for the method is left out.
pub fn group_by(
    rows: &[Row],
    key_field: &str,
    agg_field: &str,
    method: AggregateMethod,
) -> Result<Vec<Row>, ReduceError> {
    if let AggregateMethod::Percentile(p) = method {
        if !(0.0..=100.0).contains(&p) {
            return Err(ReduceError::InvalidPercentile(p));
        }
    }

    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(Value, Vec<Row>)> = Vec::new();
    for row in rows {
        let Some(key) = row.get(key_field).filter(|key| !key.is_null()) else {
            continue;
        };
        let slot = *positions.entry(key.canonical()).or_insert_with(|| {
            groups.push((key.clone(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(row.clone());
    }

    let mut out = Vec::with_capacity(groups.len());
    for (key, members) in groups {
        match method.apply(&members, agg_field) {
            Ok(value) => {
                let mut row = Row::new();
                row.insert(key_field.to_string(), key);
                row.insert(agg_field.to_string(), value);
                out.push(row);
            }
            Err(ReduceError::EmptyInput { .. }) => {
                tracing::debug!("Group {} has no valid '{}' values", key.canonical(), agg_field);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(value: serde_json::Value) -> Vec<Row> {
        match Value::from(value) {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| item.as_object().cloned())
                .collect(),
            _ => panic!("expected an array of rows"),
        }
    }

    #[test]
    fn skips_non_numeric_values() {
        // 4 of 10 rows unusable
        let data = rows(json!([
            {"v": 1}, {"v": "2"}, {"v": 3}, {"v": 4}, {"v": 5}, {"v": 6},
            {"v": "n/a"}, {"v": null}, {"v": true}, {"other": 9}
        ]));
        assert_eq!(average(&data, "v"), Ok(3.5));
        assert_eq!(sum(&data, "v"), Ok(21.0));
        assert_eq!(min(&data, "v"), Ok(1.0));
        assert_eq!(max(&data, "v"), Ok(6.0));
        assert_eq!(count(&data), 10);
    }

    #[test]
    fn absent_field_is_empty_input() {
        let data = rows(json!([{"a": 1}, {"a": 2}]));
        let expected = Err(ReduceError::EmptyInput {
            field: "missing".to_string(),
        });
        assert_eq!(average(&data, "missing"), expected);
        assert_eq!(sum(&data, "missing"), expected);
        assert_eq!(median(&data, "missing"), expected);
        assert!(sum(&[], "a").is_err());
    }

    #[test]
    fn percentile_fifty_is_median() {
        let odd = rows(json!([{"v": 9}, {"v": 1}, {"v": 5}, {"v": 3}, {"v": 7}]));
        let even = rows(json!([{"v": 10}, {"v": 1}, {"v": 4}, {"v": 3}]));

        assert_eq!(median(&odd, "v"), Ok(5.0));
        assert_eq!(percentile(&odd, "v", 50.0), median(&odd, "v"));
        assert_eq!(median(&even, "v"), Ok(3.5));
        assert_eq!(percentile(&even, "v", 50.0), median(&even, "v"));
    }

    #[test]
    fn percentile_interpolates_and_validates() {
        let data = rows(json!([{"v": 10}, {"v": 20}, {"v": 30}, {"v": 40}]));
        assert_eq!(percentile(&data, "v", 0.0), Ok(10.0));
        assert_eq!(percentile(&data, "v", 100.0), Ok(40.0));
        assert_eq!(percentile(&data, "v", 25.0), Ok(17.5));
        assert_eq!(
            percentile(&data, "v", 101.0),
            Err(ReduceError::InvalidPercentile(101.0))
        );
    }

    #[test]
    fn sorting_leaves_caller_rows_alone() {
        let data = rows(json!([{"v": 3}, {"v": 1}, {"v": 2}]));
        let before = data.clone();
        let _ = median(&data, "v");
        assert_eq!(data, before);
    }

    #[test]
    fn count_distinct_is_exact() {
        let data = rows(json!([{"k": 1}, {"k": "1"}, {"k": 1}, {"k": null}, {}]));
        assert_eq!(count_distinct(&data, "k"), 2);
    }

    #[test]
    fn group_by_preserves_first_appearance() {
        let data = rows(json!([
            {"region": "west", "amount": 10},
            {"region": "east", "amount": 5},
            {"amount": 100},
            {"region": null, "amount": 100},
            {"region": "west", "amount": "30"},
            {"region": "north", "amount": "none"},
            {"region": "east", "amount": 7}
        ]));

        let grouped = group_by(&data, "region", "amount", AggregateMethod::Sum).unwrap();
        let summary: Vec<(String, f64)> = grouped
            .iter()
            .map(|row| {
                (
                    row["region"].as_str().unwrap().to_string(),
                    row["amount"].as_f64().unwrap(),
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![("west".to_string(), 40.0), ("east".to_string(), 12.0)]
        );
    }

    #[test]
    fn group_by_separates_number_from_string_keys() {
        let data = rows(json!([{"k": 1, "v": 1}, {"k": "1", "v": 1}, {"k": 1, "v": 1}]));
        let grouped = group_by(&data, "k", "v", AggregateMethod::Count).unwrap();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0]["v"], Value::from(2usize));
        assert_eq!(grouped[1]["v"], Value::from(1usize));
    }

    #[test]
    fn parses_method_names() {
        assert_eq!("avg".parse::<AggregateMethod>(), Ok(AggregateMethod::Average));
        assert_eq!("Average".parse::<AggregateMethod>(), Ok(AggregateMethod::Average));
        assert_eq!("count_distinct".parse::<AggregateMethod>(), Ok(AggregateMethod::CountDistinct));
        assert_eq!("p95".parse::<AggregateMethod>(), Ok(AggregateMethod::Percentile(95.0)));
        assert_eq!("percentile:99.9".parse::<AggregateMethod>(), Ok(AggregateMethod::Percentile(99.9)));
        assert_eq!(
            "p150".parse::<AggregateMethod>(),
            Err(ReduceError::InvalidPercentile(150.0))
        );
        assert_eq!(
            "mode".parse::<AggregateMethod>(),
            Err(ReduceError::UnknownMethod("mode".to_string()))
        );
    }
}
