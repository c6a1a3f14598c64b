//! Batched key lookups
//!
//! Builds conditions matching (or excluding) a set of identity tuples, split
//! into batches so no single statement binds more parameters than the backend
//! accepts.

use crate::models::{Column, Value};

use super::condition::{Comparator, Condition, Connector};

/// A batch of identity tuples and the condition addressing them
#[derive(Debug, Clone, PartialEq)]
pub struct KeyBatch {
    pub tuples: Vec<Vec<Value>>,
    pub condition: Condition,
}

/// Tuples per batch for a parameter ceiling
pub fn key_batch_size(width: usize, parameter_ceiling: usize) -> usize {
    (parameter_ceiling / width.max(1)).max(1)
}

/// Condition matching exactly one tuple (`Eq`) or excluding it (`Ne`)
pub fn tuple_condition(columns: &[Column], tuple: &[Value], comparator: Comparator) -> Condition {
    let leaves = columns
        .iter()
        .zip(tuple)
        .map(|(c, v)| Condition::compare(c.clone(), comparator, v.clone()));
    match comparator {
        Comparator::Ne => Condition::or(leaves),
        _ => Condition::and(leaves),
    }
}

/// Condition over a whole set of tuples, without batching
///
/// Single-column keys become `IN` / `NOT IN` lists. Composite keys become an
/// OR of AND-groups for equality, or an AND of OR-groups for exclusion.
pub fn tuples_condition(columns: &[Column], tuples: &[Vec<Value>], comparator: Comparator) -> Condition {
    if let [column] = columns {
        let values = tuples
            .iter()
            .filter_map(|t| t.first().cloned())
            .collect();
        return match comparator {
            Comparator::Eq => Condition::in_list(column.clone(), values),
            Comparator::Ne => Condition::not_in_list(column.clone(), values),
            other => Condition::Compare {
                column: column.clone(),
                comparator: other,
                operand: super::condition::Operand::List(values),
            },
        };
    }
    let (outer, inner) = match comparator {
        Comparator::Ne => (Connector::And, Connector::Or),
        _ => (Connector::Or, Connector::And),
    };
    let groups = tuples.iter().map(|t| {
        columns
            .iter()
            .zip(t)
            .map(|(c, v)| Condition::compare(c.clone(), comparator, v.clone()))
            .collect::<Vec<_>>()
    });
    Condition::combine(groups, outer, inner).unwrap_or_else(|| match outer {
        Connector::And => Condition::All(Vec::new()),
        Connector::Or => Condition::Any(Vec::new()),
    })
}

/// Split tuples into batches of `parameter_ceiling / columns.len()` and build
/// one condition per batch
pub fn key_batches(
    columns: &[Column],
    tuples: &[Vec<Value>],
    comparator: Comparator,
    parameter_ceiling: usize,
) -> Vec<KeyBatch> {
    let size = key_batch_size(columns.len(), parameter_ceiling);
    tuples
        .chunks(size)
        .map(|chunk| KeyBatch {
            tuples: chunk.to_vec(),
            condition: tuples_condition(columns, chunk, comparator),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DataType;
    use crate::query::condition::Operand;

    fn ids(n: i64) -> Vec<Vec<Value>> {
        (1..=n).map(|i| vec![Value::Int(i)]).collect()
    }

    #[test]
    fn test_single_column_uses_in_list() {
        let col = Column::new("Id", DataType::Long);
        let batches = key_batches(&[col], &ids(5), Comparator::Eq, 2);
        assert_eq!(batches.len(), 3);
        assert!(matches!(
            &batches[0].condition,
            Condition::Compare { operand: Operand::List(v), comparator: Comparator::Eq, .. } if v.len() == 2
        ));
        assert_eq!(batches[2].tuples, vec![vec![Value::Int(5)]]);
    }

    #[test]
    fn test_composite_key_groups() {
        let cols = vec![
            Column::new("A", DataType::Long),
            Column::new("B", DataType::Long),
        ];
        let tuples = vec![
            vec![Value::Int(1), Value::Int(2)],
            vec![Value::Int(3), Value::Int(4)],
        ];
        let eq = tuples_condition(&cols, &tuples, Comparator::Eq);
        assert_eq!(eq.to_string(), "(main.A = 1 AND main.B = 2) OR (main.A = 3 AND main.B = 4)");
        let ne = tuples_condition(&cols, &tuples, Comparator::Ne);
        assert_eq!(ne.to_string(), "(main.A <> 1 OR main.B <> 2) AND (main.A <> 3 OR main.B <> 4)");
    }

    #[test]
    fn test_batch_size_never_zero() {
        assert_eq!(key_batch_size(3, 2000), 666);
        assert_eq!(key_batch_size(5, 2), 1);
        assert_eq!(key_batch_size(0, 10), 10);
    }
}
