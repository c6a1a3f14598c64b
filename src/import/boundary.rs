//! Boundary conditions of the incremental sync modes
//!
//! The bottom border restricts a copy to rows the target does not have yet,
//! the top border freezes the source at the state seen when the run started.

use chrono::{NaiveDate, NaiveDateTime};

use crate::adapters::TargetAdapter;
use crate::error::{AdapterResultExt, SyncResult};
use crate::models::{Column, Value};
use crate::query::{Comparator, Condition, Connector};

/// Bottom and top border of a copy
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Boundary {
    pub bottom: Option<Condition>,
    pub top: Option<Condition>,
}

impl Boundary {
    pub fn none() -> Self {
        Self::default()
    }

    /// Both borders combined with AND
    pub fn combined(&self) -> Option<Condition> {
        Condition::both(self.bottom.clone(), self.top.clone())
    }
}

/// High-water marks of an ordered list of date fields, read from the target
///
/// The mark of field `k` is the maximum of that field among the rows whose
/// preceding fields equal their own marks. Each mark costs one round trip and
/// is computed once.
#[derive(Debug, Clone)]
pub struct HighWaterMark {
    fields: Vec<Column>,
    marks: Vec<Value>,
}

impl HighWaterMark {
    /// Query the marks of `fields`; `date_format` truncates them (e.g. `%Y-%m-%d`)
    pub async fn load(
        table: &str,
        target: &dyn TargetAdapter,
        fields: &[Column],
        date_format: Option<&str>,
    ) -> SyncResult<Self> {
        let mut marks: Vec<Value> = Vec::with_capacity(fields.len());
        for (k, field) in fields.iter().enumerate() {
            let preceding = Condition::combine(
                [fields[..k]
                    .iter()
                    .zip(&marks)
                    .map(|(f, m)| Condition::eq(f.clone(), m.clone()))
                    .collect::<Vec<_>>()],
                Connector::And,
                Connector::And,
            );
            let max = target
                .max_value(field, preceding.as_ref())
                .await
                .context(table, "read target high-water mark")?;
            let max = match date_format.filter(|f| !f.trim().is_empty()) {
                Some(format) => truncate(max, format),
                None => max,
            };
            if max.is_null() {
                tracing::warn!(table, field = %field.internal_name, "high-water mark is NULL");
            }
            marks.push(max);
        }
        Ok(Self {
            fields: fields.to_vec(),
            marks,
        })
    }

    pub fn marks(&self) -> &[Value] {
        &self.marks
    }

    /// The staircase condition
    ///
    /// `(f0 > m0) OR (f0 = m0 AND f1 > m1) OR ...`; with `include_same_date`
    /// the very last comparison is `>=` instead of `>`.
    pub fn condition(&self, include_same_date: bool) -> Option<Condition> {
        let n = self.fields.len();
        let clauses = (0..n).map(|j| {
            (0..=j)
                .map(|i| {
                    let comparator = if i < j {
                        Comparator::Eq
                    } else if include_same_date && j == n - 1 {
                        Comparator::Ge
                    } else {
                        Comparator::Gt
                    };
                    Condition::compare(self.fields[i].clone(), comparator, self.marks[i].clone())
                })
                .collect::<Vec<_>>()
        });
        Condition::combine(clauses, Connector::Or, Connector::And)
    }

    /// Marks as text, for log output
    pub fn describe(&self) -> String {
        self.fields
            .iter()
            .zip(&self.marks)
            .map(|(f, m)| format!("{}={m}", f.internal_name))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Format a date value and parse it back, dropping the parts the format omits
fn truncate(value: Value, format: &str) -> Value {
    let Value::DateTime(dt) = value else {
        return value;
    };
    let text = dt.format(format).to_string();
    NaiveDateTime::parse_from_str(&text, format)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(&text, format)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(Value::DateTime)
        .unwrap_or(Value::DateTime(dt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryAdapter;
    use crate::models::{DataTable, DataType, SchemaField};

    fn target() -> MemoryAdapter {
        let rows = [(5, 10), (5, 3), (4, 20), (2, 99)]
            .into_iter()
            .map(|(a, b)| vec![Value::Int(a), Value::Int(b)])
            .collect();
        MemoryAdapter::new(
            "t",
            DataTable::new(vec![
                SchemaField::new("A", DataType::Long),
                SchemaField::new("B", DataType::Long),
            ])
            .with_rows(rows),
        )
    }

    fn fields() -> Vec<Column> {
        vec![Column::new("A", DataType::Long), Column::new("B", DataType::Long)]
    }

    #[tokio::test]
    async fn test_marks_follow_preceding_fields() {
        let mark = HighWaterMark::load("t", &target(), &fields(), None).await.unwrap();
        // B is maximal among rows with A = 5, not over the whole table
        assert_eq!(mark.marks(), &[Value::Int(5), Value::Int(10)]);
        assert_eq!(mark.describe(), "A=5,B=10");
    }

    #[tokio::test]
    async fn test_staircase_condition() {
        let mark = HighWaterMark::load("t", &target(), &fields(), None).await.unwrap();
        let inclusive = mark.condition(true).unwrap();
        assert_eq!(inclusive.to_string(), "main.A > 5 OR (main.A = 5 AND main.B >= 10)");
        let strict = mark.condition(false).unwrap();
        assert_eq!(strict.to_string(), "main.A > 5 OR (main.A = 5 AND main.B > 10)");
    }

    #[test]
    fn test_truncate_to_day() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 5)
            .and_then(|d| d.and_hms_opt(13, 14, 15))
            .unwrap();
        let truncated = truncate(Value::DateTime(dt), "%Y-%m-%d");
        assert_eq!(
            truncated,
            Value::DateTime(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap().and_hms_opt(0, 0, 0).unwrap())
        );
        assert_eq!(truncate(Value::Int(3), "%Y"), Value::Int(3));
    }
}
