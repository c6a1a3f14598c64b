//! Select and update queries

use crate::models::{Column, Table, Value};

use super::condition::Condition;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One field of an ORDER BY list
#[derive(Debug, Clone, PartialEq)]
pub struct SortOrderField {
    pub column: Column,
    pub direction: SortDirection,
}

impl SortOrderField {
    pub fn asc(column: Column) -> Self {
        Self {
            column,
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column: Column) -> Self {
        Self {
            column,
            direction: SortDirection::Desc,
        }
    }
}

/// Offset/limit window over a sorted result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    pub from: usize,
    pub count: usize,
}

impl Range {
    pub fn new(from: usize, count: usize) -> Self {
        Self { from, count }
    }

    /// Exclusive end of the window
    pub fn to(&self) -> usize {
        self.from + self.count
    }
}

/// Split `total` rows into windows of `page_size`; the last holds the remainder
pub fn paginate(total: usize, page_size: usize) -> Vec<Range> {
    let page_size = page_size.max(1);
    (0..total.div_ceil(page_size))
        .map(|i| {
            let from = i * page_size;
            Range::new(from, page_size.min(total - from))
        })
        .collect()
}

/// A projection over a table with optional filter, ordering and window
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub columns: Vec<Column>,
    pub table: Table,
    pub condition: Option<Condition>,
    pub sort_order: Vec<SortOrderField>,
    pub range: Option<Range>,
}

impl SelectQuery {
    pub fn new(columns: Vec<Column>, table: Table) -> Self {
        Self {
            columns,
            table,
            condition: None,
            sort_order: Vec::new(),
            range: None,
        }
    }

    pub fn with_condition(mut self, condition: Option<Condition>) -> Self {
        self.condition = condition;
        self
    }

    pub fn with_sort_order(mut self, sort_order: Vec<SortOrderField>) -> Self {
        self.sort_order = sort_order;
        self
    }

    pub fn with_range(mut self, range: Range) -> Self {
        self.range = Some(range);
        self
    }

    /// Columns belonging to joined tables
    pub fn joined_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.kind.join().is_some())
    }
}

/// `column = value` of an update
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateAssign {
    pub column: Column,
    pub value: Value,
}

/// `UPDATE table SET assignments WHERE condition`
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateQuery {
    pub table: Table,
    pub assignments: Vec<UpdateAssign>,
    pub condition: Option<Condition>,
}

impl UpdateQuery {
    pub fn new(table: Table, assignments: Vec<UpdateAssign>, condition: Option<Condition>) -> Self {
        Self {
            table,
            assignments,
            condition,
        }
    }

    /// Parameters bound by the statement
    pub fn parameter_count(&self) -> usize {
        self.assignments.len()
            + self
                .condition
                .as_ref()
                .map(|c| c.parameter_count())
                .unwrap_or(0)
    }
}

/// Consecutive slices of `queries` whose parameter total stays within
/// `ceiling`
///
/// A statement larger than the ceiling on its own gets a slice of its own.
pub fn pack_updates(queries: &[UpdateQuery], ceiling: usize) -> Vec<&[UpdateQuery]> {
    let mut batches = Vec::new();
    let mut start = 0;
    let mut used = 0;
    for (i, query) in queries.iter().enumerate() {
        let count = query.parameter_count();
        if i > start && used + count > ceiling {
            batches.push(&queries[start..i]);
            start = i;
            used = 0;
        }
        used += count;
    }
    if start < queries.len() {
        batches.push(&queries[start..]);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DataType;

    fn query(params: usize) -> UpdateQuery {
        let assignments = (0..params - 1)
            .map(|i| UpdateAssign {
                column: Column::new(format!("c{i}"), DataType::Long),
                value: Value::Int(i as i64),
            })
            .collect();
        UpdateQuery::new(
            Table::new("t"),
            assignments,
            Some(Condition::eq(Column::new("Id", DataType::Long), 1)),
        )
    }

    #[test]
    fn test_pack_respects_ceiling() {
        let queries: Vec<UpdateQuery> = (0..7).map(|_| query(3)).collect();
        let batches = pack_updates(&queries, 10);
        assert_eq!(batches.iter().map(|b| b.len()).collect::<Vec<_>>(), vec![3, 3, 1]);
    }

    #[test]
    fn test_pack_oversized_statement() {
        let queries = vec![query(2), query(12), query(2)];
        let batches = pack_updates(&queries, 10);
        assert_eq!(batches.iter().map(|b| b.len()).collect::<Vec<_>>(), vec![1, 1, 1]);
        assert!(pack_updates(&[], 10).is_empty());
    }

    #[test]
    fn test_paginate() {
        assert_eq!(paginate(0, 10), Vec::<Range>::new());
        assert_eq!(paginate(10, 10), vec![Range::new(0, 10)]);
        assert_eq!(
            paginate(25, 10),
            vec![Range::new(0, 10), Range::new(10, 10), Range::new(20, 5)]
        );
        assert_eq!(paginate(25, 10)[2].to(), 25);
    }
}
