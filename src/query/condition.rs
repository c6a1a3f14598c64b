//! Boolean filter expressions
//!
//! A [`Condition`] is an immutable tree: leaves compare a column against a
//! scalar, a list or another column, inner nodes join children with AND or
//! OR. The grouping is explicit in the tree, so renderers never re-derive it
//! from operator precedence.

use std::cmp::Ordering;
use std::fmt;

use crate::models::{Column, Value};

/// Comparison operator of a leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparator {
    /// Whether an ordering between left and right satisfies the operator
    pub fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Comparator::Eq => ordering == Ordering::Equal,
            Comparator::Ne => ordering != Ordering::Equal,
            Comparator::Gt => ordering == Ordering::Greater,
            Comparator::Ge => ordering != Ordering::Less,
            Comparator::Lt => ordering == Ordering::Less,
            Comparator::Le => ordering != Ordering::Greater,
        }
    }

    /// Connector joining the members of a list operand: `IN` semantics for
    /// equality, `NOT IN` (all must hold) for everything else
    pub fn list_connector(&self) -> Connector {
        match self {
            Comparator::Eq => Connector::Or,
            _ => Connector::And,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::Eq => "=",
            Comparator::Ne => "<>",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
        }
    }
}

/// Boolean connector of an inner node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Connector {
    And,
    Or,
}

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Value),
    /// Rendered as `IN (...)` / `NOT IN (...)`
    List(Vec<Value>),
    /// Column-to-column comparison
    Column(Column),
}

/// A filter expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        column: Column,
        comparator: Comparator,
        operand: Operand,
    },
    /// All children hold; an empty list holds for every row
    All(Vec<Condition>),
    /// Any child holds; an empty list holds for no row
    Any(Vec<Condition>),
}

impl Condition {
    pub fn compare(column: Column, comparator: Comparator, value: impl Into<Value>) -> Self {
        Condition::Compare {
            column,
            comparator,
            operand: Operand::Value(value.into()),
        }
    }

    pub fn eq(column: Column, value: impl Into<Value>) -> Self {
        Self::compare(column, Comparator::Eq, value)
    }

    pub fn ne(column: Column, value: impl Into<Value>) -> Self {
        Self::compare(column, Comparator::Ne, value)
    }

    pub fn gt(column: Column, value: impl Into<Value>) -> Self {
        Self::compare(column, Comparator::Gt, value)
    }

    pub fn ge(column: Column, value: impl Into<Value>) -> Self {
        Self::compare(column, Comparator::Ge, value)
    }

    pub fn lt(column: Column, value: impl Into<Value>) -> Self {
        Self::compare(column, Comparator::Lt, value)
    }

    pub fn le(column: Column, value: impl Into<Value>) -> Self {
        Self::compare(column, Comparator::Le, value)
    }

    /// `column IN (values)`
    pub fn in_list(column: Column, values: Vec<Value>) -> Self {
        Condition::Compare {
            column,
            comparator: Comparator::Eq,
            operand: Operand::List(values),
        }
    }

    /// `column NOT IN (values)`
    pub fn not_in_list(column: Column, values: Vec<Value>) -> Self {
        Condition::Compare {
            column,
            comparator: Comparator::Ne,
            operand: Operand::List(values),
        }
    }

    /// Compare two columns
    pub fn columns(column: Column, comparator: Comparator, other: Column) -> Self {
        Condition::Compare {
            column,
            comparator,
            operand: Operand::Column(other),
        }
    }

    /// AND of the given conditions, flattening nested ANDs
    pub fn and(items: impl IntoIterator<Item = Condition>) -> Self {
        Self::group(Connector::And, items)
    }

    /// OR of the given conditions, flattening nested ORs
    pub fn or(items: impl IntoIterator<Item = Condition>) -> Self {
        Self::group(Connector::Or, items)
    }

    /// Join conditions with a connector; a single item is returned as is
    pub fn group(connector: Connector, items: impl IntoIterator<Item = Condition>) -> Self {
        let mut children = Vec::new();
        for item in items {
            match (connector, item) {
                (Connector::And, Condition::All(inner)) if !inner.is_empty() => {
                    children.extend(inner)
                }
                (Connector::Or, Condition::Any(inner)) if !inner.is_empty() => {
                    children.extend(inner)
                }
                (_, other) => children.push(other),
            }
        }
        if children.len() == 1 {
            return children.remove(0);
        }
        match connector {
            Connector::And => Condition::All(children),
            Connector::Or => Condition::Any(children),
        }
    }

    /// Join N groups into one expression: members of a group with `inner`,
    /// the groups with `outer`. Empty groups are skipped; no groups yields `None`.
    pub fn combine(
        groups: impl IntoIterator<Item = Vec<Condition>>,
        outer: Connector,
        inner: Connector,
    ) -> Option<Condition> {
        let joined: Vec<Condition> = groups
            .into_iter()
            .filter(|g| !g.is_empty())
            .map(|g| Condition::group(inner, g))
            .collect();
        if joined.is_empty() {
            None
        } else {
            Some(Condition::group(outer, joined))
        }
    }

    /// AND two optional conditions
    pub fn both(left: Option<Condition>, right: Option<Condition>) -> Option<Condition> {
        match (left, right) {
            (Some(l), Some(r)) => Some(Condition::and([l, r])),
            (l, r) => l.or(r),
        }
    }

    /// Connector of an inner node
    pub fn connector(&self) -> Option<Connector> {
        match self {
            Condition::Compare { .. } => None,
            Condition::All(_) => Some(Connector::And),
            Condition::Any(_) => Some(Connector::Or),
        }
    }

    /// Visit every leaf in rendering order
    pub fn each<'a, F: FnMut(&'a Condition)>(&'a self, f: &mut F) {
        match self {
            Condition::Compare { .. } => f(self),
            Condition::All(children) | Condition::Any(children) => {
                for child in children {
                    child.each(f);
                }
            }
        }
    }

    /// Leaves in rendering order
    pub fn to_list(&self) -> Vec<&Condition> {
        let mut leaves = Vec::new();
        self.each(&mut |c| leaves.push(c));
        leaves
    }

    /// Number of scalar values bound by this condition (one parameter each)
    pub fn parameter_count(&self) -> usize {
        self.to_list()
            .iter()
            .map(|leaf| match leaf {
                Condition::Compare {
                    operand: Operand::Value(Value::Null),
                    ..
                } => 0,
                Condition::Compare {
                    operand: Operand::Value(_),
                    ..
                } => 1,
                Condition::Compare {
                    operand: Operand::List(values),
                    ..
                } => values.len(),
                _ => 0,
            })
            .sum()
    }

    /// Scalar values in rendering order, for log output
    pub fn values(&self) -> Vec<&Value> {
        let mut values = Vec::new();
        self.each(&mut |c| match c {
            Condition::Compare {
                operand: Operand::Value(v),
                ..
            } => values.push(v),
            Condition::Compare {
                operand: Operand::List(vs),
                ..
            } => values.extend(vs.iter()),
            _ => {}
        });
        values
    }

    /// Evaluate against a row; `lookup` resolves a column to its value
    ///
    /// Comparisons involving NULL are false, as in SQL.
    pub fn matches<'v, F>(&self, lookup: &F) -> bool
    where
        F: Fn(&Column) -> Option<&'v Value>,
    {
        match self {
            Condition::All(children) => children.iter().all(|c| c.matches(lookup)),
            Condition::Any(children) => children.iter().any(|c| c.matches(lookup)),
            Condition::Compare {
                column,
                comparator,
                operand,
            } => {
                let Some(left) = lookup(column) else {
                    return false;
                };
                let test = |right: &Value| {
                    left.compare(right)
                        .map(|o| comparator.accepts(o))
                        .unwrap_or(false)
                };
                match operand {
                    Operand::Value(v) => test(v),
                    Operand::Column(other) => lookup(other).map(test).unwrap_or(false),
                    Operand::List(values) => match comparator.list_connector() {
                        Connector::Or => values.iter().any(test),
                        Connector::And => values.iter().all(test),
                    },
                }
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_group(
            f: &mut fmt::Formatter<'_>,
            children: &[Condition],
            sep: &str,
            nested: bool,
        ) -> fmt::Result {
            if nested {
                write!(f, "(")?;
            }
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    write!(f, " {sep} ")?;
                }
                match child {
                    Condition::All(c) => write_group(f, c, "AND", true)?,
                    Condition::Any(c) => write_group(f, c, "OR", true)?,
                    leaf => write!(f, "{leaf}")?,
                }
            }
            if nested {
                write!(f, ")")?;
            }
            Ok(())
        }

        match self {
            Condition::All(children) => write_group(f, children, "AND", false),
            Condition::Any(children) => write_group(f, children, "OR", false),
            Condition::Compare {
                column,
                comparator,
                operand,
            } => {
                let name = format!("{}.{}", column.alias, column.name);
                match operand {
                    Operand::Value(v) => write!(f, "{name} {} {v}", comparator.symbol()),
                    Operand::Column(c) => {
                        write!(f, "{name} {} {}.{}", comparator.symbol(), c.alias, c.name)
                    }
                    Operand::List(values) => {
                        let list = values
                            .iter()
                            .map(|v| v.to_string())
                            .collect::<Vec<_>>()
                            .join(",");
                        let op = if *comparator == Comparator::Eq { "IN" } else { "NOT IN" };
                        write!(f, "{name} {op} ({list})")
                    }
                }
            }
        }
    }
}
