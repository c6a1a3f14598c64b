//! Consistency reconciliation
//!
//! Makes the identity tuples of the target equal those of the source, under
//! the optional top border. Equal counts do not prove equal content, so the
//! engine compares sorted identity pages position by position:
//!
//! 1. Rows sharing a duplicated identity tuple are deleted from the target.
//! 2. Source and target pages are walked side by side. A target tuple found
//!    later in the source page marks the skipped source tuples as inserts; a
//!    target tuple found nowhere in the source is an orphan and gets deleted.
//!    A page is retried until it resolves without changes.
//! 3. Remaining count gaps and duplicate keys are closed from the tail of the
//!    sort order.
//!
//! In check-only mode nothing is written and the first discrepancy decides
//! the verdict. Every correction batch must affect at least one row; a batch
//! that does not would make the loop spin forever and aborts the run.

use std::time::{Duration, Instant};

use super::ImportContext;
use super::pipeline::page_queries;
use crate::adapters::SourceAdapter;
use crate::error::{AdapterError, AdapterResultExt, SyncError, SyncResult};
use crate::models::{Column, Consistency, DataTable, Value};
use crate::query::{Comparator, Condition, Range, SelectQuery, SortDirection, tuple_condition};

/// Outcome of a reconciliation run
#[derive(Debug, Clone, PartialEq)]
pub struct ConsistencyReport {
    pub verdict: Consistency,
    pub source_count: u64,
    pub target_count: u64,
    pub has_duplicates: bool,
    pub inserted: u64,
    pub deleted: u64,
    pub duration: Duration,
}

pub(crate) struct ConsistencyEngine<'c, 'a> {
    ctx: &'c ImportContext<'a>,
    top: Option<&'c Condition>,
    check_only: bool,
    ids: Vec<Column>,
    names: Vec<String>,
    inserted: u64,
    deleted: u64,
}

impl<'c, 'a> ConsistencyEngine<'c, 'a> {
    pub(crate) fn new(ctx: &'c ImportContext<'a>, top: Option<&'c Condition>, check_only: bool) -> Self {
        let ids = ctx.columns.id_columns();
        let names = ids.iter().map(|c| c.internal_name.clone()).collect();
        Self {
            ctx,
            top,
            check_only,
            ids,
            names,
            inserted: 0,
            deleted: 0,
        }
    }

    pub(crate) async fn run(mut self) -> SyncResult<ConsistencyReport> {
        let start = Instant::now();
        let table = self.ctx.table().to_string();
        if self.ids.is_empty() {
            return Err(SyncError::config(format!(
                "{table}: consistency correction needs at least one id field"
            )));
        }
        let model = self.ctx.model;
        tracing::info!(table = %table, check_only = self.check_only, "consistency check started");

        if !self.check_only && !model.ignore_key_integrity_check {
            self.purge_duplicates().await?;
        }

        let verdict = if model.avoid_count_consistency_correction {
            let (source, target) = self.counts().await?;
            count_verdict(source, target)
        } else {
            match self.diff_pages().await? {
                Some(verdict) => verdict,
                None => self.close_gap().await?,
            }
        };

        let (source_count, target_count) = self.counts().await?;
        let has_duplicates = if model.ignore_key_integrity_check {
            false
        } else {
            self.ctx
                .target
                .has_duplicate_keys(&self.ids)
                .await
                .context(&table, "check duplicate keys")?
        };
        let duration = start.elapsed();
        tracing::info!(
            table = %table,
            verdict = %verdict,
            inserted = self.inserted,
            deleted = self.deleted,
            elapsed_ms = duration.as_millis() as u64,
            "consistency check finished"
        );
        Ok(ConsistencyReport {
            verdict,
            source_count,
            target_count,
            has_duplicates,
            inserted: self.inserted,
            deleted: self.deleted,
            duration,
        })
    }

    async fn counts(&self) -> SyncResult<(u64, u64)> {
        let table = self.ctx.table();
        let (source, target) = tokio::join!(
            self.ctx.source.row_count(self.top),
            self.ctx.target.row_count(None)
        );
        Ok((
            source.context(table, "count source rows")?,
            target.context(table, "count target rows")?,
        ))
    }

    /// Delete every row whose identity tuple occurs more than once
    async fn purge_duplicates(&mut self) -> SyncResult<bool> {
        let duplicates = self
            .ctx
            .target
            .duplicate_keys(&self.ids)
            .await
            .context(self.ctx.table(), "read duplicate keys")?;
        if duplicates.is_empty() {
            return Ok(false);
        }
        let tuples = self.tuples(&duplicates);
        self.ctx
            .reporter
            .warning(format!("{} duplicate keys found, deleting affected rows", tuples.len()));
        self.delete(&tuples).await?;
        Ok(true)
    }

    /// Positional diff over sorted identity pages
    ///
    /// Returns a verdict only when check-only mode found a mismatch.
    async fn diff_pages(&mut self) -> SyncResult<Option<Consistency>> {
        let ctx = self.ctx;
        let table = ctx.table();
        let order = ctx.columns.default_sort_order(SortDirection::Asc);
        let page_size = ctx.options.consistency_page_size;
        let mut page = 0;
        loop {
            let (source_count, target_count) = self.counts().await?;
            let target_pages = page_queries(&self.ids, ctx.target.table(), None, &order, target_count, page_size);
            let source_pages = page_queries(&self.ids, ctx.source.table(), self.top, &order, source_count, page_size);
            let pages = target_pages.len().max(source_pages.len());
            if page >= pages {
                return Ok(None);
            }

            let (target, source) = tokio::join!(
                fetch(ctx.target, target_pages.get(page)),
                fetch(ctx.source, source_pages.get(page))
            );
            let t = self.tuples(&target.context(table, "read target key page")?);
            let s = self.tuples(&source.context(table, "read source key page")?);
            let last_target_page = page + 1 >= target_pages.len();
            let last_source_page = page + 1 >= source_pages.len();

            let mut inserts: Vec<Vec<Value>> = Vec::new();
            let mut deletes: Vec<Vec<Value>> = Vec::new();
            let (mut ti, mut si) = (0, 0);
            while ti < t.len() && si < s.len() {
                if t[ti] == s[si] {
                    ti += 1;
                    si += 1;
                    continue;
                }
                if self.check_only {
                    ctx.reporter
                        .warning(format!("key mismatch on page {}: {}", page + 1, describe(&t[ti])));
                    return Ok(Some(Consistency::False));
                }
                match s[si..].iter().position(|x| *x == t[ti]) {
                    Some(offset) => {
                        self.verify_inserts(&s[si..si + offset], &mut inserts).await?;
                        si += offset;
                    }
                    None => {
                        if self.exists_in_source(&t[ti]).await? {
                            self.verify_inserts(&s[si..], &mut inserts).await?;
                            break;
                        }
                        deletes.push(t[ti].clone());
                        ti += 1;
                    }
                }
            }

            // Tail of the last page on either side
            if !self.check_only && inserts.is_empty() && deletes.is_empty() {
                if ti < t.len() && si >= s.len() && last_source_page {
                    for tuple in &t[ti..] {
                        if !self.exists_in_source(tuple).await? {
                            deletes.push(tuple.clone());
                        }
                    }
                } else if si < s.len() && ti >= t.len() && last_target_page {
                    self.verify_inserts(&s[si..], &mut inserts).await?;
                }
            }

            deletes.sort();
            deletes.dedup();
            inserts.sort();
            inserts.dedup();
            let changed = !inserts.is_empty() || !deletes.is_empty();
            if !deletes.is_empty() {
                ctx.reporter
                    .info(format!("page {}: deleting {} orphaned rows", page + 1, deletes.len()));
                self.delete(&deletes).await?;
            }
            if !inserts.is_empty() {
                ctx.reporter
                    .info(format!("page {}: inserting {} missing rows", page + 1, inserts.len()));
                self.insert(&inserts).await?;
            }
            tracing::debug!(table = %table, page = page + 1, pages, changed, "consistency page compared");
            if !changed {
                page += 1;
            }
        }
    }

    /// Close count differences and leftover duplicates from the tail of the
    /// sort order
    async fn close_gap(&mut self) -> SyncResult<Consistency> {
        let ctx = self.ctx;
        let check_keys = !self.check_only && !ctx.model.ignore_key_integrity_check;
        let mut iterations = 0;
        loop {
            let (source, target) = self.counts().await?;
            if self.check_only {
                return Ok(count_verdict(source, target));
            }
            let duplicates = check_keys
                && ctx
                    .target
                    .has_duplicate_keys(&self.ids)
                    .await
                    .context(ctx.table(), "check duplicate keys")?;
            if source == target && !duplicates {
                return Ok(Consistency::Ok);
            }
            if iterations == ctx.options.gap_iterations {
                ctx.reporter.warning(format!(
                    "target still misaligned after {iterations} correction passes (source {source}, target {target}, duplicate keys: {duplicates})"
                ));
                return Ok(Consistency::CountDiffersButTrue);
            }
            iterations += 1;

            if duplicates {
                self.purge_duplicates().await?;
                continue;
            }
            if target > source {
                let surplus = self.tail(ctx.target, None, target - source).await?;
                ctx.reporter
                    .info(format!("deleting {} surplus rows from the target", surplus.len()));
                self.delete(&surplus).await?;
            } else {
                let missing = self.tail(ctx.source, self.top, source - target).await?;
                let mut inserts = Vec::new();
                self.verify_inserts(&missing, &mut inserts).await?;
                if !inserts.is_empty() {
                    ctx.reporter
                        .info(format!("inserting {} missing rows into the target", inserts.len()));
                    self.insert(&inserts).await?;
                }
            }
        }
    }

    /// The last `count` identity tuples of an adapter in default sort order
    async fn tail<A: SourceAdapter + ?Sized>(
        &self,
        adapter: &A,
        condition: Option<&Condition>,
        count: u64,
    ) -> SyncResult<Vec<Vec<Value>>> {
        let order = self.ctx.columns.default_sort_order(SortDirection::Desc);
        let query = SelectQuery::new(self.ids.clone(), adapter.table().clone())
            .with_condition(condition.cloned())
            .with_sort_order(order)
            .with_range(Range::new(0, count as usize));
        let rows = adapter
            .run_query(&query)
            .await
            .context(self.ctx.table(), "read tail keys")?;
        Ok(self.tuples(&rows))
    }

    async fn exists_in_source(&self, tuple: &[Value]) -> SyncResult<bool> {
        let key = tuple_condition(&self.ids, tuple, Comparator::Eq);
        let count = self
            .ctx
            .source
            .row_count(Condition::both(Some(key), self.top.cloned()).as_ref())
            .await
            .context(self.ctx.table(), "look up source key")?;
        Ok(count > 0)
    }

    /// Keep the candidate batches that have no row in the target yet
    async fn verify_inserts(&self, candidates: &[Vec<Value>], inserts: &mut Vec<Vec<Value>>) -> SyncResult<()> {
        for batch in self.ctx.key_batches(&self.ids, candidates, Comparator::Eq) {
            let existing = self
                .ctx
                .target
                .row_count(Some(&batch.condition))
                .await
                .context(self.ctx.table(), "verify insert candidates")?;
            if existing > 0 {
                self.ctx.reporter.warning(format!(
                    "{} insert candidates skipped, {existing} of them already exist in the target",
                    batch.tuples.len()
                ));
            } else {
                inserts.extend(batch.tuples);
            }
        }
        Ok(())
    }

    async fn insert(&mut self, tuples: &[Vec<Value>]) -> SyncResult<()> {
        let ctx = self.ctx;
        for batch in ctx.key_batches(&self.ids, tuples, Comparator::Eq) {
            let query = SelectQuery::new(ctx.columns.columns.clone(), ctx.source.table().clone())
                .with_condition(Condition::both(Some(batch.condition), self.top.cloned()));
            let rows = ctx
                .source
                .run_query(&query)
                .await
                .context(ctx.table(), "read rows to insert")?;
            if rows.is_empty() {
                return Err(SyncError::invariant(
                    ctx.table(),
                    format!("none of {} keys to insert were found in the source", batch.tuples.len()),
                ));
            }
            let size = rows.len();
            self.inserted += ctx
                .target
                .bulk_insert(rows, size, None)
                .await
                .context(ctx.table(), "insert missing rows")?;
        }
        Ok(())
    }

    async fn delete(&mut self, tuples: &[Vec<Value>]) -> SyncResult<()> {
        let ctx = self.ctx;
        for batch in ctx.key_batches(&self.ids, tuples, Comparator::Eq) {
            let removed = ctx
                .target
                .delete(&batch.condition)
                .await
                .context(ctx.table(), "delete rows")?;
            if removed == 0 {
                return Err(SyncError::invariant(
                    ctx.table(),
                    format!("deleting {} keys removed no rows", batch.tuples.len()),
                ));
            }
            self.deleted += removed;
        }
        Ok(())
    }

    fn tuples(&self, rows: &DataTable) -> Vec<Vec<Value>> {
        let names: Vec<&str> = self.names.iter().map(String::as_str).collect();
        rows.project(&names)
    }
}

async fn fetch<A: SourceAdapter + ?Sized>(adapter: &A, query: Option<&SelectQuery>) -> Result<DataTable, AdapterError> {
    match query {
        Some(query) => adapter.run_query(query).await,
        None => Ok(DataTable::default()),
    }
}

/// Verdict from counts alone
pub(crate) fn count_verdict(source: u64, target: u64) -> Consistency {
    match source.cmp(&target) {
        std::cmp::Ordering::Equal => Consistency::Ok,
        std::cmp::Ordering::Greater => Consistency::CountDiffersButTrue,
        std::cmp::Ordering::Less => Consistency::False,
    }
}

fn describe(tuple: &[Value]) -> String {
    tuple.iter().map(Value::to_string).collect::<Vec<_>>().join(",")
}
