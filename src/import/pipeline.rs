//! Copy and update pipelines
//!
//! The copy pipeline has depth one: while page `k - 1` is written to the
//! target, page `k` is fetched from the source. Writes commit in page order.

use std::sync::Arc;
use std::time::Instant;

use super::ImportContext;
use crate::adapters::ProgressCallback;
use crate::error::{AdapterResultExt, SyncError, SyncResult};
use crate::models::{Column, DataTable, Table};
use crate::query::{
    Condition, SelectQuery, SortDirection, SortOrderField, UpdateAssign, UpdateQuery, pack_updates,
    paginate,
};

/// Page queries over `rows` matching rows, sorted by `sort_order`
pub fn page_queries(
    columns: &[Column],
    table: &Table,
    condition: Option<&Condition>,
    sort_order: &[SortOrderField],
    rows: u64,
    page_size: usize,
) -> Vec<SelectQuery> {
    paginate(rows as usize, page_size)
        .into_iter()
        .map(|range| {
            SelectQuery::new(columns.to_vec(), table.clone())
                .with_condition(condition.cloned())
                .with_sort_order(sort_order.to_vec())
                .with_range(range)
        })
        .collect()
}

/// Copy `partial` rows matching the boundary, returning the rows written
pub(crate) async fn copy(ctx: &ImportContext<'_>, condition: Option<&Condition>, partial: u64) -> SyncResult<u64> {
    let sort_order = ctx.columns.default_sort_order(SortDirection::Asc);
    let queries = page_queries(
        &ctx.columns.columns,
        ctx.source.table(),
        condition,
        &sort_order,
        partial,
        ctx.options.page_size,
    );
    let pages = queries.len();
    tracing::info!(table = %ctx.table(), rows = partial, pages, "copy started");

    let mut written = 0u64;
    let mut pending: Option<(usize, DataTable)> = None;
    for (k, query) in queries.iter().enumerate() {
        let previous = pending.take();
        let done_before = written;
        let (fetched, stored) = tokio::join!(fetch_page(ctx, query, k, pages), async move {
            match previous {
                Some((i, rows)) => write_page(ctx, rows, i, pages, done_before, partial).await,
                None => Ok(0),
            }
        });
        written += stored?;
        pending = Some((k, fetched?));
    }
    if let Some((i, rows)) = pending {
        written += write_page(ctx, rows, i, pages, written, partial).await?;
    }

    tracing::info!(table = %ctx.table(), rows = written, "copy finished");
    Ok(written)
}

async fn fetch_page(ctx: &ImportContext<'_>, query: &SelectQuery, page: usize, pages: usize) -> SyncResult<DataTable> {
    let start = Instant::now();
    let rows = ctx
        .source
        .run_query(query)
        .await
        .context(ctx.table(), "fetch source page")?;
    tracing::debug!(
        table = %ctx.table(),
        page = page + 1,
        pages,
        rows = rows.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "page fetched"
    );
    Ok(rows)
}

async fn write_page(
    ctx: &ImportContext<'_>,
    rows: DataTable,
    page: usize,
    pages: usize,
    done_before: u64,
    partial: u64,
) -> SyncResult<u64> {
    let start = Instant::now();
    let count = rows.len();
    let reporter = ctx.reporter.clone();
    let progress: ProgressCallback = Arc::new(move |n: u64| {
        let done = done_before + n;
        reporter.progress(percent(done, partial), done);
    });
    let written = ctx
        .target
        .bulk_insert(rows, count.max(1), Some(progress))
        .await
        .context(ctx.table(), "write target page")?;
    tracing::debug!(
        table = %ctx.table(),
        page = page + 1,
        pages,
        rows = written,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "page written"
    );
    Ok(written)
}

fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (done.saturating_mul(100) / total).min(100) as u8
}

/// Rewrite `rows` rows matching `condition` in place, returning the affected count
///
/// An empty page breaks the run only for `filtered` updates; an unfiltered
/// pass just runs past the end of a source that shrank after counting.
pub(crate) async fn update(
    ctx: &ImportContext<'_>,
    condition: Option<&Condition>,
    rows: u64,
    filtered: bool,
) -> SyncResult<u64> {
    let queries = page_queries(
        &ctx.columns.columns,
        ctx.source.table(),
        condition,
        &ctx.columns.update_sort_order(),
        rows,
        ctx.options.page_size,
    );
    let pages = queries.len();
    let ids = ctx.columns.id_columns();
    let assignable: Vec<&Column> = ctx.columns.assignable().collect();
    let ceiling = ctx.parameter_ceiling();

    let mut affected = 0u64;
    for (k, query) in queries.iter().enumerate() {
        let page = fetch_page(ctx, query, k, pages).await?;
        if page.is_empty() {
            if filtered {
                return Err(SyncError::invariant(
                    ctx.table(),
                    format!("update page {} of {pages} returned no rows", k + 1),
                ));
            }
            tracing::warn!(table = %ctx.table(), page = k + 1, pages, "update page returned no rows");
            continue;
        }
        let updates = update_queries(ctx, &page, &ids, &assignable);
        for batch in pack_updates(&updates, ceiling) {
            affected += ctx
                .target
                .batched_update(batch)
                .await
                .context(ctx.table(), "update target rows")?;
        }
        tracing::debug!(table = %ctx.table(), page = k + 1, pages, affected, "update page applied");
    }
    Ok(affected)
}

/// One statement per row, keyed by the identity columns
fn update_queries(ctx: &ImportContext<'_>, page: &DataTable, ids: &[Column], assignable: &[&Column]) -> Vec<UpdateQuery> {
    let table = ctx.target.table();
    page.rows
        .iter()
        .map(|row| {
            let assignments = assignable
                .iter()
                .filter_map(|c| {
                    page.value(row, &c.internal_name).map(|v| UpdateAssign {
                        column: (*c).clone(),
                        value: v.clone(),
                    })
                })
                .collect();
            let keys = ids
                .iter()
                .filter_map(|c| page.value(row, &c.internal_name).map(|v| Condition::eq(c.clone(), v.clone())));
            UpdateQuery::new(table.clone(), assignments, Some(Condition::and(keys)))
        })
        .collect()
}
