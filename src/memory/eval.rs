use super::MemoryRow;
use crate::core::{Result, RouterError, Value};
use crate::query::{Direction, Filter, FindQuery, OrderBy, UpdateQuery};
use std::cmp::Ordering;

static NULL: Value = Value::Null;

fn column<'a>(row: &'a MemoryRow, name: &str) -> &'a Value {
    row.get(name).unwrap_or(&NULL)
}

// NULL never satisfies a comparison.
fn compare_column(row: &MemoryRow, name: &str, target: &Value) -> Result<Option<Ordering>> {
    let value = column(row, name);
    if value.is_null() || target.is_null() {
        return Ok(None);
    }
    value.compare(target).map(Some)
}

pub(crate) fn matches(filter: &Filter, row: &MemoryRow) -> Result<bool> {
    Ok(match filter {
        Filter::Eq(name, target) => compare_column(row, name, target)? == Some(Ordering::Equal),
        Filter::Ne(name, target) => {
            matches!(compare_column(row, name, target)?, Some(Ordering::Less | Ordering::Greater))
        }
        Filter::Gt(name, target) => compare_column(row, name, target)? == Some(Ordering::Greater),
        Filter::Gte(name, target) => matches!(
            compare_column(row, name, target)?,
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Filter::Lt(name, target) => compare_column(row, name, target)? == Some(Ordering::Less),
        Filter::Lte(name, target) => matches!(
            compare_column(row, name, target)?,
            Some(Ordering::Less | Ordering::Equal)
        ),
        Filter::In(name, targets) => {
            let mut found = false;
            for target in targets {
                if compare_column(row, name, target)? == Some(Ordering::Equal) {
                    found = true;
                    break;
                }
            }
            found
        }
        Filter::IsNull(name) => column(row, name).is_null(),
        Filter::And(parts) => {
            for part in parts {
                if !matches(part, row)? {
                    return Ok(false);
                }
            }
            true
        }
        Filter::Or(parts) => {
            for part in parts {
                if matches(part, row)? {
                    return Ok(true);
                }
            }
            false
        }
        Filter::Sql { clause, .. } => {
            return Err(RouterError::UnsupportedOperation(format!(
                "memory engine cannot evaluate raw SQL clause '{}'",
                clause
            )));
        }
    })
}

fn filtered<'a>(rows: &'a [MemoryRow], filter: Option<&Filter>) -> Result<Vec<&'a MemoryRow>> {
    let mut matched = Vec::new();
    for row in rows {
        if filter.map_or(Ok(true), |filter| matches(filter, row))? {
            matched.push(row);
        }
    }
    Ok(matched)
}

fn compare_rows(a: &MemoryRow, b: &MemoryRow, order_by: &[OrderBy]) -> Result<Ordering> {
    for order in order_by {
        let ordering = column(a, &order.column).compare(column(b, &order.column))?;
        let ordering = match order.direction {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return Ok(ordering);
        }
    }
    Ok(Ordering::Equal)
}

/// Comparator over rows that agrees with `order_by`, for merging sorted
/// shard results. Values of incompatible types compare as equal.
pub fn row_order(order_by: Vec<OrderBy>) -> impl Fn(&MemoryRow, &MemoryRow) -> Ordering + Send + Sync + 'static {
    move |a, b| compare_rows(a, b, &order_by).unwrap_or(Ordering::Equal)
}

pub(crate) fn select(rows: &[MemoryRow], query: &FindQuery) -> Result<Vec<MemoryRow>> {
    let mut matched = filtered(rows, query.filter.as_ref())?;

    if !query.order_by.is_empty() {
        let mut sort_error = None;
        matched.sort_by(|a, b| {
            compare_rows(a, b, &query.order_by).unwrap_or_else(|err| {
                sort_error.get_or_insert(err);
                Ordering::Equal
            })
        });
        if let Some(err) = sort_error {
            return Err(err);
        }
    }

    let limit = query.limit.unwrap_or(usize::MAX);
    Ok(matched
        .into_iter()
        .skip(query.offset)
        .take(limit)
        .map(|row| project(row, &query.columns))
        .collect())
}

fn project(row: &MemoryRow, columns: &[String]) -> MemoryRow {
    if columns.is_empty() {
        return row.clone();
    }
    columns
        .iter()
        .map(|name| (name.clone(), column(row, name).clone()))
        .collect()
}

pub(crate) fn count(rows: &[MemoryRow], query: &FindQuery) -> Result<usize> {
    Ok(filtered(rows, query.filter.as_ref())?.len())
}

pub(crate) fn apply_update(rows: &mut [MemoryRow], update: &UpdateQuery) -> Result<u64> {
    let mut affected = 0;
    for row in rows.iter_mut() {
        if update.filter.as_ref().map_or(Ok(true), |filter| matches(filter, row))? {
            for (name, value) in &update.assignments {
                row.insert(name.clone(), value.clone());
            }
            affected += 1;
        }
    }
    Ok(affected)
}
