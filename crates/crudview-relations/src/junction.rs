//! Junction-table rows and link/unlink operations.

use crudview_core::{Cx, Error, Filter, JunctionInfo, Outcome, RelationStore, Row, Value};
use std::collections::HashSet;

/// One `(owner key, target key)` row of a junction table.
///
/// Keys are normalized on construction, so rows built from form strings and
/// rows read back from storage compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JunctionRow {
    pub owner: Value,
    pub target: Value,
}

impl JunctionRow {
    pub fn new(owner: impl Into<Value>, target: impl Into<Value>) -> Self {
        Self {
            owner: owner.into().normalized_key(),
            target: target.into().normalized_key(),
        }
    }

    /// Read a junction row; `None` when either column is missing.
    pub fn from_row(row: &Row, junction: &JunctionInfo) -> Option<Self> {
        let owner = row.get_by_name(&junction.owner_column)?;
        let target = row.get_by_name(&junction.target_column)?;
        Some(Self::new(owner.clone(), target.clone()))
    }

    pub fn to_columns(&self, junction: &JunctionInfo) -> Vec<(String, Value)> {
        vec![
            (junction.owner_column.clone(), self.owner.clone()),
            (junction.target_column.clone(), self.target.clone()),
        ]
    }

    /// Filter selecting exactly this row.
    pub fn filter(&self, junction: &JunctionInfo) -> Filter {
        Filter::eq(junction.owner_column.as_str(), self.owner.clone())
            .and_eq(junction.target_column.as_str(), self.target.clone())
    }
}

/// A pending junction-table write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOp {
    /// Insert the row.
    Link(JunctionRow),
    /// Delete the row.
    Unlink(JunctionRow),
}

impl LinkOp {
    pub fn row(&self) -> &JunctionRow {
        match self {
            LinkOp::Link(row) | LinkOp::Unlink(row) => row,
        }
    }

    pub fn is_link(&self) -> bool {
        matches!(self, LinkOp::Link(_))
    }

    pub fn is_unlink(&self) -> bool {
        matches!(self, LinkOp::Unlink(_))
    }

    /// Execute this operation against `junction`.
    #[tracing::instrument(level = "debug", skip(cx, store))]
    pub async fn execute<S: RelationStore>(
        &self,
        cx: &Cx,
        store: &S,
        junction: &JunctionInfo,
    ) -> Outcome<(), Error> {
        match self {
            LinkOp::Link(row) => {
                tracing::trace!(table = %junction.table, owner = %row.owner, target = %row.target, "Link");
                store
                    .insert(cx, &junction.table, &junction.owner_column, &row.to_columns(junction))
                    .await
                    .map(|_| ())
            }
            LinkOp::Unlink(row) => {
                tracing::trace!(table = %junction.table, owner = %row.owner, target = %row.target, "Unlink");
                store
                    .delete(cx, &junction.table, &row.filter(junction))
                    .await
                    .map(|_| ())
            }
        }
    }
}

/// Operations turning `old` into `new`: links first, then unlinks.
///
/// Rows present in both are left alone, and duplicates within `new` produce a
/// single link.
pub fn diff(old: &[JunctionRow], new: &[JunctionRow]) -> Vec<LinkOp> {
    let old_set: HashSet<&JunctionRow> = old.iter().collect();
    let new_set: HashSet<&JunctionRow> = new.iter().collect();
    let mut linked = HashSet::new();
    let links = new
        .iter()
        .filter(|row| !old_set.contains(row) && linked.insert(*row))
        .cloned()
        .map(LinkOp::Link);
    let mut unlinked = HashSet::new();
    let unlinks = old
        .iter()
        .filter(|row| !new_set.contains(row) && unlinked.insert(*row))
        .cloned()
        .map(LinkOp::Unlink);
    links.chain(unlinks).collect()
}

/// Execute a batch of link operations, returning `(linked, unlinked)`.
#[tracing::instrument(level = "debug", skip(cx, store, ops))]
pub async fn execute_link_ops<S: RelationStore>(
    cx: &Cx,
    store: &S,
    junction: &JunctionInfo,
    ops: &[LinkOp],
) -> Outcome<(usize, usize), Error> {
    if ops.is_empty() {
        return Outcome::Ok((0, 0));
    }

    tracing::debug!(count = ops.len(), table = %junction.table, "Executing link operations");

    let (mut linked, mut unlinked) = (0, 0);
    for op in ops {
        match op.execute(cx, store, junction).await {
            Outcome::Ok(()) if op.is_link() => linked += 1,
            Outcome::Ok(()) => unlinked += 1,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    }
    Outcome::Ok((linked, unlinked))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(pairs: &[(i64, i64)]) -> Vec<JunctionRow> {
        pairs.iter().map(|&(o, t)| JunctionRow::new(o, t)).collect()
    }

    #[test]
    fn keys_are_normalized() {
        assert_eq!(JunctionRow::new("7", "2"), JunctionRow::new(7_i64, 2_i64));
    }

    #[test]
    fn diff_links_before_unlinks() {
        let old = rows(&[(7, 1), (7, 2), (7, 3)]);
        let new = rows(&[(7, 2), (7, 3), (7, 4)]);
        let ops = diff(&old, &new);
        assert_eq!(
            ops,
            vec![
                LinkOp::Link(JunctionRow::new(7_i64, 4_i64)),
                LinkOp::Unlink(JunctionRow::new(7_i64, 1_i64)),
            ]
        );
    }

    #[test]
    fn diff_of_identical_sets_is_empty() {
        let old = rows(&[(1, 1), (1, 2)]);
        let new = rows(&[(1, 2), (1, 1)]);
        assert!(diff(&old, &new).is_empty());
    }

    #[test]
    fn duplicate_new_rows_link_once() {
        let ops = diff(&[], &rows(&[(1, 5), (1, 5)]));
        assert_eq!(ops.len(), 1);
        assert!(ops[0].is_link());
    }

    #[test]
    fn row_maps_onto_junction_columns() {
        let info = JunctionInfo::new("post_tag", "post_id", "tag_id");
        let row = JunctionRow::new(7_i64, 4_i64);
        assert_eq!(
            row.to_columns(&info),
            vec![
                ("post_id".to_string(), Value::BigInt(7)),
                ("tag_id".to_string(), Value::BigInt(4)),
            ]
        );
        let stored = Row::new(
            vec!["post_id".into(), "tag_id".into()],
            vec![Value::BigInt(7), Value::BigInt(4)],
        );
        assert_eq!(JunctionRow::from_row(&stored, &info), Some(row));
    }
}
