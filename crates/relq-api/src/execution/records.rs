//! Record helpers shared by both load strategies.

use relq_core::query::RelationInclude;
use relq_core::value::{composite_key, Node, Record, Value};
use std::collections::HashSet;

static NULL: Value = Value::Null;

/// Scalar entry of a record; NULL when missing or not a scalar
pub(crate) fn scalar<'r>(record: &'r Record, key: &str) -> &'r Value {
    record.get(key).and_then(Node::as_value).unwrap_or(&NULL)
}

/// Keep the first record for every combination of `columns`
pub(crate) fn distinct_by(records: Vec<Record>, columns: &[String]) -> Vec<Record> {
    if columns.is_empty() {
        return records;
    }
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(composite_key(columns.iter().map(|c| scalar(record, c)))))
        .collect()
}

/// Apply `skip` then `take`
pub(crate) fn slice(records: Vec<Record>, skip: Option<usize>, take: Option<usize>) -> Vec<Record> {
    records
        .into_iter()
        .skip(skip.unwrap_or(0))
        .take(take.unwrap_or(usize::MAX))
        .collect()
}

/// Relation-level `distinct`, `skip` and `take` over one owner's records. A
/// negative `take` keeps the last rows of the slice.
pub(crate) fn page_relation(records: Vec<Record>, include: &RelationInclude) -> Vec<Record> {
    let records = match &include.distinct {
        Some(columns) => distinct_by(records, columns),
        None => records,
    };
    match include.take {
        Some(take) if take < 0 => {
            let mut records = slice(records, include.skip, None);
            let keep = usize::try_from(take.unsigned_abs()).unwrap_or(usize::MAX);
            let start = records.len().saturating_sub(keep);
            records.drain(..start);
            records
        }
        take => slice(
            records,
            include.skip,
            take.map(|t| usize::try_from(t).unwrap_or(usize::MAX)),
        ),
    }
}

/// Node for a loaded relation: the full list for to-many relations, the
/// first record or NULL otherwise
pub(crate) fn relation_node(records: Vec<Record>, to_many: bool) -> Node {
    if to_many {
        Node::List(records)
    } else {
        records
            .into_iter()
            .next()
            .map(Node::Object)
            .unwrap_or(Node::Value(Value::Null))
    }
}

/// `fields` followed by every extra column not already present
pub(crate) fn with_hidden<'c>(
    fields: &[String],
    extra: impl IntoIterator<Item = &'c str>,
) -> Vec<String> {
    let mut columns = fields.to_vec();
    for column in extra {
        if !columns.iter().any(|c| c == column) {
            columns.push(column.to_string());
        }
    }
    columns
}

/// Drop every entry that is neither a selected field nor a loaded relation
pub(crate) fn strip_hidden<'n>(
    record: &mut Record,
    fields: &[String],
    relations: impl IntoIterator<Item = &'n str> + Clone,
) {
    record.retain(|key, _| {
        fields.iter().any(|f| f == key) || relations.clone().into_iter().any(|r| r == key)
    });
}
