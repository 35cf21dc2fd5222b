/// Query descriptors
///
/// Data-only inputs accepted by the engine: filter trees, ordering specs,
/// selection trees and the argument bundles of the facade operations. Every
/// type deserializes from camelCase JSON so descriptors can be taken verbatim
/// from an outer surface.
use super::ast::{JoinType, NullsOrder, OrderDirection};
use crate::value::Value;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// Filter tree: boolean combinators plus column or relation keyed filters
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WhereInput {
    #[serde(rename = "AND", default, deserialize_with = "one_or_many")]
    pub and: Vec<WhereInput>,
    #[serde(rename = "OR", default, deserialize_with = "one_or_many")]
    pub or: Vec<WhereInput>,
    #[serde(rename = "NOT", default, deserialize_with = "one_or_many")]
    pub not: Vec<WhereInput>,
    /// Keyed by column name or relation name
    #[serde(flatten)]
    pub fields: BTreeMap<String, FilterValue>,
}

impl WhereInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a keyed filter
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.and.is_empty() && self.or.is_empty() && self.not.is_empty() && self.fields.is_empty()
    }
}

/// Value attached to a filter key
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// Equality, or IS NULL for `null`
    Literal(Value),
    /// Operator object
    Condition(Box<FieldCondition>),
    /// Filter on a related table
    Relation(Box<WhereInput>),
}

macro_rules! literal_filter_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for FilterValue {
                fn from(value: $ty) -> Self {
                    FilterValue::Literal(value.into())
                }
            }
        )*
    };
}

literal_filter_from!(Value, &str, String, i64, i32, f64, bool);

impl From<FieldCondition> for FilterValue {
    fn from(condition: FieldCondition) -> Self {
        FilterValue::Condition(Box::new(condition))
    }
}

impl From<WhereInput> for FilterValue {
    fn from(filter: WhereInput) -> Self {
        FilterValue::Relation(Box::new(filter))
    }
}

/// Typed operator object for a single column. Only the operators present
/// contribute; they are ANDed together.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FieldCondition {
    #[serde(default, deserialize_with = "present")]
    pub equals: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub not: Option<NotFilter>,
    #[serde(rename = "in")]
    pub in_list: Option<Vec<Value>>,
    pub not_in: Option<Vec<Value>>,
    pub lt: Option<Value>,
    pub lte: Option<Value>,
    pub gt: Option<Value>,
    pub gte: Option<Value>,
    pub contains: Option<String>,
    pub starts_with: Option<String>,
    pub ends_with: Option<String>,
    pub mode: Option<QueryMode>,
    pub is_null: Option<bool>,
    pub is_not_null: Option<bool>,
}

/// Operand of `not`: a literal or a nested operator object
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum NotFilter {
    Value(Value),
    Condition(Box<FieldCondition>),
}

/// String matching mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    #[default]
    Default,
    Insensitive,
}

/// One ordering entry or a list of them; list entries keep caller priority
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OrderByInput {
    Many(Vec<OrderEntry>),
    One(OrderEntry),
}

impl OrderByInput {
    pub fn entries(&self) -> &[OrderEntry] {
        match self {
            OrderByInput::Many(entries) => entries,
            OrderByInput::One(entry) => std::slice::from_ref(entry),
        }
    }

    /// Single-key ordering
    pub fn by(key: impl Into<String>, direction: OrderDirection) -> Self {
        OrderByInput::One(OrderEntry(vec![(key.into(), OrderValue::Direction(direction))]))
    }
}

/// Ordered `key -> order` pairs of one ordering object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderEntry(pub Vec<(String, OrderValue)>);

impl<'de> Deserialize<'de> for OrderEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntryVisitor;

        impl<'de> Visitor<'de> for EntryVisitor {
            type Value = OrderEntry;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an ordering object")
            }

            fn visit_map<A>(self, mut map: A) -> Result<OrderEntry, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut pairs = Vec::new();
                while let Some((key, value)) = map.next_entry::<String, OrderValue>()? {
                    pairs.push((key, value));
                }
                Ok(OrderEntry(pairs))
            }
        }

        deserializer.deserialize_map(EntryVisitor)
    }
}

/// Order for one key: a direction, an extended config, or (for a joined
/// relation) a nested ordering object
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OrderValue {
    Direction(OrderDirection),
    Extended(SortSpec),
    Nested(OrderEntry),
}

/// `{ sort, nulls }`
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SortSpec {
    pub sort: OrderDirection,
    #[serde(default)]
    pub nulls: Option<NullsOrder>,
}

/// Selection tree keyed by column or relation name
pub type SelectInput = BTreeMap<String, SelectValue>;

/// Columns to drop from the scalar set (`true` drops)
pub type OmitInput = BTreeMap<String, bool>;

/// Primary-key values marking the exclusive paging bound
pub type CursorInput = BTreeMap<String, Value>;

/// Selection entry: a flag, or a nested relation config
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SelectValue {
    Flag(bool),
    Relation(Box<RelationArgs>),
}

/// Per-relation load configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationArgs {
    pub select: Option<SelectInput>,
    pub include: Option<SelectInput>,
    pub omit: Option<OmitInput>,
    #[serde(rename = "where")]
    pub filter: Option<WhereInput>,
    pub order_by: Option<OrderByInput>,
    pub take: Option<i64>,
    pub skip: Option<usize>,
    pub distinct: Option<Vec<String>>,
    pub join_kind: Option<JoinType>,
}

/// How relations are loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationLoadStrategy {
    /// One joined statement, denormalized in memory
    #[default]
    Join,
    /// Base statement plus one batched statement per relation
    Query,
}

/// Arguments of `find_many`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindManyArgs {
    pub select: Option<SelectInput>,
    pub include: Option<SelectInput>,
    pub omit: Option<OmitInput>,
    pub relation_load_strategy: Option<RelationLoadStrategy>,
    #[serde(rename = "where")]
    pub filter: Option<WhereInput>,
    pub order_by: Option<OrderByInput>,
    pub cursor: Option<CursorInput>,
    /// Negative values page backwards from the cursor
    pub take: Option<i64>,
    pub skip: Option<usize>,
    pub distinct: Option<Vec<String>>,
}

impl FindManyArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_where(mut self, filter: WhereInput) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_order_by(mut self, order_by: OrderByInput) -> Self {
        self.order_by = Some(order_by);
        self
    }

    pub fn with_take(mut self, take: i64) -> Self {
        self.take = Some(take);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_strategy(mut self, strategy: RelationLoadStrategy) -> Self {
        self.relation_load_strategy = Some(strategy);
        self
    }

    /// Include a relation with its default selection
    pub fn include(mut self, relation: impl Into<String>) -> Self {
        self.include
            .get_or_insert_with(BTreeMap::new)
            .insert(relation.into(), SelectValue::Flag(true));
        self
    }
}

/// Arguments of `find_unique`; `where` is expected to identify one row
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindUniqueArgs {
    #[serde(rename = "where")]
    pub filter: WhereInput,
    pub select: Option<SelectInput>,
    pub include: Option<SelectInput>,
    pub omit: Option<OmitInput>,
    pub relation_load_strategy: Option<RelationLoadStrategy>,
}

impl From<FindUniqueArgs> for FindManyArgs {
    fn from(args: FindUniqueArgs) -> Self {
        FindManyArgs {
            select: args.select,
            include: args.include,
            omit: args.omit,
            relation_load_strategy: args.relation_load_strategy,
            filter: Some(args.filter),
            ..Default::default()
        }
    }
}

/// Arguments of `count`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CountArgs {
    #[serde(rename = "where")]
    pub filter: Option<WhereInput>,
}

/// Keeps an explicit `null` as `Some`, so `{"equals": null}` stays a null test
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Accepts either a single item or a list of them
fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    match OneOrMany::deserialize(deserializer) {
        Ok(OneOrMany::Many(items)) => Ok(items),
        Ok(OneOrMany::One(item)) => Ok(vec![item]),
        Err(_) => Err(de::Error::custom("expected a filter object or a list of them")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_where_shapes() {
        let filter: WhereInput = serde_json::from_value(json!({
            "id": "c1",
            "deletedAt": null,
            "status": {"in": ["active", "paused"]},
            "sessions": {"title": {"startsWith": "In", "mode": "insensitive"}},
            "OR": {"name": "x"}
        }))
        .unwrap();

        assert_eq!(filter.fields["id"], FilterValue::Literal(Value::from("c1")));
        assert_eq!(filter.fields["deletedAt"], FilterValue::Literal(Value::Null));
        match &filter.fields["status"] {
            FilterValue::Condition(c) => {
                assert_eq!(c.in_list.as_ref().unwrap().len(), 2);
            }
            other => panic!("expected condition, got {:?}", other),
        }
        match &filter.fields["sessions"] {
            FilterValue::Relation(inner) => match &inner.fields["title"] {
                FilterValue::Condition(c) => {
                    assert_eq!(c.starts_with.as_deref(), Some("In"));
                    assert_eq!(c.mode, Some(QueryMode::Insensitive));
                }
                other => panic!("expected condition, got {:?}", other),
            },
            other => panic!("expected relation filter, got {:?}", other),
        }
        assert_eq!(filter.or.len(), 1);
    }

    #[test]
    fn test_nested_not() {
        let filter: WhereInput =
            serde_json::from_value(json!({"age": {"not": {"gt": 3}}})).unwrap();
        match &filter.fields["age"] {
            FilterValue::Condition(c) => match c.not.as_ref().unwrap() {
                NotFilter::Condition(inner) => assert_eq!(inner.gt, Some(Value::Integer(3))),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_explicit_null_operands() {
        let filter: WhereInput =
            serde_json::from_value(json!({"a": {"equals": null}, "b": {"not": null}})).unwrap();
        match (&filter.fields["a"], &filter.fields["b"]) {
            (FilterValue::Condition(a), FilterValue::Condition(b)) => {
                assert_eq!(a.equals, Some(Value::Null));
                assert_eq!(b.not, Some(NotFilter::Value(Value::Null)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_order_by_shapes() {
        let order: OrderByInput = serde_json::from_value(json!([
            {"createdAt": "desc"},
            {"score": {"sort": "asc", "nulls": "last"}},
            {"author": {"name": "asc"}}
        ]))
        .unwrap();
        let entries = order.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[0].0[0],
            ("createdAt".to_string(), OrderValue::Direction(OrderDirection::Desc))
        );
        assert_eq!(
            entries[1].0[0].1,
            OrderValue::Extended(SortSpec {
                sort: OrderDirection::Asc,
                nulls: Some(NullsOrder::Last)
            })
        );
        assert!(matches!(entries[2].0[0].1, OrderValue::Nested(_)));

        let single: OrderByInput = serde_json::from_value(json!({"id": "asc"})).unwrap();
        assert_eq!(single.entries().len(), 1);
    }

    #[test]
    fn test_find_many_args() {
        let args: FindManyArgs = serde_json::from_value(json!({
            "where": {"id": "c1"},
            "include": {"sessions": true, "mentor": {"select": {"name": true}, "joinKind": "inner"}},
            "omit": {"name": true},
            "relationLoadStrategy": "query",
            "cursor": {"id": "c0"},
            "take": -2,
            "skip": 1,
            "distinct": ["name"]
        }))
        .unwrap();

        assert_eq!(args.relation_load_strategy, Some(RelationLoadStrategy::Query));
        assert_eq!(args.take, Some(-2));
        let include = args.include.unwrap();
        assert_eq!(include["sessions"], SelectValue::Flag(true));
        match &include["mentor"] {
            SelectValue::Relation(rel) => {
                assert_eq!(rel.join_kind, Some(JoinType::Inner));
                assert!(rel.select.as_ref().unwrap().contains_key("name"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_builders() {
        let args = FindManyArgs::new()
            .with_where(WhereInput::new().field("id", "c1"))
            .include("sessions")
            .with_take(3);
        assert_eq!(args.take, Some(3));
        assert!(args.include.unwrap().contains_key("sessions"));
        assert!(!args.filter.unwrap().is_empty());
    }
}
