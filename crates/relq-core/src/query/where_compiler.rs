/// Where compiler
///
/// Turns a filter tree into a predicate over one table. Column keys become
/// comparisons; relation keys recurse into the target table, either against
/// the relation's join alias or, when the relation is not joined, as a
/// correlated EXISTS subquery. Unknown keys and operators that do not apply to
/// a column's type are dropped.
use super::args::{FieldCondition, FilterValue, NotFilter, QueryMode, WhereInput};
use super::ast::{BinaryOperator, Expression, SelectStatement};
use super::join_planner::{JoinedTables, JoinedTable};
use crate::schema::{ColumnDef, ColumnType, RelationDefinition, SchemaRegistry, TableMetadata};
use crate::value::Value;
use std::cell::Cell;
use tracing::debug;

/// Compiles [`WhereInput`] trees against the registry
#[derive(Debug)]
pub struct WhereCompiler<'a> {
    registry: &'a SchemaRegistry,
    subqueries: Cell<usize>,
}

impl<'a> WhereCompiler<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self {
            registry,
            subqueries: Cell::new(0),
        }
    }

    /// Compile `filter` for `table`, whose columns are referenced through
    /// `qualifier`. Returns `None` when nothing constrains the rows.
    pub fn compile(
        &self,
        table: &str,
        qualifier: &str,
        filter: Option<&WhereInput>,
        joined: &JoinedTables,
    ) -> Option<Expression> {
        let filter = filter?;
        let Some(meta) = self.registry.get_table(table) else {
            debug!(table, "filter on unknown table dropped");
            return None;
        };
        self.compile_node(meta, qualifier, filter, joined)
    }

    fn compile_node(
        &self,
        meta: &TableMetadata,
        qualifier: &str,
        filter: &WhereInput,
        joined: &JoinedTables,
    ) -> Option<Expression> {
        let mut parts = Vec::new();

        for (key, value) in &filter.fields {
            if let Some(column) = meta.column(key) {
                parts.extend(self.compile_field(column, qualifier, value));
            } else if let Some(relation) = meta.relation(key) {
                parts.extend(self.compile_relation(meta, qualifier, relation, value, joined));
            } else {
                debug!(table = %meta.name, key = %key, "unknown filter key dropped");
            }
        }

        parts.extend(Expression::conjunction(
            filter
                .and
                .iter()
                .filter_map(|child| self.compile_node(meta, qualifier, child, joined)),
        ));

        if !filter.or.is_empty() {
            let branches: Vec<Option<Expression>> = filter
                .or
                .iter()
                .map(|child| self.compile_node(meta, qualifier, child, joined))
                .collect();
            // An unconstrained branch makes the whole disjunction true
            if branches.iter().all(Option::is_some) {
                parts.extend(Expression::disjunction(branches.into_iter().flatten()));
            }
        }

        parts.extend(
            filter
                .not
                .iter()
                .filter_map(|child| self.compile_node(meta, qualifier, child, joined))
                .map(Expression::negate),
        );

        Expression::conjunction(parts)
    }

    fn compile_field(
        &self,
        column: &ColumnDef,
        qualifier: &str,
        value: &FilterValue,
    ) -> Option<Expression> {
        let target = Expression::column(qualifier, &column.name);
        match value {
            FilterValue::Literal(Value::Null) => Some(is_null(target, false)),
            FilterValue::Literal(literal) => Some(Expression::binary(
                target,
                BinaryOperator::Eq,
                Expression::Literal(literal.clone()),
            )),
            FilterValue::Condition(condition) => compile_condition(column, target, condition),
            FilterValue::Relation(_) => {
                debug!(column = %column.name, "nested filter object on a scalar column dropped");
                None
            }
        }
    }

    fn compile_relation(
        &self,
        owner: &TableMetadata,
        qualifier: &str,
        relation: &RelationDefinition,
        value: &FilterValue,
        joined: &JoinedTables,
    ) -> Option<Expression> {
        let FilterValue::Relation(inner) = value else {
            debug!(
                table = %owner.name,
                relation = %relation.name,
                "relation filter must be a filter object, dropped"
            );
            return None;
        };

        if let Some(JoinedTable { table, alias, nested }) = joined.get(&relation.name) {
            return self.compile(table, alias, Some(inner), nested);
        }

        let target = self.registry.get_table(&relation.target_table)?;
        Some(self.exists_subquery(qualifier, relation, target, inner))
    }

    /// `EXISTS (SELECT * FROM target WHERE target.to = outer.from AND ...)`,
    /// hopping through the junction table for many-to-many relations
    fn exists_subquery(
        &self,
        qualifier: &str,
        relation: &RelationDefinition,
        target: &TableMetadata,
        inner: &WhereInput,
    ) -> Expression {
        let target_alias = self.next_alias(&relation.name);
        let mut target_stmt = SelectStatement::from_table(&target.name).with_alias(&target_alias);
        if let Some(predicate) = self.compile_node(target, &target_alias, inner, &JoinedTables::new())
        {
            target_stmt.and_where(predicate);
        }

        match &relation.through {
            None => {
                target_stmt.and_where(Expression::binary(
                    Expression::column(&target_alias, &relation.to_field),
                    BinaryOperator::Eq,
                    Expression::column(qualifier, &relation.from_field),
                ));
                Expression::Exists(Box::new(target_stmt))
            }
            Some(through) => {
                let junction_alias = self.next_alias(&through.table);
                target_stmt.and_where(Expression::binary(
                    Expression::column(&target_alias, &relation.to_field),
                    BinaryOperator::Eq,
                    Expression::column(&junction_alias, &through.to_column),
                ));
                let mut junction_stmt =
                    SelectStatement::from_table(&through.table).with_alias(&junction_alias);
                junction_stmt.and_where(Expression::binary(
                    Expression::column(&junction_alias, &through.from_column),
                    BinaryOperator::Eq,
                    Expression::column(qualifier, &relation.from_field),
                ));
                junction_stmt.and_where(Expression::Exists(Box::new(target_stmt)));
                Expression::Exists(Box::new(junction_stmt))
            }
        }
    }

    fn next_alias(&self, base: &str) -> String {
        let n = self.subqueries.get() + 1;
        self.subqueries.set(n);
        format!("{}_sq{}", base, n)
    }
}

fn is_null(target: Expression, negated: bool) -> Expression {
    Expression::IsNull {
        expr: Box::new(target),
        negated,
    }
}

fn supports_range(column_type: ColumnType) -> bool {
    matches!(
        column_type,
        ColumnType::Text | ColumnType::Integer | ColumnType::Float | ColumnType::Timestamp
    )
}

fn supports_membership(column_type: ColumnType) -> bool {
    !matches!(column_type, ColumnType::Boolean | ColumnType::Json)
}

fn compile_condition(
    column: &ColumnDef,
    target: Expression,
    condition: &FieldCondition,
) -> Option<Expression> {
    let column_type = column.column_type;
    let mut parts = Vec::new();
    let dropped = |operator: &str| {
        debug!(
            column = %column.name,
            column_type = ?column_type,
            operator,
            "operator does not apply to column type, dropped"
        );
    };

    if let Some(flag) = condition.is_null {
        parts.push(is_null(target.clone(), !flag));
    }
    if let Some(flag) = condition.is_not_null {
        parts.push(is_null(target.clone(), flag));
    }

    if let Some(value) = &condition.equals {
        parts.push(equality(target.clone(), value, false));
    }

    match &condition.not {
        Some(NotFilter::Value(value)) => parts.push(equality(target.clone(), value, true)),
        Some(NotFilter::Condition(inner)) => {
            if let Some(expr) = compile_condition(column, target.clone(), inner) {
                parts.push(expr.negate());
            }
        }
        None => {}
    }

    for (operator, values, negated) in [
        ("in", &condition.in_list, false),
        ("notIn", &condition.not_in, true),
    ] {
        let Some(values) = values else { continue };
        if !supports_membership(column_type) {
            dropped(operator);
            continue;
        }
        if values.is_empty() {
            // IN () matches nothing; NOT IN () matches everything
            if !negated {
                parts.push(Expression::literal(false));
            }
            continue;
        }
        parts.push(Expression::In {
            expr: Box::new(target.clone()),
            values: values.clone(),
            negated,
        });
    }

    for (operator, value, op) in [
        ("lt", &condition.lt, BinaryOperator::Lt),
        ("lte", &condition.lte, BinaryOperator::Le),
        ("gt", &condition.gt, BinaryOperator::Gt),
        ("gte", &condition.gte, BinaryOperator::Ge),
    ] {
        let Some(value) = value else { continue };
        if !supports_range(column_type) {
            dropped(operator);
            continue;
        }
        parts.push(Expression::binary(
            target.clone(),
            op,
            Expression::Literal(value.clone()),
        ));
    }

    let case_insensitive = condition.mode == Some(QueryMode::Insensitive);
    for (operator, needle, pattern) in [
        ("contains", &condition.contains, like_pattern(&condition.contains, true, true)),
        ("startsWith", &condition.starts_with, like_pattern(&condition.starts_with, false, true)),
        ("endsWith", &condition.ends_with, like_pattern(&condition.ends_with, true, false)),
    ] {
        if needle.is_none() {
            continue;
        }
        if column_type != ColumnType::Text {
            dropped(operator);
            continue;
        }
        if let Some(pattern) = pattern {
            parts.push(Expression::Like {
                expr: Box::new(target.clone()),
                pattern,
                case_insensitive,
            });
        }
    }

    Expression::conjunction(parts)
}

fn equality(target: Expression, value: &Value, negated: bool) -> Expression {
    if value.is_null() {
        return is_null(target, negated);
    }
    let op = if negated {
        BinaryOperator::Ne
    } else {
        BinaryOperator::Eq
    };
    Expression::binary(target, op, Expression::Literal(value.clone()))
}

/// LIKE pattern with `\` escaping of the needle's own wildcards
fn like_pattern(needle: &Option<String>, leading: bool, trailing: bool) -> Option<String> {
    let needle = needle.as_ref()?;
    let mut pattern = String::with_capacity(needle.len() + 2);
    if leading {
        pattern.push('%');
    }
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    if trailing {
        pattern.push('%');
    }
    Some(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RelationDefinition, TableDef, ThroughTable};
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::from_catalog(&[
            TableDef::new("Class")
                .column(ColumnDef::text("id").primary_key())
                .column(ColumnDef::text("name"))
                .column(ColumnDef::integer("seats"))
                .column(ColumnDef::boolean("active"))
                .column(ColumnDef::timestamp("startsAt").nullable()),
            TableDef::new("ClassSession")
                .column(ColumnDef::text("id").primary_key())
                .column(ColumnDef::text("classId").references("Class", "id"))
                .column(ColumnDef::text("title")),
            TableDef::new("Student").column(ColumnDef::text("id").primary_key()),
            TableDef::new("Enrollment")
                .column(ColumnDef::text("classId"))
                .column(ColumnDef::text("studentId")),
        ]);
        registry
            .define_relation(
                "Class",
                RelationDefinition::many_to_many(
                    "students",
                    "Student",
                    "id",
                    "id",
                    ThroughTable {
                        table: "Enrollment".to_string(),
                        from_column: "classId".to_string(),
                        to_column: "studentId".to_string(),
                    },
                ),
            )
            .unwrap();
        registry
    }

    fn compile(filter: serde_json::Value, joined: &JoinedTables) -> Option<String> {
        let registry = registry();
        let filter: WhereInput = serde_json::from_value(filter).unwrap();
        WhereCompiler::new(&registry)
            .compile("Class", "Class", Some(&filter), joined)
            .map(|e| e.to_string())
    }

    #[test]
    fn test_empty_filter_compiles_to_nothing() {
        assert_eq!(compile(json!({}), &JoinedTables::new()), None);
        let registry = registry();
        assert!(WhereCompiler::new(&registry)
            .compile("Class", "Class", None, &JoinedTables::new())
            .is_none());
    }

    #[test]
    fn test_literals_and_null() {
        assert_eq!(
            compile(json!({"id": "c1", "startsAt": null}), &JoinedTables::new()).unwrap(),
            "((Class.id = 'c1') AND Class.startsAt IS NULL)"
        );
    }

    #[test]
    fn test_operators_are_anded() {
        assert_eq!(
            compile(json!({"seats": {"gte": 2, "lt": 10}}), &JoinedTables::new()).unwrap(),
            "((Class.seats < 10) AND (Class.seats >= 2))"
        );
    }

    #[test]
    fn test_string_operators() {
        assert_eq!(
            compile(
                json!({"name": {"contains": "50%", "mode": "insensitive"}}),
                &JoinedTables::new()
            )
            .unwrap(),
            "LOWER(Class.name) LIKE LOWER('%50\\%%')"
        );
        assert_eq!(
            compile(json!({"name": {"startsWith": "Ru"}}), &JoinedTables::new()).unwrap(),
            "Class.name LIKE 'Ru%'"
        );
    }

    #[test]
    fn test_inapplicable_operators_dropped() {
        assert_eq!(
            compile(json!({"seats": {"contains": "1"}}), &JoinedTables::new()),
            None
        );
        assert_eq!(
            compile(json!({"active": {"gt": true, "equals": true}}), &JoinedTables::new())
                .unwrap(),
            "(Class.active = true)"
        );
    }

    #[test]
    fn test_membership() {
        assert_eq!(
            compile(json!({"id": {"in": ["a", "b"]}}), &JoinedTables::new()).unwrap(),
            "Class.id IN ('a', 'b')"
        );
        assert_eq!(
            compile(json!({"id": {"in": []}}), &JoinedTables::new()).unwrap(),
            "false"
        );
        assert_eq!(compile(json!({"id": {"notIn": []}}), &JoinedTables::new()), None);
    }

    #[test]
    fn test_null_tests_and_not() {
        assert_eq!(
            compile(json!({"startsAt": {"isNotNull": true}}), &JoinedTables::new()).unwrap(),
            "Class.startsAt IS NOT NULL"
        );
        assert_eq!(
            compile(json!({"name": {"not": "x"}}), &JoinedTables::new()).unwrap(),
            "(Class.name <> 'x')"
        );
        assert_eq!(
            compile(json!({"name": {"not": null}}), &JoinedTables::new()).unwrap(),
            "Class.name IS NOT NULL"
        );
    }

    #[test]
    fn test_combinators() {
        assert_eq!(
            compile(
                json!({"OR": [{"id": "a"}, {"id": "b"}], "NOT": {"name": "x"}}),
                &JoinedTables::new()
            )
            .unwrap(),
            "(((Class.id = 'a') OR (Class.id = 'b')) AND NOT ((Class.name = 'x')))"
        );
        assert_eq!(
            compile(json!({"OR": [{"id": "a"}, {}]}), &JoinedTables::new()),
            None
        );
        assert_eq!(compile(json!({"AND": []}), &JoinedTables::new()), None);
    }

    #[test]
    fn test_unknown_keys_dropped() {
        assert_eq!(
            compile(json!({"nope": 1, "id": "c1"}), &JoinedTables::new()).unwrap(),
            "(Class.id = 'c1')"
        );
    }

    #[test]
    fn test_joined_relation_uses_alias() {
        let mut joined = JoinedTables::new();
        joined.insert(
            "classSessions".to_string(),
            JoinedTable {
                table: "ClassSession".to_string(),
                alias: "classSessions_1".to_string(),
                nested: JoinedTables::new(),
            },
        );
        assert_eq!(
            compile(json!({"classSessions": {"title": "Intro"}}), &joined).unwrap(),
            "(classSessions_1.title = 'Intro')"
        );
    }

    #[test]
    fn test_unjoined_relation_becomes_exists() {
        assert_eq!(
            compile(json!({"classSessions": {"title": "Intro"}}), &JoinedTables::new()).unwrap(),
            "EXISTS (SELECT * FROM ClassSession AS classSessions_sq1 WHERE \
             ((classSessions_sq1.title = 'Intro') AND (classSessions_sq1.classId = Class.id)))"
        );
    }

    #[test]
    fn test_many_to_many_exists_goes_through_junction() {
        let sql = compile(json!({"students": {"id": "s1"}}), &JoinedTables::new()).unwrap();
        assert!(sql.starts_with("EXISTS (SELECT * FROM Enrollment AS Enrollment_sq2"));
        assert!(sql.contains("(Enrollment_sq2.classId = Class.id)"));
        assert!(sql.contains("(students_sq1.id = Enrollment_sq2.studentId)"));
    }
}
