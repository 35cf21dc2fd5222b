/// Join planner
///
/// Allocates one aliased join per requested relation traversal. Aliases come
/// from a counter owned by the planner, so one planner per execution keeps
/// every alias unique even when the same relation or table is joined twice.
use super::ast::{BinaryOperator, Expression, Join, JoinType, SelectStatement};
use crate::schema::{RelationDefinition, RelationKind, SchemaRegistry};
use std::collections::BTreeMap;
use tracing::debug;

/// One planned join
#[derive(Debug, Clone, PartialEq)]
pub struct JoinPlan {
    /// Owning relation name
    pub relation: String,
    pub definition: RelationDefinition,
    /// Qualifier of the table the relation starts from
    pub from_qualifier: String,
    pub target_table: String,
    /// Unique alias of the joined copy of `target_table`
    pub alias: String,
    pub join_type: JoinType,
    /// ON predicate over `from_qualifier` and `alias`
    pub condition: Expression,
}

impl JoinPlan {
    pub fn to_join(&self) -> Join {
        Join {
            join_type: self.join_type,
            table: self.target_table.clone(),
            alias: self.alias.clone(),
            condition: self.condition.clone(),
        }
    }
}

/// Relations joined into the current statement, by relation name, with the
/// joins nested beneath each of them.
pub type JoinedTables = BTreeMap<String, JoinedTable>;

/// A joined relation as seen by the descriptor compilers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinedTable {
    pub table: String,
    pub alias: String,
    pub nested: JoinedTables,
}

/// Accumulates join plans for one execution
#[derive(Debug)]
pub struct JoinPlanner<'a> {
    registry: &'a SchemaRegistry,
    counter: usize,
    joins: Vec<JoinPlan>,
}

impl<'a> JoinPlanner<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self {
            registry,
            counter: 0,
            joins: Vec::new(),
        }
    }

    /// Plan a join of `relation_name` starting at `from_table` (referenced as
    /// `from_qualifier`). Returns `None` for unknown relations and for
    /// many-to-many relations, which cannot be joined directly.
    pub fn add_join(
        &mut self,
        from_table: &str,
        from_qualifier: &str,
        relation_name: &str,
        join_type: JoinType,
    ) -> Option<&JoinPlan> {
        let Some(definition) = self.registry.get_relation(from_table, relation_name) else {
            debug!(table = from_table, relation = relation_name, "unknown relation, not joined");
            return None;
        };
        if definition.kind == RelationKind::ManyToMany {
            debug!(
                table = from_table,
                relation = relation_name,
                "many-to-many relation cannot be joined"
            );
            return None;
        }
        if self.registry.get_table(&definition.target_table).is_none() {
            return None;
        }

        self.counter += 1;
        let alias = format!("{}_{}", relation_name, self.counter);

        // Forward relations hold the key on the owning side and backward ones
        // on the target side; the registry stores both as from_field/to_field.
        let condition = Expression::binary(
            Expression::column(from_qualifier, &definition.from_field),
            BinaryOperator::Eq,
            Expression::column(&alias, &definition.to_field),
        );

        self.joins.push(JoinPlan {
            relation: relation_name.to_string(),
            definition: definition.clone(),
            from_qualifier: from_qualifier.to_string(),
            target_table: definition.target_table.clone(),
            alias,
            join_type,
            condition,
        });
        self.joins.last()
    }

    pub fn get_joins(&self) -> &[JoinPlan] {
        &self.joins
    }

    /// Attach every planned join to `statement`, in planning order
    pub fn apply(&self, statement: &mut SelectStatement) {
        statement
            .from
            .joins
            .extend(self.joins.iter().map(JoinPlan::to_join));
    }

    /// Forget accumulated joins and restart alias numbering
    pub fn clear(&mut self) {
        self.joins.clear();
        self.counter = 0;
    }
}
