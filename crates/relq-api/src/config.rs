//! Engine configuration

pub use relq_core::query::RelationLoadStrategy;

/// How the follow-up statements of one relation level are awaited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelationFetchMode {
    /// One statement at a time, in relation-name order
    #[default]
    Sequential,
    /// At most this many statements of a level in flight at once, polled
    /// on the calling task. Results keep relation-name order; 0 acts as 1.
    Concurrent(usize),
}

/// Engine-wide defaults applied to every query
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Strategy used when a descriptor does not name one
    pub default_strategy: RelationLoadStrategy,
    /// Scheduling of separate-query follow-ups
    pub relation_fetch: RelationFetchMode,
    /// Upper bound applied to `abs(take)`
    pub max_take: Option<usize>,
}

impl EngineConfig {
    /// Defaults: join strategy, sequential follow-ups, no take limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback relation load strategy
    pub fn with_default_strategy(mut self, strategy: RelationLoadStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// Set how follow-up relation queries are awaited
    pub fn with_relation_fetch(mut self, mode: RelationFetchMode) -> Self {
        self.relation_fetch = mode;
        self
    }

    /// Clamp every page size to `max_take` rows
    pub fn with_max_take(mut self, max_take: usize) -> Self {
        self.max_take = Some(max_take);
        self
    }

    /// Page size for a requested `take`: `abs(take)`, clamped
    pub(crate) fn page_size(&self, take: Option<i64>) -> Option<usize> {
        let requested = take.map(|t| usize::try_from(t.unsigned_abs()).unwrap_or(usize::MAX));
        match (requested, self.max_take) {
            (Some(n), Some(max)) => Some(n.min(max)),
            (None, Some(max)) => Some(max),
            (requested, None) => requested,
        }
    }
}
