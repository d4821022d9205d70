//! Plans that passed every validator

use crate::plan::QueryPlan;

/// Where an accepted plan came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOrigin {
    /// Normalized candidate document
    Candidate,
    /// Rule template, by name
    Template(&'static str),
}

/// A frozen, accepted plan.
///
/// Constructible only inside the crate, after validation. There is no
/// mutable access to the wrapped plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPlan {
    plan: QueryPlan,
    origin: PlanOrigin,
}

impl ValidatedPlan {
    pub(crate) fn new(plan: QueryPlan, origin: PlanOrigin) -> Self {
        Self { plan, origin }
    }

    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    pub fn origin(&self) -> &PlanOrigin {
        &self.origin
    }

    pub fn into_plan(self) -> QueryPlan {
        self.plan
    }
}
