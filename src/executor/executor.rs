//! Query executor
//!
//! Runs validated plans against a document store:
//! 1. Coerce filter, projection, sort and stages to native values
//! 2. Apply the default and maximum result limits
//! 3. Run the find or aggregate
//! 4. Convert results to transport JSON
//! 5. Enrich with display names, when enabled

use std::sync::Arc;

use bson::{doc, Document};
use serde_json::Value;

use crate::config::GuardConfig;
use crate::deployment::Deployment;
use crate::observability::{Event, Logger};
use crate::plan::{Operation, QueryPlan};
use crate::store::convert::document_to_json;
use crate::store::{DocumentStore, FindRequest};
use crate::validation::{PlanOrigin, ValidatedPlan};

use super::coerce::Coercer;
use super::enrich::enrich_results;
use super::errors::{ExecutorError, ExecutorResult};

/// Executes validated plans. Only `ValidatedPlan` is accepted, so nothing
/// that skipped validation reaches the store.
pub struct QueryExecutor {
    deployment: Arc<Deployment>,
    coercer: Coercer,
    default_limit: i64,
    max_limit: i64,
    enrich: bool,
}

impl QueryExecutor {
    pub fn new(deployment: Arc<Deployment>, config: &GuardConfig) -> Self {
        Self {
            coercer: Coercer::new(&deployment),
            deployment,
            default_limit: config.default_find_limit,
            max_limit: config.max_find_limit,
            enrich: config.enrich_results,
        }
    }

    /// Effective result limit of `plan`
    pub fn effective_limit(&self, plan: &QueryPlan) -> i64 {
        plan.limit.unwrap_or(self.default_limit).min(self.max_limit)
    }

    pub async fn execute(
        &self,
        store: &dyn DocumentStore,
        validated: &ValidatedPlan,
    ) -> ExecutorResult<Vec<Value>> {
        let plan = validated.plan();
        let origin = match validated.origin() {
            PlanOrigin::Candidate => "candidate",
            PlanOrigin::Template(name) => *name,
        };

        let documents = match self.run(store, plan).await {
            Ok(documents) => documents,
            Err(e) => {
                Logger::event(
                    Event::ExecutionFailed,
                    &[
                        ("code", e.code()),
                        ("collection", plan.collection.as_str()),
                        ("error", e.to_string().as_str()),
                        ("operation", plan.operation.as_str()),
                        ("origin", origin),
                    ],
                );
                return Err(e);
            }
        };

        let mut results: Vec<Value> = documents.iter().map(document_to_json).collect();
        if self.enrich && !results.is_empty() {
            results = enrich_results(store, &self.deployment, &plan.collection, results).await;
        }

        Logger::event(
            Event::PlanExecuted,
            &[
                ("collection", plan.collection.as_str()),
                ("operation", plan.operation.as_str()),
                ("origin", origin),
                ("results", results.len().to_string().as_str()),
            ],
        );
        Ok(results)
    }

    async fn run(&self, store: &dyn DocumentStore, plan: &QueryPlan) -> ExecutorResult<Vec<Document>> {
        match &plan.operation {
            Operation::Find => {
                let request = FindRequest {
                    filter: self.coercer.document(&plan.filter),
                    projection: plan.projection.as_ref().map(|p| self.coercer.document(p)),
                    sort: plan.sort.as_ref().map(|s| self.coercer.document(s)),
                    limit: Some(self.effective_limit(plan)),
                };
                Ok(store.find(&plan.collection, request).await?)
            }
            Operation::Aggregate => {
                let stages = self.stages(plan)?;
                Ok(store.aggregate(&plan.collection, stages).await?)
            }
            other => Err(ExecutorError::UnsupportedOperation(other.as_str().to_string())),
        }
    }

    fn stages(&self, plan: &QueryPlan) -> ExecutorResult<Vec<Document>> {
        let mut stages = Vec::with_capacity(plan.pipeline.len() + 1);
        for (index, stage) in plan.pipeline.iter().enumerate() {
            match stage {
                Value::Object(map) => stages.push(self.coercer.document(map)),
                _ => return Err(ExecutorError::InvalidStage(index)),
            }
        }
        if plan.limit.is_some() {
            stages.push(doc! {"$limit": self.effective_limit(plan)});
        }
        Ok(stages)
    }
}
