//! Guarded query pipeline
//!
//! Candidate path:
//!
//! ```text
//! candidate -> AliasNormalizer -> JoinRepair -> SchemaValidator
//!           -> PermissionValidator -> SafetyValidator -> QueryExecutor
//! ```
//!
//! Template path: natural-language text -> RuleTemplateEngine ->
//! PermissionValidator -> SafetyValidator -> QueryExecutor. Template plans
//! are correct by construction and skip schema validation.
//!
//! Every rejection is logged with the request id of the attempt. No step
//! retries; a schema rejection may be answered by the caller with one
//! regenerated candidate.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::GuardConfig;
use crate::deployment::Deployment;
use crate::error::{GuardError, GuardResult};
use crate::executor::QueryExecutor;
use crate::normalize::{AliasNormalizer, JoinRepair};
use crate::observability::{Event, Logger};
use crate::plan::QueryPlan;
use crate::policy::{PermissionValidator, PolicySet};
use crate::safety::{sanitize_query, validate_natural_query, SafetyValidator};
use crate::schema::{SchemaCache, SchemaDescriptor, SchemaValidator};
use crate::store::DocumentStore;
use crate::templates::{infer_collection, ChartType, RuleTemplateEngine, VisualizationPlan};
use crate::validation::{PlanOrigin, Rejection, ValidatedPlan, ValidationOutcome};

const VISUALIZATION: &str = "visualization";

pub struct QueryGuard {
    store: RwLock<Arc<dyn DocumentStore>>,
    deployment: Arc<Deployment>,
    config: GuardConfig,
    schemas: SchemaCache,
    normalizer: AliasNormalizer,
    joins: JoinRepair,
    templates: RuleTemplateEngine,
    permissions: PermissionValidator,
    safety: SafetyValidator,
    executor: QueryExecutor,
}

impl QueryGuard {
    pub fn new(store: Arc<dyn DocumentStore>, deployment: Deployment, config: GuardConfig) -> Self {
        let deployment = Arc::new(deployment);
        Self {
            schemas: SchemaCache::new(store.database(), &config),
            normalizer: AliasNormalizer::new(Arc::clone(&deployment)),
            joins: JoinRepair::new(Arc::clone(&deployment)),
            templates: RuleTemplateEngine::new(Arc::clone(&deployment), config.template_result_cap),
            permissions: PermissionValidator::new(config.default_policy_max_limit),
            safety: SafetyValidator::new(),
            executor: QueryExecutor::new(Arc::clone(&deployment), &config),
            store: RwLock::new(store),
            deployment,
            config,
        }
    }

    /// Replace the template engine, e.g. to use other field names
    pub fn with_templates(mut self, templates: RuleTemplateEngine) -> Self {
        self.templates = templates;
        self
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn schemas(&self) -> &SchemaCache {
        &self.schemas
    }

    pub fn templates(&self) -> &RuleTemplateEngine {
        &self.templates
    }

    /// Current store. The lock is released before any store call.
    async fn store(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&*self.store.read().await)
    }

    pub async fn database(&self) -> String {
        self.store().await.database().to_string()
    }

    /// Sample every collection of the bound database into the schema cache
    pub async fn preload(&self) {
        let store = self.store().await;
        let catalog = self.schemas.catalog(store.as_ref()).await;
        self.schemas.preload_all(store.as_ref(), &catalog).await;
    }

    /// Bind another database. The schema cache is replaced wholesale and
    /// preloaded before this returns.
    pub async fn switch_database(&self, store: Arc<dyn DocumentStore>) {
        let database = store.database().to_string();
        {
            let mut current = self.store.write().await;
            *current = store;
        }
        self.schemas.rebind(&database).await;
        self.preload().await;
    }

    /// Schema of `collection` in the bound database
    pub async fn describe(&self, collection: &str) -> Arc<SchemaDescriptor> {
        let store = self.store().await;
        self.schemas.describe(store.as_ref(), collection).await
    }

    /// Collection the text is about, among the bound database's collections
    pub async fn infer_collection(&self, text: &str) -> Option<String> {
        let store = self.store().await;
        let catalog = self.schemas.catalog(store.as_ref()).await;
        infer_collection(text, &catalog)
    }

    /// Normalize, repair and validate an untrusted candidate document
    pub async fn prepare(
        &self,
        candidate: &Value,
        policies: Option<&PolicySet>,
        collection_hint: Option<&str>,
    ) -> GuardResult<ValidatedPlan> {
        let request_id = Uuid::new_v4().to_string();
        Logger::event(
            Event::PlanReceived,
            &[
                ("hint", collection_hint.unwrap_or("")),
                ("request_id", request_id.as_str()),
            ],
        );

        let mut plan = self.normalizer.normalize_candidate(candidate, collection_hint)?;
        // A corrected join alias exposes names the first pass could not rename.
        if self.joins.repair(&mut plan) > 0 {
            plan = self.normalizer.normalize(plan);
        }

        let store = self.store().await;
        let catalog = self.schemas.catalog(store.as_ref()).await;
        let schema_validator = SchemaValidator::new().with_catalog(&catalog);
        check(
            schema_validator.check_collection(&plan.collection),
            Event::SchemaRejected,
            &request_id,
            &plan,
        )?;
        let schema = self.schemas.describe(store.as_ref(), &plan.collection).await;
        check(
            schema_validator.validate(&plan, &schema),
            Event::SchemaRejected,
            &request_id,
            &plan,
        )?;

        self.authorize(plan, store.database(), policies, &request_id, PlanOrigin::Candidate)
    }

    /// Match `text` against the template catalogue.
    ///
    /// `Ok(None)` means no template fired and the candidate path should be
    /// used. A matched plan still passes permission and safety checks.
    pub async fn prepare_template(
        &self,
        text: &str,
        policies: Option<&PolicySet>,
        collection_hint: Option<&str>,
    ) -> GuardResult<Option<ValidatedPlan>> {
        let request_id = Uuid::new_v4().to_string();
        let text = self.screen(text, &request_id)?;

        let Some(matched) = self.templates.match_query(&text, collection_hint) else {
            return Ok(None);
        };
        Logger::event(
            Event::TemplateMatched,
            &[
                ("collection", matched.plan.collection.as_str()),
                ("request_id", request_id.as_str()),
                ("template", matched.name),
            ],
        );

        let store = self.store().await;
        self.authorize(
            matched.plan,
            store.database(),
            policies,
            &request_id,
            PlanOrigin::Template(matched.name),
        )
        .map(Some)
    }

    /// Chart plan for `text`, checked like a template plan
    pub async fn prepare_visualization(
        &self,
        text: &str,
        chart_type: ChartType,
        policies: Option<&PolicySet>,
        collection_hint: Option<&str>,
    ) -> GuardResult<(VisualizationPlan, ValidatedPlan)> {
        let request_id = Uuid::new_v4().to_string();
        let text = self.screen(text, &request_id)?;

        let chart = self.templates.visualization(&text, chart_type, collection_hint);
        Logger::event(
            Event::TemplateMatched,
            &[
                ("collection", chart.plan.collection.as_str()),
                ("request_id", request_id.as_str()),
                ("template", VISUALIZATION),
            ],
        );

        let store = self.store().await;
        let validated = self.authorize(
            chart.plan.clone(),
            store.database(),
            policies,
            &request_id,
            PlanOrigin::Template(VISUALIZATION),
        )?;
        Ok((chart, validated))
    }

    pub async fn execute(&self, plan: &ValidatedPlan) -> GuardResult<Vec<Value>> {
        let store = self.store().await;
        Ok(self.executor.execute(store.as_ref(), plan).await?)
    }

    /// Prepare and execute a candidate
    pub async fn run(
        &self,
        candidate: &Value,
        policies: Option<&PolicySet>,
        collection_hint: Option<&str>,
    ) -> GuardResult<Vec<Value>> {
        let plan = self.prepare(candidate, policies, collection_hint).await?;
        self.execute(&plan).await
    }

    fn screen(&self, text: &str, request_id: &str) -> GuardResult<String> {
        let text = sanitize_query(text);
        if let Err(e) = validate_natural_query(&text, self.config.max_query_length) {
            Logger::event(
                Event::InputRejected,
                &[("reason", e.to_string().as_str()), ("request_id", request_id)],
            );
            return Err(e.into());
        }
        Ok(text)
    }

    /// Permission, then safety. Safety runs whether or not a policy applies.
    fn authorize(
        &self,
        plan: QueryPlan,
        database: &str,
        policies: Option<&PolicySet>,
        request_id: &str,
        origin: PlanOrigin,
    ) -> GuardResult<ValidatedPlan> {
        check(
            self.permissions.validate(&plan, policies, Some(database)),
            Event::PolicyDenied,
            request_id,
            &plan,
        )?;
        check(self.safety.validate(&plan), Event::SafetyViolation, request_id, &plan)?;
        Ok(ValidatedPlan::new(plan, origin))
    }
}

/// Log a rejection under `event` and turn it into a `GuardError`
fn check(
    outcome: ValidationOutcome,
    event: Event,
    request_id: &str,
    plan: &QueryPlan,
) -> GuardResult<()> {
    outcome.map_err(|rejection: Rejection| {
        Logger::event(
            event,
            &[
                ("code", rejection.code().as_str()),
                ("collection", plan.collection.as_str()),
                ("message", rejection.message()),
                ("operation", plan.operation.as_str()),
                ("request_id", request_id),
            ],
        );
        GuardError::Rejected(rejection)
    })
}
