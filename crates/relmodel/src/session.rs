//! Cascade sessions.
//!
//! A [`CascadeSession`] pairs a resolved descriptor store with a persistence
//! client and runs the plan-then-execute cycle for each save or remove call.
//!
//! # Example
//!
//! ```rust,ignore
//! use relmodel::prelude::*;
//!
//! let store = Arc::new(resolve(&RawSchema::from_json(SCHEMA)?)?);
//! let session = CascadeSession::builder(store)
//!     .planner_config(PlannerConfig::new().max_depth(64))
//!     .build_with(client);
//!
//! let q = graph.add("Question", [("title", "Why?")]);
//! let outcome = session.save(&cx, &mut graph, q).await;
//! ```

use std::sync::Arc;

use asupersync::{Cx, Outcome};
use relmodel_core::{Error, RelationDescriptorStore, Result};
use relmodel_query::EagerLoader;
use relmodel_session::{
    CascadeExecutor, CascadePlanner, ExecutorConfig, InstanceGraph, InstanceId, PersistenceClient,
    PersistencePlan, PersistenceResult, PlanMode, PlannerConfig,
};

/// Plans and executes cascades against one store and one client.
///
/// The store is shared and never mutated, so sessions built from the same
/// `Arc` can run concurrently. Each call borrows the instance graph
/// exclusively for its plan and execute cycle.
#[derive(Debug)]
pub struct CascadeSession<P: PersistenceClient> {
    store: Arc<RelationDescriptorStore>,
    client: P,
    planner: PlannerConfig,
    executor: ExecutorConfig,
}

impl<P: PersistenceClient> CascadeSession<P> {
    /// Create a session with default planner and executor settings.
    pub fn new(store: Arc<RelationDescriptorStore>, client: P) -> Self {
        Self {
            store,
            client,
            planner: PlannerConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }

    #[must_use]
    pub fn builder(store: Arc<RelationDescriptorStore>) -> CascadeSessionBuilder {
        CascadeSessionBuilder::new(store)
    }

    pub fn store(&self) -> &RelationDescriptorStore {
        &self.store
    }

    pub fn client(&self) -> &P {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut P {
        &mut self.client
    }

    /// Consume the session and return the persistence client.
    pub fn into_client(self) -> P {
        self.client
    }

    fn planner(&self) -> CascadePlanner<'_> {
        CascadePlanner::with_config(&self.store, self.planner)
    }

    /// Plan a save of `root` without executing it.
    pub fn plan_save(&self, graph: &InstanceGraph, root: InstanceId) -> Result<PersistencePlan> {
        self.planner().plan(graph, root, PlanMode::Save)
    }

    /// Plan a remove of `root` without executing it.
    pub fn plan_remove(&self, graph: &InstanceGraph, root: InstanceId) -> Result<PersistencePlan> {
        self.planner().plan(graph, root, PlanMode::Remove)
    }

    /// Save `root` and everything its relations cascade to.
    pub async fn save(
        &self,
        cx: &Cx,
        graph: &mut InstanceGraph,
        root: InstanceId,
    ) -> Outcome<PersistenceResult, Error> {
        match self.plan_save(graph, root) {
            Ok(plan) => {
                tracing::debug!(ops = plan.len(), "Planned save");
                self.execute(cx, &plan, graph).await
            }
            Err(e) => {
                tracing::debug!(error = %e, "Save planning failed");
                Outcome::Err(e)
            }
        }
    }

    /// Remove `root` and everything its relations cascade to.
    pub async fn remove(
        &self,
        cx: &Cx,
        graph: &mut InstanceGraph,
        root: InstanceId,
    ) -> Outcome<PersistenceResult, Error> {
        match self.plan_remove(graph, root) {
            Ok(plan) => {
                tracing::debug!(ops = plan.len(), "Planned remove");
                self.execute(cx, &plan, graph).await
            }
            Err(e) => {
                tracing::debug!(error = %e, "Remove planning failed");
                Outcome::Err(e)
            }
        }
    }

    /// Execute a previously computed plan.
    pub async fn execute(
        &self,
        cx: &Cx,
        plan: &PersistencePlan,
        graph: &mut InstanceGraph,
    ) -> Outcome<PersistenceResult, Error> {
        let mut executor = CascadeExecutor::with_config(self.executor);
        executor
            .execute(cx, plan, &self.store, graph, &self.client)
            .await
    }

    /// Start a load plan for the entity type called `entity`.
    pub fn eager_loader(&self, entity: &str) -> Result<EagerLoader<'_>> {
        EagerLoader::by_name(&self.store, entity)
    }
}

/// Builder for [`CascadeSession`].
#[derive(Debug, Clone)]
pub struct CascadeSessionBuilder {
    store: Arc<RelationDescriptorStore>,
    planner: PlannerConfig,
    executor: ExecutorConfig,
}

impl CascadeSessionBuilder {
    pub fn new(store: Arc<RelationDescriptorStore>) -> Self {
        Self {
            store,
            planner: PlannerConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }

    #[must_use]
    pub fn planner_config(mut self, config: PlannerConfig) -> Self {
        self.planner = config;
        self
    }

    #[must_use]
    pub fn executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor = config;
        self
    }

    /// Build the session around `client`.
    pub fn build_with<P: PersistenceClient>(self, client: P) -> CascadeSession<P> {
        CascadeSession {
            store: self.store,
            client,
            planner: self.planner,
            executor: self.executor,
        }
    }
}
