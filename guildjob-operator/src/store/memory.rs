//! In-memory store for tests
//!
//! Mimics the API server behaviour the operator depends on: resourceVersion
//! checks on replace, create-if-absent for Jobs, and finalizer-gated deletion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use guildjob_models::{GuildInteraction, LABEL_GUILD_ID};
use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;

use super::{ClusterStore, StoreError};

#[derive(Default)]
struct State {
    interactions: HashMap<String, GuildInteraction>,
    jobs: HashMap<String, Job>,
    next_version: u64,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create or overwrite an interaction as an operator would with `kubectl apply`
    pub fn apply_interaction(&self, mut interaction: GuildInteraction) -> GuildInteraction {
        let mut state = self.lock();
        interaction.metadata.resource_version = Some(state.bump());
        state
            .interactions
            .insert(interaction.name_any(), interaction.clone());
        interaction
    }

    /// Request deletion; the object lingers while it carries finalizers
    pub fn delete_interaction(&self, name: &str) {
        let mut state = self.lock();
        let version = state.bump();
        let Some(existing) = state.interactions.get_mut(name) else {
            return;
        };
        if existing.finalizers().is_empty() {
            state.interactions.remove(name);
        } else {
            existing.metadata.deletion_timestamp = Some(Time(now()));
            existing.metadata.resource_version = Some(version);
        }
    }

    pub fn interaction(&self, name: &str) -> Option<GuildInteraction> {
        self.lock().interactions.get(name).cloned()
    }

    pub fn job(&self, name: &str) -> Option<Job> {
        self.lock().jobs.get(name).cloned()
    }

    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().jobs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Insert a Job directly, bypassing create semantics
    pub fn put_job(&self, mut job: Job) {
        let mut state = self.lock();
        job.metadata.resource_version = Some(state.bump());
        state.jobs.insert(job.name_any(), job);
    }

    /// Set a condition of type `condition_type` to `True` on a stored Job
    pub fn set_job_condition(&self, name: &str, condition_type: &str) {
        let mut state = self.lock();
        if let Some(job) = state.jobs.get_mut(name) {
            let status = job.status.get_or_insert_with(JobStatus::default);
            status
                .conditions
                .get_or_insert_with(Vec::new)
                .push(JobCondition {
                    type_: condition_type.to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                });
        }
    }
}

fn now() -> k8s_openapi::chrono::DateTime<k8s_openapi::chrono::Utc> {
    k8s_openapi::chrono::Utc::now()
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn get_interaction(&self, name: &str) -> Result<Option<GuildInteraction>, StoreError> {
        Ok(self.interaction(name))
    }

    async fn list_interactions_for_guild(
        &self,
        guild_id: &str,
    ) -> Result<Vec<GuildInteraction>, StoreError> {
        let state = self.lock();
        let mut found: Vec<GuildInteraction> = state
            .interactions
            .values()
            .filter(|gi| gi.labels().get(LABEL_GUILD_ID).map(String::as_str) == Some(guild_id))
            .filter(|gi| gi.spec.guild_id == guild_id)
            .cloned()
            .collect();
        found.sort_by_key(|gi| gi.name_any());
        Ok(found)
    }

    async fn replace_interaction(
        &self,
        interaction: &GuildInteraction,
    ) -> Result<GuildInteraction, StoreError> {
        let name = interaction.name_any();
        let mut state = self.lock();
        let current_version = match state.interactions.get(&name) {
            Some(existing) => existing.metadata.resource_version.clone(),
            None => return Err(StoreError::NotFound(format!("GuildInteraction {}", name))),
        };
        if interaction.metadata.resource_version != current_version {
            return Err(StoreError::Conflict(format!("GuildInteraction {}", name)));
        }

        let mut updated = interaction.clone();
        updated.metadata.resource_version = Some(state.bump());
        if updated.metadata.deletion_timestamp.is_some() && updated.finalizers().is_empty() {
            state.interactions.remove(&name);
        } else {
            state.interactions.insert(name, updated.clone());
        }
        Ok(updated)
    }

    async fn get_job(&self, name: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.job(name))
    }

    async fn create_job(&self, job: &Job) -> Result<Job, StoreError> {
        let name = job.name_any();
        let mut state = self.lock();
        if state.jobs.contains_key(&name) {
            return Err(StoreError::AlreadyExists(format!("Job {}", name)));
        }
        let mut created = job.clone();
        created.metadata.resource_version = Some(state.bump());
        state.jobs.insert(name, created.clone());
        Ok(created)
    }

    async fn delete_job(&self, name: &str) -> Result<(), StoreError> {
        match self.lock().jobs.remove(name) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(format!("Job {}", name))),
        }
    }
}
