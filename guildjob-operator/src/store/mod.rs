//! Access to the cluster resources the operator reads and writes
//!
//! Reconcilers and the dispatcher only see [`ClusterStore`]; the kube-backed
//! implementation lives in [`k8s`], the in-memory one in `memory`.

use async_trait::async_trait;
use guildjob_models::GuildInteraction;
use k8s_openapi::api::batch::v1::Job;
use thiserror::Error;

pub mod k8s;
#[cfg(any(test, feature = "testing"))]
pub mod memory;

pub use k8s::{get_k8s_client, KubeStore};
#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("conflicting update of {0}")]
    Conflict(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Namespaced view of `GuildInteraction` and `Job` resources
#[async_trait]
pub trait ClusterStore: Send + Sync + 'static {
    async fn get_interaction(&self, name: &str) -> Result<Option<GuildInteraction>, StoreError>;

    /// Interactions labelled with, and routing for, `guild_id`
    async fn list_interactions_for_guild(
        &self,
        guild_id: &str,
    ) -> Result<Vec<GuildInteraction>, StoreError>;

    /// Write back a modified interaction; fails with `Conflict` if it changed since it was read
    async fn replace_interaction(
        &self,
        interaction: &GuildInteraction,
    ) -> Result<GuildInteraction, StoreError>;

    async fn get_job(&self, name: &str) -> Result<Option<Job>, StoreError>;

    /// Create a Job; fails with `AlreadyExists` if the name is taken
    async fn create_job(&self, job: &Job) -> Result<Job, StoreError>;

    /// Delete a Job and, in the background, its pods
    async fn delete_job(&self, name: &str) -> Result<(), StoreError>;
}
