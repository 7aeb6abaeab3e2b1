//! Kubernetes-backed store

use async_trait::async_trait;
use guildjob_models::{GuildInteraction, LABEL_GUILD_ID};
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, ResourceExt};

use super::{ClusterStore, StoreError};

/// Get a Kubernetes client from the in-cluster or kubeconfig environment
pub async fn get_k8s_client() -> Result<Client, StoreError> {
    Ok(Client::try_default().await?)
}

#[derive(Clone)]
pub struct KubeStore {
    interactions: Api<GuildInteraction>,
    jobs: Api<Job>,
}

impl KubeStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            interactions: Api::namespaced(client.clone(), namespace),
            jobs: Api::namespaced(client, namespace),
        }
    }
}

fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == code)
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_interaction(&self, name: &str) -> Result<Option<GuildInteraction>, StoreError> {
        Ok(self.interactions.get_opt(name).await?)
    }

    async fn list_interactions_for_guild(
        &self,
        guild_id: &str,
    ) -> Result<Vec<GuildInteraction>, StoreError> {
        let selector = format!("{}={}", LABEL_GUILD_ID, guild_id);
        let list = self
            .interactions
            .list(&ListParams::default().labels(&selector))
            .await?;

        // The label can lag behind `spec.guildId` until the next sync
        Ok(list
            .items
            .into_iter()
            .filter(|gi| gi.spec.guild_id == guild_id)
            .collect())
    }

    async fn replace_interaction(
        &self,
        interaction: &GuildInteraction,
    ) -> Result<GuildInteraction, StoreError> {
        let name = interaction.name_any();
        match self
            .interactions
            .replace(&name, &PostParams::default(), interaction)
            .await
        {
            Ok(updated) => Ok(updated),
            Err(e) if is_status(&e, 404) => Err(StoreError::NotFound(format!("GuildInteraction {}", name))),
            Err(e) if is_status(&e, 409) => Err(StoreError::Conflict(format!("GuildInteraction {}", name))),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_job(&self, name: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.get_opt(name).await?)
    }

    async fn create_job(&self, job: &Job) -> Result<Job, StoreError> {
        match self.jobs.create(&PostParams::default(), job).await {
            Ok(created) => Ok(created),
            Err(e) if is_status(&e, 409) => Err(StoreError::AlreadyExists(format!("Job {}", job.name_any()))),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_job(&self, name: &str) -> Result<(), StoreError> {
        match self.jobs.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(StoreError::NotFound(format!("Job {}", name))),
            Err(e) => Err(e.into()),
        }
    }
}
