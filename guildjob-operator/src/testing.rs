//! Test doubles shared by this crate's tests and downstream crates

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use guildjob_models::{GuildInteraction, GuildInteractionSpec, InteractionAction};
use k8s_openapi::api::batch::v1::{Job, JobTemplateSpec};

use crate::discord::{DiscordApi, DiscordError};
use crate::store::{ClusterStore, MemoryStore, StoreError};

/// Build a `GuildInteraction` with `(name, pattern)` actions and an empty job template
pub fn interaction(name: &str, guild_id: &str, actions: &[(&str, &str)]) -> GuildInteraction {
    let spec = GuildInteractionSpec {
        guild_id: guild_id.to_string(),
        actions: actions
            .iter()
            .map(|(action, pattern)| InteractionAction {
                name: action.to_string(),
                pattern: pattern.to_string(),
                job_template: JobTemplateSpec::default(),
            })
            .collect(),
        commands: Vec::new(),
    };
    let mut gi = GuildInteraction::new(name, spec);
    gi.metadata.namespace = Some("default".to_string());
    gi
}

/// One call made against [`RecordingDiscord`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscordCall {
    List { guild_id: String },
    Register { guild_id: String, command: String },
    Delete { guild_id: String, command_id: String },
    Followup { token: String, content: String },
}

#[derive(Default)]
struct Recorded {
    calls: Vec<DiscordCall>,
    /// Registered commands as (guild, id, json)
    commands: Vec<(String, String, String)>,
    next_id: u64,
    fail_registry: bool,
    fail_followups: bool,
}

/// In-memory Discord that remembers registered commands and every call
#[derive(Default)]
pub struct RecordingDiscord {
    inner: Mutex<Recorded>,
}

impl RecordingDiscord {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn calls(&self) -> Vec<DiscordCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Commands currently registered in `guild_id`, in registration order
    pub fn registered(&self, guild_id: &str) -> Vec<String> {
        self.lock()
            .commands
            .iter()
            .filter(|(guild, _, _)| guild == guild_id)
            .map(|(_, _, json)| json.clone())
            .collect()
    }

    /// Pre-populate a command, as if registered by an earlier deployment
    pub fn seed_command(&self, guild_id: &str, command: &str) {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = format!("cmd-{}", inner.next_id);
        inner
            .commands
            .push((guild_id.to_string(), id, command.to_string()));
    }

    pub fn followups(&self) -> Vec<(String, String)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                DiscordCall::Followup { token, content } => Some((token.clone(), content.clone())),
                _ => None,
            })
            .collect()
    }

    /// Make command registry calls fail with a 500
    pub fn fail_registry(&self, fail: bool) {
        self.lock().fail_registry = fail;
    }

    pub fn fail_followups(&self) {
        self.lock().fail_followups = true;
    }
}

fn server_error() -> DiscordError {
    DiscordError::Status {
        status: 500,
        body: "injected failure".to_string(),
    }
}

#[async_trait]
impl DiscordApi for RecordingDiscord {
    async fn list_guild_commands(&self, guild_id: &str) -> Result<Vec<serde_json::Value>, DiscordError> {
        let mut inner = self.lock();
        inner.calls.push(DiscordCall::List {
            guild_id: guild_id.to_string(),
        });
        if inner.fail_registry {
            return Err(server_error());
        }
        Ok(inner
            .commands
            .iter()
            .filter(|(guild, _, _)| guild == guild_id)
            .map(|(_, id, _)| serde_json::json!({ "id": id }))
            .collect())
    }

    async fn register_guild_command(&self, guild_id: &str, command_json: &str) -> Result<(), DiscordError> {
        let mut inner = self.lock();
        inner.calls.push(DiscordCall::Register {
            guild_id: guild_id.to_string(),
            command: command_json.to_string(),
        });
        if inner.fail_registry {
            return Err(server_error());
        }
        inner.next_id += 1;
        let id = format!("cmd-{}", inner.next_id);
        inner
            .commands
            .push((guild_id.to_string(), id, command_json.to_string()));
        Ok(())
    }

    async fn delete_guild_command(&self, guild_id: &str, command_id: &str) -> Result<(), DiscordError> {
        let mut inner = self.lock();
        inner.calls.push(DiscordCall::Delete {
            guild_id: guild_id.to_string(),
            command_id: command_id.to_string(),
        });
        if inner.fail_registry {
            return Err(server_error());
        }
        inner
            .commands
            .retain(|(guild, id, _)| !(guild == guild_id && id == command_id));
        Ok(())
    }

    async fn send_followup(&self, interaction_token: &str, content: &str) -> Result<(), DiscordError> {
        let mut inner = self.lock();
        inner.calls.push(DiscordCall::Followup {
            token: interaction_token.to_string(),
            content: content.to_string(),
        });
        if inner.fail_followups {
            return Err(server_error());
        }
        Ok(())
    }
}

/// Misbehaviour injected by [`FaultyStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Interaction lookups sleep this long before answering
    SlowLookup(Duration),
    /// Interaction lookups panic
    PanicOnLookup,
    /// Job lookups fail with a Kubernetes API error
    FailGetJob,
    /// Job creation fails with a conflict
    FailCreateJob,
}

/// [`MemoryStore`] wrapper that injects one [`Fault`]
#[derive(Clone)]
pub struct FaultyStore {
    inner: MemoryStore,
    fault: Fault,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore, fault: Fault) -> Self {
        Self { inner, fault }
    }
}

fn api_error(code: u16) -> StoreError {
    StoreError::Kube(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: "injected failure".to_string(),
        reason: "InternalError".to_string(),
        code,
    }))
}

#[async_trait]
impl ClusterStore for FaultyStore {
    async fn get_interaction(&self, name: &str) -> Result<Option<GuildInteraction>, StoreError> {
        self.inner.get_interaction(name).await
    }

    async fn list_interactions_for_guild(
        &self,
        guild_id: &str,
    ) -> Result<Vec<GuildInteraction>, StoreError> {
        match self.fault {
            Fault::SlowLookup(delay) => tokio::time::sleep(delay).await,
            Fault::PanicOnLookup => panic!("injected panic looking up guild {}", guild_id),
            _ => {}
        }
        self.inner.list_interactions_for_guild(guild_id).await
    }

    async fn replace_interaction(
        &self,
        interaction: &GuildInteraction,
    ) -> Result<GuildInteraction, StoreError> {
        self.inner.replace_interaction(interaction).await
    }

    async fn get_job(&self, name: &str) -> Result<Option<Job>, StoreError> {
        if self.fault == Fault::FailGetJob {
            return Err(api_error(500));
        }
        self.inner.get_job(name).await
    }

    async fn create_job(&self, job: &Job) -> Result<Job, StoreError> {
        if self.fault == Fault::FailCreateJob {
            return Err(StoreError::Conflict(format!("Job {}", kube::ResourceExt::name_any(job))));
        }
        self.inner.create_job(job).await
    }

    async fn delete_job(&self, name: &str) -> Result<(), StoreError> {
        self.inner.delete_job(name).await
    }
}
