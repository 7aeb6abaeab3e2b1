//! Turning application command invocations into Jobs
//!
//! The webhook handler acknowledges an invocation immediately and hands it to
//! [`Dispatcher::dispatch`], which resolves the guild's `GuildInteraction`,
//! selects the first matching action, creates the Job under its dedup name, and
//! reports the result with exactly one follow-up message.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use guildjob_models::{
    GuildInteraction, InteractionAction, InteractionRequest, ANNOT_ACTION, ANNOT_CHANNEL_ID,
    ANNOT_INTERACTION, ANNOT_INTERACTION_TOKEN, LABEL_JOB,
};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::discord::DiscordApi;
use crate::names::job_name;
use crate::pattern::{self, PatternError, Value};
use crate::store::{ClusterStore, StoreError};

/// Default deadline for resolving and creating a Job
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

pub const MSG_QUEUED: &str = ":ok: job queued";
pub const MSG_ALREADY_RUNNING: &str = ":hourglass: already running";
pub const MSG_FAILED: &str = ":x: failed to queue the job";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no GuildInteraction routes guild '{0}'")]
    NoInteraction(String),

    #[error("{count} GuildInteractions route guild '{guild_id}'")]
    AmbiguousInteraction { guild_id: String, count: usize },

    #[error("no action of GuildInteraction '{0}' matches the invocation")]
    NoMatchingAction(String),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("job '{0}' is already running")]
    AlreadyRunning(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("dispatch task panicked")]
    Panicked,
}

/// Result of one dispatch, as reported to the invoking user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Queued { job_name: String },
    AlreadyRunning { job_name: String },
    Failed,
}

impl DispatchOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            DispatchOutcome::Queued { .. } => MSG_QUEUED,
            DispatchOutcome::AlreadyRunning { .. } => MSG_ALREADY_RUNNING,
            DispatchOutcome::Failed => MSG_FAILED,
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn ClusterStore>,
    discord: Arc<dyn DiscordApi>,
    namespace: String,
    timeout: Duration,
    /// Spawned dispatches, shared by every clone
    tasks: TaskTracker,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        discord: Arc<dyn DiscordApi>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            store,
            discord,
            namespace: namespace.into(),
            timeout: DEFAULT_DISPATCH_TIMEOUT,
            tasks: TaskTracker::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Spawn the background dispatch of one invocation
    ///
    /// The returned handle resolves after the follow-up message was attempted.
    pub fn dispatch(&self, request: InteractionRequest) -> JoinHandle<DispatchOutcome> {
        let dispatcher = self.clone();
        let span = tracing::info_span!(
            "dispatch",
            dispatch_id = %uuid::Uuid::new_v4(),
            guild_id = %request.guild_id,
            interaction_id = %request.id,
        );
        self.tasks
            .spawn(async move { dispatcher.run(request).await }.instrument(span))
    }

    /// Number of dispatches that have not finished yet
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Wait up to `grace` for spawned dispatches to send their follow-ups
    ///
    /// Returns `false` if some were still running when `grace` elapsed.
    /// Dispatches spawned afterwards are still tracked.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tasks.close();
        let drained = tokio::time::timeout(grace, self.tasks.wait()).await.is_ok();
        self.tasks.reopen();
        drained
    }

    async fn run(&self, request: InteractionRequest) -> DispatchOutcome {
        let attempt = AssertUnwindSafe(tokio::time::timeout(self.timeout, self.queue_job(&request)))
            .catch_unwind()
            .await;

        let result = match attempt {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DispatchError::Timeout(self.timeout)),
            Err(_) => Err(DispatchError::Panicked),
        };

        let outcome = match result {
            Ok(job_name) => {
                tracing::info!(job = %job_name, "Queued job");
                DispatchOutcome::Queued { job_name }
            }
            Err(DispatchError::AlreadyRunning(job_name)) => {
                tracing::info!(job = %job_name, "Job already running, not queued");
                DispatchOutcome::AlreadyRunning { job_name }
            }
            Err(e) => {
                tracing::error!(error = %e, data = %request.data, "Failed to queue job");
                DispatchOutcome::Failed
            }
        };

        if let Err(e) = self.discord.send_followup(&request.token, outcome.message()).await {
            tracing::error!(error = %e, message = outcome.message(), "Failed to send follow-up message");
        }

        outcome
    }

    /// Resolve, match, dedup and create; returns the created Job's name
    pub async fn queue_job(&self, request: &InteractionRequest) -> Result<String, DispatchError> {
        let interaction = self.resolve_interaction(&request.guild_id).await?;
        let interaction_name = interaction.name_any();

        let data = Value::from(request.data.clone());
        let action = pattern::select_action(&interaction.spec.actions, &data)?
            .ok_or_else(|| DispatchError::NoMatchingAction(interaction_name.clone()))?;
        tracing::debug!(interaction = %interaction_name, action = %action.name, "Matched action");

        let name = job_name(&interaction_name, &action.name);
        if self.store.get_job(&name).await?.is_some() {
            return Err(DispatchError::AlreadyRunning(name));
        }

        let job = build_job(&name, &self.namespace, &interaction_name, action, request);
        match self.store.create_job(&job).await {
            Ok(_) => Ok(name),
            // Lost the race against a concurrent dispatch of the same action
            Err(StoreError::AlreadyExists(_)) => Err(DispatchError::AlreadyRunning(name)),
            Err(e) => Err(e.into()),
        }
    }

    async fn resolve_interaction(&self, guild_id: &str) -> Result<GuildInteraction, DispatchError> {
        let mut found = self.store.list_interactions_for_guild(guild_id).await?;
        match found.len() {
            0 => Err(DispatchError::NoInteraction(guild_id.to_string())),
            1 => Ok(found.remove(0)),
            count => Err(DispatchError::AmbiguousInteraction {
                guild_id: guild_id.to_string(),
                count,
            }),
        }
    }
}

/// Instantiate an action's job template for one invocation
pub fn build_job(
    name: &str,
    namespace: &str,
    interaction_name: &str,
    action: &InteractionAction,
    request: &InteractionRequest,
) -> Job {
    let template = action.job_template.clone();
    let mut metadata: ObjectMeta = template.metadata.unwrap_or_default();
    metadata.name = Some(name.to_string());
    metadata.namespace = Some(namespace.to_string());
    metadata.generate_name = None;

    metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(LABEL_JOB.to_string(), "true".to_string());

    let annotations = metadata.annotations.get_or_insert_with(Default::default);
    annotations.insert(ANNOT_INTERACTION.to_string(), interaction_name.to_string());
    annotations.insert(ANNOT_ACTION.to_string(), action.name.clone());
    annotations.insert(ANNOT_INTERACTION_TOKEN.to_string(), request.token.clone());
    if !request.channel_id.is_empty() {
        annotations.insert(ANNOT_CHANNEL_ID.to_string(), request.channel_id.clone());
    }

    let mut spec: JobSpec = template.spec.unwrap_or_default();
    spec.template
        .spec
        .get_or_insert_with(Default::default)
        .restart_policy = Some("Never".to_string());

    Job {
        metadata,
        spec: Some(spec),
        status: None,
    }
}
