//! Reconcilers and their `kube::runtime::Controller` wiring
//!
//! Both reconcilers take an object name and refetch through [`ClusterStore`],
//! so they can be driven by the controller runtime or directly from tests.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use guildjob_models::{GuildInteraction, LABEL_JOB};
use k8s_openapi::api::batch::v1::Job;
use kube::runtime::controller::Action;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client, ResourceExt};
use thiserror::Error;

use crate::discord::{DiscordApi, DiscordError};
use crate::store::{ClusterStore, StoreError};

pub mod interactions;
pub mod jobs;

/// Backoff applied after a failed reconciliation
pub const ERROR_REQUEUE: Duration = Duration::from_secs(10);

/// Delay before re-evaluating an object the reconciler just updated
pub const UPDATE_REQUEUE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum Error {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("Discord API error: {0}")]
    Discord(#[from] DiscordError),

    #[error("command {index} is not valid YAML or JSON: {source}")]
    InvalidCommand {
        index: usize,
        source: serde_yaml::Error,
    },

    #[error("command {index} has a mapping key that is not a scalar")]
    UnsupportedCommand { index: usize },

    #[error("failed to encode command {index}: {source}")]
    EncodeCommand {
        index: usize,
        source: serde_json::Error,
    },
}

/// What the controller should do after a successful pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing left to do until the object changes
    Done,
    /// The object was updated and must be evaluated again
    Requeue,
}

impl ReconcileOutcome {
    pub fn into_action(self) -> Action {
        match self {
            ReconcileOutcome::Done => Action::await_change(),
            ReconcileOutcome::Requeue => Action::requeue(UPDATE_REQUEUE),
        }
    }
}

/// Shared state handed to every reconciliation
pub struct Context {
    pub store: Arc<dyn ClusterStore>,
    pub discord: Arc<dyn DiscordApi>,
}

impl Context {
    pub fn new(store: Arc<dyn ClusterStore>, discord: Arc<dyn DiscordApi>) -> Self {
        Self { store, discord }
    }
}

// ============================================================================
// Controller runtime
// ============================================================================

async fn reconcile_interaction(
    interaction: Arc<GuildInteraction>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    interactions::reconcile(&interaction.name_any(), &ctx)
        .await
        .map(ReconcileOutcome::into_action)
}

async fn reconcile_job(job: Arc<Job>, ctx: Arc<Context>) -> Result<Action, Error> {
    jobs::reconcile(&job.name_any(), &ctx)
        .await
        .map(ReconcileOutcome::into_action)
}

fn interaction_error_policy(interaction: Arc<GuildInteraction>, error: &Error, _ctx: Arc<Context>) -> Action {
    tracing::warn!(
        interaction = %interaction.name_any(),
        error = %error,
        "Interaction reconcile failed, retrying in {:?}",
        ERROR_REQUEUE
    );
    Action::requeue(ERROR_REQUEUE)
}

fn job_error_policy(job: Arc<Job>, error: &Error, _ctx: Arc<Context>) -> Action {
    tracing::warn!(
        job = %job.name_any(),
        error = %error,
        "Job reconcile failed, retrying in {:?}",
        ERROR_REQUEUE
    );
    Action::requeue(ERROR_REQUEUE)
}

/// Run the interaction and Job controllers until `shutdown` resolves
pub async fn run<F>(client: Client, namespace: &str, ctx: Arc<Context>, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let shutdown = shutdown.shared();

    let interactions: Api<GuildInteraction> = Api::namespaced(client.clone(), namespace);
    let interaction_loop = Controller::new(interactions, watcher::Config::default())
        .graceful_shutdown_on(shutdown.clone())
        .run(reconcile_interaction, interaction_error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => tracing::debug!(interaction = %object.name, "Reconciled interaction"),
                Err(e) => tracing::debug!(error = %e, "Interaction controller event failed"),
            }
        });

    let jobs: Api<Job> = Api::namespaced(client, namespace);
    // Existence selector: any value of the dispatch label marks a Job as ours
    let job_loop = Controller::new(jobs, watcher::Config::default().labels(LABEL_JOB))
        .graceful_shutdown_on(shutdown)
        .run(reconcile_job, job_error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => tracing::debug!(job = %object.name, "Reconciled job"),
                Err(e) => tracing::debug!(error = %e, "Job controller event failed"),
            }
        });

    tracing::info!(namespace, "Starting controllers");
    futures::future::join(interaction_loop, job_loop).await;
    tracing::info!("Controllers stopped");
}
