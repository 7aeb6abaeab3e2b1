//! Reports finished Jobs back to the invoking user and cleans them up

use guildjob_models::{ANNOT_INTERACTION_TOKEN, LABEL_JOB};
use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;

use super::{Context, Error, ReconcileOutcome};

pub const MSG_JOB_COMPLETED: &str = ":white_check_mark: job completed";
pub const MSG_JOB_FAILED: &str = ":x: job failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Succeeded,
    Failed,
}

impl Completion {
    pub fn message(self) -> &'static str {
        match self {
            Completion::Succeeded => MSG_JOB_COMPLETED,
            Completion::Failed => MSG_JOB_FAILED,
        }
    }
}

/// Whether the Job carries the dispatch label; its value is not inspected
pub fn is_dispatched(job: &Job) -> bool {
    job.labels().contains_key(LABEL_JOB)
}

/// Terminal state of a Job, if it reached one
pub fn completion(job: &Job) -> Option<Completion> {
    let conditions = job.status.as_ref()?.conditions.as_ref()?;
    conditions
        .iter()
        .filter(|c| c.status == "True")
        .find_map(|c| match c.type_.as_str() {
            "Complete" => Some(Completion::Succeeded),
            "Failed" => Some(Completion::Failed),
            _ => None,
        })
}

pub async fn reconcile(name: &str, ctx: &Context) -> Result<ReconcileOutcome, Error> {
    let Some(job) = ctx.store.get_job(name).await? else {
        return Ok(ReconcileOutcome::Done);
    };
    if !is_dispatched(&job) {
        return Ok(ReconcileOutcome::Done);
    }
    let Some(completion) = completion(&job) else {
        tracing::trace!(job = name, "Job still running");
        return Ok(ReconcileOutcome::Done);
    };

    match job.annotations().get(ANNOT_INTERACTION_TOKEN) {
        Some(token) if !token.is_empty() => {
            if let Err(e) = ctx.discord.send_followup(token, completion.message()).await {
                tracing::error!(job = name, error = %e, "Failed to notify job completion");
            }
        }
        _ => tracing::warn!(job = name, "Job has no interaction token, skipping notification"),
    }

    match ctx.store.delete_job(name).await {
        Ok(()) => tracing::info!(job = name, completion = ?completion, "Deleted finished job"),
        Err(e) if e.is_not_found() => tracing::debug!(job = name, "Job already deleted"),
        Err(e) => return Err(e.into()),
    }

    Ok(ReconcileOutcome::Done)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::RecordingDiscord;

    fn setup() -> (MemoryStore, Arc<RecordingDiscord>, Context) {
        let store = MemoryStore::new();
        let discord = Arc::new(RecordingDiscord::new());
        let ctx = Context::new(Arc::new(store.clone()), discord.clone());
        (store, discord, ctx)
    }

    fn dispatched_job(name: &str, token: &str) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                labels: Some([(LABEL_JOB.to_string(), "true".to_string())].into()),
                annotations: Some([(ANNOT_INTERACTION_TOKEN.to_string(), token.to_string())].into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_completed_job_is_reported_once_and_deleted() {
        let (store, discord, ctx) = setup();
        store.put_job(dispatched_job("job-a", "tok-1"));
        store.set_job_condition("job-a", "Complete");

        assert_eq!(reconcile("job-a", &ctx).await.unwrap(), ReconcileOutcome::Done);
        assert_eq!(
            discord.followups(),
            vec![("tok-1".to_string(), MSG_JOB_COMPLETED.to_string())]
        );
        assert!(store.job("job-a").is_none());

        // Re-driving after deletion does nothing
        assert_eq!(reconcile("job-a", &ctx).await.unwrap(), ReconcileOutcome::Done);
        assert_eq!(discord.followups().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_job_uses_failure_text() {
        let (store, discord, ctx) = setup();
        store.put_job(dispatched_job("job-b", "tok-2"));
        store.set_job_condition("job-b", "Failed");

        reconcile("job-b", &ctx).await.unwrap();
        assert_eq!(
            discord.followups(),
            vec![("tok-2".to_string(), MSG_JOB_FAILED.to_string())]
        );
        assert!(store.job("job-b").is_none());
    }

    #[tokio::test]
    async fn test_running_job_is_left_alone() {
        let (store, discord, ctx) = setup();
        store.put_job(dispatched_job("job-c", "tok-3"));
        store.set_job_condition("job-c", "Suspended");

        reconcile("job-c", &ctx).await.unwrap();
        assert!(discord.calls().is_empty());
        assert!(store.job("job-c").is_some());
    }

    #[tokio::test]
    async fn test_unowned_job_is_ignored() {
        let (store, discord, ctx) = setup();
        let mut job = dispatched_job("batch-report", "tok-4");
        job.metadata.labels = None;
        store.put_job(job);
        store.set_job_condition("batch-report", "Complete");

        reconcile("batch-report", &ctx).await.unwrap();
        assert!(discord.calls().is_empty());
        assert!(store.job("batch-report").is_some());
    }

    #[tokio::test]
    async fn test_any_label_value_marks_a_dispatched_job() {
        let (store, discord, ctx) = setup();
        let mut job = dispatched_job("job-g", "tok-6");
        job.metadata.labels = Some([(LABEL_JOB.to_string(), "yes".to_string())].into());
        store.put_job(job);
        store.set_job_condition("job-g", "Complete");

        reconcile("job-g", &ctx).await.unwrap();
        assert_eq!(
            discord.followups(),
            vec![("tok-6".to_string(), MSG_JOB_COMPLETED.to_string())]
        );
        assert!(store.job("job-g").is_none());
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_block_cleanup() {
        let (store, discord, ctx) = setup();
        discord.fail_followups();
        store.put_job(dispatched_job("job-d", "tok-5"));
        store.set_job_condition("job-d", "Complete");

        assert_eq!(reconcile("job-d", &ctx).await.unwrap(), ReconcileOutcome::Done);
        assert_eq!(discord.followups().len(), 1);
        assert!(store.job("job-d").is_none());
    }

    #[tokio::test]
    async fn test_missing_token_still_deletes() {
        let (store, discord, ctx) = setup();
        let mut job = dispatched_job("job-e", "");
        job.metadata.annotations = None;
        store.put_job(job);
        store.set_job_condition("job-e", "Failed");

        reconcile("job-e", &ctx).await.unwrap();
        assert!(discord.calls().is_empty());
        assert!(store.job("job-e").is_none());
    }

    #[test]
    fn test_false_conditions_are_not_terminal() {
        let mut job = dispatched_job("job-f", "tok");
        assert_eq!(completion(&job), None);

        job.status = Some(k8s_openapi::api::batch::v1::JobStatus {
            conditions: Some(vec![k8s_openapi::api::batch::v1::JobCondition {
                type_: "Complete".to_string(),
                status: "False".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        assert_eq!(completion(&job), None);
    }
}
