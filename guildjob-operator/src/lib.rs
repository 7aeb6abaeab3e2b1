//! Guildjob Operator - turns Discord application commands into Kubernetes Jobs
//!
//! This crate provides the pieces shared by the webhook server and the
//! controllers: signature verification, pattern routing, Job dispatch, and the
//! reconcilers that keep guild commands and finished Jobs in order.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use guildjob_operator::discord::DiscordClient;
//! use guildjob_operator::dispatch::Dispatcher;
//! use guildjob_operator::store::{get_k8s_client, KubeStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = get_k8s_client().await?;
//! let store = Arc::new(KubeStore::new(client, "default"));
//! let discord = Arc::new(DiscordClient::new("1234".into(), "bot-token".into())?);
//!
//! let dispatcher = Dispatcher::new(store, discord, "default");
//! // dispatcher.dispatch(request) from the webhook handler
//! # Ok(())
//! # }
//! ```

pub mod controllers;
pub mod discord;
pub mod dispatch;
pub mod names;
pub mod pattern;
pub mod store;
pub mod verify;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
