//! Guildjob Models - resource schema and wire types shared by the operator and server
//!
//! The `GuildInteraction` custom resource is the declarative configuration for one
//! Discord guild: the slash commands to register there and the ordered actions that
//! turn an invocation into a Kubernetes Job.

use k8s_openapi::api::batch::v1::JobTemplateSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ============================================================================
// Metadata Keys
// ============================================================================

/// Label holding the guild id the commands were last synced to
pub const LABEL_GUILD_ID: &str = "guildjob.dev/guild-id";

/// Annotation holding the hash of the canonical command list last applied
pub const ANNOT_COMMANDS_HASH: &str = "guildjob.dev/commands-hash";

/// Finalizer kept while commands are registered in the guild
pub const FINALIZER_GUILD_COMMANDS: &str = "guildjob.dev/guild-commands";

/// Label marking a Job as created by the dispatcher
pub const LABEL_JOB: &str = "guildjob.dev/job";

/// Job annotation: owning `GuildInteraction` name
pub const ANNOT_INTERACTION: &str = "guildjob.dev/interaction";

/// Job annotation: name of the matched action
pub const ANNOT_ACTION: &str = "guildjob.dev/action";

/// Job annotation: interaction token used for the completion follow-up
pub const ANNOT_INTERACTION_TOKEN: &str = "guildjob.dev/interaction-token";

/// Job annotation: channel the command was invoked from
pub const ANNOT_CHANNEL_ID: &str = "guildjob.dev/channel-id";

// ============================================================================
// GuildInteraction Custom Resource
// ============================================================================

/// Desired state of a guild's slash commands and the jobs they trigger
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[kube(
    group = "guildjob.dev",
    version = "v1",
    kind = "GuildInteraction",
    namespaced,
    shortname = "gi",
    printcolumn = r#"{"name":"Guild","type":"string","jsonPath":".spec.guildId"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GuildInteractionSpec {
    /// Discord guild (server) id this resource routes for
    pub guild_id: String,
    /// Ordered actions; the first whose pattern matches an invocation wins
    #[serde(default)]
    pub actions: Vec<InteractionAction>,
    /// Application command definitions, one YAML (or JSON) document each
    #[serde(default)]
    pub commands: Vec<String>,
}

/// A pattern and the Job to run when an invocation matches it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InteractionAction {
    /// Action identity, unique within the resource
    pub name: String,
    /// Partial structure compared against the invocation's `data`
    pub pattern: String,
    /// Job to instantiate on a match
    pub job_template: JobTemplateSpec,
}

// ============================================================================
// Interaction Payloads
// ============================================================================

/// Inbound interaction types
pub mod interaction_type {
    pub const PING: i64 = 1;
    pub const APPLICATION_COMMAND: i64 = 2;
}

/// Interaction callback types used in responses
pub mod callback_type {
    pub const PONG: u8 = 1;
    pub const DEFERRED_CHANNEL_MESSAGE_WITH_SOURCE: u8 = 5;
}

/// Body of an inbound interaction webhook call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionRequest {
    #[serde(rename = "type")]
    pub kind: i64,
    /// Command invocation data (name, options, ...); absent for pings
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub guild_id: String,
    #[serde(default)]
    pub channel_id: String,
    /// Interaction token, valid for follow-up messages
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub id: String,
}

/// Immediate response to an interaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionResponse {
    #[serde(rename = "type")]
    pub kind: u8,
}

impl InteractionResponse {
    pub fn pong() -> Self {
        Self { kind: callback_type::PONG }
    }

    /// Acknowledge now, follow up later with the interaction token
    pub fn deferred() -> Self {
        Self {
            kind: callback_type::DEFERRED_CHANNEL_MESSAGE_WITH_SOURCE,
        }
    }
}

/// Follow-up message sent through the interaction webhook
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FollowupMessage {
    pub content: String,
}
