//! Discord REST client for guild commands and interaction follow-ups

use std::time::Duration;

use async_trait::async_trait;
use guildjob_models::FollowupMessage;
use thiserror::Error;

/// Default Discord API endpoint
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum DiscordError {
    #[error("Discord request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Discord returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected Discord response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("registered command has no id: {0}")]
    MissingCommandId(serde_json::Value),
}

/// The subset of the Discord API the operator needs
#[async_trait]
pub trait DiscordApi: Send + Sync + 'static {
    /// List the application's commands registered in a guild
    async fn list_guild_commands(&self, guild_id: &str) -> Result<Vec<serde_json::Value>, DiscordError>;

    /// Register one command (already-serialized JSON) in a guild
    async fn register_guild_command(&self, guild_id: &str, command_json: &str) -> Result<(), DiscordError>;

    async fn delete_guild_command(&self, guild_id: &str, command_id: &str) -> Result<(), DiscordError>;

    /// Post a follow-up message for a deferred interaction
    async fn send_followup(&self, interaction_token: &str, content: &str) -> Result<(), DiscordError>;
}

/// Delete every command the application has registered in `guild_id`
pub async fn delete_all_guild_commands(
    discord: &dyn DiscordApi,
    guild_id: &str,
) -> Result<usize, DiscordError> {
    let commands = discord.list_guild_commands(guild_id).await?;
    let count = commands.len();

    for command in commands {
        let Some(id) = command.get("id").and_then(|v| v.as_str()) else {
            return Err(DiscordError::MissingCommandId(command));
        };
        discord.delete_guild_command(guild_id, id).await?;
        tracing::debug!(guild_id, command_id = id, "Deleted guild command");
    }

    Ok(count)
}

/// Bot-authenticated HTTP client
#[derive(Clone)]
pub struct DiscordClient {
    http: reqwest::Client,
    api_base: String,
    application_id: String,
    bot_token: String,
}

impl DiscordClient {
    pub fn new(application_id: String, bot_token: String) -> Result<Self, DiscordError> {
        Self::with_api_base(DEFAULT_API_BASE.to_string(), application_id, bot_token)
    }

    pub fn with_api_base(
        api_base: String,
        application_id: String,
        bot_token: String,
    ) -> Result<Self, DiscordError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(user_agent())
            .build()?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            application_id,
            bot_token,
        })
    }

    fn commands_url(&self, guild_id: &str) -> String {
        format!(
            "{}/applications/{}/guilds/{}/commands",
            self.api_base, self.application_id, guild_id
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, DiscordError> {
        let response = request
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.bot_token))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), body = %body, "Discord API request failed");
            return Err(DiscordError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

fn user_agent() -> String {
    format!(
        "DiscordBot ({}, {})",
        env!("CARGO_PKG_REPOSITORY"),
        env!("CARGO_PKG_VERSION")
    )
}

#[async_trait]
impl DiscordApi for DiscordClient {
    async fn list_guild_commands(&self, guild_id: &str) -> Result<Vec<serde_json::Value>, DiscordError> {
        let body = self.send(self.http.get(self.commands_url(guild_id))).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn register_guild_command(&self, guild_id: &str, command_json: &str) -> Result<(), DiscordError> {
        self.send(
            self.http
                .post(self.commands_url(guild_id))
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(command_json.to_string()),
        )
        .await?;
        Ok(())
    }

    async fn delete_guild_command(&self, guild_id: &str, command_id: &str) -> Result<(), DiscordError> {
        let url = format!("{}/{}", self.commands_url(guild_id), command_id);
        self.send(self.http.delete(url)).await?;
        Ok(())
    }

    async fn send_followup(&self, interaction_token: &str, content: &str) -> Result<(), DiscordError> {
        let url = format!(
            "{}/webhooks/{}/{}",
            self.api_base, self.application_id, interaction_token
        );
        let message = FollowupMessage {
            content: content.to_string(),
        };
        self.send(self.http.post(url).json(&message)).await?;
        Ok(())
    }
}
