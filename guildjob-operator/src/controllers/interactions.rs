//! Keeps each guild's registered application commands in line with its `GuildInteraction`

use guildjob_models::{GuildInteraction, ANNOT_COMMANDS_HASH, FINALIZER_GUILD_COMMANDS, LABEL_GUILD_ID};
use kube::ResourceExt;
use sha2::{Digest, Sha224};

use super::{Context, Error, ReconcileOutcome};
use crate::discord::{delete_all_guild_commands, DiscordApi};
use crate::pattern::mapping_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// The finalizer has not been attached yet
    PendingFinalizer,
    /// Deletion was requested
    PendingDeletion,
    Steady,
}

pub fn classify(interaction: &GuildInteraction) -> SyncState {
    if interaction.metadata.deletion_timestamp.is_some() {
        SyncState::PendingDeletion
    } else if !has_finalizer(interaction) {
        SyncState::PendingFinalizer
    } else {
        SyncState::Steady
    }
}

fn has_finalizer(interaction: &GuildInteraction) -> bool {
    interaction.finalizers().iter().any(|f| f == FINALIZER_GUILD_COMMANDS)
}

/// Normalize each command (YAML or JSON text) to compact JSON with sorted keys
///
/// Scalar mapping keys are stringified, so `1: a` becomes `{"1":"a"}`.
pub fn canonical_commands(commands: &[String]) -> Result<Vec<String>, Error> {
    commands
        .iter()
        .enumerate()
        .map(|(index, text)| {
            let yaml: serde_yaml::Value = serde_yaml::from_str(text)
                .map_err(|source| Error::InvalidCommand { index, source })?;
            let value = yaml_to_json(yaml).ok_or(Error::UnsupportedCommand { index })?;
            serde_json::to_string(&value).map_err(|source| Error::EncodeCommand { index, source })
        })
        .collect()
}

fn yaml_to_json(value: serde_yaml::Value) -> Option<serde_json::Value> {
    use serde_json::Value as Json;
    use serde_yaml::Value as Yaml;

    Some(match value {
        Yaml::Null => Json::Null,
        Yaml::Bool(b) => Json::Bool(b),
        Yaml::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => Json::from(i),
            (_, Some(u)) => Json::from(u),
            _ => Json::Number(serde_json::Number::from_f64(n.as_f64()?)?),
        },
        Yaml::String(s) => Json::String(s),
        Yaml::Sequence(items) => Json::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Option<Vec<_>>>()?,
        ),
        Yaml::Mapping(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(mapping_key(k)?, yaml_to_json(v)?);
            }
            Json::Object(out)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

/// Hex SHA-224 of the canonical commands rendered as one JSON array
pub fn commands_hash(canonical: &[String]) -> String {
    let document = format!("[{}]", canonical.join(","));
    hex::encode(Sha224::digest(document.as_bytes()))
}

/// Remove every registered command of `guild_id`, then register `canonical` in order
pub async fn replace_guild_commands(
    discord: &dyn DiscordApi,
    guild_id: &str,
    canonical: &[String],
) -> Result<(), Error> {
    let deleted = delete_all_guild_commands(discord, guild_id).await?;
    for command in canonical {
        discord.register_guild_command(guild_id, command).await?;
    }
    tracing::info!(
        guild_id,
        deleted,
        registered = canonical.len(),
        "Replaced guild commands"
    );
    Ok(())
}

pub async fn reconcile(name: &str, ctx: &Context) -> Result<ReconcileOutcome, Error> {
    let Some(mut interaction) = ctx.store.get_interaction(name).await? else {
        tracing::debug!(interaction = name, "Interaction is gone, nothing to reconcile");
        return Ok(ReconcileOutcome::Done);
    };

    match classify(&interaction) {
        SyncState::PendingFinalizer => {
            interaction.finalizers_mut().push(FINALIZER_GUILD_COMMANDS.to_string());
            ctx.store.replace_interaction(&interaction).await?;
            tracing::debug!(interaction = name, "Attached finalizer");
            Ok(ReconcileOutcome::Requeue)
        }
        SyncState::PendingDeletion => {
            if !has_finalizer(&interaction) {
                return Ok(ReconcileOutcome::Done);
            }

            for guild_id in known_guilds(&interaction) {
                let deleted = delete_all_guild_commands(ctx.discord.as_ref(), &guild_id).await?;
                tracing::info!(interaction = name, guild_id = %guild_id, deleted, "Removed guild commands");
            }

            interaction.finalizers_mut().retain(|f| f != FINALIZER_GUILD_COMMANDS);
            ctx.store.replace_interaction(&interaction).await?;
            tracing::info!(interaction = name, "Released finalizer");
            Ok(ReconcileOutcome::Done)
        }
        SyncState::Steady => sync_commands(interaction, ctx).await,
    }
}

/// Guilds that may hold commands registered for this interaction
fn known_guilds(interaction: &GuildInteraction) -> Vec<String> {
    let mut guilds = Vec::new();
    if !interaction.spec.guild_id.is_empty() {
        guilds.push(interaction.spec.guild_id.clone());
    }
    if let Some(synced) = interaction.labels().get(LABEL_GUILD_ID) {
        if !synced.is_empty() && !guilds.contains(synced) {
            guilds.push(synced.clone());
        }
    }
    guilds
}

/// Replace the remote commands first, then persist the label and hash
async fn sync_commands(
    mut interaction: GuildInteraction,
    ctx: &Context,
) -> Result<ReconcileOutcome, Error> {
    let name = interaction.name_any();
    let guild_id = interaction.spec.guild_id.clone();
    let canonical = canonical_commands(&interaction.spec.commands)?;
    let hash = commands_hash(&canonical);

    let synced_guild = interaction.labels().get(LABEL_GUILD_ID).cloned();
    let synced_hash = interaction.annotations().get(ANNOT_COMMANDS_HASH).cloned();
    if synced_guild.as_deref() == Some(guild_id.as_str()) && synced_hash.as_deref() == Some(hash.as_str()) {
        return Ok(ReconcileOutcome::Done);
    }

    // A guild move must not leave commands behind in the old guild
    if let Some(old_guild) = synced_guild.filter(|g| !g.is_empty() && *g != guild_id) {
        let deleted = delete_all_guild_commands(ctx.discord.as_ref(), &old_guild).await?;
        tracing::info!(interaction = %name, guild_id = %old_guild, deleted, "Removed commands from previous guild");
    }

    // The hash is persisted only once the registry matches it, so a failure
    // part way through is retried in full
    replace_guild_commands(ctx.discord.as_ref(), &guild_id, &canonical).await?;

    interaction
        .labels_mut()
        .insert(LABEL_GUILD_ID.to_string(), guild_id.clone());
    interaction
        .annotations_mut()
        .insert(ANNOT_COMMANDS_HASH.to_string(), hash.clone());
    ctx.store.replace_interaction(&interaction).await?;

    tracing::info!(interaction = %name, guild_id = %guild_id, hash = %hash, "Synced guild commands");
    Ok(ReconcileOutcome::Done)
}
