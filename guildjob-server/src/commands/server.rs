use anyhow::{Context, Result};
use futures::FutureExt;
use guildjob_operator::controllers::{self, Context as ControllerContext};
use guildjob_operator::discord::DiscordClient;
use guildjob_operator::dispatch::Dispatcher;
use guildjob_operator::store::{get_k8s_client, KubeStore};
use guildjob_operator::verify::SignatureVerifier;
use kube::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::api::{self, AppState};
use crate::cli::ServeArgs;
use crate::config::Config;

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutting down...");
}

fn load_verifier(config: &Config) -> Result<Arc<SignatureVerifier>> {
    let verifier = SignatureVerifier::from_hex(&config.public_key)
        .context("DISCORD_APPLICATION_PUBLIC_KEY is not a valid Ed25519 public key")?;
    Ok(Arc::new(verifier))
}

async fn connect(config: &Config) -> Result<(Client, Arc<KubeStore>, Arc<DiscordClient>)> {
    let client = get_k8s_client()
        .await
        .context("Failed to create Kubernetes client")?;
    let store = Arc::new(KubeStore::new(client.clone(), &config.namespace));
    let discord = Arc::new(
        DiscordClient::with_api_base(
            config.api_base.clone(),
            config.application_id.clone(),
            config.bot_token.clone(),
        )
        .context("Failed to create Discord client")?,
    );
    Ok((client, store, discord))
}

fn app_state(
    config: &Config,
    verifier: Arc<SignatureVerifier>,
    store: Arc<KubeStore>,
    discord: Arc<DiscordClient>,
) -> AppState {
    let dispatcher = Dispatcher::new(store, discord, config.namespace.clone())
        .with_timeout(config.dispatch_timeout);
    AppState { verifier, dispatcher }
}

/// Webhook server and both controllers in one process
pub async fn run_all(config: Config, serve: ServeArgs) -> Result<()> {
    tracing::info!("Starting guildjob (webhook + controllers)");
    tracing::info!("  Namespace: {}", config.namespace);

    let verifier = load_verifier(&config)?;
    let (client, store, discord) = connect(&config).await?;
    let shutdown = shutdown_signal().shared();

    let ctx = Arc::new(ControllerContext::new(store.clone(), discord.clone()));
    let controllers = controllers::run(client, &config.namespace, ctx, shutdown.clone());

    let state = app_state(&config, verifier, store, discord);
    let server = api::start_server(
        serve.listen,
        state,
        shutdown,
        Duration::from_secs(serve.drain_secs),
    );

    tokio::pin!(controllers);
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result?;
            controllers.await;
        }
        () = &mut controllers => {
            server.await?;
        }
    }

    tracing::info!("✓ guildjob stopped");
    Ok(())
}

/// Webhook server only; controllers run elsewhere
pub async fn run_webhook(config: Config, serve: ServeArgs) -> Result<()> {
    tracing::info!("Starting guildjob in webhook-only mode");

    let verifier = load_verifier(&config)?;
    let (_, store, discord) = connect(&config).await?;
    let state = app_state(&config, verifier, store, discord);

    api::start_server(
        serve.listen,
        state,
        shutdown_signal(),
        Duration::from_secs(serve.drain_secs),
    )
    .await
}

/// Controllers only; no inbound traffic
pub async fn run_controllers(config: Config) -> Result<()> {
    tracing::info!("Starting guildjob in controller-only mode");

    let (client, store, discord) = connect(&config).await?;
    let ctx = Arc::new(ControllerContext::new(store, discord));
    controllers::run(client, &config.namespace, ctx, shutdown_signal()).await;
    Ok(())
}
