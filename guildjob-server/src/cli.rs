use clap::{Args as ClapArgs, Parser, Subcommand};
use std::net::SocketAddr;

/// Guildjob - run Kubernetes Jobs from Discord slash commands
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ServeArgs {
    /// Address the webhook server listens on
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Seconds to wait for in-flight requests after a shutdown signal
    #[arg(long, default_value = "10")]
    pub drain_secs: u64,
}

#[derive(Subcommand, Debug)]
pub enum Mode {
    /// Run the webhook server and both controllers
    Run {
        #[command(flatten)]
        serve: ServeArgs,
    },

    /// Run the webhook server only
    Webhook {
        #[command(flatten)]
        serve: ServeArgs,
    },

    /// Run the controllers only
    Controller,

    /// Print the GuildInteraction CustomResourceDefinition as YAML
    Crd,

    /// Print the Job name a dispatch of <action> from <interaction> would use
    JobName {
        /// GuildInteraction name
        interaction: String,

        /// Action name
        action: String,
    },
}
