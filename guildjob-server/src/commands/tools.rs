use anyhow::{Context, Result};
use guildjob_models::GuildInteraction;
use guildjob_operator::names::job_name;
use kube::CustomResourceExt;

/// Render the CustomResourceDefinition for `kubectl apply -f -`
pub fn crd_yaml() -> Result<String> {
    serde_yaml::to_string(&GuildInteraction::crd()).context("Failed to render CRD")
}

pub fn print_crd() -> Result<()> {
    print!("{}", crd_yaml()?);
    Ok(())
}

pub fn print_job_name(interaction: &str, action: &str) {
    println!("{}", job_name(interaction, action));
}
