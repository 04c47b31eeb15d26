//! Status command - checks that the CUBE backend answers.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde::Serialize;

use super::Context;

/// Arguments for the status command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Output as JSON (for scripting)
    #[arg(long)]
    pub json: bool,
}

/// Status response for JSON output.
#[derive(Debug, Serialize)]
struct StatusOutput {
    reachable: bool,
    url: String,
    transport: String,
    name: Option<String>,
    job_execution_type: Option<String>,
    error: Option<String>,
}

/// Run the status command.
pub async fn run(args: StatusArgs, ctx: &Context) -> Result<()> {
    let backend = ctx.config.backend();
    let client = ctx.client()?;

    let result = client.health().check().await;
    let output = match &result {
        Ok(instance) => StatusOutput {
            reachable: true,
            url: backend.url.clone(),
            transport: backend.transport.clone(),
            name: Some(instance.name.clone()),
            job_execution_type: instance.job_execution_type.clone(),
            error: None,
        },
        Err(e) => StatusOutput {
            reachable: false,
            url: backend.url.clone(),
            transport: backend.transport.clone(),
            name: None,
            job_execution_type: None,
            error: Some(e.to_string()),
        },
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let dim = Style::new().dim();

        println!();
        println!("{}", style("CUBE Status").bold());
        println!("{}", dim.apply_to("─".repeat(40)));
        println!();
        if output.reachable {
            println!(
                "  {} {}",
                dim.apply_to("Status:"),
                Style::new().green().apply_to("● reachable")
            );
            if let Some(name) = &output.name {
                println!("  {} {}", dim.apply_to("Instance:"), name);
            }
            if let Some(kind) = &output.job_execution_type {
                println!("  {} {}", dim.apply_to("Jobs:"), kind);
            }
        } else {
            println!(
                "  {} {}",
                dim.apply_to("Status:"),
                Style::new().red().apply_to("● unreachable")
            );
        }
        println!("  {} {}", dim.apply_to("URL:"), output.url);
        println!("  {} {}", dim.apply_to("Transport:"), output.transport);
        if ctx.verbose
            && let Some(error) = &output.error
        {
            println!();
            println!("  {} {}", dim.apply_to("Error:"), error);
        }
        println!();
    }

    if let Err(e) = result {
        anyhow::bail!("CUBE is not reachable: {e}");
    }
    Ok(())
}
