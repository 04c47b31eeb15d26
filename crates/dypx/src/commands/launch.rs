//! Launch command - one workflow, monitored to its verdict.

use anyhow::Result;
use clap::Args;
use console::Style;
use dypx_pipeline::{LaunchRequest, LaunchStatus, OverrideMap};

use super::{Context, await_monitors, param_value, parse_param};

/// Arguments for the launch command.
#[derive(Args, Debug)]
pub struct LaunchArgs {
    /// Pipeline name
    pub pipeline: String,

    /// Plugin instance the workflow is attached below
    #[arg(long, env = "CHRIS_PREV_PLG_INST_ID")]
    pub anchor: i64,

    /// Parameter override as 'title:name=value' (repeatable)
    #[arg(long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String, String)>,

    /// Output as JSON (for scripting)
    #[arg(long)]
    pub json: bool,
}

/// Run the launch command.
pub async fn run(args: LaunchArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.engine()?;

    let mut overrides = OverrideMap::new();
    for (title, name, value) in &args.params {
        overrides.set(title, name, param_value(value));
    }

    let status = engine
        .run(LaunchRequest {
            pipeline: args.pipeline.clone(),
            previous_instance_id: args.anchor,
            overrides,
            ..Default::default()
        })
        .await;
    if let LaunchStatus::Failed { error } = &status {
        if args.json {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        anyhow::bail!("Launching '{}' failed: {error}", args.pipeline);
    }
    if !args.json {
        println!("{} {}", Style::new().dim().apply_to("Status:"), status.label());
    }

    let outcomes = await_monitors(&engine).await;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    } else {
        for outcome in &outcomes {
            let style = if outcome.verdict.is_success() {
                Style::new().green()
            } else {
                Style::new().red()
            };
            println!(
                "Workflow {}: {} after {} polls",
                outcome.workflow_id,
                style.apply_to(&outcome.verdict),
                outcome.polls
            );
        }
    }

    if outcomes.iter().any(|o| !o.verdict.is_success()) {
        anyhow::bail!("Workflow did not succeed");
    }
    Ok(())
}
