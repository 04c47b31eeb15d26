//! Wait command - launch a workflow and block on one of its nodes.

use anyhow::Result;
use clap::Args;
use dypx_pipeline::{FlowRequest, OverrideMap};

use super::{Context, param_value, parse_param};

/// Arguments for the wait command.
#[derive(Args, Debug)]
pub struct WaitArgs {
    /// Pipeline name
    pub pipeline: String,

    /// Plugin instance the workflow is attached below
    #[arg(long, env = "CHRIS_PREV_PLG_INST_ID")]
    pub anchor: i64,

    /// Node title to wait for (case-insensitive substring)
    #[arg(long)]
    pub node: String,

    /// Parameter override as 'title:name=value' (repeatable)
    #[arg(long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String, String)>,
}

/// Run the wait command. Prints the flow result as JSON.
pub async fn run(args: WaitArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.engine()?;

    let mut overrides = OverrideMap::new();
    for (title, name, value) in &args.params {
        overrides.set(title, name, param_value(value));
    }

    let result = engine
        .execute_and_wait(FlowRequest {
            pipeline: args.pipeline,
            anchor: Some(args.anchor),
            wait_for: args.node,
            overrides,
            prior: None,
        })
        .await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.finished {
        anyhow::bail!("Node ended with status '{}'", result.status);
    }
    Ok(())
}
