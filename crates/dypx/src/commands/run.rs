//! Run command - one anonymization workflow per spreadsheet row.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Args;
use console::Style;
use dypx_pipeline::{FlowRequest, FlowResult, LaunchRequest, LaunchStatus, PipelineEngine};
use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use super::{Context, await_monitors};
use crate::jobs::{
    AnonymizeSettings, Job, STATUS_COLUMN, Sheet, anonymize_overrides, find_inputs, read_sheet,
    write_results,
};

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Directory searched for input spreadsheets
    pub inputdir: PathBuf,

    /// Directory for result spreadsheets and logs
    pub outputdir: PathBuf,

    /// Glob matched against paths relative to the input directory
    #[arg(long)]
    pub pattern: Option<String>,

    /// Block on the registration node instead of monitoring in the background
    #[arg(long)]
    pub wait: bool,

    /// Process rows concurrently
    #[arg(long, visible_alias = "thread")]
    pub parallel: bool,

    /// Rows in flight at once with --parallel
    #[arg(long)]
    pub max_parallel: Option<usize>,

    /// Plugin instance every workflow is attached below
    #[arg(long, env = "CHRIS_PREV_PLG_INST_ID")]
    pub plugin_instance_id: i64,

    /// Pipeline launched for every row
    #[arg(long)]
    pub pipeline: Option<String>,

    /// pfdcm service endpoint
    #[arg(long)]
    pub pfdcm_url: Option<String>,

    /// PACS to query and retrieve from
    #[arg(long)]
    pub pacs_name: Option<String>,

    /// Comma-separated notification recipients
    #[arg(long)]
    pub recipients: Option<String>,

    /// SMTP server for notifications
    #[arg(long)]
    pub smtp_server: Option<String>,
}

/// What a row ended as.
#[derive(Debug, Clone, PartialEq)]
struct RowResult {
    status: String,
    error: Option<String>,
}

impl RowResult {
    fn ok(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            error: None,
        }
    }

    fn failed(error: impl ToString) -> Self {
        Self {
            status: "Failed".to_string(),
            error: Some(error.to_string()),
        }
    }

    /// A blocking flow is only good if its node finished.
    fn from_flow(flow: &FlowResult, node: &str) -> Self {
        if flow.finished {
            Self::ok(flow.status.clone())
        } else {
            Self {
                status: flow.status.clone(),
                error: Some(format!("node '{node}' ended with status '{}'", flow.status)),
            }
        }
    }

    fn from_launch(status: LaunchStatus) -> Self {
        match status {
            LaunchStatus::Failed { error } => Self::failed(error),
            running => Self::ok(running.label()),
        }
    }
}

/// Settings shared by every row of a run.
struct Batch<'a> {
    engine: &'a PipelineEngine,
    settings: AnonymizeSettings,
    pipeline: String,
    wait_for: String,
    anchor: i64,
    wait: bool,
}

impl Batch<'_> {
    async fn process(&self, job: &Job) -> RowResult {
        let overrides = match anonymize_overrides(job, &self.settings) {
            Ok(overrides) => overrides,
            Err(e) => return RowResult::failed(e),
        };

        if self.wait {
            let request = FlowRequest {
                pipeline: self.pipeline.clone(),
                anchor: Some(self.anchor),
                wait_for: self.wait_for.clone(),
                overrides,
                prior: None,
            };
            match self.engine.execute_and_wait(request).await {
                Ok(flow) => RowResult::from_flow(&flow, &self.wait_for),
                Err(e) => RowResult::failed(e),
            }
        } else {
            let request = LaunchRequest {
                pipeline: self.pipeline.clone(),
                previous_instance_id: self.anchor,
                overrides,
                search: job.search.clone(),
                recipients: non_empty(&self.settings.recipients),
                smtp_server: non_empty(&self.settings.smtp_server),
            };
            RowResult::from_launch(self.engine.run(request).await)
        }
    }

    /// Process every row of `sheet`; rows with a status keep it.
    async fn process_sheet(&self, sheet: &Sheet, parallel: Option<usize>) -> Vec<RowResult> {
        let mut results: Vec<Option<RowResult>> = sheet
            .jobs
            .iter()
            .map(|job| {
                job.is_done()
                    .then(|| RowResult::ok(job.push_value(STATUS_COLUMN)))
            })
            .collect();
        let pending: Vec<(usize, &Job)> = sheet
            .jobs
            .iter()
            .enumerate()
            .filter(|(i, _)| results[*i].is_none())
            .collect();
        let skipped = sheet.jobs.len() - pending.len();
        if skipped > 0 {
            info!(skipped, "Rows already processed");
        }

        match parallel {
            Some(limit) => {
                let done: Vec<(usize, RowResult)> = stream::iter(pending)
                    .map(|(i, job)| async move { (i, self.process(job).await) })
                    .buffer_unordered(limit.max(1))
                    .collect()
                    .await;
                for (i, result) in done {
                    results[i] = Some(result);
                }
            }
            None => {
                for (i, job) in pending {
                    results[i] = Some(self.process(job).await);
                }
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| RowResult::failed("row was not processed")))
            .collect()
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn output_path(outputdir: &Path, input: &Path) -> Result<PathBuf> {
    let name = input
        .file_name()
        .with_context(|| format!("Input {} has no file name", input.display()))?;
    Ok(outputdir.join(name))
}

/// Run the run command.
pub async fn run(args: RunArgs, ctx: &Context) -> Result<()> {
    let batch_config = ctx.config.batch();
    let notification = ctx.config.notification();
    let backend = ctx.config.backend();

    std::fs::create_dir_all(&args.outputdir)
        .with_context(|| format!("Failed to create {}", args.outputdir.display()))?;

    let engine = ctx.engine()?;
    engine
        .client()
        .health()
        .check()
        .await
        .with_context(|| format!("CUBE at {} is not reachable", backend.url))?;

    let pfdcm_url = args.pfdcm_url.unwrap_or(batch_config.pfdcm_url);
    if !pfdcm_url.is_empty() {
        ctx.pfdcm(&pfdcm_url)?
            .hello()
            .await
            .with_context(|| format!("pfdcm at {pfdcm_url} is not reachable"))?;
    }

    let pattern = args.pattern.unwrap_or(batch_config.pattern);
    let inputs = find_inputs(&args.inputdir, &pattern)?;
    if inputs.is_empty() {
        warn!(dir = %args.inputdir.display(), %pattern, "No input files found");
    }

    let batch = Batch {
        engine: &engine,
        settings: AnonymizeSettings {
            pfdcm_url,
            pacs_name: args.pacs_name.unwrap_or(batch_config.pacs_name),
            cube_url: backend.url.clone(),
            cube_user: non_empty(&backend.username),
            cube_password: non_empty(&backend.password),
            recipients: args.recipients.unwrap_or(notification.recipients),
            smtp_server: args.smtp_server.unwrap_or(notification.smtp_server),
        },
        pipeline: args.pipeline.unwrap_or(batch_config.pipeline),
        wait_for: batch_config.wait_for_node,
        anchor: args.plugin_instance_id,
        wait: args.wait,
    };
    let parallel = args
        .parallel
        .then(|| args.max_parallel.unwrap_or(batch_config.max_parallel));

    let mut errors = 0usize;
    for input in &inputs {
        info!(file = %input.display(), "Processing input");
        let sheet = match read_sheet(input) {
            Ok(sheet) => sheet,
            Err(e) => {
                error!(file = %input.display(), error = %e, "Skipping unreadable input");
                errors += 1;
                continue;
            }
        };

        let results = batch.process_sheet(&sheet, parallel).await;
        for (row, result) in results.iter().enumerate() {
            if let Some(error) = &result.error {
                error!(file = %input.display(), row = row + 1, %error, "Row failed");
                errors += 1;
            }
        }

        let rows: Vec<(Job, String)> = sheet
            .jobs
            .iter()
            .cloned()
            .zip(results.into_iter().map(|r| r.status))
            .collect();
        let output = output_path(&args.outputdir, input)?;
        write_results(&output, &sheet.headers, &rows)?;
        info!(file = %output.display(), rows = rows.len(), "Wrote results");
    }

    let outcomes = await_monitors(&engine).await;
    for outcome in &outcomes {
        let style = if outcome.verdict.is_success() {
            Style::new().green()
        } else {
            Style::new().red()
        };
        println!(
            "Workflow {}: {}",
            outcome.workflow_id,
            style.apply_to(&outcome.verdict)
        );
    }

    if errors > 0 {
        anyhow::bail!("{errors} row(s) reported an error");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(finished: bool, status: &str) -> FlowResult {
        FlowResult {
            finished,
            status: status.to_string(),
            polls: 1,
            plid: Some(5),
            workflow: Vec::new(),
            prior: None,
        }
    }

    #[test]
    fn test_row_result_from_flow() {
        let ok = RowResult::from_flow(&flow(true, "finishedSuccessfully"), "verify");
        assert_eq!(ok, RowResult::ok("finishedSuccessfully"));

        let bad = RowResult::from_flow(&flow(false, "finishedWithError"), "verify");
        assert_eq!(bad.status, "finishedWithError");
        assert!(bad.error.unwrap().contains("verify"));
    }

    #[test]
    fn test_row_result_from_launch() {
        let running = RowResult::from_launch(LaunchStatus::Running { workflow_id: 3 });
        assert_eq!(running, RowResult::ok("Pipeline running"));

        let failed = RowResult::from_launch(LaunchStatus::Failed {
            error: "boom".into(),
        });
        assert_eq!(failed.status, "Failed");
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_output_path_keeps_file_name() {
        let out = output_path(Path::new("/out"), Path::new("/in/sub/batch.csv")).unwrap();
        assert_eq!(out, PathBuf::from("/out/batch.csv"));
        assert!(output_path(Path::new("/out"), Path::new("/")).is_err());
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(""), None);
        assert_eq!(non_empty("a@b"), Some("a@b".to_string()));
    }
}
