use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use manuscript_core::{
    CategoryCoverage, JobStatus, MemoryRunStore, OrchestratorConfig, QcError, QcStatus,
    RefineMode, ResearchFrame, SectionKey, SimulatedBackend, SimulatorConfig, WizardError,
    WizardStateMachine, WizardStep,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Outcome of a simulated run
#[derive(Debug, Serialize)]
struct RunSummary {
    project_id: String,
    manuscript_id: String,
    sections: Vec<SectionKey>,
    estimated_cost_usd: Option<(f64, f64)>,
    jobs_submitted: usize,
    final_job_status: Option<JobStatus>,
    drafts: usize,
    recommendations_applied: Vec<String>,
    accepted_sections: usize,
    qc_status: QcStatus,
    qc_coverage: Vec<CategoryCoverage>,
    strict_export_refused: bool,
    export_filename: Option<String>,
    export_with_warnings: bool,
    reached_step: WizardStep,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn cli() -> Command {
    Command::new("manuscript-run")
        .version(manuscript_core::VERSION)
        .about("Manuscript wizard run orchestration")
        .subcommand_required(true)
        .subcommand(
            Command::new("simulate")
                .about("Walk all five wizard steps against the in-process simulator")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_name("FILE")
                        .value_parser(clap::value_parser!(PathBuf))
                        .help("TOML orchestrator configuration"),
                )
                .arg(
                    Arg::new("cancel")
                        .long("cancel")
                        .action(ArgAction::SetTrue)
                        .help("Cancel the first generation job, then retry it"),
                )
                .arg(
                    Arg::new("fail-first")
                        .long("fail-first")
                        .action(ArgAction::SetTrue)
                        .help("Make the first generation job fail, then retry it"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Emit JSON logs and a JSON summary"),
                ),
        )
}

async fn simulate(args: &ArgMatches) -> anyhow::Result<RunSummary> {
    let config = match args.get_one::<PathBuf>("config") {
        Some(path) => OrchestratorConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => OrchestratorConfig::new(),
    };
    let backend = Arc::new(SimulatedBackend::with_config(SimulatorConfig {
        fail_first_attempt: args.get_flag("fail-first"),
        ..SimulatorConfig::default()
    }));
    let mut wizard = WizardStateMachine::new(
        config,
        Arc::clone(&backend) as Arc<dyn manuscript_core::ManuscriptBackend>,
        Arc::new(MemoryRunStore::new()),
    )?;

    // Step 1
    wizard.update_research_frame(
        ResearchFrame::new("Statin use and cardiovascular outcomes", "BMJ Open")
            .with_answer("design", "retrospective cohort")
            .with_answer("population", "adults aged 40-75"),
    );
    let run = wizard.save_research_frame().await?;

    // Step 2
    wizard.plan_sections(RefineMode::Merge).await?;
    advance(&mut wizard, WizardStep::RunGeneration)?;

    // Step 3
    let estimate = wizard.estimate_generation("").await?;
    let budget = format!("{:.2}", estimate.estimated_cost_usd_high);
    wizard.start_generation("", Some(&budget), None).await?;
    if args.get_flag("cancel") {
        let job = wizard.cancel_generation().await?;
        tracing::info!("Cancellation requested; job is {}", job.status);
    }
    let mut job = wizard.wait_for_generation().await;
    while let Some(settled) = job.as_ref().filter(|j| j.status.is_retryable()) {
        tracing::info!("Job {} ended {}; retrying", settled.id, settled.status);
        wizard.retry_generation().await?;
        job = wizard.wait_for_generation().await;
    }
    advance(&mut wizard, WizardStep::DraftReview)?;

    // Step 4
    let drafts = wizard.load_drafts().await?;
    let mut applied = Vec::new();
    while let Some(rec) = wizard
        .recommendations()
        .into_iter()
        .find(|r| !applied.contains(&r.id))
    {
        applied.push(wizard.apply_recommendation(&rec.id)?.id);
    }
    let drafted: Vec<SectionKey> = wizard.drafts().keys().copied().collect();
    for section in drafted {
        wizard.accept_section(section)?;
    }
    advance(&mut wizard, WizardStep::QcExport)?;

    // Step 5
    wizard.run_qc().await?;
    let strict = wizard.export_strict().await;
    let strict_export_refused = matches!(strict, Err(WizardError::Qc(QcError::NotPassed)));
    let artifact = match strict {
        Ok(artifact) => artifact,
        Err(e) if e.is_guard_refusal() => {
            tracing::warn!("{}; exporting with warnings", e.user_message());
            wizard.export_with_warnings().await?
        }
        Err(e) => return Err(e.into()),
    };

    let summary = RunSummary {
        project_id: run.project_id.to_string(),
        manuscript_id: run.manuscript_id.to_string(),
        sections: wizard.outline().selected(),
        estimated_cost_usd: wizard
            .estimate()
            .map(|e| (e.estimated_cost_usd_low, e.estimated_cost_usd_high)),
        jobs_submitted: backend.submitted_jobs(),
        final_job_status: job.map(|j| j.status),
        drafts,
        recommendations_applied: applied,
        accepted_sections: wizard.accepted_sections().len(),
        qc_status: wizard.qc_status(),
        qc_coverage: wizard.qc_coverage(),
        strict_export_refused,
        export_filename: Some(artifact.filename),
        export_with_warnings: artifact.with_warnings,
        reached_step: wizard.current_step(),
    };
    wizard.dispose();
    Ok(summary)
}

fn advance(wizard: &mut WizardStateMachine, step: WizardStep) -> anyhow::Result<()> {
    match wizard.set_current_step(step) {
        manuscript_core::NavigationOutcome::Moved(_) => Ok(()),
        manuscript_core::NavigationOutcome::Blocked {
            blocking_step,
            reason,
        } => anyhow::bail!("cannot reach {step}: {blocking_step} incomplete ({reason})"),
    }
}

fn print_summary(summary: &RunSummary) {
    println!("Simulated run");
    println!("=============");
    println!("Project:     {}", summary.project_id);
    println!("Manuscript:  {}", summary.manuscript_id);
    println!(
        "Sections:    {}",
        summary
            .sections
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    if let Some((low, high)) = summary.estimated_cost_usd {
        println!("Estimate:    ${low:.2} - ${high:.2}");
    }
    println!("Jobs:        {}", summary.jobs_submitted);
    match summary.final_job_status {
        Some(status) => println!("Final job:   {status}"),
        None => println!("Final job:   none"),
    }
    println!("Drafts:      {}", summary.drafts);
    println!("Accepted:    {}", summary.accepted_sections);
    for id in &summary.recommendations_applied {
        println!("  applied    {id}");
    }
    println!("QC status:   {:?}", summary.qc_status);
    for row in &summary.qc_coverage {
        let state = if row.is_clear() {
            "clear".to_string()
        } else {
            format!("{} finding(s)", row.count)
        };
        println!("  {:<20} {}", row.category.to_string(), state);
    }
    if let Some(filename) = &summary.export_filename {
        let label = if summary.export_with_warnings {
            " (with warnings)"
        } else {
            ""
        };
        println!("Export:      {filename}{label}");
    }
    println!("Step:        {}", summary.reached_step);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let json = args.get_flag("json");
            init_tracing(json);
            let summary = simulate(args).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
