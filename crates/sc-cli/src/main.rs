//! Synthetic-control CLI
//!
//! Reads a validated panel as JSON (array of `{unit_id, period, outcome}`
//! rows), runs the estimation pipeline, and emits pretty JSON for the
//! visualization layer to consume. The library crates stay silent and
//! return diagnostics; this binary is where they get logged.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use sc_core::{Panel, PanelRecord, TreatmentSpec};
use sc_inference::{
    BayesConfig, BayesWeightSolver, DonorSpec, ScConfig, SolverConfig, SyntheticControl,
};

#[derive(Parser)]
#[command(name = "synthcontrol")]
#[command(about = "Synthetic-control estimation for panel interventions")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunArgs {
    /// Input panel: JSON array of {unit_id, period, outcome} rows
    #[arg(short, long)]
    input: PathBuf,

    /// Unit that received the intervention
    #[arg(long)]
    treated_unit: String,

    /// First period at which the intervention is in effect
    #[arg(long)]
    treatment_period: i64,

    /// Exclude a unit from the donor pool (repeatable; contamination control)
    #[arg(long = "exclude")]
    excluded: Vec<String>,

    /// Minimum pre-treatment periods required to fit weights
    #[arg(long, default_value = "6")]
    min_pre_periods: usize,

    /// Ridge penalty λ (tie-break / conditioning fallback)
    #[arg(long, default_value = "1e-6")]
    ridge_lambda: f64,

    /// Condition-number threshold for the ill-conditioning warning
    #[arg(long, default_value = "1e8")]
    condition_threshold: f64,

    /// Post-window horizon (inclusive). Defaults to the last period.
    #[arg(long)]
    post_end: Option<i64>,

    /// Weight solver: "qp" (deterministic) or "bayes" (posterior sampling)
    #[arg(long, default_value = "qp")]
    solver: String,

    /// Posterior draws (bayes solver only)
    #[arg(long, default_value = "2000")]
    draws: usize,

    /// Warmup iterations (bayes solver only)
    #[arg(long, default_value = "1000")]
    burn_in: usize,

    /// RNG seed (bayes solver only)
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Threads for placebo fan-out (0 = auto)
    #[arg(long, default_value = "0")]
    threads: usize,

    /// Output file for results (pretty JSON). Defaults to stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit weights, project the counterfactual, estimate the effect
    Fit {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Placebo inference: rerun the pipeline per donor and rank the
    /// treated unit's fit ratio
    Infer {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Print version
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Fit { run } => cmd_fit(&run),
        Commands::Infer { run } => cmd_infer(&run),
        Commands::Version => {
            println!("synthcontrol {}", sc_core::VERSION);
            Ok(())
        }
    }
}

fn cmd_fit(run: &RunArgs) -> Result<()> {
    let panel = load_panel(&run.input, run.threads)?;
    let sc = build_estimator(run)?;
    let spec = TreatmentSpec::new(run.treated_unit.clone(), run.treatment_period);

    let fit = sc.fit(&panel, &spec)?;
    for w in &fit.warnings {
        tracing::warn!("{w}");
    }
    tracing::info!(
        solver = %fit.solver,
        objective = fit.objective,
        converged = fit.converged,
        rmspe_pre = fit.effect.rmspe_pre,
        "fit complete"
    );

    write_json(run.output.as_ref(), serde_json::to_value(&fit)?)
}

fn cmd_infer(run: &RunArgs) -> Result<()> {
    let panel = load_panel(&run.input, run.threads)?;
    let sc = build_estimator(run)?;
    let spec = TreatmentSpec::new(run.treated_unit.clone(), run.treatment_period);

    let fit = sc.fit(&panel, &spec)?;
    for w in &fit.warnings {
        tracing::warn!("{w}");
    }

    let dist = sc.infer(&panel, &spec)?;
    for s in &dist.skipped {
        tracing::warn!(unit = %s.unit, reason = %s.reason, "placebo run skipped");
    }
    tracing::info!(
        rank = dist.rank,
        n_ranked = dist.n_ranked,
        p_value = dist.p_value,
        n_degenerate = dist.n_degenerate,
        "inference complete"
    );

    let output_json = serde_json::json!({
        "fit": fit,
        "placebo": dist,
    });
    write_json(run.output.as_ref(), output_json)
}

fn build_estimator(run: &RunArgs) -> Result<SyntheticControl> {
    let config = ScConfig {
        donor: DonorSpec {
            min_pre_periods: run.min_pre_periods,
            excluded_units: run.excluded.clone(),
        },
        solver: SolverConfig {
            ridge_lambda: run.ridge_lambda,
            condition_threshold: run.condition_threshold,
            ..Default::default()
        },
        post_end: run.post_end,
        ..Default::default()
    };

    match run.solver.as_str() {
        "qp" => Ok(SyntheticControl::new(config)),
        "bayes" => {
            let bayes = BayesWeightSolver::new(BayesConfig {
                draws: run.draws,
                burn_in: run.burn_in,
                seed: run.seed,
                ..Default::default()
            });
            Ok(SyntheticControl::with_solver(config, Box::new(bayes)))
        }
        other => anyhow::bail!("unknown solver '{other}' (expected 'qp' or 'bayes')"),
    }
}

fn load_panel(input: &PathBuf, threads: usize) -> Result<Panel> {
    if threads > 0 {
        // A global pool may already exist; keep going either way.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global();
    }

    tracing::info!(path = %input.display(), "loading panel");
    let json = std::fs::read_to_string(input)?;
    let records: Vec<PanelRecord> = serde_json::from_str(&json)?;
    let panel = Panel::from_records(&records)?;
    tracing::info!(units = panel.n_units(), periods = panel.n_periods(), "panel validated");
    Ok(panel)
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
