//! budgetmix: marketing-mix attribution and budget reallocation report.
//!
//! Reads a validated JSON dataset of monthly observations, runs the analysis
//! pipeline and writes the report as JSON.

use anyhow::Context;
use budgetmix_core::config::AppConfig;
use budgetmix_core::{EfficiencyMode, Observation, ObservationSet, ScenarioBase, WeightingScheme};
use budgetmix_engine::{run_analysis, AnalysisParams};
use clap::{Parser, ValueEnum};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "budgetmix")]
#[command(about = "Marketing-mix attribution and budget reallocation")]
#[command(version)]
struct Cli {
    /// JSON array of observations: {"month", "sales", "spend": {channel: amount}}
    #[arg(long, short)]
    input: PathBuf,

    /// Optional TOML config file
    #[arg(long, env = "BUDGETMIX_CONFIG")]
    config: Option<String>,

    /// Channels to analyse (defaults to every channel in the dataset)
    #[arg(long, value_delimiter = ',')]
    channels: Vec<String>,

    /// Total future budget (overrides config)
    #[arg(long)]
    budget: Option<f64>,

    /// Channel to move budget away from (overrides config)
    #[arg(long)]
    reduce: Option<String>,

    /// Fraction of the reduced channel's budget to move (overrides config)
    #[arg(long)]
    reduction_fraction: Option<f64>,

    /// Efficiency penalty on moved spend (overrides config)
    #[arg(long)]
    switching_cost: Option<f64>,

    #[arg(long, value_enum)]
    efficiency_mode: Option<EfficiencyArg>,

    #[arg(long, value_enum)]
    weighting: Option<WeightingArg>,

    #[arg(long, value_enum)]
    scenario_base: Option<ScenarioArg>,

    /// Write the report here instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EfficiencyArg {
    Ratio,
    Share,
    Gross,
}

impl From<EfficiencyArg> for EfficiencyMode {
    fn from(arg: EfficiencyArg) -> Self {
        match arg {
            EfficiencyArg::Ratio => EfficiencyMode::Ratio,
            EfficiencyArg::Share => EfficiencyMode::Share,
            EfficiencyArg::Gross => EfficiencyMode::Gross,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum WeightingArg {
    Efficiency,
    Blended,
}

impl From<WeightingArg> for WeightingScheme {
    fn from(arg: WeightingArg) -> Self {
        match arg {
            WeightingArg::Efficiency => WeightingScheme::Efficiency,
            WeightingArg::Blended => WeightingScheme::Blended,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScenarioArg {
    Proposed,
    Historical,
}

impl From<ScenarioArg> for ScenarioBase {
    fn from(arg: ScenarioArg) -> Self {
        match arg {
            ScenarioArg::Proposed => ScenarioBase::Proposed,
            ScenarioArg::Historical => ScenarioBase::Historical,
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout carries only the report.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "budgetmix=info,budgetmix_engine=info".into()),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).map_err(|e| {
        error!(error = %e, "Failed to load config");
        e
    })?;

    // Apply CLI overrides
    if let Some(budget) = cli.budget {
        config.simulation.total_budget = budget;
    }
    if let Some(channel) = cli.reduce {
        config.simulation.channel_to_reduce = Some(channel);
    }
    if let Some(fraction) = cli.reduction_fraction {
        config.simulation.reduction_fraction = fraction;
    }
    if let Some(cost) = cli.switching_cost {
        config.simulation.switching_cost_fraction = cost;
    }
    if let Some(mode) = cli.efficiency_mode {
        config.analysis.efficiency_mode = mode.into();
    }
    if let Some(weighting) = cli.weighting {
        config.analysis.weighting = weighting.into();
    }
    if let Some(base) = cli.scenario_base {
        config.analysis.scenario_base = base.into();
    }
    config.validate()?;

    info!(
        total_budget = config.simulation.total_budget,
        efficiency_mode = ?config.analysis.efficiency_mode,
        weighting = ?config.analysis.weighting,
        "Configuration loaded"
    );

    let observations = load_observations(&cli.input)?;
    let channels = if cli.channels.is_empty() {
        observations.channels().into_iter().collect()
    } else {
        cli.channels
    };
    info!(
        rows = observations.len(),
        channels = ?channels,
        "Observations loaded"
    );

    let params = AnalysisParams::from_config(&config);
    let report = run_analysis(&observations, &channels, &params).map_err(|e| {
        error!(error = %e, "Analysis failed");
        e
    })?;

    match cli.output {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("creating report file {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &report)?;
            writer.flush()?;
            info!(path = %path.display(), report_id = %report.id, "Report written");
        }
        None => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            serde_json::to_writer_pretty(&mut handle, &report)?;
            writeln!(handle)?;
        }
    }

    Ok(())
}

fn load_observations(path: &PathBuf) -> anyhow::Result<ObservationSet> {
    let file =
        File::open(path).with_context(|| format!("opening dataset {}", path.display()))?;
    let rows: Vec<Observation> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing dataset {}", path.display()))?;
    Ok(ObservationSet::new(rows))
}
