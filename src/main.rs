//! BMI Runner
//!
//! Command line driver: runs a model library from start to end time, or
//! prints what it exposes.

use anyhow::{anyhow, bail, Context, Result};
use bmi::bmi::{BmiWrapper, CompoundLayout, LogCrateSink, VarType, VariableInfo};
use bmi::config::RunnerConfig;
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "bmi-runner")]
#[command(version)]
#[command(about = "Run simulation models exposing the Basic Model Interface", long_about = None)]
struct Cli {
    /// Runner configuration (default: bmi.toml in this or a parent directory)
    #[arg(long, global = true)]
    config_file: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "bmi::native=warn"
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a model until its end time
    Run {
        /// Engine name (libENGINE.so) or path to the library
        engine: Option<String>,

        /// Model configuration file
        config: Option<PathBuf>,

        /// Time step (default: the model's own)
        #[arg(long)]
        dt: Option<f64>,

        /// Stop time (default: the model's end time)
        #[arg(long)]
        end_time: Option<f64>,

        /// Do not forward the model's log messages
        #[arg(long)]
        no_native_logs: bool,
    },

    /// Print the variables and compound types of a model as JSON
    Inspect {
        /// Engine name (libENGINE.so) or path to the library
        engine: Option<String>,

        /// Model configuration file
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config_file {
        Some(path) => RunnerConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => {
            let cwd = std::env::current_dir().context("Failed to read working directory")?;
            RunnerConfig::find_and_load(&cwd).context("Failed to load bmi.toml")?
        }
    };

    let mut logger = env_logger::Builder::from_env(
        Env::default().default_filter_or(config.run.log_level.as_str()),
    );
    if let Some(level) = &cli.log_level {
        logger.parse_filters(level);
    }
    logger.init();

    debug!("Configuration loaded: {config:?}");

    match cli.command {
        Commands::Run {
            engine,
            config: model_config,
            dt,
            end_time,
            no_native_logs,
        } => cmd_run(
            &config,
            engine,
            model_config,
            dt.or(config.run.time_step),
            end_time.or(config.run.end_time),
            config.run.forward_native_logs && !no_native_logs,
        ),
        Commands::Inspect {
            engine,
            config: model_config,
        } => cmd_inspect(&config, engine, model_config),
    }
}

/// Wrapper for the engine and model configuration given on the command line
/// or in the runner configuration
fn build_wrapper(
    config: &RunnerConfig,
    engine: Option<String>,
    model_config: Option<PathBuf>,
) -> Result<BmiWrapper> {
    let engine = engine
        .or_else(|| config.model.engine.clone())
        .ok_or_else(|| anyhow!("No engine given on the command line or in bmi.toml"))?;

    let mut wrapper = BmiWrapper::new(engine.as_str())
        .context("Failed to create model bridge")?
        .with_locator(config.locator(&engine));
    if let Some(path) = model_config.or_else(|| config.model.config.clone()) {
        wrapper = wrapper.with_config(path);
    }
    Ok(wrapper)
}

fn cmd_run(
    config: &RunnerConfig,
    engine: Option<String>,
    model_config: Option<PathBuf>,
    dt: Option<f64>,
    end_time: Option<f64>,
    forward_logs: bool,
) -> Result<()> {
    let mut model = build_wrapper(config, engine, model_config)?;
    if forward_logs {
        model.set_logger(Arc::new(LogCrateSink))?;
    }
    let name = model.engine().to_string();

    let mut session = model
        .enter()
        .with_context(|| format!("Failed to start model {}", name))?;

    let end = match end_time {
        Some(t) => t,
        None => session.get_end_time()?,
    };
    let mut t = session.get_current_time()?;
    info!("Running {} from t={} to t={}", name, t, end);

    let start = Instant::now();
    let mut steps = 0u64;
    while t < end {
        session
            .update(dt)
            .with_context(|| format!("Model {} failed at t={}", name, t))?;
        let next = session.get_current_time()?;
        if next <= t {
            bail!("Model time did not advance past t={}", t);
        }
        t = next;
        steps += 1;
        info!("t={}", t);
    }

    session.exit().context("Failed to finalize model")?;
    info!(
        "Finished {} steps in {:.2?} at t={}",
        steps,
        start.elapsed(),
        t
    );
    Ok(())
}

#[derive(Serialize)]
struct Inspection {
    engine: String,
    library: Option<PathBuf>,
    start_time: f64,
    end_time: f64,
    time_step: f64,
    variables: Vec<VariableInfo>,
    compounds: BTreeMap<String, CompoundLayout>,
}

fn cmd_inspect(
    config: &RunnerConfig,
    engine: Option<String>,
    model_config: Option<PathBuf>,
) -> Result<()> {
    let mut model = build_wrapper(config, engine, model_config)?;
    let name = model.engine().to_string();
    let session = model
        .enter()
        .with_context(|| format!("Failed to start model {}", name))?;

    let variables = session.variables().context("Failed to list variables")?;
    let mut compounds = BTreeMap::new();
    for var in &variables {
        if let VarType::Compound(type_name) = &var.var_type {
            if compounds.contains_key(type_name) {
                continue;
            }
            match session.compound_layout(type_name) {
                Ok(layout) => {
                    compounds.insert(type_name.clone(), (*layout).clone());
                }
                Err(e) => warn!("Skipping compound {}: {}", type_name, e),
            }
        }
    }

    let inspection = Inspection {
        engine: name,
        library: session.descriptor().map(|d| d.path.clone()),
        start_time: session.get_start_time()?,
        end_time: session.get_end_time()?,
        time_step: session.get_time_step()?,
        variables,
        compounds,
    };
    println!("{}", serde_json::to_string_pretty(&inspection)?);

    session.exit().context("Failed to finalize model")?;
    Ok(())
}
