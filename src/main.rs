use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use panel_thermal::io::{read_batch, read_config, write_config, write_result};
use panel_thermal::{Scheme, SimulationConfig, SimulationResult, run_batch, run_simulation};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Transient thermal model of a layered spacecraft panel")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one configuration file
    Run {
        /// JSON configuration
        config: PathBuf,

        /// Write the full result (snapshots, statistics, ledger) as JSON
        #[arg(long)]
        output: Option<PathBuf>,

        /// Override the integration scheme
        #[arg(long, value_enum)]
        scheme: Option<SchemeArg>,
    },
    /// Run or export a built-in reference panel
    Reference {
        #[arg(value_enum, default_value_t = ReferenceModel::OneD)]
        model: ReferenceModel,

        /// Write the configuration instead of running it
        #[arg(long)]
        write_config: Option<PathBuf>,

        /// Write the full result as JSON
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run a JSON array of configurations in parallel
    Batch {
        batch: PathBuf,

        /// Directory for one result file per candidate
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SchemeArg {
    Explicit,
    CrankNicolson,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ReferenceModel {
    #[value(name = "1d")]
    OneD,
    #[value(name = "2d")]
    TwoD,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    match args.command {
        Command::Run {
            config,
            output,
            scheme,
        } => {
            let mut cfg = read_config(&config)?;
            if let Some(scheme) = scheme {
                cfg.run.scheme = match scheme {
                    SchemeArg::Explicit => Scheme::Explicit,
                    SchemeArg::CrankNicolson => Scheme::CrankNicolson,
                };
            }
            let result = run_simulation(&cfg)
                .with_context(|| format!("Simulation of {} failed", config.display()))?;
            print_summary(&result);
            if let Some(path) = output {
                write_result(&path, &result)?;
            }
        }
        Command::Reference {
            model,
            write_config: export,
            output,
        } => {
            let cfg = match model {
                ReferenceModel::OneD => SimulationConfig::reference_1d(),
                ReferenceModel::TwoD => SimulationConfig::reference_2d(),
            };
            if let Some(path) = export {
                write_config(&path, &cfg)?;
                println!("Wrote {}", path.display());
                return Ok(());
            }
            let result = run_simulation(&cfg).context("Reference simulation failed")?;
            print_summary(&result);
            if let Some(path) = output {
                write_result(&path, &result)?;
            }
        }
        Command::Batch { batch, output_dir } => {
            let configs = read_batch(&batch)?;
            if configs.is_empty() {
                bail!("Batch file {} contains no configurations", batch.display());
            }
            if let Some(dir) = &output_dir {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
            }
            let results = run_batch(&configs);
            let mut failures = 0;
            for (i, (cfg, outcome)) in configs.iter().zip(&results).enumerate() {
                let label = cfg.name.clone().unwrap_or_else(|| format!("candidate-{i}"));
                match outcome {
                    Ok(result) => {
                        println!("== {label}");
                        print_summary(result);
                        if let Some(dir) = &output_dir {
                            write_result(&result_path(dir, &label), result)?;
                        }
                    }
                    Err(err) => {
                        failures += 1;
                        println!("== {label}: FAILED: {err}");
                    }
                }
            }
            if failures == configs.len() {
                bail!("All {failures} candidates failed");
            }
        }
    }
    Ok(())
}

fn result_path(dir: &Path, label: &str) -> PathBuf {
    let safe: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    dir.join(format!("{safe}.json"))
}

fn print_summary(result: &SimulationResult) {
    let plan = &result.timestep;
    println!(
        "{:?}: {} steps of {:.4} s (requested {:.4} s, stability limit {:.3e} s{})",
        result.scheme,
        plan.steps,
        plan.effective,
        plan.requested,
        plan.stability_limit,
        if plan.clamped { ", clamped" } else { "" }
    );
    println!(
        "Mean sunlit fraction {:.3}, energy residual {:.2e}",
        result.mean_sunlit_fraction,
        result.energy.relative_residual()
    );
    if result.clamped_nodes > 0 {
        println!("Temperature clamped at {} node updates", result.clamped_nodes);
    }

    let mut names: Vec<&String> = result.report_regions.iter().collect();
    for name in result.region_stats.keys() {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    println!("{:<16} {:>10} {:>10} {:>10}", "region", "min [C]", "mean [C]", "max [C]");
    for name in names {
        if let Some(stats) = result.region_celsius(name) {
            println!(
                "{:<16} {:>10.2} {:>10.2} {:>10.2}",
                name, stats.min, stats.mean, stats.max
            );
        }
    }
}
