#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use gstci::config::{RegionConfig, RegionInput};
use gstci::report::RegionReport;

#[derive(Args)]
pub struct IntervalsArgs {
    /// TOML file holding a `gateset` table and a `hessian` matrix
    pub input: PathBuf,

    /// Region configuration file (see `gstci config`)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Confidence level as a percentage in (0, 100); overrides the configuration file
    #[arg(long, value_name = "PERCENT")]
    pub level: Option<f64>,

    /// Hessian projection: none, std, standard, optimal; overrides the configuration file
    #[arg(long, value_name = "MODE")]
    pub projection: Option<String>,

    /// Write the full interval report to this TOML file
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,
}

#[derive(Parser)]
#[command(
    name = "gstci",
    about = "Confidence regions and error bars for gate set tomography estimates",
    long_about = "Projects the Hessian of a gate set tomography fit onto the gauge-invariant \
                 subspace, calibrates it at a confidence level and reports profile-likelihood \
                 half-widths for every gate set parameter."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a confidence region and print per-object intervals
    #[command(about = "Compute confidence intervals (optionally writes report.toml)")]
    Intervals(IntervalsArgs),
    /// Print or write the default configuration
    #[command(about = "Show the default region configuration (optionally writes config.toml)")]
    Config {
        /// Write the configuration here instead of printing it
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();

    let result = match command {
        Some(Commands::Intervals(args)) => run_intervals(args),
        Some(Commands::Config { out }) => run_config(out),
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_intervals(args: IntervalsArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => RegionConfig::load(path)?,
        None => RegionConfig::default(),
    };
    config.apply_overrides(args.level, args.projection.as_deref())?;

    println!("Loading gate set and Hessian from: {}", args.input.display());
    let input = RegionInput::load(&args.input)?;
    println!(
        "Loaded {} gates on dimension {} with a {}x{} Hessian",
        input.gateset.gates().len(),
        input.gateset.dim(),
        input.hessian.nrows(),
        input.hessian.ncols()
    );

    let region = config.builder(input.gateset, input.hessian).build()?;
    let report = RegionReport::from_region(&region, config.propagation.eps)?;
    print_report(&report);

    if let Some(path) = &args.out {
        report.save(path)?;
        println!("Report written to: {}", path.display());
    }
    Ok(())
}

fn run_config(out: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = RegionConfig::default();
    match out {
        Some(path) => {
            config.save(&path)?;
            println!("Default configuration written to: {}", path.display());
        }
        None => print!("{}", config.to_toml_string()?),
    }
    Ok(())
}

fn print_report(report: &RegionReport) {
    println!();
    println!(
        "{}% confidence region (projection: {})",
        report.confidence_level, report.projection
    );
    println!(
        "  non-gauge parameters: {}, gauge parameters: {}",
        report.n_nongauge_params, report.n_gauge_params
    );
    println!(
        "  interval scaling sqrt(Ck/C1): {:.6}",
        report.interval_scaling
    );
    println!(
        "  gate interval norm sqrt(sum(gateCIs^2)): {:.6e}",
        report.gate_interval_norm
    );
    println!();
    println!("{:<12} {:>8} {:>14} {:>14}", "object", "params", "max CI", "mean CI");
    for object in &report.objects {
        let n = object.half_widths.len();
        let max = object.half_widths.iter().copied().fold(0.0_f64, f64::max);
        let mean = if n == 0 {
            0.0
        } else {
            object.half_widths.iter().sum::<f64>() / n as f64
        };
        println!("{:<12} {:>8} {:>14.6e} {:>14.6e}", object.label, n, max, mean);
    }
    println!();
    println!("{:<12} {:>14} {:>14}", "gate", "trace", "+/-");
    for trace in &report.gate_traces {
        println!(
            "{:<12} {:>14.8} {:>14.6e}",
            trace.label, trace.value, trace.half_width
        );
    }
}
