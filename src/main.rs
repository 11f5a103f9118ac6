// ========================================================================================
//
//                      SPINT: COMMAND-LINE CALIBRATION OF FLOW MODELS
//
// ========================================================================================
//
// A thin caller over the library: it loads a flow table, calibrates one of the four
// gravity-type models (optionally once per location) and writes a TOML summary to
// stdout or to a file. All statistical work lives in the `spint` library.

#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use spint::data::load_flow_table;
use spint::{CostFunction, GravityModel, LocalAnchor, ModelKind, ModelOptions};
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(
    name = "spint",
    about = "Calibrate gravity-type spatial interaction models",
    long_about = "Calibrates unconstrained, production-, attraction- and doubly-constrained \
                 spatial interaction models as Poisson GLMs, globally or once per location."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calibrate one model on the whole flow table
    Fit(CommonArgs),
    /// Calibrate one sub-model per location
    Local {
        #[command(flatten)]
        common: CommonArgs,

        /// Location key partitioning the flows (defaults to the model's natural anchor)
        #[arg(long, value_enum)]
        anchor: Option<AnchorCli>,

        /// Restrict the run to these locations (comma separated)
        #[arg(long, value_delimiter = ',')]
        locs: Vec<String>,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Flow table with flow, cost and optional origin, destination, o_*, d_* columns
    data: PathBuf,

    /// Model variant: gravity, production, attraction or doubly
    #[arg(long, default_value = "production")]
    model: String,

    /// Distance decay: "pow" (log cost) or "exp" (raw cost)
    #[arg(long, default_value = "pow")]
    cost_func: String,

    /// TOML file with fitting options
    #[arg(long)]
    options: Option<PathBuf>,

    /// Estimate a quasi-Poisson dispersion scale
    #[arg(long)]
    quasi: bool,

    /// Write the summary here instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum AnchorCli {
    Origins,
    Destinations,
}

#[derive(Serialize)]
struct Coefficient {
    name: String,
    estimate: f64,
    std_err: f64,
    t_value: f64,
    p_value: f64,
}

#[derive(Serialize)]
struct FitSummary {
    model: String,
    cost_function: String,
    observations: usize,
    deviance: f64,
    log_likelihood: f64,
    aic: f64,
    scale: f64,
    iterations: usize,
    coefficients: Vec<Coefficient>,
}

impl FitSummary {
    fn new(model: &GravityModel) -> Self {
        let results = model.results();
        let coefficients = model
            .param_names()
            .into_iter()
            .enumerate()
            .map(|(k, name)| Coefficient {
                name,
                estimate: results.params[k],
                std_err: results.std_err[k],
                t_value: results.t_values[k],
                p_value: results.p_values[k],
            })
            .collect();
        Self {
            model: model.kind().to_string(),
            cost_function: model.cost_function().to_string(),
            observations: model.n(),
            deviance: results.deviance,
            log_likelihood: results.log_likelihood,
            aic: results.aic,
            scale: results.scale,
            iterations: results.iterations,
            coefficients,
        }
    }
}

fn calibrate(args: &CommonArgs) -> Result<GravityModel, Box<dyn Error>> {
    let kind: ModelKind = args.model.parse()?;
    let cost_function: CostFunction = args.cost_func.parse()?;
    let mut options = match &args.options {
        Some(path) => ModelOptions::load(path)?,
        None => ModelOptions::default(),
    };
    options.quasi |= args.quasi;
    let data = load_flow_table(&args.data)?.for_kind(kind);
    Ok(GravityModel::fit(kind, data, cost_function, options)?)
}

fn emit(text: &str, output: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    match output {
        Some(path) => {
            fs::write(path, text)?;
            log::info!("Summary written to '{}'", path.display());
        }
        None => print!("{text}"),
    }
    Ok(())
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Commands::Fit(args) => {
            let model = calibrate(&args)?;
            let text = toml::to_string_pretty(&FitSummary::new(&model))?;
            emit(&text, args.output.as_ref())
        }
        Commands::Local {
            common,
            anchor,
            locs,
        } => {
            let model = calibrate(&common)?;
            let anchor = match anchor {
                Some(AnchorCli::Origins) => LocalAnchor::Origins,
                Some(AnchorCli::Destinations) => LocalAnchor::Destinations,
                None => LocalAnchor::default_for(model.kind()),
            };
            let results = model.local_with(anchor, Some(locs.as_slice()))?;
            let text = toml::to_string_pretty(&results)?;
            emit(&text, common.output.as_ref())
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
