//! Ground-plane calibration tool
//!
//! Reads a calibration input file, reuses the stored parameters of the chosen
//! model or calibrates it from the training correspondences, and reports the
//! ground-position error on the training and held-out sets.
//!
//! Usage:
//! ```bash
//! ground-plane-tools field.txt --model ray --generations 20000
//! ```
//!
//! Exit codes: 0 success, 2 usage, 3 invalid input, 4 file persistence,
//! 5 calibration failure.

use clap::{Parser, ValueEnum};
use ground_plane_tools::camera::{
    estimate_reference_pov, CalibrationError, PolarModel, ProjectionModel, RayModel,
};
use ground_plane_tools::io::params::{load_params, save_params};
use ground_plane_tools::io::CalibrationInput;
use ground_plane_tools::optimization::{CalibrationConfig, CalibrationDriver, LogProgress};
use ground_plane_tools::util::{self, UtilError};
use log::info;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModelKind {
    /// Ray / up-vector model, error in meters
    Ray,
    /// Polar angle/distance model, error in pixels
    Polar,
}

impl ModelKind {
    fn name(&self) -> &'static str {
        match self {
            ModelKind::Ray => "ray",
            ModelKind::Polar => "polar",
        }
    }
}

/// Ground-plane camera calibration tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Calibration input file
    input: PathBuf,

    /// Projection model to calibrate
    #[arg(short, long, value_enum, default_value = "ray")]
    model: ModelKind,

    /// Parameter file (default: <INPUT stem>.<model>.params beside the input)
    #[arg(short, long)]
    params: Option<PathBuf>,

    /// Calibrate even if the parameter file exists
    #[arg(long)]
    recalibrate: bool,

    /// YAML file with calibration settings; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Generation budget
    #[arg(short, long)]
    generations: Option<usize>,

    /// Mean error at which calibration stops
    #[arg(long)]
    precision: Option<f64>,

    /// Random seed
    #[arg(short, long)]
    seed: Option<u64>,

    /// Candidates per generation
    #[arg(long)]
    population: Option<usize>,

    /// Candidates kept unchanged between generations
    #[arg(long)]
    elites: Option<usize>,

    /// Score candidates on one thread
    #[arg(long)]
    sequential: bool,

    /// Write the report as JSON
    #[arg(long)]
    report_json: Option<PathBuf>,

    /// Write the per-correspondence report as CSV
    #[arg(long)]
    report_csv: Option<PathBuf>,

    /// Write the calibrated model as YAML
    #[arg(long)]
    model_yaml: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error("invalid input: {0}")]
    Input(CalibrationError),
    #[error("{0}")]
    Persistence(CalibrationError),
    #[error("calibration failed: {0}")]
    Calibration(CalibrationError),
    #[error("cannot write report: {0}")]
    Report(UtilError),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            CliError::Input(_) => 3,
            CliError::Persistence(_) | CliError::Report(_) => 4,
            CliError::Calibration(_) => 5,
        }
    }
}

fn path_str(path: &Path) -> Result<&str, CliError> {
    path.to_str().ok_or_else(|| {
        CliError::Input(CalibrationError::InvalidParams(format!(
            "path {} is not valid UTF-8",
            path.display()
        )))
    })
}

fn build_config(cli: &Cli) -> Result<CalibrationConfig, CliError> {
    let mut config = match &cli.config {
        Some(path) => {
            CalibrationConfig::load_from_yaml(path_str(path)?).map_err(CliError::Calibration)?
        }
        None => CalibrationConfig::default(),
    };
    if let Some(generations) = cli.generations {
        config.max_generations = generations;
    }
    if let Some(precision) = cli.precision {
        config.precision = precision;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(population) = cli.population {
        config.population_size = population;
    }
    if let Some(elites) = cli.elites {
        config.elite_count = elites;
    }
    if cli.sequential {
        config.parallel = false;
    }
    config.validate().map_err(CliError::Calibration)?;
    Ok(config)
}

fn default_params_path(input: &Path, model: ModelKind) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "calibration".to_string());
    input.with_file_name(format!("{stem}.{}.params", model.name()))
}

/// Reuses or calibrates `model`, then reports on it.
fn run_model<M: ProjectionModel>(
    mut model: M,
    input: &CalibrationInput,
    cli: &Cli,
    config: CalibrationConfig,
) -> Result<(), CliError> {
    let params_path = cli
        .params
        .clone()
        .unwrap_or_else(|| default_params_path(&cli.input, cli.model));

    let calibration = if params_path.exists() && !cli.recalibrate {
        let values = load_params(&params_path, model.param_specs().len())
            .map_err(CliError::Persistence)?;
        model.set_params(&values).map_err(CliError::Persistence)?;
        info!("Reusing parameters from {}", params_path.display());
        None
    } else {
        let unit = model.calibration_direction().unit();
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        let mut driver =
            CalibrationDriver::new(config, rng).with_observer(Box::new(LogProgress::new(unit)));
        let result = driver
            .calibrate(&mut model, &input.training)
            .map_err(CliError::Calibration)?;
        save_params(&params_path, &result.params).map_err(CliError::Persistence)?;
        Some(result)
    };

    let report = util::build_report(&model, calibration, &input.training, &input.test)
        .map_err(CliError::Report)?;
    util::display_report(&report);

    if let Some(path) = &cli.report_json {
        util::export_report_json(&report, path_str(path)?).map_err(CliError::Report)?;
        info!("Report written to {}", path.display());
    }
    if let Some(path) = &cli.report_csv {
        util::export_report_csv(&report, path_str(path)?).map_err(CliError::Report)?;
        info!("Report written to {}", path.display());
    }
    if let Some(path) = &cli.model_yaml {
        model
            .save_to_yaml(path_str(path)?)
            .map_err(CliError::Persistence)?;
        info!("Model written to {}", path.display());
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<(), CliError> {
    let config = build_config(cli)?;
    let input = CalibrationInput::load(path_str(&cli.input)?).map_err(CliError::Input)?;
    info!(
        "Loaded {} training and {} test correspondences from {}",
        input.training.len(),
        input.test.len(),
        cli.input.display()
    );

    match cli.model {
        ModelKind::Ray => {
            let model = RayModel::new(input.camera.clone(), input.pov_box.unwrap_or_default());
            run_model(model, &input, cli, config)
        }
        ModelKind::Polar => {
            let reference_pov = match &input.pov_box {
                Some(pov_box) => pov_box.center(),
                None => estimate_reference_pov(&input.training, &input.camera.resolution())
                    .map_err(CliError::Input)?,
            };
            info!("Reference point of view: {:?}", reference_pov.as_slice());
            let model =
                PolarModel::new(input.camera.clone(), reference_pov).map_err(CliError::Input)?;
            run_model(model, &input, cli, config)
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}
