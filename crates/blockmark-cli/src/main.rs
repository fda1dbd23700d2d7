//! `blockmark` command line tool: decode or match a candidate quad in an
//! image and print the result as JSON.

use blockmark::core::Quad;
use blockmark::decode;
use blockmark::marker::PipelineParams;
use blockmark::matching::MarkerImageDatabase;
use clap::{Parser, Subcommand};
use nalgebra::Point2;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "blockmark", version, about = "Decode block fiducial markers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the legacy bit-pattern decoder on a candidate quad.
    Decode {
        /// Grayscale input image.
        #[arg(long)]
        image: PathBuf,
        /// Candidate corners `x0,y0,x1,y1,x2,y2,x3,y3` in order top-left,
        /// bottom-left, top-right, bottom-right.
        #[arg(long)]
        corners: String,
        /// Pipeline parameters as JSON; defaults apply when omitted.
        #[arg(long)]
        params: Option<PathBuf>,
    },
    /// Match a candidate quad against a directory of canonical marker images.
    Match {
        #[arg(long)]
        image: PathBuf,
        /// Candidate corners `x0,y0,x1,y1,x2,y2,x3,y3` in order top-left,
        /// bottom-left, top-right, bottom-right.
        #[arg(long)]
        corners: String,
        /// Directory of canonical marker PNGs named after their labels.
        #[arg(long)]
        database: PathBuf,
        /// Database resolution in pixels per side.
        #[arg(long, default_value_t = 32)]
        grid: usize,
        #[arg(long)]
        params: Option<PathBuf>,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("--corners expects 8 comma-separated numbers (x0,y0,...,x3,y3), got {0}")]
    CornerCount(usize),

    #[error("could not parse corner coordinate: {0}")]
    CornerNumber(#[from] std::num::ParseFloatError),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Pipeline(#[from] blockmark::marker::Error),

    #[error(transparent)]
    Database(#[from] blockmark::matching::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn parse_corners(s: &str) -> Result<Quad, CliError> {
    let values: Vec<f32> = s
        .split(',')
        .map(|v| v.trim().parse::<f32>())
        .collect::<Result<_, _>>()?;
    if values.len() != 8 {
        return Err(CliError::CornerCount(values.len()));
    }
    Ok(Quad::new([
        Point2::new(values[0], values[1]),
        Point2::new(values[2], values[3]),
        Point2::new(values[4], values[5]),
        Point2::new(values[6], values[7]),
    ]))
}

fn load_params(path: Option<&PathBuf>) -> Result<PipelineParams, CliError> {
    match path {
        Some(p) => Ok(PipelineParams::from_json_file(p)?),
        None => Ok(PipelineParams::default()),
    }
}

fn corners_json(quad: &Quad) -> serde_json::Value {
    serde_json::Value::Array(
        quad.corners
            .iter()
            .map(|c| serde_json::json!([c.x, c.y]))
            .collect(),
    )
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Decode {
            image,
            corners,
            params,
        } => {
            let img = ::image::open(&image)?.to_luma8();
            let quad = parse_corners(&corners)?;
            let params = load_params(params.as_ref())?;

            let results = decode::decode_blocks(&img, &[quad], &params);
            let out: Vec<_> = results
                .iter()
                .map(|d| {
                    serde_json::json!({
                        "validity": format!("{:?}", d.marker.validity),
                        "orientation_degrees": d.marker.observed_orientation,
                        "corners": corners_json(&d.marker.corners),
                        "block_type": d.result.map(|b| b.block_type),
                        "face_type": d.result.map(|b| b.face_type),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Match {
            image,
            corners,
            database,
            grid,
            params,
        } => {
            let img = ::image::open(&image)?.to_luma8();
            let quad = parse_corners(&corners)?;
            let params = load_params(params.as_ref())?;
            let db = MarkerImageDatabase::from_dir(&database, grid, grid)?;

            let results = decode::decode_exhaustive(&img, &[quad], &params, &db);
            let out: Vec<_> = results
                .iter()
                .map(|m| {
                    serde_json::json!({
                        "validity": format!("{:?}", m.validity),
                        "marker": m.marker_type.name(),
                        "orientation_degrees": m.observed_orientation,
                        "corners": corners_json(&m.corners),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}

fn main() -> std::process::ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}
