use anyhow::{Context, Result};
use clap::Parser;
use ganzoo_burn::data::load_image_dir;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Compute per-channel statistics for an image directory")]
struct Args {
    #[arg(long)]
    data_dir: PathBuf,
    #[arg(long, default_value_t = 64)]
    image_size: usize,
    #[arg(long, default_value = "datasets_stats")]
    out_dir: PathBuf,
}

#[derive(Debug, Serialize)]
struct DatasetStats {
    images: usize,
    pixels: usize,
    mean: [f64; 3],
    covariance: [[f64; 3]; 3],
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let examples = load_image_dir(&args.data_dir, args.image_size)?;

    let hw = args.image_size * args.image_size;
    let pixels = examples.len() * hw;
    let mut mean = [0.0f64; 3];
    for example in &examples {
        for channel in 0..3 {
            for value in &example.pixels[channel * hw..(channel + 1) * hw] {
                mean[channel] += f64::from(*value);
            }
        }
    }
    for value in &mut mean {
        *value /= pixels as f64;
    }

    let mut covariance = [[0.0f64; 3]; 3];
    for example in &examples {
        for idx in 0..hw {
            let centered = [
                f64::from(example.pixels[idx]) - mean[0],
                f64::from(example.pixels[hw + idx]) - mean[1],
                f64::from(example.pixels[2 * hw + idx]) - mean[2],
            ];
            for (row, &a) in centered.iter().enumerate() {
                for (col, &b) in centered.iter().enumerate() {
                    covariance[row][col] += a * b;
                }
            }
        }
    }
    for row in &mut covariance {
        for value in row.iter_mut() {
            *value /= pixels as f64;
        }
    }

    let stats = DatasetStats {
        images: examples.len(),
        pixels,
        mean,
        covariance,
    };

    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("failed to create {}", args.out_dir.display()))?;
    let name = args
        .data_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string());
    let out_path = args.out_dir.join(format!("{name}.json"));
    std::fs::write(&out_path, serde_json::to_string_pretty(&stats)?)
        .with_context(|| format!("failed to write {}", out_path.display()))?;

    info!(images = stats.images, out = %out_path.display(), "wrote dataset statistics");
    Ok(())
}
