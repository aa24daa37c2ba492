#![recursion_limit = "256"]
use anyhow::{Context, Result};
use burn::backend::{Autodiff, Wgpu};
use burn::config::Config;
use burn::data::dataloader::DataLoaderBuilder;
use clap::Parser;
use ganzoo_burn::data::{load_image_dir, GanDataset, ImageBatch, ImageBatcher, ImageExample};
use ganzoo_burn::training::{GanTrainer, TrainingConfig};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Train adversarial generative models with Burn")]
struct Args {
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
    /// Fraction of the dataset held out for validation grids.
    #[arg(long, default_value_t = 0.05)]
    valid_split: f64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = TrainingConfig::load(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config.display()))?;

    type Backend = Wgpu<f32, i32>;
    type AutodiffBackend = Autodiff<Backend>;
    let device = burn::backend::wgpu::WgpuDevice::default();

    let mut examples = load_image_dir(Path::new(&config.data_dir), config.model.image_size)?;
    let held_out = ((examples.len() as f64 * args.valid_split) as usize).min(examples.len() / 2);
    let valid = examples.split_off(examples.len() - held_out);
    info!(train = examples.len(), valid = valid.len(), "loaded dataset");

    let mut train_dataset = GanDataset::new(examples);
    if let Some(len_epoch) = config.len_epoch {
        train_dataset = train_dataset.with_length(len_epoch * config.batch_size);
    }
    let train_loader = DataLoaderBuilder::<AutodiffBackend, ImageExample, ImageBatch<AutodiffBackend>>::new(
        ImageBatcher::new(),
    )
    .batch_size(config.batch_size)
    .shuffle(config.seed)
    .set_device(device.clone())
    .build(train_dataset);

    let valid_loader = if valid.is_empty() {
        None
    } else {
        Some(
            DataLoaderBuilder::<AutodiffBackend, ImageExample, ImageBatch<AutodiffBackend>>::new(
                ImageBatcher::new(),
            )
            .batch_size(config.batch_size)
            .set_device(device.clone())
            .build(GanDataset::new(valid)),
        )
    };

    let mut trainer = GanTrainer::<AutodiffBackend>::new(config, device)?;
    trainer.train(train_loader, valid_loader)?;
    Ok(())
}
