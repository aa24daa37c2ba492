pub mod loss;
pub mod optim;

pub use loss::{GanVariant, LossStrategy};
pub use optim::{GanOptimizer, OptimizerChoice, OptimizerKind};

use crate::augment::{AdaAugment, AdaAugmentConfig};
use crate::data::ImageBatch;
use crate::ema::{EmaTracker, ParamSnapshot};
use crate::metrics::MetricTracker;
use crate::model::{Discriminator, GanModel, Generator, ModelConfig};
use crate::tracker::{MetricsWriter, Mode, TrackerChoice};
use crate::utils::{merge_images, tensor_to_images};
use anyhow::{Context, Result};
use burn::config::Config;
use burn::data::dataloader::DataLoader;
use burn::optim::GradientsParams;
use burn::prelude::*;
use burn::record::{CompactRecorder, Recorder};
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Training configuration loaded from `config.json`.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub model: ModelConfig,
    pub variant: GanVariant,
    pub data_dir: String,
    pub save_dir: String,
    pub num_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub optimizer_gen: OptimizerChoice,
    pub optimizer_disc: OptimizerChoice,
    /// Cap on the number of batches per epoch; small datasets combine this
    /// with a dataset length override to cycle their examples.
    pub len_epoch: Option<usize>,
    pub augment: Option<AdaAugmentConfig>,
    #[config(default = "TrackerChoice::Jsonl")]
    pub tracker: TrackerChoice,
    /// Halve the learning rate every `schedule` epochs (0 disables).
    #[config(default = 0)]
    pub schedule: usize,
    #[config(default = 1e-6)]
    pub min_learning_rate: f64,
    #[config(default = false)]
    pub resume: bool,
    #[config(default = 100)]
    pub log_step: usize,
    /// Checkpoint every `save_period` epochs (0 disables).
    #[config(default = 1)]
    pub save_period: usize,
    #[config(default = 0.999)]
    pub ema_decay: f64,
    #[config(default = 0.01)]
    pub clip_value: f64,
    #[config(default = 10.0)]
    pub lambda_gp: f64,
    #[config(default = 1.0)]
    pub percept_weight: f64,
    #[config(default = 42)]
    pub seed: u64,
}

/// Sidecar metadata written next to the checkpoint records.
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub arch: String,
    pub epoch: usize,
    pub iters: usize,
    pub optimizer_gen: OptimizerKind,
    pub optimizer_disc: OptimizerKind,
    pub learning_rate: f64,
    pub config: String,
}

/// Which recoverable pieces of a checkpoint a resume actually restored.
/// Anything left `false` fell back to fresh state with a warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResumeReport {
    pub optimizer_gen: bool,
    pub optimizer_disc: bool,
    pub ema: bool,
}

/// Learning-rate halving on an epoch schedule.
#[derive(Debug, Clone)]
struct HalvingLr {
    lr: f64,
    min_lr: f64,
    schedule: usize,
    epoch: usize,
}

impl HalvingLr {
    fn step(&mut self) -> f64 {
        self.epoch += 1;
        if self.schedule > 0 && self.epoch % self.schedule == 0 {
            self.lr = (self.lr / 2.0).max(self.min_lr);
        }
        self.lr
    }
}

struct StepStats {
    g_loss: f64,
    d_loss: f64,
    d_out_real: f64,
    d_out_fake: f64,
    d_x: f64,
}

/// Epoch-loop driver shared by every adversarial variant.
///
/// The per-variant loss formulas live in [`LossStrategy`]; the trainer owns
/// the update ordering, adaptive augmentation, EMA tracking, metric
/// aggregation, validation sampling and checkpointing.
pub struct GanTrainer<B: AutodiffBackend> {
    config: TrainingConfig,
    strategy: LossStrategy,
    model: GanModel<B>,
    optim_g: GanOptimizer<Generator<B>, B>,
    optim_d: GanOptimizer<Discriminator<B>, B>,
    lr: HalvingLr,
    ema: EmaTracker,
    augment: Option<AdaAugment>,
    writer: MetricsWriter,
    metrics: MetricTracker,
    rng: StdRng,
    device: B::Device,
    checkpoint_dir: PathBuf,
    start_epoch: usize,
    iters: usize,
}

impl<B: AutodiffBackend> GanTrainer<B> {
    pub fn new(config: TrainingConfig, device: B::Device) -> Result<Self> {
        if config.model.image_size % 8 != 0 {
            return Err(anyhow::anyhow!(
                "image size must be divisible by 8, got {}",
                config.model.image_size
            ));
        }

        B::seed(&device, config.seed);

        let save_dir = PathBuf::from(&config.save_dir);
        let checkpoint_dir = save_dir.join("checkpoints");
        std::fs::create_dir_all(&checkpoint_dir)
            .with_context(|| format!("failed to create {}", checkpoint_dir.display()))?;
        config
            .save(save_dir.join("config.json"))
            .context("failed to write config.json")?;

        let model = config.model.init::<B>(&device);
        let strategy = match config.variant {
            GanVariant::Standard => LossStrategy::Standard,
            GanVariant::Wgan => LossStrategy::Wgan {
                clip_value: config.clip_value,
            },
            GanVariant::WganGp => LossStrategy::WganGp {
                lambda_gp: config.lambda_gp,
            },
            GanVariant::Lsgan => LossStrategy::Lsgan,
            GanVariant::FastGan => LossStrategy::FastGan {
                percept_weight: config.percept_weight,
            },
        };
        if matches!(strategy, LossStrategy::FastGan { .. }) && !model.discriminator.has_decoders() {
            warn!("decoder heads disabled; reconstruction terms will be skipped");
        }

        let optim_g = config.optimizer_gen.init::<B, Generator<B>>();
        let optim_d = config.optimizer_disc.init::<B, Discriminator<B>>();
        let ema = EmaTracker::new(&model.generator, config.ema_decay);
        let augment = config.augment.as_ref().map(AdaAugmentConfig::init);
        let writer = MetricsWriter::new(&config.tracker, &save_dir.join("log"));
        let lr = HalvingLr {
            lr: config.learning_rate,
            min_lr: config.min_learning_rate,
            schedule: config.schedule,
            epoch: 0,
        };
        let rng = StdRng::seed_from_u64(config.seed);

        Ok(Self {
            config,
            strategy,
            model,
            optim_g,
            optim_d,
            lr,
            ema,
            augment,
            writer,
            metrics: MetricTracker::new(),
            rng,
            device,
            checkpoint_dir,
            start_epoch: 1,
            iters: 0,
        })
    }

    pub fn model(&self) -> &GanModel<B> {
        &self.model
    }

    pub fn metrics(&self) -> &MetricTracker {
        &self.metrics
    }

    pub fn augment(&self) -> Option<&AdaAugment> {
        self.augment.as_ref()
    }

    pub fn ema(&self) -> &EmaTracker {
        &self.ema
    }

    pub fn start_epoch(&self) -> usize {
        self.start_epoch
    }

    /// Run the configured number of epochs and return the final epoch's
    /// aggregate metrics.
    pub fn train(
        &mut self,
        train_loader: Arc<dyn DataLoader<B, ImageBatch<B>>>,
        valid_loader: Option<Arc<dyn DataLoader<B, ImageBatch<B>>>>,
    ) -> Result<BTreeMap<String, f64>> {
        if self.config.resume {
            match latest_checkpoint(&self.checkpoint_dir) {
                Some(epoch) => {
                    self.resume_checkpoint(epoch)?;
                }
                None => info!("no checkpoint found; starting from scratch"),
            }
        }

        let mut last_log = BTreeMap::new();
        for epoch in self.start_epoch..=self.config.num_epochs {
            self.metrics.reset();
            self.metrics.update("lr", self.lr.lr);
            self.train_epoch(epoch, train_loader.as_ref())?;
            last_log = self.metrics.result();
            for (name, value) in &last_log {
                info!(epoch, metric = name.as_str(), value = *value, "epoch summary");
            }

            if let Some(loader) = valid_loader.as_ref() {
                self.valid_epoch(epoch, loader.as_ref())?;
            }

            // The schedule steps once the epoch (including validation) is
            // done; the halved rate applies from the next epoch on.
            let lr_prev = self.lr.lr;
            let lr = self.lr.step();
            if lr != lr_prev {
                info!("decay learning rate from {lr_prev:.6} to {lr:.6}");
            }

            if self.config.save_period > 0 && epoch % self.config.save_period == 0 {
                self.save_checkpoint(epoch)?;
            }
        }

        Ok(last_log)
    }

    fn train_epoch(&mut self, epoch: usize, loader: &dyn DataLoader<B, ImageBatch<B>>) -> Result<()> {
        let batch_size = self.config.batch_size.max(1);
        let len_epoch = self
            .config
            .len_epoch
            .unwrap_or_else(|| loader.num_items().div_ceil(batch_size));

        let mut iterator = loader.iter();
        let mut batch_idx = 0usize;
        while let Some(batch) = iterator.next() {
            if batch_idx >= len_epoch {
                break;
            }
            let step = (epoch - 1) * len_epoch + batch_idx;
            self.writer.set_step(step, Mode::Train);

            let observed = batch.batch_size();
            let stats = self.train_step(batch)?;
            self.iters += 1;

            self.metrics.update("g_loss", stats.g_loss);
            self.metrics.update("d_loss", stats.d_loss);
            self.metrics.update("d_out_real", stats.d_out_real);
            self.metrics.update("d_out_fake", stats.d_out_fake);
            self.metrics.update("d_x", stats.d_x);
            self.writer.add_scalar("g_loss", stats.g_loss);
            self.writer.add_scalar("d_loss", stats.d_loss);
            self.writer.add_scalar("d_out_real", stats.d_out_real);
            self.writer.add_scalar("d_out_fake", stats.d_out_fake);
            self.writer.add_scalar("d_x", stats.d_x);

            if let Some(augment) = self.augment.as_mut() {
                if augment.feedback_len() >= augment.integration_steps() {
                    let p = augment.integrate(observed);
                    self.metrics.update("p", p);
                    self.writer.add_scalar("p", p);
                }
            }

            if self.config.log_step > 0 && batch_idx % self.config.log_step == 0 {
                debug!(
                    epoch,
                    batch = batch_idx,
                    g_loss = stats.g_loss,
                    d_loss = stats.d_loss,
                    "train step"
                );
            }

            batch_idx += 1;
        }

        Ok(())
    }

    fn train_step(&mut self, batch: ImageBatch<B>) -> Result<StepStats> {
        let real = batch.images;
        match self.config.variant {
            GanVariant::Wgan => self.step_critic_first(real),
            GanVariant::FastGan => self.step_reusing_batch(real),
            _ => self.step_generator_first(real),
        }
    }

    /// Standard, least-squares and gradient-penalty variants: the generator
    /// updates first, then the discriminator re-scores the detached fakes.
    fn step_generator_first(&mut self, real: Tensor<B, 4>) -> Result<StepStats> {
        let batch = real.dims()[0];
        let lr = self.lr.lr;
        let noise = self.sample_noise(batch);
        let fake = self.model.generator.forward(noise);

        let fake_in = self.augment_batch(fake.clone());
        let fake_scores = self.model.discriminator.forward(fake_in);
        let g_loss = self.strategy.generator_loss(fake_scores);
        let g_value = g_loss.clone().into_scalar().elem::<f64>();
        let grads = GradientsParams::from_grads(g_loss.backward(), &self.model.generator);
        let generator = self.model.generator.clone();
        self.model.generator = self.optim_g.step(lr, generator, grads);
        self.ema.update(&self.model.generator);

        let fake = fake.detach();
        let real_in = self.augment_batch(real);
        let fake_in = self.augment_batch(fake);
        let real_scores = self.model.discriminator.forward(real_in.clone());
        let fake_scores = self.model.discriminator.forward(fake_in.clone());
        let (d_out_real, d_out_fake, d_x) = score_stats(&real_scores, &fake_scores);
        self.push_ada_feedback(&real_scores);

        let real_loss = self.strategy.discriminator_real_loss(real_scores);
        let fake_loss = self.strategy.discriminator_fake_loss(fake_scores);
        let mut d_loss = self.strategy.discriminator_loss(real_loss, fake_loss);
        if let Some(lambda) = self.strategy.lambda_gp() {
            // Interpolate the same augmented views the critic was scored on.
            let penalty = loss::gradient_penalty(&self.model.discriminator, real_in, fake_in);
            d_loss = d_loss.add(penalty.mul_scalar(lambda));
        }
        let d_value = d_loss.clone().into_scalar().elem::<f64>();
        let grads = GradientsParams::from_grads(d_loss.backward(), &self.model.discriminator);
        let discriminator = self.model.discriminator.clone();
        self.model.discriminator = self.optim_d.step(lr, discriminator, grads);

        Ok(StepStats {
            g_loss: g_value,
            d_loss: d_value,
            d_out_real,
            d_out_fake,
            d_x,
        })
    }

    /// Wasserstein critic: the critic updates on detached fakes and gets its
    /// weights clipped, then the generator trains against the clipped critic.
    fn step_critic_first(&mut self, real: Tensor<B, 4>) -> Result<StepStats> {
        let batch = real.dims()[0];
        let lr = self.lr.lr;

        let noise = self.sample_noise(batch);
        let fake = self.model.generator.forward(noise).detach();
        let real_in = self.augment_batch(real);
        let fake_in = self.augment_batch(fake);
        let real_scores = self.model.discriminator.forward(real_in);
        let fake_scores = self.model.discriminator.forward(fake_in);
        let (d_out_real, d_out_fake, d_x) = score_stats(&real_scores, &fake_scores);
        self.push_ada_feedback(&real_scores);

        let real_loss = self.strategy.discriminator_real_loss(real_scores);
        let fake_loss = self.strategy.discriminator_fake_loss(fake_scores);
        let d_loss = self.strategy.discriminator_loss(real_loss, fake_loss);
        let d_value = d_loss.clone().into_scalar().elem::<f64>();
        let grads = GradientsParams::from_grads(d_loss.backward(), &self.model.discriminator);
        let discriminator = self.model.discriminator.clone();
        self.model.discriminator = self.optim_d.step(lr, discriminator, grads);
        if let Some(clip) = self.strategy.clip_value() {
            self.model.discriminator = loss::clip_weights(self.model.discriminator.clone(), clip);
        }

        let noise = self.sample_noise(batch);
        let fake = self.model.generator.forward(noise);
        let fake_in = self.augment_batch(fake);
        let fake_scores = self.model.discriminator.forward(fake_in);
        let g_loss = self.strategy.generator_loss(fake_scores);
        let g_value = g_loss.clone().into_scalar().elem::<f64>();
        let grads = GradientsParams::from_grads(g_loss.backward(), &self.model.generator);
        let generator = self.model.generator.clone();
        self.model.generator = self.optim_g.step(lr, generator, grads);
        self.ema.update(&self.model.generator);

        Ok(StepStats {
            g_loss: g_value,
            d_loss: d_value,
            d_out_real,
            d_out_fake,
            d_x,
        })
    }

    /// Lightweight variant: one generated batch serves both updates, the
    /// discriminator first (with its reconstruction terms), then the
    /// generator through the refreshed discriminator.
    fn step_reusing_batch(&mut self, real: Tensor<B, 4>) -> Result<StepStats> {
        let batch = real.dims()[0];
        let lr = self.lr.lr;
        let part = self.rng.gen_range(0..4);

        let noise = self.sample_noise(batch);
        let fake = self.model.generator.forward(noise);

        let real_in = self.augment_batch(real.clone());
        let (real_scores, recs) = self.model.discriminator.forward_parts(real_in, part);
        let fake_in = self.augment_batch(fake.clone().detach());
        let fake_scores = self.model.discriminator.forward(fake_in);
        let (d_out_real, d_out_fake, d_x) = score_stats(&real_scores, &fake_scores);
        self.push_ada_feedback(&real_scores);

        let real_loss = self.strategy.discriminator_real_loss(real_scores);
        let fake_loss = self.strategy.discriminator_fake_loss(fake_scores);
        let mut d_loss = self.strategy.discriminator_loss(real_loss, fake_loss);
        if let (Some(weight), Some(recs)) = (self.strategy.percept_weight(), recs.as_ref()) {
            d_loss = d_loss.add(loss::reconstruction_loss(recs, real, part).mul_scalar(weight));
        }
        let d_value = d_loss.clone().into_scalar().elem::<f64>();
        let grads = GradientsParams::from_grads(d_loss.backward(), &self.model.discriminator);
        let discriminator = self.model.discriminator.clone();
        self.model.discriminator = self.optim_d.step(lr, discriminator, grads);

        let fake_in = self.augment_batch(fake);
        let fake_scores = self.model.discriminator.forward(fake_in);
        let g_loss = self.strategy.generator_loss(fake_scores);
        let g_value = g_loss.clone().into_scalar().elem::<f64>();
        let grads = GradientsParams::from_grads(g_loss.backward(), &self.model.generator);
        let generator = self.model.generator.clone();
        self.model.generator = self.optim_g.step(lr, generator, grads);
        self.ema.update(&self.model.generator);

        Ok(StepStats {
            g_loss: g_value,
            d_loss: d_value,
            d_out_real,
            d_out_fake,
            d_x,
        })
    }

    /// Sample EMA images and log grids of generated and real examples.
    fn valid_epoch(&mut self, epoch: usize, loader: &dyn DataLoader<B, ImageBatch<B>>) -> Result<()> {
        self.writer.set_step(epoch, Mode::Valid);

        let mut iterator = loader.iter();
        if let Some(batch) = iterator.next() {
            let real_scores = self.model.discriminator.forward(batch.images.clone()).detach();
            self.writer
                .add_scalar("d_out_real", real_scores.mean().into_scalar().elem::<f64>());

            let images = tensor_to_images(batch.images)?;
            let (rows, cols) = grid_dims(images.len());
            self.writer.add_image("real", &merge_images(&images, rows, cols)?);
        }

        let noise = self.sample_noise(self.config.batch_size.max(1));
        let generator = self.model.generator.clone();
        let (_, samples) = self
            .ema
            .with_shadow(generator, |shadow| shadow.forward(noise.clone()).detach());

        let images = tensor_to_images(samples)?;
        let (rows, cols) = grid_dims(images.len());
        self.writer
            .add_image("generated", &merge_images(&images, rows, cols)?);

        Ok(())
    }

    pub fn save_checkpoint(&self, epoch: usize) -> Result<()> {
        let recorder = CompactRecorder::new();
        recorder
            .record(self.model.clone().into_record(), self.record_path(epoch, "model"))
            .context("failed to save model checkpoint")?;
        self.optim_g
            .save(self.record_path(epoch, "optim-g"), &recorder)?;
        self.optim_d
            .save(self.record_path(epoch, "optim-d"), &recorder)?;

        let ema_generator = self.ema.shadow().apply(self.model.generator.clone());
        recorder
            .record(ema_generator.into_record(), self.record_path(epoch, "ema"))
            .context("failed to save ema checkpoint")?;

        let meta = CheckpointMeta {
            arch: self.config.variant.to_string(),
            epoch,
            iters: self.iters,
            optimizer_gen: self.optim_g.kind(),
            optimizer_disc: self.optim_d.kind(),
            learning_rate: self.lr.lr,
            config: serde_json::to_string(&self.config)?,
        };
        let meta_path = self.meta_path(epoch);
        std::fs::write(&meta_path, serde_json::to_string_pretty(&meta)?)
            .with_context(|| format!("failed to write {}", meta_path.display()))?;

        info!(epoch, dir = %self.checkpoint_dir.display(), "saved checkpoint");
        Ok(())
    }

    /// Restore model, optimizer, EMA and counters from the checkpoint for
    /// `epoch`. A missing or unreadable model record is fatal; mismatched
    /// optimizer kinds fall back to fresh optimizer state with a warning.
    /// The report says which pieces were restored.
    pub fn resume_checkpoint(&mut self, epoch: usize) -> Result<ResumeReport> {
        let mut report = ResumeReport::default();
        let recorder = CompactRecorder::new();
        let meta_path = self.meta_path(epoch);
        let meta: CheckpointMeta = serde_json::from_str(
            &std::fs::read_to_string(&meta_path)
                .with_context(|| format!("failed to read {}", meta_path.display()))?,
        )
        .with_context(|| format!("invalid checkpoint metadata in {}", meta_path.display()))?;

        if meta.arch != self.config.variant.to_string() {
            warn!(
                checkpoint = meta.arch.as_str(),
                current = %self.config.variant,
                "checkpoint was written for a different variant"
            );
        }

        let record = recorder
            .load(self.record_path(epoch, "model"), &self.device)
            .context("failed to load model checkpoint")?;
        self.model = self.model.clone().load_record(record);

        if meta.optimizer_gen == self.optim_g.kind() {
            match self
                .optim_g
                .clone()
                .load(self.record_path(epoch, "optim-g"), &recorder, &self.device)
            {
                Ok(optim) => {
                    self.optim_g = optim;
                    report.optimizer_gen = true;
                }
                Err(err) => warn!("generator optimizer state not restored: {err:#}"),
            }
        } else {
            warn!(
                checkpoint = %meta.optimizer_gen,
                current = %self.optim_g.kind(),
                "generator optimizer kind changed; starting from fresh state"
            );
        }
        if meta.optimizer_disc == self.optim_d.kind() {
            match self
                .optim_d
                .clone()
                .load(self.record_path(epoch, "optim-d"), &recorder, &self.device)
            {
                Ok(optim) => {
                    self.optim_d = optim;
                    report.optimizer_disc = true;
                }
                Err(err) => warn!("discriminator optimizer state not restored: {err:#}"),
            }
        } else {
            warn!(
                checkpoint = %meta.optimizer_disc,
                current = %self.optim_d.kind(),
                "discriminator optimizer kind changed; starting from fresh state"
            );
        }

        match recorder.load(self.record_path(epoch, "ema"), &self.device) {
            Ok(record) => {
                let ema_generator = self.model.generator.clone().load_record(record);
                self.ema.set_shadow(ParamSnapshot::of(&ema_generator));
                report.ema = true;
            }
            Err(err) => {
                warn!("ema state not restored, tracking live weights: {err}");
                self.ema = EmaTracker::new(&self.model.generator, self.config.ema_decay);
            }
        }

        self.lr.lr = meta.learning_rate;
        self.lr.epoch = meta.epoch;
        self.iters = meta.iters;
        self.start_epoch = meta.epoch + 1;
        info!(epoch, "resumed from checkpoint");
        Ok(report)
    }

    fn sample_noise(&self, batch: usize) -> Tensor<B, 2> {
        Tensor::random(
            [batch, self.model.generator.latent_dim()],
            Distribution::Normal(0.0, 1.0),
            &self.device,
        )
    }

    fn augment_batch(&mut self, batch: Tensor<B, 4>) -> Tensor<B, 4> {
        match self.augment.as_ref() {
            Some(augment) => augment.apply(batch, &mut self.rng),
            None => batch,
        }
    }

    fn push_ada_feedback(&mut self, real_scores: &Tensor<B, 2>) {
        if let Some(augment) = self.augment.as_mut() {
            let sign_mean = real_scores
                .clone()
                .detach()
                .sign()
                .mean()
                .into_scalar()
                .elem::<f64>();
            augment.push_feedback(sign_mean);
        }
    }

    fn record_path(&self, epoch: usize, part: &str) -> PathBuf {
        self.checkpoint_dir
            .join(format!("checkpoint-epoch{epoch}-{part}"))
    }

    fn meta_path(&self, epoch: usize) -> PathBuf {
        self.checkpoint_dir
            .join(format!("checkpoint-epoch{epoch}.json"))
    }
}

/// Detached score diagnostics: raw means plus the discriminator confidence
/// `d_x = 0.5 * mean(sigmoid(real)) + 0.5 * mean(1 - sigmoid(fake))`.
fn score_stats<B: Backend>(real: &Tensor<B, 2>, fake: &Tensor<B, 2>) -> (f64, f64, f64) {
    let real = real.clone().detach();
    let fake = fake.clone().detach();
    let d_out_real = real.clone().mean().into_scalar().elem::<f64>();
    let d_out_fake = fake.clone().mean().into_scalar().elem::<f64>();
    let confidence_real = sigmoid(real).mean().into_scalar().elem::<f64>();
    let confidence_fake = sigmoid(fake).mean().into_scalar().elem::<f64>();
    let d_x = 0.5 * confidence_real + 0.5 * (1.0 - confidence_fake);
    (d_out_real, d_out_fake, d_x)
}

fn grid_dims(count: usize) -> (usize, usize) {
    let cols = count.clamp(1, 4);
    let rows = count.div_ceil(cols).max(1);
    (rows, cols)
}

/// Highest epoch with a metadata file under `dir`.
pub fn latest_checkpoint(dir: &Path) -> Option<usize> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut best = None;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(rest) = name.strip_prefix("checkpoint-epoch") else {
            continue;
        };
        let Some(num) = rest.strip_suffix(".json") else {
            continue;
        };
        if let Ok(epoch) = num.parse::<usize>() {
            best = Some(best.map_or(epoch, |b: usize| b.max(epoch)));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{GanDataset, ImageBatcher, ImageExample};
    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;
    use burn::data::dataloader::DataLoaderBuilder;
    use burn::optim::{AdamConfig, RmsPropConfig};

    type TestBackend = Autodiff<NdArray>;

    fn loader(
        examples: usize,
        batch_size: usize,
        size: usize,
    ) -> Arc<dyn DataLoader<TestBackend, ImageBatch<TestBackend>>> {
        let mut rng = StdRng::seed_from_u64(3);
        let examples = (0..examples)
            .map(|idx| ImageExample {
                pixels: (0..3 * size * size)
                    .map(|_| rng.gen_range(-1.0f32..1.0))
                    .collect(),
                channels: 3,
                size,
                label: idx as i64,
            })
            .collect();
        DataLoaderBuilder::<TestBackend, ImageExample, ImageBatch<TestBackend>>::new(
            ImageBatcher::new(),
        )
        .batch_size(batch_size)
        .build(GanDataset::new(examples))
    }

    fn test_config(variant: GanVariant, save_dir: &Path) -> TrainingConfig {
        TrainingConfig::new(
            ModelConfig::new(16)
                .with_latent_dim(8)
                .with_generator_dim(8)
                .with_discriminator_dim(8),
            variant,
            "data".to_string(),
            save_dir.to_string_lossy().into_owned(),
            1,
            2,
            2e-4,
            OptimizerChoice::Adam(AdamConfig::new()),
            OptimizerChoice::Adam(AdamConfig::new()),
        )
        .with_tracker(TrackerChoice::None)
        .with_save_period(0)
        .with_log_step(0)
    }

    #[test]
    fn every_variant_completes_an_epoch() {
        let variants = [
            GanVariant::Standard,
            GanVariant::Wgan,
            GanVariant::WganGp,
            GanVariant::Lsgan,
            GanVariant::FastGan,
        ];
        for variant in variants {
            let dir = tempfile::tempdir().unwrap();
            let is_fastgan = variant == GanVariant::FastGan;
            let mut config = test_config(variant, dir.path());
            if is_fastgan {
                config.model = config.model.with_reconstruction(true);
            }
            let mut trainer = GanTrainer::<TestBackend>::new(config, Default::default()).unwrap();
            let log = trainer.train(loader(8, 2, 16), None).unwrap();

            // Four batches of two, one loss pair per batch.
            assert_eq!(trainer.metrics().count("g_loss"), 4);
            assert_eq!(trainer.metrics().count("d_loss"), 4);
            assert!(log["g_loss"].is_finite());
            assert!(log["d_loss"].is_finite());
            assert!(log["d_out_real"].is_finite());
            assert!(log["d_out_fake"].is_finite());
            assert!(log["d_x"] > 0.0 && log["d_x"] < 1.0);
        }
    }

    #[test]
    fn confidence_diagnostic_blends_real_and_fake() {
        let device = Default::default();
        let neutral = Tensor::<TestBackend, 2>::full([4, 1], 0.0, &device);
        let (_, _, d_x) = score_stats(&neutral, &neutral);
        assert!((d_x - 0.5).abs() < 1e-6);

        // A discriminator separating the batches perfectly approaches 1.
        let real = Tensor::<TestBackend, 2>::full([4, 1], 10.0, &device);
        let fake = Tensor::<TestBackend, 2>::full([4, 1], -10.0, &device);
        let (_, _, d_x) = score_stats(&real, &fake);
        assert!(d_x > 0.99);
    }

    #[test]
    fn lr_schedule_steps_after_the_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(GanVariant::Standard, dir.path())
            .with_schedule(1)
            .with_save_period(1);
        let mut trainer = GanTrainer::<TestBackend>::new(config, Default::default()).unwrap();
        let log = trainer.train(loader(4, 2, 16), None).unwrap();

        // The first epoch trains at the configured rate; the halved rate
        // only reaches the checkpoint written afterwards.
        assert_eq!(log["lr"], 2e-4);
        let meta: CheckpointMeta = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("checkpoints/checkpoint-epoch1.json"))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(meta.learning_rate, 1e-4);
    }

    #[test]
    fn penalty_variant_trains_on_augmented_batches() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(GanVariant::WganGp, dir.path());
        config.augment = Some(AdaAugmentConfig::new().with_p_init(1.0));
        let mut trainer = GanTrainer::<TestBackend>::new(config, Default::default()).unwrap();
        let log = trainer.train(loader(4, 2, 16), None).unwrap();
        assert!(log["d_loss"].is_finite());
        assert!(log["g_loss"].is_finite());
    }

    #[test]
    fn augmentation_integrates_on_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(GanVariant::Standard, dir.path());
        config.augment = Some(
            AdaAugmentConfig::new()
                .with_p_init(0.5)
                .with_integration_steps(2),
        );
        let mut trainer = GanTrainer::<TestBackend>::new(config, Default::default()).unwrap();
        trainer.train(loader(8, 2, 16), None).unwrap();

        let augment = trainer.augment().unwrap();
        assert_eq!(augment.updates(), 2);
        assert_eq!(augment.feedback_len(), 0);
        // Each adjustment lands in the epoch metrics as well.
        assert_eq!(trainer.metrics().count("p"), 2);
    }

    #[test]
    fn critic_weights_stay_clipped() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(GanVariant::Wgan, dir.path());
        let clip = config.clip_value as f32;
        let mut trainer = GanTrainer::<TestBackend>::new(config, Default::default()).unwrap();
        trainer.train(loader(8, 2, 16), None).unwrap();

        for (_, values) in ParamSnapshot::of(&trainer.model().discriminator).iter_values() {
            assert!(values
                .iter()
                .all(|v| (-clip - 1e-6..=clip + 1e-6).contains(v)));
        }
    }

    #[test]
    fn ema_shadow_tracks_generator_updates() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(GanVariant::Standard, dir.path());
        let mut trainer = GanTrainer::<TestBackend>::new(config, Default::default()).unwrap();
        trainer.train(loader(4, 2, 16), None).unwrap();

        // Shadow stays paired with the live parameters after updates.
        let live = ParamSnapshot::of(&trainer.model().generator);
        assert_eq!(live.len(), trainer.ema().shadow().len());
    }

    #[test]
    fn checkpoint_resume_restores_weights_and_skips_mismatched_optimizer() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(GanVariant::Standard, dir.path()).with_save_period(1);
        let mut trainer = GanTrainer::<TestBackend>::new(config, Default::default()).unwrap();
        trainer.train(loader(4, 2, 16), None).unwrap();

        let mut config = test_config(GanVariant::Standard, dir.path());
        config.optimizer_disc = OptimizerChoice::RmsProp(RmsPropConfig::new());
        let mut resumed = GanTrainer::<TestBackend>::new(config, Default::default()).unwrap();
        let report = resumed.resume_checkpoint(1).unwrap();

        assert_eq!(resumed.start_epoch(), 2);
        // The matching generator optimizer and the EMA shadow come back from
        // the checkpoint; the changed discriminator optimizer starts fresh.
        assert!(report.optimizer_gen);
        assert!(report.ema);
        assert!(!report.optimizer_disc);

        let saved = ParamSnapshot::of(trainer.model());
        let restored = ParamSnapshot::of(resumed.model());
        assert_eq!(saved.len(), restored.len());
        for ((_, a), (_, b)) in saved.iter_values().zip(restored.iter_values()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn len_epoch_caps_the_batch_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(GanVariant::Lsgan, dir.path());
        config.len_epoch = Some(2);
        let mut trainer = GanTrainer::<TestBackend>::new(config, Default::default()).unwrap();
        trainer.train(loader(8, 2, 16), None).unwrap();
        assert_eq!(trainer.metrics().count("g_loss"), 2);
    }

    #[test]
    fn latest_checkpoint_finds_highest_epoch() {
        let dir = tempfile::tempdir().unwrap();
        for epoch in [1usize, 3, 2] {
            std::fs::write(
                dir.path().join(format!("checkpoint-epoch{epoch}.json")),
                "{}",
            )
            .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        assert_eq!(latest_checkpoint(dir.path()), Some(3));
        assert_eq!(latest_checkpoint(&dir.path().join("missing")), None);
    }
}
