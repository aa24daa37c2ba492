use burn::module::{Module, ModuleMapper, Param};
use burn::nn::loss::{BinaryCrossEntropyLossConfig, MseLoss, Reduction};
use burn::prelude::*;
use burn::tensor::activation::relu;
use burn::tensor::module::avg_pool2d;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};
use burn::tensor::Distribution;
use std::marker::PhantomData;

use crate::model::{crop_quadrant, Discriminator, Reconstructions};

/// Which adversarial formulation to train with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum GanVariant {
    Standard,
    Wgan,
    WganGp,
    Lsgan,
    FastGan,
}

impl std::fmt::Display for GanVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GanVariant::Standard => write!(f, "gan"),
            GanVariant::Wgan => write!(f, "wgan"),
            GanVariant::WganGp => write!(f, "wgan-gp"),
            GanVariant::Lsgan => write!(f, "lsgan"),
            GanVariant::FastGan => write!(f, "fastgan"),
        }
    }
}

/// Least-squares targets: fake scores are pulled toward `a`, real scores
/// toward `b`, and the generator pushes its fakes toward `c`.
const LSGAN_A: f64 = 0.0;
const LSGAN_B: f64 = 1.0;
const LSGAN_C: f64 = 1.0;

/// The hinge margin for the lightweight variant is sampled per score from
/// this range rather than fixed at 1.
const HINGE_MARGIN: (f64, f64) = (0.8, 1.0);

/// Step length for the finite-difference Lipschitz estimate in the
/// gradient penalty.
const PENALTY_EPS: f64 = 1e-3;

/// Per-variant loss formulas. The trainer owns the update ordering; the
/// strategy only maps discriminator scores to loss values.
#[derive(Debug, Clone)]
pub enum LossStrategy {
    /// Non-saturating cross-entropy on sigmoid logits.
    Standard,
    /// Wasserstein critic with weight clipping after every critic step.
    Wgan { clip_value: f64 },
    /// Wasserstein critic regularized by a Lipschitz penalty.
    WganGp { lambda_gp: f64 },
    /// Least-squares targets instead of cross-entropy.
    Lsgan,
    /// Hinge scores plus self-supervised reconstruction terms.
    FastGan { percept_weight: f64 },
}

impl LossStrategy {
    /// The generator's objective given scores for its current fakes.
    pub fn generator_loss<B: Backend>(&self, fake_scores: Tensor<B, 2>) -> Tensor<B, 1> {
        match self {
            LossStrategy::Standard => {
                let device = fake_scores.device();
                let targets = Tensor::<B, 2, Int>::ones(fake_scores.dims(), &device);
                bce(&device).forward(fake_scores, targets)
            }
            LossStrategy::Lsgan => MseLoss::new().forward(
                fake_scores.clone(),
                full_like(&fake_scores, LSGAN_C),
                Reduction::Mean,
            ),
            // All Wasserstein-style variants maximize the critic score.
            LossStrategy::Wgan { .. }
            | LossStrategy::WganGp { .. }
            | LossStrategy::FastGan { .. } => fake_scores.mean().neg(),
        }
    }

    /// The discriminator's objective on real images.
    pub fn discriminator_real_loss<B: Backend>(&self, real_scores: Tensor<B, 2>) -> Tensor<B, 1> {
        match self {
            LossStrategy::Standard => {
                let device = real_scores.device();
                let targets = Tensor::<B, 2, Int>::ones(real_scores.dims(), &device);
                bce(&device).forward(real_scores, targets)
            }
            LossStrategy::Lsgan => MseLoss::new().forward(
                real_scores.clone(),
                full_like(&real_scores, LSGAN_B),
                Reduction::Mean,
            ),
            LossStrategy::Wgan { .. } | LossStrategy::WganGp { .. } => real_scores.mean().neg(),
            LossStrategy::FastGan { .. } => {
                relu(hinge_margin(&real_scores).sub(real_scores)).mean()
            }
        }
    }

    /// The discriminator's objective on generated images.
    pub fn discriminator_fake_loss<B: Backend>(&self, fake_scores: Tensor<B, 2>) -> Tensor<B, 1> {
        match self {
            LossStrategy::Standard => {
                let device = fake_scores.device();
                let targets = Tensor::<B, 2, Int>::zeros(fake_scores.dims(), &device);
                bce(&device).forward(fake_scores, targets)
            }
            LossStrategy::Lsgan => MseLoss::new().forward(
                fake_scores.clone(),
                full_like(&fake_scores, LSGAN_A),
                Reduction::Mean,
            ),
            LossStrategy::Wgan { .. } | LossStrategy::WganGp { .. } => fake_scores.mean(),
            LossStrategy::FastGan { .. } => {
                relu(hinge_margin(&fake_scores).add(fake_scores)).mean()
            }
        }
    }

    /// Combine the two discriminator terms the way the variant defines its
    /// total loss. Cross-entropy style variants average, Wasserstein and
    /// hinge variants sum.
    pub fn discriminator_loss<B: Backend>(
        &self,
        real_loss: Tensor<B, 1>,
        fake_loss: Tensor<B, 1>,
    ) -> Tensor<B, 1> {
        match self {
            LossStrategy::Standard | LossStrategy::Lsgan => {
                real_loss.add(fake_loss).div_scalar(2.0)
            }
            _ => real_loss.add(fake_loss),
        }
    }

    pub fn clip_value(&self) -> Option<f64> {
        match self {
            LossStrategy::Wgan { clip_value } => Some(*clip_value),
            _ => None,
        }
    }

    pub fn lambda_gp(&self) -> Option<f64> {
        match self {
            LossStrategy::WganGp { lambda_gp } => Some(*lambda_gp),
            _ => None,
        }
    }

    pub fn percept_weight(&self) -> Option<f64> {
        match self {
            LossStrategy::FastGan { percept_weight } => Some(*percept_weight),
            _ => None,
        }
    }
}

fn bce<B: Backend>(device: &B::Device) -> burn::nn::loss::BinaryCrossEntropyLoss<B> {
    BinaryCrossEntropyLossConfig::new()
        .with_logits(true)
        .init(device)
}

fn full_like<B: Backend>(scores: &Tensor<B, 2>, value: f64) -> Tensor<B, 2> {
    Tensor::full(scores.dims(), value, &scores.device())
}

fn hinge_margin<B: Backend>(scores: &Tensor<B, 2>) -> Tensor<B, 2> {
    Tensor::random(
        scores.dims(),
        Distribution::Uniform(HINGE_MARGIN.0, HINGE_MARGIN.1),
        &scores.device(),
    )
}

/// Lipschitz penalty for the WGAN-GP critic, estimated with a
/// finite-difference quotient at points interpolated between real and fake
/// images. Returned unscaled; the caller applies `lambda_gp`.
pub fn gradient_penalty<B: Backend>(
    discriminator: &Discriminator<B>,
    real: Tensor<B, 4>,
    fake: Tensor<B, 4>,
) -> Tensor<B, 1> {
    let [batch, channels, height, width] = real.dims();
    let device = real.device();

    let alpha = Tensor::<B, 4>::random([batch, 1, 1, 1], Distribution::Uniform(0.0, 1.0), &device);
    let mixed = real
        .mul(alpha.clone())
        .add(fake.mul(alpha.neg().add_scalar(1.0)));

    let delta = Tensor::<B, 4>::random(
        [batch, channels, height, width],
        Distribution::Normal(0.0, 1.0),
        &device,
    )
    .mul_scalar(PENALTY_EPS);
    let norm = delta
        .clone()
        .reshape([batch, channels * height * width])
        .powf_scalar(2.0)
        .sum_dim(1)
        .sqrt()
        .clamp_min(1e-12);

    let base = discriminator.forward(mixed.clone());
    let shifted = discriminator.forward(mixed.add(delta));
    let quotient = shifted.sub(base).abs().div(norm);
    quotient.sub_scalar(1.0).powf_scalar(2.0).mean()
}

struct WeightClipper<B: Backend> {
    clip: f64,
    _backend: PhantomData<B>,
}

impl<B: Backend> ModuleMapper<B> for WeightClipper<B> {
    fn map_float<const D: usize>(&mut self, param: Param<Tensor<B, D>>) -> Param<Tensor<B, D>> {
        let clip = self.clip;
        param.map(|tensor| {
            let device = tensor.device();
            let data = tensor.clamp(-clip, clip).into_data();
            Tensor::from_data(data, &device).require_grad()
        })
    }
}

/// Clamp every float parameter into `[-clip, clip]`, as the Wasserstein
/// critic requires after each of its optimizer steps.
pub fn clip_weights<B: Backend, M: Module<B>>(module: M, clip: f64) -> M {
    let mut clipper = WeightClipper::<B> {
        clip,
        _backend: PhantomData,
    };
    module.map(&mut clipper)
}

/// Self-supervised reconstruction loss for the lightweight variant: the
/// decoder outputs must match downscaled views of the real batch. Compared
/// with a multi-scale pixel L1 rather than a learned perceptual metric.
pub fn reconstruction_loss<B: Backend>(
    recs: &Reconstructions<B>,
    real: Tensor<B, 4>,
    part: usize,
) -> Tensor<B, 1> {
    let [_, _, height, width] = recs.full.dims();
    let target = downscale(real.clone(), height, width);
    let target_part = downscale(crop_quadrant(real, part), height, width);

    multiscale_l1(recs.full.clone(), target.clone())
        .add(multiscale_l1(recs.small.clone(), target))
        .add(multiscale_l1(recs.part.clone(), target_part))
}

fn downscale<B: Backend>(x: Tensor<B, 4>, height: usize, width: usize) -> Tensor<B, 4> {
    let [_, _, h, w] = x.dims();
    if h == height && w == width {
        return x;
    }
    burn::tensor::module::interpolate(
        x,
        [height, width],
        InterpolateOptions::new(InterpolateMode::Bilinear),
    )
}

fn multiscale_l1<B: Backend>(a: Tensor<B, 4>, b: Tensor<B, 4>) -> Tensor<B, 1> {
    let fine = a.clone().sub(b.clone()).abs().mean();
    let coarse_a = avg_pool2d(a, [2, 2], [2, 2], [0, 0], true);
    let coarse_b = avg_pool2d(b, [2, 2], [2, 2], [0, 0], true);
    fine.add(coarse_a.sub(coarse_b).abs().mean())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ema::ParamSnapshot;
    use crate::model::DiscriminatorConfig;
    use burn::backend::ndarray::NdArray;

    type TestBackend = NdArray;

    fn scores(value: f64) -> Tensor<TestBackend, 2> {
        Tensor::full([4, 1], value, &Default::default())
    }

    #[test]
    fn wasserstein_critic_loss_is_score_gap() {
        let strategy = LossStrategy::Wgan { clip_value: 0.01 };
        let real = strategy.discriminator_real_loss(scores(2.0));
        let fake = strategy.discriminator_fake_loss(scores(0.5));
        let total = strategy
            .discriminator_loss(real, fake)
            .into_scalar()
            .elem::<f64>();
        assert!((total - (-1.5)).abs() < 1e-5);
    }

    #[test]
    fn least_squares_losses_vanish_at_targets() {
        let strategy = LossStrategy::Lsgan;
        let real = strategy
            .discriminator_real_loss(scores(LSGAN_B))
            .into_scalar()
            .elem::<f64>();
        let fake = strategy
            .discriminator_fake_loss(scores(LSGAN_A))
            .into_scalar()
            .elem::<f64>();
        let gen = strategy
            .generator_loss(scores(LSGAN_C))
            .into_scalar()
            .elem::<f64>();
        assert!(real.abs() < 1e-6 && fake.abs() < 1e-6 && gen.abs() < 1e-6);
    }

    #[test]
    fn cross_entropy_losses_are_positive() {
        let strategy = LossStrategy::Standard;
        let gen = strategy.generator_loss(scores(0.0)).into_scalar().elem::<f64>();
        let real = strategy
            .discriminator_real_loss(scores(0.0))
            .into_scalar()
            .elem::<f64>();
        assert!(gen > 0.0 && real > 0.0);
    }

    #[test]
    fn hinge_losses_are_nonnegative() {
        let strategy = LossStrategy::FastGan {
            percept_weight: 1.0,
        };
        for value in [-2.0, 0.0, 2.0] {
            let real = strategy
                .discriminator_real_loss(scores(value))
                .into_scalar()
                .elem::<f64>();
            let fake = strategy
                .discriminator_fake_loss(scores(value))
                .into_scalar()
                .elem::<f64>();
            assert!(real >= 0.0 && fake >= 0.0);
        }
    }

    #[test]
    fn gradient_penalty_is_finite_and_nonnegative() {
        let device = Default::default();
        let disc = DiscriminatorConfig::new(16, 3, 8).init::<TestBackend>(&device);
        let real = Tensor::random([2, 3, 16, 16], Distribution::Uniform(-1.0, 1.0), &device);
        let fake = Tensor::random([2, 3, 16, 16], Distribution::Uniform(-1.0, 1.0), &device);
        let penalty = gradient_penalty(&disc, real, fake)
            .into_scalar()
            .elem::<f64>();
        assert!(penalty.is_finite());
        assert!(penalty >= 0.0);
    }

    #[test]
    fn clipping_bounds_every_parameter() {
        let device = Default::default();
        let disc = DiscriminatorConfig::new(16, 3, 8).init::<TestBackend>(&device);
        let clipped = clip_weights(disc, 0.01);
        for (_, values) in ParamSnapshot::of(&clipped).iter_values() {
            assert!(values.iter().all(|v| (-0.0100001..=0.0100001).contains(v)));
        }
    }

    #[test]
    fn reconstruction_loss_vanishes_on_constant_images() {
        let device = Default::default();
        let real = Tensor::<TestBackend, 4>::full([2, 3, 16, 16], 0.5, &device);
        let rec = Tensor::<TestBackend, 4>::full([2, 3, 8, 8], 0.5, &device);
        let recs = Reconstructions {
            full: rec.clone(),
            small: rec.clone(),
            part: rec,
        };
        let loss = reconstruction_loss(&recs, real, 2)
            .into_scalar()
            .elem::<f64>();
        assert!(loss.abs() < 1e-5);
    }
}
