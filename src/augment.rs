use burn::prelude::*;
use rand::rngs::StdRng;
use rand::Rng;

/// Settings for the adaptive augmentation controller.
#[derive(Config, Debug)]
pub struct AdaAugmentConfig {
    /// Initial augmentation probability.
    #[config(default = 0.0)]
    pub p_init: f64,
    /// Target mean sign of the discriminator output on real images.
    #[config(default = 0.6)]
    pub target: f64,
    /// How many iterations of feedback to integrate before adjusting `p`.
    #[config(default = 4)]
    pub integration_steps: usize,
    /// Adjustment speed, expressed as the number of thousands of images it
    /// takes to move `p` across the full [0, 1] range.
    #[config(default = 500.0)]
    pub ada_kimg: f64,
}

impl AdaAugmentConfig {
    pub fn init(&self) -> AdaAugment {
        AdaAugment {
            p: self.p_init,
            target: self.target,
            integration_steps: self.integration_steps,
            ada_kimg: self.ada_kimg,
            feedback: Vec::new(),
            updates: 0,
        }
    }
}

/// Feedback-controlled augmentation strength.
///
/// The trainer pushes the sign of the discriminator's mean output on real
/// images every iteration; at exact multiples of `integration_steps` it calls
/// [`AdaAugment::integrate`], which averages the buffer, nudges `p` toward the
/// sign target and clears the buffer.
#[derive(Debug, Clone)]
pub struct AdaAugment {
    p: f64,
    target: f64,
    integration_steps: usize,
    ada_kimg: f64,
    feedback: Vec<f64>,
    updates: usize,
}

impl AdaAugment {
    pub fn p(&self) -> f64 {
        self.p
    }

    pub fn integration_steps(&self) -> usize {
        self.integration_steps
    }

    /// How many times `p` has been adjusted.
    pub fn updates(&self) -> usize {
        self.updates
    }

    pub fn feedback_len(&self) -> usize {
        self.feedback.len()
    }

    /// Record one iteration of discriminator feedback.
    pub fn push_feedback(&mut self, sign_mean: f64) {
        self.feedback.push(sign_mean);
    }

    /// Integrate the buffered feedback and adjust `p`, returning the new
    /// value. The buffer is empty afterwards.
    pub fn integrate(&mut self, batch_size: usize) -> f64 {
        let lambda_t = if self.feedback.is_empty() {
            0.0
        } else {
            self.feedback.iter().sum::<f64>() / self.feedback.len() as f64
        };
        self.feedback.clear();
        self.update_p(lambda_t, batch_size);
        self.p
    }

    fn update_p(&mut self, lambda_t: f64, batch_size: usize) {
        let direction = (lambda_t - self.target).signum();
        let step =
            (batch_size * self.integration_steps) as f64 / (self.ada_kimg * 1000.0);
        self.p = (self.p + direction * step).clamp(0.0, 1.0);
        self.updates += 1;
    }

    /// Apply the augmentation transform to a batch. Real and generated
    /// batches go through the exact same path.
    pub fn apply<B: Backend>(&self, batch: Tensor<B, 4>, rng: &mut StdRng) -> Tensor<B, 4> {
        if self.p <= 0.0 {
            return batch;
        }
        let mut out = batch;
        if rng.gen::<f64>() < self.p {
            out = out.flip([3]);
        }
        if rng.gen::<f64>() < self.p {
            let shift = rng.gen_range(-0.2..0.2);
            out = out.add_scalar(shift).clamp(-1.0, 1.0);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::Distribution;
    use rand::SeedableRng;

    type TestBackend = NdArray;

    #[test]
    fn integrate_clears_buffer_and_counts_updates() {
        let mut augment = AdaAugmentConfig::new().with_integration_steps(2).init();
        augment.push_feedback(1.0);
        augment.push_feedback(1.0);
        assert_eq!(augment.feedback_len(), 2);

        augment.integrate(2);
        assert_eq!(augment.feedback_len(), 0);
        assert_eq!(augment.updates(), 1);
    }

    #[test]
    fn p_moves_toward_target_and_stays_clamped() {
        let mut augment = AdaAugmentConfig::new()
            .with_integration_steps(2)
            .with_ada_kimg(0.001)
            .init();

        // Discriminator too confident on reals: raise p, clamped at 1.
        augment.push_feedback(1.0);
        augment.push_feedback(1.0);
        let p = augment.integrate(64);
        assert!(p > 0.0 && p <= 1.0);

        // Below target: lower p, clamped at 0.
        for _ in 0..8 {
            augment.push_feedback(-1.0);
            augment.push_feedback(-1.0);
            augment.integrate(64);
        }
        assert_relative_eq!(augment.p(), 0.0);
    }

    #[test]
    fn zero_probability_leaves_batch_untouched() {
        let device = Default::default();
        let augment = AdaAugmentConfig::new().init();
        let mut rng = StdRng::seed_from_u64(7);
        let batch = Tensor::<TestBackend, 4>::random(
            [2, 3, 8, 8],
            Distribution::Uniform(-1.0, 1.0),
            &device,
        );
        let out = augment.apply(batch.clone(), &mut rng);
        assert_eq!(
            out.to_data().to_vec::<f32>().unwrap(),
            batch.to_data().to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn full_probability_keeps_values_in_range() {
        let device = Default::default();
        let augment = AdaAugmentConfig::new().with_p_init(1.0).init();
        let mut rng = StdRng::seed_from_u64(7);
        let batch = Tensor::<TestBackend, 4>::random(
            [2, 3, 8, 8],
            Distribution::Uniform(-1.0, 1.0),
            &device,
        );
        let out = augment.apply(batch, &mut rng);
        let values = out.to_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| (-1.0..=1.0).contains(v)));
    }
}
