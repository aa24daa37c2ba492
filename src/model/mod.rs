pub mod discriminator;
pub mod generator;

use burn::prelude::*;

pub use discriminator::{Discriminator, DiscriminatorConfig, Reconstructions};
pub use generator::{Generator, GeneratorConfig};

/// Hyperparameters for the generator and discriminator.
#[derive(Config, Debug)]
pub struct ModelConfig {
    pub image_size: usize,
    #[config(default = 3)]
    pub channels: usize,
    #[config(default = 64)]
    pub latent_dim: usize,
    #[config(default = 32)]
    pub generator_dim: usize,
    #[config(default = 32)]
    pub discriminator_dim: usize,
    /// Attach decoder heads producing the reconstructions used by the
    /// lightweight-GAN losses. Requires `image_size` divisible by 16.
    #[config(default = false)]
    pub reconstruction: bool,
}

/// The two adversarial halves, trained with separate optimizers.
#[derive(Module, Debug)]
pub struct GanModel<B: Backend> {
    pub generator: Generator<B>,
    pub discriminator: Discriminator<B>,
}

impl ModelConfig {
    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig::new(
            self.image_size,
            self.channels,
            self.latent_dim,
            self.generator_dim,
        )
    }

    pub fn discriminator_config(&self) -> DiscriminatorConfig {
        DiscriminatorConfig::new(self.image_size, self.channels, self.discriminator_dim)
            .with_reconstruction(self.reconstruction)
    }

    pub fn init_generator<B: Backend>(&self, device: &B::Device) -> Generator<B> {
        self.generator_config().init(device)
    }

    pub fn init_discriminator<B: Backend>(&self, device: &B::Device) -> Discriminator<B> {
        self.discriminator_config().init(device)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> GanModel<B> {
        GanModel {
            generator: self.init_generator(device),
            discriminator: self.init_discriminator(device),
        }
    }
}

/// Slice one spatial quadrant out of a BCHW tensor.
///
/// Quadrants are indexed row-major: 0 top-left, 1 top-right, 2 bottom-left,
/// 3 bottom-right.
pub fn crop_quadrant<B: Backend>(x: Tensor<B, 4>, part: usize) -> Tensor<B, 4> {
    let [batch, channels, height, width] = x.dims();
    let (h0, w0) = match part {
        0 => (0, 0),
        1 => (0, width / 2),
        2 => (height / 2, 0),
        _ => (height / 2, width / 2),
    };
    x.slice([
        0..batch,
        0..channels,
        h0..h0 + height / 2,
        w0..w0 + width / 2,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray;

    #[test]
    fn crop_quadrant_selects_each_corner() {
        let device = Default::default();
        let values: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let x =
            Tensor::<TestBackend, 4>::from_data(TensorData::new(values, [1, 1, 4, 4]), &device);

        let expect = |part: usize, expected: [f32; 4]| {
            let quad = crop_quadrant(x.clone(), part);
            assert_eq!(quad.dims(), [1, 1, 2, 2]);
            assert_eq!(quad.to_data().to_vec::<f32>().unwrap(), expected.to_vec());
        };

        expect(0, [0.0, 1.0, 4.0, 5.0]);
        expect(1, [2.0, 3.0, 6.0, 7.0]);
        expect(2, [8.0, 9.0, 12.0, 13.0]);
        expect(3, [10.0, 11.0, 14.0, 15.0]);
    }

    #[test]
    fn model_halves_are_shape_compatible() {
        let device = Default::default();
        let config = ModelConfig::new(16)
            .with_latent_dim(8)
            .with_generator_dim(8)
            .with_discriminator_dim(8);
        let model = config.init::<TestBackend>(&device);

        let noise = Tensor::<TestBackend, 2>::zeros([2, 8], &device);
        let fake = model.generator.forward(noise);
        assert_eq!(fake.dims(), [2, 3, 16, 16]);

        let scores = model.discriminator.forward(fake);
        assert_eq!(scores.dims(), [2, 1]);
    }
}
