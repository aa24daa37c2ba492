use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::relu;

/// Configuration for the upsampling generator.
///
/// `image_size` must be divisible by 8; the latent projection lands on an
/// `image_size / 8` grid that three stride-2 deconvolutions bring back to
/// full resolution.
#[derive(Config, Debug)]
pub struct GeneratorConfig {
    pub image_size: usize,
    pub channels: usize,
    pub latent_dim: usize,
    pub generator_dim: usize,
}

/// Maps latent vectors to images in [-1, 1].
#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    project: Linear<B>,
    dec_convs: Vec<ConvTranspose2d<B>>,
    dec_bns: Vec<BatchNorm<B>>,
    to_image: Conv2d<B>,
    #[module(ignore)]
    latent_dim: usize,
    #[module(ignore)]
    seed_size: usize,
    #[module(ignore)]
    seed_channels: usize,
}

impl GeneratorConfig {
    /// Initialize generator layers on the given device.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Generator<B> {
        let seed_size = self.image_size / 8;
        let seed_channels = self.generator_dim * 4;
        let project =
            LinearConfig::new(self.latent_dim, seed_channels * seed_size * seed_size).init(device);

        let dec_convs = vec![
            dec_conv(self.generator_dim * 4, self.generator_dim * 2, device),
            dec_conv(self.generator_dim * 2, self.generator_dim, device),
            dec_conv(self.generator_dim, self.generator_dim, device),
        ];
        let dec_bns = vec![
            BatchNormConfig::new(self.generator_dim * 2).init(device),
            BatchNormConfig::new(self.generator_dim).init(device),
            BatchNormConfig::new(self.generator_dim).init(device),
        ];

        let to_image = Conv2dConfig::new([self.generator_dim, self.channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);

        Generator {
            project,
            dec_convs,
            dec_bns,
            to_image,
            latent_dim: self.latent_dim,
            seed_size,
            seed_channels,
        }
    }
}

impl<B: Backend> Generator<B> {
    pub fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    /// Map a `[batch, latent_dim]` noise batch to `[batch, channels, size, size]`
    /// images in [-1, 1].
    pub fn forward(&self, noise: Tensor<B, 2>) -> Tensor<B, 4> {
        let batch = noise.dims()[0];
        let mut x = self.project.forward(noise).reshape([
            batch,
            self.seed_channels,
            self.seed_size,
            self.seed_size,
        ]);
        for (conv, bn) in self.dec_convs.iter().zip(self.dec_bns.iter()) {
            x = relu(bn.forward(conv.forward(x)));
        }
        self.to_image.forward(x).tanh()
    }
}

fn dec_conv<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    device: &B::Device,
) -> ConvTranspose2d<B> {
    ConvTranspose2dConfig::new([in_channels, out_channels], [4, 4])
        .with_stride([2, 2])
        .with_padding([1, 1])
        .with_bias(false)
        .init(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    #[test]
    fn output_shape_and_range() {
        let device = Default::default();
        let generator = GeneratorConfig::new(16, 3, 8, 8).init::<TestBackend>(&device);
        let noise = Tensor::<TestBackend, 2>::random(
            [4, 8],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let images = generator.forward(noise);
        assert_eq!(images.dims(), [4, 3, 16, 16]);
        let values = images.to_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn single_channel_output() {
        let device = Default::default();
        let generator = GeneratorConfig::new(32, 1, 16, 8).init::<TestBackend>(&device);
        let noise = Tensor::<TestBackend, 2>::zeros([2, 16], &device);
        assert_eq!(generator.forward(noise).dims(), [2, 1, 32, 32]);
    }
}
