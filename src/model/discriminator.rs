use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::{leaky_relu, relu};
use burn::tensor::module::avg_pool2d;

use super::crop_quadrant;

/// Configuration for the convolutional discriminator.
#[derive(Config, Debug)]
pub struct DiscriminatorConfig {
    pub image_size: usize,
    pub channels: usize,
    pub discriminator_dim: usize,
    /// Attach the decoder heads that reconstruct crops of the input image;
    /// the lightweight-GAN losses use them as a self-supervised signal.
    #[config(default = false)]
    pub reconstruction: bool,
}

/// Half-resolution reconstructions decoded from discriminator features.
#[derive(Debug, Clone)]
pub struct Reconstructions<B: Backend> {
    /// Decoded from the full feature map.
    pub full: Tensor<B, 4>,
    /// Decoded from a pooled feature map.
    pub small: Tensor<B, 4>,
    /// Decoded from one spatial quadrant of the feature map.
    pub part: Tensor<B, 4>,
}

/// Small upsampling decoder turning a feature map into an image patch.
#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    convs: Vec<ConvTranspose2d<B>>,
    bns: Vec<BatchNorm<B>>,
    to_image: Conv2d<B>,
}

impl<B: Backend> Decoder<B> {
    fn new(in_channels: usize, out_channels: usize, ups: usize, device: &B::Device) -> Self {
        let mut convs = Vec::with_capacity(ups);
        let mut bns = Vec::with_capacity(ups);
        let mut channels = in_channels;
        for _ in 0..ups {
            let next = (channels / 2).max(8);
            convs.push(
                ConvTranspose2dConfig::new([channels, next], [4, 4])
                    .with_stride([2, 2])
                    .with_padding([1, 1])
                    .with_bias(false)
                    .init(device),
            );
            bns.push(BatchNormConfig::new(next).init(device));
            channels = next;
        }
        let to_image = Conv2dConfig::new([channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        Self {
            convs,
            bns,
            to_image,
        }
    }

    fn forward(&self, mut x: Tensor<B, 4>) -> Tensor<B, 4> {
        for (conv, bn) in self.convs.iter().zip(self.bns.iter()) {
            x = relu(bn.forward(conv.forward(x)));
        }
        self.to_image.forward(x).tanh()
    }
}

/// Scores images, optionally decoding reconstructions alongside.
#[derive(Module, Debug)]
pub struct Discriminator<B: Backend> {
    convs: Vec<Conv2d<B>>,
    bns: Vec<BatchNorm<B>>,
    fc_score: Linear<B>,
    decoder_full: Option<Decoder<B>>,
    decoder_small: Option<Decoder<B>>,
    decoder_part: Option<Decoder<B>>,
}

impl DiscriminatorConfig {
    /// Initialize the discriminator layers on the given device.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Discriminator<B> {
        let convs = vec![
            conv(self.channels, self.discriminator_dim, true, device),
            conv(self.discriminator_dim, self.discriminator_dim * 2, false, device),
            conv(
                self.discriminator_dim * 2,
                self.discriminator_dim * 4,
                false,
                device,
            ),
        ];
        let bns = vec![
            BatchNormConfig::new(self.discriminator_dim * 2).init(device),
            BatchNormConfig::new(self.discriminator_dim * 4).init(device),
        ];

        // Three stride-2 convolutions leave an image_size / 8 feature grid.
        let feat_size = self.image_size / 8;
        let feat_channels = self.discriminator_dim * 4;
        let fc_score = LinearConfig::new(feat_channels * feat_size * feat_size, 1).init(device);

        // The reconstruction targets live at half the input resolution. The
        // full head starts from feat_size, the small and part heads from
        // feat_size / 2, so they need one extra upsampling stage.
        let (decoder_full, decoder_small, decoder_part) = if self.reconstruction {
            (
                Some(Decoder::new(feat_channels, self.channels, 2, device)),
                Some(Decoder::new(feat_channels, self.channels, 3, device)),
                Some(Decoder::new(feat_channels, self.channels, 3, device)),
            )
        } else {
            (None, None, None)
        };

        Discriminator {
            convs,
            bns,
            fc_score,
            decoder_full,
            decoder_small,
            decoder_part,
        }
    }
}

impl<B: Backend> Discriminator<B> {
    pub fn has_decoders(&self) -> bool {
        self.decoder_full.is_some()
    }

    fn features(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = leaky_relu(self.convs[0].forward(images), 0.2);
        x = leaky_relu(self.bns[0].forward(self.convs[1].forward(x)), 0.2);
        leaky_relu(self.bns[1].forward(self.convs[2].forward(x)), 0.2)
    }

    fn score(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch, channels, height, width] = features.dims();
        let flat = features.reshape([batch, channels * height * width]);
        self.fc_score.forward(flat)
    }

    /// Forward pass returning raw per-image scores `[batch, 1]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.score(self.features(images))
    }

    /// Forward pass returning scores and, when the decoder heads are
    /// attached, the three reconstructions. `part` picks the feature-map
    /// quadrant the part head decodes.
    pub fn forward_parts(
        &self,
        images: Tensor<B, 4>,
        part: usize,
    ) -> (Tensor<B, 2>, Option<Reconstructions<B>>) {
        let features = self.features(images);
        let scores = self.score(features.clone());

        let recs = match (&self.decoder_full, &self.decoder_small, &self.decoder_part) {
            (Some(full), Some(small), Some(part_dec)) => {
                let pooled = avg_pool2d(features.clone(), [2, 2], [2, 2], [0, 0], true);
                Some(Reconstructions {
                    full: full.forward(features.clone()),
                    small: small.forward(pooled),
                    part: part_dec.forward(crop_quadrant(features, part)),
                })
            }
            _ => None,
        };
        (scores, recs)
    }
}

fn conv<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    bias: bool,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [4, 4])
        .with_stride([2, 2])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(bias)
        .init(device)
}
