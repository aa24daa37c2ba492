use anyhow::{Context, Result};
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use burn::tensor::TensorData;
use image::RgbImage;
use std::path::Path;

/// A single unconditional training example: one image as CHW floats in
/// [-1, 1], plus an optional class label carried through for logging.
#[derive(Debug, Clone)]
pub struct ImageExample {
    pub pixels: Vec<f32>,
    pub channels: usize,
    pub size: usize,
    pub label: i64,
}

/// A batch of real images and their labels.
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub labels: Tensor<B, 1, Int>,
}

impl<B: Backend> ImageBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.images.dims()[0]
    }
}

/// In-memory image dataset with an optional length override.
///
/// Small datasets train for many passes per epoch; overriding the length
/// lets one epoch cycle through the examples repeatedly, the way the
/// lightweight-GAN pipeline stretches a few hundred photos into thousands
/// of iterations.
pub struct GanDataset {
    examples: Vec<ImageExample>,
    length: usize,
}

impl GanDataset {
    pub fn new(examples: Vec<ImageExample>) -> Self {
        let length = examples.len();
        Self { examples, length }
    }

    /// Report `length` items, cycling through the underlying examples.
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }
}

impl Dataset<ImageExample> for GanDataset {
    fn get(&self, index: usize) -> Option<ImageExample> {
        if index >= self.length || self.examples.is_empty() {
            return None;
        }
        self.examples.get(index % self.examples.len()).cloned()
    }

    fn len(&self) -> usize {
        self.length
    }
}

/// Assembles normalized image tensors from examples.
#[derive(Clone, Default)]
pub struct ImageBatcher;

impl ImageBatcher {
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> Batcher<B, ImageExample, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageExample>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let channels = items.first().map(|item| item.channels).unwrap_or(0);
        let size = items.first().map(|item| item.size).unwrap_or(0);

        let mut pixels = Vec::with_capacity(batch_size * channels * size * size);
        let mut labels = Vec::with_capacity(batch_size);
        for item in items {
            pixels.extend_from_slice(&item.pixels);
            labels.push(item.label);
        }

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(pixels, [batch_size, channels, size, size]),
            device,
        );
        let labels = Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [batch_size]), device);

        ImageBatch { images, labels }
    }
}

/// Load every png/jpg under `dir`, resized to `size` x `size` and normalized
/// to CHW floats in [-1, 1]. All examples get label 0.
pub fn load_image_dir(dir: &Path, size: usize) -> Result<Vec<ImageExample>> {
    let mut paths = Vec::new();
    for pattern in ["png", "jpg", "jpeg"] {
        let matched = glob::glob(&format!("{}/**/*.{pattern}", dir.display()))
            .with_context(|| format!("bad glob pattern for {}", dir.display()))?;
        paths.extend(matched.filter_map(std::result::Result::ok));
    }
    paths.sort();

    if paths.is_empty() {
        return Err(anyhow::anyhow!(
            "no png/jpg images found under {}",
            dir.display()
        ));
    }

    let mut examples = Vec::with_capacity(paths.len());
    for path in paths {
        let img = image::open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?
            .to_rgb8();
        let img = if img.width() as usize != size || img.height() as usize != size {
            image::imageops::resize(
                &img,
                size as u32,
                size as u32,
                image::imageops::FilterType::CatmullRom,
            )
        } else {
            img
        };
        examples.push(ImageExample {
            pixels: image_to_chw(&img),
            channels: 3,
            size,
            label: 0,
        });
    }

    Ok(examples)
}

/// Convert RGB image data to CHW floats normalized to [-1, 1].
pub fn image_to_chw(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let hw = (width * height) as usize;
    let mut out = vec![0.0f32; hw * 3];

    for y in 0..height {
        for x in 0..width {
            let pixel = img.get_pixel(x, y).0;
            let idx = (y * width + x) as usize;
            out[idx] = (pixel[0] as f32 / 127.5) - 1.0;
            out[hw + idx] = (pixel[1] as f32 / 127.5) - 1.0;
            out[2 * hw + idx] = (pixel[2] as f32 / 127.5) - 1.0;
        }
    }

    out
}
