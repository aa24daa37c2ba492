use anyhow::{Context, Result};
use burn::prelude::*;
use image::{GenericImage, Rgb, RgbImage};

/// Map [-1, 1] normalized values back to [0, 1].
pub fn scale_back(value: f32) -> f32 {
    (value + 1.0) * 0.5
}

/// Convert a BCHW tensor in [-1, 1] to a vector of RGB images.
///
/// Accepts one or three channels; single-channel tensors are replicated
/// across RGB.
pub fn tensor_to_images<B: Backend>(tensor: Tensor<B, 4>) -> Result<Vec<RgbImage>> {
    let [batch, channels, height, width] = tensor.dims();
    if channels != 1 && channels != 3 {
        return Err(anyhow::anyhow!(
            "expected 1 or 3 channels for images, got {channels}"
        ));
    }

    let values = tensor
        .to_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| anyhow::anyhow!("failed to read tensor data as f32: {err:?}"))?;
    let hw = height * width;
    let mut images = Vec::with_capacity(batch);

    for b in 0..batch {
        let base = b * channels * hw;
        let mut img = RgbImage::new(width as u32, height as u32);
        for y in 0..height {
            for x in 0..width {
                let idx = y * width + x;
                let pixel = |channel: usize| {
                    let value = values[base + channel * hw + idx];
                    (scale_back(value).clamp(0.0, 1.0) * 255.0) as u8
                };
                let rgb = if channels == 1 {
                    let v = pixel(0);
                    [v, v, v]
                } else {
                    [pixel(0), pixel(1), pixel(2)]
                };
                img.put_pixel(x as u32, y as u32, Rgb(rgb));
            }
        }
        images.push(img);
    }

    Ok(images)
}

/// Merge images into a fixed grid (rows x cols).
pub fn merge_images(images: &[RgbImage], rows: usize, cols: usize) -> Result<RgbImage> {
    if images.is_empty() {
        return Err(anyhow::anyhow!("no images to merge"));
    }
    let width = images[0].width();
    let height = images[0].height();
    let mut out = RgbImage::new(width * cols as u32, height * rows as u32);

    for (idx, img) in images.iter().enumerate() {
        let row = idx / cols;
        let col = idx % cols;
        if row >= rows {
            break;
        }
        out.copy_from(img, (col as u32) * width, (row as u32) * height)
            .context("failed to copy image into grid")?;
    }

    Ok(out)
}
