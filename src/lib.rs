//! Training loops for adversarial generative models on Burn.
//!
//! The crate centers on [`training::GanTrainer`], an epoch-loop driver shared
//! by five GAN variants (standard, WGAN, WGAN-GP, LSGAN and a lightweight
//! FastGAN). Each variant contributes its loss formulas through
//! [`training::LossStrategy`]; the loop itself handles adaptive augmentation,
//! EMA parameter tracking, metric aggregation, validation sampling and
//! checkpointing.

pub mod augment;
pub mod data;
pub mod ema;
pub mod metrics;
pub mod model;
pub mod tracker;
pub mod training;
pub mod utils;
