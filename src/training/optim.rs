use anyhow::{Context, Result};
use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer, RmsProp, RmsPropConfig};
use burn::prelude::*;
use burn::record::{CompactRecorder, Recorder};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which optimizer family a checkpoint was written with. Stored in the
/// checkpoint metadata so a resume can detect a mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerKind {
    Adam,
    RmsProp,
}

impl std::fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimizerKind::Adam => write!(f, "adam"),
            OptimizerKind::RmsProp => write!(f, "rmsprop"),
        }
    }
}

/// Configurable optimizer selection. Adam is the usual choice; the
/// Wasserstein critic conventionally trains with RMSProp.
#[derive(Config, Debug)]
pub enum OptimizerChoice {
    Adam(AdamConfig),
    RmsProp(RmsPropConfig),
}

impl OptimizerChoice {
    pub fn kind(&self) -> OptimizerKind {
        match self {
            OptimizerChoice::Adam(_) => OptimizerKind::Adam,
            OptimizerChoice::RmsProp(_) => OptimizerKind::RmsProp,
        }
    }

    pub fn init<B: AutodiffBackend, M: AutodiffModule<B>>(&self) -> GanOptimizer<M, B> {
        match self {
            OptimizerChoice::Adam(config) => GanOptimizer::Adam(config.init()),
            OptimizerChoice::RmsProp(config) => GanOptimizer::RmsProp(config.init()),
        }
    }
}

/// Optimizer for one adversarial half, dispatching over the configured
/// family. Each half of the model carries its own instance so the moment
/// estimates never mix.
#[derive(Clone)]
pub enum GanOptimizer<M: AutodiffModule<B>, B: AutodiffBackend> {
    Adam(OptimizerAdaptor<Adam, M, B>),
    RmsProp(OptimizerAdaptor<RmsProp, M, B>),
}

impl<M: AutodiffModule<B>, B: AutodiffBackend> GanOptimizer<M, B> {
    pub fn kind(&self) -> OptimizerKind {
        match self {
            GanOptimizer::Adam(_) => OptimizerKind::Adam,
            GanOptimizer::RmsProp(_) => OptimizerKind::RmsProp,
        }
    }

    pub fn step(&mut self, lr: f64, module: M, grads: GradientsParams) -> M {
        match self {
            GanOptimizer::Adam(optim) => optim.step(lr, module, grads),
            GanOptimizer::RmsProp(optim) => optim.step(lr, module, grads),
        }
    }

    /// Persist the optimizer state next to the model checkpoint.
    pub fn save(&self, path: PathBuf, recorder: &CompactRecorder) -> Result<()> {
        match self {
            GanOptimizer::Adam(optim) => recorder
                .record(optim.to_record(), path)
                .context("failed to save adam optimizer state"),
            GanOptimizer::RmsProp(optim) => recorder
                .record(optim.to_record(), path)
                .context("failed to save rmsprop optimizer state"),
        }
    }

    /// Restore the optimizer state written by [`GanOptimizer::save`]. The
    /// caller is responsible for checking the checkpoint was written with
    /// the same optimizer family.
    pub fn load(
        self,
        path: PathBuf,
        recorder: &CompactRecorder,
        device: &B::Device,
    ) -> Result<Self> {
        match self {
            GanOptimizer::Adam(optim) => {
                let record = recorder
                    .load(path, device)
                    .context("failed to load adam optimizer state")?;
                Ok(GanOptimizer::Adam(optim.load_record(record)))
            }
            GanOptimizer::RmsProp(optim) => {
                let record = recorder
                    .load(path, device)
                    .context("failed to load rmsprop optimizer state")?;
                Ok(GanOptimizer::RmsProp(optim.load_record(record)))
            }
        }
    }
}
