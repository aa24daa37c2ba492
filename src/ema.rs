use burn::module::{Module, ModuleMapper, ModuleVisitor, Param, ParamId};
use burn::prelude::*;
use burn::tensor::TensorData;
use std::marker::PhantomData;

/// Host-side copy of a module's float parameters, keyed by `ParamId` in
/// visitation order.
#[derive(Debug, Clone, Default)]
pub struct ParamSnapshot {
    entries: Vec<(ParamId, TensorData)>,
}

impl ParamSnapshot {
    /// Capture every float parameter of `module`.
    pub fn of<B: Backend, M: Module<B>>(module: &M) -> Self {
        let mut entries = Vec::new();
        let mut collector = Collector::<B> {
            entries: &mut entries,
            _backend: PhantomData,
        };
        module.visit(&mut collector);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: ParamId) -> Option<&TensorData> {
        self.entries
            .iter()
            .find(|(entry_id, _)| *entry_id == id)
            .map(|(_, data)| data)
    }

    /// Iterate over `(id, values)` pairs as f32 slices.
    pub fn iter_values(&self) -> impl Iterator<Item = (ParamId, Vec<f32>)> + '_ {
        self.entries.iter().map(|(id, data)| {
            let values = data
                .to_vec::<f32>()
                .expect("float parameter data");
            (*id, values)
        })
    }

    /// Load the captured values back into `module`. Parameters missing from
    /// the snapshot are left untouched.
    pub fn apply<B: Backend, M: Module<B>>(&self, module: M) -> M {
        let mut loader = Loader::<B> {
            snapshot: self,
            _backend: PhantomData,
        };
        module.map(&mut loader)
    }
}

struct Collector<'a, B: Backend> {
    entries: &'a mut Vec<(ParamId, TensorData)>,
    _backend: PhantomData<B>,
}

impl<B: Backend> ModuleVisitor<B> for Collector<'_, B> {
    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        self.entries
            .push((param.id, param.val().to_data().convert::<f32>()));
    }
}

struct Loader<'a, B: Backend> {
    snapshot: &'a ParamSnapshot,
    _backend: PhantomData<B>,
}

impl<B: Backend> ModuleMapper<B> for Loader<'_, B> {
    fn map_float<const D: usize>(&mut self, param: Param<Tensor<B, D>>) -> Param<Tensor<B, D>> {
        match self.snapshot.get(param.id) {
            Some(data) => {
                let data = data.clone();
                param.map(|tensor| {
                    Tensor::from_data(data, &tensor.device()).require_grad()
                })
            }
            None => param,
        }
    }
}

/// Exponentially averaged shadow copy of generator parameters.
///
/// The shadow stays in one-to-one correspondence with the live parameters
/// (same ids, same shapes) and is refreshed after every generator optimizer
/// step. Validation sampling swaps the shadow in, samples, and restores the
/// live weights before returning.
#[derive(Debug, Clone)]
pub struct EmaTracker {
    shadow: ParamSnapshot,
    decay: f64,
}

impl EmaTracker {
    /// Start tracking with `shadow = live`.
    pub fn new<B: Backend, M: Module<B>>(module: &M, decay: f64) -> Self {
        Self {
            shadow: ParamSnapshot::of(module),
            decay,
        }
    }

    pub fn decay(&self) -> f64 {
        self.decay
    }

    pub fn shadow(&self) -> &ParamSnapshot {
        &self.shadow
    }

    /// Replace the shadow wholesale, e.g. when resuming from a checkpoint.
    pub fn set_shadow(&mut self, shadow: ParamSnapshot) {
        self.shadow = shadow;
    }

    /// Fold the live parameters into the shadow:
    /// `shadow = decay * shadow + (1 - decay) * live`.
    pub fn update<B: Backend, M: Module<B>>(&mut self, live: &M) {
        let live = ParamSnapshot::of(live);
        self.shadow = blend_snapshots(&self.shadow, &live, self.decay);
    }

    /// Run `sample` against `module` with the shadow parameters swapped in,
    /// then restore the original parameters. Single-threaded by construction,
    /// so no training step can observe the swapped-in state.
    pub fn with_shadow<B: Backend, M: Module<B>, R>(
        &self,
        module: M,
        sample: impl FnOnce(&M) -> R,
    ) -> (M, R) {
        let backup = ParamSnapshot::of(&module);
        let module = self.shadow.apply(module);
        let out = sample(&module);
        (backup.apply(module), out)
    }
}

/// Elementwise `decay * shadow + (1 - decay) * live` over paired snapshots.
pub fn blend_snapshots(shadow: &ParamSnapshot, live: &ParamSnapshot, decay: f64) -> ParamSnapshot {
    let entries = shadow
        .entries
        .iter()
        .map(|(id, shadow_data)| {
            let live_data = live
                .get(*id)
                .expect("live parameters must mirror the shadow");
            let shadow_values = shadow_data.to_vec::<f32>().expect("float parameter data");
            let live_values = live_data.to_vec::<f32>().expect("float parameter data");
            let blended: Vec<f32> = shadow_values
                .iter()
                .zip(live_values.iter())
                .map(|(s, l)| (decay * f64::from(*s) + (1.0 - decay) * f64::from(*l)) as f32)
                .collect();
            (*id, TensorData::new(blended, shadow_data.shape.clone()))
        })
        .collect();
    ParamSnapshot { entries }
}
