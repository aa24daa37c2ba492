use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::warn;

/// Metric names logged without the `/<mode>` suffix.
const TAG_MODE_EXCEPTIONS: [&str; 2] = ["histogram", "embedding"];

/// Floor applied to the wall-clock delta in `steps_per_sec` so the division
/// never sees a near-zero duration.
const DURATION_FLOOR_SECS: f64 = 1e-6;

/// Phase tag attached to logged metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Valid,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Train => write!(f, "train"),
            Mode::Valid => write!(f, "valid"),
        }
    }
}

/// Which logging back end the facade writes through.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TrackerChoice {
    /// Append JSONL events (and PNG artifacts) under the experiment dir.
    Jsonl,
    /// Keep everything in memory; used by tests.
    Memory,
    /// Disable tracking entirely.
    None,
}

/// One logging back end. All operations are infallible from the caller's
/// point of view; back ends swallow their own I/O errors with a warning.
pub trait TrackerBackend {
    fn name(&self) -> &'static str;
    fn log_scalar(&mut self, tag: &str, value: f64, step: usize);
    fn log_image(&mut self, tag: &str, image: &RgbImage, step: usize);
    fn log_histogram(&mut self, tag: &str, values: &[f64], step: usize);
}

#[derive(Debug, Serialize)]
struct ScalarEvent<'a> {
    tag: &'a str,
    value: f64,
    step: usize,
}

/// File-backed tracker writing one JSON object per line plus PNG artifacts.
pub struct JsonlBackend {
    dir: PathBuf,
    events: BufWriter<File>,
}

impl JsonlBackend {
    pub fn create(dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("events.jsonl"))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            events: BufWriter::new(file),
        })
    }

    fn write_event(&mut self, event: &impl Serialize) {
        match serde_json::to_string(event) {
            Ok(line) => {
                if writeln!(self.events, "{line}").and_then(|_| self.events.flush()).is_err() {
                    warn!("failed to append tracking event");
                }
            }
            Err(err) => warn!("failed to serialize tracking event: {err}"),
        }
    }
}

impl TrackerBackend for JsonlBackend {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn log_scalar(&mut self, tag: &str, value: f64, step: usize) {
        self.write_event(&ScalarEvent { tag, value, step });
    }

    fn log_image(&mut self, tag: &str, image: &RgbImage, step: usize) {
        let filename = format!("{}_{step}.png", tag.replace('/', "_"));
        let path = self.dir.join(&filename);
        if let Err(err) = image.save(&path) {
            warn!("failed to save image artifact {}: {err}", path.display());
        }
    }

    fn log_histogram(&mut self, tag: &str, values: &[f64], step: usize) {
        #[derive(Serialize)]
        struct HistogramEvent<'a> {
            tag: &'a str,
            values: &'a [f64],
            step: usize,
        }
        self.write_event(&HistogramEvent { tag, values, step });
    }
}

/// Everything the in-memory back end recorded, inspectable after the run.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub scalars: Vec<(String, f64, usize)>,
    pub images: Vec<(String, usize)>,
    pub histograms: Vec<(String, Vec<f64>, usize)>,
}

impl MemoryStore {
    pub fn scalars_named(&self, tag: &str) -> Vec<f64> {
        self.scalars
            .iter()
            .filter(|(name, _, _)| name == tag)
            .map(|(_, value, _)| *value)
            .collect()
    }
}

/// In-memory tracker retaining a shared handle for inspection.
#[derive(Default)]
pub struct MemoryBackend {
    store: Arc<Mutex<MemoryStore>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> Arc<Mutex<MemoryStore>> {
        self.store.clone()
    }
}

impl TrackerBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn log_scalar(&mut self, tag: &str, value: f64, step: usize) {
        let mut store = self.store.lock().expect("tracker store lock poisoned");
        store.scalars.push((tag.to_string(), value, step));
    }

    fn log_image(&mut self, tag: &str, _image: &RgbImage, step: usize) {
        let mut store = self.store.lock().expect("tracker store lock poisoned");
        store.images.push((tag.to_string(), step));
    }

    fn log_histogram(&mut self, tag: &str, values: &[f64], step: usize) {
        let mut store = self.store.lock().expect("tracker store lock poisoned");
        store.histograms.push((tag.to_string(), values.to_vec(), step));
    }
}

/// Facade unifying the tracking back ends behind a fixed set of named
/// operations. Without a back end every call is a no-op.
pub struct MetricsWriter {
    backend: Option<Box<dyn TrackerBackend>>,
    step: usize,
    mode: Mode,
    timer: Instant,
    tag_mode_exceptions: HashSet<&'static str>,
}

impl MetricsWriter {
    /// Build a writer for the configured back end. A back end that cannot be
    /// constructed degrades to no-op logging with a warning rather than
    /// failing the run.
    pub fn new(choice: &TrackerChoice, log_dir: &Path) -> Self {
        let backend: Option<Box<dyn TrackerBackend>> = match choice {
            TrackerChoice::Jsonl => match JsonlBackend::create(log_dir) {
                Ok(backend) => Some(Box::new(backend)),
                Err(err) => {
                    warn!(
                        "tracking back end unavailable ({err}); metrics will not be recorded"
                    );
                    None
                }
            },
            TrackerChoice::Memory => Some(Box::new(MemoryBackend::new())),
            TrackerChoice::None => None,
        };
        Self::with_backend(backend)
    }

    /// Build a writer around an already-constructed back end.
    pub fn with_backend(backend: Option<Box<dyn TrackerBackend>>) -> Self {
        Self {
            backend,
            step: 0,
            mode: Mode::Train,
            timer: Instant::now(),
            tag_mode_exceptions: TAG_MODE_EXCEPTIONS.into_iter().collect(),
        }
    }

    pub fn disabled() -> Self {
        Self::with_backend(None)
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.backend.as_ref().map(|backend| backend.name())
    }

    /// Record the current step and mode, and log the steps-per-second derived
    /// from the wall-clock delta since the previous call.
    pub fn set_step(&mut self, step: usize, mode: Mode) {
        self.mode = mode;
        self.step = step;
        if step > 0 {
            let secs = self.timer.elapsed().as_secs_f64().max(DURATION_FLOOR_SECS);
            self.add_scalar("steps_per_sec", 1.0 / secs);
        }
        self.timer = Instant::now();
    }

    /// Log a named scalar, tagged with the current mode unless the name is in
    /// the exclusion set.
    pub fn add_scalar(&mut self, tag: &str, value: f64) {
        let tag = self.resolve_tag(tag);
        let step = self.step;
        if let Some(backend) = self.backend.as_mut() {
            backend.log_scalar(&tag, value, step);
        }
    }

    /// Log a named image, tagged with the current mode.
    pub fn add_image(&mut self, tag: &str, image: &RgbImage) {
        let tag = self.resolve_tag(tag);
        let step = self.step;
        if let Some(backend) = self.backend.as_mut() {
            backend.log_image(&tag, image, step);
        }
    }

    /// Log a histogram-like series; never mode-tagged.
    pub fn add_histogram(&mut self, tag: &str, values: &[f64]) {
        let step = self.step;
        if let Some(backend) = self.backend.as_mut() {
            backend.log_histogram(tag, values, step);
        }
    }

    fn resolve_tag(&self, tag: &str) -> String {
        if self.tag_mode_exceptions.contains(tag) {
            tag.to_string()
        } else {
            format!("{tag}/{}", self.mode)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_writer() -> (MetricsWriter, Arc<Mutex<MemoryStore>>) {
        let backend = MemoryBackend::new();
        let handle = backend.handle();
        (MetricsWriter::with_backend(Some(Box::new(backend))), handle)
    }

    #[test]
    fn scalars_are_mode_tagged() {
        let (mut writer, store) = memory_writer();
        writer.set_step(0, Mode::Train);
        writer.add_scalar("g_loss", 1.5);
        writer.set_step(1, Mode::Valid);
        writer.add_scalar("g_loss", 2.5);

        let store = store.lock().unwrap();
        assert_eq!(store.scalars_named("g_loss/train"), vec![1.5]);
        assert_eq!(store.scalars_named("g_loss/valid"), vec![2.5]);
    }

    #[test]
    fn exclusion_set_skips_mode_tag() {
        let (mut writer, store) = memory_writer();
        writer.set_step(0, Mode::Train);
        writer.add_scalar("embedding", 0.25);
        writer.add_histogram("weights", &[1.0, 2.0]);

        let store = store.lock().unwrap();
        assert_eq!(store.scalars_named("embedding"), vec![0.25]);
        assert_eq!(store.histograms.len(), 1);
        assert_eq!(store.histograms[0].0, "weights");
    }

    #[test]
    fn steps_per_sec_logged_after_first_step() {
        let (mut writer, store) = memory_writer();
        writer.set_step(0, Mode::Train);
        assert!(store.lock().unwrap().scalars.is_empty());

        writer.set_step(1, Mode::Train);
        let store = store.lock().unwrap();
        let rates = store.scalars_named("steps_per_sec/train");
        assert_eq!(rates.len(), 1);
        assert!(rates[0].is_finite() && rates[0] > 0.0);
    }

    #[test]
    fn missing_backend_is_noop() {
        let mut writer = MetricsWriter::disabled();
        writer.set_step(1, Mode::Train);
        writer.add_scalar("g_loss", 1.0);
        writer.add_histogram("weights", &[0.0]);
        assert!(writer.backend_name().is_none());
    }
}
