//! Background orchestration for the plugin window.
//!
//! Device enumeration, model discovery and inference run on a worker pool. Workers
//! never touch the presentation: they send [`UiUpdate`]s over a channel, and the
//! UI thread applies them with [`UiDispatcher::drain`].

use crate::config::{PluginSettings, RoiParams};
use crate::data_container::ImageStack;
use crate::device::{enumerate_devices, DeviceHandle};
use crate::engine::Engine;
use crate::error::{FlfmError, Result};
use crate::image_source::ImageSource;
use crate::inference::{ImagePsfAdapter, IoAdapter};
use crate::model_catalog::ModelCatalog;
use crate::model_resolver::{ModelResolver, ResourceBundle};
use crate::pipeline::{deconvolve, InferenceRequest};
use crossbeam_channel::{Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use uuid::Uuid;

/// The widgets the controller drives. Only ever called on the UI thread.
pub trait Presentation {
    fn show_result(&mut self, result: ImageStack);
    fn set_device_options(&mut self, options: Vec<String>);
    fn set_model_options(&mut self, options: Vec<String>);
    fn set_busy(&mut self, busy: bool);
}

/// Message from a worker to the UI thread.
#[derive(Debug)]
pub enum UiUpdate {
    DeviceOptions(Vec<String>),
    ModelOptions(Vec<String>),
    Busy(bool),
    /// End of an inference run; `None` if it failed.
    Finished(Option<ImageStack>),
}

/// Receiving end of the worker channel, owned by the UI thread.
pub struct UiDispatcher {
    rx: Receiver<UiUpdate>,
}

impl UiDispatcher {
    /// Applies every pending update to `presentation` and returns how many there were.
    pub fn drain(&self, presentation: &mut dyn Presentation) -> usize {
        let mut count = 0;
        for update in self.rx.try_iter() {
            apply(update, presentation);
            count += 1;
        }
        count
    }

    /// Waits up to `timeout` for the next update.
    pub fn next_update(&self, timeout: Duration) -> Option<UiUpdate> {
        self.rx.recv_timeout(timeout).ok()
    }
}

/// Applies a single update to `presentation`.
pub fn apply(update: UiUpdate, presentation: &mut dyn Presentation) {
    match update {
        UiUpdate::DeviceOptions(options) => presentation.set_device_options(options),
        UiUpdate::ModelOptions(options) => presentation.set_model_options(options),
        UiUpdate::Busy(busy) => presentation.set_busy(busy),
        UiUpdate::Finished(result) => {
            if let Some(result) = result {
                presentation.show_result(result);
            }
            presentation.set_busy(false);
        }
    }
}

/// What the user picked in the window.
///
/// # Fields
/// - `iteration_index`: index into the offered model iterations.
/// - `device_index`: index into the offered devices.
/// - `roi`: region of interest, overriding the configured one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    pub iteration_index: usize,
    pub device_index: usize,
    pub roi: Option<RoiParams>,
}

#[derive(Debug, Default)]
struct ControllerState {
    devices: Vec<DeviceHandle>,
    catalog: ModelCatalog,
    input: Option<ImageStack>,
    psf: Option<ImageStack>,
    running: bool,
}

pub struct PluginController {
    engine: Arc<Engine>,
    resolver: ModelResolver,
    adapter: Arc<dyn IoAdapter>,
    settings: PluginSettings,
    pool: rayon::ThreadPool,
    state: Arc<RwLock<ControllerState>>,
    ui_tx: Sender<UiUpdate>,
}

impl PluginController {
    /// Creates the controller and the dispatcher the UI thread drains.
    pub fn new(
        engine: Arc<Engine>,
        resolver: ModelResolver,
        settings: PluginSettings,
    ) -> Result<(Self, UiDispatcher)> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.worker_threads.max(1))
            .thread_name(|i| format!("flfm-worker-{i}"))
            .build()
            .map_err(|e| FlfmError::InvalidArgument(format!("cannot start worker pool: {e}")))?;
        let (ui_tx, rx) = crossbeam_channel::unbounded();
        let controller = PluginController {
            engine,
            resolver,
            adapter: Arc::new(ImagePsfAdapter),
            settings,
            pool,
            state: Arc::new(RwLock::new(ControllerState::default())),
            ui_tx,
        };
        Ok((controller, UiDispatcher { rx }))
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn IoAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    /// Starts device enumeration and model discovery, independently of each other.
    pub fn post_init(&self) {
        let engine = self.engine.clone();
        let state = self.state.clone();
        let ui_tx = self.ui_tx.clone();
        self.pool.spawn(move || {
            let devices = enumerate_devices(&engine);
            let options = devices.iter().map(DeviceHandle::display_name).collect();
            if let Ok(mut state) = state.write() {
                state.devices = devices;
            }
            send(&ui_tx, UiUpdate::DeviceOptions(options));
        });

        let resolver = self.resolver.clone();
        let extension = self.settings.model_extension.clone();
        let state = self.state.clone();
        let ui_tx = self.ui_tx.clone();
        self.pool.spawn(move || {
            let bundle: Option<&dyn ResourceBundle> = resolver.bundle().map(|b| &**b);
            let catalog = match ModelCatalog::discover(bundle, resolver.base_dir(), &extension) {
                Ok(catalog) => catalog,
                Err(err) => {
                    log::error!("failed to list models: {err}");
                    ModelCatalog::default()
                }
            };
            let options = catalog.iterations();
            if let Ok(mut state) = state.write() {
                state.catalog = catalog;
            }
            send(&ui_tx, UiUpdate::ModelOptions(options));
        });
    }

    pub fn set_input(&self, stack: ImageStack) {
        if let Ok(mut state) = self.state.write() {
            state.input = Some(stack);
        }
    }

    pub fn set_psf(&self, stack: ImageStack) {
        if let Ok(mut state) = self.state.write() {
            state.psf = Some(stack);
        }
    }

    /// Asks `source` for the light-field image and then for the PSF.
    ///
    /// Returns `false` if the user cancelled either request; stacks acquired
    /// before the cancellation are kept.
    pub fn acquire_inputs(&self, source: &dyn ImageSource) -> bool {
        let Some(input) = source.acquire_image("Select the light-field image") else {
            return false;
        };
        self.set_input(input);
        let Some(psf) = source.acquire_image("Select the PSF") else {
            return false;
        };
        self.set_psf(psf);
        true
    }

    pub fn devices(&self) -> Vec<DeviceHandle> {
        self.state
            .read()
            .map(|state| state.devices.clone())
            .unwrap_or_default()
    }

    pub fn catalog(&self) -> ModelCatalog {
        self.state
            .read()
            .map(|state| state.catalog.clone())
            .unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        self.state.read().map(|state| state.running).unwrap_or(false)
    }

    /// Starts an inference run for `selection` on the worker pool.
    ///
    /// On success the UI receives `Busy(true)` and later exactly one `Finished`.
    ///
    /// # Errors
    /// - `InvalidArgument` if a run is in flight, the selection does not match the
    ///   offered models or devices, or the input or PSF is missing.
    pub fn run(&self, selection: Selection) -> Result<Uuid> {
        let request = {
            let mut state = self
                .state
                .write()
                .map_err(|_| FlfmError::InvalidArgument("controller state poisoned".into()))?;
            if state.running {
                return Err(FlfmError::InvalidArgument(
                    "an inference run is already in progress".into(),
                ));
            }
            let model_name = state
                .catalog
                .artifact_for_iteration_index(selection.iteration_index)
                .ok_or_else(|| {
                    FlfmError::InvalidArgument(format!(
                        "no model for iteration index {}",
                        selection.iteration_index
                    ))
                })?
                .to_string();
            let device = state
                .devices
                .get(selection.device_index)
                .filter(|device| !device.is_error())
                .cloned()
                .ok_or_else(|| {
                    FlfmError::InvalidArgument(format!(
                        "no usable device at index {}",
                        selection.device_index
                    ))
                })?;
            let (Some(input), Some(psf)) = (state.input.clone(), state.psf.clone()) else {
                return Err(FlfmError::InvalidArgument(
                    "input image and PSF must both be selected".into(),
                ));
            };
            state.running = true;
            InferenceRequest::new(model_name, device, input, psf)
                .with_roi(selection.roi.or(self.settings.roi))
                .with_narrowing(self.settings.narrowing)
        };

        let id = request.id;
        send(&self.ui_tx, UiUpdate::Busy(true));

        let engine = self.engine.clone();
        let resolver = self.resolver.clone();
        let adapter = self.adapter.clone();
        let state = self.state.clone();
        let ui_tx = self.ui_tx.clone();
        self.pool.spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                deconvolve(&engine, &resolver, adapter, request)
            }));
            let result = match outcome {
                Ok(Ok(result)) => Some(result),
                Ok(Err(err)) => {
                    log::error!("request {id} failed: {err}");
                    None
                }
                Err(_) => {
                    log::error!("request {id} panicked");
                    None
                }
            };
            if let Ok(mut state) = state.write() {
                state.running = false;
            }
            send(&ui_tx, UiUpdate::Finished(result));
        });
        Ok(id)
    }
}

fn send(ui_tx: &Sender<UiUpdate>, update: UiUpdate) {
    if let Err(err) = ui_tx.send(update) {
        log::warn!("UI is gone, dropping update: {:?}", err.into_inner());
    }
}
