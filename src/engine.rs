//! Process-wide compute engine handle and the backend abstraction it owns.
//!
//! A backend is loaded through an injected [`BackendLoader`]. The [`Engine`] attempts the
//! load lazily and keeps the first successful backend for the rest of the process; a failed
//! load is not cached, so the next caller tries again. Once loaded, the backend is shared
//! read-only between all worker tasks.

use crate::device::DeviceHandle;
use crate::error::{FlfmError, Result};
use ndarray::ArrayD;
use once_cell::sync::OnceCell;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockWriteGuard};

/// Class of a device as reported by a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceClass {
    Cpu,
    Gpu,
}

/// A device entry as reported by a backend, before it is turned into a [`DeviceHandle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackendDevice {
    pub class: DeviceClass,
    pub ordinal: i32,
}

impl BackendDevice {
    pub fn cpu() -> Self {
        BackendDevice {
            class: DeviceClass::Cpu,
            ordinal: 0,
        }
    }

    pub fn gpu(ordinal: i32) -> Self {
        BackendDevice {
            class: DeviceClass::Gpu,
            ordinal,
        }
    }
}

/// An inference runtime able to list its devices and hand out device-bound contexts.
pub trait ComputeBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Devices in backend order. Accelerators, if any, are listed first.
    fn devices(&self) -> Result<Vec<BackendDevice>>;

    /// Acquires an execution context bound to `device`.
    ///
    /// The context is released when the returned box is dropped.
    fn acquire_context(&self, device: &DeviceHandle) -> Result<Box<dyn ExecutionContext>>;
}

/// Device-bound scope in which models are deserialized and executed.
pub trait ExecutionContext {
    fn device(&self) -> &DeviceHandle;

    /// Deserializes `bytes` into a runnable model whose inputs have the given shapes.
    fn load_model(&mut self, bytes: &[u8], input_shapes: &[Vec<usize>])
        -> Result<Box<dyn LoadedModel>>;
}

/// A deserialized model ready for a forward pass.
pub trait LoadedModel {
    fn forward(&self, inputs: Vec<ArrayD<f32>>) -> Result<Vec<ArrayD<f32>>>;
}

/// Loads a backend. Injected into the [`Engine`] instead of relying on ambient state.
pub trait BackendLoader: Send + Sync {
    fn load(&self) -> Result<Arc<dyn ComputeBackend>>;
}

/// Lazily initialized, thread-safe handle on the compute backend.
pub struct Engine {
    loader: Box<dyn BackendLoader>,
    backend: RwLock<Option<Arc<dyn ComputeBackend>>>,
    init_lock: Mutex<()>,
}

impl Engine {
    pub fn new(loader: Box<dyn BackendLoader>) -> Self {
        Engine {
            loader,
            backend: RwLock::new(None),
            init_lock: Mutex::new(()),
        }
    }

    /// Returns the backend, loading it first if no load has succeeded yet.
    pub fn backend(&self) -> Result<Arc<dyn ComputeBackend>> {
        if let Some(backend) = self.loaded() {
            return Ok(backend);
        }

        // one loader at a time; whoever waited here may find the work already done
        let _guard = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(backend) = self.loaded() {
            return Ok(backend);
        }

        match self.loader.load() {
            Ok(backend) => {
                log::info!("compute backend {} initialized", backend.name());
                *self.write_backend() = Some(backend.clone());
                Ok(backend)
            }
            Err(err) => {
                log::error!("compute backend failed to load: {err}");
                Err(match err {
                    FlfmError::BackendUnavailable(msg) => FlfmError::BackendUnavailable(msg),
                    other => FlfmError::BackendUnavailable(other.to_string()),
                })
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.loaded().is_some()
    }

    /// Drops the loaded backend. The next call to [`Engine::backend`] loads it again.
    pub fn teardown(&self) {
        if let Some(backend) = self.write_backend().take() {
            log::info!("compute backend {} released", backend.name());
        }
    }

    // the slot only ever holds a complete value, so a poisoned lock is still usable
    fn loaded(&self) -> Option<Arc<dyn ComputeBackend>> {
        self.backend
            .read()
            .unwrap_or_else(|poisoned| {
                log::warn!("engine backend lock poisoned, recovering");
                poisoned.into_inner()
            })
            .clone()
    }

    fn write_backend(&self) -> RwLockWriteGuard<'_, Option<Arc<dyn ComputeBackend>>> {
        self.backend.write().unwrap_or_else(|poisoned| {
            log::warn!("engine backend lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

static GLOBAL_ENGINE: OnceCell<Arc<Engine>> = OnceCell::new();

/// Installs the process-wide engine. Later calls keep the first engine and ignore `loader`.
pub fn init_global(loader: Box<dyn BackendLoader>) -> Arc<Engine> {
    let mut installed = false;
    let engine = GLOBAL_ENGINE.get_or_init(|| {
        installed = true;
        Arc::new(Engine::new(loader))
    });
    if !installed {
        log::warn!("global engine already installed, keeping the existing one");
    }
    engine.clone()
}

/// The process-wide engine, if [`init_global`] has been called.
pub fn global() -> Option<Arc<Engine>> {
    GLOBAL_ENGINE.get().cloned()
}

/// Releases the backend held by the process-wide engine, if any.
pub fn teardown_global() {
    if let Some(engine) = GLOBAL_ENGINE.get() {
        engine.teardown();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_backend_is_loaded_once_after_success() {
        let loader = FakeLoader::with_devices(vec![BackendDevice::cpu()]);
        let loads = loader.loads.clone();
        let engine = Engine::new(Box::new(loader));

        assert!(!engine.is_initialized());
        engine.backend().unwrap();
        engine.backend().unwrap();
        assert!(engine.is_initialized());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_load_is_retried() {
        let loader = FakeLoader::failing_first(2, vec![BackendDevice::cpu()]);
        let loads = loader.loads.clone();
        let engine = Engine::new(Box::new(loader));

        assert!(matches!(
            engine.backend(),
            Err(FlfmError::BackendUnavailable(_))
        ));
        assert!(engine.backend().is_err());
        assert!(engine.backend().is_ok());
        assert!(engine.backend().is_ok());
        assert_eq!(loads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_teardown_forces_reload() {
        let loader = FakeLoader::with_devices(vec![BackendDevice::cpu()]);
        let loads = loader.loads.clone();
        let engine = Engine::new(Box::new(loader));

        engine.backend().unwrap();
        engine.teardown();
        assert!(!engine.is_initialized());
        engine.backend().unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_poisoned_backend_lock_still_memoizes() {
        let loader = FakeLoader::with_devices(vec![BackendDevice::cpu()]);
        let loads = loader.loads.clone();
        let engine = Arc::new(Engine::new(Box::new(loader)));

        let poisoner = engine.clone();
        let panicked = std::thread::spawn(move || {
            let _guard = poisoner.backend.write().unwrap();
            panic!("poison the backend lock");
        })
        .join();
        assert!(panicked.is_err());
        assert!(engine.backend.is_poisoned());

        engine.backend().unwrap();
        engine.backend().unwrap();
        assert!(engine.is_initialized());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_global_engine_keeps_first_installation() {
        let first = init_global(Box::new(FakeLoader::with_devices(vec![BackendDevice::cpu()])));
        let second = init_global(Box::new(FailingLoader));
        assert!(Arc::ptr_eq(&first, &second));
        assert!(global().is_some_and(|engine| Arc::ptr_eq(&engine, &first)));

        assert!(first.backend().is_ok());
        teardown_global();
        assert!(!first.is_initialized());
    }

    #[test]
    fn test_concurrent_first_use_loads_once() {
        let loader = FakeLoader::with_devices(vec![BackendDevice::cpu()]);
        let loads = loader.loads.clone();
        let engine = Arc::new(Engine::new(Box::new(loader)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                std::thread::spawn(move || engine.backend().is_ok())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }
}
