//! Device catalog: turns the device list reported by the compute backend into the
//! [`DeviceHandle`]s offered to the user.

use crate::engine::{BackendDevice, DeviceClass, Engine};
use crate::error::{FlfmError, Result};
use std::fmt::{Display, Formatter};

pub const KIND_CPU: &str = "CPU";
pub const KIND_GPU: &str = "GPU";
pub const KIND_ERR: &str = "ERR";

/// Index of the single CPU device.
pub const CPU_INDEX: i32 = -1;
/// Index of the sentinel reported when no engine is available.
pub const NO_ENGINE_INDEX: i32 = -2;

/// Identity of a compute device: a kind tag and an index.
///
/// The index is `-1` for the sole CPU device, `-2` for the "no engine" sentinel
/// and the backend ordinal (`>= 0`) for accelerators.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    kind: String,
    index: i32,
}

impl DeviceHandle {
    /// Builds a handle, checking the index/kind invariants.
    pub fn new(kind: impl Into<String>, index: i32) -> Result<Self> {
        let kind = kind.into();
        let valid = match index {
            CPU_INDEX => kind.eq_ignore_ascii_case(KIND_CPU),
            NO_ENGINE_INDEX => kind.eq_ignore_ascii_case(KIND_ERR),
            i => i >= 0 && !kind.is_empty(),
        };
        if !valid {
            return Err(FlfmError::InvalidArgument(format!(
                "invalid device handle ({kind}, {index})"
            )));
        }
        Ok(DeviceHandle { kind, index })
    }

    pub fn cpu() -> Self {
        DeviceHandle {
            kind: KIND_CPU.to_string(),
            index: CPU_INDEX,
        }
    }

    pub fn gpu(ordinal: u32) -> Self {
        DeviceHandle {
            kind: KIND_GPU.to_string(),
            index: ordinal as i32,
        }
    }

    /// The single entry reported when the backend cannot be loaded.
    pub fn error_sentinel() -> Self {
        DeviceHandle {
            kind: KIND_ERR.to_string(),
            index: NO_ENGINE_INDEX,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn index(&self) -> i32 {
        self.index
    }

    pub fn is_cpu(&self) -> bool {
        self.index == CPU_INDEX
    }

    pub fn is_error(&self) -> bool {
        self.index == NO_ENGINE_INDEX
    }

    /// Backend device name: `cpu`, `gpu0`, `gpu1`, ...
    pub fn device_name(&self) -> String {
        let kind = self.kind.to_lowercase();
        if self.index >= 0 {
            format!("{kind}{}", self.index)
        } else {
            kind
        }
    }

    /// Name shown to the user: `CPU`, `GPU:0`, `GPU:1`, ...
    pub fn display_name(&self) -> String {
        let kind = self.kind.to_uppercase();
        if self.index >= 0 {
            format!("{kind}:{}", self.index)
        } else {
            kind
        }
    }
}

impl Display for DeviceHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Lists the devices that can run inference.
///
/// Never returns an empty list. If the backend cannot be loaded or reports no
/// device, the result is a single [`DeviceHandle::error_sentinel`]. Each call
/// goes through [`Engine::backend`], so a failed backend load is retried here.
pub fn enumerate_devices(engine: &Engine) -> Vec<DeviceHandle> {
    let backend = match engine.backend() {
        Ok(backend) => backend,
        Err(err) => {
            log::error!("engine not available, cannot list devices: {err}");
            return vec![DeviceHandle::error_sentinel()];
        }
    };

    match backend.devices() {
        Ok(reported) if !reported.is_empty() => {
            let devices = devices_from_report(&reported);
            log::debug!("found {} devices on {}", devices.len(), backend.name());
            devices
        }
        Ok(_) => {
            log::error!("backend {} reported no devices", backend.name());
            vec![DeviceHandle::error_sentinel()]
        }
        Err(err) => {
            log::error!("error retrieving devices from {}: {err}", backend.name());
            vec![DeviceHandle::error_sentinel()]
        }
    }
}

/// If the first reported device is an accelerator, all devices are taken as
/// accelerators and a CPU fallback is appended. Otherwise there is just the CPU.
fn devices_from_report(reported: &[BackendDevice]) -> Vec<DeviceHandle> {
    match reported.first() {
        Some(first) if first.class == DeviceClass::Gpu => {
            let mut devices: Vec<DeviceHandle> = reported
                .iter()
                .map(|d| DeviceHandle {
                    kind: KIND_GPU.to_string(),
                    index: d.ordinal,
                })
                .collect();
            devices.push(DeviceHandle::cpu());
            devices
        }
        _ => vec![DeviceHandle::cpu()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{FailingLoader, FakeLoader};

    #[test]
    fn test_display_name() {
        assert_eq!(DeviceHandle::new("cpu", -1).unwrap().display_name(), "CPU");
        assert_eq!(DeviceHandle::new("gpu", 1).unwrap().display_name(), "GPU:1");
        assert_eq!(DeviceHandle::new("TPU", 3).unwrap().to_string(), "TPU:3");
    }

    #[test]
    fn test_device_name() {
        assert_eq!(DeviceHandle::cpu().device_name(), "cpu");
        assert_eq!(DeviceHandle::gpu(0).device_name(), "gpu0");
        assert_eq!(DeviceHandle::new("GPU", 2).unwrap().device_name(), "gpu2");
    }

    #[test]
    fn test_invalid_handles_are_rejected() {
        assert!(DeviceHandle::new("GPU", -1).is_err());
        assert!(DeviceHandle::new("CPU", -2).is_err());
        assert!(DeviceHandle::new("GPU", -7).is_err());
        assert!(DeviceHandle::new("ERR", -2).unwrap().is_error());
    }

    #[test]
    fn test_gpu_report_appends_cpu() {
        let engine = Engine::new(Box::new(FakeLoader::with_devices(vec![
            BackendDevice::gpu(0),
            BackendDevice::gpu(1),
        ])));
        let devices = enumerate_devices(&engine);
        let names: Vec<String> = devices.iter().map(|d| d.display_name()).collect();
        assert_eq!(names, vec!["GPU:0", "GPU:1", "CPU"]);
        let last = devices.last().unwrap();
        assert!(last.is_cpu());
        assert_eq!(last.index(), -1);
    }

    #[test]
    fn test_cpu_report_yields_single_cpu() {
        let engine = Engine::new(Box::new(FakeLoader::with_devices(vec![
            BackendDevice::cpu(),
            BackendDevice::gpu(0),
        ])));
        assert_eq!(enumerate_devices(&engine), vec![DeviceHandle::cpu()]);
    }

    #[test]
    fn test_unavailable_backend_yields_sentinel() {
        let engine = Engine::new(Box::new(FailingLoader::default()));
        let devices = enumerate_devices(&engine);
        assert_eq!(devices, vec![DeviceHandle::error_sentinel()]);
        assert_eq!(devices[0].kind(), "ERR");
        assert_eq!(devices[0].index(), -2);
    }

    #[test]
    fn test_empty_report_yields_sentinel() {
        let engine = Engine::new(Box::new(FakeLoader::with_devices(vec![])));
        assert_eq!(enumerate_devices(&engine), vec![DeviceHandle::error_sentinel()]);
    }
}
