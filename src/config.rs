//! Runtime settings of the plugin and the region-of-interest parameters used in
//! post-processing.

use crate::error::{FlfmError, Result};
use preferences::{AppInfo, Preferences};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const APP_INFO: AppInfo = AppInfo {
    name: "FLFM Explorer",
    author: "FLFM Explorer Developers",
};

/// Key under which [`PluginSettings`] are stored by the `preferences` crate.
pub const PREFS_KEY: &str = "config/plugin";

/// How float samples coming out of the model are narrowed back to 16 bit.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NarrowingPolicy {
    /// Truncate toward zero and clamp into `0..=65535`. NaN becomes 0.
    #[default]
    Saturate,
    /// Truncate toward zero and keep the low 16 bits (fixed-width wrap-around).
    Wrap,
}

/// Region of interest in output-image pixel coordinates.
///
/// The same parameters define the crop square (side `2 * radius`, centred on
/// `(center_x, center_y)`) and the circular aperture inscribed in it.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoiParams {
    pub center_x: i32,
    pub center_y: i32,
    pub radius: i32,
}

impl RoiParams {
    pub fn new(center_x: i32, center_y: i32, radius: i32) -> Self {
        RoiParams {
            center_x,
            center_y,
            radius,
        }
    }

    /// The largest circle centred on a `width` x `height` slice.
    pub fn inscribed(width: usize, height: usize) -> Self {
        let radius = (width.min(height) / 2) as i32;
        RoiParams {
            center_x: (width / 2) as i32,
            center_y: (height / 2) as i32,
            radius,
        }
    }

    /// Crop rectangle as `(x, y, width, height)`.
    ///
    /// # Errors
    /// - `OutOfBounds` if the rectangle cannot be expressed in `i32` pixel coordinates.
    pub fn crop_rect(&self) -> Result<(i32, i32, i32, i32)> {
        let diameter = self.diameter()?;
        let x = self.center_x.checked_sub(self.radius);
        let y = self.center_y.checked_sub(self.radius);
        match (x, y) {
            (Some(x), Some(y)) => Ok((x, y, diameter, diameter)),
            _ => Err(self.overflow()),
        }
    }

    pub fn diameter(&self) -> Result<i32> {
        self.radius.checked_mul(2).ok_or_else(|| self.overflow())
    }

    fn overflow(&self) -> FlfmError {
        FlfmError::OutOfBounds(format!(
            "region of interest {self:?} exceeds the pixel coordinate range"
        ))
    }
}

/// Settings of the plugin.
///
/// # Fields
/// - `model_dir`: base directory of the filesystem fallback for model artifacts.
/// - `model_extension`: file extension of model artifacts (without the dot).
/// - `worker_threads`: size of the background worker pool.
/// - `narrowing`: policy for converting the model output back to 16 bit.
/// - `roi`: region of interest; `None` selects the inscribed circle of the output.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PluginSettings {
    pub model_dir: PathBuf,
    pub model_extension: String,
    pub worker_threads: usize,
    pub narrowing: NarrowingPolicy,
    pub roi: Option<RoiParams>,
}

impl Default for PluginSettings {
    fn default() -> Self {
        PluginSettings {
            model_dir: PathBuf::from("resources/models"),
            model_extension: "onnx".to_string(),
            worker_threads: 4,
            narrowing: NarrowingPolicy::Saturate,
            roi: None,
        }
    }
}

impl PluginSettings {
    /// Loads the stored settings, falling back to the defaults.
    ///
    /// Nothing is written back: the plugin keeps no state of its own on disk.
    pub fn load_or_default() -> Self {
        match PluginSettings::load(&APP_INFO, PREFS_KEY) {
            Ok(mut settings) => {
                if settings.worker_threads == 0 {
                    settings.worker_threads = 1;
                }
                settings
            }
            Err(err) => {
                log::debug!("no stored plugin settings ({err:?}), using defaults");
                PluginSettings::default()
            }
        }
    }
}
