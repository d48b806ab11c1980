//! Deep-learning deconvolution of Fourier light-field microscopy (FLFM) stacks.
//!
//! A raw light-field stack and a point-spread function are converted to tensors,
//! run through a trained model on a selected device and the result is cropped to a
//! circular region of interest. [`controller::PluginController`] drives this from a
//! worker pool on behalf of a single-threaded user interface.

pub mod config;
pub mod controller;
pub mod data_container;
pub mod device;
pub mod engine;
pub mod error;
pub mod image_source;
pub mod inference;
pub mod io;
pub mod model_catalog;
pub mod model_resolver;
pub mod pipeline;
pub mod postprocess;
pub mod tensor_codec;
pub mod tract_backend;

pub use config::{NarrowingPolicy, PluginSettings, RoiParams};
pub use data_container::{ImageStack, Tensor};
pub use device::{enumerate_devices, DeviceHandle};
pub use engine::Engine;
pub use error::{FlfmError, Result};
pub use pipeline::{deconvolve, InferenceRequest};
