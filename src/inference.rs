//! Single forward pass of a deconvolution model on a chosen device.

use crate::data_container::Tensor;
use crate::device::DeviceHandle;
use crate::engine::ComputeBackend;
use crate::error::{FlfmError, Result};
use crate::tensor_codec::normalize_psf;
use ndarray::{ArrayD, Ix3};
use std::sync::Arc;
use std::time::Instant;

/// Maps the pipeline tensors onto a model's input list and its output list back onto a tensor.
pub trait IoAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn process_input(&self, image: Tensor, psf: Tensor) -> Vec<ArrayD<f32>>;

    fn process_output(&self, outputs: Vec<ArrayD<f32>>) -> Result<Tensor>;
}

/// Two inputs, one output: the image at position 0, the normalized PSF at position 1,
/// and the result at output position 0.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImagePsfAdapter;

impl IoAdapter for ImagePsfAdapter {
    fn name(&self) -> &str {
        "image+psf"
    }

    fn process_input(&self, image: Tensor, psf: Tensor) -> Vec<ArrayD<f32>> {
        vec![image.into_dyn(), psf.into_dyn()]
    }

    fn process_output(&self, outputs: Vec<ArrayD<f32>>) -> Result<Tensor> {
        let first = outputs
            .into_iter()
            .next()
            .ok_or_else(|| FlfmError::InferenceFailure("model produced no output".to_string()))?;
        let shape = first.shape().to_vec();
        first.into_dimensionality::<Ix3>().map_err(|_| {
            FlfmError::InferenceFailure(format!(
                "expected a 3-D output tensor, got shape {shape:?}"
            ))
        })
    }
}

/// Runs models on a compute backend through an [`IoAdapter`].
#[derive(Clone)]
pub struct InferenceEngine {
    backend: Arc<dyn ComputeBackend>,
    adapter: Arc<dyn IoAdapter>,
}

impl InferenceEngine {
    pub fn new(backend: Arc<dyn ComputeBackend>, adapter: Arc<dyn IoAdapter>) -> Self {
        InferenceEngine { backend, adapter }
    }

    /// Deserializes `model_bytes` on `device` and runs one forward pass.
    ///
    /// The PSF is normalized here, so callers pass it exactly as converted from the image.
    /// The execution context is dropped on every return path.
    ///
    /// # Arguments
    /// * `model_bytes` - serialized model.
    /// * `device` - device to execute on.
    /// * `input` - `(slice, row, column)` tensor of the raw light-field stack.
    /// * `psf` - un-normalized point-spread-function tensor.
    ///
    /// # Returns
    /// The output tensor at position 0 of the model outputs.
    ///
    /// # Errors
    /// - `DeviceContext` if the device cannot be acquired.
    /// - `InvalidArgument` if the PSF cannot be normalized.
    /// - `InvalidModel` if the bytes do not deserialize.
    /// - `InferenceFailure` if the forward pass fails or its output is unusable.
    pub fn run(
        &self,
        model_bytes: &[u8],
        device: &DeviceHandle,
        input: Tensor,
        mut psf: Tensor,
    ) -> Result<Tensor> {
        let mut context = self.backend.acquire_context(device)?;

        normalize_psf(&mut psf)?;
        let inputs = self.adapter.process_input(input, psf);
        let shapes: Vec<Vec<usize>> = inputs.iter().map(|a| a.shape().to_vec()).collect();

        let model = context.load_model(model_bytes, &shapes)?;

        let start = Instant::now();
        let outputs = model.forward(inputs)?;
        log::debug!(
            "forward pass on {} with adapter {} took {:?}",
            context.device().display_name(),
            self.adapter.name(),
            start.elapsed()
        );

        self.adapter.process_output(outputs)
    }
}
