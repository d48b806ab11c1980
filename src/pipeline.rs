//! One inference request from raw stacks to the displayable, post-processed result.

use crate::config::{NarrowingPolicy, RoiParams};
use crate::data_container::ImageStack;
use crate::device::DeviceHandle;
use crate::engine::Engine;
use crate::error::{FlfmError, Result};
use crate::inference::{InferenceEngine, IoAdapter};
use crate::model_resolver::ModelResolver;
use crate::postprocess::{apply_circle_mask, crop};
use crate::tensor_codec::{image_to_tensor, tensor_to_image};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Everything needed for one deconvolution run.
///
/// # Fields
/// - `id`: identifies the request in the log.
/// - `model_name`: artifact name, resolved anew for every request.
/// - `roi`: region kept in the output; `None` keeps the circle inscribed in the output slices.
#[derive(Clone, Debug)]
pub struct InferenceRequest {
    pub id: Uuid,
    pub model_name: String,
    pub device: DeviceHandle,
    pub input: ImageStack,
    pub psf: ImageStack,
    pub roi: Option<RoiParams>,
    pub narrowing: NarrowingPolicy,
}

impl InferenceRequest {
    pub fn new(
        model_name: impl Into<String>,
        device: DeviceHandle,
        input: ImageStack,
        psf: ImageStack,
    ) -> Self {
        InferenceRequest {
            id: Uuid::new_v4(),
            model_name: model_name.into(),
            device,
            input,
            psf,
            roi: None,
            narrowing: NarrowingPolicy::default(),
        }
    }

    pub fn with_roi(mut self, roi: Option<RoiParams>) -> Self {
        self.roi = roi;
        self
    }

    pub fn with_narrowing(mut self, narrowing: NarrowingPolicy) -> Self {
        self.narrowing = narrowing;
        self
    }
}

/// Runs a request end to end: encode, resolve, infer, decode, crop and mask.
///
/// Nothing partial is returned; any failing stage aborts the request.
pub fn deconvolve(
    engine: &Engine,
    resolver: &ModelResolver,
    adapter: Arc<dyn IoAdapter>,
    request: InferenceRequest,
) -> Result<ImageStack> {
    let start = Instant::now();
    let InferenceRequest {
        id,
        model_name,
        device,
        input,
        psf,
        roi,
        narrowing,
    } = request;
    log::info!(
        "request {id}: running {model_name} on {} ({} slices)",
        device.display_name(),
        input.slice_count()
    );
    if device.is_error() {
        return Err(FlfmError::InvalidArgument(
            "no compute device available".to_string(),
        ));
    }

    let input_tensor = image_to_tensor(&input)?;
    let psf_tensor = image_to_tensor(&psf)?;
    let artifact = resolver.resolve(&model_name)?;

    let inference = InferenceEngine::new(engine.backend()?, adapter);
    let output = inference.run(&artifact.bytes, &device, input_tensor, psf_tensor)?;
    let output = tensor_to_image(&output, narrowing, format!("{} deconvolved", input.title()))?;

    let roi = roi.unwrap_or_else(|| RoiParams::inscribed(output.width(), output.height()));
    let (x, y, width, height) = roi.crop_rect()?;
    let cropped = crop(&output, x, y, width, height)?;
    let result = apply_circle_mask(&cropped, roi.radius, roi.radius, width)?;

    log::info!("request {id}: finished in {:?}", start.elapsed());
    Ok(result)
}
