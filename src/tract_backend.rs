//! ONNX backend built on `tract`. Runs on the CPU only.

use crate::device::DeviceHandle;
use crate::engine::{
    BackendDevice, BackendLoader, ComputeBackend, ExecutionContext, LoadedModel,
};
use crate::error::{FlfmError, Result};
use ndarray::{ArrayD, IxDyn};
use std::io::Cursor;
use std::sync::Arc;
use tract_onnx::prelude::{
    tvec, Datum, Framework, Graph, InferenceFact, InferenceModel, InferenceModelExt, IntoTensor,
    SimplePlan, TVec, TValue, Tensor, TypedFact, TypedOp,
};

type RunnableModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Loads the [`TractBackend`]. The pure-Rust runtime has no native library to probe,
/// so this loader never fails.
#[derive(Default)]
pub struct TractLoader;

impl BackendLoader for TractLoader {
    fn load(&self) -> Result<Arc<dyn ComputeBackend>> {
        Ok(Arc::new(TractBackend))
    }
}

#[derive(Debug, Default)]
pub struct TractBackend;

impl ComputeBackend for TractBackend {
    fn name(&self) -> &str {
        "tract-onnx"
    }

    fn devices(&self) -> Result<Vec<BackendDevice>> {
        Ok(vec![BackendDevice::cpu()])
    }

    fn acquire_context(&self, device: &DeviceHandle) -> Result<Box<dyn ExecutionContext>> {
        if !device.is_cpu() {
            return Err(FlfmError::DeviceContext {
                device: device.device_name(),
                reason: "tract-onnx only executes on the CPU".to_string(),
            });
        }
        log::debug!("acquired tract context on {}", device.device_name());
        Ok(Box::new(TractContext {
            device: device.clone(),
        }))
    }
}

struct TractContext {
    device: DeviceHandle,
}

impl Drop for TractContext {
    fn drop(&mut self) {
        log::debug!("released tract context on {}", self.device.device_name());
    }
}

impl ExecutionContext for TractContext {
    fn device(&self) -> &DeviceHandle {
        &self.device
    }

    fn load_model(
        &mut self,
        bytes: &[u8],
        input_shapes: &[Vec<usize>],
    ) -> Result<Box<dyn LoadedModel>> {
        let runnable = match load_runnable_model(bytes, input_shapes, true) {
            Ok(model) => model,
            Err(opt_err) => {
                log::warn!(
                    "model failed optimized load ({opt_err}); falling back to decluttered graph"
                );
                load_runnable_model(bytes, input_shapes, false)?
            }
        };
        Ok(Box::new(TractModel { runnable }))
    }
}

fn parse_model(bytes: &[u8], input_shapes: &[Vec<usize>]) -> Result<InferenceModel> {
    let mut model = tract_onnx::onnx()
        .model_for_read(&mut Cursor::new(bytes))
        .map_err(|e| FlfmError::InvalidModel(format!("failed to parse ONNX graph: {e}")))?;

    for (ix, shape) in input_shapes.iter().enumerate() {
        model = model
            .with_input_fact(ix, InferenceFact::dt_shape(f32::datum_type(), shape.clone()))
            .map_err(|e| {
                FlfmError::InvalidModel(format!("model does not accept input {ix} {shape:?}: {e}"))
            })?;
    }
    Ok(model)
}

fn load_runnable_model(
    bytes: &[u8],
    input_shapes: &[Vec<usize>],
    optimized: bool,
) -> Result<RunnableModel> {
    let model = parse_model(bytes, input_shapes)?;
    let runnable = if optimized {
        model
            .into_optimized()
            .map_err(|e| FlfmError::InvalidModel(format!("unable to optimize graph: {e}")))?
            .into_runnable()
    } else {
        model
            .into_typed()
            .map_err(|e| FlfmError::InvalidModel(format!("unable to type-check graph: {e}")))?
            .into_decluttered()
            .map_err(|e| FlfmError::InvalidModel(format!("unable to declutter graph: {e}")))?
            .into_runnable()
    };
    runnable.map_err(|e| FlfmError::InvalidModel(format!("unable to make graph runnable: {e}")))
}

struct TractModel {
    runnable: RunnableModel,
}

impl LoadedModel for TractModel {
    fn forward(&self, inputs: Vec<ArrayD<f32>>) -> Result<Vec<ArrayD<f32>>> {
        let mut values: TVec<TValue> = tvec![];
        for array in inputs {
            let shape = array.shape().to_vec();
            let data: Vec<f32> = array.iter().copied().collect();
            let tensor = Tensor::from_shape(&shape, &data)
                .map_err(|e| FlfmError::InferenceFailure(format!("bad input tensor: {e}")))?;
            values.push(tensor.into());
        }

        let outputs = self
            .runnable
            .run(values)
            .map_err(|e| FlfmError::InferenceFailure(format!("forward pass failed: {e}")))?;

        outputs
            .into_iter()
            .map(|value| {
                let tensor = value.into_tensor();
                let shape = tensor.shape().to_vec();
                let data = tensor
                    .as_slice::<f32>()
                    .map_err(|e| {
                        FlfmError::InferenceFailure(format!("output is not f32: {e}"))
                    })?
                    .to_vec();
                ArrayD::from_shape_vec(IxDyn(&shape), data)
                    .map_err(|e| FlfmError::InferenceFailure(e.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_single_cpu() {
        let backend = TractLoader.load().unwrap();
        assert_eq!(backend.devices().unwrap(), vec![BackendDevice::cpu()]);
    }

    #[test]
    fn test_gpu_context_is_refused() {
        let backend = TractBackend;
        assert!(matches!(
            backend.acquire_context(&DeviceHandle::gpu(0)),
            Err(FlfmError::DeviceContext { .. })
        ));
        assert!(backend.acquire_context(&DeviceHandle::cpu()).is_ok());
    }

    #[test]
    fn test_garbage_bytes_are_an_invalid_model() {
        let mut context = TractBackend.acquire_context(&DeviceHandle::cpu()).unwrap();
        let result = context.load_model(b"definitely not protobuf", &[vec![1, 2, 2]]);
        assert!(matches!(result, Err(FlfmError::InvalidModel(_))));
    }
}
