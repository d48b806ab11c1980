//! Conversion between [`ImageStack`]s and the dense float tensors consumed by the model.
//!
//! The tensor layout is `(slice, row, column)`: axis 0 is z, axis 1 the image row
//! (height) and axis 2 the column (width). Samples are widened without any
//! normalization; only the point-spread function is scaled, by [`normalize_psf`].

use crate::config::NarrowingPolicy;
use crate::data_container::{ImageStack, Tensor};
use crate::error::{FlfmError, Result};
use ndarray::parallel::prelude::*;
use ndarray::{Axis, Zip};

/// Converts an image stack into a `(slice_count, height, width)` tensor.
///
/// Every unsigned 16-bit sample is widened to `f32` unchanged. Slices are
/// converted independently and in parallel; slice `i` of the stack lands at
/// index `i` of axis 0.
///
/// # Errors
/// - `InvalidArgument` if the stack has no slices.
pub fn image_to_tensor(stack: &ImageStack) -> Result<Tensor> {
    if stack.is_empty() {
        return Err(FlfmError::InvalidArgument(format!(
            "image stack '{}' has no slices",
            stack.title()
        )));
    }

    let mut tensor = Tensor::zeros(stack.data().dim());
    (
        tensor.axis_iter_mut(Axis(0)),
        stack.data().axis_iter(Axis(0)),
    )
        .into_par_iter()
        .for_each(|(mut tensor_slice, image_slice)| {
            tensor_slice.zip_mut_with(&image_slice, |t, &s| *t = f32::from(s));
        });
    Ok(tensor)
}

/// Converts a `(slice, row, column)` tensor back into an image stack.
///
/// The stack width is taken from axis 2 and the height from axis 1. Values are
/// truncated toward zero and narrowed to 16 bit according to `policy`.
///
/// # Errors
/// - `InvalidArgument` if any axis of the tensor is empty.
pub fn tensor_to_image(
    tensor: &Tensor,
    policy: NarrowingPolicy,
    title: impl Into<String>,
) -> Result<ImageStack> {
    let (slices, height, width) = tensor.dim();
    if slices == 0 || height == 0 || width == 0 {
        return Err(FlfmError::InvalidArgument(format!(
            "tensor of shape {:?} has an empty axis",
            tensor.shape()
        )));
    }

    let data = Zip::from(tensor).par_map_collect(|&v| narrow(v, policy));
    ImageStack::from_array(title, data)
}

/// Narrows one sample to 16 bit.
pub fn narrow(value: f32, policy: NarrowingPolicy) -> u16 {
    match policy {
        // `as` from float saturates and maps NaN to 0
        NarrowingPolicy::Saturate => value as u16,
        NarrowingPolicy::Wrap => (value as i32) as u16,
    }
}

/// Scales a point-spread-function tensor in place so that its elements sum to 1.
///
/// # Errors
/// - `InvalidArgument` if the tensor is empty or its sum is zero or not finite.
pub fn normalize_psf(psf: &mut Tensor) -> Result<()> {
    if psf.is_empty() {
        return Err(FlfmError::InvalidArgument("PSF tensor is empty".to_string()));
    }
    let sum: f64 = psf.iter().map(|&v| f64::from(v)).sum();
    if sum == 0.0 || !sum.is_finite() {
        return Err(FlfmError::InvalidArgument(format!(
            "PSF cannot be normalized, element sum is {sum}"
        )));
    }
    psf.mapv_inplace(|v| (f64::from(v) / sum) as f32);
    Ok(())
}
