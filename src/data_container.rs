//! This module defines the image stack exchanged between the image source, the tensor codec,
//! the post-processor and the presentation layer.

use crate::error::{FlfmError, Result};
use ndarray::{Array2, Array3, ArrayView2, Axis};

/// Dense 3-D float tensor with axes `(slice, row, column)`.
pub type Tensor = Array3<f32>;

/// An ordered stack of 2-D slices of unsigned 16-bit samples.
///
/// The samples are stored as one `(slice, row, column)` array, so every slice
/// has the same width and height by construction. Slice order is the z-order
/// and is preserved by every operation of the crate.
///
/// # Fields
/// - `title`: Human readable name, used by the image source and the presentation.
/// - `data`: Samples with shape `(slice_count, height, width)`.
/// - `labels`: Optional per-slice label, one entry per slice.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageStack {
    title: String,
    data: Array3<u16>,
    labels: Vec<Option<String>>,
}

impl ImageStack {
    /// Creates a stack without slices. Slices are added with [`ImageStack::push_slice`].
    pub fn new(title: impl Into<String>, width: usize, height: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(FlfmError::InvalidArgument(format!(
                "slice dimensions must be non-zero, got {width}x{height}"
            )));
        }
        Ok(ImageStack {
            title: title.into(),
            data: Array3::zeros((0, height, width)),
            labels: vec![],
        })
    }

    /// Wraps an existing `(slice, row, column)` array. All labels are empty.
    pub fn from_array(title: impl Into<String>, data: Array3<u16>) -> Result<Self> {
        let (slices, height, width) = data.dim();
        if width == 0 || height == 0 {
            return Err(FlfmError::InvalidArgument(format!(
                "slice dimensions must be non-zero, got {width}x{height}"
            )));
        }
        Ok(ImageStack {
            title: title.into(),
            data,
            labels: vec![None; slices],
        })
    }

    /// Replaces the slice labels. The number of labels must match the slice count.
    pub fn with_labels(mut self, labels: Vec<Option<String>>) -> Result<Self> {
        if labels.len() != self.slice_count() {
            return Err(FlfmError::InvalidArgument(format!(
                "{} labels given for {} slices",
                labels.len(),
                self.slice_count()
            )));
        }
        self.labels = labels;
        Ok(self)
    }

    /// Appends a row-major slice at the end of the stack.
    pub fn push_slice(&mut self, label: Option<String>, pixels: Vec<u16>) -> Result<()> {
        let slice = Array2::from_shape_vec((self.height(), self.width()), pixels).map_err(|e| {
            FlfmError::InvalidArgument(format!(
                "slice does not match {}x{}: {e}",
                self.width(),
                self.height()
            ))
        })?;
        self.data
            .push(Axis(0), slice.view())
            .map_err(|e| FlfmError::InvalidArgument(e.to_string()))?;
        self.labels.push(label);
        Ok(())
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn slice_count(&self) -> usize {
        self.data.dim().0
    }

    pub fn is_empty(&self) -> bool {
        self.slice_count() == 0
    }

    /// Samples with shape `(slice_count, height, width)`.
    pub fn data(&self) -> &Array3<u16> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array3<u16> {
        &mut self.data
    }

    /// Slice `index` (0-based) as a `(row, column)` view.
    pub fn slice(&self, index: usize) -> Option<ArrayView2<'_, u16>> {
        (index < self.slice_count()).then(|| self.data.index_axis(Axis(0), index))
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).and_then(|l| l.as_deref())
    }

    pub fn labels(&self) -> &[Option<String>] {
        &self.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_slice_keeps_order_and_labels() {
        let mut stack = ImageStack::new("stack", 3, 2).unwrap();
        stack.push_slice(Some("z0".into()), vec![0; 6]).unwrap();
        stack.push_slice(None, (0..6).collect()).unwrap();

        assert_eq!(stack.slice_count(), 2);
        assert_eq!(stack.width(), 3);
        assert_eq!(stack.height(), 2);
        assert_eq!(stack.label(0), Some("z0"));
        assert_eq!(stack.label(1), None);
        // row-major: second row, first column
        assert_eq!(stack.slice(1).unwrap()[(1, 0)], 3);
    }

    #[test]
    fn test_push_slice_rejects_wrong_size() {
        let mut stack = ImageStack::new("stack", 3, 2).unwrap();
        assert!(matches!(
            stack.push_slice(None, vec![0; 5]),
            Err(FlfmError::InvalidArgument(_))
        ));
        assert!(stack.is_empty());
    }

    #[test]
    fn test_zero_sized_slices_are_rejected() {
        assert!(ImageStack::new("bad", 0, 4).is_err());
        assert!(ImageStack::from_array("bad", Array3::zeros((2, 4, 0))).is_err());
    }

    #[test]
    fn test_label_count_must_match() {
        let stack = ImageStack::from_array("s", Array3::zeros((2, 2, 2))).unwrap();
        assert!(stack.clone().with_labels(vec![None]).is_err());
        let stack = stack
            .with_labels(vec![Some("a".into()), Some("b".into())])
            .unwrap();
        assert_eq!(stack.label(1), Some("b"));
    }
}
