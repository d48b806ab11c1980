//! Region-of-interest post-processing of the model output: a rectangular crop
//! followed by a circular aperture.
//!
//! Both operations are applied identically to every slice. Mask geometry is
//! expressed in the coordinates of the stack it is applied to, so the crop has
//! to come first.

use crate::data_container::ImageStack;
use crate::error::{FlfmError, Result};
use ndarray::parallel::prelude::*;
use ndarray::{s, Array2, Axis, Zip};

/// Cuts the rectangle at `(x, y)` of size `width` x `height` out of every slice.
///
/// # Errors
/// - `OutOfBounds` if the rectangle is empty or does not lie entirely inside the slices.
pub fn crop(stack: &ImageStack, x: i32, y: i32, width: i32, height: i32) -> Result<ImageStack> {
    let fits = width > 0
        && height > 0
        && x >= 0
        && y >= 0
        && x as usize + width as usize <= stack.width()
        && y as usize + height as usize <= stack.height();
    if !fits {
        return Err(FlfmError::OutOfBounds(format!(
            "crop ({x}, {y}, {width}, {height}) does not fit into {}x{}",
            stack.width(),
            stack.height()
        )));
    }

    let (x, y) = (x as usize, y as usize);
    let (width, height) = (width as usize, height as usize);
    let data = stack
        .data()
        .slice(s![.., y..y + height, x..x + width])
        .to_owned();
    ImageStack::from_array(stack.title(), data)?.with_labels(stack.labels().to_vec())
}

/// Pixels of a `width` x `height` slice covered by a circle.
///
/// A pixel belongs to the circle if its centre lies inside it. The circle may
/// extend past the slice; the part outside is ignored.
#[derive(Clone, Debug, PartialEq)]
pub struct CircleMask {
    inside: Array2<bool>,
}

impl CircleMask {
    pub fn new(
        width: usize,
        height: usize,
        center_x: i32,
        center_y: i32,
        diameter: i32,
    ) -> Result<Self> {
        if diameter <= 0 {
            return Err(FlfmError::OutOfBounds(format!(
                "mask diameter must be positive, got {diameter}"
            )));
        }
        let radius = f64::from(diameter) / 2.0;
        let (cx, cy) = (f64::from(center_x), f64::from(center_y));
        let inside = Array2::from_shape_fn((height, width), |(row, col)| {
            let dx = col as f64 + 0.5 - cx;
            let dy = row as f64 + 0.5 - cy;
            dx * dx + dy * dy <= radius * radius
        });
        Ok(CircleMask { inside })
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.inside.get((row, col)).copied().unwrap_or(false)
    }

    /// Zeroes every sample outside the circle, in all slices.
    pub fn apply(&self, stack: &mut ImageStack) -> Result<()> {
        if (stack.height(), stack.width()) != self.inside.dim() {
            return Err(FlfmError::InvalidArgument(format!(
                "mask of {:?} does not match {}x{} slices",
                self.inside.dim(),
                stack.width(),
                stack.height()
            )));
        }
        stack
            .data_mut()
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .for_each(|mut slice| {
                Zip::from(&mut slice)
                    .and(&self.inside)
                    .for_each(|v, &keep| {
                        if !keep {
                            *v = 0;
                        }
                    });
            });
        Ok(())
    }
}

/// Returns a copy of `stack` in which everything outside the circle of the given
/// `diameter` centred on `(center_x, center_y)` is zero.
///
/// # Errors
/// - `OutOfBounds` if `diameter` is not positive.
pub fn apply_circle_mask(
    stack: &ImageStack,
    center_x: i32,
    center_y: i32,
    diameter: i32,
) -> Result<ImageStack> {
    let mask = CircleMask::new(stack.width(), stack.height(), center_x, center_y, diameter)?;
    let mut masked = stack.clone();
    mask.apply(&mut masked)?;
    Ok(masked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn filled(slices: usize, size: usize, value: u16) -> ImageStack {
        ImageStack::from_array("filled", Array3::from_elem((slices, size, size), value)).unwrap()
    }

    #[test]
    fn test_crop_keeps_order_and_labels() {
        let data = Array3::from_shape_fn((2, 6, 6), |(z, r, c)| (z * 100 + r * 10 + c) as u16);
        let stack = ImageStack::from_array("s", data)
            .unwrap()
            .with_labels(vec![Some("first".into()), Some("second".into())])
            .unwrap();

        let cropped = crop(&stack, 1, 2, 3, 2).unwrap();
        assert_eq!((cropped.width(), cropped.height()), (3, 2));
        assert_eq!(cropped.slice(0).unwrap()[(0, 0)], 21);
        assert_eq!(cropped.slice(1).unwrap()[(1, 2)], 133);
        assert_eq!(cropped.label(1), Some("second"));
    }

    #[test]
    fn test_crop_out_of_bounds_is_rejected() {
        let stack = filled(1, 10, 1);
        for (x, y, w, h) in [(-1, 0, 5, 5), (6, 0, 5, 5), (0, 0, 0, 5), (0, 8, 5, 3)] {
            assert!(matches!(
                crop(&stack, x, y, w, h),
                Err(FlfmError::OutOfBounds(_))
            ));
        }
        assert!(crop(&stack, 0, 0, 10, 10).is_ok());
    }

    #[test]
    fn test_crop_then_mask() {
        let stack = filled(4, 20, 255);
        let cropped = crop(&stack, 5, 5, 10, 10).unwrap();
        let masked = apply_circle_mask(&cropped, 5, 5, 10).unwrap();

        assert_eq!(masked.slice_count(), 4);
        let mask = CircleMask::new(10, 10, 5, 5, 10).unwrap();
        for z in 0..4 {
            let slice = masked.slice(z).unwrap();
            for ((row, col), &v) in slice.indexed_iter() {
                assert_eq!(v != 0, mask.contains(row, col));
            }
            assert_eq!(slice[(0, 0)], 0);
            assert_eq!(slice[(9, 9)], 0);
            assert_eq!(slice[(5, 5)], 255);
            assert_eq!(slice[(0, 5)], 255);
        }
    }

    #[test]
    fn test_mask_is_idempotent() {
        let data = Array3::from_shape_fn((2, 12, 12), |(z, r, c)| (1 + z + r + c) as u16);
        let stack = ImageStack::from_array("s", data).unwrap();
        let once = apply_circle_mask(&stack, 6, 6, 8).unwrap();
        let twice = apply_circle_mask(&once, 6, 6, 8).unwrap();
        assert_eq!(once, twice);

        let mask = CircleMask::new(12, 12, 6, 6, 8).unwrap();
        for ((z, row, col), &v) in twice.data().indexed_iter() {
            if mask.contains(row, col) {
                assert_eq!(v, stack.data()[(z, row, col)]);
            } else {
                assert_eq!(v, 0);
            }
        }
    }

    #[test]
    fn test_circle_past_the_edge_is_clipped() {
        let stack = filled(1, 4, 9);
        let masked = apply_circle_mask(&stack, 0, 0, 4).unwrap();
        let slice = masked.slice(0).unwrap();
        assert_eq!(slice[(0, 0)], 9);
        assert_eq!(slice[(3, 3)], 0);
    }

    #[test]
    fn test_non_positive_diameter_is_rejected() {
        let stack = filled(1, 4, 9);
        assert!(matches!(
            apply_circle_mask(&stack, 2, 2, 0),
            Err(FlfmError::OutOfBounds(_))
        ));
    }
}
