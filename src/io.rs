use crate::data_container::ImageStack;
use crate::error::{FlfmError, Result};
use image::{ImageBuffer, ImageFormat, Luma};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::ColorType;

/// Reads a (multi-page) grayscale TIFF into an image stack, one page per slice.
///
/// 8-bit pages are widened to 16 bit. The stack is titled after the file name.
///
/// # Arguments
/// * `file_path` - path of the TIFF file.
///
/// # Errors
/// - `InvalidArgument` if a page is not 8- or 16-bit grayscale or the pages differ in size.
/// - `Tiff` / `Io` if the file cannot be decoded.
pub fn open_tiff_stack(file_path: &Path) -> Result<ImageStack> {
    let title = file_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file_path.display().to_string());
    let mut decoder = Decoder::new(BufReader::new(File::open(file_path)?))?;

    let (width, height) = decoder.dimensions()?;
    let mut stack = ImageStack::new(title, width as usize, height as usize)?;
    loop {
        let page_size = decoder.dimensions()?;
        if page_size != (width, height) {
            return Err(FlfmError::InvalidArgument(format!(
                "page {} is {}x{}, expected {width}x{height}",
                stack.slice_count(),
                page_size.0,
                page_size.1
            )));
        }
        let pixels = match (decoder.colortype()?, decoder.read_image()?) {
            (ColorType::Gray(16), DecodingResult::U16(pixels)) => pixels,
            (ColorType::Gray(8), DecodingResult::U8(pixels)) => {
                pixels.into_iter().map(u16::from).collect()
            }
            (color, _) => {
                return Err(FlfmError::InvalidArgument(format!(
                    "unsupported TIFF pixel type {color:?}, expected 8 or 16 bit grayscale"
                )))
            }
        };
        stack.push_slice(None, pixels)?;

        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }

    log::debug!(
        "opened {} with {} slices of {width}x{height}",
        file_path.display(),
        stack.slice_count()
    );
    Ok(stack)
}

/// Writes every slice of `stack` as one 16-bit grayscale page.
pub fn save_tiff_stack(stack: &ImageStack, file_path: &Path) -> Result<()> {
    let mut encoder = TiffEncoder::new(File::create(file_path)?)?;
    for slice in stack.data().outer_iter() {
        let pixels: Vec<u16> = slice.iter().copied().collect();
        encoder.write_image::<colortype::Gray16>(
            stack.width() as u32,
            stack.height() as u32,
            &pixels,
        )?;
    }
    Ok(())
}

/// Writes slice `index` of `stack` as a 16-bit grayscale PNG.
pub fn save_slice_png(stack: &ImageStack, index: usize, file_path: &Path) -> Result<()> {
    let slice = stack.slice(index).ok_or_else(|| {
        FlfmError::InvalidArgument(format!(
            "slice {index} requested from a stack of {}",
            stack.slice_count()
        ))
    })?;
    let pixels: Vec<u16> = slice.iter().copied().collect();
    let buffer: ImageBuffer<Luma<u16>, Vec<u16>> =
        ImageBuffer::from_raw(stack.width() as u32, stack.height() as u32, pixels)
            .ok_or_else(|| FlfmError::InvalidArgument("slice buffer too small".to_string()))?;
    buffer.save_with_format(file_path, ImageFormat::Png)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use tempfile::TempDir;

    fn gradient(slices: usize) -> ImageStack {
        let data = Array3::from_shape_fn((slices, 3, 5), |(z, r, c)| {
            (z * 20000 + r * 100 + c) as u16
        });
        ImageStack::from_array("gradient", data).unwrap()
    }

    #[test]
    fn test_multi_page_tiff_keeps_slices_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stack.tif");
        let stack = gradient(3);

        save_tiff_stack(&stack, &path).unwrap();
        let opened = open_tiff_stack(&path).unwrap();

        assert_eq!(opened.title(), "stack.tif");
        assert_eq!(opened.slice_count(), 3);
        assert_eq!((opened.width(), opened.height()), (5, 3));
        assert_eq!(opened.data(), stack.data());
    }

    #[test]
    fn test_eight_bit_pages_are_widened() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("small.tif");
        {
            let mut encoder = TiffEncoder::new(File::create(&path).unwrap()).unwrap();
            encoder
                .write_image::<colortype::Gray8>(2, 2, &[0, 1, 128, 255])
                .unwrap();
        }

        let opened = open_tiff_stack(&path).unwrap();
        let values: Vec<u16> = opened.data().iter().copied().collect();
        assert_eq!(values, vec![0, 1, 128, 255]);
    }

    #[test]
    fn test_color_tiff_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rgb.tif");
        {
            let mut encoder = TiffEncoder::new(File::create(&path).unwrap()).unwrap();
            encoder
                .write_image::<colortype::RGB8>(1, 1, &[1, 2, 3])
                .unwrap();
        }
        assert!(matches!(
            open_tiff_stack(&path),
            Err(FlfmError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_png_slice_export() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("slice.png");
        let stack = gradient(2);

        save_slice_png(&stack, 1, &path).unwrap();
        let decoded = image::open(&path).unwrap().into_luma16();
        assert_eq!(decoded.dimensions(), (5, 3));
        assert_eq!(decoded.get_pixel(4, 2)[0], 20204);
        assert!(save_slice_png(&stack, 2, &path).is_err());
    }
}
