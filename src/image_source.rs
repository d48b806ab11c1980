//! Where input and PSF stacks come from: images already open in the application,
//! or TIFF files chosen by the user.

use crate::data_container::ImageStack;
use crate::io::open_tiff_stack;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// File extensions offered by the file dialog.
pub const TIFF_EXTENSIONS: [&str; 2] = ["tif", "tiff"];

/// Provides an image stack on request, or nothing if the user cancels.
pub trait ImageSource: Send + Sync {
    fn acquire_image(&self, prompt: &str) -> Option<ImageStack>;
}

/// User interaction needed by [`WindowFirstSource`].
pub trait ImagePicker: Send + Sync {
    /// Lets the user pick one of the open images. `None` means "choose a file instead".
    fn pick_open_image(&self, prompt: &str, titles: &[String]) -> Option<String>;

    /// Lets the user pick a file with one of `extensions`. `None` means cancelled.
    fn pick_file(&self, prompt: &str, extensions: &[&str]) -> Option<PathBuf>;
}

/// Images currently open in the application, by title.
#[derive(Debug, Default)]
pub struct OpenImages {
    images: RwLock<Vec<ImageStack>>,
}

impl OpenImages {
    pub fn new() -> Self {
        OpenImages::default()
    }

    /// Adds `stack`, replacing an open image with the same title.
    pub fn insert(&self, stack: ImageStack) {
        if let Ok(mut images) = self.images.write() {
            images.retain(|image| image.title() != stack.title());
            images.push(stack);
        }
    }

    pub fn remove(&self, title: &str) -> Option<ImageStack> {
        let mut images = self.images.write().ok()?;
        let position = images.iter().position(|image| image.title() == title)?;
        Some(images.remove(position))
    }

    pub fn titles(&self) -> Vec<String> {
        self.images
            .read()
            .map(|images| images.iter().map(|i| i.title().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn get(&self, title: &str) -> Option<ImageStack> {
        self.images
            .read()
            .ok()?
            .iter()
            .find(|image| image.title() == title)
            .cloned()
    }
}

/// Offers the open images first and falls back to a TIFF file dialog.
pub struct WindowFirstSource<P: ImagePicker> {
    open_images: Arc<OpenImages>,
    picker: P,
}

impl<P: ImagePicker> WindowFirstSource<P> {
    pub fn new(open_images: Arc<OpenImages>, picker: P) -> Self {
        WindowFirstSource {
            open_images,
            picker,
        }
    }

    fn open_file(&self, prompt: &str) -> Option<ImageStack> {
        let path = self.picker.pick_file(prompt, &TIFF_EXTENSIONS)?;
        if !is_tiff(&path) {
            log::warn!("{} is not a TIFF file", path.display());
            return None;
        }
        match open_tiff_stack(&path) {
            Ok(stack) => Some(stack),
            Err(err) => {
                log::error!("failed to open {}: {err}", path.display());
                None
            }
        }
    }
}

impl<P: ImagePicker> ImageSource for WindowFirstSource<P> {
    fn acquire_image(&self, prompt: &str) -> Option<ImageStack> {
        let titles = self.open_images.titles();
        if !titles.is_empty() {
            if let Some(title) = self.picker.pick_open_image(prompt, &titles) {
                return self.open_images.get(&title);
            }
        }
        self.open_file(prompt)
    }
}

fn is_tiff(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| TIFF_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
