// src/services/image_processor.rs
use crate::errors::HailError;
use image::{DynamicImage, GenericImageView};

/// Per-file upload limit.
pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;
pub const MAX_IMAGE_SIDE: u32 = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Image,
    Video,
}

impl UploadKind {
    fn mime_prefix(self) -> &'static str {
        match self {
            UploadKind::Image => "image/",
            UploadKind::Video => "video/",
        }
    }
}

pub struct ImageProcessor;

impl ImageProcessor {
    pub fn new() -> Self {
        Self
    }

    pub fn validate_upload(
        &self,
        kind: UploadKind,
        content_type: &str,
        size: usize,
    ) -> Result<(), HailError> {
        if !content_type.starts_with(kind.mime_prefix()) {
            return Err(HailError::Validation(format!(
                "Invalid file type {}, expected {}*",
                content_type,
                kind.mime_prefix()
            )));
        }

        if size == 0 {
            return Err(HailError::Validation("Uploaded file is empty".to_string()));
        }

        if size > MAX_UPLOAD_BYTES {
            return Err(HailError::Validation(format!(
                "Upload of {} bytes exceeds the {} MB limit",
                size,
                MAX_UPLOAD_BYTES / 1024 / 1024
            )));
        }

        Ok(())
    }

    pub fn decode_image(&self, data: &[u8]) -> Result<DynamicImage, HailError> {
        let img = image::load_from_memory(data)
            .map_err(|e| HailError::ImageProcessing(format!("Invalid image format: {}", e)))?;

        let (width, height) = img.dimensions();

        if width == 0 || height == 0 {
            return Err(HailError::ImageNotLoaded(
                "decoded image has no pixels".to_string(),
            ));
        }

        if width > MAX_IMAGE_SIDE || height > MAX_IMAGE_SIDE {
            return Err(HailError::ImageProcessing(format!(
                "Image dimensions exceed {}x{}",
                MAX_IMAGE_SIDE, MAX_IMAGE_SIDE
            )));
        }

        Ok(img)
    }

    pub fn validate_image(&self, data: &[u8]) -> Result<(u32, u32), HailError> {
        self.decode_image(data).map(|img| img.dimensions())
    }
}
