use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::models::tryon::ImageUpload;

pub const MAX_IMAGE_SIZE_BYTES: usize = 8 * 1024 * 1024;

const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Check size, extension and content of an uploaded image.
pub fn validate_image(upload: &ImageUpload) -> Result<(), PipelineError> {
    if upload.bytes.len() > MAX_IMAGE_SIZE_BYTES {
        return Err(PipelineError::Validation(format!(
            "Image is too large. Maximum allowed size is {} MB.",
            MAX_IMAGE_SIZE_BYTES / (1024 * 1024)
        )));
    }

    let extension = Path::new(&upload.file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if !ALLOWED_IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        return Err(PipelineError::Validation(
            "Unsupported image type. Allowed types are: .jpg, .jpeg, .png, .webp.".to_string(),
        ));
    }

    image::guess_format(&upload.bytes).map_err(|_| {
        PipelineError::Validation("Uploaded file is not a recognizable image.".to_string())
    })?;

    Ok(())
}

/// Template garments used when a caller asks for generation without an upload.
#[derive(Debug, Clone)]
pub struct DefaultGarments {
    hoodie: PathBuf,
    tshirt: PathBuf,
}

impl DefaultGarments {
    pub fn new(hoodie: Option<&str>, tshirt: Option<&str>) -> Self {
        Self {
            hoodie: hoodie
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("assets/images/White Hoodie.png")),
            tshirt: tshirt
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("assets/images/T-Shirt.png")),
        }
    }

    /// Load the template for `garment_type` (`hoodie` unless `tshirt`/`t-shirt`).
    pub async fn load(&self, garment_type: Option<&str>) -> Result<ImageUpload, PipelineError> {
        let normalized = garment_type
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "hoodie".to_string());

        let path = match normalized.as_str() {
            "tshirt" | "t-shirt" => &self.tshirt,
            _ => &self.hoodie,
        };

        let bytes = tokio::fs::read(path).await.map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Default garment image unavailable");
            PipelineError::Validation(format!(
                "Default {normalized} image was not found on the server."
            ))
        })?;

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("garment.png")
            .to_string();

        Ok(ImageUpload::new(bytes, file_name))
    }
}
