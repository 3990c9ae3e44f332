//! Multipart bodies carrying text fields and at most one image.

use std::collections::HashMap;

use axum::extract::Multipart;
use log::debug;

use crate::{
    config::UploadConfig,
    error::{ApiError, ApiResult, FieldError},
    images::ImageUpload,
};

#[derive(Debug, Default)]
pub struct MultipartForm {
    pub fields: HashMap<String, String>,
    pub image: Option<ImageUpload>,
}

impl MultipartForm {
    pub fn take(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name)
    }
}

/// Check an uploaded file against the MIME allow-list and size cap. An empty
/// file part means no file was chosen.
pub fn check_image(
    field: &str,
    content_type: Option<String>,
    file_name: Option<String>,
    bytes: Vec<u8>,
    limits: &UploadConfig,
) -> ApiResult<Option<ImageUpload>> {
    if bytes.is_empty() {
        return Ok(None);
    }

    let content_type = content_type.unwrap_or_default().to_lowercase();
    if !limits.allowed_types.iter().any(|t| *t == content_type) {
        return Err(ApiError::validation(vec![FieldError::new(
            field,
            format!("Image must be one of: {}", limits.allowed_types.join(", ")),
        )]));
    }
    if bytes.len() > limits.max_bytes {
        return Err(ApiError::validation(vec![FieldError::new(
            field,
            format!(
                "Image must be at most {} KB",
                limits.max_bytes / 1024
            ),
        )]));
    }

    Ok(Some(ImageUpload {
        bytes,
        content_type,
        file_name: file_name.unwrap_or_else(|| "upload".into()),
    }))
}

/// Collect the text parts and the `file_field` image of a multipart body
pub async fn read_multipart(
    mut multipart: Multipart,
    file_field: &str,
    limits: &UploadConfig,
) -> ApiResult<MultipartForm> {
    let malformed = |err: axum::extract::multipart::MultipartError| {
        ApiError::bad_request(format!("Invalid multipart body: {err}"))
    };

    let mut form = MultipartForm::default();
    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == file_field {
            if form.image.is_some() {
                return Err(ApiError::validation(vec![FieldError::new(
                    file_field,
                    "Only one image can be uploaded",
                )]));
            }
            let content_type = field.content_type().map(str::to_string);
            let file_name = field.file_name().map(str::to_string);
            let bytes = field.bytes().await.map_err(malformed)?;
            form.image = check_image(file_field, content_type, file_name, bytes.to_vec(), limits)?;
            if let Some(image) = &form.image {
                debug!("received {} ({} bytes)", image.file_name, image.bytes.len());
            }
        } else {
            let value = field.text().await.map_err(malformed)?;
            form.fields.insert(name, value);
        }
    }
    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_checks() {
        let limits = UploadConfig {
            max_bytes: 4,
            ..Default::default()
        };

        let ok = check_image("image", Some("image/PNG".into()), Some("a.png".into()), vec![1, 2, 3], &limits)
            .unwrap()
            .unwrap();
        assert_eq!(ok.content_type, "image/png");
        assert_eq!(ok.file_name, "a.png");

        assert!(check_image("image", Some("image/png".into()), None, vec![], &limits)
            .unwrap()
            .is_none());

        let err = check_image("image", Some("application/pdf".into()), None, vec![1], &limits).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest { errors, .. } if errors[0].field == "image"));

        let err = check_image("avatar", Some("image/gif".into()), None, vec![0; 5], &limits).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest { errors, .. } if errors[0].field == "avatar"));
    }
}
