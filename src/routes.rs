use bytes::Bytes;
use poem::error::InternalServerError;
use poem::Result;
use poem_openapi::param::{Path, Query};
use poem_openapi::payload::{Binary, Json, PlainText};
use poem_openapi::{ApiResponse, Object, OpenApi};
use uuid::Uuid;

use crate::controller::{GenerationReport, ImageController, ImagePayload, UploadInfo};
use crate::error::ImageError;
use crate::metadata::ImageRecord;

#[derive(Debug, Object)]
pub struct DeleteResult {
    /// Whether an image was removed by this call.
    pub deleted: bool,
}

#[derive(ApiResponse)]
pub enum UploadResponse {
    #[oai(status = 200)]
    Ok(Json<UploadInfo>),

    /// The uploaded data was empty, too large or not a supported image.
    #[oai(status = 400)]
    BadRequest(PlainText<String>),

    /// The image being replaced does not exist.
    #[oai(status = 404)]
    NotFound(PlainText<String>),
}

#[derive(ApiResponse)]
pub enum FetchResponse {
    #[oai(status = 200)]
    Ok(
        Binary<Bytes>,
        #[oai(header = "content-type")] String,
        #[oai(header = "content-disposition")] String,
    ),

    /// Neither a width nor a height was provided.
    #[oai(status = 400)]
    BadRequest(PlainText<String>),

    /// The image does not exist or cannot be served at the requested size.
    #[oai(status = 404)]
    NotFound(PlainText<String>),
}

#[derive(ApiResponse)]
pub enum RecordResponse {
    #[oai(status = 200)]
    Ok(Json<ImageRecord>),

    #[oai(status = 400)]
    BadRequest(PlainText<String>),

    #[oai(status = 404)]
    NotFound(PlainText<String>),
}

#[derive(ApiResponse)]
pub enum ResolutionsResponse {
    #[oai(status = 200)]
    Ok(Json<Vec<String>>),

    #[oai(status = 400)]
    BadRequest(PlainText<String>),

    #[oai(status = 404)]
    NotFound(PlainText<String>),
}

#[derive(ApiResponse)]
pub enum GenerateResponse {
    #[oai(status = 200)]
    Ok(Json<GenerationReport>),

    #[oai(status = 400)]
    BadRequest(PlainText<String>),

    #[oai(status = 404)]
    NotFound(PlainText<String>),
}

/// Maps controller errors onto the 4xx variants of a response,
/// anything else becomes a 500.
trait Rejection: Sized {
    fn bad_request(msg: String) -> Self;

    fn not_found(msg: String) -> Self;

    fn reject(err: ImageError) -> Result<Self> {
        match err {
            ImageError::Validation(msg) => Ok(Self::bad_request(msg)),
            err if err.is_not_found() => Ok(Self::not_found(err.to_string())),
            err => {
                error!("Request failed: {:#}", err);
                Err(InternalServerError(err))
            },
        }
    }
}

macro_rules! impl_rejection {
    ($($name:ident),*) => {
        $(
            impl Rejection for $name {
                fn bad_request(msg: String) -> Self {
                    Self::BadRequest(PlainText(msg))
                }

                fn not_found(msg: String) -> Self {
                    Self::NotFound(PlainText(msg))
                }
            }
        )*
    };
}

impl_rejection!(
    UploadResponse,
    FetchResponse,
    RecordResponse,
    ResolutionsResponse,
    GenerateResponse
);

fn respond<T, R: Rejection>(res: crate::error::Result<T>, ok: impl FnOnce(T) -> R) -> Result<R> {
    match res {
        Ok(value) => Ok(ok(value)),
        Err(e) => R::reject(e),
    }
}

fn serve(payload: ImagePayload) -> FetchResponse {
    let disposition = format!("inline; filename=\"{}\"", sanitize_file_name(&payload.file_name));
    FetchResponse::Ok(Binary(payload.data), payload.content_type, disposition)
}

/// Makes a file name safe to embed in a quoted header value.
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

pub struct ImageApi {
    controller: ImageController,
}

impl ImageApi {
    pub fn new(controller: ImageController) -> Self {
        Self { controller }
    }
}

#[OpenApi]
impl ImageApi {
    /// Upload Image
    ///
    /// Stores a new image, the raw image bytes are sent as the body.
    #[oai(path = "/images", method = "post")]
    pub async fn upload_image(
        &self,
        /// The file name to store alongside the image.
        file_name: Query<Option<String>>,
        file: Binary<Bytes>,
    ) -> Result<UploadResponse> {
        let res = self.controller.upload(file_name.0, file.0).await;
        respond(res, |info| UploadResponse::Ok(Json(info)))
    }

    /// List Images
    ///
    /// Every stored image record, most recently uploaded first.
    #[oai(path = "/images", method = "get")]
    pub async fn list_images(&self) -> Result<Json<Vec<ImageRecord>>> {
        self.controller
            .list()
            .await
            .map(Json)
            .map_err(InternalServerError)
    }

    /// Get Image Metadata
    #[oai(path = "/images/:image_id", method = "get")]
    pub async fn get_image(&self, image_id: Path<Uuid>) -> Result<RecordResponse> {
        let res = match self.controller.get_record(image_id.0).await {
            Ok(Some(record)) => Ok(record.as_ref().clone()),
            Ok(None) => Err(ImageError::NotFound(image_id.0)),
            Err(e) => Err(e),
        };

        respond(res, |record| RecordResponse::Ok(Json(record)))
    }

    /// Download Original
    #[oai(path = "/images/:image_id/original", method = "get")]
    pub async fn download_original(&self, image_id: Path<Uuid>) -> Result<FetchResponse> {
        let res = self.controller.download_original(image_id.0).await;
        respond(res, serve)
    }

    /// Download Resolution
    ///
    /// Serves one of the named resolutions, `original` returns the
    /// unmodified upload.
    #[oai(path = "/images/:image_id/resolutions/:name", method = "get")]
    pub async fn download_resolution(
        &self,
        image_id: Path<Uuid>,
        name: Path<String>,
    ) -> Result<FetchResponse> {
        let res = self.controller.download_resolution(image_id.0, &name.0).await;
        respond(res, serve)
    }

    /// Resize Image
    ///
    /// Serves the image at the given width and/or height. A single
    /// dimension keeps the aspect ratio, both are used as given.
    /// Images are never upscaled.
    #[oai(path = "/images/:image_id/resize", method = "get")]
    pub async fn resize_image(
        &self,
        image_id: Path<Uuid>,
        width: Query<Option<i64>>,
        height: Query<Option<i64>>,
    ) -> Result<FetchResponse> {
        if width.0.is_none() && height.0.is_none() {
            return Ok(FetchResponse::BadRequest(PlainText(
                "at least one of width or height must be provided".to_string(),
            )));
        }

        let res = self.controller.get_resized(image_id.0, width.0, height.0).await;
        respond(res, serve)
    }

    /// Available Resolutions
    #[oai(path = "/images/:image_id/resolutions", method = "get")]
    pub async fn available_resolutions(&self, image_id: Path<Uuid>) -> Result<ResolutionsResponse> {
        let res = self.controller.available_resolutions(image_id.0).await;
        respond(res, |names| ResolutionsResponse::Ok(Json(names)))
    }

    /// Generate Resolutions
    ///
    /// Generates every named resolution that fits the image.
    #[oai(path = "/images/:image_id/resolutions", method = "post")]
    pub async fn generate_resolutions(&self, image_id: Path<Uuid>) -> Result<GenerateResponse> {
        let res = self.controller.generate_predefined(image_id.0).await;
        respond(res, |report| GenerateResponse::Ok(Json(report)))
    }

    /// Replace Image
    ///
    /// Replaces the original, every previously generated size is removed.
    #[oai(path = "/images/:image_id", method = "put")]
    pub async fn update_image(
        &self,
        image_id: Path<Uuid>,
        /// Replaces the stored file name if given.
        file_name: Query<Option<String>>,
        file: Binary<Bytes>,
    ) -> Result<UploadResponse> {
        let res = self.controller.update(image_id.0, file_name.0, file.0).await;
        respond(res, |info| UploadResponse::Ok(Json(info)))
    }

    /// Delete Image
    #[oai(path = "/images/:image_id", method = "delete")]
    pub async fn delete_image(&self, image_id: Path<Uuid>) -> Result<Json<DeleteResult>> {
        self.controller
            .delete(image_id.0)
            .await
            .map(|deleted| Json(DeleteResult { deleted }))
            .map_err(InternalServerError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_header_safe() {
        assert_eq!(sanitize_file_name("cat_160w.jpeg"), "cat_160w.jpeg");
        assert_eq!(sanitize_file_name("my \"holiday\".png"), "my__holiday_.png");
        assert_eq!(sanitize_file_name("ümlaut\r\n.png"), "_mlaut__.png");
    }
}
