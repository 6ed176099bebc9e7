use crate::{annotate, detector::DetectorError, server::SharedState};
use axum::{
    body::Bytes,
    extract::{Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use image::ImageFormat;
use std::io::Cursor;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum DetectImageError {
    #[error("Missing `image` field in form data")]
    MissingImage,
    #[error("Failed to read multipart form: {0}")]
    Multipart(String),
    #[error("Failed to decode image: {0}")]
    ImageDecode(String),
    #[error("Detection failed: {0}")]
    Detection(#[from] DetectorError),
    #[error("Inference task failed: {0}")]
    InferenceTask(String),
    #[error("Failed to encode result image: {0}")]
    ImageEncode(String),
    #[error("HTTP builder failed: {0}")]
    HttpBuilder(String),
}

impl IntoResponse for DetectImageError {
    fn into_response(self) -> Response {
        let status = match self {
            DetectImageError::MissingImage
            | DetectImageError::Multipart(_)
            | DetectImageError::ImageDecode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

#[instrument(skip(state, multipart))]
pub async fn detect_image(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Response, DetectImageError> {
    let (image_data, threshold) = read_form(&mut multipart).await?;
    let threshold = resolve_threshold(threshold, state.default_threshold);

    let image = image::ImageReader::new(Cursor::new(&image_data))
        .with_guessed_format()
        .map_err(|e| DetectImageError::ImageDecode(e.to_string()))?
        .decode()
        .map_err(|e| DetectImageError::ImageDecode(e.to_string()))?;

    // ONNX inference is CPU-bound; keep it off the runtime threads so
    // other routes stay responsive mid-inference.
    let detector = state.detector.clone();
    let (image, detections) = tokio::task::spawn_blocking(move || {
        let detections = detector.detect(&image, threshold)?;
        Ok::<_, DetectorError>((image, detections))
    })
    .await
    .map_err(|e| DetectImageError::InferenceTask(e.to_string()))??;
    tracing::debug!(
        "{} detections above threshold {:.2}",
        detections.len(),
        threshold
    );

    let mut annotated = image.to_rgb8();
    annotate::render(&mut annotated, &detections, &state.labels, &state.font);

    let mut buffer = Vec::new();
    annotated
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Jpeg)
        .map_err(|e| DetectImageError::ImageEncode(e.to_string()))?;

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "image/jpeg")
        .body(axum::body::Body::from(buffer))
        .map_err(|e| DetectImageError::HttpBuilder(e.to_string()))?;

    Ok(response)
}

async fn read_form(
    multipart: &mut Multipart,
) -> Result<(Bytes, Option<f32>), DetectImageError> {
    let mut image_data: Option<Bytes> = None;
    let mut threshold: Option<f32> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DetectImageError::Multipart(e.to_string()))?
    {
        match field.name() {
            Some("image") => {
                image_data = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| DetectImageError::Multipart(e.to_string()))?,
                );
            }
            Some("threshold") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| DetectImageError::Multipart(e.to_string()))?;
                threshold = text.trim().parse::<f32>().ok();
            }
            _ => {}
        }
    }

    let image_data = image_data.ok_or(DetectImageError::MissingImage)?;
    Ok((image_data, threshold))
}

/// A submitted threshold is clamped into `[0, 1]`; a missing or
/// unparsable one falls back to the configured default.
fn resolve_threshold(submitted: Option<f32>, default: f32) -> f32 {
    submitted.unwrap_or(default).clamp(0., 1.)
}
