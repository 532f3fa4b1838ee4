//! Prediction endpoint

use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use plant_disease::Error;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::state::SharedState;

/// Multipart field carrying the image
pub const FILE_FIELD: &str = "file";

#[derive(Serialize, Debug)]
pub struct PredictResponse {
    pub class: String,
    /// Rounded to four decimals
    pub confidence: f64,
    pub advice: String,
}

/// Error body `{"error": message}` with a status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn no_image() -> Self {
        Self::bad_request("No image uploaded")
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Image(_) => Self::bad_request(err.to_string()),
            _ => Self::internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// POST /predict - classify the uploaded `file`
pub async fn predict(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let mut multipart = multipart.map_err(|e| {
        warn!("Rejected /predict request: {}", e);
        ApiError::no_image()
    })?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        if field.name() == Some(FILE_FIELD) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            upload = Some(bytes);
            break;
        }
    }
    let bytes = upload.ok_or_else(ApiError::no_image)?;

    let prediction = tokio::task::spawn_blocking(move || {
        // A panicked prediction leaves the model itself untouched
        let guard = state
            .predictor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let predictor = guard
            .as_ref()
            .ok_or_else(|| ApiError::internal("No model loaded"))?;
        predictor.predict_bytes(&bytes).map_err(ApiError::from)
    })
    .await
    .map_err(|e| {
        error!("Prediction task failed: {}", e);
        ApiError::internal(e.to_string())
    })??;

    info!(
        "Predicted {} ({:.2}%)",
        prediction.class,
        prediction.confidence * 100.0
    );

    Ok(Json(PredictResponse {
        confidence: prediction.rounded_confidence(),
        advice: prediction.advice().to_string(),
        class: prediction.class,
    }))
}
