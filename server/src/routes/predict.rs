//! Prediction endpoints - breed ranking and species detection
//!
//! Both endpoints take a multipart form with an `image` field. The model state
//! is checked before the upload is read, so a request made while the model is
//! unavailable gets a 503 even without an image.

use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::StatusCode,
    Json,
};
use breedvision::inference::predict_species;
use breedvision::lifecycle::{Availability, LoadedModel};
use breedvision::utils::error::Error;
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::state::SharedState;

/// Multipart field carrying the uploaded image
pub const IMAGE_FIELD: &str = "image";

type ApiResponse = (StatusCode, Json<Value>);

fn unavailable(error: &str, status: &str, message: &str) -> ApiResponse {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "error": error,
            "status": status,
            "message": message,
        })),
    )
}

fn internal_error(message: String) -> ApiResponse {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": message })))
}

/// The loaded model, or the 503 explaining why there is none
fn ready_model(state: &SharedState) -> Result<Arc<LoadedModel>, ApiResponse> {
    match state.controller.ensure_available() {
        Ok(Availability::Ready(model)) => Ok(model),
        Ok(Availability::Loading) => Err(unavailable(
            "Model is still loading",
            "loading",
            "Please wait a few moments and try again",
        )),
        Ok(Availability::Failed(message)) => {
            Err(unavailable("Model failed to load", "error", &message))
        }
        Ok(Availability::NotLoaded) => Err(unavailable(
            "Model not loaded",
            "not_loaded",
            "Model is not available",
        )),
        Err(e) => {
            error!("Could not read model state: {}", e);
            Err(unavailable("Model state unavailable", "error", &e.bounded_message()))
        }
    }
}

/// Bytes of the `image` field
async fn read_image(multipart: Result<Multipart, MultipartRejection>) -> Result<Vec<u8>, ApiResponse> {
    let no_image = || {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "No image provided" })),
        )
    };

    let mut multipart = multipart.map_err(|e| {
        warn!("Rejected upload: {}", e);
        no_image()
    })?;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(no_image()),
            Err(e) => {
                warn!("Malformed multipart body: {}", e);
                return Err((e.status(), Json(json!({ "error": e.body_text() }))));
            }
        };
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        return match field.bytes().await {
            Ok(bytes) => Ok(bytes.to_vec()),
            Err(e) => {
                warn!("Failed to read image upload: {}", e);
                Err((e.status(), Json(json!({ "error": e.body_text() }))))
            }
        };
    }
}

/// Run blocking inference off the async workers
async fn run_inference<T, F>(model: Arc<LoadedModel>, bytes: Vec<u8>, f: F) -> Result<T, ApiResponse>
where
    T: Send + 'static,
    F: FnOnce(&LoadedModel, &[u8]) -> breedvision::Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || f(&model, &bytes)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            match &e {
                Error::Image(_) => warn!("Prediction rejected: {}", e),
                _ => error!("Prediction failed: {}", e),
            }
            Err(internal_error(e.to_string()))
        }
        Err(e) => {
            error!("Inference task failed: {}", e);
            Err(internal_error(format!("inference task failed: {}", e)))
        }
    }
}

/// POST /predict - Top-5 breed predictions
pub async fn predict(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResponse {
    let model = match ready_model(&state) {
        Ok(model) => model,
        Err(response) => return response,
    };
    let bytes = match read_image(multipart).await {
        Ok(bytes) => bytes,
        Err(response) => return response,
    };

    match run_inference(model, bytes, |model, bytes| model.predictor().predict(bytes)).await {
        Ok(predictions) => (
            StatusCode::OK,
            Json(json!({
                "predictions": predictions,
                "device": state.device,
            })),
        ),
        Err(response) => response,
    }
}

/// POST /species - Cattle or buffalo
pub async fn species(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResponse {
    let model = match ready_model(&state) {
        Ok(model) => model,
        Err(response) => return response,
    };
    let bytes = match read_image(multipart).await {
        Ok(bytes) => bytes,
        Err(response) => return response,
    };

    match run_inference(model, bytes, |model, bytes| {
        predict_species(&model.predictor(), bytes)
    })
    .await
    {
        Ok(result) => (
            StatusCode::OK,
            Json(json!({
                "species": result.species,
                "confidence": result.confidence,
            })),
        ),
        Err(response) => response,
    }
}
