//! Service identity endpoint

use axum::Json;
use serde::Serialize;

/// Name reported by the root endpoint
pub const SERVICE_NAME: &str = "Breed Prediction Service";

#[derive(Serialize)]
pub struct RootResponse {
    pub service: String,
    pub status: String,
    pub version: String,
    pub endpoints: Vec<String>,
}

/// GET / - Service identity and available endpoints
pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        service: SERVICE_NAME.to_string(),
        status: "running".to_string(),
        version: breedvision::VERSION.to_string(),
        endpoints: ["/health", "/predict", "/species"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    })
}
