// src/errors.rs
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HailError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Detection backend error: {0}")]
    Backend(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Base image not loaded: {0}")]
    ImageNotLoaded(String),

    #[error("Surface has not been rendered yet")]
    NotRendered,

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ResponseError for HailError {
    fn error_response(&self) -> HttpResponse {
        match self {
            HailError::Validation(_) => HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Validation error",
                "message": self.to_string()
            })),
            HailError::Backend(_) => HttpResponse::BadGateway().json(serde_json::json!({
                "error": "Detection backend error",
                "message": self.to_string()
            })),
            HailError::ImageProcessing(_) | HailError::ImageNotLoaded(_) => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "Image processing error",
                    "message": self.to_string()
                }))
            }
            HailError::NotRendered | HailError::Serialization(_) => {
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "Data processing error",
                    "message": self.to_string()
                }))
            }
            HailError::Redis(_) => HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error",
                "message": self.to_string()
            })),
            HailError::NotFound(_) => HttpResponse::NotFound().json(serde_json::json!({
                "error": "Not found",
                "message": self.to_string()
            })),
            HailError::Config(_) => HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "error": "Backend not configured",
                "message": self.to_string()
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn validation_maps_to_bad_request() {
        let err = HailError::Validation("predictions must be a sequence".to_string());
        assert_eq!(err.error_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn backend_failure_maps_to_bad_gateway() {
        let err = HailError::Backend("503 Service Unavailable".to_string());
        assert_eq!(err.error_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn missing_record_maps_to_not_found() {
        let err = HailError::NotFound("video inspection".to_string());
        assert_eq!(err.error_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Not found: video inspection");
    }
}
