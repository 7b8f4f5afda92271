// src/services/detection_client.rs
use crate::config::BackendConfig;
use crate::errors::HailError;
use crate::models::{
    ImageDetectionSet, UploadTarget, VideoAnalysisResult, parse_image_response,
    parse_video_response,
};
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info};
use reqwest::{Client, RequestBuilder, multipart};
use serde_json::json;
use std::time::Instant;

/// The external vision service. Implementations return validated snapshots.
#[async_trait]
pub trait DetectionBackend: Send + Sync {
    async fn detect_image(
        &self,
        image_data: Bytes,
        filename: &str,
        content_type: &str,
    ) -> Result<ImageDetectionSet, HailError>;

    async fn request_upload_url(&self, filename: &str) -> Result<UploadTarget, HailError>;

    async fn upload_video(
        &self,
        upload_url: &str,
        video_data: Bytes,
        content_type: &str,
    ) -> Result<(), HailError>;

    async fn process_video(&self, s3_key: &str) -> Result<VideoAnalysisResult, HailError>;

    async fn check_connection(&self) -> Result<(), HailError>;
}

pub struct HttpDetectionBackend {
    config: BackendConfig,
    client: Client,
}

impl HttpDetectionBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn read_body(response: reqwest::Response, what: &str) -> Result<Bytes, HailError> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(HailError::Backend(format!(
                "{} failed: {} {}",
                what, status, error_text
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| HailError::Backend(format!("{} response unreadable: {}", what, e)))
    }
}

#[async_trait]
impl DetectionBackend for HttpDetectionBackend {
    async fn detect_image(
        &self,
        image_data: Bytes,
        filename: &str,
        content_type: &str,
    ) -> Result<ImageDetectionSet, HailError> {
        let start = Instant::now();

        let part = multipart::Part::bytes(image_data.to_vec())
            .file_name(filename.to_string())
            .mime_str(content_type)
            .map_err(|e| HailError::Validation(format!("Invalid content type: {}", e)))?;
        let form = multipart::Form::new().part("image", part);

        let response = self
            .authorized(self.client.post(&self.config.endpoint))
            .multipart(form)
            .send()
            .await
            .map_err(|e| HailError::Backend(format!("Detection request failed: {}", e)))?;

        let body = Self::read_body(response, "Image detection").await?;
        let detections = parse_image_response(&body)?;

        info!(
            "Detected {} hail areas in {} ({} ms)",
            detections.predictions.len(),
            filename,
            start.elapsed().as_millis()
        );
        Ok(detections)
    }

    async fn request_upload_url(&self, filename: &str) -> Result<UploadTarget, HailError> {
        let response = self
            .authorized(self.client.post(self.url("/video/upload-url")))
            .json(&json!({ "filename": filename }))
            .send()
            .await
            .map_err(|e| HailError::Backend(format!("Upload URL request failed: {}", e)))?;

        let body = Self::read_body(response, "Upload URL request").await?;
        let target: UploadTarget = serde_json::from_slice(&body)
            .map_err(|e| HailError::Validation(format!("Malformed upload URL response: {}", e)))?;

        debug!("Presigned upload for {} -> {}", filename, target.s3_key);
        Ok(target)
    }

    async fn upload_video(
        &self,
        upload_url: &str,
        video_data: Bytes,
        content_type: &str,
    ) -> Result<(), HailError> {
        // presigned URLs carry their own credentials
        let response = self
            .client
            .put(upload_url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(video_data)
            .send()
            .await
            .map_err(|e| HailError::Backend(format!("Video upload failed: {}", e)))?;

        Self::read_body(response, "Video upload").await.map(|_| ())
    }

    async fn process_video(&self, s3_key: &str) -> Result<VideoAnalysisResult, HailError> {
        let start = Instant::now();

        let response = self
            .authorized(self.client.post(self.url("/video/process")))
            .json(&json!({
                "s3_key": s3_key,
                "frame_interval": self.config.frame_interval,
            }))
            .send()
            .await
            .map_err(|e| HailError::Backend(format!("Video processing failed: {}", e)))?;

        let body = Self::read_body(response, "Video processing").await?;
        let result = parse_video_response(&body)?;

        info!(
            "Video {} analysed: {} sampled frames, {} with damage ({} ms)",
            s3_key,
            result.frames.len(),
            result.detection_summary.frames_with_damage,
            start.elapsed().as_millis()
        );
        Ok(result)
    }

    async fn check_connection(&self) -> Result<(), HailError> {
        let response = self
            .authorized(self.client.get(self.url("/health")))
            .send()
            .await
            .map_err(|e| HailError::Backend(format!("Unable to reach backend: {}", e)))?;

        Self::read_body(response, "Health check").await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(api_key: Option<&str>) -> HttpDetectionBackend {
        HttpDetectionBackend::new(BackendConfig {
            endpoint: "http://localhost:9000/v1/detect".to_string(),
            api_key: api_key.map(str::to_string),
            frame_interval: 30,
        })
    }

    #[test]
    fn video_routes_hang_off_the_endpoint() {
        assert_eq!(
            backend(None).url("/video/upload-url"),
            "http://localhost:9000/v1/detect/video/upload-url"
        );
    }

    #[test]
    fn bearer_header_only_with_key() {
        let with_key = backend(Some("sk-abc"));
        let request = with_key
            .authorized(with_key.client.get("http://localhost/x"))
            .build()
            .unwrap();
        assert_eq!(
            request.headers().get(reqwest::header::AUTHORIZATION).unwrap(),
            "Bearer sk-abc"
        );

        let without = backend(None);
        let request = without
            .authorized(without.client.get("http://localhost/x"))
            .build()
            .unwrap();
        assert!(request.headers().get(reqwest::header::AUTHORIZATION).is_none());
    }
}
