// src/main.rs
use actix_web::{App, HttpResponse, HttpServer, middleware, web};
use anyhow::Context;
use log::info;
use std::sync::Arc;

mod annotate;
mod config;
mod errors;
mod frames;
mod handlers;
mod models;
mod services;
mod sizing;
mod timeline;

use crate::annotate::LabelFont;
use crate::config::AppConfig;
use crate::handlers::{
    annotate_upload, annotated_image, backend_status, frame_at, get_image_inspection,
    get_video_inspection, next_damage, previous_damage, seek, toggle_play,
    upload_image_inspection, upload_video_inspection,
};
use crate::services::{DetectionBackend, HttpDetectionBackend, ImageProcessor, RedisService};

#[derive(Clone)]
pub struct AppState {
    redis_service: Arc<RedisService>,
    backend: Arc<dyn DetectionBackend>,
    image_processor: Arc<ImageProcessor>,
    label_font: LabelFont,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::from_env().context("Invalid configuration")?;
    info!(
        "Starting HailVision service (backend {}, frame interval {})...",
        config.backend.endpoint, config.backend.frame_interval
    );

    let label_font = match &config.label_font {
        Some(path) => {
            let data = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read label font {}", path.display()))?;
            LabelFont::from_bytes(data)?
        }
        None => {
            info!("HAILVISION_LABEL_FONT not set, using bundled label font");
            LabelFont::bundled()?
        }
    };

    // Initialize services
    let redis_service = Arc::new(
        RedisService::new(&config.redis_url)
            .await
            .context("Failed to connect to Redis")?,
    );
    let backend: Arc<dyn DetectionBackend> =
        Arc::new(HttpDetectionBackend::new(config.backend.clone()));
    let image_processor = Arc::new(ImageProcessor::new());

    let app_state = AppState {
        redis_service,
        backend,
        image_processor,
        label_font,
    };

    info!("Starting HTTP server on {}", config.bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::Logger::default())
            .service(
                web::scope("/api/v1")
                    .route("/annotate", web::post().to(annotate_upload))
                    .route("/inspections/image", web::post().to(upload_image_inspection))
                    .route("/inspections/image/{id}", web::get().to(get_image_inspection))
                    .route(
                        "/inspections/image/{id}/annotated.png",
                        web::get().to(annotated_image),
                    )
                    .route("/inspections/video", web::post().to(upload_video_inspection))
                    .route("/inspections/video/{id}", web::get().to(get_video_inspection))
                    .route("/inspections/video/{id}/frame", web::get().to(frame_at))
                    .route("/inspections/video/{id}/seek", web::post().to(seek))
                    .route("/inspections/video/{id}/next", web::post().to(next_damage))
                    .route(
                        "/inspections/video/{id}/previous",
                        web::post().to(previous_damage),
                    )
                    .route(
                        "/inspections/video/{id}/toggle-play",
                        web::post().to(toggle_play),
                    )
                    .route("/backend/status", web::get().to(backend_status)),
            )
            .route("/health", web::get().to(health_check))
    })
    .bind(&config.bind_addr)
    .with_context(|| format!("Failed to bind {}", config.bind_addr))?
    .run()
    .await?;

    Ok(())
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "hailvision",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test;

    #[actix_web::test]
    async fn health_reports_service_name() {
        let app =
            test::init_service(App::new().route("/health", web::get().to(health_check))).await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "hailvision");
    }
}
