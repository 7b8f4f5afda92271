// src/services/mod.rs
pub mod detection_client;
pub mod image_processor;
pub mod redis_service;

pub use detection_client::{DetectionBackend, HttpDetectionBackend};
pub use image_processor::{ImageProcessor, UploadKind};
pub use redis_service::RedisService;
