// src/sizing.rs
//! Hail size classification.
//!
//! Two independent schemes exist. Image responses only carry box geometry,
//! so size is estimated from the average box side in pixels. Video responses
//! encode the size directly as a class index. The schemes are never merged.

use crate::models::Detection;
use serde::Serialize;

/// Accent used when a label has no entry in the severity table.
pub const FALLBACK_COLOR: &str = "#a855f7";

/// Size estimated from pixel geometry. Variants are in ascending severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PixelHailSize {
    Pea,
    Marble,
    GolfBall,
    TennisBall,
    Baseball,
}

impl PixelHailSize {
    /// Half-open bins on the average side length: [0,25) [25,50) [50,75) [75,100) [100,inf).
    pub fn classify(width: f64, height: f64) -> Self {
        let avg = (width + height) / 2.0;
        if avg < 25.0 {
            PixelHailSize::Pea
        } else if avg < 50.0 {
            PixelHailSize::Marble
        } else if avg < 75.0 {
            PixelHailSize::GolfBall
        } else if avg < 100.0 {
            PixelHailSize::TennisBall
        } else {
            PixelHailSize::Baseball
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PixelHailSize::Pea => "Pea sized",
            PixelHailSize::Marble => "Marble sized",
            PixelHailSize::GolfBall => "Golf ball sized",
            PixelHailSize::TennisBall => "Tennis ball sized",
            PixelHailSize::Baseball => "Baseball sized",
        }
    }

    pub fn severity(self) -> u8 {
        self as u8
    }

    pub fn color(self) -> &'static str {
        severity_color(self.label())
    }
}

/// Display color for a size label.
pub fn severity_color(label: &str) -> &'static str {
    match label {
        "Pea sized" => "#22c55e",
        "Marble sized" => "#eab308",
        "Golf ball sized" => "#f97316",
        "Tennis ball sized" => "#ef4444",
        "Baseball sized" => "#a855f7",
        _ => FALLBACK_COLOR,
    }
}

const VIDEO_CLASS_NAMES: [&str; 8] = [
    "Pea",
    "Marble",
    "Quarter",
    "Half Dollar",
    "Ping Pong",
    "Golf Ball",
    "Tennis Ball",
    "Baseball",
];

/// Size encoded by the video backend as a class index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct VideoHailClass(Option<usize>);

impl VideoHailClass {
    pub fn from_index(class_index: i64) -> Self {
        let slot = usize::try_from(class_index)
            .ok()
            .filter(|i| *i < VIDEO_CLASS_NAMES.len());
        VideoHailClass(slot)
    }

    pub fn label(self) -> &'static str {
        self.0.map(|i| VIDEO_CLASS_NAMES[i]).unwrap_or("Unknown")
    }
}

/// Classification chosen by which response schema produced the detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HailClassification {
    Pixel(PixelHailSize),
    Video(VideoHailClass),
}

/// Which backend response a detection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseScheme {
    Image,
    Video,
}

impl HailClassification {
    pub fn of(detection: &Detection, scheme: ResponseScheme) -> Self {
        match scheme {
            ResponseScheme::Image => HailClassification::Pixel(PixelHailSize::classify(
                detection.width(),
                detection.height(),
            )),
            ResponseScheme::Video => {
                HailClassification::Video(VideoHailClass::from_index(detection.class_index))
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            HailClassification::Pixel(size) => size.label(),
            HailClassification::Video(class) => class.label(),
        }
    }
}
