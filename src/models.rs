// src/models.rs
use crate::errors::HailError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One bounding box emitted by the vision backend, in image-pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// `[x1, y1, x2, y2]`
    pub bbox: [f64; 4],
    #[serde(rename = "class")]
    pub class_index: i64,
    pub confidence: f64,
}

impl Detection {
    pub fn width(&self) -> f64 {
        self.bbox[2] - self.bbox[0]
    }

    pub fn height(&self) -> f64 {
        self.bbox[3] - self.bbox[1]
    }

    /// Confidence as a whole percent. Values outside [0,1] pass through as-is.
    pub fn confidence_percent(&self) -> i64 {
        (self.confidence * 100.0).round() as i64
    }

    fn validate(&self, context: &str) -> Result<(), HailError> {
        let [x1, y1, x2, y2] = self.bbox;
        if self.bbox.iter().any(|v| !v.is_finite()) {
            return Err(HailError::Validation(format!(
                "{context}: bbox contains a non-finite coordinate"
            )));
        }
        if x2 < x1 || y2 < y1 {
            return Err(HailError::Validation(format!(
                "{context}: bbox [{x1}, {y1}, {x2}, {y2}] is inverted"
            )));
        }
        Ok(())
    }
}

/// Image-path detection response. `num_detections` is advisory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDetectionSet {
    pub num_detections: i64,
    pub predictions: Vec<Detection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub total_frames: u64,
    pub fps: f64,
    #[serde(rename = "duration")]
    pub duration_seconds: f64,
    pub processed_frames: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSummary {
    pub frames_with_damage: u64,
    pub total_detections: u64,
    pub damage_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub frame_number: u64,
    #[serde(rename = "timestamp")]
    pub timestamp_seconds: f64,
    pub detections: Vec<Detection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_count: Option<usize>,
}

impl FrameRecord {
    /// Reported detection count, falling back to the local sequence length.
    pub fn damage_count(&self) -> usize {
        self.detection_count.unwrap_or(self.detections.len())
    }

    pub fn has_damage(&self) -> bool {
        self.damage_count() > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoAnalysisResult {
    pub video_info: VideoInfo,
    pub detection_summary: DetectionSummary,
    #[serde(rename = "frame_results")]
    pub frames: Vec<FrameRecord>,
}

/// Decode and validate an image-path detection response.
pub fn parse_image_response(body: &[u8]) -> Result<ImageDetectionSet, HailError> {
    let set: ImageDetectionSet = serde_json::from_slice(body)
        .map_err(|e| HailError::Validation(format!("Malformed detection response: {}", e)))?;

    for (i, detection) in set.predictions.iter().enumerate() {
        detection.validate(&format!("predictions[{i}]"))?;
    }

    Ok(set)
}

/// Decode and validate a video analysis response.
pub fn parse_video_response(body: &[u8]) -> Result<VideoAnalysisResult, HailError> {
    let result: VideoAnalysisResult = serde_json::from_slice(body)
        .map_err(|e| HailError::Validation(format!("Malformed video response: {}", e)))?;

    let info = &result.video_info;
    if info.total_frames == 0 {
        return Err(HailError::Validation(
            "video_info.total_frames must be positive".to_string(),
        ));
    }
    if !(info.fps > 0.0) {
        return Err(HailError::Validation(format!(
            "video_info.fps must be positive, got {}",
            info.fps
        )));
    }
    if !(info.duration_seconds >= 0.0) {
        return Err(HailError::Validation(format!(
            "video_info.duration must be non-negative, got {}",
            info.duration_seconds
        )));
    }

    let mut previous = 0.0_f64;
    for (i, frame) in result.frames.iter().enumerate() {
        let ts = frame.timestamp_seconds;
        if !(ts >= 0.0) {
            return Err(HailError::Validation(format!(
                "frame_results[{i}].timestamp must be non-negative, got {ts}"
            )));
        }
        if ts < previous {
            return Err(HailError::Validation(format!(
                "frame_results[{i}].timestamp {ts} is earlier than {previous}"
            )));
        }
        previous = ts;

        for (j, detection) in frame.detections.iter().enumerate() {
            detection.validate(&format!("frame_results[{i}].detections[{j}]"))?;
        }
    }

    Ok(result)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInspection {
    pub id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
    pub detections: ImageDetectionSet,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoInspection {
    pub id: Uuid,
    pub filename: String,
    pub s3_key: String,
    pub result: VideoAnalysisResult,
    pub created_at: DateTime<Utc>,
}

/// Persisted play-head for one video inspection.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Playhead {
    pub current_timestamp: f64,
    pub is_playing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTarget {
    pub upload_url: String,
    pub s3_key: String,
}
