// src/frames.rs
//! Time-ordered lookup over the sampled frames of a video analysis.

use crate::models::FrameRecord;
use crate::sizing::{HailClassification, ResponseScheme};
use crate::timeline::format_time;
use serde::Serialize;

/// Scrub positions within this many seconds of a sample resolve to it.
///
/// Must stay between half and one sampling interval (1 s at the default
/// `frame_interval` of 30 on 30 fps footage).
pub const FRAME_MATCH_TOLERANCE_SECS: f64 = 0.5;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DamageMarker {
    pub frame_number: u64,
    pub timestamp: f64,
    /// Horizontal position on the timeline, 0..=100.
    pub position_percent: f64,
    pub detection_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameDetectionRow {
    pub size: &'static str,
    pub confidence_percent: i64,
    pub bbox: [i64; 4],
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameDetails {
    pub frame_number: u64,
    pub timestamp: f64,
    pub timestamp_label: String,
    pub detection_count: usize,
    pub detections: Vec<FrameDetectionRow>,
}

impl FrameDetails {
    pub fn from_record(record: &FrameRecord) -> Self {
        let detections = record
            .detections
            .iter()
            .map(|d| FrameDetectionRow {
                size: HailClassification::of(d, ResponseScheme::Video).label(),
                confidence_percent: d.confidence_percent(),
                bbox: d.bbox.map(|v| v.round() as i64),
            })
            .collect();

        Self {
            frame_number: record.frame_number,
            timestamp: record.timestamp_seconds,
            timestamp_label: format_time(record.timestamp_seconds),
            detection_count: record.damage_count(),
            detections,
        }
    }
}

/// Index over frames sorted ascending by timestamp.
#[derive(Debug, Clone, Copy)]
pub struct FrameIndex<'a> {
    frames: &'a [FrameRecord],
}

impl<'a> FrameIndex<'a> {
    pub fn new(frames: &'a [FrameRecord]) -> Self {
        debug_assert!(
            frames
                .windows(2)
                .all(|w| w[0].timestamp_seconds <= w[1].timestamp_seconds),
            "frames must be sorted by timestamp"
        );
        Self { frames }
    }

    /// First frame within the match tolerance of `t`. Duplicate timestamps
    /// resolve to the first one in sequence order.
    pub fn frame_at(&self, t: f64) -> Option<&'a FrameRecord> {
        let start = self
            .frames
            .partition_point(|f| f.timestamp_seconds <= t - FRAME_MATCH_TOLERANCE_SECS);
        self.frames
            .get(start)
            .filter(|f| (f.timestamp_seconds - t).abs() < FRAME_MATCH_TOLERANCE_SECS)
    }

    /// Earliest damage frame strictly after `t`.
    pub fn next_damage_frame(&self, t: f64) -> Option<&'a FrameRecord> {
        if t.is_nan() {
            return None;
        }
        let start = self.frames.partition_point(|f| f.timestamp_seconds <= t);
        self.frames[start..].iter().find(|f| f.has_damage())
    }

    /// Latest damage frame strictly before `t`.
    pub fn previous_damage_frame(&self, t: f64) -> Option<&'a FrameRecord> {
        if t.is_nan() {
            return None;
        }
        let end = self.frames.partition_point(|f| f.timestamp_seconds < t);
        self.frames[..end].iter().rev().find(|f| f.has_damage())
    }

    pub fn damage_frames(self) -> impl Iterator<Item = &'a FrameRecord> {
        self.frames.iter().filter(|f| f.has_damage())
    }

    pub fn damage_markers(&self, duration: f64) -> Vec<DamageMarker> {
        self.damage_frames()
            .map(|f| {
                let position_percent = if duration > 0.0 {
                    (f.timestamp_seconds / duration * 100.0).clamp(0.0, 100.0)
                } else {
                    0.0
                };
                DamageMarker {
                    frame_number: f.frame_number,
                    timestamp: f.timestamp_seconds,
                    position_percent,
                    detection_count: f.damage_count(),
                }
            })
            .collect()
    }
}
