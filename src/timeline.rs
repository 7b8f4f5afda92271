// src/timeline.rs
use crate::frames::FrameIndex;
use crate::models::{FrameRecord, Playhead};

/// `m:ss`, truncating fractional seconds.
pub fn format_time(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!("{}:{:02}", total / 60, total % 60)
}

/// Play-head over a video timeline. Holds no detection data; navigation
/// borrows a [`FrameIndex`] per call.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineController {
    current_timestamp: f64,
    is_playing: bool,
    duration: f64,
}

impl TimelineController {
    pub fn new(duration: f64) -> Self {
        Self::restore(duration, Playhead::default())
    }

    pub fn restore(duration: f64, playhead: Playhead) -> Self {
        let mut controller = Self {
            current_timestamp: 0.0,
            is_playing: playhead.is_playing,
            duration: if duration.is_finite() { duration.max(0.0) } else { 0.0 },
        };
        controller.seek(playhead.current_timestamp);
        controller
    }

    pub fn current_timestamp(&self) -> f64 {
        self.current_timestamp
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn playhead(&self) -> Playhead {
        Playhead {
            current_timestamp: self.current_timestamp,
            is_playing: self.is_playing,
        }
    }

    /// Moves the play-head, clamped to `[0, duration]`.
    pub fn seek(&mut self, t: f64) {
        self.current_timestamp = if t.is_nan() {
            0.0
        } else {
            t.clamp(0.0, self.duration)
        };
    }

    /// Jumps to the next damage frame. Returns it, or `None` with the
    /// play-head left where it was.
    pub fn next<'a>(&mut self, index: &FrameIndex<'a>) -> Option<&'a FrameRecord> {
        let frame = index.next_damage_frame(self.current_timestamp)?;
        self.current_timestamp = frame.timestamp_seconds;
        Some(frame)
    }

    pub fn previous<'a>(&mut self, index: &FrameIndex<'a>) -> Option<&'a FrameRecord> {
        let frame = index.previous_damage_frame(self.current_timestamp)?;
        self.current_timestamp = frame.timestamp_seconds;
        Some(frame)
    }

    pub fn toggle_play(&mut self) -> bool {
        self.is_playing = !self.is_playing;
        self.is_playing
    }

    pub fn current_frame<'a>(&self, index: &FrameIndex<'a>) -> Option<&'a FrameRecord> {
        index.frame_at(self.current_timestamp)
    }

    pub fn position_label(&self) -> String {
        format!(
            "{} / {}",
            format_time(self.current_timestamp),
            format_time(self.duration)
        )
    }
}
