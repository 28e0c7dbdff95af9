//! Presentation-wide timing state.
//!
//! https://dashif.org/Guidelines-TimingModel/#mpd-general-timeline
//!
//! One `PresentationTimeline` is shared by every representation of a manifest
//! parse session. The segment addressing resolvers feed observed segment
//! times into it, and the availability window derived here drives eviction
//! and live segment generation. All times are seconds on the presentation
//! timeline; the zero point of a dynamic presentation maps to
//! `MPD@availabilityStartTime` plus the synced clock offset.

use chrono::{DateTime, TimeDelta, Utc};
use tracing::warn;

pub struct PresentationTimeline {
    /// Wall-clock mapping of the presentation's zero point; `None` for
    /// static presentations.
    presentation_start_time: Option<DateTime<Utc>>,
    /// How much the local clock is behind the server clock.
    clock_offset: TimeDelta,
    is_static: bool,
    duration: f64,
    /// Time-shift buffer depth; infinite when the manifest does not bound it.
    segment_availability_duration: f64,
    presentation_delay: f64,
    max_segment_duration: f64,
    min_segment_start_time: Option<f64>,
    start_time_locked: bool,
}

impl PresentationTimeline {
    pub fn new_static(duration: f64) -> Self {
        Self {
            presentation_start_time: None,
            clock_offset: TimeDelta::zero(),
            is_static: true,
            duration,
            segment_availability_duration: f64::INFINITY,
            presentation_delay: 0.0,
            max_segment_duration: 0.0,
            min_segment_start_time: None,
            start_time_locked: false,
        }
    }

    pub fn new_dynamic(
        presentation_start_time: DateTime<Utc>,
        segment_availability_duration: f64,
        presentation_delay: f64,
    ) -> Self {
        Self {
            presentation_start_time: Some(presentation_start_time),
            clock_offset: TimeDelta::zero(),
            is_static: false,
            duration: f64::INFINITY,
            segment_availability_duration,
            presentation_delay,
            max_segment_duration: 0.0,
            min_segment_start_time: None,
            start_time_locked: false,
        }
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn is_live(&self) -> bool {
        !self.is_static
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn set_duration(&mut self, duration: f64) {
        self.duration = duration;
    }

    pub fn presentation_delay(&self) -> f64 {
        self.presentation_delay
    }

    pub fn segment_availability_duration(&self) -> f64 {
        self.segment_availability_duration
    }

    pub fn set_segment_availability_duration(&mut self, duration: f64) {
        self.segment_availability_duration = duration;
    }

    pub fn max_segment_duration(&self) -> f64 {
        self.max_segment_duration
    }

    pub fn min_segment_start_time(&self) -> Option<f64> {
        self.min_segment_start_time
    }

    pub fn set_clock_offset(&mut self, offset: TimeDelta) {
        self.clock_offset = offset;
    }

    /// Updating the start time is only legal before the timeline is locked;
    /// a manifest refresh must not silently shift the live edge afterwards.
    pub fn set_presentation_start_time(&mut self, start: DateTime<Utc>) {
        if self.start_time_locked {
            warn!("Ignoring presentation start time change on a locked timeline");
            return;
        }
        self.presentation_start_time = Some(start);
    }

    /// Called exactly once, after the first successful parse and after any
    /// pending clock sync resolved. Segment generation may begin afterwards.
    pub fn lock_start_time(&mut self) {
        self.start_time_locked = true;
    }

    pub fn is_start_time_locked(&self) -> bool {
        self.start_time_locked
    }

    /// Ratchet the observed maximum segment duration; it pads the live edge
    /// so the newest segment is only exposed once fully available.
    pub fn notify_max_segment_duration(&mut self, duration: f64) {
        if duration > self.max_segment_duration {
            self.max_segment_duration = duration;
        }
    }

    pub fn notify_min_segment_start_time(&mut self, start: f64) {
        self.min_segment_start_time = Some(match self.min_segment_start_time {
            Some(current) => current.min(start),
            None => start,
        });
    }

    pub fn notify_segments(&mut self, references: &[crate::segment::SegmentReference]) {
        if let Some(first) = references.first() {
            self.notify_min_segment_start_time(first.start_time);
        }
        for reference in references {
            self.notify_max_segment_duration(reference.end_time - reference.start_time);
        }
    }

    /// Seconds of presentation time that have become available, i.e. "now"
    /// on the presentation timeline (clock-synced). Static presentations are
    /// fully available.
    pub fn now_in_presentation_time(&self) -> f64 {
        if self.is_static {
            return self.duration;
        }
        let Some(start) = self.presentation_start_time else {
            return self.duration;
        };
        let now = Utc::now() + self.clock_offset;
        (now - start).num_milliseconds() as f64 / 1000.0
    }

    /// Start of the availability window: the oldest segment start that is
    /// still fetchable.
    pub fn segment_availability_start(&self) -> f64 {
        if self.is_static {
            return 0.0;
        }
        if self.segment_availability_duration.is_infinite() {
            return self.min_segment_start_time.unwrap_or(0.0);
        }
        (self.now_in_presentation_time() - self.segment_availability_duration).max(0.0)
    }

    /// End of the availability window.
    pub fn segment_availability_end(&self) -> f64 {
        if self.is_static {
            return self.duration;
        }
        self.now_in_presentation_time().min(self.duration)
    }
}
