//! SegmentTimeline expansion.
//!
//! A `SegmentTimeline` is a run-length grammar: each `S` element describes a
//! run of `r + 1` segments of duration `d`, optionally re-anchored at `t`.
//! Expansion turns it into one concrete [`TimeRange`] per segment, in
//! period-relative seconds.

use tracing::{debug, warn};

/// Consecutive entries closer than this are considered continuous; a larger
/// gap or overlap is reported before being healed.
pub const GAP_OVERLAP_TOLERANCE_SECONDS: f64 = 1.0 / 15.0;

/// One concrete segment span produced by timeline expansion.
///
/// `start`/`end` are period-relative seconds. `unscaled_start` keeps the
/// presentation-time-offset-adjusted value in timescale units for `$Time$`
/// substitution, and `segment_position` the absolute sequence number for
/// `$Number$`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
    pub unscaled_start: i64,
    pub partial_segments: u32,
    pub segment_position: u64,
}

/// An `S` element as it appears in the manifest, decoupled from the XML
/// layer. Only `d` is required; a missing `d` truncates the timeline.
#[derive(Debug, Clone, Default)]
pub struct TimelineEntry {
    pub t: Option<u64>,
    pub d: Option<u64>,
    pub repeat: Option<i64>,
    pub partial_count: Option<u64>,
}

pub fn expand_segment_timeline(
    entries: &[TimelineEntry],
    timescale: u64,
    unscaled_presentation_time_offset: u64,
    period_duration: f64,
    start_number: u64,
) -> Vec<TimeRange> {
    let timescale = timescale.max(1);
    let pto = unscaled_presentation_time_offset as i64;
    let scale = |units: i64| units as f64 / timescale as f64;

    let mut ranges: Vec<TimeRange> = Vec::new();
    let mut next_unscaled_start: i64 = 0;

    for (i, entry) in entries.iter().enumerate() {
        let Some(d) = entry.d else {
            warn!(index = i, "S element without @d, truncating timeline");
            break;
        };
        let d = d as i64;

        let unscaled_start = match entry.t {
            Some(t) => t as i64 - pto,
            None => next_unscaled_start,
        };

        // An explicitly anchored entry may not line up with where the
        // previous run ended. The next start always wins: the previous
        // segment is stretched or compressed to meet it.
        if let Some(previous) = ranges.last_mut() {
            let delta = scale(unscaled_start) - previous.end;
            if delta.abs() > GAP_OVERLAP_TOLERANCE_SECONDS {
                debug!(
                    delta,
                    at = previous.end,
                    "SegmentTimeline discontinuity, snapping to the next start"
                );
            }
            previous.end = scale(unscaled_start);
        }

        let mut repeat = entry.repeat.unwrap_or(0);
        if repeat < 0 {
            // A negative repeat count means "repeat until the next S@t", or
            // until the period ends for the final entry.
            if let Some(next) = entries.get(i + 1) {
                let Some(next_t) = next.t else {
                    warn!(index = i, "Negative S@r with un-anchored next entry, truncating timeline");
                    break;
                };
                let next_start = next_t as i64 - pto;
                repeat = ((next_start - unscaled_start) as f64 / d as f64).ceil() as i64 - 1;
            } else if period_duration.is_finite() {
                let period_units = period_duration * timescale as f64;
                repeat = ((period_units - unscaled_start as f64) / d as f64).ceil() as i64 - 1;
            } else {
                warn!(
                    index = i,
                    "Negative S@r in an unbounded period, truncating timeline"
                );
                break;
            }
            if repeat < 0 {
                warn!(index = i, "Negative S@r resolves to no repetitions, truncating timeline");
                break;
            }
        }

        for j in 0..=repeat {
            let segment_start = unscaled_start + j * d;
            ranges.push(TimeRange {
                start: scale(segment_start),
                end: scale(segment_start + d),
                unscaled_start: segment_start,
                partial_segments: entry.partial_count.unwrap_or(0) as u32,
                segment_position: start_number + ranges.len() as u64,
            });
        }

        next_unscaled_start = unscaled_start + (repeat + 1) * d;
    }

    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(t: Option<u64>, d: u64, r: i64) -> TimelineEntry {
        TimelineEntry {
            t,
            d: Some(d),
            repeat: Some(r),
            partial_count: None,
        }
    }

    #[test]
    fn test_simple_expansion() {
        let entries = [entry(Some(0), 90_000, 2)];
        let ranges = expand_segment_timeline(&entries, 90_000, 0, f64::INFINITY, 1);

        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0].start, 0.0);
        assert_eq!(ranges[0].end, 1.0);
        assert_eq!(ranges[2].start, 2.0);
        assert_eq!(ranges[2].unscaled_start, 180_000);
        assert_eq!(
            ranges.iter().map(|r| r.segment_position).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_contiguity_with_missing_t() {
        let entries = [entry(Some(10), 10, 0), entry(None, 20, 1), entry(None, 5, 0)];
        let ranges = expand_segment_timeline(&entries, 10, 0, f64::INFINITY, 0);

        assert_eq!(ranges.len(), 4);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        let positions: Vec<u64> = ranges.iter().map(|r| r.segment_position).collect();
        assert!(positions.windows(2).all(|p| p[1] == p[0] + 1));
    }

    #[test]
    fn test_presentation_time_offset_shift() {
        let entries = [entry(Some(100), 10, 0)];
        let ranges = expand_segment_timeline(&entries, 10, 100, f64::INFINITY, 0);
        assert_eq!(ranges[0].start, 0.0);
        assert_eq!(ranges[0].unscaled_start, 0);
    }

    #[test]
    fn test_missing_duration_truncates() {
        let entries = [
            entry(Some(0), 10, 0),
            TimelineEntry { t: None, d: None, repeat: None, partial_count: None },
            entry(None, 10, 0),
        ];
        let ranges = expand_segment_timeline(&entries, 10, 0, f64::INFINITY, 0);
        assert_eq!(ranges.len(), 1);
    }

    #[test]
    fn test_negative_repeat_until_next_entry() {
        let entries = [entry(Some(0), 10, -1), entry(Some(50), 10, 0)];
        let ranges = expand_segment_timeline(&entries, 10, 0, f64::INFINITY, 0);
        // 5 segments of 1s fill [0, 5), then the anchored entry
        assert_eq!(ranges.len(), 6);
        assert_eq!(ranges[4].end, 5.0);
        assert_eq!(ranges[5].start, 5.0);
    }

    #[test]
    fn test_negative_repeat_until_period_end() {
        let entries = [entry(Some(0), 10, -1)];
        let ranges = expand_segment_timeline(&entries, 10, 0, 4.0, 0);
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[3].end, 4.0);
    }

    #[test]
    fn test_negative_repeat_unbounded_truncates() {
        let entries = [entry(Some(0), 10, -1)];
        let ranges = expand_segment_timeline(&entries, 10, 0, f64::INFINITY, 0);
        assert!(ranges.is_empty());
    }

    #[test]
    fn test_gap_is_healed_by_next_start() {
        // 1s gap between the first entry's end (1.0) and the next start (2.0)
        let entries = [entry(Some(0), 10, 0), entry(Some(20), 10, 0)];
        let ranges = expand_segment_timeline(&entries, 10, 0, f64::INFINITY, 0);

        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].end, 2.0);
        assert_eq!(ranges[1].start, 2.0);
    }

    #[test]
    fn test_overlap_is_healed_by_next_start() {
        let entries = [entry(Some(0), 20, 0), entry(Some(10), 10, 0)];
        let ranges = expand_segment_timeline(&entries, 10, 0, f64::INFINITY, 0);

        assert_eq!(ranges[0].end, 1.0);
        assert_eq!(ranges[1].start, 1.0);
    }

    #[test]
    fn test_partial_segment_count() {
        let entries = [TimelineEntry {
            t: Some(0),
            d: Some(10),
            repeat: None,
            partial_count: Some(4),
        }];
        let ranges = expand_segment_timeline(&entries, 10, 0, f64::INFINITY, 0);
        assert_eq!(ranges[0].partial_segments, 4);
    }
}
