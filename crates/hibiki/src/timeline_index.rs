//! Timeline-driven segment index.
//!
//! SegmentTimeline representations update incrementally on every manifest
//! refresh, so their index keeps the compact timeline and materializes
//! [`SegmentReference`]s per position on first access. The index moves
//! through three states: populated, evicting (leading entries drop as the
//! availability window advances), and released once nothing remains —
//! terminal until [`TimelineSegmentIndex::append_template_info`] repopulates
//! it.

use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use crate::{
    mpd::url::resolve_against,
    segment::{InitSegmentReference, SegmentReference, UriResolver},
    template::{fill_uri_template, TemplateValues},
    timeline::TimeRange,
};

/// Everything needed to turn a [`TimeRange`] into a concrete reference.
#[derive(Clone)]
pub struct TimelineTemplateInfo {
    pub media_template: String,
    pub timescale: u64,
    pub unscaled_presentation_time_offset: u64,
    pub representation_id: Option<String>,
    pub bandwidth: Option<u64>,
    pub base_uris: UriResolver,
    pub timestamp_offset: f64,
    /// Every Nth partial segment is independently decodable; 0 means only
    /// the first partial of each segment is.
    pub segment_sequence_cadence: u32,
}

pub struct TimelineSegmentIndex {
    info: Option<TimelineTemplateInfo>,
    timeline: Vec<TimeRange>,
    /// Materialized references, one slot per timeline entry.
    references: Vec<Option<Arc<SegmentReference>>>,
    num_evicted: u64,
    period_start: f64,
    period_end: f64,
    init: Option<Arc<InitSegmentReference>>,
}

impl TimelineSegmentIndex {
    pub fn new(
        info: TimelineTemplateInfo,
        timeline: Vec<TimeRange>,
        period_start: f64,
        period_end: f64,
        should_fit: bool,
        init: Option<Arc<InitSegmentReference>>,
    ) -> Self {
        let mut index = Self {
            info: None,
            timeline: Vec::new(),
            references: Vec::new(),
            num_evicted: 0,
            period_start,
            period_end,
            init: None,
        };
        index.append_template_info(info, timeline, period_start, period_end, should_fit, init);
        index
    }

    pub fn num_references(&self) -> u64 {
        self.timeline.len() as u64
    }

    pub fn num_evicted(&self) -> u64 {
        self.num_evicted
    }

    /// Map a presentation time to a global position. A time before the first
    /// surviving entry maps to that entry; a time outside the period does
    /// not resolve.
    pub fn find(&self, time: f64) -> Option<u64> {
        if self.timeline.is_empty() || time < self.period_start || time >= self.period_end {
            return None;
        }

        let relative = time - self.period_start;
        if relative < self.timeline[0].start {
            return Some(self.num_evicted);
        }
        for (i, entry) in self.timeline.iter().enumerate() {
            if relative >= entry.start && relative < entry.end {
                return Some(self.num_evicted + i as u64);
            }
        }
        None
    }

    /// Build (or return the cached) reference for a global position.
    /// Repeated calls return the identical reference.
    pub fn get(&mut self, position: u64) -> Option<Arc<SegmentReference>> {
        let index = position.checked_sub(self.num_evicted)? as usize;
        if index >= self.timeline.len() {
            return None;
        }

        if self.references[index].is_none() {
            let reference = self.build_reference(index)?;
            self.references[index] = Some(Arc::new(reference));
        }
        self.references[index].clone()
    }

    /// Drop leading entries whose end has fallen out of the availability
    /// window. The materialized cache drops in lockstep so positions stay
    /// aligned. Evicting the final entry releases the index.
    pub fn evict(&mut self, time: f64) {
        let count = self
            .timeline
            .iter()
            .take_while(|entry| self.period_start + entry.end <= time)
            .count();
        if count == 0 {
            return;
        }

        self.timeline.drain(..count);
        self.references.drain(..count);
        self.num_evicted += count as u64;

        if self.timeline.is_empty() {
            debug!("Timeline fully evicted, releasing");
            self.release();
        }
    }

    /// Adopt or extend the timeline from a refreshed manifest. On first
    /// population the info is taken wholesale; afterwards only entries
    /// starting at or after the current last end are appended, so a refresh
    /// repeating known entries cannot duplicate them. A refreshed init
    /// segment reference always replaces the stored one.
    pub fn append_template_info(
        &mut self,
        info: TimelineTemplateInfo,
        timeline: Vec<TimeRange>,
        period_start: f64,
        period_end: f64,
        should_fit: bool,
        init: Option<Arc<InitSegmentReference>>,
    ) {
        self.period_start = period_start;
        self.period_end = period_end;
        if init.is_some() {
            self.init = init;
        }

        if self.timeline.is_empty() {
            self.references = vec![None; timeline.len()];
            self.timeline = timeline;
        } else {
            let last_end = self.timeline.last().map(|e| e.end).unwrap_or(0.0);
            for entry in timeline {
                if entry.start >= last_end {
                    self.timeline.push(entry);
                    self.references.push(None);
                }
            }
        }
        self.info = Some(info);

        if should_fit {
            self.fit_timeline();
        }
    }

    /// Drop trailing entries that start at or after the (possibly shrunk)
    /// period end, then evict against the period start. The final surviving
    /// entry's end is deliberately not rewritten to the period end; repeated
    /// fits would otherwise drift on imprecise arithmetic.
    pub fn fit_timeline(&mut self) {
        if self.info.is_none() {
            return;
        }

        let relative_end = self.period_end - self.period_start;
        while let Some(last) = self.timeline.last() {
            if last.start >= relative_end {
                self.timeline.pop();
                self.references.pop();
            } else {
                break;
            }
        }

        self.evict(self.period_start);
    }

    /// Terminal until the next `append_template_info`. Idempotent.
    pub fn release(&mut self) {
        self.timeline.clear();
        self.references.clear();
        self.info = None;
        self.init = None;
    }

    fn build_reference(&self, index: usize) -> Option<SegmentReference> {
        let info = self.info.as_ref()?;
        let entry = &self.timeline[index];

        let start = self.period_start + entry.start;
        let end = self.period_start + entry.end;

        let media_time =
            (entry.unscaled_start + info.unscaled_presentation_time_offset as i64).max(0) as u64;
        let uris = self.resolve_media_uris(info, media_time, entry.segment_position, None);

        let mut partial = Vec::with_capacity(entry.partial_segments as usize);
        if entry.partial_segments > 0 {
            let count = entry.partial_segments as u64;
            let partial_duration = (end - start) / count as f64;
            for i in 0..count {
                let partial_start = start + i as f64 * partial_duration;
                let partial_end = partial_start + partial_duration;
                let uris =
                    self.resolve_media_uris(info, media_time, entry.segment_position, Some(i + 1));
                let mut reference = match SegmentReference::new(partial_start, partial_end, uris) {
                    Ok(reference) => reference,
                    Err(e) => {
                        warn!(error = %e, "Skipping degenerate partial segment");
                        continue;
                    }
                };
                let independent = match info.segment_sequence_cadence {
                    0 => i == 0,
                    cadence => i % cadence as u64 == 0,
                };
                if !independent {
                    reference.mark_non_independent();
                }
                partial.push(reference);
            }
        }

        let mut reference = SegmentReference::new(start, end, uris)
            .map_err(|e| warn!(error = %e, "Skipping degenerate timeline entry"))
            .ok()?
            .with_timestamp_offset(info.timestamp_offset)
            .with_append_window(self.period_start, self.period_end)
            .with_partial(partial);
        if let Some(init) = &self.init {
            reference = reference.with_init(Arc::clone(init));
        }
        Some(reference)
    }

    fn resolve_media_uris(
        &self,
        info: &TimelineTemplateInfo,
        media_time: u64,
        position: u64,
        sub_number: Option<u64>,
    ) -> UriResolver {
        let values = TemplateValues {
            representation_id: info.representation_id.as_deref(),
            number: Some(position),
            sub_number,
            bandwidth: info.bandwidth,
            time: Some(media_time),
        };
        let media = fill_uri_template(&info.media_template, &values);
        let base_uris = Arc::clone(&info.base_uris);
        Arc::new(move || -> Vec<Url> { resolve_against(&base_uris(), &media) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::static_uris;
    use crate::timeline::{expand_segment_timeline, TimelineEntry};

    fn template_info(cadence: u32) -> TimelineTemplateInfo {
        TimelineTemplateInfo {
            media_template: "seg-$Time$-$Number$.m4s".to_string(),
            timescale: 10,
            unscaled_presentation_time_offset: 0,
            representation_id: Some("video-1".to_string()),
            bandwidth: Some(1_000_000),
            base_uris: static_uris(vec![Url::parse("https://example.com/v/").unwrap()]),
            timestamp_offset: 0.0,
            segment_sequence_cadence: cadence,
        }
    }

    fn ranges(entries: &[(u64, u64, i64)], start_number: u64) -> Vec<TimeRange> {
        let entries: Vec<TimelineEntry> = entries
            .iter()
            .map(|&(t, d, r)| TimelineEntry {
                t: Some(t),
                d: Some(d),
                repeat: Some(r),
                partial_count: None,
            })
            .collect();
        expand_segment_timeline(&entries, 10, 0, f64::INFINITY, start_number)
    }

    fn index() -> TimelineSegmentIndex {
        TimelineSegmentIndex::new(
            template_info(0),
            ranges(&[(0, 10, 3)], 1),
            0.0,
            f64::INFINITY,
            false,
            None,
        )
    }

    #[test]
    fn test_get_is_cached() {
        let mut index = index();
        let first = index.get(2).unwrap();
        let second = index.get(2).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(index.get(4).is_none());
    }

    #[test]
    fn test_reference_uris() {
        let mut index = index();
        let reference = index.get(1).unwrap();
        assert_eq!(
            reference.uris()[0].as_str(),
            "https://example.com/v/seg-10-2.m4s"
        );
    }

    #[test]
    fn test_find_boundaries() {
        let index = TimelineSegmentIndex::new(
            template_info(0),
            ranges(&[(0, 10, 3)], 1),
            100.0,
            104.0,
            false,
            None,
        );
        assert_eq!(index.find(99.9), None);
        assert_eq!(index.find(100.0), Some(0));
        assert_eq!(index.find(102.5), Some(2));
        assert_eq!(index.find(104.0), None);
    }

    #[test]
    fn test_evict_then_find_before_first() {
        let mut index = TimelineSegmentIndex::new(
            template_info(0),
            ranges(&[(0, 10, 3)], 1),
            0.0,
            100.0,
            false,
            None,
        );
        let kept = index.get(2).unwrap();

        index.evict(2.0);
        assert_eq!(index.num_evicted(), 2);
        // before the first surviving entry
        assert_eq!(index.find(0.5), Some(2));
        // cache survived the drain at the same position
        assert!(Arc::ptr_eq(&kept, &index.get(2).unwrap()));
    }

    #[test]
    fn test_evict_everything_releases() {
        let mut index = index();
        index.evict(100.0);
        assert_eq!(index.num_references(), 0);
        assert_eq!(index.num_evicted(), 4);
        assert!(index.get(0).is_none());
        index.release();
    }

    #[test]
    fn test_append_deduplicates() {
        let mut index = index();
        // refresh repeats the last entry and adds two more
        index.append_template_info(
            template_info(0),
            ranges(&[(30, 10, 2)], 4),
            0.0,
            f64::INFINITY,
            false,
            None,
        );
        assert_eq!(index.num_references(), 6);

        let reference = index.get(5).unwrap();
        assert_eq!(reference.start_time, 5.0);
    }

    #[test]
    fn test_fit_drops_trailing_entries() {
        let mut index = TimelineSegmentIndex::new(
            template_info(0),
            ranges(&[(0, 10, 5)], 1),
            0.0,
            3.0,
            true,
            None,
        );
        // entries starting at/after 3.0 go away; the last one keeps its end
        assert_eq!(index.num_references(), 3);
        let last = index.get(2).unwrap();
        assert_eq!(last.end_time, 3.0);
    }

    #[test]
    fn test_partial_segments_cadence() {
        let ranges = expand_segment_timeline(
            &[TimelineEntry {
                t: Some(0),
                d: Some(10),
                repeat: None,
                partial_count: Some(4),
            }],
            10,
            0,
            f64::INFINITY,
            0,
        );

        let mut index = TimelineSegmentIndex::new(
            template_info(0),
            ranges.clone(),
            0.0,
            f64::INFINITY,
            false,
            None,
        );
        let reference = index.get(0).unwrap();
        assert_eq!(reference.partial.len(), 4);
        assert!(reference.partial[0].independent);
        assert!(!reference.partial[1].independent);
        assert!(!reference.partial[3].independent);

        let mut index = TimelineSegmentIndex::new(
            template_info(2),
            ranges,
            0.0,
            f64::INFINITY,
            false,
            None,
        );
        let reference = index.get(0).unwrap();
        assert!(reference.partial[0].independent);
        assert!(!reference.partial[1].independent);
        assert!(reference.partial[2].independent);
    }
}
