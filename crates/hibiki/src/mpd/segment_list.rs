//! SegmentList resolution: every segment is spelled out as a `SegmentURL`
//! child, optionally zipped against a `SegmentTimeline` for timing. The
//! produced index is eager; manifest refreshes merge into the stored index
//! for the same period and representation instead of rebuilding it.

use std::sync::Arc;

use tracing::warn;

use crate::{
    index::{IndexVariant, SegmentIndex, SharedSegmentIndex},
    mpd::{init_reference_from_element, timeline_entries, url::resolve_against, ResolverArgs},
    segment::{SegmentReference, UriResolver},
    timeline::expand_segment_timeline,
    util::range::parse_media_range,
    HibikiError, HibikiResult,
};

pub(crate) fn resolve(args: &ResolverArgs) -> HibikiResult<SharedSegmentIndex> {
    let ctx = args.ctx;
    let period = &ctx.period_info;

    let urls = ctx
        .inherit_list(|sl| (!sl.segment_urls.is_empty()).then_some(&sl.segment_urls))
        .ok_or_else(|| {
            HibikiError::MalformedManifest("SegmentList has no SegmentURL entries".to_string())
        })?;
    let timescale = ctx.inherit_list(|sl| sl.timescale).unwrap_or(1).max(1);
    let duration = ctx.inherit_list(|sl| sl.duration);
    let timeline_element = ctx.inherit_list(|sl| sl.SegmentTimeline.as_ref());
    let presentation_time_offset = ctx
        .inherit_list(|sl| sl.presentationTimeOffset)
        .unwrap_or(0);
    let init = ctx
        .inherit_list(|sl| sl.Initialization.as_ref())
        .map(|element| init_reference_from_element(ctx, element, timescale))
        .transpose()?;

    let timestamp_offset =
        period.start - presentation_time_offset as f64 / timescale as f64;

    // Period-relative time spans, one per SegmentURL.
    let spans: Vec<(f64, f64)> = match (timeline_element, duration) {
        (Some(timeline), d) => {
            if d.is_some() {
                warn!("SegmentList has both @duration and a SegmentTimeline, using the timeline");
            }
            let entries = timeline_entries(timeline);
            let ranges = expand_segment_timeline(
                &entries,
                timescale,
                presentation_time_offset,
                period.duration,
                1,
            );
            if ranges.len() != urls.len() {
                warn!(
                    urls = urls.len(),
                    timeline = ranges.len(),
                    "SegmentURL count does not match the timeline, truncating to the shorter"
                );
            }
            ranges
                .into_iter()
                .take(urls.len())
                .map(|range| (range.start, range.end))
                .collect()
        }
        (None, Some(duration)) => {
            let duration = duration as f64 / timescale as f64;
            (0..urls.len())
                .map(|i| (i as f64 * duration, (i + 1) as f64 * duration))
                .collect()
        }
        (None, None) => {
            // tolerated only as "the whole period is one segment"
            if urls.len() == 1 && period.duration.is_finite() {
                vec![(0.0, period.duration)]
            } else {
                return Err(HibikiError::MalformedManifest(
                    "SegmentList requires @duration or a SegmentTimeline".to_string(),
                ));
            }
        }
    };

    let mut references = Vec::with_capacity(spans.len());
    for (span, segment_url) in spans.iter().zip(urls.iter()) {
        let media = segment_url.media.as_ref().ok_or_else(|| {
            HibikiError::MalformedManifest("SegmentURL without @media".to_string())
        })?;
        let uris: UriResolver = {
            let bases = ctx.base_urls.clone();
            let media = media.clone();
            Arc::new(move || resolve_against(&bases, &media))
        };

        let mut reference = SegmentReference::new(period.start + span.0, period.start + span.1, uris)?
            .with_timestamp_offset(timestamp_offset)
            .with_append_window(period.start, period.end());
        if let Some(range) = &segment_url.mediaRange {
            let range = parse_media_range(range)?;
            reference = reference.with_byte_range(range.start, range.end);
        }
        if let Some(init) = &init {
            reference = reference.with_init(Arc::clone(init));
        }
        references.push(reference);
    }

    let availability_start = {
        let mut presentation = args.presentation.lock().unwrap();
        presentation.notify_segments(&references);
        presentation.segment_availability_start()
    };

    let should_fit = ctx.should_fit();
    if let Some(stored) = &args.stored {
        stored.with_variant(move |variant| match variant {
            IndexVariant::Eager(index) => {
                index.merge_and_evict(references, availability_start.max(period.start));
                if should_fit {
                    index.fit(period.start, period.end());
                }
            }
            other => {
                warn!("Stored segment index changed shape, rebuilding");
                let mut index = SegmentIndex::new(references);
                if should_fit {
                    index.fit(period.start, period.end());
                }
                *other = IndexVariant::Eager(index);
            }
        });
        return Ok(stored.clone());
    }

    let mut index = SegmentIndex::new(references);
    if should_fit {
        index.fit(period.start, period.end());
    }
    Ok(SharedSegmentIndex::new_eager(index))
}
