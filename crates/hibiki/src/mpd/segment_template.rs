//! SegmentTemplate resolution.
//!
//! Exactly one of three segment sources must be present: an `@index`
//! template (in-container index, resolved like SegmentBase), a
//! `SegmentTimeline` (explicit addressing), or a fixed `@duration` (simple
//! addressing). When several appear the most explicit wins: index, then
//! timeline, then duration.

use std::{sync::Arc, time::Duration};

use tracing::warn;

use crate::{
    index::{IndexVariant, SegmentIndex, SharedSegmentIndex, UpdateTick},
    mpd::{
        context::PeriodInfo, segment_base::DeferredIndex, timeline_entries, url::resolve_against,
        ResolverArgs,
    },
    segment::{static_uris, InitSegmentReference, SegmentReference, UriResolver},
    template::{fill_uri_template, scale_media_time, to_template_time, validate_template, TemplateValues},
    timeline::expand_segment_timeline,
    timeline_index::{TimelineSegmentIndex, TimelineTemplateInfo},
    util::range::ByteRange,
    HibikiError, HibikiResult,
};

pub(crate) enum ResolvedTemplate {
    Ready(SharedSegmentIndex),
    Deferred(DeferredIndex),
}

pub(crate) fn resolve(args: &ResolverArgs) -> HibikiResult<ResolvedTemplate> {
    let ctx = args.ctx;

    let media = ctx.inherit_template(|t| t.media.as_ref());
    let init_template = ctx.inherit_template(|t| t.initialization.as_ref());
    let index_template = ctx.inherit_template(|t| t.index.as_ref());
    let timeline_element = ctx.inherit_template(|t| t.SegmentTimeline.as_ref());
    let duration = ctx.inherit_template(|t| t.duration);
    let timescale = ctx.inherit_template(|t| t.timescale).unwrap_or(1).max(1);
    let start_number = ctx.inherit_template(|t| t.startNumber).unwrap_or(1);
    let presentation_time_offset = ctx
        .inherit_template(|t| t.presentationTimeOffset)
        .unwrap_or(0);
    let availability_time_offset = ctx
        .inherit_template(|t| t.availabilityTimeOffset)
        .unwrap_or(0.0);

    let sources = [
        index_template.is_some(),
        timeline_element.is_some(),
        duration.is_some(),
    ]
    .into_iter()
    .filter(|present| *present)
    .count();
    if sources == 0 {
        return Err(HibikiError::MalformedManifest(
            "SegmentTemplate needs an @index, a SegmentTimeline or a @duration".to_string(),
        ));
    }
    if sources > 1 {
        warn!("SegmentTemplate has several segment sources; using index, then timeline, then duration");
    }
    if media.is_none() && index_template.is_none() {
        return Err(HibikiError::MalformedManifest(
            "SegmentTemplate requires @media".to_string(),
        ));
    }
    for template in [media, init_template, index_template].into_iter().flatten() {
        validate_template(template)?;
    }

    let init = init_template
        .map(|template| build_init_reference(args, template, timescale))
        .transpose()?;

    if let Some(index_template) = index_template {
        return Ok(ResolvedTemplate::Deferred(resolve_index_path(
            args,
            index_template,
            media,
            init,
            timescale,
            presentation_time_offset,
        )?));
    }

    let media = media.unwrap();
    let index = if let Some(timeline_element) = timeline_element {
        let entries = timeline_entries(timeline_element);
        resolve_timeline_path(
            args,
            media,
            init,
            timescale,
            start_number,
            presentation_time_offset,
            entries,
        )?
    } else {
        resolve_duration_path(
            args,
            media,
            init,
            timescale,
            start_number,
            presentation_time_offset,
            availability_time_offset,
            duration.unwrap(),
        )?
    };
    Ok(ResolvedTemplate::Ready(index))
}

/// Init templates carry only the static substitutions; `$Number$`, `$Time$`
/// and `$SubNumber$` have no value at init time.
fn build_init_reference(
    args: &ResolverArgs,
    template: &str,
    timescale: u64,
) -> HibikiResult<Arc<InitSegmentReference>> {
    let ctx = args.ctx;
    let values = TemplateValues {
        representation_id: ctx.representation_id.as_deref(),
        bandwidth: ctx.bandwidth,
        ..Default::default()
    };
    let relative = fill_uri_template(template, &values);
    let bases = ctx.base_urls.clone();
    let uris: UriResolver = Arc::new(move || resolve_against(&bases, &relative));
    Ok(Arc::new(
        InitSegmentReference::new(uris, None, ctx.quality.clone()).with_timescale(timescale),
    ))
}

/// `@index` delegates to the SegmentBase machinery: the filled template
/// names the index resource, and the media resource is either the filled
/// `@media` template or the representation's base URLs.
fn resolve_index_path(
    args: &ResolverArgs,
    index_template: &str,
    media_template: Option<&String>,
    init: Option<Arc<InitSegmentReference>>,
    timescale: u64,
    presentation_time_offset: u64,
) -> HibikiResult<DeferredIndex> {
    let ctx = args.ctx;

    let container = ctx.container().unwrap_or("mp4").to_string();
    if container != "mp4" && container != "webm" {
        return Err(HibikiError::UnsupportedContainer(container));
    }
    if container == "webm" && init.is_none() {
        return Err(HibikiError::MalformedManifest(
            "WebM index template requires an initialization template".to_string(),
        ));
    }

    let values = TemplateValues {
        representation_id: ctx.representation_id.as_deref(),
        bandwidth: ctx.bandwidth,
        ..Default::default()
    };
    let index_uri = fill_uri_template(index_template, &values);
    let index_uris: UriResolver = {
        let bases = ctx.base_urls.clone();
        Arc::new(move || resolve_against(&bases, &index_uri))
    };
    let media_uris: UriResolver = match media_template {
        Some(template) => {
            let media_uri = fill_uri_template(template, &values);
            let bases = ctx.base_urls.clone();
            Arc::new(move || resolve_against(&bases, &media_uri))
        }
        None => static_uris(ctx.base_urls.clone()),
    };

    let timestamp_offset =
        ctx.period_info.start - presentation_time_offset as f64 / timescale as f64;

    Ok(DeferredIndex {
        client: args.client.clone(),
        registry: Arc::clone(args.registry),
        needs_init_data: container == "webm",
        container,
        index_uris,
        // the whole index resource, not a sub-range of the media file
        index_range: ByteRange::new(0, None),
        init,
        media_uris,
        timestamp_offset,
        append_window_start: ctx.period_info.start,
        append_window_end: ctx.period_info.end(),
        should_fit: ctx.should_fit(),
    })
}

fn resolve_timeline_path(
    args: &ResolverArgs,
    media_template: &str,
    init: Option<Arc<InitSegmentReference>>,
    timescale: u64,
    start_number: u64,
    presentation_time_offset: u64,
    entries: Vec<crate::timeline::TimelineEntry>,
) -> HibikiResult<SharedSegmentIndex> {
    let ctx = args.ctx;
    let period = &ctx.period_info;

    let ranges = expand_segment_timeline(
        &entries,
        timescale,
        presentation_time_offset,
        period.duration,
        start_number,
    );

    {
        let mut presentation = args.presentation.lock().unwrap();
        if let Some(first) = ranges.first() {
            presentation.notify_min_segment_start_time(period.start + first.start);
        }
        for range in &ranges {
            presentation.notify_max_segment_duration(range.end - range.start);
        }
    }

    let info = TimelineTemplateInfo {
        media_template: media_template.to_string(),
        timescale,
        unscaled_presentation_time_offset: presentation_time_offset,
        representation_id: ctx.representation_id.clone(),
        bandwidth: ctx.bandwidth,
        base_uris: static_uris(ctx.base_urls.clone()),
        timestamp_offset: period.start - presentation_time_offset as f64 / timescale as f64,
        segment_sequence_cadence: args.config.segment_sequence_cadence,
    };
    let should_fit = ctx.should_fit();

    let shared = match &args.stored {
        Some(stored) => {
            stored.with_variant(move |variant| match variant {
                IndexVariant::Timeline(index) => index.append_template_info(
                    info,
                    ranges,
                    period.start,
                    period.end(),
                    should_fit,
                    init,
                ),
                other => {
                    warn!("Stored segment index changed shape, rebuilding");
                    *other = IndexVariant::Timeline(TimelineSegmentIndex::new(
                        info,
                        ranges,
                        period.start,
                        period.end(),
                        should_fit,
                        init,
                    ));
                }
            });
            stored.clone()
        }
        None => SharedSegmentIndex::new_timeline(TimelineSegmentIndex::new(
            info,
            ranges,
            period.start,
            period.end(),
            should_fit,
            init,
        )),
    };

    if ctx.dynamic {
        let availability_start = args
            .presentation
            .lock()
            .unwrap()
            .segment_availability_start();
        shared.with_variant(|variant| {
            if let IndexVariant::Timeline(index) = variant {
                index.evict(availability_start);
            }
        });
    }

    Ok(shared)
}

/// Captures everything a fixed-duration representation needs to build the
/// reference for one position, both at parse time and from regeneration
/// ticks.
struct ReferenceGenerator {
    media_template: String,
    representation_id: Option<String>,
    bandwidth: Option<u64>,
    base_urls: Vec<url::Url>,
    duration_units: f64,
    duration_seconds: f64,
    start_number: u64,
    period: PeriodInfo,
    timestamp_offset: f64,
    /// Extends the live edge: segments become fetchable this many seconds
    /// before they are complete.
    availability_time_offset: f64,
    init: Option<Arc<InitSegmentReference>>,
}

impl ReferenceGenerator {
    /// `position` is zero-based from the period start; `$Number$` adds
    /// `startNumber` on top.
    fn build(&self, position: u64) -> HibikiResult<SegmentReference> {
        let media_time = if self.duration_units.fract() == 0.0 {
            scale_media_time(position, self.duration_units as u64)?
        } else {
            to_template_time(position as f64 * self.duration_units)
        };
        let values = TemplateValues {
            representation_id: self.representation_id.as_deref(),
            number: Some(position + self.start_number),
            sub_number: None,
            bandwidth: self.bandwidth,
            time: Some(media_time),
        };
        let relative = fill_uri_template(&self.media_template, &values);
        let uris: UriResolver = {
            let bases = self.base_urls.clone();
            Arc::new(move || resolve_against(&bases, &relative))
        };

        let start = self.period.start + position as f64 * self.duration_seconds;
        let mut reference = SegmentReference::new(start, start + self.duration_seconds, uris)?
            .with_timestamp_offset(self.timestamp_offset)
            .with_append_window(self.period.start, self.period.end());
        if let Some(init) = &self.init {
            reference = reference.with_init(Arc::clone(init));
        }
        Ok(reference)
    }

    /// Zero-based position range covered by the availability window,
    /// clipped to the period and capped backward from the newest segment.
    fn window_positions(
        &self,
        availability_start: f64,
        availability_end: f64,
        segment_limit: usize,
        dynamic: bool,
    ) -> Option<(u64, u64)> {
        let start = availability_start.max(self.period.start);
        let end = (availability_end + self.availability_time_offset).min(self.period.end());
        if end <= start {
            return None;
        }

        let mut first = ((start - self.period.start) / self.duration_seconds).floor() as u64;
        let last_exclusive = ((end - self.period.start) / self.duration_seconds).ceil() as u64;
        let last = last_exclusive.checked_sub(1)?;
        if first > last {
            return None;
        }
        if dynamic && (last - first + 1) as usize > segment_limit {
            first = last + 1 - segment_limit as u64;
        }
        Some((first, last))
    }
}

#[allow(clippy::too_many_arguments)]
fn resolve_duration_path(
    args: &ResolverArgs,
    media_template: &str,
    init: Option<Arc<InitSegmentReference>>,
    timescale: u64,
    start_number: u64,
    presentation_time_offset: u64,
    availability_time_offset: f64,
    duration_units: f64,
) -> HibikiResult<SharedSegmentIndex> {
    let ctx = args.ctx;
    let period = ctx.period_info.clone();

    let duration_seconds = duration_units / timescale as f64;
    if duration_seconds <= 0.0 {
        return Err(HibikiError::MalformedManifest(
            "SegmentTemplate duration must be positive".to_string(),
        ));
    }

    let generator = ReferenceGenerator {
        media_template: media_template.to_string(),
        representation_id: ctx.representation_id.clone(),
        bandwidth: ctx.bandwidth,
        base_urls: ctx.base_urls.clone(),
        duration_units,
        duration_seconds,
        start_number,
        timestamp_offset: period.start - presentation_time_offset as f64 / timescale as f64,
        period,
        availability_time_offset,
        init,
    };

    let (availability_start, availability_end) = {
        let presentation = args.presentation.lock().unwrap();
        (
            presentation.segment_availability_start(),
            presentation.segment_availability_end(),
        )
    };

    let positions = generator.window_positions(
        availability_start,
        availability_end,
        args.config.segment_limit,
        ctx.dynamic,
    );
    let mut references = Vec::new();
    if let Some((first, last)) = positions {
        references.reserve((last - first + 1) as usize);
        for position in first..=last {
            references.push(generator.build(position)?);
        }
    }

    {
        let mut presentation = args.presentation.lock().unwrap();
        presentation.notify_max_segment_duration(duration_seconds);
        presentation.notify_segments(&references);
    }

    let start_position = positions.map(|(first, _)| first).unwrap_or(0) + start_number;
    let should_fit = ctx.should_fit();
    let period = generator.period.clone();

    let shared = match &args.stored {
        Some(stored) => {
            stored.with_variant(move |variant| match variant {
                IndexVariant::Eager(index) => {
                    index.merge_and_evict(references, availability_start.max(period.start));
                }
                other => {
                    warn!("Stored segment index changed shape, rebuilding");
                    *other = IndexVariant::Eager(SegmentIndex::with_start_position(
                        references,
                        start_position,
                    ));
                }
            });
            stored.clone()
        }
        None => SharedSegmentIndex::new_eager(SegmentIndex::with_start_position(
            references,
            start_position,
        )),
    };

    if should_fit {
        let period = generator.period.clone();
        shared.with_variant(|variant| {
            if let IndexVariant::Eager(index) = variant {
                index.fit(period.start, period.end());
            }
        });
    }

    // The availability window keeps moving for a live stream: evict expired
    // references and append the newly available ones, one segment duration
    // at a time. The timer ends once the period is over and drained; the
    // remaining references stay until release.
    if ctx.dynamic {
        let presentation = Arc::clone(args.presentation);
        let segment_limit = args.config.segment_limit;
        shared.update_every(
            Duration::from_secs_f64(duration_seconds),
            move |variant| {
                let IndexVariant::Eager(index) = variant else {
                    return UpdateTick::Done;
                };
                let (availability_start, availability_end) = {
                    let presentation = presentation.lock().unwrap();
                    (
                        presentation.segment_availability_start(),
                        presentation.segment_availability_end(),
                    )
                };

                index.evict(availability_start.max(generator.period.start));

                if let Some((_, last)) = generator.window_positions(
                    availability_start,
                    availability_end,
                    segment_limit,
                    true,
                ) {
                    let last_position = last + generator.start_number;
                    let mut fresh = Vec::new();
                    for position in index.end_position()..=last_position {
                        match generator.build(position - generator.start_number) {
                            Ok(reference) => fresh.push(reference),
                            Err(e) => {
                                warn!(error = %e, "Stopped extending the segment index");
                                break;
                            }
                        }
                    }
                    if !fresh.is_empty() {
                        presentation.lock().unwrap().notify_segments(&fresh);
                        index.merge(fresh);
                    }
                }

                let fully_generated = generator.period.duration.is_finite()
                    && availability_end >= generator.period.end();
                if fully_generated && index.num_references() == 0 {
                    UpdateTick::Done
                } else {
                    UpdateTick::Continue
                }
            },
        );
    }

    Ok(shared)
}
