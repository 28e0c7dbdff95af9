//! # MPD to segment timeline driver
//!
//! Walks a pre-parsed MPD (Period → AdaptationSet → Representation),
//! builds an inheritance frame per representation, hands it to the matching
//! segment addressing resolver and assembles the produced streams into a
//! [`Manifest`](crate::manifest::Manifest).
//!
//! The driver is refresh-aware: parsing an updated MPD with the same
//! [`DashParser`] merges new segment references into the stored indexes for
//! stable (period, representation) pairs instead of rebuilding them, so
//! positions already handed out stay valid (DASH-IF timing model). Fetching
//! and re-parsing the manifest document itself is the caller's job; only
//! container index bytes and clock sync requests leave this module.

pub(crate) mod clock;
pub(crate) mod context;
pub(crate) mod segment_base;
pub(crate) mod segment_list;
pub(crate) mod segment_template;
pub(crate) mod url;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use ::url::Url;
use chrono::DateTime;
use dash_mpd::{AudioChannelConfiguration, BaseURL, Initialization, SegmentTimeline, MPD};
use tracing::{error, warn};

use crate::{
    index::{IndexVariant, SegmentIndex, SharedSegmentIndex},
    manifest::{ContentType, IndexSource, Manifest, Stream, Variant, MANIFEST_TYPE_DASH},
    mpd::{
        context::{Context, Frame, PeriodInfo},
        segment_template::ResolvedTemplate,
        url::{merge_baseurls, resolve_against},
    },
    presentation::PresentationTimeline,
    registry::IndexParserRegistry,
    segment::{static_uris, InitSegmentReference, QualityInfo, SegmentReference, UriResolver},
    timeline::TimelineEntry,
    util::{http::HttpClient, range::parse_media_range},
    HibikiError, HibikiResult,
};

#[derive(Debug, Clone)]
pub struct DashConfig {
    /// Upper bound on segments materialized behind the live edge for the
    /// fixed-duration template path.
    pub segment_limit: usize,
    /// Every Nth partial segment is independently decodable; 0 means only
    /// the first partial of each segment is.
    pub segment_sequence_cadence: u32,
}

impl Default for DashConfig {
    fn default() -> Self {
        Self {
            segment_limit: 1000,
            segment_sequence_cadence: 0,
        }
    }
}

/// Everything a segment addressing resolver can reach.
pub(crate) struct ResolverArgs<'a> {
    pub ctx: &'a Context<'a>,
    pub config: &'a DashConfig,
    pub client: &'a HttpClient,
    pub registry: &'a Arc<IndexParserRegistry>,
    pub presentation: &'a Arc<Mutex<PresentationTimeline>>,
    /// The index stored for this (period, representation) on a previous
    /// parse, if any; refreshes merge into it.
    pub stored: Option<SharedSegmentIndex>,
}

pub struct DashParser {
    client: HttpClient,
    config: DashConfig,
    registry: Arc<IndexParserRegistry>,
    presentation: Option<Arc<Mutex<PresentationTimeline>>>,
    stored_indexes: HashMap<String, SharedSegmentIndex>,
    /// Content-steering override for the root base URIs.
    base_uris: Option<UriResolver>,
}

impl DashParser {
    pub fn new(client: HttpClient, config: DashConfig) -> Self {
        Self::with_registry(client, config, IndexParserRegistry::with_defaults())
    }

    pub fn with_registry(
        client: HttpClient,
        config: DashConfig,
        registry: IndexParserRegistry,
    ) -> Self {
        Self {
            client,
            config,
            registry: Arc::new(registry),
            presentation: None,
            stored_indexes: HashMap::new(),
            base_uris: None,
        }
    }

    /// Install the content-steering collaborator: a callback producing the
    /// current root base URIs, consulted on every parse.
    pub fn set_base_uris(&mut self, resolver: UriResolver) {
        self.base_uris = Some(resolver);
    }

    pub fn presentation_timeline(&self) -> Option<Arc<Mutex<PresentationTimeline>>> {
        self.presentation.clone()
    }

    /// Parse (or re-parse) a manifest. The first call creates the
    /// presentation timeline and locks its start time; later calls with a
    /// refreshed document merge into the stored segment indexes.
    pub async fn parse(&mut self, mpd: &MPD, mpd_url: &Url) -> HibikiResult<Manifest> {
        let dynamic = mpd.mpdtype.as_deref() == Some("dynamic");
        let first_parse = self.presentation.is_none();
        let presentation_duration = mpd.mediaPresentationDuration.map(|d| d.as_secs_f64());

        if first_parse {
            let timeline = if dynamic {
                PresentationTimeline::new_dynamic(
                    mpd.availabilityStartTime
                        .unwrap_or(DateTime::UNIX_EPOCH),
                    mpd.timeShiftBufferDepth
                        .map(|d| d.as_secs_f64())
                        .unwrap_or(f64::INFINITY),
                    mpd.suggestedPresentationDelay
                        .map(|d| d.as_secs_f64())
                        .unwrap_or(0.0),
                )
            } else {
                PresentationTimeline::new_static(presentation_duration.unwrap_or(f64::INFINITY))
            };
            self.presentation = Some(Arc::new(Mutex::new(timeline)));
        }
        let presentation = Arc::clone(self.presentation.as_ref().unwrap());

        if dynamic {
            match clock::sync_clock(&mpd.UTCTiming, &self.client).await {
                Ok(offset) => presentation.lock().unwrap().set_clock_offset(offset),
                // the first parse must not lock in a wrong live edge; on a
                // refresh the previous offset is still good
                Err(e) if first_parse => return Err(e),
                Err(e) => warn!(error = %e, "Clock re-sync failed, keeping the previous offset"),
            }
        }

        let roots: Vec<Url> = match &self.base_uris {
            Some(resolver) => resolver(),
            None if mpd.base_url.is_empty() => vec![mpd_url.clone()],
            None => mpd
                .base_url
                .iter()
                .filter_map(|base| merge_baseurls(mpd_url, &base.base).ok())
                .collect(),
        };
        if roots.is_empty() {
            return Err(HibikiError::MalformedManifest(
                "No usable base URL".to_string(),
            ));
        }

        let period_infos = period_infos(mpd, presentation_duration);
        if !dynamic {
            if let Some(last) = period_infos.last() {
                let mut presentation = presentation.lock().unwrap();
                if presentation.duration().is_infinite() && last.duration.is_finite() {
                    presentation.set_duration(last.end());
                }
            }
        }

        let mut variants = Vec::new();
        let mut text_streams = Vec::new();
        let mut image_streams = Vec::new();

        for (period_index, (period, period_info)) in
            mpd.periods.iter().zip(&period_infos).enumerate()
        {
            let period_frame = Frame {
                segment_base: period.SegmentBase.as_ref(),
                segment_list: period.SegmentList.as_ref(),
                segment_template: period.SegmentTemplate.as_ref(),
            };
            let period_bases = merge_level(&roots, &period.BaseURL);
            let period_key = period_info
                .id
                .clone()
                .unwrap_or_else(|| format!("period-{period_index}"));

            let mut video = Vec::new();
            let mut audio = Vec::new();

            for adaptation in &period.adaptations {
                let adaptation_frame = Frame {
                    segment_base: adaptation.SegmentBase.as_ref(),
                    segment_list: adaptation.SegmentList.as_ref(),
                    segment_template: adaptation.SegmentTemplate.as_ref(),
                };
                let adaptation_bases = merge_level(&period_bases, &adaptation.BaseURL);

                for (representation_index, representation) in
                    adaptation.representations.iter().enumerate()
                {
                    let representation_frame = Frame {
                        segment_base: representation.SegmentBase.as_ref(),
                        segment_list: representation.SegmentList.as_ref(),
                        segment_template: representation.SegmentTemplate.as_ref(),
                    };
                    let base_urls = merge_level(&adaptation_bases, &representation.BaseURL);

                    let mime_type = representation
                        .mimeType
                        .clone()
                        .or_else(|| adaptation.mimeType.clone());
                    let content_type = ContentType::detect(
                        representation
                            .contentType
                            .as_deref()
                            .or(adaptation.contentType.as_deref()),
                        mime_type.as_deref(),
                    );
                    let quality = QualityInfo {
                        bandwidth: representation.bandwidth,
                        width: representation.width,
                        height: representation.height,
                        codecs: representation
                            .codecs
                            .clone()
                            .or_else(|| adaptation.codecs.clone()),
                        frame_rate: representation
                            .frameRate
                            .clone()
                            .or_else(|| adaptation.frameRate.clone()),
                        audio_sampling_rate: parse_attr(&representation.audioSamplingRate)
                            .or_else(|| parse_attr(&adaptation.audioSamplingRate)),
                        channel_count: channel_count(
                            representation.AudioChannelConfiguration.iter(),
                        )
                        .or_else(|| channel_count(adaptation.AudioChannelConfiguration.iter())),
                    };

                    let ctx = Context {
                        period: period_frame,
                        adaptation_set: adaptation_frame,
                        representation: representation_frame,
                        period_info: period_info.clone(),
                        base_urls,
                        representation_id: representation.id.clone(),
                        bandwidth: representation.bandwidth,
                        mime_type,
                        content_type,
                        language: representation
                            .lang
                            .clone()
                            .or_else(|| adaptation.lang.clone()),
                        quality,
                        dynamic,
                    };

                    let key = format!(
                        "{period_key}|{}",
                        ctx.representation_id
                            .clone()
                            .unwrap_or_else(|| format!("representation-{representation_index}"))
                    );
                    let stored = self.stored_indexes.get(&key).cloned();

                    let stream = match self.build_stream(&ctx, stored, &presentation) {
                        Ok(stream) => stream,
                        Err(e) if ctx.content_type.is_optional() => {
                            warn!(
                                period = %period_key,
                                representation = ?ctx.representation_id,
                                error = %e,
                                "Dropping optional representation"
                            );
                            continue;
                        }
                        Err(e) => {
                            error!(
                                period = %period_key,
                                representation = ?ctx.representation_id,
                                error = %e,
                                "Failed to build a stream"
                            );
                            return Err(e);
                        }
                    };

                    self.stored_indexes
                        .insert(key, stream.segment_index.clone());
                    let stream = Arc::new(stream);
                    match stream.content_type {
                        ContentType::Video => video.push(stream),
                        ContentType::Audio => audio.push(stream),
                        ContentType::Image => image_streams.push(stream),
                        _ => text_streams.push(stream),
                    }
                }
            }

            variants.extend(pair_variants(video, audio));
        }

        if first_parse {
            presentation.lock().unwrap().lock_start_time();
        }

        Ok(Manifest {
            presentation_timeline: presentation,
            variants,
            text_streams,
            image_streams,
            manifest_type: MANIFEST_TYPE_DASH,
        })
    }

    /// Alias for a manifest refresh; identical to [`DashParser::parse`] but
    /// reads better at call sites.
    pub async fn update(&mut self, mpd: &MPD, mpd_url: &Url) -> HibikiResult<Manifest> {
        self.parse(mpd, mpd_url).await
    }

    /// Tear down every stored segment index. In-flight regeneration ticks
    /// become no-ops; the parser can be reused afterwards.
    pub fn stop(&mut self) {
        for index in self.stored_indexes.values() {
            index.release();
        }
        self.stored_indexes.clear();
        self.presentation = None;
    }

    fn build_stream(
        &self,
        ctx: &Context,
        stored: Option<SharedSegmentIndex>,
        presentation: &Arc<Mutex<PresentationTimeline>>,
    ) -> HibikiResult<Stream> {
        let args = ResolverArgs {
            ctx,
            config: &self.config,
            client: &self.client,
            registry: &self.registry,
            presentation,
            stored,
        };

        let (segment_index, source) = if ctx.segment_base().is_some() {
            let deferred = segment_base::resolve(&args)?;
            let shared = args
                .stored
                .clone()
                .unwrap_or_else(|| SharedSegmentIndex::new_eager(SegmentIndex::default()));
            (shared, IndexSource::Deferred(deferred))
        } else if ctx.segment_list().is_some() {
            (segment_list::resolve(&args)?, IndexSource::Ready)
        } else if ctx.segment_template().is_some() {
            match segment_template::resolve(&args)? {
                ResolvedTemplate::Ready(shared) => (shared, IndexSource::Ready),
                ResolvedTemplate::Deferred(deferred) => {
                    let shared = args
                        .stored
                        .clone()
                        .unwrap_or_else(|| SharedSegmentIndex::new_eager(SegmentIndex::default()));
                    (shared, IndexSource::Deferred(deferred))
                }
            }
        } else if ctx.content_type.is_optional() {
            // BaseURL-only addressing: the whole period is one resource
            (single_reference_index(ctx)?, IndexSource::Ready)
        } else {
            return Err(HibikiError::MalformedManifest(
                "Representation has no segment information".to_string(),
            ));
        };

        if ctx.content_type == ContentType::Image {
            segment_index.with_variant(|variant| {
                if let IndexVariant::Eager(index) = variant {
                    index.set_tiles_layout("1x1");
                }
            });
        }

        Ok(Stream::new(
            ctx.representation_id.clone(),
            ctx.content_type,
            ctx.mime_type.clone(),
            ctx.quality.codecs.clone(),
            ctx.language.clone(),
            ctx.bandwidth,
            ctx.quality.clone(),
            segment_index,
            source,
        ))
    }
}

/// Resolve period starts and durations: an explicit start wins, a missing
/// one continues from the previous period's end, and a missing duration is
/// closed by the next period's start or, for the final period, by the
/// presentation duration.
fn period_infos(mpd: &MPD, presentation_duration: Option<f64>) -> Vec<PeriodInfo> {
    let count = mpd.periods.len();
    let mut infos = Vec::with_capacity(count);
    let mut next_start = 0.0;

    for (i, period) in mpd.periods.iter().enumerate() {
        let start = period.start.map(|d| d.as_secs_f64()).unwrap_or(next_start);
        let mut duration = period
            .duration
            .map(|d| d.as_secs_f64())
            .unwrap_or(f64::INFINITY);
        if duration.is_infinite() {
            if let Some(next_explicit) = mpd
                .periods
                .get(i + 1)
                .and_then(|next| next.start)
                .map(|d| d.as_secs_f64())
            {
                if next_explicit >= start {
                    duration = next_explicit - start;
                }
            }
        }
        if duration.is_infinite() && i + 1 < count {
            warn!(period = ?period.id, "Period duration cannot be resolved, the next period start is implicit");
        }

        next_start = if duration.is_finite() { start + duration } else { start };
        infos.push(PeriodInfo {
            id: period.id.clone(),
            start,
            duration,
            is_last: i + 1 == count,
        });
    }

    if let Some(last) = infos.last_mut() {
        if last.duration.is_infinite() {
            if let Some(total) = presentation_duration {
                last.duration = (total - last.start).max(0.0);
            }
        }
    }

    infos
}

/// Merge one hierarchy level's BaseURL into each rotation root.
fn merge_level(bases: &[Url], elements: &[BaseURL]) -> Vec<Url> {
    match elements.first() {
        Some(element) => {
            let merged: Vec<Url> = bases
                .iter()
                .filter_map(|base| merge_baseurls(base, &element.base).ok())
                .collect();
            if merged.is_empty() {
                bases.to_vec()
            } else {
                merged
            }
        }
        None => bases.to_vec(),
    }
}

fn pair_variants(video: Vec<Arc<Stream>>, audio: Vec<Arc<Stream>>) -> Vec<Variant> {
    let mut variants = Vec::new();
    match (video.is_empty(), audio.is_empty()) {
        (false, false) => {
            for v in &video {
                for a in &audio {
                    variants.push(Variant {
                        bandwidth: v.bandwidth.unwrap_or(0) + a.bandwidth.unwrap_or(0),
                        video: Some(Arc::clone(v)),
                        audio: Some(Arc::clone(a)),
                    });
                }
            }
        }
        (false, true) => {
            for v in video {
                variants.push(Variant {
                    bandwidth: v.bandwidth.unwrap_or(0),
                    video: Some(v),
                    audio: None,
                });
            }
        }
        (true, false) => {
            for a in audio {
                variants.push(Variant {
                    bandwidth: a.bandwidth.unwrap_or(0),
                    video: None,
                    audio: Some(a),
                });
            }
        }
        (true, true) => {}
    }
    variants
}

/// A representation addressed purely by its BaseURL: one reference covering
/// the whole period.
fn single_reference_index(ctx: &Context) -> HibikiResult<SharedSegmentIndex> {
    let period = &ctx.period_info;
    if !period.duration.is_finite() {
        return Err(HibikiError::MalformedManifest(
            "BaseURL addressing needs a known period duration".to_string(),
        ));
    }
    let reference = SegmentReference::new(
        period.start,
        period.end(),
        static_uris(ctx.base_urls.clone()),
    )?
    .with_append_window(period.start, period.end());
    Ok(SharedSegmentIndex::new_eager(SegmentIndex::new(vec![
        reference,
    ])))
}

pub(crate) fn timeline_entries(timeline: &SegmentTimeline) -> Vec<TimelineEntry> {
    timeline
        .segments
        .iter()
        .map(|s| TimelineEntry {
            t: s.t,
            d: Some(s.d),
            repeat: s.r,
            partial_count: s.k,
        })
        .collect()
}

/// Build an init segment reference from an `Initialization` element.
pub(crate) fn init_reference_from_element(
    ctx: &Context,
    initialization: &Initialization,
    timescale: u64,
) -> HibikiResult<Arc<InitSegmentReference>> {
    let byte_range = initialization
        .range
        .as_ref()
        .map(parse_media_range)
        .transpose()?;
    let uris: UriResolver = match &initialization.sourceURL {
        Some(source) => {
            let bases = ctx.base_urls.clone();
            let source = source.clone();
            Arc::new(move || resolve_against(&bases, &source))
        }
        None => static_uris(ctx.base_urls.clone()),
    };
    Ok(Arc::new(
        InitSegmentReference::new(uris, byte_range, ctx.quality.clone()).with_timescale(timescale),
    ))
}

fn parse_attr<T: ToString>(value: &Option<T>) -> Option<u32> {
    value.as_ref().and_then(|v| v.to_string().parse().ok())
}

fn channel_count<'a>(
    configurations: impl IntoIterator<Item = &'a AudioChannelConfiguration>,
) -> Option<u32> {
    configurations
        .into_iter()
        .next()
        .and_then(|configuration| configuration.value.as_ref())
        .and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> DashParser {
        DashParser::new(HttpClient::default(), DashConfig::default())
    }

    fn mpd_url() -> Url {
        Url::parse("https://example.com/content/manifest.mpd").unwrap()
    }

    async fn parse(parser: &mut DashParser, xml: &str) -> Manifest {
        let mpd = dash_mpd::parse(xml).unwrap();
        parser.parse(&mpd, &mpd_url()).await.unwrap()
    }

    #[tokio::test]
    async fn test_fixed_duration_vod() {
        let manifest = parse(
            &mut parser(),
            r#"<?xml version="1.0" encoding="utf-8"?>
            <MPD type="static" mediaPresentationDuration="PT10S">
              <Period id="p0">
                <AdaptationSet contentType="video" mimeType="video/mp4">
                  <Representation id="v1" bandwidth="1000000" width="1280" height="720">
                    <SegmentTemplate media="v1-$Number$.m4s" duration="4" timescale="1" startNumber="1"/>
                  </Representation>
                </AdaptationSet>
              </Period>
            </MPD>"#,
        )
        .await;

        assert_eq!(manifest.variants.len(), 1);
        let stream = manifest.variants[0].video.as_ref().unwrap();
        stream.create_segment_index().await.unwrap();
        let index = &stream.segment_index;

        // segments [0,4) [4,8) [8,12), numbered from startNumber
        assert_eq!(index.num_references(), 3);
        assert!(index.get(0).is_none());
        let first = index.get(1).unwrap();
        assert_eq!(first.start_time, 0.0);
        assert_eq!(first.uris()[0].as_str(), "https://example.com/content/v1-1.m4s");

        // the final segment is clipped to the presentation end
        let last = index.get(3).unwrap();
        assert_eq!(last.end_time, 10.0);
        assert_eq!(last.true_end_time, 12.0);
        assert!(index.get(4).is_none());
        assert_eq!(index.find(9.0), Some(3));
    }

    #[tokio::test]
    async fn test_timeline_path_and_refresh_merge() {
        let mut parser = parser();
        let manifest = parse(
            &mut parser,
            r#"<?xml version="1.0" encoding="utf-8"?>
            <MPD type="static">
              <Period id="p0">
                <AdaptationSet contentType="video" mimeType="video/mp4">
                  <Representation id="v1" bandwidth="500000">
                    <SegmentTemplate media="v1-$Time$.m4s" timescale="1" startNumber="1">
                      <SegmentTimeline>
                        <S t="0" d="2" r="1"/>
                      </SegmentTimeline>
                    </SegmentTemplate>
                  </Representation>
                </AdaptationSet>
              </Period>
            </MPD>"#,
        )
        .await;

        let stream = manifest.variants[0].video.as_ref().unwrap();
        assert_eq!(stream.segment_index.num_references(), 2);
        let held = stream.segment_index.get(1).unwrap();
        assert_eq!(held.start_time, 2.0);
        assert_eq!(held.uris()[0].as_str(), "https://example.com/content/v1-2.m4s");

        // refresh repeats the last entry and adds two more
        let refreshed = parse(
            &mut parser,
            r#"<?xml version="1.0" encoding="utf-8"?>
            <MPD type="static">
              <Period id="p0">
                <AdaptationSet contentType="video" mimeType="video/mp4">
                  <Representation id="v1" bandwidth="500000">
                    <SegmentTemplate media="v1-$Time$.m4s" timescale="1" startNumber="2">
                      <SegmentTimeline>
                        <S t="2" d="2" r="2"/>
                      </SegmentTimeline>
                    </SegmentTemplate>
                  </Representation>
                </AdaptationSet>
              </Period>
            </MPD>"#,
        )
        .await;

        let stream = refreshed.variants[0].video.as_ref().unwrap();
        assert_eq!(stream.segment_index.num_references(), 4);
        // the reference held across the refresh is still the same object
        assert!(Arc::ptr_eq(&held, &stream.segment_index.get(1).unwrap()));
        assert_eq!(stream.segment_index.get(3).unwrap().start_time, 6.0);
    }

    #[tokio::test]
    async fn test_segment_list() {
        let manifest = parse(
            &mut parser(),
            r#"<?xml version="1.0" encoding="utf-8"?>
            <MPD type="static" mediaPresentationDuration="PT4S">
              <Period id="p0">
                <AdaptationSet contentType="audio" mimeType="audio/mp4" lang="ja">
                  <Representation id="a1" bandwidth="128000">
                    <SegmentList duration="2" timescale="1">
                      <Initialization sourceURL="a1-init.mp4"/>
                      <SegmentURL media="a1-0.m4s" mediaRange="0-999"/>
                      <SegmentURL media="a1-1.m4s"/>
                    </SegmentList>
                  </Representation>
                </AdaptationSet>
              </Period>
            </MPD>"#,
        )
        .await;

        assert_eq!(manifest.variants.len(), 1);
        let stream = manifest.variants[0].audio.as_ref().unwrap();
        assert_eq!(stream.language.as_deref(), Some("ja"));

        let index = &stream.segment_index;
        assert_eq!(index.num_references(), 2);

        let first = index.get(0).unwrap();
        assert_eq!(first.uris()[0].as_str(), "https://example.com/content/a1-0.m4s");
        assert_eq!(first.start_byte, 0);
        assert_eq!(first.end_byte, Some(999));
        let init = first.init.as_ref().unwrap();
        assert_eq!(init.uris()[0].as_str(), "https://example.com/content/a1-init.mp4");

        assert_eq!(index.get(1).unwrap().start_time, 2.0);
    }

    #[tokio::test]
    async fn test_segment_base_defers_resolution() {
        let manifest = parse(
            &mut parser(),
            r#"<?xml version="1.0" encoding="utf-8"?>
            <MPD type="static" mediaPresentationDuration="PT8S">
              <Period id="p0">
                <AdaptationSet contentType="video" mimeType="video/mp4">
                  <Representation id="v1" bandwidth="2000000">
                    <BaseURL>v1.mp4</BaseURL>
                    <SegmentBase indexRange="34-509">
                      <Initialization range="0-33"/>
                    </SegmentBase>
                  </Representation>
                </AdaptationSet>
              </Period>
            </MPD>"#,
        )
        .await;

        let stream = manifest.variants[0].video.as_ref().unwrap();
        // nothing fetched or parsed until create_segment_index
        assert_eq!(stream.segment_index.num_references(), 0);
    }

    #[tokio::test]
    async fn test_multi_period_chaining() {
        let manifest = parse(
            &mut parser(),
            r#"<?xml version="1.0" encoding="utf-8"?>
            <MPD type="static">
              <Period id="p0" duration="PT8S">
                <AdaptationSet contentType="video" mimeType="video/mp4">
                  <Representation id="v1" bandwidth="1000000">
                    <SegmentTemplate media="p0-$Number$.m4s" duration="4" timescale="1"/>
                  </Representation>
                </AdaptationSet>
              </Period>
              <Period id="p1" duration="PT4S">
                <AdaptationSet contentType="video" mimeType="video/mp4">
                  <Representation id="v1" bandwidth="1000000">
                    <SegmentTemplate media="p1-$Number$.m4s" duration="4" timescale="1"/>
                  </Representation>
                </AdaptationSet>
              </Period>
            </MPD>"#,
        )
        .await;

        assert_eq!(manifest.variants.len(), 2);
        let second = manifest.variants[1].video.as_ref().unwrap();
        let reference = second.segment_index.get(1).unwrap();
        // the second period starts where the first ended
        assert_eq!(reference.start_time, 8.0);
        assert_eq!(reference.end_time, 12.0);
    }

    #[tokio::test]
    async fn test_variant_pairing() {
        let manifest = parse(
            &mut parser(),
            r#"<?xml version="1.0" encoding="utf-8"?>
            <MPD type="static" mediaPresentationDuration="PT4S">
              <Period id="p0">
                <AdaptationSet contentType="video" mimeType="video/mp4">
                  <SegmentTemplate media="$RepresentationID$-$Number$.m4s" duration="4" timescale="1"/>
                  <Representation id="v-hi" bandwidth="3000000"/>
                  <Representation id="v-lo" bandwidth="800000"/>
                </AdaptationSet>
                <AdaptationSet contentType="audio" mimeType="audio/mp4">
                  <SegmentTemplate media="$RepresentationID$-$Number$.m4s" duration="4" timescale="1"/>
                  <Representation id="a1" bandwidth="128000"/>
                </AdaptationSet>
              </Period>
            </MPD>"#,
        )
        .await;

        assert_eq!(manifest.variants.len(), 2);
        assert_eq!(manifest.variants[0].bandwidth, 3128000);
        assert_eq!(manifest.variants[1].bandwidth, 928000);

        // the template inherited from the adaptation set resolves per rep
        let hi = manifest.variants[0].video.as_ref().unwrap();
        assert_eq!(
            hi.segment_index.get(1).unwrap().uris()[0].as_str(),
            "https://example.com/content/v-hi-1.m4s"
        );
    }

    #[tokio::test]
    async fn test_text_stream_base_url_addressing() {
        let manifest = parse(
            &mut parser(),
            r#"<?xml version="1.0" encoding="utf-8"?>
            <MPD type="static" mediaPresentationDuration="PT60S">
              <Period id="p0">
                <AdaptationSet contentType="text" mimeType="text/vtt" lang="en">
                  <Representation id="t1" bandwidth="1000">
                    <BaseURL>subs-en.vtt</BaseURL>
                  </Representation>
                </AdaptationSet>
              </Period>
            </MPD>"#,
        )
        .await;

        assert_eq!(manifest.text_streams.len(), 1);
        let index = &manifest.text_streams[0].segment_index;
        assert_eq!(index.num_references(), 1);
        let reference = index.get(0).unwrap();
        assert_eq!(reference.end_time, 60.0);
        assert_eq!(
            reference.uris()[0].as_str(),
            "https://example.com/content/subs-en.vtt"
        );
    }

    #[tokio::test]
    async fn test_broken_text_stream_is_dropped_not_fatal() {
        let manifest = parse(
            &mut parser(),
            r#"<?xml version="1.0" encoding="utf-8"?>
            <MPD type="static" mediaPresentationDuration="PT10S">
              <Period id="p0">
                <AdaptationSet contentType="video" mimeType="video/mp4">
                  <Representation id="v1" bandwidth="1000000">
                    <SegmentTemplate media="v1-$Number$.m4s" duration="5" timescale="1"/>
                  </Representation>
                </AdaptationSet>
                <AdaptationSet contentType="text" mimeType="text/vtt">
                  <Representation id="t1" bandwidth="1000">
                    <SegmentBase/>
                  </Representation>
                </AdaptationSet>
              </Period>
            </MPD>"#,
        )
        .await;

        assert_eq!(manifest.variants.len(), 1);
        assert!(manifest.text_streams.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_template_identifier_fails() {
        let mpd = dash_mpd::parse(
            r#"<?xml version="1.0" encoding="utf-8"?>
            <MPD type="static" mediaPresentationDuration="PT10S">
              <Period id="p0">
                <AdaptationSet contentType="video" mimeType="video/mp4">
                  <Representation id="v1" bandwidth="1000000">
                    <SegmentTemplate media="v1-$Chunk$.m4s" duration="5" timescale="1"/>
                  </Representation>
                </AdaptationSet>
              </Period>
            </MPD>"#,
        )
        .unwrap();

        let result = parser().parse(&mpd, &mpd_url()).await;
        assert!(matches!(
            result,
            Err(HibikiError::UnknownTemplateIdentifier(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_segment_info_fails_av() {
        let mpd = dash_mpd::parse(
            r#"<?xml version="1.0" encoding="utf-8"?>
            <MPD type="static" mediaPresentationDuration="PT10S">
              <Period id="p0">
                <AdaptationSet contentType="video" mimeType="video/mp4">
                  <Representation id="v1" bandwidth="1000000"/>
                </AdaptationSet>
              </Period>
            </MPD>"#,
        )
        .unwrap();

        assert!(parser().parse(&mpd, &mpd_url()).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_releases_indexes() {
        let mut parser = parser();
        let manifest = parse(
            &mut parser,
            r#"<?xml version="1.0" encoding="utf-8"?>
            <MPD type="static" mediaPresentationDuration="PT10S">
              <Period id="p0">
                <AdaptationSet contentType="video" mimeType="video/mp4">
                  <Representation id="v1" bandwidth="1000000">
                    <SegmentTemplate media="v1-$Number$.m4s" duration="5" timescale="1"/>
                  </Representation>
                </AdaptationSet>
              </Period>
            </MPD>"#,
        )
        .await;

        let stream = manifest.variants[0].video.as_ref().unwrap();
        assert_eq!(stream.segment_index.num_references(), 2);

        parser.stop();
        assert!(stream.segment_index.is_released());
        assert_eq!(stream.segment_index.num_references(), 0);
    }
}
