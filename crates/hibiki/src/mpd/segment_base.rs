//! SegmentBase resolution: the index of the representation lives inside the
//! media container itself, referenced by a byte range. Nothing can be built
//! at parse time beyond a recipe; the actual fetch and container parse are
//! deferred until the stream's segment index is first requested.

use std::sync::Arc;

use tracing::warn;

use crate::{
    mpd::{context::Context, init_reference_from_element, url::resolve_against, ResolverArgs},
    registry::{IndexParseContext, IndexParserRegistry},
    segment::{static_uris, InitSegmentReference, SegmentReference, UriResolver},
    util::{
        http::HttpClient,
        range::{parse_media_range, ByteRange},
    },
    HibikiError, HibikiResult,
};

/// The recipe for resolving an in-container index later: which bytes to
/// fetch, which parser to hand them to, and the timing context the produced
/// references inherit.
pub(crate) struct DeferredIndex {
    pub(crate) client: HttpClient,
    pub(crate) registry: Arc<IndexParserRegistry>,
    pub(crate) container: String,
    pub(crate) index_uris: UriResolver,
    pub(crate) index_range: ByteRange,
    pub(crate) needs_init_data: bool,
    pub(crate) init: Option<Arc<InitSegmentReference>>,
    pub(crate) media_uris: UriResolver,
    pub(crate) timestamp_offset: f64,
    pub(crate) append_window_start: f64,
    pub(crate) append_window_end: f64,
    pub(crate) should_fit: bool,
}

impl DeferredIndex {
    pub(crate) async fn resolve(&self) -> HibikiResult<Vec<SegmentReference>> {
        let init_data = if self.needs_init_data {
            let init = self.init.as_ref().ok_or_else(|| {
                HibikiError::MalformedManifest("WebM index without an init segment".to_string())
            })?;
            match &init.data {
                Some(data) => Some(Arc::clone(data)),
                None => {
                    let bytes = self
                        .client
                        .fetch_bytes(&init.uris(), init.byte_range.as_ref())
                        .await?;
                    Some(Arc::new(bytes.to_vec()))
                }
            }
        } else {
            None
        };

        let index_bytes = self
            .client
            .fetch_bytes(&(self.index_uris)(), Some(&self.index_range))
            .await?;

        let parser = self
            .registry
            .lookup(&self.container)
            .ok_or_else(|| HibikiError::UnsupportedContainer(self.container.clone()))?;
        let parse_ctx = IndexParseContext {
            index_start: self.index_range.start,
            uris: Arc::clone(&self.media_uris),
            init: self.init.clone(),
            timestamp_offset: self.timestamp_offset,
            append_window_start: self.append_window_start,
            append_window_end: self.append_window_end,
        };
        parser.parse(
            init_data.as_ref().map(|data| data.as_slice()),
            &index_bytes,
            &parse_ctx,
        )
    }

    pub(crate) fn fit_window(&self) -> Option<(f64, f64)> {
        self.should_fit
            .then_some((self.append_window_start, self.append_window_end))
    }
}

pub(crate) fn resolve(args: &ResolverArgs) -> HibikiResult<DeferredIndex> {
    let ctx = args.ctx;

    let container = ctx.container().unwrap_or("mp4").to_string();
    if container != "mp4" && container != "webm" {
        return Err(HibikiError::UnsupportedContainer(container));
    }

    let timescale = ctx.inherit_base(|sb| sb.timescale).unwrap_or(1).max(1);
    let presentation_time_offset = ctx
        .inherit_base(|sb| sb.presentationTimeOffset)
        .unwrap_or(0);
    let timestamp_offset =
        ctx.period_info.start - presentation_time_offset as f64 / timescale as f64;

    let index_range_attr = ctx.inherit_base(|sb| sb.indexRange.as_ref());
    let representation_index = ctx.inherit_base(|sb| sb.RepresentationIndex.as_ref());
    let child_range = representation_index.and_then(|ri| ri.range.as_ref());
    if index_range_attr.is_some() && child_range.is_some() {
        warn!("Both @indexRange and a RepresentationIndex range are present, using the child");
    }
    let range_attr = child_range.or(index_range_attr).ok_or_else(|| {
        HibikiError::MalformedManifest("SegmentBase requires an index range".to_string())
    })?;
    let index_range = parse_media_range(range_attr)?;

    let media_uris = static_uris(ctx.base_urls.clone());
    let index_uris = match representation_index.and_then(|ri| ri.sourceURL.clone()) {
        Some(source) => {
            let bases = ctx.base_urls.clone();
            Arc::new(move || resolve_against(&bases, &source)) as UriResolver
        }
        None => Arc::clone(&media_uris),
    };

    let init = build_init_reference(ctx, timescale)?;
    if container == "webm" && init.is_none() {
        return Err(HibikiError::MalformedManifest(
            "WebM SegmentBase requires an Initialization element".to_string(),
        ));
    }

    Ok(DeferredIndex {
        client: args.client.clone(),
        registry: Arc::clone(args.registry),
        needs_init_data: container == "webm",
        container,
        index_uris,
        index_range,
        init,
        media_uris,
        timestamp_offset,
        append_window_start: ctx.period_info.start,
        append_window_end: ctx.period_info.end(),
        should_fit: ctx.should_fit(),
    })
}

fn build_init_reference(
    ctx: &Context,
    timescale: u64,
) -> HibikiResult<Option<Arc<InitSegmentReference>>> {
    ctx.inherit_base(|sb| sb.initialization.as_ref())
        .map(|initialization| init_reference_from_element(ctx, initialization, timescale))
        .transpose()
}
