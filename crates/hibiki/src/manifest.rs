//! The assembled manifest surface handed to consumers.
//!
//! A [`Manifest`] pairs audio and video [`Stream`]s into variants and keeps
//! text and image streams alongside. Each stream owns one
//! [`SharedSegmentIndex`]; representations whose index lives inside the
//! container (SegmentBase, index templates) only materialize it when
//! [`Stream::create_segment_index`] is awaited.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use serde::Serialize;

use crate::{
    index::{IndexVariant, SegmentIndex, SharedSegmentIndex},
    mpd::segment_base::DeferredIndex,
    presentation::PresentationTimeline,
    segment::QualityInfo,
    HibikiResult,
};

pub const MANIFEST_TYPE_DASH: &str = "DASH";

/// RFC 6838 top-level media type of a representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContentType {
    Video,
    Audio,
    Text,
    Image,
    Application,
    Unknown,
}

impl ContentType {
    /// `@contentType` wins over the mime type when both are present.
    pub fn detect(content_type: Option<&str>, mime_type: Option<&str>) -> Self {
        let tag = content_type
            .or_else(|| mime_type.and_then(|mime| mime.split('/').next()))
            .unwrap_or_default();
        match tag {
            "video" => Self::Video,
            "audio" => Self::Audio,
            "text" => Self::Text,
            "image" => Self::Image,
            "application" => Self::Application,
            _ => Self::Unknown,
        }
    }

    /// Text and image representations are optional content: their manifest
    /// errors drop the representation instead of failing the parse.
    pub fn is_optional(&self) -> bool {
        matches!(self, Self::Text | Self::Image | Self::Application)
    }
}

pub(crate) enum IndexSource {
    /// The index was built (or merged) during the manifest walk.
    Ready,
    /// The index lives in the container; resolution needs byte fetches.
    Deferred(DeferredIndex),
}

pub struct Stream {
    pub id: Option<String>,
    pub content_type: ContentType,
    pub mime_type: Option<String>,
    pub codecs: Option<String>,
    pub language: Option<String>,
    pub bandwidth: Option<u64>,
    pub quality: QualityInfo,
    pub segment_index: SharedSegmentIndex,
    pub(crate) source: IndexSource,
    created: AtomicBool,
}

impl Stream {
    pub(crate) fn new(
        id: Option<String>,
        content_type: ContentType,
        mime_type: Option<String>,
        codecs: Option<String>,
        language: Option<String>,
        bandwidth: Option<u64>,
        quality: QualityInfo,
        segment_index: SharedSegmentIndex,
        source: IndexSource,
    ) -> Self {
        Self {
            id,
            content_type,
            mime_type,
            codecs,
            language,
            bandwidth,
            quality,
            segment_index,
            source,
            created: AtomicBool::new(false),
        }
    }

    /// Make `segment_index` usable. For in-container indexes this fetches
    /// the init and index bytes and runs the registered container parser;
    /// for everything else the index already exists and this resolves
    /// immediately. Idempotent on success; a failed resolution may be
    /// retried.
    pub async fn create_segment_index(&self) -> HibikiResult<()> {
        let IndexSource::Deferred(deferred) = &self.source else {
            return Ok(());
        };
        if self.created.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let references = match deferred.resolve().await {
            Ok(references) => references,
            Err(e) => {
                self.created.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let mut index = SegmentIndex::new(references);
        if let Some((window_start, window_end)) = deferred.fit_window() {
            index.fit(window_start, window_end);
        }
        self.segment_index
            .with_variant(|variant| *variant = IndexVariant::Eager(index));
        Ok(())
    }
}

pub struct Variant {
    pub video: Option<Arc<Stream>>,
    pub audio: Option<Arc<Stream>>,
    /// Sum of the paired streams' bandwidths.
    pub bandwidth: u64,
}

pub struct Manifest {
    pub presentation_timeline: Arc<Mutex<PresentationTimeline>>,
    pub variants: Vec<Variant>,
    pub text_streams: Vec<Arc<Stream>>,
    pub image_streams: Vec<Arc<Stream>>,
    pub manifest_type: &'static str,
}

impl Manifest {
    fn streams(&self) -> impl Iterator<Item = &Arc<Stream>> {
        self.variants
            .iter()
            .flat_map(|variant| variant.video.iter().chain(variant.audio.iter()))
            .chain(self.text_streams.iter())
            .chain(self.image_streams.iter())
    }

    /// Tear down every segment index. Safe to call more than once and while
    /// regeneration ticks are pending.
    pub fn release(&self) {
        for stream in self.streams() {
            stream.segment_index.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_detection() {
        assert_eq!(ContentType::detect(Some("video"), None), ContentType::Video);
        assert_eq!(ContentType::detect(None, Some("audio/mp4")), ContentType::Audio);
        assert_eq!(ContentType::detect(None, Some("text/vtt")), ContentType::Text);
        assert_eq!(ContentType::detect(Some("image"), Some("image/jpeg")), ContentType::Image);
        assert_eq!(ContentType::detect(None, None), ContentType::Unknown);
        assert!(ContentType::Text.is_optional());
        assert!(!ContentType::Video.is_optional());
    }
}
