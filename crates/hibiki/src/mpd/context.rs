//! Inheritance frames.
//!
//! Segment addressing elements and their attributes may sit on the Period,
//! the AdaptationSet or the Representation; the nearest ancestor wins
//! ([DASH] 5.3.9.1). A [`Context`] snapshots all three levels for one
//! representation so the resolvers can do that lookup without holding the
//! whole document.

use dash_mpd::{SegmentBase, SegmentList, SegmentTemplate};
use url::Url;

use crate::{manifest::ContentType, segment::QualityInfo};

/// The addressing-relevant children of one hierarchy level.
#[derive(Default, Clone, Copy)]
pub(crate) struct Frame<'a> {
    pub segment_base: Option<&'a SegmentBase>,
    pub segment_list: Option<&'a SegmentList>,
    pub segment_template: Option<&'a SegmentTemplate>,
}

#[derive(Debug, Clone)]
pub(crate) struct PeriodInfo {
    pub id: Option<String>,
    /// Presentation-time start, seconds.
    pub start: f64,
    /// Seconds; infinite for the open final period of a live stream.
    pub duration: f64,
    pub is_last: bool,
}

impl PeriodInfo {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

pub(crate) struct Context<'a> {
    pub period: Frame<'a>,
    pub adaptation_set: Frame<'a>,
    pub representation: Frame<'a>,

    pub period_info: PeriodInfo,
    /// Base URLs merged down to the representation level, in rotation order.
    pub base_urls: Vec<Url>,
    pub representation_id: Option<String>,
    pub bandwidth: Option<u64>,
    pub mime_type: Option<String>,
    pub content_type: ContentType,
    pub language: Option<String>,
    pub quality: QualityInfo,
    pub dynamic: bool,
}

impl<'a> Context<'a> {
    /// Innermost first.
    fn frames(&self) -> [Frame<'a>; 3] {
        [self.representation, self.adaptation_set, self.period]
    }

    pub fn segment_base(&self) -> Option<&'a SegmentBase> {
        self.frames().into_iter().find_map(|f| f.segment_base)
    }

    pub fn segment_list(&self) -> Option<&'a SegmentList> {
        self.frames().into_iter().find_map(|f| f.segment_list)
    }

    pub fn segment_template(&self) -> Option<&'a SegmentTemplate> {
        self.frames().into_iter().find_map(|f| f.segment_template)
    }

    /// Nearest ancestor's SegmentBase attribute or child.
    pub fn inherit_base<T>(&self, get: impl Fn(&'a SegmentBase) -> Option<T>) -> Option<T> {
        self.frames()
            .into_iter()
            .filter_map(|f| f.segment_base)
            .find_map(get)
    }

    pub fn inherit_list<T>(&self, get: impl Fn(&'a SegmentList) -> Option<T>) -> Option<T> {
        self.frames()
            .into_iter()
            .filter_map(|f| f.segment_list)
            .find_map(get)
    }

    pub fn inherit_template<T>(&self, get: impl Fn(&'a SegmentTemplate) -> Option<T>) -> Option<T> {
        self.frames()
            .into_iter()
            .filter_map(|f| f.segment_template)
            .find_map(get)
    }

    /// The container half of the mime type, e.g. "mp4" for "video/mp4".
    pub fn container(&self) -> Option<&str> {
        self.mime_type
            .as_deref()
            .and_then(|mime| mime.split('/').nth(1))
    }

    /// Whether the segment collection may be fitted to the period bounds.
    /// An infinite live period or the last period of a dynamic presentation
    /// is still growing; fitting would clip the in-progress final segment.
    pub fn should_fit(&self) -> bool {
        !(self.dynamic && (self.period_info.duration.is_infinite() || self.period_info.is_last))
    }
}
