//! # hibiki
//!
//! An MPEG-DASH manifest-to-segment-timeline engine: given a pre-parsed MPD
//! (via the `dash-mpd` crate), it produces per-representation, time-ordered
//! [`SegmentReference`] collections a downloader can fetch.
//!
//! The interesting part is everything between the manifest and the segment
//! list:
//!
//! * the three mutually exclusive DASH addressing schemes — explicit lists
//!   (`SegmentList`), templates driven by a duration or a `SegmentTimeline`
//!   (`SegmentTemplate`), and binary in-container indexes (`SegmentBase`) —
//!   each resolved through "nearest ancestor wins" attribute inheritance;
//! * expansion of the compact `SegmentTimeline` run-length grammar into
//!   concrete time ranges;
//! * availability-window tracking for dynamic manifests, with clock sync
//!   against the MPD's `UTCTiming` sources;
//! * position-stable segment indexes that merge and evict across manifest
//!   refreshes without invalidating positions a consumer already holds;
//! * the two binary container index parsers (ISO-BMFF `sidx`, WebM Cues)
//!   behind one container-agnostic contract.
//!
//! Fetching the manifest document, retry policy, DRM and playback are out
//! of scope; the only network operations performed here are container index
//! byte fetches and clock sync requests, both through [`HttpClient`].
//!
//! ```no_run
//! # async fn run() -> hibiki::HibikiResult<()> {
//! use hibiki::{DashConfig, DashParser, HttpClient};
//! use url::Url;
//!
//! let mpd_url = Url::parse("https://example.com/live/manifest.mpd")?;
//! # let manifest_xml = String::new();
//! let mpd = dash_mpd::parse(&manifest_xml)?;
//!
//! let mut parser = DashParser::new(HttpClient::default(), DashConfig::default());
//! let manifest = parser.parse(&mpd, &mpd_url).await?;
//!
//! for variant in &manifest.variants {
//!     if let Some(video) = &variant.video {
//!         video.create_segment_index().await?;
//!         let index = &video.segment_index;
//!         if let Some(position) = index.find(0.0) {
//!             let reference = index.get(position).unwrap();
//!             println!("{:?} bytes {:?}", reference.uris(), reference.byte_range());
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod index;
pub mod manifest;
pub mod mpd;
pub mod presentation;
pub mod reader;
pub mod registry;
pub mod segment;
pub mod sidx;
pub mod template;
pub mod timeline;
pub mod timeline_index;
pub mod util;
pub mod webm;

pub use error::{HibikiError, HibikiResult};
pub use index::{SegmentIndex, SharedSegmentIndex};
pub use manifest::{ContentType, Manifest, Stream, Variant, MANIFEST_TYPE_DASH};
pub use mpd::{DashConfig, DashParser};
pub use presentation::PresentationTimeline;
pub use registry::{ContainerIndexParser, IndexParserRegistry};
pub use segment::{
    InitSegmentReference, MediaKey, QualityInfo, SegmentReference, SegmentStatus, UriResolver,
};
pub use timeline::TimeRange;
pub use timeline_index::TimelineSegmentIndex;
pub use util::{http::HttpClient, range::ByteRange};
