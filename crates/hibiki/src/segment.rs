use std::{fmt, sync::Arc};

use serde::Serialize;
use url::Url;

use crate::{util::range::ByteRange, HibikiError, HibikiResult};

/// Lazily resolves the URIs of a segment against the current base URI set.
/// Base URIs rotate under content steering, so resolution happens at fetch
/// time rather than at manifest parse time.
pub type UriResolver = Arc<dyn Fn() -> Vec<Url> + Send + Sync>;

pub fn static_uris(uris: Vec<Url>) -> UriResolver {
    Arc::new(move || uris.clone())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentStatus {
    #[default]
    Available,
    Unavailable,
    Missing,
}

/// Denormalized rendition description, carried on init segment references
/// so consumers can log or report what they are fetching.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualityInfo {
    pub bandwidth: Option<u64>,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub codecs: Option<String>,
    pub frame_rate: Option<String>,
    pub audio_sampling_rate: Option<u32>,
    pub channel_count: Option<u32>,
}

/// AES key material attached to references. Decryption itself happens
/// downstream; only the material travels with the segment model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKey {
    Aes128 { key: [u8; 16], iv: [u8; 16] },
}

impl MediaKey {
    /// Build AES-128 material from a hex key and an optional `0x`-prefixed
    /// hex IV. A missing IV defaults to zero.
    pub fn aes_128(hex_key: &str, iv: Option<&str>) -> HibikiResult<Self> {
        let key: [u8; 16] = hex::decode(hex_key)?
            .try_into()
            .map_err(HibikiError::InvalidAes128Key)?;
        let iv = match iv {
            Some(iv) => {
                let iv = iv.strip_prefix("0x").unwrap_or(iv);
                u128::from_str_radix(iv, 16)
                    .map_err(|_| HibikiError::InvalidAes128Key(iv.as_bytes().to_vec()))?
                    .to_be_bytes()
            }
            None => [0u8; 16],
        };
        Ok(Self::Aes128 { key, iv })
    }
}

/// Describes the initialization segment of one representation generation.
/// Shared by reference across every media segment of that generation.
#[derive(Clone)]
pub struct InitSegmentReference {
    uris: UriResolver,
    pub byte_range: Option<ByteRange>,
    /// Pre-fetched bytes, populated when the engine had to read the init
    /// segment itself (WebM index resolution).
    pub data: Option<Arc<Vec<u8>>>,
    pub quality: QualityInfo,
    pub timescale: Option<u64>,
    pub key: Option<Arc<MediaKey>>,
}

impl InitSegmentReference {
    pub fn new(uris: UriResolver, byte_range: Option<ByteRange>, quality: QualityInfo) -> Self {
        Self {
            uris,
            byte_range,
            data: None,
            quality,
            timescale: None,
            key: None,
        }
    }

    pub fn with_data(mut self, data: Arc<Vec<u8>>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_timescale(mut self, timescale: u64) -> Self {
        self.timescale = Some(timescale);
        self
    }

    pub fn with_key(mut self, key: Arc<MediaKey>) -> Self {
        self.key = Some(key);
        self
    }

    pub fn uris(&self) -> Vec<Url> {
        (self.uris)()
    }
}

impl fmt::Debug for InitSegmentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitSegmentReference")
            .field("byte_range", &self.byte_range)
            .field("quality", &self.quality)
            .field("timescale", &self.timescale)
            .finish_non_exhaustive()
    }
}

/// One media segment: its presentation-time span and how to retrieve it.
///
/// Immutable once constructed, with two exceptions: partial references can be
/// marked non-independent, and `end_time` can be clipped to the append window
/// (`true_end_time` keeps the unclipped value).
#[derive(Clone)]
pub struct SegmentReference {
    pub start_time: f64,
    pub end_time: f64,
    /// `end_time` before append-window fitting.
    pub true_end_time: f64,
    uris: UriResolver,
    pub start_byte: u64,
    /// Inclusive; `None` reads to the end of the resource.
    pub end_byte: Option<u64>,
    pub init: Option<Arc<InitSegmentReference>>,
    pub timestamp_offset: f64,
    pub append_window_start: f64,
    pub append_window_end: f64,
    /// Low-latency sub-segments, in decode order.
    pub partial: Vec<SegmentReference>,
    /// False for partial segments that cannot be decoded without their
    /// predecessors.
    pub independent: bool,
    /// Thumbnail grid layout (image streams), e.g. `"5x4"`.
    pub tiles_layout: Option<String>,
    pub tile_duration: Option<f64>,
    pub sync_time: Option<f64>,
    pub status: SegmentStatus,
    pub key: Option<Arc<MediaKey>>,
}

impl SegmentReference {
    pub fn new(start_time: f64, end_time: f64, uris: UriResolver) -> HibikiResult<Self> {
        if start_time >= end_time {
            return Err(HibikiError::InvalidSegmentReference(start_time, end_time));
        }
        Ok(Self {
            start_time,
            end_time,
            true_end_time: end_time,
            uris,
            start_byte: 0,
            end_byte: None,
            init: None,
            timestamp_offset: 0.0,
            append_window_start: 0.0,
            append_window_end: f64::INFINITY,
            partial: Vec::new(),
            independent: true,
            tiles_layout: None,
            tile_duration: None,
            sync_time: None,
            status: SegmentStatus::Available,
            key: None,
        })
    }

    pub fn with_byte_range(mut self, start_byte: u64, end_byte: Option<u64>) -> Self {
        self.start_byte = start_byte;
        self.end_byte = end_byte;
        self
    }

    pub fn with_init(mut self, init: Arc<InitSegmentReference>) -> Self {
        self.init = Some(init);
        self
    }

    pub fn with_timestamp_offset(mut self, offset: f64) -> Self {
        self.timestamp_offset = offset;
        self
    }

    pub fn with_append_window(mut self, start: f64, end: f64) -> Self {
        self.append_window_start = start;
        self.append_window_end = end;
        self
    }

    pub fn with_partial(mut self, partial: Vec<SegmentReference>) -> Self {
        self.partial = partial;
        self
    }

    pub fn with_tiles(mut self, layout: String, tile_duration: f64) -> Self {
        self.tiles_layout = Some(layout);
        self.tile_duration = Some(tile_duration);
        self
    }

    pub fn with_sync_time(mut self, sync_time: f64) -> Self {
        self.sync_time = Some(sync_time);
        self
    }

    pub fn with_status(mut self, status: SegmentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_key(mut self, key: Arc<MediaKey>) -> Self {
        self.key = Some(key);
        self
    }

    pub fn uris(&self) -> Vec<Url> {
        (self.uris)()
    }

    pub fn byte_range(&self) -> ByteRange {
        ByteRange::new(self.start_byte, self.end_byte)
    }

    pub fn mark_non_independent(&mut self) {
        self.independent = false;
    }

    /// Clip the playable end to the append window. `true_end_time` is not
    /// touched, so re-fitting after a window change stays lossless.
    pub(crate) fn clip_end(&mut self, window_end: f64) {
        if self.end_time > window_end {
            self.end_time = window_end;
        }
    }
}

impl fmt::Debug for SegmentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentReference")
            .field("start_time", &self.start_time)
            .field("end_time", &self.end_time)
            .field("start_byte", &self.start_byte)
            .field("end_byte", &self.end_byte)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}
