//! Container index parser registry.
//!
//! Parsers are keyed by container name and carry a priority, so an
//! application can override the built-in parsers without touching process
//! state: the registry is plain data injected at parser construction.

use std::sync::Arc;

use crate::{
    segment::{InitSegmentReference, SegmentReference, UriResolver},
    sidx, webm, HibikiError, HibikiResult,
};

pub const PRIORITY_FALLBACK: u8 = 1;
pub const PRIORITY_PREFERRED: u8 = 2;
pub const PRIORITY_APPLICATION: u8 = 3;

/// Everything a container index parser needs besides the raw bytes.
pub struct IndexParseContext {
    /// Offset of the first index byte within the media resource.
    pub index_start: u64,
    pub uris: UriResolver,
    pub init: Option<Arc<InitSegmentReference>>,
    pub timestamp_offset: f64,
    pub append_window_start: f64,
    pub append_window_end: f64,
}

/// Turns container bytes into an ordered segment reference list. Both
/// built-in parsers (ISO-BMFF `sidx`, WebM Cues) share this contract so
/// SegmentBase resolution stays container-agnostic.
pub trait ContainerIndexParser: Send + Sync {
    /// `init_data` carries the representation's init segment bytes when the
    /// format needs them (WebM); it is `None` for self-describing indexes.
    fn parse(
        &self,
        init_data: Option<&[u8]>,
        index_data: &[u8],
        ctx: &IndexParseContext,
    ) -> HibikiResult<Vec<SegmentReference>>;
}

struct RegistryEntry {
    container: String,
    priority: u8,
    parser: Arc<dyn ContainerIndexParser>,
}

pub struct IndexParserRegistry {
    entries: Vec<RegistryEntry>,
}

impl IndexParserRegistry {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// The built-in parsers, at preferred priority.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("mp4", PRIORITY_PREFERRED, Arc::new(Mp4SidxParser));
        registry.register("webm", PRIORITY_PREFERRED, Arc::new(WebmCuesParser));
        registry
    }

    pub fn register(
        &mut self,
        container: impl Into<String>,
        priority: u8,
        parser: Arc<dyn ContainerIndexParser>,
    ) {
        self.entries.push(RegistryEntry {
            container: container.into(),
            priority,
            parser,
        });
    }

    /// Highest priority wins; among equals, the latest registration.
    pub fn lookup(&self, container: &str) -> Option<Arc<dyn ContainerIndexParser>> {
        self.entries
            .iter()
            .rev()
            .filter(|entry| entry.container == container)
            .max_by_key(|entry| entry.priority)
            .map(|entry| Arc::clone(&entry.parser))
    }
}

impl Default for IndexParserRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

struct Mp4SidxParser;

impl ContainerIndexParser for Mp4SidxParser {
    fn parse(
        &self,
        _init_data: Option<&[u8]>,
        index_data: &[u8],
        ctx: &IndexParseContext,
    ) -> HibikiResult<Vec<SegmentReference>> {
        sidx::parse_sidx(index_data, ctx)
    }
}

struct WebmCuesParser;

impl ContainerIndexParser for WebmCuesParser {
    fn parse(
        &self,
        init_data: Option<&[u8]>,
        index_data: &[u8],
        ctx: &IndexParseContext,
    ) -> HibikiResult<Vec<SegmentReference>> {
        let init_data = init_data.ok_or_else(|| {
            HibikiError::InvalidIndex("WebM cues need the init segment bytes".to_string())
        })?;
        webm::parse_cues(init_data, index_data, ctx)
    }
}
