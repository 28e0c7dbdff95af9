//! Position-stable segment collections.
//!
//! A [`SegmentIndex`] is an ordered sequence of segment references addressed
//! by *global position*: `position = local index + num_evicted`. Eviction
//! drops leading references without renumbering the survivors, so positions
//! handed to a consumer stay valid across live manifest updates.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::debug;

use crate::{segment::SegmentReference, timeline_index::TimelineSegmentIndex};

/// Tolerance when deciding whether a merged reference replaces an existing
/// one; manifest times re-derived on refresh wobble below this.
const MERGE_TOLERANCE_SECONDS: f64 = 1.0 / 15.0;

#[derive(Default)]
pub struct SegmentIndex {
    references: Vec<Arc<SegmentReference>>,
    num_evicted: u64,
}

impl SegmentIndex {
    pub fn new(references: Vec<SegmentReference>) -> Self {
        Self::with_start_position(references, 0)
    }

    /// An index whose first reference sits at `start_position` instead of 0.
    /// The fixed-duration template numbers positions from `startNumber`, and
    /// a live join may begin well past it.
    pub fn with_start_position(references: Vec<SegmentReference>, start_position: u64) -> Self {
        Self {
            references: references.into_iter().map(Arc::new).collect(),
            num_evicted: start_position,
        }
    }

    pub fn num_references(&self) -> u64 {
        self.references.len() as u64
    }

    pub fn num_evicted(&self) -> u64 {
        self.num_evicted
    }

    /// Global position one past the newest reference.
    pub fn end_position(&self) -> u64 {
        self.num_evicted + self.references.len() as u64
    }

    pub fn get(&self, position: u64) -> Option<Arc<SegmentReference>> {
        let index = position.checked_sub(self.num_evicted)? as usize;
        self.references.get(index).cloned()
    }

    /// Map a presentation time to a global position. A time inside a gap
    /// between references maps to the following reference.
    pub fn find(&self, time: f64) -> Option<u64> {
        for (i, reference) in self.references.iter().enumerate() {
            if time < reference.start_time {
                return if i == 0 { None } else { Some(self.num_evicted + i as u64) };
            }
            if time < reference.end_time {
                return Some(self.num_evicted + i as u64);
            }
        }
        None
    }

    /// Replace the tail of this index with `new_references`: existing
    /// references starting at or after the first new one are dropped, then
    /// the new list is appended.
    pub fn merge(&mut self, new_references: Vec<SegmentReference>) {
        let Some(first_new) = new_references.first() else {
            debug!("Nothing to merge into the segment index");
            return;
        };

        let cut = self
            .references
            .iter()
            .position(|r| r.start_time >= first_new.start_time - MERGE_TOLERANCE_SECONDS)
            .unwrap_or(self.references.len());
        self.references.truncate(cut);
        self.references
            .extend(new_references.into_iter().map(Arc::new));
    }

    /// Drop leading references whose end precedes `time`, advancing the
    /// eviction counter so later positions keep their meaning.
    pub fn evict(&mut self, time: f64) {
        let count = self
            .references
            .iter()
            .take_while(|r| r.end_time <= time)
            .count();
        if count > 0 {
            self.references.drain(..count);
            self.num_evicted += count as u64;
        }
    }

    pub fn merge_and_evict(&mut self, new_references: Vec<SegmentReference>, availability_start: f64) {
        self.merge(new_references);
        self.evict(availability_start);
    }

    /// Constrain the index to an append window: references fully outside it
    /// are dropped (front drops count as evictions) and the final reference's
    /// playable end is clipped, leaving `true_end_time` intact.
    pub fn fit(&mut self, window_start: f64, window_end: f64) {
        while let Some(last) = self.references.last() {
            if last.start_time >= window_end {
                self.references.pop();
            } else {
                break;
            }
        }
        self.evict(window_start);
        if let Some(last) = self.references.last_mut() {
            if last.end_time > window_end {
                Arc::make_mut(last).clip_end(window_end);
            }
        }
    }

    /// Tag every reference as a thumbnail grid. Image representations
    /// without explicit tiling are a 1x1 grid.
    pub(crate) fn set_tiles_layout(&mut self, layout: &str) {
        for reference in &mut self.references {
            let reference = Arc::make_mut(reference);
            if reference.tiles_layout.is_none() {
                reference.tile_duration = Some(reference.true_end_time - reference.start_time);
                reference.tiles_layout = Some(layout.to_string());
            }
        }
    }

    pub fn release(&mut self) {
        self.references.clear();
    }
}

/// The two index shapes a stream can own. Timeline-driven representations
/// need incremental append/evict with lazily built references; everything
/// else materializes eagerly.
pub enum IndexVariant {
    Eager(SegmentIndex),
    Timeline(TimelineSegmentIndex),
}

impl IndexVariant {
    fn get(&mut self, position: u64) -> Option<Arc<SegmentReference>> {
        match self {
            Self::Eager(index) => index.get(position),
            Self::Timeline(index) => index.get(position),
        }
    }

    fn find(&self, time: f64) -> Option<u64> {
        match self {
            Self::Eager(index) => index.find(time),
            Self::Timeline(index) => index.find(time),
        }
    }

    fn num_references(&self) -> u64 {
        match self {
            Self::Eager(index) => index.num_references(),
            Self::Timeline(index) => index.num_references(),
        }
    }

    fn num_evicted(&self) -> u64 {
        match self {
            Self::Eager(index) => index.num_evicted(),
            Self::Timeline(index) => index.num_evicted(),
        }
    }

    fn release(&mut self) {
        match self {
            Self::Eager(index) => index.release(),
            Self::Timeline(index) => index.release(),
        }
    }
}

/// Whether a regeneration tick wants to keep running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateTick {
    Continue,
    /// Nothing left to produce; no further ticks will fire.
    Done,
}

/// Shared, single-writer handle to a stream's segment index. Consumers hold
/// clones; the manifest driver mutates through the same lock, so `notify`
/// ratchets and regeneration ticks never race.
#[derive(Clone)]
pub struct SharedSegmentIndex {
    inner: Arc<Mutex<IndexVariant>>,
    released: Arc<AtomicBool>,
    timer: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SharedSegmentIndex {
    pub fn new_eager(index: SegmentIndex) -> Self {
        Self::from_variant(IndexVariant::Eager(index))
    }

    pub fn new_timeline(index: TimelineSegmentIndex) -> Self {
        Self::from_variant(IndexVariant::Timeline(index))
    }

    fn from_variant(variant: IndexVariant) -> Self {
        Self {
            inner: Arc::new(Mutex::new(variant)),
            released: Arc::new(AtomicBool::new(false)),
            timer: Arc::new(Mutex::new(None)),
        }
    }

    pub fn get(&self, position: u64) -> Option<Arc<SegmentReference>> {
        self.inner.lock().unwrap().get(position)
    }

    pub fn find(&self, time: f64) -> Option<u64> {
        self.inner.lock().unwrap().find(time)
    }

    pub fn num_references(&self) -> u64 {
        self.inner.lock().unwrap().num_references()
    }

    pub fn num_evicted(&self) -> u64 {
        self.inner.lock().unwrap().num_evicted()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Idempotent teardown: stops any regeneration timer and empties the
    /// index. Safe to call while a tick is pending; the tick becomes a no-op.
    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
        if let Some(timer) = self.timer.lock().unwrap().take() {
            timer.abort();
        }
        self.inner.lock().unwrap().release();
    }

    pub(crate) fn with_variant<R>(&self, f: impl FnOnce(&mut IndexVariant) -> R) -> R {
        f(&mut self.inner.lock().unwrap())
    }

    /// Run `tick` every `period` until it reports [`UpdateTick::Done`] or the
    /// index is released. Ticks run to completion under the index lock, one
    /// at a time. Used by the fixed-duration live path to evict and extend.
    pub(crate) fn update_every<F>(&self, period: Duration, mut tick: F)
    where
        F: FnMut(&mut IndexVariant) -> UpdateTick + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let released = Arc::clone(&self.released);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick of a tokio interval fires immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                if released.load(Ordering::SeqCst) {
                    break;
                }
                let done = {
                    let mut guard = inner.lock().unwrap();
                    matches!(tick(&mut guard), UpdateTick::Done)
                };
                if done {
                    debug!("Segment index regeneration finished");
                    break;
                }
            }
        });

        if let Some(previous) = self.timer.lock().unwrap().replace(handle) {
            previous.abort();
        }
    }
}
