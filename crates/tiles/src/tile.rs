use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

use crate::TileCoord;
use crate::layers::LayerId;
use crate::lifecycle::{TileLifecycle, TileState};

/// A point of interest attached to a tile while it loads.
#[derive(Debug, Clone, PartialEq)]
pub struct TileObject {
    /// World position.
    pub x: i32,
    pub y: i32,
    pub layer: LayerId,
    pub label: String,
}

#[derive(Debug, Default)]
pub struct TileContent<P> {
    pub payload: P,
    pub objects: Vec<TileObject>,
}

impl<P: Default> TileContent<P> {
    pub fn reset(&mut self) {
        self.payload = P::default();
        self.objects.clear();
    }
}

/// One reusable grid slot.
///
/// Coordinates and flags are atomics so the window and the worker can read
/// them without locking. The content sits behind its own lock: the worker
/// holds it for writing while a load or recycle is in progress, so a reader
/// never sees a half-populated payload.
#[derive(Debug)]
pub struct Tile<P> {
    slot: usize,
    origin_x: AtomicI32,
    origin_y: AtomicI32,
    generation: AtomicU32,
    lifecycle: TileLifecycle,
    load_failed: AtomicBool,
    content: RwLock<TileContent<P>>,
}

impl<P: Default> Tile<P> {
    pub(crate) fn new(slot: usize) -> Self {
        Self {
            slot,
            origin_x: AtomicI32::new(0),
            origin_y: AtomicI32::new(0),
            generation: AtomicU32::new(0),
            lifecycle: TileLifecycle::new(),
            load_failed: AtomicBool::new(false),
            content: RwLock::new(TileContent::default()),
        }
    }

    /// Prepares a free tile for `origin` and returns the new generation.
    pub(crate) fn activate(&self, origin: TileCoord) -> u32 {
        {
            let mut content = self.write_content();
            content.reset();
        }
        self.load_failed.store(false, Ordering::Relaxed);
        self.origin_x.store(origin.x, Ordering::Relaxed);
        self.origin_y.store(origin.y, Ordering::Relaxed);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        self.lifecycle
            .advance(TileState::Free, TileState::PendingLoad)
            .unwrap_or_else(|state| panic!("acquired tile {} was {state:?}", self.slot));
        generation
    }

    pub(crate) fn recycle(&self) {
        {
            let mut content = self.write_content();
            content.reset();
        }
        self.load_failed.store(false, Ordering::Relaxed);
        self.lifecycle
            .advance(TileState::PendingRecycle, TileState::Free)
            .unwrap_or_else(|state| panic!("recycled tile {} was {state:?}", self.slot));
    }

    pub(crate) fn force_reset(&self) {
        {
            let mut content = self.write_content();
            content.reset();
        }
        self.load_failed.store(false, Ordering::Relaxed);
        self.lifecycle.force_free();
    }
}

impl<P> Tile<P> {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn origin(&self) -> TileCoord {
        TileCoord {
            x: self.origin_x.load(Ordering::Relaxed),
            y: self.origin_y.load(Ordering::Relaxed),
        }
    }

    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn state(&self) -> TileState {
        self.lifecycle.state()
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == TileState::Loaded
    }

    /// Loaded, but the loader failed and the content is empty.
    pub fn load_failed(&self) -> bool {
        self.load_failed.load(Ordering::Relaxed)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, TileContent<P>> {
        self.content.read().expect("tile content lock poisoned")
    }

    /// Like [`Tile::read`] but gives up instead of waiting on a load in progress.
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, TileContent<P>>> {
        match self.content.try_read() {
            Ok(guard) => Some(guard),
            Err(TryLockError::WouldBlock) => None,
            Err(TryLockError::Poisoned(_)) => panic!("tile content lock poisoned"),
        }
    }

    pub(crate) fn write_content(&self) -> RwLockWriteGuard<'_, TileContent<P>> {
        self.content.write().expect("tile content lock poisoned")
    }

    pub(crate) fn lifecycle(&self) -> &TileLifecycle {
        &self.lifecycle
    }

    pub(crate) fn set_load_failed(&self, failed: bool) {
        self.load_failed.store(failed, Ordering::Relaxed);
    }
}
