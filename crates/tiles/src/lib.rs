//! Reusable tile slots for a streamed 2-D grid.
//!
//! A [`TilePool`] owns every [`Tile`] ever created for one world view and moves
//! them between a free queue, a pending-load queue and a pending-recycle queue.
//! A single background worker drains the two pending queues so payload
//! population never runs on the caller's thread.

use std::time::Duration;

use serde::Deserialize;

mod layers;
mod lifecycle;
mod listener;
mod pool;
mod tile;
mod worker;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_support;

pub use layers::{LayerId, LayerKind, LayerRegistry};
pub use lifecycle::{TileLifecycle, TileState};
pub use listener::{DrainListener, DrainSignal};
pub use pool::{PoolStats, TilePool};
pub use tile::{Tile, TileContent, TileObject};

pub const DEFAULT_TILE_SIZE: i32 = 512;
pub const DEFAULT_INITIAL_CAPACITY: usize = 1024;
pub const DEFAULT_IDLE_POLL_MILLIS: u64 = 2;
pub const DEFAULT_LOAD_YIELD_EVERY: u32 = 10;
pub const DEFAULT_LOAD_YIELD_MILLIS: u64 = 1;

/// World-space origin of a tile. Both components are multiples of the pool's
/// tile size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
}

impl TileCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Origin of the tile that contains the world point `(x, y)`.
    ///
    /// Rounds toward negative infinity, so `-1` lands in the tile at `-tile_size`.
    pub fn containing(x: i32, y: i32, tile_size: i32) -> Self {
        assert!(tile_size > 0, "tile_size must be positive");
        Self {
            x: x.div_euclid(tile_size) * tile_size,
            y: y.div_euclid(tile_size) * tile_size,
        }
    }

    /// The origin `columns` tiles to the right and `rows` tiles down.
    pub fn step(self, columns: i32, rows: i32, tile_size: i32) -> Self {
        Self {
            x: self.x + columns * tile_size,
            y: self.y + rows * tile_size,
        }
    }

    pub fn contains(self, x: i32, y: i32, tile_size: i32) -> bool {
        x >= self.x && y >= self.y && x - self.x < tile_size && y - self.y < tile_size
    }
}

/// Arguments handed to a [`TileLoader`] for one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadRequest {
    pub origin: TileCoord,
    pub tile_size: i32,
}

/// Produces tile payloads. Runs on the pool's worker thread.
///
/// Implementations must not keep references to the content past the call and
/// must tolerate being called again on a reset tile.
pub trait TileLoader: Send + Sync + 'static {
    type Payload: Default + Send + Sync + 'static;

    fn layers(&self) -> &LayerRegistry;

    fn load(
        &self,
        request: LoadRequest,
        content: &mut TileContent<Self::Payload>,
    ) -> Result<(), LoadError>;

    /// Rebuilds one layer of an already loaded tile. Defaults to a full reload.
    fn load_layer(
        &self,
        request: LoadRequest,
        layer: LayerId,
        content: &mut TileContent<Self::Payload>,
    ) -> Result<(), LoadError> {
        let _ = layer;
        content.reset();
        self.load(request, content)
    }

    /// Advances time-driven layers. Called from the caller's frame loop.
    fn update(&self, time: f32) {
        let _ = time;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub tile_size: i32,
    pub initial_capacity: usize,
    /// Upper bound for pool growth. `None` lets the pool double without limit.
    pub max_capacity: Option<usize>,
    pub idle_poll_millis: u64,
    pub load_yield_every: u32,
    pub load_yield_millis: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            max_capacity: None,
            idle_poll_millis: DEFAULT_IDLE_POLL_MILLIS,
            load_yield_every: DEFAULT_LOAD_YIELD_EVERY,
            load_yield_millis: DEFAULT_LOAD_YIELD_MILLIS,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), PoolConfigError> {
        if self.tile_size <= 0 || !(self.tile_size as u32).is_power_of_two() {
            return Err(PoolConfigError::TileSizeNotPowerOfTwo(self.tile_size));
        }
        if !self.initial_capacity.is_power_of_two() {
            return Err(PoolConfigError::CapacityNotPowerOfTwo(
                self.initial_capacity,
            ));
        }
        if let Some(max_capacity) = self.max_capacity {
            if !max_capacity.is_power_of_two() {
                return Err(PoolConfigError::CapacityNotPowerOfTwo(max_capacity));
            }
            if max_capacity < self.initial_capacity {
                return Err(PoolConfigError::MaxBelowInitial {
                    initial: self.initial_capacity,
                    max: max_capacity,
                });
            }
        }
        if self.load_yield_every == 0 {
            return Err(PoolConfigError::LoadYieldEveryZero);
        }
        Ok(())
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_millis)
    }

    pub fn load_yield(&self) -> Duration {
        Duration::from_millis(self.load_yield_millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolConfigError {
    #[error("tile size {0} must be a positive power of two")]
    TileSizeNotPowerOfTwo(i32),
    #[error("pool capacity {0} must be a power of two")]
    CapacityNotPowerOfTwo(usize),
    #[error("max capacity {max} is below initial capacity {initial}")]
    MaxBelowInitial { initial: usize, max: usize },
    #[error("load_yield_every must be at least 1")]
    LoadYieldEveryZero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("tile pool is shut down")]
    ShutDown,
    #[error("tile pool reached its capacity limit of {capacity} tiles")]
    Exhausted { capacity: usize },
    #[error("tile pool could not grow to {requested} tiles")]
    GrowthFailed { requested: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("tile load failed at ({}, {}): {reason}", .origin.x, .origin.y)]
pub struct LoadError {
    pub origin: TileCoord,
    pub reason: String,
}

impl LoadError {
    pub fn new(origin: TileCoord, reason: impl Into<String>) -> Self {
        Self {
            origin,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests;
