//! Loader doubles shared by this crate's tests and downstream test suites.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    LayerId, LayerKind, LayerRegistry, LoadError, LoadRequest, TileContent, TileCoord, TileLoader,
    TileObject,
};

/// Payload written by [`RecordingLoader`]: which tile it was loaded for and
/// how many times this slot's content has been (re)built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordedPayload {
    pub origin: Option<TileCoord>,
    pub revision: u32,
    pub layer_rebuilds: u32,
}

/// Counts loads and attaches one marker object per tile at a fixed offset
/// from the tile origin.
#[derive(Debug)]
pub struct RecordingLoader {
    layers: LayerRegistry,
    terrain: LayerId,
    markers: LayerId,
    marker_offset: Option<(i32, i32)>,
    loads: AtomicUsize,
    layer_loads: AtomicUsize,
    updates: AtomicUsize,
    failing: Mutex<HashSet<TileCoord>>,
    panicking: Mutex<HashSet<TileCoord>>,
}

impl Default for RecordingLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingLoader {
    pub fn new() -> Self {
        let mut layers = LayerRegistry::new();
        let terrain = layers.register("terrain", LayerKind::Image);
        let markers = layers.register("markers", LayerKind::Icon);
        Self {
            layers,
            terrain,
            markers,
            marker_offset: None,
            loads: AtomicUsize::new(0),
            layer_loads: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            failing: Mutex::new(HashSet::new()),
            panicking: Mutex::new(HashSet::new()),
        }
    }

    /// Attach a marker at `origin + offset` to every loaded tile.
    pub fn with_markers(mut self, offset_x: i32, offset_y: i32) -> Self {
        self.marker_offset = Some((offset_x, offset_y));
        self
    }

    pub fn terrain_layer(&self) -> LayerId {
        self.terrain
    }

    pub fn marker_layer(&self) -> LayerId {
        self.markers
    }

    pub fn fail_at(&self, origin: TileCoord) {
        self.failing
            .lock()
            .expect("failing set lock poisoned")
            .insert(origin);
    }

    pub fn stop_failing_at(&self, origin: TileCoord) {
        self.failing
            .lock()
            .expect("failing set lock poisoned")
            .remove(&origin);
    }

    pub fn panic_at(&self, origin: TileCoord) {
        self.panicking
            .lock()
            .expect("panicking set lock poisoned")
            .insert(origin);
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn layer_load_count(&self) -> usize {
        self.layer_loads.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

impl TileLoader for RecordingLoader {
    type Payload = RecordedPayload;

    fn layers(&self) -> &LayerRegistry {
        &self.layers
    }

    fn load(
        &self,
        request: LoadRequest,
        content: &mut TileContent<Self::Payload>,
    ) -> Result<(), LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let origin = request.origin;
        if self
            .panicking
            .lock()
            .expect("panicking set lock poisoned")
            .contains(&origin)
        {
            panic!("recording loader told to panic at {origin:?}");
        }
        content.payload.origin = Some(origin);
        content.payload.revision += 1;
        if let Some((offset_x, offset_y)) = self.marker_offset {
            content.objects.push(TileObject {
                x: origin.x + offset_x,
                y: origin.y + offset_y,
                layer: self.markers,
                label: format!("marker {},{}", origin.x, origin.y),
            });
        }
        if self
            .failing
            .lock()
            .expect("failing set lock poisoned")
            .contains(&origin)
        {
            return Err(LoadError::new(origin, "recording loader told to fail"));
        }
        Ok(())
    }

    fn load_layer(
        &self,
        request: LoadRequest,
        layer: LayerId,
        content: &mut TileContent<Self::Payload>,
    ) -> Result<(), LoadError> {
        self.layer_loads.fetch_add(1, Ordering::SeqCst);
        if layer != self.terrain {
            return Err(LoadError::new(request.origin, "only terrain rebuilds per layer"));
        }
        content.payload.layer_rebuilds += 1;
        Ok(())
    }

    fn update(&self, _time: f32) {
        self.updates.fetch_add(1, Ordering::SeqCst);
    }
}
