use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(u16);

impl LayerId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// How a layer's content changes over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// Rasterised once per load.
    Image,
    /// Redrawn every frame from tile data.
    Live,
    /// Point objects attached to the tile.
    Icon,
}

#[derive(Debug)]
struct LayerEntry {
    name: String,
    kind: LayerKind,
    visible: AtomicBool,
}

/// The named layers a loader populates, each with a visibility switch that
/// can be flipped from any thread.
#[derive(Debug, Default)]
pub struct LayerRegistry {
    layers: Vec<LayerEntry>,
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, kind: LayerKind) -> LayerId {
        let index: u16 = self
            .layers
            .len()
            .try_into()
            .expect("layer registry exceeds u16 ids");
        self.layers.push(LayerEntry {
            name: name.into(),
            kind,
            visible: AtomicBool::new(true),
        });
        LayerId(index)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<LayerId> {
        self.layers
            .iter()
            .position(|layer| layer.name == name)
            .map(|index| LayerId(index as u16))
    }

    /// First layer of the given kind.
    pub fn find_kind(&self, kind: LayerKind) -> Option<LayerId> {
        self.layers
            .iter()
            .position(|layer| layer.kind == kind)
            .map(|index| LayerId(index as u16))
    }

    pub fn name(&self, layer: LayerId) -> Option<&str> {
        self.layers.get(layer.index()).map(|entry| entry.name.as_str())
    }

    pub fn kind(&self, layer: LayerId) -> Option<LayerKind> {
        self.layers.get(layer.index()).map(|entry| entry.kind)
    }

    /// Unknown layers count as hidden.
    pub fn is_visible(&self, layer: LayerId) -> bool {
        self.layers
            .get(layer.index())
            .is_some_and(|entry| entry.visible.load(Ordering::Relaxed))
    }

    pub fn set_visible(&self, layer: LayerId, visible: bool) -> bool {
        let Some(entry) = self.layers.get(layer.index()) else {
            return false;
        };
        entry.visible.store(visible, Ordering::Relaxed);
        true
    }

    pub fn ids(&self) -> impl Iterator<Item = LayerId> + '_ {
        (0..self.layers.len()).map(|index| LayerId(index as u16))
    }
}

#[cfg(test)]
mod tests {
    use super::{LayerKind, LayerRegistry};

    #[test]
    fn lookup_by_name_and_kind() {
        let mut registry = LayerRegistry::new();
        let terrain = registry.register("terrain", LayerKind::Image);
        let grid = registry.register("grid", LayerKind::Live);
        let markers = registry.register("markers", LayerKind::Icon);

        assert_eq!(registry.find("grid"), Some(grid));
        assert_eq!(registry.find_kind(LayerKind::Image), Some(terrain));
        assert_eq!(registry.find_kind(LayerKind::Icon), Some(markers));
        assert_eq!(registry.find("roads"), None);
        assert_eq!(registry.name(markers), Some("markers"));
        assert_eq!(registry.ids().count(), 3);
    }

    #[test]
    fn visibility_toggles_per_layer() {
        let mut registry = LayerRegistry::new();
        let terrain = registry.register("terrain", LayerKind::Image);
        let markers = registry.register("markers", LayerKind::Icon);

        assert!(registry.is_visible(markers));
        assert!(registry.set_visible(markers, false));
        assert!(!registry.is_visible(markers));
        assert!(registry.is_visible(terrain));
    }
}
