//! Deterministic stand-in for a real tile source.
//!
//! Terrain is hashed from world coordinates so neighbouring tiles line up,
//! landmarks are scattered per tile, and a time-driven weather layer follows
//! the frame clock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use tiles::{
    LayerId, LayerKind, LayerRegistry, LoadError, LoadRequest, TileContent, TileLoader, TileObject,
};

pub const SAMPLES_PER_EDGE: usize = 16;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TerrainPatch {
    /// Row-major elevation samples, `SAMPLES_PER_EDGE` squared.
    pub elevation: Vec<u16>,
    pub cloud_cover: f32,
}

impl TerrainPatch {
    pub fn sample_at(&self, local_x: i32, local_y: i32, tile_size: i32) -> Option<u16> {
        if self.elevation.is_empty() || local_x < 0 || local_y < 0 {
            return None;
        }
        let step = (tile_size as usize / SAMPLES_PER_EDGE).max(1);
        let column = local_x as usize / step;
        let row = local_y as usize / step;
        if column >= SAMPLES_PER_EDGE || row >= SAMPLES_PER_EDGE {
            return None;
        }
        self.elevation.get(row * SAMPLES_PER_EDGE + column).copied()
    }
}

#[derive(Debug)]
pub struct SyntheticLoader {
    seed: u64,
    load_delay: Duration,
    layers: LayerRegistry,
    weather: LayerId,
    landmarks: LayerId,
    clock_bits: AtomicU32,
}

impl SyntheticLoader {
    pub fn new(seed: u64, load_delay: Duration) -> Self {
        let mut layers = LayerRegistry::new();
        layers.register("terrain", LayerKind::Image);
        let weather = layers.register("weather", LayerKind::Live);
        let landmarks = layers.register("landmarks", LayerKind::Icon);
        Self {
            seed,
            load_delay,
            layers,
            weather,
            landmarks,
            clock_bits: AtomicU32::new(0),
        }
    }

    pub fn weather_layer(&self) -> LayerId {
        self.weather
    }

    fn clock(&self) -> f32 {
        f32::from_bits(self.clock_bits.load(Ordering::Relaxed))
    }

    fn fill_terrain(&self, request: LoadRequest, patch: &mut TerrainPatch) {
        let step = (request.tile_size / SAMPLES_PER_EDGE as i32).max(1);
        patch.elevation.clear();
        patch.elevation.reserve(SAMPLES_PER_EDGE * SAMPLES_PER_EDGE);
        for row in 0..SAMPLES_PER_EDGE as i32 {
            for column in 0..SAMPLES_PER_EDGE as i32 {
                let x = request.origin.x + column * step;
                let y = request.origin.y + row * step;
                patch.elevation.push((self.hash(x, y) >> 48) as u16);
            }
        }
    }

    fn fill_weather(&self, request: LoadRequest, patch: &mut TerrainPatch) {
        let phase = (self.hash(request.origin.x, request.origin.y) % 628) as f32 / 100.0;
        patch.cloud_cover = 0.5 + 0.5 * (self.clock() * 0.25 + phase).sin();
    }

    fn place_landmarks(&self, request: LoadRequest, objects: &mut Vec<TileObject>) {
        let hash = self.hash(request.origin.x, request.origin.y);
        let count = (hash % 3) as usize;
        let size = request.tile_size.max(1) as u64;
        for index in 0..count {
            let spot = hash.rotate_left(17 * (index as u32 + 1));
            objects.push(TileObject {
                x: request.origin.x + (spot % size) as i32,
                y: request.origin.y + ((spot >> 32) % size) as i32,
                layer: self.landmarks,
                label: format!("landmark {:04x}", spot & 0xffff),
            });
        }
    }

    fn hash(&self, x: i32, y: i32) -> u64 {
        let mut value = self.seed
            ^ (u64::from(x as u32) << 32)
            ^ u64::from(y as u32).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        value = (value ^ (value >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        value = (value ^ (value >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        value ^ (value >> 31)
    }
}

impl TileLoader for SyntheticLoader {
    type Payload = TerrainPatch;

    fn layers(&self) -> &LayerRegistry {
        &self.layers
    }

    fn load(
        &self,
        request: LoadRequest,
        content: &mut TileContent<Self::Payload>,
    ) -> Result<(), LoadError> {
        if !self.load_delay.is_zero() {
            thread::sleep(self.load_delay);
        }
        self.fill_terrain(request, &mut content.payload);
        self.fill_weather(request, &mut content.payload);
        self.place_landmarks(request, &mut content.objects);
        Ok(())
    }

    fn load_layer(
        &self,
        request: LoadRequest,
        layer: LayerId,
        content: &mut TileContent<Self::Payload>,
    ) -> Result<(), LoadError> {
        match self.layers.kind(layer) {
            Some(LayerKind::Live) => self.fill_weather(request, &mut content.payload),
            Some(LayerKind::Image) => self.fill_terrain(request, &mut content.payload),
            Some(LayerKind::Icon) => {
                content.objects.retain(|object| object.layer != layer);
                self.place_landmarks(request, &mut content.objects);
            }
            None => {
                return Err(LoadError::new(request.origin, format!("unknown layer {layer:?}")));
            }
        }
        Ok(())
    }

    fn update(&self, time: f32) {
        self.clock_bits.store(time.to_bits(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use tiles::TileCoord;

    use super::*;

    fn request(x: i32, y: i32) -> LoadRequest {
        LoadRequest {
            origin: TileCoord::new(x, y),
            tile_size: 256,
        }
    }

    #[test]
    fn loads_are_deterministic_and_stay_inside_the_tile() {
        let loader = SyntheticLoader::new(7, Duration::ZERO);
        let mut first = TileContent::<TerrainPatch>::default();
        let mut second = TileContent::<TerrainPatch>::default();
        for origin in [(0, 0), (-256, 512), (4096, -4096)] {
            first.reset();
            second.reset();
            loader
                .load(request(origin.0, origin.1), &mut first)
                .expect("load");
            loader
                .load(request(origin.0, origin.1), &mut second)
                .expect("load");
            assert_eq!(first.payload, second.payload);
            assert_eq!(first.objects, second.objects);
            assert_eq!(
                first.payload.elevation.len(),
                SAMPLES_PER_EDGE * SAMPLES_PER_EDGE
            );
            let tile = TileCoord::new(origin.0, origin.1);
            assert!(
                first
                    .objects
                    .iter()
                    .all(|object| tile.contains(object.x, object.y, 256))
            );
        }
    }

    #[test]
    fn landmark_rebuild_replaces_only_landmarks() {
        let loader = SyntheticLoader::new(3, Duration::ZERO);
        let mut content = TileContent::<TerrainPatch>::default();
        let landmarks = loader.layers().find("landmarks").expect("landmarks layer");
        let mut origin = 0;
        loop {
            content.reset();
            loader.load(request(origin, 0), &mut content).expect("load");
            if !content.objects.is_empty() {
                break;
            }
            origin += 256;
        }
        let objects = content.objects.clone();

        loader
            .load_layer(request(origin, 0), landmarks, &mut content)
            .expect("landmark layer");

        assert_eq!(content.objects, objects);
    }

    #[test]
    fn weather_follows_the_clock() {
        let loader = SyntheticLoader::new(7, Duration::ZERO);
        let mut content = TileContent::<TerrainPatch>::default();
        loader.load(request(0, 0), &mut content).expect("load");
        let before = content.payload.cloud_cover;
        let elevation = content.payload.elevation.clone();

        loader.update(6.0);
        loader
            .load_layer(request(0, 0), loader.weather_layer(), &mut content)
            .expect("weather layer");

        assert_ne!(content.payload.cloud_cover, before);
        assert_eq!(content.payload.elevation, elevation);
        assert!((0.0..=1.0).contains(&content.payload.cloud_cover));
    }

    #[test]
    fn samples_map_local_coordinates() {
        let loader = SyntheticLoader::new(1, Duration::ZERO);
        let mut content = TileContent::<TerrainPatch>::default();
        loader.load(request(0, 0), &mut content).expect("load");
        let patch = &content.payload;
        assert_eq!(patch.sample_at(0, 0, 256), Some(patch.elevation[0]));
        assert_eq!(
            patch.sample_at(255, 17, 256),
            Some(patch.elevation[SAMPLES_PER_EDGE + 15])
        );
        assert_eq!(patch.sample_at(256, 0, 256), None);
    }
}
