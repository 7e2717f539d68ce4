use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::*;
use crate::test_support::{RecordedPayload, RecordingLoader};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);
const TILE: i32 = 256;

fn small_config(initial_capacity: usize) -> PoolConfig {
    PoolConfig {
        tile_size: TILE,
        initial_capacity,
        ..PoolConfig::default()
    }
}

fn create_pool(initial_capacity: usize) -> TilePool<RecordingLoader> {
    TilePool::new(small_config(initial_capacity), RecordingLoader::new().with_markers(10, 20))
        .expect("TilePool::new")
}

fn start_and_settle(pool: &TilePool<RecordingLoader>) {
    pool.start().expect("start tile pool worker");
    assert!(pool.wait_settled(SETTLE_TIMEOUT), "tile pool did not settle");
}

fn coord(column: i32, row: i32) -> TileCoord {
    TileCoord::new(column * TILE, row * TILE)
}

#[test]
fn containing_rounds_toward_negative_infinity() {
    assert_eq!(
        TileCoord::containing(1000, 1000, 256),
        TileCoord::new(768, 768)
    );
    assert_eq!(
        TileCoord::containing(-1, -257, 256),
        TileCoord::new(-256, -512)
    );
    assert_eq!(TileCoord::containing(512, 0, 256), TileCoord::new(512, 0));
    assert!(TileCoord::new(768, 768).contains(1000, 1023, 256));
    assert!(!TileCoord::new(768, 768).contains(1024, 1000, 256));
    assert_eq!(
        TileCoord::new(0, 0).step(2, -1, 256),
        TileCoord::new(512, -256)
    );
}

#[test]
fn config_validation_rejects_bad_values() {
    let tile_size = PoolConfig {
        tile_size: 300,
        ..PoolConfig::default()
    };
    assert_eq!(
        tile_size.validate(),
        Err(PoolConfigError::TileSizeNotPowerOfTwo(300))
    );

    let capacity = PoolConfig {
        initial_capacity: 3,
        ..PoolConfig::default()
    };
    assert_eq!(
        capacity.validate(),
        Err(PoolConfigError::CapacityNotPowerOfTwo(3))
    );

    let max_below = PoolConfig {
        initial_capacity: 16,
        max_capacity: Some(8),
        ..PoolConfig::default()
    };
    assert_eq!(
        max_below.validate(),
        Err(PoolConfigError::MaxBelowInitial {
            initial: 16,
            max: 8
        })
    );

    let yield_every = PoolConfig {
        load_yield_every: 0,
        ..PoolConfig::default()
    };
    assert_eq!(
        yield_every.validate(),
        Err(PoolConfigError::LoadYieldEveryZero)
    );
    assert!(PoolConfig::default().validate().is_ok());
}

#[test]
fn fifth_acquire_doubles_a_pool_of_four() {
    let pool = create_pool(4);
    let tiles = (0..5)
        .map(|column| pool.acquire(coord(column, 0)).expect("acquire"))
        .collect::<Vec<_>>();

    assert_eq!(
        pool.stats(),
        PoolStats {
            capacity: 8,
            free: 3,
            pending_load: 5,
            pending_recycle: 0,
        }
    );
    for tile in &tiles {
        assert_eq!(tile.state(), TileState::PendingLoad);
        assert!(tile.is_active());
        assert!(!tile.is_loaded());
    }
}

#[test]
fn capacity_grows_monotonically_in_powers_of_two() {
    let pool = create_pool(1);
    let mut previous = pool.capacity();
    let mut tiles = Vec::new();
    for column in 0..33 {
        tiles.push(pool.acquire(coord(column, 0)).expect("acquire"));
        let capacity = pool.capacity();
        assert!(capacity.is_power_of_two());
        assert!(capacity >= previous);
        previous = capacity;
    }
    assert_eq!(pool.capacity(), 64);
}

#[test]
fn growth_stops_at_max_capacity() {
    let config = PoolConfig {
        max_capacity: Some(4),
        ..small_config(2)
    };
    let pool = TilePool::new(config, RecordingLoader::new()).expect("TilePool::new");
    let mut tiles = Vec::new();
    for column in 0..4 {
        tiles.push(pool.acquire(coord(column, 0)).expect("acquire"));
    }

    assert_eq!(
        pool.acquire(coord(4, 0)).err(),
        Some(PoolError::Exhausted { capacity: 4 })
    );
    assert_eq!(pool.capacity(), 4);
}

#[test]
fn release_before_load_never_exposes_a_payload() {
    let pool = create_pool(4);
    let tile = pool.acquire(coord(1, 1)).expect("acquire");
    pool.release(&tile);

    assert_eq!(tile.state(), TileState::PendingRecycle);
    assert!(!tile.is_active());
    assert_eq!(tile.read().payload, RecordedPayload::default());

    start_and_settle(&pool);

    assert_eq!(pool.loader().load_count(), 0);
    assert_eq!(tile.state(), TileState::Free);
    assert_eq!(tile.read().payload, RecordedPayload::default());
    assert!(tile.read().objects.is_empty());
    assert_eq!(pool.free_len(), pool.capacity());
}

#[test]
fn worker_loads_acquired_tiles() {
    let pool = create_pool(8);
    let origins = [coord(0, 0), coord(1, 0), coord(-1, 2)];
    let tiles = origins
        .iter()
        .map(|origin| pool.acquire(*origin).expect("acquire"))
        .collect::<Vec<_>>();

    start_and_settle(&pool);

    for (tile, origin) in tiles.iter().zip(origins) {
        assert!(tile.is_loaded());
        assert!(!tile.load_failed());
        let content = tile.read();
        assert_eq!(content.payload.origin, Some(origin));
        assert_eq!(content.payload.revision, 1);
        assert_eq!(content.objects.len(), 1);
        assert_eq!(content.objects[0].x, origin.x + 10);
        assert_eq!(content.objects[0].y, origin.y + 20);
    }
    assert_eq!(pool.free_len(), 5);
    assert_eq!(pool.pending_load_len(), 0);
}

#[test]
fn released_tiles_are_reset_and_freed() {
    let pool = create_pool(4);
    let tile = pool.acquire(coord(3, 3)).expect("acquire");
    start_and_settle(&pool);
    assert!(tile.is_loaded());

    pool.release(&tile);
    assert!(pool.wait_settled(SETTLE_TIMEOUT));

    assert_eq!(tile.state(), TileState::Free);
    assert!(tile.read().objects.is_empty());
    assert_eq!(tile.read().payload, RecordedPayload::default());
    assert_eq!(pool.free_len(), 4);
}

#[test]
fn reacquired_slot_loads_for_its_new_origin() {
    let pool = create_pool(1);
    let first = pool.acquire(coord(0, 0)).expect("acquire");
    pool.release(&first);
    start_and_settle(&pool);

    let second = pool.acquire(coord(1, 0)).expect("acquire");
    assert!(Arc::ptr_eq(&first, &second));
    assert!(pool.wait_settled(SETTLE_TIMEOUT));

    assert_eq!(pool.loader().load_count(), 1);
    assert_eq!(second.read().payload.origin, Some(coord(1, 0)));
    assert!(second.generation() > 1);
}

#[test]
fn drain_listeners_fire_once_per_batch() {
    let pool = create_pool(8);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    pool.add_listener(Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    let signal = DrainSignal::new();
    pool.add_listener(Arc::new(signal.clone()));

    let tiles = (0..4)
        .map(|column| pool.acquire(coord(column, 0)).expect("acquire"))
        .collect::<Vec<_>>();
    pool.start().expect("start tile pool worker");

    assert!(signal.wait_timeout(SETTLE_TIMEOUT));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(tiles.iter().all(|tile| tile.is_loaded()));
    std::thread::sleep(Duration::from_millis(20));
    assert!(!signal.try_take());

    pool.release(&tiles[0]);
    assert!(signal.wait_timeout(SETTLE_TIMEOUT));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn failed_load_leaves_tile_loaded_but_empty() {
    let pool = create_pool(4);
    let origin = coord(2, 0);
    pool.loader().fail_at(origin);
    let tile = pool.acquire(origin).expect("acquire");
    start_and_settle(&pool);

    assert!(tile.is_loaded());
    assert!(tile.load_failed());
    assert!(tile.read().objects.is_empty());
    assert_eq!(tile.read().payload, RecordedPayload::default());

    pool.loader().stop_failing_at(origin);
    assert!(pool.repaint(&tile));
    assert!(!tile.load_failed());
    assert_eq!(tile.read().payload.origin, Some(origin));
    assert_eq!(tile.read().objects.len(), 1);
}

#[test]
fn panicking_loader_does_not_stop_the_worker() {
    let pool = create_pool(4);
    let bad = coord(0, 0);
    pool.loader().panic_at(bad);
    let bad_tile = pool.acquire(bad).expect("acquire");
    let good_tile = pool.acquire(coord(1, 0)).expect("acquire");
    start_and_settle(&pool);

    assert!(pool.is_running());
    assert!(bad_tile.is_loaded());
    assert!(bad_tile.load_failed());
    assert!(good_tile.is_loaded());
    assert!(!good_tile.load_failed());

    let late_tile = pool.acquire(coord(2, 0)).expect("acquire");
    assert!(pool.wait_settled(SETTLE_TIMEOUT));
    assert!(late_tile.is_loaded());
}

#[test]
fn repaint_layer_rebuilds_only_the_requested_layer() {
    let pool = create_pool(4);
    let tile = pool.acquire(coord(0, 1)).expect("acquire");
    start_and_settle(&pool);
    let terrain = pool.loader().terrain_layer();
    let markers = pool.loader().marker_layer();

    assert!(pool.repaint_layer(&tile, terrain));
    assert_eq!(tile.read().payload.layer_rebuilds, 1);
    assert_eq!(tile.read().payload.revision, 1);

    assert!(!pool.repaint_layer(&tile, markers));
    assert!(tile.load_failed());
    assert!(tile.read().objects.is_empty());
    assert_eq!(pool.loader().layer_load_count(), 2);
}

#[test]
fn repaint_skips_tiles_that_are_not_loaded() {
    let pool = create_pool(4);
    let tile = pool.acquire(coord(0, 0)).expect("acquire");

    assert!(!pool.repaint(&tile));
    assert_eq!(pool.loader().load_count(), 0);
}

#[test]
fn tick_reaches_the_loader() {
    let pool = create_pool(1);
    pool.tick(0.5);
    pool.tick(1.0);
    assert_eq!(pool.loader().update_count(), 2);
}

#[test]
fn stop_returns_every_tile_to_free() {
    let pool = create_pool(4);
    let tiles = (0..6)
        .map(|column| pool.acquire(coord(column, 0)).expect("acquire"))
        .collect::<Vec<_>>();
    start_and_settle(&pool);
    pool.release(&tiles[0]);
    pool.release(&tiles[1]);

    pool.stop();

    assert!(!pool.is_running());
    assert_eq!(pool.capacity(), 8);
    assert_eq!(pool.free_len(), pool.capacity());
    assert_eq!(pool.pending_load_len(), 0);
    assert_eq!(pool.pending_recycle_len(), 0);
    for tile in &tiles {
        assert!(!tile.is_active());
        assert!(!tile.is_loaded());
        assert!(tile.read().objects.is_empty());
    }
    assert_eq!(pool.acquire(coord(0, 0)).err(), Some(PoolError::ShutDown));
}

#[test]
fn release_after_stop_is_ignored() {
    let pool = create_pool(2);
    let tile = pool.acquire(coord(0, 0)).expect("acquire");
    pool.stop();

    pool.release(&tile);

    assert_eq!(pool.pending_recycle_len(), 0);
    assert_eq!(pool.free_len(), 2);
}

#[test]
fn pool_restarts_after_stop() {
    let pool = create_pool(2);
    pool.start().expect("start");
    pool.stop();
    pool.start().expect("restart");

    let tile = pool.acquire(coord(0, 0)).expect("acquire after restart");
    assert!(pool.wait_settled(SETTLE_TIMEOUT));
    assert!(tile.is_loaded());
}
