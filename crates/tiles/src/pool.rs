use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use crossbeam_queue::SegQueue;
use tracing::{debug, error, info, warn};

use crate::layers::{LayerId, LayerRegistry};
use crate::listener::DrainListener;
use crate::tile::Tile;
use crate::worker;
use crate::{LoadError, LoadRequest, PoolConfig, PoolConfigError, PoolError, TileCoord, TileLoader};

const SETTLE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Queue sizes at one instant. Only consistent with each other while the
/// worker is idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub capacity: usize,
    pub free: usize,
    pub pending_load: usize,
    pub pending_recycle: usize,
}

pub(crate) struct LoadTicket<P> {
    pub(crate) tile: Arc<Tile<P>>,
    pub(crate) generation: u32,
}

pub(crate) struct PoolShared<L: TileLoader> {
    pub(crate) config: PoolConfig,
    pub(crate) loader: L,
    slots: RwLock<Vec<Arc<Tile<L::Payload>>>>,
    capacity: AtomicUsize,
    pub(crate) free: SegQueue<Arc<Tile<L::Payload>>>,
    pub(crate) pending_load: SegQueue<LoadTicket<L::Payload>>,
    pub(crate) pending_recycle: SegQueue<Arc<Tile<L::Payload>>>,
    // Held while any tile content is being written by the pool.
    queue_lock: Mutex<()>,
    listeners: RwLock<Vec<Arc<dyn DrainListener>>>,
    wake_sender: Sender<()>,
    pub(crate) wake_receiver: Receiver<()>,
    pub(crate) stop_requested: AtomicBool,
    accepting: AtomicBool,
    in_flight: AtomicUsize,
}

impl<L: TileLoader> PoolShared<L> {
    pub(crate) fn lock_queue(&self) -> MutexGuard<'_, ()> {
        self.queue_lock.lock().expect("tile queue lock poisoned")
    }

    pub(crate) fn request_for(&self, tile: &Tile<L::Payload>) -> LoadRequest {
        LoadRequest {
            origin: tile.origin(),
            tile_size: self.config.tile_size,
        }
    }

    pub(crate) fn wake(&self) {
        match self.wake_sender.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => panic!("tile pool wake channel disconnected"),
        }
    }

    pub(crate) fn finish_item(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Runs one loader call, turning errors and panics into `false`.
    pub(crate) fn run_loader<F>(&self, origin: TileCoord, load: F) -> bool
    where
        F: FnOnce() -> Result<(), LoadError>,
    {
        match panic::catch_unwind(AssertUnwindSafe(load)) {
            Ok(Ok(())) => true,
            Ok(Err(error)) => {
                warn!(%error, "tile left empty after failed load");
                false
            }
            Err(payload) => {
                error!(
                    x = origin.x,
                    y = origin.y,
                    panic = panic_message(payload.as_ref()),
                    "tile loader panicked"
                );
                false
            }
        }
    }

    pub(crate) fn notify_drained(&self) {
        let listeners = self
            .listeners
            .read()
            .expect("tile pool listener lock poisoned")
            .clone();
        for listener in listeners {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener.tiles_drained()))
            {
                error!(
                    panic = panic_message(payload.as_ref()),
                    "drain listener panicked"
                );
            }
        }
    }

    fn grow(&self) -> Result<(), PoolError> {
        let mut slots = self.slots.write().expect("tile pool slot lock poisoned");
        if !self.free.is_empty() {
            return Ok(());
        }
        let capacity = slots.len();
        let requested = capacity
            .checked_mul(2)
            .ok_or(PoolError::GrowthFailed { requested: usize::MAX })?;
        if self
            .config
            .max_capacity
            .is_some_and(|max_capacity| requested > max_capacity)
        {
            return Err(PoolError::Exhausted { capacity });
        }
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| PoolError::GrowthFailed { requested })?;
        for slot in capacity..requested {
            let tile = Arc::new(Tile::new(slot));
            self.free.push(Arc::clone(&tile));
            slots.push(tile);
        }
        self.capacity.store(requested, Ordering::Release);
        info!(from = capacity, to = requested, "tile pool capacity increased");
        Ok(())
    }

    fn reset_all(&self) {
        let _queue_guard = self.lock_queue();
        while self.pending_load.pop().is_some() {}
        while self.pending_recycle.pop().is_some() {}
        while self.free.pop().is_some() {}
        let slots = self.slots.read().expect("tile pool slot lock poisoned");
        for tile in slots.iter() {
            tile.force_reset();
            self.free.push(Arc::clone(tile));
        }
        self.in_flight.store(0, Ordering::Release);
    }
}

/// Owns every tile slot for one world view plus the worker that loads and
/// recycles them.
///
/// The pool accepts acquisitions as soon as it is built; tiles queue up until
/// [`TilePool::start`] spawns the worker. [`TilePool::stop`] (also run on drop)
/// joins the worker and returns every tile to the free queue.
pub struct TilePool<L: TileLoader> {
    shared: Arc<PoolShared<L>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<L: TileLoader> TilePool<L> {
    pub fn new(config: PoolConfig, loader: L) -> Result<Self, PoolConfigError> {
        config.validate()?;
        let free = SegQueue::new();
        let mut slots = Vec::with_capacity(config.initial_capacity);
        for slot in 0..config.initial_capacity {
            let tile = Arc::new(Tile::new(slot));
            free.push(Arc::clone(&tile));
            slots.push(tile);
        }
        let (wake_sender, wake_receiver) = bounded(1);
        Ok(Self {
            shared: Arc::new(PoolShared {
                config,
                loader,
                slots: RwLock::new(slots),
                capacity: AtomicUsize::new(config.initial_capacity),
                free,
                pending_load: SegQueue::new(),
                pending_recycle: SegQueue::new(),
                queue_lock: Mutex::new(()),
                listeners: RwLock::new(Vec::new()),
                wake_sender,
                wake_receiver,
                stop_requested: AtomicBool::new(false),
                accepting: AtomicBool::new(true),
                in_flight: AtomicUsize::new(0),
            }),
            worker: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn tile_size(&self) -> i32 {
        self.shared.config.tile_size
    }

    pub fn loader(&self) -> &L {
        &self.shared.loader
    }

    pub fn layers(&self) -> &LayerRegistry {
        self.shared.loader.layers()
    }

    pub fn add_listener(&self, listener: Arc<dyn DrainListener>) {
        self.shared
            .listeners
            .write()
            .expect("tile pool listener lock poisoned")
            .push(listener);
    }

    /// Takes a free tile for `origin` and queues it for loading.
    ///
    /// Grows the pool when no tile is free. The returned tile is active but its
    /// content stays empty until the worker has loaded it.
    pub fn acquire(&self, origin: TileCoord) -> Result<Arc<Tile<L::Payload>>, PoolError> {
        if !self.shared.accepting.load(Ordering::Acquire) {
            return Err(PoolError::ShutDown);
        }
        debug_assert_eq!(
            TileCoord::containing(origin.x, origin.y, self.tile_size()),
            origin,
            "tile origin must be aligned to the tile size"
        );
        let tile = loop {
            if let Some(tile) = self.shared.free.pop() {
                break tile;
            }
            self.shared.grow()?;
        };
        let generation = tile.activate(origin);
        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        self.shared.pending_load.push(LoadTicket {
            tile: Arc::clone(&tile),
            generation,
        });
        self.shared.wake();
        Ok(tile)
    }

    /// Hands a tile back for recycling. Never blocks.
    ///
    /// Ignored for tiles that are not active, which covers tiles the pool
    /// already reclaimed in [`TilePool::stop`].
    pub fn release(&self, tile: &Arc<Tile<L::Payload>>) {
        if let Err(state) = tile.lifecycle().begin_recycle() {
            debug!(slot = tile.slot(), ?state, "ignored release of inactive tile");
            return;
        }
        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        self.shared.pending_recycle.push(Arc::clone(tile));
        self.shared.wake();
    }

    pub fn start(&self) -> io::Result<()> {
        let mut worker = self.worker.lock().expect("tile pool worker lock poisoned");
        if worker.is_some() {
            return Ok(());
        }
        self.shared.stop_requested.store(false, Ordering::Release);
        self.shared.accepting.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("tile-pool-worker".to_owned())
            .spawn(move || worker::run(shared))?;
        *worker = Some(handle);
        debug!(capacity = self.capacity(), "tile pool worker started");
        Ok(())
    }

    /// Stops the worker and resets every tile into the free queue.
    ///
    /// Afterwards no tile is active or loaded and `acquire` fails with
    /// [`PoolError::ShutDown`] until the pool is started again.
    pub fn stop(&self) {
        self.shared.accepting.store(false, Ordering::Release);
        let worker = self
            .worker
            .lock()
            .expect("tile pool worker lock poisoned")
            .take();
        if let Some(worker) = worker {
            self.shared.stop_requested.store(true, Ordering::Release);
            self.shared.wake();
            if worker.join().is_err() {
                error!("tile pool worker panicked");
            }
        }
        self.shared.reset_all();
        debug!(capacity = self.capacity(), "tile pool stopped");
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .expect("tile pool worker lock poisoned")
            .is_some()
    }

    /// Reloads a loaded tile in place. This is also how a failed load is
    /// retried. Returns whether the tile now holds fresh content.
    pub fn repaint(&self, tile: &Tile<L::Payload>) -> bool {
        self.reload(tile, |request, content| {
            content.reset();
            self.shared.loader.load(request, content)
        })
    }

    /// Rebuilds a single layer of a loaded tile.
    pub fn repaint_layer(&self, tile: &Tile<L::Payload>, layer: LayerId) -> bool {
        self.reload(tile, |request, content| {
            self.shared.loader.load_layer(request, layer, content)
        })
    }

    fn reload<F>(&self, tile: &Tile<L::Payload>, load: F) -> bool
    where
        F: FnOnce(LoadRequest, &mut crate::TileContent<L::Payload>) -> Result<(), LoadError>,
    {
        if !tile.is_loaded() {
            return false;
        }
        let _queue_guard = self.shared.lock_queue();
        let mut content = tile.write_content();
        if !tile.is_loaded() {
            return false;
        }
        let request = self.shared.request_for(tile);
        let loaded = self
            .shared
            .run_loader(request.origin, || load(request, &mut *content));
        if !loaded {
            content.reset();
        }
        tile.set_load_failed(!loaded);
        loaded
    }

    /// Forwards the frame clock to the loader's time-driven layers.
    pub fn tick(&self, time: f32) {
        self.shared.loader.update(time);
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity.load(Ordering::Acquire)
    }

    pub fn free_len(&self) -> usize {
        self.shared.free.len()
    }

    pub fn pending_load_len(&self) -> usize {
        self.shared.pending_load.len()
    }

    pub fn pending_recycle_len(&self) -> usize {
        self.shared.pending_recycle.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity(),
            free: self.free_len(),
            pending_load: self.pending_load_len(),
            pending_recycle: self.pending_recycle_len(),
        }
    }

    /// True once every queued load and recycle has been processed.
    pub fn is_settled(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire) == 0
    }

    pub fn wait_settled(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_settled() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(SETTLE_POLL_INTERVAL);
        }
    }
}

impl<L: TileLoader> Drop for TilePool<L> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
