use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;

use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, trace};

use crate::TileLoader;
use crate::lifecycle::TileState;
use crate::pool::{LoadTicket, PoolShared};

pub(crate) fn run<L: TileLoader>(shared: Arc<PoolShared<L>>) {
    let idle_poll = shared.config.idle_poll();
    let load_yield = shared.config.load_yield();
    let load_yield_every = shared.config.load_yield_every;

    let mut loads_since_yield = 0u32;
    let mut working = false;
    while !shared.stop_requested.load(Ordering::Acquire) {
        let mut did_work = false;

        if let Some(ticket) = shared.pending_load.pop() {
            did_work = true;
            if load_ticket(&shared, ticket) {
                loads_since_yield += 1;
                if loads_since_yield >= load_yield_every {
                    loads_since_yield = 0;
                    thread::sleep(load_yield);
                }
            }
            shared.finish_item();
        }

        while let Some(tile) = shared.pending_recycle.pop() {
            did_work = true;
            {
                let _queue_guard = shared.lock_queue();
                tile.recycle();
            }
            shared.free.push(tile);
            shared.finish_item();
        }

        if did_work {
            working = true;
            continue;
        }

        loads_since_yield = 0;
        if working {
            working = false;
            trace!("tile queues drained");
            shared.notify_drained();
        }

        match shared.wake_receiver.recv_timeout(idle_poll) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("tile pool worker exiting");
}

/// Populates the ticket's tile if it is still waiting for this load.
///
/// Returns false for stale tickets: the tile was released, or released and
/// acquired again under a newer generation.
fn load_ticket<L: TileLoader>(shared: &PoolShared<L>, ticket: LoadTicket<L::Payload>) -> bool {
    let tile = ticket.tile;
    let is_current = || {
        tile.state() == TileState::PendingLoad && tile.generation() == ticket.generation
    };
    if !is_current() {
        return false;
    }

    let _queue_guard = shared.lock_queue();
    let mut content = tile.write_content();
    if !is_current() {
        return false;
    }
    let request = shared.request_for(&tile);
    let loaded = shared.run_loader(request.origin, || {
        shared.loader.load(request, &mut *content)
    });
    if !loaded {
        content.reset();
    }
    match tile
        .lifecycle()
        .advance(TileState::PendingLoad, TileState::Loaded)
    {
        Ok(()) => tile.set_load_failed(!loaded),
        // Released while loading; nobody will look at this content.
        Err(_) => content.reset(),
    }
    true
}
