use std::sync::atomic::{AtomicU8, Ordering};

/// Where a tile sits in the pool's queues.
///
/// `Free -> PendingLoad -> Loaded -> PendingRecycle -> Free`, with the
/// shortcut `PendingLoad -> PendingRecycle` for tiles released before the
/// worker reached them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TileState {
    Free = 0,
    PendingLoad = 1,
    Loaded = 2,
    PendingRecycle = 3,
}

impl TileState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => TileState::Free,
            1 => TileState::PendingLoad,
            2 => TileState::Loaded,
            3 => TileState::PendingRecycle,
            _ => panic!("invalid tile state {raw}"),
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, TileState::PendingLoad | TileState::Loaded)
    }

    pub fn can_advance_to(self, next: TileState) -> bool {
        matches!(
            (self, next),
            (TileState::Free, TileState::PendingLoad)
                | (TileState::PendingLoad, TileState::Loaded)
                | (TileState::PendingLoad, TileState::PendingRecycle)
                | (TileState::Loaded, TileState::PendingRecycle)
                | (TileState::PendingRecycle, TileState::Free)
        )
    }
}

#[derive(Debug)]
pub struct TileLifecycle {
    state: AtomicU8,
}

impl Default for TileLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl TileLifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(TileState::Free as u8),
        }
    }

    pub fn state(&self) -> TileState {
        TileState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Moves `from -> to` if the tile is still in `from`.
    ///
    /// Returns the observed state on failure. Panics on a transition the
    /// state machine does not allow.
    pub fn advance(&self, from: TileState, to: TileState) -> Result<(), TileState> {
        if !from.can_advance_to(to) {
            panic!("illegal tile transition {from:?} -> {to:?}");
        }
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(TileState::from_raw)
    }

    /// Moves an active tile (loading or loaded) to `PendingRecycle`.
    pub fn begin_recycle(&self) -> Result<TileState, TileState> {
        let mut current = self.state();
        loop {
            if !current.is_active() {
                return Err(current);
            }
            match self.advance(current, TileState::PendingRecycle) {
                Ok(()) => return Ok(current),
                Err(observed) => current = observed,
            }
        }
    }

    /// Unconditional reset used when the pool is torn down.
    pub(crate) fn force_free(&self) {
        self.state.store(TileState::Free as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::{TileLifecycle, TileState};

    #[test]
    fn full_cycle_returns_to_free() {
        let lifecycle = TileLifecycle::new();
        lifecycle
            .advance(TileState::Free, TileState::PendingLoad)
            .expect("acquire");
        lifecycle
            .advance(TileState::PendingLoad, TileState::Loaded)
            .expect("load");
        assert_eq!(lifecycle.begin_recycle(), Ok(TileState::Loaded));
        lifecycle
            .advance(TileState::PendingRecycle, TileState::Free)
            .expect("recycle");
        assert_eq!(lifecycle.state(), TileState::Free);
    }

    #[test]
    fn load_after_release_is_rejected() {
        let lifecycle = TileLifecycle::new();
        lifecycle
            .advance(TileState::Free, TileState::PendingLoad)
            .expect("acquire");
        assert_eq!(lifecycle.begin_recycle(), Ok(TileState::PendingLoad));
        assert_eq!(
            lifecycle.advance(TileState::PendingLoad, TileState::Loaded),
            Err(TileState::PendingRecycle)
        );
        assert!(!lifecycle.state().is_active());
    }

    #[test]
    fn double_release_is_reported() {
        let lifecycle = TileLifecycle::new();
        lifecycle
            .advance(TileState::Free, TileState::PendingLoad)
            .expect("acquire");
        lifecycle.begin_recycle().expect("first release");
        assert_eq!(lifecycle.begin_recycle(), Err(TileState::PendingRecycle));
    }

    #[test]
    #[should_panic(expected = "illegal tile transition")]
    fn skipping_the_load_queue_panics() {
        let lifecycle = TileLifecycle::new();
        let _ = lifecycle.advance(TileState::Free, TileState::Loaded);
    }
}
