mod rows;
mod viewport;

use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Deserialize;
use tiles::{LayerId, PoolError, Tile, TileContent, TileCoord, TileLoader, TileObject, TilePool};
use tracing::debug;

pub use rows::{Edge, RowCell, TileRows};
pub use viewport::{DEFAULT_ZOOM, Viewport, ViewportError};

/// Smallest on-screen tile edge, in pixels, that `ensure_covers` accepts.
pub const MIN_TILE_SPAN: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub zoom: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { zoom: DEFAULT_ZOOM }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StructuralViolation {
    #[error("the window must keep at least one row")]
    LastRow,
    #[error("the window must keep at least one column")]
    LastColumn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Structural(#[from] StructuralViolation),
    #[error(transparent)]
    Viewport(#[from] ViewportError),
}

/// A tile as laid out on screen by [`GridWindow::for_each_placed`].
#[derive(Debug)]
pub struct PlacedTile<'a, P> {
    pub tile: &'a Tile<P>,
    pub row: usize,
    pub column: usize,
    pub screen_x: f64,
    pub screen_y: f64,
    pub span: f64,
    pub end_of_line: bool,
}

/// A movable rectangular window of tiles covering the viewport.
///
/// Tiles sit on a regular grid: the tile at row `r`, column `c` has origin
/// `first + (c, r) * tile_size`, where `first` is the top-left tile. Every
/// tile in the window stays acquired from the pool until it leaves the
/// window, at which point it is released.
///
/// Structural edits hold the rows write lock for the whole edit so readers
/// never see a partial row or column. `ensure_covers` and `recenter` also
/// hold the viewport lock, which is always taken before the rows lock.
/// Placement and hit-test reads hold the viewport lock while they walk the
/// rows, so they never pair an offset with rows from a different shift.
pub struct GridWindow<L: TileLoader> {
    pool: Arc<TilePool<L>>,
    tile_size: i32,
    rows: RwLock<TileRows<Arc<Tile<L::Payload>>>>,
    viewport: Mutex<Viewport>,
}

impl<L: TileLoader> GridWindow<L> {
    /// Creates a 1x1 window over the tile at the world origin.
    pub fn new(pool: Arc<TilePool<L>>, config: GridConfig) -> Result<Self, WindowError> {
        let viewport = Viewport::with_zoom(config.zoom)?;
        let tile_size = pool.tile_size();
        let seed = pool.acquire(TileCoord::default())?;
        Ok(Self {
            pool,
            tile_size,
            rows: RwLock::new(TileRows::single(seed)),
            viewport: Mutex::new(viewport),
        })
    }

    pub fn pool(&self) -> &Arc<TilePool<L>> {
        &self.pool
    }

    pub fn tile_size(&self) -> i32 {
        self.tile_size
    }

    pub fn width(&self) -> usize {
        self.read_rows().width()
    }

    pub fn height(&self) -> usize {
        self.read_rows().height()
    }

    pub fn viewport(&self) -> Viewport {
        *self.lock_viewport()
    }

    /// Origin of the top-left tile.
    pub fn origin(&self) -> TileCoord {
        self.read_rows().first().origin()
    }

    /// Tile origins, one inner vector per row.
    pub fn origins(&self) -> Vec<Vec<TileCoord>> {
        self.read_rows()
            .rows()
            .map(|row| row.iter().map(|tile| tile.origin()).collect())
            .collect()
    }

    /// Snapshot of the window's tiles in row-major order.
    pub fn tiles(&self) -> Vec<Arc<Tile<L::Payload>>> {
        self.read_rows()
            .iter()
            .map(|cell| Arc::clone(cell.item))
            .collect()
    }

    pub fn add_row(&self, edge: Edge) -> Result<(), WindowError> {
        let mut rows = self.write_rows();
        let first = rows.first().origin();
        let row_origin = match edge {
            Edge::Start => first.step(0, -1, self.tile_size),
            Edge::End => first.step(0, grid_step(rows.height()), self.tile_size),
        };
        let tiles = self.acquire_all(
            (0..rows.width()).map(|column| row_origin.step(grid_step(column), 0, self.tile_size)),
        )?;
        rows.push_row(edge, tiles);
        Ok(())
    }

    pub fn remove_row(&self, edge: Edge) -> Result<(), WindowError> {
        let mut rows = self.write_rows();
        if rows.height() <= 1 {
            return Err(StructuralViolation::LastRow.into());
        }
        for tile in rows.pop_row(edge) {
            self.pool.release(&tile);
        }
        Ok(())
    }

    pub fn add_column(&self, edge: Edge) -> Result<(), WindowError> {
        let mut rows = self.write_rows();
        let first = rows.first().origin();
        let column_origin = match edge {
            Edge::Start => first.step(-1, 0, self.tile_size),
            Edge::End => first.step(grid_step(rows.width()), 0, self.tile_size),
        };
        let tiles = self.acquire_all(
            (0..rows.height()).map(|row| column_origin.step(0, grid_step(row), self.tile_size)),
        )?;
        rows.push_column(edge, tiles);
        Ok(())
    }

    pub fn remove_column(&self, edge: Edge) -> Result<(), WindowError> {
        let mut rows = self.write_rows();
        if rows.width() <= 1 {
            return Err(StructuralViolation::LastColumn.into());
        }
        for tile in rows.pop_column(edge) {
            self.pool.release(&tile);
        }
        Ok(())
    }

    /// Grows, shrinks and shifts the window so it covers a `width` x
    /// `height` viewport at `zoom`.
    ///
    /// While the pan offset has left the `[-span, 0]` band, whole tiles are
    /// shifted across. When the top-left tile has scrolled fully off screen it
    /// is dropped, and a replacement is added at the far edge unless the
    /// window is already wider (or taller) than needed. When a gap opens at
    /// the top or left a row or column is added there first and the far one
    /// is dropped only if the window is then larger than needed. Afterwards
    /// the window is trimmed or extended at the bottom and right to exactly
    /// the required size. A second call with the same arguments changes
    /// nothing.
    ///
    /// Fails with [`ViewportError::TileTooSmall`] when a tile would span less
    /// than one screen pixel at `zoom`; the viewport is left untouched.
    pub fn ensure_covers(&self, width: u32, height: u32, zoom: f64) -> Result<(), WindowError> {
        let mut viewport = self.lock_viewport();
        let mut next = *viewport;
        next.set_zoom(zoom)?;
        next.set_size(width, height);
        let span = next.tile_span(self.tile_size);
        if span < MIN_TILE_SPAN {
            return Err(ViewportError::TileTooSmall.into());
        }
        *viewport = next;
        let (columns, rows) = viewport.required_tiles(self.tile_size);

        while viewport.offset_x() > 0.0 {
            self.add_column(Edge::Start)?;
            viewport.shift(-span, 0.0);
            if self.width() > columns {
                self.remove_column(Edge::End)?;
            }
        }
        while viewport.offset_x() < -span {
            if self.width() <= columns {
                self.add_column(Edge::End)?;
            }
            self.remove_column(Edge::Start)?;
            viewport.shift(span, 0.0);
        }
        while viewport.offset_y() > 0.0 {
            self.add_row(Edge::Start)?;
            viewport.shift(0.0, -span);
            if self.height() > rows {
                self.remove_row(Edge::End)?;
            }
        }
        while viewport.offset_y() < -span {
            if self.height() <= rows {
                self.add_row(Edge::End)?;
            }
            self.remove_row(Edge::Start)?;
            viewport.shift(0.0, span);
        }

        while self.width() < columns {
            self.add_column(Edge::End)?;
        }
        while self.width() > columns {
            self.remove_column(Edge::End)?;
        }
        while self.height() < rows {
            self.add_row(Edge::End)?;
        }
        while self.height() > rows {
            self.remove_row(Edge::End)?;
        }
        Ok(())
    }

    /// Collapses the window to the tile containing world point `(x, y)` and
    /// pans so that point sits at the viewport center.
    pub fn recenter(&self, x: i32, y: i32) -> Result<(), WindowError> {
        let mut viewport = self.lock_viewport();
        let origin = TileCoord::containing(x, y, self.tile_size);
        let seed = self.pool.acquire(origin)?;
        let previous = self.write_rows().replace_all(seed);
        for tile in &previous {
            self.pool.release(tile);
        }

        let zoom = viewport.zoom();
        let offset_x = f64::from(viewport.width()) / 2.0 - f64::from(x - origin.x) * zoom;
        let offset_y = f64::from(viewport.height()) / 2.0 - f64::from(y - origin.y) * zoom;
        viewport.set_offset(offset_x, offset_y)?;
        debug!(
            x,
            y,
            origin_x = origin.x,
            origin_y = origin.y,
            released = previous.len(),
            "window recentered"
        );
        Ok(())
    }

    /// Pans the viewport by a screen-space delta. Tiles follow on the next
    /// `ensure_covers`.
    pub fn move_by(&self, delta_x: f64, delta_y: f64) -> Result<(), WindowError> {
        self.lock_viewport().pan_by(delta_x, delta_y)?;
        Ok(())
    }

    pub fn zoom(&self) -> f64 {
        self.lock_viewport().zoom()
    }

    pub fn set_zoom(&self, zoom: f64) -> Result<(), WindowError> {
        self.lock_viewport().set_zoom(zoom)?;
        Ok(())
    }

    /// Scales the zoom by `factor` keeping the world point under the given
    /// screen point in place.
    pub fn zoom_about(&self, factor: f64, screen_x: f64, screen_y: f64) -> Result<(), WindowError> {
        self.lock_viewport()
            .zoom_about_point(factor, screen_x, screen_y)?;
        Ok(())
    }

    /// World point under a screen point, or `None` when it lies outside the
    /// `i32` world.
    pub fn screen_to_world(&self, screen_x: f64, screen_y: f64) -> Option<(i32, i32)> {
        let viewport = self.lock_viewport();
        let origin = self.read_rows().first().origin();
        let world_x = f64::from(origin.x) + (screen_x - viewport.offset_x()) / viewport.zoom();
        let world_y = f64::from(origin.y) + (screen_y - viewport.offset_y()) / viewport.zoom();
        Some((world_coordinate(world_x)?, world_coordinate(world_y)?))
    }

    pub fn world_to_screen(&self, x: i32, y: i32) -> (f64, f64) {
        let viewport = self.lock_viewport();
        let origin = self.read_rows().first().origin();
        project(&viewport, origin, x, y)
    }

    /// The window tile whose region contains world point `(x, y)`.
    pub fn tile_at(&self, x: i32, y: i32) -> Option<Arc<Tile<L::Payload>>> {
        let target = TileCoord::containing(x, y, self.tile_size);
        let rows = self.read_rows();
        let first = rows.first().origin();
        let size = i64::from(self.tile_size);
        let column = (i64::from(target.x) - i64::from(first.x)) / size;
        let row = (i64::from(target.y) - i64::from(first.y)) / size;
        if column < 0 || row < 0 {
            return None;
        }
        let tile = rows.get(usize::try_from(row).ok()?, usize::try_from(column).ok()?)?;
        debug_assert_eq!(tile.origin(), target);
        Some(Arc::clone(tile))
    }

    /// Runs `f` on the content of the loaded tile containing world point
    /// `(x, y)`, passing the point in tile-local coordinates.
    pub fn with_payload_at<R>(
        &self,
        x: i32,
        y: i32,
        f: impl FnOnce(&TileContent<L::Payload>, i32, i32) -> R,
    ) -> Option<R> {
        let tile = self.tile_at(x, y)?;
        if !tile.is_loaded() {
            return None;
        }
        let origin = tile.origin();
        let content = tile.read();
        Some(f(&content, x - origin.x, y - origin.y))
    }

    /// Objects of every tile in the window, in row-major tile order.
    pub fn objects(&self) -> Vec<TileObject> {
        let rows = self.read_rows();
        let mut objects = Vec::new();
        for cell in rows.iter() {
            if cell.item.is_loaded() {
                objects.extend(cell.item.read().objects.iter().cloned());
            }
        }
        objects
    }

    /// The object on a visible layer closest to the screen point, if one lies
    /// strictly within `max_radius` screen pixels. Ties keep the first object
    /// found in row-major order.
    pub fn nearest_object_at(
        &self,
        screen_x: f64,
        screen_y: f64,
        max_radius: f64,
    ) -> Option<TileObject> {
        let viewport = self.lock_viewport();
        let layers = self.pool.layers();
        let rows = self.read_rows();
        let origin = rows.first().origin();

        let mut closest = None;
        let mut closest_distance = max_radius;
        for cell in rows.iter() {
            if !cell.item.is_loaded() {
                continue;
            }
            let content = cell.item.read();
            for object in &content.objects {
                if !layers.is_visible(object.layer) {
                    continue;
                }
                let (object_x, object_y) = project(&viewport, origin, object.x, object.y);
                let distance = (object_x - screen_x).hypot(object_y - screen_y);
                if distance < closest_distance {
                    closest_distance = distance;
                    closest = Some(object.clone());
                }
            }
        }
        closest
    }

    /// Visits every tile in row-major order with its screen placement.
    ///
    /// `f` runs with the viewport and rows locks held and must not call back
    /// into this window.
    pub fn for_each_placed(&self, mut f: impl FnMut(PlacedTile<'_, L::Payload>)) {
        let viewport = self.lock_viewport();
        let span = viewport.tile_span(self.tile_size);
        let rows = self.read_rows();
        for cell in rows.iter() {
            f(PlacedTile {
                tile: cell.item,
                row: cell.row,
                column: cell.column,
                screen_x: viewport.offset_x() + cell.column as f64 * span,
                screen_y: viewport.offset_y() + cell.row as f64 * span,
                span,
                end_of_line: cell.end_of_line,
            });
        }
    }

    /// Rebuilds every loaded tile. Returns how many were rebuilt.
    pub fn repaint_all(&self) -> usize {
        self.tiles()
            .iter()
            .filter(|tile| self.pool.repaint(tile))
            .count()
    }

    pub fn repaint_layer(&self, layer: LayerId) -> usize {
        self.tiles()
            .iter()
            .filter(|tile| self.pool.repaint_layer(tile, layer))
            .count()
    }

    pub fn tick(&self, time: f32) {
        self.pool.tick(time);
    }

    /// Stops the pool's worker and returns every tile to the free list.
    pub fn dispose(self) {
        self.pool.stop();
    }

    fn acquire_all(
        &self,
        origins: impl IntoIterator<Item = TileCoord>,
    ) -> Result<Vec<Arc<Tile<L::Payload>>>, WindowError> {
        let mut tiles = Vec::new();
        for origin in origins {
            match self.pool.acquire(origin) {
                Ok(tile) => tiles.push(tile),
                Err(error) => {
                    for tile in &tiles {
                        self.pool.release(tile);
                    }
                    return Err(error.into());
                }
            }
        }
        Ok(tiles)
    }

    fn read_rows(&self) -> RwLockReadGuard<'_, TileRows<Arc<Tile<L::Payload>>>> {
        self.rows.read().expect("window rows lock poisoned")
    }

    fn write_rows(&self) -> RwLockWriteGuard<'_, TileRows<Arc<Tile<L::Payload>>>> {
        self.rows.write().expect("window rows lock poisoned")
    }

    fn lock_viewport(&self) -> MutexGuard<'_, Viewport> {
        self.viewport.lock().expect("viewport lock poisoned")
    }
}

impl<L: TileLoader> Drop for GridWindow<L> {
    fn drop(&mut self) {
        let rows = match self.rows.get_mut() {
            Ok(rows) => rows,
            Err(poisoned) => poisoned.into_inner(),
        };
        for cell in rows.iter() {
            self.pool.release(cell.item);
        }
    }
}

fn world_coordinate(value: f64) -> Option<i32> {
    let value = value.floor();
    if value.is_finite() && value >= f64::from(i32::MIN) && value <= f64::from(i32::MAX) {
        Some(value as i32)
    } else {
        None
    }
}

fn grid_step(count: usize) -> i32 {
    i32::try_from(count).expect("window dimension exceeds i32")
}

fn project(viewport: &Viewport, origin: TileCoord, x: i32, y: i32) -> (f64, f64) {
    let zoom = viewport.zoom();
    (
        viewport.offset_x() + f64::from(x - origin.x) * zoom,
        viewport.offset_y() + f64::from(y - origin.y) * zoom,
    )
}
