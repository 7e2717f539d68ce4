pub const DEFAULT_ZOOM: f64 = 0.25;

/// Screen-side state of the window: viewport size in pixels, zoom (screen
/// pixels per world unit) and the screen position of the window's top-left
/// tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    width: u32,
    height: u32,
    zoom: f64,
    offset_x: f64,
    offset_y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ViewportError {
    #[error("zoom must be finite and positive")]
    InvalidZoom,
    #[error("viewport value is not finite")]
    NonFiniteValue,
    #[error("tiles must span at least one screen pixel")]
    TileTooSmall,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            zoom: DEFAULT_ZOOM,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }
}

impl Viewport {
    pub fn with_zoom(zoom: f64) -> Result<Self, ViewportError> {
        let mut viewport = Self::default();
        viewport.set_zoom(zoom)?;
        Ok(viewport)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn offset_x(&self) -> f64 {
        self.offset_x
    }

    pub fn offset_y(&self) -> f64 {
        self.offset_y
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn set_zoom(&mut self, zoom: f64) -> Result<(), ViewportError> {
        if !zoom.is_finite() || zoom <= 0.0 {
            return Err(ViewportError::InvalidZoom);
        }
        self.zoom = zoom;
        Ok(())
    }

    pub fn pan_by(&mut self, delta_x: f64, delta_y: f64) -> Result<(), ViewportError> {
        self.offset_x = checked_add(self.offset_x, delta_x)?;
        self.offset_y = checked_add(self.offset_y, delta_y)?;
        Ok(())
    }

    pub fn set_offset(&mut self, offset_x: f64, offset_y: f64) -> Result<(), ViewportError> {
        if !offset_x.is_finite() || !offset_y.is_finite() {
            return Err(ViewportError::NonFiniteValue);
        }
        self.offset_x = offset_x;
        self.offset_y = offset_y;
        Ok(())
    }

    /// Changes zoom by `zoom_factor` while the screen point stays over the
    /// same world point.
    pub fn zoom_about_point(
        &mut self,
        zoom_factor: f64,
        point_x: f64,
        point_y: f64,
    ) -> Result<(), ViewportError> {
        if !zoom_factor.is_finite() || zoom_factor <= 0.0 {
            return Err(ViewportError::InvalidZoom);
        }
        if !point_x.is_finite() || !point_y.is_finite() {
            return Err(ViewportError::NonFiniteValue);
        }

        let next_zoom = checked_mul(self.zoom, zoom_factor)?;
        if next_zoom <= 0.0 {
            return Err(ViewportError::InvalidZoom);
        }

        let keep_anchor_scale = checked_add(1.0, -zoom_factor)?;
        let scaled_offset_x = checked_mul(self.offset_x, zoom_factor)?;
        let scaled_offset_y = checked_mul(self.offset_y, zoom_factor)?;
        let anchor_x_contribution = checked_mul(point_x, keep_anchor_scale)?;
        let anchor_y_contribution = checked_mul(point_y, keep_anchor_scale)?;

        self.offset_x = checked_add(scaled_offset_x, anchor_x_contribution)?;
        self.offset_y = checked_add(scaled_offset_y, anchor_y_contribution)?;
        self.zoom = next_zoom;
        Ok(())
    }

    /// Edge length of one tile on screen.
    pub fn tile_span(&self, tile_size: i32) -> f64 {
        f64::from(tile_size) * self.zoom
    }

    /// Columns and rows needed to cover the viewport at any sub-tile pan
    /// offset.
    pub fn required_tiles(&self, tile_size: i32) -> (usize, usize) {
        let span = self.tile_span(tile_size).max(1.0);
        let columns = (f64::from(self.width) / span).floor() as usize + 2;
        let rows = (f64::from(self.height) / span).floor() as usize + 2;
        (columns, rows)
    }

    pub(crate) fn shift(&mut self, delta_x: f64, delta_y: f64) {
        self.offset_x += delta_x;
        self.offset_y += delta_y;
    }
}

fn checked_add(current: f64, delta: f64) -> Result<f64, ViewportError> {
    if !delta.is_finite() {
        return Err(ViewportError::NonFiniteValue);
    }
    let next = current + delta;
    if !next.is_finite() {
        return Err(ViewportError::NonFiniteValue);
    }
    Ok(next)
}

fn checked_mul(left: f64, right: f64) -> Result<f64, ViewportError> {
    if !left.is_finite() || !right.is_finite() {
        return Err(ViewportError::NonFiniteValue);
    }
    let next = left * right;
    if !next.is_finite() {
        return Err(ViewportError::NonFiniteValue);
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zoom_about_point_keeps_anchor_screen_position() {
        let mut viewport = Viewport::with_zoom(1.0).expect("viewport");
        viewport.pan_by(20.0, -10.0).expect("pan");

        viewport
            .zoom_about_point(2.0, 100.0, 50.0)
            .expect("zoom about point");

        assert!((viewport.zoom() - 2.0).abs() < 1e-9);
        assert!((viewport.offset_x() + 60.0).abs() < 1e-9);
        assert!((viewport.offset_y() + 70.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let mut viewport = Viewport::default();
        assert_eq!(viewport.set_zoom(0.0), Err(ViewportError::InvalidZoom));
        assert_eq!(
            viewport.pan_by(f64::INFINITY, 0.0),
            Err(ViewportError::NonFiniteValue)
        );
        assert_eq!(
            viewport.zoom_about_point(1.2, f64::NAN, 20.0),
            Err(ViewportError::NonFiniteValue)
        );
        assert_eq!(viewport.zoom(), DEFAULT_ZOOM);
    }

    #[test]
    fn required_tiles_adds_a_margin_of_two() {
        let mut viewport = Viewport::with_zoom(0.5).expect("viewport");
        viewport.set_size(1000, 300);
        // 256 world units at half zoom span 128 pixels.
        assert_eq!(viewport.tile_span(256), 128.0);
        assert_eq!(viewport.required_tiles(256), (9, 4));
    }
}
