mod settings;
mod synthetic;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tiles::{DrainSignal, TilePool};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use view::GridWindow;

use crate::settings::Settings;
use crate::synthetic::SyntheticLoader;

/// How often the weather layer is rebuilt, in frames.
const WEATHER_REFRESH_FRAMES: u32 = 30;

#[derive(Parser)]
#[command(author, version, about = "Stream a panning tile window over a synthetic world")]
struct Arguments {
    /// TOML settings file with optional [pool], [grid] and [run] tables.
    #[arg(long, short = 'c', value_parser)]
    config: Option<PathBuf>,
    /// Viewport width in pixels.
    #[arg(long)]
    width: Option<u32>,
    /// Viewport height in pixels.
    #[arg(long)]
    height: Option<u32>,
    /// Screen pixels per world unit.
    #[arg(long)]
    zoom: Option<f64>,
    /// Number of frames to simulate.
    #[arg(long)]
    frames: Option<u32>,
    /// Horizontal pan per frame in screen pixels.
    #[arg(long, allow_hyphen_values = true)]
    pan_x: Option<f64>,
    /// Vertical pan per frame in screen pixels.
    #[arg(long, allow_hyphen_values = true)]
    pan_y: Option<f64>,
    /// Artificial delay per tile load, in milliseconds.
    #[arg(long)]
    load_delay_ms: Option<u64>,
    /// World point to center the window on before the first frame.
    #[arg(long, num_args = 2, value_names = ["X", "Y"], allow_hyphen_values = true)]
    center: Option<Vec<i32>>,
}

impl Arguments {
    fn apply(&self, settings: &mut Settings) {
        let run = &mut settings.run;
        if let Some(width) = self.width {
            run.width = width;
        }
        if let Some(height) = self.height {
            run.height = height;
        }
        if let Some(frames) = self.frames {
            run.frames = frames;
        }
        if let Some(pan_x) = self.pan_x {
            run.pan_x = pan_x;
        }
        if let Some(pan_y) = self.pan_y {
            run.pan_y = pan_y;
        }
        if let Some(delay) = self.load_delay_ms {
            run.load_delay_millis = delay;
        }
        if let Some(zoom) = self.zoom {
            settings.grid.zoom = zoom;
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let arguments = Arguments::parse();
    let mut settings = Settings::load(arguments.config.as_deref())?;
    arguments.apply(&mut settings);
    let run = settings.run;

    let loader = SyntheticLoader::new(run.seed, Duration::from_millis(run.load_delay_millis));
    let weather = loader.weather_layer();
    let pool = Arc::new(TilePool::new(settings.pool, loader).context("create tile pool")?);
    let drained = DrainSignal::new();
    pool.add_listener(Arc::new(drained.clone()));
    pool.start().context("start tile pool worker")?;

    let window =
        GridWindow::new(Arc::clone(&pool), settings.grid).context("create grid window")?;
    window
        .ensure_covers(run.width, run.height, settings.grid.zoom)
        .context("cover initial viewport")?;
    if let Some(&[x, y]) = arguments.center.as_deref() {
        window.recenter(x, y).context("recenter window")?;
    }

    info!(
        width = run.width,
        height = run.height,
        zoom = settings.grid.zoom,
        frames = run.frames,
        tile_size = pool.tile_size(),
        "streaming started"
    );

    let frame_interval = Duration::from_millis(run.frame_millis);
    let started = Instant::now();
    let mut drains = 0_u32;
    for frame in 0..run.frames {
        window
            .move_by(run.pan_x, run.pan_y)
            .context("pan viewport")?;
        window
            .ensure_covers(run.width, run.height, window.zoom())
            .with_context(|| format!("cover viewport at frame {frame}"))?;
        window.tick(started.elapsed().as_secs_f32());
        if frame % WEATHER_REFRESH_FRAMES == 0 {
            window.repaint_layer(weather);
        }
        if drained.try_take() {
            drains += 1;
        }
        if run.report_every > 0 && frame % run.report_every == 0 {
            let stats = pool.stats();
            let origin = window.origin();
            info!(
                frame,
                columns = window.width(),
                rows = window.height(),
                origin_x = origin.x,
                origin_y = origin.y,
                capacity = stats.capacity,
                free = stats.free,
                pending_load = stats.pending_load,
                pending_recycle = stats.pending_recycle,
                "frame"
            );
        }
        if !frame_interval.is_zero() {
            thread::sleep(frame_interval);
        }
    }

    if !pool.wait_settled(Duration::from_millis(run.settle_timeout_millis)) {
        warn!("tile pool did not settle before shutdown");
    }

    let tiles = window.tiles();
    let loaded = tiles.iter().filter(|tile| tile.is_loaded()).count();
    let failed = tiles.iter().filter(|tile| tile.load_failed()).count();
    let center_x = f64::from(run.width) / 2.0;
    let center_y = f64::from(run.height) / 2.0;
    let center_world = window.screen_to_world(center_x, center_y);
    let elevation = center_world.and_then(|(world_x, world_y)| {
        window
            .with_payload_at(world_x, world_y, |content, local_x, local_y| {
                content
                    .payload
                    .sample_at(local_x, local_y, pool.tile_size())
            })
            .flatten()
    });
    let landmark = window
        .nearest_object_at(center_x, center_y, f64::from(run.width.max(run.height)))
        .map(|object| object.label);
    let stats = pool.stats();
    info!(
        tiles = tiles.len(),
        loaded,
        failed,
        drains,
        landmarks = window.objects().len(),
        ?landmark,
        ?center_world,
        ?elevation,
        capacity = stats.capacity,
        free = stats.free,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "streaming finished"
    );

    drop(tiles);
    window.dispose();
    Ok(())
}
