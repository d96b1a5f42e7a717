//! Drives a demo scene through the compositor without a window.
//!
//! Usage: `headless [settings.json]`. Logging follows `RUST_LOG`.

use std::process::ExitCode;
use std::time::Duration;

use compositor::animation::{
    AnimationCurve, DEFAULT_SCROLLBAR_FADEOUT_DELAY, DEFAULT_SCROLLBAR_FADEOUT_LENGTH, KeyframeAnimation,
    ScrollbarAnimationController,
};
use compositor::headless::HeadlessOutputSurface;
use compositor::{CompositorSettings, Layer, LayerTree, OutputSurface, RenderingStats, TiledContent};
use engine::{EngineError, FrameDriver, MainThreadChannels, create_thread_channels};
use frame_scheduler::FrameSchedulerConfig;
use geometry::{PointF, Size, Vector2dF};
use protocol::{InputEvent, MainToImplMsg, ScrollInputType};
use render_protocol::{Color, LayerId};
use tracing_subscriber::EnvFilter;

const VIEWPORT: Size = Size::new(256, 256);
const TILE_SIZE: Size = Size::new(128, 128);

fn load_settings(path: Option<String>) -> Result<CompositorSettings, EngineError> {
    let Some(path) = path else {
        return Ok(CompositorSettings {
            impl_side_painting: true,
            ..CompositorSettings::default()
        });
    };
    let text = std::fs::read_to_string(&path).map_err(|source| EngineError::ReadSettings { path, source })?;
    Ok(serde_json::from_str(&text)?)
}

/// A scrolling page of tiles with a fading badge on top.
fn demo_scene() -> LayerTree {
    let mut tree = LayerTree::new();

    let mut root = Layer::new(LayerId(1));
    root.set_bounds(VIEWPORT);
    root.set_debug_name("root");
    let root = tree.insert(root);

    let mut scroller = Layer::new(LayerId(2));
    scroller.set_bounds(VIEWPORT);
    scroller.set_scrollable(true);
    scroller.set_debug_name("scroller");
    scroller.set_scrollbar_animation_controller(Some(ScrollbarAnimationController::new(
        DEFAULT_SCROLLBAR_FADEOUT_DELAY,
        DEFAULT_SCROLLBAR_FADEOUT_LENGTH,
    )));
    let scroller = tree.insert(scroller);

    let mut tiles = TiledContent::new(TILE_SIZE, Color::WHITE);
    for row in 0..8 {
        let shade = 255 - row * 24;
        tiles.set_tile_color((0, row), Color::from_argb(255, shade as u8, 96, 160));
        tiles.set_tile_color((1, row), Color::from_argb(255, 96, shade as u8, 160));
    }
    let mut page = Layer::tiled(LayerId(3), Size::new(256, 1024), tiles);
    page.set_debug_name("page");
    let page = tree.insert(page);

    let mut badge = Layer::solid_color(LayerId(4), Size::new(48, 48), Color::from_argb(255, 255, 200, 0));
    badge.set_position(PointF::new(200.0, 8.0));
    badge.set_debug_name("badge");
    badge.animation_controller_mut().add_animation(KeyframeAnimation::new(
        1,
        AnimationCurve::Opacity { from: 1.0, to: 0.25 },
        0.5,
    ));
    let badge = tree.insert(badge);

    tree.add_child(root, scroller);
    tree.add_child(scroller, page);
    tree.add_child(root, badge);
    tree.set_root(Some(root));
    tree
}

fn scroll_gesture(channels: &MainThreadChannels, delta: Vector2dF, steps: u32) {
    let point = PointF::new(64.0, 64.0);
    let input = &channels.input_ring_producer;
    input.push(InputEvent::ScrollBegin {
        point,
        input_type: ScrollInputType::Gesture,
    });
    for _ in 0..steps {
        input.push(InputEvent::ScrollBy { point, delta });
        std::thread::sleep(Duration::from_millis(16));
    }
    input.push(InputEvent::ScrollEnd);
}

fn pinch_gesture(channels: &MainThreadChannels, magnify_delta: f32, steps: u32) {
    let input = &channels.input_ring_producer;
    input.push(InputEvent::PinchBegin);
    for _ in 0..steps {
        input.push(InputEvent::PinchUpdate {
            magnify_delta,
            anchor: PointF::new(128.0, 128.0),
        });
        std::thread::sleep(Duration::from_millis(16));
    }
    input.push(InputEvent::PinchEnd);
}

/// Reads feedback for `duration`, logging what the compositor reported.
fn pump_feedback(channels: &mut MainThreadChannels, duration: Duration) {
    let deadline = std::time::Instant::now() + duration;
    while std::time::Instant::now() < deadline {
        channels.feedback_mailbox.wait(Duration::from_millis(16));
    }
    let feedback = channels.feedback_mailbox.take();
    tracing::info!(
        frame = feedback.frame_number,
        needs_commit = feedback.needs_commit,
        animation_events = feedback.animation_events.len(),
        scroll = ?feedback.scroll_and_scale,
        memory = ?feedback.memory_stats,
        "feedback"
    );
}

fn run(settings: CompositorSettings) -> Result<RenderingStats, EngineError> {
    let (mut main, compositor_channels) = create_thread_channels(256, 32, 256);

    let compositor_thread = std::thread::Builder::new()
        .name("compositor".into())
        .spawn(move || {
            let factory = Box::new(|| Box::new(HeadlessOutputSurface::new()) as Box<dyn OutputSurface>);
            FrameDriver::new(settings, FrameSchedulerConfig::default(), compositor_channels, factory)?.run()
        })
        .map_err(|_| EngineError::CompositorThreadPanicked)?;

    main.command_queue.blocking_push(MainToImplMsg::SetViewportSize {
        layout: VIEWPORT,
        device: VIEWPORT,
    });
    main.command_queue.blocking_push(MainToImplMsg::Commit(demo_scene()));
    pump_feedback(&mut main, Duration::from_millis(200));

    scroll_gesture(&main, Vector2dF::new(0.0, 24.0), 10);
    pump_feedback(&mut main, Duration::from_millis(100));

    pinch_gesture(&main, 1.05, 8);
    pump_feedback(&mut main, Duration::from_millis(100));

    main.command_queue.blocking_push(MainToImplMsg::SetVisible(false));
    pump_feedback(&mut main, Duration::from_millis(100));

    drop(main);
    compositor_thread
        .join()
        .map_err(|_| EngineError::CompositorThreadPanicked)?
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let settings = match load_settings(std::env::args().nth(1)) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("headless: {err}");
            return ExitCode::from(2);
        }
    };

    match run(settings) {
        Ok(stats) => {
            tracing::info!(
                frames = stats.num_frames_sent_to_screen,
                dropped = stats.dropped_frame_count,
                impl_scrolls = stats.num_impl_thread_scrolls,
                main_scrolls = stats.num_main_thread_scrolls,
                layers_drawn = stats.num_layers_drawn,
                missing_tiles = stats.num_missing_tiles,
                "done"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("headless: {err}");
            ExitCode::FAILURE
        }
    }
}
