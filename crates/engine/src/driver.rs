use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use compositor::{Compositor, CompositorClient, CompositorError, CompositorSettings, Frame, OutputSurface, RenderingStats, ScrollStatus};
use frame_scheduler::{FrameScheduler, FrameSchedulerConfig, FrameSchedulerDecision, FrameSchedulerInput};
use protocol::{ImplToMainMsg, InputEvent, MainToImplMsg};

use crate::{ChannelClient, EngineCommand, EngineError, ImplThreadChannels};

/// Creates a fresh output surface, both at start-up and after the previous
/// one was lost.
pub type OutputSurfaceFactory = Box<dyn FnMut() -> Box<dyn OutputSurface>>;

/// How long the loop sleeps on the input ring when nothing is scheduled.
const IDLE_WAIT: Duration = Duration::from_millis(50);
const MAX_INPUT_EVENTS_PER_TICK: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub decision: FrameSchedulerDecision,
    pub drew: bool,
    pub swapped: bool,
}

/// Runs the compositor frame loop: commands, input, then one scheduled
/// animate / draw / swap step per tick.
pub struct FrameDriver {
    compositor: Compositor<ChannelClient>,
    scheduler: FrameScheduler,
    channels: ImplThreadChannels,
    output_surface_factory: OutputSurfaceFactory,
    frame_sequence_id: u64,
    input_batch: Vec<InputEvent>,
}

fn wall_clock_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}

impl FrameDriver {
    pub fn new(
        settings: CompositorSettings,
        scheduler_config: FrameSchedulerConfig,
        channels: ImplThreadChannels,
        mut output_surface_factory: OutputSurfaceFactory,
    ) -> Result<Self, EngineError> {
        let client = ChannelClient::new(channels.feedback_sender.clone());
        let mut compositor = Compositor::new(settings, client);
        compositor.initialize_renderer(output_surface_factory())?;
        Ok(Self {
            compositor,
            scheduler: FrameScheduler::new(scheduler_config),
            channels,
            output_surface_factory,
            frame_sequence_id: 0,
            input_batch: Vec::with_capacity(MAX_INPUT_EVENTS_PER_TICK),
        })
    }

    pub fn compositor(&self) -> &Compositor<ChannelClient> {
        &self.compositor
    }

    pub fn compositor_mut(&mut self) -> &mut Compositor<ChannelClient> {
        &mut self.compositor
    }

    pub fn frame_sequence_id(&self) -> u64 {
        self.frame_sequence_id
    }

    /// Applies every queued command. Returns how many were applied.
    pub fn process_commands(&mut self) -> Result<usize, EngineError> {
        let mut applied = 0;
        while let Ok(command) = self.channels.command_queue.pop() {
            self.apply_command(command)?;
            applied += 1;
        }
        Ok(applied)
    }

    fn apply_command(&mut self, command: EngineCommand) -> Result<(), EngineError> {
        match command {
            MainToImplMsg::Commit(tree) => {
                let _span = tracing::debug_span!("commit", layers = tree.len()).entered();
                self.compositor.begin_commit();
                self.compositor.set_root_layer(tree);
                self.compositor.commit_complete();
                self.compositor.client_mut().set_needs_redraw_on_impl_thread();
            }
            MainToImplMsg::SetVisible(visible) => {
                self.compositor.set_visible(visible);
                if visible {
                    self.compositor.client_mut().set_needs_redraw_on_impl_thread();
                }
            }
            MainToImplMsg::SetViewportSize { layout, device } => {
                self.compositor.set_viewport_size(layout, device);
                self.compositor.client_mut().set_needs_redraw_on_impl_thread();
            }
            MainToImplMsg::SetManagedMemoryPolicy(policy) => {
                self.compositor.set_managed_memory_policy(policy);
            }
            MainToImplMsg::Input(event) => self.apply_input(event)?,
        }
        Ok(())
    }

    /// Applies input that arrived on the ring, waiting up to `wait` for the
    /// first event.
    pub fn process_input(&mut self, wait: Duration) -> Result<usize, EngineError> {
        let mut batch = std::mem::take(&mut self.input_batch);
        batch.clear();
        self.channels
            .input_ring_consumer
            .drain_batch_with_wait(&mut batch, MAX_INPUT_EVENTS_PER_TICK, wait);
        let result = batch
            .iter()
            .try_for_each(|&event| self.apply_input(event))
            .map(|()| batch.len());
        self.input_batch = batch;
        result
    }

    fn apply_input(&mut self, event: InputEvent) -> Result<(), EngineError> {
        match event {
            InputEvent::ScrollBegin { point, input_type } => {
                let status = self.compositor.scroll_begin(point, input_type);
                if status != ScrollStatus::Started {
                    tracing::trace!(?status, "scroll not handled by the compositor");
                }
            }
            InputEvent::ScrollBy { point, delta } => {
                self.compositor.scroll_by(point, delta);
            }
            InputEvent::ScrollEnd => self.compositor.scroll_end(),
            InputEvent::PinchBegin => self.compositor.pinch_gesture_begin(),
            InputEvent::PinchUpdate { magnify_delta, anchor } => {
                self.compositor.pinch_gesture_update(magnify_delta, anchor)?;
            }
            InputEvent::PinchEnd => self.compositor.pinch_gesture_end(),
        }
        Ok(())
    }

    /// Runs one scheduler step at `now`.
    pub fn tick(&mut self, now: Instant, wall_clock_time: f64) -> Result<TickOutcome, EngineError> {
        self.frame_sequence_id += 1;
        let _span = tracing::trace_span!("tick", frame = self.frame_sequence_id).entered();

        if self.compositor.client_mut().take_output_surface_lost() {
            tracing::info!("recreating lost output surface");
            let output_surface = (self.output_surface_factory)();
            self.compositor.initialize_renderer(output_surface)?;
            self.compositor.client_mut().set_needs_redraw_on_impl_thread();
        }

        let visible = self.compositor.visible();
        let needs_redraw = self.compositor.client_mut().take_needs_redraw();
        let decision = self.scheduler.schedule_frame(FrameSchedulerInput {
            frame_sequence_id: self.frame_sequence_id,
            visible,
            can_draw: self.compositor.can_draw(),
            needs_redraw,
            needs_animate: self.compositor.needs_animate(),
        });

        if decision.animate {
            if visible {
                self.compositor.animate(now, wall_clock_time)?;
            } else {
                self.compositor.background_tick(now, wall_clock_time)?;
            }
        }
        if self.compositor.client_mut().take_needs_manage_tiles() {
            self.compositor.manage_tiles();
        }

        let mut outcome = TickOutcome {
            decision,
            drew: false,
            swapped: false,
        };
        if decision.draw && self.compositor.can_draw() {
            self.draw_frame(&mut outcome)?;
        }

        if self.compositor.client_mut().take_commit_requested() {
            let scroll_and_scale = self.compositor.process_scroll_deltas()?;
            if !scroll_and_scale.is_empty() {
                self.compositor
                    .client_mut()
                    .send(ImplToMainMsg::ScrollAndScale(scroll_and_scale));
            }
        }
        self.compositor.client_mut().flush();
        Ok(outcome)
    }

    fn draw_frame(&mut self, outcome: &mut TickOutcome) -> Result<(), EngineError> {
        let mut frame = Frame::new();
        let should_draw = match self.compositor.prepare_to_draw(&mut frame) {
            Ok(should_draw) => should_draw,
            Err(CompositorError::ContextLost) => {
                self.compositor.did_lose_output_surface();
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        };

        if should_draw {
            self.compositor.draw_layers(&mut frame)?;
            outcome.drew = true;
            outcome.swapped = self.compositor.swap_buffers()?;
        } else {
            tracing::debug!(frame = self.frame_sequence_id, "frame prepared but not drawn");
            self.compositor.client_mut().set_needs_redraw_on_impl_thread();
        }
        self.compositor.did_draw_all_layers(&frame);
        Ok(())
    }

    /// Ticks until the main context drops its command queue, then returns
    /// the final rendering statistics.
    pub fn run(mut self) -> Result<RenderingStats, EngineError> {
        let mut wait = Duration::ZERO;
        loop {
            self.process_commands()?;
            if self.channels.command_queue.is_closed() {
                break;
            }
            self.process_input(wait)?;
            let outcome = self.tick(Instant::now(), wall_clock_seconds())?;
            wait = outcome.decision.next_tick_interval.unwrap_or(IDLE_WAIT);
        }
        self.compositor.finish_all_rendering();
        let stats = self.compositor.rendering_stats();
        tracing::info!(
            frames = stats.num_frames_sent_to_screen,
            dropped = stats.dropped_frame_count,
            "compositor stopped"
        );
        Ok(stats)
    }
}
