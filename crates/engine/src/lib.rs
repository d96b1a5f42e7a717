//! Plumbing between the main context, which owns the authoritative layer
//! tree, and the compositor context, which draws it.
//!
//! - Commands (commits, visibility, viewport, memory policy) travel main to
//!   compositor over a bounded SPSC ring.
//! - Input events travel over a lossy ring that keeps the newest events.
//! - Feedback travels back as `ImplToMainMsg` values and is folded into a
//!   `FeedbackFrame` by the `FeedbackMailbox`.
//! - `FrameDriver` runs the compositor's frame loop on its own thread.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use compositor::LayerTree;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use crossbeam_queue::ArrayQueue;
use protocol::{InputEvent, MainToImplMsg};
use rtrb::{Consumer, PopError, Producer, PushError, RingBuffer};

mod client;
mod driver;
mod error;
mod mailbox;

pub use client::ChannelClient;
pub use driver::{FrameDriver, OutputSurfaceFactory, TickOutcome};
pub use error::EngineError;
pub use mailbox::FeedbackMailbox;

/// Command carried from the main context to the compositor context.
pub type EngineCommand = MainToImplMsg<LayerTree>;

pub struct MainThreadChannels {
    pub command_queue: MainCommandQueue,
    pub input_ring_producer: MainInputRingProducer,
    pub feedback_mailbox: FeedbackMailbox,
}

pub struct ImplThreadChannels {
    pub command_queue: ImplCommandQueue,
    pub input_ring_consumer: ImplInputRingConsumer,
    pub feedback_sender: Sender<protocol::ImplToMainMsg>,
}

// Single producer, single consumer. Neither handle is `Clone`, so the shared
// ring cannot gain a second producer or consumer.
struct SharedInputRing {
    // The main side never blocks: when full the oldest event is evicted.
    queue: ArrayQueue<InputEvent>,
    notify_sender: Sender<()>,
    notify_receiver: Receiver<()>,
    dropped: AtomicU64,
    pushed: AtomicU64,
}

pub struct MainInputRingProducer {
    shared: Arc<SharedInputRing>,
    _not_sync: PhantomData<std::cell::Cell<()>>,
}

impl MainInputRingProducer {
    pub fn push(&self, event: InputEvent) {
        let mut pending_event = event;
        loop {
            match self.shared.queue.push(pending_event) {
                Ok(()) => {
                    self.shared.pushed.fetch_add(1, Ordering::Relaxed);
                    match self.shared.notify_sender.try_send(()) {
                        Ok(()) | Err(TrySendError::Full(())) => {}
                        Err(TrySendError::Disconnected(())) => {
                            tracing::debug!("input ring consumer is gone");
                        }
                    }
                    return;
                }
                Err(returned_event) => {
                    pending_event = returned_event;
                    if self.shared.queue.pop().is_some() {
                        self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    } else {
                        std::thread::yield_now();
                    }
                }
            }
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn pushed_events(&self) -> u64 {
        self.shared.pushed.load(Ordering::Relaxed)
    }
}

pub struct ImplInputRingConsumer {
    shared: Arc<SharedInputRing>,
    _not_sync: PhantomData<std::cell::Cell<()>>,
}

impl ImplInputRingConsumer {
    /// Appends up to `max_items` events to `output`, waiting at most
    /// `wait_timeout` for the first one. `output` is not cleared.
    pub fn drain_batch_with_wait(&self, output: &mut Vec<InputEvent>, max_items: usize, wait_timeout: Duration) {
        if max_items == 0 {
            return;
        }

        let mut drained_count = self.drain_available(output, max_items);
        if drained_count > 0 || wait_timeout.is_zero() {
            return;
        }

        let wait_deadline = Instant::now() + wait_timeout;
        loop {
            let now = Instant::now();
            if now >= wait_deadline {
                return;
            }
            let remaining = wait_deadline.saturating_duration_since(now);
            match self.shared.notify_receiver.recv_timeout(remaining) {
                Ok(()) => {
                    drained_count += self.drain_available(output, max_items - drained_count);
                    if drained_count > 0 {
                        return;
                    }
                }
                // The ring owns both notify ends, so this only ever times out.
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    fn drain_available(&self, output: &mut Vec<InputEvent>, max_items: usize) -> usize {
        let mut drained_count = 0;
        while drained_count < max_items {
            match self.shared.queue.pop() {
                Some(event) => {
                    output.push(event);
                    drained_count += 1;
                }
                None => break,
            }
        }
        drained_count
    }

    pub fn dropped_events(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn pushed_events(&self) -> u64 {
        self.shared.pushed.load(Ordering::Relaxed)
    }
}

pub struct MainCommandQueue {
    producer: Producer<EngineCommand>,
}

impl MainCommandQueue {
    pub fn push(&mut self, command: EngineCommand) -> Result<(), PushError<EngineCommand>> {
        self.producer.push(command)
    }

    pub fn blocking_push(&mut self, mut command: EngineCommand) {
        loop {
            match self.producer.push(command) {
                Ok(()) => break,
                Err(PushError::Full(returned_command)) => {
                    command = returned_command;
                    std::thread::yield_now();
                }
            }
        }
    }

    pub fn slots(&self) -> usize {
        self.producer.slots()
    }
}

pub struct ImplCommandQueue {
    consumer: Consumer<EngineCommand>,
}

impl ImplCommandQueue {
    pub fn pop(&mut self) -> Result<EngineCommand, PopError> {
        self.consumer.pop()
    }

    pub fn items(&self) -> usize {
        self.consumer.slots()
    }

    /// The main side dropped its end and every queued command was read.
    pub fn is_closed(&self) -> bool {
        self.consumer.is_abandoned() && self.consumer.is_empty()
    }
}

pub fn create_thread_channels(
    input_ring_capacity: usize,
    command_capacity: usize,
    feedback_capacity: usize,
) -> (MainThreadChannels, ImplThreadChannels) {
    assert!(input_ring_capacity > 0, "input ring capacity must be greater than zero");
    assert!(command_capacity > 0, "command capacity must be greater than zero");
    assert!(feedback_capacity > 0, "feedback capacity must be greater than zero");

    let (notify_sender, notify_receiver) = bounded(1);
    let shared_input_ring = Arc::new(SharedInputRing {
        queue: ArrayQueue::new(input_ring_capacity),
        notify_sender,
        notify_receiver,
        dropped: AtomicU64::new(0),
        pushed: AtomicU64::new(0),
    });

    let (command_producer, command_consumer) = RingBuffer::new(command_capacity);
    let (feedback_sender, feedback_receiver) = bounded(feedback_capacity);

    let main_thread_channels = MainThreadChannels {
        command_queue: MainCommandQueue {
            producer: command_producer,
        },
        input_ring_producer: MainInputRingProducer {
            shared: shared_input_ring.clone(),
            _not_sync: PhantomData,
        },
        feedback_mailbox: FeedbackMailbox::new(feedback_receiver),
    };

    let impl_thread_channels = ImplThreadChannels {
        command_queue: ImplCommandQueue {
            consumer: command_consumer,
        },
        input_ring_consumer: ImplInputRingConsumer {
            shared: shared_input_ring,
            _not_sync: PhantomData,
        },
        feedback_sender,
    };

    (main_thread_channels, impl_thread_channels)
}
