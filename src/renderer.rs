pub mod context;
pub mod frame;
pub mod gpu_mesh;
pub mod shaders;
pub mod surface;
pub mod swapchain;
pub mod uniforms;
pub mod viewport;
pub mod vulkan_backend;

pub use frame::{FrameBackend, FrameInput, FrameOutcome, FrameScheduler, FrameTimeouts, SkipReason};
pub use surface::{PlatformSurface, WindowHandleSurface};
pub use viewport::{ChangeCursor, ChangePoll, Viewport};
pub use vulkan_backend::VulkanBackend;

use crossbeam_channel::{Receiver, Sender, TrySendError};

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// What happened on one viewport tick, as seen by subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEvent {
    Presented { frame: u64, image: u32 },
    Skipped { reason: SkipReason },
    SwapchainRecreated { extent: (u32, u32) },
    Recovered,
    DeviceLost,
}

impl FrameEvent {
    /// `frame` is the presented-frame counter after the tick.
    pub fn from_outcome(outcome: FrameOutcome, frame: u64) -> Self {
        match outcome {
            FrameOutcome::Presented { image, .. } => FrameEvent::Presented { frame, image },
            FrameOutcome::Skipped(reason) => FrameEvent::Skipped { reason },
            FrameOutcome::SwapchainRecreated(extent) => {
                FrameEvent::SwapchainRecreated { extent: (extent.width, extent.height) }
            }
            FrameOutcome::Recovered => FrameEvent::Recovered,
            FrameOutcome::Lost => FrameEvent::DeviceLost,
        }
    }
}

/// Fan-out of frame events to bounded subscriber channels. A full subscriber misses events rather than
/// stalling the render loop; a dropped receiver is forgotten on the next publish.
#[derive(Debug)]
pub struct FrameEvents {
    subscribers: Vec<Sender<FrameEvent>>,
    capacity: usize,
}

impl Default for FrameEvents {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl FrameEvents {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { subscribers: Vec::new(), capacity: capacity.max(1) }
    }

    pub fn subscribe(&mut self) -> Receiver<FrameEvent> {
        let (tx, rx) = crossbeam_channel::bounded(self.capacity);
        self.subscribers.push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn publish(&mut self, event: FrameEvent) {
        self.subscribers.retain(|tx| match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!(target: "viewport", "frame event subscriber is full; dropping {event:?}");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}
