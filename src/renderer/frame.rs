use crate::config::ViewportConfig;
use crate::error::EngineError;
use crate::render_view::{DrawInstance, RenderView};
use ash::vk;

/// Everything the backend needs to record one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameInput<'a> {
    pub slot: usize,
    pub image: u32,
    pub time: f32,
    pub extent: vk::Extent2D,
    pub view: &'a RenderView,
    pub draws: &'a [DrawInstance],
}

/// The GPU operations the scheduler sequences. Per-frame calls report raw Vulkan results so the
/// scheduler can tell transient presentation conditions from device loss.
pub trait FrameBackend {
    /// Size the surface currently wants; zero while minimized.
    fn surface_extent(&self) -> vk::Extent2D;
    fn image_count(&self) -> usize;
    /// Rebuilds the swapchain and everything that depends on it. `Ok(false)` means the surface has a zero
    /// extent and nothing was built.
    fn recreate_swapchain(&mut self) -> Result<bool, EngineError>;
    /// Waits on the fence owned by frame slot `slot`. `Ok(false)` on timeout.
    fn wait_frame_fence(&mut self, slot: usize, timeout_ns: u64) -> Result<bool, vk::Result>;
    /// Called once slot `slot` is known to be idle; releases resources whose last use has retired.
    fn retire_frame(&mut self, slot: usize);
    /// Acquires the next image, signalling the image-available semaphore of `slot`. Returns the image
    /// index and whether the swapchain is suboptimal.
    fn acquire_image(&mut self, slot: usize, timeout_ns: u64) -> Result<(u32, bool), vk::Result>;
    fn reset_frame_fence(&mut self, slot: usize) -> Result<(), vk::Result>;
    /// Writes the uniform buffer of the slot and records its command buffer.
    fn record_frame(&mut self, input: &FrameInput<'_>) -> Result<(), vk::Result>;
    /// Submits the slot's command buffer: waits on image-available of `slot`, signals render-finished of
    /// `image`, and signals the slot's fence.
    fn submit_frame(&mut self, slot: usize, image: u32) -> Result<(), vk::Result>;
    /// Presents `image` after its render-finished semaphore. `Ok(true)` when suboptimal.
    fn present_image(&mut self, image: u32) -> Result<bool, vk::Result>;
    /// Tears down and rebuilds after surface or device loss.
    fn recover(&mut self) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotReady,
    InvalidDelta,
    ZeroExtent,
    FenceBusy,
    AcquireTimeout,
    OutOfDate,
    ImageBusy,
    InvalidImage,
    PresentOutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { slot: usize, image: u32, suboptimal: bool },
    Skipped(SkipReason),
    SwapchainRecreated(vk::Extent2D),
    Recovered,
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTimeouts {
    pub fence_ns: u64,
    pub acquire_ns: u64,
    pub image_wait_ns: u64,
}

impl Default for FrameTimeouts {
    fn default() -> Self {
        Self { fence_ns: 1_000_000, acquire_ns: 1_000_000, image_wait_ns: 1_000_000 }
    }
}

impl From<&ViewportConfig> for FrameTimeouts {
    fn from(config: &ViewportConfig) -> Self {
        Self {
            fence_ns: config.fence_timeout_ns,
            acquire_ns: config.acquire_timeout_ns,
            image_wait_ns: config.image_wait_timeout_ns,
        }
    }
}

/// Image acquired on an earlier tick whose previous user had not retired yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingImage {
    slot: usize,
    image: u32,
}

/// Frame-in-flight state machine. Owns no GPU objects; every GPU call goes through a [`FrameBackend`].
#[derive(Debug)]
pub struct FrameScheduler {
    frames_in_flight: usize,
    frame_index: usize,
    images_in_flight: Vec<Option<usize>>,
    /// Whether the slot's last submission has already been handed to `retire_frame`.
    retired: Vec<bool>,
    pending: Option<PendingImage>,
    needs_recreate: bool,
    ready: bool,
    waiting_for_extent: bool,
    time: f32,
    frames_presented: u64,
    timeouts: FrameTimeouts,
}

impl FrameScheduler {
    pub fn new(frames_in_flight: usize, image_count: usize, timeouts: FrameTimeouts) -> Self {
        let frames_in_flight = frames_in_flight.clamp(1, ViewportConfig::MAX_FRAMES_IN_FLIGHT);
        Self {
            frames_in_flight,
            frame_index: 0,
            images_in_flight: vec![None; image_count],
            retired: vec![false; frames_in_flight],
            pending: None,
            needs_recreate: false,
            ready: true,
            waiting_for_extent: false,
            time: 0.0,
            frames_presented: 0,
            timeouts,
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn needs_recreate(&self) -> bool {
        self.needs_recreate
    }

    pub fn request_recreate(&mut self) {
        self.needs_recreate = true;
    }

    /// Frame slot whose fence currently guards swapchain image `image`.
    pub fn image_owner(&self, image: u32) -> Option<usize> {
        self.images_in_flight.get(image as usize).copied().flatten()
    }

    /// Forgets per-image tracking after the swapchain (and its images) were rebuilt.
    pub fn reset_images(&mut self, image_count: usize) {
        self.images_in_flight = vec![None; image_count];
        self.pending = None;
    }

    /// Re-arms a scheduler that went not-ready after a failed recovery.
    pub fn reset(&mut self, image_count: usize) {
        self.reset_images(image_count);
        self.retired.fill(false);
        self.frame_index = 0;
        self.needs_recreate = false;
        self.waiting_for_extent = false;
        self.ready = true;
    }

    /// Runs one tick. Transient conditions skip the tick; only errors the scheduler cannot absorb are
    /// returned.
    pub fn render_frame<B: FrameBackend>(
        &mut self,
        backend: &mut B,
        dt: f32,
        view: &RenderView,
        draws: &[DrawInstance],
    ) -> Result<FrameOutcome, EngineError> {
        if !self.ready {
            return Ok(FrameOutcome::Skipped(SkipReason::NotReady));
        }
        if !dt.is_finite() || dt < 0.0 {
            log::debug!(target: "viewport", "dropping frame with invalid delta time {dt}");
            return Ok(FrameOutcome::Skipped(SkipReason::InvalidDelta));
        }
        self.time += dt;

        if self.needs_recreate {
            return self.recreate(backend);
        }
        let extent = backend.surface_extent();
        if extent.width == 0 || extent.height == 0 {
            if !self.waiting_for_extent {
                log::info!(target: "viewport", "waiting for a valid surface extent");
                self.waiting_for_extent = true;
            }
            return Ok(FrameOutcome::Skipped(SkipReason::ZeroExtent));
        }
        self.waiting_for_extent = false;

        let (slot, image) = match self.pending.take() {
            Some(pending) => (pending.slot, pending.image),
            None => {
                let slot = self.frame_index;
                match self.acquire(backend, slot)? {
                    Ok(image) => (slot, image),
                    Err(outcome) => return Ok(outcome),
                }
            }
        };

        if let Some(owner) = self.image_owner(image) {
            if owner != slot {
                match backend.wait_frame_fence(owner, self.timeouts.image_wait_ns) {
                    Ok(true) => {}
                    Ok(false) => {
                        self.pending = Some(PendingImage { slot, image });
                        return Ok(FrameOutcome::Skipped(SkipReason::ImageBusy));
                    }
                    Err(err) => return self.handle_device_error(backend, "image fence wait", err),
                }
            }
        }

        if let Err(err) = backend.reset_frame_fence(slot) {
            return self.handle_device_error(backend, "fence reset", err);
        }
        self.images_in_flight[image as usize] = Some(slot);

        let input = FrameInput { slot, image, time: self.time, extent, view, draws };
        let submitted = backend
            .record_frame(&input)
            .map_err(|err| ("command recording", err))
            .and_then(|()| backend.submit_frame(slot, image).map_err(|err| ("queue submit", err)));
        if let Err((context, err)) = submitted {
            // The slot fence is reset and nothing will signal it; rebuilding recreates it signalled.
            self.images_in_flight[image as usize] = None;
            self.needs_recreate = true;
            return self.handle_device_error(backend, context, err);
        }
        self.retired[slot] = false;

        match backend.present_image(image) {
            Ok(suboptimal) => {
                if suboptimal {
                    self.needs_recreate = true;
                }
                self.advance();
                Ok(FrameOutcome::Presented { slot, image, suboptimal })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.needs_recreate = true;
                Ok(FrameOutcome::Skipped(SkipReason::PresentOutOfDate))
            }
            Err(err @ (vk::Result::ERROR_SURFACE_LOST_KHR | vk::Result::ERROR_DEVICE_LOST)) => {
                log::warn!(target: "viewport", "present failed: {err:?}");
                Ok(self.attempt_recovery(backend))
            }
            Err(err) => {
                log::warn!(target: "viewport", "present failed: {err:?}; recreating swapchain");
                self.needs_recreate = true;
                Ok(FrameOutcome::Skipped(SkipReason::PresentOutOfDate))
            }
        }
    }

    /// Waits for the slot to retire and acquires an image. The inner `Err` carries the outcome of a
    /// skipped tick.
    fn acquire<B: FrameBackend>(
        &mut self,
        backend: &mut B,
        slot: usize,
    ) -> Result<Result<u32, FrameOutcome>, EngineError> {
        match backend.wait_frame_fence(slot, self.timeouts.fence_ns) {
            Ok(true) => {}
            Ok(false) => return Ok(Err(FrameOutcome::Skipped(SkipReason::FenceBusy))),
            Err(err) => return self.handle_device_error(backend, "fence wait", err).map(Err),
        }
        if !self.retired[slot] {
            backend.retire_frame(slot);
            self.retired[slot] = true;
        }

        match backend.acquire_image(slot, self.timeouts.acquire_ns) {
            Ok((image, suboptimal)) => {
                if suboptimal {
                    self.needs_recreate = true;
                }
                if image as usize >= self.images_in_flight.len() {
                    log::error!(
                        target: "viewport",
                        "acquired image {image} outside the {} tracked images",
                        self.images_in_flight.len()
                    );
                    return Ok(Err(FrameOutcome::Skipped(SkipReason::InvalidImage)));
                }
                Ok(Ok(image))
            }
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => {
                Ok(Err(FrameOutcome::Skipped(SkipReason::AcquireTimeout)))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::ERROR_SURFACE_LOST_KHR) => {
                self.needs_recreate = true;
                Ok(Err(FrameOutcome::Skipped(SkipReason::OutOfDate)))
            }
            Err(err) => self.handle_device_error(backend, "acquire", err).map(Err),
        }
    }

    fn recreate<B: FrameBackend>(&mut self, backend: &mut B) -> Result<FrameOutcome, EngineError> {
        match backend.recreate_swapchain() {
            Ok(true) => {
                self.needs_recreate = false;
                self.waiting_for_extent = false;
                self.reset_images(backend.image_count());
                let extent = backend.surface_extent();
                log::info!(target: "viewport", "swapchain recreated at {}x{}", extent.width, extent.height);
                Ok(FrameOutcome::SwapchainRecreated(extent))
            }
            Ok(false) => {
                if !self.waiting_for_extent {
                    log::info!(target: "viewport", "waiting for a valid surface extent");
                    self.waiting_for_extent = true;
                }
                Ok(FrameOutcome::Skipped(SkipReason::ZeroExtent))
            }
            Err(err) if err.is_transient() => {
                log::debug!(target: "viewport", "swapchain recreation deferred: {err}");
                Ok(FrameOutcome::Skipped(SkipReason::OutOfDate))
            }
            Err(err) => {
                log::error!(target: "viewport", "swapchain recreation failed: {err}");
                Ok(self.attempt_recovery(backend))
            }
        }
    }

    fn handle_device_error<B: FrameBackend>(
        &mut self,
        backend: &mut B,
        context: &str,
        err: vk::Result,
    ) -> Result<FrameOutcome, EngineError> {
        if matches!(err, vk::Result::ERROR_DEVICE_LOST | vk::Result::ERROR_SURFACE_LOST_KHR) {
            log::warn!(target: "viewport", "{context}: {err:?}");
            return Ok(self.attempt_recovery(backend));
        }
        Err(EngineError::from_vk(context, err))
    }

    /// One recovery attempt; failure leaves the scheduler not ready until it is reset.
    fn attempt_recovery<B: FrameBackend>(&mut self, backend: &mut B) -> FrameOutcome {
        match backend.recover() {
            Ok(()) => {
                self.reset(backend.image_count());
                log::info!(target: "viewport", "recovered from device or surface loss");
                FrameOutcome::Recovered
            }
            Err(err) => {
                log::error!(target: "viewport", "recovery failed: {err}");
                self.ready = false;
                FrameOutcome::Lost
            }
        }
    }

    fn advance(&mut self) {
        self.frame_index = (self.frame_index + 1) % self.frames_in_flight;
        self.frames_presented += 1;
    }
}
