use super::frame::{FrameBackend, FrameOutcome, FrameScheduler, FrameTimeouts, SkipReason};
use super::surface::WindowHandleSurface;
use super::vulkan_backend::VulkanBackend;
use super::{FrameEvent, FrameEvents};
use crate::assets::{AssetChange, AssetId, AssetRegistry};
use crate::config::ViewportConfig;
use crate::error::EngineError;
use crate::render_view::{self, RenderView};
use crossbeam_channel::Receiver;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

/// Result of polling the registry change-log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangePoll {
    Changes(Vec<AssetChange>),
    /// Events were lost to truncation or the registry was reset; cached state must be reloaded.
    Gap,
}

/// Remembers the last change serial a consumer has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeCursor {
    last_seen: u64,
}

impl ChangeCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    pub fn poll(&mut self, registry: &AssetRegistry) -> ChangePoll {
        let latest = registry.change_serial();
        if latest < self.last_seen || registry.oldest_retained_serial() > self.last_seen + 1 {
            self.last_seen = latest;
            return ChangePoll::Gap;
        }
        let changes = registry.changes_since(self.last_seen);
        if let Some(last) = changes.last() {
            self.last_seen = last.serial;
        }
        ChangePoll::Changes(changes)
    }
}

/// Window-bound renderer: owns the Vulkan backend, the frame scheduler and the frame event hub.
pub struct Viewport {
    config: ViewportConfig,
    backend: Option<VulkanBackend>,
    scheduler: FrameScheduler,
    events: FrameEvents,
    changes: ChangeCursor,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new()
    }
}

impl Viewport {
    pub fn new() -> Self {
        let config = ViewportConfig::default();
        Self {
            scheduler: FrameScheduler::new(config.frame_count(), 0, FrameTimeouts::from(&config)),
            config,
            backend: None,
            events: FrameEvents::default(),
            changes: ChangeCursor::new(),
        }
    }

    /// Binds the viewport to `window`, replacing any previous device. Also the way back after a failed
    /// recovery left the viewport not ready.
    pub fn initialize<W>(
        &mut self,
        window: Arc<W>,
        width: u32,
        height: u32,
        config: &ViewportConfig,
    ) -> Result<(), EngineError>
    where
        W: HasDisplayHandle + HasWindowHandle + 'static,
    {
        self.shutdown();
        let platform = Box::new(WindowHandleSurface::new(window));
        let mut backend = VulkanBackend::new(platform, width, height, config)?;
        let mut scheduler = FrameScheduler::new(backend.frames_in_flight(), 0, FrameTimeouts::from(config));
        match backend.recreate_swapchain() {
            Ok(true) => scheduler.reset_images(backend.image_count()),
            Ok(false) => {
                log::info!(target: "viewport", "initialized with a zero extent; waiting for a resize");
                scheduler.request_recreate();
            }
            Err(err) if err.is_transient() => scheduler.request_recreate(),
            Err(err) => return Err(err),
        }
        log::info!(
            target: "viewport",
            "viewport ready: {width}x{height}, {} frames in flight",
            scheduler.frames_in_flight()
        );
        self.config = config.clone();
        self.scheduler = scheduler;
        self.backend = Some(backend);
        self.changes = ChangeCursor::new();
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.backend.is_some() && self.scheduler.is_ready()
    }

    pub fn frames_presented(&self) -> u64 {
        self.scheduler.frames_presented()
    }

    pub fn subscribe(&mut self) -> Receiver<FrameEvent> {
        self.events.subscribe()
    }

    /// Records the new window size; the swapchain is rebuilt on the next tick.
    pub fn resize(&mut self, width: u32, height: u32) {
        if let Some(backend) = self.backend.as_mut() {
            backend.resize(width, height);
            self.scheduler.request_recreate();
        }
    }

    /// Feeds registry changes to the GPU mesh cache. Returns the number of evicted meshes, or every
    /// resident mesh when a gap forced a full reload.
    pub fn handle_asset_changes(&mut self, registry: &AssetRegistry) -> usize {
        let Some(backend) = self.backend.as_mut() else {
            return 0;
        };
        match self.changes.poll(registry) {
            ChangePoll::Changes(changes) => {
                if changes.is_empty() {
                    return 0;
                }
                let evicted = backend.apply_asset_changes(&changes);
                log::debug!(target: "viewport", "{} asset change(s), {evicted} mesh(es) evicted", changes.len());
                evicted
            }
            ChangePoll::Gap => {
                log::info!(target: "viewport", "asset change-log gap; reloading every GPU mesh");
                backend.invalidate_meshes();
                0
            }
        }
    }

    /// Renders one tick of `view`. Meshes are fetched from `registry` when given; without one every draw
    /// uses the builtin mesh.
    pub fn render_frame(
        &mut self,
        dt: f32,
        view: &RenderView,
        registry: Option<&AssetRegistry>,
    ) -> Result<FrameOutcome, EngineError> {
        if self.backend.is_none() {
            return Ok(FrameOutcome::Skipped(SkipReason::NotReady));
        }
        if let Some(registry) = registry {
            self.handle_asset_changes(registry);
        }

        let time = if dt.is_finite() && dt >= 0.0 { self.scheduler.time() + dt } else { self.scheduler.time() };
        let draws = render_view::assemble_or_placeholder(view, time);
        let Some(backend) = self.backend.as_mut() else {
            return Ok(FrameOutcome::Skipped(SkipReason::NotReady));
        };
        if let Some(registry) = registry {
            let ids: Vec<AssetId> = draws.iter().filter_map(|draw| draw.mesh_id).collect();
            backend.prepare_meshes(registry, &ids);
        }

        let outcome = self.scheduler.render_frame(backend, dt, view, &draws);
        match &outcome {
            Ok(outcome) => {
                if self.config.verbose_logging {
                    log::debug!(target: "viewport", "tick {dt:.4}s: {outcome:?} ({} draws)", draws.len());
                }
                self.events.publish(FrameEvent::from_outcome(*outcome, self.scheduler.frames_presented()));
            }
            Err(err) => log::error!(target: "viewport", "frame failed: {err}"),
        }
        outcome
    }

    /// Releases every GPU object. The viewport can be initialized again afterwards.
    pub fn shutdown(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.shutdown();
            log::info!(target: "viewport", "viewport shut down after {} frames", self.scheduler.frames_presented());
        }
    }
}

impl Drop for Viewport {
    fn drop(&mut self) {
        self.shutdown();
    }
}
