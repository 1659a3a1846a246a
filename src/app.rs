use crate::assets::{AssetEntry, AssetRegistry, AssetType, AssetWatcher};
use crate::config::{EngineConfig, EngineConfigOverrides};
use crate::logging::{self, LogChannel};
use crate::render_view::{MeshRendererDesc, RenderCamera, RenderInstance, RenderView, TransformDesc};
use crate::renderer::{FrameEvent, FrameOutcome, Viewport};
use crate::time::FrameClock;
use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use glam::Vec3;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

pub const DEFAULT_CONFIG_PATH: &str = "config/viewer.json";

const GALLERY_SPACING: f32 = 2.5;
const GALLERY_SPIN_DEG_PER_SEC: f32 = 30.0;
const STATS_INTERVAL: Duration = Duration::from_secs(5);

pub fn run() -> Result<()> {
    run_with_overrides(None, EngineConfigOverrides::default())
}

pub fn run_with_overrides(config_path: Option<&Path>, overrides: EngineConfigOverrides) -> Result<()> {
    let channel = Arc::new(LogChannel::with_stderr(Default::default()));
    if logging::install_global(channel.clone()).is_err() {
        eprintln!("[logging] a global logger is already installed; viewer logs go to it instead");
    }
    let mut config = EngineConfig::load_or_default(config_path.unwrap_or(Path::new(DEFAULT_CONFIG_PATH)));
    config.apply_overrides(&overrides);
    channel.set_min_level(config.logging.level);
    log::set_max_level(config.logging.level.to_filter());

    let event_loop = EventLoop::new().context("Failed to create winit event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);
    let mut app = App::new(config);
    event_loop.run_app(&mut app).context("Event loop execution failed")?;
    Ok(())
}

/// Viewer shell: one window, one viewport, and the registry backing its meshes.
pub struct App {
    config: EngineConfig,
    window: Option<Arc<Window>>,
    viewport: Viewport,
    registry: AssetRegistry,
    watcher: Option<AssetWatcher>,
    view: RenderView,
    clock: FrameClock,
    frame_events: Receiver<FrameEvent>,
    stats: FrameStats,
    should_close: bool,
}

#[derive(Debug)]
struct FrameStats {
    since: Instant,
    presented: u64,
    skipped: u64,
}

impl FrameStats {
    fn new() -> Self {
        Self { since: Instant::now(), presented: 0, skipped: 0 }
    }

    fn record(&mut self, event: FrameEvent) {
        match event {
            FrameEvent::Presented { .. } => self.presented += 1,
            FrameEvent::Skipped { .. } => self.skipped += 1,
            FrameEvent::SwapchainRecreated { extent: (width, height) } => {
                log::debug!(target: "viewport", "swapchain now {width}x{height}");
            }
            FrameEvent::Recovered | FrameEvent::DeviceLost => {}
        }
    }

    fn report_if_due(&mut self) {
        let elapsed = self.since.elapsed();
        if elapsed < STATS_INTERVAL {
            return;
        }
        let fps = self.presented as f32 / elapsed.as_secs_f32();
        log::debug!(target: "viewport", "{fps:.1} fps ({} presented, {} skipped)", self.presented, self.skipped);
        *self = Self::new();
    }
}

impl App {
    pub fn new(config: EngineConfig) -> Self {
        let registry = AssetRegistry::with_capacity(config.assets.change_log_capacity);
        let summary = registry.scan(&config.assets.root);
        log::info!(
            target: "assets",
            "scanned {}: {} assets, {} changes",
            config.assets.root.display(),
            summary.entry_count,
            summary.changes.len()
        );
        let watcher = if config.assets.watch {
            match AssetWatcher::new(&config.assets.root) {
                Ok(watcher) => Some(watcher),
                Err(err) => {
                    log::warn!(target: "assets", "asset watching disabled: {err:?}");
                    None
                }
            }
        } else {
            None
        };
        let view = build_view(&registry);
        let mut viewport = Viewport::new();
        let frame_events = viewport.subscribe();
        Self {
            config,
            window: None,
            viewport,
            registry,
            watcher,
            view,
            clock: FrameClock::new(),
            frame_events,
            stats: FrameStats::new(),
            should_close: false,
        }
    }

    fn initialize_viewport(&mut self) -> bool {
        let Some(window) = self.window.clone() else {
            return false;
        };
        let size = window.inner_size();
        match self.viewport.initialize(window, size.width, size.height, &self.config.viewport) {
            Ok(()) => true,
            Err(err) => {
                log::error!(target: "viewport", "viewport initialization failed: {err}");
                false
            }
        }
    }

    fn refresh_assets(&mut self) {
        let Some(watcher) = self.watcher.as_mut() else {
            return;
        };
        if !watcher.poll_dirty() {
            return;
        }
        let summary = self.registry.rescan();
        if !summary.changes.is_empty() {
            log::info!(target: "assets", "rescan: {} change(s)", summary.changes.len());
            self.view = build_view(&self.registry);
        }
    }

    fn redraw(&mut self) {
        let dt = self.clock.tick();
        match self.viewport.render_frame(dt, &self.view, Some(&self.registry)) {
            Ok(FrameOutcome::Lost) => {
                log::warn!(target: "viewport", "device lost; reinitializing the viewport");
                if !self.initialize_viewport() {
                    self.should_close = true;
                }
            }
            Ok(_) => {}
            Err(err) => log::error!(target: "viewport", "render error: {err}"),
        }
        for event in self.frame_events.try_iter() {
            self.stats.record(event);
        }
        self.stats.report_if_due();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attributes = Window::default_attributes()
            .with_title(self.config.window.title.clone())
            .with_inner_size(PhysicalSize::new(self.config.window.width, self.config.window.height));
        match event_loop.create_window(attributes) {
            Ok(window) => self.window = Some(Arc::new(window)),
            Err(err) => {
                log::error!(target: "viewport", "failed to create window: {err}");
                self.should_close = true;
                return;
            }
        }
        if !self.initialize_viewport() {
            self.should_close = true;
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => self.should_close = true,
            WindowEvent::Resized(size) => self.viewport.resize(size.width, size.height),
            WindowEvent::KeyboardInput {
                event: KeyEvent { logical_key: Key::Named(NamedKey::Escape), state: ElementState::Pressed, .. },
                ..
            } => self.should_close = true,
            WindowEvent::RedrawRequested => self.redraw(),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.should_close {
            self.viewport.shutdown();
            event_loop.exit();
            return;
        }
        self.refresh_assets();
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.viewport.shutdown();
    }
}

/// The first scene asset that parses as a render view, else a gallery of every importable mesh.
fn build_view(registry: &AssetRegistry) -> RenderView {
    let entries = registry.entries();
    for entry in entries.iter().filter(|entry| entry.asset_type == AssetType::Scene) {
        match load_scene_view(&entry.path) {
            Ok(view) if !view.instances.is_empty() => {
                log::info!(target: "assets", "viewing scene {}", entry.path.display());
                return view;
            }
            Ok(_) => {}
            Err(err) => log::debug!(target: "assets", "{err:?}"),
        }
    }
    gallery_view(&entries)
}

fn load_scene_view(path: &Path) -> Result<RenderView> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read scene {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("Scene {} is not a render view", path.display()))
}

fn gallery_view(entries: &[AssetEntry]) -> RenderView {
    let meshes: Vec<&AssetEntry> = entries
        .iter()
        .filter(|entry| entry.asset_type == AssetType::Mesh && crate::mesh::is_importable(&entry.path))
        .collect();
    let offset = (meshes.len().max(1) - 1) as f32 * 0.5;
    let instances = meshes
        .iter()
        .enumerate()
        .map(|(index, entry)| RenderInstance {
            entity_id: index as u64 + 1,
            transform: Some(TransformDesc {
                position: Vec3::new((index as f32 - offset) * GALLERY_SPACING, 0.0, 0.0),
                ..TransformDesc::default()
            }),
            mesh: Some(MeshRendererDesc {
                mesh_asset_id: Some(entry.id),
                rotation_speed_deg_per_sec: GALLERY_SPIN_DEG_PER_SEC,
                ..MeshRendererDesc::default()
            }),
            ..RenderInstance::default()
        })
        .collect();
    let distance = 6.0 + offset * GALLERY_SPACING;
    let position = Vec3::new(0.0, 1.5, distance);
    RenderView {
        instances,
        camera: RenderCamera { enabled: true, position, forward: -position, ..RenderCamera::default() },
        ..RenderView::default()
    }
}
