use crate::error::EngineError;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::c_char;
use std::sync::Arc;

/// Creates presentation surfaces for one native window. The renderer only ever sees the resulting
/// `vk::SurfaceKHR`.
pub trait PlatformSurface {
    /// Instance extensions the surface type requires.
    fn required_extensions(&self) -> Result<Vec<*const c_char>, EngineError>;

    /// # Safety
    /// `instance` must have been created with [`PlatformSurface::required_extensions`] enabled and must
    /// outlive the returned surface.
    unsafe fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<vk::SurfaceKHR, EngineError>;

    /// Brings the native drawable in line with a new window size and returns the extent the swapchain
    /// should request.
    fn sync_extent(&self, width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }
}

/// Surface source backed by raw-window-handle: Win32 HWND on Windows, a CAMetalLayer on the NSView on
/// macOS, Xlib/Xcb/Wayland elsewhere. Holding the window keeps the native handle alive.
pub struct WindowHandleSurface<W> {
    window: Arc<W>,
}

impl<W> WindowHandleSurface<W> {
    pub fn new(window: Arc<W>) -> Self {
        Self { window }
    }

    pub fn window(&self) -> &Arc<W> {
        &self.window
    }
}

impl<W: HasDisplayHandle + HasWindowHandle> PlatformSurface for WindowHandleSurface<W> {
    fn required_extensions(&self) -> Result<Vec<*const c_char>, EngineError> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| EngineError::FatalGpu(format!("display handle unavailable: {e}")))?;
        ash_window::enumerate_required_extensions(display.as_raw())
            .map(<[*const c_char]>::to_vec)
            .map_err(|e| EngineError::from_vk("enumerate surface extensions", e))
    }

    unsafe fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<vk::SurfaceKHR, EngineError> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| EngineError::FatalGpu(format!("display handle unavailable: {e}")))?;
        let window = self
            .window
            .window_handle()
            .map_err(|e| EngineError::FatalGpu(format!("window handle unavailable: {e}")))?;
        ash_window::create_surface(entry, instance, display.as_raw(), window.as_raw(), None)
            .map_err(|e| EngineError::from_vk("create surface", e))
    }
}
