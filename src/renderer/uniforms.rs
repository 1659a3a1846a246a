use crate::render_view::{DrawInstance, ProjectionKind, RenderCamera};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Half-height of the view volume used when the scene provides no camera.
pub const DEFAULT_ORTHO_HALF_HEIGHT: f32 = 2.0;

/// Per-frame uniform block, binding 0 of set 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameUniform {
    pub view_proj: [[f32; 4]; 4],
    /// x = seconds since the viewport started; yzw unused.
    pub time: [f32; 4],
}

impl FrameUniform {
    pub const SIZE: vk::DeviceSize = std::mem::size_of::<FrameUniform>() as vk::DeviceSize;

    pub fn new(camera: &RenderCamera, extent: vk::Extent2D, time: f32) -> Self {
        Self { view_proj: view_projection(camera, extent).to_cols_array_2d(), time: [time, 0.0, 0.0, 0.0] }
    }
}

/// Per-draw push constants: model matrix then RGBA tint.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DrawPushConstants {
    pub model: [[f32; 4]; 4],
    pub tint: [f32; 4],
}

impl DrawPushConstants {
    pub const SIZE: u32 = std::mem::size_of::<DrawPushConstants>() as u32;
}

impl From<&DrawInstance> for DrawPushConstants {
    fn from(draw: &DrawInstance) -> Self {
        Self { model: draw.model.to_cols_array_2d(), tint: draw.tint.to_array() }
    }
}

/// Vulkan clip space has +Y pointing down and depth in [0, 1].
fn flip_y(mut projection: Mat4) -> Mat4 {
    projection.y_axis.y = -projection.y_axis.y;
    projection
}

fn aspect(extent: vk::Extent2D) -> f32 {
    if extent.width == 0 || extent.height == 0 {
        1.0
    } else {
        extent.width as f32 / extent.height as f32
    }
}

pub fn view_projection(camera: &RenderCamera, extent: vk::Extent2D) -> Mat4 {
    let aspect = aspect(extent);
    if !camera.enabled {
        let half_h = DEFAULT_ORTHO_HALF_HEIGHT;
        let half_w = half_h * aspect;
        return flip_y(Mat4::orthographic_rh(-half_w, half_w, -half_h, half_h, -10.0, 10.0));
    }

    let forward = camera.forward.try_normalize().unwrap_or(Vec3::NEG_Z);
    let mut up = camera.up.try_normalize().unwrap_or(Vec3::Y);
    if forward.cross(up).length_squared() < 1e-8 {
        up = if forward.y.abs() < 0.99 { Vec3::Y } else { Vec3::Z };
    }
    let view = Mat4::look_to_rh(camera.position, forward, up);
    let near = camera.near.max(1e-4);
    let far = camera.far.max(near + 1e-3);
    let projection = match camera.projection {
        ProjectionKind::Perspective => {
            let fov = camera.vertical_fov_deg.clamp(1.0, 179.0).to_radians();
            Mat4::perspective_rh(fov, aspect, near, far)
        }
        ProjectionKind::Orthographic => {
            let half_h = (camera.orthographic_size * 0.5).max(1e-3);
            let half_w = half_h * aspect;
            Mat4::orthographic_rh(-half_w, half_w, -half_h, half_h, near, far)
        }
    };
    flip_y(projection) * view
}
