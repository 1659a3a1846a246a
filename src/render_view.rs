use crate::assets::AssetId;
use glam::{EulerRot, Mat4, Quat, Vec3, Vec4};
use serde::Deserialize;
use std::collections::HashMap;

pub type EntityId = u64;

/// Tint used for the liveness draw issued when a view produces nothing to draw.
pub const EMPTY_VIEW_TINT: Vec4 = Vec4::new(0.9, 0.35, 0.2, 1.0);

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct TransformDesc {
    pub position: Vec3,
    /// Euler angles in degrees, applied X then Y then Z.
    pub rotation_deg: Vec3,
    pub scale: Vec3,
    pub parent: Option<EntityId>,
}

impl Default for TransformDesc {
    fn default() -> Self {
        Self { position: Vec3::ZERO, rotation_deg: Vec3::ZERO, scale: Vec3::ONE, parent: None }
    }
}

impl TransformDesc {
    pub fn local_matrix(&self, extra_spin_deg: f32) -> Mat4 {
        let rotation = Quat::from_euler(
            EulerRot::ZYX,
            (self.rotation_deg.z + extra_spin_deg).to_radians(),
            self.rotation_deg.y.to_radians(),
            self.rotation_deg.x.to_radians(),
        );
        Mat4::from_scale_rotation_translation(self.scale, rotation, self.position)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct MeshRendererDesc {
    pub mesh_asset_id: Option<AssetId>,
    pub albedo_texture_id: Option<AssetId>,
    pub color: Option<[f32; 3]>,
    pub rotation_speed_deg_per_sec: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct RenderInstance {
    pub entity_id: EntityId,
    /// Explicit world matrix; bypasses transform resolution when present.
    pub model: Option<Mat4>,
    pub transform: Option<TransformDesc>,
    pub mesh: Option<MeshRendererDesc>,
    pub mesh_asset_id: Option<AssetId>,
    pub albedo_texture_id: Option<AssetId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionKind {
    #[default]
    Perspective,
    Orthographic,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderCamera {
    pub enabled: bool,
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
    pub vertical_fov_deg: f32,
    pub near: f32,
    pub far: f32,
    /// Full visible height for orthographic projection.
    pub orthographic_size: f32,
    pub projection: ProjectionKind,
}

impl Default for RenderCamera {
    fn default() -> Self {
        Self {
            enabled: false,
            position: Vec3::new(0.0, 0.0, 5.0),
            forward: Vec3::NEG_Z,
            up: Vec3::Y,
            vertical_fov_deg: 60.0,
            near: 0.1,
            far: 100.0,
            orthographic_size: 10.0,
            projection: ProjectionKind::Perspective,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderDirectionalLight {
    pub enabled: bool,
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub ambient: f32,
}

impl Default for RenderDirectionalLight {
    fn default() -> Self {
        Self { enabled: false, direction: Vec3::NEG_Y, color: Vec3::ONE, intensity: 1.0, ambient: 0.2 }
    }
}

/// Logical scene handed to the viewport each frame. Transforms and mesh renderers may be given inline on
/// each instance or through the lookup tables.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct RenderView {
    pub instances: Vec<RenderInstance>,
    pub transforms: HashMap<EntityId, TransformDesc>,
    pub mesh_renderers: HashMap<EntityId, MeshRendererDesc>,
    pub camera: RenderCamera,
    pub light: RenderDirectionalLight,
}

/// One resolved draw: world matrix, tint and the assets to bind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawInstance {
    pub entity_id: Option<EntityId>,
    pub model: Mat4,
    pub tint: Vec4,
    pub mesh_id: Option<AssetId>,
    pub texture_id: Option<AssetId>,
}

impl DrawInstance {
    pub fn placeholder() -> Self {
        Self { entity_id: None, model: Mat4::IDENTITY, tint: EMPTY_VIEW_TINT, mesh_id: None, texture_id: None }
    }
}

struct Resolver<'a> {
    transforms: HashMap<EntityId, TransformDesc>,
    renderers: &'a HashMap<EntityId, MeshRendererDesc>,
    inline_renderers: HashMap<EntityId, &'a MeshRendererDesc>,
    world: HashMap<EntityId, Mat4>,
    time: f32,
}

impl<'a> Resolver<'a> {
    fn new(view: &'a RenderView, time: f32) -> Self {
        let transforms = if view.transforms.is_empty() {
            view.instances.iter().filter_map(|inst| inst.transform.map(|t| (inst.entity_id, t))).collect()
        } else {
            view.transforms.clone()
        };
        let inline_renderers = if view.mesh_renderers.is_empty() {
            view.instances.iter().filter_map(|inst| inst.mesh.as_ref().map(|m| (inst.entity_id, m))).collect()
        } else {
            HashMap::new()
        };
        Self { transforms, renderers: &view.mesh_renderers, inline_renderers, world: HashMap::new(), time }
    }

    fn renderer(&self, entity: EntityId) -> Option<&'a MeshRendererDesc> {
        self.renderers.get(&entity).or_else(|| self.inline_renderers.get(&entity).copied())
    }

    fn spin_deg(&self, entity: EntityId) -> f32 {
        self.renderer(entity).map_or(0.0, |mesh| mesh.rotation_speed_deg_per_sec * self.time)
    }

    /// World matrix of `entity`, walking the parent chain iteratively. Entities seen twice in one chain
    /// (a cycle) contribute identity.
    fn world_matrix(&mut self, entity: EntityId) -> Option<Mat4> {
        if let Some(world) = self.world.get(&entity) {
            return Some(*world);
        }
        self.transforms.get(&entity)?;

        let mut chain = vec![entity];
        let mut parent_world = Mat4::IDENTITY;
        let mut cursor = self.transforms.get(&entity).and_then(|t| t.parent);
        while let Some(parent) = cursor {
            if let Some(world) = self.world.get(&parent) {
                parent_world = *world;
                break;
            }
            if chain.contains(&parent) {
                log::warn!(target: "render_view", "transform parent cycle through entity {parent}");
                break;
            }
            let Some(transform) = self.transforms.get(&parent) else {
                break;
            };
            chain.push(parent);
            cursor = transform.parent;
        }

        let mut world = parent_world;
        for id in chain.iter().rev() {
            let local = self.transforms[id].local_matrix(self.spin_deg(*id));
            world *= local;
            self.world.insert(*id, world);
        }
        Some(world)
    }
}

/// Flattens the view into draw records. Instances with neither an explicit model nor a transform are
/// skipped.
pub fn assemble(view: &RenderView, time: f32) -> Vec<DrawInstance> {
    let mut resolver = Resolver::new(view, time);
    let mut draws = Vec::with_capacity(view.instances.len());
    for instance in &view.instances {
        let model = match instance.model {
            Some(model) => model,
            None => match resolver.world_matrix(instance.entity_id) {
                Some(world) => world,
                None => continue,
            },
        };
        let renderer = resolver.renderer(instance.entity_id).or(instance.mesh.as_ref());
        let tint = renderer.and_then(|mesh| mesh.color).map_or(Vec4::ONE, |[r, g, b]| Vec4::new(r, g, b, 1.0));
        draws.push(DrawInstance {
            entity_id: Some(instance.entity_id),
            model,
            tint,
            mesh_id: instance.mesh_asset_id.or_else(|| renderer.and_then(|mesh| mesh.mesh_asset_id)),
            texture_id: instance.albedo_texture_id.or_else(|| renderer.and_then(|mesh| mesh.albedo_texture_id)),
        });
    }
    draws
}

/// Like [`assemble`], but never empty: an empty result becomes one placeholder draw so the swapchain is
/// still cleared and presented.
pub fn assemble_or_placeholder(view: &RenderView, time: f32) -> Vec<DrawInstance> {
    let draws = assemble(view, time);
    if draws.is_empty() {
        vec![DrawInstance::placeholder()]
    } else {
        draws
    }
}
