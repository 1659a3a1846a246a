use aetherion_core::assets::AssetId;
use aetherion_core::render_view::{
    assemble, assemble_or_placeholder, MeshRendererDesc, ProjectionKind, RenderInstance, RenderView, TransformDesc,
    EMPTY_VIEW_TINT,
};
use glam::{Mat4, Vec3, Vec4};

fn at(position: Vec3, parent: Option<u64>) -> TransformDesc {
    TransformDesc { position, parent, ..TransformDesc::default() }
}

fn close(a: Vec3, b: Vec3) -> bool {
    (a - b).length() < 1e-4
}

#[test]
fn parents_are_left_multiplied_through_the_chain() {
    let mut view = RenderView::default();
    view.transforms.insert(1, TransformDesc { scale: Vec3::splat(2.0), ..at(Vec3::new(10.0, 0.0, 0.0), None) });
    view.transforms.insert(2, at(Vec3::new(0.0, 1.0, 0.0), Some(1)));
    view.transforms.insert(3, at(Vec3::new(0.0, 0.0, 1.0), Some(2)));
    view.instances = vec![
        RenderInstance { entity_id: 3, ..RenderInstance::default() },
        RenderInstance { entity_id: 1, ..RenderInstance::default() },
    ];

    let draws = assemble(&view, 0.0);
    assert_eq!(draws.len(), 2);
    let grandchild = draws[0].model.transform_point3(Vec3::ZERO);
    assert!(close(grandchild, Vec3::new(10.0, 2.0, 2.0)), "{grandchild:?}");
    assert!(close(draws[1].model.transform_point3(Vec3::ZERO), Vec3::new(10.0, 0.0, 0.0)));
}

#[test]
fn missing_parent_is_treated_as_root() {
    let view = RenderView {
        instances: vec![RenderInstance {
            entity_id: 4,
            transform: Some(at(Vec3::new(1.0, 2.0, 3.0), Some(99))),
            ..RenderInstance::default()
        }],
        ..RenderView::default()
    };
    let draws = assemble(&view, 0.0);
    assert!(close(draws[0].model.transform_point3(Vec3::ZERO), Vec3::new(1.0, 2.0, 3.0)));
}

#[test]
fn rotation_speed_spins_about_z_over_time() {
    let view = RenderView {
        instances: vec![RenderInstance {
            entity_id: 1,
            transform: Some(TransformDesc::default()),
            mesh: Some(MeshRendererDesc { rotation_speed_deg_per_sec: 45.0, ..MeshRendererDesc::default() }),
            ..RenderInstance::default()
        }],
        ..RenderView::default()
    };
    let draws = assemble(&view, 2.0);
    let rotated = draws[0].model.transform_vector3(Vec3::X);
    assert!(close(rotated, Vec3::Y), "{rotated:?}");
}

#[test]
fn tint_and_asset_ids_come_from_the_mesh_renderer() {
    let mesh_id = AssetId::new();
    let texture_id = AssetId::new();
    let mut view = RenderView::default();
    view.instances.push(RenderInstance {
        entity_id: 5,
        transform: Some(TransformDesc::default()),
        ..RenderInstance::default()
    });
    view.mesh_renderers.insert(
        5,
        MeshRendererDesc {
            mesh_asset_id: Some(mesh_id),
            albedo_texture_id: Some(texture_id),
            color: Some([0.2, 0.4, 0.6]),
            rotation_speed_deg_per_sec: 0.0,
        },
    );

    let draw = assemble(&view, 0.0)[0];
    assert_eq!(draw.entity_id, Some(5));
    assert_eq!(draw.tint, Vec4::new(0.2, 0.4, 0.6, 1.0));
    assert_eq!(draw.mesh_id, Some(mesh_id));
    assert_eq!(draw.texture_id, Some(texture_id));
}

#[test]
fn instance_ids_win_over_renderer_ids_and_default_tint_is_white() {
    let inline_mesh = AssetId::new();
    let view = RenderView {
        instances: vec![RenderInstance {
            entity_id: 1,
            model: Some(Mat4::IDENTITY),
            mesh_asset_id: Some(inline_mesh),
            mesh: Some(MeshRendererDesc { mesh_asset_id: Some(AssetId::new()), ..MeshRendererDesc::default() }),
            ..RenderInstance::default()
        }],
        ..RenderView::default()
    };
    let draw = assemble(&view, 0.0)[0];
    assert_eq!(draw.mesh_id, Some(inline_mesh));
    assert_eq!(draw.tint, Vec4::ONE);
}

#[test]
fn instances_without_model_or_transform_are_skipped() {
    let view = RenderView {
        instances: vec![RenderInstance { entity_id: 1, ..RenderInstance::default() }],
        ..RenderView::default()
    };
    assert!(assemble(&view, 0.0).is_empty());

    let placeholder = assemble_or_placeholder(&view, 0.0);
    assert_eq!(placeholder.len(), 1);
    assert_eq!(placeholder[0].model, Mat4::IDENTITY);
    assert_eq!(placeholder[0].tint, EMPTY_VIEW_TINT);
    assert_eq!(placeholder[0].entity_id, None);
}

#[test]
fn views_deserialize_from_json_with_defaults() {
    let mesh_id = AssetId::new();
    let json = format!(
        r#"{{
            "instances": [
                {{ "entity_id": 1, "transform": {{ "position": [0.0, 1.0, 0.0], "rotation_deg": [0.0, 0.0, 90.0] }},
                   "mesh": {{ "mesh_asset_id": "{mesh_id}", "color": [1.0, 0.0, 0.0] }} }},
                {{ "entity_id": 2, "transform": {{ "parent": 1 }} }}
            ],
            "camera": {{ "enabled": true, "projection": "orthographic", "orthographic_size": 4.0 }}
        }}"#
    );
    let view: RenderView = serde_json::from_str(&json).expect("view parses");
    assert_eq!(view.instances.len(), 2);
    assert_eq!(view.instances[1].transform.map(|t| t.scale), Some(Vec3::ONE));
    assert!(view.camera.enabled);
    assert_eq!(view.camera.projection, ProjectionKind::Orthographic);
    assert_eq!(view.camera.near, 0.1);

    let draws = assemble(&view, 0.0);
    assert_eq!(draws.len(), 2);
    assert_eq!(draws[0].mesh_id, Some(mesh_id));
    assert_eq!(draws[0].tint, Vec4::new(1.0, 0.0, 0.0, 1.0));
    assert!(close(draws[1].model.transform_point3(Vec3::ZERO), Vec3::new(0.0, 1.0, 0.0)));
}
