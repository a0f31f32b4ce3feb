use frame_pipeline::renderer::backend::{Command, HeadlessBackend, RenderTarget};
use frame_pipeline::renderer::shadow::{cube_face_matrices, OMNI_FAR_PLANE};
use frame_pipeline::renderer::{GraphicsManager, ShadowMapKind};
use frame_pipeline::scene::light::SHADOW_NEAR_PLANE;
use frame_pipeline::scene::{
    IndexGroup, Light, LightType, Mesh, PrimitiveType, Scene, Transform, VertexDataType,
    VertexStream,
};
use frame_pipeline::settings::RenderSettings;
use glam::{Mat4, Vec3};

const EPSILON: f32 = 1e-5;

fn project_shadow_cpu(matrix: Mat4, world_pos: Vec3) -> Vec3 {
    let clip = matrix * world_pos.extend(1.0);
    if clip.w <= 0.0 {
        return Vec3::splat(-1.0);
    }
    let ndc = clip.truncate() / clip.w;
    Vec3::new(ndc.x * 0.5 + 0.5, -ndc.y * 0.5 + 0.5, ndc.z)
}

fn compute_ndc(matrix: Mat4, world_pos: Vec3) -> Vec3 {
    let clip = matrix * world_pos.extend(1.0);
    clip.truncate() / clip.w
}

fn in_unit_cube(p: Vec3) -> bool {
    (-EPSILON..=1.0 + EPSILON).contains(&p.x)
        && (-EPSILON..=1.0 + EPSILON).contains(&p.y)
        && (-EPSILON..=1.0 + EPSILON).contains(&p.z)
}

#[test]
fn sun_shadow_covers_the_scene_origin() {
    let light = Light::infinity(Vec3::ONE, 1.0).with_shadow();
    let direction = Vec3::new(0.4, -1.0, 0.2).normalize();
    let view_projection = light.shadow_view_projection(Vec3::ZERO, direction);

    for point in [
        Vec3::new(-3.5, 0.0, -2.0),
        Vec3::new(2.0, 1.0, 4.0),
        Vec3::new(4.5, -0.5, -3.0),
    ] {
        let projected = project_shadow_cpu(view_projection, point);
        let ndc = compute_ndc(view_projection, point);
        assert!(in_unit_cube(projected), "{point:?} -> {projected:?}");
        assert!((projected.z - ndc.z).abs() < EPSILON);
    }
}

#[test]
fn sun_shadow_ignores_light_position() {
    let light = Light::infinity(Vec3::ONE, 1.0);
    let direction = Vec3::NEG_Y;
    let a = light.shadow_view_projection(Vec3::ZERO, direction);
    let b = light.shadow_view_projection(Vec3::new(50.0, 3.0, -7.0), direction);
    assert!(a.abs_diff_eq(b, EPSILON));
}

#[test]
fn texture_axis_is_flipped_from_clip_space() {
    let light = Light::infinity(Vec3::ONE, 1.0);
    let view_projection = light.shadow_view_projection(Vec3::ZERO, Vec3::NEG_Y);

    // looking straight down, the view's up axis is +Z
    let top_world = Vec3::Z * 5.0;
    let bottom_world = Vec3::NEG_Z * 5.0;

    assert!(compute_ndc(view_projection, top_world).y > compute_ndc(view_projection, bottom_world).y);
    assert!(
        project_shadow_cpu(view_projection, top_world).y
            < project_shadow_cpu(view_projection, bottom_world).y
    );
}

#[test]
fn spot_shadow_rejects_points_behind_the_light() {
    let light = Light::spot(Vec3::ONE, 1.0, 60_f32.to_radians());
    let position = Vec3::new(0.0, 10.0, 0.0);
    let view_projection = light.shadow_view_projection(position, Vec3::NEG_Y);

    let behind = Vec3::new(0.0, 15.0, 0.0);
    assert_eq!(project_shadow_cpu(view_projection, behind), Vec3::splat(-1.0));
    assert!(in_unit_cube(project_shadow_cpu(view_projection, Vec3::ZERO)));
}

#[test]
fn explicit_view_projection_wins() {
    let matrix = Mat4::from_scale(Vec3::splat(2.0));
    let light = Light {
        view_projection: Some(matrix),
        ..Light::spot(Vec3::ONE, 1.0, 1.0)
    };
    assert_eq!(light.shadow_view_projection(Vec3::ONE, Vec3::X), matrix);
}

#[test]
fn each_cube_face_sees_its_own_axis() {
    let position = Vec3::new(1.0, 2.0, 3.0);
    let faces = cube_face_matrices(position, 1.0);
    let axes = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];

    for (face, matrix) in faces.iter().enumerate() {
        let ahead = project_shadow_cpu(*matrix, position + axes[face] * 2.0);
        assert!((ahead.x - 0.5).abs() < EPSILON, "face {face}: {ahead:?}");
        assert!((ahead.y - 0.5).abs() < EPSILON, "face {face}: {ahead:?}");
        assert!(ahead.z > 0.0 && ahead.z < 1.0);

        let behind = project_shadow_cpu(*matrix, position - axes[face] * 2.0);
        assert_eq!(behind, Vec3::splat(-1.0), "face {face}");
    }

    let near = project_shadow_cpu(faces[0], position + Vec3::X * SHADOW_NEAR_PLANE);
    let far = project_shadow_cpu(faces[0], position + Vec3::X * OMNI_FAR_PLANE);
    assert!(near.z.abs() < 1e-3);
    assert!((far.z - 1.0).abs() < 1e-3);
}

fn quad_scene() -> Scene {
    let mut scene = Scene::new();
    scene.add_mesh(
        "quad",
        Mesh::new("quad", PrimitiveType::TriangleList)
            .with_stream(VertexStream::from_f32(
                "position",
                VertexDataType::Float3,
                &[
                    -1.0, 0.0, -1.0, 1.0, 0.0, -1.0, 1.0, 0.0, 1.0, -1.0, 0.0, 1.0,
                ],
            ))
            .with_index_group(IndexGroup::from_u32(0, &[0, 1, 2, 0, 2, 3])),
    );
    scene.spawn_geometry("floor", "quad", &[], Transform::default());
    scene
}

#[test]
fn every_shadow_kind_gets_its_own_array() {
    let mut scene = quad_scene();
    scene.spawn_light(
        "sun",
        Light::infinity(Vec3::ONE, 1.0).with_shadow(),
        Transform::from_translation(Vec3::new(3.0, 8.0, 2.0)).looking_at(Vec3::ZERO),
    );
    for i in 0..2 {
        scene.spawn_light(
            &format!("spot {i}"),
            Light::spot(Vec3::ONE, 5.0, 0.7).with_shadow(),
            Transform::from_translation(Vec3::new(i as f32 * 2.0, 4.0, 1.0)).looking_at(Vec3::ZERO),
        );
    }
    scene.spawn_light(
        "fill",
        Light::omni(Vec3::ONE, 1.0),
        Transform::from_translation(Vec3::Y),
    );

    let mut manager = GraphicsManager::new(HeadlessBackend::new(), RenderSettings::default()).unwrap();
    manager.initialize_buffers(&scene).unwrap();
    let layout = manager.shadow_layout();
    assert_eq!(layout.count(ShadowMapKind::GlobalArray), 1);
    assert_eq!(layout.count(ShadowMapKind::Array), 2);
    assert_eq!(layout.count(ShadowMapKind::CubeArray), 0);

    let fill = scene
        .lights()
        .into_iter()
        .find(|light| light.light.light_type == LightType::Omni)
        .unwrap();
    assert_eq!(layout.index(fill.node), -1);

    manager.draw(&scene).unwrap();
    let context = manager.frames().current().context;
    let settings = manager.settings();
    let global = context.global_shadow_map.unwrap();
    let spots = context.shadow_map.unwrap();
    assert_eq!(global.width, settings.global_shadow_map_size);
    assert_eq!(spots.width, settings.shadow_map_size);
    assert_eq!(spots.count, 2);
    assert!(context.cube_shadow_map.is_none());

    let submitted = manager.backend().last_submission().unwrap();
    let passes = submitted
        .iter()
        .filter(|command| matches!(command, Command::SetRenderTarget(RenderTarget::Offscreen(_))))
        .count();
    assert_eq!(passes, 3);
}

#[test]
fn shadow_maps_follow_the_configured_size() {
    let mut scene = quad_scene();
    scene.spawn_light(
        "spot",
        Light::spot(Vec3::ONE, 5.0, 0.7).with_shadow(),
        Transform::from_translation(Vec3::new(0.0, 4.0, 1.0)).looking_at(Vec3::ZERO),
    );
    let settings = RenderSettings {
        shadow_map_size: 256,
        ..RenderSettings::default()
    };
    let mut manager = GraphicsManager::new(HeadlessBackend::new(), settings).unwrap();
    manager.initialize_buffers(&scene).unwrap();
    manager.draw(&scene).unwrap();

    let map = manager.frames().current().context.shadow_map.unwrap();
    let texture = manager.backend().texture(map.texture).unwrap();
    assert_eq!((texture.width, texture.height, texture.layers), (256, 256, 1));
}
