use frame_pipeline::renderer::backend::{
    Command, CommandList, HeadlessBackend, PixelFormat, RenderTarget,
};
use frame_pipeline::renderer::brdf::BRDF_LUT_KEY;
use frame_pipeline::renderer::{GraphicsManager, RenderError, ShadowMapKind};
use frame_pipeline::scene::{
    Image, IndexGroup, Light, Material, MaterialChannel, Mesh, PrimitiveType, Scene, TextureRef,
    Transform, VertexDataType, VertexStream,
};
use frame_pipeline::settings::RenderSettings;
use glam::{Vec3, Vec4};

fn triangle(name: &str) -> Mesh {
    Mesh::new(name, PrimitiveType::TriangleList)
        .with_stream(VertexStream::from_f32(
            "position",
            VertexDataType::Float3,
            &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        ))
        .with_index_group(IndexGroup::from_u16(0, &[0, 1, 2]))
}

fn manager_with(settings: RenderSettings) -> GraphicsManager<HeadlessBackend> {
    GraphicsManager::new(HeadlessBackend::new(), settings).unwrap()
}

fn manager() -> GraphicsManager<HeadlessBackend> {
    manager_with(RenderSettings::default())
}

fn single_triangle_scene() -> Scene {
    let mut scene = Scene::new();
    scene.add_mesh("triangle", triangle("triangle"));
    scene.add_material(
        "plain",
        Material::new("plain").with_base_color(Vec4::new(0.8, 0.2, 0.2, 1.0)),
    );
    scene.spawn_geometry("tri", "triangle", &["plain"], Transform::default());
    scene.spawn_light(
        "sun",
        Light::infinity(Vec3::ONE, 2.0).with_shadow(),
        Transform::from_translation(Vec3::new(0.0, 5.0, 5.0)).looking_at(Vec3::ZERO),
    );
    scene
}

fn offscreen(list: &CommandList) -> (usize, usize) {
    list.target_summary()
        .into_iter()
        .filter(|activity| matches!(activity.target, RenderTarget::Offscreen(_)))
        .fold((0, 0), |(clears, draws), activity| {
            (clears + activity.clears, draws + activity.draws)
        })
}

#[test]
fn single_triangle_frame() {
    let mut manager = manager();
    let scene = single_triangle_scene();

    assert_eq!(manager.initialize_buffers(&scene).unwrap(), 1);
    let batch = &manager.frames().current().batches()[0];
    assert_eq!(batch.index_count, 3);
    assert!(batch.textures.is_empty());
    assert_eq!(manager.texture_cache().len(), 0);

    manager.draw(&scene).unwrap();
    let submitted = manager.backend().last_submission().unwrap();
    let (clears, draws) = offscreen(submitted);
    assert_eq!(clears, 1);
    assert_eq!(draws, 1);
    assert!(submitted.iter().any(|command| matches!(
        command,
        Command::DrawIndexed { index_count: 3, .. }
    )));
    assert_eq!(manager.backend().live_render_targets(), 0);
}

#[test]
fn uploading_twice_does_not_leak() {
    let mut manager = manager();
    let scene = single_triangle_scene();

    manager.initialize_buffers(&scene).unwrap();
    let buffers = manager.backend().live_buffers();
    let vertex_arrays = manager.backend().live_vertex_arrays();
    let textures = manager.backend().live_textures();

    manager.initialize_buffers(&scene).unwrap();
    assert_eq!(manager.backend().live_buffers(), buffers);
    assert_eq!(manager.backend().live_vertex_arrays(), vertex_arrays);
    assert_eq!(manager.backend().live_textures(), textures);
    assert_eq!(manager.frames().current().batches().len(), 1);
}

#[test]
fn reupload_reaches_other_frames_only_when_they_become_current() {
    let settings = RenderSettings {
        frames_in_flight: 3,
        ..RenderSettings::default()
    };
    let mut manager = manager_with(settings);
    let scene = single_triangle_scene();
    manager.initialize_buffers(&scene).unwrap();
    manager.draw(&scene).unwrap();

    let mut bigger = single_triangle_scene();
    bigger.spawn_geometry("tri 2", "triangle", &["plain"], Transform::default());
    manager.initialize_buffers(&bigger).unwrap();

    let current = manager.frames().index();
    let generation = manager.frames().current().generation();
    for index in 0..manager.frames().len() {
        if index != current {
            let frame = manager.frames().frame(index).unwrap();
            assert_ne!(frame.generation(), generation);
        }
    }

    manager.draw(&bigger).unwrap();
    assert_ne!(manager.frames().index(), current);
    assert_eq!(manager.frames().current().generation(), generation);
    assert_eq!(manager.frames().current().batches().len(), 2);
}

#[test]
fn omni_lights_share_one_cube_array_clear() {
    let mut manager = manager();
    let mut scene = Scene::new();
    scene.add_mesh("triangle", triangle("triangle"));
    scene.spawn_geometry("tri", "triangle", &[], Transform::default());
    for (i, x) in [-2.0, 2.0].into_iter().enumerate() {
        scene.spawn_light(
            &format!("omni {i}"),
            Light::omni(Vec3::ONE, 5.0).with_shadow(),
            Transform::from_translation(Vec3::new(x, 2.0, 0.0)),
        );
    }

    manager.initialize_buffers(&scene).unwrap();
    assert_eq!(manager.shadow_layout().count(ShadowMapKind::CubeArray), 2);
    manager.draw(&scene).unwrap();

    let (clears, draws) = offscreen(manager.backend().last_submission().unwrap());
    assert_eq!(clears, 1);
    assert_eq!(draws, 2);

    let cube_map = manager
        .frames()
        .current()
        .context
        .shadow_map(ShadowMapKind::CubeArray)
        .unwrap();
    assert_eq!(manager.backend().texture(cube_map.texture).unwrap().layers, 12);
}

#[test]
fn texture_formats_follow_bit_count() {
    let mut manager = manager();
    let mut scene = single_triangle_scene();
    scene.add_material(
        "plain",
        Material::new("plain")
            .with_map(
                MaterialChannel::BaseColor,
                TextureRef::new("albedo", Image::new(2, 2, 24, vec![255; 12])),
            )
            .with_map(
                MaterialChannel::Roughness,
                TextureRef::new("rough", Image::new(2, 2, 8, vec![128; 4])),
            ),
    );

    manager.initialize_buffers(&scene).unwrap();
    let cache = manager.texture_cache();
    assert_eq!(cache.len(), 2);
    let albedo = cache.get("albedo").unwrap();
    let rough = cache.get("rough").unwrap();
    assert_eq!(manager.backend().texture(albedo).unwrap().format, PixelFormat::Rgb8);
    assert_eq!(manager.backend().texture(rough).unwrap().format, PixelFormat::R8);

    let textures = manager.frames().current().batches()[0].textures;
    assert_eq!(textures.get(MaterialChannel::BaseColor), Some(albedo));
    assert_eq!(textures.get(MaterialChannel::Normal), None);
}

#[test]
fn sixty_four_bit_index_groups_are_skipped() {
    let mut manager = manager();
    let mut scene = Scene::new();
    scene.add_mesh(
        "mixed",
        triangle("mixed").with_index_group(IndexGroup::from_u64(0, &[0, 1, 2])),
    );
    scene.spawn_geometry("node", "mixed", &[], Transform::default());

    assert_eq!(manager.initialize_buffers(&scene).unwrap(), 1);
}

#[test]
fn double_vertex_data_is_rejected() {
    let mut manager = manager();
    let mut scene = Scene::new();
    scene.add_mesh(
        "doubles",
        Mesh::new("doubles", PrimitiveType::TriangleList)
            .with_stream(VertexStream::from_f64(
                "position",
                VertexDataType::Double3,
                &[0.0; 9],
            ))
            .with_index_group(IndexGroup::from_u16(0, &[0, 1, 2])),
    );
    scene.spawn_geometry("node", "doubles", &[], Transform::default());

    assert!(matches!(
        manager.initialize_buffers(&scene),
        Err(RenderError::UnsupportedVertexType(VertexDataType::Double3))
    ));
}

#[test]
fn brdf_table_is_integrated_once_across_frames() {
    let mut manager = manager();
    let scene = single_triangle_scene();
    manager.initialize_buffers(&scene).unwrap();

    for _ in 0..100 {
        manager.draw(&scene).unwrap();
    }

    assert_eq!(manager.brdf_dispatch_count(), 1);
    let dispatches: usize = manager
        .backend()
        .submissions()
        .iter()
        .map(CommandList::dispatch_count)
        .sum();
    assert_eq!(dispatches, 1);

    let lut = manager.texture_cache().get(BRDF_LUT_KEY).unwrap();
    assert!(manager
        .frames()
        .iter()
        .all(|frame| frame.context.brdf_lut == Some(lut)));
}

#[test]
fn incomplete_shadow_target_fails_the_frame() {
    let mut manager = manager();
    let scene = single_triangle_scene();
    manager.initialize_buffers(&scene).unwrap();
    manager.backend_mut().fail_render_targets(true);

    assert!(matches!(
        manager.draw(&scene),
        Err(RenderError::IncompleteRenderTarget { .. })
    ));
    assert_eq!(manager.backend().live_render_targets(), 0);
    assert!(manager.backend().submissions().is_empty());
}

#[test]
fn frame_after_a_failed_one_starts_clean() {
    let mut manager = manager();
    let scene = single_triangle_scene();
    manager.initialize_buffers(&scene).unwrap();
    manager.backend_mut().fail_render_targets(true);
    assert!(manager.draw(&scene).is_err());
    assert!(manager.texture_cache().get(BRDF_LUT_KEY).is_none());

    manager.backend_mut().fail_render_targets(false);
    manager.draw(&scene).unwrap();

    let submissions = manager.backend().submissions();
    assert_eq!(submissions.len(), 1);
    let screen_clears: usize = submissions[0]
        .target_summary()
        .into_iter()
        .filter(|activity| activity.target == RenderTarget::Screen)
        .map(|activity| activity.clears)
        .sum();
    assert_eq!(screen_clears, 1);
    assert_eq!(offscreen(&submissions[0]), (1, 1));
    assert_eq!(submissions[0].dispatch_count(), 1);
    assert_eq!(manager.brdf_dispatch_count(), 1);
    assert_eq!(manager.backend().live_render_targets(), 0);
}

#[test]
fn finalize_releases_everything() {
    let mut manager = manager();
    let mut scene = single_triangle_scene();
    scene.set_skybox(frame_pipeline::scene::SkyBox::solid(4, [0; 4], [0; 4]));
    manager.initialize_buffers(&scene).unwrap();
    manager.draw(&scene).unwrap();
    manager.draw(&scene).unwrap();

    manager.finalize();
    manager.finalize();
    let backend = manager.backend();
    assert_eq!(backend.live_buffers(), 0);
    assert_eq!(backend.live_textures(), 0);
    assert_eq!(backend.live_vertex_arrays(), 0);
    assert_eq!(backend.live_render_targets(), 0);
    assert!(manager.pipelines().is_empty());
}
