use glam::{Mat4, Vec3};
use wgpu_batch::renderer::lights::cube_face_view_projections;
use wgpu_batch::renderer::renderer::SHADOW_BLOCK_BINDING;
use wgpu_batch::renderer::uniforms::ShadowUniform;
use wgpu_batch::renderer::{
    cube_mesh, DeviceCall, DrawEngine, HeadlessDevice, Material, PointLight, ShaderHandle,
    MAX_MESHES,
};
use wgpu_batch::EngineSettings;

fn engine() -> (DrawEngine<HeadlessDevice>, ShaderHandle, ShaderHandle) {
    let mut device = HeadlessDevice::new();
    let shadow = device.register_shader();
    let shader = device.register_shader();
    let engine = DrawEngine::new(device, EngineSettings::default(), shadow).unwrap();
    (engine, shadow, shader)
}

fn lights(count: usize) -> Vec<PointLight> {
    (0..count)
        .map(|i| PointLight::new(Vec3::new(i as f32 * 4.0, 6.0, 0.0), Vec3::ONE, 3.0, 15.0))
        .collect()
}

#[test]
fn every_light_renders_six_faces_before_the_color_pass() {
    let (mut engine, shadow, shader) = engine();
    engine.set_point_lights(&lights(2));
    engine.render(&cube_mesh(), &Material::new(), Mat4::IDENTITY, shader);
    engine.device_mut().clear_calls();

    engine.draw();

    let maps = engine.shadow_maps().to_vec();
    let passes: Vec<_> = engine
        .device()
        .calls()
        .iter()
        .filter_map(|call| match call {
            DeviceCall::BeginShadowPass { shadow_map, face } => Some((*shadow_map, *face)),
            _ => None,
        })
        .collect();
    let expected: Vec<_> = maps[..2]
        .iter()
        .flat_map(|&map| (0..6).map(move |face| (map, face)))
        .collect();
    assert_eq!(passes, expected);

    let calls = engine.device().calls();
    let color = calls
        .iter()
        .position(|call| matches!(call, DeviceCall::BeginColorPass { .. }))
        .unwrap();
    let last_shadow = calls
        .iter()
        .rposition(|call| matches!(call, DeviceCall::BeginShadowPass { .. }))
        .unwrap();
    assert!(last_shadow < color);

    let shadow_binds = calls[..color]
        .iter()
        .filter(|call| **call == DeviceCall::BindShader(shadow))
        .count();
    assert_eq!(shadow_binds, 12);
}

#[test]
fn shadow_draws_scale_with_lights_faces_and_batches() {
    let (mut engine, _, shader) = engine();
    engine.set_point_lights(&lights(3));
    for i in 0..MAX_MESHES * 2 + 1 {
        engine.render(
            &cube_mesh(),
            &Material::new(),
            Mat4::from_translation(Vec3::X * i as f32),
            shader,
        );
    }

    let stats = engine.draw();

    assert_eq!(stats.batches, 3);
    assert_eq!(stats.shadow_draw_calls, 3 * 6 * 3);
    assert_eq!(stats.draw_calls, 3);
}

#[test]
fn shadow_block_holds_the_last_face_rendered() {
    let (mut engine, _, shader) = engine();
    let light = PointLight::new(Vec3::new(1.0, 4.0, -2.0), Vec3::ONE, 1.0, 12.0);
    engine.set_point_lights(&[light]);
    engine.render(&cube_mesh(), &Material::new(), Mat4::IDENTITY, shader);

    let uniform_buffer = engine
        .device()
        .calls()
        .iter()
        .find_map(|call| match call {
            DeviceCall::BindUniformRange { buffer, .. } => Some(*buffer),
            _ => None,
        })
        .unwrap();
    engine.draw();

    let near = engine.settings().shadow_near;
    let far = light.shadow_far(near);
    let faces = cube_face_view_projections(light.position, near, far);
    let expected = ShadowUniform::new(faces[5], light.position, far);

    let block = *engine.uniform_blocks().block(SHADOW_BLOCK_BINDING).unwrap();
    let contents = engine.device().buffer_contents(uniform_buffer).unwrap();
    let written = &contents[block.offset as usize..(block.offset + block.size) as usize];
    assert_eq!(written, bytemuck::bytes_of(&expected));
}

#[test]
fn no_lights_means_no_shadow_passes() {
    let (mut engine, _, shader) = engine();
    engine.render(&cube_mesh(), &Material::new(), Mat4::IDENTITY, shader);
    engine.device_mut().clear_calls();

    let stats = engine.draw();

    assert_eq!(stats.shadow_draw_calls, 0);
    assert_eq!(
        engine
            .device()
            .count_calls(|call| matches!(call, DeviceCall::BeginShadowPass { .. })),
        0
    );
    // Shadow maps stay bound so shaders see a stable layout.
    assert!(engine
        .device()
        .calls()
        .contains(&DeviceCall::BindShadowMaps(engine.shadow_maps().to_vec())));
}
