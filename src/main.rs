use glam::{Mat4, Vec3};
use wgpu_batch::renderer::{cube_mesh, sphere_mesh, TextureHandle};
use wgpu_batch::{DrawEngine, EngineSettings, HeadlessDevice, Material, PointLight};

const FRAMES: usize = 3;
const GRID: i32 = 12;
const TEXTURE_COUNT: u32 = 16;

fn main() {
    wgpu_batch::init_logging();
    log::info!("Starting headless batching demo");

    let settings = EngineSettings::load();
    let mut device = HeadlessDevice::new();
    let shadow_shader = device.register_shader();
    let lit_shader = device.register_shader();
    let matte_shader = device.register_shader();

    let mut engine = match DrawEngine::new(device, settings, shadow_shader) {
        Ok(engine) => engine,
        Err(err) => {
            log::error!("Failed to create draw engine: {}", err);
            return;
        }
    };

    let projection = Mat4::perspective_rh(60f32.to_radians(), 16.0 / 9.0, 0.1, 100.0);
    let eye = Vec3::new(0.0, 18.0, 24.0);
    engine.set_camera(projection * Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y), eye);
    engine.set_point_lights(&[
        PointLight::new(Vec3::new(-6.0, 5.0, 0.0), Vec3::new(1.0, 0.9, 0.8), 8.0, 20.0),
        PointLight::new(Vec3::new(6.0, 5.0, 0.0), Vec3::new(0.6, 0.7, 1.0), 6.0, 20.0),
    ]);

    let cube = cube_mesh();
    let sphere = sphere_mesh(16, 12);
    let textures: Vec<TextureHandle> = (1..=TEXTURE_COUNT).map(TextureHandle::new).collect();

    for frame in 0..FRAMES {
        let spin = Mat4::from_rotation_y(frame as f32 * 0.1);
        for x in 0..GRID {
            for z in 0..GRID {
                let position = Vec3::new((x - GRID / 2) as f32 * 2.0, 0.0, (z - GRID / 2) as f32 * 2.0);
                let transform = Mat4::from_translation(position) * spin;
                let texture = textures[((x * GRID + z) as usize) % textures.len()];
                let material = Material::textured(texture).with_params([0.5, 0.3, 0.0, 1.0]);

                if (x + z) % 2 == 0 {
                    engine.render(&cube, &material, transform, lit_shader);
                } else {
                    engine.render(&sphere, &material, transform, matte_shader);
                }
            }
        }

        let stats = engine.draw();
        log::info!(
            "Frame {}: {} submissions, {} buckets, {} batches, {} color + {} shadow draws",
            frame,
            stats.submissions,
            stats.buckets,
            stats.batches,
            stats.draw_calls,
            stats.shadow_draw_calls
        );
    }

    engine.terminate();
    log::info!(
        "Presented {} frames, {} buffers still live",
        engine.device().presented_frames(),
        engine.device().live_buffers()
    );
}
