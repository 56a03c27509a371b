pub mod renderer;
pub mod settings;

pub use renderer::{DrawEngine, FrameStats, HeadlessDevice, Material, Mesh, PointLight, WgpuDevice};
pub use settings::EngineSettings;

#[cfg(target_arch = "wasm32")]
pub fn init_logging() {
    // Set panic hook to get better error messages
    std::panic::set_hook(Box::new(console_error_panic_hook::hook));
    let _ = console_log::init_with_level(log::Level::Info);
}

/// Info by default; `RUST_LOG` overrides.
#[cfg(not(target_arch = "wasm32"))]
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
