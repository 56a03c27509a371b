use log::{info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "EngineSettings::default_vertex_buffer_capacity")]
    pub vertex_buffer_capacity: u64,
    #[serde(default = "EngineSettings::default_index_buffer_capacity")]
    pub index_buffer_capacity: u64,
    #[serde(default = "EngineSettings::default_shadow_map_size")]
    pub shadow_map_size: u32,
    #[serde(default = "EngineSettings::default_shadow_near")]
    pub shadow_near: f32,
    #[serde(default = "EngineSettings::default_clear_color")]
    pub clear_color: [f32; 4],
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub present_mode: PresentModeSetting,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            vertex_buffer_capacity: Self::default_vertex_buffer_capacity(),
            index_buffer_capacity: Self::default_index_buffer_capacity(),
            shadow_map_size: Self::default_shadow_map_size(),
            shadow_near: Self::default_shadow_near(),
            clear_color: Self::default_clear_color(),
            batch: BatchSettings::default(),
            resolution: Resolution::default(),
            present_mode: PresentModeSetting::default(),
        }
    }
}

impl EngineSettings {
    pub fn load() -> Self {
        #[cfg(target_arch = "wasm32")]
        {
            info!("Using default engine settings for WebAssembly build");
            return Self::default();
        }

        #[cfg(not(target_arch = "wasm32"))]
        {
            Self::load_from_path("settings.json")
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        use std::fs;

        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<EngineSettings>(&contents) {
                Ok(settings) => {
                    info!("Loaded engine settings from {:?}", path);
                    settings.validate()
                }
                Err(err) => {
                    warn!(
                        "Failed to parse {:?} ({}). Falling back to default engine settings.",
                        path, err
                    );
                    EngineSettings::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Engine settings file {:?} not found. Using default settings.",
                    path
                );
                EngineSettings::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default engine settings.",
                    path, err
                );
                EngineSettings::default()
            }
        }
    }

    pub fn validate(mut self) -> Self {
        if self.vertex_buffer_capacity == 0 {
            warn!("Vertex buffer capacity must be greater than zero. Using default value.");
            self.vertex_buffer_capacity = Self::default_vertex_buffer_capacity();
        }

        if self.index_buffer_capacity == 0 {
            warn!("Index buffer capacity must be greater than zero. Using default value.");
            self.index_buffer_capacity = Self::default_index_buffer_capacity();
        }

        if self.shadow_map_size == 0 {
            warn!("Shadow map size must be greater than zero. Using default value.");
            self.shadow_map_size = Self::default_shadow_map_size();
        }

        if !(self.shadow_near > 0.0) {
            warn!("Shadow near plane must be positive. Using default value.");
            self.shadow_near = Self::default_shadow_near();
        }

        if self.batch.max_vertices == 0 || self.batch.max_indices == 0 {
            warn!("Batch geometry budget must be greater than zero. Using default budget.");
            self.batch = BatchSettings::default();
        }

        if self.resolution.width == 0 || self.resolution.height == 0 {
            warn!("Resolution must be greater than zero. Using default resolution.");
            self.resolution = Resolution::default();
        }

        self
    }

    pub fn present_mode(&self, available: &[wgpu::PresentMode]) -> wgpu::PresentMode {
        let desired = self.present_mode.to_wgpu();
        if available.contains(&desired) {
            return desired;
        }

        warn!(
            "Requested present mode {:?} is not supported. Falling back to FIFO.",
            desired
        );

        if available.contains(&wgpu::PresentMode::Fifo) {
            wgpu::PresentMode::Fifo
        } else {
            available
                .first()
                .copied()
                .unwrap_or(wgpu::PresentMode::Fifo)
        }
    }

    const fn default_vertex_buffer_capacity() -> u64 {
        4 << 20
    }

    const fn default_index_buffer_capacity() -> u64 {
        1 << 20
    }

    const fn default_shadow_map_size() -> u32 {
        1024
    }

    const fn default_shadow_near() -> f32 {
        0.1
    }

    const fn default_clear_color() -> [f32; 4] {
        [0.231, 0.269, 0.338, 1.0]
    }
}

/// Geometry budget of a single batch. A mesh that would push a non-empty
/// batch past either limit spills into a new batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub max_vertices: u32,
    pub max_indices: u32,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_vertices: 1 << 18,
            max_indices: 3 << 18,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeSetting {
    #[default]
    Fifo,
    FifoRelaxed,
    Immediate,
    Mailbox,
    AutoVsync,
    AutoNoVsync,
}

impl PresentModeSetting {
    fn to_wgpu(&self) -> wgpu::PresentMode {
        match self {
            PresentModeSetting::Fifo => wgpu::PresentMode::Fifo,
            PresentModeSetting::FifoRelaxed => wgpu::PresentMode::FifoRelaxed,
            PresentModeSetting::Immediate => wgpu::PresentMode::Immediate,
            PresentModeSetting::Mailbox => wgpu::PresentMode::Mailbox,
            PresentModeSetting::AutoVsync => wgpu::PresentMode::AutoVsync,
            PresentModeSetting::AutoNoVsync => wgpu::PresentMode::AutoNoVsync,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_settings() -> EngineSettings {
        EngineSettings {
            vertex_buffer_capacity: 0,
            index_buffer_capacity: 0,
            shadow_map_size: 0,
            shadow_near: -1.0,
            clear_color: [0.0; 4],
            batch: BatchSettings {
                max_vertices: 0,
                max_indices: 16,
            },
            resolution: Resolution {
                width: 0,
                height: 0,
            },
            present_mode: PresentModeSetting::Immediate,
        }
    }

    #[test]
    fn validate_replaces_invalid_values_with_defaults() {
        let validated = invalid_settings().validate();
        let defaults = EngineSettings::default();

        assert_eq!(
            validated.vertex_buffer_capacity,
            defaults.vertex_buffer_capacity
        );
        assert_eq!(
            validated.index_buffer_capacity,
            defaults.index_buffer_capacity
        );
        assert_eq!(validated.shadow_map_size, defaults.shadow_map_size);
        assert_eq!(validated.shadow_near, defaults.shadow_near);
        assert_eq!(validated.batch, BatchSettings::default());
        assert_eq!(validated.resolution.width, Resolution::default().width);
        assert_eq!(validated.resolution.height, Resolution::default().height);
        assert_eq!(validated.clear_color, [0.0; 4], "valid values are kept");
    }

    #[test]
    fn missing_fields_use_defaults() {
        let settings: EngineSettings =
            serde_json::from_str(r#"{ "shadow_map_size": 512, "present_mode": "mailbox" }"#)
                .unwrap();

        assert_eq!(settings.shadow_map_size, 512);
        assert!(matches!(settings.present_mode, PresentModeSetting::Mailbox));
        assert_eq!(
            settings.vertex_buffer_capacity,
            EngineSettings::default().vertex_buffer_capacity
        );
        assert_eq!(settings.batch, BatchSettings::default());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = EngineSettings::load_from_path("does/not/exist/settings.json");
        assert_eq!(
            settings.shadow_map_size,
            EngineSettings::default().shadow_map_size
        );
    }

    #[test]
    fn unsupported_present_mode_falls_back_to_fifo() {
        let settings = EngineSettings {
            present_mode: PresentModeSetting::Mailbox,
            ..Default::default()
        };
        assert_eq!(
            settings.present_mode(&[wgpu::PresentMode::Fifo, wgpu::PresentMode::Immediate]),
            wgpu::PresentMode::Fifo
        );
        assert_eq!(
            settings.present_mode(&[wgpu::PresentMode::Mailbox]),
            wgpu::PresentMode::Mailbox
        );
    }
}
