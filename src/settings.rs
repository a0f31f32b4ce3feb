use log::{info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default = "RenderSettings::default_frames_in_flight")]
    pub frames_in_flight: usize,
    #[serde(default = "RenderSettings::default_shadow_map_size")]
    pub shadow_map_size: u32,
    #[serde(default = "RenderSettings::default_global_shadow_map_size")]
    pub global_shadow_map_size: u32,
    #[serde(default = "RenderSettings::default_cube_shadow_map_size")]
    pub cube_shadow_map_size: u32,
    #[serde(default)]
    pub present_mode: PresentModeSetting,
    #[serde(default)]
    pub debug_overlay: bool,
    #[serde(default = "RenderSettings::default_clear_color")]
    pub clear_color: [f32; 4],
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            frames_in_flight: Self::default_frames_in_flight(),
            shadow_map_size: Self::default_shadow_map_size(),
            global_shadow_map_size: Self::default_global_shadow_map_size(),
            cube_shadow_map_size: Self::default_cube_shadow_map_size(),
            present_mode: PresentModeSetting::default(),
            debug_overlay: false,
            clear_color: Self::default_clear_color(),
        }
    }
}

impl RenderSettings {
    pub fn load() -> Self {
        Self::load_from_path("settings.json")
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        use std::fs;

        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<RenderSettings>(&contents) {
                Ok(settings) => {
                    info!("Loaded render settings from {:?}", path);
                    settings.validate()
                }
                Err(err) => {
                    warn!(
                        "Failed to parse {:?} ({}). Falling back to default render settings.",
                        path, err
                    );
                    RenderSettings::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Render settings file {:?} not found. Using default settings.",
                    path
                );
                RenderSettings::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default render settings.",
                    path, err
                );
                RenderSettings::default()
            }
        }
    }

    pub fn validate(mut self) -> Self {
        let frames = self.frames_in_flight.clamp(1, 4);
        if frames != self.frames_in_flight {
            warn!(
                "Frames in flight must be between 1 and 4. Using {} instead of {}.",
                frames, self.frames_in_flight
            );
            self.frames_in_flight = frames;
        }

        if self.shadow_map_size == 0 {
            warn!("Shadow map size must be greater than zero. Using default value.");
            self.shadow_map_size = Self::default_shadow_map_size();
        }

        if self.global_shadow_map_size == 0 {
            warn!("Global shadow map size must be greater than zero. Using default value.");
            self.global_shadow_map_size = Self::default_global_shadow_map_size();
        }

        if self.cube_shadow_map_size == 0 {
            warn!("Cube shadow map size must be greater than zero. Using default value.");
            self.cube_shadow_map_size = Self::default_cube_shadow_map_size();
        }

        if self.resolution.width == 0 || self.resolution.height == 0 {
            warn!("Resolution must be greater than zero. Using default resolution.");
            self.resolution = Resolution::default();
        }

        if self.clear_color.iter().any(|c| !c.is_finite()) {
            warn!("Clear color must be finite. Using default clear color.");
            self.clear_color = Self::default_clear_color();
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

    pub fn screen_size(&self) -> (u32, u32) {
        (self.resolution.width, self.resolution.height)
    }

    const fn default_frames_in_flight() -> usize {
        2
    }

    const fn default_shadow_map_size() -> u32 {
        1024
    }

    const fn default_global_shadow_map_size() -> u32 {
        2048
    }

    const fn default_cube_shadow_map_size() -> u32 {
        512
    }

    const fn default_clear_color() -> [f32; 4] {
        [0.2, 0.3, 0.4, 1.0]
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

    fn invalid_settings() -> RenderSettings {
        RenderSettings {
            resolution: Resolution {
                width: 0,
                height: 0,
            },
            frames_in_flight: 9,
            shadow_map_size: 0,
            global_shadow_map_size: 0,
            cube_shadow_map_size: 0,
            present_mode: PresentModeSetting::Immediate,
            debug_overlay: false,
            clear_color: [f32::NAN, 0.0, 0.0, 1.0],
        }
    }

    #[test]
    fn validate_replaces_invalid_values_with_defaults() {
        let validated = invalid_settings().validate();
        let defaults = RenderSettings::default();

        assert_eq!(validated.frames_in_flight, 4);
        assert_eq!(validated.shadow_map_size, defaults.shadow_map_size);
        assert_eq!(
            validated.global_shadow_map_size,
            defaults.global_shadow_map_size
        );
        assert_eq!(validated.cube_shadow_map_size, defaults.cube_shadow_map_size);
        assert_eq!(validated.resolution.width, Resolution::default().width);
        assert_eq!(validated.resolution.height, Resolution::default().height);
        assert_eq!(validated.clear_color, defaults.clear_color);
    }

    #[test]
    fn zero_frames_in_flight_becomes_one() {
        let settings = RenderSettings {
            frames_in_flight: 0,
            ..RenderSettings::default()
        };
        assert_eq!(settings.validate().frames_in_flight, 1);
    }

    #[test]
    fn validate_preserves_valid_values() {
        let valid = RenderSettings {
            resolution: Resolution {
                width: 1920,
                height: 1080,
            },
            frames_in_flight: 3,
            shadow_map_size: 2048,
            global_shadow_map_size: 4096,
            cube_shadow_map_size: 256,
            present_mode: PresentModeSetting::Mailbox,
            debug_overlay: true,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        };

        let validated = valid.clone().validate();

        assert_eq!(validated.frames_in_flight, valid.frames_in_flight);
        assert_eq!(validated.shadow_map_size, valid.shadow_map_size);
        assert_eq!(validated.cube_shadow_map_size, valid.cube_shadow_map_size);
        assert_eq!(validated.resolution.width, valid.resolution.width);
        assert_eq!(validated.resolution.height, valid.resolution.height);
        assert!(validated.debug_overlay);
    }

    #[test]
    fn missing_fields_take_their_defaults() {
        let settings: RenderSettings =
            serde_json::from_str(r#"{ "frames_in_flight": 3, "debug_overlay": true }"#).unwrap();
        assert_eq!(settings.frames_in_flight, 3);
        assert!(settings.debug_overlay);
        assert_eq!(settings.clear_color, [0.2, 0.3, 0.4, 1.0]);
        assert_eq!(settings.resolution.width, 1280);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = RenderSettings::load_from_path("does/not/exist/settings.json");
        assert_eq!(settings.frames_in_flight, 2);
    }

    #[test]
    fn present_mode_returns_desired_when_available() {
        let settings = RenderSettings {
            present_mode: PresentModeSetting::Mailbox,
            ..RenderSettings::default()
        };

        let available = [
            wgpu::PresentMode::Fifo,
            wgpu::PresentMode::Mailbox,
            wgpu::PresentMode::Immediate,
        ];

        assert_eq!(
            settings.present_mode(&available),
            wgpu::PresentMode::Mailbox
        );
    }

    #[test]
    fn present_mode_falls_back_to_fifo_when_desired_missing() {
        let settings = RenderSettings {
            present_mode: PresentModeSetting::Mailbox,
            ..RenderSettings::default()
        };

        let available = [wgpu::PresentMode::Fifo, wgpu::PresentMode::Immediate];

        assert_eq!(settings.present_mode(&available), wgpu::PresentMode::Fifo);
    }

    #[test]
    fn present_mode_uses_first_available_when_fifo_missing() {
        let settings = RenderSettings {
            present_mode: PresentModeSetting::Mailbox,
            ..RenderSettings::default()
        };

        let available = [wgpu::PresentMode::Immediate];

        assert_eq!(
            settings.present_mode(&available),
            wgpu::PresentMode::Immediate
        );
    }
}
