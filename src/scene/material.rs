use std::sync::Arc;

use glam::{Vec3, Vec4};

use super::image::Image;

/// Reference to a texture asset. `image` is `None` while the importer has
/// not resolved the file yet.
#[derive(Clone, Debug)]
pub struct TextureRef {
    pub key: String,
    pub image: Option<Arc<Image>>,
}

impl TextureRef {
    pub fn new(key: &str, image: Image) -> Self {
        Self {
            key: key.to_string(),
            image: Some(Arc::new(image)),
        }
    }

    pub fn unresolved(key: &str) -> Self {
        Self {
            key: key.to_string(),
            image: None,
        }
    }
}

/// A material channel is either a constant or sampled from a texture.
#[derive(Clone, Debug)]
pub enum Parameter<T> {
    Value(T),
    Map(TextureRef),
}

impl<T: Copy> Parameter<T> {
    pub fn value(&self) -> Option<T> {
        match self {
            Self::Value(value) => Some(*value),
            Self::Map(_) => None,
        }
    }

    pub fn texture(&self) -> Option<&TextureRef> {
        match self {
            Self::Value(_) => None,
            Self::Map(texture) => Some(texture),
        }
    }
}

/// The texture-capable channels of a material.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MaterialChannel {
    BaseColor,
    Normal,
    Metallic,
    Roughness,
    AmbientOcclusion,
}

impl MaterialChannel {
    pub const ALL: [MaterialChannel; 5] = [
        Self::BaseColor,
        Self::Normal,
        Self::Metallic,
        Self::Roughness,
        Self::AmbientOcclusion,
    ];
}

#[derive(Clone, Debug)]
pub struct Material {
    pub name: String,
    pub base_color: Parameter<Vec4>,
    pub normal: Parameter<Vec3>,
    pub metallic: Parameter<f32>,
    pub roughness: Parameter<f32>,
    pub ambient_occlusion: Parameter<f32>,
    pub specular: Vec3,
    pub specular_power: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: String::from("default"),
            base_color: Parameter::Value(Vec4::ONE),
            normal: Parameter::Value(Vec3::Z),
            metallic: Parameter::Value(0.0),
            roughness: Parameter::Value(0.5),
            ambient_occlusion: Parameter::Value(1.0),
            specular: Vec3::splat(0.5),
            specular_power: 32.0,
        }
    }
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_base_color(mut self, color: Vec4) -> Self {
        self.base_color = Parameter::Value(color);
        self
    }

    pub fn with_map(mut self, channel: MaterialChannel, texture: TextureRef) -> Self {
        match channel {
            MaterialChannel::BaseColor => self.base_color = Parameter::Map(texture),
            MaterialChannel::Normal => self.normal = Parameter::Map(texture),
            MaterialChannel::Metallic => self.metallic = Parameter::Map(texture),
            MaterialChannel::Roughness => self.roughness = Parameter::Map(texture),
            MaterialChannel::AmbientOcclusion => {
                self.ambient_occlusion = Parameter::Map(texture)
            }
        }
        self
    }

    pub fn with_metallic_roughness(mut self, metallic: f32, roughness: f32) -> Self {
        self.metallic = Parameter::Value(metallic);
        self.roughness = Parameter::Value(roughness);
        self
    }

    /// The texture referenced by `channel`, if that channel is mapped.
    pub fn texture(&self, channel: MaterialChannel) -> Option<&TextureRef> {
        match channel {
            MaterialChannel::BaseColor => self.base_color.texture(),
            MaterialChannel::Normal => self.normal.texture(),
            MaterialChannel::Metallic => self.metallic.texture(),
            MaterialChannel::Roughness => self.roughness.texture(),
            MaterialChannel::AmbientOcclusion => self.ambient_occlusion.texture(),
        }
    }
}
