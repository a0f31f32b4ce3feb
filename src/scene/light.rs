use glam::{Mat4, Vec2, Vec3, Vec4};

/// Light kinds, numbered the way the shaders switch on them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum LightType {
    Omni = 0,
    Spot = 1,
    Infinity = 2,
    Area = 3,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum AttenCurveType {
    #[default]
    None = 0,
    Linear = 1,
    Smooth = 2,
    Inverse = 3,
    InverseSquare = 4,
}

/// Attenuation curve: a kind tag and five free parameters whose meaning
/// depends on the kind (e.g. begin/end distance for `Linear`).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AttenCurve {
    pub kind: AttenCurveType,
    pub params: [f32; 5],
}

impl AttenCurve {
    pub fn linear(begin: f32, end: f32) -> Self {
        Self {
            kind: AttenCurveType::Linear,
            params: [begin, end, 0.0, 0.0, 0.0],
        }
    }

    pub fn smooth(begin: f32, end: f32) -> Self {
        Self {
            kind: AttenCurveType::Smooth,
            params: [begin, end, 0.0, 0.0, 0.0],
        }
    }

    pub fn inverse_square(scale: f32, offset: f32) -> Self {
        Self {
            kind: AttenCurveType::InverseSquare,
            params: [scale, offset, 0.0, 0.0, 0.0],
        }
    }

    /// The tag followed by the five parameters, 24 bytes in total.
    pub fn to_bytes(&self) -> [u8; 24] {
        let mut bytes = [0u8; 24];
        bytes[..4].copy_from_slice(&(self.kind as i32).to_ne_bytes());
        bytes[4..].copy_from_slice(bytemuck::cast_slice(&self.params));
        bytes
    }
}

/// Fixed framing used when a light does not carry its own view-projection.
pub const DIRECTIONAL_SHADOW_DISTANCE: f32 = 30.0;
pub const DIRECTIONAL_SHADOW_EXTENT: f32 = 15.0;
pub const SHADOW_NEAR_PLANE: f32 = 0.1;
pub const SPOT_SHADOW_FAR_PLANE: f32 = 100.0;

#[derive(Clone, Debug)]
pub struct Light {
    pub light_type: LightType,
    pub color: Vec4,
    pub intensity: f32,
    pub size: Vec2,
    pub distance_attenuation: AttenCurve,
    pub angle_attenuation: AttenCurve,
    /// Full cone angle in radians, used by spot and area lights.
    pub cone_angle: f32,
    pub cast_shadow: bool,
    pub view_projection: Option<Mat4>,
}

impl Light {
    pub fn new(light_type: LightType) -> Self {
        Self {
            light_type,
            color: Vec4::ONE,
            intensity: 1.0,
            size: Vec2::ZERO,
            distance_attenuation: AttenCurve::default(),
            angle_attenuation: AttenCurve::default(),
            cone_angle: std::f32::consts::FRAC_PI_2,
            cast_shadow: false,
            view_projection: None,
        }
    }

    pub fn omni(color: Vec3, intensity: f32) -> Self {
        Self {
            color: color.extend(1.0),
            intensity,
            distance_attenuation: AttenCurve::inverse_square(1.0, 1.0),
            ..Self::new(LightType::Omni)
        }
    }

    pub fn spot(color: Vec3, intensity: f32, cone_angle: f32) -> Self {
        Self {
            color: color.extend(1.0),
            intensity,
            cone_angle,
            angle_attenuation: AttenCurve::smooth(cone_angle * 0.4, cone_angle * 0.5),
            ..Self::new(LightType::Spot)
        }
    }

    pub fn infinity(color: Vec3, intensity: f32) -> Self {
        Self {
            color: color.extend(1.0),
            intensity,
            ..Self::new(LightType::Infinity)
        }
    }

    pub fn with_shadow(mut self) -> Self {
        self.cast_shadow = true;
        self
    }

    /// Light-space view-projection for 2D shadow maps. Omni lights render
    /// through six cube-face matrices instead and get the identity here.
    pub fn shadow_view_projection(&self, position: Vec3, direction: Vec3) -> Mat4 {
        if let Some(matrix) = self.view_projection {
            return matrix;
        }

        let direction = direction.try_normalize().unwrap_or(Vec3::NEG_Z);
        let up = if direction.abs().dot(Vec3::Y) > 0.95 {
            Vec3::Z
        } else {
            Vec3::Y
        };

        match self.light_type {
            LightType::Omni => Mat4::IDENTITY,
            LightType::Infinity => {
                let eye = -direction * DIRECTIONAL_SHADOW_DISTANCE;
                let view = Mat4::look_at_rh(eye, Vec3::ZERO, up);
                let projection = Mat4::orthographic_rh(
                    -DIRECTIONAL_SHADOW_EXTENT,
                    DIRECTIONAL_SHADOW_EXTENT,
                    -DIRECTIONAL_SHADOW_EXTENT,
                    DIRECTIONAL_SHADOW_EXTENT,
                    SHADOW_NEAR_PLANE,
                    DIRECTIONAL_SHADOW_DISTANCE * 2.0,
                );
                projection * view
            }
            LightType::Spot | LightType::Area => {
                let view = Mat4::look_at_rh(position, position + direction, up);
                let projection = Mat4::perspective_rh(
                    self.cone_angle.clamp(0.01, std::f32::consts::PI - 0.01),
                    1.0,
                    SHADOW_NEAR_PLANE,
                    SPOT_SHADOW_FAR_PLANE,
                );
                projection * view
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curve_bytes_lead_with_the_tag() {
        let curve = AttenCurve::linear(1.0, 5.0);
        let bytes = curve.to_bytes();
        assert_eq!(i32::from_ne_bytes(bytes[..4].try_into().unwrap()), 1);
        assert_eq!(f32::from_ne_bytes(bytes[4..8].try_into().unwrap()), 1.0);
        assert_eq!(f32::from_ne_bytes(bytes[8..12].try_into().unwrap()), 5.0);
    }

    #[test]
    fn directional_matrix_keeps_origin_in_view() {
        let light = Light::infinity(Vec3::ONE, 1.0);
        let matrix = light.shadow_view_projection(Vec3::ZERO, Vec3::new(-0.3, -1.0, -0.2));
        let clip = matrix * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn explicit_matrix_wins() {
        let mut light = Light::spot(Vec3::ONE, 1.0, 1.0);
        light.view_projection = Some(Mat4::from_scale(Vec3::splat(2.0)));
        assert_eq!(
            light.shadow_view_projection(Vec3::ZERO, Vec3::NEG_Z),
            Mat4::from_scale(Vec3::splat(2.0))
        );
    }
}
