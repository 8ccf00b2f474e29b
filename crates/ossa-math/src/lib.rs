pub use glam::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub trait MatrixExt {
    /// Post-multiplies a translation, the same as moving the local origin by `offset`.
    fn translated(&self, offset: Vec3) -> Mat4;
}

impl MatrixExt for Mat4 {
    fn translated(&self, offset: Vec3) -> Mat4 {
        *self * Mat4::from_translation(offset)
    }
}

/// Builds a matrix for a transform living in the XY plane.
/// `rotation` is in radians around the Z axis.
pub fn trs_2d(translation: Vec3, rotation: f32, scale: Vec2) -> Mat4 {
    Mat4::from_scale_rotation_translation(
        Vec3::new(scale.x, scale.y, 1.0),
        Quat::from_rotation_z(rotation),
        translation,
    )
}

pub fn rotate_2d(v: Vec2, radians: f32) -> Vec2 {
    let (sin, cos) = radians.sin_cos();
    Vec2::new(v.x * cos - v.y * sin, v.x * sin + v.y * cos)
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Segment2 {
    pub from: Vec2,
    pub to: Vec2,
}

impl Segment2 {
    pub fn new(from: Vec2, to: Vec2) -> Self {
        Self { from, to }
    }

    pub fn length(&self) -> f32 {
        (self.to - self.from).length()
    }

    /// Returns the distance from `point` to the segment together with the
    /// parameter `t` in `[0, 1]` of the closest point on it.
    /// Degenerate segments behave like a single point with `t == 0`.
    pub fn closest(&self, point: Vec2) -> (f32, f32) {
        let dir = self.to - self.from;
        let len_sq = dir.length_squared();
        if len_sq <= std::f32::EPSILON {
            return ((point - self.from).length(), 0.0);
        }

        let t = ((point - self.from).dot(dir) / len_sq).max(0.0).min(1.0);
        let closest = self.from + dir * t;
        ((point - closest).length(), t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translated_moves_origin_in_local_space() {
        let m = trs_2d(Vec3::new(10.0, 0.0, 0.0), 0.0, Vec2::new(2.0, 2.0));
        let p = m.translated(Vec3::new(-1.0, 0.0, 0.0)).transform_point3(Vec3::ZERO);
        assert!((p - Vec3::new(8.0, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn rotate_quarter_turn() {
        let v = rotate_2d(Vec2::new(1.0, 0.0), std::f32::consts::FRAC_PI_2);
        assert!((v - Vec2::new(0.0, 1.0)).length() < 1e-5);
    }

    #[test]
    fn segment_closest_clamps() {
        let s = Segment2::new(Vec2::ZERO, Vec2::new(10.0, 0.0));

        let (d, t) = s.closest(Vec2::new(5.0, 3.0));
        assert!((d - 3.0).abs() < 1e-5);
        assert!((t - 0.5).abs() < 1e-5);

        let (d, t) = s.closest(Vec2::new(-4.0, 0.0));
        assert!((d - 4.0).abs() < 1e-5);
        assert_eq!(t, 0.0);

        let point = Segment2::new(Vec2::ONE, Vec2::ONE);
        let (d, t) = point.closest(Vec2::new(1.0, 3.0));
        assert!((d - 2.0).abs() < 1e-5);
        assert_eq!(t, 0.0);
    }
}
