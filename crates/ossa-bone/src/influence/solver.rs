use super::BoneWeight;
use crate::bone::WorldBone;
use ossa_math::*;
use std::fmt::Debug;

/// Computes how strongly each bone pulls on a point of a mesh.
///
/// Solvers only report raw weights. Selecting the strongest bones, the
/// per-vertex bound and normalization are applied by the map writer.
pub trait InfluenceSolver: Debug + Send + Sync {
    /// Appends the raw weight of every bone influencing `point` to `out`.
    /// `point` and `bones` live in the same space.
    fn solve(&self, bones: &[WorldBone], point: Vec2, out: &mut Vec<BoneWeight>);
}

/// Treats every bone as a capsule around its segment.
///
/// Within the inner radius a bone has full weight, beyond the outer radius
/// none, and in between the weight falls off linearly. Radii are interpolated
/// along the segment from `range[0]` to `range[1]`.
#[derive(Debug, Copy, Clone, Default)]
pub struct CapsuleSolver;

impl CapsuleSolver {
    pub fn weight(bone: &WorldBone, point: Vec2) -> f32 {
        let (distance, t) = bone.segment.closest(point);
        let radii = bone.range[0].lerp(bone.range[1], t);
        let (inner, outer) = (radii.x, radii.y);

        if distance <= inner {
            1.0
        } else if distance >= outer || outer <= inner {
            0.0
        } else {
            (outer - distance) / (outer - inner)
        }
    }
}

impl InfluenceSolver for CapsuleSolver {
    fn solve(&self, bones: &[WorldBone], point: Vec2, out: &mut Vec<BoneWeight>) {
        for bone in bones.iter() {
            let weight = Self::weight(bone, point);
            if weight > 0.0 {
                out.push(BoneWeight {
                    bone: bone.index,
                    weight,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bone(index: u32, from: Vec2, to: Vec2) -> WorldBone {
        WorldBone {
            index,
            segment: Segment2::new(from, to),
            range: [Vec2::new(1.0, 3.0), Vec2::new(1.0, 3.0)],
        }
    }

    #[test]
    fn capsule_falloff() {
        let b = bone(0, Vec2::ZERO, Vec2::new(10.0, 0.0));

        assert_eq!(CapsuleSolver::weight(&b, Vec2::new(5.0, 0.5)), 1.0);
        assert!((CapsuleSolver::weight(&b, Vec2::new(5.0, 2.0)) - 0.5).abs() < 1e-5);
        assert_eq!(CapsuleSolver::weight(&b, Vec2::new(5.0, 3.5)), 0.0);
        assert_eq!(CapsuleSolver::weight(&b, Vec2::new(-5.0, 0.0)), 0.0);
    }

    #[test]
    fn radii_follow_segment() {
        let mut b = bone(0, Vec2::ZERO, Vec2::new(10.0, 0.0));
        b.range = [Vec2::new(0.0, 2.0), Vec2::new(4.0, 8.0)];

        assert_eq!(CapsuleSolver::weight(&b, Vec2::new(0.0, 3.0)), 0.0);
        assert_eq!(CapsuleSolver::weight(&b, Vec2::new(10.0, 3.0)), 1.0);
    }

    #[test]
    fn only_touching_bones_are_reported() {
        let bones = [
            bone(0, Vec2::ZERO, Vec2::new(10.0, 0.0)),
            bone(1, Vec2::new(0.0, 50.0), Vec2::new(10.0, 50.0)),
            bone(2, Vec2::new(5.0, -10.0), Vec2::new(5.0, 10.0)),
        ];

        let mut out = Vec::new();
        CapsuleSolver.solve(&bones, Vec2::new(5.0, 0.0), &mut out);
        let indices: Vec<u32> = out.iter().map(|w| w.bone).collect();
        assert_eq!(indices, vec![0, 2]);
    }
}
