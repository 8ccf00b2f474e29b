use crate::timeline::Frame;
use ossa_math::*;

/// Deformable 2D mesh of one layer, as produced by a mesh key.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerMesh {
    positions: Vec<Vec2>,
    frame_sign: Frame,
}

impl Default for LayerMesh {
    fn default() -> Self {
        Self {
            positions: Vec::new(),
            frame_sign: Frame::INVALID,
        }
    }
}

impl LayerMesh {
    pub fn new(positions: Vec<Vec2>) -> Self {
        Self {
            positions,
            frame_sign: Frame::INVALID,
        }
    }

    /// Axis-aligned grid of `columns` x `rows` vertices spaced `cell` apart,
    /// starting at `origin`.
    pub fn grid(origin: Vec2, columns: usize, rows: usize, cell: f32) -> Self {
        let mut positions = Vec::with_capacity(columns * rows);
        for y in 0..rows {
            for x in 0..columns {
                positions.push(origin + Vec2::new(x as f32 * cell, y as f32 * cell));
            }
        }
        Self::new(positions)
    }

    pub fn positions(&self) -> &[Vec2] {
        self.positions.as_slice()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Frame of the key this mesh was taken from.
    pub fn frame_sign(&self) -> Frame {
        self.frame_sign
    }

    pub(crate) fn set_frame_sign(&mut self, frame: Frame) {
        self.frame_sign = frame;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_layout() {
        let mesh = LayerMesh::grid(Vec2::new(-1.0, 0.0), 3, 2, 0.5);
        assert_eq!(mesh.vertex_count(), 6);
        assert_eq!(mesh.positions()[0], Vec2::new(-1.0, 0.0));
        assert_eq!(mesh.positions()[5], Vec2::new(0.0, 0.5));
        assert!(!mesh.frame_sign().is_valid());
    }
}
