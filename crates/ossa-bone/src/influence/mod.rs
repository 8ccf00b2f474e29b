//! Per-vertex bone weights of one mesh.
//!
//! Weights are computed on the shared worker pool. A map hands its storage to
//! scheduled jobs through an `Arc<RwLock<_>>`; every request gets a ticket and
//! only the result of the latest request is stored.

mod solver;

pub use solver::*;

use crate::{
    bone::{BoneTree, WorldBone},
    BoneKeyError,
};
use ossa_math::*;
use ossa_scene::serialize::{DecodeError, Deserializer, Serializer};
use ossa_scene::LayerMesh;
use ossa_utils::log;
use ossa_utils::task::WorkerPool;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::io::{Read, Write};
use std::sync::{Arc, RwLock};

/// Upper bound of bones influencing a single vertex.
pub const MAX_BONE_INFLUENCE: usize = 32;

#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct BoneWeight {
    /// Pre-order index of the bone in its tree.
    pub bone: u32,
    pub weight: f32,
}

/// What a scheduled write needs besides the bones and the mesh.
#[derive(Debug, Clone)]
pub struct InfluenceContext<'a> {
    pub pool: &'a WorkerPool,
    pub solver: Arc<dyn InfluenceSolver>,
}

#[derive(Debug, Default)]
struct Weights {
    vertices: Vec<Vec<BoneWeight>>,
    requested: u64,
    computed: bool,
}

#[derive(Debug, Default)]
pub struct InfluenceMap {
    shared: Arc<RwLock<Weights>>,
}

impl InfluenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes the map for `vertex_count` vertices.
    /// Keeps the current weights when the count is unchanged, unless `force_clear`.
    pub fn allocate(&mut self, vertex_count: usize, force_clear: bool) -> Result<(), BoneKeyError> {
        let mut weights = self.shared.write()?;
        if weights.vertices.len() == vertex_count && !force_clear {
            return Ok(());
        }

        weights.vertices.clear();
        weights.vertices.resize_with(vertex_count, Vec::new);
        weights.computed = false;
        Ok(())
    }

    pub fn vertex_count(&self) -> Result<usize, BoneKeyError> {
        Ok(self.shared.read()?.vertices.len())
    }

    /// Whether the latest requested write has landed.
    pub fn is_computed(&self) -> Result<bool, BoneKeyError> {
        Ok(self.shared.read()?.computed)
    }

    /// Weights of vertex `index`, strongest first. Empty when out of range.
    pub fn vertex(&self, index: usize) -> Result<Vec<BoneWeight>, BoneKeyError> {
        let weights = self.shared.read()?;
        Ok(weights.vertices.get(index).cloned().unwrap_or_default())
    }

    /// Queues the computation of every vertex of `mesh` on the context's pool.
    /// Nothing runs until the pool is woken. Vertices are moved into the
    /// bones' space through `inner_matrix` first.
    pub fn write_async(
        &mut self,
        context: &InfluenceContext<'_>,
        bones: &Arc<BoneTree>,
        inner_matrix: Mat4,
        mesh: &Arc<LayerMesh>,
    ) -> Result<(), BoneKeyError> {
        let ticket = {
            let mut weights = self.shared.write()?;
            weights.requested += 1;
            weights.computed = false;
            weights.requested
        };

        let shared = self.shared.clone();
        let solver = context.solver.clone();
        let bones = bones.clone();
        let mesh = mesh.clone();

        context.pool.schedule(move || {
            let world = bones.world_bones();
            let result = solve_vertices(solver.as_ref(), &world, inner_matrix, mesh.positions());

            match shared.write() {
                Ok(mut weights) => {
                    if weights.requested == ticket && weights.vertices.len() == result.len() {
                        weights.vertices = result;
                        weights.computed = true;
                    }
                }
                Err(_) => log::warn!("influence map lock poisoned, dropping weights"),
            }
        });
        Ok(())
    }

    pub fn serialize<W: Write>(&self, out: &mut Serializer<W>) -> Result<(), BoneKeyError> {
        let weights = self.shared.read()?;

        out.write_count(weights.vertices.len())?;
        for vertex in weights.vertices.iter() {
            out.write_count(vertex.len())?;
            for entry in vertex.iter() {
                out.write_i32(entry.bone as i32);
                out.write_f32(entry.weight);
            }
        }
        Ok(out.check_stream()?)
    }

    pub fn deserialize<R: Read>(input: &mut Deserializer<R>) -> Result<Self, DecodeError> {
        let vertex_count = input.read_i32();
        input.check_stream()?;
        if vertex_count < 0 {
            return Err(input.errored("invalid vertex count"));
        }

        let mut vertices = Vec::new();
        for _ in 0..vertex_count {
            let count = input.read_i32();
            input.check_stream()?;
            if count < 0 || count as usize > MAX_BONE_INFLUENCE {
                return Err(input.errored(format!("invalid influence count {}", count)));
            }

            let mut vertex = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let bone = input.read_i32();
                let weight = input.read_f32();
                if bone < 0 {
                    return Err(input.errored("invalid bone index"));
                }
                vertex.push(BoneWeight {
                    bone: bone as u32,
                    weight,
                });
            }
            vertices.push(vertex);
        }
        input.check_stream()?;

        Ok(Self {
            shared: Arc::new(RwLock::new(Weights {
                vertices,
                requested: 0,
                computed: true,
            })),
        })
    }
}

/// Solves every position in parallel. Each vertex keeps at most
/// [`MAX_BONE_INFLUENCE`] bones, strongest first, with weights summing to one.
pub fn solve_vertices(
    solver: &dyn InfluenceSolver,
    bones: &[WorldBone],
    inner_matrix: Mat4,
    positions: &[Vec2],
) -> Vec<Vec<BoneWeight>> {
    positions
        .par_iter()
        .map(|position| {
            let point = inner_matrix.transform_point3(position.extend(0.0)).truncate();
            let mut raw = Vec::new();
            solver.solve(bones, point, &mut raw);
            strongest(raw)
        })
        .collect()
}

fn strongest(mut weights: Vec<BoneWeight>) -> Vec<BoneWeight> {
    weights.retain(|w| w.weight > 0.0 && w.weight.is_finite());
    weights.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(Ordering::Equal)
            .then(a.bone.cmp(&b.bone))
    });
    weights.truncate(MAX_BONE_INFLUENCE);

    let sum: f32 = weights.iter().map(|w| w.weight).sum();
    if sum > 0.0 {
        for w in weights.iter_mut() {
            w.weight /= sum;
        }
    }
    weights
}
