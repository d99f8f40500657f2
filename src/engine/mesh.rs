// Quad meshes for Ptex rendering.
//
//   load_obj() / cube_sphere() → PolyMesh → PtexMesh::from_poly() → GPU
//
// Ptex assigns one texture per face, so every face must be a quad and the
// rendered triangles carry the face id plus the corner UVs of their quad.

use std::collections::HashMap;
use std::path::Path;

use glam::Vec3;

use super::error::MeshError;

// ============================================================================
// GPU VERTEX
// ============================================================================

/// Vertex layout shared by every Ptex pipeline:
///   @location(0) position: vec3<f32>
///   @location(1) normal:   vec3<f32>
///   @location(2) uv:       vec2<f32>   face-local, (0,0)..(1,1)
///   @location(3) face_id:  u32         flat
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PtexVertex {
    pub position: [f32; 3],
    pub normal:   [f32; 3],
    pub uv:       [f32; 2],
    pub face_id:  u32,
}

impl PtexVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x3,
        2 => Float32x2,
        3 => Uint32,
    ];

    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<PtexVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

// ============================================================================
// POLY MESH
// ============================================================================

/// Polygon mesh as loaded or generated. Faces use CCW winding seen from
/// outside. Only quads can be rendered; other faces are rejected later.
#[derive(Debug, Clone, Default)]
pub struct PolyMesh {
    pub positions: Vec<Vec3>,
    pub faces:     Vec<Vec<usize>>,
}

impl PolyMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vertex and return its index.
    pub fn add_vertex(&mut self, pos: Vec3) -> usize {
        let idx = self.positions.len();
        self.positions.push(pos);
        idx
    }

    pub fn add_face(&mut self, indices: Vec<usize>) {
        debug_assert!(indices.len() >= 3, "Face must have at least 3 vertices");
        self.faces.push(indices);
    }

    pub fn vertex_count(&self) -> usize { self.positions.len() }
    pub fn face_count(&self) -> usize { self.faces.len() }

    /// Axis-aligned bounds `(min, max)`; zero for an empty mesh.
    pub fn bounds(&self) -> (Vec3, Vec3) {
        if self.positions.is_empty() {
            return (Vec3::ZERO, Vec3::ZERO);
        }
        self.positions.iter().fold(
            (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
            |(lo, hi), p| (lo.min(*p), hi.max(*p)),
        )
    }

    /// Corner indices of face `face`, or `NotQuad` if it isn't one.
    pub fn quad(&self, face: usize) -> Result<[usize; 4], MeshError> {
        let f = &self.faces[face];
        match f.as_slice() {
            &[a, b, c, d] => Ok([a, b, c, d]),
            _ => Err(MeshError::NotQuad { face, verts: f.len() }),
        }
    }
}

/// Quad sphere: a cube with `n × n` cells per side, projected onto the unit
/// sphere. Lattice points shared between cube faces are welded so adjacency
/// can be recovered from shared edges.
///
///   n=1:  8 verts,   6 faces
///   n=4: 98 verts,  96 faces
pub fn cube_sphere(n: u32) -> PolyMesh {
    let n = n.max(1) as i32;
    let mut mesh = PolyMesh::new();
    let mut welded: HashMap<[i32; 3], usize> = HashMap::new();

    let mut vertex = |mesh: &mut PolyMesh, lattice: [i32; 3]| -> usize {
        *welded.entry(lattice).or_insert_with(|| {
            let p = Vec3::new(lattice[0] as f32, lattice[1] as f32, lattice[2] as f32)
                / n as f32 * 2.0 - Vec3::ONE;
            mesh.add_vertex(p.normalize())
        })
    };

    // Cube face on `axis` at coordinate `side`; the other two axes follow
    // cyclically so (b × c) points along +axis.
    for axis in 0..3 {
        let b = (axis + 1) % 3;
        let c = (axis + 2) % 3;
        for side in [0, n] {
            for q in 0..n {
                for p in 0..n {
                    let mut corners = [(p, q), (p + 1, q), (p + 1, q + 1), (p, q + 1)];
                    if side == 0 {
                        corners = [(p, q), (p, q + 1), (p + 1, q + 1), (p + 1, q)];
                    }
                    let face = corners
                        .iter()
                        .map(|&(pb, pc)| {
                            let mut lattice = [0; 3];
                            lattice[axis] = side;
                            lattice[b] = pb;
                            lattice[c] = pc;
                            vertex(&mut mesh, lattice)
                        })
                        .collect();
                    mesh.add_face(face);
                }
            }
        }
    }
    mesh
}

// ============================================================================
// OBJ LOADING
// ============================================================================

pub fn load_obj(path: &Path) -> Result<PolyMesh, MeshError> {
    let text = std::fs::read_to_string(path)?;
    parse_obj(&text)
}

/// Parse `v` and `f` records. Face tokens may be `i`, `i/t`, `i//n` or
/// `i/t/n`; negative indices count back from the last vertex read.
/// Every face must be a quad.
pub fn parse_obj(text: &str) -> Result<PolyMesh, MeshError> {
    let mut mesh = PolyMesh::new();

    for (line_no, raw) in text.lines().enumerate() {
        let line = raw.trim();
        let line_no = line_no + 1;

        if let Some(rest) = line.strip_prefix("v ") {
            let coords: Vec<f32> = rest
                .split_whitespace()
                .take(3)
                .map(|s| s.parse::<f32>())
                .collect::<Result<_, _>>()
                .map_err(|e| MeshError::Parse { line: line_no, message: e.to_string() })?;
            if coords.len() != 3 {
                return Err(MeshError::Parse {
                    line: line_no,
                    message: "vertex needs 3 coordinates".into(),
                });
            }
            mesh.add_vertex(Vec3::new(coords[0], coords[1], coords[2]));
        } else if let Some(rest) = line.strip_prefix("f ") {
            let mut face = Vec::with_capacity(4);
            for token in rest.split_whitespace() {
                face.push(parse_face_index(token, mesh.vertex_count(), line_no)?);
            }
            if face.len() != 4 {
                return Err(MeshError::NotQuad { face: mesh.face_count(), verts: face.len() });
            }
            mesh.faces.push(face);
        }
    }

    if mesh.faces.is_empty() {
        return Err(MeshError::Empty);
    }
    Ok(mesh)
}

fn parse_face_index(token: &str, vertex_count: usize, line: usize) -> Result<usize, MeshError> {
    let first = token.split('/').next().unwrap_or_default();
    let index: i64 = first
        .parse()
        .map_err(|_| MeshError::Parse { line, message: format!("bad face index '{token}'") })?;

    let resolved = if index < 0 {
        vertex_count as i64 + index
    } else {
        index - 1
    };
    if resolved < 0 || resolved >= vertex_count as i64 {
        return Err(MeshError::Parse {
            line,
            message: format!("face index {index} out of range ({vertex_count} vertices)"),
        });
    }
    Ok(resolved as usize)
}

// ============================================================================
// PTEX MESH
// ============================================================================

/// Non-indexed triangle list ready for the Ptex pipelines.
pub struct PtexMesh {
    pub vertices: Vec<PtexVertex>,
    /// Bounding-box centre, used as the camera target.
    pub center:   Vec3,
    /// Half the bounding-box diagonal.
    pub radius:   f32,
}

const QUAD_SPLIT: [usize; 6] = [0, 1, 2, 2, 3, 0];
const QUAD_UVS: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

impl PtexMesh {
    /// Triangulate every quad into two triangles with flat normals. Face ids
    /// are the quad indices, matching the Ptex asset's face order.
    pub fn from_poly(poly: &PolyMesh) -> Result<Self, MeshError> {
        if poly.faces.is_empty() {
            return Err(MeshError::Empty);
        }

        let mut vertices = Vec::with_capacity(poly.face_count() * 6);
        for face_id in 0..poly.face_count() {
            let quad = poly.quad(face_id)?;
            let p = quad.map(|i| poly.positions[i]);
            let normal = (p[2] - p[0]).cross(p[3] - p[1]).normalize_or_zero();

            for &corner in &QUAD_SPLIT {
                vertices.push(PtexVertex {
                    position: p[corner].to_array(),
                    normal:   normal.to_array(),
                    uv:       QUAD_UVS[corner],
                    face_id:  face_id as u32,
                });
            }
        }

        let (lo, hi) = poly.bounds();
        Ok(Self {
            vertices,
            center: (lo + hi) * 0.5,
            radius: (hi - lo).length() * 0.5,
        })
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn vertex_count(&self) -> u32 { self.vertices.len() as u32 }
}
