// Procedural Ptex assets for quad meshes.
//
// Adjacency is recovered from shared edges, every face gets its own
// resolution, and texels are coloured from the 3D position of their centre,
// so the pattern is continuous across faces and any seam error shows up.

use std::collections::HashMap;

use glam::Vec3;

use super::error::MeshError;
use super::mesh::PolyMesh;
use super::ptex::{DataType, FaceInfo, MemoryPtex, NO_ADJACENT, Res};

#[derive(Debug, Clone, Copy)]
pub struct GeneratorOptions {
    pub min_res_log2: u8,
    pub max_res_log2: u8,
    pub channels:     usize,
    /// Checker cells across the mesh bounding box.
    pub checker_cells: f32,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            min_res_log2: 3,
            max_res_log2: 6,
            channels: 4,
            checker_cells: 12.0,
        }
    }
}

/// Per-face `(adj_faces, adj_edges)` in Ptex edge order.
///
/// Edge `k` of a quad runs from corner `k` to corner `k+1`. The face across
/// it is the one holding the reversed directed edge; non-manifold or
/// boundary edges get `NO_ADJACENT`.
pub fn face_adjacency(mesh: &PolyMesh) -> Result<Vec<([i32; 4], [u8; 4])>, MeshError> {
    let mut quads = Vec::with_capacity(mesh.face_count());
    for face in 0..mesh.face_count() {
        quads.push(mesh.quad(face)?);
    }

    let mut directed: HashMap<(usize, usize), (usize, u8)> = HashMap::with_capacity(quads.len() * 4);
    for (face, quad) in quads.iter().enumerate() {
        for edge in 0..4 {
            directed.insert((quad[edge], quad[(edge + 1) % 4]), (face, edge as u8));
        }
    }

    let adjacency = quads
        .iter()
        .map(|quad| {
            let mut adj_faces = [NO_ADJACENT; 4];
            let mut adj_edges = [0u8; 4];
            for edge in 0..4 {
                let reversed = (quad[(edge + 1) % 4], quad[edge]);
                if let Some(&(other, other_edge)) = directed.get(&reversed) {
                    adj_faces[edge] = other as i32;
                    adj_edges[edge] = other_edge;
                }
            }
            (adj_faces, adj_edges)
        })
        .collect();
    Ok(adjacency)
}

/// Deterministic resolution for `face` inside `[min, max]` (log2, per axis).
pub fn face_resolution(face: usize, min_log2: u8, max_log2: u8) -> Res {
    let (lo, hi) = (min_log2.min(max_log2), min_log2.max(max_log2));
    let span = (hi - lo) as u64 + 1;
    let h = mix(face as u64);
    Res::new(lo + (h % span) as u8, lo + ((h >> 32) % span) as u8)
}

// splitmix64 finaliser
fn mix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Build an 8-bit asset for `mesh` with adjacency and per-face resolutions.
pub fn generate_ptex(mesh: &PolyMesh, options: &GeneratorOptions) -> Result<MemoryPtex, MeshError> {
    if mesh.faces.is_empty() {
        return Err(MeshError::Empty);
    }
    let adjacency = face_adjacency(mesh)?;
    let (lo, hi) = mesh.bounds();
    let extent = (hi - lo).max(Vec3::splat(1e-6));
    let cell = extent.max_element() / options.checker_cells.max(1.0);
    let channels = options.channels;

    let mut asset = MemoryPtex::new(channels, DataType::Uint8);
    for (face, (adj_faces, adj_edges)) in adjacency.into_iter().enumerate() {
        let corners = mesh.quad(face)?.map(|i| mesh.positions[i]);
        let res = face_resolution(face, options.min_res_log2, options.max_res_log2);
        let (w, h) = (res.u(), res.v());

        let mut data = Vec::with_capacity(res.size() * channels);
        for j in 0..h {
            for i in 0..w {
                let u = (i as f32 + 0.5) / w as f32;
                let v = (j as f32 + 0.5) / h as f32;
                let p = bilerp(&corners, u, v);
                let rgb = pattern(p, lo, extent, cell);
                push_texel(&mut data, rgb, channels);
            }
        }

        let info = FaceInfo { res, adj_faces, adj_edges };
        asset.add_face(info, data)?;
    }

    log::info!(
        "Generated ptex asset: {} faces, {} channel(s), res 2^{}..2^{}",
        mesh.face_count(),
        channels,
        options.min_res_log2,
        options.max_res_log2,
    );
    Ok(asset)
}

/// Position at face-local `(u, v)` of a quad with corners in Ptex order.
fn bilerp(c: &[Vec3; 4], u: f32, v: f32) -> Vec3 {
    let bottom = c[0].lerp(c[1], u);
    let top = c[3].lerp(c[2], u);
    bottom.lerp(top, v)
}

fn pattern(p: Vec3, lo: Vec3, extent: Vec3, cell: f32) -> Vec3 {
    let base = Vec3::splat(0.25) + (p - lo) / extent * 0.65;
    let k = (p / cell).floor();
    let parity = (k.x + k.y + k.z).rem_euclid(2.0);
    if parity < 0.5 { base } else { base * 0.55 }
}

fn push_texel(data: &mut Vec<u8>, rgb: Vec3, channels: usize) {
    let to_u8 = |f: f32| (f.clamp(0.0, 1.0) * 255.0).round() as u8;
    match channels {
        1 => data.push(to_u8(rgb.dot(Vec3::new(0.299, 0.587, 0.114)))),
        3 => data.extend(rgb.to_array().map(to_u8)),
        _ => {
            data.extend(rgb.to_array().map(to_u8));
            data.extend(std::iter::repeat_n(255, channels.saturating_sub(3)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mesh::cube_sphere;
    use crate::engine::ptex::PtexSource;

    fn two_quads() -> PolyMesh {
        //  3---2---5
        //  | 0 | 1 |
        //  0---1---4
        let mut mesh = PolyMesh::new();
        for p in [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(2.0, 1.0, 0.0),
        ] {
            mesh.add_vertex(p);
        }
        mesh.add_face(vec![0, 1, 2, 3]);
        mesh.add_face(vec![1, 4, 5, 2]);
        mesh
    }

    #[test]
    fn adjacency_of_side_by_side_quads() {
        let adj = face_adjacency(&two_quads()).unwrap();
        // Face 0's u=1 edge touches face 1's u=0 edge.
        assert_eq!(adj[0].0, [NO_ADJACENT, 1, NO_ADJACENT, NO_ADJACENT]);
        assert_eq!(adj[0].1[1], 3);
        assert_eq!(adj[1].0, [NO_ADJACENT, NO_ADJACENT, NO_ADJACENT, 0]);
        assert_eq!(adj[1].1[3], 1);
    }

    #[test]
    fn closed_sphere_has_no_boundary_and_adjacency_is_consistent() {
        let mesh = cube_sphere(3);
        let adj = face_adjacency(&mesh).unwrap();
        for (f, (faces, edges)) in adj.iter().enumerate() {
            for k in 0..4 {
                let g = faces[k];
                assert!(g >= 0, "face {f} edge {k} is open");
                let (back_faces, back_edges) = adj[g as usize];
                let m = edges[k] as usize;
                assert_eq!(back_faces[m], f as i32);
                assert_eq!(back_edges[m] as usize, k);
            }
        }
    }

    #[test]
    fn resolution_is_deterministic_and_in_range() {
        for face in 0..200 {
            let r = face_resolution(face, 2, 5);
            assert_eq!(r, face_resolution(face, 2, 5));
            assert!((2..=5).contains(&r.ulog2));
            assert!((2..=5).contains(&r.vlog2));
        }
        assert_eq!(face_resolution(7, 4, 4), Res::new(4, 4));
    }

    #[test]
    fn generated_asset_matches_mesh() {
        let mesh = cube_sphere(2);
        let options = GeneratorOptions { channels: 3, ..Default::default() };
        let asset = generate_ptex(&mesh, &options).unwrap();
        assert_eq!(asset.num_faces(), 24);
        assert_eq!(asset.num_channels(), 3);
        for face in 0..asset.num_faces() {
            let info = asset.face_info(face);
            let mut buf = vec![0u8; asset.face_data_size(face)];
            asset.get_data(face, &mut buf).unwrap();
            assert_eq!(buf.len(), info.res.size() * 3);
        }
    }

    #[test]
    fn non_quad_mesh_is_rejected() {
        let mut mesh = two_quads();
        mesh.add_face(vec![0, 1, 4]);
        assert!(matches!(
            generate_ptex(&mesh, &GeneratorOptions::default()),
            Err(MeshError::NotQuad { face: 2, verts: 3 })
        ));
    }
}
