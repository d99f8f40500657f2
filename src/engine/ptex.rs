// Ptex asset model: per-face resolutions, adjacency and raw texel data.
//
// `PtexSource` is the reader interface the rest of the engine consumes.
// `MemoryPtex` keeps every face in memory; it backs the generated assets
// and the tests.
//
// Edge numbering follows Ptex: edge 0 is v=0, 1 is u=1, 2 is v=1, 3 is u=0,
// walked counter-clockwise starting at the (0,0) corner.

use glam::Vec2;
use super::error::PtexError;

/// Adjacent-face value for edges on a mesh boundary.
pub const NO_ADJACENT: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Uint8,
    Uint16,
    Half,
    Float,
}

impl DataType {
    /// Bytes per channel.
    pub fn size(self) -> usize {
        match self {
            DataType::Uint8 => 1,
            DataType::Uint16 | DataType::Half => 2,
            DataType::Float => 4,
        }
    }
}

/// Power-of-two face resolution stored as log2 per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Res {
    pub ulog2: u8,
    pub vlog2: u8,
}

impl Res {
    pub fn new(ulog2: u8, vlog2: u8) -> Self {
        Self { ulog2, vlog2 }
    }

    pub fn u(self) -> u32 {
        1 << self.ulog2
    }

    pub fn v(self) -> u32 {
        1 << self.vlog2
    }

    /// Texel count.
    pub fn size(self) -> usize {
        self.u() as usize * self.v() as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceInfo {
    pub res: Res,
    /// Face across each edge, `NO_ADJACENT` on boundaries.
    pub adj_faces: [i32; 4],
    /// Which edge of the adjacent face touches each of our edges.
    pub adj_edges: [u8; 4],
}

impl FaceInfo {
    pub fn isolated(res: Res) -> Self {
        Self {
            res,
            adj_faces: [NO_ADJACENT; 4],
            adj_edges: [0; 4],
        }
    }
}

/// Read access to a Ptex asset.
pub trait PtexSource {
    fn num_faces(&self) -> usize;
    fn num_channels(&self) -> usize;
    fn data_type(&self) -> DataType;

    /// Panics if `face` is out of range.
    fn face_info(&self, face: usize) -> FaceInfo;

    /// Copy the full-resolution texels of `face` into `buffer`, row by row
    /// along v with u varying fastest.
    fn get_data(&self, face: usize, buffer: &mut [u8]) -> Result<(), PtexError>;

    fn face_data_size(&self, face: usize) -> usize {
        self.data_type().size() * self.num_channels() * self.face_info(face).res.size()
    }
}

// ============================================================================
// IN-MEMORY ASSET
// ============================================================================

pub struct MemoryPtex {
    channels: usize,
    data_type: DataType,
    faces: Vec<FaceInfo>,
    data: Vec<Vec<u8>>,
}

impl MemoryPtex {
    pub fn new(channels: usize, data_type: DataType) -> Self {
        Self {
            channels,
            data_type,
            faces: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Append a face and return its id.
    pub fn add_face(&mut self, info: FaceInfo, data: Vec<u8>) -> Result<usize, PtexError> {
        let face = self.faces.len();
        let expected = self.data_type.size() * self.channels * info.res.size();
        if data.len() != expected {
            return Err(PtexError::FaceDataSize { face, expected, got: data.len() });
        }
        self.faces.push(info);
        self.data.push(data);
        Ok(face)
    }

    /// Replace the adjacency of an already added face.
    pub fn set_adjacency(&mut self, face: usize, adj_faces: [i32; 4], adj_edges: [u8; 4]) {
        let info = &mut self.faces[face];
        info.adj_faces = adj_faces;
        info.adj_edges = adj_edges;
    }
}

impl PtexSource for MemoryPtex {
    fn num_faces(&self) -> usize {
        self.faces.len()
    }

    fn num_channels(&self) -> usize {
        self.channels
    }

    fn data_type(&self) -> DataType {
        self.data_type
    }

    fn face_info(&self, face: usize) -> FaceInfo {
        self.faces[face]
    }

    fn get_data(&self, face: usize, buffer: &mut [u8]) -> Result<(), PtexError> {
        let src = self.data.get(face).ok_or(PtexError::FaceOutOfRange {
            face,
            num_faces: self.faces.len(),
        })?;
        if buffer.len() != src.len() {
            return Err(PtexError::FaceDataSize {
                face,
                expected: src.len(),
                got: buffer.len(),
            });
        }
        buffer.copy_from_slice(src);
        Ok(())
    }
}

// ============================================================================
// EDGE TRANSFORM
// ============================================================================

/// Map a face-local `uv` into the neighbour across `edge`, whose edge
/// `neighbor_edge` is the shared one.
///
/// Our edge frame is (along, outward); the neighbour walks the shared edge in
/// the opposite direction, so `along' = 1 - along` and the outward distance
/// becomes the inward depth on its side. The map is affine, so gradients can
/// be carried across by differencing mapped points.
pub fn neighbor_uv(uv: Vec2, edge: usize, neighbor_edge: usize) -> Vec2 {
    let (along, outward) = match edge & 3 {
        0 => (uv.x, -uv.y),
        1 => (uv.y, uv.x - 1.0),
        2 => (1.0 - uv.x, uv.y - 1.0),
        _ => (1.0 - uv.y, -uv.x),
    };
    let a = 1.0 - along;
    let d = outward;
    match neighbor_edge & 3 {
        0 => Vec2::new(a, d),
        1 => Vec2::new(1.0 - d, a),
        2 => Vec2::new(1.0 - a, 1.0 - d),
        _ => Vec2::new(d, 1.0 - a),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec2, b: Vec2) -> bool {
        (a - b).abs().max_element() < 1e-6
    }

    #[test]
    fn res_sizes() {
        let res = Res::new(3, 2);
        assert_eq!(res.u(), 8);
        assert_eq!(res.v(), 4);
        assert_eq!(res.size(), 32);
    }

    #[test]
    fn add_face_checks_data_length() {
        let mut asset = MemoryPtex::new(4, DataType::Uint8);
        let res = Res::new(1, 1);
        assert!(asset.add_face(FaceInfo::isolated(res), vec![0; 16]).is_ok());
        let err = asset.add_face(FaceInfo::isolated(res), vec![0; 15]).unwrap_err();
        assert!(matches!(err, PtexError::FaceDataSize { face: 1, expected: 16, got: 15 }));
    }

    #[test]
    fn get_data_copies_face() {
        let mut asset = MemoryPtex::new(1, DataType::Uint8);
        asset.add_face(FaceInfo::isolated(Res::new(1, 0)), vec![9, 10]).unwrap();
        let mut buf = vec![0u8; asset.face_data_size(0)];
        asset.get_data(0, &mut buf).unwrap();
        assert_eq!(buf, vec![9, 10]);
        assert!(asset.get_data(3, &mut buf).is_err());
    }

    #[test]
    fn edge_midpoints_map_onto_shared_edge() {
        // Midpoint of our edge lands on the midpoint of every neighbour edge.
        let mids = [
            Vec2::new(0.5, 0.0),
            Vec2::new(1.0, 0.5),
            Vec2::new(0.5, 1.0),
            Vec2::new(0.0, 0.5),
        ];
        for edge in 0..4 {
            for ne in 0..4 {
                assert!(close(neighbor_uv(mids[edge], edge, ne), mids[ne]), "edge {edge} -> {ne}");
            }
        }
    }

    #[test]
    fn shared_edge_runs_in_opposite_direction() {
        // Right edge (u=1) glued to the left edge (u=0) of a same-oriented face.
        let p = neighbor_uv(Vec2::new(1.0, 0.25), 1, 3);
        assert!(close(p, Vec2::new(0.0, 0.25)));
        // A point just outside crosses into the neighbour's interior.
        let q = neighbor_uv(Vec2::new(1.1, 0.25), 1, 3);
        assert!(close(q, Vec2::new(0.1, 0.25)));
    }

    #[test]
    fn crossing_twice_returns_home() {
        let uv = Vec2::new(0.93, 0.4);
        for edge in 0..4 {
            for ne in 0..4 {
                let there = neighbor_uv(uv, edge, ne);
                let back = neighbor_uv(there, ne, edge);
                assert!(close(back, uv), "edge {edge} <-> {ne}");
            }
        }
    }
}
