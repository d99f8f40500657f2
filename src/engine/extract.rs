// Ptex asset → RGBA8 face textures grouped by resolution.
//
// Buckets keep first-seen order and faces within a bucket keep traversal
// order; nothing is sorted or resampled.

use std::collections::HashMap;

use super::containers::GrowableArray;
use super::error::PtexError;
use super::ptex::{DataType, PtexSource, Res};

/// One face's texels converted to RGBA8, with its adjacency as read from
/// the asset. Owned by its bucket until uploaded.
#[derive(Debug, Clone)]
pub struct FaceTexture {
    pub face_id:   usize,
    pub data:      Vec<u8>,
    pub adj_faces: [i32; 4],
    pub adj_edges: [u8; 4],
}

/// Faces sharing an exact `(u, v)` resolution.
#[derive(Debug)]
pub struct ResolutionBucket {
    pub res:   Res,
    pub faces: GrowableArray<FaceTexture>,
}

impl ResolutionBucket {
    pub fn width(&self) -> u32 { self.res.u() }
    pub fn height(&self) -> u32 { self.res.v() }

    /// Bytes of one face block.
    pub fn face_bytes(&self) -> usize {
        self.res.size() * 4
    }
}

#[derive(Debug)]
pub struct ExtractedTextures {
    pub buckets:     Vec<ResolutionBucket>,
    pub total_faces: usize,
}

/// Read every face of `asset` into resolution buckets.
///
/// Only 8-bit assets with 1, 3 or 4 channels are accepted. Grey is
/// replicated into RGB, three-channel faces get an opaque alpha.
pub fn extract(asset: &dyn PtexSource) -> Result<ExtractedTextures, PtexError> {
    let channels = asset.num_channels();
    let data_type = asset.data_type();
    if data_type != DataType::Uint8 || !matches!(channels, 1 | 3 | 4) {
        return Err(PtexError::UnsupportedFormat { channels, data_type });
    }
    let num_faces = asset.num_faces();
    if num_faces == 0 {
        return Err(PtexError::Empty);
    }

    let mut buckets: Vec<ResolutionBucket> = Vec::new();
    let mut bucket_of: HashMap<Res, usize> = HashMap::new();
    let mut raw = Vec::new();

    for face_id in 0..num_faces {
        let info = asset.face_info(face_id);
        raw.resize(asset.face_data_size(face_id), 0);
        asset.get_data(face_id, &mut raw)?;

        let index = *bucket_of.entry(info.res).or_insert_with(|| {
            buckets.push(ResolutionBucket {
                res: info.res,
                faces: GrowableArray::with_capacity(16),
            });
            buckets.len() - 1
        });

        buckets[index].faces.add(FaceTexture {
            face_id,
            data: to_rgba8(&raw, channels),
            adj_faces: info.adj_faces,
            adj_edges: info.adj_edges,
        });
    }

    for bucket in &buckets {
        log::debug!("res {}x{}: {} faces", bucket.width(), bucket.height(), bucket.faces.len());
    }
    log::info!(
        "Extracted {} faces into {} resolution buckets ({} channel(s))",
        num_faces,
        buckets.len(),
        channels,
    );

    Ok(ExtractedTextures { buckets, total_faces: num_faces })
}

fn to_rgba8(raw: &[u8], channels: usize) -> Vec<u8> {
    match channels {
        4 => raw.to_vec(),
        3 => raw.chunks_exact(3).flat_map(|c| [c[0], c[1], c[2], 255]).collect(),
        _ => raw.iter().flat_map(|&g| [g, g, g, 255]).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ptex::{FaceInfo, MemoryPtex, NO_ADJACENT};

    fn face(ulog2: u8, vlog2: u8) -> FaceInfo {
        FaceInfo::isolated(Res::new(ulog2, vlog2))
    }

    #[test_log::test]
    fn buckets_keep_first_seen_and_traversal_order() {
        let mut asset = MemoryPtex::new(4, DataType::Uint8);
        let layout = [(2, 2), (1, 3), (2, 2), (0, 0), (1, 3), (2, 2)];
        for (i, &(u, v)) in layout.iter().enumerate() {
            let info = face(u, v);
            asset.add_face(info, vec![i as u8; info.res.size() * 4]).unwrap();
        }

        let out = extract(&asset).unwrap();
        assert_eq!(out.total_faces, 6);
        let resolutions: Vec<Res> = out.buckets.iter().map(|b| b.res).collect();
        assert_eq!(resolutions, vec![Res::new(2, 2), Res::new(1, 3), Res::new(0, 0)]);

        let ids: Vec<Vec<usize>> = out
            .buckets
            .iter()
            .map(|b| b.faces.iter().map(|f| f.face_id).collect())
            .collect();
        assert_eq!(ids, vec![vec![0, 2, 5], vec![1, 4], vec![3]]);

        for bucket in &out.buckets {
            for f in &bucket.faces {
                assert_eq!(f.data.len(), bucket.face_bytes());
                assert!(f.data.iter().all(|&b| b == f.face_id as u8));
            }
        }
    }

    #[test]
    fn grey_is_replicated_and_rgb_gets_opaque_alpha() {
        let mut grey = MemoryPtex::new(1, DataType::Uint8);
        grey.add_face(face(1, 0), vec![7, 200]).unwrap();
        let out = extract(&grey).unwrap();
        assert_eq!(out.buckets[0].faces[0].data, vec![7, 7, 7, 255, 200, 200, 200, 255]);

        let mut rgb = MemoryPtex::new(3, DataType::Uint8);
        rgb.add_face(face(0, 0), vec![1, 2, 3]).unwrap();
        let out = extract(&rgb).unwrap();
        assert_eq!(out.buckets[0].faces[0].data, vec![1, 2, 3, 255]);
    }

    #[test]
    fn adjacency_is_copied_verbatim() {
        let mut asset = MemoryPtex::new(4, DataType::Uint8);
        // Deliberately asymmetric edge indices.
        let info = FaceInfo {
            res: Res::new(0, 0),
            adj_faces: [1, NO_ADJACENT, 1, NO_ADJACENT],
            adj_edges: [2, 0, 3, 1],
        };
        asset.add_face(info, vec![0; 4]).unwrap();
        asset.add_face(face(0, 0), vec![0; 4]).unwrap();

        let out = extract(&asset).unwrap();
        let f = &out.buckets[0].faces[0];
        assert_eq!(f.adj_faces, [1, NO_ADJACENT, 1, NO_ADJACENT]);
        assert_eq!(f.adj_edges, [2, 0, 3, 1]);
    }

    #[test]
    fn unsupported_formats_fail() {
        let two = MemoryPtex::new(2, DataType::Uint8);
        assert!(matches!(extract(&two), Err(PtexError::UnsupportedFormat { channels: 2, .. })));

        let float = MemoryPtex::new(4, DataType::Float);
        assert!(matches!(
            extract(&float),
            Err(PtexError::UnsupportedFormat { data_type: DataType::Float, .. })
        ));

        let empty = MemoryPtex::new(4, DataType::Uint8);
        assert!(matches!(extract(&empty), Err(PtexError::Empty)));
    }
}
