//! Error types for asset ingestion, mesh loading, rendering and image dumps.

use super::ptex::DataType;

/// Failures while reading or converting a Ptex asset.
#[derive(thiserror::Error, Debug)]
pub enum PtexError {
    #[error("unsupported ptex format: {channels} channel(s) of {data_type:?} (only uint8 with 1, 3 or 4 channels)")]
    UnsupportedFormat { channels: usize, data_type: DataType },

    #[error("face {face}: expected {expected} bytes of texel data, got {got}")]
    FaceDataSize { face: usize, expected: usize, got: usize },

    #[error("face id {face} out of range (asset has {num_faces} faces)")]
    FaceOutOfRange { face: usize, num_faces: usize },

    #[error("ptex asset has no faces")]
    Empty,
}

/// Failures while loading or building a mesh.
#[derive(thiserror::Error, Debug)]
pub enum MeshError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("face {face} has {verts} vertices; only quads are supported")]
    NotQuad { face: usize, verts: usize },

    #[error("mesh has no faces")]
    Empty,

    #[error(transparent)]
    Ptex(#[from] PtexError),
}

/// Failures in GPU setup, layout building and per-frame rendering.
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("Device error: {0}")]
    Device(String),

    #[error("{method} supports at most {limit} resolution buckets, asset has {buckets}")]
    TooManyBuckets {
        method: &'static str,
        buckets: usize,
        limit: usize,
    },

    #[error("{0} faces do not fit the 16-bit face index")]
    TooManyFaces(usize),

    #[error("Readback error: {0}")]
    Readback(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ptex(#[from] PtexError),

    #[error(transparent)]
    Image(#[from] ImageError),
}

impl RenderError {
    pub fn device<T: ToString>(msg: T) -> Self {
        RenderError::Device(msg.to_string())
    }

    pub fn readback<T: ToString>(msg: T) -> Self {
        RenderError::Readback(msg.to_string())
    }
}

/// Failures in the debug raw-image format and PNG dumps.
#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not an img file (bad magic)")]
    BadMagic,

    #[error("unknown img format code {0}")]
    UnknownFormat(i32),

    #[error("invalid img dimensions {width}x{height}")]
    BadDimensions { width: i32, height: i32 },

    #[error("img payload truncated: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("image sizes differ: {a:?} vs {b:?}")]
    SizeMismatch { a: (u32, u32), b: (u32, u32) },

    #[error("PNG encoding error: {0}")]
    Png(#[from] png::EncodingError),
}

pub type RenderResult<T> = Result<T, RenderError>;
