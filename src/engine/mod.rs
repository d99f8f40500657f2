// Engine module - Ptex assets, GPU layout, render methods and the tools
// around them (profiling, readback, image dumps and comparison)

pub mod camera;
pub mod compare;
pub mod config;
pub mod containers;
pub mod debug_overlay;
pub mod error;
pub mod extract;
pub mod filter;
pub mod framebuffer;
pub mod gpu;
pub mod image_io;
pub mod input;
pub mod layout;
pub mod mesh;
pub mod methods;
pub mod procedural;
pub mod profiler;
pub mod ptex;
pub mod readback;
pub mod sampler;

// Re-export commonly used items
pub use config::{Args, Settings};
pub use error::{RenderError, RenderResult};
pub use methods::{Method, RenderStrategy, RendererContext};
