//! wgpu implementation of [`crate::backend::GpuBackend`].
//!
//! - `context` creates the instance, adapter and device, either headless or
//!   bound to a window surface.
//! - `pipeline` owns the bind group layouts, the shared quad vertex shader
//!   and the per-format render pipelines.
//! - `uniforms` packs the `EffectParams` block for each draw.
//! - `backend` implements the trait on top of those pieces and adds frame
//!   management and readback.

mod backend;
mod context;
mod pipeline;
mod uniforms;

pub use backend::WgpuBackend;
/// Pixel buffer returned by [`WgpuBackend::read_buffer`].
pub use image::RgbaImage;
