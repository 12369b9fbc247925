//! The seam between the pass chain and a GPU.
//!
//! The chain only ever talks to `&mut dyn GpuBackend`. Buffers and programs
//! are opaque handles; binding an off-screen buffer is a stack so nested
//! captures restore whatever was bound before them.
//!
//! - `memory` keeps everything on the CPU and records draws. It is what
//!   `fxview check` and the tests run against.
//! - `crate::gpu::WgpuBackend` renders for real.

mod memory;

use std::collections::BTreeMap;
use std::fmt;

pub use memory::{DrawRecord, DrawTarget, MemoryBackend};

use crate::error::{BackendError, ShaderError};
use crate::types::{Color, Rect, Size, WHITE};

/// Handle to an off-screen color buffer and the texture that samples it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(u64);

impl TextureId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "texture#{}", self.0)
    }
}

/// Handle to a compiled fragment program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(u64);

impl ProgramId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "program#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
}

/// Named uniform values forwarded with every draw.
pub type Uniforms = BTreeMap<String, UniformValue>;

pub const TIME_UNIFORM: &str = "time";
pub const RESOLUTION_UNIFORM: &str = "resolution";

/// A textured, tinted rectangle in the pixel space of the bound destination.
///
/// Without a texture the quad samples opaque white, so its color is drawn
/// as-is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad {
    pub rect: Rect,
    pub color: Color,
    pub texture: Option<TextureId>,
}

impl Quad {
    pub fn textured(rect: Rect, texture: TextureId) -> Self {
        Self {
            rect,
            color: WHITE,
            texture: Some(texture),
        }
    }

    pub fn solid(rect: Rect, color: Color) -> Self {
        Self {
            rect,
            color,
            texture: None,
        }
    }
}

pub trait GpuBackend {
    fn create_buffer(&mut self, label: &str, size: Size) -> Result<TextureId, BackendError>;

    /// Reallocates `buffer`; its previous contents are discarded.
    fn resize_buffer(&mut self, buffer: TextureId, size: Size) -> Result<(), BackendError>;

    fn release_buffer(&mut self, buffer: TextureId);

    /// Compiles a complete fragment shader. A failure leaves no program behind.
    fn compile_program(&mut self, label: &str, source: &str) -> Result<ProgramId, ShaderError>;

    fn release_program(&mut self, program: ProgramId);

    /// Makes `buffer` the destination of subsequent draws, optionally clearing it.
    fn begin_capture(&mut self, buffer: TextureId, clear: Option<Color>) -> Result<(), BackendError>;

    /// Restores the destination that was bound before the matching `begin_capture`.
    fn end_capture(&mut self) -> Result<(), BackendError>;

    /// Draws into the bound buffer, or onto the screen when nothing is bound.
    fn draw_quad(
        &mut self,
        program: ProgramId,
        quad: &Quad,
        uniforms: &Uniforms,
    ) -> Result<(), BackendError>;
}
