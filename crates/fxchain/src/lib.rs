//! GLSL post-processing chains over off-screen render targets.
//!
//! Content is drawn into a pre-chain buffer, then every effect in an ordered
//! list gets its own render target that samples the previous one. The last
//! target (or the pre-chain buffer, when the list is empty) is composited on
//! screen.
//!
//! ```text
//!   children ──▶ pre-chain ──▶ stage 0 ──▶ stage 1 ──▶ … ──▶ composite
//!                    ▲            ▲           ▲
//!                    │            └─ EffectUnit sources (template-assembled)
//!                    └─ EffectWidget::render
//! ```
//!
//! `EffectWidget` is the host-facing adapter. `PassChain` does the
//! reconciliation, `RenderTarget` owns one buffer and its program, and
//! `EffectUnit` turns effect parameters into shader source through the
//! `template` module. Everything touching a GPU goes through the
//! [`GpuBackend`] trait: [`MemoryBackend`] for validation and tests,
//! [`WgpuBackend`] for real rendering.

pub mod backend;
pub mod chain;
pub mod clock;
mod compile;
pub mod effect;
pub mod error;
pub mod gpu;
pub mod resource;
pub mod target;
pub mod template;
pub mod types;
pub mod widget;

pub use backend::{
    DrawRecord, DrawTarget, GpuBackend, MemoryBackend, ProgramId, Quad, TextureId, UniformValue,
    Uniforms,
};
pub use chain::{PassChain, ReconcileReport, StageFailure};
pub use clock::{FixedClock, FrameClock, SystemClock, TimeSample};
pub use compile::validate_glsl;
pub use effect::{
    generate_body, Channel, ChannelOrder, EffectId, EffectKind, EffectUnit, ParamValue,
    Subscription,
};
pub use error::{
    BackendError, ChainError, EffectError, GeometryError, ResourceError, ShaderError,
};
pub use gpu::WgpuBackend;
pub use resource::{read_shader_source, ResourceLookup, SearchPaths};
pub use target::{Canvas, RenderTarget};
pub use types::{Color, Rect, ShaderCompiler, Size};
pub use widget::{Child, EffectWidget, SolidRect};
