//! Off-screen render targets and scoped capture.

use tracing::{debug, warn};

use crate::backend::{
    GpuBackend, ProgramId, Quad, TextureId, UniformValue, Uniforms, RESOLUTION_UNIFORM,
};
use crate::error::{BackendError, ChainError, ShaderError};
use crate::template;
use crate::types::{Color, Rect, Size, TRANSPARENT, WHITE};

/// One off-screen color buffer, the quad that fills it, and the program that
/// draws that quad.
///
/// The quad always covers the whole buffer, so the two sizes never diverge.
/// A shader is only committed after it compiled; until then the previous
/// program stays bound.
#[derive(Debug)]
pub struct RenderTarget {
    label: String,
    size: Size,
    color_buffer: TextureId,
    quad: Quad,
    program: ProgramId,
    bound_source: String,
    uniforms: Uniforms,
    clear_color: Color,
}

impl RenderTarget {
    /// Allocates a buffer of `size` bound to the pass-through program.
    pub fn new(
        backend: &mut dyn GpuBackend,
        label: impl Into<String>,
        size: Size,
    ) -> Result<Self, ChainError> {
        let label = label.into();
        let color_buffer = backend.create_buffer(&label, size)?;
        let source = template::passthrough_source();
        let program = match backend.compile_program(&label, &source) {
            Ok(program) => program,
            Err(err) => {
                backend.release_buffer(color_buffer);
                return Err(err.into());
            }
        };
        debug!(target = %label, %size, %color_buffer, "allocated render target");

        let mut uniforms = Uniforms::new();
        uniforms.insert(RESOLUTION_UNIFORM.into(), UniformValue::Vec2(size.as_vec2()));
        Ok(Self {
            label,
            size,
            color_buffer,
            quad: Quad {
                rect: Rect::covering(size),
                color: WHITE,
                texture: None,
            },
            program,
            bound_source: source,
            uniforms,
            clear_color: TRANSPARENT,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn color_buffer(&self) -> TextureId {
        self.color_buffer
    }

    /// The texture sampled by this target's quad.
    pub fn input(&self) -> Option<TextureId> {
        self.quad.texture
    }

    pub fn quad(&self) -> &Quad {
        &self.quad
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn bound_source(&self) -> &str {
        &self.bound_source
    }

    pub fn uniforms(&self) -> &Uniforms {
        &self.uniforms
    }

    pub fn set_input(&mut self, texture: TextureId) {
        self.quad.texture = Some(texture);
    }

    pub fn set_uniform(&mut self, name: &str, value: UniformValue) {
        self.uniforms.insert(name.to_string(), value);
    }

    /// Reallocates the color buffer and the quad together.
    ///
    /// If the backend cannot reallocate, the target keeps its previous size.
    pub fn resize(&mut self, backend: &mut dyn GpuBackend, size: Size) -> Result<(), BackendError> {
        if size == self.size {
            return Ok(());
        }
        backend.resize_buffer(self.color_buffer, size)?;
        debug!(target = %self.label, from = %self.size, to = %size, "resized render target");
        self.size = size;
        self.quad.rect = Rect::covering(size);
        Ok(())
    }

    /// Compiles `source` and binds it; a failure keeps the current program.
    pub fn set_shader(&mut self, backend: &mut dyn GpuBackend, source: &str) -> Result<(), ShaderError> {
        if source == self.bound_source {
            return Ok(());
        }
        match backend.compile_program(&self.label, source) {
            Ok(program) => {
                backend.release_program(self.program);
                self.program = program;
                self.bound_source = source.to_string();
                debug!(target = %self.label, %program, "bound new shader");
                Ok(())
            }
            Err(err) => {
                warn!(
                    target = %self.label,
                    error = %err,
                    "shader failed to compile; keeping previous shader"
                );
                Err(err)
            }
        }
    }

    /// Binds the color buffer for the duration of `draw`.
    ///
    /// The binding is released when the canvas drops, so an early return or
    /// a panic inside `draw` still restores the previous destination.
    pub fn capture<R>(
        &self,
        backend: &mut dyn GpuBackend,
        draw: impl FnOnce(&mut Canvas<'_>) -> R,
    ) -> Result<R, BackendError> {
        let mut canvas = Canvas::begin(
            backend,
            self.color_buffer,
            Some(self.clear_color),
            self.size,
            self.program,
            &self.uniforms,
        )?;
        Ok(draw(&mut canvas))
    }

    /// Redraws the buffer from its input through the bound program.
    pub fn draw(&self, backend: &mut dyn GpuBackend) -> Result<(), BackendError> {
        let quad = self.quad;
        self.capture(backend, |canvas| canvas.draw_quad(canvas.program(), quad))?
    }

    /// Frees the buffer and program.
    pub fn release(self, backend: &mut dyn GpuBackend) {
        debug!(target = %self.label, "released render target");
        backend.release_program(self.program);
        backend.release_buffer(self.color_buffer);
    }
}

/// Draw access to a bound buffer.
///
/// Created by [`RenderTarget::capture`]; dropping it ends the capture. Keeps a
/// stack of translations that must be balanced by the time it drops.
pub struct Canvas<'a> {
    backend: &'a mut dyn GpuBackend,
    size: Size,
    program: ProgramId,
    uniforms: &'a Uniforms,
    translations: Vec<[f32; 2]>,
}

impl<'a> Canvas<'a> {
    fn begin(
        backend: &'a mut dyn GpuBackend,
        buffer: TextureId,
        clear: Option<Color>,
        size: Size,
        program: ProgramId,
        uniforms: &'a Uniforms,
    ) -> Result<Self, BackendError> {
        backend.begin_capture(buffer, clear)?;
        Ok(Self {
            backend,
            size,
            program,
            uniforms,
            translations: Vec::new(),
        })
    }

    pub fn size(&self) -> Size {
        self.size
    }

    /// The program of the capturing target, used for plain fills.
    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn offset(&self) -> [f32; 2] {
        self.translations
            .iter()
            .fold([0.0, 0.0], |acc, step| [acc[0] + step[0], acc[1] + step[1]])
    }

    pub fn push_translate(&mut self, dx: f32, dy: f32) {
        self.translations.push([dx, dy]);
    }

    /// Returns false if there was nothing to pop.
    pub fn pop_translate(&mut self) -> bool {
        self.translations.pop().is_some()
    }

    /// Runs `draw` with an extra translation that is popped afterwards.
    pub fn with_translation<R>(&mut self, dx: f32, dy: f32, draw: impl FnOnce(&mut Self) -> R) -> R {
        self.push_translate(dx, dy);
        let result = draw(self);
        self.pop_translate();
        result
    }

    pub fn draw_quad(&mut self, program: ProgramId, quad: Quad) -> Result<(), BackendError> {
        let [dx, dy] = self.offset();
        let placed = Quad {
            rect: quad.rect.translated(dx, dy),
            ..quad
        };
        self.backend.draw_quad(program, &placed, self.uniforms)
    }

    pub fn fill_rect(&mut self, rect: Rect, color: Color) -> Result<(), BackendError> {
        self.draw_quad(self.program, Quad::solid(rect, color))
    }

    pub fn draw_texture(&mut self, rect: Rect, texture: TextureId) -> Result<(), BackendError> {
        self.draw_quad(self.program, Quad::textured(rect, texture))
    }
}

impl Drop for Canvas<'_> {
    fn drop(&mut self) {
        if !self.translations.is_empty() {
            warn!(
                depth = self.translations.len(),
                "capture ended with unbalanced translations; discarding them"
            );
            self.translations.clear();
        }
        if let Err(err) = self.backend.end_capture() {
            warn!(error = %err, "failed to end capture");
        }
    }
}
