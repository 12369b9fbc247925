use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use wgpu::naga::ShaderStage;

use super::{GpuBackend, ProgramId, Quad, TextureId, Uniforms};
use crate::compile::validate_glsl;
use crate::error::{BackendError, ShaderError};
use crate::types::{Color, Size};

type Validator = Box<dyn Fn(&str) -> Result<(), String>>;

/// Where a recorded draw landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawTarget {
    Screen,
    Buffer(TextureId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub target: DrawTarget,
    pub program: ProgramId,
    pub quad: Quad,
    pub uniforms: Uniforms,
}

#[derive(Debug, Clone)]
struct BufferEntry {
    size: Size,
    clears: usize,
}

/// Backend that keeps every resource on the CPU.
///
/// Compilation runs through a validator: the default accepts any source,
/// [`MemoryBackend::with_naga`] runs naga's GLSL frontend and validator.
pub struct MemoryBackend {
    next_handle: u64,
    buffers: BTreeMap<TextureId, BufferEntry>,
    programs: BTreeSet<ProgramId>,
    bindings: Vec<TextureId>,
    draws: Vec<DrawRecord>,
    compiles: usize,
    validator: Validator,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_validator(|_| Ok(()))
    }

    pub fn with_naga() -> Self {
        Self::with_validator(|source| validate_glsl(source, ShaderStage::Fragment).map(|_| ()))
    }

    pub fn with_validator<F>(validator: F) -> Self
    where
        F: Fn(&str) -> Result<(), String> + 'static,
    {
        Self {
            next_handle: 1,
            buffers: BTreeMap::new(),
            programs: BTreeSet::new(),
            bindings: Vec::new(),
            draws: Vec::new(),
            compiles: 0,
            validator: Box::new(validator),
        }
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffer_size(&self, buffer: TextureId) -> Option<Size> {
        self.buffers.get(&buffer).map(|entry| entry.size)
    }

    /// How many times `buffer` has been cleared by a capture.
    pub fn clear_count(&self, buffer: TextureId) -> usize {
        self.buffers.get(&buffer).map_or(0, |entry| entry.clears)
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    /// Number of compile attempts, successful or not.
    pub fn compile_count(&self) -> usize {
        self.compiles
    }

    pub fn binding_depth(&self) -> usize {
        self.bindings.len()
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn take_draws(&mut self) -> Vec<DrawRecord> {
        std::mem::take(&mut self.draws)
    }

    fn allocate_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("buffers", &self.buffers.len())
            .field("programs", &self.programs.len())
            .field("binding_depth", &self.bindings.len())
            .field("draws", &self.draws.len())
            .finish()
    }
}

impl GpuBackend for MemoryBackend {
    fn create_buffer(&mut self, _label: &str, size: Size) -> Result<TextureId, BackendError> {
        let buffer = TextureId::from_raw(self.allocate_handle());
        self.buffers.insert(
            buffer,
            BufferEntry {
                size,
                clears: 0,
            },
        );
        Ok(buffer)
    }

    fn resize_buffer(&mut self, buffer: TextureId, size: Size) -> Result<(), BackendError> {
        let entry = self
            .buffers
            .get_mut(&buffer)
            .ok_or(BackendError::UnknownHandle {
                kind: "buffer",
                id: buffer.raw(),
            })?;
        entry.size = size;
        Ok(())
    }

    fn release_buffer(&mut self, buffer: TextureId) {
        if self.buffers.remove(&buffer).is_none() {
            tracing::warn!(%buffer, "released an unknown buffer");
        }
    }

    fn compile_program(&mut self, label: &str, source: &str) -> Result<ProgramId, ShaderError> {
        self.compiles += 1;
        (self.validator)(source).map_err(|log| ShaderError::new(label, log))?;
        let program = ProgramId::from_raw(self.allocate_handle());
        self.programs.insert(program);
        Ok(program)
    }

    fn release_program(&mut self, program: ProgramId) {
        if !self.programs.remove(&program) {
            tracing::warn!(%program, "released an unknown program");
        }
    }

    fn begin_capture(&mut self, buffer: TextureId, clear: Option<Color>) -> Result<(), BackendError> {
        let entry = self
            .buffers
            .get_mut(&buffer)
            .ok_or(BackendError::UnknownHandle {
                kind: "buffer",
                id: buffer.raw(),
            })?;
        if clear.is_some() {
            entry.clears += 1;
        }
        self.bindings.push(buffer);
        Ok(())
    }

    fn end_capture(&mut self) -> Result<(), BackendError> {
        self.bindings.pop().map(|_| ()).ok_or(BackendError::NoCapture)
    }

    fn draw_quad(
        &mut self,
        program: ProgramId,
        quad: &Quad,
        uniforms: &Uniforms,
    ) -> Result<(), BackendError> {
        if !self.programs.contains(&program) {
            return Err(BackendError::UnknownHandle {
                kind: "program",
                id: program.raw(),
            });
        }
        if let Some(texture) = quad.texture {
            if !self.buffers.contains_key(&texture) {
                return Err(BackendError::UnknownHandle {
                    kind: "buffer",
                    id: texture.raw(),
                });
            }
        }
        let target = self
            .bindings
            .last()
            .copied()
            .map_or(DrawTarget::Screen, DrawTarget::Buffer);
        self.draws.push(DrawRecord {
            target,
            program,
            quad: *quad,
            uniforms: uniforms.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Rect, BLACK};

    #[test]
    fn capture_stack_restores_previous_binding() {
        let mut backend = MemoryBackend::new();
        let size = Size::new(4, 4).unwrap();
        let a = backend.create_buffer("a", size).unwrap();
        let b = backend.create_buffer("b", size).unwrap();
        let program = backend.compile_program("p", "src").unwrap();
        let quad = Quad::solid(Rect::covering(size), BLACK);

        backend.begin_capture(a, None).unwrap();
        backend.begin_capture(b, Some(BLACK)).unwrap();
        backend.draw_quad(program, &quad, &Uniforms::new()).unwrap();
        backend.end_capture().unwrap();
        backend.draw_quad(program, &quad, &Uniforms::new()).unwrap();
        backend.end_capture().unwrap();
        backend.draw_quad(program, &quad, &Uniforms::new()).unwrap();

        let targets: Vec<_> = backend.draws().iter().map(|draw| draw.target).collect();
        assert_eq!(
            targets,
            [DrawTarget::Buffer(b), DrawTarget::Buffer(a), DrawTarget::Screen]
        );
        assert_eq!(backend.clear_count(b), 1);
        assert!(matches!(backend.end_capture(), Err(BackendError::NoCapture)));
    }

    #[test]
    fn validator_failure_allocates_nothing() {
        let mut backend = MemoryBackend::with_validator(|source| {
            if source.contains("BROKEN") {
                Err("syntax error".into())
            } else {
                Ok(())
            }
        });
        let err = backend.compile_program("stage", "BROKEN").unwrap_err();
        assert_eq!(err.label, "stage");
        assert_eq!(backend.program_count(), 0);
        assert_eq!(backend.compile_count(), 1);
    }

    #[test]
    fn naga_backend_rejects_invalid_source() {
        let mut backend = MemoryBackend::with_naga();
        assert!(backend.compile_program("stage", "not glsl at all").is_err());
    }

    #[test]
    fn released_buffers_cannot_be_drawn() {
        let mut backend = MemoryBackend::new();
        let size = Size::new(2, 2).unwrap();
        let buffer = backend.create_buffer("a", size).unwrap();
        let program = backend.compile_program("p", "src").unwrap();
        backend.release_buffer(buffer);
        let quad = Quad::textured(Rect::covering(size), buffer);
        assert!(backend.draw_quad(program, &quad, &Uniforms::new()).is_err());
    }
}
