//! Host-facing adapter around a [`PassChain`].
//!
//! The widget owns the pre-chain target that children draw into, the chain
//! of effect stages, and the composite program that puts the chain's output
//! on screen at the widget position. A host drives it with `on_tick`,
//! `on_resize`, `on_effects_changed` and `render`.

use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::backend::{
    GpuBackend, ProgramId, Quad, UniformValue, Uniforms, RESOLUTION_UNIFORM, TIME_UNIFORM,
};
use crate::chain::{PassChain, ReconcileReport, StageFailure};
use crate::effect::EffectUnit;
use crate::error::{BackendError, ChainError, ShaderError};
use crate::target::{Canvas, RenderTarget};
use crate::template;
use crate::types::{Color, Rect, Size, BLACK};

/// Content drawn into the pre-chain buffer.
///
/// Children draw in widget-parent coordinates; the canvas already carries the
/// translation that maps the widget position to the buffer origin.
pub trait Child {
    fn draw(&self, canvas: &mut Canvas<'_>) -> Result<(), BackendError>;
}

/// A filled rectangle, the simplest possible child.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolidRect {
    pub rect: Rect,
    pub color: Color,
}

impl Child for SolidRect {
    fn draw(&self, canvas: &mut Canvas<'_>) -> Result<(), BackendError> {
        canvas.fill_rect(self.rect, self.color)
    }
}

pub struct EffectWidget {
    position: [f32; 2],
    size: Size,
    background: Color,
    pre_chain: RenderTarget,
    chain: PassChain,
    effects: Vec<Rc<EffectUnit>>,
    children: Vec<Rc<dyn Child>>,
    composite_program: ProgramId,
    composite_source: String,
    composite_uniforms: Uniforms,
    time: f32,
}

impl EffectWidget {
    pub fn new(backend: &mut dyn GpuBackend, size: Size) -> Result<Self, ChainError> {
        let pre_chain = RenderTarget::new(backend, "pre-chain", size)?;
        let composite_source = template::passthrough_source();
        let composite_program = match backend.compile_program("composite", &composite_source) {
            Ok(program) => program,
            Err(err) => {
                pre_chain.release(backend);
                return Err(err.into());
            }
        };
        let chain = PassChain::new(pre_chain.color_buffer(), size);

        let mut widget = Self {
            position: [0.0, 0.0],
            size,
            background: BLACK,
            pre_chain,
            chain,
            effects: Vec::new(),
            children: Vec::new(),
            composite_program,
            composite_source,
            composite_uniforms: Uniforms::new(),
            time: 0.0,
        };
        widget.update_uniforms();
        Ok(widget)
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn position(&self) -> [f32; 2] {
        self.position
    }

    /// Moves the widget; children keep drawing at their own coordinates.
    pub fn set_position(&mut self, x: f32, y: f32) {
        self.position = [x, y];
    }

    pub fn set_background(&mut self, color: Color) {
        self.background = color;
    }

    pub fn chain(&self) -> &PassChain {
        &self.chain
    }

    pub fn pre_chain(&self) -> &RenderTarget {
        &self.pre_chain
    }

    pub fn effects(&self) -> &[Rc<EffectUnit>] {
        &self.effects
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn add_child(&mut self, child: Rc<dyn Child>) {
        self.children.push(child);
    }

    /// Removes `child` by identity; returns false if it was not a child.
    pub fn remove_child(&mut self, child: &Rc<dyn Child>) -> bool {
        let before = self.children.len();
        self.children
            .retain(|existing| !std::ptr::addr_eq(Rc::as_ptr(existing), Rc::as_ptr(child)));
        self.children.len() != before
    }

    pub fn clear_children(&mut self) {
        self.children.clear();
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Replaces the effect list and reconciles the chain against it.
    pub fn on_effects_changed(
        &mut self,
        backend: &mut dyn GpuBackend,
        effects: Vec<Rc<EffectUnit>>,
    ) -> Result<ReconcileReport, ChainError> {
        self.effects = effects;
        self.reconcile(backend)
    }

    /// Resizes to a layout size. Invalid sizes are rejected and the widget
    /// keeps rendering at its last valid size.
    pub fn on_resize(
        &mut self,
        backend: &mut dyn GpuBackend,
        width: f32,
        height: f32,
    ) -> Result<ReconcileReport, ChainError> {
        let size = match Size::from_logical(width, height) {
            Ok(size) => size,
            Err(err) => {
                warn!(width, height, error = %err, "ignoring invalid widget size");
                return Err(err.into());
            }
        };
        let previous = self.size;
        self.pre_chain.resize(backend, size)?;
        self.size = size;
        match self.reconcile(backend) {
            Ok(report) => Ok(report),
            Err(err) => {
                warn!(%size, %previous, error = %err, "resize failed; keeping previous size");
                self.size = previous;
                if let Err(restore) = self.pre_chain.resize(backend, previous) {
                    warn!(error = %restore, "failed to restore pre-chain size");
                }
                self.update_uniforms();
                Err(err)
            }
        }
    }

    /// Per-frame update: rebinds stages whose effect changed and refreshes
    /// the time and resolution uniforms everywhere.
    pub fn on_tick(&mut self, backend: &mut dyn GpuBackend, elapsed: f32) -> Vec<StageFailure> {
        let failures = self.chain.apply_pending(backend);
        self.time = elapsed;
        self.update_uniforms();
        failures
    }

    /// Replaces the shader of the composite surface; a failed compile keeps
    /// the current one.
    pub fn set_composite_shader(
        &mut self,
        backend: &mut dyn GpuBackend,
        source: &str,
    ) -> Result<(), ShaderError> {
        if source == self.composite_source {
            return Ok(());
        }
        match backend.compile_program("composite", source) {
            Ok(program) => {
                backend.release_program(self.composite_program);
                self.composite_program = program;
                self.composite_source = source.to_string();
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "composite shader failed to compile; keeping previous shader");
                Err(err)
            }
        }
    }

    pub fn composite_source(&self) -> &str {
        &self.composite_source
    }

    /// Draws children into the pre-chain buffer, runs every stage, and
    /// composites the result at the widget position.
    pub fn render(&self, backend: &mut dyn GpuBackend) -> Result<(), ChainError> {
        let [x, y] = self.position;
        let background = Rect::covering(self.size);
        let children = &self.children;
        let background_color = self.background;

        self.pre_chain.capture(backend, |canvas| -> Result<(), BackendError> {
            canvas.fill_rect(background, background_color)?;
            canvas.with_translation(-x, -y, |canvas| {
                children.iter().try_for_each(|child| child.draw(canvas))
            })
        })??;

        self.chain.render(backend)?;

        let quad = Quad::textured(
            Rect::new(x, y, self.size.width() as f32, self.size.height() as f32),
            self.chain.final_output(),
        );
        backend.draw_quad(self.composite_program, &quad, &self.composite_uniforms)?;
        Ok(())
    }

    /// Frees every GPU resource the widget owns.
    pub fn release(mut self, backend: &mut dyn GpuBackend) {
        self.chain.release(backend);
        backend.release_program(self.composite_program);
        self.pre_chain.release(backend);
    }

    fn reconcile(&mut self, backend: &mut dyn GpuBackend) -> Result<ReconcileReport, ChainError> {
        let report = self.chain.reconcile(backend, &self.effects, self.size)?;
        for failure in &report.failures {
            warn!(
                stage = failure.stage,
                effect = %failure.effect,
                error = %failure.error,
                "stage kept its previous shader"
            );
        }
        self.update_uniforms();
        Ok(report)
    }

    fn update_uniforms(&mut self) {
        let resolution = self.size.as_vec2();
        let time = UniformValue::Float(self.time);
        let resolution_value = UniformValue::Vec2(resolution);

        self.pre_chain.set_uniform(TIME_UNIFORM, time);
        self.pre_chain.set_uniform(RESOLUTION_UNIFORM, resolution_value);
        self.composite_uniforms.insert(TIME_UNIFORM.into(), time);
        self.composite_uniforms
            .insert(RESOLUTION_UNIFORM.into(), resolution_value);
        self.chain.update_uniforms(self.time, resolution);
        debug!(time = self.time, width = resolution[0], height = resolution[1], "updated uniforms");
    }
}

impl fmt::Debug for EffectWidget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectWidget")
            .field("position", &self.position)
            .field("size", &self.size)
            .field("stages", &self.chain.len())
            .field("children", &self.children.len())
            .field("time", &self.time)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DrawTarget, MemoryBackend};
    use crate::error::GeometryError;

    fn widget(backend: &mut MemoryBackend, width: u32, height: u32) -> EffectWidget {
        EffectWidget::new(backend, Size::new(width, height).unwrap()).unwrap()
    }

    #[test]
    fn children_are_drawn_into_pre_chain_at_local_coordinates() {
        let mut backend = MemoryBackend::new();
        let mut widget = widget(&mut backend, 100, 50);
        widget.set_position(20.0, 10.0);
        widget.add_child(Rc::new(SolidRect {
            rect: Rect::new(30.0, 15.0, 5.0, 5.0),
            color: [1.0, 0.0, 0.0, 1.0],
        }));

        widget.render(&mut backend).unwrap();

        let pre_chain = DrawTarget::Buffer(widget.pre_chain().color_buffer());
        let draws = backend.draws();
        assert_eq!(draws[0].target, pre_chain);
        assert_eq!(draws[0].quad.rect, Rect::new(0.0, 0.0, 100.0, 50.0));
        assert_eq!(draws[0].quad.color, BLACK);
        assert_eq!(draws[1].target, pre_chain);
        assert_eq!(draws[1].quad.rect, Rect::new(10.0, 5.0, 5.0, 5.0));

        let composite = draws.last().unwrap();
        assert_eq!(composite.target, DrawTarget::Screen);
        assert_eq!(composite.quad.rect, Rect::new(20.0, 10.0, 100.0, 50.0));
        assert_eq!(composite.quad.texture, Some(widget.pre_chain().color_buffer()));
        assert_eq!(backend.binding_depth(), 0);
    }

    #[test]
    fn remove_child_uses_identity() {
        let mut backend = MemoryBackend::new();
        let mut widget = widget(&mut backend, 10, 10);
        let rect = SolidRect {
            rect: Rect::new(0.0, 0.0, 1.0, 1.0),
            color: BLACK,
        };
        let first: Rc<dyn Child> = Rc::new(rect);
        let twin: Rc<dyn Child> = Rc::new(rect);
        widget.add_child(first.clone());
        widget.add_child(twin);

        assert!(widget.remove_child(&first));
        assert!(!widget.remove_child(&first));
        assert_eq!(widget.child_count(), 1);
        widget.clear_children();
        assert_eq!(widget.child_count(), 0);
    }

    #[test]
    fn tick_updates_time_everywhere() {
        let mut backend = MemoryBackend::new();
        let mut widget = widget(&mut backend, 64, 32);
        widget
            .on_effects_changed(&mut backend, vec![Rc::new(EffectUnit::monochrome())])
            .unwrap();
        widget.on_tick(&mut backend, 1.5);

        let time = Some(&UniformValue::Float(1.5));
        assert_eq!(widget.pre_chain().uniforms().get(TIME_UNIFORM), time);
        assert_eq!(widget.chain().stages()[0].uniforms().get(TIME_UNIFORM), time);
        assert_eq!(
            widget.chain().stages()[0].uniforms().get(RESOLUTION_UNIFORM),
            Some(&UniformValue::Vec2([64.0, 32.0]))
        );
    }

    #[test]
    fn invalid_resize_keeps_last_size() {
        let mut backend = MemoryBackend::new();
        let mut widget = widget(&mut backend, 64, 32);
        let err = widget.on_resize(&mut backend, 0.0, 10.0).unwrap_err();
        assert!(matches!(err, ChainError::Geometry(GeometryError::NonPositive { .. })));
        assert_eq!(widget.size(), Size::new(64, 32).unwrap());
    }

    #[test]
    fn resize_reaches_pre_chain_and_stages() {
        let mut backend = MemoryBackend::new();
        let mut widget = widget(&mut backend, 64, 32);
        widget
            .on_effects_changed(&mut backend, vec![Rc::new(EffectUnit::invert())])
            .unwrap();
        widget.on_resize(&mut backend, 120.5, 80.0).unwrap();

        let expected = Size::new(121, 80).unwrap();
        assert_eq!(widget.pre_chain().size(), expected);
        assert_eq!(widget.chain().stages()[0].size(), expected);
        assert_eq!(
            backend.buffer_size(widget.chain().stages()[0].color_buffer()),
            Some(expected)
        );
    }

    #[test]
    fn broken_composite_shader_rolls_back() {
        let mut backend = MemoryBackend::with_validator(|source| {
            if source.contains("BROKEN") {
                Err("nope".into())
            } else {
                Ok(())
            }
        });
        let mut widget = EffectWidget::new(&mut backend, Size::new(8, 8).unwrap()).unwrap();
        let custom = template::assemble_effect("vec4 effect(vec4 c, sampler2D t, vec2 a, vec2 b) { return c; }");
        widget.set_composite_shader(&mut backend, &custom).unwrap();
        assert!(widget.set_composite_shader(&mut backend, "BROKEN").is_err());
        assert_eq!(widget.composite_source(), custom);
    }

    #[test]
    fn release_frees_all_resources() {
        let mut backend = MemoryBackend::new();
        let mut widget = widget(&mut backend, 8, 8);
        widget
            .on_effects_changed(
                &mut backend,
                vec![Rc::new(EffectUnit::invert()), Rc::new(EffectUnit::monochrome())],
            )
            .unwrap();
        widget.release(&mut backend);
        assert_eq!(backend.buffer_count(), 0);
        assert_eq!(backend.program_count(), 0);
    }
}
