use std::rc::Rc;

use fxchain::{
    BackendError, ChannelOrder, Color, DrawTarget, EffectKind, EffectUnit, EffectWidget,
    GpuBackend, MemoryBackend, PassChain, ProgramId, Quad, Rect, ShaderError, Size, SolidRect,
    TextureId, Uniforms,
};

fn size(width: u32, height: u32) -> Size {
    Size::new(width, height).unwrap()
}

/// Rejects any source carrying the `BROKEN` marker.
fn strict_backend() -> MemoryBackend {
    MemoryBackend::with_validator(|source| {
        if source.contains("BROKEN") {
            Err("0:3: 'BROKEN' : undeclared identifier".into())
        } else {
            Ok(())
        }
    })
}

fn chain_on(backend: &mut MemoryBackend, width: u32, height: u32) -> PassChain {
    let pre_chain = backend.create_buffer("pre-chain", size(width, height)).unwrap();
    PassChain::new(pre_chain, size(width, height))
}

fn wiring(chain: &PassChain) -> Vec<(Option<TextureId>, TextureId)> {
    chain
        .stages()
        .iter()
        .map(|stage| (stage.input(), stage.color_buffer()))
        .collect()
}

fn assert_wired(chain: &PassChain) {
    let mut expected_input = chain.pre_chain();
    for stage in chain.stages() {
        assert_eq!(stage.input(), Some(expected_input));
        expected_input = stage.color_buffer();
    }
    assert_eq!(chain.final_output(), expected_input);
}

#[test]
fn monochrome_then_invert_on_square_target() {
    let mut backend = MemoryBackend::new();
    let mut chain = chain_on(&mut backend, 100, 100);
    let effects = vec![
        Rc::new(EffectUnit::monochrome()),
        Rc::new(EffectUnit::invert()),
    ];

    let report = chain.reconcile(&mut backend, &effects, size(100, 100)).unwrap();

    assert!(report.is_clean());
    assert_eq!(chain.len(), 2);
    let stages = chain.stages();
    assert_eq!(stages[0].input(), Some(chain.pre_chain()));
    assert_eq!(stages[1].input(), Some(stages[0].color_buffer()));
    assert_eq!(chain.final_output(), stages[1].color_buffer());
    for (stage, effect) in stages.iter().zip(&effects) {
        assert_eq!(stage.bound_source(), effect.current_source());
        assert_eq!(stage.size(), size(100, 100));
    }
}

#[test]
fn empty_effect_list_bypasses_the_chain() {
    let mut backend = MemoryBackend::new();
    let mut chain = chain_on(&mut backend, 40, 30);
    chain
        .reconcile(&mut backend, &[Rc::new(EffectUnit::invert())], size(40, 30))
        .unwrap();
    chain.reconcile(&mut backend, &[], size(40, 30)).unwrap();

    assert!(chain.is_empty());
    assert_eq!(chain.final_output(), chain.pre_chain());
    assert_eq!(backend.buffer_count(), 1);
    assert_eq!(chain.subscription_count(), 0);
}

#[test]
fn reconcile_is_idempotent() {
    let mut backend = MemoryBackend::new();
    let mut chain = chain_on(&mut backend, 64, 64);
    let effects = vec![
        Rc::new(EffectUnit::pixelate(8.0)),
        Rc::new(EffectUnit::horizontal_blur(4.0)),
        Rc::new(EffectUnit::fxaa()),
    ];

    chain.reconcile(&mut backend, &effects, size(64, 64)).unwrap();
    let first_wiring = wiring(&chain);
    let first_sources: Vec<String> = chain
        .stages()
        .iter()
        .map(|stage| stage.bound_source().to_string())
        .collect();
    let compiles = backend.compile_count();

    let report = chain.reconcile(&mut backend, &effects, size(64, 64)).unwrap();

    assert_eq!(report.added, 0);
    assert_eq!(report.removed, 0);
    assert_eq!(wiring(&chain), first_wiring);
    let second_sources: Vec<String> = chain
        .stages()
        .iter()
        .map(|stage| stage.bound_source().to_string())
        .collect();
    assert_eq!(second_sources, first_sources);
    assert_eq!(backend.compile_count(), compiles);
    assert_eq!(chain.subscription_count(), 3);
}

#[test]
fn wiring_holds_across_length_changes() {
    let mut backend = MemoryBackend::new();
    let mut chain = chain_on(&mut backend, 32, 32);
    let pool: Vec<_> = (0..6).map(|_| Rc::new(EffectUnit::invert())).collect();

    for length in [3, 5, 1, 6, 0, 2] {
        let report = chain
            .reconcile(&mut backend, &pool[..length], size(32, 32))
            .unwrap();
        assert_eq!(report.stages, length);
        assert_eq!(chain.len(), length);
        assert_wired(&chain);
        assert_eq!(backend.buffer_count(), length + 1);
        assert_eq!(chain.subscription_count(), length);
    }
}

#[test]
fn growing_keeps_surviving_stages() {
    let mut backend = MemoryBackend::new();
    let mut chain = chain_on(&mut backend, 16, 16);
    let a = Rc::new(EffectUnit::monochrome());
    let b = Rc::new(EffectUnit::invert());

    chain.reconcile(&mut backend, &[a.clone()], size(16, 16)).unwrap();
    let first = chain.stages()[0].color_buffer();
    chain
        .reconcile(&mut backend, &[a.clone(), b.clone()], size(16, 16))
        .unwrap();

    assert_eq!(chain.stages()[0].color_buffer(), first);
    assert_wired(&chain);
}

#[test]
fn reordering_rewires_and_rebinds_by_position() {
    let mut backend = MemoryBackend::new();
    let mut chain = chain_on(&mut backend, 16, 16);
    let mono = Rc::new(EffectUnit::monochrome());
    let invert = Rc::new(EffectUnit::invert());

    chain
        .reconcile(&mut backend, &[mono.clone(), invert.clone()], size(16, 16))
        .unwrap();
    chain
        .reconcile(&mut backend, &[invert.clone(), mono.clone()], size(16, 16))
        .unwrap();

    assert_eq!(chain.stages()[0].bound_source(), invert.current_source());
    assert_eq!(chain.stages()[1].bound_source(), mono.current_source());
    assert_wired(&chain);
}

#[test]
fn resize_reaches_every_stage() {
    let mut backend = MemoryBackend::new();
    let mut chain = chain_on(&mut backend, 100, 100);
    let effects = vec![
        Rc::new(EffectUnit::monochrome()),
        Rc::new(EffectUnit::vertical_blur(2.0)),
    ];
    chain.reconcile(&mut backend, &effects, size(100, 100)).unwrap();
    chain.reconcile(&mut backend, &effects, size(320, 200)).unwrap();

    for stage in chain.stages() {
        assert_eq!(stage.size(), size(320, 200));
        assert_eq!(stage.quad().rect, Rect::new(0.0, 0.0, 320.0, 200.0));
        assert_eq!(backend.buffer_size(stage.color_buffer()), Some(size(320, 200)));
    }
    assert_eq!(chain.size(), size(320, 200));
}

#[test]
fn compile_failure_is_contained_to_its_stage() {
    let mut backend = strict_backend();
    let mut chain = chain_on(&mut backend, 50, 50);
    let first = Rc::new(EffectUnit::monochrome());
    let custom = Rc::new(EffectUnit::glsl(
        "vec4 effect(vec4 color, sampler2D tex, vec2 uv, vec2 coords)\n{\n    return color.zyxw;\n}\n",
    ));
    let last = Rc::new(EffectUnit::invert());
    let effects = vec![first.clone(), custom.clone(), last.clone()];
    chain.reconcile(&mut backend, &effects, size(50, 50)).unwrap();
    let good_source = chain.stages()[1].bound_source().to_string();
    let good_program = chain.stages()[1].program();

    custom
        .set_glsl("vec4 effect(vec4 color, sampler2D tex, vec2 uv, vec2 coords)\n{\n    return BROKEN;\n}\n")
        .unwrap();
    let failures = chain.apply_pending(&mut backend);

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].stage, 1);
    assert_eq!(failures[0].effect, custom.id());
    assert_eq!(chain.stages()[1].bound_source(), good_source);
    assert_eq!(chain.stages()[1].program(), good_program);
    assert_eq!(chain.stages()[0].bound_source(), first.current_source());
    assert_eq!(chain.stages()[2].bound_source(), last.current_source());
    assert_wired(&chain);
}

#[test]
fn reconcile_reports_failures_and_continues() {
    let mut backend = strict_backend();
    let mut chain = chain_on(&mut backend, 50, 50);
    let broken = Rc::new(EffectUnit::glsl("BROKEN"));
    let fine = Rc::new(EffectUnit::invert());

    let report = chain
        .reconcile(&mut backend, &[broken.clone(), fine.clone()], size(50, 50))
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, 0);
    assert_eq!(chain.len(), 2);
    assert_eq!(
        chain.stages()[0].bound_source(),
        fxchain::template::passthrough_source()
    );
    assert_eq!(chain.stages()[1].bound_source(), fine.current_source());
}

#[test]
fn parameter_change_rebinds_only_its_stage() {
    let mut backend = MemoryBackend::new();
    let mut chain = chain_on(&mut backend, 80, 60);
    let pixelate = Rc::new(EffectUnit::pixelate(10.0));
    let effects = vec![
        Rc::new(EffectUnit::monochrome()),
        pixelate.clone(),
        Rc::new(EffectUnit::invert()),
    ];
    chain.reconcile(&mut backend, &effects, size(80, 60)).unwrap();
    let programs: Vec<_> = chain.stages().iter().map(|stage| stage.program()).collect();
    let compiles = backend.compile_count();

    pixelate.set_pixel_size(4.0).unwrap();
    assert!(chain.has_pending());
    assert!(chain.apply_pending(&mut backend).is_empty());

    assert_eq!(backend.compile_count(), compiles + 1);
    assert_eq!(chain.stages()[0].program(), programs[0]);
    assert_ne!(chain.stages()[1].program(), programs[1]);
    assert_eq!(chain.stages()[2].program(), programs[2]);
    assert!(chain.stages()[1]
        .bound_source()
        .contains("vec2 pixelSize = 4.0 / resolution;"));
    assert!(!chain.has_pending());
}

#[test]
fn removed_units_no_longer_trigger_rebinds() {
    let mut backend = MemoryBackend::new();
    let mut chain = chain_on(&mut backend, 20, 20);
    let blur = Rc::new(EffectUnit::horizontal_blur(4.0));
    chain.reconcile(&mut backend, &[blur.clone()], size(20, 20)).unwrap();
    chain
        .reconcile(&mut backend, &[Rc::new(EffectUnit::invert())], size(20, 20))
        .unwrap();

    blur.set_blur_size(9.0).unwrap();
    assert!(!chain.has_pending());
    assert_eq!(blur.subscriber_count(), 0);
}

#[test]
fn render_draws_stages_in_order() {
    let mut backend = MemoryBackend::new();
    let mut chain = chain_on(&mut backend, 10, 10);
    let effects = vec![
        Rc::new(EffectUnit::monochrome()),
        Rc::new(EffectUnit::invert()),
    ];
    chain.reconcile(&mut backend, &effects, size(10, 10)).unwrap();
    chain.update_uniforms(0.5, [10.0, 10.0]);

    chain.render(&mut backend).unwrap();

    let draws = backend.draws();
    assert_eq!(draws.len(), 2);
    for (draw, stage) in draws.iter().zip(chain.stages()) {
        assert_eq!(draw.target, DrawTarget::Buffer(stage.color_buffer()));
        assert_eq!(draw.quad.texture, stage.input());
        assert_eq!(draw.program, stage.program());
    }
    assert_eq!(backend.binding_depth(), 0);
}

#[test]
fn widget_end_to_end_frame() {
    let mut backend = MemoryBackend::new();
    let mut widget = EffectWidget::new(&mut backend, size(100, 100)).unwrap();
    widget.add_child(Rc::new(SolidRect {
        rect: Rect::new(10.0, 10.0, 20.0, 20.0),
        color: [0.2, 0.8, 0.4, 1.0],
    }));
    let blur = Rc::new(EffectUnit::horizontal_blur(4.0));
    widget
        .on_effects_changed(
            &mut backend,
            vec![Rc::new(EffectUnit::monochrome()), blur.clone()],
        )
        .unwrap();

    blur.set_blur_size(6.0).unwrap();
    let failures = widget.on_tick(&mut backend, 0.25);
    assert!(failures.is_empty());
    assert_eq!(
        widget.chain().stages()[1].bound_source(),
        blur.current_source()
    );

    widget.render(&mut backend).unwrap();
    let draws = backend.take_draws();
    // background, child, two stages, composite
    assert_eq!(draws.len(), 5);
    let composite = draws.last().unwrap();
    assert_eq!(composite.target, DrawTarget::Screen);
    assert_eq!(composite.quad.texture, Some(widget.chain().final_output()));
    assert_eq!(backend.binding_depth(), 0);

    widget.release(&mut backend);
    assert_eq!(backend.buffer_count(), 0);
    assert_eq!(blur.subscriber_count(), 0);
}

#[test]
fn every_builtin_effect_compiles_with_naga() {
    let mut backend = MemoryBackend::with_naga();
    let mut chain = chain_on(&mut backend, 96, 64);
    let kinds = vec![
        EffectKind::PassThrough,
        EffectKind::Monochrome,
        EffectKind::Invert,
        EffectKind::Red,
        EffectKind::Green,
        EffectKind::Blue,
        EffectKind::Scanlines,
        EffectKind::Plasma,
        EffectKind::Fxaa,
        EffectKind::ChannelMix {
            order: ChannelOrder::default(),
        },
        EffectKind::Pixelate { pixel_size: 10.0 },
        EffectKind::HorizontalBlur { size: 4.0 },
        EffectKind::VerticalBlur { size: 4.0 },
        EffectKind::Glsl {
            body: "vec4 effect(vec4 color, sampler2D tex, vec2 uv, vec2 coords)\n{\n    return texture2D(tex, uv) * 0.5 + color * 0.5;\n}\n".into(),
        },
    ];
    let mut effects: Vec<Rc<EffectUnit>> = kinds
        .into_iter()
        .map(|kind| Rc::new(EffectUnit::new(kind)))
        .collect();
    effects.push(Rc::new(EffectUnit::from_file()));

    let report = chain.reconcile(&mut backend, &effects, size(96, 64)).unwrap();

    let failures: Vec<String> = report
        .failures
        .iter()
        .map(|failure| format!("stage {}: {}", failure.stage, failure.error))
        .collect();
    assert!(report.is_clean(), "naga rejected: {failures:#?}");
    assert_eq!(chain.len(), effects.len());
}

/// Delegates to a [`MemoryBackend`] but refuses chosen operations.
struct Refusing {
    inner: MemoryBackend,
    resize_of: Option<TextureId>,
    allocations: bool,
}

impl Refusing {
    fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            resize_of: None,
            allocations: false,
        }
    }
}

impl GpuBackend for Refusing {
    fn create_buffer(&mut self, label: &str, size: Size) -> Result<TextureId, BackendError> {
        if self.allocations {
            return Err(BackendError::Allocation {
                label: label.to_string(),
                reason: "refused".into(),
            });
        }
        self.inner.create_buffer(label, size)
    }

    fn resize_buffer(&mut self, buffer: TextureId, size: Size) -> Result<(), BackendError> {
        if self.resize_of == Some(buffer) {
            return Err(BackendError::Allocation {
                label: buffer.to_string(),
                reason: "refused".into(),
            });
        }
        self.inner.resize_buffer(buffer, size)
    }

    fn release_buffer(&mut self, buffer: TextureId) {
        self.inner.release_buffer(buffer)
    }

    fn compile_program(&mut self, label: &str, source: &str) -> Result<ProgramId, ShaderError> {
        self.inner.compile_program(label, source)
    }

    fn release_program(&mut self, program: ProgramId) {
        self.inner.release_program(program)
    }

    fn begin_capture(&mut self, buffer: TextureId, clear: Option<Color>) -> Result<(), BackendError> {
        self.inner.begin_capture(buffer, clear)
    }

    fn end_capture(&mut self) -> Result<(), BackendError> {
        self.inner.end_capture()
    }

    fn draw_quad(
        &mut self,
        program: ProgramId,
        quad: &Quad,
        uniforms: &Uniforms,
    ) -> Result<(), BackendError> {
        self.inner.draw_quad(program, quad, uniforms)
    }
}

fn refusing_chain(backend: &mut Refusing, stages: usize) -> (PassChain, Vec<Rc<EffectUnit>>) {
    let pre_chain = backend.create_buffer("pre-chain", size(16, 16)).unwrap();
    let mut chain = PassChain::new(pre_chain, size(16, 16));
    let pool: Vec<_> = (0..3).map(|_| Rc::new(EffectUnit::invert())).collect();
    chain.reconcile(backend, &pool[..stages], size(16, 16)).unwrap();
    (chain, pool)
}

#[test]
fn failed_resize_while_growing_leaves_the_chain_unchanged() {
    let mut backend = Refusing::new();
    let (mut chain, pool) = refusing_chain(&mut backend, 1);
    backend.resize_of = Some(chain.stages()[0].color_buffer());

    assert!(chain.reconcile(&mut backend, &pool, size(32, 32)).is_err());

    assert_eq!(chain.len(), 1);
    assert_eq!(chain.size(), size(16, 16));
    assert_eq!(chain.stages()[0].size(), size(16, 16));
    assert_eq!(backend.inner.buffer_count(), 2);
    assert_eq!(backend.inner.program_count(), 1);
    assert_wired(&chain);
}

#[test]
fn failed_resize_restores_stages_already_resized() {
    let mut backend = Refusing::new();
    let (mut chain, pool) = refusing_chain(&mut backend, 2);
    let first = chain.stages()[0].color_buffer();
    backend.resize_of = Some(chain.stages()[1].color_buffer());

    assert!(chain.reconcile(&mut backend, &pool[..2], size(32, 32)).is_err());

    assert_eq!(chain.stages()[0].size(), size(16, 16));
    assert_eq!(backend.inner.buffer_size(first), Some(size(16, 16)));
    assert_eq!(chain.size(), size(16, 16));
}

#[test]
fn failed_allocation_restores_size_and_length() {
    let mut backend = Refusing::new();
    let (mut chain, pool) = refusing_chain(&mut backend, 1);
    let first = chain.stages()[0].color_buffer();
    backend.allocations = true;

    assert!(chain.reconcile(&mut backend, &pool, size(48, 48)).is_err());

    assert_eq!(chain.len(), 1);
    assert_eq!(chain.size(), size(16, 16));
    assert_eq!(backend.inner.buffer_size(first), Some(size(16, 16)));
    assert_eq!(backend.inner.buffer_count(), 2);
}

#[test]
fn widget_keeps_its_size_when_the_chain_cannot_resize() {
    let mut backend = Refusing::new();
    let mut widget = EffectWidget::new(&mut backend, size(40, 20)).unwrap();
    widget
        .on_effects_changed(&mut backend, vec![Rc::new(EffectUnit::monochrome())])
        .unwrap();
    backend.resize_of = Some(widget.chain().stages()[0].color_buffer());

    assert!(widget.on_resize(&mut backend, 80.0, 60.0).is_err());

    assert_eq!(widget.size(), size(40, 20));
    assert_eq!(widget.pre_chain().size(), size(40, 20));
    assert_eq!(
        backend.inner.buffer_size(widget.pre_chain().color_buffer()),
        Some(size(40, 20))
    );
    assert_eq!(widget.chain().size(), size(40, 20));
    assert_eq!(widget.chain().stages()[0].size(), size(40, 20));
}
