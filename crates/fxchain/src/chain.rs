//! The pass chain: one render target per effect, wired in sequence.
//!
//! `reconcile` brings the stages into agreement with an ordered effect list
//! and a size:
//!
//! 1. grow by appending targets at the new size,
//! 2. shrink by releasing trailing targets,
//! 3. resize every stage,
//! 4. wire stage 0 to the pre-chain buffer and stage i to stage i-1,
//! 5. bind each effect's current source to its stage,
//! 6. diff subscriptions against the new effect set,
//! 7. publish the final output texture.
//!
//! Step 3 runs on the surviving stages before anything is allocated or
//! released, so a failed resize or allocation leaves the chain at its
//! previous length and size.
//!
//! Stages are matched by position, so reordering effects rebinds shaders but
//! reuses buffers. A source change on a single unit only queues that unit;
//! [`PassChain::apply_pending`] rebinds the stages it feeds and nothing else.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::backend::{GpuBackend, TextureId, UniformValue, RESOLUTION_UNIFORM, TIME_UNIFORM};
use crate::effect::{EffectId, EffectUnit, Subscription};
use crate::error::{BackendError, ChainError, ShaderError};
use crate::target::RenderTarget;
use crate::types::Size;

/// A stage whose effect did not compile; it still runs its previous shader.
#[derive(Debug, Clone)]
pub struct StageFailure {
    pub stage: usize,
    pub effect: EffectId,
    pub error: ShaderError,
}

/// Outcome of one reconciliation.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub stages: usize,
    pub size: Size,
    pub added: usize,
    pub removed: usize,
    pub failures: Vec<StageFailure>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

type PendingQueue = Rc<RefCell<Vec<EffectId>>>;

#[derive(Debug)]
struct Binding {
    effect: Weak<EffectUnit>,
    subscription: Subscription,
}

#[derive(Debug)]
pub struct PassChain {
    pre_chain: TextureId,
    size: Size,
    stages: Vec<RenderTarget>,
    effects: Vec<Weak<EffectUnit>>,
    bindings: Vec<Binding>,
    pending: PendingQueue,
    next_label: u64,
}

impl PassChain {
    /// An empty chain presenting `pre_chain` directly.
    pub fn new(pre_chain: TextureId, size: Size) -> Self {
        Self {
            pre_chain,
            size,
            stages: Vec::new(),
            effects: Vec::new(),
            bindings: Vec::new(),
            pending: Rc::new(RefCell::new(Vec::new())),
            next_label: 0,
        }
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stages(&self) -> &[RenderTarget] {
        &self.stages
    }

    pub fn pre_chain(&self) -> TextureId {
        self.pre_chain
    }

    /// The last stage's buffer, or the pre-chain buffer when there are no stages.
    pub fn final_output(&self) -> TextureId {
        self.stages
            .last()
            .map_or(self.pre_chain, RenderTarget::color_buffer)
    }

    /// Number of units with a live subscription held by this chain.
    pub fn subscription_count(&self) -> usize {
        self.bindings.len()
    }

    /// Whether a source change is waiting for [`PassChain::apply_pending`].
    pub fn has_pending(&self) -> bool {
        !self.pending.borrow().is_empty()
    }

    pub fn reconcile(
        &mut self,
        backend: &mut dyn GpuBackend,
        effects: &[Rc<EffectUnit>],
        size: Size,
    ) -> Result<ReconcileReport, ChainError> {
        let before = self.stages.len();
        let previous = self.size;
        let kept = before.min(effects.len());

        // 3, surviving stages
        resize_stages(&mut self.stages[..kept], backend, size, previous)?;

        // 1
        while self.stages.len() < effects.len() {
            let label = format!("stage {}", self.next_label);
            match RenderTarget::new(backend, label, size) {
                Ok(stage) => {
                    self.next_label += 1;
                    self.stages.push(stage);
                }
                Err(err) => {
                    warn!(error = %err, "failed to allocate stage; rolling back");
                    for stage in self.stages.drain(before..) {
                        stage.release(backend);
                    }
                    restore_sizes(&mut self.stages, backend, previous);
                    return Err(err);
                }
            }
        }

        // 2
        let mut removed = 0;
        while self.stages.len() > effects.len() {
            if let Some(stage) = self.stages.pop() {
                stage.release(backend);
                removed += 1;
            }
        }

        // 3, resolution for every stage
        for stage in &mut self.stages {
            stage.set_uniform(RESOLUTION_UNIFORM, UniformValue::Vec2(size.as_vec2()));
        }
        self.size = size;

        // 4
        self.wire();

        // 5
        let mut failures = Vec::new();
        for (index, (stage, effect)) in self.stages.iter_mut().zip(effects).enumerate() {
            if let Err(error) = stage.set_shader(backend, &effect.current_source()) {
                failures.push(StageFailure {
                    stage: index,
                    effect: effect.id(),
                    error,
                });
            }
        }
        self.effects = effects.iter().map(Rc::downgrade).collect();
        self.pending.borrow_mut().clear();

        // 6
        self.resubscribe(effects);

        let report = ReconcileReport {
            stages: self.stages.len(),
            size,
            added: self.stages.len().saturating_sub(before),
            removed,
            failures,
        };
        // 7: final_output() derives from the stage list.
        debug!(
            stages = report.stages,
            %size,
            added = report.added,
            removed = report.removed,
            failures = report.failures.len(),
            output = %self.final_output(),
            "reconciled pass chain"
        );
        Ok(report)
    }

    /// Rebinds the stages of every unit whose source changed since the last
    /// call. Stages of other units are left untouched.
    pub fn apply_pending(&mut self, backend: &mut dyn GpuBackend) -> Vec<StageFailure> {
        let changed: BTreeSet<EffectId> = self.pending.borrow_mut().drain(..).collect();
        let mut failures = Vec::new();
        if changed.is_empty() {
            return failures;
        }

        for (index, (stage, effect)) in self.stages.iter_mut().zip(&self.effects).enumerate() {
            let Some(effect) = effect.upgrade() else {
                continue;
            };
            if !changed.contains(&effect.id()) {
                continue;
            }
            debug!(stage = index, effect = %effect.id(), "rebinding stage after source change");
            if let Err(error) = stage.set_shader(backend, &effect.current_source()) {
                failures.push(StageFailure {
                    stage: index,
                    effect: effect.id(),
                    error,
                });
            }
        }
        failures
    }

    pub fn update_uniforms(&mut self, time: f32, resolution: [f32; 2]) {
        for stage in &mut self.stages {
            stage.set_uniform(TIME_UNIFORM, UniformValue::Float(time));
            stage.set_uniform(RESOLUTION_UNIFORM, UniformValue::Vec2(resolution));
        }
    }

    /// Draws every stage in order; each reads the buffer its predecessor
    /// just wrote.
    pub fn render(&self, backend: &mut dyn GpuBackend) -> Result<(), BackendError> {
        for stage in &self.stages {
            stage.draw(backend)?;
        }
        Ok(())
    }

    /// Releases every stage and drops all subscriptions.
    pub fn release(&mut self, backend: &mut dyn GpuBackend) {
        for stage in self.stages.drain(..) {
            stage.release(backend);
        }
        self.effects.clear();
        self.unsubscribe_all();
        self.pending.borrow_mut().clear();
    }

    fn wire(&mut self) {
        let mut input = self.pre_chain;
        for stage in &mut self.stages {
            stage.set_input(input);
            input = stage.color_buffer();
        }
    }

    fn resubscribe(&mut self, effects: &[Rc<EffectUnit>]) {
        let wanted: BTreeSet<EffectId> = effects.iter().map(|effect| effect.id()).collect();

        self.bindings.retain(|binding| {
            if wanted.contains(&binding.subscription.effect()) {
                return true;
            }
            if let Some(effect) = binding.effect.upgrade() {
                effect.unsubscribe(&binding.subscription);
            }
            false
        });

        for effect in effects {
            let id = effect.id();
            if self
                .bindings
                .iter()
                .any(|binding| binding.subscription.effect() == id)
            {
                continue;
            }
            let queue = Rc::downgrade(&self.pending);
            let subscription = effect.on_source_changed(move |changed, _source| {
                if let Some(queue) = queue.upgrade() {
                    queue.borrow_mut().push(changed);
                }
            });
            self.bindings.push(Binding {
                effect: Rc::downgrade(effect),
                subscription,
            });
        }
    }

    fn unsubscribe_all(&mut self) {
        for binding in self.bindings.drain(..) {
            if let Some(effect) = binding.effect.upgrade() {
                effect.unsubscribe(&binding.subscription);
            }
        }
    }
}

/// Resizes `stages` to `size`. On failure the stages already resized go back
/// to `previous` and the error is returned.
fn resize_stages(
    stages: &mut [RenderTarget],
    backend: &mut dyn GpuBackend,
    size: Size,
    previous: Size,
) -> Result<(), ChainError> {
    for index in 0..stages.len() {
        if let Err(err) = stages[index].resize(backend, size) {
            warn!(stage = index, error = %err, "failed to resize stage; restoring previous size");
            restore_sizes(&mut stages[..index], backend, previous);
            return Err(err.into());
        }
    }
    Ok(())
}

fn restore_sizes(stages: &mut [RenderTarget], backend: &mut dyn GpuBackend, previous: Size) {
    for stage in stages {
        if let Err(err) = stage.resize(backend, previous) {
            warn!(target = %stage.label(), error = %err, "failed to restore stage size");
        }
    }
}

impl Drop for PassChain {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}
