//! Interactive window showing the demo scene through a chain.
//!
//! `Esc` closes the window, `R` reloads the chain file and reconciles the
//! widget against the new effect list.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use fxchain::types::BLACK;
use fxchain::{EffectWidget, FrameClock, ShaderCompiler, Size, SystemClock, WgpuBackend};
use tracing::{debug, error, info, warn};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoopBuilder};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowBuilder};

use crate::bindings::{load_chain, LoadedChain};
use crate::run::{build_widget, log_failures};

/// Window state. `backend` is declared before `window` so the surface is
/// dropped while the window still exists.
struct Preview {
    widget: Option<EffectWidget>,
    backend: WgpuBackend,
    window: Window,
    loaded: LoadedChain,
    clock: SystemClock,
    frame_interval: Duration,
    next_frame: Instant,
}

impl Preview {
    fn resize(&mut self, new_size: PhysicalSize<u32>) {
        let Some(widget) = self.widget.as_mut() else {
            return;
        };
        match widget.on_resize(
            &mut self.backend,
            new_size.width as f32,
            new_size.height as f32,
        ) {
            Ok(report) => {
                log_failures(&report.failures);
                if let Err(err) = self.backend.resize_screen(widget.size()) {
                    warn!(error = %err, "failed to resize window surface");
                }
            }
            Err(err) => debug!(error = %err, "keeping previous widget size"),
        }
    }

    fn reload(&mut self) {
        let Some(widget) = self.widget.as_mut() else {
            return;
        };
        let loaded = match load_chain(&self.loaded.path) {
            Ok(loaded) => loaded,
            Err(err) => {
                error!("failed to reload chain: {err:#}");
                return;
            }
        };
        match widget.on_effects_changed(&mut self.backend, loaded.units()) {
            Ok(report) => {
                log_failures(&report.failures);
                info!(
                    stages = report.stages,
                    added = report.added,
                    removed = report.removed,
                    "reloaded chain"
                );
                self.frame_interval = loaded.config.frame_interval;
                self.loaded = loaded;
            }
            Err(err) => error!(error = %err, "failed to apply reloaded chain"),
        }
    }

    fn redraw(&mut self) -> Result<()> {
        let Some(widget) = self.widget.as_mut() else {
            return Ok(());
        };
        let sample = self.clock.sample();
        log_failures(&widget.on_tick(&mut self.backend, sample.seconds));

        if let Err(err) = self.backend.begin_frame(BLACK) {
            warn!(error = %err, "failed to acquire surface frame; reconfiguring");
            self.backend
                .resize_screen(widget.size())
                .context("failed to reconfigure window surface")?;
            return Ok(());
        }
        widget
            .render(&mut self.backend)
            .context("failed to render chain")?;
        self.backend.finish_frame();
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(widget) = self.widget.take() {
            widget.release(&mut self.backend);
            debug!("released preview widget");
        }
    }
}

pub fn run(loaded: LoadedChain, size: Size, compiler: ShaderCompiler) -> Result<()> {
    let event_loop = EventLoopBuilder::new()
        .build()
        .map_err(|err| anyhow!("failed to create event loop: {err}"))?;
    let window = WindowBuilder::new()
        .with_title(format!("fxview - {}", loaded.path.display()))
        .with_inner_size(PhysicalSize::new(size.width(), size.height()))
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create preview window: {err}"))?;

    // SAFETY: `Preview` owns both and drops `backend` before `window`.
    let mut backend = unsafe { WgpuBackend::with_window(&window, size, compiler) }
        .context("failed to initialise window renderer")?;
    let widget = build_widget(&mut backend, &loaded, size)?;

    let mut preview = Preview {
        widget: Some(widget),
        backend,
        window,
        frame_interval: loaded.config.frame_interval,
        loaded,
        clock: SystemClock::new(),
        next_frame: Instant::now(),
    };
    preview.clock.reset();
    info!(
        chain = %preview.loaded.path.display(),
        %size,
        %compiler,
        "preview started"
    );

    event_loop
        .run(move |event, elwt| match event {
            Event::WindowEvent { window_id, event } if window_id == preview.window.id() => {
                match event {
                    WindowEvent::CloseRequested | WindowEvent::Destroyed => elwt.exit(),
                    WindowEvent::KeyboardInput { event, .. } => match key_action(&event) {
                        Some(KeyAction::Exit) => elwt.exit(),
                        Some(KeyAction::Reload) => preview.reload(),
                        None => {}
                    },
                    WindowEvent::Resized(new_size) => preview.resize(new_size),
                    WindowEvent::RedrawRequested => {
                        if let Err(err) = preview.redraw() {
                            error!("{err:#}");
                            elwt.exit();
                        }
                    }
                    _ => {}
                }
            }
            Event::AboutToWait => {
                let now = Instant::now();
                if now >= preview.next_frame {
                    preview.window.request_redraw();
                    preview.next_frame = now + preview.frame_interval;
                }
                elwt.set_control_flow(ControlFlow::WaitUntil(preview.next_frame));
            }
            Event::LoopExiting => preview.shutdown(),
            _ => {}
        })
        .map_err(|err| anyhow!("preview event loop error: {err}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    Exit,
    Reload,
}

fn key_action(event: &KeyEvent) -> Option<KeyAction> {
    if event.state != ElementState::Pressed || event.repeat {
        return None;
    }
    match &event.logical_key {
        Key::Named(NamedKey::Escape) => Some(KeyAction::Exit),
        Key::Character(value) if value.as_str().eq_ignore_ascii_case("r") => {
            Some(KeyAction::Reload)
        }
        _ => None,
    }
}
