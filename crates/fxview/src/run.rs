use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use fxchain::types::BLACK;
use fxchain::{
    EffectWidget, FixedClock, FrameClock, MemoryBackend, ReconcileReport, StageFailure,
    WgpuBackend,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::bindings::{load_chain, LoadedChain};
use crate::cli::{CheckArgs, Command, DumpArgs, RenderArgs};
use crate::preview;
use crate::scene::demo_scene;

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub fn run(command: Command) -> Result<ExitCode> {
    match command {
        Command::Check(args) => check(args),
        Command::Dump(args) => dump(args).map(|()| ExitCode::SUCCESS),
        Command::Render(args) => render(args).map(|()| ExitCode::SUCCESS),
        Command::Preview(args) => {
            let loaded = load_chain(&args.config)?;
            let size = loaded.size(args.size)?;
            preview::run(loaded, size, args.shader_compiler).map(|()| ExitCode::SUCCESS)
        }
    }
}

#[derive(Debug, Serialize)]
struct CheckReport {
    chain: String,
    width: u32,
    height: u32,
    ok: bool,
    stages: Vec<StageStatus>,
}

#[derive(Debug, Serialize)]
struct StageStatus {
    index: usize,
    kind: &'static str,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn check(args: CheckArgs) -> Result<ExitCode> {
    let loaded = load_chain(&args.config)?;
    let size = loaded.size(None)?;

    let mut backend = MemoryBackend::with_naga();
    let mut widget = EffectWidget::new(&mut backend, size)
        .context("failed to build the pre-chain buffer")?;
    let reconcile = widget
        .on_effects_changed(&mut backend, loaded.units())
        .context("failed to build the pass chain")?;

    let report = check_report(&loaded, &reconcile);
    widget.release(&mut backend);

    if args.json {
        let json = serde_json::to_string_pretty(&report).context("failed to encode report")?;
        println!("{json}");
    } else {
        print_check_report(&report);
    }

    Ok(if report.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn check_report(loaded: &LoadedChain, reconcile: &ReconcileReport) -> CheckReport {
    let failure_for = |index: usize| -> Option<&StageFailure> {
        reconcile.failures.iter().find(|failure| failure.stage == index)
    };

    let stages: Vec<StageStatus> = loaded
        .effects
        .iter()
        .enumerate()
        .map(|(index, effect)| {
            let error = effect
                .load_error
                .clone()
                .or_else(|| failure_for(index).map(|failure| failure.error.log.clone()));
            StageStatus {
                index,
                kind: effect.spec.kind(),
                ok: error.is_none(),
                error,
            }
        })
        .collect();

    CheckReport {
        chain: loaded.path.display().to_string(),
        width: reconcile.size.width(),
        height: reconcile.size.height(),
        ok: stages.iter().all(|stage| stage.ok),
        stages,
    }
}

fn print_check_report(report: &CheckReport) {
    println!(
        "{}: {} stage(s) at {}x{}",
        report.chain,
        report.stages.len(),
        report.width,
        report.height
    );
    for stage in &report.stages {
        match &stage.error {
            None => println!("  stage {:<3} {:<16} ok", stage.index, stage.kind),
            Some(error) => {
                println!("  stage {:<3} {:<16} FAILED", stage.index, stage.kind);
                for line in error.lines() {
                    println!("      {line}");
                }
            }
        }
    }
}

fn dump(args: DumpArgs) -> Result<()> {
    let loaded = load_chain(&args.config)?;
    let selected: Vec<_> = match args.stage {
        Some(index) => {
            let effect = loaded.effects.get(index).with_context(|| {
                format!(
                    "stage {index} is out of range; the chain has {} stage(s)",
                    loaded.effects.len()
                )
            })?;
            vec![(index, effect)]
        }
        None => loaded.effects.iter().enumerate().collect(),
    };

    for (index, effect) in selected {
        if let Some(error) = &effect.load_error {
            tracing::warn!(stage = index, error = %error, "source not loaded; dumping pass-through");
        }
        println!("// ---- stage {index}: {} ----", effect.spec.kind());
        println!("{}", effect.unit.current_source());
    }
    Ok(())
}

fn render(args: RenderArgs) -> Result<()> {
    let loaded = load_chain(&args.config)?;
    let size = loaded.size(args.size)?;
    let mut backend = WgpuBackend::headless(size, args.shader_compiler)
        .context("failed to initialise headless renderer")?;

    let mut widget = build_widget(&mut backend, &loaded, size)?;
    let mut clock = FixedClock::new(args.time);
    let sample = clock.sample();
    log_failures(&widget.on_tick(&mut backend, sample.seconds));

    backend
        .begin_frame(BLACK)
        .context("failed to begin headless frame")?;
    widget.render(&mut backend).context("failed to render chain")?;
    backend.finish_frame();

    let screen = backend
        .screen()
        .context("headless renderer has no screen buffer")?;
    let image = backend
        .read_buffer(screen)
        .context("failed to read back rendered frame")?;
    save_png(&image, &args.output)?;
    widget.release(&mut backend);

    tracing::info!(
        output = %args.output.display(),
        width = size.width(),
        height = size.height(),
        time = sample.seconds,
        "rendered chain"
    );
    Ok(())
}

/// Builds a widget showing the demo scene through the chain's effects.
pub fn build_widget(
    backend: &mut dyn fxchain::GpuBackend,
    loaded: &LoadedChain,
    size: fxchain::Size,
) -> Result<EffectWidget> {
    let [x, y] = loaded.config.position;
    let mut widget = EffectWidget::new(backend, size).context("failed to create effect widget")?;
    widget.set_position(x, y);
    for child in demo_scene([x, y], size) {
        widget.add_child(child);
    }
    let report = widget
        .on_effects_changed(backend, loaded.units())
        .context("failed to build the pass chain")?;
    log_failures(&report.failures);
    Ok(widget)
}

pub fn log_failures(failures: &[StageFailure]) {
    for failure in failures {
        tracing::warn!(
            stage = failure.stage,
            effect = %failure.effect,
            error = %failure.error,
            "stage is running its previous shader"
        );
    }
}

fn save_png(image: &fxchain::gpu::RgbaImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    image
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))
}
