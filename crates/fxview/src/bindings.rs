//! Turns a parsed chain file into effect units.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};
use fxchain::{ChannelOrder, EffectKind, EffectUnit, ResourceLookup, SearchPaths, Size};
use fxconfig::{ChainConfig, EffectSpec};

/// One `[[effects]]` entry bound to its unit.
#[derive(Debug)]
pub struct BoundEffect {
    pub spec: EffectSpec,
    pub unit: Rc<EffectUnit>,
    /// Set when a file-backed source could not be read; the unit then
    /// presents its input unchanged.
    pub load_error: Option<String>,
}

#[derive(Debug)]
pub struct LoadedChain {
    pub path: PathBuf,
    pub config: ChainConfig,
    pub effects: Vec<BoundEffect>,
}

impl LoadedChain {
    pub fn units(&self) -> Vec<Rc<EffectUnit>> {
        self.effects
            .iter()
            .map(|effect| Rc::clone(&effect.unit))
            .collect()
    }

    /// The configured size, or `requested` when given.
    pub fn size(&self, requested: Option<(u32, u32)>) -> Result<Size> {
        let (width, height) = requested.unwrap_or((self.config.size[0], self.config.size[1]));
        Size::new(width, height).with_context(|| format!("invalid chain size {width}x{height}"))
    }
}

/// Loads a chain file and builds a unit for every effect.
///
/// File sources resolve against the directory holding the chain file, then
/// each configured search path.
pub fn load_chain(path: &Path) -> Result<LoadedChain> {
    let config = ChainConfig::load(path)
        .with_context(|| format!("failed to load chain {}", path.display()))?;
    let lookup = search_paths_for(path, &config)?;

    let effects = config
        .effects
        .iter()
        .enumerate()
        .map(|(index, spec)| {
            bind_effect(spec, &lookup)
                .with_context(|| format!("failed to build effects[{index}] ({})", spec.kind()))
        })
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!(
        chain = %path.display(),
        effects = effects.len(),
        roots = lookup.roots().len(),
        "loaded chain"
    );
    Ok(LoadedChain {
        path: path.to_path_buf(),
        config,
        effects,
    })
}

fn search_paths_for(path: &Path, config: &ChainConfig) -> Result<SearchPaths> {
    let base = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().context("failed to resolve working directory")?,
    };
    let mut lookup = SearchPaths::with_cwd(base);
    for root in &config.search_paths {
        lookup
            .push_root(root)
            .with_context(|| format!("invalid search path '{root}'"))?;
    }
    Ok(lookup)
}

pub fn bind_effect(spec: &EffectSpec, lookup: &dyn ResourceLookup) -> Result<BoundEffect> {
    let kind = match spec {
        EffectSpec::PassThrough => EffectKind::PassThrough,
        EffectSpec::Monochrome => EffectKind::Monochrome,
        EffectSpec::Invert => EffectKind::Invert,
        EffectSpec::Red => EffectKind::Red,
        EffectSpec::Green => EffectKind::Green,
        EffectSpec::Blue => EffectKind::Blue,
        EffectSpec::Scanlines => EffectKind::Scanlines,
        EffectSpec::Plasma => EffectKind::Plasma,
        EffectSpec::Fxaa => EffectKind::Fxaa,
        EffectSpec::ChannelMix { order } => EffectKind::ChannelMix {
            order: ChannelOrder::from_indices(*order)?,
        },
        EffectSpec::Pixelate { pixel_size } => EffectKind::Pixelate {
            pixel_size: *pixel_size,
        },
        EffectSpec::HorizontalBlur { size } => EffectKind::HorizontalBlur { size: *size },
        EffectSpec::VerticalBlur { size } => EffectKind::VerticalBlur { size: *size },
        EffectSpec::Glsl { body } => EffectKind::Glsl { body: body.clone() },
        EffectSpec::File { source } => {
            let unit = EffectUnit::from_file();
            let load_error = unit
                .load_source(source, lookup)
                .err()
                .map(|err| err.to_string());
            return Ok(BoundEffect {
                spec: spec.clone(),
                unit: Rc::new(unit),
                load_error,
            });
        }
    };

    Ok(BoundEffect {
        spec: spec.clone(),
        unit: Rc::new(EffectUnit::new(kind)),
        load_error: None,
    })
}
