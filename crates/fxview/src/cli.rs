use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use fxchain::ShaderCompiler;

#[derive(Parser, Debug)]
#[command(
    name = "fxview",
    author,
    version,
    about = "Check, dump, render, and preview GLSL effect chains"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile every stage of a chain without a GPU and report failures.
    Check(CheckArgs),
    /// Print the assembled fragment shader of each stage.
    Dump(DumpArgs),
    /// Render the demo scene through the chain into a PNG file.
    Render(RenderArgs),
    /// Show the demo scene through the chain in a window.
    Preview(PreviewArgs),
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Chain description (TOML).
    #[arg(value_name = "CHAIN")]
    pub config: PathBuf,

    /// Emit the report as JSON on stdout.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct DumpArgs {
    #[arg(value_name = "CHAIN")]
    pub config: PathBuf,

    /// Only print the stage at this index.
    #[arg(long, value_name = "INDEX")]
    pub stage: Option<usize>,
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    #[arg(value_name = "CHAIN")]
    pub config: PathBuf,

    /// Destination PNG path.
    #[arg(long, short, value_name = "PATH", value_parser = parse_png_path)]
    pub output: PathBuf,

    /// Time in seconds handed to animated effects.
    #[arg(long, value_name = "SECONDS", default_value_t = 0.0)]
    pub time: f32,

    /// Override the chain size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<(u32, u32)>,

    /// Shader compiler backend: `shaderc` or `naga`.
    #[arg(
        long,
        value_name = "COMPILER",
        value_parser = parse_shader_compiler,
        default_value_t = ShaderCompiler::default()
    )]
    pub shader_compiler: ShaderCompiler,
}

#[derive(Args, Debug)]
pub struct PreviewArgs {
    #[arg(value_name = "CHAIN")]
    pub config: PathBuf,

    /// Initial window size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<(u32, u32)>,

    #[arg(
        long,
        value_name = "COMPILER",
        value_parser = parse_shader_compiler,
        default_value_t = ShaderCompiler::default()
    )]
    pub shader_compiler: ShaderCompiler,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_shader_compiler(value: &str) -> Result<ShaderCompiler, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("shader compiler must not be empty".to_string());
    }

    let normalized = trimmed.to_ascii_lowercase();
    match normalized.as_str() {
        "shaderc" => {
            if cfg!(feature = "shaderc") {
                Ok(ShaderCompiler::Shaderc)
            } else {
                Err("shaderc support is not enabled in this build".to_string())
            }
        }
        "naga" | "naga-glsl" => Ok(ShaderCompiler::NagaGlsl),
        _ => Err("unknown shader compiler (expected shaderc or naga)".to_string()),
    }
}

pub fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| "expected WIDTHxHEIGHT".to_string())?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid width '{}'", w.trim()))?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid height '{}'", h.trim()))?;
    if width == 0 || height == 0 {
        return Err("dimensions must be greater than zero".into());
    }
    Ok((width, height))
}

pub fn parse_png_path(value: &str) -> Result<PathBuf, String> {
    let path = Path::new(value);
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => Ok(path.to_path_buf()),
        None => Err("output path has no extension; expected .png".to_string()),
        Some(other) => Err(format!(
            "unsupported output format '.{other}'; expected .png"
        )),
    }
}
