use std::borrow::Cow;

use wgpu::naga::{self, ShaderStage};

use crate::error::ShaderError;
use crate::template::VERTEX_SHADER_GLSL;
use crate::types::ShaderCompiler;

/// Parses and validates GLSL with naga, returning the compiler log on failure.
pub fn validate_glsl(source: &str, stage: ShaderStage) -> Result<naga::Module, String> {
    let mut frontend = naga::front::glsl::Frontend::default();
    let module = frontend
        .parse(&naga::front::glsl::Options::from(stage), source)
        .map_err(|errors| errors.emit_to_string(source))?;
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|error| error.emit_to_string(source))?;
    Ok(module)
}

/// Compiles the shared quad vertex shader.
pub(crate) fn compile_vertex_shader(
    device: &wgpu::Device,
    compiler: ShaderCompiler,
) -> Result<wgpu::ShaderModule, ShaderError> {
    create_module(device, "quad vertex", VERTEX_SHADER_GLSL, ShaderStage::Vertex, compiler)
}

/// Validates an assembled fragment shader and turns it into a module.
///
/// Validation happens up front so a broken effect is reported through
/// [`ShaderError`] instead of the device's uncaptured-error handler.
pub(crate) fn compile_fragment_shader(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    compiler: ShaderCompiler,
) -> Result<wgpu::ShaderModule, ShaderError> {
    create_module(device, label, source, ShaderStage::Fragment, compiler)
}

fn create_module(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    stage: ShaderStage,
    compiler: ShaderCompiler,
) -> Result<wgpu::ShaderModule, ShaderError> {
    match compiler {
        ShaderCompiler::NagaGlsl => {
            validate_glsl(source, stage).map_err(|log| ShaderError::new(label, log))?;
            Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Glsl {
                    shader: Cow::Owned(source.to_string()),
                    stage,
                    defines: &[],
                },
            }))
        }
        ShaderCompiler::Shaderc => compile_with_shaderc(device, label, source, stage),
    }
}

#[cfg(feature = "shaderc")]
fn compile_with_shaderc(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    stage: ShaderStage,
) -> Result<wgpu::ShaderModule, ShaderError> {
    let kind = match stage {
        ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
        _ => shaderc::ShaderKind::Fragment,
    };
    let compiler = shaderc::Compiler::new().map_err(|err| ShaderError::new(label, err.to_string()))?;
    let artifact = compiler
        .compile_into_spirv(source, kind, label, "main", None)
        .map_err(|err| ShaderError::new(label, err.to_string()))?;
    if artifact.get_num_warnings() > 0 {
        tracing::debug!(label, warnings = %artifact.get_warning_messages(), "shaderc warnings");
    }
    Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::SpirV(Cow::Owned(artifact.as_binary().to_vec())),
    }))
}

#[cfg(not(feature = "shaderc"))]
fn compile_with_shaderc(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    stage: ShaderStage,
) -> Result<wgpu::ShaderModule, ShaderError> {
    tracing::warn!(label, "shaderc support is not compiled in; using naga");
    create_module(device, label, source, stage, ShaderCompiler::NagaGlsl)
}
