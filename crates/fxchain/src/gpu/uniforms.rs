use bytemuck::{Pod, Zeroable};

use crate::backend::{Quad, UniformValue, Uniforms, RESOLUTION_UNIFORM, TIME_UNIFORM};

/// std140 mirror of the `EffectParams` block declared by the shader template.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub(crate) struct EffectParams {
    pub resolution: [f32; 2],
    pub time: f32,
    pub padding0: f32,
    /// Destination size in pixels in `xy`.
    pub target: [f32; 4],
    pub quad_rect: [f32; 4],
    pub quad_color: [f32; 4],
}

impl EffectParams {
    /// Packs one draw. Names other than `time` and `resolution` have no slot
    /// in the block and are skipped.
    pub fn for_draw(destination: [u32; 2], quad: &Quad, uniforms: &Uniforms) -> Self {
        let target = [destination[0] as f32, destination[1] as f32];
        let mut params = Self {
            resolution: target,
            time: 0.0,
            padding0: 0.0,
            target: [target[0], target[1], 0.0, 0.0],
            quad_rect: quad.rect.as_array(),
            quad_color: quad.color,
        };
        for (name, value) in uniforms {
            match (name.as_str(), value) {
                (TIME_UNIFORM, UniformValue::Float(time)) => params.time = *time,
                (RESOLUTION_UNIFORM, UniformValue::Vec2(resolution)) => {
                    params.resolution = *resolution
                }
                _ => tracing::trace!(name, "uniform has no slot in the effect block"),
            }
        }
        params
    }
}
