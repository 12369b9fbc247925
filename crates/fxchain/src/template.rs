//! Fragment shader assembly.
//!
//! Every pass compiles the same skeleton:
//!
//! ```text
//!   HEADER          #version, varyings, input texture + sampler
//!   uniform decls   resolution / time block (UNIFORMS by default)
//!   effect body     vec4 effect(vec4, sampler2D, vec2, vec2) { ... }
//!   FOOTER_EFFECT   main(): sample input, call effect(), write output
//! ```
//!
//! The pre-chain buffer and the default composite surface use
//! [`FOOTER_TRIVIAL`] instead, which only samples the input texture.

/// Name of the function every effect body must define.
pub const ENTRY_POINT: &str = "effect";

/// Version directive, varyings, and the sampler for the pass input.
///
/// `texture2D` is aliased to `texture` so bodies written against the older
/// sampling call compile against GLSL 450.
pub const HEADER: &str = r"#version 450

// Outputs from the vertex shader
layout(location = 0) in vec2 tex_coord0;
layout(location = 1) in vec4 frag_color;
layout(location = 0) out vec4 fx_out_color;

// Input texture of this pass
layout(set = 1, binding = 0) uniform texture2D fx_input_texture;
layout(set = 1, binding = 1) uniform sampler fx_input_sampler;
#define texture0 sampler2D(fx_input_texture, fx_input_sampler)
#define texture2D texture
";

/// Uniform block shared by every pass and by the quad vertex shader.
///
/// The layout must match `EffectParams` in `gpu/uniforms.rs`.
pub const UNIFORMS: &str = r"
layout(std140, set = 0, binding = 0) uniform EffectParams {
    vec2 _resolution;
    float _time;
    float _padding0;
    vec4 _target;
    vec4 _quad_rect;
    vec4 _quad_color;
} fx_params;

#define resolution fx_params._resolution
#define time fx_params._time
";

/// Calls the effect entry point with the sampled input color.
///
/// `coords` is remapped to a bottom-left origin so pixel-space effects match
/// the quad layout.
pub const FOOTER_EFFECT: &str = r"
void main() {
    vec2 fx_coords = vec2(gl_FragCoord.x, fx_params._target.y - gl_FragCoord.y);
    vec4 normal_color = frag_color * texture(texture0, tex_coord0);
    vec4 effect_color = effect(normal_color, texture0, tex_coord0, fx_coords);
    fx_out_color = effect_color;
}
";

/// Pass-through main used where no effect applies.
pub const FOOTER_TRIVIAL: &str = r"
void main() {
    fx_out_color = frag_color * texture(texture0, tex_coord0);
}
";

/// Joins header, uniform declarations, effect body and footer.
///
/// A `#line 1` directive precedes the body so compiler diagnostics point at
/// lines of the effect rather than the injected prelude.
pub fn assemble(uniform_decls: &str, effect_body: &str) -> String {
    let mut source = String::with_capacity(
        HEADER.len() + uniform_decls.len() + effect_body.len() + FOOTER_EFFECT.len() + 16,
    );
    source.push_str(HEADER);
    source.push_str(uniform_decls);
    source.push_str("\n#line 1\n");
    source.push_str(effect_body);
    if !effect_body.ends_with('\n') {
        source.push('\n');
    }
    source.push_str(FOOTER_EFFECT);
    source
}

/// Assembles an effect body with the standard time/resolution uniforms.
pub fn assemble_effect(effect_body: &str) -> String {
    assemble(UNIFORMS, effect_body)
}

/// Source for passes that present their input unchanged.
pub fn passthrough_source() -> String {
    format!("{HEADER}{UNIFORMS}{FOOTER_TRIVIAL}")
}

/// Cheap textual check that a body declares the entry point.
///
/// This does not replace compilation; it only lets callers warn early about
/// bodies that are certain to fail.
pub fn has_entry_point(effect_body: &str) -> bool {
    effect_body
        .match_indices(ENTRY_POINT)
        .any(|(index, _)| {
            let before = effect_body[..index].chars().next_back();
            let after = effect_body[index + ENTRY_POINT.len()..].trim_start();
            before.is_none_or(|ch| !(ch.is_alphanumeric() || ch == '_')) && after.starts_with('(')
        })
}

/// Vertex shader shared by every quad draw.
///
/// Positions a unit quad at `_quad_rect` (pixels, bottom-left origin) inside
/// a destination of `_target.xy` pixels. Texture coordinates are flipped so
/// that sampling an off-screen buffer keeps its orientation across passes.
pub const VERTEX_SHADER_GLSL: &str = r"#version 450
layout(location = 0) out vec2 tex_coord0;
layout(location = 1) out vec4 frag_color;

layout(std140, set = 0, binding = 0) uniform EffectParams {
    vec2 _resolution;
    float _time;
    float _padding0;
    vec4 _target;
    vec4 _quad_rect;
    vec4 _quad_color;
} fx_params;

const vec2 corners[6] = vec2[6](
    vec2(0.0, 0.0),
    vec2(1.0, 0.0),
    vec2(1.0, 1.0),
    vec2(0.0, 0.0),
    vec2(1.0, 1.0),
    vec2(0.0, 1.0)
);

void main() {
    vec2 corner = corners[gl_VertexIndex];
    vec2 pixel = fx_params._quad_rect.xy + corner * fx_params._quad_rect.zw;
    vec2 ndc = pixel / max(fx_params._target.xy, vec2(1.0)) * 2.0 - 1.0;
    tex_coord0 = vec2(corner.x, 1.0 - corner.y);
    frag_color = fx_params._quad_color;
    gl_Position = vec4(ndc, 0.0, 1.0);
}
";

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "vec4 effect(vec4 color, sampler2D tex, vec2 uv, vec2 coords)\n{\n    return color;\n}\n";

    #[test]
    fn assemble_orders_slots() {
        let source = assemble("uniform float extra;\n", BODY);
        let header = source.find("#version 450").unwrap();
        let uniforms = source.find("uniform float extra;").unwrap();
        let body = source.find("vec4 effect(").unwrap();
        let footer = source.find("void main()").unwrap();
        assert!(header < uniforms && uniforms < body && body < footer);
        assert!(source.contains("#line 1\nvec4 effect("));
    }

    #[test]
    fn effect_footer_calls_entry_point() {
        let source = assemble_effect(BODY);
        assert!(source.contains("effect(normal_color, texture0, tex_coord0, fx_coords)"));
        assert!(source.contains("#define time fx_params._time"));
        assert!(source.contains("#define resolution fx_params._resolution"));
    }

    #[test]
    fn passthrough_has_no_entry_point_call() {
        let source = passthrough_source();
        assert!(!source.contains("effect("));
        assert!(source.contains("frag_color * texture(texture0, tex_coord0)"));
    }

    #[test]
    fn body_without_trailing_newline_stays_separated() {
        let source = assemble_effect("vec4 effect(vec4 c, sampler2D t, vec2 a, vec2 b) { return c; }");
        assert!(source.contains("return c; }\n\nvoid main()"));
    }

    #[test]
    fn entry_point_detection() {
        assert!(has_entry_point(BODY));
        assert!(has_entry_point("vec4 effect (vec4 c, sampler2D t, vec2 a, vec2 b)"));
        assert!(!has_entry_point("vec4 side_effect(vec4 c) { return c; }"));
        assert!(!has_entry_point("void main() {}"));
    }
}
