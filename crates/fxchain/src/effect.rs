//! Effect definitions and the observable effect unit.
//!
//! An [`EffectKind`] is a closed set of body generators plus their
//! parameters; [`generate_body`] turns one into GLSL implementing the entry
//! point. An [`EffectUnit`] owns the current kind, the generated body and the
//! assembled source, and notifies subscribers whenever a parameter change
//! produces a new source.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{EffectError, ResourceError};
use crate::resource::{read_shader_source, ResourceLookup};
use crate::template;

/// Weights of the 9-tap blur kernel, from one extreme tap to the other.
pub const BLUR_WEIGHTS: [&str; 9] = [
    "0.05", "0.09", "0.12", "0.15", "0.16", "0.15", "0.12", "0.09", "0.05",
];

pub const DEFAULT_PIXEL_SIZE: f32 = 10.0;
pub const DEFAULT_BLUR_SIZE: f32 = 4.0;

/// One color channel selector for [`EffectKind::ChannelMix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    X,
    Y,
    Z,
}

impl Channel {
    pub fn from_index(index: u8) -> Result<Self, EffectError> {
        match index {
            0 => Ok(Channel::X),
            1 => Ok(Channel::Y),
            2 => Ok(Channel::Z),
            other => Err(EffectError::ChannelOutOfRange(other)),
        }
    }

    pub fn index(self) -> u8 {
        match self {
            Channel::X => 0,
            Channel::Y => 1,
            Channel::Z => 2,
        }
    }

    fn swizzle(self) -> char {
        match self {
            Channel::X => 'x',
            Channel::Y => 'y',
            Channel::Z => 'z',
        }
    }
}

/// Output channel permutation; channels may repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOrder(pub [Channel; 3]);

impl ChannelOrder {
    pub fn from_indices(indices: [u8; 3]) -> Result<Self, EffectError> {
        Ok(Self([
            Channel::from_index(indices[0])?,
            Channel::from_index(indices[1])?,
            Channel::from_index(indices[2])?,
        ]))
    }

    pub fn indices(&self) -> [u8; 3] {
        self.0.map(Channel::index)
    }
}

impl Default for ChannelOrder {
    /// `(g, b, r)`.
    fn default() -> Self {
        Self([Channel::Y, Channel::Z, Channel::X])
    }
}

/// Built-in effects and their parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectKind {
    PassThrough,
    Monochrome,
    Invert,
    Red,
    Green,
    Blue,
    Scanlines,
    Plasma,
    Fxaa,
    ChannelMix { order: ChannelOrder },
    Pixelate { pixel_size: f32 },
    HorizontalBlur { size: f32 },
    VerticalBlur { size: f32 },
    /// Caller-supplied body implementing the entry point.
    Glsl { body: String },
    /// Body read from an external resource; empty until loaded.
    File { source: String },
}

impl EffectKind {
    pub fn name(&self) -> &'static str {
        match self {
            EffectKind::PassThrough => "pass_through",
            EffectKind::Monochrome => "monochrome",
            EffectKind::Invert => "invert",
            EffectKind::Red => "red",
            EffectKind::Green => "green",
            EffectKind::Blue => "blue",
            EffectKind::Scanlines => "scanlines",
            EffectKind::Plasma => "plasma",
            EffectKind::Fxaa => "fxaa",
            EffectKind::ChannelMix { .. } => "channel_mix",
            EffectKind::Pixelate { .. } => "pixelate",
            EffectKind::HorizontalBlur { .. } => "horizontal_blur",
            EffectKind::VerticalBlur { .. } => "vertical_blur",
            EffectKind::Glsl { .. } => "glsl",
            EffectKind::File { .. } => "file",
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Dynamic parameter value accepted by [`EffectUnit::set_parameter`].
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Number(f32),
    Channels([u8; 3]),
    Text(String),
}

/// Produces the effect body for `kind`.
///
/// Returns `None` for [`EffectKind::File`], whose body only exists once the
/// resource has been read.
pub fn generate_body(kind: &EffectKind) -> Option<String> {
    let body = match kind {
        EffectKind::PassThrough => EFFECT_TRIVIAL.to_string(),
        EffectKind::Monochrome => EFFECT_MONOCHROME.to_string(),
        EffectKind::Invert => EFFECT_INVERT.to_string(),
        EffectKind::Red => EFFECT_RED.to_string(),
        EffectKind::Green => EFFECT_GREEN.to_string(),
        EffectKind::Blue => EFFECT_BLUE.to_string(),
        EffectKind::Scanlines => EFFECT_SCANLINES.to_string(),
        EffectKind::Plasma => EFFECT_PLASMA.to_string(),
        EffectKind::Fxaa => EFFECT_FXAA.to_string(),
        EffectKind::ChannelMix { order } => channel_mix_body(*order),
        EffectKind::Pixelate { pixel_size } => pixelate_body(*pixel_size),
        EffectKind::HorizontalBlur { size } => blur_body(BlurAxis::Horizontal, *size),
        EffectKind::VerticalBlur { size } => blur_body(BlurAxis::Vertical, *size),
        EffectKind::Glsl { body } => body.clone(),
        EffectKind::File { .. } => return None,
    };
    Some(body)
}

/// Renders a float so GLSL reads it as a float literal (`4` -> `4.0`).
pub fn glsl_float(value: f32) -> String {
    format!("{value:?}")
}

fn channel_mix_body(order: ChannelOrder) -> String {
    let [a, b, c] = order.0.map(Channel::swizzle);
    format!(
        "vec4 effect(vec4 color, sampler2D tex, vec2 tex_coords, vec2 coords)\n\
         {{\n    return vec4(color.{a}, color.{b}, color.{c}, 1.0);\n}}\n"
    )
}

fn pixelate_body(pixel_size: f32) -> String {
    format!(
        "vec4 effect(vec4 vcolor, sampler2D tex, vec2 texcoord, vec2 pixel_coords)\n\
         {{\n    vec2 pixelSize = {size} / resolution;\n\n    \
         vec2 xy = floor(texcoord / pixelSize) * pixelSize + pixelSize / 2.0;\n\n    \
         return texture2D(tex, xy);\n}}\n",
        size = glsl_float(pixel_size)
    )
}

#[derive(Clone, Copy)]
enum BlurAxis {
    Horizontal,
    Vertical,
}

fn blur_body(axis: BlurAxis, size: f32) -> String {
    let (extent, axis_coord) = match axis {
        BlurAxis::Horizontal => ("resolution.x", "tex_coords.x"),
        BlurAxis::Vertical => ("resolution.y", "tex_coords.y"),
    };
    let offset_coord = |shifted: &str| match axis {
        BlurAxis::Horizontal => format!("vec2({shifted}, tex_coords.y)"),
        BlurAxis::Vertical => format!("vec2(tex_coords.x, {shifted})"),
    };

    let mut body = String::new();
    body.push_str("vec4 effect(vec4 color, sampler2D tex, vec2 tex_coords, vec2 coords)\n{\n");
    body.push_str(&format!(
        "    float dt = ({} / 4.0) * 1.0 / {extent};\n",
        glsl_float(size)
    ));
    body.push_str("    vec4 sum = vec4(0.0);\n");
    for (tap, weight) in (-4i32..=4).zip(BLUR_WEIGHTS) {
        let shifted = match tap {
            0 => axis_coord.to_string(),
            -1 => format!("{axis_coord} - dt"),
            1 => format!("{axis_coord} + dt"),
            t if t < 0 => format!("{axis_coord} - {}.0*dt", -t),
            t => format!("{axis_coord} + {t}.0*dt"),
        };
        body.push_str(&format!(
            "    sum += texture2D(tex, {}) * {weight};\n",
            offset_coord(&shifted)
        ));
    }
    body.push_str("    return sum;\n}\n");
    body
}

static NEXT_EFFECT_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of an [`EffectUnit`], independent of its position in a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(u64);

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type SourceCallback = Rc<dyn Fn(EffectId, &str)>;

/// Handle returned by [`EffectUnit::on_source_changed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    effect: EffectId,
    id: u64,
}

impl Subscription {
    pub fn effect(&self) -> EffectId {
        self.effect
    }
}

/// One effect of a chain: parameters, generated body, and assembled source.
///
/// Units are shared as `Rc<EffectUnit>`; all mutation goes through interior
/// mutability so a chain can hold a reference while the application keeps
/// adjusting parameters.
pub struct EffectUnit {
    id: EffectId,
    kind: RefCell<EffectKind>,
    body: RefCell<String>,
    source: RefCell<String>,
    observers: RefCell<Vec<(u64, SourceCallback)>>,
    next_subscription: Cell<u64>,
}

impl EffectUnit {
    pub fn new(kind: EffectKind) -> Self {
        let body = generate_body(&kind).unwrap_or_else(|| EFFECT_TRIVIAL.to_string());
        let source = template::assemble_effect(&body);
        Self {
            id: EffectId(NEXT_EFFECT_ID.fetch_add(1, Ordering::Relaxed)),
            kind: RefCell::new(kind),
            body: RefCell::new(body),
            source: RefCell::new(source),
            observers: RefCell::new(Vec::new()),
            next_subscription: Cell::new(0),
        }
    }

    pub fn pass_through() -> Self {
        Self::new(EffectKind::PassThrough)
    }

    pub fn monochrome() -> Self {
        Self::new(EffectKind::Monochrome)
    }

    pub fn invert() -> Self {
        Self::new(EffectKind::Invert)
    }

    pub fn scanlines() -> Self {
        Self::new(EffectKind::Scanlines)
    }

    pub fn fxaa() -> Self {
        Self::new(EffectKind::Fxaa)
    }

    pub fn channel_mix(order: ChannelOrder) -> Self {
        Self::new(EffectKind::ChannelMix { order })
    }

    pub fn pixelate(pixel_size: f32) -> Self {
        Self::new(EffectKind::Pixelate { pixel_size })
    }

    pub fn horizontal_blur(size: f32) -> Self {
        Self::new(EffectKind::HorizontalBlur { size })
    }

    pub fn vertical_blur(size: f32) -> Self {
        Self::new(EffectKind::VerticalBlur { size })
    }

    pub fn glsl(body: impl Into<String>) -> Self {
        Self::new(EffectKind::Glsl { body: body.into() })
    }

    /// A file-backed effect that presents its input until a source is loaded.
    pub fn from_file() -> Self {
        Self::new(EffectKind::File {
            source: String::new(),
        })
    }

    pub fn id(&self) -> EffectId {
        self.id
    }

    pub fn kind(&self) -> EffectKind {
        self.kind.borrow().clone()
    }

    pub fn name(&self) -> &'static str {
        self.kind.borrow().name()
    }

    /// The effect body currently in use.
    pub fn body(&self) -> String {
        self.body.borrow().clone()
    }

    /// The fully assembled fragment shader for the current body.
    pub fn current_source(&self) -> String {
        self.source.borrow().clone()
    }

    pub fn set_pixel_size(&self, pixel_size: f32) -> Result<(), EffectError> {
        self.set_parameter("pixel_size", ParamValue::Number(pixel_size))
    }

    pub fn set_blur_size(&self, size: f32) -> Result<(), EffectError> {
        self.set_parameter("size", ParamValue::Number(size))
    }

    pub fn set_channel_order(&self, order: ChannelOrder) -> Result<(), EffectError> {
        self.set_parameter("order", ParamValue::Channels(order.indices()))
    }

    pub fn set_glsl(&self, body: impl Into<String>) -> Result<(), EffectError> {
        self.set_parameter("glsl", ParamValue::Text(body.into()))
    }

    /// Updates one parameter and regenerates the body before returning.
    ///
    /// Subscribers are notified synchronously when the assembled source
    /// changes.
    pub fn set_parameter(&self, name: &str, value: ParamValue) -> Result<(), EffectError> {
        let updated = {
            let current = self.kind.borrow();
            apply_parameter(&current, name, value)?
        };
        *self.kind.borrow_mut() = updated;
        let body = generate_body(&self.kind.borrow()).unwrap_or_else(|| self.body());
        self.replace_body(body);
        Ok(())
    }

    /// Reads a body through `lookup` and makes it the active source.
    ///
    /// Only file-backed effects accept a source. On failure the previous
    /// body and source stay active and the error is returned for reporting.
    pub fn load_source(
        &self,
        source: &str,
        lookup: &dyn ResourceLookup,
    ) -> Result<(), ResourceError> {
        if !matches!(*self.kind.borrow(), EffectKind::File { .. }) {
            return Err(ResourceError::InvalidPath {
                name: source.to_string(),
                reason: format!("the {} effect does not load sources", self.name()),
            });
        }
        if source.is_empty() {
            return Ok(());
        }

        let body = match read_shader_source(lookup, source) {
            Ok(body) => body,
            Err(err) => {
                tracing::error!(effect = %self.id, source, error = %err, "failed to load effect source");
                return Err(err);
            }
        };
        *self.kind.borrow_mut() = EffectKind::File {
            source: source.to_string(),
        };
        self.replace_body(body);
        Ok(())
    }

    /// Registers `callback` to run with the new source after every change.
    pub fn on_source_changed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(EffectId, &str) + 'static,
    {
        let id = self.next_subscription.get();
        self.next_subscription.set(id + 1);
        self.observers.borrow_mut().push((id, Rc::new(callback)));
        Subscription {
            effect: self.id,
            id,
        }
    }

    /// Removes a subscription; returns false if it was not registered here.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        if subscription.effect != self.id {
            return false;
        }
        let mut observers = self.observers.borrow_mut();
        let before = observers.len();
        observers.retain(|(id, _)| *id != subscription.id);
        observers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.observers.borrow().len()
    }

    fn replace_body(&self, body: String) {
        if *self.body.borrow() == body {
            return;
        }
        if !template::has_entry_point(&body) {
            tracing::warn!(
                effect = %self.id,
                kind = self.name(),
                "effect body does not declare `{}`; compilation will fail",
                template::ENTRY_POINT
            );
        }
        let source = template::assemble_effect(&body);
        *self.body.borrow_mut() = body;
        *self.source.borrow_mut() = source.clone();

        // Callbacks may read this unit again, so no borrow is held while they run.
        let observers: Vec<SourceCallback> = self
            .observers
            .borrow()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in observers {
            callback(self.id, &source);
        }
    }
}

impl fmt::Debug for EffectUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectUnit")
            .field("id", &self.id)
            .field("kind", &*self.kind.borrow())
            .field("subscribers", &self.observers.borrow().len())
            .finish()
    }
}

fn apply_parameter(
    kind: &EffectKind,
    name: &str,
    value: ParamValue,
) -> Result<EffectKind, EffectError> {
    let number = |value: ParamValue| match value {
        ParamValue::Number(number) if number.is_finite() => Ok(number),
        ParamValue::Number(number) => Err(EffectError::NonFinite {
            parameter: name.to_string(),
            value: number,
        }),
        _ => Err(EffectError::WrongValue {
            parameter: name.to_string(),
            expected: "a number",
        }),
    };

    match (kind, name) {
        (EffectKind::Pixelate { .. }, "pixel_size") => Ok(EffectKind::Pixelate {
            pixel_size: number(value)?,
        }),
        (EffectKind::HorizontalBlur { .. }, "size") => Ok(EffectKind::HorizontalBlur {
            size: number(value)?,
        }),
        (EffectKind::VerticalBlur { .. }, "size") => Ok(EffectKind::VerticalBlur {
            size: number(value)?,
        }),
        (EffectKind::ChannelMix { .. }, "order") => match value {
            ParamValue::Channels(indices) => Ok(EffectKind::ChannelMix {
                order: ChannelOrder::from_indices(indices)?,
            }),
            _ => Err(EffectError::WrongValue {
                parameter: name.to_string(),
                expected: "three channel indices",
            }),
        },
        (EffectKind::Glsl { .. }, "glsl" | "body") => match value {
            ParamValue::Text(body) => Ok(EffectKind::Glsl { body }),
            _ => Err(EffectError::WrongValue {
                parameter: name.to_string(),
                expected: "GLSL source text",
            }),
        },
        _ => Err(EffectError::UnknownParameter {
            kind: kind.name(),
            parameter: name.to_string(),
        }),
    }
}

const EFFECT_TRIVIAL: &str = r"vec4 effect(vec4 color, sampler2D tex, vec2 tex_coords, vec2 coords)
{
    return color;
}
";

const EFFECT_MONOCHROME: &str = r"vec4 effect(vec4 color, sampler2D tex, vec2 tex_coords, vec2 coords)
{
    float mag = 1.0/3.0 * (color.x + color.y + color.z);
    return vec4(mag, mag, mag, color.w);
}
";

const EFFECT_RED: &str = r"vec4 effect(vec4 color, sampler2D tex, vec2 tex_coords, vec2 coords)
{
    return vec4(color.x, 0.0, 0.0, 1.0);
}
";

const EFFECT_GREEN: &str = r"vec4 effect(vec4 color, sampler2D tex, vec2 tex_coords, vec2 coords)
{
    return vec4(0.0, color.y, 0.0, 1.0);
}
";

const EFFECT_BLUE: &str = r"vec4 effect(vec4 color, sampler2D tex, vec2 tex_coords, vec2 coords)
{
    return vec4(0.0, 0.0, color.z, 1.0);
}
";

const EFFECT_INVERT: &str = r"vec4 effect(vec4 color, sampler2D tex, vec2 tex_coords, vec2 coords)
{
    return vec4(1.0 - color.xyz, 1.0);
}
";

const EFFECT_SCANLINES: &str = r"vec4 effect(vec4 color, sampler2D tex, vec2 tex_coords, vec2 coords)
{
    vec2 q = tex_coords * vec2(1.0, -1.0);
    vec2 uv = 0.5 + (q - 0.5);

    vec3 col;
    col.r = texture2D(tex, vec2(uv.x + 0.003, -uv.y)).x;
    col.g = texture2D(tex, vec2(uv.x + 0.000, -uv.y)).y;
    col.b = texture2D(tex, vec2(uv.x - 0.003, -uv.y)).z;

    col = clamp(col * 0.5 + 0.5 * col * col * 1.2, 0.0, 1.0);
    col *= vec3(0.8, 1.0, 0.7);
    col *= 0.9 + 0.1 * sin(10.0 * time + uv.y * 1000.0);
    col *= 0.97 + 0.03 * sin(110.0 * time);

    return vec4(col, 1.0);
}
";

const EFFECT_PLASMA: &str = r"vec4 effect(vec4 color, sampler2D tex, vec2 tex_coords, vec2 coords)
{
    float x = coords.x;
    float y = coords.y;
    float mov0 = x + y + cos(sin(time) * 2.0) * 100.0 + sin(x / 100.0) * 1000.0;
    float mov1 = y / resolution.y / 0.2 + time;
    float mov2 = x / resolution.x / 0.2;
    float c1 = abs(sin(mov1 + time) / 2.0 + mov2 / 2.0 - mov1 - mov2 + time);
    float c2 = abs(sin(c1 + sin(mov0 / 1000.0 + time) + sin(y / 40.0 + time) +
                   sin((x + y) / 100.0) * 3.0));
    float c3 = abs(sin(c2 + cos(mov1 + mov2 + c2) + cos(mov2) + sin(x / 1000.0)));
    return vec4(0.5 * (c1 + color.z), 0.5 * (c2 + color.x),
                0.5 * (c3 + color.y), 1.0);
}
";

const EFFECT_FXAA: &str = r"vec4 effect(vec4 color, sampler2D buf0, vec2 texCoords, vec2 coords)
{
    vec2 frameBufSize = resolution;

    float FXAA_SPAN_MAX = 8.0;
    float FXAA_REDUCE_MUL = 1.0/8.0;
    float FXAA_REDUCE_MIN = 1.0/128.0;

    vec3 rgbNW = texture2D(buf0, texCoords + (vec2(-1.0, -1.0) / frameBufSize)).xyz;
    vec3 rgbNE = texture2D(buf0, texCoords + (vec2(1.0, -1.0) / frameBufSize)).xyz;
    vec3 rgbSW = texture2D(buf0, texCoords + (vec2(-1.0, 1.0) / frameBufSize)).xyz;
    vec3 rgbSE = texture2D(buf0, texCoords + (vec2(1.0, 1.0) / frameBufSize)).xyz;
    vec3 rgbM = texture2D(buf0, texCoords).xyz;

    vec3 luma = vec3(0.299, 0.587, 0.114);
    float lumaNW = dot(rgbNW, luma);
    float lumaNE = dot(rgbNE, luma);
    float lumaSW = dot(rgbSW, luma);
    float lumaSE = dot(rgbSE, luma);
    float lumaM  = dot(rgbM,  luma);

    float lumaMin = min(lumaM, min(min(lumaNW, lumaNE), min(lumaSW, lumaSE)));
    float lumaMax = max(lumaM, max(max(lumaNW, lumaNE), max(lumaSW, lumaSE)));

    vec2 dir;
    dir.x = -((lumaNW + lumaNE) - (lumaSW + lumaSE));
    dir.y =  ((lumaNW + lumaSW) - (lumaNE + lumaSE));

    float dirReduce = max(
        (lumaNW + lumaNE + lumaSW + lumaSE) * (0.25 * FXAA_REDUCE_MUL),
        FXAA_REDUCE_MIN);

    float rcpDirMin = 1.0/(min(abs(dir.x), abs(dir.y)) + dirReduce);

    dir = min(vec2( FXAA_SPAN_MAX,  FXAA_SPAN_MAX),
          max(vec2(-FXAA_SPAN_MAX, -FXAA_SPAN_MAX),
          dir * rcpDirMin)) / frameBufSize;

    vec3 rgbA = (1.0/2.0) * (
        texture2D(buf0, texCoords.xy + dir * (1.0/3.0 - 0.5)).xyz +
        texture2D(buf0, texCoords.xy + dir * (2.0/3.0 - 0.5)).xyz);
    vec3 rgbB = rgbA * (1.0/2.0) + (1.0/4.0) * (
        texture2D(buf0, texCoords.xy + dir * (0.0/3.0 - 0.5)).xyz +
        texture2D(buf0, texCoords.xy + dir * (3.0/3.0 - 0.5)).xyz);
    float lumaB = dot(rgbB, luma);

    vec4 return_color;
    if ((lumaB < lumaMin) || (lumaB > lumaMax)) {
        return_color = vec4(rgbA, color.w);
    } else {
        return_color = vec4(rgbB, color.w);
    }

    return return_color;
}
";

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::PathBuf;

    use super::*;

    struct MapLookup(HashMap<String, PathBuf>);

    impl ResourceLookup for MapLookup {
        fn find(&self, name: &str) -> Option<PathBuf> {
            self.0.get(name).cloned()
        }
    }

    #[test]
    fn every_generated_body_declares_entry_point() {
        let kinds = [
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
        ];
        for kind in kinds {
            let body = generate_body(&kind).unwrap();
            assert!(template::has_entry_point(&body), "{kind} lacks entry point");
        }
    }

    #[test]
    fn default_channel_mix_is_gbr() {
        let unit = EffectUnit::channel_mix(ChannelOrder::default());
        assert!(unit
            .body()
            .contains("return vec4(color.y, color.z, color.x, 1.0);"));
    }

    #[test]
    fn channel_order_rejects_out_of_range_indices() {
        assert_eq!(
            ChannelOrder::from_indices([0, 3, 1]),
            Err(EffectError::ChannelOutOfRange(3))
        );
    }

    #[test]
    fn pixel_size_round_trips_into_source() {
        let unit = EffectUnit::pixelate(DEFAULT_PIXEL_SIZE);
        unit.set_pixel_size(12.5).unwrap();
        let source = unit.current_source();
        assert!(source.contains("vec2 pixelSize = 12.5 / resolution;"));
        assert_eq!(unit.kind(), EffectKind::Pixelate { pixel_size: 12.5 });
    }

    #[test]
    fn integral_parameters_render_as_float_literals() {
        let unit = EffectUnit::pixelate(10.0);
        assert!(unit.body().contains("vec2 pixelSize = 10.0 / resolution;"));
    }

    #[test]
    fn horizontal_blur_samples_along_x() {
        let body = EffectUnit::horizontal_blur(4.0).body();
        assert!(body.contains("float dt = (4.0 / 4.0) * 1.0 / resolution.x;"));
        assert!(body.contains("texture2D(tex, vec2(tex_coords.x - 4.0*dt, tex_coords.y)) * 0.05;"));
        assert!(body.contains("texture2D(tex, vec2(tex_coords.x, tex_coords.y)) * 0.16;"));
        assert!(body.contains("texture2D(tex, vec2(tex_coords.x + dt, tex_coords.y)) * 0.15;"));
        assert_eq!(body.matches("sum +=").count(), 9);
    }

    #[test]
    fn vertical_blur_samples_along_y() {
        let body = EffectUnit::vertical_blur(8.0).body();
        assert!(body.contains("float dt = (8.0 / 4.0) * 1.0 / resolution.y;"));
        assert!(body.contains("texture2D(tex, vec2(tex_coords.x, tex_coords.y + 3.0*dt)) * 0.09;"));
        assert!(!body.contains("tex_coords.x - dt"));
    }

    #[test]
    fn kernel_weights_are_symmetric() {
        let mut reversed = BLUR_WEIGHTS;
        reversed.reverse();
        assert_eq!(reversed, BLUR_WEIGHTS);
    }

    #[test]
    fn setter_notifies_subscribers_with_new_source() {
        let unit = EffectUnit::horizontal_blur(4.0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        unit.on_source_changed(move |id, source| sink.borrow_mut().push((id, source.to_string())));

        unit.set_blur_size(6.0).unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, unit.id());
        assert_eq!(seen[0].1, unit.current_source());
        assert!(seen[0].1.contains("(6.0 / 4.0)"));
    }

    #[test]
    fn unchanged_parameter_does_not_notify() {
        let unit = EffectUnit::pixelate(10.0);
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        unit.on_source_changed(move |_, _| counter.set(counter.get() + 1));
        unit.set_pixel_size(10.0).unwrap();
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let unit = EffectUnit::pixelate(10.0);
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        let subscription = unit.on_source_changed(move |_, _| counter.set(counter.get() + 1));
        assert!(unit.unsubscribe(&subscription));
        assert!(!unit.unsubscribe(&subscription));
        unit.set_pixel_size(3.0).unwrap();
        assert_eq!(count.get(), 0);
        assert_eq!(unit.subscriber_count(), 0);
    }

    #[test]
    fn parameter_on_wrong_kind_is_rejected() {
        let unit = EffectUnit::monochrome();
        let before = unit.current_source();
        let err = unit.set_pixel_size(4.0).unwrap_err();
        assert!(matches!(err, EffectError::UnknownParameter { kind: "monochrome", .. }));
        assert_eq!(unit.current_source(), before);
    }

    #[test]
    fn non_finite_parameter_is_rejected() {
        let unit = EffectUnit::vertical_blur(4.0);
        assert!(matches!(
            unit.set_blur_size(f32::INFINITY),
            Err(EffectError::NonFinite { .. })
        ));
        assert_eq!(unit.kind(), EffectKind::VerticalBlur { size: 4.0 });
    }

    #[test]
    fn load_source_reads_through_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wobble.glsl");
        std::fs::write(&path, EFFECT_INVERT).unwrap();
        let lookup = MapLookup(HashMap::from([("wobble.glsl".to_string(), path)]));

        let unit = EffectUnit::from_file();
        unit.load_source("wobble.glsl", &lookup).unwrap();
        assert_eq!(unit.body(), EFFECT_INVERT);
        assert_eq!(
            unit.kind(),
            EffectKind::File {
                source: "wobble.glsl".into()
            }
        );
    }

    #[test]
    fn missing_source_keeps_previous_body() {
        let unit = EffectUnit::from_file();
        let before = unit.current_source();
        let lookup = MapLookup(HashMap::new());
        let err = unit.load_source("missing.glsl", &lookup).unwrap_err();
        assert!(matches!(err, ResourceError::NotFound(_)));
        assert_eq!(unit.current_source(), before);
        assert_eq!(unit.body(), EFFECT_TRIVIAL);
    }
}
