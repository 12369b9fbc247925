use crate::error::GeometryError;

/// Largest edge length accepted for an off-screen buffer.
pub const MAX_DIMENSION: u32 = 16384;

/// Physical size of a render target in pixels.
///
/// A `Size` is never zero in either dimension; non-positive requests are
/// rejected before they can reach the GPU layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    width: u32,
    height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Result<Self, GeometryError> {
        if width == 0 || height == 0 {
            return Err(GeometryError::NonPositive {
                width: width as f64,
                height: height as f64,
            });
        }
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(GeometryError::TooLarge {
                width,
                height,
                max: MAX_DIMENSION,
            });
        }
        Ok(Self { width, height })
    }

    /// Converts a layout size (possibly fractional) into whole pixels.
    ///
    /// Fractional sizes round up so content is never clipped; zero, negative,
    /// and non-finite sizes are rejected.
    pub fn from_logical(width: f32, height: f32) -> Result<Self, GeometryError> {
        let valid = |value: f32| value.is_finite() && value > 0.0;
        if !valid(width) || !valid(height) {
            return Err(GeometryError::NonPositive {
                width: width as f64,
                height: height as f64,
            });
        }
        let clamp = |value: f32| value.ceil().min(u32::MAX as f32) as u32;
        Self::new(clamp(width), clamp(height))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_vec2(&self) -> [f32; 2] {
        [self.width as f32, self.height as f32]
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Axis-aligned rectangle in pixels, origin at the bottom-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle covering a whole target of `size`.
    pub fn covering(size: Size) -> Self {
        Self::new(0.0, 0.0, size.width() as f32, size.height() as f32)
    }

    pub fn translated(&self, dx: f32, dy: f32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    pub fn as_array(&self) -> [f32; 4] {
        [self.x, self.y, self.width, self.height]
    }
}

/// Straight RGBA color with components in `0.0..=1.0`.
pub type Color = [f32; 4];

pub const WHITE: Color = [1.0, 1.0, 1.0, 1.0];
pub const BLACK: Color = [0.0, 0.0, 0.0, 1.0];
pub const TRANSPARENT: Color = [0.0, 0.0, 0.0, 0.0];

/// Shader compilation backend requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderCompiler {
    /// Compile assembled GLSL through shaderc into SPIR-V.
    Shaderc,
    /// Hand GLSL to naga's built-in frontend.
    NagaGlsl,
}

impl Default for ShaderCompiler {
    fn default() -> Self {
        if cfg!(feature = "shaderc") {
            ShaderCompiler::Shaderc
        } else {
            ShaderCompiler::NagaGlsl
        }
    }
}

impl std::fmt::Display for ShaderCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShaderCompiler::Shaderc => f.write_str("shaderc"),
            ShaderCompiler::NagaGlsl => f.write_str("naga"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_size_is_rejected() {
        assert!(matches!(
            Size::new(0, 10),
            Err(GeometryError::NonPositive { .. })
        ));
        assert!(Size::new(10, 0).is_err());
    }

    #[test]
    fn oversized_dimension_is_rejected() {
        assert!(matches!(
            Size::new(MAX_DIMENSION + 1, 4),
            Err(GeometryError::TooLarge { .. })
        ));
    }

    #[test]
    fn logical_sizes_round_up() {
        let size = Size::from_logical(99.2, 100.0).unwrap();
        assert_eq!((size.width(), size.height()), (100, 100));
    }

    #[test]
    fn negative_and_nan_logical_sizes_are_rejected() {
        assert!(Size::from_logical(-1.0, 10.0).is_err());
        assert!(Size::from_logical(10.0, f32::NAN).is_err());
        assert!(Size::from_logical(0.0, 0.0).is_err());
    }
}
