//! Built-in content drawn beneath the effect chain.

use std::rc::Rc;

use fxchain::{BackendError, Canvas, Child, Color, Rect, Size, SolidRect};

/// A grid of alternating cells.
#[derive(Debug, Clone, Copy)]
pub struct Checker {
    pub rect: Rect,
    pub cells: u32,
    pub even: Color,
    pub odd: Color,
}

impl Child for Checker {
    fn draw(&self, canvas: &mut Canvas<'_>) -> Result<(), BackendError> {
        let cells = self.cells.max(1);
        let cell_w = self.rect.width / cells as f32;
        let cell_h = self.rect.height / cells as f32;
        for row in 0..cells {
            for column in 0..cells {
                let color = if (row + column) % 2 == 0 {
                    self.even
                } else {
                    self.odd
                };
                let cell = Rect::new(
                    self.rect.x + column as f32 * cell_w,
                    self.rect.y + row as f32 * cell_h,
                    cell_w,
                    cell_h,
                );
                canvas.fill_rect(cell, color)?;
            }
        }
        Ok(())
    }
}

/// Colour bars across the bottom half and a checker in the top right,
/// placed relative to a widget at `position`.
pub fn demo_scene(position: [f32; 2], size: Size) -> Vec<Rc<dyn Child>> {
    let [x, y] = position;
    let (width, height) = (size.width() as f32, size.height() as f32);
    const BARS: [Color; 6] = [
        [1.0, 0.2, 0.2, 1.0],
        [1.0, 0.7, 0.1, 1.0],
        [0.9, 0.9, 0.2, 1.0],
        [0.2, 0.8, 0.3, 1.0],
        [0.2, 0.5, 1.0, 1.0],
        [0.6, 0.3, 0.9, 1.0],
    ];

    let bar_width = width / BARS.len() as f32;
    let mut children: Vec<Rc<dyn Child>> = BARS
        .iter()
        .enumerate()
        .map(|(index, color)| {
            Rc::new(SolidRect {
                rect: Rect::new(x + index as f32 * bar_width, y, bar_width, height * 0.5),
                color: *color,
            }) as Rc<dyn Child>
        })
        .collect();

    let side = (width.min(height) * 0.4).floor();
    children.push(Rc::new(Checker {
        rect: Rect::new(x + width - side - 16.0, y + height - side - 16.0, side, side),
        cells: 8,
        even: [1.0, 1.0, 1.0, 1.0],
        odd: [0.1, 0.1, 0.1, 1.0],
    }));
    children
}
