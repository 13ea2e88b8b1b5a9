//! Projection of scene fixtures onto terminal cells.

use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::Color;
use std::collections::BTreeMap;

use super::ViewState;
use crate::color::Rgb;
use crate::scene::{Fixture, Scene};

const LIT: char = '●';
const DARK: char = '·';
const CENTER: char = '+';

/// Maps scene coordinates into a terminal area.
#[derive(Debug, Clone, Copy)]
pub struct Projection {
    area: Rect,
    scale_x: f32,
    scale_y: f32,
}

impl Projection {
    pub fn new(extents: (u32, u32), area: Rect) -> Self {
        let (width, height) = (extents.0.max(1) as f32, extents.1.max(1) as f32);
        Self {
            area,
            scale_x: area.width.saturating_sub(1) as f32 / width,
            scale_y: area.height.saturating_sub(1) as f32 / height,
        }
    }

    /// Terminal cell for a scene point, `None` if it falls outside the area.
    pub fn cell(&self, x: f32, y: f32) -> Option<(u16, u16)> {
        if x < 0.0 || y < 0.0 {
            return None;
        }
        let cx = (x * self.scale_x).round() as u16;
        let cy = (y * self.scale_y).round() as u16;
        if cx >= self.area.width || cy >= self.area.height {
            return None;
        }
        Some((self.area.x + cx, self.area.y + cy))
    }
}

/// Scene position of pixel `index`, spread evenly from `pos1` to `pos2`.
pub fn pixel_position(fixture: &Fixture, index: usize) -> (f32, f32) {
    let [x1, y1] = fixture.pos1;
    let [x2, y2] = fixture.pos2;
    let t = if fixture.pixels > 1 {
        index as f32 / (fixture.pixels - 1) as f32
    } else {
        0.0
    };
    let (x1, y1, x2, y2) = (x1 as f32, y1 as f32, x2 as f32, y2 as f32);
    (x1 + (x2 - x1) * t, y1 + (y2 - y1) * t)
}

/// Draw every fixture using one snapshot per strand.
pub fn draw_scene(
    buf: &mut Buffer,
    area: Rect,
    scene: &Scene,
    strands: &BTreeMap<u8, Vec<Rgb>>,
    view: &ViewState,
) {
    let projection = Projection::new(scene.extents(), area);

    // Drawn first so fixtures passing through the middle stay visible
    if view.show_center {
        let (x, y) = scene.center();
        if let Some(cell) = projection.cell(x, y).and_then(|pos| buf.cell_mut(pos)) {
            cell.set_char(CENTER);
            cell.set_fg(Color::Yellow);
        }
    }

    for fixture in scene.fixtures() {
        let pixels = strands.get(&fixture.strand).map(Vec::as_slice).unwrap_or(&[]);

        for i in 0..fixture.pixels as usize {
            let (x, y) = pixel_position(fixture, i);
            let Some(pos) = projection.cell(x, y) else {
                continue;
            };
            let color = pixels
                .get(fixture.address as usize + i)
                .copied()
                .unwrap_or_default();

            if let Some(cell) = buf.cell_mut(pos) {
                if color.is_black() {
                    cell.set_char(DARK);
                    cell.set_fg(Color::DarkGray);
                } else {
                    cell.set_char(LIT);
                    cell.set_fg(color.into());
                }
            }
        }

        if view.show_labels {
            draw_label(buf, area, &projection, fixture);
        }
    }
}

fn draw_label(buf: &mut Buffer, area: Rect, projection: &Projection, fixture: &Fixture) {
    let (x, y) = pixel_position(fixture, 0);
    let Some((cx, cy)) = projection.cell(x, y) else {
        return;
    };
    // Above the first pixel, or below it on the top row
    let row = if cy > area.y { cy - 1 } else { cy + 1 };
    if row >= area.y + area.height {
        return;
    }

    let label = format!("{}:{}", fixture.strand, fixture.address);
    for (i, ch) in label.chars().enumerate() {
        let col = cx + i as u16;
        if col >= area.x + area.width {
            break;
        }
        if let Some(cell) = buf.cell_mut((col, row)) {
            cell.set_char(ch);
            cell.set_fg(Color::Gray);
        }
    }
}
