//! Frame annotation for the operator preview.
//!
//! Draws detection boxes and name labels directly into the grayscale buffer.
//! Text uses a built-in 3x5 glyph set (A–Z, 0–9) scaled up 2x; characters
//! outside the set render as a hollow box.

use crate::frame::Frame;

const BOX_THICKNESS: u32 = 2;
const GLYPH_SCALE: u32 = 2;
const GLYPH_W: u32 = 3;
const GLYPH_H: u32 = 5;
/// Horizontal gap between glyphs, in unscaled pixels.
const GLYPH_GAP: u32 = 1;
const INK: u8 = 255;
const BACKING: u8 = 0;

/// Draw a box outline plus the matched name above it.
pub fn annotate_match(frame: &mut Frame, x: f32, y: f32, width: f32, height: f32, name: &str) {
    let (x0, y0, w, h) = clamp_region(frame, x, y, width, height);
    draw_box(frame, x0, y0, w, h);

    let label_h = GLYPH_H * GLYPH_SCALE + 4;
    let label_y = y0.saturating_sub(label_h + 2);
    draw_label(frame, x0, label_y, name);
}

fn clamp_region(frame: &Frame, x: f32, y: f32, width: f32, height: f32) -> (u32, u32, u32, u32) {
    let fw = frame.width;
    let fh = frame.height;
    let x0 = (x.max(0.0) as u32).min(fw.saturating_sub(1));
    let y0 = (y.max(0.0) as u32).min(fh.saturating_sub(1));
    let w = (width.max(1.0) as u32).min(fw - x0);
    let h = (height.max(1.0) as u32).min(fh - y0);
    (x0, y0, w, h)
}

/// Draw a rectangle outline, `BOX_THICKNESS` pixels thick.
pub fn draw_box(frame: &mut Frame, x: u32, y: u32, width: u32, height: u32) {
    for t in 0..BOX_THICKNESS {
        // Horizontal edges
        for px in x..x + width {
            put_pixel(frame, px, y + t, INK);
            put_pixel(frame, px, (y + height).saturating_sub(1 + t), INK);
        }
        // Vertical edges
        for py in y..y + height {
            put_pixel(frame, x + t, py, INK);
            put_pixel(frame, (x + width).saturating_sub(1 + t), py, INK);
        }
    }
}

/// Render `text` at (x, y) on a dark backing strip for contrast.
pub fn draw_label(frame: &mut Frame, x: u32, y: u32, text: &str) {
    let advance = (GLYPH_W + GLYPH_GAP) * GLYPH_SCALE;
    let strip_w = advance * text.chars().count() as u32 + 4;
    let strip_h = GLYPH_H * GLYPH_SCALE + 4;

    for py in y..y + strip_h {
        for px in x..x + strip_w {
            put_pixel(frame, px, py, BACKING);
        }
    }

    let mut cx = x + 2;
    for ch in text.chars() {
        draw_glyph(frame, cx, y + 2, ch);
        cx += advance;
    }
}

fn draw_glyph(frame: &mut Frame, x: u32, y: u32, ch: char) {
    let rows = glyph_rows(ch);
    for (gy, row) in rows.iter().enumerate() {
        for gx in 0..GLYPH_W {
            if row & (0b100 >> gx) == 0 {
                continue;
            }
            // Scale each glyph pixel to a GLYPH_SCALE square
            for sy in 0..GLYPH_SCALE {
                for sx in 0..GLYPH_SCALE {
                    put_pixel(
                        frame,
                        x + gx * GLYPH_SCALE + sx,
                        y + gy as u32 * GLYPH_SCALE + sy,
                        INK,
                    );
                }
            }
        }
    }
}

fn put_pixel(frame: &mut Frame, x: u32, y: u32, value: u8) {
    if x < frame.width && y < frame.height {
        frame.data[(y * frame.width + x) as usize] = value;
    }
}

/// 3x5 glyph rows, top to bottom, 3 bits per row (MSB = left column).
/// Lowercase folds to uppercase; anything else renders as a hollow box.
fn glyph_rows(ch: char) -> [u8; 5] {
    match ch.to_ascii_uppercase() {
        'A' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'B' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'C' => [0b011, 0b100, 0b100, 0b100, 0b011],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'F' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'G' => [0b011, 0b100, 0b101, 0b101, 0b011],
        'H' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'J' => [0b001, 0b001, 0b001, 0b101, 0b010],
        'K' => [0b101, 0b110, 0b100, 0b110, 0b101],
        'L' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'M' => [0b101, 0b111, 0b111, 0b101, 0b101],
        'N' => [0b101, 0b111, 0b111, 0b111, 0b101],
        'O' => [0b010, 0b101, 0b101, 0b101, 0b010],
        'P' => [0b110, 0b101, 0b110, 0b100, 0b100],
        'Q' => [0b010, 0b101, 0b101, 0b110, 0b011],
        'R' => [0b110, 0b101, 0b110, 0b110, 0b101],
        'S' => [0b011, 0b100, 0b010, 0b001, 0b110],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'U' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'V' => [0b101, 0b101, 0b101, 0b101, 0b010],
        'W' => [0b101, 0b101, 0b111, 0b111, 0b101],
        'X' => [0b101, 0b101, 0b010, 0b101, 0b101],
        'Y' => [0b101, 0b101, 0b010, 0b010, 0b010],
        'Z' => [0b111, 0b001, 0b010, 0b100, 0b111],
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b011, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        '_' => [0b000, 0b000, 0b000, 0b000, 0b111],
        ' ' => [0b000; 5],
        _ => [0b111, 0b101, 0b101, 0b101, 0b111],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32, fill: u8) -> Frame {
        Frame {
            data: vec![fill; (width * height) as usize],
            width,
            height,
            sequence: 0,
        }
    }

    #[test]
    fn test_draw_box_marks_corners() {
        let mut f = frame(32, 32, 50);
        draw_box(&mut f, 4, 4, 20, 20);
        assert_eq!(f.data[(4 * 32 + 4) as usize], INK); // top-left
        assert_eq!(f.data[(4 * 32 + 23) as usize], INK); // top-right
        assert_eq!(f.data[(23 * 32 + 4) as usize], INK); // bottom-left
        // Interior untouched
        assert_eq!(f.data[(14 * 32 + 14) as usize], 50);
    }

    #[test]
    fn test_annotate_out_of_bounds_region_is_clamped() {
        let mut f = frame(16, 16, 50);
        // Region larger than the frame must not panic or write out of bounds
        annotate_match(&mut f, -10.0, -10.0, 100.0, 100.0, "alice");
        assert_eq!(f.data.len(), 16 * 16);
    }

    #[test]
    fn test_draw_label_writes_ink_and_backing() {
        let mut f = frame(64, 16, 50);
        draw_label(&mut f, 0, 0, "A");
        assert!(f.data.contains(&INK));
        assert!(f.data.contains(&BACKING));
    }

    #[test]
    fn test_label_clipped_at_frame_edge() {
        let mut f = frame(8, 8, 50);
        // Long label on a tiny frame: must clip, not panic
        draw_label(&mut f, 0, 0, "wilhelmina");
    }
}
