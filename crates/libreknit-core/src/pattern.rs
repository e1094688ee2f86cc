//! Pattern model
//!
//! Turns an indexed-color source bitmap into the per-color bit rows the
//! needle selector works from, and places the pattern on the needle bed
//! according to the alignment policy.
//!
//! The pattern is rebuilt in full whenever the color count, alignment or
//! knit window changes; there is no incremental update path.

use serde::{Deserialize, Serialize};

use crate::engine::Mode;
use crate::machine::Machine;

/// Horizontal placement of the pattern within the knit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    /// Pin the pattern to the left edge of the knit window
    Left,
    /// Center the pattern in the knit window
    Center,
    /// Pin the pattern to the right edge of the knit window
    Right,
}

impl Default for Alignment {
    fn default() -> Self {
        Alignment::Center
    }
}

/// An indexed-color source bitmap: one palette index per pixel, row-major,
/// plus an RGB palette (`0xRRGGBB` per entry).
///
/// Decoding image files into this form is the caller's concern.
#[derive(Debug, Clone)]
pub struct Bitmap {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
    palette: Vec<u32>,
}

impl Bitmap {
    /// Build a bitmap from row-major palette indices.
    ///
    /// Returns `None` when the pixel buffer does not match the dimensions
    /// or a pixel references a missing palette entry.
    pub fn new(width: usize, height: usize, pixels: Vec<u8>, palette: Vec<u32>) -> Option<Self> {
        if width == 0 || height == 0 || pixels.len() != width * height {
            return None;
        }
        if pixels.iter().any(|&p| (p as usize) >= palette.len()) {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
            palette,
        })
    }

    /// Single-color bitmap of the given size, convenient for tests.
    pub fn filled(width: usize, height: usize, index: u8, palette: Vec<u32>) -> Option<Self> {
        Self::new(width, height, vec![index; width * height], palette)
    }

    /// Pixel width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Pixel height.
    pub fn height(&self) -> usize {
        self.height
    }

    fn pixel(&self, col: usize, row: usize) -> u8 {
        self.pixels[row * self.width + col]
    }
}

/// A quantized pattern placed on the needle bed.
#[derive(Debug, Clone)]
pub struct Pattern {
    bitmap: Bitmap,
    mode: Mode,
    num_colors: usize,
    alignment: Alignment,
    machine_width: usize,
    palette: Vec<u32>,
    pattern_expanded: Vec<Vec<bool>>,
    pat_start_needle: i32,
    pat_end_needle: i32,
    knit_start_needle: usize,
    knit_end_needle: usize,
}

impl Pattern {
    /// Quantize `bitmap` down to `num_colors` colors and place it centered
    /// on the bed of `machine`.
    pub fn new(bitmap: Bitmap, machine: Machine, mode: Mode, num_colors: usize) -> Self {
        let mut pattern = Self {
            bitmap,
            mode,
            num_colors: num_colors.clamp(2, 6),
            alignment: Alignment::Center,
            machine_width: machine.width(),
            palette: Vec::new(),
            pattern_expanded: Vec::new(),
            pat_start_needle: -1,
            pat_end_needle: -1,
            knit_start_needle: 0,
            knit_end_needle: machine.width(),
        };
        pattern.rebuild();
        pattern
    }

    /// Set the number of colors to knit (2–6) and re-quantize.
    pub fn set_num_colors(&mut self, num_colors: usize) {
        if (2..=6).contains(&num_colors) {
            self.num_colors = num_colors;
            self.rebuild();
        }
    }

    /// Set the alignment policy and recompute needle placement.
    pub fn set_alignment(&mut self, alignment: Alignment) {
        self.alignment = alignment;
        self.rebuild();
    }

    /// Set the knit window. `start` and `stop` are inclusive needle
    /// positions; values outside `0 <= start < stop < width` leave the
    /// window unchanged.
    pub fn set_knit_needles(&mut self, start: usize, stop: usize) {
        if start < stop && stop < self.machine_width {
            self.knit_start_needle = start;
            self.knit_end_needle = stop + 1;
        }
        self.rebuild();
    }

    fn rebuild(&mut self) {
        self.quantize();
        self.place();
    }

    /// Reduce the bitmap to `num_colors` colors.
    ///
    /// The surviving palette is ordered most-frequent first, except in
    /// single-bed mode where the source order is preserved so that the
    /// yarn-A/yarn-B assignment matches the source image. Pixels of dropped
    /// colors are remapped to the nearest surviving color by RGB distance.
    fn quantize(&mut self) {
        let mut histogram = vec![0usize; self.bitmap.palette.len()];
        for &p in &self.bitmap.pixels {
            histogram[p as usize] += 1;
        }

        // Survivors, at most num_colors of them
        let mut order: Vec<usize> = (0..histogram.len()).collect();
        order.retain(|&i| histogram[i] > 0);
        if self.mode != Mode::Singlebed {
            order.sort_by_key(|&i| (std::cmp::Reverse(histogram[i]), i));
        }
        order.truncate(self.num_colors);

        // Map every source index to a surviving color
        let mut index_map = vec![0u8; histogram.len()];
        for (new, &old) in order.iter().enumerate() {
            index_map[old] = new as u8;
        }
        for old in 0..histogram.len() {
            if !order.contains(&old) {
                index_map[old] = nearest_color(self.bitmap.palette[old], &order, &self.bitmap.palette);
            }
        }

        self.palette = (0..self.num_colors)
            .map(|c| order.get(c).map(|&i| self.bitmap.palette[i]).unwrap_or(0))
            .collect();

        // One bit row per (pattern row, color)
        let width = self.bitmap.width;
        let height = self.bitmap.height;
        self.pattern_expanded = vec![vec![false; width]; self.num_colors * height];
        for row in 0..height {
            for col in 0..width {
                let color = index_map[self.bitmap.pixel(col, row) as usize] as usize;
                self.pattern_expanded[self.num_colors * row + color][col] = true;
            }
        }
    }

    fn place(&mut self) {
        let pat_width = self.bitmap.width as i32;
        match self.alignment {
            Alignment::Center => {
                let needle_width = (self.knit_end_needle - self.knit_start_needle) as i32;
                self.pat_start_needle =
                    self.knit_start_needle as i32 + (needle_width - pat_width + 1).div_euclid(2);
                self.pat_end_needle = self.pat_start_needle + pat_width;
            }
            Alignment::Left => {
                self.pat_start_needle = self.knit_start_needle as i32;
                self.pat_end_needle = self.pat_start_needle + pat_width;
            }
            Alignment::Right => {
                self.pat_end_needle = self.knit_end_needle as i32;
                self.pat_start_needle = self.pat_end_needle - pat_width;
            }
        }
    }

    /// Number of colors the pattern was quantized to.
    pub fn num_colors(&self) -> usize {
        self.num_colors
    }

    /// Current alignment policy.
    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    /// Quantized palette, `0xRRGGBB` per color.
    pub fn palette(&self) -> &[u32] {
        &self.palette
    }

    /// Pattern width in pixels.
    pub fn pat_width(&self) -> usize {
        self.bitmap.width
    }

    /// Pattern height in rows.
    pub fn pat_height(&self) -> usize {
        self.bitmap.height
    }

    /// Needle position of the pattern's left edge. May be negative when
    /// the pattern is wider than the knit window.
    pub fn pat_start_needle(&self) -> i32 {
        self.pat_start_needle
    }

    /// Needle position one past the pattern's right edge.
    pub fn pat_end_needle(&self) -> i32 {
        self.pat_end_needle
    }

    /// First needle of the knit window.
    pub fn knit_start_needle(&self) -> usize {
        self.knit_start_needle
    }

    /// One past the last needle of the knit window.
    pub fn knit_end_needle(&self) -> usize {
        self.knit_end_needle
    }

    /// All expanded bit rows, one per (pattern row, color) pair.
    /// Always exactly `num_colors * pat_height` rows.
    pub fn pattern_expanded(&self) -> &[Vec<bool>] {
        &self.pattern_expanded
    }

    /// One expanded bit row.
    pub fn expanded_row(&self, row_index: usize) -> &[bool] {
        &self.pattern_expanded[row_index]
    }
}

/// Index into `survivors` of the palette color closest to `rgb`.
fn nearest_color(rgb: u32, survivors: &[usize], palette: &[u32]) -> u8 {
    let (r, g, b) = split_rgb(rgb);
    let mut best = 0u8;
    let mut best_dist = u32::MAX;
    for (new, &old) in survivors.iter().enumerate() {
        let (pr, pg, pb) = split_rgb(palette[old]);
        let dist = r.abs_diff(pr) as u32 * r.abs_diff(pr) as u32
            + g.abs_diff(pg) as u32 * g.abs_diff(pg) as u32
            + b.abs_diff(pb) as u32 * b.abs_diff(pb) as u32;
        if dist < best_dist {
            best_dist = dist;
            best = new as u8;
        }
    }
    best
}

fn split_rgb(rgb: u32) -> (u8, u8, u8) {
    ((rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8)
}
