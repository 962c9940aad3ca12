//! Segmentation output: one `u8` class index per pixel.

use serde::{Deserialize, Serialize};

/// Class indices of a `width × height` area, stored top row first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassMap {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl ClassMap {
    /// Uniform map: every pixel labelled `fill`.
    pub fn new(width: usize, height: usize, fill: u8) -> Self {
        Self { data: vec![fill; width * height], width, height }
    }

    /// Wrap an existing row-major buffer. Returns None if the length does
    /// not match `width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<u8>) -> Option<Self> {
        (data.len() == width * height).then_some(Self { data, width, height })
    }

    /// Build a map by evaluating `f(row, col)` at every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> u8) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for r in 0..height {
            for c in 0..width {
                data.push(f(r, c));
            }
        }
        Self { data, width, height }
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u8 {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: u8) {
        self.data[row * self.width + col] = val;
    }

    #[inline]
    pub fn row(&self, row: usize) -> &[u8] {
        &self.data[row * self.width..(row + 1) * self.width]
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Copy out the `w × h` window whose top-left pixel is `(x, y)`.
    /// Returns None if the window does not fit inside the map.
    pub fn crop(&self, x: usize, y: usize, w: usize, h: usize) -> Option<ClassMap> {
        if x + w > self.width || y + h > self.height {
            return None;
        }
        let mut data = Vec::with_capacity(w * h);
        for r in y..y + h {
            let start = r * self.width + x;
            data.extend_from_slice(&self.data[start..start + w]);
        }
        Some(ClassMap { data, width: w, height: h })
    }

    /// Nearest-neighbour downsample to `floor(width / ratio) × floor(height / ratio)`.
    ///
    /// Destination pixel `d` samples source pixel `floor((d + 0.5) * src / dst)`,
    /// the pixel-centre convention of common imaging libraries. Returns None
    /// when either destination dimension would be zero.
    pub fn downsample_nearest(&self, ratio: usize) -> Option<ClassMap> {
        if ratio == 0 {
            return None;
        }
        let dw = self.width / ratio;
        let dh = self.height / ratio;
        if dw == 0 || dh == 0 {
            return None;
        }
        let sx = self.width as f64 / dw as f64;
        let sy = self.height as f64 / dh as f64;
        let cols: Vec<usize> = (0..dw)
            .map(|c| (((c as f64 + 0.5) * sx) as usize).min(self.width - 1))
            .collect();
        Some(ClassMap::from_fn(dw, dh, |r, c| {
            let src_r = (((r as f64 + 0.5) * sy) as usize).min(self.height - 1);
            self.get(src_r, cols[c])
        }))
    }

    pub fn max_class(&self) -> u8 {
        self.data.iter().copied().max().unwrap_or(0)
    }
}
