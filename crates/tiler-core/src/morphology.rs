//! Grey-level morphological denoising of class maps.
//!
//! Opening (erode then dilate) removes isolated specks smaller than the
//! structuring element; closing (dilate then erode) fills small holes.
//! Pixels outside the map never win a min or a max, so the map edge neither
//! grows nor shrinks regions.

use crate::class_map::ClassMap;

/// Elliptical structuring element stored as one horizontal span per row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuringElement {
    size: usize,
    /// `half_widths[i]` is the horizontal reach of row `i - size / 2`.
    half_widths: Vec<usize>,
}

impl StructuringElement {
    /// Ellipse inscribed in a `size × size` square. `size` must be odd.
    pub fn ellipse(size: usize) -> Self {
        let r = (size / 2) as f64;
        let half_widths = (0..size)
            .map(|i| {
                let dy = i as f64 - r;
                if r == 0.0 {
                    0
                } else {
                    ((r * r - dy * dy).max(0.0).sqrt()).round() as usize
                }
            })
            .collect();
        Self { size, half_widths }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn radius(&self) -> usize {
        self.size / 2
    }

    /// Whether `(dy, dx)` relative to the centre belongs to the element.
    pub fn contains(&self, dy: isize, dx: isize) -> bool {
        let r = self.radius() as isize;
        if dy < -r || dy > r {
            return false;
        }
        dx.unsigned_abs() <= self.half_widths[(dy + r) as usize]
    }
}

#[derive(Clone, Copy)]
enum Extremum {
    Min,
    Max,
}

fn filter(map: &ClassMap, se: &StructuringElement, op: Extremum) -> ClassMap {
    let r = se.radius() as isize;
    let (w, h) = (map.width as isize, map.height as isize);
    ClassMap::from_fn(map.width, map.height, |row, col| {
        let (row, col) = (row as isize, col as isize);
        let mut acc = map.get(row as usize, col as usize);
        for dy in -r..=r {
            let y = row + dy;
            if y < 0 || y >= h {
                continue;
            }
            let reach = se.half_widths[(dy + r) as usize] as isize;
            let x0 = (col - reach).max(0) as usize;
            let x1 = (col + reach).min(w - 1) as usize;
            let span = &map.row(y as usize)[x0..=x1];
            acc = match op {
                Extremum::Min => span.iter().copied().fold(acc, u8::min),
                Extremum::Max => span.iter().copied().fold(acc, u8::max),
            };
        }
        acc
    })
}

pub fn erode(map: &ClassMap, se: &StructuringElement) -> ClassMap {
    filter(map, se, Extremum::Min)
}

pub fn dilate(map: &ClassMap, se: &StructuringElement) -> ClassMap {
    filter(map, se, Extremum::Max)
}

pub fn open(map: &ClassMap, se: &StructuringElement) -> ClassMap {
    dilate(&erode(map, se), se)
}

pub fn close(map: &ClassMap, se: &StructuringElement) -> ClassMap {
    erode(&dilate(map, se), se)
}

/// Opening followed by closing, applied to each trimmed tile when
/// post-processing is enabled.
#[derive(Debug, Clone)]
pub struct Denoiser {
    element: StructuringElement,
}

impl Denoiser {
    pub fn new(kernel_size: usize) -> Self {
        Self { element: StructuringElement::ellipse(kernel_size) }
    }

    pub fn kernel_size(&self) -> usize {
        self.element.size()
    }

    pub fn apply(&self, map: &ClassMap) -> ClassMap {
        close(&open(map, &self.element), &self.element)
    }
}
