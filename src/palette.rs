//! 16-level gray palette for the 4-bit e-paper display
//!
//! Each image gets its own palette, derived with a median cut over its luma
//! histogram. Pixels are mapped to the nearest level without dithering, so
//! identical input always produces identical output.

/// Maximum number of palette entries (4-bit indexed output)
pub const MAX_COLORS: usize = 16;

/// Inclusive range of gray levels covered by one palette entry
#[derive(Debug, Clone, Copy)]
struct LevelBox {
    lo: u8,
    hi: u8,
    count: u64,
}

impl LevelBox {
    fn splittable(&self) -> bool {
        self.lo < self.hi
    }
}

/// Palette of gray levels, sorted ascending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayPalette {
    levels: Vec<u8>,
}

impl GrayPalette {
    /// Build a palette from 8-bit gray pixels
    pub fn from_pixels(pixels: &[u8], max_colors: usize) -> Self {
        let mut histogram = [0u64; 256];
        for &p in pixels {
            histogram[p as usize] += 1;
        }
        Self::from_histogram(&histogram, max_colors)
    }

    /// Median cut over a 256-bin histogram
    pub fn from_histogram(histogram: &[u64; 256], max_colors: usize) -> Self {
        let first = histogram.iter().position(|&c| c > 0);
        let last = histogram.iter().rposition(|&c| c > 0);
        let (Some(first), Some(last)) = (first, last) else {
            return Self { levels: Vec::new() };
        };

        let mut boxes = vec![LevelBox {
            lo: first as u8,
            hi: last as u8,
            count: histogram[first..=last].iter().sum(),
        }];

        while boxes.len() < max_colors.max(1) {
            // Split the most populated box that still spans more than one level
            let candidate = boxes
                .iter()
                .enumerate()
                .filter(|(_, b)| b.splittable())
                .max_by(|(ia, a), (ib, b)| a.count.cmp(&b.count).then(ib.cmp(ia)))
                .map(|(i, _)| i);

            let Some(index) = candidate else {
                break;
            };

            let (left, right) = split_box(histogram, boxes[index]);
            boxes[index] = left;
            boxes.insert(index + 1, right);
        }

        let levels = boxes
            .iter()
            .map(|b| {
                let weighted: u64 = (b.lo..=b.hi)
                    .map(|level| level as u64 * histogram[level as usize])
                    .sum();
                ((weighted as f64) / (b.count as f64)).round() as u8
            })
            .collect();

        Self { levels }
    }

    pub fn levels(&self) -> &[u8] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Index of the palette entry closest to `value` (lowest index on ties)
    #[inline]
    pub fn nearest(&self, value: u8) -> Option<u8> {
        self.levels
            .iter()
            .enumerate()
            .min_by_key(|(i, level)| ((**level as i16 - value as i16).abs(), *i))
            .map(|(i, _)| i as u8)
    }

    /// Index a pure white pixel quantizes to
    pub fn white_index(&self) -> Option<u8> {
        self.nearest(255)
    }

    /// Precomputed gray level -> palette index mapping
    pub fn lookup_table(&self) -> [u8; 256] {
        let mut table = [0u8; 256];
        for (value, slot) in table.iter_mut().enumerate() {
            *slot = self.nearest(value as u8).unwrap_or(0);
        }
        table
    }

    /// PNG PLTE bytes (RGB triplets)
    pub fn png_palette(&self) -> Vec<u8> {
        self.levels.iter().flat_map(|&l| [l, l, l]).collect()
    }
}

/// Split a box at the median pixel, shrinking both halves to occupied levels
fn split_box(histogram: &[u64; 256], b: LevelBox) -> (LevelBox, LevelBox) {
    let mut cumulative = 0u64;
    let mut median = b.lo;
    for level in b.lo..=b.hi {
        cumulative += histogram[level as usize];
        if cumulative * 2 >= b.count {
            median = level;
            break;
        }
    }
    // Both halves must keep at least one level
    if median == b.hi {
        median = b.hi - 1;
    }

    let left_hi = (b.lo..=median)
        .rev()
        .find(|&l| histogram[l as usize] > 0)
        .unwrap_or(b.lo);
    let right_lo = (median + 1..=b.hi)
        .find(|&l| histogram[l as usize] > 0)
        .unwrap_or(b.hi);

    let left = LevelBox {
        lo: b.lo,
        hi: left_hi,
        count: histogram[b.lo as usize..=left_hi as usize].iter().sum(),
    };
    let right = LevelBox {
        lo: right_lo,
        hi: b.hi,
        count: histogram[right_lo as usize..=b.hi as usize].iter().sum(),
    };
    (left, right)
}
