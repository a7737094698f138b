// this_file: src/alpha_consumer.rs
//! Turns per-pixel coverage deltas into a byte mask.
//!
//! The renderer hands over one scanline at a time as a dense array of signed
//! deltas relative to the consumer's origin. The consumer runs a prefix sum,
//! maps each running coverage through a lookup table onto `0..=255` and
//! writes the row. Consumed deltas (and block flags) are zeroed so the
//! renderer can reuse its buffers for the next row without clearing them.

use crate::error::{Error, Result};
use crate::offheap::{GlobalBuffer, OffHeapRegion};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use image::GrayImage;
use log::debug;
use std::path::Path;
use std::sync::OnceLock;

/// Rows at least this wide may use the fast fill
const FAST_FILL_MIN_WIDTH: usize = 32;
/// Rows at least this wide use the wider fast-fill threshold
const FAST_FILL_WIDE_WIDTH: usize = 128;

/// Receiver of the renderer's coverage rows.
///
/// Rows must be delivered in increasing order within one pass. Delta arrays
/// are indexed relative to [`AlphaConsumer::origin_x`]; `pix_from` and
/// `pix_to` are absolute pixel columns.
pub trait AlphaConsumer {
    fn origin_x(&self) -> i32;
    fn origin_y(&self) -> i32;
    fn width(&self) -> usize;
    fn height(&self) -> usize;

    /// Select the lookup table for coverage values in `0..=max_alpha`
    fn set_max_alpha(&mut self, max_alpha: u32) -> Result<()>;

    /// Whether the block-flag variant may be used
    fn supports_block_flags(&self) -> bool {
        false
    }

    /// log2 of the pixel block size the block-flag variant expects
    fn block_size_lg(&self) -> u32;

    /// Zero one scanline
    fn clear_alphas(&mut self, pix_y: i32);

    /// Consume `alpha_deltas` for pixels `[pix_from, pix_to)` of row `pix_y`
    fn set_and_clear_relative_alphas(
        &mut self,
        alpha_deltas: &mut [i32],
        pix_y: i32,
        pix_from: i32,
        pix_to: i32,
    );

    /// Same as [`AlphaConsumer::set_and_clear_relative_alphas`], skipping
    /// blocks whose flag is zero
    fn set_and_clear_relative_alphas_with_flags(
        &mut self,
        block_flags: &mut [i32],
        alpha_deltas: &mut [i32],
        pix_y: i32,
        pix_from: i32,
        pix_to: i32,
    );
}

/// Lookup table entries for coverage values `0..=max_alpha`
pub fn build_alpha_table(max_alpha: u32) -> Result<Vec<u8>> {
    if max_alpha == 0 {
        return Err(Error::Precondition(
            "alpha map needs a max coverage of at least 1".into(),
        ));
    }
    let max = u64::from(max_alpha);
    Ok((0..=max).map(|i| ((i * 255 + max / 2) / max) as u8).collect())
}

static ALPHA_MAPS: OnceLock<DashMap<u32, &'static GlobalBuffer>> = OnceLock::new();

/// Process-wide alpha map for `max_alpha`, built on first use
pub fn alpha_map(max_alpha: u32) -> Result<&'static GlobalBuffer> {
    let maps = ALPHA_MAPS.get_or_init(DashMap::new);
    if let Some(map) = maps.get(&max_alpha) {
        return Ok(*map);
    }
    match maps.entry(max_alpha) {
        Entry::Occupied(entry) => Ok(*entry.get()),
        Entry::Vacant(entry) => {
            let map = GlobalBuffer::leak(&build_alpha_table(max_alpha)?)?;
            debug!("Built alpha map for max coverage {}", max_alpha);
            entry.insert(map);
            Ok(map)
        }
    }
}

#[inline]
fn lookup(map: &[u8], coverage: i32) -> u8 {
    let max = (map.len() - 1) as i32;
    map[coverage.clamp(0, max) as usize]
}

/// Zero the row, then write only pixels with non-zero coverage
fn fill_row_fast(out: &mut [u8], deltas: &[i32], from: usize, to: usize, map: &[u8]) {
    out.fill(0);
    let mut cur = 0i32;
    for i in from..to {
        cur += deltas[i];
        if cur != 0 {
            out[i] = lookup(map, cur);
        }
    }
}

/// Write every pixel of the row
fn fill_row_full(out: &mut [u8], deltas: &[i32], from: usize, to: usize, map: &[u8]) {
    out[..from].fill(0);
    let mut cur = 0i32;
    for i in from..to {
        cur += deltas[i];
        out[i] = lookup(map, cur);
    }
    out[to..].fill(0);
}

/// Zero `[from, to]` of `values`, clamped to its length
#[inline]
fn clear_inclusive(values: &mut [i32], from: usize, to: usize) {
    let end = to.saturating_add(1).min(values.len());
    if from < end {
        values[from..end].fill(0);
    }
}

/// Alpha mask covering a rectangle of the device
pub struct MaskAlphaConsumer {
    x: i32,
    y: i32,
    width: usize,
    height: usize,
    alphas: Vec<u8>,
    block_size_lg: u32,
    use_fast_fill: bool,
    fast_fill_threshold: usize,
    max_alpha: u32,
    alpha_map: &'static GlobalBuffer,
}

impl MaskAlphaConsumer {
    /// Empty mask expecting blocks of `1 << block_size_lg` pixels
    pub fn new(block_size_lg: u32) -> Result<Self> {
        Ok(Self {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            alphas: Vec::new(),
            block_size_lg,
            use_fast_fill: false,
            fast_fill_threshold: 0,
            max_alpha: 1,
            alpha_map: alpha_map(1)?,
        })
    }

    /// Mask sized for the rectangle `(x, y, width, height)`
    pub fn with_bounds(block_size_lg: u32, x: i32, y: i32, width: usize, height: usize) -> Result<Self> {
        let mut mask = Self::new(block_size_lg)?;
        mask.set_bounds(x, y, width, height)?;
        Ok(mask)
    }

    /// Reset the target region. The backing storage is reused when large
    /// enough and every byte is zeroed.
    pub fn set_bounds(&mut self, x: i32, y: i32, width: usize, height: usize) -> Result<()> {
        let len = width.checked_mul(height).ok_or_else(|| {
            Error::InvalidParameter(format!("mask {}x{} is too large", width, height))
        })?;
        if len > self.alphas.len() {
            self.alphas
                .try_reserve_exact(len - self.alphas.len())
                .map_err(|_| Error::OutOfMemory { requested: len })?;
        }
        self.alphas.clear();
        self.alphas.resize(len, 0);
        self.x = x;
        self.y = y;
        self.width = width;
        self.height = height;

        self.use_fast_fill = width >= FAST_FILL_MIN_WIDTH;
        self.fast_fill_threshold = if width >= FAST_FILL_WIDE_WIDTH {
            width >> 1
        } else {
            width >> 2
        };
        Ok(())
    }

    pub fn max_alpha(&self) -> u32 {
        self.max_alpha
    }

    pub fn uses_fast_fill(&self) -> bool {
        self.use_fast_fill
    }

    /// Spans narrower than this take the fast fill
    pub fn fast_fill_threshold(&self) -> usize {
        self.fast_fill_threshold
    }

    /// Mask bytes, row-major, `width * height` long
    pub fn alphas(&self) -> &[u8] {
        &self.alphas
    }

    /// Bytes of mask row `row` (relative to the origin)
    pub fn row(&self, row: usize) -> &[u8] {
        let off = row * self.width;
        &self.alphas[off..off + self.width]
    }

    pub fn into_alphas(self) -> Vec<u8> {
        self.alphas
    }

    /// Number of non-zero mask bytes
    pub fn coverage_count(&self) -> usize {
        self.alphas.iter().filter(|&&a| a != 0).count()
    }

    pub fn to_gray_image(&self) -> Result<GrayImage> {
        GrayImage::from_raw(self.width as u32, self.height as u32, self.alphas.clone())
            .ok_or_else(|| Error::Image(format!("{}x{} mask has no pixels", self.width, self.height)))
    }

    /// Write the mask as an image; the format follows the extension
    /// (`.png` or `.pgm`)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let is_pgm = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case("pgm"));
        if is_pgm {
            std::fs::write(path, self.to_pgm())?;
            return Ok(());
        }
        self.to_gray_image()?
            .save(path)
            .map_err(|e| Error::Image(format!("{}: {}", path.display(), e)))
    }

    /// Binary PGM (P5) encoding of the mask
    pub fn to_pgm(&self) -> Vec<u8> {
        let header = format!("P5\n{} {}\n255\n", self.width, self.height);
        let mut out = Vec::with_capacity(header.len() + self.alphas.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.alphas);
        out
    }

    fn row_offset(&self, pix_y: i32) -> usize {
        debug_assert!(pix_y >= self.y && ((pix_y - self.y) as usize) < self.height);
        (pix_y - self.y) as usize * self.width
    }

    /// Relative `(from, to, ato)` where `ato` is `to` clamped to the width
    fn relative_span(&self, pix_from: i32, pix_to: i32) -> (usize, usize, usize) {
        let from = (pix_from - self.x).max(0) as usize;
        let to = (pix_to - self.x).max(0) as usize;
        (from, to, to.min(self.width))
    }
}

impl AlphaConsumer for MaskAlphaConsumer {
    fn origin_x(&self) -> i32 {
        self.x
    }

    fn origin_y(&self) -> i32 {
        self.y
    }

    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn set_max_alpha(&mut self, max_alpha: u32) -> Result<()> {
        if max_alpha != self.max_alpha {
            self.alpha_map = alpha_map(max_alpha)?;
            self.max_alpha = max_alpha;
        }
        Ok(())
    }

    fn supports_block_flags(&self) -> bool {
        true
    }

    fn block_size_lg(&self) -> u32 {
        self.block_size_lg
    }

    fn clear_alphas(&mut self, pix_y: i32) {
        let off = self.row_offset(pix_y);
        self.alphas[off..off + self.width].fill(0);
    }

    fn set_and_clear_relative_alphas(
        &mut self,
        alpha_deltas: &mut [i32],
        pix_y: i32,
        pix_from: i32,
        pix_to: i32,
    ) {
        let off = self.row_offset(pix_y);
        let (from, to, ato) = self.relative_span(pix_from, pix_to);
        let map = self.alpha_map.as_bytes();
        let out = &mut self.alphas[off..off + self.width];

        if from >= ato {
            out.fill(0);
        } else if self.use_fast_fill && ato - from < self.fast_fill_threshold {
            fill_row_fast(out, alpha_deltas, from, ato, map);
        } else {
            fill_row_full(out, alpha_deltas, from, ato, map);
        }
        // the closing delta sits at `to`
        clear_inclusive(alpha_deltas, from, to);
    }

    fn set_and_clear_relative_alphas_with_flags(
        &mut self,
        block_flags: &mut [i32],
        alpha_deltas: &mut [i32],
        pix_y: i32,
        pix_from: i32,
        pix_to: i32,
    ) {
        let lg = self.block_size_lg;
        let off = self.row_offset(pix_y);
        let (from, to, ato) = self.relative_span(pix_from, pix_to);
        // no delta lies past the end of the line
        let to = to.min(alpha_deltas.len().saturating_sub(1));
        let map = self.alpha_map.as_bytes();
        let out = &mut self.alphas[off..off + self.width];

        let from_bk = from >> lg;
        // one slot past the block holding the closing delta
        let last_bk = ((to >> lg) + 1).min(block_flags.len() - 1);
        block_flags[last_bk] = 0;

        if from >= ato {
            out.fill(0);
            clear_inclusive(alpha_deltas, from, to);
            if from_bk < last_bk {
                block_flags[from_bk..last_bk].fill(0);
            }
            return;
        }
        out[..from].fill(0);

        let mut cur = 0i32;
        // next pixel still to be written
        let mut px = from;
        let mut dirty_start = None;
        for t in from_bk..=last_bk {
            if block_flags[t] != 0 {
                block_flags[t] = 0;
                dirty_start.get_or_insert(t);
                continue;
            }
            let Some(start_bk) = dirty_start.take() else {
                continue;
            };
            // flush: run of unchanged coverage, then the dirty blocks
            let start = (start_bk << lg).max(from);
            let end = (t << lg).min(alpha_deltas.len());
            if px < start.min(ato) {
                out[px..start.min(ato)].fill(lookup(map, cur));
            }
            for i in start..end {
                let delta = alpha_deltas[i];
                if delta != 0 {
                    alpha_deltas[i] = 0;
                    cur += delta;
                }
                if i < ato {
                    out[i] = lookup(map, cur);
                }
            }
            px = px.max(end.min(ato));
        }
        if px < ato {
            out[px..ato].fill(lookup(map, cur));
        }
        out[ato..].fill(0);
        clear_inclusive(alpha_deltas, ato, to);
    }
}

impl std::fmt::Debug for MaskAlphaConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaskAlphaConsumer")
            .field("x", &self.x)
            .field("y", &self.y)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("max_alpha", &self.max_alpha)
            .field("block_size_lg", &self.block_size_lg)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn alpha_table_endpoints() {
        let table = build_alpha_table(64).unwrap();
        assert_eq!(table.len(), 65);
        assert_eq!(table[0], 0);
        assert_eq!(table[64], 255);
        assert_eq!(table[32], 128);
        assert_eq!(build_alpha_table(1).unwrap(), vec![0, 255]);
        assert!(build_alpha_table(0).is_err());
    }

    #[test]
    fn alpha_maps_are_shared() {
        let a = alpha_map(2048).unwrap();
        let b = alpha_map(2048).unwrap();
        assert!(std::ptr::eq(a, b));
        assert_eq!(a.length(), 2049);
        assert_eq!(a.get_byte(2048), 255);
    }

    #[test]
    fn example_row_64_by_4() {
        let mut mask = MaskAlphaConsumer::with_bounds(5, 0, 0, 64, 4).unwrap();
        mask.set_max_alpha(12).unwrap();
        mask.clear_alphas(0);
        let mut deltas = vec![0i32; 66];
        deltas[10] = 12;
        deltas[40] = -12;
        mask.set_and_clear_relative_alphas(&mut deltas, 0, 0, 64);

        let row = mask.row(0);
        assert!(row[..10].iter().all(|&a| a == 0));
        assert!(row[10..40].iter().all(|&a| a == 255));
        assert!(row[40..].iter().all(|&a| a == 0));
        assert!(deltas.iter().all(|&d| d == 0));
        assert!(mask.row(1).iter().all(|&a| a == 0));
    }

    #[test]
    fn fast_fill_threshold_follows_width() {
        let mut mask = MaskAlphaConsumer::new(5).unwrap();
        mask.set_bounds(0, 0, 16, 1).unwrap();
        assert!(!mask.uses_fast_fill());
        mask.set_bounds(0, 0, 64, 1).unwrap();
        assert!(mask.uses_fast_fill());
        assert_eq!(mask.fast_fill_threshold(), 16);
        mask.set_bounds(0, 0, 256, 1).unwrap();
        assert_eq!(mask.fast_fill_threshold(), 128);
    }

    #[test]
    fn fast_and_full_fill_agree() {
        let mut rng = StdRng::seed_from_u64(7);
        let map = build_alpha_table(16).unwrap();
        for _ in 0..500 {
            let width = rng.random_range(1..200usize);
            let from = rng.random_range(0..width);
            let to = rng.random_range(from..=width);
            let mut deltas = vec![0i32; width + 2];
            for d in deltas[from..to].iter_mut() {
                if rng.random_bool(0.3) {
                    *d = rng.random_range(-16..=16);
                }
            }
            let mut fast = vec![0xAAu8; width];
            let mut full = vec![0x55u8; width];
            fill_row_fast(&mut fast, &deltas, from, to, &map);
            fill_row_full(&mut full, &deltas, from, to, &map);
            assert_eq!(fast, full);
        }
    }

    #[test]
    fn out_of_range_coverage_saturates() {
        let map = build_alpha_table(4).unwrap();
        assert_eq!(lookup(&map, -3), 0);
        assert_eq!(lookup(&map, 9), 255);
    }

    #[test]
    fn span_past_width_is_clamped() {
        let mut mask = MaskAlphaConsumer::with_bounds(2, 10, 0, 8, 1).unwrap();
        let mut deltas = vec![0i32; 14];
        deltas[4] = 1;
        deltas[12] = -1;
        mask.set_and_clear_relative_alphas(&mut deltas, 0, 10, 22);
        assert_eq!(mask.row(0), &[0, 0, 0, 0, 255, 255, 255, 255]);
        assert!(deltas.iter().all(|&d| d == 0));
    }

    #[test]
    fn flagged_span_past_width_is_clamped() {
        let mut dense = MaskAlphaConsumer::with_bounds(2, 0, 0, 32, 1).unwrap();
        let mut flagged = MaskAlphaConsumer::with_bounds(2, 0, 0, 32, 1).unwrap();
        dense.set_max_alpha(4).unwrap();
        flagged.set_max_alpha(4).unwrap();
        let mut dense_deltas = vec![0i32; 34];
        dense_deltas[4] = 4;
        let mut deltas = dense_deltas.clone();
        let mut flags = vec![0i32; 10];
        flags[1] = 1;

        dense.set_and_clear_relative_alphas(&mut dense_deltas, 0, 0, 64);
        flagged.set_and_clear_relative_alphas_with_flags(&mut flags, &mut deltas, 0, 0, 64);

        let row = flagged.row(0);
        assert!(row[..4].iter().all(|&a| a == 0));
        assert!(row[4..].iter().all(|&a| a == 255));
        assert_eq!(dense.row(0), row);
        assert!(deltas.iter().all(|&d| d == 0));
        assert!(flags.iter().all(|&f| f == 0));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn oversized_mask_is_refused() {
        let mut mask = MaskAlphaConsumer::with_bounds(5, 0, 0, 8, 8).unwrap();
        let err = mask.set_bounds(0, 0, 1 << 32, 1 << 31).unwrap_err();
        assert!(matches!(err, Error::OutOfMemory { requested } if requested == 1 << 63));
        // the previous region is untouched and the mask stays usable
        assert_eq!(mask.width(), 8);
        assert_eq!(mask.row(7).len(), 8);
        mask.set_bounds(0, 0, 4, 4).unwrap();
        assert_eq!(mask.into_alphas().len(), 16);
    }

    #[test]
    fn block_flags_skip_clean_blocks() {
        let mut mask = MaskAlphaConsumer::with_bounds(2, 0, 0, 32, 1).unwrap();
        mask.set_max_alpha(4).unwrap();
        let mut deltas = vec![0i32; 34];
        let mut flags = vec![0i32; 10];
        deltas[3] = 4;
        flags[0] = 1;
        deltas[21] = -4;
        flags[5] = 1;
        mask.set_and_clear_relative_alphas_with_flags(&mut flags, &mut deltas, 0, 0, 32);

        let row = mask.row(0);
        assert!(row[..3].iter().all(|&a| a == 0));
        assert!(row[3..21].iter().all(|&a| a == 255));
        assert!(row[21..].iter().all(|&a| a == 0));
        assert!(deltas.iter().all(|&d| d == 0));
        assert!(flags.iter().all(|&f| f == 0));
    }

    #[test]
    fn rewriting_rows_is_idempotent() {
        let mut mask = MaskAlphaConsumer::with_bounds(5, 0, 0, 40, 2).unwrap();
        mask.set_max_alpha(2).unwrap();
        for _ in 0..2 {
            for y in 0..2 {
                let mut deltas = vec![0i32; 42];
                deltas[5] = 1;
                deltas[30] = -1;
                mask.set_and_clear_relative_alphas(&mut deltas, y, 0, 40);
            }
        }
        let expected: Vec<u8> = (0..40)
            .map(|i| if (5..30).contains(&i) { 128 } else { 0 })
            .collect();
        assert_eq!(mask.row(0), &expected[..]);
        assert_eq!(mask.row(1), &expected[..]);
    }

    #[test]
    fn pgm_encoding_has_header() {
        let mask = MaskAlphaConsumer::with_bounds(5, 0, 0, 3, 2).unwrap();
        let pgm = mask.to_pgm();
        assert!(pgm.starts_with(b"P5\n3 2\n255\n"));
        assert_eq!(pgm.len(), 11 + 6);
    }
}
