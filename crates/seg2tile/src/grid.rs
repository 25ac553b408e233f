//! Uniform tile grid over a rectangular extent.
//!
//! Boundaries are generated independently per axis and combined with X
//! outermost, Y innermost; that traversal order is stable and is what
//! sequential tile IDs are derived from.

use crate::extent::Extent;

/// One grid cell plus whether it is the final interval on each axis (the
/// final interval owns its upper boundary, see `tiler::in_tile`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridTile {
    pub extent: Extent,
    pub last_col: bool,
    pub last_row: bool,
}

/// 1-D tile boundary markers from `min` to the end of the last tile.
///
/// Markers start at `min` and step by `step` while strictly below `max`.
/// With `padding` the final marker is one full step past the last start, so
/// every tile has the same length and the trailing tile may extend past
/// `max`; without it the final marker is clamped to `max` and the trailing
/// tile is shorter. Marker positions are computed as `min + k*step` so the
/// sequence is reproducible bit-for-bit.
pub fn tile_boundaries(min: f64, max: f64, step: f64, padding: bool) -> Vec<f64> {
    debug_assert!(step > 0.0);
    debug_assert!(max > min);

    let mut marks = Vec::new();
    let mut k = 0u32;
    loop {
        let b = min + f64::from(k) * step;
        if b >= max {
            break;
        }
        marks.push(b);
        k += 1;
    }

    // max > min guarantees at least the `min` marker.
    let last = *marks.last().expect("extent is non-degenerate");
    marks.push(if padding { last + step } else { max });
    marks
}

/// The full tile grid for `extent` in traversal order (X outer, Y inner).
pub fn tile_grid(extent: &Extent, step_x: f64, step_y: f64, padding: bool) -> Vec<GridTile> {
    let xb = tile_boundaries(extent.min_x, extent.max_x, step_x, padding);
    let yb = tile_boundaries(extent.min_y, extent.max_y, step_y, padding);
    let nx = xb.len() - 1;
    let ny = yb.len() - 1;

    let mut tiles = Vec::with_capacity(nx * ny);
    for i in 0..nx {
        for j in 0..ny {
            tiles.push(GridTile {
                extent: Extent::new(xb[i], xb[i + 1], yb[j], yb[j + 1]),
                last_col: i == nx - 1,
                last_row: j == ny - 1,
            });
        }
    }
    tiles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_tile_scenario() {
        // Library extent (0,100,0,100), cell size 10, tile size 5 cells
        // => 50 ground units per side => exactly 4 tiles, IDs 1-4 in
        // traversal order.
        let ext = Extent::new(0.0, 100.0, 0.0, 100.0);
        let tiles = tile_grid(&ext, 50.0, 50.0, true);
        let rects: Vec<_> = tiles.iter().map(|t| t.extent).collect();
        assert_eq!(
            rects,
            vec![
                Extent::new(0.0, 50.0, 0.0, 50.0),
                Extent::new(0.0, 50.0, 50.0, 100.0),
                Extent::new(50.0, 100.0, 0.0, 50.0),
                Extent::new(50.0, 100.0, 50.0, 100.0),
            ]
        );
    }

    #[test]
    fn padding_keeps_tiles_equal_sized() {
        let marks = tile_boundaries(0.0, 70.0, 50.0, true);
        assert_eq!(marks, vec![0.0, 50.0, 100.0]);
    }

    #[test]
    fn no_padding_clamps_to_max() {
        let marks = tile_boundaries(0.0, 70.0, 50.0, false);
        assert_eq!(marks, vec![0.0, 50.0, 70.0]);
    }

    #[test]
    fn last_flags_mark_the_trailing_intervals() {
        let ext = Extent::new(0.0, 100.0, 0.0, 150.0);
        let tiles = tile_grid(&ext, 50.0, 50.0, true);
        assert_eq!(tiles.len(), 6);
        for t in &tiles {
            assert_eq!(t.last_col, t.extent.max_x == 100.0);
            assert_eq!(t.last_row, t.extent.max_y == 150.0);
        }
    }

    #[test]
    fn grid_is_reproducible() {
        let ext = Extent::new(-3.7, 96.3, 12.13, 112.13);
        let a = tile_grid(&ext, 25.0, 25.0, true);
        let b = tile_grid(&ext, 25.0, 25.0, true);
        assert_eq!(a, b);
    }
}
