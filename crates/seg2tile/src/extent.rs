//! Library and per-segment spatial extents.
//!
//! Relation coordinates are cell centers; extents are external borders, so
//! every extent derived from coordinates is padded outward by half a cell.

use anyhow::Result;
use log::{info, warn};
use std::path::{Path, PathBuf};

use crate::relations;

/// Axis-aligned rectangle `(min_x, max_x, min_y, max_y)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Extent {
    /// The identity for `union`/`include`: min at +inf, max at -inf.
    pub const EMPTY: Self = Self {
        min_x: f64::INFINITY,
        max_x: f64::NEG_INFINITY,
        min_y: f64::INFINITY,
        max_y: f64::NEG_INFINITY,
    };

    pub fn new(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> Self {
        Self { min_x, max_x, min_y, max_y }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    /// Grow to cover the point `(x, y)`.
    #[inline]
    pub fn include(&mut self, x: f64, y: f64) {
        if x < self.min_x {
            self.min_x = x;
        }
        if x > self.max_x {
            self.max_x = x;
        }
        if y < self.min_y {
            self.min_y = y;
        }
        if y > self.max_y {
            self.max_y = y;
        }
    }

    /// Grow to cover `other`.
    #[inline]
    pub fn union(&mut self, other: &Extent) {
        self.min_x = self.min_x.min(other.min_x);
        self.max_x = self.max_x.max(other.max_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_y = self.max_y.max(other.max_y);
    }

    /// A copy grown outward by `margin` on every side.
    #[inline]
    pub fn padded(&self, margin: f64) -> Self {
        Self {
            min_x: self.min_x - margin,
            max_x: self.max_x + margin,
            min_y: self.min_y - margin,
            max_y: self.max_y + margin,
        }
    }

    /// Closed-interval rectangle overlap: rejected only when one rectangle
    /// lies entirely on one side of the other on some axis.
    #[inline]
    pub fn overlaps(&self, other: &Extent) -> bool {
        !(self.min_x > other.max_x
            || self.max_x < other.min_x
            || self.min_y > other.max_y
            || self.max_y < other.min_y)
    }

    /// Closed-interval point containment.
    #[inline]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Whether `other` lies entirely within this extent.
    #[inline]
    pub fn covers(&self, other: &Extent) -> bool {
        self.min_x <= other.min_x
            && self.max_x >= other.max_x
            && self.min_y <= other.min_y
            && self.max_y >= other.max_y
    }
}

/// One segment file's external FPP extent.
#[derive(Debug, Clone)]
pub struct SegmentExtent {
    pub path: PathBuf,
    pub extent: Extent,
}

/// Scan every segment relation file under `seg_dir` and compute the padded
/// per-segment FPP extents plus their union. Returns `None` for the library
/// extent when there are no usable segment files; that is reported, not a
/// crash.
pub fn calculate_library_extent(
    seg_dir: &Path,
    cell_size: f64,
) -> Result<(Option<Extent>, Vec<SegmentExtent>)> {
    let files = relations::segment_files(seg_dir)?;
    let half_cell = cell_size / 2.0;

    let mut library = Extent::EMPTY;
    let mut segment_extents = Vec::with_capacity(files.len());
    let mut relation_total = 0usize;

    for path in files {
        let rels = relations::read_segment_relations(&path)?;
        if rels.is_empty() {
            warn!("segment file {} has no relations; skipped", path.display());
            continue;
        }
        relation_total += rels.len();

        let mut ext = Extent::EMPTY;
        for r in &rels {
            ext.include(r.fpp_x, r.fpp_y);
        }
        let ext = ext.padded(half_cell);

        library.union(&ext);
        debug_assert!(library.covers(&ext));
        segment_extents.push(SegmentExtent { path, extent: ext });
    }

    if segment_extents.is_empty() {
        warn!("no segment relation files under {}", seg_dir.display());
        return Ok((None, segment_extents));
    }

    info!(
        "library extent (min_x, max_x, min_y, max_y): ({}, {}, {}, {})",
        library.min_x, library.max_x, library.min_y, library.max_y
    );
    info!("total FSP-FPP relations: {relation_total}");

    Ok((Some(library), segment_extents))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_and_union_fold() {
        let mut e = Extent::EMPTY;
        assert!(e.is_empty());
        e.include(3.0, -1.0);
        e.include(-2.0, 5.0);
        assert_eq!(e, Extent::new(-2.0, 3.0, -1.0, 5.0));

        let mut u = Extent::EMPTY;
        u.union(&e);
        u.union(&Extent::new(0.0, 10.0, 0.0, 1.0));
        assert_eq!(u, Extent::new(-2.0, 10.0, -1.0, 5.0));
    }

    #[test]
    fn padding_grows_every_side() {
        let e = Extent::new(0.0, 10.0, 20.0, 30.0).padded(5.0);
        assert_eq!(e, Extent::new(-5.0, 15.0, 15.0, 35.0));
    }

    #[test]
    fn overlap_rejects_disjoint_rectangles() {
        let a = Extent::new(0.0, 10.0, 0.0, 10.0);
        assert!(a.overlaps(&Extent::new(5.0, 15.0, 5.0, 15.0)));
        // touching edges still overlap (conservative superset)
        assert!(a.overlaps(&Extent::new(10.0, 20.0, 0.0, 10.0)));
        assert!(!a.overlaps(&Extent::new(10.1, 20.0, 0.0, 10.0)));
        assert!(!a.overlaps(&Extent::new(0.0, 10.0, 10.1, 20.0)));
    }

    #[test]
    fn covers_is_reflexive_and_monotonic() {
        let outer = Extent::new(0.0, 100.0, 0.0, 100.0);
        let inner = Extent::new(10.0, 20.0, 10.0, 20.0);
        assert!(outer.covers(&outer));
        assert!(outer.covers(&inner));
        assert!(!inner.covers(&outer));
    }
}
