//! Segment-network cleanup and downstream distance annotation.
//!
//! FSPs and segments are raster cell centers; a segment and its downstream
//! segment do not share a cell, so every junction contributes a gap of one
//! cell (or sqrt(2) cells diagonally) that is added when walking to the
//! outlet.

use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::info::{self, FspRecord, SegmentRecord};

/// The `distance` pass: cleanup, then distance annotation, rewriting
/// `fsp_info.csv` and `segment_info.csv` in place.
pub fn run(library: &Path) -> Result<()> {
    let fsp_path = library.join(info::FSP_INFO_FILE);
    let seg_path = library.join(info::SEG_INFO_FILE);

    let mut fsps: Vec<FspRecord> = info::read_records(&fsp_path)?;
    let mut segs: Vec<SegmentRecord> = info::read_records(&seg_path)?;
    info!("{} FSPs, {} segments", fsps.len(), segs.len());

    let pruned = cleanup_segments(&fsps, &mut segs);
    if pruned > 0 {
        info!("pruned {pruned} segments with no FSPs");
    }

    compute_distances(&mut fsps, &mut segs)?;

    info::write_records(&fsp_path, &fsps, info::FSP_HEADER)?;
    info::write_records(&seg_path, &segs, info::SEG_HEADER)?;
    Ok(())
}

/// Remove segments that have no FSPs, re-rooting any segment that pointed
/// at a removed one to downstream-ID 0 (a new de-facto outlet; a library
/// may end up with several separate outlets). Idempotent.
pub fn cleanup_segments(fsps: &[FspRecord], segs: &mut Vec<SegmentRecord>) -> usize {
    let present: HashSet<i32> = fsps.iter().map(|f| f.seg_id).collect();

    let mut removed = HashSet::new();
    segs.retain(|s| {
        if present.contains(&s.seg_id) {
            true
        } else {
            warn!("segment {} is missing from the FSP table; pruned", s.seg_id);
            removed.insert(s.seg_id);
            false
        }
    });

    for s in segs.iter_mut() {
        if removed.contains(&s.ds_seg_id) {
            s.ds_seg_id = 0;
        }
    }

    removed.len()
}

/// Annotate within-segment distances, segment lengths, segment-to-outlet
/// distances, and total FSP downstream distances. Assumes `cleanup_segments`
/// has run (every segment has at least one FSP).
pub fn compute_distances(fsps: &mut [FspRecord], segs: &mut [SegmentRecord]) -> Result<()> {
    // FSP storage indices per segment, upstream-to-downstream file order.
    let mut by_seg: HashMap<i32, Vec<usize>> = HashMap::new();
    for (i, f) in fsps.iter().enumerate() {
        by_seg.entry(f.seg_id).or_default().push(i);
    }

    // Within-segment downstream distance: walk most-downstream-first,
    // accumulating Euclidean hops; the total is the segment length.
    for seg in segs.iter_mut() {
        let order = by_seg
            .get(&seg.seg_id)
            .with_context(|| format!("segment {} has no FSPs; run cleanup first", seg.seg_id))?;

        let mut cum = 0.0;
        let mut prev: Option<(f64, f64)> = None;
        for &i in order.iter().rev() {
            let (x, y) = (fsps[i].fsp_x, fsps[i].fsp_y);
            if let Some((px, py)) = prev {
                cum += ((px - x).powi(2) + (py - y).powi(2)).sqrt();
            }
            fsps[i].ds_dist = Some(cum);
            prev = Some((x, y));
        }
        seg.length = Some(cum);
    }

    let lengths: Vec<f64> = segs.iter().map(|s| s.length.unwrap_or(0.0)).collect();
    let index_of: HashMap<i32, usize> = segs
        .iter()
        .enumerate()
        .map(|(i, s)| (s.seg_id, i))
        .collect();

    // Segment-to-outlet distance: follow downstream references to 0,
    // summing each hop's segment length plus the junction gap. The network
    // is assumed acyclic; a walk longer than the segment count means a
    // cycle and is fatal rather than a hang.
    let mut outlet = vec![0.0f64; segs.len()];
    for i in 0..segs.len() {
        let mut cur = segs[i].seg_id;
        let mut ds = segs[i].ds_seg_id;
        let mut dist = 0.0;
        let mut hops = 0usize;

        while ds != 0 {
            hops += 1;
            if hops > segs.len() {
                bail!("cycle detected in the segment network at segment {cur}");
            }
            let j = *index_of.get(&ds).with_context(|| {
                format!("segment {cur} references unknown downstream segment {ds}")
            })?;

            dist += lengths[j];
            dist += junction_gap(fsps, &by_seg, cur, ds)?;

            cur = ds;
            ds = segs[j].ds_seg_id;
        }
        outlet[i] = dist;
    }
    for (s, d) in segs.iter_mut().zip(&outlet) {
        s.ds_dist = Some(*d);
    }

    // FSP total downstream distance = within-segment + owning segment's
    // outlet distance.
    for f in fsps.iter_mut() {
        let j = *index_of
            .get(&f.seg_id)
            .with_context(|| format!("FSP {} references unknown segment {}", f.fsp_id, f.seg_id))?;
        f.ds_dist = Some(f.ds_dist.unwrap_or(0.0) + outlet[j]);
    }

    Ok(())
}

/// Euclidean distance between the last FSP of `upstream` and the first FSP
/// of `downstream`.
fn junction_gap(
    fsps: &[FspRecord],
    by_seg: &HashMap<i32, Vec<usize>>,
    upstream: i32,
    downstream: i32,
) -> Result<f64> {
    let up = by_seg
        .get(&upstream)
        .and_then(|v| v.last())
        .with_context(|| format!("segment {upstream} has no FSPs"))?;
    let down = by_seg
        .get(&downstream)
        .and_then(|v| v.first())
        .with_context(|| format!("segment {downstream} has no FSPs"))?;

    let (x1, y1) = (fsps[*up].fsp_x, fsps[*up].fsp_y);
    let (x2, y2) = (fsps[*down].fsp_x, fsps[*down].fsp_y);
    Ok(((x1 - x2).powi(2) + (y1 - y2).powi(2)).sqrt())
}
