//! Stream-order annotation and the order-level network table.
//!
//! Orders come from an external `SegId,StrOrd` mapping. The derived
//! `stream_order_info.csv` records, per distinct order, which order it
//! drains into and the junction coordinate where it joins — the most
//! downstream segment of an order is the one with the smallest outlet
//! distance, so the `distance` pass must have run first.

use anyhow::{Context, Result};
use log::info;
use std::collections::HashMap;
use std::path::Path;

use crate::info::{self, FspRecord, SegmentOrderRecord, SegmentRecord, StreamOrderRecord};

/// The `stream-orders` pass: annotate both info tables and write the
/// stream-order network table next to them.
pub fn run(library: &Path, orders_csv: &Path) -> Result<()> {
    let mapping: Vec<SegmentOrderRecord> = info::read_records(orders_csv)?;
    let order_of: HashMap<i32, i32> = mapping.iter().map(|m| (m.seg_id, m.str_ord)).collect();

    let fsp_path = library.join(info::FSP_INFO_FILE);
    let seg_path = library.join(info::SEG_INFO_FILE);
    let mut fsps: Vec<FspRecord> = info::read_records(&fsp_path)?;
    let mut segs: Vec<SegmentRecord> = info::read_records(&seg_path)?;

    // Replace any existing order column wholesale.
    for s in segs.iter_mut() {
        s.str_ord = order_of.get(&s.seg_id).copied();
    }
    for f in fsps.iter_mut() {
        f.str_ord = order_of.get(&f.seg_id).copied();
    }

    let rows = stream_order_table(&fsps, &segs)?;
    info!("{} distinct stream orders", rows.len());

    info::write_records(&fsp_path, &fsps, info::FSP_HEADER)?;
    info::write_records(&seg_path, &segs, info::SEG_HEADER)?;
    info::write_records(
        &library.join(info::STREAM_ORDER_FILE),
        &rows,
        info::STREAM_ORDER_HEADER,
    )?;
    Ok(())
}

/// Build the order-level network rows from annotated tables.
pub fn stream_order_table(
    fsps: &[FspRecord],
    segs: &[SegmentRecord],
) -> Result<Vec<StreamOrderRecord>> {
    let mut orders: Vec<i32> = segs.iter().filter_map(|s| s.str_ord).collect();
    orders.sort_unstable();
    orders.dedup();

    let index_of: HashMap<i32, usize> = segs
        .iter()
        .enumerate()
        .map(|(i, s)| (s.seg_id, i))
        .collect();

    // First FSP of each segment in storage order (the upstream end, which
    // is where an upstream order joins it).
    let mut first_fsp: HashMap<i32, (f64, f64)> = HashMap::new();
    for f in fsps {
        first_fsp.entry(f.seg_id).or_insert((f.fsp_x, f.fsp_y));
    }

    let mut rows = Vec::with_capacity(orders.len());
    for so in orders {
        // Most downstream segment of this order; ties keep table order.
        let mut best: Option<(f64, usize)> = None;
        for (i, s) in segs.iter().enumerate() {
            if s.str_ord != Some(so) {
                continue;
            }
            let d = s.ds_dist.with_context(|| {
                format!(
                    "segment {} has no downstream distance; run `distance` before `stream-orders`",
                    s.seg_id
                )
            })?;
            if best.map_or(true, |(bd, _)| d < bd) {
                best = Some((d, i));
            }
        }
        let Some((_, i)) = best else { continue };

        let ds_id = segs[i].ds_seg_id;
        let row = if ds_id == 0 {
            // This order drains out of the library.
            StreamOrderRecord {
                str_ord: so,
                ds_str_ord: 0,
                junction_fsp_x: 0.0,
                junction_fsp_y: 0.0,
            }
        } else {
            let j = *index_of.get(&ds_id).with_context(|| {
                format!("segment {} references unknown downstream segment {ds_id}", segs[i].seg_id)
            })?;
            let ds_ord = segs[j]
                .str_ord
                .with_context(|| format!("downstream segment {ds_id} has no stream order"))?;
            let (x, y) = *first_fsp
                .get(&ds_id)
                .with_context(|| format!("segment {ds_id} has no FSPs"))?;
            StreamOrderRecord {
                str_ord: so,
                ds_str_ord: ds_ord,
                junction_fsp_x: x,
                junction_fsp_y: y,
            }
        };
        rows.push(row);
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fsp(fsp_id: i32, x: f64, y: f64, seg_id: i32) -> FspRecord {
        FspRecord {
            fsp_id,
            fsp_x: x,
            fsp_y: y,
            seg_id,
            filled_elev: 0.0,
            ds_dist: Some(0.0),
            str_ord: None,
        }
    }

    fn seg(seg_id: i32, ds_seg_id: i32, ds_dist: f64, str_ord: i32) -> SegmentRecord {
        SegmentRecord {
            seg_id,
            cell_count: 0,
            ds_seg_id,
            st_fac: 0.0,
            ed_fac: 0.0,
            length: Some(0.0),
            ds_dist: Some(ds_dist),
            str_ord: Some(str_ord),
        }
    }

    /// Order 1 tributaries (segments 1 and 2) join the order-2 trunk
    /// (segments 3 -> 4), which drains out of the library.
    fn library() -> (Vec<FspRecord>, Vec<SegmentRecord>) {
        let fsps = vec![
            fsp(1, 0.0, 10.0, 1),
            fsp(2, 0.0, 20.0, 2),
            fsp(3, 5.0, 5.0, 3),
            fsp(4, 9.0, 1.0, 4),
        ];
        let segs = vec![
            seg(1, 3, 120.0, 1),
            seg(2, 3, 80.0, 1),
            seg(3, 4, 40.0, 2),
            seg(4, 0, 0.0, 2),
        ];
        (fsps, segs)
    }

    #[test]
    fn junction_is_the_first_fsp_of_the_downstream_segment() {
        let (fsps, segs) = library();
        let rows = stream_order_table(&fsps, &segs).unwrap();
        assert_eq!(
            rows,
            vec![
                // order 1's most downstream segment is 2 (ds_dist 80), which
                // joins segment 3 at segment 3's first FSP.
                StreamOrderRecord {
                    str_ord: 1,
                    ds_str_ord: 2,
                    junction_fsp_x: 5.0,
                    junction_fsp_y: 5.0,
                },
                StreamOrderRecord {
                    str_ord: 2,
                    ds_str_ord: 0,
                    junction_fsp_x: 0.0,
                    junction_fsp_y: 0.0,
                },
            ]
        );
    }

    #[test]
    fn missing_distances_are_an_error() {
        let (fsps, mut segs) = library();
        segs[1].ds_dist = None;
        let err = stream_order_table(&fsps, &segs).unwrap_err();
        assert!(err.to_string().contains("distance"));
    }

    #[test]
    fn unordered_downstream_segment_is_an_error() {
        let (fsps, mut segs) = library();
        segs[2].str_ord = None;
        // Order 1 still resolves its downstream segment 3; segment 3 has no
        // order now, which is a data error in the mapping.
        assert!(stream_order_table(&fsps, &segs).is_err());
    }
}
