use anyhow::{ensure, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod encode;
mod extent;
mod grid;
mod index;
mod info;
mod network;
mod order;
mod relations;
mod tiler;

use encode::TileFormat;

/// `seg2tile` - re-organize segment-based flood-inundation libraries.
///
/// A segment library stores FSP-FPP flood relations per stream segment;
/// mapping wants them per spatial tile. The `tile` command performs that
/// conversion; `distance` and `stream-orders` annotate the library info
/// tables with the network metrics the interpolation engine needs.
#[derive(Parser, Debug)]
#[command(name = "seg2tile", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Clean up the segment network and annotate downstream distances.
    ///
    /// Rewrites `fsp_info.csv` and `segment_info.csv` in place: segments
    /// with no FSPs are pruned (their upstream neighbors become new
    /// outlets), then every FSP and segment gets its distance to the
    /// library outlet.
    Distance {
        /// Segment-based library folder.
        #[arg(long)]
        library: PathBuf,
    },

    /// Annotate stream orders and derive the order-level network table.
    StreamOrders {
        /// Segment-based library folder.
        #[arg(long)]
        library: PathBuf,

        /// CSV with `SegId,StrOrd` columns mapping segments to orders.
        #[arg(long)]
        orders: PathBuf,
    },

    /// Re-group FSP-FPP relations from segments into spatial tiles.
    Tile {
        /// Segment-based library folder.
        #[arg(long)]
        library: PathBuf,

        /// Output folder for the tiled library.
        #[arg(long)]
        output: PathBuf,

        /// Cell size in ground units.
        #[arg(long)]
        cell_size: f64,

        /// Tile side length as a number of cells.
        #[arg(long, default_value_t = 500, value_parser = clap::value_parser!(u32).range(1..))]
        tile_size: u32,

        /// Tile relation file encoding.
        #[arg(long, value_enum, default_value_t = TileFormat::Snappy)]
        format: TileFormat,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    match Cli::parse().command {
        Command::Distance { library } => network::run(&library),
        Command::StreamOrders { library, orders } => order::run(&library, &orders),
        Command::Tile {
            library,
            output,
            cell_size,
            tile_size,
            format,
        } => {
            ensure!(cell_size > 0.0, "--cell-size must be positive");
            tiler::tile_library(&tiler::TileOptions {
                library,
                output,
                cell_size,
                tile_size,
                format,
            })
        }
    }
}
