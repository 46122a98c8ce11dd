//! CLI Module
//!
//! Command-line interface for scoring, flow building and rendering.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Segue - build and render harmonically coherent flows from a clip library
#[derive(Parser, Debug)]
#[command(name = "segue")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON config file (defaults apply to anything it leaves out)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Score the transition from one track into another
    #[command(name = "score")]
    Score {
        /// Library manifest (JSON)
        #[arg(short, long)]
        library: PathBuf,

        /// Outgoing track id
        from: String,

        /// Incoming track id
        to: String,
    },

    /// List the best next tracks after an anchor
    #[command(name = "recommend")]
    Recommend {
        /// Library manifest (JSON)
        #[arg(short, long)]
        library: PathBuf,

        /// Anchor track id
        track: String,

        /// Number of recommendations
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Sequence a flow from a seed track
    #[command(name = "build-flow")]
    BuildFlow {
        /// Library manifest (JSON)
        #[arg(short, long)]
        library: PathBuf,

        /// Seed track id
        seed: String,

        /// Tracks in the lead lane
        #[arg(long)]
        length: Option<usize>,

        /// Add background lanes
        #[arg(long)]
        layers: bool,

        /// Write the flow JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fill the gap between two consecutive segments of a flow
    #[command(name = "find-bridge")]
    FindBridge {
        /// Library manifest (JSON)
        #[arg(short, long)]
        library: PathBuf,

        /// Flow JSON produced by build-flow
        #[arg(short, long)]
        flow: PathBuf,

        /// Segment id before the gap
        left: u64,

        /// Segment id after the gap
        right: u64,

        /// Ask the generation service when no library track fits
        #[arg(long)]
        generate: bool,

        /// Write the edited flow JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Build (or load) a flow and render it to WAV
    #[command(name = "render")]
    Render {
        /// Library manifest (JSON)
        #[arg(short, long)]
        library: PathBuf,

        /// Seed track id, when building a new flow
        #[arg(long, required_unless_present = "flow")]
        seed: Option<String>,

        /// Existing flow JSON to render
        #[arg(short, long)]
        flow: Option<PathBuf>,

        /// Tracks in the lead lane, when building
        #[arg(long)]
        length: Option<usize>,

        /// Add background lanes, when building
        #[arg(long)]
        layers: bool,

        /// Output WAV file
        #[arg(short, long)]
        output: PathBuf,

        /// Output bit depth (16, 24 or 32)
        #[arg(long, default_value_t = 24)]
        bit_depth: u16,
    },
}
