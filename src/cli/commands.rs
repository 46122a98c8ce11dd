//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::bridge::{BridgeGenerator, RemoteBridgeGenerator};
use crate::config::SegueConfig;
use crate::engine::{write_wav, CancelToken, ExportFormat, WavSource};
use crate::library::{FeatureSnapshot, Library, LibrarySnapshot, TrackId};
use crate::orchestrator::{add_layers, build_flow, load_flow, save_flow, BridgeFinder, Flow, SearchConstraints};
use crate::render::DspRenderer;
use crate::scoring::{CompatibilityScore, CompatibilityScorer};

/// Score one transition and print the component breakdown.
pub fn score(config: &SegueConfig, library: &Path, from: &str, to: &str) -> Result<()> {
    let library = load_library(library)?;
    let scorer = CompatibilityScorer::new(config.scorer.clone());
    let score = scorer
        .score(track(&library, from)?, track(&library, to)?)
        .with_context(|| format!("scoring {} -> {}", from, to))?;

    println!("{} -> {}", from, to);
    print_score(&score);
    Ok(())
}

/// Print the top recommendations after `anchor`.
pub fn recommend(config: &SegueConfig, library: &Path, anchor: &str, limit: Option<usize>) -> Result<()> {
    let library = load_library(library)?;
    let scorer = CompatibilityScorer::new(config.scorer.clone());
    let limit = limit.unwrap_or(config.scorer.recommendation_limit);
    let ranked = scorer.rank(track(&library, anchor)?, library.tracks(), limit)?;

    if ranked.is_empty() {
        println!("No compatible tracks for {}", anchor);
        return Ok(());
    }
    println!("Recommendations after {}:", anchor);
    for (i, score) in ranked.iter().enumerate() {
        print!("{:>3}. {:<24}", i + 1, score.track_b);
        print_score(score);
    }
    Ok(())
}

/// Sequence a flow and write it as JSON.
pub fn build(
    config: &SegueConfig,
    library: &Path,
    seed: &str,
    length: Option<usize>,
    layers: bool,
    output: Option<&Path>,
) -> Result<()> {
    let library = load_library(library)?;
    let flow = sequence(config, &library, seed, length, layers)?;
    write_flow(&flow, output)
}

/// Fill the gap between two segments of a saved flow.
pub fn find_bridge(
    config: &SegueConfig,
    library: &Path,
    flow_path: &Path,
    left: u64,
    right: u64,
    generate: bool,
    output: Option<&Path>,
) -> Result<()> {
    let library = load_library(library)?;
    let mut flow = read_flow(flow_path)?;
    let scorer = CompatibilityScorer::new(config.scorer.clone());

    let mut finder = BridgeFinder::new(&library, &scorer, &config.bridge);
    if generate {
        let generator: Arc<dyn BridgeGenerator> = Arc::new(RemoteBridgeGenerator::new(config.remote.clone()));
        finder = finder.with_generator(generator);
    }
    let outcome = finder
        .find_bridge(&mut flow, left, right)
        .with_context(|| format!("bridging segments {} and {}", left, right))?;

    eprintln!(
        "Inserted {} ({:?}) as segment {}",
        outcome.segment.track, outcome.kind, outcome.segment.id
    );
    if let Some(candidate) = &outcome.candidate {
        eprintln!("Best library candidate: {} (score {:.3})", candidate.track, candidate.score);
    }
    if let Some(reason) = &outcome.fallback_reason {
        warn!("generated bridge not used: {}", reason);
    }
    write_flow(&flow, output)
}

/// Build or load a flow, render it and export WAV.
#[allow(clippy::too_many_arguments)]
pub fn render(
    config: &SegueConfig,
    library: &Path,
    seed: Option<&str>,
    flow_path: Option<&Path>,
    length: Option<usize>,
    layers: bool,
    output: &Path,
    bit_depth: u16,
) -> Result<()> {
    let library = load_library(library)?;
    let flow = match (flow_path, seed) {
        (Some(path), _) => read_flow(path)?,
        (None, Some(seed)) => sequence(config, &library, seed, length, layers)?,
        (None, None) => bail!("either --seed or --flow is required"),
    };

    let renderer = DspRenderer::new(config.render.clone())?;
    info!(segments = flow.segment_count(), "rendering flow");
    let rendered = renderer.render_with(&flow, &library, &WavSource, &CancelToken::new(), &mut |done, of| {
        eprint!("\rRendering segment {}/{}", done, of)
    });
    eprintln!();
    let rendered = rendered.context("rendering flow")?;

    let format = ExportFormat::new(config.render.sample_rate, bit_depth);
    write_wav(&rendered.buffer, output, format).with_context(|| format!("writing {}", output.display()))?;

    println!("Rendered: {}", output.display());
    println!("Duration: {:.1} s", rendered.duration_ms() / 1000.0);
    println!("Peak: {:.2} dBFS", rendered.peak_db());
    println!("Fingerprint: {}", rendered.fingerprint);
    for warning in &rendered.warnings {
        println!("Degraded segment {} ({}): {}", warning.segment, warning.track, warning.message);
    }
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn load_library(path: &Path) -> Result<LibrarySnapshot> {
    let library = Library::from_manifest(path).with_context(|| format!("loading library {}", path.display()))?;
    if library.is_empty() {
        bail!("library {} has no tracks", path.display());
    }
    Ok(library.snapshot())
}

fn track<'a>(library: &'a LibrarySnapshot, id: &str) -> Result<&'a FeatureSnapshot> {
    library
        .get(&TrackId::from(id))
        .with_context(|| format!("unknown track '{}'", id))
}

fn sequence(
    config: &SegueConfig,
    library: &LibrarySnapshot,
    seed: &str,
    length: Option<usize>,
    layers: bool,
) -> Result<Flow> {
    let scorer = CompatibilityScorer::new(config.scorer.clone());
    let constraints = SearchConstraints {
        target_length: length.unwrap_or(config.search.target_length),
        ..config.search.clone()
    };
    let cancel = CancelToken::new();
    let mut flow = build_flow(library, &scorer, &TrackId::from(seed), &constraints, &cancel)
        .with_context(|| format!("building flow from {}", seed))?;
    if layers {
        let outcome = add_layers(&mut flow, library, &scorer, &config.layering, &cancel)?;
        info!(placed = outcome.placed, unfilled = outcome.unfilled, "background lanes added");
    }
    Ok(flow)
}

fn read_flow(path: &Path) -> Result<Flow> {
    load_flow(path).with_context(|| format!("reading flow {}", path.display()))
}

/// Save to `output`, or print JSON when there is no output file
fn write_flow(flow: &Flow, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            save_flow(flow, path).with_context(|| format!("writing {}", path.display()))?;
            println!("Flow saved: {}", path.display());
        }
        None => {
            if flow.clips().next().is_some() {
                warn!("generated audio is only kept when the flow is saved with --output");
            }
            println!("{}", serde_json::to_string_pretty(flow)?);
        }
    }
    Ok(())
}

fn print_score(score: &CompatibilityScore) {
    let semantic = score
        .semantic
        .map(|s| format!("{:.3}", s))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "total {:.3}  bpm {:.3}  key {:.3}  semantic {}",
        score.total, score.bpm, score.harmonic, semantic
    );
}
