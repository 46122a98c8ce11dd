//! Saving and loading flows
//!
//! A flow is saved as pretty JSON. Generated clips have no library entry,
//! so their audio goes into a `<stem>_clips/` directory beside the JSON
//! and the flow records each file with the clip's tempo and key.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::flow::{ClipFile, Flow, GeneratedClip};
use crate::engine::{read_wav, write_wav, ExportFormat};
use crate::error::{Result, SegueError};

/// Write `flow` to `path`, with any generated clips as 32-bit float WAV
pub fn save_flow(flow: &Flow, path: &Path) -> Result<()> {
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let clip_dir = clip_dir_name(path);

    let mut files = BTreeMap::new();
    for (track, clip) in flow.clips() {
        let relative = clip_dir.join(format!("{}.wav", track));
        let absolute = base.join(&relative);
        if let Some(dir) = absolute.parent() {
            fs::create_dir_all(dir)?;
        }
        write_wav(&clip.buffer, &absolute, ExportFormat::new(clip.buffer.sample_rate, 32))?;
        files.insert(
            track.clone(),
            ClipFile {
                path: relative,
                bpm: clip.bpm,
                key: clip.key,
            },
        );
    }

    let mut saved = flow.clone();
    saved.set_clip_files(files);
    fs::write(path, serde_json::to_string_pretty(&saved)?)?;
    tracing::info!(flow = %path.display(), clips = saved.clip_files().len(), "flow saved");
    Ok(())
}

/// Read a flow written by [`save_flow`], reloading its generated clips
pub fn load_flow(path: &Path) -> Result<Flow> {
    let text = fs::read_to_string(path).map_err(|e| SegueError::FileNotFound {
        path: path.display().to_string(),
        source: Some(e),
    })?;
    let mut flow: Flow = serde_json::from_str(&text)?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let files = flow.clip_files().clone();
    for (track, file) in files {
        let buffer = read_wav(&base.join(&file.path))?;
        flow.add_clip(
            track,
            GeneratedClip {
                buffer: Arc::new(buffer),
                bpm: file.bpm,
                key: file.key,
            },
        );
    }
    flow.validate()?;
    Ok(flow)
}

fn clip_dir_name(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "flow".to_string());
    PathBuf::from(format!("{}_clips", stem))
}
