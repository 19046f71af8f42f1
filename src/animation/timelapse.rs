//! Snapshot sampling and video encoding.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info};
use thiserror::Error;

/// Frame rate of the encoded video.
pub const FRAMES_PER_SECOND: usize = 30;

#[derive(Debug, Error)]
pub enum TimelapseError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("no frames starting with '{prefix}' in {dir}")]
    NoFrames { dir: PathBuf, prefix: String },

    #[error("video encoder exited with {0}")]
    Encoder(std::process::ExitStatus),
}

/// Files in `dir` whose names start with `prefix`, sorted by name.
pub fn snapshot_frames(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, TimelapseError> {
    let mut frames = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with(prefix) {
            frames.push(entry.path());
        }
    }
    frames.sort();
    Ok(frames)
}

/// Every n-th frame, with n chosen so the result plays for about
/// `length_secs` seconds. Short runs keep every frame.
pub fn sample_frames<T: Clone>(frames: &[T], length_secs: usize) -> Vec<T> {
    let wanted = (FRAMES_PER_SECOND * length_secs).max(1);
    let skip = (frames.len() / wanted).max(1);
    frames.iter().step_by(skip).cloned().collect()
}

/// A sampled sequence of snapshot frames ready for encoding.
#[derive(Debug, Clone)]
pub struct Timelapse {
    frames: Vec<PathBuf>,
}

impl Timelapse {
    /// Sample the frames in `dir` starting with `prefix` down to
    /// `length_secs` seconds of video.
    pub fn new(dir: &Path, prefix: &str, length_secs: usize) -> Result<Self, TimelapseError> {
        let all = snapshot_frames(dir, prefix)?;
        if all.is_empty() {
            return Err(TimelapseError::NoFrames {
                dir: dir.to_path_buf(),
                prefix: prefix.to_string(),
            });
        }
        let frames = sample_frames(&all, length_secs);
        info!("using {} of {} frames", frames.len(), all.len());
        Ok(Self { frames })
    }

    pub fn frames(&self) -> &[PathBuf] {
        &self.frames
    }

    /// Copy the frames into `dir` as `00000.png`, `00001.png`, ...
    fn stage(&self, dir: &Path) -> Result<(), TimelapseError> {
        for (i, frame) in self.frames.iter().enumerate() {
            let staged = dir.join(format!("{i:05}.png"));
            debug!("staging {} as {}", frame.display(), staged.display());
            fs::copy(frame, staged)?;
        }
        Ok(())
    }

    /// Encode the frames to `output` with `ffmpeg`, which must be on `PATH`.
    pub fn encode(&self, output: &Path) -> Result<(), TimelapseError> {
        let scratch = tempfile::tempdir()?;
        self.stage(scratch.path())?;

        info!("encoding {} frames to {}", self.frames.len(), output.display());
        let status = Command::new("ffmpeg")
            .arg("-y")
            .args(["-framerate", &FRAMES_PER_SECOND.to_string()])
            .arg("-i")
            .arg(scratch.path().join("%05d.png"))
            .arg(output)
            .status()?;
        if !status.success() {
            return Err(TimelapseError::Encoder(status));
        }
        Ok(())
    }
}
