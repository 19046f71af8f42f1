//! Time-lapse videos of a run.
//!
//! The coordinator writes a `snapshot.NNNNNNN.png` frame on every save
//! interval. A time-lapse samples those frames evenly so the video lasts a
//! requested number of seconds, renumbers them in a scratch directory, and
//! hands them to `ffmpeg`.

mod timelapse;

pub use timelapse::{FRAMES_PER_SECOND, Timelapse, TimelapseError, sample_frames, snapshot_frames};
