//! Tracking-side types seen by place recognition.
//!
//! Only the plain `Frame` is needed here: when tracking is lost its BoW
//! vector is used to query relocalization candidates.

pub mod tracking_frame;

pub use tracking_frame::{Frame, FrameId};
