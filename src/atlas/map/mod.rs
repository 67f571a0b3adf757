//! Map module - the structures place recognition reads.
//!
//! This module contains:
//! - [`KeyFrame`] - Selected frames with a BoW signature and covisibility edges
//! - [`Map`] - Membership and status of one sub-map
//! - [`KeyFrameId`] / [`MapId`] - Stable handles used by the keyframe database
//!
//! # Example
//!
//! ```ignore
//! use rust_vslam_placerec::atlas::map::{KeyFrame, KeyFrameId, MapId};
//!
//! let mut kf = KeyFrame::new(KeyFrameId::new(7), MapId::new(0), timestamp_ns);
//! kf.set_bow_vector(bow);
//! kf.add_covisibility(KeyFrameId::new(6), 42);
//! ```

pub mod keyframe;
pub mod map;
pub mod types;

pub use keyframe::KeyFrame;
pub use map::Map;
pub use types::{KeyFrameId, MapId};
