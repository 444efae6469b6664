//! Resumable acquisition of platform content.
//!
//! # Overview
//!
//! An [`Acquisition`] drives one [`Paginator`](crate::platform::Paginator)
//! over the terms of a source descriptor. State lives in an
//! [`AcquisitionState`] which is checkpointed after every page:
//!
//! ```text
//! Empty ──▶ Fetching ──▶ Done        (content_complete = true)
//!              │  ▲
//!              └──┘ next page / next term
//!              │
//!              └──▶ Failed           (state kept for resume)
//! ```
//!
//! A snapshot on disk with `content_complete == false` is resumed from its
//! cursors; a complete one is returned without touching the network.

mod machine;
pub mod merge;
mod state;
pub mod stats;

pub use machine::{Acquisition, Checkpoint, RunLimits};
pub use state::{
    AcquisitionState, FilterCounts, PLATFORM_STOP_SLACK_DAYS, PageFilter, PageReport,
    TermProgress, Window,
};
pub use stats::{DerivedStats, TextSymbol, VolumeHistogram, word_tokens};
