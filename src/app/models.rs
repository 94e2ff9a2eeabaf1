//! Data models for mooring preprocessing
//!
//! This module contains the core data structures shared by the converter
//! pipeline: the variable frame owned by one converter invocation, the
//! monotonic quality mask applied to profile variables, and the structured
//! metadata records emitted into the output dataset.

pub mod frame;
pub mod metadata;

pub use frame::{FrameEntry, FrameVariable, InstrumentFrame, QualityMask, VariableAttrs};
pub use metadata::{MetaEntry, MetaRecordSet, MetaValue};
