//! Dense sample arrays, resampling and the on-disk slice series format.

pub mod array;
pub mod resample;
/// PNG slice series (`<stem>.<z>.png`).
pub mod series;
