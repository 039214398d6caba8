//! Crate-wide error type.

pub mod error;
#[cfg(test)]
pub(crate) mod test_support;
