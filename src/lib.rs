pub mod data;
pub mod dataset;
pub mod error;
pub mod inference;
pub mod model;
pub mod training;

pub use error::{Error, Result};

#[cfg(test)]
pub(crate) type TestBackend = burn::backend::NdArray<f32>;
#[cfg(test)]
pub(crate) type TestAutodiffBackend = burn::backend::Autodiff<TestBackend>;
