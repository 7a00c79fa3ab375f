//! Transfer learning on MNIST: an autoencoder is first trained to reconstruct digits, then its
//! frozen encoder feeds a linear classifier head.

pub mod data;
pub mod error;
pub mod evaluation;
pub mod model;
pub mod renderer;
pub mod show;
pub mod training;

pub use error::{Error, Result};
