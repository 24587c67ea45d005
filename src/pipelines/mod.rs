// In: src/pipelines/mod.rs

//! The feature pipelines and the model seams they feed.
//!
//! Pipelines compose the transform primitives into the two production
//! feature flows (user segmentation and per-segment offer ranking). The
//! trained models themselves live outside this crate; they plug in through
//! the two traits below, which fix only the shape contract.

use ndarray::Array2;

use crate::error::CarouselError;

pub mod engineering;
pub mod ranking;
pub mod segmentation;


/// Assigns a cluster label to each feature-matrix row. Implementations wrap
/// the externally trained clustering model; `predict` must return exactly
/// one label per input row.
pub trait ClusteringModel {
    fn predict(&self, features: &Array2<f64>) -> Result<Vec<String>, CarouselError>;
}

/// Scores a user-by-offer activation matrix. The output has the same shape
/// as the input: one affinity per (user row, offer column) pair.
pub trait RankingModel {
    fn score(&self, features: &Array2<f64>) -> Result<Array2<f64>, CarouselError>;
}
