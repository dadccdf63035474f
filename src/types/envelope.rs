//! N-dimensional axis-aligned bounding box

use serde::{Deserialize, Serialize};

use crate::{Result, TreeError};

/// Axis-aligned bounding box with per-dimension min/max coordinates.
///
/// Immutable value semantics: combining operations return new envelopes.
/// Invariants checked at construction: equal dimensionality of the two
/// corners, finite coordinates, `min[i] <= max[i]` for every axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    min: Vec<f64>,
    max: Vec<f64>,
}

impl Envelope {
    pub fn new(min: Vec<f64>, max: Vec<f64>) -> Result<Self> {
        if min.is_empty() || min.len() != max.len() {
            return Err(TreeError::DimensionMismatch {
                expected: min.len(),
                actual: max.len(),
            });
        }
        for d in 0..min.len() {
            if !min[d].is_finite() || !max[d].is_finite() {
                return Err(TreeError::InvalidArgument(format!(
                    "non-finite coordinate in dimension {}",
                    d
                )));
            }
            if min[d] > max[d] {
                return Err(TreeError::InvalidArgument(format!(
                    "min {} > max {} in dimension {}",
                    min[d], max[d], d
                )));
            }
        }
        Ok(Self { min, max })
    }

    /// 2D convenience constructor.
    pub fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Result<Self> {
        Self::new(vec![min_x, min_y], vec![max_x, max_y])
    }

    /// Degenerate envelope covering a single point.
    pub fn point(coords: &[f64]) -> Result<Self> {
        Self::new(coords.to_vec(), coords.to_vec())
    }

    pub fn dimension(&self) -> usize {
        self.min.len()
    }

    pub fn min(&self, d: usize) -> f64 {
        self.min[d]
    }

    pub fn max(&self, d: usize) -> f64 {
        self.max[d]
    }

    pub fn center(&self) -> Vec<f64> {
        (0..self.dimension())
            .map(|d| 0.5 * (self.min[d] + self.max[d]))
            .collect()
    }

    /// Product of extents over all dimensions.
    pub fn area(&self) -> f64 {
        (0..self.dimension())
            .map(|d| self.max[d] - self.min[d])
            .product()
    }

    pub fn intersects(&self, other: &Envelope) -> bool {
        debug_assert_eq!(self.dimension(), other.dimension());
        (0..self.dimension())
            .all(|d| self.max[d] >= other.min[d] && self.min[d] <= other.max[d])
    }

    pub fn contains_envelope(&self, other: &Envelope) -> bool {
        debug_assert_eq!(self.dimension(), other.dimension());
        (0..self.dimension())
            .all(|d| self.min[d] <= other.min[d] && self.max[d] >= other.max[d])
    }

    pub fn union(&self, other: &Envelope) -> Envelope {
        debug_assert_eq!(self.dimension(), other.dimension());
        let min = (0..self.dimension())
            .map(|d| self.min[d].min(other.min[d]))
            .collect();
        let max = (0..self.dimension())
            .map(|d| self.max[d].max(other.max[d]))
            .collect();
        Envelope { min, max }
    }

    pub fn expand_to_include(&mut self, other: &Envelope) {
        debug_assert_eq!(self.dimension(), other.dimension());
        for d in 0..self.dimension() {
            self.min[d] = self.min[d].min(other.min[d]);
            self.max[d] = self.max[d].max(other.max[d]);
        }
    }

    /// Area growth needed to absorb `other`.
    pub fn enlargement(&self, other: &Envelope) -> f64 {
        self.union(other).area() - self.area()
    }

    /// Euclidean distance from a point to the nearest face, 0 inside.
    pub fn min_distance(&self, point: &[f64]) -> f64 {
        debug_assert_eq!(self.dimension(), point.len());
        let mut sum = 0.0;
        for d in 0..self.dimension() {
            let delta = if point[d] < self.min[d] {
                self.min[d] - point[d]
            } else if point[d] > self.max[d] {
                point[d] - self.max[d]
            } else {
                0.0
            };
            sum += delta * delta;
        }
        sum.sqrt()
    }
}
