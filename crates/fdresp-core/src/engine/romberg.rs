//! Finite-difference stencils on the geometric field ladder and the Romberg
//! extrapolation triangle.
//!
//! Field amplitudes form a geometric ladder `h, h·r, h·r², …`. A centered
//! stencil for derivative order *n* samples the nodes `{±r^j} (∪ {0})` in
//! units of the current step; because the stencil is symmetric, the
//! discretization error is a polynomial in `h²`, which is exactly what the
//! Richardson recurrence of the triangle eliminates column by column.

use crate::engine::error::BakingError;
use nalgebra::{DMatrix, DVector};

/// Centered finite-difference weights for one derivative order on the
/// geometric node family.
#[derive(Debug, Clone, PartialEq)]
pub struct Stencil {
    order: usize,
    ratio: f64,
    /// (signed level offset, weight); offset 0 is the unperturbed point,
    /// offset ±(j+1) the node at ±r^j in units of the step.
    weights: Vec<(i32, f64)>,
}

/// Number of ± node pairs and whether the center node participates, for a
/// centered stencil of the given derivative order.
pub fn node_layout(order: usize) -> (usize, bool) {
    (order.div_ceil(2), order % 2 == 0)
}

impl Stencil {
    /// Solves the moment system `Σ wᵢ xᵢ^m = n!·δ_{m,n}` over the stencil
    /// nodes, yielding weights exact for all polynomials the node count can
    /// resolve.
    pub fn centered(order: usize, ratio: f64) -> Result<Self, BakingError> {
        debug_assert!(order >= 1);
        let (pairs, center) = node_layout(order);
        let mut offsets: Vec<i32> = Vec::new();
        for j in (0..pairs).rev() {
            offsets.push(-(j as i32 + 1));
        }
        if center {
            offsets.push(0);
        }
        for j in 0..pairs {
            offsets.push(j as i32 + 1);
        }

        let positions: Vec<f64> = offsets.iter().map(|&o| Self::position(o, ratio)).collect();
        let n = positions.len();
        let mut moments = DMatrix::zeros(n, n);
        for (m, mut row) in moments.row_iter_mut().enumerate() {
            for (i, &x) in positions.iter().enumerate() {
                row[i] = x.powi(m as i32);
            }
        }
        let mut rhs = DVector::zeros(n);
        rhs[order] = (1..=order).product::<usize>() as f64;

        let weights = moments
            .lu()
            .solve(&rhs)
            .ok_or(BakingError::SingularStencil { order, ratio })?;

        Ok(Self {
            order,
            ratio,
            weights: offsets
                .into_iter()
                .zip(weights.iter().copied())
                .collect(),
        })
    }

    fn position(offset: i32, ratio: f64) -> f64 {
        if offset == 0 {
            0.0
        } else {
            offset.signum() as f64 * ratio.powi(offset.abs() - 1)
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// The (signed level offset, weight) pairs of the stencil.
    pub fn nodes(&self) -> &[(i32, f64)] {
        &self.weights
    }

    /// Largest level offset used by the stencil.
    pub fn reach(&self) -> i32 {
        self.weights
            .iter()
            .map(|(offset, _)| offset.abs())
            .max()
            .unwrap_or(0)
    }

    /// Derivative estimate from the node values, for a step of size `h`.
    pub fn estimate(&self, values: &[f64], h: f64) -> f64 {
        debug_assert_eq!(values.len(), self.weights.len());
        let weighted: f64 = self
            .weights
            .iter()
            .zip(values)
            .map(|((_, weight), value)| weight * value)
            .sum();
        weighted / h.powi(self.order as i32)
    }
}

/// The triangular Richardson extrapolation table built from one
/// finite-difference estimate per ladder row.
#[derive(Debug, Clone, PartialEq)]
pub struct RombergTriangle {
    ratio: f64,
    /// `columns[m][k]`: the estimate at row k after m extrapolation passes.
    columns: Vec<Vec<f64>>,
}

impl RombergTriangle {
    /// Builds the full triangle. `first_column[k]` must be the raw estimate
    /// at step `h·rᵏ` (row 0 = smallest step).
    pub fn new(first_column: Vec<f64>, ratio: f64) -> Self {
        debug_assert!(!first_column.is_empty());
        let rows = first_column.len();
        let mut columns = vec![first_column];
        for m in 1..rows {
            let r2m = ratio.powi(2 * m as i32);
            let previous = &columns[m - 1];
            let column: Vec<f64> = (0..rows - m)
                .map(|k| (r2m * previous[k] - previous[k + 1]) / (r2m - 1.0))
                .collect();
            columns.push(column);
        }
        Self { ratio, columns }
    }

    pub fn rows(&self) -> usize {
        self.columns[0].len()
    }

    pub fn entry(&self, row: usize, column: usize) -> Option<f64> {
        self.columns.get(column)?.get(row).copied()
    }

    /// The converged estimate (the most-extrapolated entry) and its
    /// uncertainty, the absolute spread between the last two diagonal
    /// entries. A single-row triangle has no spread to measure and reports
    /// zero uncertainty.
    pub fn best_value(&self) -> (f64, f64) {
        let last = self.columns.len() - 1;
        let value = self.columns[last][0];
        let uncertainty = if last == 0 {
            0.0
        } else {
            (value - self.columns[last - 1][1]).abs()
        };
        (value, uncertainty)
    }

    /// Relative spread of the best value, the quantity gated by the recipe's
    /// Romberg threshold.
    pub fn relative_spread(&self) -> f64 {
        let (value, uncertainty) = self.best_value();
        uncertainty / value.abs().max(f64::MIN_POSITIVE)
    }

    pub fn is_flagged(&self, threshold: f64) -> bool {
        self.relative_spread() > threshold
    }

    /// Plain-text rendering of the triangle, one ladder row per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for k in 0..self.rows() {
            out.push_str(&format!("k={:<2}", k));
            for column in &self.columns {
                if let Some(&value) = column.get(k) {
                    out.push_str(&format!(" {:>14.8e}", value));
                }
            }
            out.push('\n');
        }
        out
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }
}
