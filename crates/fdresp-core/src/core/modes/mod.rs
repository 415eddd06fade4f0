//! Harmonic normal-mode data supplied by an external force-field stage.
//!
//! The mass-weighted Hessian eigenvectors span the full set of Cartesian
//! degrees of freedom; the first `trans_rot` columns are the
//! translation/rotation null space and are excluded from every vibrational
//! sum and from the projection of geometric derivatives.

use nalgebra::DMatrix;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModesError {
    #[error("Eigenvector matrix is {rows}x{cols}, expected {dof}x{dof}")]
    EigenvectorShape { rows: usize, cols: usize, dof: usize },
    #[error("Got {got} frequencies for {dof} degrees of freedom")]
    FrequencyCount { got: usize, dof: usize },
    #[error("Got {got} masses for {dof} degrees of freedom")]
    MassCount { got: usize, dof: usize },
    #[error("Translation/rotation count {trans_rot} exceeds {dof} degrees of freedom")]
    TransRotCount { trans_rot: usize, dof: usize },
    #[error("Mass at degree of freedom {index} is not positive")]
    NonPositiveMass { index: usize },
}

/// Normal-mode description of one molecular geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalModes {
    dof: usize,
    trans_rot: usize,
    frequencies: Vec<f64>,
    eigenvectors: DMatrix<f64>,
    masses: Vec<f64>,
}

impl NormalModes {
    /// Builds the mode data. `frequencies` are in hartree, ascending with the
    /// translation/rotation modes first; `eigenvectors` holds one
    /// mass-weighted mode per column; `masses` is the atomic mass (au) of the
    /// atom owning each Cartesian degree of freedom.
    pub fn new(
        trans_rot: usize,
        frequencies: Vec<f64>,
        eigenvectors: DMatrix<f64>,
        masses: Vec<f64>,
    ) -> Result<Self, ModesError> {
        let dof = frequencies.len();
        if eigenvectors.nrows() != dof || eigenvectors.ncols() != dof {
            return Err(ModesError::EigenvectorShape {
                rows: eigenvectors.nrows(),
                cols: eigenvectors.ncols(),
                dof,
            });
        }
        if masses.len() != dof {
            return Err(ModesError::MassCount {
                got: masses.len(),
                dof,
            });
        }
        if trans_rot > dof {
            return Err(ModesError::TransRotCount { trans_rot, dof });
        }
        if let Some(index) = masses.iter().position(|&m| m <= 0.0) {
            return Err(ModesError::NonPositiveMass { index });
        }
        Ok(Self {
            dof,
            trans_rot,
            frequencies,
            eigenvectors,
            masses,
        })
    }

    /// Mode data for sums that run over normal coordinates only, with no
    /// Cartesian back-projection (dof == mode count, unit masses, identity
    /// eigenvectors). Useful when the caller already has projected tensors.
    pub fn from_vibrational_frequencies(
        trans_rot: usize,
        frequencies: Vec<f64>,
    ) -> Result<Self, ModesError> {
        let dof = frequencies.len();
        Self::new(
            trans_rot,
            frequencies,
            DMatrix::identity(dof, dof),
            vec![1.0; dof],
        )
    }

    pub fn dof(&self) -> usize {
        self.dof
    }

    /// Number of translation + rotation modes (5 for a linear molecule, 6
    /// otherwise, 0 for pre-projected data).
    pub fn trans_rot_count(&self) -> usize {
        self.trans_rot
    }

    /// Indices of the true vibrational modes.
    pub fn vibrational_modes(&self) -> std::ops::Range<usize> {
        self.trans_rot..self.dof
    }

    pub fn frequency(&self, mode: usize) -> f64 {
        self.frequencies[mode]
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    /// Whether a mode's frequency is below the ill-conditioning cutoff and
    /// must be skipped (and flagged) by vibrational sums.
    pub fn is_ill_conditioned(&self, mode: usize, cutoff: f64) -> bool {
        self.frequencies[mode].abs() < cutoff
    }

    /// Coefficient of Cartesian degree of freedom `dof_index` in normal mode
    /// `mode`: the mass-weighted eigenvector component divided by the square
    /// root of the owning atom's mass.
    pub fn projection_coefficient(&self, dof_index: usize, mode: usize) -> f64 {
        self.eigenvectors[(dof_index, mode)] / self.masses[dof_index].sqrt()
    }
}
