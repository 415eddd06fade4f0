//! Projection of Cartesian geometric derivative indices onto normal modes.
//!
//! Every tensor whose key carries a "G" index is contaminated by rigid-body
//! translations and rotations. Contracting each geometric index with the
//! mass-weighted eigenvector matrix rewrites it as a normal-mode ("N") index;
//! the translation/rotation columns stay in place and are excluded later by
//! the vibrational sums, which run over `NormalModes::vibrational_modes`
//! only. This is the precondition for every derivative key feeding the
//! shaking stage.

use crate::core::fields::derivative::DerivativeKey;
use crate::core::modes::NormalModes;
use crate::core::tensors::{DerivativeTensor, DerivativeTensorSet};
use crate::engine::error::BakingError;
use itertools::Itertools;
use tracing::{info, instrument};

/// Projects every geometric tensor of the set into normal-mode space and
/// inserts the projected tensors back. Returns the keys that were added.
#[instrument(skip_all, name = "project_geometrical_derivatives")]
pub fn project_geometrical_derivatives(
    tensors: &mut DerivativeTensorSet,
    modes: &NormalModes,
) -> Result<Vec<DerivativeKey>, BakingError> {
    let geometric: Vec<_> = tensors
        .iter()
        .filter(|tensor| tensor.key().carries_geometry())
        .cloned()
        .collect();

    let mut added = Vec::new();
    for source in geometric {
        let projected_key = source.key().projected();
        if tensors.contains(projected_key, source.frequency()) {
            continue;
        }
        let projected = project_tensor(&source, modes)?;
        info!("projected {} into {}", source.key(), projected_key);
        tensors.insert(projected)?;
        added.push(projected_key);
    }
    Ok(added)
}

/// Contracts each geometric index of one tensor with the mass-weighted
/// eigenvectors. Uncertainties combine in quadrature.
fn project_tensor(
    source: &DerivativeTensor,
    modes: &NormalModes,
) -> Result<DerivativeTensor, BakingError> {
    let key = source.key();
    let dof = modes.dof();
    if !source.is_complete() {
        return Err(BakingError::ProjectionOfIncompleteTensor { key });
    }
    let geoms = key.geom_count();
    if source.values().shape().first().copied().unwrap_or(dof) != dof {
        return Err(BakingError::ProjectionDofMismatch {
            tensor_dof: source.values().shape()[0],
            modes_dof: dof,
        });
    }

    let projected_key = key.projected();
    let mut projected = DerivativeTensor::new(projected_key, source.frequency(), dof);

    let electrical_extents: Vec<usize> = source.values().shape()[geoms..].to_vec();
    let electrical_components: Vec<Vec<usize>> = if electrical_extents.is_empty() {
        vec![Vec::new()]
    } else {
        electrical_extents
            .iter()
            .map(|&extent| 0..extent)
            .multi_cartesian_product()
            .collect()
    };
    let mode_tuples: Vec<Vec<usize>> = (0..geoms).map(|_| 0..dof).multi_cartesian_product().collect();
    let geom_tuples = mode_tuples.clone();

    for mode_tuple in &mode_tuples {
        for electrical in &electrical_components {
            let mut value = 0.0;
            let mut variance = 0.0;
            for geom_tuple in &geom_tuples {
                let coefficient: f64 = geom_tuple
                    .iter()
                    .zip(mode_tuple)
                    .map(|(&g, &a)| modes.projection_coefficient(g, a))
                    .product();
                let mut component = geom_tuple.clone();
                component.extend(electrical);
                value += coefficient * source.values().get(&component)?;
                let sigma = source.uncertainty_tensor().get(&component)?;
                variance += (coefficient * sigma).powi(2);
            }
            let mut component = mode_tuple.clone();
            component.extend(electrical);
            projected.set_component(&component, value, variance.sqrt())?;
        }
    }
    Ok(projected)
}
