use thiserror::Error;

use crate::core::fields::derivative::{DerivativeKey, PropertyKind};
use crate::core::fields::{FieldCombination, Frequency};
use crate::core::modes::ModesError;
use crate::core::store::StoreError;
use crate::core::tensors::TensorError;

/// Structural problems with a differentiation run: the configuration is
/// inconsistent with what was asked or supplied. Fatal before any tensor is
/// produced.
#[derive(Debug, Error)]
pub enum BakingError {
    #[error("Configuration error: {source}")]
    Config {
        #[from]
        source: crate::engine::config::ConfigError,
    },

    #[error("No differentiation requested")]
    NothingToBake,

    #[error(
        "Differentiation level {requested} for {property} exceeds the level declared by the recipe ({available})"
    )]
    LevelTooHigh {
        property: PropertyKind,
        requested: usize,
        available: usize,
    },

    #[error("{property} is not part of the recipe's bases")]
    UnknownBasis { property: PropertyKind },

    #[error("Store holds data for {store_dof} degrees of freedom, the recipe declares {recipe_dof}")]
    DofMismatch { store_dof: usize, recipe_dof: usize },

    #[error(
        "Field ladder is asymmetric: {combination} is present but its mirror image is missing"
    )]
    AsymmetricLadder { combination: FieldCombination },

    #[error("Finite-difference stencil for order {order} at ratio {ratio} is singular")]
    SingularStencil { order: usize, ratio: f64 },

    #[error("Tensor bookkeeping error: {source}")]
    Tensor {
        #[from]
        source: TensorError,
    },

    #[error("Normal-mode data error: {source}")]
    Modes {
        #[from]
        source: ModesError,
    },

    #[error("Cannot project geometric derivatives: tensor {key} has unavailable components")]
    ProjectionOfIncompleteTensor { key: DerivativeKey },

    #[error(
        "Geometric tensor carries {tensor_dof} degrees of freedom, the mode data declares {modes_dof}"
    )]
    ProjectionDofMismatch { tensor_dof: usize, modes_dof: usize },

    #[error("Store error: {source}")]
    Store {
        #[from]
        source: StoreError,
    },
}

/// Structural problems with a vibrational-contribution run.
#[derive(Debug, Error)]
pub enum ShakingError {
    #[error("No contraction formula is registered for {property} at orders ({electrical},{mechanical})")]
    NoFormula {
        property: PropertyKind,
        electrical: u8,
        mechanical: u8,
    },

    #[error("No vibrational contribution exists for {property}")]
    NotAnElectricalProperty { property: PropertyKind },

    #[error(
        "Derivative tensors carry {tensor_dof} normal-mode indices, the mode data declares {modes_dof}"
    )]
    DofMismatch { tensor_dof: usize, modes_dof: usize },

    #[error("Derivative not available: {key} @ {frequency}")]
    DerivativeNotAvailable {
        key: DerivativeKey,
        frequency: Frequency,
    },

    #[error("Tensor bookkeeping error: {source}")]
    Tensor {
        #[from]
        source: TensorError,
    },

    #[error("Contribution collection error: {source}")]
    Contributions {
        #[from]
        source: crate::core::contributions::ContributionsError,
    },
}
