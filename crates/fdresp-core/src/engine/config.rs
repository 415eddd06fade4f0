//! The differentiation recipe: everything a run needs to know about the
//! field ladder, the requested properties, and the numeric gates.

use crate::core::fields::derivative::{DerivativeKey, PropertyKind};
use crate::core::fields::{Axis, FieldCombination, Frequency};
use crate::core::store::BasisRequirements;
use crate::engine::romberg::node_layout;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Field ratio must be > 1.0, got {0}")]
    BadRatio(f64),
    #[error("Minimum field must be positive, got {0}")]
    BadMinField(f64),
    #[error("Ladder depth (k_max) must be at least 1, got {0}")]
    BadLadderDepth(usize),
    #[error("Degrees of freedom must be a positive multiple of 3, got {0}")]
    BadDof(usize),
    #[error("At least one basis must be requested")]
    EmptyBases,
    #[error("Differentiation order for {property} must be at least 1, got {order}")]
    BadOrder { property: PropertyKind, order: usize },
    #[error("Basis {0} is requested twice")]
    DuplicateBasis(PropertyKind),
    #[error("I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("TOML serialization error: {source}")]
    TomlSer {
        #[from]
        source: toml::ser::Error,
    },
}

/// One property to differentiate numerically, and how many times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasisSpec {
    pub property: PropertyKind,
    pub order: usize,
}

fn default_name() -> String {
    "numerical-differentiation".to_string()
}

fn default_min_field() -> f64 {
    0.0004
}

fn default_ratio() -> f64 {
    2.0
}

fn default_k_max() -> usize {
    5
}

fn default_low_frequency_cutoff() -> f64 {
    1e-4
}

fn default_romberg_threshold() -> f64 {
    0.1
}

/// Configuration of a full differentiation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(default = "default_name")]
    pub name: String,
    /// Cartesian degrees of freedom of the geometry (3 × atom count).
    pub dof: usize,
    /// Smallest field amplitude of the ladder, in au.
    #[serde(default = "default_min_field")]
    pub min_field: f64,
    /// Ratio between consecutive ladder amplitudes.
    #[serde(default = "default_ratio")]
    pub ratio: f64,
    /// Number of rows of each Romberg triangle.
    #[serde(default = "default_k_max")]
    pub k_max: usize,
    /// Optical frequencies for which dynamic properties were computed; empty
    /// when only static results are wanted.
    #[serde(default)]
    pub frequencies: Vec<Frequency>,
    /// Vibrational modes below this frequency (au) are treated as
    /// ill-conditioned.
    #[serde(default = "default_low_frequency_cutoff")]
    pub low_frequency_cutoff: f64,
    /// Relative Romberg spread above which a component is flagged.
    #[serde(default = "default_romberg_threshold")]
    pub romberg_threshold: f64,
    /// Properties recorded per field, with their differentiation orders.
    /// Kept last so the TOML array-of-tables serializes after the scalars.
    pub bases: Vec<BasisSpec>,
}

impl Recipe {
    pub fn builder() -> RecipeBuilder {
        RecipeBuilder::default()
    }

    /// Checks the structural invariants; every constructor path runs this
    /// before the recipe is used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ratio <= 1.0 {
            return Err(ConfigError::BadRatio(self.ratio));
        }
        if self.min_field <= 0.0 {
            return Err(ConfigError::BadMinField(self.min_field));
        }
        if self.k_max < 1 {
            return Err(ConfigError::BadLadderDepth(self.k_max));
        }
        if self.dof == 0 || self.dof % 3 != 0 {
            return Err(ConfigError::BadDof(self.dof));
        }
        if self.bases.is_empty() {
            return Err(ConfigError::EmptyBases);
        }
        let mut seen = BTreeSet::new();
        for basis in &self.bases {
            if basis.order < 1 {
                return Err(ConfigError::BadOrder {
                    property: basis.property,
                    order: basis.order,
                });
            }
            if !seen.insert(basis.property) {
                return Err(ConfigError::DuplicateBasis(basis.property));
            }
        }
        Ok(())
    }

    pub fn basis_order(&self, property: PropertyKind) -> Option<usize> {
        self.bases
            .iter()
            .find(|basis| basis.property == property)
            .map(|basis| basis.order)
    }

    /// Frequencies at which a property must be present in the store: always
    /// the static limit, plus the recipe frequencies for frequency-capable
    /// properties.
    pub fn frequencies_for(&self, property: PropertyKind) -> Vec<Frequency> {
        let mut result = vec![Frequency::Static];
        if property.supports_dynamic() {
            result.extend(self.frequencies.iter().copied());
        }
        result
    }

    /// Deterministically enumerates the exact set of field combinations the
    /// recipe requires, together with the (property, frequency) pairs each
    /// must record.
    pub fn bases(&self) -> BasisRequirements {
        let max_order = self
            .bases
            .iter()
            .map(|basis| basis.order)
            .max()
            .unwrap_or(0);

        let mut combinations = BTreeSet::new();
        combinations.insert(FieldCombination::zero());
        for order in 1..=max_order {
            for axis_orders in axis_order_splits(order) {
                for k in 0..self.k_max {
                    for levels in ladder_levels(&axis_orders, k) {
                        combinations.insert(FieldCombination::new(levels));
                    }
                }
            }
        }

        let mut properties = Vec::new();
        for basis in &self.bases {
            for frequency in self.frequencies_for(basis.property) {
                properties.push((basis.property, frequency));
            }
        }

        BasisRequirements {
            combinations,
            properties,
        }
    }

    /// The derivative keys a full bake of this recipe produces; growing any
    /// basis order only adds keys.
    pub fn maximum_derivatives(&self) -> BTreeSet<DerivativeKey> {
        let mut keys = BTreeSet::new();
        for basis in &self.bases {
            for order in 1..=basis.order {
                keys.insert(basis.property.base_key().differentiate_by_field(order as u8));
            }
        }
        keys
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_text = path.as_ref().to_string_lossy().to_string();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
            path: path_text.clone(),
            source: e,
        })?;
        let recipe: Recipe = toml::from_str(&content).map_err(|e| ConfigError::Toml {
            path: path_text,
            source: e,
        })?;
        recipe.validate()?;
        Ok(recipe)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        self.validate()?;
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content).map_err(|e| ConfigError::Io {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })
    }
}

/// All ways of distributing a total derivative order over the three field
/// axes, in deterministic order.
fn axis_order_splits(order: usize) -> Vec<[usize; 3]> {
    let mut splits = Vec::new();
    for x in (0..=order).rev() {
        for y in (0..=order - x).rev() {
            splits.push([x, y, order - x - y]);
        }
    }
    splits
}

/// Field-level combinations touched by the product stencil for the given
/// per-axis orders at ladder row `k`.
fn ladder_levels(axis_orders: &[usize; 3], k: usize) -> Vec<[i32; 3]> {
    let per_axis: Vec<Vec<i32>> = axis_orders
        .iter()
        .map(|&order| {
            if order == 0 {
                return vec![0];
            }
            let (pairs, center) = node_layout(order);
            let mut levels = Vec::new();
            if center {
                levels.push(0);
            }
            for j in 0..pairs {
                let level = (k + j + 1) as i32;
                levels.push(level);
                levels.push(-level);
            }
            levels
        })
        .collect();
    per_axis
        .into_iter()
        .multi_cartesian_product()
        .map(|levels| [levels[0], levels[1], levels[2]])
        .collect()
}

/// Builder for [`Recipe`], with the conventional defaults for the ladder
/// geometry.
#[derive(Default)]
pub struct RecipeBuilder {
    name: Option<String>,
    dof: Option<usize>,
    min_field: Option<f64>,
    ratio: Option<f64>,
    k_max: Option<usize>,
    bases: Vec<BasisSpec>,
    frequencies: Vec<Frequency>,
    low_frequency_cutoff: Option<f64>,
    romberg_threshold: Option<f64>,
}

impl RecipeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn dof(mut self, dof: usize) -> Self {
        self.dof = Some(dof);
        self
    }

    pub fn min_field(mut self, min_field: f64) -> Self {
        self.min_field = Some(min_field);
        self
    }

    pub fn ratio(mut self, ratio: f64) -> Self {
        self.ratio = Some(ratio);
        self
    }

    pub fn k_max(mut self, k_max: usize) -> Self {
        self.k_max = Some(k_max);
        self
    }

    pub fn basis(mut self, property: PropertyKind, order: usize) -> Self {
        self.bases.push(BasisSpec { property, order });
        self
    }

    pub fn frequency(mut self, frequency: Frequency) -> Self {
        self.frequencies.push(frequency);
        self
    }

    pub fn low_frequency_cutoff(mut self, cutoff: f64) -> Self {
        self.low_frequency_cutoff = Some(cutoff);
        self
    }

    pub fn romberg_threshold(mut self, threshold: f64) -> Self {
        self.romberg_threshold = Some(threshold);
        self
    }

    pub fn build(self) -> Result<Recipe, ConfigError> {
        let recipe = Recipe {
            name: self.name.unwrap_or_else(default_name),
            dof: self.dof.ok_or(ConfigError::MissingParameter("dof"))?,
            min_field: self.min_field.unwrap_or_else(default_min_field),
            ratio: self.ratio.unwrap_or_else(default_ratio),
            k_max: self.k_max.unwrap_or_else(default_k_max),
            bases: self.bases,
            frequencies: self.frequencies,
            low_frequency_cutoff: self
                .low_frequency_cutoff
                .unwrap_or_else(default_low_frequency_cutoff),
            romberg_threshold: self
                .romberg_threshold
                .unwrap_or_else(default_romberg_threshold),
        };
        recipe.validate()?;
        Ok(recipe)
    }
}

/// Axis helper used by the baker: the per-axis derivative orders of one
/// representative component of an electrical derivative.
pub(crate) fn axis_orders_of(component: &[usize]) -> [usize; 3] {
    let mut orders = [0usize; 3];
    for &index in component {
        orders[index] += 1;
    }
    debug_assert!(component.iter().all(|&i| Axis::from_index(i).is_some()));
    orders
}
