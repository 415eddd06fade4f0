//! Derivative-order keys and the properties they differentiate.
//!
//! A [`DerivativeKey`] is the multi-index describing how many times a quantity
//! was differentiated with respect to raw Cartesian displacements ("G"),
//! projected normal modes ("N") and the electric field ("F"). The compact
//! text form concatenates the letters, e.g. `"FF"`, `"NNF"`, `"GdD"`-style
//! dynamic tags are carried separately by the tensor's frequency.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A derivative order tuple: counts of geometric ("G"), normal-mode ("N") and
/// field ("F") indices, in that fixed index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DerivativeKey {
    geoms: u8,
    modes: u8,
    fields: u8,
}

impl DerivativeKey {
    pub const ENERGY: DerivativeKey = DerivativeKey::new(0, 0, 0);

    pub const fn new(geoms: u8, modes: u8, fields: u8) -> Self {
        Self {
            geoms,
            modes,
            fields,
        }
    }

    pub const fn fields(fields: u8) -> Self {
        Self::new(0, 0, fields)
    }

    pub const fn modes(modes: u8) -> Self {
        Self::new(0, modes, 0)
    }

    pub fn geom_count(&self) -> usize {
        self.geoms as usize
    }

    pub fn mode_count(&self) -> usize {
        self.modes as usize
    }

    pub fn field_count(&self) -> usize {
        self.fields as usize
    }

    /// Total differentiation order.
    pub fn order(&self) -> usize {
        self.geom_count() + self.mode_count() + self.field_count()
    }

    pub fn is_electrical(&self) -> bool {
        self.geoms == 0 && self.modes == 0
    }

    pub fn carries_modes(&self) -> bool {
        self.modes > 0
    }

    pub fn carries_geometry(&self) -> bool {
        self.geoms > 0
    }

    /// The key obtained by differentiating `count` more times with respect to
    /// the field.
    pub fn differentiate_by_field(&self, count: u8) -> DerivativeKey {
        DerivativeKey::new(self.geoms, self.modes, self.fields + count)
    }

    /// The key obtained by differentiating `count` more times with respect to
    /// normal modes (used to express dependency sets like "N" + base).
    pub fn differentiate_by_modes(&self, count: u8) -> DerivativeKey {
        DerivativeKey::new(self.geoms, self.modes + count, self.fields)
    }

    /// The key with every geometric index replaced by a normal-mode index,
    /// the outcome of projecting out translations/rotations.
    pub fn projected(&self) -> DerivativeKey {
        DerivativeKey::new(0, self.modes + self.geoms, self.fields)
    }

    /// Dense tensor shape: one dimension of extent `dof` per G/N index, one
    /// of extent 3 per F index. Order 0 (energy) has an empty shape.
    pub fn shape(&self, dof: usize) -> Vec<usize> {
        let mut shape = Vec::with_capacity(self.order());
        shape.extend(std::iter::repeat_n(dof, self.geom_count() + self.mode_count()));
        shape.extend(std::iter::repeat_n(3usize, self.field_count()));
        shape
    }

    /// Index ranges of the three symmetric blocks (geometric, mode, field)
    /// inside a component tuple.
    fn blocks(&self, dof: usize) -> [(usize, usize); 3] {
        [
            (self.geom_count(), dof),
            (self.mode_count(), dof),
            (self.field_count(), 3),
        ]
    }

    /// Iterates over one representative component per set of equivalent
    /// components, treating the indices of each block (G, N, F) as mutually
    /// symmetric: representatives are non-decreasing within each block.
    pub fn representative_components(&self, dof: usize) -> Vec<Vec<usize>> {
        let mut result: Vec<Vec<usize>> = vec![Vec::new()];
        for (len, extent) in self.blocks(dof) {
            if len == 0 {
                continue;
            }
            let block_reps: Vec<Vec<usize>> = (0..extent)
                .combinations_with_replacement(len)
                .collect();
            result = result
                .into_iter()
                .cartesian_product(block_reps)
                .map(|(mut head, tail)| {
                    head.extend(tail);
                    head
                })
                .collect();
        }
        result
    }

    /// All components equivalent to `component` under within-block index
    /// permutations (the inverse of [`representative_components`]).
    ///
    /// [`representative_components`]: DerivativeKey::representative_components
    pub fn equivalent_components(&self, dof: usize, component: &[usize]) -> Vec<Vec<usize>> {
        debug_assert_eq!(component.len(), self.order());
        let mut result: Vec<Vec<usize>> = vec![Vec::new()];
        let mut offset = 0;
        for (len, _) in self.blocks(dof) {
            if len == 0 {
                continue;
            }
            let block = &component[offset..offset + len];
            offset += len;
            let block_perms: Vec<Vec<usize>> = block
                .iter()
                .copied()
                .permutations(len)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            result = result
                .into_iter()
                .cartesian_product(block_perms)
                .map(|(mut head, tail)| {
                    head.extend(tail);
                    head
                })
                .collect();
        }
        result
    }

    /// Every component tuple, without any symmetry assumption. Used for
    /// frequency-tagged tensors where index permutation symmetry does not
    /// hold.
    pub fn all_components(&self, dof: usize) -> Vec<Vec<usize>> {
        if self.order() == 0 {
            return vec![Vec::new()];
        }
        self.shape(dof)
            .into_iter()
            .map(|extent| 0..extent)
            .multi_cartesian_product()
            .collect()
    }
}

impl fmt::Display for DerivativeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.order() == 0 {
            return write!(f, "energy");
        }
        for _ in 0..self.geoms {
            write!(f, "G")?;
        }
        for _ in 0..self.modes {
            write!(f, "N")?;
        }
        for _ in 0..self.fields {
            write!(f, "F")?;
        }
        Ok(())
    }
}

impl FromStr for DerivativeKey {
    type Err = ParseDerivativeKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "energy" {
            return Ok(DerivativeKey::ENERGY);
        }
        let mut key = DerivativeKey::default();
        for c in s.chars() {
            match c {
                'G' => key.geoms += 1,
                'N' => key.modes += 1,
                'F' => key.fields += 1,
                _ => return Err(ParseDerivativeKeyError(s.to_string())),
            }
        }
        Ok(key)
    }
}

/// Error raised when a derivative-key string cannot be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a valid derivative key (expected 'energy' or a string of G/N/F letters)")]
pub struct ParseDerivativeKeyError(String);

/// The per-field quantities an external computation stage may record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    Energy,
    Dipole,
    Polarizability,
    FirstHyperpolarizability,
    SecondHyperpolarizability,
    Gradient,
    Hessian,
}

impl PropertyKind {
    pub const ALL: [PropertyKind; 7] = [
        PropertyKind::Energy,
        PropertyKind::Dipole,
        PropertyKind::Polarizability,
        PropertyKind::FirstHyperpolarizability,
        PropertyKind::SecondHyperpolarizability,
        PropertyKind::Gradient,
        PropertyKind::Hessian,
    ];

    /// The derivative key this property corresponds to when recorded as-is.
    pub fn base_key(self) -> DerivativeKey {
        match self {
            PropertyKind::Energy => DerivativeKey::new(0, 0, 0),
            PropertyKind::Dipole => DerivativeKey::new(0, 0, 1),
            PropertyKind::Polarizability => DerivativeKey::new(0, 0, 2),
            PropertyKind::FirstHyperpolarizability => DerivativeKey::new(0, 0, 3),
            PropertyKind::SecondHyperpolarizability => DerivativeKey::new(0, 0, 4),
            PropertyKind::Gradient => DerivativeKey::new(1, 0, 0),
            PropertyKind::Hessian => DerivativeKey::new(2, 0, 0),
        }
    }

    pub fn shape(self, dof: usize) -> Vec<usize> {
        self.base_key().shape(dof)
    }

    /// Whether the quantity exists as a frequency-dependent variant.
    pub fn supports_dynamic(self) -> bool {
        matches!(
            self,
            PropertyKind::Polarizability
                | PropertyKind::FirstHyperpolarizability
                | PropertyKind::SecondHyperpolarizability
        )
    }

    /// Order of the property as an electrical derivative of the energy; zero
    /// for geometric quantities.
    pub fn electrical_order(self) -> usize {
        self.base_key().field_count()
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PropertyKind::Energy => "energy",
            PropertyKind::Dipole => "dipole",
            PropertyKind::Polarizability => "polarizability",
            PropertyKind::FirstHyperpolarizability => "first_hyperpolarizability",
            PropertyKind::SecondHyperpolarizability => "second_hyperpolarizability",
            PropertyKind::Gradient => "gradient",
            PropertyKind::Hessian => "hessian",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for PropertyKind {
    type Err = ParsePropertyKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PropertyKind::ALL
            .into_iter()
            .find(|kind| kind.to_string() == s)
            .ok_or_else(|| ParsePropertyKindError(s.to_string()))
    }
}

/// Error raised when a property-kind string cannot be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a known property kind")]
pub struct ParsePropertyKindError(String);
