//! Named vibrational-correction terms and their ordered collection.
//!
//! A contribution is identified by the property it corrects, whether it is a
//! zero-point average (ZPVA) or a pure-vibrational term, and its
//! (electrical, mechanical) anharmonicity orders — e.g. `[µα]^(1,1)` is the
//! pure-vibrational correction to the first hyperpolarizability with
//! first-order electrical and mechanical anharmonicity.

use crate::core::fields::Frequency;
use crate::core::fields::derivative::{DerivativeKey, PropertyKind};
use crate::core::tensors::Tensor;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ContributionsError {
    #[error("Contribution {id} @ {frequency} is already present")]
    DuplicateContribution {
        id: ContributionId,
        frequency: Frequency,
    },
}

/// Whether a term averages the property over the ground vibrational state or
/// arises from nuclear relaxation under the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContributionKind {
    Zpva,
    PureVibrational,
}

impl fmt::Display for ContributionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContributionKind::Zpva => write!(f, "zpva"),
            ContributionKind::PureVibrational => write!(f, "pv"),
        }
    }
}

/// Identity of one correction term. Ordering groups by property, then kind,
/// then ascending (electrical, mechanical) anharmonicity orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContributionId {
    pub property: PropertyKind,
    pub kind: ContributionKind,
    pub electrical: u8,
    pub mechanical: u8,
}

impl ContributionId {
    pub fn zpva(property: PropertyKind, electrical: u8, mechanical: u8) -> Self {
        Self {
            property,
            kind: ContributionKind::Zpva,
            electrical,
            mechanical,
        }
    }

    pub fn pure_vibrational(property: PropertyKind, electrical: u8, mechanical: u8) -> Self {
        Self {
            property,
            kind: ContributionKind::PureVibrational,
            electrical,
            mechanical,
        }
    }

    pub fn orders(&self) -> (u8, u8) {
        (self.electrical, self.mechanical)
    }

    /// The square-bracket label of the perturbation-theory term, e.g.
    /// `[µ²]` for the dipole-squared contribution to the polarizability.
    pub fn bracket(&self) -> &'static str {
        match (self.kind, self.property) {
            (ContributionKind::Zpva, _) => "ZPVA",
            (ContributionKind::PureVibrational, PropertyKind::Polarizability) => "[µ²]",
            (ContributionKind::PureVibrational, PropertyKind::FirstHyperpolarizability) => {
                // the harmonic family pairs µ with α; the cubic family is µ³
                match (self.electrical, self.mechanical) {
                    (1, 0) | (0, 1) => "[µ³]",
                    _ => "[µα]",
                }
            }
            (ContributionKind::PureVibrational, _) => "[pv]",
        }
    }
}

impl fmt::Display for ContributionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}^({},{}) of {}",
            self.bracket(),
            self.electrical,
            self.mechanical,
            self.property
        )
    }
}

/// Outcome of evaluating (or failing to evaluate) one term at one frequency.
#[derive(Debug, Clone, PartialEq)]
pub enum ContributionResult {
    /// The closed-form contraction was evaluated. `flagged` marks a
    /// low-confidence value (ill-conditioned mode skipped or noisy input).
    Computed { tensor: Tensor, flagged: bool },
    /// A required derivative tensor was absent; the term was skipped.
    Unavailable { missing: Vec<DerivativeKey> },
}

/// One correction term at one frequency, together with the derivative keys
/// its formula depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct VibrationalContribution {
    pub id: ContributionId,
    pub frequency: Frequency,
    /// The exact set of derivative tensors the term's formula contracts.
    pub required: Vec<DerivativeKey>,
    pub result: ContributionResult,
}

impl VibrationalContribution {
    /// The derivative tensors this term depends on.
    pub fn derivatives_needed(&self) -> &[DerivativeKey] {
        &self.required
    }

    pub fn tensor(&self) -> Option<&Tensor> {
        match &self.result {
            ContributionResult::Computed { tensor, .. } => Some(tensor),
            ContributionResult::Unavailable { .. } => None,
        }
    }

    pub fn is_computed(&self) -> bool {
        matches!(self.result, ContributionResult::Computed { .. })
    }

    pub fn is_flagged(&self) -> bool {
        matches!(
            self.result,
            ContributionResult::Computed { flagged: true, .. }
        )
    }
}

/// Append-only, sortable collection of vibrational contributions; the final
/// product of the shaking stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VibrationalContributionsData {
    entries: Vec<VibrationalContribution>,
}

impl VibrationalContributionsData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a contribution. A second entry with the same identity tuple
    /// and frequency is rejected unless `overwrite` is set, in which case it
    /// replaces the first in place.
    pub fn add_contribution(
        &mut self,
        contribution: VibrationalContribution,
        overwrite: bool,
    ) -> Result<(), ContributionsError> {
        if let Some(position) = self
            .entries
            .iter()
            .position(|entry| {
                entry.id == contribution.id && entry.frequency == contribution.frequency
            })
        {
            if !overwrite {
                return Err(ContributionsError::DuplicateContribution {
                    id: contribution.id,
                    frequency: contribution.frequency,
                });
            }
            self.entries[position] = contribution;
        } else {
            self.entries.push(contribution);
        }
        Ok(())
    }

    pub fn get(
        &self,
        id: ContributionId,
        frequency: Frequency,
    ) -> Option<&VibrationalContribution> {
        self.entries
            .iter()
            .find(|entry| entry.id == id && entry.frequency == frequency)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VibrationalContribution> {
        self.entries.iter()
    }

    pub fn per_property(
        &self,
        property: PropertyKind,
    ) -> impl Iterator<Item = &VibrationalContribution> {
        self.entries
            .iter()
            .filter(move |entry| entry.id.property == property)
    }

    /// Sorts entries by property, kind, ascending anharmonicity orders, then
    /// frequency, giving the deterministic output ordering.
    pub fn sort_per_type_and_order(&mut self) {
        self.entries
            .sort_by(|a, b| (a.id, a.frequency).cmp(&(b.id, b.frequency)));
    }

    fn sum_of(
        &self,
        property: PropertyKind,
        frequency: Frequency,
        kind: Option<ContributionKind>,
    ) -> Option<Tensor> {
        let mut total: Option<Tensor> = None;
        for entry in self.entries.iter().filter(|entry| {
            entry.id.property == property
                && entry.frequency == frequency
                && kind.is_none_or(|kind| entry.id.kind == kind)
        }) {
            if let Some(tensor) = entry.tensor() {
                match &mut total {
                    Some(total) => total
                        .add(tensor)
                        .expect("contributions to one property share a shape"),
                    None => total = Some(tensor.clone()),
                }
            }
        }
        total
    }

    /// Sum of the computed ZPVA terms for one property and frequency.
    pub fn total_zpva(&self, property: PropertyKind, frequency: Frequency) -> Option<Tensor> {
        self.sum_of(property, frequency, Some(ContributionKind::Zpva))
    }

    /// Sum of the computed pure-vibrational terms for one property and
    /// frequency.
    pub fn total_pv(&self, property: PropertyKind, frequency: Frequency) -> Option<Tensor> {
        self.sum_of(property, frequency, Some(ContributionKind::PureVibrational))
    }

    /// Sum of every computed term for one property and frequency.
    pub fn total(&self, property: PropertyKind, frequency: Frequency) -> Option<Tensor> {
        self.sum_of(property, frequency, None)
    }
}
