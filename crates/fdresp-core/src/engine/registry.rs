//! The explicit registry of perturbation-theory terms: which contraction
//! shape evaluates which (property, kind, orders) tuple, and which derivative
//! tensors it needs. Populated once at initialization and queried by both the
//! availability checker and the evaluator.

use crate::core::contributions::{ContributionId, ContributionKind};
use crate::core::fields::derivative::{DerivativeKey, PropertyKind};
use crate::engine::contraction::ContractionKind;
use std::collections::{BTreeMap, BTreeSet};

/// One registered term: its identity, the kernel shape that evaluates it and
/// the property-derivative tensors filling the kernel slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractionSpec {
    pub id: ContributionId,
    pub kind: ContractionKind,
    /// Slot tensors in kernel order (empty for ZPVA kinds, which derive
    /// their input from the target property).
    pub slots: Vec<DerivativeKey>,
}

impl ContractionSpec {
    /// The exact set of derivative keys the term's formula contracts,
    /// cubic force constants included where the kernel uses them.
    pub fn derivatives_needed(&self) -> Vec<DerivativeKey> {
        let base = self.id.property.base_key();
        let mut needed: BTreeSet<DerivativeKey> = match self.kind {
            ContractionKind::Zpva10 => [base.differentiate_by_modes(2)].into(),
            ContractionKind::Zpva01 => {
                [base.differentiate_by_modes(1), DerivativeKey::modes(3)].into()
            }
            ContractionKind::SquareHarmonic
            | ContractionKind::SquareSecondOrder
            | ContractionKind::TripleHarmonicAnharmonic => self.slots.iter().copied().collect(),
            ContractionKind::SquareMixedAnharmonic
            | ContractionKind::SquareMechanicalAnharmonic
            | ContractionKind::TripleMechanicalAnharmonic => {
                let mut keys: BTreeSet<DerivativeKey> = self.slots.iter().copied().collect();
                keys.insert(DerivativeKey::modes(3));
                keys
            }
        };
        needed.remove(&DerivativeKey::ENERGY);
        needed.into_iter().collect()
    }

    /// Whether the slot tensor at the given frequency matters: ZPVA inputs
    /// follow the target frequency, pure-vibrational inputs are static.
    pub fn follows_target_frequency(&self, key: DerivativeKey) -> bool {
        matches!(self.kind, ContractionKind::Zpva10 | ContractionKind::Zpva01)
            && key != DerivativeKey::modes(3)
    }
}

/// The full table of registered terms, keyed by identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContributionRegistry {
    specs: BTreeMap<ContributionId, ContractionSpec>,
}

impl ContributionRegistry {
    /// The standard Bishop–Kirtman family: ZPVA up to first order for every
    /// electrical property, pure-vibrational terms for the polarizability
    /// ([µ²]) and the first hyperpolarizability ([µα], [µ³]).
    pub fn standard() -> Self {
        let nf: DerivativeKey = DerivativeKey::new(0, 1, 1);
        let nff: DerivativeKey = DerivativeKey::new(0, 1, 2);
        let nnf: DerivativeKey = DerivativeKey::new(0, 2, 1);
        let nnff: DerivativeKey = DerivativeKey::new(0, 2, 2);

        let mut specs = BTreeMap::new();
        let mut register = |id: ContributionId, kind: ContractionKind, slots: Vec<DerivativeKey>| {
            specs.insert(id, ContractionSpec { id, kind, slots });
        };

        for property in [
            PropertyKind::Dipole,
            PropertyKind::Polarizability,
            PropertyKind::FirstHyperpolarizability,
            PropertyKind::SecondHyperpolarizability,
        ] {
            register(
                ContributionId::zpva(property, 1, 0),
                ContractionKind::Zpva10,
                Vec::new(),
            );
            register(
                ContributionId::zpva(property, 0, 1),
                ContractionKind::Zpva01,
                Vec::new(),
            );
        }

        let alpha = PropertyKind::Polarizability;
        register(
            ContributionId::pure_vibrational(alpha, 0, 0),
            ContractionKind::SquareHarmonic,
            vec![nf, nf],
        );
        register(
            ContributionId::pure_vibrational(alpha, 1, 1),
            ContractionKind::SquareMixedAnharmonic,
            vec![nf, nf, nnf, nnf],
        );
        register(
            ContributionId::pure_vibrational(alpha, 2, 0),
            ContractionKind::SquareSecondOrder,
            vec![nnf, nnf],
        );
        register(
            ContributionId::pure_vibrational(alpha, 0, 2),
            ContractionKind::SquareMechanicalAnharmonic,
            vec![nf, nf],
        );

        let beta = PropertyKind::FirstHyperpolarizability;
        register(
            ContributionId::pure_vibrational(beta, 0, 0),
            ContractionKind::SquareHarmonic,
            vec![nf, nff],
        );
        register(
            ContributionId::pure_vibrational(beta, 1, 1),
            ContractionKind::SquareMixedAnharmonic,
            vec![nf, nff, nnf, nnff],
        );
        register(
            ContributionId::pure_vibrational(beta, 2, 0),
            ContractionKind::SquareSecondOrder,
            vec![nnf, nnff],
        );
        register(
            ContributionId::pure_vibrational(beta, 0, 2),
            ContractionKind::SquareMechanicalAnharmonic,
            vec![nf, nff],
        );
        register(
            ContributionId::pure_vibrational(beta, 1, 0),
            ContractionKind::TripleHarmonicAnharmonic,
            vec![nf, nnf],
        );
        register(
            ContributionId::pure_vibrational(beta, 0, 1),
            ContractionKind::TripleMechanicalAnharmonic,
            vec![nf],
        );

        Self { specs }
    }

    pub fn get(&self, id: &ContributionId) -> Option<&ContractionSpec> {
        self.specs.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContractionSpec> {
        self.specs.values()
    }

    pub fn for_property(
        &self,
        property: PropertyKind,
    ) -> impl Iterator<Item = &ContractionSpec> {
        self.specs
            .values()
            .filter(move |spec| spec.id.property == property)
    }

    /// Properties with at least one registered term.
    pub fn properties(&self) -> Vec<PropertyKind> {
        self.specs
            .keys()
            .map(|id| id.property)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Largest registered anharmonicity sum (m + n) for a property's
    /// pure-vibrational terms; ZPVA terms are not counted.
    pub fn max_pv_level(&self, property: PropertyKind) -> Option<usize> {
        self.specs
            .keys()
            .filter(|id| {
                id.property == property && id.kind == ContributionKind::PureVibrational
            })
            .map(|id| (id.electrical + id.mechanical) as usize)
            .max()
    }
}
