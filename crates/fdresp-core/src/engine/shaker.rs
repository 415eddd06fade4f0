//! The Shaker: availability checking and evaluation of vibrational
//! contributions from a set of derivative tensors and normal-mode data.
//!
//! Every registered term moves through a small state machine: pending →
//! computable when every derivative its formula needs is present, complete
//! and quiet enough; pending → unavailable otherwise. Computable terms are
//! evaluated by the generic contraction kernels; unavailable terms are
//! reported with their missing dependency list, never fatally.

use crate::core::contributions::{
    ContributionId, ContributionKind, ContributionResult, VibrationalContribution,
    VibrationalContributionsData,
};
use crate::core::fields::Frequency;
use crate::core::fields::derivative::{DerivativeKey, PropertyKind};
use crate::core::modes::NormalModes;
use crate::core::tensors::{DerivativeTensorSet, Tensor};
use crate::engine::contraction::{ContractionContext, ContractionKind, evaluate_component, evaluate_zpva};
use crate::engine::error::ShakingError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::registry::{ContractionSpec, ContributionRegistry};
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

/// Numeric gates of a shake run.
#[derive(Debug, Clone, PartialEq)]
pub struct ShakeOptions {
    /// Optical frequencies to evaluate dynamic contributions at, on top of
    /// the static limit.
    pub frequencies: Vec<Frequency>,
    /// Modes below this frequency (au) are skipped and flag the result.
    pub mode_cutoff: f64,
    /// Input tensors whose largest relative uncertainty exceeds this are not
    /// trusted as dependencies.
    pub uncertainty_threshold: f64,
}

impl Default for ShakeOptions {
    fn default() -> Self {
        Self {
            frequencies: Vec::new(),
            mode_cutoff: 1e-4,
            uncertainty_threshold: 0.1,
        }
    }
}

/// Availability of one term once its dependencies were examined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Computable,
    Unavailable { missing: Vec<DerivativeKey> },
}

impl Availability {
    pub fn is_computable(&self) -> bool {
        matches!(self, Availability::Computable)
    }
}

/// Evaluates vibrational corrections against a fixed tensor set and mode
/// description.
pub struct Shaker<'a> {
    tensors: &'a DerivativeTensorSet,
    modes: &'a NormalModes,
    registry: ContributionRegistry,
    options: ShakeOptions,
}

impl<'a> Shaker<'a> {
    pub fn new(
        tensors: &'a DerivativeTensorSet,
        modes: &'a NormalModes,
        options: ShakeOptions,
    ) -> Result<Self, ShakingError> {
        for tensor in tensors.iter() {
            if tensor.key().carries_modes() {
                let tensor_dof = tensor.values().shape()[0];
                if tensor_dof != modes.dof() {
                    return Err(ShakingError::DofMismatch {
                        tensor_dof,
                        modes_dof: modes.dof(),
                    });
                }
            }
        }
        Ok(Self {
            tensors,
            modes,
            registry: ContributionRegistry::standard(),
            options,
        })
    }

    pub fn registry(&self) -> &ContributionRegistry {
        &self.registry
    }

    /// The dependencies of `spec` that are absent, incomplete or too noisy at
    /// the given evaluation frequency.
    fn missing_for(&self, spec: &ContractionSpec, frequency: Frequency) -> Vec<DerivativeKey> {
        let mut missing = Vec::new();
        for key in spec.derivatives_needed() {
            let lookup_frequency = if spec.follows_target_frequency(key) {
                frequency
            } else {
                Frequency::Static
            };
            match self.tensors.get(key, lookup_frequency) {
                None => missing.push(key),
                Some(tensor) => {
                    if !tensor.is_complete() {
                        missing.push(key);
                    } else if tensor.max_relative_uncertainty()
                        > self.options.uncertainty_threshold
                    {
                        warn!(
                            "{} @ {} is too noisy to trust (relative spread {:.2e})",
                            key,
                            lookup_frequency,
                            tensor.max_relative_uncertainty()
                        );
                        missing.push(key);
                    }
                }
            }
        }
        missing
    }

    /// Builds the availability map over every registered term, considering
    /// the static limit and every requested dynamic frequency.
    pub fn check_availability(&self) -> BTreeMap<ContributionId, Availability> {
        let mut map = BTreeMap::new();
        for spec in self.registry.iter() {
            let mut missing = Vec::new();
            for frequency in self.evaluation_frequencies(spec.id.property) {
                for key in self.missing_for(spec, frequency) {
                    if !missing.contains(&key) {
                        missing.push(key);
                    }
                }
            }
            let availability = if missing.is_empty() {
                Availability::Computable
            } else {
                Availability::Unavailable { missing }
            };
            map.insert(spec.id, availability);
        }
        map
    }

    fn evaluation_frequencies(&self, property: PropertyKind) -> Vec<Frequency> {
        let mut frequencies = vec![Frequency::Static];
        if property.supports_dynamic() {
            frequencies.extend(self.options.frequencies.iter().copied());
        }
        frequencies
    }

    /// Evaluates every requested contribution. `only` restricts the run to
    /// the given properties with a cap on the pure-vibrational
    /// anharmonicity sum m + n; `None` runs every registered property at
    /// the full registered depth.
    #[instrument(skip_all, name = "shake")]
    pub fn shake(
        &self,
        only: Option<&[(PropertyKind, usize)]>,
        reporter: &ProgressReporter,
    ) -> Result<VibrationalContributionsData, ShakingError> {
        let requested: Vec<(PropertyKind, usize)> = match only {
            Some(only) => {
                for &(property, level) in only {
                    if property.electrical_order() == 0 {
                        return Err(ShakingError::NotAnElectricalProperty { property });
                    }
                    let max_level = self.registry.max_pv_level(property).unwrap_or(0);
                    if level > max_level {
                        return Err(ShakingError::NoFormula {
                            property,
                            electrical: level as u8,
                            mechanical: 0,
                        });
                    }
                }
                only.to_vec()
            }
            None => self
                .registry
                .properties()
                .into_iter()
                .map(|property| {
                    let level = self.registry.max_pv_level(property).unwrap_or(0);
                    (property, level)
                })
                .collect(),
        };

        let mut data = VibrationalContributionsData::new();
        for (property, level) in requested {
            reporter.report(Progress::PhaseStart {
                name: "contributions",
            });
            for spec in self.registry.for_property(property) {
                let (m, n) = spec.id.orders();
                if spec.id.kind == ContributionKind::PureVibrational
                    && (m + n) as usize > level
                {
                    continue;
                }
                for frequency in self.evaluation_frequencies(property) {
                    let contribution = self.evaluate_term(spec, frequency)?;
                    if let ContributionResult::Unavailable { missing } = &contribution.result {
                        info!(
                            "{} @ {} unavailable, missing {:?}",
                            spec.id, frequency, missing
                        );
                    }
                    data.add_contribution(contribution, false)?;
                }
            }
            reporter.report(Progress::PhaseFinish);
        }
        data.sort_per_type_and_order();
        Ok(data)
    }

    /// Evaluates one term at one frequency, or records why it cannot be.
    fn evaluate_term(
        &self,
        spec: &ContractionSpec,
        frequency: Frequency,
    ) -> Result<VibrationalContribution, ShakingError> {
        let required = spec.derivatives_needed();
        let missing = self.missing_for(spec, frequency);
        if !missing.is_empty() {
            return Ok(VibrationalContribution {
                id: spec.id,
                frequency,
                required,
                result: ContributionResult::Unavailable { missing },
            });
        }

        let ctx = ContractionContext {
            tensors: self.tensors,
            modes: self.modes,
            cutoff: self.options.mode_cutoff,
        };
        let target = spec.id.property.base_key();

        let (tensor, flagged) = match spec.kind {
            ContractionKind::Zpva10 | ContractionKind::Zpva01 => {
                evaluate_zpva(&ctx, spec.kind, target, frequency)?
            }
            _ => {
                let order = target.field_count();
                let input_fields = vec![
                    if frequency.is_static() { 0 } else { 1 };
                    order.saturating_sub(1)
                ];
                let mut tensor = Tensor::zeros(&target.shape(0));
                let mut flagged = false;
                let components = if frequency.is_static() {
                    target.representative_components(0)
                } else {
                    target.all_components(0)
                };
                for component in components {
                    let (value, skipped) = evaluate_component(
                        &ctx,
                        spec.kind,
                        &spec.slots,
                        &component,
                        &input_fields,
                        frequency.to_au(),
                    )?;
                    flagged |= skipped;
                    if frequency.is_static() {
                        for equivalent in target.equivalent_components(0, &component) {
                            tensor.set(&equivalent, value)?;
                        }
                    } else {
                        tensor.set(&component, value)?;
                    }
                }
                (tensor, flagged)
            }
        };

        if flagged {
            warn!(
                "{} @ {} skipped ill-conditioned modes; value flagged",
                spec.id, frequency
            );
        }
        Ok(VibrationalContribution {
            id: spec.id,
            frequency,
            required,
            result: ContributionResult::Computed { tensor, flagged },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tensors::DerivativeTensor;

    const OMEGA: f64 = 0.01;

    fn filled(key: &str, dof: usize, fill: f64) -> DerivativeTensor {
        let parsed: DerivativeKey = key.parse().unwrap();
        let mut tensor = DerivativeTensor::new(parsed, Frequency::Static, dof);
        for component in parsed.all_components(dof) {
            tensor.set_component(&component, fill, 0.0).unwrap();
        }
        tensor
    }

    /// One vibrational mode, every tensor the α and β families need.
    fn full_tensor_set() -> DerivativeTensorSet {
        let mut set = DerivativeTensorSet::new();
        for (key, fill) in [
            ("NF", 2.0),
            ("NFF", 1.0),
            ("NNF", 0.5),
            ("NNFF", 0.25),
            ("NNN", 0.003),
            ("NNFFF", 0.1),
            ("NFFF", 0.2),
            ("NNFFFF", 0.05),
            ("NFFFF", 0.08),
        ] {
            set.insert(filled(key, 1, fill)).unwrap();
        }
        set
    }

    fn one_mode() -> NormalModes {
        NormalModes::from_vibrational_frequencies(0, vec![OMEGA]).unwrap()
    }

    #[test]
    fn everything_is_computable_with_a_full_tensor_set() {
        let tensors = full_tensor_set();
        let modes = one_mode();
        let shaker = Shaker::new(&tensors, &modes, ShakeOptions::default()).unwrap();
        let availability = shaker.check_availability();
        for (id, state) in &availability {
            assert!(state.is_computable(), "{id} should be computable");
        }
    }

    #[test]
    fn missing_cubic_force_field_disables_the_anharmonic_terms() {
        let mut tensors = DerivativeTensorSet::new();
        for (key, fill) in [("NF", 2.0), ("NFF", 1.0), ("NNF", 0.5), ("NNFF", 0.25)] {
            tensors.insert(filled(key, 1, fill)).unwrap();
        }
        let modes = one_mode();
        let shaker = Shaker::new(&tensors, &modes, ShakeOptions::default()).unwrap();
        let availability = shaker.check_availability();

        let nnn: DerivativeKey = "NNN".parse().unwrap();
        let beta = PropertyKind::FirstHyperpolarizability;
        for id in [
            ContributionId::pure_vibrational(beta, 0, 1),
            ContributionId::pure_vibrational(beta, 1, 1),
            ContributionId::pure_vibrational(beta, 0, 2),
            ContributionId::zpva(beta, 0, 1),
        ] {
            match &availability[&id] {
                Availability::Unavailable { missing } => {
                    assert!(missing.contains(&nnn), "{id} should miss NNN");
                }
                Availability::Computable => panic!("{id} should be unavailable"),
            }
        }
        // the harmonic terms survive
        assert!(
            availability[&ContributionId::pure_vibrational(beta, 0, 0)].is_computable()
        );
        assert!(
            availability[&ContributionId::pure_vibrational(beta, 1, 0)].is_computable()
        );
    }

    #[test]
    fn unavailable_terms_are_reported_not_fatal() {
        let mut tensors = DerivativeTensorSet::new();
        tensors.insert(filled("NF", 1, 2.0)).unwrap();
        tensors.insert(filled("NFF", 1, 1.0)).unwrap();
        let modes = one_mode();
        let shaker = Shaker::new(&tensors, &modes, ShakeOptions::default()).unwrap();

        let data = shaker
            .shake(
                Some(&[(PropertyKind::FirstHyperpolarizability, 2)]),
                &ProgressReporter::new(),
            )
            .unwrap();

        let beta = PropertyKind::FirstHyperpolarizability;
        let harmonic = data
            .get(
                ContributionId::pure_vibrational(beta, 0, 0),
                Frequency::Static,
            )
            .unwrap();
        assert!(harmonic.is_computed());

        let anharmonic = data
            .get(
                ContributionId::pure_vibrational(beta, 0, 1),
                Frequency::Static,
            )
            .unwrap();
        match &anharmonic.result {
            ContributionResult::Unavailable { missing } => {
                assert!(missing.contains(&"NNN".parse().unwrap()));
            }
            _ => panic!("the mechanical-anharmonicity term needs the cubic force field"),
        }
    }

    #[test]
    fn availability_is_monotonic_under_added_tensors() {
        let mut tensors = DerivativeTensorSet::new();
        for (key, fill) in [("NF", 2.0), ("NFF", 1.0), ("NNF", 0.5), ("NNFF", 0.25)] {
            tensors.insert(filled(key, 1, fill)).unwrap();
        }
        let modes = one_mode();
        let before = Shaker::new(&tensors, &modes, ShakeOptions::default())
            .unwrap()
            .check_availability();

        tensors.insert(filled("NNN", 1, 0.003)).unwrap();
        let after = Shaker::new(&tensors, &modes, ShakeOptions::default())
            .unwrap()
            .check_availability();

        for (id, state) in &before {
            if state.is_computable() {
                assert!(after[id].is_computable(), "{id} regressed");
            }
        }
        // and at least one term actually moved forward
        let moved = ContributionId::pure_vibrational(PropertyKind::Polarizability, 0, 2);
        assert!(!before[&moved].is_computable());
        assert!(after[&moved].is_computable());
    }

    #[test]
    fn harmonic_alpha_term_matches_the_single_mode_value() {
        let tensors = full_tensor_set();
        let modes = one_mode();
        let shaker = Shaker::new(&tensors, &modes, ShakeOptions::default()).unwrap();
        let data = shaker
            .shake(
                Some(&[(PropertyKind::Polarizability, 0)]),
                &ProgressReporter::new(),
            )
            .unwrap();

        let harmonic = data
            .get(
                ContributionId::pure_vibrational(PropertyKind::Polarizability, 0, 0),
                Frequency::Static,
            )
            .unwrap();
        let tensor = harmonic.tensor().unwrap();
        // [µ²]^(0,0)_ij = µ'_i µ'_j / ω² with µ' = 2 everywhere
        let expected = 4.0 / (OMEGA * OMEGA);
        for i in 0..3 {
            for j in 0..3 {
                assert!((tensor.get(&[i, j]).unwrap() - expected).abs() < 1e-6);
            }
        }
        // level 0 keeps the ZPVA terms but no anharmonic pv term
        assert!(
            data.get(
                ContributionId::pure_vibrational(PropertyKind::Polarizability, 1, 1),
                Frequency::Static
            )
            .is_none()
        );
        assert!(
            data.get(
                ContributionId::zpva(PropertyKind::Polarizability, 1, 0),
                Frequency::Static
            )
            .is_some()
        );
    }

    #[test]
    fn noisy_dependencies_are_not_trusted() {
        let mut tensors = DerivativeTensorSet::new();
        let key: DerivativeKey = "NF".parse().unwrap();
        let mut nf = DerivativeTensor::new(key, Frequency::Static, 1);
        for component in key.all_components(1) {
            // 50% relative uncertainty
            nf.set_component(&component, 2.0, 1.0).unwrap();
        }
        tensors.insert(nf).unwrap();
        let modes = one_mode();
        let shaker = Shaker::new(&tensors, &modes, ShakeOptions::default()).unwrap();
        let availability = shaker.check_availability();
        match &availability
            [&ContributionId::pure_vibrational(PropertyKind::Polarizability, 0, 0)]
        {
            Availability::Unavailable { missing } => assert!(missing.contains(&key)),
            Availability::Computable => panic!("a 50% spread must not be trusted"),
        }
    }

    #[test]
    fn requesting_energy_or_too_deep_levels_is_a_bad_shake() {
        let tensors = full_tensor_set();
        let modes = one_mode();
        let shaker = Shaker::new(&tensors, &modes, ShakeOptions::default()).unwrap();

        let result = shaker.shake(
            Some(&[(PropertyKind::Energy, 1)]),
            &ProgressReporter::new(),
        );
        assert!(matches!(
            result,
            Err(ShakingError::NotAnElectricalProperty { .. })
        ));

        let result = shaker.shake(
            Some(&[(PropertyKind::Polarizability, 3)]),
            &ProgressReporter::new(),
        );
        assert!(matches!(result, Err(ShakingError::NoFormula { .. })));
    }

    #[test]
    fn dynamic_contributions_get_their_own_entries() {
        let omega = Frequency::Dynamic(0.004);
        let tensors = full_tensor_set();
        let modes = one_mode();
        let options = ShakeOptions {
            frequencies: vec![omega],
            ..ShakeOptions::default()
        };
        let shaker = Shaker::new(&tensors, &modes, options).unwrap();
        let data = shaker
            .shake(
                Some(&[(PropertyKind::Polarizability, 0)]),
                &ProgressReporter::new(),
            )
            .unwrap();

        let id = ContributionId::pure_vibrational(PropertyKind::Polarizability, 0, 0);
        let static_term = data.get(id, Frequency::Static).unwrap();
        let dynamic_term = data.get(id, omega).unwrap();
        assert!(static_term.is_computed());
        assert!(dynamic_term.is_computed());

        let static_value = static_term.tensor().unwrap().get(&[0, 0]).unwrap();
        let dynamic_value = dynamic_term.tensor().unwrap().get(&[0, 0]).unwrap();
        // λ(ω, ω_vib) > λ(0, ω_vib): the dynamic term is enhanced below
        // resonance
        assert!(dynamic_value > static_value);

        // the ZPVA terms need the dynamic property surface, which is absent
        let zpva = data
            .get(
                ContributionId::zpva(PropertyKind::Polarizability, 1, 0),
                omega,
            )
            .unwrap();
        assert!(!zpva.is_computed());
        let zpva_static = data
            .get(
                ContributionId::zpva(PropertyKind::Polarizability, 1, 0),
                Frequency::Static,
            )
            .unwrap();
        assert!(zpva_static.is_computed());
    }

    #[test]
    fn mode_below_cutoff_flags_the_result() {
        let mut tensors = DerivativeTensorSet::new();
        for (key, fill) in [("NF", 2.0), ("NFF", 1.0)] {
            tensors.insert(filled(key, 2, fill)).unwrap();
        }
        let modes = NormalModes::from_vibrational_frequencies(0, vec![1e-9, OMEGA]).unwrap();
        let shaker = Shaker::new(&tensors, &modes, ShakeOptions::default()).unwrap();
        let data = shaker
            .shake(
                Some(&[(PropertyKind::Polarizability, 0)]),
                &ProgressReporter::new(),
            )
            .unwrap();
        let term = data
            .get(
                ContributionId::pure_vibrational(PropertyKind::Polarizability, 0, 0),
                Frequency::Static,
            )
            .unwrap();
        assert!(term.is_computed());
        assert!(term.is_flagged());
    }
}
