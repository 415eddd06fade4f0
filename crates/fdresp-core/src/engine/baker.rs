//! The Baker: numerical differentiation of stored per-field properties into
//! derivative tensors, one Romberg triangle per tensor component.

use crate::core::fields::derivative::{DerivativeKey, PropertyKind};
use crate::core::fields::{FieldCombination, Frequency};
use crate::core::store::{ComputationalResults, Completeness, StoreError};
use crate::core::tensors::{DerivativeTensor, DerivativeTensorSet};
use crate::engine::config::{Recipe, axis_orders_of};
use crate::engine::error::BakingError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::romberg::{RombergTriangle, Stencil};
use itertools::Itertools;
use tracing::{info, instrument, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Outcome of one Romberg triangle, or the reason it could not be built.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentOutcome {
    Computed {
        value: f64,
        uncertainty: f64,
        flagged: bool,
        triangle: String,
    },
    Missing {
        combination: FieldCombination,
    },
}

/// One line of the bake report: what happened for one tensor component.
#[derive(Debug, Clone, PartialEq)]
pub struct BakeEntry {
    pub key: DerivativeKey,
    pub frequency: Frequency,
    pub component: Vec<usize>,
    pub outcome: ComponentOutcome,
}

/// Everything the bake decided and observed, per derivative and component.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BakeReport {
    pub entries: Vec<BakeEntry>,
    /// Derivatives skipped because another basis already produced them.
    pub skipped: Vec<(DerivativeKey, Frequency)>,
}

impl BakeReport {
    pub fn unavailable(&self) -> impl Iterator<Item = &BakeEntry> {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.outcome, ComponentOutcome::Missing { .. }))
    }

    pub fn flagged(&self) -> impl Iterator<Item = &BakeEntry> {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.outcome, ComponentOutcome::Computed { flagged: true, .. }))
    }
}

/// The product of a bake: the derivative tensors plus the report.
#[derive(Debug, Clone, PartialEq)]
pub struct BakeOutput {
    pub tensors: DerivativeTensorSet,
    pub report: BakeReport,
}

struct ComponentJob {
    basis_component: Vec<usize>,
    derivative_component: Vec<usize>,
}

struct ComponentResult {
    job: ComponentJob,
    outcome: ComponentOutcome,
}

/// Performs the numerical differentiation declared by a recipe against a
/// populated results store.
pub struct Baker<'a> {
    recipe: &'a Recipe,
    store: &'a ComputationalResults,
}

impl<'a> Baker<'a> {
    /// Binds a recipe to a store, verifying structural consistency: matching
    /// degrees of freedom and a sign-symmetric field ladder.
    pub fn new(recipe: &'a Recipe, store: &'a ComputationalResults) -> Result<Self, BakingError> {
        if recipe.dof != store.dof() {
            return Err(BakingError::DofMismatch {
                store_dof: store.dof(),
                recipe_dof: recipe.dof,
            });
        }
        for combination in store.combinations() {
            let mirrored = FieldCombination::new(combination.levels().map(|level| -level));
            if store.record(&mirrored).is_none() {
                return Err(BakingError::AsymmetricLadder {
                    combination: *combination,
                });
            }
        }
        Ok(Self { recipe, store })
    }

    /// Completeness of the store against the recipe's required basis.
    pub fn check(&self) -> Completeness {
        self.store.check(&self.recipe.bases())
    }

    /// Runs the differentiation. `only` restricts the run to the given
    /// (property, level) pairs; a level of zero means "up to the level the
    /// recipe declares".
    #[instrument(skip_all, name = "bake")]
    pub fn bake(
        &self,
        only: Option<&[(PropertyKind, usize)]>,
        reporter: &ProgressReporter,
    ) -> Result<BakeOutput, BakingError> {
        let mut requested: Vec<(PropertyKind, usize)> = match only {
            None => self
                .recipe
                .bases
                .iter()
                .map(|basis| (basis.property, basis.order))
                .collect(),
            Some(only) => {
                let mut requested = Vec::new();
                for &(property, level) in only {
                    let available = self
                        .recipe
                        .basis_order(property)
                        .ok_or(BakingError::UnknownBasis { property })?;
                    if level > available {
                        return Err(BakingError::LevelTooHigh {
                            property,
                            requested: level,
                            available,
                        });
                    }
                    requested.push((property, if level == 0 { available } else { level }));
                }
                requested
            }
        };
        if requested.is_empty() {
            return Err(BakingError::NothingToBake);
        }
        // higher-order bases first: when two bases can produce the same
        // derivative key, the one needing the fewest numerical
        // differentiations wins
        requested.sort_by_key(|(property, _)| std::cmp::Reverse(property.base_key().order()));

        let mut tensors = DerivativeTensorSet::new();
        let mut report = BakeReport::default();

        for (property, level) in requested {
            for diff_order in 1..=level {
                let final_key = property
                    .base_key()
                    .differentiate_by_field(diff_order as u8);
                reporter.report(Progress::DerivativeStart { key: final_key });
                for frequency in self.recipe.frequencies_for(property) {
                    if tensors.contains(final_key, frequency) {
                        info!(
                            "{} @ {} already produced by a higher basis, skipping",
                            final_key, frequency
                        );
                        report.skipped.push((final_key, frequency));
                        continue;
                    }
                    let tensor = self.differentiate(
                        property,
                        diff_order,
                        final_key,
                        frequency,
                        &mut report,
                    )?;
                    tensors.insert(tensor)?;
                }
                reporter.report(Progress::DerivativeFinish);
            }
        }

        Ok(BakeOutput { tensors, report })
    }

    /// Builds one derivative tensor: a Romberg triangle per representative
    /// component, expanded to all symmetry-equivalent components.
    fn differentiate(
        &self,
        property: PropertyKind,
        diff_order: usize,
        final_key: DerivativeKey,
        frequency: Frequency,
        report: &mut BakeReport,
    ) -> Result<DerivativeTensor, BakingError> {
        let dof = self.recipe.dof;
        let basis_key = property.base_key();
        let derivative_key = DerivativeKey::fields(diff_order as u8);

        // dynamic tensors carry no index-permutation symmetry
        let basis_components = if frequency.is_static() {
            basis_key.representative_components(dof)
        } else {
            basis_key.all_components(dof)
        };
        let derivative_components = derivative_key.representative_components(dof);

        let jobs: Vec<ComponentJob> = derivative_components
            .iter()
            .cartesian_product(basis_components.iter())
            .map(|(derivative_component, basis_component)| ComponentJob {
                basis_component: basis_component.clone(),
                derivative_component: derivative_component.clone(),
            })
            .collect();

        #[cfg(feature = "parallel")]
        let results: Vec<ComponentResult> = jobs
            .into_par_iter()
            .map(|job| self.run_component(property, frequency, job))
            .collect::<Result<_, _>>()?;

        #[cfg(not(feature = "parallel"))]
        let results: Vec<ComponentResult> = jobs
            .into_iter()
            .map(|job| self.run_component(property, frequency, job))
            .collect::<Result<_, _>>()?;

        let mut tensor = DerivativeTensor::new(final_key, frequency, dof);
        for result in results {
            let ComponentResult { job, outcome } = result;
            let mut full_component = job.basis_component.clone();
            full_component.extend(&job.derivative_component);

            let basis_equivalents = if frequency.is_static() {
                basis_key.equivalent_components(dof, &job.basis_component)
            } else {
                vec![job.basis_component.clone()]
            };
            let derivative_equivalents =
                derivative_key.equivalent_components(dof, &job.derivative_component);

            match &outcome {
                ComponentOutcome::Computed {
                    value,
                    uncertainty,
                    flagged,
                    ..
                } => {
                    if *flagged {
                        warn!(
                            "large Romberg spread for {} @ {} component {:?}: {} ± {}",
                            final_key, frequency, full_component, value, uncertainty
                        );
                    }
                    for basis_eq in &basis_equivalents {
                        for derivative_eq in &derivative_equivalents {
                            let mut component = basis_eq.clone();
                            component.extend(derivative_eq);
                            tensor.set_component(&component, *value, *uncertainty)?;
                        }
                    }
                }
                ComponentOutcome::Missing { combination } => {
                    warn!(
                        "missing field value at {} for {} @ {} component {:?}",
                        combination, final_key, frequency, full_component
                    );
                    for basis_eq in &basis_equivalents {
                        for derivative_eq in &derivative_equivalents {
                            let mut component = basis_eq.clone();
                            component.extend(derivative_eq);
                            tensor.mark_missing(&component)?;
                        }
                    }
                }
            }
            report.entries.push(BakeEntry {
                key: final_key,
                frequency,
                component: full_component,
                outcome,
            });
        }
        Ok(tensor)
    }

    /// One Romberg triangle: ladder estimates for a single (basis component,
    /// derivative component) pair. A missing field value is isolated into
    /// the outcome; any other store fault is fatal.
    fn run_component(
        &self,
        property: PropertyKind,
        frequency: Frequency,
        job: ComponentJob,
    ) -> Result<ComponentResult, BakingError> {
        let axis_orders = axis_orders_of(&job.derivative_component);
        let active_axes: Vec<(usize, Stencil)> = axis_orders
            .iter()
            .enumerate()
            .filter(|&(_, &order)| order > 0)
            .map(|(axis, &order)| {
                Stencil::centered(order, self.recipe.ratio).map(|stencil| (axis, stencil))
            })
            .collect::<Result<_, _>>()?;
        let total_order: usize = axis_orders.iter().sum();

        let mut estimates = Vec::with_capacity(self.recipe.k_max);
        for k in 0..self.recipe.k_max {
            let mut accumulator = 0.0;
            let node_sets: Vec<Vec<(usize, i32, f64)>> = active_axes
                .iter()
                .map(|(axis, stencil)| {
                    stencil
                        .nodes()
                        .iter()
                        .map(|&(offset, weight)| (*axis, offset, weight))
                        .collect()
                })
                .collect();
            for nodes in node_sets.into_iter().multi_cartesian_product() {
                let mut levels = [0i32; 3];
                let mut weight = 1.0;
                for (axis, offset, node_weight) in nodes {
                    levels[axis] = if offset == 0 {
                        0
                    } else {
                        offset.signum() * (k as i32 + offset.abs())
                    };
                    weight *= node_weight;
                }
                let combination = FieldCombination::new(levels);
                let value = match self.store.value(
                    &combination,
                    property,
                    frequency,
                    &job.basis_component,
                ) {
                    Ok(value) => value,
                    Err(StoreError::MissingFieldValue { .. }) => {
                        return Ok(ComponentResult {
                            job,
                            outcome: ComponentOutcome::Missing { combination },
                        });
                    }
                    Err(other) => return Err(other.into()),
                };
                accumulator += weight * value;
            }
            let step = self.recipe.min_field * self.recipe.ratio.powi(k as i32);
            estimates.push(accumulator / step.powi(total_order as i32));
        }

        let triangle = RombergTriangle::new(estimates, self.recipe.ratio);
        let (value, uncertainty) = triangle.best_value();
        Ok(ComponentResult {
            job,
            outcome: ComponentOutcome::Computed {
                value,
                uncertainty,
                flagged: triangle.is_flagged(self.recipe.romberg_threshold),
                triangle: triangle.render(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tensors::Tensor;
    use crate::engine::config::Recipe;

    const ALPHA: [f64; 3] = [9.64, 7.25, 8.11];
    const MU: [f64; 3] = [0.0, 0.0, 0.73];
    const E0: f64 = -76.42;

    fn analytic_energy(field: [f64; 3]) -> f64 {
        let mut energy = E0;
        for i in 0..3 {
            energy -= MU[i] * field[i];
            energy -= 0.5 * ALPHA[i] * field[i] * field[i];
        }
        energy
    }

    fn populate_energies(recipe: &Recipe) -> ComputationalResults {
        let mut store = ComputationalResults::new(recipe.dof);
        for combination in &recipe.bases().combinations {
            let field = combination.amplitudes(recipe.min_field, recipe.ratio);
            store
                .add(
                    *combination,
                    PropertyKind::Energy,
                    Frequency::Static,
                    Tensor::scalar(analytic_energy(field)),
                )
                .unwrap();
        }
        store
    }

    fn quadratic_recipe() -> Recipe {
        Recipe::builder()
            .dof(9)
            .min_field(0.001)
            .ratio(2.0)
            .k_max(3)
            .basis(PropertyKind::Energy, 2)
            .build()
            .unwrap()
    }

    #[test]
    fn order_two_energy_derivative_recovers_minus_alpha() {
        let recipe = quadratic_recipe();
        let store = populate_energies(&recipe);
        let baker = Baker::new(&recipe, &store).unwrap();
        assert!(baker.check().is_complete());

        let output = baker.bake(None, &ProgressReporter::new()).unwrap();
        let ff = output
            .tensors
            .get("FF".parse().unwrap(), Frequency::Static)
            .unwrap();

        for i in 0..3 {
            let value = ff.values().get(&[i, i]).unwrap();
            let uncertainty = ff.uncertainty_tensor().get(&[i, i]).unwrap();
            assert!((value + ALPHA[i]).abs() < 1e-7, "component {i}: {value}");
            assert!(uncertainty < 1e-7);
        }
        // no cross terms in the analytic model
        assert!(ff.values().get(&[0, 1]).unwrap().abs() < 1e-7);
        assert_eq!(output.report.unavailable().count(), 0);
    }

    #[test]
    fn order_one_energy_derivative_recovers_minus_dipole() {
        let recipe = quadratic_recipe();
        let store = populate_energies(&recipe);
        let baker = Baker::new(&recipe, &store).unwrap();

        let output = baker
            .bake(Some(&[(PropertyKind::Energy, 1)]), &ProgressReporter::new())
            .unwrap();
        let f = output
            .tensors
            .get("F".parse().unwrap(), Frequency::Static)
            .unwrap();
        for i in 0..3 {
            assert!((f.values().get(&[i]).unwrap() + MU[i]).abs() < 1e-9);
        }
        // only the first derivative was requested
        assert!(
            output
                .tensors
                .get("FF".parse().unwrap(), Frequency::Static)
                .is_none()
        );
    }

    #[test]
    fn baking_twice_is_bit_identical() {
        let recipe = quadratic_recipe();
        let store = populate_energies(&recipe);
        let baker = Baker::new(&recipe, &store).unwrap();
        let first = baker.bake(None, &ProgressReporter::new()).unwrap();
        let second = baker.bake(None, &ProgressReporter::new()).unwrap();
        assert_eq!(first.tensors, second.tensors);
    }

    #[test]
    fn missing_field_isolates_the_affected_component() {
        let recipe = quadratic_recipe();
        let full = populate_energies(&recipe);

        // rebuild the store without any field touching the x axis alone
        let mut store = ComputationalResults::new(recipe.dof);
        for combination in &recipe.bases().combinations {
            let levels = combination.levels();
            if levels[0] != 0 && levels[1] == 0 && levels[2] == 0 {
                continue;
            }
            store
                .add(
                    *combination,
                    PropertyKind::Energy,
                    Frequency::Static,
                    Tensor::from_data(
                        &[],
                        vec![
                            full.value(combination, PropertyKind::Energy, Frequency::Static, &[])
                                .unwrap(),
                        ],
                    )
                    .unwrap(),
                )
                .unwrap();
        }

        let baker = Baker::new(&recipe, &store).unwrap();
        let output = baker.bake(None, &ProgressReporter::new()).unwrap();
        let ff = output
            .tensors
            .get("FF".parse().unwrap(), Frequency::Static)
            .unwrap();

        assert!(!ff.is_component_available(&[0, 0]));
        assert!(ff.is_component_available(&[1, 1]));
        assert!((ff.values().get(&[1, 1]).unwrap() + ALPHA[1]).abs() < 1e-7);
        assert!(output.report.unavailable().count() > 0);
    }

    #[test]
    fn level_above_the_recipe_is_a_bad_bake() {
        let recipe = quadratic_recipe();
        let store = populate_energies(&recipe);
        let baker = Baker::new(&recipe, &store).unwrap();
        let result = baker.bake(
            Some(&[(PropertyKind::Energy, 3)]),
            &ProgressReporter::new(),
        );
        assert!(matches!(result, Err(BakingError::LevelTooHigh { .. })));

        let result = baker.bake(
            Some(&[(PropertyKind::Dipole, 1)]),
            &ProgressReporter::new(),
        );
        assert!(matches!(result, Err(BakingError::UnknownBasis { .. })));
    }

    #[test]
    fn asymmetric_ladder_is_rejected_at_construction() {
        let recipe = quadratic_recipe();
        let mut store = ComputationalResults::new(recipe.dof);
        store
            .add(
                FieldCombination::new([1, 0, 0]),
                PropertyKind::Energy,
                Frequency::Static,
                Tensor::scalar(-76.0),
            )
            .unwrap();
        let result = Baker::new(&recipe, &store);
        assert!(matches!(result, Err(BakingError::AsymmetricLadder { .. })));
    }

    #[test]
    fn dof_mismatch_is_rejected_at_construction() {
        let recipe = quadratic_recipe();
        let store = ComputationalResults::new(6);
        let result = Baker::new(&recipe, &store);
        assert!(matches!(result, Err(BakingError::DofMismatch { .. })));
    }

    #[test]
    fn dipole_basis_wins_over_energy_for_the_shared_key() {
        // µ(F) = µ0 + αF gives FF directly with one differentiation; the
        // energy basis would need two
        let recipe = Recipe::builder()
            .dof(9)
            .min_field(0.001)
            .ratio(2.0)
            .k_max(3)
            .basis(PropertyKind::Energy, 2)
            .basis(PropertyKind::Dipole, 1)
            .build()
            .unwrap();
        let mut store = populate_energies(&recipe);
        for combination in &recipe.bases().combinations {
            let field = combination.amplitudes(recipe.min_field, recipe.ratio);
            let mut dipole = Tensor::zeros(&[3]);
            for i in 0..3 {
                dipole.set(&[i], MU[i] + ALPHA[i] * field[i]).unwrap();
            }
            store
                .add(*combination, PropertyKind::Dipole, Frequency::Static, dipole)
                .unwrap();
        }

        let baker = Baker::new(&recipe, &store).unwrap();
        let output = baker.bake(None, &ProgressReporter::new()).unwrap();

        // the dipole-derived FF is +α (dµ/dF), not the energy-derived −α
        let ff = output
            .tensors
            .get("FF".parse().unwrap(), Frequency::Static)
            .unwrap();
        assert!((ff.values().get(&[0, 0]).unwrap() - ALPHA[0]).abs() < 1e-7);
        assert!(
            output
                .report
                .skipped
                .contains(&("FF".parse().unwrap(), Frequency::Static))
        );
    }

    #[test]
    fn dynamic_bases_produce_one_tensor_per_frequency() {
        let omega = Frequency::Dynamic(0.0428);
        let recipe = Recipe::builder()
            .dof(9)
            .min_field(0.001)
            .ratio(2.0)
            .k_max(2)
            .basis(PropertyKind::Polarizability, 1)
            .frequency(omega)
            .build()
            .unwrap();

        let mut store = ComputationalResults::new(recipe.dof);
        for combination in &recipe.bases().combinations {
            let field = combination.amplitudes(recipe.min_field, recipe.ratio);
            for frequency in [Frequency::Static, omega] {
                // α_ij(F) = α_ij + γ δ_ij F_i, with a frequency-dependent γ
                let gamma = match frequency {
                    Frequency::Static => 21.0,
                    Frequency::Dynamic(_) => 24.5,
                };
                let mut alpha = Tensor::zeros(&[3, 3]);
                for i in 0..3 {
                    alpha.set(&[i, i], ALPHA[i] + gamma * field[i]).unwrap();
                }
                store
                    .add(*combination, PropertyKind::Polarizability, frequency, alpha)
                    .unwrap();
            }
        }

        let baker = Baker::new(&recipe, &store).unwrap();
        let output = baker.bake(None, &ProgressReporter::new()).unwrap();

        let key: DerivativeKey = "FFF".parse().unwrap();
        let static_tensor = output.tensors.get(key, Frequency::Static).unwrap();
        let dynamic_tensor = output.tensors.get(key, omega).unwrap();
        assert!((static_tensor.values().get(&[0, 0, 0]).unwrap() - 21.0).abs() < 1e-6);
        assert!((dynamic_tensor.values().get(&[0, 0, 0]).unwrap() - 24.5).abs() < 1e-6);
    }
}
