//! The complete baking workflow: from a recipe and a populated results store
//! to derivative tensors ready for reporting or shaking.

use crate::core::fields::derivative::PropertyKind;
use crate::core::modes::NormalModes;
use crate::core::store::ComputationalResults;
use crate::engine::baker::{BakeOutput, Baker};
use crate::engine::config::Recipe;
use crate::engine::error::BakingError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::projection::project_geometrical_derivatives;
use tracing::{info, instrument, warn};

/// Runs a full bake.
///
/// The recipe is validated first (fatal on inconsistency); store
/// completeness is reported but does not abort — components whose field
/// values are absent are isolated per tensor. When `modes` is given, every
/// geometric derivative is projected onto normal-mode space afterwards, the
/// precondition for feeding the shaking stage.
#[instrument(skip_all, name = "bake_workflow")]
pub fn run(
    recipe: &Recipe,
    store: &ComputationalResults,
    only: Option<&[(PropertyKind, usize)]>,
    modes: Option<&NormalModes>,
    reporter: &ProgressReporter,
) -> Result<BakeOutput, BakingError> {
    recipe.validate()?;

    reporter.report(Progress::PhaseStart { name: "check" });
    let baker = Baker::new(recipe, store)?;
    let completeness = baker.check();
    if !completeness.is_complete() {
        warn!(
            "store does not fulfill the recipe: {} required entries are missing",
            completeness.missing.len()
        );
    }
    reporter.report(Progress::PhaseFinish);

    reporter.report(Progress::PhaseStart {
        name: "differentiation",
    });
    let mut output = baker.bake(only, reporter)?;
    reporter.report(Progress::PhaseFinish);

    if let Some(modes) = modes {
        reporter.report(Progress::PhaseStart { name: "projection" });
        let added = project_geometrical_derivatives(&mut output.tensors, modes)?;
        info!("projected {} geometric derivative(s)", added.len());
        reporter.report(Progress::PhaseFinish);
    }

    info!(
        "bake complete: {} tensor(s), {} unavailable component(s)",
        output.tensors.len(),
        output.report.unavailable().count()
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fields::{FieldCombination, Frequency};
    use crate::core::tensors::Tensor;
    use nalgebra::DMatrix;

    /// Three degrees of freedom (pre-projected toy molecule), a gradient
    /// that responds linearly to the field.
    const GF: [[f64; 3]; 3] = [
        [0.8, 0.0, 0.1],
        [0.0, 0.6, 0.0],
        [0.2, 0.0, 0.4],
    ];

    fn gradient_at(field: [f64; 3]) -> Tensor {
        let mut gradient = Tensor::zeros(&[3]);
        for g in 0..3 {
            let mut value = 0.0;
            for i in 0..3 {
                value += GF[g][i] * field[i];
            }
            gradient.set(&[g], value).unwrap();
        }
        gradient
    }

    fn recipe() -> Recipe {
        Recipe::builder()
            .dof(3)
            .min_field(0.001)
            .ratio(2.0)
            .k_max(3)
            .basis(PropertyKind::Gradient, 1)
            .build()
            .unwrap()
    }

    fn store(recipe: &Recipe) -> ComputationalResults {
        let mut store = ComputationalResults::new(recipe.dof);
        for combination in &recipe.bases().combinations {
            let field = combination.amplitudes(recipe.min_field, recipe.ratio);
            store
                .add(
                    *combination,
                    PropertyKind::Gradient,
                    Frequency::Static,
                    gradient_at(field),
                )
                .unwrap();
        }
        store
    }

    fn identity_modes() -> NormalModes {
        NormalModes::new(
            0,
            vec![0.01, 0.02, 0.03],
            DMatrix::identity(3, 3),
            vec![1.0; 3],
        )
        .unwrap()
    }

    #[test]
    fn gradient_differentiation_and_projection_yield_the_nf_tensor() {
        let recipe = recipe();
        let store = store(&recipe);
        let modes = identity_modes();

        let output = run(
            &recipe,
            &store,
            None,
            Some(&modes),
            &ProgressReporter::new(),
        )
        .unwrap();

        let gf = output
            .tensors
            .get("GF".parse().unwrap(), Frequency::Static)
            .unwrap();
        let nf = output
            .tensors
            .get("NF".parse().unwrap(), Frequency::Static)
            .unwrap();
        for g in 0..3 {
            for i in 0..3 {
                assert!((gf.values().get(&[g, i]).unwrap() - GF[g][i]).abs() < 1e-9);
                // unit masses and identity eigenvectors: projection is the
                // identity
                assert!((nf.values().get(&[g, i]).unwrap() - GF[g][i]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn invalid_recipe_aborts_before_any_computation() {
        let mut recipe = recipe();
        recipe.ratio = 0.5;
        let store = ComputationalResults::new(3);
        let result = run(&recipe, &store, None, None, &ProgressReporter::new());
        assert!(matches!(result, Err(BakingError::Config { .. })));
    }

    #[test]
    fn incomplete_store_still_produces_the_other_components() {
        let recipe = recipe();
        let mut partial = ComputationalResults::new(recipe.dof);
        for combination in &recipe.bases().combinations {
            let levels = combination.levels();
            // drop the z-axis fields entirely
            if levels[2] != 0 {
                continue;
            }
            let field = combination.amplitudes(recipe.min_field, recipe.ratio);
            partial
                .add(
                    *combination,
                    PropertyKind::Gradient,
                    Frequency::Static,
                    gradient_at(field),
                )
                .unwrap();
        }

        let output = run(&recipe, &partial, None, None, &ProgressReporter::new()).unwrap();
        let gf = output
            .tensors
            .get("GF".parse().unwrap(), Frequency::Static)
            .unwrap();
        assert!(gf.is_component_available(&[0, 0]));
        assert!(!gf.is_component_available(&[0, 2]));
        assert!(output.report.unavailable().count() > 0);
    }
}
