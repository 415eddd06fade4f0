//! The complete shaking workflow: from derivative tensors and normal-mode
//! data to the sorted collection of vibrational contributions.

use crate::core::contributions::VibrationalContributionsData;
use crate::core::fields::derivative::PropertyKind;
use crate::core::modes::NormalModes;
use crate::core::tensors::DerivativeTensorSet;
use crate::engine::error::ShakingError;
use crate::engine::progress::ProgressReporter;
use crate::engine::shaker::{ShakeOptions, Shaker};
use tracing::{info, instrument};

/// Runs a full shake: builds the availability map over every registered
/// term, evaluates the computable ones, and returns the deterministic,
/// sorted collection. Unavailable terms appear in the output with their
/// missing dependency lists.
#[instrument(skip_all, name = "shake_workflow")]
pub fn run(
    tensors: &DerivativeTensorSet,
    modes: &NormalModes,
    options: ShakeOptions,
    only: Option<&[(PropertyKind, usize)]>,
    reporter: &ProgressReporter,
) -> Result<VibrationalContributionsData, ShakingError> {
    let shaker = Shaker::new(tensors, modes, options)?;

    let availability = shaker.check_availability();
    let computable = availability
        .values()
        .filter(|state| state.is_computable())
        .count();
    info!(
        "{} of {} registered terms are computable",
        computable,
        availability.len()
    );

    let data = shaker.shake(only, reporter)?;
    info!(
        "shake complete: {} contribution entr(ies), {} computed",
        data.len(),
        data.iter().filter(|entry| entry.is_computed()).count()
    );
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::contributions::ContributionId;
    use crate::core::fields::Frequency;
    use crate::core::fields::derivative::DerivativeKey;
    use crate::core::io::archive;
    use crate::core::tensors::DerivativeTensor;

    fn single_mode_set() -> DerivativeTensorSet {
        let mut set = DerivativeTensorSet::new();
        for (key, fill) in [("NF", 1.5), ("NFF", 0.7), ("NNF", 0.3), ("NNFF", 0.1)] {
            let parsed: DerivativeKey = key.parse().unwrap();
            let mut tensor = DerivativeTensor::new(parsed, Frequency::Static, 1);
            for component in parsed.all_components(1) {
                tensor.set_component(&component, fill, 0.0).unwrap();
            }
            set.insert(tensor).unwrap();
        }
        set
    }

    #[test]
    fn workflow_output_survives_an_archive_round_trip() {
        let tensors = single_mode_set();
        let modes = NormalModes::from_vibrational_frequencies(0, vec![0.015]).unwrap();
        let data = run(
            &tensors,
            &modes,
            ShakeOptions::default(),
            Some(&[(PropertyKind::Polarizability, 2)]),
            &ProgressReporter::new(),
        )
        .unwrap();

        assert!(!data.is_empty());
        let mut buffer = Vec::new();
        archive::write_to(&data, &mut buffer).unwrap();
        let restored = archive::read_from(&mut buffer.as_slice()).unwrap();
        assert_eq!(data, restored);
    }

    #[test]
    fn output_is_sorted_and_reports_every_requested_term() {
        let tensors = single_mode_set();
        let modes = NormalModes::from_vibrational_frequencies(0, vec![0.015]).unwrap();
        let data = run(
            &tensors,
            &modes,
            ShakeOptions::default(),
            Some(&[(PropertyKind::Polarizability, 2)]),
            &ProgressReporter::new(),
        )
        .unwrap();

        // every entry is either a value or an unavailable record; nothing is
        // silently dropped
        let alpha = PropertyKind::Polarizability;
        let expected = [
            ContributionId::zpva(alpha, 0, 1),
            ContributionId::zpva(alpha, 1, 0),
            ContributionId::pure_vibrational(alpha, 0, 0),
            ContributionId::pure_vibrational(alpha, 0, 2),
            ContributionId::pure_vibrational(alpha, 1, 1),
            ContributionId::pure_vibrational(alpha, 2, 0),
        ];
        let ids: Vec<_> = data.iter().map(|entry| entry.id).collect();
        assert_eq!(ids, expected);

        // the anharmonic terms miss NNN and say so
        let anharmonic = data
            .get(
                ContributionId::pure_vibrational(alpha, 1, 1),
                Frequency::Static,
            )
            .unwrap();
        assert!(!anharmonic.is_computed());
        assert!(
            anharmonic
                .derivatives_needed()
                .contains(&"NNN".parse().unwrap())
        );

        // totals aggregate the computed terms only
        assert!(data.total_pv(alpha, Frequency::Static).is_some());
        assert!(data.total(alpha, Frequency::Static).is_some());
    }
}
