//! The computational-results store: every quantity computed by the external
//! quantum-chemistry stage, keyed by the field combination it was computed
//! under. Append-only within a run; at most one record per (field, property,
//! frequency).

use crate::core::fields::derivative::PropertyKind;
use crate::core::fields::{FieldCombination, Frequency};
use crate::core::tensors::{Tensor, TensorError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Duplicate value for {property} @ {frequency} at field {combination} differs from the stored one")]
    DuplicateEntry {
        combination: FieldCombination,
        property: PropertyKind,
        frequency: Frequency,
    },
    #[error("Missing field value: {property} @ {frequency} at field {combination}")]
    MissingFieldValue {
        combination: FieldCombination,
        property: PropertyKind,
        frequency: Frequency,
    },
    #[error("Tensor shape error: {source}")]
    Shape {
        #[from]
        source: TensorError,
    },
    #[error("Store row {row} is malformed: {reason}")]
    BadRow { row: usize, reason: String },
    #[error("Store holds data for {expected} degrees of freedom, row {row} declares {got}")]
    DofMismatch { row: usize, expected: usize, got: usize },
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("CSV error: {source}")]
    Csv {
        #[from]
        source: csv::Error,
    },
}

/// All quantities recorded under one field combination.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyRecord {
    values: BTreeMap<(PropertyKind, Frequency), Tensor>,
}

impl PropertyRecord {
    pub fn get(&self, property: PropertyKind, frequency: Frequency) -> Option<&Tensor> {
        self.values.get(&(property, frequency))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(PropertyKind, Frequency), &Tensor)> {
        self.values.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The basis a recipe requires from the store: which field combinations must
/// be present, and which (property, frequency) pairs each must record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasisRequirements {
    pub combinations: BTreeSet<FieldCombination>,
    pub properties: Vec<(PropertyKind, Frequency)>,
}

/// Result of checking the store against a recipe's required basis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completeness {
    /// Required entries absent from the store.
    pub missing: Vec<(FieldCombination, PropertyKind, Frequency)>,
    /// Field combinations present in the store but not required.
    pub unexpected: Vec<FieldCombination>,
}

impl Completeness {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Per-geometry map from field combination to the quantities computed there.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputationalResults {
    dof: usize,
    records: BTreeMap<FieldCombination, PropertyRecord>,
}

/// On-disk row of the store dump.
#[derive(Debug, Serialize, Deserialize)]
struct StoreRow {
    dof: usize,
    field: String,
    property: String,
    frequency: String,
    component: String,
    value: f64,
}

impl ComputationalResults {
    /// Creates an empty store for a geometry with `dof` Cartesian degrees of
    /// freedom (3 × atom count).
    pub fn new(dof: usize) -> Self {
        Self {
            dof,
            records: BTreeMap::new(),
        }
    }

    pub fn dof(&self) -> usize {
        self.dof
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Adds one computed tensor. Re-adding an identical value is a no-op;
    /// a differing value under the same key is a duplicate-derivative error.
    pub fn add(
        &mut self,
        combination: FieldCombination,
        property: PropertyKind,
        frequency: Frequency,
        tensor: Tensor,
    ) -> Result<(), StoreError> {
        // store keys are frequency-free; the frequency tags the recorded
        // quantity instead
        let key = FieldCombination::new(combination.levels());
        let expected_shape = property.shape(self.dof);
        if tensor.shape() != expected_shape.as_slice() {
            return Err(TensorError::ShapeMismatch {
                expected: expected_shape,
                actual: tensor.shape().to_vec(),
            }
            .into());
        }
        let record = self.records.entry(key).or_default();
        match record.values.get(&(property, frequency)) {
            Some(existing) if existing == &tensor => Ok(()),
            Some(_) => Err(StoreError::DuplicateEntry {
                combination: key,
                property,
                frequency,
            }),
            None => {
                record.values.insert((property, frequency), tensor);
                Ok(())
            }
        }
    }

    pub fn record(&self, combination: &FieldCombination) -> Option<&PropertyRecord> {
        self.records
            .get(&FieldCombination::new(combination.levels()))
    }

    pub fn combinations(&self) -> impl Iterator<Item = &FieldCombination> {
        self.records.keys()
    }

    /// A single tensor component, the access path used by the differentiation
    /// engine.
    pub fn value(
        &self,
        combination: &FieldCombination,
        property: PropertyKind,
        frequency: Frequency,
        component: &[usize],
    ) -> Result<f64, StoreError> {
        let tensor = self
            .record(combination)
            .and_then(|record| record.get(property, frequency))
            .ok_or(StoreError::MissingFieldValue {
                combination: *combination,
                property,
                frequency,
            })?;
        Ok(tensor.get(component)?)
    }

    /// Reports completeness against a recipe's required basis.
    pub fn check(&self, requirements: &BasisRequirements) -> Completeness {
        let mut missing = Vec::new();
        for combination in &requirements.combinations {
            match self.record(combination) {
                None => {
                    for &(property, frequency) in &requirements.properties {
                        missing.push((*combination, property, frequency));
                    }
                }
                Some(record) => {
                    for &(property, frequency) in &requirements.properties {
                        if record.get(property, frequency).is_none() {
                            missing.push((*combination, property, frequency));
                        }
                    }
                }
            }
        }
        let unexpected = self
            .records
            .keys()
            .filter(|combination| !requirements.combinations.contains(combination))
            .copied()
            .collect();
        Completeness { missing, unexpected }
    }

    /// Dumps the store as CSV, one row per tensor component, in key order.
    pub fn write_to(&self, writer: &mut impl Write) -> Result<(), StoreError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for (combination, record) in &self.records {
            for ((property, frequency), tensor) in record.iter() {
                for component in property.base_key().all_components(self.dof) {
                    csv_writer.serialize(StoreRow {
                        dof: self.dof,
                        field: combination.to_string(),
                        property: property.to_string(),
                        frequency: frequency.to_string(),
                        component: component
                            .iter()
                            .map(|i| i.to_string())
                            .collect::<Vec<_>>()
                            .join(":"),
                        value: tensor.get(&component)?,
                    })?;
                }
            }
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Reads a store previously produced by [`write_to`].
    ///
    /// [`write_to`]: ComputationalResults::write_to
    pub fn read_from(reader: &mut impl Read) -> Result<Self, StoreError> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut dof: Option<usize> = None;
        let mut pending: BTreeMap<(FieldCombination, PropertyKind, Frequency), Vec<(Vec<usize>, f64)>> =
            BTreeMap::new();
        for (index, result) in csv_reader.deserialize::<StoreRow>().enumerate() {
            let row_number = index + 2; // header is row 1
            let row = result?;
            match dof {
                Some(expected) if expected != row.dof => {
                    return Err(StoreError::DofMismatch {
                        row: row_number,
                        expected,
                        got: row.dof,
                    });
                }
                Some(_) => {}
                None => dof = Some(row.dof),
            }
            let bad_row = |reason: &str| StoreError::BadRow {
                row: row_number,
                reason: reason.to_string(),
            };
            let combination: FieldCombination =
                row.field.parse().map_err(|_| bad_row("field"))?;
            let property: PropertyKind =
                row.property.parse().map_err(|_| bad_row("property"))?;
            let frequency: Frequency =
                row.frequency.parse().map_err(|_| bad_row("frequency"))?;
            let component = if row.component.is_empty() {
                Vec::new()
            } else {
                row.component
                    .split(':')
                    .map(|part| part.parse::<usize>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| bad_row("component"))?
            };
            pending
                .entry((combination, property, frequency))
                .or_default()
                .push((component, row.value));
        }
        let mut store = ComputationalResults::new(dof.unwrap_or(0));
        for ((combination, property, frequency), components) in pending {
            let mut tensor = Tensor::zeros(&property.shape(store.dof));
            for (component, value) in components {
                tensor.set(&component, value)?;
            }
            store.add(combination, property, frequency, tensor)?;
        }
        Ok(store)
    }

    pub fn write_to_path<P: AsRef<Path>>(&self, path: P) -> Result<(), StoreError> {
        let file = std::fs::File::create(path)?;
        let mut writer = std::io::BufWriter::new(file);
        self.write_to(&mut writer)
    }

    pub fn read_from_path<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let file = std::fs::File::open(path)?;
        let mut reader = std::io::BufReader::new(file);
        Self::read_from(&mut reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dipole(x: f64, y: f64, z: f64) -> Tensor {
        Tensor::from_data(&[3], vec![x, y, z]).unwrap()
    }

    fn sample_store() -> ComputationalResults {
        let mut store = ComputationalResults::new(9);
        store
            .add(
                FieldCombination::zero(),
                PropertyKind::Energy,
                Frequency::Static,
                Tensor::scalar(-76.42),
            )
            .unwrap();
        store
            .add(
                FieldCombination::new([1, 0, 0]),
                PropertyKind::Energy,
                Frequency::Static,
                Tensor::scalar(-76.4204),
            )
            .unwrap();
        store
            .add(
                FieldCombination::new([1, 0, 0]),
                PropertyKind::Dipole,
                Frequency::Static,
                dipole(0.1, 0.0, 0.72),
            )
            .unwrap();
        store
    }

    #[test]
    fn identical_duplicate_is_a_no_op() {
        let mut store = sample_store();
        let result = store.add(
            FieldCombination::zero(),
            PropertyKind::Energy,
            Frequency::Static,
            Tensor::scalar(-76.42),
        );
        assert!(result.is_ok());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn differing_duplicate_is_an_error() {
        let mut store = sample_store();
        let result = store.add(
            FieldCombination::zero(),
            PropertyKind::Energy,
            Frequency::Static,
            Tensor::scalar(-76.43),
        );
        assert!(matches!(result, Err(StoreError::DuplicateEntry { .. })));
    }

    #[test]
    fn shape_is_validated_on_insert() {
        let mut store = ComputationalResults::new(9);
        let result = store.add(
            FieldCombination::zero(),
            PropertyKind::Dipole,
            Frequency::Static,
            Tensor::scalar(1.0),
        );
        assert!(matches!(result, Err(StoreError::Shape { .. })));
    }

    #[test]
    fn value_reports_missing_field() {
        let store = sample_store();
        let result = store.value(
            &FieldCombination::new([0, 1, 0]),
            PropertyKind::Energy,
            Frequency::Static,
            &[],
        );
        assert!(matches!(result, Err(StoreError::MissingFieldValue { .. })));

        let value = store
            .value(
                &FieldCombination::new([1, 0, 0]),
                PropertyKind::Dipole,
                Frequency::Static,
                &[2],
            )
            .unwrap();
        assert_eq!(value, 0.72);
    }

    #[test]
    fn check_lists_missing_and_unexpected_entries() {
        let store = sample_store();
        let requirements = BasisRequirements {
            combinations: [
                FieldCombination::zero(),
                FieldCombination::new([-1, 0, 0]),
            ]
            .into_iter()
            .collect(),
            properties: vec![(PropertyKind::Energy, Frequency::Static)],
        };
        let completeness = store.check(&requirements);
        assert!(!completeness.is_complete());
        assert_eq!(
            completeness.missing,
            vec![(
                FieldCombination::new([-1, 0, 0]),
                PropertyKind::Energy,
                Frequency::Static
            )]
        );
        assert_eq!(
            completeness.unexpected,
            vec![FieldCombination::new([1, 0, 0])]
        );
    }

    #[test]
    fn csv_round_trip_preserves_every_component() {
        let store = sample_store();
        let mut buffer = Vec::new();
        store.write_to(&mut buffer).unwrap();
        let restored = ComputationalResults::read_from(&mut buffer.as_slice()).unwrap();
        assert_eq!(store, restored);
    }
}
