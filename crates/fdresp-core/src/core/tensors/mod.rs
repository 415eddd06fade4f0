//! Dense multi-index tensors and the write-once collection of derivative
//! tensors produced by a bake.

use crate::core::fields::Frequency;
use crate::core::fields::derivative::DerivativeKey;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TensorError {
    #[error("Component index {index:?} out of bounds for tensor of shape {shape:?}")]
    IndexOutOfBounds { index: Vec<usize>, shape: Vec<usize> },
    #[error("Shape {actual:?} does not match expected shape {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Derivative tensor {key} @ {frequency} is already present in the set")]
    DuplicateTensor {
        key: DerivativeKey,
        frequency: Frequency,
    },
}

/// A dense row-major tensor of `f64` values. A rank-0 tensor is a scalar with
/// a single element.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl Tensor {
    pub fn zeros(shape: &[usize]) -> Self {
        let len = shape.iter().product::<usize>().max(1);
        Self {
            shape: shape.to_vec(),
            data: vec![0.0; len],
        }
    }

    pub fn scalar(value: f64) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    pub fn from_data(shape: &[usize], data: Vec<f64>) -> Result<Self, TensorError> {
        let expected = shape.iter().product::<usize>().max(1);
        if data.len() != expected {
            return Err(TensorError::ShapeMismatch {
                expected: vec![expected],
                actual: vec![data.len()],
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn offset(&self, index: &[usize]) -> Result<usize, TensorError> {
        if index.len() != self.shape.len()
            || index.iter().zip(&self.shape).any(|(i, extent)| i >= extent)
        {
            return Err(TensorError::IndexOutOfBounds {
                index: index.to_vec(),
                shape: self.shape.clone(),
            });
        }
        Ok(index
            .iter()
            .zip(&self.shape)
            .fold(0, |acc, (i, extent)| acc * extent + i))
    }

    pub fn get(&self, index: &[usize]) -> Result<f64, TensorError> {
        Ok(self.data[self.offset(index)?])
    }

    pub fn set(&mut self, index: &[usize], value: f64) -> Result<(), TensorError> {
        let offset = self.offset(index)?;
        self.data[offset] = value;
        Ok(())
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn scale(&mut self, factor: f64) {
        for value in &mut self.data {
            *value *= factor;
        }
    }

    /// Elementwise sum; shapes must match.
    pub fn add(&mut self, other: &Tensor) -> Result<(), TensorError> {
        if self.shape != other.shape {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.clone(),
                actual: other.shape.clone(),
            });
        }
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a += b;
        }
        Ok(())
    }

    /// Largest absolute element.
    pub fn max_abs(&self) -> f64 {
        self.data.iter().fold(0.0f64, |acc, v| acc.max(v.abs()))
    }
}

/// A derivative tensor produced by the baking stage: a value per component,
/// a parallel uncertainty per component, and the set of components that could
/// not be computed (missing field values). Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivativeTensor {
    key: DerivativeKey,
    frequency: Frequency,
    values: Tensor,
    uncertainties: Tensor,
    missing: BTreeSet<Vec<usize>>,
}

impl DerivativeTensor {
    pub fn new(key: DerivativeKey, frequency: Frequency, dof: usize) -> Self {
        let shape = key.shape(dof);
        Self {
            key,
            frequency,
            values: Tensor::zeros(&shape),
            uncertainties: Tensor::zeros(&shape),
            missing: BTreeSet::new(),
        }
    }

    pub fn from_parts(
        key: DerivativeKey,
        frequency: Frequency,
        values: Tensor,
        uncertainties: Tensor,
    ) -> Result<Self, TensorError> {
        if values.shape() != uncertainties.shape() {
            return Err(TensorError::ShapeMismatch {
                expected: values.shape().to_vec(),
                actual: uncertainties.shape().to_vec(),
            });
        }
        Ok(Self {
            key,
            frequency,
            values,
            uncertainties,
            missing: BTreeSet::new(),
        })
    }

    pub fn key(&self) -> DerivativeKey {
        self.key
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    pub fn values(&self) -> &Tensor {
        &self.values
    }

    /// The parallel uncertainty array (the spread of the Romberg triangle per
    /// component).
    pub fn uncertainty_tensor(&self) -> &Tensor {
        &self.uncertainties
    }

    pub fn set_component(
        &mut self,
        index: &[usize],
        value: f64,
        uncertainty: f64,
    ) -> Result<(), TensorError> {
        self.values.set(index, value)?;
        self.uncertainties.set(index, uncertainty)
    }

    /// Marks a component as not computable; its value and uncertainty are
    /// stored as NaN.
    pub fn mark_missing(&mut self, index: &[usize]) -> Result<(), TensorError> {
        self.values.set(index, f64::NAN)?;
        self.uncertainties.set(index, f64::NAN)?;
        self.missing.insert(index.to_vec());
        Ok(())
    }

    pub fn missing_components(&self) -> impl Iterator<Item = &Vec<usize>> {
        self.missing.iter()
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn is_component_available(&self, index: &[usize]) -> bool {
        !self.missing.contains(index)
    }

    /// Largest relative uncertainty over available components, used as the
    /// noise gate before a tensor feeds vibrational contributions.
    pub fn max_relative_uncertainty(&self) -> f64 {
        let scale = self.values.max_abs().max(f64::MIN_POSITIVE);
        self.values
            .data()
            .iter()
            .zip(self.uncertainties.data())
            .filter(|(value, _)| value.is_finite())
            .fold(0.0f64, |acc, (_, unc)| acc.max(unc.abs() / scale))
    }
}

/// Write-once collection of derivative tensors keyed by (derivative key,
/// frequency); the unit of exchange between the baking and shaking stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivativeTensorSet {
    tensors: BTreeMap<(DerivativeKey, Frequency), DerivativeTensor>,
}

impl DerivativeTensorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a tensor; a tensor under the same (key, frequency) may not be
    /// replaced.
    pub fn insert(&mut self, tensor: DerivativeTensor) -> Result<(), TensorError> {
        let entry = (tensor.key(), tensor.frequency());
        if self.tensors.contains_key(&entry) {
            return Err(TensorError::DuplicateTensor {
                key: entry.0,
                frequency: entry.1,
            });
        }
        self.tensors.insert(entry, tensor);
        Ok(())
    }

    pub fn get(&self, key: DerivativeKey, frequency: Frequency) -> Option<&DerivativeTensor> {
        self.tensors.get(&(key, frequency))
    }

    pub fn contains(&self, key: DerivativeKey, frequency: Frequency) -> bool {
        self.tensors.contains_key(&(key, frequency))
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Tensors in (key, frequency) order.
    pub fn iter(&self) -> impl Iterator<Item = &DerivativeTensor> {
        self.tensors.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = (DerivativeKey, Frequency)> + '_ {
        self.tensors.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_tensor_has_one_element() {
        let tensor = Tensor::scalar(-76.4);
        assert_eq!(tensor.rank(), 0);
        assert_eq!(tensor.get(&[]).unwrap(), -76.4);
    }

    #[test]
    fn row_major_indexing_matches_layout() {
        let tensor = Tensor::from_data(&[2, 3], (0..6).map(f64::from).collect()).unwrap();
        assert_eq!(tensor.get(&[0, 0]).unwrap(), 0.0);
        assert_eq!(tensor.get(&[0, 2]).unwrap(), 2.0);
        assert_eq!(tensor.get(&[1, 0]).unwrap(), 3.0);
        assert_eq!(tensor.get(&[1, 2]).unwrap(), 5.0);
    }

    #[test]
    fn out_of_bounds_access_is_an_error() {
        let tensor = Tensor::zeros(&[3, 3]);
        assert!(matches!(
            tensor.get(&[3, 0]),
            Err(TensorError::IndexOutOfBounds { .. })
        ));
        assert!(matches!(
            tensor.get(&[0]),
            Err(TensorError::IndexOutOfBounds { .. })
        ));
    }

    #[test]
    fn from_data_validates_length() {
        assert!(Tensor::from_data(&[2, 2], vec![1.0; 3]).is_err());
        assert!(Tensor::from_data(&[2, 2], vec![1.0; 4]).is_ok());
    }

    #[test]
    fn derivative_tensor_tracks_missing_components() {
        let key: DerivativeKey = "F".parse().unwrap();
        let mut tensor = DerivativeTensor::new(key, Frequency::Static, 0);
        tensor.set_component(&[0], 1.0, 1e-6).unwrap();
        tensor.mark_missing(&[2]).unwrap();

        assert!(!tensor.is_complete());
        assert!(tensor.is_component_available(&[0]));
        assert!(!tensor.is_component_available(&[2]));
        assert!(tensor.values().get(&[2]).unwrap().is_nan());
        assert_eq!(
            tensor.missing_components().collect::<Vec<_>>(),
            vec![&vec![2]]
        );
    }

    #[test]
    fn max_relative_uncertainty_ignores_missing_components() {
        let key: DerivativeKey = "F".parse().unwrap();
        let mut tensor = DerivativeTensor::new(key, Frequency::Static, 0);
        tensor.set_component(&[0], 10.0, 0.1).unwrap();
        tensor.set_component(&[1], 5.0, 0.5).unwrap();
        tensor.mark_missing(&[2]).unwrap();

        assert!((tensor.max_relative_uncertainty() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn tensor_set_rejects_duplicate_keys() {
        let key: DerivativeKey = "FF".parse().unwrap();
        let mut set = DerivativeTensorSet::new();
        set.insert(DerivativeTensor::new(key, Frequency::Static, 0))
            .unwrap();
        let result = set.insert(DerivativeTensor::new(key, Frequency::Static, 0));
        assert!(matches!(result, Err(TensorError::DuplicateTensor { .. })));

        // a different frequency is a different entry
        set.insert(DerivativeTensor::new(key, Frequency::Dynamic(0.04), 0))
            .unwrap();
        assert_eq!(set.len(), 2);
    }
}
