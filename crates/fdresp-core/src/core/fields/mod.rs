//! Field algebra: the value types labelling every perturbation under which a
//! quantum-chemistry quantity was computed.
//!
//! A [`FieldCombination`] identifies one point of the finite-field ladder
//! (signed integer level per Cartesian axis, plus an optical frequency tag);
//! it is the key of the computational-results store. A
//! [`DerivativeKey`](derivative::DerivativeKey) labels a derivative order
//! tuple ("FF", "NNF", ...). Both are plain value types with no state.

pub mod derivative;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Hartree energy expressed in electronvolts.
pub const HARTREE_IN_EV: f64 = 27.211386245988;
/// Hartree energy expressed in wavenumbers (cm⁻¹).
pub const HARTREE_IN_WAVENUMBER: f64 = 219474.6313632;
/// Photon energy in hartree of a 1 nm wavelength, so that
/// `E(au) = HARTREE_NM_PRODUCT / λ(nm)`.
pub const HARTREE_NM_PRODUCT: f64 = 45.56335252907;

/// One Cartesian direction of the applied electric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Axis> {
        match index {
            0 => Some(Axis::X),
            1 => Some(Axis::Y),
            2 => Some(Axis::Z),
            _ => None,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "x"),
            Axis::Y => write!(f, "y"),
            Axis::Z => write!(f, "z"),
        }
    }
}

/// Optical frequency tag of a perturbation or property.
///
/// `Static` is the zero-frequency limit; `Dynamic` carries the frequency in
/// hartree (atomic units). Equality and ordering use the exact bit pattern so
/// that frequencies parsed from the same text always compare equal.
#[derive(Debug, Clone, Copy)]
pub enum Frequency {
    Static,
    Dynamic(f64),
}

impl Frequency {
    /// The frequency value in hartree; zero for the static limit.
    pub fn to_au(self) -> f64 {
        match self {
            Frequency::Static => 0.0,
            Frequency::Dynamic(value) => value,
        }
    }

    pub fn is_static(self) -> bool {
        matches!(self, Frequency::Static)
    }
}

impl PartialEq for Frequency {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Frequency::Static, Frequency::Static) => true,
            (Frequency::Dynamic(a), Frequency::Dynamic(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for Frequency {}

impl std::hash::Hash for Frequency {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Frequency::Static => 0u8.hash(state),
            Frequency::Dynamic(value) => {
                1u8.hash(state);
                value.to_bits().hash(state);
            }
        }
    }
}

impl PartialOrd for Frequency {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frequency {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self, other) {
            (Frequency::Static, Frequency::Static) => std::cmp::Ordering::Equal,
            (Frequency::Static, Frequency::Dynamic(_)) => std::cmp::Ordering::Less,
            (Frequency::Dynamic(_), Frequency::Static) => std::cmp::Ordering::Greater,
            (Frequency::Dynamic(a), Frequency::Dynamic(b)) => a.total_cmp(b),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Static => write!(f, "static"),
            Frequency::Dynamic(value) => write!(f, "{}", value),
        }
    }
}

/// Error raised when a frequency string cannot be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a valid frequency (expected 'static', a value in au, or a value with a nm/eV/cm-1 suffix)")]
pub struct ParseFrequencyError(String);

impl FromStr for Frequency {
    type Err = ParseFrequencyError;

    /// Parses `"static"`, a bare hartree value, or a value suffixed with one
    /// of the common experimental units (`nm`, `eV`, `cm-1`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("static") {
            return Ok(Frequency::Static);
        }
        if let Ok(value) = trimmed.parse::<f64>() {
            return Ok(if value == 0.0 {
                Frequency::Static
            } else {
                Frequency::Dynamic(value)
            });
        }
        let lower = trimmed.to_ascii_lowercase();
        for (suffix, convert) in [
            ("cm-1", (|v| v / HARTREE_IN_WAVENUMBER) as fn(f64) -> f64),
            ("nm", |v| HARTREE_NM_PRODUCT / v),
            ("ev", |v| v / HARTREE_IN_EV),
        ] {
            if let Some(prefix) = lower.strip_suffix(suffix) {
                if let Ok(value) = prefix.trim().parse::<f64>() {
                    return Ok(Frequency::Dynamic(convert(value)));
                }
            }
        }
        Err(ParseFrequencyError(s.to_string()))
    }
}

impl Serialize for Frequency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Frequency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}

/// One point of the finite-field ladder: a signed integer level per Cartesian
/// axis plus an optical frequency tag.
///
/// A level `l` on an axis maps to the real field amplitude
/// `sign(l) · h · r^(|l|−1)` where `h` is the recipe's minimum field and `r`
/// its ratio; level 0 is the unperturbed geometry. Two combinations are equal
/// iff their level multisets and frequency tags match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldCombination {
    levels: [i32; 3],
    frequency: Frequency,
}

impl FieldCombination {
    pub fn new(levels: [i32; 3]) -> Self {
        Self {
            levels,
            frequency: Frequency::Static,
        }
    }

    pub fn zero() -> Self {
        Self::new([0, 0, 0])
    }

    pub fn with_frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn level(&self, axis: Axis) -> i32 {
        self.levels[axis.index()]
    }

    pub fn levels(&self) -> [i32; 3] {
        self.levels
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// The canonical multiset view: (axis, signed level) pairs for every
    /// perturbed axis, in axis order.
    pub fn components(&self) -> impl Iterator<Item = (Axis, i32)> + '_ {
        Axis::ALL
            .into_iter()
            .map(|axis| (axis, self.level(axis)))
            .filter(|(_, level)| *level != 0)
    }

    /// When the combination labels a derivative request, the partial
    /// derivative order along `axis` is the unsigned level count.
    pub fn order_along(&self, axis: Axis) -> usize {
        self.level(axis).unsigned_abs() as usize
    }

    pub fn total_order(&self) -> usize {
        self.levels.iter().map(|l| l.unsigned_abs() as usize).sum()
    }

    pub fn is_zero_field(&self) -> bool {
        self.levels == [0, 0, 0]
    }

    /// Real field amplitude of a single ladder level.
    pub fn real_amplitude(level: i32, min_field: f64, ratio: f64) -> f64 {
        if level == 0 {
            0.0
        } else {
            level.signum() as f64 * min_field * ratio.powi(level.abs() - 1)
        }
    }

    /// Real field amplitudes along x, y, z for this combination.
    pub fn amplitudes(&self, min_field: f64, ratio: f64) -> [f64; 3] {
        [
            Self::real_amplitude(self.levels[0], min_field, ratio),
            Self::real_amplitude(self.levels[1], min_field, ratio),
            Self::real_amplitude(self.levels[2], min_field, ratio),
        ]
    }
}

impl fmt::Display for FieldCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.levels[0], self.levels[1], self.levels[2]
        )?;
        if let Frequency::Dynamic(value) = self.frequency {
            write!(f, "@{}", value)?;
        }
        Ok(())
    }
}

impl FromStr for FieldCombination {
    type Err = ParseFieldCombinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (levels_part, frequency) = match s.split_once('@') {
            Some((levels, freq)) => (
                levels,
                freq.parse::<f64>()
                    .map(Frequency::Dynamic)
                    .map_err(|_| ParseFieldCombinationError(s.to_string()))?,
            ),
            None => (s, Frequency::Static),
        };
        let mut levels = [0i32; 3];
        let mut parts = levels_part.split(':');
        for slot in &mut levels {
            *slot = parts
                .next()
                .and_then(|p| p.trim().parse().ok())
                .ok_or_else(|| ParseFieldCombinationError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ParseFieldCombinationError(s.to_string()));
        }
        Ok(FieldCombination { levels, frequency })
    }
}

/// Error raised when a field-combination string cannot be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a valid field combination (expected 'lx:ly:lz' with optional '@frequency')")]
pub struct ParseFieldCombinationError(String);
