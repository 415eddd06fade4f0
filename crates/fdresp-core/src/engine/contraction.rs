//! The generic tensor-contraction kernels behind every vibrational
//! contribution.
//!
//! Each perturbation-theory term is a contraction of property-derivative
//! tensors (`NF`, `NFF`, `NNF`, `NNFF`) and force constants (`NNN`) over
//! normal-mode indices, weighted by `lambda_` frequency denominators and
//! symmetrized over the distinct permutations of the target's Cartesian
//! indices. The shared machinery (permutation iterator, mode loops, cutoff
//! handling, prefactor application) lives here once; a
//! [`ContractionKind`] picks the index-pairing shape and the slot keys say
//! which tensors fill it.

use crate::core::fields::Frequency;
use crate::core::fields::derivative::DerivativeKey;
use crate::core::modes::NormalModes;
use crate::core::tensors::{DerivativeTensorSet, Tensor};
use crate::engine::error::ShakingError;
use itertools::Itertools;
use std::collections::BTreeSet;

/// The frequency denominator of the perturbation series:
/// `((Σω_vib + ω_opt)(Σω_vib − ω_opt))⁻¹`. Even in the optical argument.
pub fn lambda_(up: f64, down: f64) -> f64 {
    1.0 / ((down + up) * (down - up))
}

/// One assignment of (Cartesian component, optical-field weight) pairs to
/// the index positions of the target tensor.
pub type Permutation = Vec<(usize, i32)>;

/// Enumerates the distinct permutations of the target's (component, field
/// weight) pairs, plus the multiplicity restoring the full permutation sum.
/// The first position carries the weight `−Σ input_fields` (the `−ω_σ`
/// convention); the remaining positions carry `input_fields` in order.
pub fn get_iterator(coordinates: &[usize], input_fields: &[i32]) -> (f64, Vec<Permutation>) {
    debug_assert_eq!(coordinates.len(), input_fields.len() + 1);
    let mut shufflable: Vec<(usize, i32)> = Vec::with_capacity(coordinates.len());
    shufflable.push((coordinates[0], -input_fields.iter().sum::<i32>()));
    for (position, &coordinate) in coordinates.iter().enumerate().skip(1) {
        shufflable.push((coordinate, input_fields[position - 1]));
    }
    let len = shufflable.len();
    let unique: BTreeSet<Permutation> = shufflable.into_iter().permutations(len).collect();
    let factorial: f64 = (1..=len).product::<usize>() as f64;
    let multiplier = factorial / unique.len() as f64;
    (multiplier, unique.into_iter().collect())
}

/// The index-pairing shape of a contraction. `Square*` kinds contract two
/// property-derivative slots (A, B); `Triple*` kinds are the dipole-cubed
/// family; ZPVA kinds average a single property surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContractionKind {
    /// `ZPVA^(1,0)`: curvature of the property surface, `ħ/(4ω)`-weighted.
    Zpva10,
    /// `ZPVA^(0,1)`: first property derivative against the cubic force field.
    Zpva01,
    /// `[AB]^(0,0)`: harmonic double-product, one mode sum.
    SquareHarmonic,
    /// `[AB]^(2,0)`: second electrical derivatives, two mode sums.
    SquareSecondOrder,
    /// `[AB]^(1,1)`: mixed electrical/mechanical anharmonicity, cubic force
    /// constants, three mode sums.
    SquareMixedAnharmonic,
    /// `[AB]^(0,2)`: doubled mechanical anharmonicity, four mode sums.
    SquareMechanicalAnharmonic,
    /// `[µ³]^(1,0)`: harmonic triple-product through `NNF`.
    TripleHarmonicAnharmonic,
    /// `[µ³]^(0,1)`: triple-product through the cubic force constants.
    TripleMechanicalAnharmonic,
}

/// Everything a kernel needs to read: the available derivative tensors, the
/// normal modes, and the ill-conditioning cutoff.
pub struct ContractionContext<'a> {
    pub tensors: &'a DerivativeTensorSet,
    pub modes: &'a NormalModes,
    pub cutoff: f64,
}

impl<'a> ContractionContext<'a> {
    fn tensor_at(&self, key: DerivativeKey, frequency: Frequency) -> Result<&Tensor, ShakingError> {
        self.tensors
            .get(key, frequency)
            .map(|tensor| tensor.values())
            .ok_or(ShakingError::DerivativeNotAvailable { key, frequency })
    }

    fn static_tensor(&self, key: DerivativeKey) -> Result<&Tensor, ShakingError> {
        self.tensor_at(key, Frequency::Static)
    }

    /// Vibrational modes safe to divide by, and whether any were skipped.
    fn usable_modes(&self) -> (Vec<usize>, bool) {
        let mut skipped = false;
        let modes = self
            .modes
            .vibrational_modes()
            .filter(|&mode| {
                if self.modes.is_ill_conditioned(mode, self.cutoff) {
                    skipped = true;
                    false
                } else {
                    true
                }
            })
            .collect();
        (modes, skipped)
    }

    fn omega(&self, mode: usize) -> f64 {
        self.modes.frequency(mode)
    }
}

fn index(mode_part: &[usize], field_part: &[usize]) -> Vec<usize> {
    let mut component = Vec::with_capacity(mode_part.len() + field_part.len());
    component.extend_from_slice(mode_part);
    component.extend_from_slice(field_part);
    component
}

fn fields_of(permutation: &[(usize, i32)]) -> Vec<usize> {
    permutation.iter().map(|&(coordinate, _)| coordinate).collect()
}

/// Evaluates one pure-vibrational component. `component` is one Cartesian
/// index tuple of the target tensor; `input_fields` the optical weights of
/// its trailing indices; `omega` the optical frequency in hartree.
/// Returns the value and whether an ill-conditioned mode was skipped.
pub fn evaluate_component(
    ctx: &ContractionContext<'_>,
    kind: ContractionKind,
    slots: &[DerivativeKey],
    component: &[usize],
    input_fields: &[i32],
    omega: f64,
) -> Result<(f64, bool), ShakingError> {
    let (multiplier, permutations) = get_iterator(component, input_fields);
    let (modes, skipped) = ctx.usable_modes();

    let value = match kind {
        ContractionKind::SquareHarmonic => {
            let a_t = ctx.static_tensor(slots[0])?;
            let b_t = ctx.static_tensor(slots[1])?;
            let mut sum = 0.0;
            for p in &permutations {
                let ws = p[0].1 as f64 * omega;
                for &a in &modes {
                    let tmp = a_t.get(&index(&[a], &[p[0].0]))?
                        * b_t.get(&index(&[a], &fields_of(&p[1..])))?;
                    sum += lambda_(ws, ctx.omega(a)) * tmp;
                }
            }
            0.5 * multiplier * sum
        }
        ContractionKind::SquareSecondOrder => {
            let a_t = ctx.static_tensor(slots[0])?;
            let b_t = ctx.static_tensor(slots[1])?;
            let mut sum = 0.0;
            for p in &permutations {
                let ws = p[0].1 as f64 * omega;
                for &a in &modes {
                    for &b in &modes {
                        let tmp = (1.0 / ctx.omega(a))
                            * a_t.get(&index(&[a, b], &[p[0].0]))?
                            * b_t.get(&index(&[a, b], &fields_of(&p[1..])))?;
                        sum += lambda_(ws, ctx.omega(a) + ctx.omega(b)) * tmp;
                    }
                }
            }
            0.25 * multiplier * sum
        }
        ContractionKind::SquareMixedAnharmonic => {
            // slots: [A1, B1, A2, B2]; the cubic force constants come last
            let a1 = ctx.static_tensor(slots[0])?;
            let b1 = ctx.static_tensor(slots[1])?;
            let a2 = ctx.static_tensor(slots[2])?;
            let b2 = ctx.static_tensor(slots[3])?;
            let nnn = ctx.static_tensor(DerivativeKey::modes(3))?;
            let mut sum = 0.0;
            for p in &permutations {
                let ws = p[0].1 as f64 * omega;
                let first = [p[0].0];
                let rest = fields_of(&p[1..]);
                for &a in &modes {
                    for &b in &modes {
                        let f_ab1 = 1.0 / ctx.omega(a) + 1.0 / ctx.omega(b);
                        let f_ab2 = ctx.omega(b).powi(-2);

                        let a2_ab = a2.get(&index(&[a, b], &first))?;
                        let b2_ab = b2.get(&index(&[a, b], &rest))?;
                        let tmp_ab1 = f_ab1 * a2_ab;
                        let tmp_ab3 = f_ab1 * b2_ab;
                        let tmp_ab2 = f_ab2
                            * (a2_ab * b1.get(&index(&[a], &rest))?
                                + b2_ab * a1.get(&index(&[a], &first))?);

                        for &c in &modes {
                            let tmp1 = (tmp_ab1 * b1.get(&index(&[c], &rest))?
                                + tmp_ab3 * a1.get(&index(&[c], &first))?)
                                * nnn.get(&[a, b, c])?;
                            let tmp2 = tmp_ab2 * nnn.get(&[b, c, c])? / ctx.omega(c);

                            let fr_1 = lambda_(ws, ctx.omega(a) + ctx.omega(b))
                                * lambda_(ws, ctx.omega(c));
                            sum += fr_1 * tmp1 + lambda_(ws, ctx.omega(a)) * tmp2;
                        }
                    }
                }
            }
            -0.125 * multiplier * sum
        }
        ContractionKind::SquareMechanicalAnharmonic => {
            let a1 = ctx.static_tensor(slots[0])?;
            let b1 = ctx.static_tensor(slots[1])?;
            let nnn = ctx.static_tensor(DerivativeKey::modes(3))?;
            let mut sum = 0.0;
            for p in &permutations {
                let ws = p[0].1 as f64 * omega;
                let first = [p[0].0];
                let rest = fields_of(&p[1..]);
                for &a in &modes {
                    let mult_a = 1.0 / ctx.omega(a);
                    for &b in &modes {
                        let mult_ab = ctx.omega(b).powi(-2);
                        for &c in &modes {
                            let mult_abc = mult_a * a1.get(&index(&[c], &first))?;
                            let mult_abc_1 = mult_abc * nnn.get(&[a, a, b])? * mult_ab;
                            let mult_abc_2 = mult_abc * nnn.get(&[a, b, c])?;
                            for &d in &modes {
                                let mult_abcd = b1.get(&index(&[d], &rest))?;
                                let tmp1 = mult_abcd * mult_abc_1 * nnn.get(&[b, c, d])?;
                                let tmp2 =
                                    mult_abcd * mult_abc_2 * nnn.get(&[a, b, d])? * 2.0;
                                sum += (tmp1
                                    + lambda_(ws, ctx.omega(a) + ctx.omega(b)) * tmp2)
                                    * lambda_(ws, ctx.omega(c))
                                    * lambda_(ws, ctx.omega(d));
                            }
                        }
                    }
                }
            }
            // the inner sum enters negated and the prefactor is −1/8
            0.125 * multiplier * sum
        }
        ContractionKind::TripleHarmonicAnharmonic => {
            let nf = ctx.static_tensor(slots[0])?;
            let nnf = ctx.static_tensor(slots[1])?;
            let mut sum = 0.0;
            for p in &permutations {
                let ws0 = p[0].1 as f64 * omega;
                let ws2 = p[2].1 as f64 * omega;
                for &a in &modes {
                    let tmp_a = nf.get(&index(&[a], &[p[0].0]))?;
                    for &b in &modes {
                        let tmp_ab = tmp_a
                            * nnf.get(&index(&[a, b], &[p[1].0]))?
                            * nf.get(&index(&[b], &[p[2].0]))?;
                        sum += lambda_(ws0, ctx.omega(a)) * lambda_(ws2, ctx.omega(b)) * tmp_ab;
                    }
                }
            }
            0.5 * multiplier * sum
        }
        ContractionKind::TripleMechanicalAnharmonic => {
            let nf = ctx.static_tensor(slots[0])?;
            let nnn = ctx.static_tensor(DerivativeKey::modes(3))?;
            let mut sum = 0.0;
            for p in &permutations {
                let ws0 = p[0].1 as f64 * omega;
                let ws1 = p[1].1 as f64 * omega;
                let ws2 = p[2].1 as f64 * omega;
                for &a in &modes {
                    let tmp_a = nf.get(&index(&[a], &[p[0].0]))?;
                    for &b in &modes {
                        let tmp_ab = tmp_a * nf.get(&index(&[b], &[p[1].0]))?;
                        for &c in &modes {
                            let tmp_abc =
                                tmp_ab * nf.get(&index(&[c], &[p[2].0]))? * nnn.get(&[a, b, c])?;
                            sum += lambda_(ws0, ctx.omega(a))
                                * lambda_(ws1, ctx.omega(b))
                                * lambda_(ws2, ctx.omega(c))
                                * tmp_abc;
                        }
                    }
                }
            }
            -1.0 / 6.0 * multiplier * sum
        }
        ContractionKind::Zpva10 | ContractionKind::Zpva01 => {
            unreachable!("ZPVA kinds are evaluated over the whole tensor at once")
        }
    };

    Ok((value, skipped))
}

/// Evaluates a ZPVA term over the whole target tensor at once.
pub fn evaluate_zpva(
    ctx: &ContractionContext<'_>,
    kind: ContractionKind,
    target: DerivativeKey,
    frequency: Frequency,
) -> Result<(Tensor, bool), ShakingError> {
    let (modes, skipped) = ctx.usable_modes();
    let mut tensor = Tensor::zeros(&target.shape(0));
    let components = target.all_components(0);

    match kind {
        ContractionKind::Zpva10 => {
            let nnx = ctx.tensor_at(target.differentiate_by_modes(2), frequency)?;
            for component in &components {
                let mut sum = 0.0;
                for &a in &modes {
                    sum += nnx.get(&index(&[a, a], component))? / ctx.omega(a);
                }
                tensor.set(component, 0.25 * sum)?;
            }
        }
        ContractionKind::Zpva01 => {
            let nx = ctx.tensor_at(target.differentiate_by_modes(1), frequency)?;
            let nnn = ctx.static_tensor(DerivativeKey::modes(3))?;
            for component in &components {
                let mut sum = 0.0;
                for &a in &modes {
                    let mut ccc = 0.0;
                    for &b in &modes {
                        ccc += nnn.get(&[b, b, a])? / ctx.omega(b);
                    }
                    sum += ccc * nx.get(&index(&[a], component))? / ctx.omega(a).powi(2);
                }
                tensor.set(component, -0.25 * sum)?;
            }
        }
        _ => unreachable!("pure-vibrational kinds are evaluated per component"),
    }

    Ok((tensor, skipped))
}
