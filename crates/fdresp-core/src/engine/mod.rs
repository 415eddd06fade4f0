//! # Engine Module
//!
//! This module hosts the two numerical engines of the library and the
//! configuration they share.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - The differentiation recipe: ladder
//!   geometry, requested properties and orders, frequency list, numeric
//!   thresholds
//! - **Romberg Differentiation** ([`romberg`], [`baker`]) - Finite-difference
//!   stencils on the geometric field ladder, Richardson extrapolation
//!   triangles, and the Baker that turns a results store into derivative
//!   tensors with per-component uncertainties
//! - **Normal-Mode Projection** ([`projection`]) - Rewrites Cartesian
//!   geometric derivative indices into normal-mode indices, excluding the
//!   translation/rotation null space
//! - **Vibrational Contributions** ([`registry`], [`contraction`],
//!   [`shaker`]) - The explicit registry of perturbation-theory terms, the
//!   generic contraction kernel family, and the Shaker that checks
//!   availability and evaluates every computable term
//! - **Progress Monitoring** ([`progress`]) - Callback-based phase/task
//!   reporting
//! - **Error Handling** ([`error`]) - Engine-specific error types

pub mod baker;
pub mod config;
pub mod contraction;
pub mod error;
pub mod progress;
pub mod projection;
pub mod registry;
pub mod romberg;
pub mod shaker;
