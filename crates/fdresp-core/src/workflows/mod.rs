//! # Workflows Module
//!
//! High-level entry points tying the engines together into complete
//! procedures.
//!
//! - **Baking** ([`bake`]) - From a recipe and a populated results store to
//!   a set of derivative tensors: completeness check, Romberg
//!   differentiation, optional normal-mode projection.
//! - **Shaking** ([`shake`]) - From derivative tensors and normal-mode data
//!   to the ordered collection of vibrational contributions: availability
//!   checking, term evaluation, deterministic sorting.

pub mod bake;
pub mod shake;
