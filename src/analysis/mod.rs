//! Analyses over a schedule state.
//!
//! - Producer/consumer relations between blocks of a scope
//! - Affine index classification and inversion
//! - Consistency verification (debug mode)

pub mod dependence;
pub mod affine;
pub mod verify;

pub use dependence::BlockScope;
pub use affine::{AffineExpr, BijectiveMap};
pub use verify::verify;
