//! Ganglion Builtins - the element types a model is assembled from
//!
//! [`manifest`] builds the closed registry every [`ganglion_core::Context`]
//! starts from. Each type lives in its own module exposing `CLASS` and a
//! `descriptor()`.

pub mod counter;
pub mod expr;
pub mod function;
pub mod intfire;
pub mod pool;
pub mod pulse;
pub mod synapse;
pub mod table;

pub use expr::{Expr, Func};
pub use pulse::Pulse;

use ganglion_core::{Registry, Result, TypeDescriptor};

/// Descriptors of every builtin type, in manifest order
pub fn descriptors() -> Vec<TypeDescriptor> {
    vec![
        counter::descriptor(),
        pulse::descriptor(),
        function::descriptor(),
        table::descriptor(),
        pool::descriptor(),
        intfire::descriptor(),
        synapse::descriptor(),
    ]
}

/// The startup registry: `Neutral` plus every builtin type
pub fn manifest() -> Result<Registry> {
    descriptors()
        .into_iter()
        .try_fold(Registry::builder(), |builder, desc| builder.register(desc))
        .map(|builder| builder.build())
}
