// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! sublum-policy
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bundle;
mod engine;
mod error;
mod schema;
mod selector;
mod state;

pub use bundle::{EffectSpec, HintSpec, Mode, PolicyBundle, PolicyBundleInfo, Rule};
pub use engine::{DecisionContext, PolicyEngine};
pub use error::PolicyError;
pub use selector::{ArgsPredicate, Selector};
