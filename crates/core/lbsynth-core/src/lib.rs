//! Load balancer synthesis core
//!
//! Shared types and traits for the synthesis engine and its cloud bindings.
//! Nothing in this crate performs I/O.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{CloudError, Result, ResultExt, SynthError};
pub use traits::{BindingApi, LoadBalancingApi};
pub use types::*;
