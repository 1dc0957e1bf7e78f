//! Shared data model and wire protocol types for the scanning transfer cavity
//! lock system.
//!
//! Used by:
//! - `stcl-node`: the per-cavity acquisition/generation daemon
//! - `stcl-monitor`: cavity and error subscriber processes
//! - `host`: the controller that owns node topology and settings

pub mod constants;
pub mod convert;
pub mod model;
pub mod validate;
pub mod wire;

pub use constants::*;
pub use convert::{duration_ms, index2ms, ms2index};
pub use model::*;
pub use validate::ValidationError;
pub use wire::{ByteOrder, FrameError, Header, Request, Response};
