//! Flat entity rows shared by the Store, the Engine and the API surface.

mod types;

pub use types::*;
