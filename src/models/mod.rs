//! Model capability: parameter storage, line shapes, offsets and linked fits.
//!
//! Shapes are implemented as small, pure functions of `(x, params)` so that the
//! routines and the fit orchestration can stay generic.

pub mod linked;
pub mod model;
pub mod offset;
pub mod params;
pub mod shapes;

pub use linked::*;
pub use model::*;
pub use offset::*;
pub use params::*;
pub use shapes::*;
