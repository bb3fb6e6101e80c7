//! Order draft, tool dispatch, and finalization flow.

pub mod dispatch;
pub mod draft;
pub mod finalize;

pub use dispatch::*;
pub use draft::*;
pub use finalize::*;
