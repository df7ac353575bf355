//! Name and descriptor remapping: the remapper chain and the refmap.

mod chain;
mod refmap;

pub use chain::{Remapper, RemapperChain};
pub use refmap::RefMap;
