//! Piece definition loading.

pub mod loader;

pub use loader::{PieceLoader, BUILTIN_DEFAULT_PIECE};
