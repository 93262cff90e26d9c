//! In-memory collaborators for tests and local simulations.

mod directory;
pub use directory::Directory;
mod notary;
pub use notary::Notary;
