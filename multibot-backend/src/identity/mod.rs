pub mod registry;
pub mod source;

pub use registry::{IdentityRegistry, StatusPatch};
pub use source::{IdentitySource, RonIdentityFile, StaticIdentities};
