//! Client-side updating: the registry and installer boundaries plus the
//! orchestrator that drives one update attempt with fallback to full
//! packages.

pub mod installer;
pub mod manager;
pub mod registry;

pub use installer::{DirectoryInstaller, InstallError, Installer, app_directory};
pub use manager::{UpdateError, UpdateManager, UpdateOutcome};
pub use registry::{DirectoryRegistry, PackageMetadata, PackageRegistry, RegistryError};
