// casket-common/src/model/mod.rs
pub mod cask;
pub mod formula;
pub mod package;
pub mod tab;

pub use cask::Cask;
pub use formula::Formula;
pub use package::{Package, PackageId, PackageKind};
pub use tab::CaskTab;
