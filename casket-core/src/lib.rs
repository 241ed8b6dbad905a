// casket-core/src/lib.rs
pub mod artifacts;
pub mod batch;
pub mod check;
pub mod context;
pub mod fetch;
pub mod installer;
pub mod stage;
pub mod upgrade;

pub use batch::BatchReport;
pub use context::{RunContext, TransactionState};
pub use fetch::{BatchFetchReport, FetchCoordinator};
pub use installer::{
    CaskInstaller, CommandFormulaInstaller, FormulaInstaller, InstallOptions, InstallStatus,
    UninstallOptions,
};
pub use stage::{NoQuarantine, QuarantineService, XattrQuarantine};
pub use upgrade::OutdatedCask;
