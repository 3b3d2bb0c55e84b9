pub mod device;
pub mod error;
pub mod format;
pub mod lock;
pub mod models;
pub mod orchestrator;
pub mod preflight;
pub mod prompt;
pub mod remote;

pub use device::{DeviceResolver, Platform};
pub use error::{ErrorKind, WorkflowError};
pub use format::{FormatGateway, FsType};
pub use lock::RunLock;
pub use models::{DeviceHandle, PreflightResult, RunOutcome, RunState, TransferOutcome};
pub use orchestrator::{Gateways, Orchestrator};
pub use prompt::{Prompter, StdinPrompter};
pub use remote::{CopyOptions, CopySummary, RemoteGateway, VerifyOptions};
