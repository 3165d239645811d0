pub mod codec;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod node;
pub mod sanction;
pub mod service;
pub mod settings;
pub mod store;
pub mod sweeper;
pub mod types;
pub mod utils;

pub use codec::TokenCodec;
pub use dispatch::{ActionPayload, ActionRequest, Redirect, SanctionRouter};
pub use error::{SanctionError, ValidationError};
pub use handler::{HandlerRegistry, SanctionHandler};
pub use service::{SanctionRequest, SanctionService};
pub use settings::Settings;
pub use store::Store;
pub use sweeper::{SweepReport, Sweeper};
