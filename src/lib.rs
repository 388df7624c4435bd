pub mod api;
pub mod config;
pub mod convert;
pub mod engine;
pub mod error;
pub mod kernel;
pub mod server;

pub use api::ArcsimFacade;
pub use error::{ErrorKind, FacadeError, FacadeResult};
