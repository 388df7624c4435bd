// Public async API - the façade callers drive, and logging setup.

pub mod facade;
pub mod logging;

pub use facade::ArcsimFacade;
