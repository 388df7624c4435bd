// HTTP control surface over the façade.

pub mod handler;

pub use handler::ControlServer;
