pub mod app;
pub mod config;
pub mod credential;
pub mod directory;
pub mod error;
pub mod event;
pub mod handler;
pub mod microphone;
pub mod phone;
pub mod ringplan;
pub mod session;
pub mod signaling;
pub mod version;

pub use error::{CallError, CallResult};
pub use session::{Session, SessionBuilder};
