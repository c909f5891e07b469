#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

pub mod cli;
pub mod config;
pub mod daemon;
pub mod dialogue;
pub mod gateway;
pub mod health;
pub mod keepalive;
pub mod quiz;
pub mod session;
pub mod telegram;
pub mod transport;

pub use config::Config;
pub use health::Metrics;
pub use session::SessionStore;
pub use transport::ReliableClient;
