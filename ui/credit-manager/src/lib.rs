//! IT-services credit manager: feature widgets and the bootstrap that wires
//! them onto the headless widget framework.

pub mod app;
pub mod config;
pub mod demo;
pub mod widgets;

pub use app::{APP_TITLE, CreditManagementApp, FATAL_ERROR_ID};
pub use config::AppConfig;
pub use demo::demo_api;
