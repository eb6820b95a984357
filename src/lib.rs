pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod proto;
pub mod services;

pub use config::Config;
pub use error::{AppError, AppResult};
