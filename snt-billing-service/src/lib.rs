//! SNT Billing Service - statement import, plot matching and balances for a
//! garden partnership.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;

pub use startup::AppState;
