//! Rental-listing scout: scrapes configured sites through a shared headless
//! browser, dedups everything into SQLite and scores each find against
//! per-job criteria.

pub mod browser;
pub mod config;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod scheduler;
pub mod scoring;
pub mod scrapers;
