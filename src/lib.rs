//! Civic issue reporting: citizens report problems, the server tags each
//! report with a keyword-derived [`severity::Severity`], and administrators
//! track issues to resolution.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod models;
pub mod severity;
pub mod uploads;
