// src/db/models/mod.rs

//! Row mappings for the Sideloader tables
//!
//! Each model reads and writes its own table; the domain types are
//! defined in `config` and only gain persistence methods here.

mod app;
mod config;
mod preference;

pub use preference::Preference;
