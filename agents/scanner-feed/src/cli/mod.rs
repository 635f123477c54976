//! CLI support for the scanner-feed binary.

pub mod config;
