//! Library crate for race-control-back: race progression, finalization and
//! scoring over a shared observable store, exposed to binaries and integration tests.

pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;
