//! Common test utilities and fixtures
//!
//! `lines` builds stream-json lines the way the CLI prints them; `fixtures`
//! wires a model to a recorded runtime.

#![allow(dead_code)]

pub mod fixtures;
pub mod lines;
