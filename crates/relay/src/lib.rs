//! Distributed job orchestrator for text-to-image and image-to-video
//! generation fleets.
//!
//! This crate wires together the library crates (`relay_protocol`,
//! `relay_dispatch`, `relay_bridge`, `relay_db`, `relay_security`,
//! `relay_logging`) into a running service: [`app::Core`] is the
//! composition root, `http` is the client-facing surface built on top of
//! it.

pub mod app;
pub mod http;
