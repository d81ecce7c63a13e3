//! The web module exposing peripheral state over HTTP.
//! This file declares the other files in this directory as sub-modules.

pub mod api;
pub mod models;
