// THEORY:
// This file is the main entry point for the `color_sorter` library crate.
//
// The decision logic lives in `core_modules` as plain synchronous types, and
// `pipeline` ties them together into the `SortingPipeline`, the single owner of
// all mutable sorter state. Everything that touches the outside world sits at
// the edges: `capture` produces frames, `serial_link` carries servo commands,
// `settings` persists the learned background and `controller` runs the
// pipeline as an actor that the other pieces talk to over channels.

pub mod capture;
pub mod config;
pub mod controller;
pub mod core_modules;
pub mod error;
pub mod pipeline;
pub mod serial_link;
pub mod settings;
