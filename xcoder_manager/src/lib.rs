//! xcoder manager library
//!
//! Commands behind the `xcoder-rsrc` binary: inspecting and tearing down the
//! shared device registry without talking to the cards.

pub mod cli_output;
pub mod commands;
