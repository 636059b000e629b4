// ABOUTME: Library crate for connbroker exposing the broker, client and CLI wiring

#![allow(missing_docs)]

pub mod broker;
pub mod cli;
pub mod logging;
