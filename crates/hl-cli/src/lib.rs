//! hopline: command-line front end for hl-remote
//!
//! Connects to a target named on the command line (or a `[hosts.<alias>]`
//! profile), then runs a command, copies a file, holds a tunnel open, or
//! reports what the session can do.

pub mod commands;
pub mod output;
