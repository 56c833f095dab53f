// ABOUTME: Library crate for webterm exposing the terminal client, bridge server and Docker backend

pub mod cli;
pub mod config;
pub mod docker;
pub mod server;
pub mod terminal;
