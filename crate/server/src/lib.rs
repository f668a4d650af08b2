//! Copyright 2024 Cosmian Tech SAS
//!
//! HTTP façade of the signing proxy: configuration, routes and server start-up.
//! Every worker of the server owns its own [`sign_proxy_broker::WorkerContext`].

pub mod config;
pub mod error;
pub mod result;
pub mod routes;
pub mod start_sign_proxy_server;

#[cfg(test)]
mod tests;
