//! `gtproxy_server`
//!
//! The proxy application: relay state machine, HTTPS interception, packet
//! injection, and the plugin/command surface.

pub mod inject;
pub mod plugins;
pub mod relay;
pub mod resolve;
pub mod tls;
pub mod trafficlog;
pub mod web;
