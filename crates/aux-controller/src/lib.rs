//! Building blocks of the istio-aux controller process

pub mod api;
pub mod config;
