//! Core building blocks: the error taxonomy and balancer configuration.

pub mod config;
pub mod error;
