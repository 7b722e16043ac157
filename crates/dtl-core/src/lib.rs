//! Core types and configuration for dtl

pub mod config;
pub mod resource_id;
