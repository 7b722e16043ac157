//! CLI command implementations

pub mod auth;
pub mod common;
pub mod completion;
pub mod labs;
pub mod newvm;
pub mod newvmtemplate;
pub mod vms;
pub mod vmtemplate;
