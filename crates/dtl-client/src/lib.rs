//! Azure DevTest Labs client, authentication, and deployment polling for dtl

pub mod auth;
pub mod deployment;
pub mod error;
pub mod http;
pub mod lab;
pub mod poll;
