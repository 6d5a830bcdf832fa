//! ExecBox
//!
//! A policy-gated gateway for running PowerShell commands on behalf of an
//! untrusted client. Every command is checked against a [`policy::SecurityPolicy`]
//! before the [`tools::BoundedExecutor`] launches a hardened interpreter with a
//! hard time limit. The [`mcp`] module exposes both over MCP on stdio.

pub mod config;
pub mod logging;
pub mod mcp;
pub mod policy;
pub mod tools;
