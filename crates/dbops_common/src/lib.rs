//! dbops_common - Shared library for the dbops toolkit
//!
//! Core logic for routine Oracle and PostgreSQL administration:
//! configuration snapshot capture and drift comparison, the DBA account
//! ledger, the per-account secret vault, health checks and notification
//! dispatch. All external tools (sqlplus, psql, lsnrctl, sendmail) run
//! through the `exec` layer with explicit per-target environment.

pub mod capture;
pub mod config;
pub mod drift;
pub mod exec;
pub mod health;
pub mod ledger;
pub mod notify;
pub mod paths;
pub mod target;
pub mod vault;
