//! Enrollment Wizard - time-boxed enrollment and password reset flows
//! against a VPN proxy API.
//!
//! The library holds the wizard session core and the flows driving it; the
//! `enrollment-wizard` binary is a thin CLI over these modules.

pub mod api;
pub mod config;
pub mod flows;
pub mod logging;
pub mod session;
pub mod storage;
