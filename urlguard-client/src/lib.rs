//! # urlguard client
//!
//! Client-side mediation layer for the urlguard URL-analysis service.
//!
//! ## Overview
//!
//! - **Gateway**: one HTTP chokepoint that classifies every outcome into a
//!   [`GatewayError`] (freeze, rejected, offline, malformed)
//! - **Scan widgets**: a generation-token state machine per widget, so only the
//!   latest submission can commit
//! - **Governance**: a shared, coalesced status poller and the privileged
//!   override that lifts a freeze
//! - **Feeds**: independent pollers for live threats, map points and regions
//!
//! Everything talks to the service through [`AnalysisApi`]; [`FixtureApi`]
//! serves deterministic data for demos and tests.

#![allow(missing_docs)]

pub mod api;
pub mod config;
pub mod error;
pub mod feeds;
pub mod fixtures;
pub mod gateway;
pub mod governance;
pub mod poller;
pub mod scan;

pub use api::{AnalysisApi, build_api};
pub use config::{AdminKey, ClientConfig, ConfigError, PollPolicy, PollingConfig};
pub use error::{ErrorKind, GatewayError, GatewayResult, describe};
pub use feeds::ThreatFeeds;
pub use fixtures::FixtureApi;
pub use gateway::HttpGateway;
pub use governance::{GovernanceMonitor, GovernanceSnapshot, OverrideWorkflow};
pub use poller::{PollHandle, PollSnapshot, PolledResource};
pub use scan::{
    Completion, FreezeNotice, Generation, ScanCommandError, ScanController, ScanMachine,
    ScanPhase, ScanState,
};
