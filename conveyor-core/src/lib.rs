//! Conveyor Core
//!
//! Core types for the Conveyor build-and-deploy orchestration engine.
//!
//! This crate contains:
//! - Domain types: Core business entities (BuildRequest, PipelineRun, etc.)
//! - DTOs: Wire shapes for inbound webhooks and outbound status reporting
//!
//! Execution logic lives in `conveyor-engine`, the HTTP boundary in
//! `conveyor-server`.

pub mod domain;
pub mod dto;
