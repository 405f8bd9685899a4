//! # proact-core — types and trait boundaries for proact
//!
//! This crate defines the vocabulary shared by every proact component:
//! operation records, the completion port contract, the service lifecycle
//! traits, and the error taxonomy. Each trait models one capability
//! dimension; default implementations live in `proact-module`, and the
//! runtime that drives them lives in `proact-runtime`.
//!
//! ## Design principle
//!
//! > "Program to the interface. Start safe. Optimize with a new impl,
//! >  not by modifying the existing one."
//!
//! The runtime depends on the traits here, never on concrete port types.
//! Swapping a completion backend is a constructor argument, not a rewrite.

pub mod env;
pub mod error;
pub mod port;
pub mod record;
pub mod rlog;
pub mod service;
