//! Test Helper Utilities
//!
//! Shared utilities for testing saem-notify

#![allow(dead_code)]

pub mod repos;
pub mod stub_client;

pub use repos::{
    build_engine, build_engine_with_clock, counting_repos, musician, rehearsal_on, seed_musician,
    CountingEvents, CountingRehearsals,
};
pub use stub_client::{SentMessage, StubClient};
