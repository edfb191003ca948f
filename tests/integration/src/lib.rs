//! LikedSongs Integration Tests
//!
//! These tests run against a live store endpoint (set LIKEDSONGS_ENDPOINT, e.g.
//! `http://localhost:4566` for LocalStack). Without it every test is skipped.
//!
//! Run with: cargo test --package likedsongs-integration-tests

pub mod fixtures;

pub use fixtures::*;
