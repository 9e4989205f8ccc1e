//! # Router Module
//!
//! Path matching and route resolution.
//!
//! ## Overview
//!
//! The router is responsible for:
//! - Compiling route patterns and inserting them into a segment trie
//! - Freezing the table once bootstrap is done
//! - Matching incoming requests to exactly one route, or reporting why none
//!   applies (`NotFound`, `MethodNotAllowed`)
//! - Extracting path parameters from matched routes
//!
//! ## Architecture
//!
//! The router uses a two-phase approach:
//!
//! 1. **Build**: [`Router::register`] compiles each pattern, composes its
//!    decorators and inserts it into the trie. [`Router::seal`] ends the phase.
//!
//! 2. **Match**: [`Router::match_route`] walks the trie one decoded path
//!    segment at a time, preferring literal children over parameters and
//!    parameters over globs, and returns a [`MatchResult`].
//!
//! A sealed router is never mutated again, so any number of threads can match
//! against an `Arc<Router>` without locking.

mod core;
mod radix;

pub use core::{MatchResult, MatchStatus, RouteMatch, Router, ParamVec, MAX_INLINE_PARAMS};
