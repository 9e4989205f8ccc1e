//! # Pattern Module
//!
//! Compiles route path templates such as `/users/{id}` into typed segments the
//! radix tree can index.
//!
//! ## Syntax
//!
//! | Template         | Matches                                                |
//! |------------------|--------------------------------------------------------|
//! | `users`          | the literal segment `users` (case-sensitive)           |
//! | `{id}`           | any single segment, bound as `id`                      |
//! | `{id:[0-9]+}`    | a single segment whose decoded value matches the regex |
//! | `*`              | the rest of the path (possibly empty), bound as `*`    |
//! | `{path}*`        | the rest of the path, bound as `path`                  |
//!
//! A glob is only allowed as the final segment, and a parameter name may only
//! appear once per pattern. Templates are normalized before compilation: a
//! leading `/` is added, duplicate slashes are collapsed and a trailing slash is
//! dropped (except for the root pattern `/`).
//!
//! ## Specificity
//!
//! Every compiled [`Pattern`] carries a [`Specificity`] score. The tree already
//! prefers literal children over parameters and parameters over globs while it
//! walks; the score orders routes that end on the same node, for example a
//! regex-constrained `{id:[0-9]+}` ahead of a plain `{id}`.
//!
//! ```
//! use routecore::pattern::{Pattern, Segment};
//!
//! let pattern = Pattern::compile("/files/{bucket}/{path}*").unwrap();
//! assert_eq!(pattern.as_str(), "/files/{bucket}/{path}*");
//! assert!(matches!(pattern.segments()[2], Segment::Glob(_)));
//! ```

mod core;

pub use core::{Constraint, Pattern, Segment, Specificity};
