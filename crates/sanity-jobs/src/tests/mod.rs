//! Tests for the sanity-jobs crate.

mod helpers;
