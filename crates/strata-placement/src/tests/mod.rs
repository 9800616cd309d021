//! Tests for the strata-placement crate.

mod helpers;
