// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

#![allow(clippy::all)]

//! Unit-level coverage for this crate lives inline as `#[cfg(test)]`
//! modules next to the code they exercise (see `src/**`). This binary
//! target exists only so `cargo test --test unit` matches the
//! convention of running unit tests as their own target; black-box,
//! multi-module scenarios live under `tests/integration_tests` instead.
