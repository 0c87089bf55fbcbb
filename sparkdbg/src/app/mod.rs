// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod debug;
pub mod deploy;
pub mod errors;
pub mod ports;
pub mod submit;
pub mod types;
