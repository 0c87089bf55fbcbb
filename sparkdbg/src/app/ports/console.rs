// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::types::LogSeverity;

/// Append-only line sink for presentation.
pub trait ConsolePort: Send + Sync {
    fn print(&self, label: &str, severity: LogSeverity, text: &str);
}
