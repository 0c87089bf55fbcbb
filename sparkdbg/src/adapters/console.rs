// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::io::{self, IsTerminal, Write};
use std::sync::Mutex;

use crossterm::execute;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

use crate::app::ports::ConsolePort;
use crate::app::types::LogSeverity;

const LABEL_COLOR: Color = Color::DarkGrey;

/// Prefixed, coloured job output on stdout.
pub struct TerminalConsole {
    colored: bool,
    // Keeps lines from concurrent lanes whole.
    out: Mutex<io::Stdout>,
}

impl Default for TerminalConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalConsole {
    pub fn new() -> Self {
        let out = io::stdout();
        Self {
            colored: out.is_terminal(),
            out: Mutex::new(out),
        }
    }
}

fn severity_color(severity: LogSeverity) -> Option<Color> {
    match severity {
        LogSeverity::Error => Some(Color::Red),
        LogSeverity::Warning => Some(Color::Yellow),
        LogSeverity::Info => Some(Color::Cyan),
        LogSeverity::Log => None,
    }
}

fn plain_line(label: &str, text: &str) -> String {
    format!("[{label}] {text}")
}

impl ConsolePort for TerminalConsole {
    fn print(&self, label: &str, severity: LogSeverity, text: &str) {
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let result = if self.colored {
            let color = severity_color(severity).unwrap_or(Color::Reset);
            execute!(
                out,
                SetForegroundColor(LABEL_COLOR),
                Print(format!("[{label}] ")),
                SetForegroundColor(color),
                Print(text),
                ResetColor,
                Print("\n")
            )
        } else {
            writeln!(out, "{}", plain_line(label, text))
        };
        if let Err(err) = result {
            tracing::debug!(error = %err, "failed to write console line");
        }
    }
}
