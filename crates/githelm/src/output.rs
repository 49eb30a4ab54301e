//! Output helpers: color detection, staleness hints, line rendering.

use std::io::{self, IsTerminal, Write};
use std::time::Duration;

use owo_colors::OwoColorize;

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color ────────────────────────────────────────────────────────────

pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// Applies the palette when color is on, passes text through otherwise.
#[derive(Debug, Clone, Copy)]
pub struct Painter {
    color: bool,
}

impl Painter {
    pub fn new(mode: ColorMode) -> Self {
        Self {
            color: should_color(mode),
        }
    }

    pub fn heading(self, text: &str) -> String {
        if self.color {
            text.bold().cyan().to_string()
        } else {
            text.to_owned()
        }
    }

    pub fn dim(self, text: &str) -> String {
        if self.color {
            text.dimmed().to_string()
        } else {
            text.to_owned()
        }
    }

    pub fn good(self, text: &str) -> String {
        if self.color {
            text.green().to_string()
        } else {
            text.to_owned()
        }
    }

    pub fn bad(self, text: &str) -> String {
        if self.color {
            text.red().to_string()
        } else {
            text.to_owned()
        }
    }
}

// ── Staleness ────────────────────────────────────────────────────────

/// `"updated 3m 12s ago"`, or `"never updated"` for a zero timestamp.
pub fn staleness_hint(last_updated: i64, now: i64) -> String {
    if last_updated <= 0 {
        return "never updated".into();
    }
    let age_secs = u64::try_from(now.saturating_sub(last_updated) / 1000).unwrap_or(0);
    if age_secs == 0 {
        return "updated just now".into();
    }
    format!(
        "updated {} ago",
        humantime::format_duration(Duration::from_secs(age_secs))
    )
}

// ── Printing ─────────────────────────────────────────────────────────

pub fn print_line(line: &str) {
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{line}");
}

/// Render `value` as compact JSON (json) or with `text` (text) and print it.
pub fn emit<T: serde::Serialize + ?Sized>(
    format: OutputFormat,
    value: &T,
    text: impl FnOnce(&T) -> String,
) -> Result<(), CliError> {
    let rendered = match format {
        OutputFormat::Text => text(value),
        OutputFormat::Json => serde_json::to_string(value)?,
    };
    print_line(&rendered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staleness_hint_formats() {
        assert_eq!(staleness_hint(0, 5_000), "never updated");
        assert_eq!(staleness_hint(5_000, 5_400), "updated just now");
        assert_eq!(staleness_hint(1_000, 193_000), "updated 3m 12s ago");
    }

    #[test]
    fn painter_without_color_is_identity() {
        let painter = Painter::new(ColorMode::Never);
        assert_eq!(painter.heading("octo/hello"), "octo/hello");
        assert_eq!(painter.bad("failure"), "failure");
    }
}
