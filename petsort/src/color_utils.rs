//! Log styling that respects NO_COLOR and terminal capabilities.
//!
//! Colors are disabled by any of:
//! - `--no-color` CLI flag
//! - `NO_COLOR` environment variable (https://no-color.org/)
//! - `PETSORT_NO_COLOR` environment variable
//! - `TERM=dumb`
//! - stderr not being a TTY (server logs piped to a file or journald)

use colored::ColoredString;
use std::io::{stderr, IsTerminal};
use std::sync::OnceLock;

static COLOR_CONFIG: OnceLock<ColorConfig> = OnceLock::new();

fn should_disable_colors_from_env() -> bool {
    !std::env::var("NO_COLOR").unwrap_or_default().is_empty()
        || !std::env::var("PETSORT_NO_COLOR")
            .unwrap_or_default()
            .is_empty()
        || std::env::var("TERM").unwrap_or_default() == "dumb"
        || !stderr().is_terminal()
}

#[derive(Debug, Clone)]
struct ColorConfig {
    colors_enabled: bool,
}

impl ColorConfig {
    fn new(no_color_flag: bool) -> Self {
        let colors_enabled = !no_color_flag && !should_disable_colors_from_env();
        Self { colors_enabled }
    }

    fn is_enabled(&self) -> bool {
        self.colors_enabled
    }
}

/// Initialize the color configuration once, after CLI parsing.
pub fn init_color_config(no_color_flag: bool) {
    let config = ColorConfig::new(no_color_flag);
    if COLOR_CONFIG.set(config).is_err() {
        log::debug!("Color configuration already initialized");
    }
}

pub(crate) fn colors_enabled() -> bool {
    COLOR_CONFIG
        .get()
        .map(|config| config.is_enabled())
        .unwrap_or_else(|| !should_disable_colors_from_env())
}

/// Apply color to a string only if colors are enabled for stderr output
pub fn maybe_color_stderr<F>(text: &str, color_fn: F) -> String
where
    F: FnOnce(&str) -> ColoredString,
{
    if colors_enabled() {
        color_fn(text).to_string()
    } else {
        text.to_string()
    }
}

pub mod colors {
    use super::maybe_color_stderr;
    use colored::Colorize;

    pub fn error_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.red().bold())
    }

    pub fn warning_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.yellow())
    }

    pub fn info_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.green())
    }

    pub fn debug_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.blue())
    }

    pub fn trace_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.magenta())
    }
}

/// Prefix symbols for log lines. Plain-text fallbacks are used when colors are off.
pub mod symbols {
    use super::colors_enabled;

    pub fn model_loaded() -> &'static str {
        if colors_enabled() {
            "✅ "
        } else {
            "[LOADED] "
        }
    }

    pub fn detection_start() -> &'static str {
        if colors_enabled() {
            "🔍 "
        } else {
            ""
        }
    }

    /// A component is running in a reduced mode (e.g. brand model missing)
    pub fn degraded() -> &'static str {
        if colors_enabled() {
            "⚠️  "
        } else {
            "[DEGRADED] "
        }
    }

    pub fn operation_failed() -> &'static str {
        if colors_enabled() {
            "❌ "
        } else {
            "[FAILED] "
        }
    }

    pub fn system_setup() -> &'static str {
        if colors_enabled() {
            "⚙️  "
        } else {
            ""
        }
    }

    pub fn resources_found() -> &'static str {
        if colors_enabled() {
            "🎯 "
        } else {
            ""
        }
    }

    pub fn completed_successfully() -> &'static str {
        if colors_enabled() {
            "✅ "
        } else {
            "[SUCCESS] "
        }
    }

    pub fn warning() -> &'static str {
        if colors_enabled() {
            "⚠️  "
        } else {
            ""
        }
    }

    pub fn server_listening() -> &'static str {
        if colors_enabled() {
            "🌐 "
        } else {
            ""
        }
    }
}

/// Progress bars for the offline `predict` command
pub mod progress {
    use super::colors_enabled;
    use crate::progress::add_progress_bar;
    use indicatif::{ProgressBar, ProgressStyle};
    use std::io::{stderr, IsTerminal};

    /// Only shown for more than one image on an interactive stderr
    pub fn create_batch_progress_bar(total: usize) -> Option<ProgressBar> {
        if total <= 1 || !stderr().is_terminal() {
            return None;
        }

        let pb = ProgressBar::new(total as u64);
        add_progress_bar(pb.clone());
        let template = if colors_enabled() {
            "[{elapsed_precise}] [{bar:30.green/black}] {pos}/{len} {msg}"
        } else {
            "[{elapsed_precise}] [{bar:30}] {pos}/{len} {msg}"
        };
        let style = ProgressStyle::default_bar()
            .template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars(if colors_enabled() { "█▓▒░" } else { "#> " });
        pb.set_style(style);
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Some(pb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_config_respects_no_color_flag() {
        let config = ColorConfig::new(true);
        assert!(!config.is_enabled());
    }

    #[test]
    fn test_color_config_respects_petsort_no_color() {
        std::env::set_var("PETSORT_NO_COLOR", "1");
        let config = ColorConfig::new(false);
        assert!(!config.is_enabled());
        std::env::remove_var("PETSORT_NO_COLOR");
    }

    #[test]
    fn test_maybe_color_with_colors_disabled() {
        use colored::Colorize;

        COLOR_CONFIG
            .set(ColorConfig {
                colors_enabled: false,
            })
            .ok();

        assert_eq!(maybe_color_stderr("bottle", |s| s.red()), "bottle");
        assert_eq!(symbols::degraded(), "[DEGRADED] ");
    }
}
