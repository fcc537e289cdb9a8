//! Terminal output of the `get` and `set` commands.
//!
//! The daemon logs through `tracing`; this module is only used for the short
//! answers printed to someone running the client commands by hand.

use colored::*;

/// Prints client results with consistent styling.
///
/// - Success messages (green with ✓)
/// - Error messages (red with ✗, on stderr)
/// - Info messages (cyan)
/// - Configuration values (`Key: value`)
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use episode_organizer::output::OutputFormatter;
    /// OutputFormatter::success("Key 'WatchDirectory' was set to '/downloads'");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark to stderr.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints an info message in cyan. Only shown in verbose mode.
    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    /// Prints a configuration value as `key: value`.
    ///
    /// # Arguments
    ///
    /// * `key` - The configuration key
    /// * `value` - Its current value
    pub fn key_value(key: &str, value: &str) {
        println!("{}: {}", key.bold(), value);
    }

    /// Builds the message shown after a successful `set`.
    pub fn set_message(key: &str, value: &str) -> String {
        format!("Key '{}' was set to '{}'", key, value)
    }
}
