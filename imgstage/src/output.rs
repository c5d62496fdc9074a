//! Output helpers for consistent CLI output.
//!
//! Status lines go to stdout, errors to stderr. Library code logs through
//! `tracing` instead; only the binary prints with these.

use owo_colors::OwoColorize;

pub struct Output;

impl Output {
    /// Example: `✓ Wrote app.aci`
    pub fn success(msg: impl AsRef<str>) {
        println!("{} {}", "✓".green().bold(), msg.as_ref());
    }

    /// Example: `✗ stage 'copy assets' failed`
    pub fn error(msg: impl AsRef<str>) {
        eprintln!("{} {}", "✗".red().bold(), msg.as_ref().red());
    }

    /// Example: `→ Building example.com/app with go`
    pub fn info(msg: impl AsRef<str>) {
        println!("{} {}", "→".cyan(), msg.as_ref().dimmed());
    }

    /// Print a key-value pair with alignment.
    ///
    /// Example: `  sha256:        9f86d0...`
    pub fn kv(key: impl AsRef<str>, value: impl AsRef<str>) {
        println!(
            "  {:<14} {}",
            format!("{}:", key.as_ref()).cyan(),
            value.as_ref()
        );
    }

    /// Print a hint/suggestion message to stderr, next to an error.
    ///
    /// Example: `  → Run: imgstage go --help`
    pub fn hint(msg: impl AsRef<str>) {
        eprintln!("  {} {}", "→".cyan(), msg.as_ref());
    }
}
