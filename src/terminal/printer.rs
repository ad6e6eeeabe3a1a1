//! Coloured status output for the interactive client

use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

pub fn format_success(msg: &str) -> String {
    style(msg).green().to_string()
}

pub fn format_warning(msg: &str) -> String {
    style(msg).yellow().to_string()
}

pub fn format_error(msg: &str) -> String {
    style(msg).red().to_string()
}

pub fn format_info(msg: &str) -> String {
    style(msg).cyan().to_string()
}

pub fn success(msg: &str) {
    println!("{}", format_success(msg));
}

pub fn warning(msg: &str) {
    println!("{}", format_warning(msg));
}

pub fn error(msg: &str) {
    eprintln!("{}", format_error(msg));
}

pub fn info(msg: &str) {
    println!("{}", format_info(msg));
}

/// Byte progress bar for one file transfer
pub fn transfer_bar() -> ProgressBar {
    let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
    match ProgressStyle::with_template(
        "{prefix:.bold.dim} [{bar:40.green/white}] {bytes}/{total_bytes} ({bytes_per_sec}, ETA {eta})",
    ) {
        Ok(template) => bar.set_style(template.progress_chars("=> ")),
        Err(e) => tracing::debug!("Progress template rejected: {}", e),
    }
    bar.set_prefix("Transfer");
    bar
}
