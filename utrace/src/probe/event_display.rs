// Rates and percentages intentionally lose precision for display purposes
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use std::io::Write;
use std::time::Duration;

use super::EventProcessor;
use crate::pipeline::OutcomeCounts;
use utrace_common::Outcome;

/// `[#####     ]` for a fraction in 0.0..=1.0
#[must_use]
pub fn progress_bar(fraction: f64, width: usize) -> String {
    let filled = ((fraction.clamp(0.0, 1.0) * width as f64).round() as usize).min(width);
    format!("[{}{}]", "#".repeat(filled), " ".repeat(width - filled))
}

/// One status line: coverage, throughput, losses
#[must_use]
pub fn format_status(coverage: f64, events_per_sec: u64, lost: u64) -> String {
    format!(
        "Functions acknowledged: {} {:6.2}%   Events/s: {:>6}   Lost: {}",
        progress_bar(coverage, 20),
        coverage * 100.0,
        events_per_sec,
        lost
    )
}

/// Redraw the status line on stderr
pub fn display_status(coverage: f64, events_per_sec: u64, lost: u64) {
    eprint!("\r{}", format_status(coverage, events_per_sec, lost));
    std::io::stderr().flush().ok();
}

/// Print a newly acknowledged function
pub fn display_acknowledged(name: &str) {
    println!("{name}");
}

/// Final summary on stderr
pub fn display_summary(
    exit_reason: &str,
    elapsed: Duration,
    processor: &EventProcessor<'_>,
    counts: Option<&OutcomeCounts>,
) {
    eprintln!(
        "\n{}: {:.1}s, {} events, {}/{} functions acknowledged ({:.2}%), malformed: {}, unknown: {}",
        exit_reason,
        elapsed.as_secs_f64(),
        processor.event_count,
        processor.acked_count(),
        processor.traced_count(),
        processor.coverage() * 100.0,
        processor.malformed,
        processor.unknown,
    );
    if let Some(counts) = counts {
        if counts.get(Outcome::BufferFull) > 0 {
            eprintln!("lost to full buffer: {}", counts.get(Outcome::BufferFull));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0.0, 4), "[    ]");
        assert_eq!(progress_bar(0.5, 4), "[##  ]");
        assert_eq!(progress_bar(1.0, 4), "[####]");
        assert_eq!(progress_bar(7.0, 4), "[####]");
    }

    #[test]
    fn test_status_line() {
        let line = format_status(0.25, 1200, 3);
        assert!(line.contains(" 25.00%"));
        assert!(line.contains("Events/s:   1200"));
        assert!(line.ends_with("Lost: 3"));
    }
}
