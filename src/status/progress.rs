//! Console progress rendering for import runs

use std::time::Duration;

#[cfg(feature = "progress")]
pub use self::bars::ProgressBarSink;

/// Format a number with thousand separators
pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Format a duration as `1h 02m 03s`, `2m 05s` or `4.21s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match secs {
        0..=59 => format!("{:.2}s", duration.as_secs_f64()),
        60..=3599 => format!("{}m {:02}s", secs / 60, secs % 60),
        _ => format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60),
    }
}

#[cfg(feature = "progress")]
mod bars {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

    use super::{format_duration, format_number};
    use crate::models::{ImportStatus, StatusKind};
    use crate::status::{LogLevel, StatusSink};

    /// One progress bar per table, driven by importer events
    pub struct ProgressBarSink {
        multi: MultiProgress,
        bars: Mutex<HashMap<String, ProgressBar>>,
    }

    impl Default for ProgressBarSink {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ProgressBarSink {
        pub fn new() -> Self {
            Self {
                multi: MultiProgress::new(),
                bars: Mutex::new(HashMap::new()),
            }
        }

        fn style() -> ProgressStyle {
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] {prefix:20} {bar:40.cyan/blue} {pos:>3}% {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░  ")
        }

        fn bar(&self, name: &str) -> Option<ProgressBar> {
            let mut bars = self.bars.lock().ok()?;
            let bar = bars.entry(name.to_string()).or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new(100));
                bar.set_style(Self::style());
                bar.set_prefix(name.to_string());
                bar.enable_steady_tick(Duration::from_millis(100));
                bar
            });
            Some(bar.clone())
        }

        fn remove(&self, name: &str) -> Option<ProgressBar> {
            self.bars.lock().ok()?.remove(name)
        }
    }

    impl StatusSink for ProgressBarSink {
        fn on_progress(&self, status: &ImportStatus) {
            if let Some(bar) = self.bar(&status.name) {
                bar.set_position(u64::from(status.progress.min(100)));
                bar.set_message(format!("{} rows", format_number(status.progressed_rows)));
            }
        }

        fn on_operation_completed(&self, status: &ImportStatus) {
            let Some(bar) = self.remove(&status.name) else {
                return;
            };
            let summary = format!(
                "{} rows, source {} / target {}",
                format_number(status.total_rows_inserted),
                format_number(status.source_count),
                format_number(status.target_count)
            );
            match status.status {
                StatusKind::Ok | StatusKind::Initialized => {
                    bar.finish_with_message(format!("✓ {summary}"))
                }
                StatusKind::Warning => bar.finish_with_message(format!("⚠ {summary}")),
                _ => bar.abandon_with_message(format!(
                    "✗ {}",
                    status.error_message.as_deref().unwrap_or("failed")
                )),
            }
        }

        fn on_log_message(&self, level: LogLevel, message: &str, special: bool) {
            match level {
                LogLevel::Warning => {
                    let _ = self.multi.println(format!("  ⚠ Warning: {message}"));
                }
                LogLevel::Error => {
                    let _ = self.multi.println(format!("  ✗ Error: {message}"));
                }
                _ if special => {
                    let _ = self.multi.println(message);
                }
                _ => {}
            }
        }

        fn on_metric(&self, name: &str, duration: Duration) {
            let _ = self
                .multi
                .println(format!("  {name}: {}", format_duration(duration)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(300000), "300,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(4210)), "4.21s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 05s");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h 02m 03s");
    }
}
