//! Report rendering and streaming output helpers.
//!
//! In non-verbose mode everything funnels through the job buffers and is
//! printed once, in declared job order, when the run finishes. Verbose mode
//! additionally streams lines as they happen. Colour is optional and purely
//! cosmetic; rendered content is identical either way.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use probe_util::format_secs;

use crate::buffer::{JobStatus, StepEntry, StepStatus, WorkflowBuffer};

mod ansi {
    pub const RESET: &str = "\x1b[0m";
    pub const GREEN: &str = "\x1b[32m";
    pub const RED: &str = "\x1b[31m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const DIM: &str = "\x1b[2m";
}

/// Determine if colour output should be enabled.
///
/// `NO_COLOR=1` disables, `COLOR=1` forces, otherwise follow the terminal.
pub fn should_colorize() -> bool {
    if std::env::var("NO_COLOR").is_ok_and(|v| v == "1") {
        return false;
    }
    if std::env::var("COLOR").is_ok_and(|v| v == "1") {
        return true;
    }
    std::io::stdout().is_terminal()
}

/// Streaming helpers plus the final report renderer.
#[derive(Debug)]
pub struct Printer {
    verbose: bool,
    color: bool,
    buffer: Arc<WorkflowBuffer>,
}

impl Printer {
    pub fn new(buffer: Arc<WorkflowBuffer>, verbose: bool, color: bool) -> Self {
        Self { verbose, color, buffer }
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Update a job's display name once its template has been expanded.
    pub fn set_job_name(&self, job_id: &str, name: &str) {
        self.buffer.set_name(job_id, name);
    }

    pub fn mark_job_started(&self, job_id: &str) {
        self.buffer.mark_started(job_id);
    }

    pub fn finalize_job(&self, job_id: &str, status: JobStatus, success: bool) {
        self.buffer.finalize(job_id, status, success);
    }

    /// Buffer a line for the job; echo it immediately in verbose mode.
    pub fn write(&self, job_id: &str, line: &str) {
        self.buffer.push_line(job_id, line);
        if self.verbose {
            println!("[{job_id}] {line}");
        }
    }

    /// Record a step result; stream a one-liner in verbose mode.
    pub fn write_step(&self, job_id: &str, entry: StepEntry) {
        if self.verbose {
            println!("[{job_id}] {}", self.step_line(&entry));
        }
        self.buffer.push_step(job_id, entry);
    }

    pub fn log_debug(&self, message: &str) {
        if self.verbose {
            println!("{}", self.paint(ansi::DIM, message));
        }
    }

    pub fn print_error(&self, message: &str) {
        eprintln!("{}", self.paint(ansi::RED, message));
    }

    pub fn print_separator(&self) {
        println!("{}", self.paint(ansi::DIM, &"─".repeat(60)));
    }

    /// Render the final report from the buffers, in declared job order.
    pub fn render_report(&self, total: Duration) -> String {
        let mut out = String::new();

        let failed_jobs = self.buffer.read(|jobs| {
            let mut failed = 0usize;
            for job in jobs.values() {
                let status_text = match job.status {
                    JobStatus::Completed => "Completed",
                    JobStatus::Failed => "Failed",
                    JobStatus::Skipped => "Skipped",
                    JobStatus::Running => "Running",
                };
                if matches!(job.status, JobStatus::Failed) || (matches!(job.status, JobStatus::Skipped) && !job.success) {
                    failed += 1;
                }
                let header = format!(
                    "⏺ {} ({} in {})",
                    job.name,
                    status_text,
                    format_secs(job.elapsed().as_secs_f64())
                );
                let painted = match job.status {
                    JobStatus::Completed if job.success => self.paint(ansi::GREEN, &header),
                    JobStatus::Skipped if job.success => self.paint(ansi::YELLOW, &header),
                    JobStatus::Running => header,
                    _ => self.paint(ansi::RED, &header),
                };
                out.push_str(&painted);
                out.push('\n');

                for step in &job.steps {
                    out.push_str(&self.step_block(step));
                }

                for line in job.output.lines() {
                    out.push_str("  ⎿ ");
                    out.push_str(line);
                    out.push('\n');
                }
            }
            failed
        });

        out.push('\n');
        out.push_str(&format!("Total workflow time: {}\n", format_secs(total.as_secs_f64())));
        if failed_jobs == 0 {
            out.push_str(&self.paint(ansi::GREEN, "All jobs succeeded"));
        } else {
            out.push_str(&self.paint(ansi::RED, &format!("{failed_jobs} job(s) failed")));
        }
        out.push('\n');
        out
    }

    /// Render and print the report.
    pub fn print_report(&self, total: Duration) {
        print!("{}", self.render_report(total));
    }

    fn step_block(&self, step: &StepEntry) -> String {
        let mut block = String::new();
        let line = self.step_line(step);
        match step.status {
            StepStatus::Error => {
                // Failing steps get the record glyph and failure colour; the
                // test expression and its output sit indented below.
                block.push_str("  ");
                block.push_str(&self.paint(ansi::RED, &format!("⏺ {line}")));
                block.push('\n');
                if let Some(test_output) = &step.test_output {
                    for detail in test_output.lines() {
                        block.push_str("       ");
                        block.push_str(detail);
                        block.push('\n');
                    }
                }
            }
            StepStatus::Warning => {
                block.push_str("  ⎿ ");
                block.push_str(&self.paint(ansi::YELLOW, &line));
                block.push('\n');
            }
            StepStatus::Success => {
                block.push_str("  ⎿ ");
                block.push_str(&line);
                block.push('\n');
            }
        }
        if let Some(echo) = &step.echo {
            for echo_line in echo.lines() {
                block.push_str("       ");
                block.push_str(echo_line);
                block.push('\n');
            }
        }
        block
    }

    fn step_line(&self, step: &StepEntry) -> String {
        if let Some(snapshot) = &step.repeat {
            let line = if snapshot.has_test {
                let percent = if snapshot.total == 0 {
                    100.0
                } else {
                    (snapshot.success_count as f64) * 100.0 / (snapshot.total as f64)
                };
                format!(
                    "{}: {}/{} success ({percent:.1}%)",
                    step.name, snapshot.success_count, snapshot.total
                )
            } else {
                format!("{}: {}/{} completed (no test)", step.name, snapshot.total, snapshot.total)
            };
            return line;
        }
        if step.rt.is_empty() {
            format!("{}. {}", step.index, step.name)
        } else {
            format!("{}. {} (RT={})", step.index, step.name, step.rt)
        }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.color {
            format!("{code}{text}{}", ansi::RESET)
        } else {
            text.to_string()
        }
    }
}
