use crate::executor::{PhaseResult, RunResult};
use console::{style, Term};
use eyre::WrapErr;
use tracing::*;

const LINE_WIDTH: usize = 100;

/// Terminal output of section separators and run summaries.
#[derive(Debug, Clone)]
pub struct Printer {
    /// `None` disables all output.
    term: Option<Term>,
    colors: bool,
}

impl Default for Printer {
    fn default() -> Self {
        Printer::silent()
    }
}

impl Printer {
    pub fn new(colors: bool) -> Printer {
        Printer {
            term: Some(Term::stdout()),
            colors,
        }
    }

    pub fn silent() -> Printer {
        Printer {
            term: None,
            colors: false,
        }
    }

    /// Prints `head` centered in a line of dashes.
    pub fn separator(&self, head: &str) {
        self.print(&format_separator(head, self.colors));
    }

    /// Logs the per phase counters (`succeeded/failed`) and prints the totals.
    pub fn summary(&self, result: &RunResult) {
        info!(
            setup = %phase_counts(&result.setup),
            tests = %phase_counts(&result.tests),
            teardown = %phase_counts(&result.teardown),
            "Run finished"
        );
        self.print(&format_summary(result, self.colors));
    }

    fn print(&self, s: &str) {
        let Some(term) = &self.term else {
            return;
        };
        if let Err(e) = write(term, s) {
            warn!("{e:#}");
        }
    }
}

fn write(term: &Term, s: &str) -> eyre::Result<()> {
    term.write_line(s)
        .wrap_err("failed to write line on terminal")
}

pub fn format_separator(head: &str, colors: bool) -> String {
    let head = format!(" {head} ");
    let rest = LINE_WIDTH.saturating_sub(head.chars().count());
    let left = rest / 2;
    let right = rest - left;
    let line = format!("{}{head}{}", "-".repeat(left), "-".repeat(right));
    style(line).magenta().force_styling(colors).to_string()
}

fn phase_counts(phase: &PhaseResult) -> String {
    format!("{}/{}", phase.succeeded(), phase.failed)
}

pub fn format_summary(result: &RunResult, colors: bool) -> String {
    let line = format!(
        "Ran {} requests: {} succeeded and {} failed",
        result.total(),
        result.succeeded(),
        result.failed()
    );
    let styled = style(line).bold().force_styling(colors);
    if result.failed() > 0 {
        styled.red().to_string()
    } else {
        styled.green().to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn separator_is_full_width() {
        let line = format_separator("SETUP", false);
        assert_eq!(line.chars().count(), LINE_WIDTH);
        assert!(line.contains(" SETUP "));
        assert!(line.starts_with("---"));
        assert!(line.ends_with("---"));
    }

    #[test]
    fn separator_with_long_head() {
        let head = "x".repeat(120);
        assert_eq!(format_separator(&head, false), format!(" {head} "));
    }

    #[test]
    fn summary_counts() {
        let mut result = RunResult::default();
        result.tests.inc();
        result.tests.inc();
        result.tests.inc_failed();
        result.teardown.inc();

        assert_eq!(
            format_summary(&result, false),
            "Ran 3 requests: 2 succeeded and 1 failed"
        );
    }

    #[test]
    fn phase_counts_are_succeeded_over_failed() {
        let mut phase = PhaseResult::default();
        phase.inc();
        phase.inc();
        phase.inc_failed();
        assert_eq!(phase_counts(&phase), "1/1");
    }

    #[test]
    fn colors_are_optional() {
        assert!(!format_summary(&RunResult::default(), false).contains('\u{1b}'));
        assert!(format_summary(&RunResult::default(), true).contains('\u{1b}'));
    }
}
