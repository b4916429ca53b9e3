use colored::{ColoredString, Colorize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Failed,
    Warning,
    Info,
}

impl Status {
    fn marker(self) -> ColoredString {
        match self {
            Status::Ok => "✓".green().bold(),
            Status::Failed => "✗".red().bold(),
            Status::Warning => "⚠".yellow().bold(),
            Status::Info => "ℹ".blue().bold(),
        }
    }

    fn paint(self, text: &str) -> ColoredString {
        match self {
            Status::Ok => text.green(),
            Status::Failed => text.red(),
            Status::Warning => text.yellow(),
            Status::Info => text.normal(),
        }
    }
}

pub fn print_header(text: &str) {
    println!("\n{}", text.bold().cyan());
    println!("{}", "=".repeat(text.chars().count()).cyan());
}

/// Failures go to stderr so `sample --json` output stays parseable.
pub fn print_status(status: Status, text: &str) {
    let line = format!("{} {}", status.marker(), status.paint(text));
    match status {
        Status::Failed => eprintln!("{}", line),
        _ => println!("{}", line),
    }
}

/// One aligned `label: value` line under a section heading.
pub fn print_field(label: &str, value: impl std::fmt::Display) {
    println!("  {:<12}{}", format!("{}:", label), value);
}
