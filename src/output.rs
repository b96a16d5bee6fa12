use std::io::{IsTerminal, Write};
use std::time::Duration;

use crossterm::style::{Color, Stylize};
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Default,
    Error,
    Success,
    Warning,
    Info,
    Progress,
}

impl Style {
    fn color(self) -> Option<Color> {
        match self {
            Style::Default => None,
            Style::Error => Some(Color::Red),
            Style::Success => Some(Color::Green),
            Style::Warning => Some(Color::Yellow),
            Style::Info => Some(Color::Blue),
            Style::Progress => Some(Color::Cyan),
        }
    }
}

/// Terminal sink for everything the user sees. Colors are applied here only.
pub struct Console<W: Write> {
    out: W,
    color: bool,
    interactive: bool,
}

impl Console<std::io::Stdout> {
    pub fn stdout() -> Self {
        let out = std::io::stdout();
        let interactive = out.is_terminal();
        let color = interactive && std::env::var_os("NO_COLOR").is_none();
        Self {
            out,
            color,
            interactive,
        }
    }
}

impl<W: Write> Console<W> {
    #[cfg(test)]
    pub fn plain(out: W) -> Self {
        Self {
            out,
            color: false,
            interactive: false,
        }
    }

    pub fn line(&mut self, style: Style, text: &str) {
        self.write(style, text);
        self.write(Style::Default, "\n");
    }

    pub fn write(&mut self, style: Style, text: &str) {
        let res = match style.color() {
            Some(color) if self.color => write!(self.out, "{}", text.with(color)),
            _ => write!(self.out, "{text}"),
        };
        // Nothing useful to do when stdout is gone.
        res.ok();
        self.out.flush().ok();
    }

    pub fn error(&mut self, text: &str) {
        self.line(Style::Error, &format!("ERROR: {text}"));
    }

    /// Spinner shown while a blocking call has not produced output yet.
    pub fn spinner(&self, message: String) -> ProgressBar {
        if !self.interactive {
            return ProgressBar::hidden();
        }
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", ""])
            .template("{spinner:.cyan} {msg}")
        {
            spinner.set_style(style);
        }
        spinner.set_message(message);
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}
