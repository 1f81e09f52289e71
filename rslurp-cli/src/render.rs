//! Terminal rendering of the status line.

use console::Term;
use rslurp::StatusRenderer;

/// Draws the status line in place on a terminal, or as plain lines when
/// stdout is redirected.
pub struct TerminalRenderer {
    term: Term,
    interactive: bool,
    dirty: bool,
}

impl TerminalRenderer {
    pub fn stdout() -> Self {
        let term = Term::stdout();
        let interactive = term.is_term();
        Self::new(term, interactive)
    }

    /// Render to `term`, redrawing in place when `interactive`.
    pub fn new(term: Term, interactive: bool) -> Self {
        Self {
            term,
            interactive,
            dirty: false,
        }
    }
}

impl StatusRenderer for TerminalRenderer {
    fn status(&mut self, line: &str) {
        if self.interactive {
            let _ = self.term.clear_line();
            let _ = self.term.write_str(line);
            self.dirty = true;
        } else {
            let _ = self.term.write_line(line);
        }
    }

    fn message(&mut self, text: &str) {
        if self.interactive && self.dirty {
            let _ = self.term.clear_line();
            self.dirty = false;
        }
        let _ = self.term.write_line(text);
    }

    fn finish(&mut self) {
        if self.interactive && self.dirty {
            let _ = self.term.write_line("");
            self.dirty = false;
        }
    }
}
