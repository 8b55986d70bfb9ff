//! Terminal output for text frames.

use anyhow::{Context, Result};
use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use crossterm::{execute, queue};
use std::io::{self, Stdout, Write};

use crate::pipeline::TerminalSink;

/// Redraws each text frame from the top-left corner of the screen.
///
/// The cursor is hidden while the terminal is held and shown again on drop.
pub struct AnsiTerminal<W: Write> {
    out: W,
}

impl AnsiTerminal<Stdout> {
    pub fn stdout() -> Result<Self> {
        Self::new(io::stdout())
    }
}

impl<W: Write> AnsiTerminal<W> {
    pub fn new(mut out: W) -> Result<Self> {
        execute!(out, Hide, Clear(ClearType::All)).context("preparing terminal")?;
        Ok(Self { out })
    }
}

impl<W: Write> TerminalSink for AnsiTerminal<W> {
    fn write(&mut self, text: &str) -> Result<()> {
        queue!(self.out, MoveTo(0, 0), Clear(ClearType::All), Print(text)).context("drawing frame")?;
        self.out.flush().context("flushing terminal")
    }
}

impl<W: Write> Drop for AnsiTerminal<W> {
    fn drop(&mut self) {
        let _ = execute!(self.out, Print("\n"), Show);
    }
}
