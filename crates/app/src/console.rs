//! Terminal rendering of one popup session.

use std::io::{self, Write};

use shared::wire::Role;

use crate::registry::{Session, TurnState};

/// Prints assistant entries as they grow, writing only what is new since the
/// last call.
#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    entries: usize,
    printed: usize,
    waiting: bool,
}

impl TranscriptPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(&self, session: &Session, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "== {} ==", session.header)
    }

    /// Treat everything currently in the transcript as already shown. Used
    /// after a regenerate dropped the last answer.
    pub fn skip_to_end(&mut self, session: &Session) {
        self.entries = session.transcript.len();
        self.printed = session.transcript.last().map_or(0, |m| m.text.len());
    }

    pub fn print(&mut self, session: &Session, out: &mut impl Write) -> io::Result<()> {
        let transcript = &session.transcript;
        if transcript.len() < self.entries {
            self.skip_to_end(session);
        }

        let start = self.entries.saturating_sub(1);
        for (i, message) in transcript.iter().enumerate().skip(start) {
            let continuing = i + 1 == self.entries;
            if message.role != Role::Assistant {
                continue;
            }
            if continuing {
                write!(out, "{}", message.text.get(self.printed..).unwrap_or(""))?;
            } else {
                write!(out, "\nassistant> {}", message.text)?;
            }
        }
        self.skip_to_end(session);

        let waiting = session.turn_state == TurnState::AwaitingResponse;
        if self.waiting && !waiting {
            write!(out, "\n> ")?;
        }
        self.waiting = waiting;
        out.flush()
    }
}
