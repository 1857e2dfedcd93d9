use std::io::BufRead;

use crate::error::Result;

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Outcome of feeding one byte to the state machine.
///
/// Two variants leave the byte unconsumed: whether a quote closed a field and
/// whether a CR terminated a row are both decided by the *next* byte, which
/// may live in a different read chunk. Callers must feed an unconsumed byte
/// again; the machine guarantees forward progress because the pending flag
/// that caused the replay is cleared first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Byte consumed as field content.
    Content,
    /// Byte consumed; together with the preceding quote it forms a doubled
    /// quote decoding to one literal quote. The raw span covers two bytes.
    EscapedQuote,
    /// Byte consumed; opened a quoted field. Content starts at the next byte.
    QuoteOpen,
    /// Byte consumed; a quote inside a quoted field, meaning undecided.
    QuotePending,
    /// Byte consumed; an unquoted CR, terminator kind undecided.
    CrPending,
    /// Byte consumed as an unquoted delimiter ending the current field.
    FieldEnd,
    /// Byte consumed as an unquoted terminator (LF, or the LF of CRLF).
    RowEnd,
    /// Byte NOT consumed: the pending CR was a lone-CR terminator and the
    /// current byte belongs to the next row.
    RowEndReplay,
    /// Byte NOT consumed: the pending quote closed the field.
    Replay,
}

/// Streaming CSV classifier.
///
/// State persists across arbitrary chunk boundaries; the machine never looks
/// ahead, so a caller can feed it one byte at a time from any source.
#[derive(Debug, Clone)]
pub(crate) struct ScanMachine {
    delimiter: u8,
    quote: u8,
    in_quotes: bool,
    pending_quote: bool,
    pending_cr: bool,
    at_field_start: bool,
}

impl ScanMachine {
    pub(crate) fn new(delimiter: u8, quote: u8) -> Self {
        Self {
            delimiter,
            quote,
            in_quotes: false,
            pending_quote: false,
            pending_cr: false,
            at_field_start: true,
        }
    }

    /// Seeds the machine mid-stream inside a quoted field. Used by resync
    /// once lookahead has proven the partition point lies within quotes.
    pub(crate) fn new_in_quotes(delimiter: u8, quote: u8) -> Self {
        Self {
            in_quotes: true,
            at_field_start: false,
            ..Self::new(delimiter, quote)
        }
    }

    pub(crate) fn step(&mut self, byte: u8) -> Step {
        if self.pending_quote {
            self.pending_quote = false;
            if byte == self.quote {
                return Step::EscapedQuote;
            }
            self.in_quotes = false;
            return Step::Replay;
        }
        if self.in_quotes {
            if byte == self.quote {
                self.pending_quote = true;
                return Step::QuotePending;
            }
            // CR and LF are content inside quotes.
            return Step::Content;
        }
        if self.pending_cr {
            self.pending_cr = false;
            self.at_field_start = true;
            if byte == LF {
                return Step::RowEnd;
            }
            return Step::RowEndReplay;
        }
        if byte == CR {
            self.pending_cr = true;
            return Step::CrPending;
        }
        if byte == LF {
            self.at_field_start = true;
            return Step::RowEnd;
        }
        if byte == self.delimiter {
            self.at_field_start = true;
            return Step::FieldEnd;
        }
        if byte == self.quote {
            if self.at_field_start {
                self.at_field_start = false;
                self.in_quotes = true;
                return Step::QuoteOpen;
            }
            // Quote inside an unquoted field: literal content.
            return Step::Content;
        }
        self.at_field_start = false;
        Step::Content
    }

    /// Applies the end-of-input policy. A pending quote closes its field; a
    /// pending CR counts as a row terminator, in which case `true` is
    /// returned and the caller owes a final row-end.
    pub(crate) fn finish(&mut self) -> bool {
        if self.pending_quote {
            self.pending_quote = false;
            self.in_quotes = false;
        }
        if self.pending_cr && !self.in_quotes {
            self.pending_cr = false;
            self.at_field_start = true;
            return true;
        }
        false
    }
}

/// Byte supplier over a buffered reader with one-byte pushback.
///
/// `pos` tracks the absolute offset of the next byte to be returned, which
/// is what the replay protocol of [`ScanMachine`] needs: pushing a byte back
/// rewinds the position by one, so row starts can be read straight off the
/// feed regardless of which variant ended the row.
pub(crate) struct ByteFeed<R: BufRead> {
    inner: R,
    pos: u64,
    end: Option<u64>,
    pushed: Option<u8>,
}

impl<R: BufRead> ByteFeed<R> {
    /// `pos` is the absolute offset the reader is currently positioned at;
    /// `end` bounds the feed exclusively (`None` reads to EOF).
    pub(crate) fn new(inner: R, pos: u64, end: Option<u64>) -> Self {
        Self {
            inner,
            pos,
            end,
            pushed: None,
        }
    }

    /// Absolute offset of the next byte `next` would return.
    pub(crate) fn pos(&self) -> u64 {
        self.pos
    }

    /// Returns the next byte, or `None` at the range end / EOF.
    ///
    /// # Errors
    ///
    /// Propagates read failures from the underlying source.
    pub(crate) fn next(&mut self) -> Result<Option<u8>> {
        if let Some(byte) = self.pushed.take() {
            self.pos += 1;
            return Ok(Some(byte));
        }
        if self.end.is_some_and(|end| self.pos >= end) {
            return Ok(None);
        }
        let buf = self.inner.fill_buf()?;
        let Some(&byte) = buf.first() else {
            return Ok(None);
        };
        self.inner.consume(1);
        self.pos += 1;
        Ok(Some(byte))
    }

    /// Returns `byte` on the next call to `next` without re-reading it.
    pub(crate) fn push_back(&mut self, byte: u8) {
        debug_assert!(self.pushed.is_none());
        self.pushed = Some(byte);
        self.pos -= 1;
    }
}
