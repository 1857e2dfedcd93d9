use std::io::BufRead;

use smallvec::SmallVec;

use crate::error::Result;
use crate::scan::machine::{ByteFeed, ScanMachine, Step};

/// Tokens pulled from one row for the current column group.
pub(super) struct RowTokens {
    pub(super) tokens: SmallVec<[String; 16]>,
    /// Position the next column group resumes at for this row: one past the
    /// last consumed delimiter or terminator.
    pub(super) cursor: u64,
    /// Bytes actually consumed from the reader, which can run one past
    /// `cursor` when a lone-CR terminator was resolved by peeking the next
    /// byte. Lets the caller reposition with relative seeks.
    pub(super) consumed_through: u64,
}

/// Parses up to `needed` fields starting at `start`, which must be a field
/// start within a row. Stops early at the row terminator or EOF; tokens are
/// unescaped and ASCII-trimmed. The reader must already be positioned at
/// `start`.
///
/// # Errors
///
/// Propagates read failures.
pub(super) fn read_row_tokens<R: BufRead>(
    reader: R,
    start: u64,
    needed: usize,
    delimiter: u8,
    quote: u8,
) -> Result<RowTokens> {
    let mut feed = ByteFeed::new(reader, start, None);
    let mut machine = ScanMachine::new(delimiter, quote);
    let mut tokens: SmallVec<[String; 16]> = SmallVec::new();
    let mut buf: Vec<u8> = Vec::new();
    let mut cursor = start;

    while tokens.len() < needed {
        let Some(byte) = feed.next()? else {
            machine.finish();
            tokens.push(take_token(&mut buf));
            cursor = feed.pos();
            break;
        };
        match machine.step(byte) {
            Step::Content => buf.push(byte),
            Step::EscapedQuote => buf.push(quote),
            Step::QuoteOpen | Step::QuotePending | Step::CrPending => {}
            Step::FieldEnd => {
                tokens.push(take_token(&mut buf));
                cursor = feed.pos();
            }
            Step::RowEnd => {
                tokens.push(take_token(&mut buf));
                cursor = feed.pos();
                break;
            }
            Step::RowEndReplay => {
                tokens.push(take_token(&mut buf));
                // The replayed byte belongs to the next row; the terminator
                // ended one byte back.
                cursor = feed.pos() - 1;
                break;
            }
            Step::Replay => feed.push_back(byte),
        }
    }

    let consumed_through = feed.pos();
    Ok(RowTokens {
        tokens,
        cursor,
        consumed_through,
    })
}

fn take_token(buf: &mut Vec<u8>) -> String {
    let token = String::from_utf8_lossy(buf.trim_ascii()).into_owned();
    buf.clear();
    token
}
