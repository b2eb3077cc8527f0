//! Splitting a byte stream into tokens.

use std::io::{self, BufRead, ErrorKind};
use std::str::{self, FromStr};

use crate::{MAX_TOKEN_LEN, SENTINEL};

/// Reads tokens from a buffered byte stream, assuming space + tab + EOL to be
/// token boundaries. Each newline is itself reported as the sentinel token.
pub struct TokenReader<R> {
    inner: R,
}

fn is_separator(b: u8) -> bool {
    b == b' ' || b == b'\t' || b == b'\n'
}

/// The whitespace-separated fields of one line.
pub fn split_fields(line: &[u8]) -> impl Iterator<Item = &[u8]> {
    line.split(|b| b.is_ascii_whitespace())
        .filter(|f| !f.is_empty())
}

/// Parses a field as a number. `None` if it is not valid UTF-8 or not a `T`.
pub fn parse_field<T: FromStr>(field: &[u8]) -> Option<T> {
    str::from_utf8(field).ok()?.parse().ok()
}

impl<R: BufRead> TokenReader<R> {
    pub fn new(inner: R) -> Self {
        TokenReader { inner }
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        loop {
            return match self.inner.fill_buf() {
                Ok(buf) => Ok(buf.first().copied()),
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => Err(e),
            };
        }
    }

    fn bump(&mut self) {
        self.inner.consume(1);
    }

    /// Reads the next token, or `Ok(None)` at end of stream. Tokens are raw
    /// bytes and need not be UTF-8.
    ///
    /// A newline that ends a token is left in the stream, so the following
    /// call still reports the sentence boundary. `\r` is ignored everywhere.
    /// Tokens longer than `MAX_TOKEN_LEN` bytes are truncated.
    pub fn next_token(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut word = Vec::<u8>::new();
        while let Some(b) = self.peek_byte()? {
            if b == b'\r' {
                self.bump();
                continue;
            }
            if is_separator(b) {
                if !word.is_empty() {
                    break;
                }
                self.bump();
                if b == b'\n' {
                    return Ok(Some(SENTINEL.to_vec()));
                }
                continue;
            }
            self.bump();
            if word.len() < MAX_TOKEN_LEN {
                word.push(b);
            }
        }
        Ok(if word.is_empty() { None } else { Some(word) })
    }

    /// Reads the next run of non-whitespace bytes, skipping any whitespace
    /// (newlines included) before it. No truncation.
    pub fn next_field(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut field = Vec::<u8>::new();
        while let Some(b) = self.peek_byte()? {
            if b.is_ascii_whitespace() {
                if !field.is_empty() {
                    break;
                }
            } else {
                field.push(b);
            }
            self.bump();
        }
        Ok(if field.is_empty() { None } else { Some(field) })
    }

    /// Discards bytes up to (not including) the next separator. Used after
    /// seeking into the middle of a token.
    pub fn skip_partial_token(&mut self) -> io::Result<()> {
        while let Some(b) = self.peek_byte()? {
            if is_separator(b) {
                break;
            }
            self.bump();
        }
        Ok(())
    }
}

impl<R: BufRead> Iterator for TokenReader<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<io::Result<Vec<u8>>> {
        self.next_token().transpose()
    }
}
