//! [`ArrayReader`] yields the raw bytes of each element of a top-level JSON
//! array without holding the whole array in memory.
//!
//! Only the array's structure is checked here: brackets, commas and string
//! boundaries. Whether an element is valid JSON for its record type is left
//! to the caller, so one bad element never stops the stream.

use std::io::BufRead;

use crate::{Error, Result};

const BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
  /// Just after `[`: an element or `]` may follow.
  Start,
  /// Just after an element: `,` or `]` must follow.
  AfterElement,
  Done,
}

pub struct ArrayReader<R> {
  inner:    R,
  offset:   u64,
  position: Position,
}

impl<R: BufRead> ArrayReader<R> {
  /// Strip a UTF-8 byte-order mark if present and consume the opening `[`.
  pub fn new(mut inner: R) -> Result<Self> {
    if inner.fill_buf()?.starts_with(&BOM) {
      inner.consume(BOM.len());
    }
    let mut reader = Self { inner, offset: 0, position: Position::Start };
    reader.skip_whitespace()?;
    match reader.peek()? {
      Some(b'[') => reader.bump(),
      Some(other) => return Err(reader.malformed(format!("expected '[', found {:?}", other as char))),
      None => return Err(reader.malformed("empty input")),
    }
    Ok(reader)
  }

  /// The next element's raw bytes, or `None` once the closing `]` is read.
  pub fn next_element(&mut self) -> Result<Option<Vec<u8>>> {
    self.skip_whitespace()?;
    match (self.position, self.peek()?) {
      (Position::Done, _) => return Ok(None),
      (_, Some(b']')) => {
        self.bump();
        self.position = Position::Done;
        return Ok(None);
      }
      (Position::AfterElement, Some(b',')) => {
        self.bump();
        self.skip_whitespace()?;
        if matches!(self.peek()?, Some(b']') | None) {
          return Err(self.malformed("expected element after ','"));
        }
      }
      (Position::AfterElement, Some(other)) => {
        return Err(self.malformed(format!("expected ',' or ']', found {:?}", other as char)));
      }
      (_, None) => return Err(self.malformed("unexpected end of input")),
      (Position::Start, Some(_)) => {}
    }

    let element = self.read_element()?;
    self.position = Position::AfterElement;
    Ok(Some(element))
  }

  fn read_element(&mut self) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match self.peek()? {
      Some(b'{' | b'[') => self.read_container(&mut out)?,
      Some(b'"') => {
        self.take(&mut out)?;
        self.read_string_tail(&mut out)?;
      }
      _ => self.read_scalar(&mut out)?,
    }
    Ok(out)
  }

  /// Copy a balanced `{...}` or `[...]`, honouring strings and escapes.
  fn read_container(&mut self, out: &mut Vec<u8>) -> Result<()> {
    let mut depth = 0usize;
    loop {
      let byte = self.take(out)?;
      match byte {
        b'{' | b'[' => depth += 1,
        b'}' | b']' => {
          depth -= 1;
          if depth == 0 {
            return Ok(());
          }
        }
        b'"' => self.read_string_tail(out)?,
        _ => {}
      }
    }
  }

  /// Copy the remainder of a string whose opening quote is already in `out`.
  fn read_string_tail(&mut self, out: &mut Vec<u8>) -> Result<()> {
    loop {
      match self.take(out)? {
        b'\\' => {
          self.take(out)?;
        }
        b'"' => return Ok(()),
        _ => {}
      }
    }
  }

  fn read_scalar(&mut self, out: &mut Vec<u8>) -> Result<()> {
    while let Some(byte) = self.peek()? {
      if byte == b',' || byte == b']' || byte.is_ascii_whitespace() {
        break;
      }
      out.push(byte);
      self.bump();
    }
    Ok(())
  }

  fn skip_whitespace(&mut self) -> Result<()> {
    while let Some(byte) = self.peek()? {
      if !byte.is_ascii_whitespace() {
        break;
      }
      self.bump();
    }
    Ok(())
  }

  fn peek(&mut self) -> Result<Option<u8>> { Ok(self.inner.fill_buf()?.first().copied()) }

  fn bump(&mut self) {
    self.inner.consume(1);
    self.offset += 1;
  }

  /// Move one byte into `out`; running out of input is a structural error.
  fn take(&mut self, out: &mut Vec<u8>) -> Result<u8> {
    match self.peek()? {
      Some(byte) => {
        out.push(byte);
        self.bump();
        Ok(byte)
      }
      None => Err(self.malformed("unexpected end of input inside element")),
    }
  }

  fn malformed(&self, message: impl Into<String>) -> Error {
    Error::Malformed { offset: self.offset, message: message.into() }
  }
}
