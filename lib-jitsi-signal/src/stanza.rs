//! Framing of the inbound XML stream into top-level stanzas.

use anyhow::{anyhow, Result};
use quick_xml::{events::Event, Reader};
use xmpp_parsers::Element;

/// Outcome of feeding one chunk of text to a negotiation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
  /// More input is needed.
  Continue,
  /// The machine reached its final state.
  Done,
}

/// Largest incomplete stanza kept while waiting for the rest of it.
const MAX_BUFFERED: usize = 1 << 20;

enum Framing {
  Incomplete,
  Complete(usize),
  /// Tokenizing failed; text before the offset is dropped.
  Malformed(anyhow::Error, usize),
}

/// Accumulates received text and yields one complete top-level element at a time.
///
/// A prefix of a stanza stays buffered until the rest arrives. Malformed text is
/// dropped up to the end of the tag that failed, so stanzas following it in the same
/// chunk are still produced. An incomplete stanza growing past 1 MiB is dropped.
#[derive(Debug, Default)]
pub struct StanzaBuffer {
  buffer: String,
}

impl StanzaBuffer {
  pub fn new() -> StanzaBuffer {
    StanzaBuffer::default()
  }

  pub fn push(&mut self, text: &str) {
    self.buffer.push_str(text);
  }

  pub fn is_empty(&self) -> bool {
    self.buffer.trim().is_empty()
  }

  /// Empties the buffer, returning what it held.
  pub fn take(&mut self) -> String {
    std::mem::take(&mut self.buffer)
  }

  /// Removes and parses the first complete stanza. `None` means nothing complete is buffered.
  pub fn next_stanza(&mut self) -> Option<Result<Element>> {
    match frame(&self.buffer) {
      Framing::Incomplete if self.buffer.len() > MAX_BUFFERED => {
        let dropped = self.buffer.len();
        self.buffer.clear();
        Some(Err(anyhow!("dropped {} bytes of unterminated stanza", dropped)))
      },
      Framing::Incomplete => None,
      Framing::Malformed(e, resume) => {
        self.buffer.drain(..resume);
        Some(Err(e))
      },
      Framing::Complete(end) => {
        let rest = self.buffer.split_off(end);
        let stanza = std::mem::replace(&mut self.buffer, rest);
        Some(
          stanza
            .parse::<Element>()
            .map_err(|e| anyhow!("malformed stanza: {}", e)),
        )
      },
    }
  }
}

/// Finds the end of the first top-level element by counting element depth.
fn frame(text: &str) -> Framing {
  if text.trim().is_empty() {
    return Framing::Incomplete;
  }
  let bytes = text.as_bytes();
  let mut reader = Reader::from_str(text);
  let mut buf = Vec::new();
  let mut depth = 0usize;
  loop {
    let event = reader.read_event(&mut buf);
    let position = reader.buffer_position().min(bytes.len());
    let closed = position > 0 && bytes[position - 1] == b'>';
    match event {
      Ok(Event::Start(_)) => depth += 1,
      Ok(Event::Empty(_)) if depth == 0 => {
        return if closed {
          Framing::Complete(position)
        }
        else {
          Framing::Incomplete
        };
      },
      Ok(Event::End(_)) => {
        depth = depth.saturating_sub(1);
        if depth == 0 {
          return if closed {
            Framing::Complete(position)
          }
          else {
            Framing::Incomplete
          };
        }
      },
      Ok(Event::Eof) => return Framing::Incomplete,
      Ok(_) => {},
      Err(e) => {
        // the tag being read when the tokenizer failed may simply not be finished yet
        let resume = if closed {
          position
        }
        else {
          match bytes[position..].iter().position(|b| *b == b'>') {
            Some(offset) => position + offset + 1,
            None => return Framing::Incomplete,
          }
        };
        return Framing::Malformed(anyhow!("malformed XML: {}", e), resume);
      },
    }
    buf.clear();
  }
}

/// Serialises an element without an XML declaration, as WebSocket framing expects.
pub fn to_xml(element: &Element) -> Result<String> {
  let mut bytes = Vec::new();
  element
    .write_to_inner(&mut quick_xml::Writer::new(&mut bytes))
    .map_err(|e| anyhow!("failed to serialise stanza: {}", e))?;
  Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn whole_stanza() {
    let mut buffer = StanzaBuffer::new();
    buffer.push(r#"<presence from="room@conference.example.org/abcd"><nick xmlns="http://jabber.org/protocol/nick">Alice</nick></presence>"#);
    let stanza = buffer.next_stanza().unwrap().unwrap();
    assert_eq!(stanza.name(), "presence");
    assert!(buffer.next_stanza().is_none());
    assert!(buffer.is_empty());
  }

  #[test]
  fn split_stanza_is_produced_once() {
    let mut buffer = StanzaBuffer::new();
    buffer.push(r#"<iq id="iq_1" type="res"#);
    assert!(buffer.next_stanza().is_none());
    buffer.push(r#"ult"><bind xmlns="urn:ietf:params:xml:ns:xmpp-bind"><jid>a@b/c</jid></bi"#);
    assert!(buffer.next_stanza().is_none());
    buffer.push("nd></");
    assert!(buffer.next_stanza().is_none());
    buffer.push("iq>");
    let stanza = buffer.next_stanza().unwrap().unwrap();
    assert_eq!(stanza.attr("type"), Some("result"));
    assert!(buffer.next_stanza().is_none());
  }

  #[test]
  fn truncated_empty_element_waits() {
    let mut buffer = StanzaBuffer::new();
    buffer.push("<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/");
    assert!(buffer.next_stanza().is_none());
    buffer.push(">");
    assert_eq!(buffer.next_stanza().unwrap().unwrap().name(), "success");
  }

  #[test]
  fn trailing_text_is_kept() {
    let mut buffer = StanzaBuffer::new();
    buffer.push("<open from='example.org'/><features");
    assert_eq!(buffer.next_stanza().unwrap().unwrap().name(), "open");
    assert!(buffer.next_stanza().is_none());
    buffer.push("/>");
    assert_eq!(buffer.next_stanza().unwrap().unwrap().name(), "features");
  }

  #[test]
  fn malformed_then_valid() {
    let mut buffer = StanzaBuffer::new();
    buffer.push("<a></b>");
    assert!(buffer.next_stanza().unwrap().is_err());
    assert!(buffer.is_empty());
    buffer.push("<a/>");
    assert_eq!(buffer.next_stanza().unwrap().unwrap().name(), "a");
  }

  #[test]
  fn stanza_after_malformed_text_survives() {
    let mut buffer = StanzaBuffer::new();
    buffer.push(r#"<presence></iq><presence from="room@conference.example.org/zzzz"/>"#);
    assert!(buffer.next_stanza().unwrap().is_err());
    let stanza = buffer.next_stanza().unwrap().unwrap();
    assert_eq!(stanza.attr("from"), Some("room@conference.example.org/zzzz"));
    assert!(buffer.next_stanza().is_none());
  }

  #[test]
  fn unterminated_stanza_is_capped() {
    let mut buffer = StanzaBuffer::new();
    buffer.push("<presence from='");
    buffer.push(&"a".repeat(MAX_BUFFERED));
    assert!(buffer.next_stanza().unwrap().is_err());
    assert!(buffer.is_empty());
    buffer.push("<presence/>");
    assert_eq!(buffer.next_stanza().unwrap().unwrap().name(), "presence");
  }

  #[test]
  fn serialises_without_declaration() {
    let element = Element::builder("open")
      .ns("urn:ietf:params:xml:ns:xmpp-framing")
      .attr("to", "example.org")
      .build();
    let xml = to_xml(&element).unwrap();
    assert!(!xml.starts_with("<?xml"));
    assert!(xml.starts_with("<open"));
    assert!(xml.contains(r#"to="example.org""#));
  }
}
