//! Split a single wire line into start-tag, text and end-tag tokens.

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Lexical unit produced from one line of the device stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// `<Name>` (also produced for the opening half of `<Name/>`).
    Start(String),
    /// Trimmed character data between tags, never empty.
    Text(String),
    /// `</Name>` (also produced for the closing half of `<Name/>`).
    End(String),
}

/// The tokenizer gave up on a line.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed line at byte {position}: {message}")]
pub struct TokenError {
    pub position: usize,
    pub message: String,
}

/// Tokens recovered from one line, plus the error that cut the line short, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineTokens {
    pub tokens: Vec<Token>,
    pub error: Option<TokenError>,
}

/// Tokenize one line of the stream.
///
/// Each line is tokenized on its own, so end tags are not matched against
/// start tags: a lone `</InstantaneousDemand>` line is ordinary input. Text is
/// taken literally (no entity expansion). Declarations, comments, CDATA and
/// processing instructions are skipped.
pub fn tokenize_line(line: &[u8]) -> LineTokens {
    let mut reader = Reader::from_reader(line);
    reader.trim_text(true);
    reader.check_end_names(false);
    reader.expand_empty_elements(true);

    let mut buf = Vec::new();
    let mut out = LineTokens::default();
    loop {
        buf.clear();
        let event = reader.read_event_into(&mut buf);
        // quick-xml hands back a tag cut off by the end of the line as if it
        // were complete; only keep tags that really end at a `>`.
        if let Ok(Event::Start(_) | Event::End(_)) = event {
            let position = reader.buffer_position();
            if !line[..position.min(line.len())].ends_with(b">") {
                out.error = Some(unclosed_tag(line, position));
                break;
            }
        }
        match event {
            Ok(Event::Start(e)) => out.tokens.push(Token::Start(tag_name(e.name().as_ref()))),
            Ok(Event::End(e)) => out.tokens.push(Token::End(tag_name(e.name().as_ref()))),
            Ok(Event::Text(text)) => {
                let text = String::from_utf8_lossy(&text);
                let text = text.trim();
                if !text.is_empty() {
                    out.tokens.push(Token::Text(text.to_string()));
                }
            }
            Ok(Event::Eof) => {
                // A bare trailing `<` produces no event at all.
                if let Some(open) = line.iter().rposition(|&b| b == b'<') {
                    if !line[open..].contains(&b'>') {
                        out.error = Some(unclosed_tag(line, open + 1));
                    }
                }
                break;
            }
            Ok(_) => {}
            Err(err) => {
                out.error = Some(TokenError {
                    position: reader.buffer_position(),
                    message: err.to_string(),
                });
                break;
            }
        }
    }
    out
}

fn unclosed_tag(line: &[u8], position: usize) -> TokenError {
    let start = line[..position.min(line.len())]
        .iter()
        .rposition(|&b| b == b'<')
        .unwrap_or(position);
    TokenError {
        position: start,
        message: "tag is not closed before the end of the line".into(),
    }
}

fn tag_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}
