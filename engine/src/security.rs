//! Sanitization for text that came from the network.
//!
//! Interpretations, status lines and error bodies are untrusted. Before they
//! reach a terminal, escape sequences and control characters are stripped;
//! before they reach logs or message content, bearer credentials are masked.

use std::borrow::Cow;

const ESC: char = '\x1b';
const BEL: char = '\x07';

/// Strip ANSI escape sequences and control characters, keeping `\n` and `\t`.
#[must_use]
pub fn sanitize_display_text(input: &str) -> Cow<'_, str> {
    if !input.chars().any(needs_stripping) {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ESC {
            match chars.peek() {
                // CSI: parameters then a final byte in @..~
                Some('[') => {
                    chars.next();
                    for next in chars.by_ref() {
                        if ('@'..='~').contains(&next) {
                            break;
                        }
                    }
                }
                // OSC: runs to BEL or ESC \
                Some(']') => {
                    chars.next();
                    while let Some(next) = chars.next() {
                        if next == BEL {
                            break;
                        }
                        if next == ESC && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                Some(_) => {
                    chars.next();
                }
                None => {}
            }
        } else if !needs_stripping(c) {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

fn needs_stripping(c: char) -> bool {
    (c.is_control() && c != '\n' && c != '\t') || c == ESC
}

/// Mask the credential in any `Bearer <token>` occurrence.
#[must_use]
pub fn redact_bearer_tokens(raw: &str) -> String {
    const MARKER: &str = "Bearer ";
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find(MARKER) {
        let (before, after) = rest.split_at(pos + MARKER.len());
        out.push_str(before);
        let token_len = after
            .find(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | ',' | '}'))
            .unwrap_or(after.len());
        if token_len > 0 {
            out.push_str("***");
        }
        rest = &after[token_len..];
    }
    out.push_str(rest);
    out
}
