//! Fragment lexer
//!
//! Splits a fragment into markup text and tags, then tokenizes the code
//! inside `<%= %>` and `<% %>` tags.

use crate::error::ExecutionError;

pub(crate) const OPEN_TAG: &str = "<%";
pub(crate) const CLOSE_TAG: &str = "%>";
/// Markup spelling of a literal `<%`
pub(crate) const ESCAPED_OPEN_TAG: &str = "<%%";

/// One slice of a fragment
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Piece<'a> {
    Text(&'a str),
    /// `<%= code %>`
    Echo { code: &'a str, offset: usize },
    /// `<% code %>`
    Code { code: &'a str, offset: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Comment,
    Echo,
    Code,
}

/// Split a fragment into text and tags.
///
/// Comment and code tags that sit alone on a line swallow the whole line:
/// the indentation before them and the line break after them. `<%%` is
/// markup for a literal `<%`.
pub(crate) fn split_tags(fragment: &str) -> Result<Vec<Piece<'_>>, ExecutionError> {
    let mut pieces = Vec::new();
    let mut pos = 0;

    while let Some(rel) = fragment[pos..].find(OPEN_TAG) {
        let start = pos + rel;
        if fragment[start..].starts_with(ESCAPED_OPEN_TAG) {
            pieces.push(Piece::Text(&fragment[pos..start + OPEN_TAG.len()]));
            pos = start + ESCAPED_OPEN_TAG.len();
            continue;
        }
        let (kind, body_start) = match fragment.as_bytes().get(start + OPEN_TAG.len()) {
            Some(b'#') => (TagKind::Comment, start + 3),
            Some(b'=') => (TagKind::Echo, start + 3),
            _ => (TagKind::Code, start + 2),
        };

        let body_end = match kind {
            TagKind::Comment => fragment[body_start..]
                .find(CLOSE_TAG)
                .map(|i| body_start + i),
            TagKind::Echo | TagKind::Code => find_close(fragment, body_start),
        }
        .ok_or_else(|| ExecutionError::Syntax {
            message: "unterminated tag".to_string(),
            offset: start,
        })?;

        let mut text = &fragment[pos..start];
        let mut next = body_end + CLOSE_TAG.len();

        if kind != TagKind::Echo {
            let line_begin = fragment[..start].rfind('\n').map_or(0, |i| i + 1);
            let indent = &fragment[line_begin..start];
            let rest = &fragment[next..];
            let line_break = if rest.starts_with("\r\n") {
                Some(2)
            } else if rest.starts_with('\n') {
                Some(1)
            } else if rest.is_empty() {
                Some(0)
            } else {
                None
            };

            if let Some(len) = line_break {
                if line_begin >= pos && indent.chars().all(|c| c == ' ' || c == '\t') {
                    text = &text[..text.len() - indent.len()];
                    next += len;
                }
            }
        }

        if !text.is_empty() {
            pieces.push(Piece::Text(text));
        }
        let code = &fragment[body_start..body_end];
        match kind {
            TagKind::Comment => {}
            TagKind::Echo => pieces.push(Piece::Echo {
                code,
                offset: body_start,
            }),
            TagKind::Code => pieces.push(Piece::Code {
                code,
                offset: body_start,
            }),
        }
        pos = next;
    }

    if pos < fragment.len() {
        pieces.push(Piece::Text(&fragment[pos..]));
    }
    Ok(pieces)
}

/// Find the `%>` closing a code tag, skipping over string literals
fn find_close(fragment: &str, from: usize) -> Option<usize> {
    let bytes = fragment.as_bytes();
    let mut quote = None;
    let mut i = from;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'"' || b == b'\'' {
                    quote = Some(b);
                } else if bytes[i..].starts_with(CLOSE_TAG.as_bytes()) {
                    return Some(i);
                }
            }
        }
        i += 1;
    }
    None
}

/// A code token
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Punct(&'static str),
    /// End of a `<% %>` tag; terminates the statement in progress
    TagEnd,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub tok: Tok,
    /// Byte offset into the fragment
    pub offset: usize,
}

const PUNCT2: [&str; 6] = ["==", "!=", "<=", ">=", "&&", "||"];
const PUNCT1: [&str; 19] = [
    "{", "}", "(", ")", "[", "]", ",", ".", ";", "=", "<", ">", "+", "-", "*", "/", "%", "!", "~",
];

/// Tokenize the code inside a tag. `base` is the tag body's offset in the
/// fragment.
pub(crate) fn tokenize(code: &str, base: usize) -> Result<Vec<Token>, ExecutionError> {
    let mut tokens = Vec::new();
    let mut chars = code.char_indices().peekable();

    while let Some(&(i, c)) = chars.peek() {
        let offset = base + i;

        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    ident.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token {
                tok: Tok::Ident(ident),
                offset,
            });
            continue;
        }

        if c.is_ascii_digit() {
            let mut end = i;
            while let Some(&(j, c)) = chars.peek() {
                if c.is_ascii_digit() {
                    end = j + 1;
                    chars.next();
                } else {
                    break;
                }
            }
            // A fraction needs a digit after the dot, so `1.` stays an int
            let is_float = code[end..].starts_with('.')
                && code[end + 1..].starts_with(|c: char| c.is_ascii_digit());
            if is_float {
                chars.next();
                while let Some(&(j, c)) = chars.peek() {
                    if c.is_ascii_digit() {
                        end = j + 1;
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = code[i..end].parse().map_err(|_| syntax("bad float", offset))?;
                tokens.push(Token {
                    tok: Tok::Float(value),
                    offset,
                });
            } else {
                let value = code[i..end]
                    .parse()
                    .map_err(|_| syntax("integer out of range", offset))?;
                tokens.push(Token {
                    tok: Tok::Int(value),
                    offset,
                });
            }
            continue;
        }

        if c == '"' || c == '\'' {
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            while let Some((_, ch)) = chars.next() {
                match ch {
                    '\\' => match chars.next() {
                        Some((_, 'n')) => value.push('\n'),
                        Some((_, 't')) => value.push('\t'),
                        Some((_, other)) => value.push(other),
                        None => break,
                    },
                    ch if ch == c => {
                        closed = true;
                        break;
                    }
                    ch => value.push(ch),
                }
            }
            if !closed {
                return Err(syntax("unterminated string literal", offset));
            }
            tokens.push(Token {
                tok: Tok::Str(value),
                offset,
            });
            continue;
        }

        let rest = &code[i..];
        let punct = PUNCT2
            .iter()
            .chain(PUNCT1.iter())
            .find(|p| rest.starts_with(**p))
            .ok_or_else(|| syntax(format!("unexpected character `{c}`"), offset))?;
        for _ in 0..punct.len() {
            chars.next();
        }
        tokens.push(Token {
            tok: Tok::Punct(punct),
            offset,
        });
    }

    Ok(tokens)
}

fn syntax(message: impl Into<String>, offset: usize) -> ExecutionError {
    ExecutionError::Syntax {
        message: message.into(),
        offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standalone_statement_tags_swallow_their_line() {
        let pieces = split_tags("<ul>\n  <% for u in users { %>\n  <li><%= u %></li>\n  <% } %>\n</ul>").unwrap();
        assert_eq!(
            pieces,
            vec![
                Piece::Text("<ul>\n"),
                Piece::Code {
                    code: " for u in users { ",
                    offset: 9,
                },
                Piece::Text("  <li>"),
                Piece::Echo {
                    code: " u ",
                    offset: 39,
                },
                Piece::Text("</li>\n"),
                Piece::Code {
                    code: " } ",
                    offset: 54,
                },
                Piece::Text("</ul>"),
            ]
        );
    }

    #[test]
    fn inline_tags_keep_surrounding_text() {
        let pieces = split_tags("a <% x = 1 %> b\n").unwrap();
        assert_eq!(
            pieces,
            vec![
                Piece::Text("a "),
                Piece::Code {
                    code: " x = 1 ",
                    offset: 4,
                },
                Piece::Text(" b\n"),
            ]
        );
    }

    #[test]
    fn comments_vanish_and_strings_may_hold_close_tags() {
        let pieces = split_tags("<%# note %>\n<%= \"%>\" %>").unwrap();
        assert_eq!(
            pieces,
            vec![Piece::Echo {
                code: " \"%>\" ",
                offset: 15,
            }]
        );
    }

    #[test]
    fn unterminated_tag_is_a_syntax_error() {
        let err = split_tags("hi <%= name").unwrap_err();
        assert!(matches!(err, ExecutionError::Syntax { offset: 3, .. }));
    }

    #[test]
    fn tokenizes_operators_and_literals() {
        let toks: Vec<_> = tokenize("a.b >= 1.5 && !'x\\'y'", 0)
            .unwrap()
            .into_iter()
            .map(|t| t.tok)
            .collect();
        assert_eq!(
            toks,
            vec![
                Tok::Ident("a".into()),
                Tok::Punct("."),
                Tok::Ident("b".into()),
                Tok::Punct(">="),
                Tok::Float(1.5),
                Tok::Punct("&&"),
                Tok::Punct("!"),
                Tok::Str("x'y".into()),
            ]
        );
    }

    #[test]
    fn escaped_open_tags_are_markup() {
        let pieces = split_tags("a <%% b %> c <%= x %>").unwrap();
        assert_eq!(
            pieces,
            vec![
                Piece::Text("a <%"),
                Piece::Text(" b %> c "),
                Piece::Echo { code: " x ", offset: 16 },
            ]
        );
    }
}
