//! Template compilation
//!
//! [`compile`] turns markup with directives into fragment code by running
//! every [`DirectiveRule`](crate::directive::DirectiveRule) over the text in
//! catalog order. It never fails: anything that doesn't match a rule,
//! including misspelled or malformed directives, is passed through as
//! markup.
//!
//! [`check`] is the opt-in strict mode. It looks at the directive structure
//! of a template (unknown directives, bad arguments, unbalanced blocks)
//! and reports the first problem as a [`CompileError`].

use crate::directive::rules;
use crate::error::CompileError;
use crate::resolver::VIEW_NAME_PATTERN;
use miette::{NamedSource, SourceSpan};
use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;
use tracing::trace;

/// Compile a template body into fragment code
pub fn compile(template: &str) -> String {
    let mut text = template.to_string();
    for rule in rules() {
        let rewritten = match rule.apply(&text) {
            Cow::Borrowed(_) => continue,
            Cow::Owned(rewritten) => rewritten,
        };
        trace!(rule = rule.name(), "applied directive rule");
        text = rewritten;
    }
    text
}

static RAW_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)@php\b.*?@endphp\b").expect("valid pattern"));
static PHP_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@(end)?php\b").expect("valid pattern"));
static FOR_ARGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[ \t]+\w+([ \t]*,[ \t]*\w+)?[ \t]+in[ \t]+\S").expect("valid pattern")
});
static VIEW_ARGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^[ \t]+{VIEW_NAME_PATTERN}[ \t]*$")).expect("valid pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    If,
    For,
    Isset,
    Empty,
}

impl Block {
    fn keyword(self) -> &'static str {
        match self {
            Block::If => "if",
            Block::For => "for",
            Block::Isset => "isset",
            Block::Empty => "empty",
        }
    }

    fn close(self) -> &'static str {
        match self {
            Block::If => "endif",
            Block::For => "endfor",
            Block::Isset => "endisset",
            Block::Empty => "endempty",
        }
    }
}

struct Open {
    block: Block,
    span: SourceSpan,
    seen_else: bool,
}

/// Check a template's directive structure.
///
/// `name` only labels diagnostics.
pub fn check(name: &str, template: &str) -> Result<(), CompileError> {
    let src = || NamedSource::new(name, template.to_string());

    // Raw blocks are opaque; blank them out so their content is skipped
    // while keeping every offset intact
    let blanked = RAW_BLOCK.replace_all(template, |caps: &regex::Captures<'_>| {
        caps[0]
            .chars()
            .map(|c| {
                if c == '\n' {
                    "\n".to_string()
                } else {
                    " ".repeat(c.len_utf8())
                }
            })
            .collect::<String>()
    });

    if let Some(stray) = PHP_KEYWORD.find(&blanked) {
        let span = SourceSpan::from((stray.start(), stray.len()));
        return Err(if stray.as_str() == "@php" {
            CompileError::Unclosed {
                keyword: "php".to_string(),
                close: "endphp",
                span,
                src: src(),
            }
        } else {
            CompileError::Unexpected {
                found: "endphp".to_string(),
                hint: "No `@php` block is open".to_string(),
                span,
                src: src(),
            }
        });
    }

    let mut stack: Vec<Open> = Vec::new();
    let mut line_start = 0;

    for line in blanked.split_inclusive('\n') {
        let offset = line_start;
        line_start += line.len();

        let content = line.trim_end_matches(['\n', '\r']);
        let trimmed = content.trim_start_matches([' ', '\t']);
        let Some(after_at) = trimmed.strip_prefix('@') else {
            continue;
        };
        let keyword_len = after_at
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(after_at.len());
        if keyword_len == 0 {
            continue;
        }
        let keyword = &after_at[..keyword_len];
        let args = &after_at[keyword_len..];
        let start = offset + (content.len() - trimmed.len());
        let span = SourceSpan::from((start, keyword_len + 1));

        let malformed = |expected: &'static str| CompileError::Malformed {
            keyword: keyword.to_string(),
            expected,
            span,
            src: src(),
        };
        let unexpected = |hint: String| CompileError::Unexpected {
            found: keyword.to_string(),
            hint,
            span,
            src: src(),
        };
        let has_arg = args.starts_with([' ', '\t']) && !args.trim().is_empty();
        let bare = args.trim().is_empty();

        match keyword {
            "if" | "isset" | "empty" => {
                if !has_arg {
                    return Err(malformed(match keyword {
                        "if" => "@if <condition>",
                        "isset" => "@isset <expression>",
                        _ => "@empty <expression>",
                    }));
                }
                let block = match keyword {
                    "if" => Block::If,
                    "isset" => Block::Isset,
                    _ => Block::Empty,
                };
                stack.push(Open {
                    block,
                    span,
                    seen_else: false,
                });
            }
            "for" => {
                if !FOR_ARGS.is_match(args) {
                    return Err(malformed("@for <value> in <collection>"));
                }
                stack.push(Open {
                    block: Block::For,
                    span,
                    seen_else: false,
                });
            }
            "elseif" | "else" => {
                if keyword == "elseif" && !has_arg {
                    return Err(malformed("@elseif <condition>"));
                }
                if keyword == "else" && !bare {
                    return Err(malformed("@else"));
                }
                match stack.last_mut() {
                    Some(open) if open.block == Block::If && !open.seen_else => {
                        open.seen_else = keyword == "else";
                    }
                    Some(open) if open.block == Block::If => {
                        return Err(unexpected("`@else` already closed this `@if`".to_string()));
                    }
                    _ => return Err(unexpected(format!("`@{keyword}` must follow `@if`"))),
                }
            }
            "endif" | "endfor" | "endisset" | "endempty" => {
                if !bare {
                    return Err(malformed(match keyword {
                        "endif" => "@endif",
                        "endfor" => "@endfor",
                        "endisset" => "@endisset",
                        _ => "@endempty",
                    }));
                }
                match stack.last() {
                    Some(open) if open.block.close() == keyword => {
                        stack.pop();
                    }
                    Some(open) => {
                        return Err(unexpected(format!(
                            "The innermost open block is `@{}`; close it with `@{}` first",
                            open.block.keyword(),
                            open.block.close()
                        )));
                    }
                    None => return Err(unexpected("No block is open".to_string())),
                }
            }
            "break" | "continue" => {
                if !bare {
                    return Err(malformed(if keyword == "break" {
                        "@break"
                    } else {
                        "@continue"
                    }));
                }
                if !stack.iter().any(|open| open.block == Block::For) {
                    return Err(unexpected(format!("`@{keyword}` must be inside `@for`")));
                }
            }
            "view" | "style" | "script" => {
                if !VIEW_ARGS.is_match(args) {
                    return Err(malformed(match keyword {
                        "view" => "@view <name>",
                        "style" => "@style <name>",
                        _ => "@script <name>",
                    }));
                }
            }
            _ => {
                return Err(CompileError::UnknownDirective {
                    keyword: keyword.to_string(),
                    span,
                    src: src(),
                });
            }
        }
    }

    match stack.pop() {
        Some(open) => Err(CompileError::Unclosed {
            keyword: open.block.keyword().to_string(),
            close: open.block.close(),
            span: open.span,
            src: src(),
        }),
        None => Ok(()),
    }
}
