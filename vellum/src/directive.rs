//! The directive rule catalog
//!
//! Each rule pairs a regular expression with a rewriter that turns one
//! directive occurrence into fragment code. Rules are applied in catalog
//! order by [`compile`](crate::compile); later rules see the output of
//! earlier ones.
//!
//! Line directives (`@if`, `@for`, `@view`, ...) must be the only thing on
//! their line apart from spaces and tabs. Their indentation is kept.

use crate::fragment::{CLOSE_TAG, ESCAPED_OPEN_TAG, OPEN_TAG};
use crate::resolver::VIEW_NAME_PATTERN;
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::ops::Range;
use std::sync::LazyLock;

/// The compilation passes, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Pass {
    /// `##text##`
    Comment,
    /// `{{expr}}`
    Placeholder,
    /// `@if` / `@elseif` / `@else` / `@endif`
    Conditional,
    /// `@for` / `@break` / `@continue` / `@endfor`
    Loop,
    /// `@isset` / `@endisset` / `@empty` / `@endempty`
    Guard,
    /// `@php ... @endphp`
    RawBlock,
    /// `@view` / `@style` / `@script`
    Include,
}

/// How a rule turns a match into fragment code
#[derive(Clone, Copy)]
enum Rewrite {
    /// Replacement for the whole match; `None` leaves the match untouched
    Inline(fn(&Captures<'_>) -> Option<String>),
    /// Statement code, wrapped in a `<% %>` tag on the directive's line
    Statement(fn(&Captures<'_>) -> String),
    /// Markup replacing the directive's line
    Line(fn(&Captures<'_>) -> String),
}

/// One directive: a matcher and the rewriter for its matches
pub struct DirectiveRule {
    name: &'static str,
    pass: Pass,
    pattern: Regex,
    rewrite: Rewrite,
}

impl DirectiveRule {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn pass(&self) -> Pass {
        self.pass
    }

    /// Rewrite every occurrence of this directive in `text`.
    ///
    /// Matches starting inside a tag emitted by an earlier rule are left
    /// alone, so e.g. a placeholder inside a comment is never compiled.
    pub fn apply<'t>(&self, text: &'t str) -> Cow<'t, str> {
        let tags = tag_spans(text);
        self.pattern.replace_all(text, |caps: &Captures<'_>| {
            let whole = &caps[0];
            let start = caps.get(0).map_or(0, |m| m.start());
            if tags.iter().any(|tag| tag.contains(&start)) {
                return whole.to_string();
            }
            self.rewrite(caps).unwrap_or_else(|| whole.to_string())
        })
    }

    fn rewrite(&self, caps: &Captures<'_>) -> Option<String> {
        let line = |body: String| format!("{}{body}{}", &caps["indent"], &caps["cr"]);
        match self.rewrite {
            Rewrite::Inline(f) => f(caps),
            Rewrite::Statement(f) => Some(line(format!("{OPEN_TAG} {} {CLOSE_TAG}", f(caps)))),
            Rewrite::Line(f) => Some(line(f(caps))),
        }
    }
}

impl std::fmt::Debug for DirectiveRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectiveRule")
            .field("name", &self.name)
            .field("pass", &self.pass)
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

/// All rules, in application order
pub fn rules() -> &'static [DirectiveRule] {
    &RULES
}

static RULES: LazyLock<Vec<DirectiveRule>> = LazyLock::new(|| {
    vec![
        rule(
            "comment",
            Pass::Comment,
            r"##([^#]+)##",
            |c| {
                let comment = c[1].trim().replace(CLOSE_TAG, "% >");
                Some(format!("{OPEN_TAG}# {comment} {CLOSE_TAG}"))
            },
        ),
        rule(
            "placeholder",
            Pass::Placeholder,
            r"\{\{([^}]+)\}\}",
            |c| {
                let expr = c[1].trim();
                (!expr.is_empty()).then(|| format!("{OPEN_TAG}= {expr} {CLOSE_TAG}"))
            },
        ),
        statement("if", Pass::Conditional, r"@if[ \t]+(?P<arg>\S.*?)", |c| {
            format!("if {} {{", &c["arg"])
        }),
        statement(
            "elseif",
            Pass::Conditional,
            r"@elseif[ \t]+(?P<arg>\S.*?)",
            |c| format!("}} else if {} {{", &c["arg"]),
        ),
        statement("else", Pass::Conditional, r"@else", |_| "} else {".to_string()),
        statement("endif", Pass::Conditional, r"@endif", |_| "}".to_string()),
        statement(
            "for_key_value",
            Pass::Loop,
            r"@for[ \t]+(?P<key>\w+)[ \t]*,[ \t]*(?P<value>\w+)[ \t]+in[ \t]+(?P<coll>\S.*?)",
            |c| format!("for {}, {} in {} {{", &c["key"], &c["value"], &c["coll"]),
        ),
        statement(
            "for",
            Pass::Loop,
            r"@for[ \t]+(?P<value>\w+)[ \t]+in[ \t]+(?P<coll>\S.*?)",
            |c| format!("for {} in {} {{", &c["value"], &c["coll"]),
        ),
        statement("break", Pass::Loop, r"@break", |_| "break;".to_string()),
        statement("continue", Pass::Loop, r"@continue", |_| "continue;".to_string()),
        statement("endfor", Pass::Loop, r"@endfor", |_| "}".to_string()),
        statement("isset", Pass::Guard, r"@isset[ \t]+(?P<arg>\S.*?)", |c| {
            format!("if isset({}) {{", &c["arg"])
        }),
        statement("endisset", Pass::Guard, r"@endisset", |_| "}".to_string()),
        statement("empty", Pass::Guard, r"@empty[ \t]+(?P<arg>\S.*?)", |c| {
            format!("if empty({}) {{", &c["arg"])
        }),
        statement("endempty", Pass::Guard, r"@endempty", |_| "}".to_string()),
        rule(
            "php",
            Pass::RawBlock,
            r"(?s)@php\b(.*?)@endphp\b",
            |c| {
                let code = c[1].trim();
                if code.contains(OPEN_TAG) || code.contains(CLOSE_TAG) {
                    return None;
                }
                Some(format!("{OPEN_TAG} {code} {CLOSE_TAG}"))
            },
        ),
        markup("view", |c| include_tag(&c["name"])),
        markup("style", |c| {
            format!("<style>{}</style>", include_tag(&c["name"]))
        }),
        markup("script", |c| {
            format!("<script>{}</script>", include_tag(&c["name"]))
        }),
    ]
});

fn rule(
    name: &'static str,
    pass: Pass,
    pattern: &str,
    rewrite: fn(&Captures<'_>) -> Option<String>,
) -> DirectiveRule {
    DirectiveRule {
        name,
        pass,
        pattern: Regex::new(pattern).expect("directive patterns are valid"),
        rewrite: Rewrite::Inline(rewrite),
    }
}

/// A directive that must sit alone on its line; `directive` matches the
/// line's content without indentation
fn line_rule(name: &'static str, pass: Pass, directive: &str, rewrite: Rewrite) -> DirectiveRule {
    let pattern = format!(r"(?m)^(?P<indent>[ \t]*){directive}[ \t]*(?P<cr>\r?)$");
    DirectiveRule {
        name,
        pass,
        pattern: Regex::new(&pattern).expect("directive patterns are valid"),
        rewrite,
    }
}

fn statement(
    name: &'static str,
    pass: Pass,
    directive: &str,
    code: fn(&Captures<'_>) -> String,
) -> DirectiveRule {
    line_rule(name, pass, directive, Rewrite::Statement(code))
}

/// `@<name> <view name>`, replacing the line with markup
fn markup(name: &'static str, body: fn(&Captures<'_>) -> String) -> DirectiveRule {
    let directive = format!(r"@{name}[ \t]+(?P<name>{VIEW_NAME_PATTERN})");
    line_rule(name, Pass::Include, &directive, Rewrite::Line(body))
}

fn include_tag(view: &str) -> String {
    format!("{OPEN_TAG}= include(\"{view}\") {CLOSE_TAG}")
}

/// Byte ranges of the `<% ... %>` tags already present in `text`.
///
/// Escaped `<%%` and a `<%` with no closing `%>` are markup, not tags.
fn tag_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut pos = 0;
    while let Some(rel) = text[pos..].find(OPEN_TAG) {
        let start = pos + rel;
        if text[start..].starts_with(ESCAPED_OPEN_TAG) {
            pos = start + ESCAPED_OPEN_TAG.len();
            continue;
        }
        let Some(close) = text[start..].find(CLOSE_TAG) else {
            break;
        };
        let end = start + close + CLOSE_TAG.len();
        spans.push(start..end);
        pos = end;
    }
    spans
}
