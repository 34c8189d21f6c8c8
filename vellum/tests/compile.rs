use indoc::indoc;
use vellum::{CompileError, Pass, check, compile, rules};

#[test]
fn compiled_fragments_compile_to_themselves() {
    vellum_testhelpers::setup();

    let template = indoc! {"
        <h1>{{ title }}</h1>
        @for k, v in items
          @if v
            <li>{{ k }}</li>
          @else
            @continue
          @endif
        @endfor
        @view layouts.footer
    "};
    let fragment = compile(template);
    assert_ne!(fragment, template);
    assert_eq!(compile(&fragment), fragment);

    let plain = "<p>No directives here, only <%= name %> and text.</p>\n";
    assert_eq!(compile(plain), plain);
}

#[test]
fn compiling_is_deterministic() {
    vellum_testhelpers::setup();

    let template = "##note## {{ a }}\n@isset b\n{{ b }}\n@endisset\n";
    let first = compile(template);
    for _ in 0..5 {
        assert_eq!(compile(template), first);
    }
}

#[test]
fn comments_are_rewritten_before_placeholders() {
    vellum_testhelpers::setup();

    let comment = rules().iter().position(|r| r.pass() == Pass::Comment);
    let placeholder = rules().iter().position(|r| r.pass() == Pass::Placeholder);
    assert!(comment < placeholder);

    insta::assert_snapshot!(
        compile("before ##see {{ secret }}## after {{ shown }}"),
        @"before <%# see {{ secret }} %> after <%= shown %>"
    );
}

#[test]
fn conditionals_and_loops() {
    vellum_testhelpers::setup();

    insta::assert_snapshot!(compile("@if x\nYES\n@elseif y\nMAYBE\n@else\nNO\n@endif"), @r#"
    <% if x { %>
    YES
    <% } else if y { %>
    MAYBE
    <% } else { %>
    NO
    <% } %>
    "#);

    insta::assert_snapshot!(compile("@for u in users\n{{u.name}}\n@break\n@endfor"), @r#"
    <% for u in users { %>
    <%= u.name %>
    <% break; %>
    <% } %>
    "#);
}

#[test]
fn guards_raw_blocks_and_includes() {
    vellum_testhelpers::setup();

    let template = indoc! {r#"
        @isset user
        @empty user.roles
        @php count = count + 1; @endphp
        @endempty
        @endisset
            @view partials.nav
        @style theme
        @script app.main
    "#};
    insta::assert_snapshot!(compile(template), @r#"
    <% if isset(user) { %>
    <% if empty(user.roles) { %>
    <% count = count + 1; %>
    <% } %>
    <% } %>
        <%= include("partials.nav") %>
    <style><%= include("theme") %></style>
    <script><%= include("app.main") %></script>
    "#);
}

#[test]
fn malformed_directives_are_left_as_markup() {
    vellum_testhelpers::setup();

    for template in ["@if\n", "@for item\n", "@view\n", "@php never closed\n"] {
        assert_eq!(compile(template), template, "{template:?}");
        assert!(check("t", template).is_err(), "{template:?}");
    }

    // Not directives at all, so strict mode has nothing to say either
    for template in ["text @if x\n", "{{}}", "user@example.com\n"] {
        assert_eq!(compile(template), template, "{template:?}");
        check("t", template).unwrap();
    }
}

#[test]
fn strict_check_labels_the_offending_directive() {
    vellum_testhelpers::setup();

    let template = indoc! {"
        @if a
          @endfor
        @endif
    "};
    let err = check("views/page.html", template).unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"Unexpected `@endfor`");

    let CompileError::Unexpected { span, .. } = &err else {
        panic!("unexpected error: {err:?}");
    };
    assert_eq!(span.offset(), 8);
    assert_eq!(span.len(), "@endfor".len());
}
