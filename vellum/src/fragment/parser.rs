//! Fragment parser
//!
//! Statements may be spread over several tags (`<% if x { %>` … `<% } %>`),
//! so the tags of a fragment are flattened into one item stream before
//! parsing. The end of each code tag is kept as a [`Tok::TagEnd`] marker.

use super::ast::{BinaryOp, Expr, ForNode, IfNode, Node, Program, UnaryOp};
use super::lexer::{Piece, Tok, Token, split_tags, tokenize};
use super::value::Value;
use crate::error::ExecutionError;

#[derive(Debug, Clone)]
enum Item {
    Text(String),
    Echo(Expr),
    Tok(Token),
}

impl Program {
    /// Parse a fragment into a program
    pub(crate) fn parse(fragment: &str) -> Result<Self, ExecutionError> {
        let mut items = Vec::new();
        for piece in split_tags(fragment)? {
            match piece {
                Piece::Text(text) => items.push(Item::Text(text.to_string())),
                Piece::Echo { code, offset } => {
                    let tokens = tokenize(code, offset)?;
                    let mut parser = Parser::new(
                        tokens.into_iter().map(Item::Tok).collect(),
                        offset + code.len(),
                    );
                    let expr = parser.parse_expr()?;
                    parser.skip_punct(";");
                    parser.expect_end()?;
                    items.push(Item::Echo(expr));
                }
                Piece::Code { code, offset } => {
                    items.extend(tokenize(code, offset)?.into_iter().map(Item::Tok));
                    items.push(Item::Tok(Token {
                        tok: Tok::TagEnd,
                        offset: offset + code.len(),
                    }));
                }
            }
        }

        let mut parser = Parser::new(items, fragment.len());
        let nodes = parser.parse_block(false)?;
        Ok(Program { nodes })
    }
}

/// Deepest nesting of blocks, parentheses and unary operators accepted
const MAX_NESTING: usize = 128;

struct Parser {
    items: Vec<Item>,
    pos: usize,
    /// Offset reported for errors at end of input
    end_offset: usize,
    loop_depth: usize,
    nesting: usize,
}

impl Parser {
    fn new(items: Vec<Item>, end_offset: usize) -> Self {
        Self {
            items,
            pos: 0,
            end_offset,
            loop_depth: 0,
            nesting: 0,
        }
    }

    /// Parse nodes up to end of input, or up to (not including) the `}`
    /// closing a nested block
    fn parse_block(&mut self, nested: bool) -> Result<Vec<Node>, ExecutionError> {
        let mut nodes = Vec::new();
        loop {
            match self.items.get(self.pos) {
                None if nested => return Err(self.error("unterminated block, expected `}`")),
                None => return Ok(nodes),
                Some(Item::Text(text)) => {
                    nodes.push(Node::Text(text.clone()));
                    self.pos += 1;
                }
                Some(Item::Echo(expr)) => {
                    nodes.push(Node::Echo(expr.clone()));
                    self.pos += 1;
                }
                Some(Item::Tok(token)) => match token.tok {
                    Tok::TagEnd | Tok::Punct(";") => self.pos += 1,
                    Tok::Punct("}") if nested => return Ok(nodes),
                    Tok::Punct("}") => return Err(self.error("unexpected `}`")),
                    _ => {
                        let node = self.parse_statement()?;
                        nodes.push(node);
                    }
                },
            }
        }
    }

    fn parse_statement(&mut self) -> Result<Node, ExecutionError> {
        let keyword = match self.peek() {
            Some(Tok::Ident(name)) => name.clone(),
            _ => String::new(),
        };

        match keyword.as_str() {
            "if" => self.parse_if(),
            "for" => self.parse_for(),
            "break" | "continue" => {
                if self.loop_depth == 0 {
                    return Err(self.error(format!("`{keyword}` outside of a loop")));
                }
                self.pos += 1;
                self.end_statement()?;
                Ok(if keyword == "break" {
                    Node::Break
                } else {
                    Node::Continue
                })
            }
            "echo" => {
                self.pos += 1;
                let expr = self.parse_expr()?;
                self.end_statement()?;
                Ok(Node::Echo(expr))
            }
            "let" => {
                self.pos += 1;
                let name = self.expect_ident()?;
                self.expect_punct("=")?;
                let value = self.parse_expr()?;
                self.end_statement()?;
                Ok(Node::Assign { name, value })
            }
            _ if !keyword.is_empty() && self.peek_at(1) == Some(&Tok::Punct("=")) => {
                self.pos += 2;
                let value = self.parse_expr()?;
                self.end_statement()?;
                Ok(Node::Assign {
                    name: keyword,
                    value,
                })
            }
            _ => {
                let expr = self.parse_expr()?;
                self.end_statement()?;
                Ok(Node::Expr(expr))
            }
        }
    }

    fn parse_if(&mut self) -> Result<Node, ExecutionError> {
        self.pos += 1; // `if`
        let mut branches = Vec::new();
        let mut otherwise = None;

        let condition = self.parse_expr()?;
        let body = self.parse_braced()?;
        branches.push((condition, body));

        while self.peek_ident("else") {
            self.pos += 1;
            if self.peek_ident("if") {
                self.pos += 1;
                let condition = self.parse_expr()?;
                let body = self.parse_braced()?;
                branches.push((condition, body));
            } else {
                otherwise = Some(self.parse_braced()?);
                break;
            }
        }

        Ok(Node::If(IfNode {
            branches,
            otherwise,
        }))
    }

    fn parse_for(&mut self) -> Result<Node, ExecutionError> {
        self.pos += 1; // `for`
        let first = self.expect_ident()?;
        let (key, value) = if self.skip_punct(",") {
            (Some(first), self.expect_ident()?)
        } else {
            (None, first)
        };
        if !self.peek_ident("in") {
            return Err(self.error("expected `in`"));
        }
        self.pos += 1;
        let collection = self.parse_expr()?;

        self.loop_depth += 1;
        let body = self.parse_braced();
        self.loop_depth -= 1;

        Ok(Node::For(ForNode {
            key,
            value,
            collection,
            body: body?,
        }))
    }

    /// `{ nodes }`
    fn parse_braced(&mut self) -> Result<Vec<Node>, ExecutionError> {
        self.expect_punct("{")?;
        let body = self.nested(|parser| parser.parse_block(true))?;
        self.expect_punct("}")?;
        Ok(body)
    }

    pub(crate) fn parse_expr(&mut self) -> Result<Expr, ExecutionError> {
        self.nested(Self::parse_or)
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ExecutionError>,
    ) -> Result<T, ExecutionError> {
        if self.nesting >= MAX_NESTING {
            return Err(self.error("nesting is too deep"));
        }
        self.nesting += 1;
        let result = parse(self);
        self.nesting -= 1;
        result
    }

    fn parse_or(&mut self) -> Result<Expr, ExecutionError> {
        let mut left = self.parse_and()?;
        while self.skip_punct("||") || self.skip_ident("or") {
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExecutionError> {
        let mut left = self.parse_comparison()?;
        while self.skip_punct("&&") || self.skip_ident("and") {
            let right = self.parse_comparison()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExecutionError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Punct("==")) => BinaryOp::Eq,
                Some(Tok::Punct("!=")) => BinaryOp::Ne,
                Some(Tok::Punct("<")) => BinaryOp::Lt,
                Some(Tok::Punct("<=")) => BinaryOp::Le,
                Some(Tok::Punct(">")) => BinaryOp::Gt,
                Some(Tok::Punct(">=")) => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ExecutionError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Punct("+")) => BinaryOp::Add,
                Some(Tok::Punct("-")) => BinaryOp::Sub,
                Some(Tok::Punct("~")) => BinaryOp::Concat,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExecutionError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Punct("*")) => BinaryOp::Mul,
                Some(Tok::Punct("/")) => BinaryOp::Div,
                Some(Tok::Punct("%")) => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ExecutionError> {
        let op = if self.skip_punct("!") || self.skip_ident("not") {
            UnaryOp::Not
        } else if self.skip_punct("-") {
            UnaryOp::Neg
        } else {
            return self.parse_postfix();
        };
        let expr = self.nested(Self::parse_unary)?;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExecutionError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.skip_punct(".") {
                let field = self.expect_ident()?;
                expr = Expr::Field {
                    base: Box::new(expr),
                    field,
                };
            } else if self.skip_punct("[") {
                let index = self.parse_expr()?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    base: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExecutionError> {
        let Some(tok) = self.peek().cloned() else {
            return Err(self.error("expected an expression"));
        };
        self.pos += 1;

        match tok {
            Tok::Int(i) => Ok(Expr::Literal(Value::Int(i))),
            Tok::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            Tok::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Tok::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ if self.skip_punct("(") => {
                    let args = self.parse_list_until(")")?;
                    Ok(Expr::Call { name, args })
                }
                _ => Ok(Expr::Var(name)),
            },
            Tok::Punct("(") => {
                let expr = self.parse_expr()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Tok::Punct("[") => Ok(Expr::List(self.parse_list_until("]")?)),
            other => {
                self.pos -= 1;
                Err(self.error(format!("expected an expression, found {}", describe(&other))))
            }
        }
    }

    /// Comma-separated expressions, consuming the closing delimiter
    fn parse_list_until(&mut self, close: &'static str) -> Result<Vec<Expr>, ExecutionError> {
        let mut exprs = Vec::new();
        if self.skip_punct(close) {
            return Ok(exprs);
        }
        loop {
            exprs.push(self.parse_expr()?);
            if self.skip_punct(close) {
                return Ok(exprs);
            }
            self.expect_punct(",")?;
        }
    }

    /// A statement ends at `;` or the end of its tag, or right before the
    /// `}` of the enclosing block
    fn end_statement(&mut self) -> Result<(), ExecutionError> {
        match self.peek() {
            Some(Tok::Punct(";") | Tok::TagEnd) => {
                self.pos += 1;
                Ok(())
            }
            Some(Tok::Punct("}")) | None => Ok(()),
            Some(other) => {
                let message = format!("expected `;`, found {}", describe(other));
                Err(self.error(message))
            }
        }
    }

    fn expect_end(&self) -> Result<(), ExecutionError> {
        match self.peek() {
            None => Ok(()),
            Some(other) => Err(self.error(format!("unexpected {}", describe(other)))),
        }
    }

    fn expect_ident(&mut self) -> Result<String, ExecutionError> {
        match self.peek() {
            Some(Tok::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            other => {
                let message = format!(
                    "expected an identifier, found {}",
                    other.map_or_else(|| "end of input".to_string(), describe)
                );
                Err(self.error(message))
            }
        }
    }

    fn expect_punct(&mut self, punct: &'static str) -> Result<(), ExecutionError> {
        if self.skip_punct(punct) {
            Ok(())
        } else {
            let found = self
                .peek()
                .map_or_else(|| "end of input".to_string(), describe);
            Err(self.error(format!("expected `{punct}`, found {found}")))
        }
    }

    fn skip_punct(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Punct(p)) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ident(&mut self, word: &str) -> bool {
        if self.peek_ident(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn peek_ident(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(name)) if name == word)
    }

    /// The next token, if the next item is a token
    fn peek(&self) -> Option<&Tok> {
        self.peek_at(0)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Tok> {
        match self.items.get(self.pos + ahead) {
            Some(Item::Tok(token)) => Some(&token.tok),
            _ => None,
        }
    }

    fn error(&self, message: impl Into<String>) -> ExecutionError {
        let offset = match self.items.get(self.pos) {
            Some(Item::Tok(token)) => token.offset,
            _ => self.end_offset,
        };
        ExecutionError::Syntax {
            message: message.into(),
            offset,
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Ident(name) => format!("`{name}`"),
        Tok::Int(i) => format!("`{i}`"),
        Tok::Float(f) => format!("`{f}`"),
        Tok::Str(s) => format!("{s:?}"),
        Tok::Punct(p) => format!("`{p}`"),
        Tok::TagEnd => "end of tag".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Expr {
        Expr::Var(name.to_string())
    }

    #[test]
    fn statements_span_tags() {
        let program =
            Program::parse("<% if a { %>A<% } else if b { %>B<% } else { %>C<% } %>").unwrap();
        assert_eq!(
            program.nodes,
            vec![Node::If(IfNode {
                branches: vec![
                    (var("a"), vec![Node::Text("A".into())]),
                    (var("b"), vec![Node::Text("B".into())]),
                ],
                otherwise: Some(vec![Node::Text("C".into())]),
            })]
        );
    }

    #[test]
    fn two_binding_loop() {
        let program = Program::parse("<% for k, v in m { %><%= k %><% } %>").unwrap();
        assert_eq!(
            program.nodes,
            vec![Node::For(ForNode {
                key: Some("k".into()),
                value: "v".into(),
                collection: var("m"),
                body: vec![Node::Echo(var("k"))],
            })]
        );
    }

    #[test]
    fn precedence() {
        let program = Program::parse("<%= a || b && !c == d %>").unwrap();
        let expected = binary(
            BinaryOp::Or,
            var("a"),
            binary(
                BinaryOp::And,
                var("b"),
                binary(
                    BinaryOp::Eq,
                    Expr::Unary {
                        op: UnaryOp::Not,
                        expr: Box::new(var("c")),
                    },
                    var("d"),
                ),
            ),
        );
        assert_eq!(program.nodes, vec![Node::Echo(expected)]);
    }

    #[test]
    fn assignments_and_paths() {
        let program = Program::parse("<% let n = user.tags[0]; total = n %>").unwrap();
        assert_eq!(
            program.nodes,
            vec![
                Node::Assign {
                    name: "n".into(),
                    value: Expr::Index {
                        base: Box::new(Expr::Field {
                            base: Box::new(var("user")),
                            field: "tags".into(),
                        }),
                        index: Box::new(Expr::Literal(Value::Int(0))),
                    },
                },
                Node::Assign {
                    name: "total".into(),
                    value: var("n"),
                },
            ]
        );
    }

    #[test]
    fn unterminated_block_is_reported() {
        let err = Program::parse("<% if a { %>never closed").unwrap_err();
        assert!(
            matches!(&err, ExecutionError::Syntax { message, .. } if message.contains("unterminated")),
            "{err:?}"
        );
    }

    #[test]
    fn break_outside_loop_is_reported() {
        let err = Program::parse("<% break; %>").unwrap_err();
        assert!(matches!(err, ExecutionError::Syntax { offset: 3, .. }), "{err:?}");
    }

    #[test]
    fn stray_close_brace_is_reported() {
        assert!(Program::parse("text <% } %>").is_err());
    }

    #[test]
    fn deep_nesting_is_a_syntax_error() {
        let parens = format!("<%= {}1{} %>", "(".repeat(10_000), ")".repeat(10_000));
        let nots = format!("<%= {}x %>", "!".repeat(10_000));
        let blocks = format!("<% {}%>", "if a { ".repeat(10_000));
        for fragment in [parens, nots, blocks] {
            let err = Program::parse(&fragment).unwrap_err();
            assert!(
                matches!(&err, ExecutionError::Syntax { message, .. } if message.contains("too deep")),
                "{err:?}"
            );
        }

        let shallow = format!("<%= {}1{} %>", "(".repeat(50), ")".repeat(50));
        Program::parse(&shallow).unwrap();
    }
}
