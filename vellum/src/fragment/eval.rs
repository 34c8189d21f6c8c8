//! Fragment evaluator
//!
//! Walks a parsed program, writing output into a buffer. Expressions
//! evaluate to [`Value`]s; only `Echo` nodes turn them into text.

use super::Host;
use super::ast::{BinaryOp, Expr, ForNode, IfNode, Node, UnaryOp};
use super::scope::Scope;
use super::value::Value;
use crate::error::{ExecutionError, Result};
use std::cmp::Ordering;

/// How a block finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Next,
    Break,
    Continue,
}

pub(crate) struct Evaluator<'a> {
    scope: &'a mut Scope,
    host: &'a mut dyn Host,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(scope: &'a mut Scope, host: &'a mut dyn Host) -> Self {
        Self { scope, host }
    }

    pub(crate) fn run(&mut self, nodes: &[Node], out: &mut String) -> Result<()> {
        // the parser rejects break/continue outside loops
        self.exec_block(nodes, out).map(|_| ())
    }

    fn exec_block(&mut self, nodes: &[Node], out: &mut String) -> Result<Flow> {
        for node in nodes {
            let flow = match node {
                Node::Text(text) => {
                    out.push_str(text);
                    Flow::Next
                }
                Node::Echo(expr) => {
                    out.push_str(&self.eval(expr)?.render_to_string());
                    Flow::Next
                }
                Node::If(if_node) => self.exec_if(if_node, out)?,
                Node::For(for_node) => self.exec_for(for_node, out)?,
                Node::Break => Flow::Break,
                Node::Continue => Flow::Continue,
                Node::Assign { name, value } => {
                    let value = self.eval(value)?;
                    self.scope.assign(name, value);
                    Flow::Next
                }
                Node::Expr(expr) => {
                    self.eval(expr)?;
                    Flow::Next
                }
            };
            if flow != Flow::Next {
                return Ok(flow);
            }
        }
        Ok(Flow::Next)
    }

    fn exec_if(&mut self, if_node: &IfNode, out: &mut String) -> Result<Flow> {
        for (condition, body) in &if_node.branches {
            if self.eval(condition)?.is_truthy() {
                return self.exec_block(body, out);
            }
        }
        match &if_node.otherwise {
            Some(body) => self.exec_block(body, out),
            None => Ok(Flow::Next),
        }
    }

    fn exec_for(&mut self, for_node: &ForNode, out: &mut String) -> Result<Flow> {
        let collection = self.eval(&for_node.collection)?;
        let entries: Vec<(Value, Value)> = match collection {
            Value::List(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| (Value::from(i), item))
                .collect(),
            Value::Map(fields) => fields
                .into_iter()
                .map(|(k, v)| (Value::String(k), v))
                .collect(),
            other => {
                return Err(ExecutionError::Type {
                    expected: "list or map".to_string(),
                    found: other.type_name().to_string(),
                    context: "for loop".to_string(),
                }
                .into());
            }
        };

        for (key, item) in entries {
            self.scope.push_frame();
            if let Some(key_name) = &for_node.key {
                self.scope.set(key_name.clone(), key);
            }
            self.scope.set(for_node.value.clone(), item);
            let flow = self.exec_block(&for_node.body, out);
            self.scope.pop_frame();
            if flow? == Flow::Break {
                break;
            }
        }
        Ok(Flow::Next)
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::List(items) => Ok(Value::List(
                items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<Result<Vec<_>>>()?,
            )),
            Expr::Var(name) => self.scope.get(name).cloned().ok_or_else(|| {
                ExecutionError::Undefined {
                    name: name.clone(),
                    available: self.scope.available_vars(),
                }
                .into()
            }),
            Expr::Field { base, field } => {
                let base = self.eval(base)?;
                field_of(base, field)
            }
            Expr::Index { base, index } => {
                let base = self.eval(base)?;
                let index = self.eval(index)?;
                index_of(base, index)
            }
            Expr::Unary { op, expr } => {
                let value = self.eval(expr)?;
                match (op, value) {
                    (UnaryOp::Not, value) => Ok(Value::Bool(!value.is_truthy())),
                    (UnaryOp::Neg, Value::Int(i)) => i.checked_neg().map(Value::Int).ok_or_else(|| {
                        ExecutionError::Type {
                            expected: "a result in range".to_string(),
                            found: i.to_string(),
                            context: "negation".to_string(),
                        }
                        .into()
                    }),
                    (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
                    (UnaryOp::Neg, other) => Err(type_error("number", &other, "negation")),
                }
            }
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right),
            Expr::Call { name, args } => self.eval_call(name, args),
        }
    }

    /// Evaluate a variable path without failing on missing parts.
    ///
    /// Returns `None` when a variable, field or index along the path does
    /// not exist. Other expressions evaluate normally.
    fn lookup(&mut self, expr: &Expr) -> Result<Option<Value>> {
        match expr {
            Expr::Var(name) => Ok(self.scope.get(name).cloned()),
            Expr::Field { base, field } => Ok(self
                .lookup(base)?
                .and_then(|base| base.get(field).cloned())),
            Expr::Index { base, index } => {
                let Some(base) = self.lookup(base)? else {
                    return Ok(None);
                };
                let index = self.eval(index)?;
                Ok(index_of(base, index).ok())
            }
            other => self.eval(other).map(Some),
        }
    }

    fn eval_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Value> {
        // Short-circuit for and/or
        match op {
            BinaryOp::And => {
                let left = self.eval(left)?;
                if !left.is_truthy() {
                    return Ok(left);
                }
                return self.eval(right);
            }
            BinaryOp::Or => {
                let left = self.eval(left)?;
                if left.is_truthy() {
                    return Ok(left);
                }
                return self.eval(right);
            }
            _ => {}
        }

        let left = self.eval(left)?;
        let right = self.eval(right)?;

        Ok(match op {
            BinaryOp::Eq => Value::Bool(values_equal(&left, &right)),
            BinaryOp::Ne => Value::Bool(!values_equal(&left, &right)),
            BinaryOp::Lt => Value::Bool(compare_values(&left, &right).is_some_and(Ordering::is_lt)),
            BinaryOp::Le => Value::Bool(compare_values(&left, &right).is_some_and(Ordering::is_le)),
            BinaryOp::Gt => Value::Bool(compare_values(&left, &right).is_some_and(Ordering::is_gt)),
            BinaryOp::Ge => Value::Bool(compare_values(&left, &right).is_some_and(Ordering::is_ge)),
            BinaryOp::Concat => Value::String(format!(
                "{}{}",
                left.render_to_string(),
                right.render_to_string()
            )),
            BinaryOp::Add => match (left, right) {
                (Value::String(a), Value::String(b)) => Value::String(a + &b),
                (Value::List(mut a), Value::List(b)) => {
                    a.extend(b);
                    Value::List(a)
                }
                (a, b) => arithmetic(op, a, b)?,
            },
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                arithmetic(op, left, right)?
            }
            BinaryOp::And | BinaryOp::Or => unreachable!(), // Handled above
        })
    }

    fn eval_call(&mut self, name: &str, args: &[Expr]) -> Result<Value> {
        match name {
            "isset" => {
                let [path] = expect_args::<1>(name, args)?;
                let found = self.lookup(path)?;
                Ok(Value::Bool(found.is_some_and(|v| !v.is_null())))
            }
            "empty" => {
                let [path] = expect_args::<1>(name, args)?;
                let found = self.lookup(path)?;
                Ok(Value::Bool(!found.is_some_and(|v| v.is_truthy())))
            }
            "default" => {
                let [path, fallback] = expect_args::<2>(name, args)?;
                match self.lookup(path)? {
                    Some(value) if !value.is_null() => Ok(value),
                    _ => self.eval(fallback),
                }
            }
            "include" => {
                let [view] = expect_args::<1>(name, args)?;
                match self.eval(view)? {
                    Value::String(view) => Ok(Value::String(self.host.include(&view)?)),
                    other => Err(type_error("string", &other, "include")),
                }
            }
            "len" => {
                let [arg] = expect_args::<1>(name, args)?;
                match self.eval(arg)? {
                    Value::String(s) => Ok(Value::from(s.chars().count())),
                    Value::List(l) => Ok(Value::from(l.len())),
                    Value::Map(m) => Ok(Value::from(m.len())),
                    other => Err(type_error("string, list or map", &other, "len")),
                }
            }
            "upper" | "lower" | "trim" | "escape" => {
                let [arg] = expect_args::<1>(name, args)?;
                let text = self.eval(arg)?.render_to_string();
                Ok(Value::String(match name {
                    "upper" => text.to_uppercase(),
                    "lower" => text.to_lowercase(),
                    "trim" => text.trim().to_string(),
                    _ => escape_html(&text),
                }))
            }
            "join" => {
                let [list, separator] = expect_args::<2>(name, args)?;
                let separator = self.eval(separator)?.render_to_string();
                match self.eval(list)? {
                    Value::List(items) => Ok(Value::String(
                        items
                            .iter()
                            .map(Value::render_to_string)
                            .collect::<Vec<_>>()
                            .join(&separator),
                    )),
                    other => Err(type_error("list", &other, "join")),
                }
            }
            _ => Err(ExecutionError::UnknownFunction {
                name: name.to_string(),
            }
            .into()),
        }
    }
}

fn expect_args<'e, const N: usize>(name: &str, args: &'e [Expr]) -> Result<&'e [Expr; N]> {
    args.try_into().map_err(|_| {
        ExecutionError::Arity {
            name: name.to_string(),
            expected: N,
            found: args.len(),
        }
        .into()
    })
}

fn field_of(base: Value, field: &str) -> Result<Value> {
    match base {
        Value::Map(mut map) => map.swap_remove(field).ok_or_else(|| {
            ExecutionError::UnknownField {
                field: field.to_string(),
                known_fields: map.keys().cloned().collect(),
            }
            .into()
        }),
        other => Err(type_error("map", &other, "field access")),
    }
}

fn index_of(base: Value, index: Value) -> Result<Value> {
    match (base, index) {
        (Value::List(mut list), Value::Int(i)) => {
            let len = list.len();
            resolve_index(i, len)
                .map(|i| list.swap_remove(i))
                .ok_or_else(|| {
                    ExecutionError::Type {
                        expected: format!("index < {len}"),
                        found: format!("index {i}"),
                        context: "list index".to_string(),
                    }
                    .into()
                })
        }
        (Value::Map(map), Value::String(key)) => field_of(Value::Map(map), &key),
        (Value::String(s), Value::Int(i)) => {
            let len = s.chars().count();
            resolve_index(i, len)
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::String(c.to_string()))
                .ok_or_else(|| {
                    ExecutionError::Type {
                        expected: format!("index < {len}"),
                        found: format!("index {i}"),
                        context: "string index".to_string(),
                    }
                    .into()
                })
        }
        (base, _) => Err(type_error("list, map or string", &base, "index access")),
    }
}

/// Negative indices count from the end
fn resolve_index(i: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let i = if i < 0 { len + i } else { i };
    if (0..len).contains(&i) {
        usize::try_from(i).ok()
    } else {
        None
    }
}

fn arithmetic(op: BinaryOp, left: Value, right: Value) -> Result<Value> {
    let context = match op {
        BinaryOp::Add => "addition",
        BinaryOp::Sub => "subtraction",
        BinaryOp::Mul => "multiplication",
        BinaryOp::Div => "division",
        _ => "remainder",
    };

    if let (Value::Int(a), Value::Int(b)) = (&left, &right) {
        let (a, b) = (*a, *b);
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div if a.checked_rem(b) == Some(0) => a.checked_div(b),
            BinaryOp::Div if b != 0 => return Ok(Value::Float(a as f64 / b as f64)),
            _ => a.checked_rem(b),
        };
        return result.map(Value::Int).ok_or_else(|| {
            ExecutionError::Type {
                expected: "a result in range".to_string(),
                found: format!("{a} and {b}"),
                context: context.to_string(),
            }
            .into()
        });
    }

    let (a, b) = match (as_float(&left), as_float(&right)) {
        (Some(a), Some(b)) => (a, b),
        (None, _) => return Err(type_error("number", &left, context)),
        (_, None) => return Err(type_error("number", &right, context)),
    };
    Ok(Value::Float(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        _ => a % b,
    }))
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
        _ => left == right,
    }
}

fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => as_float(left)?.partial_cmp(&as_float(right)?),
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn type_error(expected: &str, found: &Value, context: &str) -> crate::ViewError {
    ExecutionError::Type {
        expected: expected.to_string(),
        found: found.type_name().to_string(),
        context: context.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::super::{Executor, Interpreter};
    use super::*;
    use crate::ViewError;
    use serde_json::json;

    /// Serves includes from a fixed list
    struct Includes(Vec<(&'static str, &'static str)>);

    impl Host for Includes {
        fn include(&mut self, name: &str) -> Result<String> {
            self.0
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, out)| out.to_string())
                .ok_or_else(|| ViewError::Reference {
                    name: name.to_string(),
                    searched: vec![],
                })
        }
    }

    fn run(fragment: &str, scope: Scope) -> Result<String> {
        let mut scope = scope;
        Interpreter.execute(fragment, &mut scope, &mut Includes(vec![("inner", "X")]))
    }

    #[test]
    fn loops_over_lists_and_maps() {
        let scope = Scope::from_iter([
            ("nums", json!([1, 2, 3])),
            ("ages", json!({"ann": 31, "bob": 27})),
        ]);
        assert_eq!(
            run(
                "<% for i, n in nums { %><%= i %>:<%= n %> <% } %>|<% for k, v in ages { %><%= k %>=<%= v %>;<% } %>",
                scope
            )
            .unwrap(),
            "0:1 1:2 2:3 |ann=31;bob=27;"
        );
    }

    #[test]
    fn break_and_continue() {
        let scope = Scope::from_iter([("nums", json!([1, 2, 3, 4, 5]))]);
        let out = run(
            "<% for n in nums { if n == 2 { continue; } if n > 4 { break; } %><%= n %><% } %>",
            scope,
        )
        .unwrap();
        assert_eq!(out, "134");
    }

    #[test]
    fn assignment_survives_the_loop() {
        let scope = Scope::from_iter([("nums", json!([1, 2, 3])), ("total", json!(0))]);
        let out = run(
            "<% for n in nums { total = total + n; } %><%= total %>",
            scope,
        )
        .unwrap();
        assert_eq!(out, "6");
    }

    #[test]
    fn isset_and_empty_never_fail_on_missing_paths() {
        let scope = Scope::from_iter([("user", json!({"name": "Max", "tags": []}))]);
        let out = run(
            "<%= isset(user.name) %> <%= isset(user.email) %> <%= isset(nobody.name) %> \
             <%= empty(user.tags) %> <%= empty(user.name) %> <%= empty(ghost) %>",
            scope,
        )
        .unwrap();
        assert_eq!(out, "true false false true false true");
    }

    #[test]
    fn builtins() {
        let scope = Scope::from_iter([("tags", json!(["a", "b"])), ("title", json!(" <Hi> "))]);
        let out = run(
            "<%= join(tags, \", \") %>|<%= len(tags) %>|<%= escape(trim(title)) %>|<%= upper(\"x\") ~ lower(\"Y\") %>|<%= default(missing, \"n/a\") %>",
            scope,
        )
        .unwrap();
        assert_eq!(out, "a, b|2|&lt;Hi&gt;|Xy|n/a");
    }

    #[test]
    fn arithmetic_and_comparison() {
        let out = run(
            "<%= 1 + 2 * 3 %> <%= 7 / 2 %> <%= 6 / 3 %> <%= 7 % 4 %> <%= 2 < 2.5 %> <%= \"a\" < \"b\" %> <%= 1 == 1.0 %>",
            Scope::new(),
        )
        .unwrap();
        assert_eq!(out, "7 3.5 2 3 true true true");
    }

    #[test]
    fn includes_go_through_the_host() {
        assert_eq!(run("[<%= include(\"inner\") %>]", Scope::new()).unwrap(), "[X]");
        let err = run("<%= include(\"nope\") %>", Scope::new()).unwrap_err();
        assert!(matches!(err, ViewError::Reference { .. }), "{err:?}");
    }

    #[test]
    fn undefined_variable_lists_what_is_available() {
        let err = run("<%= nam %>", Scope::from_iter([("name", "Max")])).unwrap_err();
        match err {
            ViewError::Execution(ExecutionError::Undefined { name, available }) => {
                assert_eq!(name, "nam");
                assert_eq!(available, ["name"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn looping_over_a_scalar_is_a_type_error() {
        let err = run("<% for x in n { %><% } %>", Scope::from_iter([("n", 3)])).unwrap_err();
        assert!(
            matches!(err, ViewError::Execution(ExecutionError::Type { .. })),
            "{err:?}"
        );
    }

    #[test]
    fn integer_overflow_is_a_type_error() {
        for fragment in [
            "<%= -(-9223372036854775807 - 1) %>",
            "<%= -n %>",
            "<%= n - 1 %>",
        ] {
            let err = run(fragment, Scope::from_iter([("n", i64::MIN)])).unwrap_err();
            assert!(
                matches!(err, ViewError::Execution(ExecutionError::Type { .. })),
                "{fragment}: {err:?}"
            );
        }
        let scope = Scope::from_iter([("n", i64::MAX)]);
        assert_eq!(run("<%= -n %>", scope).unwrap(), "-9223372036854775807");
    }

    #[test]
    fn negative_indices_count_from_the_end() {
        let scope = Scope::from_iter([("xs", json!(["a", "b", "c"]))]);
        assert_eq!(run("<%= xs[-1] %><%= xs[0] %>", scope).unwrap(), "ca");
    }
}
