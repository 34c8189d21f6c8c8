//! Statement tree for a parsed fragment

use super::value::Value;

/// A parsed fragment: a sequence of nodes
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Program {
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    /// Markup emitted as-is
    Text(String),
    /// `<%= expr %>` or `echo expr;`
    Echo(Expr),
    If(IfNode),
    For(ForNode),
    Break,
    Continue,
    Assign { name: String, value: Expr },
    /// Expression evaluated for its effect, result discarded
    Expr(Expr),
}

/// `if a { } else if b { } else { }`
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IfNode {
    /// Conditions and bodies, tried in order
    pub branches: Vec<(Expr, Vec<Node>)>,
    pub otherwise: Option<Vec<Node>>,
}

/// `for v in coll { }` or `for k, v in coll { }`
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ForNode {
    pub key: Option<String>,
    pub value: String,
    pub collection: Expr,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Var(String),
    Field {
        base: Box<Expr>,
        field: String,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Concat,
    Mul,
    Div,
    Mod,
}
