//! AST node definitions for Falcon.
//!
//! Sum types rooted at [`Expr`] and [`Stmt`], plus the structural [`Pattern`]
//! grammar used by `match`. Function bodies are shared between declaration
//! and expression forms through [`FunctionDecl`] so the compiler can embed
//! the node itself in a const pool when a function stays AST-backed.

use std::fmt::{self, Display};
use std::rc::Rc;

use strum::Display as StrumDisplay;

use crate::error::CodeLoc;

/// Scalar literal value as it appears in source.
#[derive(Debug, Clone, PartialEq)]
pub enum Lit {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Binary operator, displayed with its surface spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
pub enum BinOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "**")]
    Pow,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Neq,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Lte,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Gte,
    #[strum(serialize = "&&")]
    And,
    #[strum(serialize = "||")]
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
pub enum UnOp {
    #[strum(serialize = "!")]
    Not,
    #[strum(serialize = "-")]
    Neg,
}

/// A function parameter with its optional gradual type annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ann: Option<String>,
}

/// Shared body of function statements and function expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub return_ann: Option<String>,
    pub body: Vec<Stmt>,
}

impl FunctionDecl {
    /// Display name used in error messages and function reprs.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anon>")
    }
}

/// One arm of a `match` statement or expression.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: ArmBody,
}

/// An arm body is either a single expression or a block.
#[derive(Debug, Clone, PartialEq)]
pub enum ArmBody {
    Expr(Expr),
    Block(Vec<Stmt>),
}

/// A `match` construct; used in both statement and expression position.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchNode {
    pub value: Expr,
    pub arms: Vec<MatchArm>,
}

/// Type names recognized in pattern position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
pub enum TypePattern {
    #[strum(serialize = "int")]
    Int,
    #[strum(serialize = "float")]
    Float,
    #[strum(serialize = "bool")]
    Bool,
    #[strum(serialize = "string")]
    Str,
    #[strum(serialize = "list")]
    List,
    #[strum(serialize = "tuple")]
    Tuple,
    #[strum(serialize = "dict")]
    Dict,
    #[strum(serialize = "object")]
    Object,
}

impl TypePattern {
    /// Maps a type-name identifier to its pattern, accepting the `str`
    /// alias for `string`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let pat = match name {
            "int" => Self::Int,
            "float" => Self::Float,
            "bool" => Self::Bool,
            "str" | "string" => Self::Str,
            "list" => Self::List,
            "tuple" => Self::Tuple,
            "dict" => Self::Dict,
            "object" => Self::Object,
            _ => return None,
        };
        Some(pat)
    }
}

/// Structural pattern grammar.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Literal(Lit),
    Binding(String),
    Wildcard,
    Type(TypePattern),
    List(Vec<Pattern>),
    Tuple(Vec<Pattern>),
    Dict(Vec<(String, Pattern)>),
    Or(Vec<Pattern>),
}

/// Expression nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Lit),
    ListLit(Vec<Expr>),
    TupleLit(Vec<Expr>),
    SetLit(Vec<Expr>),
    DictLit(Vec<(String, Expr)>),
    /// `array[N]` fixed-array allocation.
    ArrayLit(Box<Expr>),
    Variable(String),
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    Grouping(Box<Expr>),
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Member {
        base: Box<Expr>,
        name: String,
    },
    Subscript {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Function(Rc<FunctionDecl>),
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Match(Box<MatchNode>),
}

/// Statement nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Let {
        name: String,
        init: Option<Expr>,
        is_const: bool,
        is_var: bool,
        ann: Option<String>,
    },
    /// `say expr`, sugar for `show(expr)`.
    Say(Expr),
    Block(Vec<Stmt>),
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    For {
        name: String,
        start: Expr,
        end: Expr,
        step: Option<Expr>,
        body: Vec<Stmt>,
    },
    Loop {
        body: Vec<Stmt>,
    },
    Break(CodeLoc),
    Function(Rc<FunctionDecl>),
    Return(Option<Expr>),
    Throw(Expr),
    TryCatch {
        body: Vec<Stmt>,
        name: String,
        handler: Vec<Stmt>,
    },
    Match(MatchNode),
}

impl Display for Lit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(true) => f.write_str("true"),
            Self::Bool(false) => f.write_str("false"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => f.write_str(ryu::Buffer::new().format(*x)),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}
