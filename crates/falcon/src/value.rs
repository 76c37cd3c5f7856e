//! Runtime value model shared by the bytecode VM and the tree interpreter.
//!
//! [`Value`] is a tagged union. Scalars are stored inline; collections are
//! reference-counted (`Rc<RefCell<...>>`) so that clones are cheap handles
//! and mutation is visible through every alias, matching the semantics of
//! the language's collection types.

use std::{cell::RefCell, cmp::Ordering, fmt, rc::Rc};

use indexmap::{IndexMap, IndexSet};

use crate::{
    ast::FunctionDecl,
    builtins::{promise::PromiseState, MethodKind, NativeFn},
    env::EnvRef,
    error::{FalconError, RunResult},
};

/// Primary value type representing Falcon values at runtime.
///
/// Numeric promotion: `int op int -> int` except `/`, which always yields
/// `Float`; any `Float` operand promotes the result to `Float`; `+` with a
/// `Str` operand coerces both sides through the canonical string conversion.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<IndexMap<String, Value>>>),
    Set(Rc<RefCell<IndexSet<SetKey>>>),
    /// Fixed-size array created with `array[N]`; the slot vector never
    /// changes length after allocation.
    Array(Rc<RefCell<Vec<Value>>>),
    Function(Rc<FunctionValue>),
    /// Builtin function referenced by name in the globals.
    Native(NativeFn),
    /// A builtin method bound to its receiver (e.g. `xs.length`).
    Bound(Rc<BoundMethod>),
    Promise(Rc<RefCell<PromiseState>>),
    /// Attribute map object (e.g. the `console` global).
    Object(Rc<RefCell<IndexMap<String, Value>>>),
}

/// The two function shapes of the hybrid execution strategy.
#[derive(Debug)]
pub enum FunctionValue {
    /// Compiled function with no free variables; runs on the VM.
    Code { code: Rc<crate::bytecode::Code> },
    /// Function kept as AST because it captures outer bindings; runs on the
    /// tree interpreter with the environment of its definition site.
    Ast { decl: Rc<FunctionDecl>, closure: EnvRef },
}

impl FunctionValue {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Code { code } => code.name(),
            Self::Ast { decl, .. } => decl.display_name(),
        }
    }
}

/// A builtin method bound to the value it was accessed on.
#[derive(Debug)]
pub struct BoundMethod {
    pub recv: Value,
    pub method: MethodKind,
}

/// Hashable key used for `Set` storage.
///
/// Only scalar values are hashable; an integral float normalizes to its
/// integer key so `set{1}` and `set{1.0}` agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SetKey {
    Null,
    Bool(bool),
    Int(i64),
    /// Raw bits of a non-integral float.
    Float(u64),
    Str(Rc<str>),
}

impl SetKey {
    /// Converts a value to its set key, rejecting unhashable kinds.
    pub fn try_from_value(value: &Value) -> RunResult<Self> {
        match value {
            Value::Null => Ok(Self::Null),
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Int(n) => Ok(Self::Int(*n)),
            Value::Float(x) => {
                if x.fract() == 0.0 && x.is_finite() && (i64::MIN as f64..=i64::MAX as f64).contains(x) {
                    Ok(Self::Int(*x as i64))
                } else {
                    Ok(Self::Float(x.to_bits()))
                }
            }
            Value::Str(s) => Ok(Self::Str(Rc::clone(s))),
            other => Err(FalconError::runtime(format!(
                "unhashable value of type {} in set",
                other.kind_name()
            ))),
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(n) => Value::Int(*n),
            Self::Float(bits) => Value::Float(f64::from_bits(*bits)),
            Self::Str(s) => Value::Str(Rc::clone(s)),
        }
    }
}

impl Value {
    #[must_use]
    pub fn str(text: impl Into<Rc<str>>) -> Self {
        Self::Str(text.into())
    }

    #[must_use]
    pub fn list(items: Vec<Self>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    #[must_use]
    pub fn tuple(items: Vec<Self>) -> Self {
        Self::Tuple(Rc::new(items))
    }

    #[must_use]
    pub fn dict(entries: IndexMap<String, Self>) -> Self {
        Self::Dict(Rc::new(RefCell::new(entries)))
    }

    #[must_use]
    pub fn object(entries: IndexMap<String, Self>) -> Self {
        Self::Object(Rc::new(RefCell::new(entries)))
    }

    pub fn set_from(items: impl IntoIterator<Item = Self>) -> RunResult<Self> {
        let mut storage = IndexSet::new();
        for item in items {
            storage.insert(SetKey::try_from_value(&item)?);
        }
        Ok(Self::Set(Rc::new(RefCell::new(storage))))
    }

    /// Allocates an `array[N]` value with every slot set to `null`.
    pub fn fixed_array(size: i64) -> RunResult<Self> {
        if size < 0 {
            return Err(FalconError::runtime("array size must not be negative"));
        }
        let size = usize::try_from(size).map_err(|_| FalconError::runtime("array size is too large"))?;
        Ok(Self::Array(Rc::new(RefCell::new(vec![Self::Null; size]))))
    }

    /// The `typeOf` builtin mapping.
    #[must_use]
    pub fn type_of(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) | Self::Float(_) => "number",
            Self::Str(_) => "string",
            Self::List(_) => "array",
            Self::Function(_) | Self::Native(_) | Self::Bound(_) => "function",
            Self::Tuple(_) | Self::Dict(_) | Self::Set(_) | Self::Array(_) | Self::Promise(_) | Self::Object(_) => {
                "object"
            }
        }
    }

    /// Fine-grained kind name used in error messages and annotation checks.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Set(_) => "set",
            Self::Array(_) => "array",
            Self::Function(_) | Self::Native(_) | Self::Bound(_) => "function",
            Self::Promise(_) => "promise",
            Self::Object(_) => "object",
        }
    }

    /// Truthiness used by every conditional context.
    ///
    /// The falsy set is exactly `null`, `false`, `0`, `0.0`, `""`, `[]`,
    /// `()`, `{}` and `set{}`; everything else is truthy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Float(x) => *x != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.borrow().is_empty(),
            Self::Tuple(items) => !items.is_empty(),
            Self::Dict(entries) => !entries.borrow().is_empty(),
            Self::Set(items) => !items.borrow().is_empty(),
            Self::Array(_) | Self::Function(_) | Self::Native(_) | Self::Bound(_) | Self::Promise(_)
            | Self::Object(_) => true,
        }
    }

    /// Structural equality.
    ///
    /// Numbers compare across `Int`/`Float`; collections compare
    /// element-wise; functions, promises and objects compare by identity.
    #[must_use]
    pub fn falcon_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.falcon_eq(y))
            }
            (Self::Tuple(a), Self::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.falcon_eq(y))
            }
            (Self::Array(a), Self::Array(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.falcon_eq(y))
            }
            (Self::Dict(a), Self::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter()
                        .all(|(key, value)| b.get(key).is_some_and(|other| value.falcon_eq(other)))
            }
            (Self::Set(a), Self::Set(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().all(|key| b.contains(key))
            }
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Native(a), Self::Native(b)) => a == b,
            (Self::Bound(a), Self::Bound(b)) => Rc::ptr_eq(a, b),
            (Self::Promise(a), Self::Promise(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Ordering for `<`/`<=`/`>`/`>=`.
    ///
    /// Defined for number/number and string/string pairs; `None` is only
    /// produced by NaN operands (all comparisons false, as in the source
    /// language).
    pub fn partial_cmp_values(&self, other: &Self) -> RunResult<Option<Ordering>> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Ok(Some(a.cmp(b))),
            (Self::Str(a), Self::Str(b)) => Ok(Some(a.cmp(b))),
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => Ok(a.partial_cmp(&b)),
                _ => Err(FalconError::runtime(format!(
                    "cannot compare {} with {}",
                    self.kind_name(),
                    other.kind_name()
                ))),
            },
        }
    }

    /// Numeric view of `Int`/`Float` operands.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// Expects an `Int`, for indices and sizes.
    pub fn expect_int(&self, what: &str) -> RunResult<i64> {
        match self {
            Self::Int(n) => Ok(*n),
            other => Err(FalconError::runtime(format!(
                "{what} must be an integer, got {}",
                other.kind_name()
            ))),
        }
    }

    /// `+`: string coercion wins, then numeric promotion, then list
    /// concatenation.
    pub fn add(&self, rhs: &Self) -> RunResult<Self> {
        match (self, rhs) {
            (Self::Str(_), _) | (_, Self::Str(_)) => {
                let mut text = self.to_display_string();
                text.push_str(&rhs.to_display_string());
                Ok(Self::str(text))
            }
            (Self::Int(a), Self::Int(b)) => a
                .checked_add(*b)
                .map(Self::Int)
                .ok_or_else(|| FalconError::runtime("integer overflow in '+'")),
            (Self::List(a), Self::List(b)) => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                Ok(Self::list(items))
            }
            _ => self.numeric_binary(rhs, "+", |a, b| a + b),
        }
    }

    pub fn sub(&self, rhs: &Self) -> RunResult<Self> {
        if let (Self::Int(a), Self::Int(b)) = (self, rhs) {
            return a
                .checked_sub(*b)
                .map(Self::Int)
                .ok_or_else(|| FalconError::runtime("integer overflow in '-'"));
        }
        self.numeric_binary(rhs, "-", |a, b| a - b)
    }

    pub fn mul(&self, rhs: &Self) -> RunResult<Self> {
        if let (Self::Int(a), Self::Int(b)) = (self, rhs) {
            return a
                .checked_mul(*b)
                .map(Self::Int)
                .ok_or_else(|| FalconError::runtime("integer overflow in '*'"));
        }
        self.numeric_binary(rhs, "*", |a, b| a * b)
    }

    /// `/` always produces a float, even for two integer operands.
    pub fn div(&self, rhs: &Self) -> RunResult<Self> {
        let (a, b) = self.numeric_operands(rhs, "/")?;
        if b == 0.0 {
            return Err(FalconError::runtime("division by zero"));
        }
        Ok(Self::Float(a / b))
    }

    /// `%` with the sign of the divisor, as in the source language.
    pub fn modulo(&self, rhs: &Self) -> RunResult<Self> {
        match (self, rhs) {
            (Self::Int(a), Self::Int(b)) => {
                if *b == 0 {
                    return Err(FalconError::runtime("modulo by zero"));
                }
                if *b == -1 {
                    // avoids i64::MIN % -1 overflow
                    return Ok(Self::Int(0));
                }
                Ok(Self::Int(((a % b) + b) % b))
            }
            _ => {
                let (a, b) = self.numeric_operands(rhs, "%")?;
                if b == 0.0 {
                    return Err(FalconError::runtime("modulo by zero"));
                }
                Ok(Self::Float(a - b * (a / b).floor()))
            }
        }
    }

    /// `**`: integer result for non-negative integer exponents, float
    /// otherwise.
    pub fn pow(&self, rhs: &Self) -> RunResult<Self> {
        match (self, rhs) {
            (Self::Int(a), Self::Int(b)) if *b >= 0 => {
                let exp = u32::try_from(*b).map_err(|_| FalconError::runtime("exponent is too large"))?;
                a.checked_pow(exp)
                    .map(Self::Int)
                    .ok_or_else(|| FalconError::runtime("integer overflow in '**'"))
            }
            _ => {
                let (a, b) = self.numeric_operands(rhs, "**")?;
                Ok(Self::Float(a.powf(b)))
            }
        }
    }

    pub fn negate(&self) -> RunResult<Self> {
        match self {
            Self::Int(n) => n
                .checked_neg()
                .map(Self::Int)
                .ok_or_else(|| FalconError::runtime("integer overflow in unary '-'")),
            Self::Float(x) => Ok(Self::Float(-x)),
            other => Err(FalconError::runtime(format!(
                "unary '-' expects a number, got {}",
                other.kind_name()
            ))),
        }
    }

    fn numeric_operands(&self, rhs: &Self, op: &str) -> RunResult<(f64, f64)> {
        match (self.as_number(), rhs.as_number()) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(FalconError::runtime(format!(
                "operator '{op}' requires numbers, got {} and {}",
                self.kind_name(),
                rhs.kind_name()
            ))),
        }
    }

    fn numeric_binary(&self, rhs: &Self, op: &str, f: impl Fn(f64, f64) -> f64) -> RunResult<Self> {
        let (a, b) = self.numeric_operands(rhs, op)?;
        Ok(Self::Float(f(a, b)))
    }

    /// Canonical string conversion used by `toString`, `show`, and `+`
    /// string coercion: `null`, `true`/`false`, base-10 numbers, strings
    /// unchanged, JSON for collections, and a debug repr for the rest.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Null => "null".to_owned(),
            Self::Bool(true) => "true".to_owned(),
            Self::Bool(false) => "false".to_owned(),
            Self::Int(n) => n.to_string(),
            Self::Float(x) => ryu::Buffer::new().format(*x).to_owned(),
            Self::Str(s) => s.to_string(),
            other => match other.to_json() {
                Some(json) => json.to_string(),
                None => other.to_repr_string(),
            },
        }
    }

    /// JSON view of the value, `None` when any part has no JSON form.
    #[must_use]
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            Self::Null => Some(serde_json::Value::Null),
            Self::Bool(b) => Some(serde_json::Value::Bool(*b)),
            Self::Int(n) => Some(serde_json::Value::from(*n)),
            Self::Float(x) => serde_json::Number::from_f64(*x).map(serde_json::Value::Number),
            Self::Str(s) => Some(serde_json::Value::from(s.as_ref())),
            Self::List(items) => items.borrow().iter().map(Self::to_json).collect::<Option<Vec<_>>>().map(Into::into),
            Self::Tuple(items) => items.iter().map(Self::to_json).collect::<Option<Vec<_>>>().map(Into::into),
            Self::Dict(entries) => {
                let entries = entries.borrow();
                let mut map = serde_json::Map::with_capacity(entries.len());
                for (key, value) in entries.iter() {
                    map.insert(key.clone(), value.to_json()?);
                }
                Some(serde_json::Value::Object(map))
            }
            _ => None,
        }
    }

    /// Debug repr used where the JSON coercion does not apply.
    #[must_use]
    pub fn to_repr_string(&self) -> String {
        match self {
            Self::Str(s) => format!("{s:?}"),
            Self::Set(items) => {
                let items = items.borrow();
                let parts: Vec<String> = items.iter().map(|key| key.to_value().to_repr_string()).collect();
                format!("set{{{}}}", parts.join(", "))
            }
            Self::Array(slots) => {
                let slots = slots.borrow();
                let parts: Vec<String> = slots.iter().map(Self::to_repr_string).collect();
                format!("array[{}][{}]", slots.len(), parts.join(", "))
            }
            Self::List(items) => {
                let parts: Vec<String> = items.borrow().iter().map(Self::to_repr_string).collect();
                format!("[{}]", parts.join(", "))
            }
            Self::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(Self::to_repr_string).collect();
                format!("({})", parts.join(", "))
            }
            Self::Dict(entries) | Self::Object(entries) => {
                let parts: Vec<String> = entries
                    .borrow()
                    .iter()
                    .map(|(key, value)| format!("{key:?}: {}", value.to_repr_string()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Self::Function(f) => {
                if f.name() == "<anon>" {
                    "<function>".to_owned()
                } else {
                    format!("<function {}>", f.name())
                }
            }
            Self::Native(f) => format!("<builtin {f}>"),
            Self::Bound(b) => format!("<method {}>", b.method),
            Self::Promise(_) => "<Promise>".to_owned(),
            other => other.to_display_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}
