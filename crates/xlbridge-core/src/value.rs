use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Spreadsheet error values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellError {
    Null,
    Div0,
    Value,
    Ref,
    Name,
    Num,
    NA,
    GettingData,
}

impl fmt::Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellError::Null => write!(f, "#NULL!"),
            CellError::Div0 => write!(f, "#DIV/0!"),
            CellError::Value => write!(f, "#VALUE!"),
            CellError::Ref => write!(f, "#REF!"),
            CellError::Name => write!(f, "#NAME?"),
            CellError::Num => write!(f, "#NUM!"),
            CellError::NA => write!(f, "#N/A"),
            CellError::GettingData => write!(f, "#GETTING_DATA"),
        }
    }
}

/// A live reference to a worksheet range, passed to `allow_range` arguments
/// instead of the range's converted contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRef {
    pub sheet: Option<String>,
    pub address: String,
}

/// A value crossing the boundary between the host and user code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Argument omitted at the call site.
    Missing,
    /// Empty cell.
    Nil,
    Bool(bool),
    Int(i64),
    Number(f64),
    Str(String),
    Error(CellError),
    /// Row-major two-dimensional array.
    Array(Vec<Vec<Value>>),
    Range(RangeRef),
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// True for values the host treats as "no value": omitted or empty.
    pub fn is_blank(&self) -> bool {
        matches!(self, Value::Missing | Value::Nil)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Short type label used in conversion error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Missing => "missing",
            Value::Nil => "empty",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Number(_) => "float",
            Value::Str(_) => "str",
            Value::Error(_) => "error",
            Value::Array(_) => "array",
            Value::Range(_) => "range",
        }
    }

    /// Builds a two-column key/value table, the shape the host passes to a
    /// keywords argument.
    pub fn table<K, I>(pairs: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Array(
            pairs
                .into_iter()
                .map(|(k, v)| vec![Value::Str(k.into()), v])
                .collect(),
        )
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Missing | Value::Nil => Ok(()),
            Value::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Int(i) => write!(f, "{i}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Error(e) => write!(f, "{e}"),
            Value::Array(rows) => {
                for (i, row) in rows.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    for (j, cell) in row.iter().enumerate() {
                        if j > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{cell}")?;
                    }
                }
                Ok(())
            }
            Value::Range(r) => match &r.sheet {
                Some(sheet) => write!(f, "{sheet}!{}", r.address),
                None => write!(f, "{}", r.address),
            },
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<CellError> for Value {
    fn from(v: CellError) -> Self {
        Value::Error(v)
    }
}

/// Converted arguments for one call of a user function.
///
/// `values` holds the ordered positional arguments; `keywords` is filled from
/// the trailing key/value table when the function declares a keywords
/// parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CallArgs {
    pub values: Vec<Value>,
    pub keywords: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            keywords: BTreeMap::new(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn number(&self, index: usize) -> Option<f64> {
        self.get(index).and_then(Value::as_f64)
    }

    pub fn text(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(Value::as_str)
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keywords.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.keywords.is_empty()
    }
}
