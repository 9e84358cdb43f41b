//! Declared shape of a user function: ordered parameters with kinds,
//! defaults and annotations, plus an optional return annotation.

use crate::converter::{ConverterRef, CustomConverter};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    PositionalOrKeyword,
    VarPositional,
    VarKeyword,
    KeywordOnly,
}

/// What a parameter or return value is annotated with.
#[derive(Debug, Clone)]
pub enum Annotation {
    /// A named type, e.g. `int` or a user type registered with the converter registry.
    Type(String),
    /// Request a live range handle instead of its contents.
    AllowRange,
    /// An explicit converter object.
    Converter(ConverterRef),
    /// An inline custom converter wrapper.
    Custom(CustomConverter),
    /// An annotation that is not a type (a string, a number, ...).
    Expr(String),
}

impl Annotation {
    pub fn of(type_name: impl Into<String>) -> Self {
        Annotation::Type(type_name.into())
    }

    /// Name used for auto-generated help text.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Annotation::Type(name) => Some(name),
            Annotation::Converter(c) => Some(c.name()),
            Annotation::Custom(c) => Some(c.converter.name()),
            Annotation::AllowRange => Some("range"),
            Annotation::Expr(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
    pub default: Option<Value>,
    pub annotation: Option<Annotation>,
}

impl Param {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            annotation: None,
        }
    }

    pub fn positional(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::PositionalOrKeyword)
    }

    pub fn var_positional(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::VarPositional)
    }

    pub fn var_keyword(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::VarKeyword)
    }

    pub fn keyword_only(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::KeywordOnly)
    }

    pub fn typed(mut self, annotation: Annotation) -> Self {
        self.annotation = Some(annotation);
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Signature {
    pub params: Vec<Param>,
    pub returns: Option<Annotation>,
    /// Documentation used as the function help when none is given explicitly.
    pub doc: Option<String>,
}

impl Signature {
    pub fn new(params: impl IntoIterator<Item = Param>) -> Self {
        Self {
            params: params.into_iter().collect(),
            returns: None,
            doc: None,
        }
    }

    pub fn returns(mut self, annotation: Annotation) -> Self {
        self.returns = Some(annotation);
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }
}
