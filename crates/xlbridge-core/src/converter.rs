use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::cache::ObjectCache;
use crate::error::ConversionError;
use crate::value::Value;

/// Converts values crossing the host boundary.
///
/// `read` runs on call arguments before user code sees them; `write` runs on
/// the value user code returns.
pub trait Converter: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn read(&self, value: &Value) -> Result<Value, ConversionError>;

    fn write(&self, value: Value) -> Result<Value, ConversionError> {
        Ok(value)
    }
}

pub type ConverterRef = Arc<dyn Converter>;

/// A user-supplied converter together with its range preference.
#[derive(Debug, Clone)]
pub struct CustomConverter {
    pub converter: ConverterRef,
    pub allow_range: bool,
}

impl CustomConverter {
    pub fn new(converter: ConverterRef) -> Self {
        Self {
            converter,
            allow_range: false,
        }
    }

    pub fn allow_range(mut self) -> Self {
        self.allow_range = true;
        self
    }
}

/// Passes values through untouched.
#[derive(Debug)]
pub struct ObjectConverter;

impl Converter for ObjectConverter {
    fn name(&self) -> &str {
        "object"
    }

    fn read(&self, value: &Value) -> Result<Value, ConversionError> {
        Ok(value.clone())
    }
}

#[derive(Debug)]
pub struct IntConverter;

impl Converter for IntConverter {
    fn name(&self) -> &str {
        "int"
    }

    fn read(&self, value: &Value) -> Result<Value, ConversionError> {
        match value {
            Value::Int(_) => Ok(value.clone()),
            Value::Number(n) if n.fract() == 0.0 && n.is_finite() => Ok(Value::Int(*n as i64)),
            Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
            Value::Str(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| ConversionError::mismatch("int", value)),
            _ => Err(ConversionError::mismatch("int", value)),
        }
    }

    fn write(&self, value: Value) -> Result<Value, ConversionError> {
        self.read(&value)
    }
}

#[derive(Debug)]
pub struct FloatConverter;

impl Converter for FloatConverter {
    fn name(&self) -> &str {
        "float"
    }

    fn read(&self, value: &Value) -> Result<Value, ConversionError> {
        match value {
            Value::Number(_) => Ok(value.clone()),
            Value::Int(i) => Ok(Value::Number(*i as f64)),
            Value::Bool(b) => Ok(Value::Number(if *b { 1.0 } else { 0.0 })),
            Value::Str(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| ConversionError::mismatch("float", value)),
            _ => Err(ConversionError::mismatch("float", value)),
        }
    }

    fn write(&self, value: Value) -> Result<Value, ConversionError> {
        self.read(&value)
    }
}

#[derive(Debug)]
pub struct StrConverter;

impl Converter for StrConverter {
    fn name(&self) -> &str {
        "str"
    }

    fn read(&self, value: &Value) -> Result<Value, ConversionError> {
        match value {
            Value::Str(_) => Ok(value.clone()),
            Value::Nil | Value::Missing => Ok(Value::Str(String::new())),
            Value::Bool(_) | Value::Int(_) | Value::Number(_) => Ok(Value::Str(value.to_string())),
            _ => Err(ConversionError::mismatch("str", value)),
        }
    }

    fn write(&self, value: Value) -> Result<Value, ConversionError> {
        self.read(&value)
    }
}

#[derive(Debug)]
pub struct BoolConverter;

impl Converter for BoolConverter {
    fn name(&self) -> &str {
        "bool"
    }

    fn read(&self, value: &Value) -> Result<Value, ConversionError> {
        match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::Int(i) => Ok(Value::Bool(*i != 0)),
            Value::Number(n) => Ok(Value::Bool(*n != 0.0)),
            Value::Str(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Value::Str(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            _ => Err(ConversionError::mismatch("bool", value)),
        }
    }

    fn write(&self, value: Value) -> Result<Value, ConversionError> {
        self.read(&value)
    }
}

/// Swaps cache reference strings for the cached value. Anything that is not
/// a reference string passes through.
#[derive(Debug)]
pub struct CacheReader {
    cache: ObjectCache,
}

impl CacheReader {
    pub fn new(cache: ObjectCache) -> Self {
        Self { cache }
    }
}

impl Converter for CacheReader {
    fn name(&self) -> &str {
        "cache"
    }

    fn read(&self, value: &Value) -> Result<Value, ConversionError> {
        match value {
            Value::Str(s) if ObjectCache::is_reference(s) => self
                .cache
                .get(s)
                .ok_or_else(|| ConversionError::CacheMiss(s.clone())),
            _ => Ok(value.clone()),
        }
    }
}

/// Type names served by the built-in converters.
pub const BUILTIN_TYPES: &[&str] = &["int", "float", "str", "bool", "object", "range"];

/// Lookup tables for converters, keyed by annotation type name.
///
/// Built-ins are installed by [`ConverterRegistry::new`]; user converters
/// and returners are added before functions are declared.
#[derive(Debug)]
pub struct ConverterRegistry {
    builtins: HashMap<String, ConverterRef>,
    custom: HashMap<String, CustomConverter>,
    returners: HashMap<String, ConverterRef>,
    object: ConverterRef,
    cache_reader: ConverterRef,
    cache: ObjectCache,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::with_cache(ObjectCache::new())
    }

    pub fn with_cache(cache: ObjectCache) -> Self {
        let object: ConverterRef = Arc::new(ObjectConverter);
        let mut builtins: HashMap<String, ConverterRef> = HashMap::new();
        builtins.insert("int".into(), Arc::new(IntConverter));
        builtins.insert("float".into(), Arc::new(FloatConverter));
        builtins.insert("str".into(), Arc::new(StrConverter));
        builtins.insert("bool".into(), Arc::new(BoolConverter));
        builtins.insert("object".into(), object.clone());
        builtins.insert("range".into(), object.clone());

        Self {
            builtins,
            custom: HashMap::new(),
            returners: HashMap::new(),
            object,
            cache_reader: Arc::new(CacheReader::new(cache.clone())),
            cache,
        }
    }

    pub fn builtin(&self, type_name: &str) -> Option<ConverterRef> {
        self.builtins.get(type_name).cloned()
    }

    /// Register a custom argument converter for a type name.
    pub fn register_converter(&mut self, type_name: impl Into<String>, converter: CustomConverter) {
        let type_name = type_name.into();
        tracing::debug!(type_name = %type_name, converter = converter.converter.name(), "Registered argument converter");
        self.custom.insert(type_name, converter);
    }

    /// Register a return converter for a type name.
    pub fn register_returner(&mut self, type_name: impl Into<String>, converter: ConverterRef) {
        let type_name = type_name.into();
        tracing::debug!(type_name = %type_name, converter = converter.name(), "Registered return converter");
        self.returners.insert(type_name, converter);
    }

    pub fn custom(&self, type_name: &str) -> Option<&CustomConverter> {
        self.custom.get(type_name)
    }

    pub fn returner(&self, type_name: &str) -> Option<ConverterRef> {
        self.returners.get(type_name).cloned()
    }

    pub fn object(&self) -> ConverterRef {
        self.object.clone()
    }

    pub fn cache_reader(&self) -> ConverterRef {
        self.cache_reader.clone()
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
