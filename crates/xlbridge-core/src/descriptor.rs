use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::converter::{ConverterRef, ConverterRegistry};
use crate::error::{ConversionError, DeclarationError};
use crate::function::UserFunction;
use crate::resolve::{resolve_arg, resolve_return};
use crate::signature::{Annotation, ParamKind, Signature};
use crate::value::{CallArgs, Value};

fn serialize_converter<S: Serializer>(converter: &Option<ConverterRef>, s: S) -> Result<S::Ok, S::Error> {
    match converter {
        Some(c) => s.serialize_some(c.name()),
        None => s.serialize_none(),
    }
}

/// Metadata for one parameter as the host sees it.
#[derive(Debug, Clone, Serialize)]
pub struct ArgSpec {
    pub name: String,
    pub help: String,
    #[serde(serialize_with = "serialize_converter")]
    pub converter: Option<ConverterRef>,
    pub default: Option<Value>,
    pub allow_range: bool,
    pub is_keywords: bool,
}

impl ArgSpec {
    pub fn is_optional(&self) -> bool {
        self.default.is_some()
    }
}

/// A parameter declaration before converter resolution.
///
/// Built from the signature, or supplied whole through
/// [`ArgOverride::Replace`].
#[derive(Debug, Clone)]
pub struct ArgDecl {
    pub name: String,
    pub help: String,
    pub annotation: Option<Annotation>,
    pub default: Option<Value>,
    pub is_keywords: bool,
}

impl ArgDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: String::new(),
            annotation: None,
            default: None,
            is_keywords: false,
        }
    }

    pub fn keywords(name: impl Into<String>) -> Self {
        Self {
            is_keywords: true,
            ..Self::new(name)
        }
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    pub fn typed(mut self, annotation: Annotation) -> Self {
        self.annotation = Some(annotation);
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    fn into_spec(self, registry: &ConverterRegistry) -> ArgSpec {
        if self.is_keywords {
            return ArgSpec {
                name: self.name,
                help: self.help,
                converter: None,
                default: None,
                allow_range: false,
                is_keywords: true,
            };
        }
        let resolved = resolve_arg(self.annotation.as_ref(), registry);
        ArgSpec {
            name: self.name,
            help: self.help,
            converter: Some(resolved.converter),
            default: self.default,
            allow_range: resolved.allow_range,
            is_keywords: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ArgOverride {
    /// Replace only the help text.
    Help(String),
    /// Replace the whole declaration.
    Replace(ArgDecl),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncKind {
    #[default]
    None,
    Native,
    Rtd,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeatureFlags {
    pub macro_sheet: bool,
    pub command: bool,
    pub threaded: bool,
    pub volatile: bool,
    pub local: bool,
    pub async_kind: AsyncKind,
}

impl FeatureFlags {
    pub const MACRO: u32 = 1;
    pub const COMMAND: u32 = 1 << 1;
    pub const THREADED: u32 = 1 << 2;
    pub const VOLATILE: u32 = 1 << 3;
    pub const LOCAL: u32 = 1 << 4;
    pub const ASYNC_NATIVE: u32 = 1 << 5;
    pub const ASYNC_RTD: u32 = 1 << 6;

    pub fn bits(&self) -> u32 {
        let mut bits = 0;
        if self.macro_sheet {
            bits |= Self::MACRO;
        }
        if self.command {
            bits |= Self::COMMAND;
        }
        if self.threaded {
            bits |= Self::THREADED;
        }
        if self.volatile {
            bits |= Self::VOLATILE;
        }
        if self.local {
            bits |= Self::LOCAL;
        }
        match self.async_kind {
            AsyncKind::None => {}
            AsyncKind::Native => bits |= Self::ASYNC_NATIVE,
            AsyncKind::Rtd => bits |= Self::ASYNC_RTD,
        }
        bits
    }

    pub fn is_async(&self) -> bool {
        self.async_kind != AsyncKind::None
    }
}

/// Declaration options, the knobs a `func` decoration accepts.
#[derive(Debug, Clone)]
pub struct FuncOptions {
    pub name: Option<String>,
    pub help: Option<String>,
    pub args: Vec<(String, ArgOverride)>,
    pub group: Option<String>,
    /// `None` means local when the module is linked to a workbook.
    pub local: Option<bool>,
    /// `Some(false)` selects native async instead of RTD async.
    pub rtd: Option<bool>,
    pub macro_sheet: bool,
    pub command: bool,
    pub threaded: bool,
    pub volatile: bool,
    /// When false the descriptor is built but not queued for registration.
    pub register: bool,
}

impl Default for FuncOptions {
    fn default() -> Self {
        Self {
            name: None,
            help: None,
            args: Vec::new(),
            group: None,
            local: None,
            rtd: None,
            macro_sheet: true,
            command: false,
            threaded: false,
            volatile: false,
            register: true,
        }
    }
}

impl FuncOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn arg_help(mut self, arg: impl Into<String>, help: impl Into<String>) -> Self {
        self.args.push((arg.into(), ArgOverride::Help(help.into())));
        self
    }

    pub fn arg(mut self, decl: ArgDecl) -> Self {
        self.args.push((decl.name.clone(), ArgOverride::Replace(decl)));
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn local(mut self, local: bool) -> Self {
        self.local = Some(local);
        self
    }

    pub fn rtd(mut self, rtd: bool) -> Self {
        self.rtd = Some(rtd);
        self
    }

    pub fn macro_sheet(mut self, macro_sheet: bool) -> Self {
        self.macro_sheet = macro_sheet;
        self
    }

    pub fn command(mut self) -> Self {
        self.command = true;
        self
    }

    pub fn threaded(mut self) -> Self {
        self.threaded = true;
        self
    }

    pub fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    pub fn unregistered(mut self) -> Self {
        self.register = false;
        self
    }
}

/// Everything the host needs to register one function.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionDescriptor {
    pub name: String,
    pub help: String,
    pub category: String,
    pub args: Vec<ArgSpec>,
    pub flags: FeatureFlags,
    #[serde(serialize_with = "serialize_converter")]
    pub return_converter: Option<ConverterRef>,
    #[serde(skip)]
    pub func: UserFunction,
}

impl FunctionDescriptor {
    /// Stable SHA-256 over the serialized metadata.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        hex::encode(Sha256::digest(json.as_bytes()))
    }

    pub fn keywords_arg(&self) -> Option<&ArgSpec> {
        self.args.last().filter(|a| a.is_keywords)
    }

    /// Convert the raw values supplied by the host into call arguments.
    ///
    /// Omitted arguments take their declared default. A trailing keywords
    /// argument must be a two-column key/value table.
    pub fn convert_args(&self, raw: &[Value]) -> Result<CallArgs, ConversionError> {
        if raw.len() > self.args.len() {
            return Err(ConversionError::TooManyArgs {
                expected: self.args.len(),
                got: raw.len(),
            });
        }

        let mut call = CallArgs::default();
        for (i, spec) in self.args.iter().enumerate() {
            let value = raw.get(i).unwrap_or(&Value::Missing);

            if spec.is_keywords {
                call.keywords = keyword_table(&spec.name, value)?;
                continue;
            }

            let converted = match (value, &spec.default, &spec.converter) {
                (Value::Missing, Some(default), _) => default.clone(),
                (Value::Range(_), _, _) if spec.allow_range => value.clone(),
                (_, _, Some(converter)) => converter.read(value).map_err(|e| ConversionError::Argument {
                    arg: spec.name.clone(),
                    source: Box::new(e),
                })?,
                (_, _, None) => value.clone(),
            };
            call.values.push(converted);
        }
        Ok(call)
    }

    pub fn convert_return(&self, value: Value) -> Result<Value, ConversionError> {
        match &self.return_converter {
            Some(converter) => converter.write(value),
            None => Ok(value),
        }
    }
}

fn keyword_table(arg: &str, value: &Value) -> Result<BTreeMap<String, Value>, ConversionError> {
    let rows = match value {
        Value::Missing | Value::Nil => return Ok(BTreeMap::new()),
        Value::Array(rows) => rows,
        _ => return Err(ConversionError::KeywordTable { arg: arg.to_string() }),
    };

    let mut table = BTreeMap::new();
    for row in rows {
        match row.as_slice() {
            [Value::Str(key), value] => {
                table.insert(key.clone(), value.clone());
            }
            // Trailing blank rows are common when the table is a sized range
            [Value::Nil, ..] | [] => {}
            _ => return Err(ConversionError::KeywordTable { arg: arg.to_string() }),
        }
    }
    Ok(table)
}

/// Turn the signature into parameter declarations, with auto help for typed
/// parameters.
fn arg_decls(function: &str, signature: &Signature) -> Result<Vec<ArgDecl>, DeclarationError> {
    let mut decls = Vec::with_capacity(signature.params.len());
    for param in &signature.params {
        if let Some(prev) = decls.last().filter(|d: &&ArgDecl| d.is_keywords) {
            return Err(DeclarationError::MisplacedKeywords {
                function: function.to_string(),
                arg: prev.name.clone(),
            });
        }
        match param.kind {
            ParamKind::PositionalOrKeyword => {
                let help = match &param.annotation {
                    Some(Annotation::Expr(text)) => format!("({text})"),
                    Some(anno) => anno.type_name().map(|n| format!("({n})")).unwrap_or_default(),
                    None => String::new(),
                };
                decls.push(ArgDecl {
                    name: param.name.clone(),
                    help,
                    annotation: param.annotation.clone(),
                    default: param.default.clone(),
                    is_keywords: false,
                });
            }
            ParamKind::VarKeyword => decls.push(ArgDecl::keywords(param.name.clone())),
            ParamKind::VarPositional => {
                return Err(DeclarationError::UnsupportedSignature {
                    function: function.to_string(),
                    reason: format!("variadic positional parameter '{}'", param.name),
                });
            }
            ParamKind::KeywordOnly => {
                return Err(DeclarationError::UnsupportedSignature {
                    function: function.to_string(),
                    reason: format!("keyword-only parameter '{}'", param.name),
                });
            }
        }
    }
    Ok(decls)
}

fn apply_overrides(
    function: &str,
    mut decls: Vec<ArgDecl>,
    overrides: &[(String, ArgOverride)],
) -> Result<Vec<ArgDecl>, DeclarationError> {
    for (name, arg_override) in overrides {
        let Some(decl) = decls.iter_mut().find(|d| &d.name == name) else {
            return Err(DeclarationError::UnknownArgOverride {
                function: function.to_string(),
                arg: name.clone(),
            });
        };
        match arg_override {
            ArgOverride::Help(help) => decl.help = help.clone(),
            ArgOverride::Replace(replacement) => *decl = replacement.clone(),
        }
    }
    Ok(decls)
}

fn feature_flags(
    function: &str,
    is_async: bool,
    returns_value: bool,
    options: &FuncOptions,
) -> Result<FeatureFlags, DeclarationError> {
    let mut flags = FeatureFlags {
        volatile: options.volatile,
        ..FeatureFlags::default()
    };
    let mut local = true;

    if options.threaded {
        flags.threaded = true;
        local = false;
    }

    if is_async {
        if options.command {
            return Err(DeclarationError::AsyncCommand {
                function: function.to_string(),
            });
        }
        flags.async_kind = if options.rtd == Some(false) {
            AsyncKind::Native
        } else {
            AsyncKind::Rtd
        };
        local = false;
    }

    if options.command {
        if returns_value {
            return Err(DeclarationError::CommandReturnsValue {
                function: function.to_string(),
            });
        }
        flags.command = true;
        local = false;
    }

    if options.local == Some(true) && !local {
        return Err(DeclarationError::LocalConflict {
            function: function.to_string(),
        });
    }

    flags.local = local && options.local != Some(false);
    flags.macro_sheet = options.macro_sheet && !flags.threaded && !flags.command && !flags.is_async();
    Ok(flags)
}

/// Build the descriptor for `func` declared as `name` with `signature`.
pub fn build_descriptor(
    name: &str,
    func: &UserFunction,
    signature: &Signature,
    options: &FuncOptions,
    registry: &ConverterRegistry,
) -> Result<FunctionDescriptor, DeclarationError> {
    let decls = arg_decls(name, signature)?;
    let decls = apply_overrides(name, decls, &options.args)?;
    if let Some(pos) = decls.iter().position(|d| d.is_keywords)
        && pos + 1 != decls.len()
    {
        return Err(DeclarationError::MisplacedKeywords {
            function: name.to_string(),
            arg: decls[pos].name.clone(),
        });
    }

    let flags = feature_flags(name, func.is_async(), signature.returns.is_some(), options)?;
    let args = decls.into_iter().map(|d| d.into_spec(registry)).collect();
    let return_converter = resolve_return(signature.returns.as_ref(), registry);

    let descriptor = FunctionDescriptor {
        name: options.name.clone().unwrap_or_else(|| name.to_string()),
        help: options
            .help
            .clone()
            .or_else(|| signature.doc.clone())
            .unwrap_or_default(),
        category: options.group.clone().unwrap_or_default(),
        args,
        flags,
        return_converter,
        func: func.clone(),
    };

    tracing::debug!(
        function = %descriptor.name,
        args = descriptor.args.len(),
        flags = descriptor.flags.bits(),
        kind = func.kind(),
        "Built function descriptor"
    );
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::converter::FloatConverter;
    use crate::signature::Param;
    use crate::value::RangeRef;

    fn plain() -> UserFunction {
        UserFunction::plain(|_| Ok(Value::Nil))
    }

    fn coroutine() -> UserFunction {
        UserFunction::coroutine(|_| async { Ok(Value::Nil) })
    }

    fn build(sig: &Signature, options: &FuncOptions) -> Result<FunctionDescriptor, DeclarationError> {
        build_descriptor("f", &plain(), sig, options, &ConverterRegistry::new())
    }

    #[test]
    fn typed_params_get_auto_help_and_converters() {
        let sig = Signature::new([
            Param::positional("x").typed(Annotation::of("int")),
            Param::positional("y").with_default(2.5),
            Param::positional("z").typed(Annotation::Expr("'note'".into())),
        ]);
        let d = build(&sig, &FuncOptions::new()).unwrap();
        assert_eq!(d.args.len(), 3);
        assert_eq!(d.args[0].help, "(int)");
        assert_eq!(d.args[0].converter.as_ref().unwrap().name(), "int");
        assert!(!d.args[0].is_optional());
        assert_eq!(d.args[1].help, "");
        assert_eq!(d.args[1].default, Some(Value::Number(2.5)));
        assert!(d.args[1].is_optional());
        assert_eq!(d.args[2].help, "('note')");
        assert_eq!(d.args[2].converter.as_ref().unwrap().name(), "object");
        assert!(d.return_converter.is_none());
    }

    #[test]
    fn variadic_positional_is_rejected() {
        let sig = Signature::new([Param::positional("a"), Param::var_positional("rest")]);
        let err = build(&sig, &FuncOptions::new()).unwrap_err();
        assert!(matches!(err, DeclarationError::UnsupportedSignature { .. }));
        assert!(err.to_string().contains("rest"));
    }

    #[test]
    fn keyword_only_is_rejected() {
        let sig = Signature::new([Param::keyword_only("k")]);
        assert!(matches!(
            build(&sig, &FuncOptions::new()),
            Err(DeclarationError::UnsupportedSignature { .. })
        ));
    }

    #[test]
    fn keywords_param_must_be_last() {
        let sig = Signature::new([Param::var_keyword("kw"), Param::positional("a")]);
        assert!(matches!(
            build(&sig, &FuncOptions::new()),
            Err(DeclarationError::MisplacedKeywords { .. })
        ));

        let sig = Signature::new([Param::positional("a"), Param::var_keyword("kw")]);
        let d = build(&sig, &FuncOptions::new()).unwrap();
        let kw = d.keywords_arg().unwrap();
        assert_eq!(kw.name, "kw");
        assert!(kw.converter.is_none());
    }

    #[test]
    fn partial_overrides_leave_other_params_untouched() {
        let sig = Signature::new([
            Param::positional("a").typed(Annotation::of("int")),
            Param::positional("b").typed(Annotation::of("str")).with_default("hi"),
            Param::positional("c").typed(Annotation::of("float")),
        ]);
        let options = FuncOptions::new()
            .arg_help("a", "first value")
            .arg(ArgDecl::new("c").help("scale").typed(Annotation::of("bool")));
        let d = build(&sig, &options).unwrap();

        assert_eq!(d.args[0].help, "first value");
        assert_eq!(d.args[0].converter.as_ref().unwrap().name(), "int");

        assert_eq!(d.args[1].help, "(str)");
        assert_eq!(d.args[1].default, Some(Value::Str("hi".into())));
        assert_eq!(d.args[1].converter.as_ref().unwrap().name(), "str");

        assert_eq!(d.args[2].help, "scale");
        assert_eq!(d.args[2].converter.as_ref().unwrap().name(), "bool");
    }

    #[test]
    fn override_for_unknown_param_is_an_error() {
        let sig = Signature::new([Param::positional("a")]);
        let err = build(&sig, &FuncOptions::new().arg_help("nope", "x")).unwrap_err();
        assert!(matches!(err, DeclarationError::UnknownArgOverride { ref arg, .. } if arg == "nope"));
    }

    #[test]
    fn options_set_identity() {
        let sig = Signature::new([]).doc("Adds things");
        let d = build(&sig, &FuncOptions::new().name("MyAdd").group("Maths")).unwrap();
        assert_eq!(d.name, "MyAdd");
        assert_eq!(d.help, "Adds things");
        assert_eq!(d.category, "Maths");

        let d = build(&sig, &FuncOptions::new().help("explicit")).unwrap();
        assert_eq!(d.name, "f");
        assert_eq!(d.help, "explicit");
    }

    #[test]
    fn plain_function_defaults_to_local_macro() {
        let d = build(&Signature::default(), &FuncOptions::new()).unwrap();
        assert!(d.flags.local);
        assert!(d.flags.macro_sheet);
        assert_eq!(d.flags.async_kind, AsyncKind::None);
        assert_eq!(d.flags.bits(), FeatureFlags::MACRO | FeatureFlags::LOCAL);
    }

    #[test]
    fn threaded_is_not_local_and_not_macro() {
        let d = build(&Signature::default(), &FuncOptions::new().threaded()).unwrap();
        assert!(d.flags.threaded);
        assert!(!d.flags.local);
        assert!(!d.flags.macro_sheet);

        let err = build(&Signature::default(), &FuncOptions::new().threaded().local(true)).unwrap_err();
        assert!(matches!(err, DeclarationError::LocalConflict { .. }));
    }

    #[test]
    fn async_kind_follows_rtd_option() {
        let registry = ConverterRegistry::new();
        let sig = Signature::default();
        let d = build_descriptor("f", &coroutine(), &sig, &FuncOptions::new(), &registry).unwrap();
        assert_eq!(d.flags.async_kind, AsyncKind::Rtd);
        assert!(!d.flags.local);
        assert!(!d.flags.macro_sheet);

        let d = build_descriptor("f", &coroutine(), &sig, &FuncOptions::new().rtd(false), &registry).unwrap();
        assert_eq!(d.flags.async_kind, AsyncKind::Native);
        assert_eq!(d.flags.bits() & FeatureFlags::ASYNC_NATIVE, FeatureFlags::ASYNC_NATIVE);

        let err = build_descriptor("f", &coroutine(), &sig, &FuncOptions::new().local(true), &registry).unwrap_err();
        assert!(matches!(err, DeclarationError::LocalConflict { .. }));
    }

    #[test]
    fn command_rules() {
        let registry = ConverterRegistry::new();
        let d = build(&Signature::default(), &FuncOptions::new().command()).unwrap();
        assert!(d.flags.command);
        assert!(!d.flags.local);

        let sig = Signature::default().returns(Annotation::of("int"));
        assert!(matches!(
            build(&sig, &FuncOptions::new().command()),
            Err(DeclarationError::CommandReturnsValue { .. })
        ));

        assert!(matches!(
            build_descriptor("f", &coroutine(), &Signature::default(), &FuncOptions::new().command(), &registry),
            Err(DeclarationError::AsyncCommand { .. })
        ));
    }

    #[test]
    fn local_false_opts_out() {
        let d = build(&Signature::default(), &FuncOptions::new().local(false)).unwrap();
        assert!(!d.flags.local);
    }

    #[test]
    fn fingerprint_is_stable_and_sensitive() {
        let sig = Signature::new([Param::positional("x").typed(Annotation::of("int"))]);
        let a = build(&sig, &FuncOptions::new()).unwrap();
        let b = build(&sig, &FuncOptions::new()).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        let c = build(&sig, &FuncOptions::new().volatile()).unwrap();
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn convert_args_applies_defaults_and_converters() {
        let sig = Signature::new([
            Param::positional("n").typed(Annotation::of("int")),
            Param::positional("scale").typed(Annotation::of("float")).with_default(1.0),
            Param::positional("kw").typed(Annotation::Expr("unused".into())),
            Param::var_keyword("opts"),
        ]);
        let d = build(&sig, &FuncOptions::new()).unwrap();

        let call = d
            .convert_args(&[
                Value::Number(4.0),
                Value::Missing,
                Value::Nil,
                Value::table([("mode", Value::Str("fast".into()))]),
            ])
            .unwrap();
        assert_eq!(call.values, vec![Value::Int(4), Value::Number(1.0), Value::Nil]);
        assert_eq!(call.keyword("mode"), Some(&Value::Str("fast".into())));

        let call = d.convert_args(&[Value::Int(1)]).unwrap();
        assert_eq!(call.values.len(), 3);
        assert!(call.keywords.is_empty());
    }

    #[test]
    fn convert_args_reports_argument_name() {
        let sig = Signature::new([Param::positional("n").typed(Annotation::of("int"))]);
        let d = build(&sig, &FuncOptions::new()).unwrap();
        let err = d.convert_args(&[Value::Str("abc".into())]).unwrap_err();
        assert!(matches!(err, ConversionError::Argument { ref arg, .. } if arg == "n"));
        assert!(err.to_string().contains("expected int"));

        let err = d.convert_args(&[Value::Int(1), Value::Int(2)]).unwrap_err();
        assert_eq!(err, ConversionError::TooManyArgs { expected: 1, got: 2 });
    }

    #[test]
    fn convert_args_rejects_bad_keyword_table() {
        let sig = Signature::new([Param::var_keyword("opts")]);
        let d = build(&sig, &FuncOptions::new()).unwrap();
        let bad = Value::Array(vec![vec![Value::Int(1), Value::Int(2)]]);
        assert!(matches!(
            d.convert_args(&[bad]),
            Err(ConversionError::KeywordTable { .. })
        ));
        assert!(matches!(
            d.convert_args(&[Value::Int(3)]),
            Err(ConversionError::KeywordTable { .. })
        ));
    }

    #[test]
    fn keyword_table_rows_have_two_columns() {
        let sig = Signature::new([Param::var_keyword("opts")]);
        let d = build(&sig, &FuncOptions::new()).unwrap();
        let wide = Value::Array(vec![vec![
            Value::Str("scale".into()),
            Value::Int(2),
            Value::Int(3),
        ]]);
        assert_eq!(
            d.convert_args(&[wide]).unwrap_err(),
            ConversionError::KeywordTable { arg: "opts".into() }
        );

        let ok = Value::Array(vec![vec![Value::Str("scale".into()), Value::Int(2)], vec![Value::Nil]]);
        let call = d.convert_args(&[ok]).unwrap();
        assert_eq!(call.keywords.get("scale"), Some(&Value::Int(2)));
    }

    #[test]
    fn range_args_pass_through_when_allowed() {
        let sig = Signature::new([
            Param::positional("r").typed(Annotation::AllowRange),
            Param::positional("f").typed(Annotation::Converter(Arc::new(FloatConverter))),
        ]);
        let d = build(&sig, &FuncOptions::new()).unwrap();
        assert!(d.args[0].allow_range);
        let range = Value::Range(RangeRef {
            sheet: Some("Sheet1".into()),
            address: "A1:B2".into(),
        });
        let call = d.convert_args(&[range.clone(), Value::Int(2)]).unwrap();
        assert_eq!(call.values, vec![range, Value::Number(2.0)]);
    }

    #[test]
    fn return_conversion() {
        let sig = Signature::default().returns(Annotation::of("float"));
        let d = build(&sig, &FuncOptions::new()).unwrap();
        assert_eq!(d.convert_return(Value::Int(3)).unwrap(), Value::Number(3.0));

        let d = build(&Signature::default(), &FuncOptions::new()).unwrap();
        assert_eq!(d.convert_return(Value::Int(3)).unwrap(), Value::Int(3));
    }
}
