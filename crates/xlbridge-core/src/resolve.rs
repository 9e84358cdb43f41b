use crate::converter::{ConverterRef, ConverterRegistry};
use crate::signature::Annotation;

/// Converter chosen for one argument.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub converter: ConverterRef,
    pub allow_range: bool,
}

impl Resolved {
    fn plain(converter: ConverterRef) -> Self {
        Self {
            converter,
            allow_range: false,
        }
    }
}

/// A single step of the argument-converter cascade.
///
/// Each layer either claims the annotation (short-circuiting the cascade) or
/// returns `None` to pass it to the next layer.
pub trait ResolveLayer: Send + Sync {
    fn name(&self) -> &str;

    fn resolve(&self, annotation: &Annotation, registry: &ConverterRegistry) -> Option<Resolved>;
}

/// An explicit converter object is used as given.
pub struct ExplicitLayer;

impl ResolveLayer for ExplicitLayer {
    fn name(&self) -> &str {
        "explicit"
    }

    fn resolve(&self, annotation: &Annotation, _registry: &ConverterRegistry) -> Option<Resolved> {
        match annotation {
            Annotation::Converter(c) => Some(Resolved::plain(c.clone())),
            _ => None,
        }
    }
}

/// Built-in converters keyed by type name. `range` additionally asks for a
/// live range handle.
pub struct BuiltinLayer;

impl ResolveLayer for BuiltinLayer {
    fn name(&self) -> &str {
        "builtin"
    }

    fn resolve(&self, annotation: &Annotation, registry: &ConverterRegistry) -> Option<Resolved> {
        let Annotation::Type(name) = annotation else {
            return None;
        };
        registry.builtin(name).map(|converter| Resolved {
            converter,
            allow_range: name == "range",
        })
    }
}

pub struct AllowRangeLayer;

impl ResolveLayer for AllowRangeLayer {
    fn name(&self) -> &str {
        "allow_range"
    }

    fn resolve(&self, annotation: &Annotation, registry: &ConverterRegistry) -> Option<Resolved> {
        match annotation {
            Annotation::AllowRange => Some(Resolved {
                converter: registry.object(),
                allow_range: true,
            }),
            _ => None,
        }
    }
}

/// Custom converter wrappers, inline or registered under the type name.
pub struct CustomLayer;

impl ResolveLayer for CustomLayer {
    fn name(&self) -> &str {
        "custom"
    }

    fn resolve(&self, annotation: &Annotation, registry: &ConverterRegistry) -> Option<Resolved> {
        let custom = match annotation {
            Annotation::Custom(c) => c,
            Annotation::Type(name) => registry.custom(name)?,
            _ => return None,
        };
        Some(Resolved {
            converter: custom.converter.clone(),
            allow_range: custom.allow_range,
        })
    }
}

/// Any remaining type is assumed to arrive as a cache reference.
pub struct CacheFallbackLayer;

impl ResolveLayer for CacheFallbackLayer {
    fn name(&self) -> &str {
        "cache"
    }

    fn resolve(&self, annotation: &Annotation, registry: &ConverterRegistry) -> Option<Resolved> {
        match annotation {
            Annotation::Type(_) => Some(Resolved::plain(registry.cache_reader())),
            _ => None,
        }
    }
}

const ARG_LAYERS: &[&dyn ResolveLayer] = &[
    &ExplicitLayer,
    &BuiltinLayer,
    &AllowRangeLayer,
    &CustomLayer,
    &CacheFallbackLayer,
];

/// Pick the argument converter for an annotation.
///
/// Missing and non-type annotations get the generic object converter.
pub fn resolve_arg(annotation: Option<&Annotation>, registry: &ConverterRegistry) -> Resolved {
    let Some(annotation) = annotation else {
        return Resolved::plain(registry.object());
    };

    for layer in ARG_LAYERS {
        if let Some(resolved) = layer.resolve(annotation, registry) {
            tracing::trace!(
                layer = layer.name(),
                converter = resolved.converter.name(),
                allow_range = resolved.allow_range,
                "Resolved argument converter"
            );
            return resolved;
        }
    }

    Resolved::plain(registry.object())
}

/// Pick the return converter for an annotation.
///
/// Order: custom wrapper, registered returner, built-in, generic object.
/// Missing and non-type annotations mean the value is returned as-is.
pub fn resolve_return(annotation: Option<&Annotation>, registry: &ConverterRegistry) -> Option<ConverterRef> {
    match annotation? {
        Annotation::Custom(c) => Some(c.converter.clone()),
        Annotation::Converter(c) => Some(c.clone()),
        Annotation::Type(name) => Some(
            registry
                .returner(name)
                .or_else(|| registry.builtin(name))
                .unwrap_or_else(|| registry.object()),
        ),
        Annotation::AllowRange => Some(registry.object()),
        Annotation::Expr(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::converter::{CustomConverter, FloatConverter, IntConverter, StrConverter};

    #[test]
    fn missing_and_expr_annotations_use_object() {
        let registry = ConverterRegistry::new();
        let r = resolve_arg(None, &registry);
        assert_eq!(r.converter.name(), "object");
        assert!(!r.allow_range);

        let r = resolve_arg(Some(&Annotation::Expr("'a note'".into())), &registry);
        assert_eq!(r.converter.name(), "object");
    }

    #[test]
    fn explicit_converter_wins() {
        let registry = ConverterRegistry::new();
        let r = resolve_arg(Some(&Annotation::Converter(Arc::new(FloatConverter))), &registry);
        assert_eq!(r.converter.name(), "float");
    }

    #[test]
    fn builtin_by_type_name() {
        let registry = ConverterRegistry::new();
        let r = resolve_arg(Some(&Annotation::of("int")), &registry);
        assert_eq!(r.converter.name(), "int");
        assert!(!r.allow_range);

        let r = resolve_arg(Some(&Annotation::of("range")), &registry);
        assert!(r.allow_range);
    }

    #[test]
    fn allow_range_marker() {
        let registry = ConverterRegistry::new();
        let r = resolve_arg(Some(&Annotation::AllowRange), &registry);
        assert_eq!(r.converter.name(), "object");
        assert!(r.allow_range);
    }

    #[test]
    fn builtin_shadows_registered_custom() {
        let mut registry = ConverterRegistry::new();
        registry.register_converter("int", CustomConverter::new(Arc::new(StrConverter)));
        let r = resolve_arg(Some(&Annotation::of("int")), &registry);
        assert_eq!(r.converter.name(), "int");
    }

    #[test]
    fn registered_and_inline_custom() {
        let mut registry = ConverterRegistry::new();
        registry.register_converter("Point", CustomConverter::new(Arc::new(IntConverter)).allow_range());
        let r = resolve_arg(Some(&Annotation::of("Point")), &registry);
        assert_eq!(r.converter.name(), "int");
        assert!(r.allow_range);

        let inline = Annotation::Custom(CustomConverter::new(Arc::new(StrConverter)));
        let r = resolve_arg(Some(&inline), &registry);
        assert_eq!(r.converter.name(), "str");
        assert!(!r.allow_range);
    }

    #[test]
    fn unknown_type_falls_back_to_cache() {
        let registry = ConverterRegistry::new();
        let r = resolve_arg(Some(&Annotation::of("DataFrame")), &registry);
        assert_eq!(r.converter.name(), "cache");
    }

    #[test]
    fn return_resolution_order() {
        let mut registry = ConverterRegistry::new();
        assert!(resolve_return(None, &registry).is_none());
        assert!(resolve_return(Some(&Annotation::Expr("x".into())), &registry).is_none());

        let r = resolve_return(Some(&Annotation::of("float")), &registry).unwrap();
        assert_eq!(r.name(), "float");

        registry.register_returner("float", Arc::new(StrConverter));
        let r = resolve_return(Some(&Annotation::of("float")), &registry).unwrap();
        assert_eq!(r.name(), "str");

        let r = resolve_return(Some(&Annotation::of("Widget")), &registry).unwrap();
        assert_eq!(r.name(), "object");

        let inline = Annotation::Custom(CustomConverter::new(Arc::new(IntConverter)));
        assert_eq!(resolve_return(Some(&inline), &registry).unwrap().name(), "int");
    }
}
