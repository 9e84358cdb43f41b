pub mod cache;
pub mod converter;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod function;
pub mod log;
pub mod registry;
pub mod resolve;
pub mod signature;
pub mod value;

pub use converter::{Converter, ConverterRef, ConverterRegistry, CustomConverter};
pub use descriptor::{
    ArgDecl, ArgOverride, ArgSpec, AsyncKind, FeatureFlags, FuncOptions, FunctionDescriptor, build_descriptor,
};
pub use engine::{Engine, FunctionTable, ModuleId, RegisterReport, Scope};
pub use error::{ConversionError, DeclarationError, EngineError};
pub use function::{UserError, UserFunction, UserResult};
pub use registry::{Decorated, FunctionId, RegistrationContext, WorksheetFunction};
pub use signature::{Annotation, Param, ParamKind, Signature};
pub use value::{CallArgs, CellError, RangeRef, Value};
