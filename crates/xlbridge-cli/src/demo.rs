//! The sample module the CLI registers.

use std::time::Duration;

use anyhow::Context;
use xlbridge_core::{
    Annotation, ArgDecl, CallArgs, Decorated, FuncOptions, ModuleId, Param, RegistrationContext, Signature,
    UserFunction, Value,
};

pub const MODULE: &str = "demo";

fn add() -> (UserFunction, Signature, FuncOptions) {
    let func = UserFunction::plain(|args: CallArgs| {
        let a = args.number(0).context("a must be a number")?;
        let b = args.number(1).unwrap_or_default();
        Ok(Value::Number(a + b))
    });
    let sig = Signature::new([
        Param::positional("a").typed(Annotation::of("float")),
        Param::positional("b").typed(Annotation::of("float")).with_default(0.0),
    ])
    .returns(Annotation::of("float"))
    .doc("Add two numbers");
    let opts = FuncOptions::new().name("ADD").threaded().arg_help("b", "Optional second term");
    (func, sig, opts)
}

fn greet() -> (UserFunction, Signature, FuncOptions) {
    let func = UserFunction::plain(|args: CallArgs| {
        let name = args.text(0).unwrap_or("world");
        let greeting = match args.keyword("greeting").map(ToString::to_string) {
            Some(g) if !g.is_empty() => g,
            _ => "Hello".to_string(),
        };
        Ok(Value::Str(format!("{greeting}, {name}!")))
    });
    let sig = Signature::new([
        Param::positional("name").typed(Annotation::of("str")),
        Param::var_keyword("options"),
    ]);
    let opts = FuncOptions::new()
        .name("GREET")
        .help("Greet someone")
        .arg(ArgDecl::keywords("options").help("Two-column table of options"));
    (func, sig, opts)
}

fn slow_double() -> (UserFunction, Signature, FuncOptions) {
    let func = UserFunction::coroutine(|args: CallArgs| async move {
        let x = args.number(0).context("x must be a number")?;
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(Value::Number(x * 2.0))
    });
    let sig = Signature::new([Param::positional("x").typed(Annotation::of("float"))]);
    let opts = FuncOptions::new().name("SLOW.DOUBLE").rtd(false);
    (func, sig, opts)
}

fn countdown() -> (UserFunction, Signature, FuncOptions) {
    let func = UserFunction::generator(|args: CallArgs| {
        let from = args.number(0).unwrap_or(3.0).max(0.0) as i64;
        futures::stream::unfold(from, |n| async move {
            if n < 0 {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            Some((Ok(Value::Int(n)), n - 1))
        })
    });
    let sig = Signature::new([Param::positional("from").typed(Annotation::of("int")).with_default(3i64)]);
    let opts = FuncOptions::new().name("COUNTDOWN").help("Count down to zero");
    (func, sig, opts)
}

fn join_all() -> (UserFunction, Signature, FuncOptions) {
    let func = UserFunction::plain(|args: CallArgs| {
        let parts: Vec<String> = args.values.iter().map(ToString::to_string).collect();
        Ok(Value::Str(parts.join(",")))
    });
    // Variadic positional parameters cannot be declared; this one is skipped
    let sig = Signature::new([Param::var_positional("items")]);
    (func, sig, FuncOptions::new().name("JOIN"))
}

/// Declare every sample function in `ctx`, returning what was declared.
pub fn declare(ctx: &RegistrationContext) -> Vec<Decorated> {
    let module = ModuleId::new(MODULE);
    [add(), greet(), slow_double(), countdown(), join_all()]
        .into_iter()
        .map(|(func, sig, opts)| {
            let name = opts.name.clone().unwrap_or_default();
            ctx.func(&module, &name, func, &sig, &opts)
        })
        .collect()
}
