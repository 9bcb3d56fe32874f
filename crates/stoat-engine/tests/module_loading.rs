//! End-to-end loading scenarios against real files.
//!
//! The external compiler collaborator is stood in for by a small line
//! directive language:
//!
//! - `import <spec>`            static dependency, required at that point
//! - `import-as <spec> <name>`  same, exporting whatever came back
//! - `export <name> <number>`   export a number
//! - `override <number>`        assign the override slot
//! - `override-object <name> <number>`  assign an object to the override slot
//! - `late-setter <fname> <name> <number>`  export a function that adds an
//!   export when called (after evaluation)
//! - `log`                      record this module's key in evaluation order
//! - `fail <message>`           the body errors
//! - `#compile-error`           compilation itself errors

use std::cell::RefCell;
use std::rc::Rc;
use stoat_core::{ObjectRef, Value};
use stoat_engine::{
    CompiledUnit, HostError, LoadError, LoaderConfig, LoaderContext, ModuleCompiler, ModuleScope,
    ModuleState,
};
use tempfile::{TempDir, tempdir};

struct ScriptCompiler {
    log: Rc<RefCell<Vec<String>>>,
}

impl ModuleCompiler for ScriptCompiler {
    fn compile(
        &self,
        key: &str,
        source: &str,
        _module_goal: bool,
    ) -> Result<CompiledUnit, HostError> {
        if source.contains("#compile-error") {
            return Err(format!("unexpected token in {key}").into());
        }

        let lines: Vec<String> = source
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with("//"))
            .map(str::to_string)
            .collect();

        let mut dependencies = Vec::new();
        for line in &lines {
            if let Some(rest) = line.strip_prefix("import-as ") {
                if let Some(spec) = rest.split_whitespace().next() {
                    dependencies.push(spec.to_string());
                }
            } else if let Some(spec) = line.strip_prefix("import ") {
                dependencies.push(spec.to_string());
            }
        }

        let log = self.log.clone();
        Ok(CompiledUnit {
            dependencies,
            body: Rc::new(move |scope| run_body(&lines, scope, &log)),
        })
    }
}

fn run_body(
    lines: &[String],
    scope: &ModuleScope<'_>,
    log: &Rc<RefCell<Vec<String>>>,
) -> Result<(), HostError> {
    for line in lines {
        if let Some(rest) = line.strip_prefix("import-as ") {
            let mut parts = rest.split_whitespace();
            let spec = parts.next().ok_or("import-as needs a specifier")?;
            let name = parts.next().ok_or("import-as needs a name")?;
            let value = scope.require(spec)?;
            scope.export(name, value);
        } else if let Some(spec) = line.strip_prefix("import ") {
            scope.require(spec)?;
        } else if let Some(rest) = line.strip_prefix("export ") {
            let mut parts = rest.split_whitespace();
            let name = parts.next().ok_or("export needs a name")?;
            let number: f64 = parts.next().ok_or("export needs a value")?.parse()?;
            scope.export(name, Value::Number(number));
        } else if let Some(rest) = line.strip_prefix("override-object ") {
            let mut parts = rest.split_whitespace();
            let name = parts.next().ok_or("override-object needs a name")?;
            let number: f64 = parts.next().ok_or("override-object needs a value")?.parse()?;
            let object = ObjectRef::new();
            object.set(name, Value::Number(number));
            scope.set_exports_override(Value::Object(object));
        } else if let Some(rest) = line.strip_prefix("override ") {
            let number: f64 = rest.trim().parse()?;
            scope.set_exports_override(Value::Number(number));
        } else if let Some(rest) = line.strip_prefix("late-setter ") {
            let mut parts = rest.split_whitespace();
            let fname = parts.next().ok_or("late-setter needs a function name")?;
            let name = parts.next().ok_or("late-setter needs an export name")?.to_string();
            let number: f64 = parts.next().ok_or("late-setter needs a value")?.parse()?;
            let exports = scope.exports().clone();
            scope.export(
                fname,
                Value::function(fname, move |_args| {
                    exports.set(name.clone(), Value::Number(number));
                    Ok(Value::Undefined)
                }),
            );
        } else if *line == "log" {
            log.borrow_mut().push(scope.key().to_string());
        } else if let Some(message) = line.strip_prefix("fail ") {
            return Err(message.to_string().into());
        } else {
            return Err(format!("unknown directive: {line}").into());
        }
    }
    Ok(())
}

struct Fixture {
    dir: TempDir,
    log: Rc<RefCell<Vec<String>>>,
    ctx: LoaderContext,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut config = LoaderConfig::default();
        config.base_dir = dir.path().to_path_buf();
        config.search_extensions = vec![".js".to_string()];
        let ctx = LoaderContext::new(config, Rc::new(ScriptCompiler { log: log.clone() }));
        Self { dir, log, ctx }
    }

    fn write(&self, name: &str, source: &str) -> String {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, source).unwrap();
        path.display().to_string()
    }

    fn key_of(&self, name: &str) -> String {
        std::fs::canonicalize(self.dir.path().join(name))
            .unwrap()
            .display()
            .to_string()
    }
}

#[test]
fn test_extensionless_import_resolves_and_caches_one_namespace() {
    let fx = Fixture::new();
    let a = fx.write("a.js", "import-as ./b b");
    fx.write("b.js", "export five 5");
    fx.write("c.js", "import-as ./b b");

    let a_ns = fx.ctx.require("./a.js", None).unwrap();
    let a_ns = a_ns.as_namespace().unwrap().clone();
    let b_via_a = a_ns.get("b").unwrap();
    let b_via_a = b_via_a.as_namespace().unwrap();
    assert_eq!(b_via_a.get("five"), Some(Value::Number(5.0)));

    // A second importer in the same registry observes the identical object.
    let c_ns = fx.ctx.require("./c.js", Some(&a)).unwrap();
    let c_ns = c_ns.as_namespace().unwrap().clone();
    let b_via_c = c_ns.get("b").unwrap();
    assert!(b_via_a.ptr_eq(b_via_c.as_namespace().unwrap()));

    assert_eq!(fx.ctx.registry().state_of(&fx.key_of("b.js")), Some(ModuleState::Evaluated));
}

#[test]
fn test_mutation_after_evaluation_is_visible_to_all_holders() {
    let fx = Fixture::new();
    fx.write("b.js", "export five 5\nlate-setter addSix six 6");
    fx.write("first.js", "import-as ./b b");
    fx.write("second.js", "import-as ./b b");

    let first = fx.ctx.require("./first.js", None).unwrap();
    let b = first.as_namespace().unwrap().get("b").unwrap();
    let b = b.as_namespace().unwrap().clone();
    assert_eq!(b.get("six"), None);

    // The module adds an export after its evaluation finished.
    b.get("addSix").unwrap().as_function().unwrap().call(&[]).unwrap();

    let second = fx.ctx.require("./second.js", None).unwrap();
    let b_again = second.as_namespace().unwrap().get("b").unwrap();
    let b_again = b_again.as_namespace().unwrap();
    assert!(b.ptr_eq(b_again));
    assert_eq!(b_again.get("five"), Some(Value::Number(5.0)));
    assert_eq!(b_again.get("six"), Some(Value::Number(6.0)));
}

#[test]
fn test_self_cycle_completes_without_hanging() {
    let fx = Fixture::new();
    fx.write("c.js", "import-as ./c self\nexport six 6");

    let ns = fx.ctx.require("./c.js", None).unwrap();
    let ns = ns.as_namespace().unwrap().clone();

    // The partial namespace captured mid-cycle is the same object that was
    // later fully populated.
    let observed = ns.get("self").unwrap();
    let observed = observed.as_namespace().unwrap().clone();
    assert!(observed.ptr_eq(&ns));
    assert_eq!(observed.get("six"), Some(Value::Number(6.0)));
}

#[test]
fn test_mutual_cycle_fills_in_after_completion() {
    let fx = Fixture::new();
    fx.write("a.js", "import-as ./b b\nexport one 1");
    fx.write("b.js", "import-as ./a a\nexport two 2");

    let a = fx.ctx.require("./a.js", None).unwrap();
    let a = a.as_namespace().unwrap().clone();
    let b = a.get("b").unwrap();
    let b = b.as_namespace().unwrap().clone();
    assert_eq!(b.get("two"), Some(Value::Number(2.0)));

    // b captured a's namespace before a's body ran; the handle is live.
    let a_via_b = b.get("a").unwrap();
    let a_via_b = a_via_b.as_namespace().unwrap().clone();
    assert!(a_via_b.ptr_eq(&a));
    assert_eq!(a_via_b.get("one"), Some(Value::Number(1.0)));
}

#[test]
fn test_override_wins_for_every_entry_point() {
    let fx = Fixture::new();
    fx.write("m.js", "export hidden 1\noverride-object answer 42");

    let required = fx.ctx.require("./m.js", None).unwrap();
    let imported = fx.ctx.import_module("./m.js", None).unwrap();
    let dynamic = fx.ctx.import_dynamic("./m.js", None).into_result().unwrap();

    let obj = required.as_object().expect("override value, not namespace");
    assert_eq!(obj.get("answer"), Some(Value::Number(42.0)));
    assert!(obj.ptr_eq(imported.as_object().unwrap()));
    assert!(obj.ptr_eq(dynamic.as_object().unwrap()));
}

#[test]
fn test_override_applies_even_after_mid_cycle_namespace_view() {
    let fx = Fixture::new();
    // The self-require observes the namespace before the override is
    // assigned; every post-evaluation consumer still gets the override.
    fx.write("o.js", "import-as ./o self\noverride 7");

    let outer = fx.ctx.require("./o.js", None).unwrap();
    assert_eq!(outer, Value::Number(7.0));

    let again = fx.ctx.require("./o.js", None).unwrap();
    assert_eq!(again, Value::Number(7.0));
}

#[test]
fn test_evaluation_failure_is_replayed_not_retried() {
    let fx = Fixture::new();
    fx.write("bad.js", "fail boom");

    let first = fx.ctx.require("./bad.js", None).unwrap_err();
    assert!(matches!(first, LoadError::Evaluation { .. }));

    // Rewriting the file has no effect: Failed records stay failed.
    fx.write("bad.js", "export fixed 1");
    let second = fx.ctx.require("./bad.js", None).unwrap_err();
    assert!(matches!(second, LoadError::Evaluation { .. }));
    assert_eq!(
        fx.ctx.registry().state_of(&fx.key_of("bad.js")),
        Some(ModuleState::Failed)
    );
}

#[test]
fn test_compile_failure_wraps_and_replays() {
    let fx = Fixture::new();
    fx.write("syntax.js", "#compile-error");

    let err = fx.ctx.require("./syntax.js", None).unwrap_err();
    assert!(matches!(err, LoadError::Compile { .. }));

    let replay = fx.ctx.require("./syntax.js", None).unwrap_err();
    assert!(matches!(replay, LoadError::Compile { .. }));
}

#[test]
fn test_dependency_failure_fails_the_importer() {
    let fx = Fixture::new();
    fx.write("main.js", "import ./broken");
    fx.write("broken.js", "fail nope");

    let err = fx.ctx.require("./main.js", None).unwrap_err();
    assert!(matches!(err, LoadError::Evaluation { .. }));

    let registry = fx.ctx.registry();
    assert_eq!(registry.state_of(&fx.key_of("main.js")), Some(ModuleState::Failed));
    assert_eq!(registry.state_of(&fx.key_of("broken.js")), Some(ModuleState::Failed));
}

#[test]
fn test_dependencies_evaluate_in_declaration_order() {
    let fx = Fixture::new();
    fx.write("main.js", "import ./one\nimport ./two\nlog");
    fx.write("one.js", "log");
    fx.write("two.js", "log");

    fx.ctx.require("./main.js", None).unwrap();

    let log = fx.log.borrow();
    assert_eq!(
        *log,
        vec![fx.key_of("one.js"), fx.key_of("two.js"), fx.key_of("main.js")]
    );
}

#[test]
fn test_virtual_module_as_dependency() {
    let fx = Fixture::new();
    fx.ctx
        .define_virtual("env", [("mode".to_string(), Value::string("prod"))]);
    fx.write("main.js", "import-as env e");

    let ns = fx.ctx.require("./main.js", None).unwrap();
    let ns = ns.as_namespace().unwrap().clone();
    let env = ns.get("e").unwrap();
    assert_eq!(
        env.as_namespace().unwrap().get("mode"),
        Some(Value::string("prod"))
    );

    // The virtual name is now a cached record with a dependent edge.
    let registry = fx.ctx.registry();
    assert_eq!(registry.state_of("env"), Some(ModuleState::Evaluated));
    assert_eq!(registry.dependents_of("env"), vec![fx.key_of("main.js")]);
}

#[test]
fn test_compiler_map_lets_foreign_formats_load() {
    let fx = Fixture::new();
    // A "foreign format" whose entire source is a number; its compiler map
    // entry lowers it to the directive language.
    fx.write("value.num", "12");
    fx.ctx
        .config_mut()
        .compilers
        .register(".num", |_key, raw| Ok(format!("export value {}", raw.trim())));
    fx.write("main.js", "import-as ./value.num v");

    let ns = fx.ctx.require("./main.js", None).unwrap();
    let ns = ns.as_namespace().unwrap().clone();
    let v = ns.get("v").unwrap();
    assert_eq!(
        v.as_namespace().unwrap().get("value"),
        Some(Value::Number(12.0))
    );
}

#[test]
fn test_dynamic_import_settles_through_callback() {
    let fx = Fixture::new();
    fx.write("m.js", "export ready 1");

    let via_require = fx.ctx.require("./m.js", None).unwrap();

    let settled = Rc::new(RefCell::new(None));
    let sink = settled.clone();
    fx.ctx
        .import_dynamic("./m.js", None)
        .on_settled(move |result| {
            *sink.borrow_mut() = Some(result);
        });

    let settled = settled.borrow_mut().take().unwrap().unwrap();
    assert!(
        via_require
            .as_namespace()
            .unwrap()
            .ptr_eq(settled.as_namespace().unwrap())
    );
}

#[test]
fn test_entry_module_flag_for_file_modules() {
    let fx = Fixture::new();
    fx.write("entry.js", "import-as ./lib lib\nexport main 1");
    fx.write("lib.js", "export util 1");

    fx.ctx.load_entry("./entry.js").unwrap();
    assert_eq!(fx.ctx.entry_key().unwrap(), fx.key_of("entry.js"));

    let registry = fx.ctx.registry();
    assert_eq!(registry.len(), 2);
    assert_eq!(
        registry.dependencies_of(&fx.key_of("entry.js")),
        vec![fx.key_of("lib.js")]
    );
}

#[test]
fn test_resolution_error_reaches_importer_with_context() {
    let fx = Fixture::new();
    fx.write("main.js", "import ./missing");

    let err = fx.ctx.require("./main.js", None).unwrap_err();
    // The dependency's resolution error names both the specifier and the
    // referrer somewhere along its cause chain.
    let mut chain = String::new();
    let mut source: Option<&dyn std::error::Error> = Some(&err);
    while let Some(e) = source {
        chain.push_str(&e.to_string());
        chain.push('\n');
        source = e.source();
    }
    assert!(chain.contains("./missing"));
    assert!(chain.contains(&fx.key_of("main.js")));
}

#[test]
fn test_symlinked_import_deduplicates_to_one_record() {
    let fx = Fixture::new();
    fx.write("real.js", "export n 1");
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(
            fx.dir.path().join("real.js"),
            fx.dir.path().join("alias.js"),
        )
        .unwrap();

        let via_real = fx.ctx.require("./real.js", None).unwrap();
        let via_alias = fx.ctx.require("./alias.js", None).unwrap();

        assert!(
            via_real
                .as_namespace()
                .unwrap()
                .ptr_eq(via_alias.as_namespace().unwrap())
        );
        assert_eq!(fx.ctx.registry().len(), 1);
    }
}

#[test]
fn test_index_file_resolution_through_loading() {
    let fx = Fixture::new();
    fx.write("pkg/index.js", "export inside 1");
    fx.write("main.js", "import-as ./pkg p");

    let ns = fx.ctx.require("./main.js", None).unwrap();
    let ns = ns.as_namespace().unwrap().clone();
    let p = ns.get("p").unwrap();
    assert_eq!(
        p.as_namespace().unwrap().get("inside"),
        Some(Value::Number(1.0))
    );
}
