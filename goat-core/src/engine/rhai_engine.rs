use super::{Error, ScriptEngine, State};
use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, ImmutableString, Scope};
use serde_json::Value as JsonValue;
use tracing::*;

type FnResult = Result<(), Box<EvalAltResult>>;

/// [`ScriptEngine`] backed by an embedded Rhai interpreter. Variables declared on the top level
/// of a script stay in the scope and are part of the state afterwards.
pub struct RhaiEngine {
    engine: Engine,
    scope: Scope<'static>,
}

impl Default for RhaiEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RhaiEngine {
    pub fn new() -> RhaiEngine {
        let mut engine = Engine::new();

        engine.on_print(|s| println!("{s}"));
        engine.on_debug(|s, _, pos| debug!(%pos, "{s}"));

        engine.register_fn("assert", |cond: bool| -> FnResult {
            if cond {
                Ok(())
            } else {
                Err("assertion failed".into())
            }
        });
        engine.register_fn("assert", |cond: bool, msg: ImmutableString| -> FnResult {
            if cond {
                Ok(())
            } else {
                Err(format!("assertion failed: {msg}").into())
            }
        });
        engine.register_fn("assert_eq", |value: Dynamic, expected: Dynamic| {
            assert_eq_impl(value, expected, None)
        });
        engine.register_fn(
            "assert_eq",
            |value: Dynamic, expected: Dynamic, msg: ImmutableString| {
                assert_eq_impl(value, expected, Some(msg))
            },
        );

        engine.register_fn("println", |v: Dynamic| println!("{v}"));
        engine.register_fn("info", |v: Dynamic| info!("{v}"));
        engine.register_fn("warn", |v: Dynamic| warn!("{v}"));
        engine.register_fn("error", |v: Dynamic| error!("{v}"));
        engine.register_fn("fatal", |v: Dynamic| -> FnResult {
            error!("{v}");
            Err(format!("fatal: {v}").into())
        });

        RhaiEngine {
            engine,
            scope: Scope::new(),
        }
    }

    pub fn boxed() -> Box<dyn ScriptEngine> {
        Box::new(Self::new())
    }
}

fn assert_eq_impl(value: Dynamic, expected: Dynamic, msg: Option<ImmutableString>) -> FnResult {
    let v: JsonValue = rhai::serde::from_dynamic(&value)?;
    let e: JsonValue = rhai::serde::from_dynamic(&expected)?;
    if v == e {
        return Ok(());
    }
    let part = msg.map(|m| format!("{m}: ")).unwrap_or_default();
    Err(format!("assertion failed: {part}expected `{e}` != received `{v}`").into())
}

impl ScriptEngine for RhaiEngine {
    fn set_state(&mut self, state: State) -> Result<(), Error> {
        for (name, value) in state {
            self.set(&name, value)?;
        }
        Ok(())
    }

    fn set(&mut self, name: &str, value: JsonValue) -> Result<(), Error> {
        if self.scope.is_constant(name) == Some(true) {
            return Err(Error::Constant(name.to_string()));
        }
        let value = rhai::serde::to_dynamic(value).map_err(|err| Error::Conversion {
            name: name.to_string(),
            message: err.to_string(),
        })?;
        self.scope.set_or_push(name.to_string(), value);
        Ok(())
    }

    fn run(&mut self, script: &str) -> Result<(), Error> {
        self.engine
            .run_with_scope(&mut self.scope, script)
            .map_err(|err| Error::Script(err.to_string()))
    }

    fn state(&self) -> State {
        let mut state = State::new();
        for (name, _, value) in self.scope.iter() {
            if value.is::<FnPtr>() {
                continue;
            }
            match rhai::serde::from_dynamic::<JsonValue>(&value) {
                Ok(v) => {
                    state.insert(name.to_string(), v);
                }
                Err(err) => trace!(name, %err, "skipping variable not representable as json"),
            }
        }
        state
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use test_case::test_case;

    #[test]
    fn variables_end_up_in_state() -> eyre::Result<()> {
        let mut engine = RhaiEngine::new();
        engine.run("let a = 1; let b = \"two\"; let c = #{ d: [1, 2] };")?;

        let state = engine.state();
        assert_eq!(state.get("a"), Some(&json!(1)));
        assert_eq!(state.get("b"), Some(&json!("two")));
        assert_eq!(state.get("c"), Some(&json!({"d": [1, 2]})));
        Ok(())
    }

    #[test]
    fn function_pointers_are_excluded() -> eyre::Result<()> {
        let mut engine = RhaiEngine::new();
        engine.run("fn double(x) { x * 2 } let f = Fn(\"double\"); let v = call(f, 2);")?;

        let state = engine.state();
        assert!(!state.contains_key("f"));
        assert_eq!(state.get("v"), Some(&json!(4)));
        Ok(())
    }

    #[test]
    fn state_is_visible_to_scripts() -> eyre::Result<()> {
        let mut engine = RhaiEngine::new();
        let state = match json!({"response": {"StatusCode": 200, "BodyJson": {"id": 3}}}) {
            JsonValue::Object(map) => map,
            _ => unreachable!(),
        };
        engine.set_state(state)?;
        engine.run("assert(response.StatusCode == 200); let id = response.BodyJson.id;")?;
        assert_eq!(engine.state().get("id"), Some(&json!(3)));
        Ok(())
    }

    #[test]
    fn set_state_keeps_other_variables() -> eyre::Result<()> {
        let mut engine = RhaiEngine::new();
        engine.run("let kept = true;")?;
        engine.set("added", json!("x"))?;
        let state = engine.state();
        assert_eq!(state.get("kept"), Some(&json!(true)));
        assert_eq!(state.get("added"), Some(&json!("x")));
        Ok(())
    }

    #[test_case("assert(false)", "assertion failed"; "assert")]
    #[test_case("assert(1 == 2, \"numbers differ\")", "assertion failed: numbers differ"; "assert with message")]
    #[test_case("assert_eq(1, 2)", "expected `2` != received `1`"; "assert_eq")]
    #[test_case("assert_eq(\"a\", \"b\", \"name\")", "assertion failed: name: expected"; "assert_eq with message")]
    #[test_case("fatal(\"stop\")", "fatal: stop"; "fatal")]
    #[test_case("let x = ;", ""; "syntax error")]
    fn failures(script: &str, contains: &str) {
        let mut engine = RhaiEngine::new();
        let err = engine.run(script).unwrap_err();
        assert!(err.to_string().contains(contains), "{err}");
    }

    #[test]
    fn passing_asserts() -> eyre::Result<()> {
        let mut engine = RhaiEngine::new();
        engine.run("assert(true); assert_eq(#{ a: [1] }, #{ a: [1] }); info(\"ok\");")?;
        Ok(())
    }
}
