//! Orchestration of requestfile runs.
//!
//! A run walks the phases of a [`Document`] strictly in order: `setup`, then every test
//! wrapped in the `setup-each` and `teardown-each` steps, then `teardown`. Teardown is
//! attempted regardless of how the earlier phases ended and its failures are only logged.
pub mod error;
pub mod options;
pub mod response;
pub mod result;

pub use error::{Error, Errors};
pub use options::{AbortOptions, ExecOptions};
pub use response::{Response, ResponseError};
pub use result::{PhaseResult, RunResult};

use crate::{
    advancer::{Immediate, Waiter},
    engine::{EngineMaker, ScriptEngine, State},
    reporter::Printer,
    requester::{RequestOptions, Requester},
    requestfile::{
        document::FILE_EXTENSION, import, template, Action, Document, Invocation, Request, Value,
    },
};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value as JsonValue;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::*;
use walkdir::WalkDir;

/// Phases which can be skipped as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Setup,
    Tests,
    Teardown,
}

/// A failed action together with the abort options it was executed with.
struct Failure {
    error: Error,
    opts: AbortOptions,
}

pub struct Executor {
    engine_maker: EngineMaker,
    requester: Arc<dyn Requester>,
    waiter: Arc<dyn Waiter>,
    printer: Printer,
    dry: bool,
    no_abort: bool,
    skip: Vec<Phase>,
    reduced_errors: bool,
}

impl Executor {
    pub fn new(engine_maker: EngineMaker, requester: Arc<dyn Requester>) -> Executor {
        Executor {
            engine_maker,
            requester,
            waiter: Arc::new(Immediate),
            printer: Printer::silent(),
            dry: false,
            no_abort: false,
            skip: Vec::new(),
            reduced_errors: false,
        }
    }

    pub fn set_waiter(&mut self, waiter: Arc<dyn Waiter>) {
        self.waiter = waiter;
    }

    pub fn set_printer(&mut self, printer: Printer) {
        self.printer = printer;
    }

    /// Only parse the requestfiles, nothing is sent.
    pub fn set_dry(&mut self, dry: bool) {
        self.dry = dry;
    }

    pub fn set_no_abort(&mut self, no_abort: bool) {
        self.no_abort = no_abort;
    }

    pub fn set_skip(&mut self, skip: Vec<Phase>) {
        self.skip = skip;
    }

    /// Hide templating errors of teardown steps.
    pub fn set_reduced_errors(&mut self, reduced_errors: bool) {
        self.reduced_errors = reduced_errors;
    }

    pub fn printer(&self) -> &Printer {
        &self.printer
    }

    /// Executes the given requestfiles. A single file is run directly; directories and
    /// multiple paths are run as a batch where each file gets its own state seeded from
    /// `params`.
    pub async fn execute(
        &self,
        paths: &[PathBuf],
        params: &State,
        result: &mut RunResult,
    ) -> Result<(), Error> {
        if let [path] = paths {
            if path.is_file() {
                let doc = import::load_file(path)?;
                return self.execute_document(&doc, params, result).await;
            }
        }

        let files = collect_files(paths)?;
        let mut docs = Vec::with_capacity(files.len());
        for file in files {
            let doc = import::load_file(&file)?;
            docs.push((file, doc));
        }

        let total = docs.len();
        let mut failures = Vec::new();
        for (path, doc) in docs {
            info!(?path, "executing batch");
            let mut batch_result = RunResult::default();
            if let Err(err) = self.execute_document(&doc, params, &mut batch_result).await {
                error!(?path, "batch failed: {err}");
                failures.push((path, err));
            }
            result.merge(&batch_result);
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Batch { failures, total })
        }
    }

    pub async fn execute_document(
        &self,
        doc: &Document,
        params: &State,
        result: &mut RunResult,
    ) -> Result<(), Error> {
        if self.dry {
            warn!("dry mode: no requests are sent");
            if let Ok(json) = serde_json::to_string_pretty(doc) {
                debug!(path = ?doc.path, "parsed document:\n{json}");
            }
            return Ok(());
        }

        let mut engine = (self.engine_maker)();
        engine.set_state(params.clone()).map_err(Error::Engine)?;
        self.run_document(doc, engine.as_mut(), result).await
    }

    async fn run_document(
        &self,
        doc: &Document,
        engine: &mut dyn ScriptEngine,
        result: &mut RunResult,
    ) -> Result<(), Error> {
        let main = self.run_main(doc, engine, result).await;
        self.run_teardown(doc, engine, &mut result.teardown).await;
        main
    }

    async fn run_main(
        &self,
        doc: &Document,
        engine: &mut dyn ScriptEngine,
        result: &mut RunResult,
    ) -> Result<(), Error> {
        let mut errors = Errors::default();

        if !self.skip.contains(&Phase::Setup) && !doc.setup.is_empty() {
            self.printer.separator("SETUP");
            for action in &doc.setup {
                match self.run_action(action, doc, engine, &mut result.setup).await {
                    Ok(()) => debug!("Setup step completed"),
                    Err(failure) => {
                        error!("Setup step failed: {}", failure.error);
                        if failure.opts.aborts(self.no_abort) {
                            return Err(failure.error);
                        }
                        errors.push(failure.error);
                    }
                }
            }
        }

        if !self.skip.contains(&Phase::Tests) && !doc.tests.is_empty() {
            self.printer.separator("TESTS");
            for action in &doc.tests {
                if let Action::LogSection(head) = action {
                    self.printer.separator(head);
                    continue;
                }

                let mut abort = false;
                match self
                    .run_steps(&doc.setup_each, doc, engine, &mut result.setup)
                    .await
                {
                    Ok(()) => match self.run_action(action, doc, engine, &mut result.tests).await
                    {
                        Ok(()) => info!("Test completed"),
                        Err(failure) => {
                            error!("Test failed: {}", failure.error);
                            abort = failure.opts.aborts(self.no_abort);
                            errors.push(failure.error);
                        }
                    },
                    Err(failure) => {
                        abort = failure.opts.always_abort;
                        errors.push(failure.error);
                    }
                }

                if let Err(failure) = self
                    .run_steps(&doc.teardown_each, doc, engine, &mut result.teardown)
                    .await
                {
                    abort |= failure.opts.always_abort;
                    errors.push(failure.error);
                }

                if abort {
                    break;
                }
            }
        }

        errors.into_result()
    }

    /// Runs per-test steps, stopping at the first failure.
    async fn run_steps(
        &self,
        actions: &[Action],
        doc: &Document,
        engine: &mut dyn ScriptEngine,
        phase: &mut PhaseResult,
    ) -> Result<(), Failure> {
        for action in actions {
            if let Err(failure) = self.run_action(action, doc, engine, phase).await {
                error!("Per-test step failed: {}", failure.error);
                return Err(failure);
            }
        }
        Ok(())
    }

    async fn run_teardown(
        &self,
        doc: &Document,
        engine: &mut dyn ScriptEngine,
        phase: &mut PhaseResult,
    ) {
        if self.skip.contains(&Phase::Teardown) || doc.teardown.is_empty() {
            return;
        }

        self.printer.separator("TEARDOWN");
        for action in &doc.teardown {
            match self.run_action(action, doc, engine, phase).await {
                Ok(()) => debug!("Teardown step completed"),
                Err(failure) => {
                    let substitution = failure.error.is_substitution();
                    if !(substitution && self.reduced_errors) {
                        error!("Teardown step failed: {}", failure.error);
                    }
                    if !substitution && failure.opts.always_abort {
                        break;
                    }
                }
            }
        }
    }

    async fn run_action(
        &self,
        action: &Action,
        doc: &Document,
        engine: &mut dyn ScriptEngine,
        phase: &mut PhaseResult,
    ) -> Result<(), Failure> {
        match action {
            Action::LogSection(head) => {
                self.printer.separator(head);
                Ok(())
            }
            Action::Request(request) => {
                let mut request = request.as_ref().clone();
                if let Some(defaults) = &doc.defaults {
                    request.merge(defaults);
                }

                phase.inc();
                let res = self.run_request(&mut request, engine).await;
                // options are only templated once the request ran, invalid ones already
                // failed the request unless templating did not get that far
                let opts = match AbortOptions::from_options(&request.options) {
                    Ok(opts) => opts,
                    Err(err) => {
                        warn!(req = %request, "using default abort options: {err}");
                        AbortOptions::default()
                    }
                };

                res.map_err(|err| {
                    phase.inc_failed();
                    Failure {
                        error: Error::Request {
                            request: request.to_string(),
                            location: request.location(),
                            source: Box::new(err),
                        },
                        opts,
                    }
                })
            }
            Action::Invocation(invocation) => {
                let (sub, res) = self.run_invocation(invocation, engine).await;
                *phase += sub.sum();
                res.map_err(|error| Failure {
                    error,
                    opts: AbortOptions {
                        always_abort: true,
                        ..Default::default()
                    },
                })
            }
        }
    }

    async fn run_request(
        &self,
        request: &mut Request,
        engine: &mut dyn ScriptEngine,
    ) -> Result<(), Error> {
        let state = engine.state();
        request
            .pre_substitute(&state)
            .map_err(Error::PreSubstitution)?;
        if !request.pre_script.is_none() {
            let script = request.pre_script.read_to_string().map_err(Error::Content)?;
            engine.run(&script).map_err(Error::PreScript)?;
        }

        let state = engine.state();
        request.substitute(&state).map_err(Error::Substitution)?;

        AbortOptions::from_options(&request.options)?;
        let exec = ExecOptions::from_options(&request.options)?;
        if !exec.condition {
            info!(req = %request, "skipped: condition is false");
            return Ok(());
        }
        if let Some(delay) = exec.delay {
            debug!(req = %request, ?delay, "delaying request");
            tokio::time::sleep(delay).await;
        }
        self.waiter.wait().await;

        let http_request = request.to_http_request().map_err(Error::Build)?;
        let req_opts = RequestOptions::from_options(&request.options)?;
        let force_json = matches!(
            request.options.get("responsetype"),
            Some(Value::String(kind)) if kind.eq_ignore_ascii_case("json")
        );

        debug!(req = %request, "sending request");
        let http_response = self.requester.execute(http_request, &req_opts).await?;
        let response = Response::from_http(&http_response, force_json)?;
        debug!(req = %request, status = %response.status, "response received");

        let value = serde_json::to_value(&response).map_err(ResponseError::from)?;
        engine.set("response", value).map_err(Error::Engine)?;

        if !request.script.is_none() {
            let script = request.script.read_to_string().map_err(Error::Content)?;
            engine.run(&script).map_err(Error::Script)?;
        }

        Ok(())
    }

    /// Runs the invoked requestfile in its own engine. The counters of the sub run are
    /// returned even when it fails.
    fn run_invocation<'a>(
        &'a self,
        invocation: &'a Invocation,
        engine: &'a mut dyn ScriptEngine,
    ) -> BoxFuture<'a, (RunResult, Result<(), Error>)> {
        async move {
            let mut result = RunResult::default();
            let res = self.invoke(invocation, engine, &mut result).await;
            (result, res)
        }
        .boxed()
    }

    async fn invoke(
        &self,
        invocation: &Invocation,
        engine: &mut dyn ScriptEngine,
        result: &mut RunResult,
    ) -> Result<(), Error> {
        let path = invocation.resolved_path();

        let mut params = invocation.params.clone();
        template::apply_to_map(&mut params, &engine.state()).map_err(|source| {
            Error::InvocationParams {
                path: path.clone(),
                source,
            }
        })?;
        let params: State = params
            .iter()
            .map(|(key, value)| (key.clone(), value.to_json()))
            .collect();

        info!(?path, "executing invocation");
        let wrap = |source: Error| Error::Invocation {
            path: path.clone(),
            source: Box::new(source),
        };

        let doc = import::load_file(&path).map_err(|err| wrap(err.into()))?;
        let mut sub_engine = (self.engine_maker)();
        sub_engine
            .set_state(params)
            .map_err(|err| wrap(Error::Engine(err)))?;
        self.run_document(&doc, sub_engine.as_mut(), result)
            .await
            .map_err(wrap)?;

        let produced = sub_engine.state();
        for (name, alias) in &invocation.returns {
            match produced.get(name) {
                Some(value) => engine.set(alias, value.clone()).map_err(Error::Engine)?,
                None => {
                    warn!(?path, name, "returned variable is not defined");
                    engine.set(alias, JsonValue::Null).map_err(Error::Engine)?;
                }
            }
        }

        Ok(())
    }
}

/// Collects all requestfiles below `paths`, sorted by name per directory. Files and
/// directories starting with `_` are skipped unless passed explicitly.
fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>, Error> {
    let mut files = Vec::new();
    for path in paths {
        let walker = WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_excluded(entry.path()));
        for entry in walker {
            let entry = entry?;
            let is_requestfile = entry
                .path()
                .extension()
                .is_some_and(|ext| ext == FILE_EXTENSION);
            if entry.file_type().is_file() && is_requestfile {
                files.push(entry.into_path());
            }
        }
    }

    if files.is_empty() {
        return Err(Error::NoFiles);
    }
    Ok(files)
}

fn is_excluded(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('_'))
}
