//! CPython-backed capability runtime and package environment.
//!
//! Each loaded capability owns a worker: an interpreter running an embedded
//! harness that executes the capability source once, in a module registered
//! as `capabilities.<name>`, and then serves calls for as long as the
//! capability stays registered. Requests and replies are JSON lines; replies
//! carry a marker prefix. The harness points file descriptor 1 at stderr
//! before any capability code runs, so output the capability prints (from any
//! thread or child process) cannot corrupt the reply channel.
//!
//! Module state persists between calls and background threads keep running
//! after a call returns. The worker is killed when its capability is dropped,
//! which happens when the name is synthesized again.

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::installer::{EnvironmentError, PackageEnvironment};
use crate::registry::{Arguments, Invocable, InvocationError, InvocationResult};
use crate::runtime::{LoadError, ScriptRuntime, SourceUnit};

/// Environment variable pointing at the active virtual environment.
pub const VIRTUAL_ENV_VAR: &str = "VIRTUAL_ENV";

/// Namespace prefix under which capability modules are registered.
const MODULE_PREFIX: &str = "capabilities";

/// Prefix of harness reply lines.
const REPLY_MARKER: &str = "__toolsmith__:";

/// Number of trailing stderr characters kept in diagnostics.
const STDERR_TAIL: usize = 2_000;

const HARNESS: &str = r##"
import json
import math
import os
import sys
import types

MARKER = "__toolsmith__:"

channel = os.fdopen(os.dup(1), "w", encoding="utf-8")
os.dup2(2, 1)
sys.stdout = sys.stderr
requests = sys.stdin
sys.stdin = open(os.devnull)


def finite(value):
    if isinstance(value, float) and not math.isfinite(value):
        return None
    if isinstance(value, dict):
        return {key: finite(item) for key, item in value.items()}
    if isinstance(value, (list, tuple)):
        return [finite(item) for item in value]
    return value


def encode(payload):
    try:
        return json.dumps(payload, allow_nan=False, default=repr)
    except ValueError:
        pass
    try:
        return json.dumps(finite(payload), allow_nan=False, default=repr)
    except (TypeError, ValueError, RecursionError) as err:
        return json.dumps({"status": "unserializable", "error": str(err)})


def emit(**payload):
    try:
        line = encode(payload)
    except (TypeError, RecursionError) as err:
        line = json.dumps({"status": "unserializable", "error": str(err)})
    channel.write(MARKER + line + "\n")
    channel.flush()


def failure(status, err):
    emit(status=status, exception=type(err).__name__, error=str(err))


def uses_invoke(target):
    return not isinstance(target, types.FunctionType) and callable(
        getattr(target, "invoke", None)
    )


def load(request):
    root = request.get("root")
    if root and root not in sys.path:
        sys.path.insert(0, root)

    module = types.ModuleType(request["module"])
    module.__file__ = request["path"]
    try:
        code = compile(request["source"], request["path"], "exec")
    except (SyntaxError, ValueError) as err:
        failure("malformed", err)
        return None

    sys.modules[request["module"]] = module
    try:
        exec(code, module.__dict__)
    except BaseException as err:
        failure("exec_failed", err)
        return None

    entrypoint = request["entrypoint"]
    if not hasattr(module, entrypoint):
        emit(status="missing_entrypoint")
        return None

    target = getattr(module, entrypoint)
    if not (callable(target) or uses_invoke(target)):
        emit(status="not_callable", kind=type(target).__name__)
        return None

    emit(status="ok", value=None)
    return target


def call(target, kwargs):
    try:
        if uses_invoke(target):
            value = target.invoke(kwargs)
        else:
            value = target(**kwargs)
    except BaseException as err:
        failure("raised", err)
        return
    emit(status="ok", value=value)


def main():
    line = requests.readline()
    if not line:
        return
    target = load(json.loads(line))
    if target is None:
        return
    while True:
        line = requests.readline()
        if not line:
            return
        call(target, json.loads(line).get("kwargs") or {})


main()
"##;

const CHECK_ISOLATED: &str = "import sys; print(sys.prefix != sys.base_prefix)";

const CHECK_MODULE: &str = r"
import importlib.util, sys
try:
    found = importlib.util.find_spec(sys.argv[1]) is not None
except (ImportError, ValueError):
    found = False
sys.exit(0 if found else 1)
";

/// Returns the interpreter to use when none is configured: the active virtual
/// environment's `python`, falling back to `python3` on `PATH`.
#[must_use]
pub fn default_interpreter() -> PathBuf {
    match env::var_os(VIRTUAL_ENV_VAR) {
        Some(venv) if !venv.is_empty() => {
            let bin = if cfg!(windows) { "Scripts" } else { "bin" };
            Path::new(&venv).join(bin).join("python")
        }
        _ => PathBuf::from("python3"),
    }
}

/// First line sent to a worker.
#[derive(Debug, Serialize)]
struct LoadRequest<'a> {
    module: &'a str,
    path: &'a Path,
    root: Option<&'a Path>,
    source: &'a str,
    entrypoint: &'a str,
}

/// Every later line.
#[derive(Debug, Serialize)]
struct CallRequest<'a> {
    kwargs: &'a Arguments,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
enum HarnessReply {
    Ok {
        #[serde(default)]
        value: Value,
    },
    Malformed {
        exception: String,
        error: String,
    },
    ExecFailed {
        exception: String,
        error: String,
    },
    MissingEntrypoint,
    NotCallable {
        kind: String,
    },
    Raised {
        exception: String,
        error: String,
    },
    Unserializable {
        error: String,
    },
}

/// Runtime executing capability source with an external CPython interpreter.
#[derive(Clone, Debug)]
pub struct PythonRuntime {
    interpreter: PathBuf,
}

impl Default for PythonRuntime {
    fn default() -> Self {
        Self::new(default_interpreter())
    }
}

impl PythonRuntime {
    /// Creates a runtime driving the supplied interpreter.
    #[must_use]
    pub fn new(interpreter: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }

    /// Returns the interpreter path.
    #[must_use]
    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }
}

#[async_trait]
impl ScriptRuntime for PythonRuntime {
    fn language(&self) -> &'static str {
        "python"
    }

    fn extension(&self) -> &'static str {
        "py"
    }

    fn package_marker(&self) -> Option<&'static str> {
        Some("__init__.py")
    }

    async fn load(&self, unit: SourceUnit) -> Result<Arc<dyn Invocable>, LoadError> {
        let module = format!("{MODULE_PREFIX}.{}", unit.name());
        let worker = Worker::spawn(&self.interpreter, module.clone()).map_err(|err| {
            LoadError::Unavailable {
                reason: format!(
                    "failed to start interpreter `{}`: {err}",
                    self.interpreter.display()
                ),
            }
        })?;

        let request = LoadRequest {
            module: &module,
            path: unit.artifact(),
            root: unit.artifact().parent(),
            source: unit.source(),
            entrypoint: unit.entrypoint(),
        };
        let entrypoint = unit.entrypoint().to_owned();

        match worker.exchange(&request).await {
            Ok(HarnessReply::Ok { .. }) => {
                debug!(module = %module, pid = ?worker.pid, "capability worker ready");
                Ok(Arc::new(PythonCallable {
                    worker,
                    entrypoint,
                }))
            }
            Ok(HarnessReply::Malformed { exception, error }) => Err(LoadError::Malformed {
                reason: format!("{exception}: {error}"),
            }),
            Ok(
                HarnessReply::ExecFailed { exception, error }
                | HarnessReply::Raised { exception, error },
            ) => Err(LoadError::Execution {
                reason: format!("{exception}: {error}"),
            }),
            Ok(HarnessReply::MissingEntrypoint) => {
                Err(LoadError::MissingEntrypoint { entrypoint })
            }
            Ok(HarnessReply::NotCallable { kind }) => {
                Err(LoadError::NotCallable { entrypoint, kind })
            }
            Ok(HarnessReply::Unserializable { error }) => {
                Err(LoadError::Unavailable { reason: error })
            }
            Err(reason) => Err(LoadError::Unavailable { reason }),
        }
    }
}

/// Invocable bound to a Python entrypoint living in its own worker.
///
/// The worker received its own copy of the source at load time, so later
/// writes to the artifact file never change what a registered capability
/// executes.
struct PythonCallable {
    worker: Worker,
    entrypoint: String,
}

impl std::fmt::Debug for PythonCallable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PythonCallable")
            .field("module", &self.worker.module)
            .field("entrypoint", &self.entrypoint)
            .field("pid", &self.worker.pid)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Invocable for PythonCallable {
    async fn invoke(&self, arguments: Arguments) -> InvocationResult<Value> {
        let request = CallRequest { kwargs: &arguments };
        match self
            .worker
            .exchange(&request)
            .await
            .map_err(InvocationError::runtime)?
        {
            HarnessReply::Ok { value } => Ok(value),
            HarnessReply::Raised { exception, error } => {
                Err(InvocationError::raised(exception, error))
            }
            HarnessReply::Unserializable { error } => Err(InvocationError::runtime(format!(
                "result of `{}` could not be serialized: {error}",
                self.entrypoint
            ))),
            other => Err(InvocationError::runtime(format!(
                "unexpected reply from worker of `{}`: {other:?}",
                self.entrypoint
            ))),
        }
    }
}

/// Long-lived interpreter serving one capability.
///
/// Dropping the worker kills the interpreter.
struct Worker {
    module: String,
    pid: Option<u32>,
    io: Mutex<WorkerIo>,
    stderr: Arc<StderrTail>,
}

struct WorkerIo {
    child: Child,
    stdin: ChildStdin,
    replies: Lines<BufReader<ChildStdout>>,
    stopped: Option<String>,
}

impl Worker {
    fn spawn(interpreter: &Path, module: String) -> std::io::Result<Self> {
        let mut child = Command::new(interpreter)
            .arg("-c")
            .arg(HARNESS)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("worker stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("worker stdout was not captured"))?;
        let stderr = Arc::new(StderrTail::default());
        if let Some(pipe) = child.stderr.take() {
            tokio::spawn(drain_stderr(pipe, module.clone(), stderr.clone()));
        }

        Ok(Self {
            pid: child.id(),
            module,
            io: Mutex::new(WorkerIo {
                child,
                stdin,
                replies: BufReader::new(stdout).lines(),
                stopped: None,
            }),
            stderr,
        })
    }

    /// Sends one request line and waits for its reply. Calls are serialized;
    /// a call abandoned midway (for example by a timeout) stops the worker,
    /// since its reply would otherwise answer the next request.
    async fn exchange<T: Serialize>(&self, request: &T) -> Result<HarnessReply, String> {
        let mut line = serde_json::to_vec(request)
            .map_err(|err| format!("failed to encode harness request: {err}"))?;
        line.push(b'\n');

        let mut io = self.io.lock().await;
        if let Some(reason) = &io.stopped {
            return Err(reason.clone());
        }

        let mut pending = PendingExchange {
            io: &mut *io,
            settled: false,
        };
        let result = pending.io.round_trip(&line, &self.stderr).await;
        pending.settled = true;
        if let Err(reason) = &result {
            warn!(module = %self.module, reason = %reason, "capability worker stopped");
            pending
                .io
                .stop(format!("capability worker is not running: {reason}"));
        }
        result
    }
}

impl WorkerIo {
    async fn round_trip(
        &mut self,
        line: &[u8],
        stderr: &StderrTail,
    ) -> Result<HarnessReply, String> {
        let io_error = |err: std::io::Error| format!("worker pipe failed: {err}");
        self.stdin.write_all(line).await.map_err(io_error)?;
        self.stdin.flush().await.map_err(io_error)?;

        while let Some(text) = self.replies.next_line().await.map_err(io_error)? {
            if let Some(json) = text.strip_prefix(REPLY_MARKER) {
                return serde_json::from_str(json)
                    .map_err(|err| format!("undecodable worker reply: {err}"));
            }
        }

        let status = match self.child.try_wait() {
            Ok(Some(status)) => status.to_string(),
            _ => "an unknown status".to_owned(),
        };
        Err(format!(
            "interpreter exited with {status} without a result: {}",
            stderr.snapshot()
        ))
    }

    fn stop(&mut self, reason: String) {
        if let Err(err) = self.child.start_kill() {
            debug!(error = %err, "worker already exited");
        }
        self.stopped = Some(reason);
    }
}

/// Marks the worker stopped unless the exchange ran to completion.
struct PendingExchange<'a> {
    io: &'a mut WorkerIo,
    settled: bool,
}

impl Drop for PendingExchange<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.io
                .stop("capability worker was stopped after an interrupted call".to_owned());
        }
    }
}

/// Trailing stderr output of a worker, for diagnostics.
#[derive(Debug, Default)]
struct StderrTail(StdMutex<String>);

impl StderrTail {
    fn push(&self, line: &str) {
        let mut buffer = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.push_str(line);
        buffer.push('\n');
        if buffer.len() > STDERR_TAIL * 2 {
            let kept = tail(&buffer).to_owned();
            *buffer = kept;
        }
    }

    fn snapshot(&self) -> String {
        let buffer = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        tail(&buffer).to_owned()
    }
}

async fn drain_stderr(pipe: ChildStderr, module: String, sink: Arc<StderrTail>) {
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(module = %module, line = %line, "capability stderr");
        sink.push(&line);
    }
}

fn tail(text: &str) -> &str {
    let text = text.trim();
    if text.len() <= STDERR_TAIL {
        return text;
    }
    let mut start = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

async fn run_captured(command: &mut Command) -> Result<Output, EnvironmentError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| EnvironmentError::new(format!("failed to start interpreter: {err}")))
}

/// Package environment managed through `pip` of a Python interpreter.
#[derive(Clone, Debug)]
pub struct PythonEnvironment {
    interpreter: PathBuf,
}

impl Default for PythonEnvironment {
    fn default() -> Self {
        Self::new(default_interpreter())
    }
}

impl PythonEnvironment {
    /// Creates an environment probing the supplied interpreter.
    #[must_use]
    pub fn new(interpreter: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.interpreter)
    }

    async fn module_available(&self, module: &str) -> Result<bool, EnvironmentError> {
        let output = run_captured(self.command().arg("-c").arg(CHECK_MODULE).arg(module)).await?;
        Ok(output.status.success())
    }
}

#[async_trait]
impl PackageEnvironment for PythonEnvironment {
    async fn is_isolated(&self) -> Result<bool, EnvironmentError> {
        let output = run_captured(self.command().arg("-c").arg(CHECK_ISOLATED)).await?;
        if !output.status.success() {
            return Err(EnvironmentError::new(format!(
                "interpreter check exited with {}: {}",
                output.status,
                tail(&String::from_utf8_lossy(&output.stderr))
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim() == "True")
    }

    async fn has_package_manager(&self) -> Result<bool, EnvironmentError> {
        self.module_available("pip").await
    }

    async fn bootstrap_package_manager(&self) -> Result<(), EnvironmentError> {
        let output = run_captured(self.command().args(["-m", "ensurepip", "--upgrade"])).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(EnvironmentError::new(tail(&String::from_utf8_lossy(
                &output.stderr,
            ))))
        }
    }

    async fn is_installed(&self, dependency: &str) -> Result<bool, EnvironmentError> {
        self.module_available(dependency).await
    }

    async fn install(&self, requirement: &str) -> Result<(), EnvironmentError> {
        let output = run_captured(
            self.command()
                .args(["-m", "pip", "install", "--disable-pip-version-check"])
                .arg(requirement),
        )
        .await?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let diagnostic = if stderr.trim().is_empty() {
            format!("pip exited with {}", output.status)
        } else {
            format!("pip exited with {}: {}", output.status, tail(&stderr))
        };
        Err(EnvironmentError::new(diagnostic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn reply_variants_decode() {
        let reply: HarnessReply =
            serde_json::from_str(r#"{"status": "missing_entrypoint"}"#).unwrap();
        assert_eq!(reply, HarnessReply::MissingEntrypoint);

        let reply: HarnessReply =
            serde_json::from_str(r#"{"status": "not_callable", "kind": "int"}"#).unwrap();
        assert_eq!(
            reply,
            HarnessReply::NotCallable {
                kind: "int".into()
            }
        );

        let reply: HarnessReply =
            serde_json::from_str(r#"{"status": "ok", "value": null}"#).unwrap();
        assert_eq!(reply, HarnessReply::Ok { value: Value::Null });
    }

    #[test]
    fn load_request_carries_source_and_package_root() {
        let request = LoadRequest {
            module: "capabilities.echo",
            path: Path::new("runtime_tools/echo.py"),
            root: Some(Path::new("runtime_tools")),
            source: "def run_echo(*, msg): return msg",
            entrypoint: "run_echo",
        };

        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded["module"], "capabilities.echo");
        assert_eq!(encoded["root"], "runtime_tools");
        assert_eq!(encoded["entrypoint"], "run_echo");
    }

    #[test]
    fn call_request_is_a_single_line() {
        let mut kwargs = Arguments::new();
        kwargs.insert("text".into(), json!("two\nlines"));
        let encoded = serde_json::to_string(&CallRequest { kwargs: &kwargs }).unwrap();
        assert!(!encoded.contains('\n'));
        assert_eq!(
            serde_json::from_str::<Value>(&encoded).unwrap(),
            json!({"kwargs": {"text": "two\nlines"}})
        );
    }

    #[test]
    fn tail_keeps_the_end_of_long_output() {
        let long = format!("{}END", "x".repeat(STDERR_TAIL * 2));
        let kept = tail(&long);
        assert_eq!(kept.len(), STDERR_TAIL);
        assert!(kept.ends_with("END"));
        assert_eq!(tail("  short \n"), "short");
    }

    #[test]
    fn stderr_tail_stays_bounded() {
        let sink = StderrTail::default();
        for n in 0..1_000 {
            sink.push(&format!("line {n}"));
        }
        let snapshot = sink.snapshot();
        assert!(snapshot.len() <= STDERR_TAIL);
        assert!(snapshot.ends_with("line 999"));
    }

    #[test]
    fn runtime_describes_python_artifacts() {
        let runtime = PythonRuntime::new("python3");
        assert_eq!(runtime.extension(), "py");
        assert_eq!(runtime.package_marker(), Some("__init__.py"));
        assert_eq!(runtime.interpreter(), Path::new("python3"));
    }

    #[tokio::test]
    async fn missing_interpreter_is_reported_as_unavailable() {
        let dir = std::env::temp_dir();
        let runtime = PythonRuntime::new("/nonexistent/toolsmith/python");
        let unit = SourceUnit::new(
            toolsmith_primitives::CapabilityName::new("echo").unwrap(),
            "def run(): pass",
            "run",
            dir.join("echo.py"),
        );
        let err = runtime.load(unit).await.err().expect("no interpreter");
        assert!(matches!(err, LoadError::Unavailable { .. }));
    }
}
