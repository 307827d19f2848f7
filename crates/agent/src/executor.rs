//! Tool executor: resolves model-issued calls and runs them.
//!
//! Resolution (catalog lookup, argument parsing, defaults, schema check) is
//! separate from execution so a whole step can be vetted before any
//! executor runs.

use futures::StreamExt;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use toolloop_core::error::ToolError;
use toolloop_core::message::MessageToolCall;
use toolloop_core::schema;
use toolloop_core::tool::{Tool, ToolCall, ToolCatalog, ToolResult};
use tracing::{debug, warn};

/// A call that passed lookup and validation.
#[derive(Clone)]
pub enum ResolvedCall {
    /// Runs in-process
    Local { call: ToolCall, tool: Arc<dyn Tool> },
    /// Handed back to the caller
    Deferred(ToolCall),
}

impl ResolvedCall {
    pub fn call(&self) -> &ToolCall {
        match self {
            Self::Local { call, .. } | Self::Deferred(call) => call,
        }
    }
}

impl fmt::Debug for ResolvedCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { call, .. } => f.debug_tuple("Local").field(call).finish(),
            Self::Deferred(call) => f.debug_tuple("Deferred").field(call).finish(),
        }
    }
}

/// What happened to a single call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Executed(ToolResult),
    Deferred(ToolCall),
}

/// A finished local execution and how long it took.
#[derive(Debug, Clone)]
pub struct Execution {
    pub result: ToolResult,
    pub duration_ms: u64,
}

/// Resolves and executes tool calls against a catalog.
pub struct ToolExecutor<'a> {
    catalog: &'a ToolCatalog,
    active: Option<&'a [String]>,
}

impl<'a> ToolExecutor<'a> {
    pub fn new(catalog: &'a ToolCatalog) -> Self {
        Self {
            catalog,
            active: None,
        }
    }

    /// Only these tools are callable; others count as unknown.
    pub fn with_active(mut self, active: Option<&'a [String]>) -> Self {
        self.active = active;
        self
    }

    fn lookup(&self, name: &str) -> Option<&'a Arc<dyn Tool>> {
        if let Some(active) = self.active
            && !active.iter().any(|n| n == name)
        {
            return None;
        }
        self.catalog.get(name)
    }

    /// Look up the tool and validate the raw arguments against its schema.
    pub fn resolve(&self, raw: &MessageToolCall) -> Result<ResolvedCall, ToolError> {
        let tool = self
            .lookup(&raw.name)
            .ok_or_else(|| ToolError::UnknownTool(raw.name.clone()))?;

        let arguments = schema::prepare_arguments(&tool.parameters_schema(), &raw.arguments)
            .map_err(|reason| ToolError::InvalidArguments {
                tool_name: raw.name.clone(),
                reason,
            })?;

        let call = ToolCall {
            id: raw.id.clone(),
            name: raw.name.clone(),
            arguments,
        };

        Ok(if tool.has_executor() {
            ResolvedCall::Local {
                call,
                tool: Arc::clone(tool),
            }
        } else {
            ResolvedCall::Deferred(call)
        })
    }

    /// Resolve every call of a step; the first failure wins.
    pub fn resolve_all(
        &self,
        raws: &[MessageToolCall],
    ) -> Result<Vec<ResolvedCall>, ToolError> {
        raws.iter()
            .map(|raw| {
                self.resolve(raw).inspect_err(|e| {
                    warn!(
                        tool = %raw.name,
                        call_id = %raw.id,
                        kind = e.kind(),
                        error = %e,
                        "Rejected tool call"
                    );
                })
            })
            .collect()
    }

    /// Run one resolved local call.
    pub async fn run(call: ToolCall, tool: Arc<dyn Tool>) -> Result<Execution, ToolError> {
        let start = Instant::now();
        let output = tool
            .execute(call.arguments.clone())
            .await
            .map_err(|e| match e {
                ToolError::ExecutionFailed { .. } => e,
                other => ToolError::failed(&call.name, other),
            })?;
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(tool = %call.name, call_id = %call.id, duration_ms, "Tool executed");

        Ok(Execution {
            result: ToolResult {
                call_id: call.id,
                tool_name: call.name,
                arguments: call.arguments,
                output,
            },
            duration_ms,
        })
    }

    /// Resolve and, when the tool has an executor, run a single call.
    pub async fn execute(&self, raw: &MessageToolCall) -> Result<ToolOutcome, ToolError> {
        match self.resolve(raw)? {
            ResolvedCall::Local { call, tool } => {
                Ok(ToolOutcome::Executed(Self::run(call, tool).await?.result))
            }
            ResolvedCall::Deferred(call) => Ok(ToolOutcome::Deferred(call)),
        }
    }

    /// Run local calls with at most `concurrency` in flight.
    ///
    /// Results come back in call order and the first failure aborts the
    /// batch. `observe` sees every attempt that finished.
    pub async fn run_all<F>(
        calls: Vec<(ToolCall, Arc<dyn Tool>)>,
        concurrency: usize,
        observe: F,
    ) -> Result<Vec<Execution>, ToolError>
    where
        F: Fn(&Attempt) + Sync,
    {
        let observe = &observe;
        let pending: Vec<BoxFuture<'_, Result<Execution, ToolError>>> = calls
            .into_iter()
            .map(|(call, tool)| {
                Box::pin(async move {
                    let call_id = call.id.clone();
                    let tool_name = call.name.clone();
                    let start = Instant::now();
                    let outcome = Self::run(call, tool).await;
                    observe(&Attempt {
                        call_id,
                        tool_name,
                        success: outcome.is_ok(),
                        duration_ms: start.elapsed().as_millis() as u64,
                    });
                    outcome
                }) as BoxFuture<'_, _>
            })
            .collect();
        let mut runs = futures::stream::iter(pending).buffered(concurrency.max(1));

        let mut executions = Vec::new();
        while let Some(execution) = runs.next().await {
            executions.push(execution?);
        }
        Ok(executions)
    }
}

/// A finished attempt at running a call, successful or not.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub call_id: String,
    pub tool_name: String,
    pub success: bool,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use toolloop_core::tool::{ClientTool, FunctionTool};

    fn raw(name: &str, args: &str) -> MessageToolCall {
        MessageToolCall {
            id: format!("call_{name}"),
            name: name.into(),
            arguments: args.into(),
        }
    }

    fn catalog(invocations: Arc<AtomicUsize>) -> ToolCatalog {
        ToolCatalog::new()
            .with(FunctionTool::new(
                "weather",
                json!({
                    "type": "object",
                    "properties": {
                        "location": { "type": "string" },
                        "unit": { "type": "string", "default": "celsius" }
                    },
                    "required": ["location"]
                }),
                move |args| {
                    let invocations = invocations.clone();
                    async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        Ok(args)
                    }
                },
            ))
            .unwrap()
            .with(FunctionTool::new("broken", json!({"type": "object"}), |_| async {
                Err(ToolError::failed("broken", "upstream unavailable"))
            }))
            .unwrap()
            .with(ClientTool::new("confirm", json!({"type": "object"})))
            .unwrap()
    }

    #[tokio::test]
    async fn unknown_tool_never_invokes_an_executor() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let catalog = catalog(invocations.clone());
        let err = ToolExecutor::new(&catalog)
            .execute(&raw("ghost", "{}"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unknown-tool");
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn executor_receives_defaulted_arguments() {
        let catalog = catalog(Arc::new(AtomicUsize::new(0)));
        let outcome = ToolExecutor::new(&catalog)
            .execute(&raw("weather", r#"{"location":"Oslo"}"#))
            .await
            .unwrap();
        match outcome {
            ToolOutcome::Executed(result) => {
                assert_eq!(result.output, json!({"location": "Oslo", "unit": "celsius"}));
                assert_eq!(result.arguments, result.output);
                assert_eq!(result.call_id, "call_weather");
            }
            other => panic!("expected execution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_arguments_are_rejected_before_execution() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let catalog = catalog(invocations.clone());
        let err = ToolExecutor::new(&catalog)
            .execute(&raw("weather", r#"{"unit":"kelvin"}"#))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid-arguments");
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn client_tool_is_deferred() {
        let catalog = catalog(Arc::new(AtomicUsize::new(0)));
        let outcome = ToolExecutor::new(&catalog)
            .execute(&raw("confirm", ""))
            .await
            .unwrap();
        assert!(matches!(outcome, ToolOutcome::Deferred(call) if call.arguments == json!({})));
    }

    #[tokio::test]
    async fn inactive_tool_counts_as_unknown() {
        let catalog = catalog(Arc::new(AtomicUsize::new(0)));
        let active = vec!["confirm".to_string()];
        let err = ToolExecutor::new(&catalog)
            .with_active(Some(active.as_slice()))
            .execute(&raw("weather", r#"{"location":"Oslo"}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn executor_failure_is_reported() {
        let catalog = catalog(Arc::new(AtomicUsize::new(0)));
        let err = ToolExecutor::new(&catalog)
            .execute(&raw("broken", "{}"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "executor-failure");
        assert!(err.to_string().contains("upstream unavailable"));
    }

    #[tokio::test]
    async fn resolve_all_stops_at_first_bad_call() {
        let catalog = catalog(Arc::new(AtomicUsize::new(0)));
        let err = ToolExecutor::new(&catalog)
            .resolve_all(&[
                raw("weather", r#"{"location":"Oslo"}"#),
                raw("weather", "{not json"),
                raw("ghost", "{}"),
            ])
            .unwrap_err();
        assert_eq!(err.kind(), "invalid-arguments");
    }

    #[tokio::test]
    async fn run_all_bounds_concurrency_and_keeps_order() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tool: Arc<dyn Tool> = {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            Arc::new(FunctionTool::new("slow", json!({"type": "object"}), move |args| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    // later calls finish first
                    let delay = 40 - args["n"].as_u64().unwrap_or(0) * 5;
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(args["n"].clone())
                }
            }))
        };

        let calls = (0..6)
            .map(|n| {
                (
                    ToolCall {
                        id: format!("call_{n}"),
                        name: "slow".into(),
                        arguments: json!({ "n": n }),
                    },
                    tool.clone(),
                )
            })
            .collect();

        let attempts = std::sync::Mutex::new(Vec::new());
        let executions = ToolExecutor::run_all(calls, 2, |a: &Attempt| {
            attempts.lock().unwrap().push(a.call_id.clone())
        })
        .await
        .unwrap();
        let order: Vec<_> = executions.iter().map(|e| e.result.output.clone()).collect();
        assert_eq!(order, (0..6).map(|n| json!(n)).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
        assert_eq!(attempts.lock().unwrap().len(), 6);
    }
}
