//! Tool contract and extension hook chain
//!
//! Concrete tool bodies live outside the core; the loop only sees
//! [`AgentTool`]. Extensions interpose on every call through [`HookedTool`]:
//! `on_tool_call` hooks may rewrite params or abort, `on_tool_result` hooks
//! may rewrite the result. Hook errors before execute are fatal to the call;
//! hook errors after execute are swallowed and the original result wins.

use crate::error::ToolError;
use crate::types::{Content, ToolDef};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result of a tool execution.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub content: Vec<Content>,
    pub details: Option<Value>,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            details: None,
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            details: None,
            is_error: true,
        }
    }
}

/// Progress update reported by a running tool.
#[derive(Debug, Clone)]
pub struct ToolUpdate {
    /// "progress", "log" or "error"
    pub kind: String,
    pub message: String,
    pub data: Option<Value>,
}

/// Callback for tool progress updates. Currently a sink in the loop.
pub type ToolUpdateFn = dyn Fn(ToolUpdate) + Send + Sync;

/// A tool callable by the agent.
#[async_trait]
pub trait AgentTool: Send + Sync {
    /// Definition advertised to the LLM.
    fn definition(&self) -> ToolDef;

    /// Human label for display purposes.
    fn label(&self) -> String {
        self.definition().name
    }

    /// Run the tool. `cancel` fires when the turn is aborted; tools honour
    /// it on a best-effort basis.
    async fn execute(
        &self,
        cancel: CancellationToken,
        call_id: &str,
        params: &Map<String, Value>,
        on_update: &ToolUpdateFn,
    ) -> Result<ToolOutput, ToolError>;
}

/// An extension that can register tools and interpose on tool calls.
#[async_trait]
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.0.0"
    }

    fn description(&self) -> &str {
        ""
    }

    /// Tools contributed by this extension; they join the registry at
    /// startup, side-by-side with built-ins.
    fn tools(&self) -> Vec<Arc<dyn AgentTool>> {
        Vec::new()
    }

    /// Called before a tool executes. Return rewritten params, or `None` for
    /// no change. An error aborts the call.
    async fn on_tool_call(
        &self,
        _tool_name: &str,
        _params: &Map<String, Value>,
    ) -> Result<Option<Map<String, Value>>, ToolError> {
        Ok(None)
    }

    /// Called after a tool executes. Return a rewritten result, or `None`
    /// for no change. Errors are swallowed; the prior result wins.
    async fn on_tool_result(
        &self,
        _tool_name: &str,
        _result: &ToolOutput,
    ) -> Result<Option<ToolOutput>, ToolError> {
        Ok(None)
    }

    async fn on_agent_start(&self) {}

    async fn on_agent_end(&self) {}
}

/// Registry of loaded extensions, in load order.
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: Vec<Arc<dyn Extension>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, extension: Arc<dyn Extension>) {
        self.extensions.push(extension);
    }

    pub fn list(&self) -> &[Arc<dyn Extension>] {
        &self.extensions
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// All tools contributed by registered extensions.
    pub fn tools(&self) -> Vec<Arc<dyn AgentTool>> {
        self.extensions.iter().flat_map(|e| e.tools()).collect()
    }

    pub async fn notify_agent_start(&self) {
        for ext in &self.extensions {
            ext.on_agent_start().await;
        }
    }

    pub async fn notify_agent_end(&self) {
        for ext in &self.extensions {
            ext.on_agent_end().await;
        }
    }
}

/// Wraps a tool so every execute runs through the extension hook chain.
pub struct HookedTool {
    inner: Arc<dyn AgentTool>,
    extensions: Arc<ExtensionRegistry>,
}

impl HookedTool {
    pub fn new(inner: Arc<dyn AgentTool>, extensions: Arc<ExtensionRegistry>) -> Self {
        Self { inner, extensions }
    }
}

#[async_trait]
impl AgentTool for HookedTool {
    fn definition(&self) -> ToolDef {
        self.inner.definition()
    }

    fn label(&self) -> String {
        self.inner.label()
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        call_id: &str,
        params: &Map<String, Value>,
        on_update: &ToolUpdateFn,
    ) -> Result<ToolOutput, ToolError> {
        let name = self.inner.definition().name;

        let mut effective = params.clone();
        for ext in self.extensions.list() {
            if let Some(rewritten) = ext.on_tool_call(&name, &effective).await? {
                effective = rewritten;
            }
        }

        let mut result = self
            .inner
            .execute(cancel, call_id, &effective, on_update)
            .await?;

        for ext in self.extensions.list() {
            match ext.on_tool_result(&name, &result).await {
                Ok(Some(rewritten)) => result = rewritten,
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(
                        extension = ext.name(),
                        tool = %name,
                        "on_tool_result hook failed: {err}"
                    );
                }
            }
        }

        Ok(result)
    }
}

/// Wrap every tool with the extension hook chain. No-op when no extensions
/// are loaded.
pub fn wrap_tools(
    tools: Vec<Arc<dyn AgentTool>>,
    extensions: Arc<ExtensionRegistry>,
) -> Vec<Arc<dyn AgentTool>> {
    if extensions.is_empty() {
        return tools;
    }
    tools
        .into_iter()
        .map(|tool| Arc::new(HookedTool::new(tool, Arc::clone(&extensions))) as Arc<dyn AgentTool>)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct EchoTool;

    #[async_trait]
    impl AgentTool for EchoTool {
        fn definition(&self) -> ToolDef {
            ToolDef {
                name: "echo".to_string(),
                description: "Echo back the input".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }),
            }
        }

        async fn execute(
            &self,
            _cancel: CancellationToken,
            _call_id: &str,
            params: &Map<String, Value>,
            _on_update: &ToolUpdateFn,
        ) -> Result<ToolOutput, ToolError> {
            let text = params
                .get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| ToolError::invalid_arguments("echo", "missing text"))?;
            Ok(ToolOutput::text(text))
        }
    }

    struct RewritingExtension;

    #[async_trait]
    impl Extension for RewritingExtension {
        fn name(&self) -> &str {
            "rewriter"
        }

        async fn on_tool_call(
            &self,
            _tool_name: &str,
            params: &Map<String, Value>,
        ) -> Result<Option<Map<String, Value>>, ToolError> {
            let mut rewritten = params.clone();
            rewritten.insert("text".to_string(), json!("rewritten"));
            Ok(Some(rewritten))
        }
    }

    struct AbortingExtension;

    #[async_trait]
    impl Extension for AbortingExtension {
        fn name(&self) -> &str {
            "aborter"
        }

        async fn on_tool_call(
            &self,
            tool_name: &str,
            _params: &Map<String, Value>,
        ) -> Result<Option<Map<String, Value>>, ToolError> {
            Err(ToolError::other(format!("{tool_name} blocked")))
        }
    }

    struct FailingResultHook {
        called: Mutex<bool>,
    }

    #[async_trait]
    impl Extension for FailingResultHook {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn on_tool_result(
            &self,
            _tool_name: &str,
            _result: &ToolOutput,
        ) -> Result<Option<ToolOutput>, ToolError> {
            *self.called.lock().unwrap() = true;
            Err(ToolError::other("post hook failure"))
        }
    }

    fn sink(_update: ToolUpdate) {}

    fn args(text: &str) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("text".to_string(), json!(text));
        m
    }

    #[tokio::test]
    async fn pre_hook_rewrites_params() {
        let mut registry = ExtensionRegistry::new();
        registry.register(Arc::new(RewritingExtension));
        let tool = HookedTool::new(Arc::new(EchoTool), Arc::new(registry));

        let out = tool
            .execute(CancellationToken::new(), "c1", &args("original"), &sink)
            .await
            .unwrap();
        assert_eq!(crate::types::extract_text(&out.content), "rewritten");
    }

    #[tokio::test]
    async fn pre_hook_error_aborts_call() {
        let mut registry = ExtensionRegistry::new();
        registry.register(Arc::new(AbortingExtension));
        let tool = HookedTool::new(Arc::new(EchoTool), Arc::new(registry));

        let err = tool
            .execute(CancellationToken::new(), "c1", &args("x"), &sink)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("blocked"));
    }

    #[tokio::test]
    async fn post_hook_error_is_swallowed() {
        let hook = Arc::new(FailingResultHook {
            called: Mutex::new(false),
        });
        let mut registry = ExtensionRegistry::new();
        registry.register(hook.clone());
        let tool = HookedTool::new(Arc::new(EchoTool), Arc::new(registry));

        let out = tool
            .execute(CancellationToken::new(), "c1", &args("kept"), &sink)
            .await
            .unwrap();
        assert!(*hook.called.lock().unwrap());
        assert_eq!(crate::types::extract_text(&out.content), "kept");
    }

    #[tokio::test]
    async fn wrap_tools_applies_hooks_to_every_tool() {
        let mut registry = ExtensionRegistry::new();
        registry.register(Arc::new(RewritingExtension));
        let wrapped = wrap_tools(vec![Arc::new(EchoTool)], Arc::new(registry));
        assert_eq!(wrapped.len(), 1);

        let out = wrapped[0]
            .execute(CancellationToken::new(), "c1", &args("original"), &sink)
            .await
            .unwrap();
        assert_eq!(crate::types::extract_text(&out.content), "rewritten");

        // Without extensions the tools pass through untouched.
        let plain = wrap_tools(vec![Arc::new(EchoTool)], Arc::new(ExtensionRegistry::new()));
        let out = plain[0]
            .execute(CancellationToken::new(), "c1", &args("kept"), &sink)
            .await
            .unwrap();
        assert_eq!(crate::types::extract_text(&out.content), "kept");
    }

    #[tokio::test]
    async fn hooks_run_in_load_order() {
        struct Appender(&'static str);

        #[async_trait]
        impl Extension for Appender {
            fn name(&self) -> &str {
                self.0
            }

            async fn on_tool_call(
                &self,
                _tool_name: &str,
                params: &Map<String, Value>,
            ) -> Result<Option<Map<String, Value>>, ToolError> {
                let prior = params.get("text").and_then(Value::as_str).unwrap_or("");
                let mut rewritten = params.clone();
                rewritten.insert("text".to_string(), json!(format!("{prior}{}", self.0)));
                Ok(Some(rewritten))
            }
        }

        let mut registry = ExtensionRegistry::new();
        registry.register(Arc::new(Appender("a")));
        registry.register(Arc::new(Appender("b")));
        let tool = HookedTool::new(Arc::new(EchoTool), Arc::new(registry));

        let out = tool
            .execute(CancellationToken::new(), "c1", &args(""), &sink)
            .await
            .unwrap();
        assert_eq!(crate::types::extract_text(&out.content), "ab");
    }
}
