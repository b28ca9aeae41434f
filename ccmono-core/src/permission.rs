//! Pattern-based permission policy for tool execution
//!
//! Evaluation order: deny patterns, then allow patterns, then ask the user.
//! Rules look like `Bash(git:*)`, `Read(*)` or `Write(/home/user/src/*)` and
//! live in the global settings file (loaded first) and the project-local one
//! (extends global). Remembered answers are appended idempotently; unknown
//! fields in the settings files survive rewrites.

use crate::error::PermissionError;
use crate::types::{now_millis, ToolCall};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Wall-clock timeout for unanswered permission prompts.
pub const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Coarse severity of a requested operation. The UI auto-approves `Safe`
/// requests without a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Safe,
    Medium,
    Dangerous,
}

/// Which settings file a remembered rule is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PermissionScope {
    #[default]
    Project,
    Global,
}

/// Outcome of policy evaluation for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    AutoAllow,
    AutoDeny,
    MustAsk,
}

/// A request for permission to run a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub tool_name: String,
    /// e.g. "read", "write", "execute"
    pub action: String,
    /// e.g. file path, command line
    pub resource: String,
    pub params: Map<String, Value>,
    pub risk_level: RiskLevel,
    pub description: String,
    pub request_id: String,
    pub timestamp: i64,
}

impl PermissionRequest {
    /// Build a request for a tool call, deriving resource, risk and
    /// description from well-known parameter shapes.
    pub fn for_tool_call(call: &ToolCall) -> Self {
        let mut request = Self {
            tool_name: call.name.clone(),
            action: "execute".to_string(),
            resource: extract_resource(call),
            params: call.params.clone(),
            risk_level: RiskLevel::Safe,
            description: describe_tool_call(call),
            request_id: String::new(),
            timestamp: 0,
        };
        request.risk_level = analyze_risk(&request);
        request
    }
}

/// A user's answer to a permission request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionResponse {
    pub request_id: String,
    pub allowed: bool,
    pub remember: bool,
    pub scope: PermissionScope,
    pub timestamp: i64,
}

/// Permissions section of a settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionSettings {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// A settings file. Unknown top-level fields round-trip unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<PermissionSettings>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Default)]
struct PatternSet {
    allow: Vec<String>,
    deny: Vec<String>,
}

/// A registered prompt awaiting its answer. Obtained from
/// [`PermissionManager::register`]; the request id is assigned before the
/// caller publishes the request event, so observers always see a routable id.
pub struct PendingPermission {
    request_id: String,
    rx: oneshot::Receiver<PermissionResponse>,
}

impl PendingPermission {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

/// Manages tool execution permissions: policy evaluation, asynchronous
/// prompting, and persistent rule capture.
pub struct PermissionManager {
    patterns: RwLock<PatternSet>,
    pending: Mutex<HashMap<String, PermissionRequest>>,
    responders: Mutex<HashMap<String, oneshot::Sender<PermissionResponse>>>,
    global_path: PathBuf,
    project_path: PathBuf,
    prompt_timeout: Duration,
}

impl PermissionManager {
    /// Create a manager reading `settings.json` under `global_config_dir`
    /// and `.cc-mono/settings.local.json` under `project_dir`. Missing files
    /// are fine; unreadable ones are an error.
    pub fn new(
        global_config_dir: impl AsRef<Path>,
        project_dir: impl AsRef<Path>,
    ) -> Result<Self, PermissionError> {
        let manager = Self {
            patterns: RwLock::new(PatternSet::default()),
            pending: Mutex::new(HashMap::new()),
            responders: Mutex::new(HashMap::new()),
            global_path: global_config_dir.as_ref().join("settings.json"),
            project_path: project_dir
                .as_ref()
                .join(".cc-mono")
                .join("settings.local.json"),
            prompt_timeout: DEFAULT_PROMPT_TIMEOUT,
        };
        manager.load_patterns()?;
        Ok(manager)
    }

    /// Override the prompt timeout (policy, not invariant).
    pub fn with_prompt_timeout(mut self, timeout: Duration) -> Self {
        self.prompt_timeout = timeout;
        self
    }

    fn load_patterns(&self) -> Result<(), PermissionError> {
        // Global first, project extends.
        for path in [&self.global_path, &self.project_path] {
            let data = match std::fs::read(path) {
                Ok(data) => data,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(PermissionError::Persist(err.to_string())),
            };
            let settings: Settings = serde_json::from_slice(&data)
                .map_err(|err| PermissionError::Persist(err.to_string()))?;
            if let Some(perms) = settings.permissions {
                let mut patterns = self.patterns.write().expect("patterns lock");
                for p in perms.allow {
                    if !patterns.allow.contains(&p) {
                        patterns.allow.push(p);
                    }
                }
                for p in perms.deny {
                    if !patterns.deny.contains(&p) {
                        patterns.deny.push(p);
                    }
                }
            }
        }
        Ok(())
    }

    /// Evaluate the policy for a request: deny wins over allow, no match
    /// means the user must be asked.
    pub fn check_permission(&self, request: &PermissionRequest) -> PermissionDecision {
        let pattern = generate_pattern(request);
        let patterns = self.patterns.read().expect("patterns lock");

        if patterns.deny.iter().any(|rule| match_pattern(&pattern, rule)) {
            return PermissionDecision::AutoDeny;
        }
        if patterns
            .allow
            .iter()
            .any(|rule| match_pattern(&pattern, rule))
        {
            return PermissionDecision::AutoAllow;
        }
        PermissionDecision::MustAsk
    }

    /// Assign a request id and register a response slot. The caller should
    /// publish the request to observers, then [`wait`](Self::wait) on the
    /// returned handle.
    pub fn register(&self, request: &mut PermissionRequest) -> PendingPermission {
        if request.request_id.is_empty() {
            request.request_id = generate_request_id(request);
        }
        request.timestamp = now_millis();

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending lock")
            .insert(request.request_id.clone(), request.clone());
        self.responders
            .lock()
            .expect("responders lock")
            .insert(request.request_id.clone(), tx);

        PendingPermission {
            request_id: request.request_id.clone(),
            rx,
        }
    }

    /// Block until the request is answered, the context is cancelled, or the
    /// prompt timeout elapses. Timeouts and cancellation deny by default.
    pub async fn wait(
        &self,
        request: &PermissionRequest,
        pending: PendingPermission,
        cancel: &CancellationToken,
    ) -> Result<PermissionResponse, PermissionError> {
        let outcome = tokio::select! {
            answer = pending.rx => answer.map_err(|_| PermissionError::Cancelled),
            _ = cancel.cancelled() => Err(PermissionError::Cancelled),
            _ = tokio::time::sleep(self.prompt_timeout) => Err(PermissionError::Timeout),
        };

        self.remove_pending(&pending.request_id);

        let response = outcome?;
        if response.remember {
            if let Err(err) = self.save_pattern(request, response.allowed, response.scope) {
                tracing::warn!("failed to save permission rule: {err}");
            }
        }
        Ok(response)
    }

    /// Register and wait in one step.
    pub async fn request_permission(
        &self,
        cancel: &CancellationToken,
        request: &mut PermissionRequest,
    ) -> Result<PermissionResponse, PermissionError> {
        let pending = self.register(request);
        let request = request.clone();
        self.wait(&request, pending, cancel).await
    }

    /// Route a user's answer to the pending request with the given id.
    pub fn respond(
        &self,
        request_id: &str,
        allowed: bool,
        remember: bool,
        scope: PermissionScope,
    ) -> Result<(), PermissionError> {
        let tx = self
            .responders
            .lock()
            .expect("responders lock")
            .remove(request_id)
            .ok_or_else(|| PermissionError::UnknownRequest(request_id.to_string()))?;

        let response = PermissionResponse {
            request_id: request_id.to_string(),
            allowed,
            remember,
            scope,
            timestamp: now_millis(),
        };
        tx.send(response)
            .map_err(|_| PermissionError::UnknownRequest(request_id.to_string()))
    }

    /// Look up a pending request by id.
    pub fn pending_request(&self, request_id: &str) -> Option<PermissionRequest> {
        self.pending
            .lock()
            .expect("pending lock")
            .get(request_id)
            .cloned()
    }

    fn remove_pending(&self, request_id: &str) {
        self.pending.lock().expect("pending lock").remove(request_id);
        self.responders
            .lock()
            .expect("responders lock")
            .remove(request_id);
    }

    fn save_pattern(
        &self,
        request: &PermissionRequest,
        allowed: bool,
        scope: PermissionScope,
    ) -> Result<(), PermissionError> {
        let pattern = generate_pattern(request);
        let path = match scope {
            PermissionScope::Global => &self.global_path,
            PermissionScope::Project => &self.project_path,
        };

        let mut settings: Settings = match std::fs::read(path) {
            Ok(data) if !data.is_empty() => serde_json::from_slice(&data)
                .map_err(|err| PermissionError::Persist(err.to_string()))?,
            Ok(_) => Settings::default(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Settings::default(),
            Err(err) => return Err(PermissionError::Persist(err.to_string())),
        };

        let perms = settings.permissions.get_or_insert_with(Default::default);
        let list = if allowed {
            &mut perms.allow
        } else {
            &mut perms.deny
        };
        if list.contains(&pattern) {
            return Ok(());
        }
        list.push(pattern.clone());

        {
            let mut patterns = self.patterns.write().expect("patterns lock");
            let memory = if allowed {
                &mut patterns.allow
            } else {
                &mut patterns.deny
            };
            if !memory.contains(&pattern) {
                memory.push(pattern);
            }
        }

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|err| PermissionError::Persist(err.to_string()))?;
        }
        let data = serde_json::to_vec_pretty(&settings)
            .map_err(|err| PermissionError::Persist(err.to_string()))?;
        std::fs::write(path, data).map_err(|err| PermissionError::Persist(err.to_string()))
    }
}

/// Generate the pattern for a request: `Bash(<cmd>:*)`, `Read(*)`,
/// `Write(<dir>/*)`, `<Name>(*)`.
pub fn generate_pattern(request: &PermissionRequest) -> String {
    let lower = request.tool_name.to_lowercase();
    match lower.as_str() {
        "bash" => {
            if let Some(cmd) = request.params.get("command").and_then(Value::as_str) {
                if let Some(first) = cmd.split_whitespace().next() {
                    return format!("Bash({first}:*)");
                }
            }
            "Bash(*)".to_string()
        }
        "read" => "Read(*)".to_string(),
        "write" | "edit" => {
            let name = capitalize(&lower);
            let path = Path::new(&request.resource);
            if path.is_absolute() {
                if let Some(dir) = path.parent() {
                    return format!("{name}({}/*)", dir.display());
                }
            }
            format!("{name}(*)")
        }
        _ => format!("{}(*)", capitalize(&lower)),
    }
}

/// Match a request pattern against a rule: exact equality, or prefix match
/// against the rule's literal text up to its first `*`.
pub fn match_pattern(request_pattern: &str, rule: &str) -> bool {
    if request_pattern == rule {
        return true;
    }
    if let Some(prefix) = rule.split('*').next() {
        if rule.contains('*') {
            return request_pattern.starts_with(prefix);
        }
    }
    false
}

const DANGEROUS_PATHS: &[&str] = &[
    "/etc", "/System", "/usr/bin", "/usr/sbin", "/bin", "/sbin", "/.ssh", "/.gnupg",
];

const DANGEROUS_COMMANDS: &[&str] = &[
    "rm -rf", "sudo", "chmod", "chown", "dd", "mkfs", "fdisk", "> /dev/",
];

const SAFE_COMMANDS: &[&str] = &[
    "ls", "pwd", "echo", "cat", "head", "tail", "grep", "find", "which", "whoami", "date", "uname",
];

/// Classify the risk of a request.
pub fn analyze_risk(request: &PermissionRequest) -> RiskLevel {
    let tool = request.tool_name.to_lowercase();

    if tool == "read" {
        return RiskLevel::Safe;
    }

    // `/.ssh` must also catch `$HOME/.ssh/...`, hence the substring check.
    for path in DANGEROUS_PATHS {
        if request.resource.starts_with(path) || request.resource.contains(path) {
            return RiskLevel::Dangerous;
        }
    }

    if tool == "bash" {
        let Some(cmd) = request.params.get("command").and_then(Value::as_str) else {
            return RiskLevel::Medium;
        };
        let lowered = cmd.to_lowercase();
        if DANGEROUS_COMMANDS.iter().any(|frag| lowered.contains(frag)) {
            return RiskLevel::Dangerous;
        }
        if let Some(first) = cmd.split_whitespace().next() {
            if SAFE_COMMANDS.contains(&first) {
                return RiskLevel::Safe;
            }
        }
        return RiskLevel::Medium;
    }

    if tool == "write" || tool == "edit" {
        return RiskLevel::Medium;
    }

    RiskLevel::Safe
}

/// Extract the resource identifier from a tool call.
pub fn extract_resource(call: &ToolCall) -> String {
    match call.name.as_str() {
        "Read" | "Write" | "Edit" => call.str_param("file_path").unwrap_or("").to_string(),
        "Bash" => call.str_param("command").unwrap_or("").to_string(),
        _ => String::new(),
    }
}

/// Human-readable description of a tool call.
pub fn describe_tool_call(call: &ToolCall) -> String {
    match call.name.as_str() {
        "Read" => {
            if let Some(path) = call.str_param("file_path") {
                return format!("Read file: {path}");
            }
        }
        "Write" => {
            if let Some(path) = call.str_param("file_path") {
                return format!("Write file: {path}");
            }
        }
        "Edit" => {
            if let Some(path) = call.str_param("file_path") {
                return format!("Edit file: {path}");
            }
        }
        "Bash" => {
            if let Some(cmd) = call.str_param("command") {
                return format!("Execute command: {cmd}");
            }
        }
        _ => {}
    }
    format!("Execute tool: {}", call.name)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn generate_request_id(request: &PermissionRequest) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let seed = format!(
        "{}:{}:{}:{}",
        request.tool_name, request.action, request.resource, nanos
    );
    let digest = Sha256::digest(seed.as_bytes());
    hex_encode(&digest[..8])
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
