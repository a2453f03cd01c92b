//! 领域工具：项目 / 接口节点 / 变量
//!
//! Workspace 为内存中的接口设计工作区；各工具只是其上的薄封装，参数结构体 derive JsonSchema 生成 schema。
//! 业务失败（项目不存在等）以非 0 code 返回，参数非法返回 ToolExecutionFailed。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::core::AgentError;
use crate::session::new_id;
use crate::tools::{schema_of, Tool, ToolOutput, ToolRegistry};

/// 业务错误码
pub const CODE_NOT_FOUND: i32 = 404;
pub const CODE_CONFLICT: i32 = 409;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// 接口节点（一条 HTTP 接口定义）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiNode {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub method: String,
    pub url: String,
}

#[derive(Default)]
struct WorkspaceInner {
    projects: Vec<Project>,
    nodes: Vec<ApiNode>,
    /// project_id -> (key -> value)
    variables: BTreeMap<String, BTreeMap<String, String>>,
}

/// 内存工作区
#[derive(Default)]
pub struct Workspace {
    inner: RwLock<WorkspaceInner>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// 演示数据：两个项目，若干接口与变量
    pub async fn demo() -> Arc<Self> {
        let ws = Arc::new(Self::new());
        let petstore = ws.create_project("Petstore", "Sample pet store API").await;
        let billing = ws.create_project("Billing", "Invoices and payments").await;
        for (name, method, url) in [
            ("List pets", "GET", "/pets"),
            ("Create pet", "POST", "/pets"),
            ("Get pet", "GET", "/pets/{id}"),
        ] {
            let _ = ws.create_node(&petstore.id, name, method, url).await;
        }
        let _ = ws.create_node(&billing.id, "List invoices", "GET", "/invoices").await;
        let _ = ws.set_variable(&petstore.id, "baseUrl", "https://petstore.example.com").await;
        let _ = ws.set_variable(&billing.id, "baseUrl", "https://billing.example.com").await;
        ws
    }

    pub async fn projects(&self) -> Vec<Project> {
        self.inner.read().await.projects.clone()
    }

    pub async fn create_project(&self, name: &str, description: &str) -> Project {
        let project = Project {
            id: new_id(),
            name: name.to_string(),
            description: description.to_string(),
        };
        self.inner.write().await.projects.push(project.clone());
        project
    }

    pub async fn nodes(&self, project_id: &str) -> Option<Vec<ApiNode>> {
        let inner = self.inner.read().await;
        if !inner.projects.iter().any(|p| p.id == project_id) {
            return None;
        }
        Some(
            inner
                .nodes
                .iter()
                .filter(|n| n.project_id == project_id)
                .cloned()
                .collect(),
        )
    }

    pub async fn create_node(&self, project_id: &str, name: &str, method: &str, url: &str) -> Option<ApiNode> {
        let mut inner = self.inner.write().await;
        if !inner.projects.iter().any(|p| p.id == project_id) {
            return None;
        }
        let node = ApiNode {
            id: new_id(),
            project_id: project_id.to_string(),
            name: name.to_string(),
            method: method.to_uppercase(),
            url: url.to_string(),
        };
        inner.nodes.push(node.clone());
        Some(node)
    }

    /// 删除节点；返回是否存在
    pub async fn delete_node(&self, node_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        let before = inner.nodes.len();
        inner.nodes.retain(|n| n.id != node_id);
        inner.nodes.len() != before
    }

    pub async fn variables(&self, project_id: &str) -> Option<BTreeMap<String, String>> {
        let inner = self.inner.read().await;
        if !inner.projects.iter().any(|p| p.id == project_id) {
            return None;
        }
        Some(inner.variables.get(project_id).cloned().unwrap_or_default())
    }

    pub async fn set_variable(&self, project_id: &str, key: &str, value: &str) -> Option<()> {
        let mut inner = self.inner.write().await;
        if !inner.projects.iter().any(|p| p.id == project_id) {
            return None;
        }
        inner
            .variables
            .entry(project_id.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Some(())
    }
}

/// 解析工具参数；null 视为空对象
fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, AgentError> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args)
        .map_err(|e| AgentError::ToolExecutionFailed(format!("{}: invalid arguments: {}", tool, e)))
}

fn not_found(what: &str, id: &str) -> ToolOutput {
    ToolOutput::fail(CODE_NOT_FOUND, json!({ "error": format!("{} not found: {}", what, id) }))
}

fn to_data<T: Serialize>(value: &T) -> Result<Value, AgentError> {
    serde_json::to_value(value).map_err(|e| AgentError::ToolExecutionFailed(e.to_string()))
}

#[derive(Deserialize, JsonSchema)]
struct NoArgs {}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct ProjectArgs {
    /// 项目 id
    project_id: String,
}

#[derive(Deserialize, JsonSchema)]
struct CreateProjectArgs {
    /// 项目名称
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct CreateNodeArgs {
    project_id: String,
    /// 接口名称
    name: String,
    /// HTTP 方法，如 GET / POST
    method: String,
    /// 请求路径或完整 URL
    url: String,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct NodeArgs {
    node_id: String,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct SetVariableArgs {
    project_id: String,
    key: String,
    value: String,
}

pub struct GetProjectListTool {
    workspace: Arc<Workspace>,
}

#[async_trait]
impl Tool for GetProjectListTool {
    fn name(&self) -> &str {
        "get_project_list"
    }

    fn description(&self) -> &str {
        "List all API projects in the workspace (id, name, description)."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<NoArgs>()
    }

    async fn execute(&self, _args: Value) -> Result<ToolOutput, AgentError> {
        Ok(ToolOutput::ok(to_data(&self.workspace.projects().await)?))
    }
}

pub struct CreateProjectTool {
    workspace: Arc<Workspace>,
}

#[async_trait]
impl Tool for CreateProjectTool {
    fn name(&self) -> &str {
        "create_project"
    }

    fn description(&self) -> &str {
        "Create a new API project with a name and optional description."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<CreateProjectArgs>()
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, AgentError> {
        let args: CreateProjectArgs = parse_args(self.name(), args)?;
        let name = args.name.trim();
        if name.is_empty() {
            return Err(AgentError::ToolExecutionFailed("project name is required".to_string()));
        }
        if self.workspace.projects().await.iter().any(|p| p.name == name) {
            return Ok(ToolOutput::fail(
                CODE_CONFLICT,
                json!({ "error": format!("project already exists: {}", name) }),
            ));
        }
        let project = self.workspace.create_project(name, &args.description).await;
        Ok(ToolOutput::ok(to_data(&project)?))
    }
}

pub struct GetNodeListTool {
    workspace: Arc<Workspace>,
}

#[async_trait]
impl Tool for GetNodeListTool {
    fn name(&self) -> &str {
        "get_node_list"
    }

    fn description(&self) -> &str {
        "List the API endpoints (nodes) of a project."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ProjectArgs>()
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, AgentError> {
        let args: ProjectArgs = parse_args(self.name(), args)?;
        match self.workspace.nodes(&args.project_id).await {
            Some(nodes) => Ok(ToolOutput::ok(to_data(&nodes)?)),
            None => Ok(not_found("project", &args.project_id)),
        }
    }
}

pub struct CreateNodeTool {
    workspace: Arc<Workspace>,
}

#[async_trait]
impl Tool for CreateNodeTool {
    fn name(&self) -> &str {
        "create_node"
    }

    fn description(&self) -> &str {
        "Create an API endpoint (node) in a project with a name, HTTP method and URL."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<CreateNodeArgs>()
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, AgentError> {
        let args: CreateNodeArgs = parse_args(self.name(), args)?;
        match self
            .workspace
            .create_node(&args.project_id, &args.name, &args.method, &args.url)
            .await
        {
            Some(node) => Ok(ToolOutput::ok(to_data(&node)?)),
            None => Ok(not_found("project", &args.project_id)),
        }
    }
}

pub struct DeleteNodeTool {
    workspace: Arc<Workspace>,
}

#[async_trait]
impl Tool for DeleteNodeTool {
    fn name(&self) -> &str {
        "delete_node"
    }

    fn description(&self) -> &str {
        "Delete an API endpoint (node) by id. Requires user confirmation."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<NodeArgs>()
    }

    fn need_confirm(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, AgentError> {
        let args: NodeArgs = parse_args(self.name(), args)?;
        if self.workspace.delete_node(&args.node_id).await {
            Ok(ToolOutput::ok(json!({ "deleted": args.node_id })))
        } else {
            Ok(not_found("node", &args.node_id))
        }
    }
}

pub struct GetVariableListTool {
    workspace: Arc<Workspace>,
}

#[async_trait]
impl Tool for GetVariableListTool {
    fn name(&self) -> &str {
        "get_variable_list"
    }

    fn description(&self) -> &str {
        "List the environment variables of a project as key/value pairs."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ProjectArgs>()
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, AgentError> {
        let args: ProjectArgs = parse_args(self.name(), args)?;
        match self.workspace.variables(&args.project_id).await {
            Some(vars) => Ok(ToolOutput::ok(to_data(&vars)?)),
            None => Ok(not_found("project", &args.project_id)),
        }
    }
}

pub struct SetVariableTool {
    workspace: Arc<Workspace>,
}

#[async_trait]
impl Tool for SetVariableTool {
    fn name(&self) -> &str {
        "set_variable"
    }

    fn description(&self) -> &str {
        "Create or update an environment variable of a project."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<SetVariableArgs>()
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, AgentError> {
        let args: SetVariableArgs = parse_args(self.name(), args)?;
        match self
            .workspace
            .set_variable(&args.project_id, &args.key, &args.value)
            .await
        {
            Some(()) => Ok(ToolOutput::ok(json!({ "key": args.key, "value": args.value }))),
            None => Ok(not_found("project", &args.project_id)),
        }
    }
}

/// 注册全部领域工具
pub fn register_catalog(registry: &mut ToolRegistry, workspace: Arc<Workspace>) {
    registry.register(GetProjectListTool {
        workspace: workspace.clone(),
    });
    registry.register(CreateProjectTool {
        workspace: workspace.clone(),
    });
    registry.register(GetNodeListTool {
        workspace: workspace.clone(),
    });
    registry.register(CreateNodeTool {
        workspace: workspace.clone(),
    });
    registry.register(DeleteNodeTool {
        workspace: workspace.clone(),
    });
    registry.register(GetVariableListTool {
        workspace: workspace.clone(),
    });
    registry.register(SetVariableTool { workspace });
}
