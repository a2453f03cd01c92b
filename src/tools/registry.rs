//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / need_confirm / execute），
//! 由 ToolRegistry 按注册顺序保存、按名查找。进程生命周期内不可变。
//! ToolSet 是一次循环运行实际暴露给模型的工具子集。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;
use crate::llm::ToolSpec;

/// 工具执行结果：code == 0 表示成功
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub code: i32,
    pub data: Value,
}

impl ToolOutput {
    pub fn ok(data: Value) -> Self {
        Self { code: 0, data }
    }

    pub fn fail(code: i32, data: Value) -> Self {
        Self { code, data }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、是否需要用户确认、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 全局唯一的工具名
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema
    /// 默认返回空对象，表示无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行前是否需要用户确认
    fn need_confirm(&self) -> bool {
        false
    }

    /// 执行工具；返回 Err(AgentError::Aborted) 时取消会直接向上传播
    async fn execute(&self, args: Value) -> Result<ToolOutput, AgentError>;
}

/// 供工具筛选使用的摘要（仅名称 + 描述）
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
}

/// 工具注册表：保持注册顺序，按名称索引
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；同名工具替换旧实现
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&i) => self.tools[i] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| self.tools[i].clone())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    /// 完整工具列表（执行用）
    pub fn definitions(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.clone()
    }

    /// 轻量摘要（筛选用）
    pub fn summaries(&self) -> Vec<ToolSummary> {
        self.tools
            .iter()
            .map(|t| ToolSummary {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect()
    }

    /// 全量工具集
    pub fn full_set(&self) -> ToolSet {
        ToolSet {
            tools: self.tools.clone(),
            narrowed: false,
        }
    }

    /// 按名称取子集（保持注册顺序，忽略未知名称）；覆盖全部工具时视为全量
    pub fn subset(&self, names: &[String]) -> ToolSet {
        let tools: Vec<Arc<dyn Tool>> = self
            .tools
            .iter()
            .filter(|t| names.iter().any(|n| n == t.name()))
            .cloned()
            .collect();
        let narrowed = tools.len() < self.tools.len();
        ToolSet { tools, narrowed }
    }
}

/// 一次循环运行可用的工具
#[derive(Clone)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
    narrowed: bool,
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>())
            .field("narrowed", &self.narrowed)
            .finish()
    }
}

impl ToolSet {
    /// 是否为筛选后的子集（决定是否允许回退到全量）
    pub fn is_narrowed(&self) -> bool {
        self.narrowed
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    /// 转为发给模型的工具定义
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }
}
