//! 任务计划标记解析
//!
//! 模型在文本中嵌入两类标记：
//! - `<todo_plan>[{"stepNumber":1,"title":"..."}]</todo_plan>`：仅首轮，声明步骤计划
//! - `<step_done>N</step_done>`：第 N 步完成
//!
//! 这里用一个小扫描器提取标记，不依赖正则；所有函数无副作用，返回新列表。
//! 标记损坏时一律降级为「无计划 / 无步骤」，不报错。

use serde::Deserialize;

use crate::session::{TodoItem, TodoStatus};

pub const PLAN_OPEN: &str = "<todo_plan>";
pub const PLAN_CLOSE: &str = "</todo_plan>";
pub const STEP_OPEN: &str = "<step_done>";
pub const STEP_CLOSE: &str = "</step_done>";

/// 步骤数不超过此值的计划不安装
pub const MIN_PLAN_STEPS: usize = 2;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanStep {
    step_number: u32,
    title: String,
}

/// 依次返回 open/close 之间的内容。
/// 未闭合的块结束扫描；块内再次出现 open 时以最内层为准。
fn tagged_blocks<'a>(text: &'a str, open: &str, close: &str) -> Vec<&'a str> {
    let mut blocks = Vec::new();
    let mut pos = 0;
    while let Some(rel) = text[pos..].find(open) {
        let body_start = pos + rel + open.len();
        let Some(close_rel) = text[body_start..].find(close) else {
            break;
        };
        let mut body = &text[body_start..body_start + close_rel];
        if let Some(inner) = body.rfind(open) {
            body = &body[inner + open.len()..];
        }
        blocks.push(body);
        pos = body_start + close_rel + close.len();
    }
    blocks
}

/// 去掉 ``` / ```json 围栏
pub(crate) fn unfence(body: &str) -> &str {
    let trimmed = body.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn parse_plan_body(body: &str) -> Option<Vec<TodoItem>> {
    let steps: Vec<PlanStep> = match serde_json::from_str(unfence(body)) {
        Ok(steps) => steps,
        Err(e) => {
            tracing::debug!(error = %e, "todo plan body is not a step array");
            return None;
        }
    };
    // stepNumber 必须从 1 连续递增
    let contiguous = steps
        .iter()
        .enumerate()
        .all(|(i, s)| s.step_number as usize == i + 1);
    if !contiguous {
        tracing::debug!("todo plan step numbers are not contiguous from 1");
        return None;
    }
    Some(
        steps
            .into_iter()
            .map(|s| TodoItem::new(s.step_number, s.title.trim()))
            .collect(),
    )
}

/// 提取计划：第一个格式正确的块生效；不超过两步、缺失、未闭合或非 JSON 时返回 None
pub fn parse_todo_plan(text: &str) -> Option<Vec<TodoItem>> {
    let plan = tagged_blocks(text, PLAN_OPEN, PLAN_CLOSE)
        .into_iter()
        .find_map(parse_plan_body)?;
    if plan.len() <= MIN_PLAN_STEPS {
        tracing::debug!(steps = plan.len(), "todo plan too short, ignored");
        return None;
    }
    Some(plan)
}

/// 提取已完成步骤号：最后一个格式正确的标记生效
pub fn parse_current_step(text: &str) -> Option<u32> {
    tagged_blocks(text, STEP_OPEN, STEP_CLOSE)
        .into_iter()
        .filter_map(|body| body.trim().parse::<u32>().ok())
        .filter(|&n| n > 0)
        .last()
}

/// 替换指定步骤的状态；找不到时原样返回
pub fn update_todo_item_status(list: &[TodoItem], step_number: u32, status: TodoStatus) -> Vec<TodoItem> {
    list.iter()
        .map(|item| {
            if item.step_number == step_number {
                TodoItem {
                    status,
                    ..item.clone()
                }
            } else {
                item.clone()
            }
        })
        .collect()
}

pub fn mark_step_as_running(list: &[TodoItem], step_number: u32) -> Vec<TodoItem> {
    update_todo_item_status(list, step_number, TodoStatus::Running)
}

/// 第 1..=step 步标记为完成，下一步转为 running；返回新列表与新的当前步骤 id（没有下一步时为 None）
pub fn complete_through(list: &[TodoItem], step_number: u32) -> (Vec<TodoItem>, Option<String>) {
    let mut next_id = None;
    let items = list
        .iter()
        .map(|item| {
            let status = if item.step_number <= step_number {
                TodoStatus::Success
            } else if next_id.is_none() {
                next_id = Some(item.id.clone());
                TodoStatus::Running
            } else {
                item.status
            };
            TodoItem {
                status,
                ..item.clone()
            }
        })
        .collect();
    (items, next_id)
}

/// 运行结束：剩余 pending / running 步骤一律视为完成
pub fn finish_remaining(list: &[TodoItem]) -> Vec<TodoItem> {
    list.iter()
        .map(|item| TodoItem {
            status: TodoStatus::Success,
            ..item.clone()
        })
        .collect()
}

fn remove_tagged(text: &str, open: &str, close: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    while let Some(rel) = text[pos..].find(open) {
        let start = pos + rel;
        let Some(close_rel) = text[start + open.len()..].find(close) else {
            break;
        };
        out.push_str(&text[pos..start]);
        pos = start + open.len() + close_rel + close.len();
    }
    out.push_str(&text[pos..]);
    out
}

/// 去掉计划块与步骤标记，供展示最终回复
pub fn strip_markers(text: &str) -> String {
    let without_plan = remove_tagged(text, PLAN_OPEN, PLAN_CLOSE);
    remove_tagged(&without_plan, STEP_OPEN, STEP_CLOSE)
        .trim()
        .to_string()
}
