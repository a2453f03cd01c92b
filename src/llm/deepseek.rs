//! DeepSeek 后端：OpenAI 兼容接口，复用 OpenAiClient

use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// DEEPSEEK_API_KEY 优先，其次 OPENAI_API_KEY；都没有时返回 None（调用方退回 Mock）
pub fn deepseek_api_key() -> Option<String> {
    std::env::var("DEEPSEEK_API_KEY")
        .or_else(|_| std::env::var("OPENAI_API_KEY"))
        .ok()
        .filter(|k| !k.trim().is_empty())
}

/// 创建 DeepSeek 客户端
///
/// 模型依次取 `model` 参数、`DEEPSEEK_MODEL`、deepseek-chat；base_url 未配置时用官方地址。
pub fn create_deepseek_client(model: Option<&str>, base_url: Option<&str>) -> Option<OpenAiClient> {
    let api_key = deepseek_api_key()?;
    let model = resolve_model(model, std::env::var("DEEPSEEK_MODEL").ok());
    let base_url = base_url.unwrap_or(DEEPSEEK_BASE_URL);
    Some(OpenAiClient::new(Some(base_url), &model, Some(api_key.as_str())))
}

fn resolve_model(explicit: Option<&str>, from_env: Option<String>) -> String {
    explicit
        .map(String::from)
        .or(from_env)
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string())
}
