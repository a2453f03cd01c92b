//! 工具参数 JSON Schema 生成（schemars）
//!
//! 参数结构体 derive JsonSchema，这里转成发给模型的 `parameters` 对象。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 生成参数 schema；去掉 `$schema` / `title` 等对模型无用的顶层字段
pub fn schema_of<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| Value::Object(Default::default()));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
        obj.entry("properties")
            .or_insert_with(|| Value::Object(Default::default()));
    }
    value
}
