//! 流式响应解码
//!
//! 响应体是按行分隔的记录：`data: {json}` 携带 `choices[0].delta.content`；
//! 流开始前服务商可能直接返回一个裸 JSON 错误对象 `{code, msg}`；`data: [DONE]` 为结束哨兵。
//! 字节块可能在任意位置（包括 UTF-8 字符中间）被切开，解码器只处理完整的行。

use std::collections::VecDeque;

use futures_util::{stream, Stream, StreamExt};
use serde_json::Value;

use crate::llm::{ChatStream, LlmError, StreamEvent};

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// 增量行解码器
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// 输入一段字节，返回其中完整行解出的事件
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<StreamEvent, LlmError>> {
        if self.done {
            return Vec::new();
        }
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(ev) = self.decode_line(&String::from_utf8_lossy(&line)) {
                events.push(ev);
            }
            if self.done {
                self.buffer.clear();
                break;
            }
        }
        events
    }

    /// 流结束：处理缓冲区中最后一行（没有换行结尾的情况）
    pub fn finish(&mut self) -> Vec<Result<StreamEvent, LlmError>> {
        if self.done || self.buffer.is_empty() {
            return Vec::new();
        }
        let rest = std::mem::take(&mut self.buffer);
        self.decode_line(&String::from_utf8_lossy(&rest))
            .into_iter()
            .collect()
    }

    fn decode_line(&mut self, line: &str) -> Option<Result<StreamEvent, LlmError>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            return None;
        }

        if let Some(payload) = line.strip_prefix(DATA_PREFIX) {
            let payload = payload.trim();
            if payload == DONE_SENTINEL {
                self.done = true;
                return Some(Ok(StreamEvent::Done));
            }
            let value: Value = match serde_json::from_str(payload) {
                Ok(v) => v,
                Err(e) => return Some(Err(LlmError::Decode(format!("{}: {}", e, payload)))),
            };
            if let Some(err) = provider_error(&value) {
                return Some(Err(err));
            }
            return delta_content(&value).map(|text| Ok(StreamEvent::Delta(text)));
        }

        // 裸 JSON：服务商在进入 SSE 之前返回的错误
        if line.starts_with('{') {
            return match serde_json::from_str::<Value>(line) {
                Ok(value) => provider_error(&value).map(Err),
                Err(e) => Some(Err(LlmError::Decode(format!("{}: {}", e, line)))),
            };
        }

        tracing::debug!(line, "ignoring non-data stream line");
        None
    }
}

/// `{code, msg}`，code 非 0 视为错误；code 可能是数字或字符串
fn provider_error(value: &Value) -> Option<LlmError> {
    let code = value.get("code")?;
    let code = code
        .as_i64()
        .or_else(|| code.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(-1);
    if code == 0 {
        return None;
    }
    let msg = value
        .get("msg")
        .or_else(|| value.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or("unknown provider error")
        .to_string();
    Some(LlmError::Provider { code, msg })
}

fn delta_content(value: &Value) -> Option<String> {
    let text = value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()?;
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// 将字节流包装为事件流
pub fn decode_stream<S, B, E>(bytes: S) -> ChatStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    let state = (
        Box::pin(bytes),
        SseDecoder::new(),
        VecDeque::<Result<StreamEvent, LlmError>>::new(),
        false,
    );
    Box::pin(stream::unfold(
        state,
        |(mut bytes, mut decoder, mut pending, mut finished)| async move {
            loop {
                if let Some(ev) = pending.pop_front() {
                    return Some((ev, (bytes, decoder, pending, finished)));
                }
                if finished {
                    return None;
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => {
                        pending.extend(decoder.feed(chunk.as_ref()));
                        if decoder.is_done() {
                            finished = true;
                        }
                    }
                    Some(Err(e)) => {
                        finished = true;
                        pending.push_back(Err(LlmError::Http(e.to_string())));
                    }
                    None => {
                        finished = true;
                        pending.extend(decoder.finish());
                    }
                }
            }
        },
    ))
}
