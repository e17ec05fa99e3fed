//! `{{key}}` 占位符渲染
//!
//! 单次扫描替换，替换后的值不会再被当作模板解析。值原样插入，不做HTML转义。

use serde_json::{Map, Value};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// 渲染模板，缺失的键替换为空字符串
pub fn render(template: &str, data: &Map<String, Value>) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        output.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];

        match after_open.find(CLOSE) {
            Some(end) if is_placeholder_key(&after_open[..end]) => {
                let key = &after_open[..end];
                if let Some(value) = data.get(key) {
                    output.push_str(&value_to_string(value));
                }
                rest = &after_open[end + CLOSE.len()..];
            }
            _ => {
                // 不是合法占位符，保留一个 `{` 后继续扫描
                output.push('{');
                rest = &rest[start + 1..];
            }
        }
    }

    output.push_str(rest);
    output
}

/// JSON值的字符串形式：字符串原样输出，`null` 为空，其余使用紧凑JSON
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// 键可以包含空格、连字符和非ASCII字符，只排除空键和花括号
fn is_placeholder_key(candidate: &str) -> bool {
    !candidate.is_empty() && !candidate.contains(['{', '}'])
}
