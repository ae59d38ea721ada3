//! SDK modules offered to submissions: a minimal `http` client and thin
//! `openai` / `anthropic` chat clients. Requests are blocking; hooks run on
//! a blocking worker, never on the async executor.

use std::sync::Arc;
use std::time::Duration;

use hookscript::runtime::modules::module as build_module;
use hookscript::{
    json_to_value, value_to_json, Arity, CallArgs, Class, Evaluator, Instance, Module,
    ModuleRegistry, RuntimeError, RuntimeResult, Value,
};
use indexmap::IndexMap;
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::{json, Value as JsonValue};

const DEFAULT_TIMEOUT_SECS: f64 = 60.0;
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_DEFAULT_MAX_TOKENS: i64 = 1024;

pub fn register(registry: &ModuleRegistry) {
    registry.register(http_module());
    registry.register(openai_module());
    registry.register(anthropic_module());
}

/// Builds a guest exception of builtin class `class` carrying `message`.
fn raise(ev: &mut Evaluator, class: &str, message: String) -> RuntimeError {
    let Some(class) = ev.runtime().class(class) else {
        return RuntimeError::Generic(message);
    };
    match ev.instantiate(&class, CallArgs::new(vec![Value::Str(message)])) {
        Ok(exception) => ev.make_exception(exception).unwrap_or_else(|err| err),
        Err(err) => err,
    }
}

fn timeout_arg(value: Option<&Value>) -> RuntimeResult<Duration> {
    let seconds = match value {
        None | Some(Value::None) => DEFAULT_TIMEOUT_SECS,
        Some(value) => value
            .as_float()
            .ok_or_else(|| RuntimeError::TypeError("timeout must be a number".into()))?,
    };
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(RuntimeError::ValueError("timeout must be a positive number".into()));
    }
    Ok(Duration::from_secs_f64(seconds))
}

fn str_arg<'a>(args: &'a CallArgs, index: usize, name: &str) -> RuntimeResult<&'a str> {
    args.get(index, name)
        .and_then(Value::as_str)
        .ok_or_else(|| RuntimeError::TypeError(format!("'{}' must be a string", name)))
}

fn optional(args: &CallArgs, index: usize, name: &str) -> Option<Value> {
    args.get(index, name).filter(|v| !v.is_none()).cloned()
}

fn apply_headers(
    mut request: RequestBuilder,
    headers: Option<Value>,
) -> RuntimeResult<RequestBuilder> {
    if let Some(headers) = headers {
        match value_to_json(&headers)? {
            JsonValue::Object(map) => {
                for (name, value) in map {
                    let value = match value {
                        JsonValue::String(s) => s,
                        other => other.to_string(),
                    };
                    request = request.header(name, value);
                }
            }
            _ => return Err(RuntimeError::TypeError("headers must be a dict".into())),
        }
    }
    Ok(request)
}

/// Status code and body of a completed request.
struct Reply {
    status: u16,
    text: String,
}

fn send(ev: &mut Evaluator, request: RequestBuilder) -> RuntimeResult<Reply> {
    let response = request.send().map_err(|e| {
        let class = if e.is_timeout() { "TimeoutError" } else { "ConnectionError" };
        raise(ev, class, e.to_string())
    })?;
    let status = response.status().as_u16();
    let text = response
        .text()
        .map_err(|e| raise(ev, "ConnectionError", e.to_string()))?;
    Ok(Reply { status, text })
}

fn http_client(ev: &mut Evaluator, timeout: Duration) -> RuntimeResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| raise(ev, "RuntimeError", format!("Failed to create HTTP client: {}", e)))
}

fn reply_value(reply: Reply) -> Value {
    let json = serde_json::from_str::<JsonValue>(&reply.text)
        .map(|json| json_to_value(&json))
        .unwrap_or(Value::None);
    Value::str_dict([
        ("status", Value::Int(reply.status as i64)),
        ("text", Value::Str(reply.text)),
        ("json", json),
    ])
}

fn http_module() -> Module {
    build_module(
        "http",
        vec![
            (
                "get",
                Value::builtin("get", Arity::Range(1, 3), |ev, args| {
                    let url = str_arg(&args, 0, "url")?.to_string();
                    let client = http_client(ev, timeout_arg(args.get(2, "timeout"))?)?;
                    let request = apply_headers(client.get(url), optional(&args, 1, "headers"))?;
                    send(ev, request).map(reply_value)
                }),
            ),
            (
                "post",
                Value::builtin("post", Arity::Range(1, 4), |ev, args| {
                    let url = str_arg(&args, 0, "url")?.to_string();
                    let client = http_client(ev, timeout_arg(args.get(3, "timeout"))?)?;
                    let mut request =
                        apply_headers(client.post(url), optional(&args, 2, "headers"))?;
                    if let Some(body) = optional(&args, 1, "json") {
                        request = request.json(&value_to_json(&body)?);
                    }
                    send(ev, request).map(reply_value)
                }),
            ),
        ],
    )
}

/// Payloads of `data:` lines in a server-sent event stream.
fn sse_events(body: &str) -> impl Iterator<Item = JsonValue> + '_ {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty() && *data != "[DONE]")
        .filter_map(|data| serde_json::from_str(data).ok())
}

fn openai_stream_text(body: &str) -> String {
    sse_events(body)
        .filter_map(|event| {
            event["choices"][0]["delta"]["content"]
                .as_str()
                .map(str::to_string)
        })
        .collect()
}

fn anthropic_stream_text(body: &str) -> String {
    sse_events(body)
        .filter(|event| event["type"] == "content_block_delta")
        .filter_map(|event| event["delta"]["text"].as_str().map(str::to_string))
        .collect()
}

fn client_receiver(args: &CallArgs) -> RuntimeResult<Arc<Instance>> {
    match args.arg(0) {
        Some(Value::Instance(instance)) => Ok(instance.clone()),
        _ => Err(RuntimeError::TypeError("method requires a client instance".into())),
    }
}

fn client_attr(client: &Instance, name: &str) -> Option<String> {
    client
        .get_attr(name)
        .and_then(|v| v.as_str().map(str::to_string))
}

/// `__init__(self, api_key=None, base_url=None, timeout=None)` shared by
/// both vendor clients.
fn client_init(default_base_url: &'static str) -> Value {
    Value::builtin("__init__", Arity::Range(1, 4), move |_, args| {
        let client = client_receiver(&args)?;
        client.set_attr("api_key", args.get(1, "api_key").cloned().unwrap_or(Value::None));
        let base_url = optional(&args, 2, "base_url")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| default_base_url.to_string());
        client.set_attr("base_url", Value::Str(base_url.trim_end_matches('/').to_string()));
        client.set_attr("timeout", args.get(3, "timeout").cloned().unwrap_or(Value::None));
        Ok(Value::None)
    })
}

fn api_error(ev: &mut Evaluator, vendor: &str, reply: &Reply) -> RuntimeError {
    raise(
        ev,
        "RuntimeError",
        format!("{} API error {}: {}", vendor, reply.status, reply.text),
    )
}

fn openai_body(args: &CallArgs, stream: bool) -> RuntimeResult<JsonValue> {
    let mut body = json!({
        "model": str_arg(args, 1, "model")?,
        "messages": value_to_json(args.get(2, "messages").unwrap_or(&Value::None))?,
    });
    if let Some(max_tokens) = optional(args, 3, "max_tokens") {
        body["max_tokens"] = value_to_json(&max_tokens)?;
    }
    if let Some(temperature) = optional(args, 4, "temperature") {
        body["temperature"] = value_to_json(&temperature)?;
    }
    if stream {
        body["stream"] = JsonValue::Bool(true);
    }
    Ok(body)
}

fn openai_request(ev: &mut Evaluator, args: &CallArgs, stream: bool) -> RuntimeResult<String> {
    let client = client_receiver(args)?;
    let body = openai_body(args, stream)?;
    let base_url = client_attr(&client, "base_url").unwrap_or_else(|| OPENAI_BASE_URL.into());
    let http = http_client(ev, timeout_arg(client.get_attr("timeout").as_ref())?)?;
    let mut request = http.post(format!("{}/chat/completions", base_url)).json(&body);
    if let Some(key) = client_attr(&client, "api_key") {
        request = request.bearer_auth(key);
    }
    let reply = send(ev, request)?;
    if reply.status >= 400 {
        return Err(api_error(ev, "OpenAI", &reply));
    }
    if stream {
        return Ok(openai_stream_text(&reply.text));
    }
    let json: JsonValue = serde_json::from_str(&reply.text)
        .map_err(|e| raise(ev, "ValueError", format!("invalid OpenAI response: {}", e)))?;
    Ok(json["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string())
}

fn openai_module() -> Module {
    let class = Arc::new(Class::new("OpenAI", Vec::new(), IndexMap::new()));
    class.set_attr("__init__", client_init(OPENAI_BASE_URL));
    // chat(self, model, messages, max_tokens=None, temperature=None)
    class.set_attr(
        "chat",
        Value::builtin("chat", Arity::Range(1, 5), |ev, args| {
            openai_request(ev, &args, false).map(Value::Str)
        }),
    );
    class.set_attr(
        "chat_stream",
        Value::builtin("chat_stream", Arity::Range(1, 5), |ev, args| {
            openai_request(ev, &args, true).map(Value::Str)
        }),
    );
    build_module("openai", vec![("OpenAI", Value::Class(class))])
}

fn anthropic_body(args: &CallArgs, stream: bool) -> RuntimeResult<JsonValue> {
    let max_tokens = optional(args, 4, "max_tokens")
        .and_then(|v| v.as_int())
        .unwrap_or(ANTHROPIC_DEFAULT_MAX_TOKENS);
    let mut body = json!({
        "model": str_arg(args, 1, "model")?,
        "messages": value_to_json(args.get(2, "messages").unwrap_or(&Value::None))?,
        "max_tokens": max_tokens,
    });
    if let Some(system) = optional(args, 3, "system") {
        body["system"] = value_to_json(&system)?;
    }
    if let Some(temperature) = optional(args, 5, "temperature") {
        body["temperature"] = value_to_json(&temperature)?;
    }
    if stream {
        body["stream"] = JsonValue::Bool(true);
    }
    Ok(body)
}

fn anthropic_request(ev: &mut Evaluator, args: &CallArgs, stream: bool) -> RuntimeResult<String> {
    let client = client_receiver(args)?;
    let body = anthropic_body(args, stream)?;
    let base_url = client_attr(&client, "base_url").unwrap_or_else(|| ANTHROPIC_BASE_URL.into());
    let http = http_client(ev, timeout_arg(client.get_attr("timeout").as_ref())?)?;
    let mut request = http
        .post(format!("{}/v1/messages", base_url))
        .header("anthropic-version", ANTHROPIC_VERSION)
        .json(&body);
    if let Some(key) = client_attr(&client, "api_key") {
        request = request.header("x-api-key", key);
    }
    let reply = send(ev, request)?;
    if reply.status >= 400 {
        return Err(api_error(ev, "Anthropic", &reply));
    }
    if stream {
        return Ok(anthropic_stream_text(&reply.text));
    }
    let json: JsonValue = serde_json::from_str(&reply.text)
        .map_err(|e| raise(ev, "ValueError", format!("invalid Anthropic response: {}", e)))?;
    Ok(json["content"][0]["text"].as_str().unwrap_or_default().to_string())
}

fn anthropic_module() -> Module {
    let class = Arc::new(Class::new("Anthropic", Vec::new(), IndexMap::new()));
    class.set_attr("__init__", client_init(ANTHROPIC_BASE_URL));
    // messages(self, model, messages, system=None, max_tokens=1024, temperature=None)
    class.set_attr(
        "messages",
        Value::builtin("messages", Arity::Range(1, 6), |ev, args| {
            anthropic_request(ev, &args, false).map(Value::Str)
        }),
    );
    class.set_attr(
        "messages_stream",
        Value::builtin("messages_stream", Arity::Range(1, 6), |ev, args| {
            anthropic_request(ev, &args, true).map(Value::Str)
        }),
    );
    build_module("anthropic", vec![("Anthropic", Value::Class(class))])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages() -> Value {
        Value::list(vec![Value::str_dict([
            ("role", Value::str("user")),
            ("content", Value::str("hi")),
        ])])
    }

    #[test]
    fn test_openai_stream_accumulates_deltas() {
        let body = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
                    data: [DONE]\n";
        assert_eq!(openai_stream_text(body), "Hello");
    }

    #[test]
    fn test_anthropic_stream_keeps_text_deltas_only() {
        let body = "event: message_start\ndata: {\"type\":\"message_start\"}\n\n\
                    event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi \"}}\n\n\
                    event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"there\"}}\n\n\
                    event: message_stop\ndata: {\"type\":\"message_stop\"}\n";
        assert_eq!(anthropic_stream_text(body), "Hi there");
    }

    #[test]
    fn test_openai_body_skips_none_options() {
        let args = CallArgs::new(vec![Value::None, Value::str("gpt-x"), messages()])
            .keyword("max_tokens", Value::Int(10))
            .keyword("temperature", Value::None);
        let body = openai_body(&args, true).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "gpt-x",
                "messages": [{"role": "user", "content": "hi"}],
                "max_tokens": 10,
                "stream": true,
            })
        );
    }

    #[test]
    fn test_anthropic_body_defaults_max_tokens() {
        let args = CallArgs::new(vec![Value::None, Value::str("claude"), messages()])
            .keyword("system", Value::str("be brief"));
        let body = anthropic_body(&args, false).unwrap();
        assert_eq!(body["max_tokens"], json!(ANTHROPIC_DEFAULT_MAX_TOKENS));
        assert_eq!(body["system"], json!("be brief"));
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_timeout_validation() {
        assert_eq!(timeout_arg(None).unwrap(), Duration::from_secs(60));
        assert_eq!(timeout_arg(Some(&Value::Int(5))).unwrap(), Duration::from_secs(5));
        assert!(timeout_arg(Some(&Value::Float(-1.0))).is_err());
    }
}
