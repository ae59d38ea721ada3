//! Starter code handed to provider authors.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeTemplate {
    pub provider_type: String,
    pub template: String,
    pub description: String,
    pub required_dependencies: Vec<String>,
    pub config_schema: JsonValue,
}

const OPENAI_TEMPLATE: &str = r#"# OpenAI-compatible dynamic provider
#
# Hooks looked up by name:
#   initialize_client()                                 optional, runs once
#   chat_sync(model, prompt, system_prompt=None)        non-streaming reply
#   chat_streaming(model, prompt, system_prompt=None)   full text of a streamed reply
#
# Every configuration entry is visible as a top-level name and refreshed
# before each call: api_key, max_tokens, temperature, base_url.
# Messages use {"role": "system" | "user", "content": text}.
# Return the reply text; returning None is an error.

import openai

try:
    base_url
except NameError:
    base_url = "https://api.openai.com/v1"

try:
    max_tokens
except NameError:
    max_tokens = 1000

try:
    temperature
except NameError:
    temperature = 0.7

client = None


def initialize_client():
    global client
    client = openai.OpenAI(api_key=api_key, base_url=base_url)
    return client


def build_messages(prompt, system_prompt=None):
    messages = []
    if system_prompt:
        messages.append({"role": "system", "content": system_prompt})
    messages.append({"role": "user", "content": prompt})
    return messages


async def chat_sync(model, prompt, system_prompt=None):
    if client is None:
        initialize_client()
    return await asyncio.to_thread(
        client.chat,
        model,
        build_messages(prompt, system_prompt),
        max_tokens=max_tokens,
        temperature=temperature,
    )


async def chat_streaming(model, prompt, system_prompt=None):
    if client is None:
        initialize_client()
    return client.chat_stream(
        model,
        build_messages(prompt, system_prompt),
        max_tokens=max_tokens,
        temperature=temperature,
    )
"#;

const ANTHROPIC_TEMPLATE: &str = r#"# Anthropic dynamic provider
#
# Hooks looked up by name:
#   initialize_client()                                 optional, runs once
#   chat_sync(model, prompt, system_prompt=None)        non-streaming reply
#   chat_streaming(model, prompt, system_prompt=None)   full text of a streamed reply
#
# Injected names: api_key, max_tokens, temperature.
# The system prompt travels separately from the messages list.

import anthropic

try:
    max_tokens
except NameError:
    max_tokens = 1024

try:
    temperature
except NameError:
    temperature = 0.7

client = None


def initialize_client():
    global client
    client = anthropic.Anthropic(api_key=api_key)
    return client


def chat_sync(model, prompt, system_prompt=None):
    if client is None:
        initialize_client()
    return client.messages(
        model,
        [{"role": "user", "content": prompt}],
        system=system_prompt,
        max_tokens=max_tokens,
        temperature=temperature,
    )


def chat_streaming(model, prompt, system_prompt=None):
    if client is None:
        initialize_client()
    return client.messages_stream(
        model,
        [{"role": "user", "content": prompt}],
        system=system_prompt,
        max_tokens=max_tokens,
        temperature=temperature,
    )
"#;

const CLASS_BASED_TEMPLATE: &str = r#"# Class-based dynamic provider (legacy shape)
#
# Used only when no top-level hook functions are defined. The class is
# instantiated with api_key=..., then a single positional key, then every
# configuration entry as keywords, then no arguments.
# Accepted method names:
#   initialize_client: initialize, setup, init_client
#   chat_sync:         chat, generate, complete
#   chat_streaming:    chat_stream, stream, generate_stream

import json


class CompletionProvider:
    def __init__(self, api_key=None, base_url="https://api.openai.com/v1", max_tokens=1000):
        self.api_key = api_key
        self.base_url = base_url
        self.max_tokens = max_tokens

    def headers(self):
        return {"Authorization": "Bearer " + str(self.api_key)}

    def payload(self, model, prompt, system_prompt, stream):
        messages = []
        if system_prompt:
            messages.append({"role": "system", "content": system_prompt})
        messages.append({"role": "user", "content": prompt})
        return {"model": model, "messages": messages, "max_tokens": self.max_tokens, "stream": stream}

    def chat(self, model, prompt, system_prompt=None):
        reply = http.post(
            self.base_url + "/chat/completions",
            json=self.payload(model, prompt, system_prompt, False),
            headers=self.headers(),
        )
        if reply["status"] != 200:
            raise RuntimeError("backend returned " + str(reply["status"]) + ": " + reply["text"])
        return reply["json"]["choices"][0]["message"]["content"]

    def stream(self, model, prompt, system_prompt=None):
        reply = http.post(
            self.base_url + "/chat/completions",
            json=self.payload(model, prompt, system_prompt, True),
            headers=self.headers(),
        )
        text = ""
        for line in reply["text"].split("\n"):
            if not line.startswith("data: ") or line == "data: [DONE]":
                continue
            delta = json.loads(line[6:])["choices"][0]["delta"]
            if "content" in delta and delta["content"]:
                text += delta["content"]
        return text
"#;

/// Template types [`code_template`] knows, in display order.
pub fn available_templates() -> Vec<&'static str> {
    vec!["openai", "anthropic", "class-based"]
}

fn common_schema(default_model: &str) -> JsonValue {
    json!({
        "type": "object",
        "required": ["api_key"],
        "properties": {
            "api_key": {"type": "string", "description": "Backend API key"},
            "max_tokens": {"type": "integer", "default": 1000},
            "temperature": {"type": "number", "default": 0.7},
            "default_model": {"type": "string", "default": default_model}
        }
    })
}

/// Template for `provider_type`. Unknown types get the OpenAI template.
pub fn code_template(provider_type: &str) -> CodeTemplate {
    match provider_type {
        "anthropic" => CodeTemplate {
            provider_type: "anthropic".to_string(),
            template: ANTHROPIC_TEMPLATE.to_string(),
            description: "Anthropic Messages API through the sandbox `anthropic` module".to_string(),
            required_dependencies: vec!["anthropic".to_string()],
            config_schema: common_schema("claude-3-5-sonnet-latest"),
        },
        "class-based" => {
            let mut schema = common_schema("gpt-4o-mini");
            schema["properties"]["base_url"] =
                json!({"type": "string", "default": "https://api.openai.com/v1"});
            CodeTemplate {
                provider_type: "class-based".to_string(),
                template: CLASS_BASED_TEMPLATE.to_string(),
                description: "Legacy class-based provider calling an OpenAI-compatible endpoint with `http`".to_string(),
                required_dependencies: vec!["http".to_string(), "json".to_string()],
                config_schema: schema,
            }
        }
        other => {
            if other != "openai" {
                tracing::debug!(provider_type = other, "unknown template type, using openai");
            }
            let mut schema = common_schema("gpt-4o-mini");
            schema["properties"]["base_url"] =
                json!({"type": "string", "default": "https://api.openai.com/v1"});
            CodeTemplate {
                provider_type: "openai".to_string(),
                template: OPENAI_TEMPLATE.to_string(),
                description: "OpenAI-compatible chat completions through the sandbox `openai` module".to_string(),
                required_dependencies: vec!["asyncio".to_string(), "openai".to_string()],
                config_schema: schema,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::CodeValidator;

    #[test]
    fn test_every_template_validates() {
        for kind in available_templates() {
            let template = code_template(kind);
            assert_eq!(template.provider_type, kind);
            let verdict = CodeValidator::validate(&template.template);
            assert!(verdict.accepted, "{}: {}", kind, verdict.message);
        }
    }

    #[test]
    fn test_unknown_type_falls_back_to_openai() {
        let template = code_template("mistral");
        assert_eq!(template.provider_type, "openai");
        assert_eq!(template.template, code_template("openai").template);
    }

    #[test]
    fn test_templates_name_the_hooks() {
        let template = code_template("openai").template;
        for hook in ["initialize_client", "chat_sync", "chat_streaming"] {
            assert!(template.contains(&format!("def {}(", hook)), "{}", hook);
        }
    }
}
