//! The catalogued operation handlers. Each one turns a validated payload
//! into an upstream call and shapes the result; costs and models are fixed
//! in the catalog, never negotiated per request.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::GatewayError;
use crate::config::UpstreamConfig;
use crate::policy::validate::{FieldRule, MAX_PROMPT_CHARS, MAX_TEXT_CHARS};
use crate::registry::{Completion, OperationHandler, OperationRegistry, OperationSpec};
use crate::upstream::{ChatRequest, ImageRequest, Upstream};

/// Flat per-token upstream cost estimate, in USD micros.
const USD_MICROS_PER_TOKEN: u64 = 5;
/// Flat per-image upstream cost estimate.
const USD_MICROS_PER_IMAGE: u64 = 40_000;

const CONTENT_GENERATOR_FIELDS: &[FieldRule] = &[
    FieldRule::prompt("prompt"),
    FieldRule::optional("content_type", 50),
    FieldRule::optional("tone", 100),
];
const CODE_ASSISTANT_FIELDS: &[FieldRule] = &[
    FieldRule::prompt("prompt"),
    FieldRule::optional("language", 50),
    FieldRule::optional("action", 50),
    FieldRule::optional("code", MAX_TEXT_CHARS),
];
const IMAGE_GENERATOR_FIELDS: &[FieldRule] = &[
    FieldRule::prompt("prompt"),
    FieldRule::optional("size", 20),
    FieldRule::optional("style", 20),
];
const DOCUMENT_ANALYZER_FIELDS: &[FieldRule] = &[
    FieldRule::text("text"),
    FieldRule::optional("action", 50),
    FieldRule::optional("question", MAX_PROMPT_CHARS),
];
const DATA_EXTRACTOR_FIELDS: &[FieldRule] = &[
    FieldRule::text("text"),
    FieldRule::optional("instructions", MAX_PROMPT_CHARS),
];
const TRANSLATOR_FIELDS: &[FieldRule] = &[
    FieldRule::text("text"),
    FieldRule::short("target_language"),
    FieldRule::optional("source_language", 100),
    FieldRule::optional("tone", 100),
];
const SEO_ANALYZER_FIELDS: &[FieldRule] = &[
    FieldRule::text("content"),
    FieldRule::optional("url", 300),
    FieldRule::optional("target_keywords", 500),
    FieldRule::optional("analysis_type", 50),
];
const COMPLIANCE_AUDITOR_FIELDS: &[FieldRule] = &[
    FieldRule::text("text"),
    FieldRule::optional("framework", 100),
    FieldRule::optional("scope", 100),
];

fn field<'a>(payload: &'a Value, name: &str) -> &'a str {
    payload.get(name).and_then(Value::as_str).unwrap_or("")
}

fn field_or<'a>(payload: &'a Value, name: &str, fallback: &'a str) -> &'a str {
    match field(payload, name) {
        "" => fallback,
        value => value,
    }
}

/// A chat-completion-backed operation: prompt assembly and result shaping
/// are plain functions, so the handler itself stays one generic struct.
struct ChatOperation {
    upstream: Arc<dyn Upstream>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    build_prompt: fn(&Value) -> (String, String),
    render: fn(&Value, String, u32) -> Value,
}

#[async_trait]
impl OperationHandler for ChatOperation {
    async fn execute(&self, payload: &Value) -> Result<Completion, GatewayError> {
        let (system, user) = (self.build_prompt)(payload);
        let output = self
            .upstream
            .chat(&ChatRequest {
                model: self.model.clone(),
                system,
                user,
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            })
            .await?;
        let tokens = output.total_tokens;
        Ok(Completion {
            result: (self.render)(payload, output.text, tokens),
            tokens,
            cost_usd_micros: u64::from(tokens) * USD_MICROS_PER_TOKEN,
        })
    }
}

struct ImageOperation {
    upstream: Arc<dyn Upstream>,
    model: String,
}

#[async_trait]
impl OperationHandler for ImageOperation {
    async fn execute(&self, payload: &Value) -> Result<Completion, GatewayError> {
        let size = field_or(payload, "size", "1024x1024");
        let style = field_or(payload, "style", "vivid");
        let output = self
            .upstream
            .image(&ImageRequest {
                model: self.model.clone(),
                prompt: field(payload, "prompt").to_string(),
                size: size.to_string(),
                style: style.to_string(),
            })
            .await?;
        Ok(Completion {
            result: json!({
                "image_url": output.url,
                "size": size,
                "style": style,
            }),
            tokens: 0,
            cost_usd_micros: USD_MICROS_PER_IMAGE,
        })
    }
}

/// Builds the closed catalog over one shared upstream client.
pub fn standard_registry(upstream: Arc<dyn Upstream>, config: &UpstreamConfig) -> OperationRegistry {
    let mut registry = OperationRegistry::new();
    let model = config.model.clone();

    registry.register(
        OperationSpec {
            slug: "content-generator",
            cost: 5,
            model: "gpt-4o",
            tool_name: "tollgate_generate_content",
            description: "Generate high-quality content (blog posts, articles, social media, marketing copy). Costs 5 credits.",
            fields: CONTENT_GENERATOR_FIELDS,
        },
        json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string", "description": "What content to generate" },
                "content_type": { "type": "string", "description": "Content type", "enum": ["blog", "social", "marketing", "article", "email"] },
                "tone": { "type": "string", "description": "Writing tone (e.g. professional, casual, formal)" },
            },
            "required": ["prompt"],
        }),
        Arc::new(ChatOperation {
            upstream: Arc::clone(&upstream),
            model: model.clone(),
            max_tokens: 2_000,
            temperature: 0.7,
            build_prompt: |payload| {
                let content_type = field_or(payload, "content_type", "article");
                let tone = field_or(payload, "tone", "professional");
                (
                    format!(
                        "You are an expert content writer. Write a {content_type} in a {tone} tone. Return only the finished content."
                    ),
                    field(payload, "prompt").to_string(),
                )
            },
            render: |payload, text, tokens| {
                json!({
                    "content": text,
                    "content_type": field_or(payload, "content_type", "article"),
                    "tokens_used": tokens,
                })
            },
        }),
    );

    registry.register(
        OperationSpec {
            slug: "code-assistant",
            cost: 8,
            model: "gpt-4o",
            tool_name: "tollgate_generate_code",
            description: "Generate, debug, refactor, or review code in any language. Costs 8 credits.",
            fields: CODE_ASSISTANT_FIELDS,
        },
        json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string", "description": "What code to generate or what to do" },
                "language": { "type": "string", "description": "Programming language" },
                "action": { "type": "string", "description": "Action to perform", "enum": ["generate", "debug", "refactor", "review", "explain"] },
                "code": { "type": "string", "description": "Existing code to work with (for debug/refactor/review)" },
            },
            "required": ["prompt"],
        }),
        Arc::new(ChatOperation {
            upstream: Arc::clone(&upstream),
            model: model.clone(),
            max_tokens: 3_000,
            temperature: 0.2,
            build_prompt: |payload| {
                let language = field_or(payload, "language", "the most suitable language");
                let action = field_or(payload, "action", "generate");
                let mut user = field(payload, "prompt").to_string();
                let code = field(payload, "code");
                if !code.is_empty() {
                    user.push_str("\n\n```\n");
                    user.push_str(code);
                    user.push_str("\n```");
                }
                (
                    format!(
                        "You are an expert software engineer. Action: {action}. Language: {language}. Return only code and brief notes."
                    ),
                    user,
                )
            },
            render: |payload, text, _tokens| {
                json!({
                    "code": text,
                    "language": field_or(payload, "language", "auto"),
                    "action": field_or(payload, "action", "generate"),
                })
            },
        }),
    );

    registry.register(
        OperationSpec {
            slug: "image-generator",
            cost: 10,
            model: "dall-e-3",
            tool_name: "tollgate_generate_image",
            description: "Generate images from a text description. Costs 10 credits.",
            fields: IMAGE_GENERATOR_FIELDS,
        },
        json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string", "description": "Image description" },
                "size": { "type": "string", "description": "Image size", "enum": ["1024x1024", "1792x1024", "1024x1792"] },
                "style": { "type": "string", "description": "Image style", "enum": ["vivid", "natural"] },
            },
            "required": ["prompt"],
        }),
        Arc::new(ImageOperation {
            upstream: Arc::clone(&upstream),
            model: config.image_model.clone(),
        }),
    );

    registry.register(
        OperationSpec {
            slug: "document-analyzer",
            cost: 6,
            model: "gpt-4o",
            tool_name: "tollgate_analyze_document",
            description: "Summarize, extract, or analyze documents. Costs 6 credits.",
            fields: DOCUMENT_ANALYZER_FIELDS,
        },
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Document text to analyze" },
                "action": { "type": "string", "description": "Analysis action", "enum": ["summarize", "extract", "analyze", "qa"] },
                "question": { "type": "string", "description": "Question to answer (for qa action)" },
            },
            "required": ["text"],
        }),
        Arc::new(ChatOperation {
            upstream: Arc::clone(&upstream),
            model: model.clone(),
            max_tokens: 2_000,
            temperature: 0.3,
            build_prompt: |payload| {
                let action = field_or(payload, "action", "summarize");
                let question = field(payload, "question");
                let system = if question.is_empty() {
                    format!("You are a document analyst. Task: {action} the provided document.")
                } else {
                    format!(
                        "You are a document analyst. Task: {action}. Answer this question about the document: {question}"
                    )
                };
                (system, field(payload, "text").to_string())
            },
            render: |payload, text, _tokens| {
                json!({
                    "analysis": text,
                    "action": field_or(payload, "action", "summarize"),
                })
            },
        }),
    );

    registry.register(
        OperationSpec {
            slug: "data-extractor",
            cost: 4,
            model: "gpt-4o",
            tool_name: "tollgate_extract_data",
            description: "Extract structured data from unstructured text. Returns JSON. Costs 4 credits.",
            fields: DATA_EXTRACTOR_FIELDS,
        },
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Text to extract data from" },
                "instructions": { "type": "string", "description": "Specific extraction instructions" },
            },
            "required": ["text"],
        }),
        Arc::new(ChatOperation {
            upstream: Arc::clone(&upstream),
            model: model.clone(),
            max_tokens: 2_000,
            temperature: 0.0,
            build_prompt: |payload| {
                let instructions = field_or(
                    payload,
                    "instructions",
                    "extract all named entities, dates, amounts and identifiers",
                );
                (
                    format!(
                        "You are a data extraction engine. {instructions}. Respond with a single JSON object and nothing else."
                    ),
                    field(payload, "text").to_string(),
                )
            },
            render: |_payload, text, _tokens| {
                // The model was asked for JSON; keep the raw text when it
                // returned something else.
                match serde_json::from_str::<Value>(&text) {
                    Ok(parsed) => json!({ "extracted": parsed }),
                    Err(_) => json!({ "extracted": text }),
                }
            },
        }),
    );

    registry.register(
        OperationSpec {
            slug: "translator",
            cost: 3,
            model: "gpt-4o",
            tool_name: "tollgate_translate",
            description: "Translate text between 50+ languages. Costs 3 credits.",
            fields: TRANSLATOR_FIELDS,
        },
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Text to translate" },
                "target_language": { "type": "string", "description": "Target language (e.g. Spanish, French, Japanese)" },
                "source_language": { "type": "string", "description": "Source language (auto-detected if not specified)" },
            },
            "required": ["text", "target_language"],
        }),
        Arc::new(ChatOperation {
            upstream: Arc::clone(&upstream),
            model: model.clone(),
            max_tokens: 2_000,
            temperature: 0.3,
            build_prompt: |payload| {
                let target = field(payload, "target_language");
                let source = field(payload, "source_language");
                let tone = field(payload, "tone");
                let mut system = String::from("You are an expert translator. Translate the following text ");
                if !source.is_empty() {
                    system.push_str(&format!("from {source} "));
                }
                system.push_str(&format!(
                    "to {target}. Maintain the original tone, style, and meaning."
                ));
                if !tone.is_empty() {
                    system.push_str(&format!(" Use a {tone} tone."));
                }
                system.push_str(" Return ONLY the translated text, nothing else.");
                (system, field(payload, "text").to_string())
            },
            render: |payload, text, tokens| {
                json!({
                    "translated_text": text,
                    "source_language": field_or(payload, "source_language", "auto-detected"),
                    "target_language": field(payload, "target_language"),
                    "tokens_used": tokens,
                })
            },
        }),
    );

    registry.register(
        OperationSpec {
            slug: "seo-analyzer",
            cost: 12,
            model: "gpt-4o",
            tool_name: "tollgate_seo_analyze",
            description: "Analyze content for SEO: keywords, meta tags, structure and recommendations. Costs 12 credits.",
            fields: SEO_ANALYZER_FIELDS,
        },
        json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "Content or page text to analyze for SEO" },
                "url": { "type": "string", "description": "URL being analyzed (optional, for context)" },
                "target_keywords": { "type": "string", "description": "Comma-separated target keywords to optimize for" },
                "analysis_type": { "type": "string", "description": "Analysis scope", "enum": ["full", "keywords", "meta_tags", "structure", "recommendations"] },
            },
            "required": ["content"],
        }),
        Arc::new(ChatOperation {
            upstream: Arc::clone(&upstream),
            model: model.clone(),
            max_tokens: 2_500,
            temperature: 0.4,
            build_prompt: |payload| {
                let scope = field_or(payload, "analysis_type", "full");
                let keywords = field(payload, "target_keywords");
                let mut system = format!(
                    "You are an SEO specialist. Perform a {scope} SEO analysis of the provided content."
                );
                if !keywords.is_empty() {
                    system.push_str(&format!(" Optimize for these keywords: {keywords}."));
                }
                system.push_str(" Give concrete, actionable recommendations.");
                (system, field(payload, "content").to_string())
            },
            render: |payload, text, _tokens| {
                json!({
                    "analysis": text,
                    "analysis_type": field_or(payload, "analysis_type", "full"),
                })
            },
        }),
    );

    registry.register(
        OperationSpec {
            slug: "compliance-auditor",
            cost: 12,
            model: "gpt-4o",
            tool_name: "tollgate_compliance_audit",
            description: "Generate a compliance report for logged AI activity or policy text. Costs 12 credits.",
            fields: COMPLIANCE_AUDITOR_FIELDS,
        },
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Activity log or policy text to audit" },
                "framework": { "type": "string", "description": "Compliance framework to audit against" },
                "scope": { "type": "string", "description": "Audit scope" },
            },
            "required": ["text"],
        }),
        Arc::new(ChatOperation {
            upstream,
            model,
            max_tokens: 3_000,
            temperature: 0.2,
            build_prompt: |payload| {
                let framework = field_or(payload, "framework", "general best practice");
                let scope = field_or(payload, "scope", "full");
                (
                    format!(
                        "You are a compliance auditor. Audit the provided material against {framework} ({scope} scope). Produce a structured report with findings and remediation steps."
                    ),
                    field(payload, "text").to_string(),
                )
            },
            render: |payload, text, _tokens| {
                json!({
                    "report": text,
                    "framework": field_or(payload, "framework", "general best practice"),
                })
            },
        }),
    );

    registry
}
