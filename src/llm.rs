use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::analyzer::signal_name;
use crate::config::AiAnalysisConfig;
use crate::model::{AIAnalysisResult, AnalysisResults, CoredumpFile};

/* ============================= PROVIDERS ============================= */

/// Chat-completion dialects differ only in endpoint defaults and pricing;
/// the request/response shape is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Glm,
    OpenAi,
}

impl Provider {
    pub fn parse(s: &str) -> Result<Provider> {
        match s {
            "glm" => Ok(Provider::Glm),
            "openai" => Ok(Provider::OpenAi),
            other => bail!("unknown AI provider {other:?}"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Glm => "glm",
            Provider::OpenAi => "openai",
        }
    }

    /// USD per 1000 tokens. A single blended rate per provider; real input/
    /// output split pricing is out of scope.
    pub fn price_per_thousand_tokens(&self) -> f64 {
        match self {
            Provider::Glm => 0.045,
            Provider::OpenAi => 0.06,
        }
    }
}

/* ============================= WIRE TYPES ============================= */

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: ChatUsage,
}

const SYSTEM_PROMPT: &str = "You are an expert systems engineer analyzing a coredump from a \
    Milvus vector database deployment. Respond with a single JSON object with the fields: \
    summary, rootCause, impact, recommendations (array of strings), confidence (0.0-1.0), \
    relatedIssues (array of strings), codeSuggestions (array of objects with file, function, \
    line, issue, suggestion, priority).";

/// Stack traces are truncated to keep the prompt inside the token ceiling.
const STACK_TRACE_LIMIT: usize = 3000;
const SHARED_LIB_LIMIT: usize = 10;
const KEY_REGISTERS: [&str; 6] = ["rip", "rsp", "rbp", "rax", "rcx", "rdx"];

/* ============================= CLIENT ============================= */

pub struct LlmClient {
    provider: Provider,
    model: String,
    api_key: String,
    base_url: String,
    max_tokens: u32,
    temperature: f64,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: &AiAnalysisConfig) -> Result<LlmClient> {
        let provider = Provider::parse(&config.provider)?;
        if config.api_key.is_empty() {
            bail!("AI analysis enabled without an API key");
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("cannot build LLM HTTP client")?;
        Ok(LlmClient {
            provider,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            http,
        })
    }

    /// Structured prompt with the evidence an engineer would want first.
    pub fn build_prompt(&self, file: &CoredumpFile, analysis: &AnalysisResults) -> String {
        let mut prompt = String::with_capacity(4096);
        prompt.push_str("Analyze this Milvus coredump.\n\n");
        prompt.push_str(&format!(
            "Application: {}\nSignal: {} ({})\nPID: {}\n",
            file.executable,
            file.signal,
            signal_name(file.signal),
            file.pid
        ));
        if let (Some(pod), Some(namespace)) = (&file.pod_name, &file.pod_namespace) {
            prompt.push_str(&format!("Pod: {namespace}/{pod}\n"));
        }
        if let Some(instance) = &file.instance_name {
            prompt.push_str(&format!("Instance: {instance}\n"));
        }
        prompt.push_str(&format!("Threads: {}\n", analysis.thread_count));
        prompt.push_str(&format!("Crash reason: {}\n", analysis.crash_reason));

        let stack = if analysis.stack_trace.len() > STACK_TRACE_LIMIT {
            let mut end = STACK_TRACE_LIMIT;
            while !analysis.stack_trace.is_char_boundary(end) {
                end -= 1;
            }
            &analysis.stack_trace[..end]
        } else {
            &analysis.stack_trace
        };
        prompt.push_str(&format!("\nStack trace:\n{stack}\n"));

        let mut registers: Vec<String> = Vec::new();
        for name in KEY_REGISTERS {
            if let Some(value) = analysis.registers.get(name) {
                registers.push(format!("{name}={value}"));
            }
        }
        if !registers.is_empty() {
            prompt.push_str(&format!("\nRegisters: {}\n", registers.join(" ")));
        }

        if !analysis.shared_libraries.is_empty() {
            prompt.push_str("\nShared libraries:\n");
            for lib in analysis.shared_libraries.iter().take(SHARED_LIB_LIMIT) {
                prompt.push_str(&format!("  {lib}\n"));
            }
        }
        prompt
    }

    /// Rough pre-flight cost for controller arbitration: four characters per
    /// token plus the response ceiling.
    pub fn estimate_cost(&self, prompt: &str) -> f64 {
        let prompt_tokens = (prompt.len() / 4) as u64;
        let total = prompt_tokens + self.max_tokens as u64;
        total as f64 / 1000.0 * self.provider.price_per_thousand_tokens()
    }

    pub async fn analyze(&self, prompt: &str) -> Result<AIAnalysisResult> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt.to_string(),
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .http
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("LLM request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("LLM provider returned {status}");
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("LLM response is not valid JSON")?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default();
        debug!(tokens = parsed.usage.total_tokens, "llm_response_received");

        let mut result = parse_ai_content(content);
        result.provider = self.provider.as_str().to_string();
        result.model = self.model.clone();
        result.analyzed_at = Some(Utc::now());
        result.tokens_used = parsed.usage.total_tokens;
        result.estimated_cost = parsed.usage.total_tokens as f64 / 1000.0
            * self.provider.price_per_thousand_tokens();
        Ok(result)
    }

    /// A denial or transport failure still yields a tagged result so the
    /// record shows AI was attempted.
    pub fn denied_result(&self, reason: String) -> AIAnalysisResult {
        AIAnalysisResult {
            provider: self.provider.as_str().to_string(),
            model: self.model.clone(),
            analyzed_at: Some(Utc::now()),
            error_message: Some(reason),
            ..Default::default()
        }
    }
}

/* ============================= RESPONSE PARSING ============================= */

/// The outermost `{` ... `}` span, if any.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start { Some(&text[start..=end]) } else { None }
}

/// Parse the model's reply. A reply that is not the expected JSON object is
/// kept verbatim as the summary rather than discarded.
pub fn parse_ai_content(content: &str) -> AIAnalysisResult {
    if let Some(json) = extract_json(content) {
        match serde_json::from_str::<AIAnalysisResult>(json) {
            Ok(result) => return result,
            Err(e) => {
                warn!(error = %e, "llm_json_parse_failed_using_raw_text");
            }
        }
    }
    AIAnalysisResult {
        summary: content.trim().to_string(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CoredumpState;

    fn make_client() -> LlmClient {
        let config = AiAnalysisConfig {
            api_key: "test-key".to_string(),
            ..Default::default()
        };
        LlmClient::new(&config).unwrap()
    }

    fn make_file() -> CoredumpFile {
        CoredumpFile {
            path: "/d/core.milvus.1000.1700000000.1".to_string(),
            filename: "core.milvus.1000.1700000000.1".to_string(),
            size: 10,
            mod_time: Utc::now(),
            executable: "milvus".to_string(),
            pid: 1,
            uid: 1000,
            gid: 0,
            signal: 11,
            timestamp: Utc::now(),
            boot_id: None,
            pod_name: Some("p1".to_string()),
            pod_namespace: Some("ns1".to_string()),
            container_name: None,
            instance_name: Some("rel1".to_string()),
            state: CoredumpState::Analyzed,
            value_score: 0.0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            error_message: None,
            analysis: None,
        }
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!(Provider::parse("glm").unwrap(), Provider::Glm);
        assert_eq!(Provider::parse("openai").unwrap(), Provider::OpenAi);
        assert!(Provider::parse("bard").is_err());
    }

    #[test]
    fn test_extract_json_outermost_braces() {
        assert_eq!(
            extract_json(r#"Here you go: {"a": {"b": 1}} hope it helps"#),
            Some(r#"{"a": {"b": 1}}"#)
        );
        assert_eq!(extract_json("no json at all"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }

    #[test]
    fn test_parse_ai_content_json() {
        let content = r#"Sure! {"summary": "use-after-free", "rootCause": "iterator invalidation",
            "confidence": 0.9, "recommendations": ["upgrade"]}"#;
        let result = parse_ai_content(content);
        assert_eq!(result.summary, "use-after-free");
        assert_eq!(result.root_cause, "iterator invalidation");
        assert_eq!(result.confidence, 0.9);
        assert_eq!(result.recommendations, vec!["upgrade".to_string()]);
    }

    #[test]
    fn test_parse_ai_content_falls_back_to_raw_text() {
        let result = parse_ai_content("The crash looks like memory corruption.");
        assert_eq!(result.summary, "The crash looks like memory corruption.");
        assert!(result.root_cause.is_empty());
    }

    #[test]
    fn test_prompt_contains_evidence_and_truncates() {
        let client = make_client();
        let analysis = AnalysisResults {
            crash_reason: "Segmentation fault (SIGSEGV)".to_string(),
            stack_trace: "y".repeat(10_000),
            thread_count: 4,
            registers: [("rip".to_string(), "0x1234".to_string())]
                .into_iter()
                .collect(),
            shared_libraries: (0..20).map(|i| format!("/lib/lib{i}.so")).collect(),
            ..Default::default()
        };
        let prompt = client.build_prompt(&make_file(), &analysis);
        assert!(prompt.contains("Signal: 11 (SIGSEGV)"));
        assert!(prompt.contains("Pod: ns1/p1"));
        assert!(prompt.contains("rip=0x1234"));
        assert!(prompt.contains("/lib/lib9.so"));
        assert!(!prompt.contains("/lib/lib10.so"), "library list is capped at 10");
        // 3000 chars of stack plus everything else stays well under 2x
        assert!(prompt.len() < 3000 + 1000);
    }

    #[test]
    fn test_estimate_cost_scales_with_prompt() {
        let client = make_client();
        let short = client.estimate_cost("hi");
        let long = client.estimate_cost(&"x".repeat(8000));
        assert!(long > short);
        // 2000 response tokens alone: 2.0 * 0.045
        assert!(short >= 2.0 * 0.045 - f64::EPSILON);
    }

    #[test]
    fn test_denied_result_is_tagged() {
        let client = make_client();
        let result = client.denied_result("Monthly cost limit would be exceeded".to_string());
        assert_eq!(result.provider, "glm");
        assert!(result.error_message.as_deref().unwrap().contains("Monthly"));
        assert_eq!(result.tokens_used, 0);
    }
}
