use crate::models::{BioInputs, DateIdeaInputs, DateIdeaItem, GeneratedContent, ServiceInputs};
use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum GenerationError {
    #[error("Generation provider rate limited the request")]
    RateLimited,

    #[error("Generation provider returned malformed output: {0}")]
    MalformedOutput(String),

    #[error("Generation provider unavailable: {0}")]
    Unavailable(String),
}

/// External text generator. Stateless from the caller's point of view.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, inputs: &ServiceInputs) -> Result<GeneratedContent, GenerationError>;
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub cache_ttl: Duration,
}

/// Client for any OpenAI-compatible chat-completions endpoint (OpenAI,
/// OpenRouter). Identical inputs within the cache TTL reuse the last answer.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    settings: LlmSettings,
    cache: Cache<ServiceInputs, GeneratedContent>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl OpenAiGenerator {
    pub fn new(settings: LlmSettings) -> Self {
        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(settings.cache_ttl)
            .build();

        tracing::info!(model = %settings.model, base_url = %settings.base_url, "Generation service configured");

        Self {
            client: reqwest::Client::new(),
            settings,
            cache,
        }
    }

    async fn complete(&self, prompt: String, temperature: f32, max_tokens: u32) -> Result<String, GenerationError> {
        let request = ChatRequest {
            model: &self.settings.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            temperature,
            max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/')))
            .bearer_auth(&self.settings.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GenerationError::RateLimited);
        }
        if !status.is_success() {
            return Err(GenerationError::Unavailable(format!("provider returned {}", status)));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::MalformedOutput(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| GenerationError::MalformedOutput("empty completion".to_string()))
    }
}

#[async_trait]
impl GenerationService for OpenAiGenerator {
    async fn generate(&self, inputs: &ServiceInputs) -> Result<GeneratedContent, GenerationError> {
        if let Some(cached) = self.cache.get(inputs).await {
            tracing::debug!("Generation cache hit");
            return Ok(cached);
        }

        let content = match inputs {
            ServiceInputs::Bio(bio) => {
                let text = self.complete(bio_prompt(bio), 0.8, 500).await?;
                GeneratedContent::Bios(parse_bios(&text)?)
            }
            ServiceInputs::DateIdeas(ideas) => {
                let text = self.complete(date_ideas_prompt(ideas), 0.7, 800).await?;
                GeneratedContent::DateIdeas(parse_date_ideas(&text, ideas.budget.as_deref())?)
            }
        };

        self.cache.insert(inputs.clone(), content.clone()).await;
        Ok(content)
    }
}

fn bio_prompt(inputs: &BioInputs) -> String {
    let mut prompt = format!(
        "Write 3 distinct dating profile bios, two or three sentences each.\n\
         Interests: {}\n\
         Personality: {}\n\
         Looking for: {}\n",
        inputs.interests.join(", "),
        inputs.personality_traits.join(", "),
        inputs.looking_for.trim(),
    );
    if let Some(age) = inputs.age {
        prompt.push_str(&format!("Age: {}\n", age));
    }
    prompt.push_str("Vary the tone, keep it genuine, end each with a conversation starter.\n");
    prompt.push_str("Return only the bios, separated by a line containing ---");
    prompt
}

fn date_ideas_prompt(inputs: &DateIdeaInputs) -> String {
    let mut prompt = format!(
        "Suggest 4 date ideas.\n\
         Interests: {}\n\
         Location: {}\n\
         Vibe: {}\n",
        inputs.interests.join(", "),
        inputs.location.trim(),
        inputs.vibe.trim(),
    );
    if let Some(budget) = &inputs.budget {
        prompt.push_str(&format!("Budget: {}\n", budget));
    }
    prompt.push_str(
        "Answer with a JSON array only. Each element has the string fields \
         title, description, category, estimatedCost and duration.",
    );
    prompt
}

pub(crate) fn parse_bios(text: &str) -> Result<Vec<String>, GenerationError> {
    let bios: Vec<String> = text
        .split("---")
        .map(|bio| bio.trim().to_string())
        .filter(|bio| !bio.is_empty())
        .collect();

    if bios.is_empty() {
        return Err(GenerationError::MalformedOutput("no bios in completion".to_string()));
    }
    Ok(bios)
}

const MAX_DATE_IDEAS: usize = 4;

/// Parses a JSON answer; a prose answer is split into paragraphs instead.
pub(crate) fn parse_date_ideas(text: &str, budget: Option<&str>) -> Result<Vec<DateIdeaItem>, GenerationError> {
    let body = strip_code_fence(text);

    if let Ok(ideas) = serde_json::from_str::<Vec<DateIdeaItem>>(body) {
        if ideas.is_empty() {
            return Err(GenerationError::MalformedOutput("empty date idea list".to_string()));
        }
        return Ok(ideas);
    }

    let ideas: Vec<DateIdeaItem> = body
        .split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .take(MAX_DATE_IDEAS)
        .enumerate()
        .map(|(index, paragraph)| DateIdeaItem {
            title: format!("Date Idea {}", index + 1),
            description: paragraph.to_string(),
            category: "Custom".to_string(),
            estimated_cost: budget.unwrap_or("$$").to_string(),
            duration: "2-3 hours".to_string(),
        })
        .collect();

    if ideas.is_empty() {
        return Err(GenerationError::MalformedOutput("no date ideas in completion".to_string()));
    }
    tracing::warn!("Date ideas were not valid JSON, fell back to paragraph parsing");
    Ok(ideas)
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line, e.g. ```json
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().trim_end_matches("```").trim()
}
