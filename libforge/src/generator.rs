//! Content generation
//!
//! Drives the text provider chain through the generation pipeline: main
//! script or caption, hook fallback, per-platform variant adaptation, quality
//! scoring, image prompt. Model output is parsed tolerantly; every step after
//! the main generation degrades instead of failing the run.

use serde::Deserialize;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{ForgeError, Result};
use crate::media::{MediaStore, VoiceSynthesizer};
use crate::providers::{extract_json, ChatMessage, GenerationOptions, TextEngine};
use crate::types::{
    ContentArtifact, ContentStatus, ContentType, GenerationInfo, PlatformKind, PlatformVariant,
    QualityScore, Tone, Voiceover,
};

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub user_id: String,
    pub niche: String,
    pub tone: Tone,
    pub target_audience: String,
    pub language: String,
    pub content_pillars: Vec<String>,
    pub content_type: ContentType,
    pub platforms: Vec<PlatformKind>,
    pub topic: Option<String>,
    pub brand_voice: Option<String>,
}

/// Shape the main-generation prompt asks the model to produce. Serde fills
/// holes with defaults; missing fields degrade, they do not fail.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ScriptPayload {
    script: Option<String>,
    hook: String,
    caption: String,
    hashtags: Vec<String>,
    #[serde(rename = "callToAction")]
    call_to_action: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct HookPayload {
    hooks: Vec<HookOption>,
    #[serde(rename = "bestHook")]
    best_hook: usize,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct HookOption {
    text: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct VariantPayload {
    caption: String,
    hashtags: Vec<String>,
    #[serde(rename = "aspectRatio")]
    aspect_ratio: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ScorePayload {
    overall: i64,
    #[serde(rename = "hookStrength")]
    hook_strength: i64,
    #[serde(rename = "captionQuality")]
    caption_quality: i64,
    #[serde(rename = "hashtagRelevance")]
    hashtag_relevance: i64,
    #[serde(rename = "estimatedReach")]
    estimated_reach: String,
    suggestions: Vec<String>,
}

pub struct ContentGenerator {
    text: TextEngine,
    db: Database,
    voice: Option<(VoiceSynthesizer, MediaStore)>,
}

impl ContentGenerator {
    pub fn new(text: TextEngine, db: Database) -> Self {
        Self {
            text,
            db,
            voice: None,
        }
    }

    /// Enable voiceover synthesis for scripted content. Without this the
    /// pipeline produces silent artifacts.
    pub fn with_voice(mut self, synthesizer: VoiceSynthesizer, store: MediaStore) -> Self {
        self.voice = Some((synthesizer, store));
        self
    }

    /// Run the full pipeline and persist the resulting artifact.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<ContentArtifact> {
        if request.platforms.is_empty() {
            return Err(ForgeError::Validation(
                "at least one target platform is required".to_string(),
            ));
        }
        let primary = request.platforms[0];

        let (payload, generation) = self.generate_main(request, primary).await?;

        let hook = if payload.hook.is_empty() {
            self.generate_hook(request, &payload.caption).await
        } else {
            payload.hook.clone()
        };

        let variants = self.generate_variants(request, primary, &payload).await;

        let quality = self
            .score_content(request, primary, &hook, &payload.caption, &payload.hashtags)
            .await;

        let call_to_action = if payload.call_to_action.is_empty() {
            "Tell me what you think in the comments!".to_string()
        } else {
            payload.call_to_action.clone()
        };

        let (voiceover, subtitles) = match &payload.script {
            Some(script) if request.content_type.is_scripted() => {
                self.generate_voiceover(script).await
            }
            _ => (None, None),
        };

        let artifact = ContentArtifact {
            id: Uuid::new_v4().to_string(),
            user_id: request.user_id.clone(),
            content_type: request.content_type,
            status: ContentStatus::Ready,
            script: payload.script.clone(),
            hook,
            caption: payload.caption.clone(),
            hashtags: payload.hashtags.clone(),
            call_to_action,
            media: Vec::new(),
            voiceover,
            subtitles,
            variants,
            generation,
            quality: Some(quality),
            created_at: chrono::Utc::now().timestamp(),
        };

        self.db.create_content(&artifact).await?;
        Ok(artifact)
    }

    async fn generate_main(
        &self,
        request: &GenerationRequest,
        primary: PlatformKind,
    ) -> Result<(ScriptPayload, GenerationInfo)> {
        let (messages, options) = if request.content_type.is_scripted() {
            let system = match &request.brand_voice {
                Some(voice) => format!("Use this brand voice: {}", voice),
                None => "You are an expert viral content creator.".to_string(),
            };
            (
                vec![
                    ChatMessage::system(system),
                    ChatMessage::user(script_prompt(request)),
                ],
                GenerationOptions {
                    temperature: Some(0.8),
                    max_tokens: Some(2048),
                    ..Default::default()
                },
            )
        } else {
            (
                vec![ChatMessage::user(caption_prompt(request, primary))],
                GenerationOptions {
                    temperature: Some(0.8),
                    max_tokens: Some(1024),
                    ..Default::default()
                },
            )
        };

        let result = self.text.generate(&messages, &options).await?;
        let payload: ScriptPayload = extract_json(&result.content)?;

        Ok((
            payload,
            GenerationInfo {
                provider: result.provider,
                model: result.model,
                tokens_used: result.tokens_used,
            },
        ))
    }

    /// TTS plus stored audio for scripted content. Any failure degrades to a
    /// silent artifact; the caption pipeline already succeeded.
    async fn generate_voiceover(&self, script: &str) -> (Option<Voiceover>, Option<String>) {
        let Some((synthesizer, store)) = &self.voice else {
            return (None, None);
        };

        let track = match synthesizer.synthesize(script, None).await {
            Ok(track) => track,
            Err(e) => {
                tracing::warn!(error = %e, "voiceover synthesis failed, continuing without audio");
                return (None, None);
            }
        };

        match store.store(&track.audio, "mp3") {
            Ok(url) => {
                let subtitles =
                    (!track.subtitles_srt.is_empty()).then(|| track.subtitles_srt.clone());
                (
                    Some(Voiceover {
                        url,
                        voice_id: track.voice,
                        duration_seconds: track.duration_seconds,
                    }),
                    subtitles,
                )
            }
            Err(e) => {
                tracing::warn!(error = %e, "voiceover storage failed, continuing without audio");
                (None, None)
            }
        }
    }

    /// Separate hook generation when the main payload came back without one.
    /// Any failure falls back to the caption's first line.
    async fn generate_hook(&self, request: &GenerationRequest, caption: &str) -> String {
        let prompt = format!(
            "Write 3 scroll-stopping hooks in {language} for a {tone} social post \
             about \"{description}\" aimed at {audience} in the {niche} niche.\n\
             Respond in JSON: {{\"hooks\": [{{\"text\": \"...\"}}], \"bestHook\": <index>}}",
            language = request.language,
            tone = request.tone.as_str(),
            description = caption,
            audience = request.target_audience,
            niche = request.niche,
        );
        let options = GenerationOptions {
            temperature: Some(0.9),
            max_tokens: Some(1024),
            ..Default::default()
        };

        let fallback = || {
            caption
                .lines()
                .next()
                .unwrap_or_default()
                .chars()
                .take(100)
                .collect::<String>()
        };

        match self.text.generate(&[ChatMessage::user(prompt)], &options).await {
            Ok(result) => match extract_json::<HookPayload>(&result.content) {
                Ok(payload) => payload
                    .hooks
                    .get(payload.best_hook)
                    .or_else(|| payload.hooks.first())
                    .map(|h| h.text.clone())
                    .unwrap_or_else(fallback),
                Err(_) => fallback(),
            },
            Err(e) => {
                tracing::warn!(error = %e, "hook generation failed, using caption head");
                fallback()
            }
        }
    }

    /// Adapt the primary caption for each additional platform. A failed
    /// adaptation reuses the primary caption unchanged.
    async fn generate_variants(
        &self,
        request: &GenerationRequest,
        primary: PlatformKind,
        payload: &ScriptPayload,
    ) -> Vec<PlatformVariant> {
        let mut variants = vec![PlatformVariant {
            platform: primary,
            caption: payload.caption.clone(),
            hashtags: payload.hashtags.clone(),
            aspect_ratio: default_aspect_ratio(primary).to_string(),
        }];

        for &platform in request.platforms.iter().skip(1) {
            let prompt = format!(
                "Adapt this {source} post for {target}. Keep the message, match the \
                 platform's style, stay in {language}.\n\
                 Caption: {caption}\nHashtags: {hashtags}\n\
                 Respond in JSON: {{\"caption\": \"...\", \"hashtags\": [\"...\"], \
                 \"aspectRatio\": \"9:16|1:1|16:9|4:5\"}}",
                source = primary,
                target = platform,
                language = request.language,
                caption = payload.caption,
                hashtags = payload.hashtags.join(" "),
            );
            let options = GenerationOptions {
                temperature: Some(0.7),
                max_tokens: Some(1024),
                ..Default::default()
            };

            let adapted = match self.text.generate(&[ChatMessage::user(prompt)], &options).await {
                Ok(result) => extract_json::<VariantPayload>(&result.content).ok(),
                Err(e) => {
                    tracing::warn!(platform = %platform, error = %e, "variant adaptation failed");
                    None
                }
            };

            variants.push(match adapted {
                Some(v) if !v.caption.is_empty() => PlatformVariant {
                    platform,
                    caption: v.caption,
                    hashtags: if v.hashtags.is_empty() {
                        payload.hashtags.clone()
                    } else {
                        v.hashtags
                    },
                    aspect_ratio: if v.aspect_ratio.is_empty() {
                        default_aspect_ratio(platform).to_string()
                    } else {
                        v.aspect_ratio
                    },
                },
                _ => PlatformVariant {
                    platform,
                    caption: payload.caption.clone(),
                    hashtags: payload.hashtags.clone(),
                    aspect_ratio: default_aspect_ratio(platform).to_string(),
                },
            });
        }

        variants
    }

    /// Model-based scoring with heuristic fallback.
    async fn score_content(
        &self,
        request: &GenerationRequest,
        platform: PlatformKind,
        hook: &str,
        caption: &str,
        hashtags: &[String],
    ) -> QualityScore {
        let prompt = format!(
            "You are an expert social media content analyst. Rate this content.\n\n\
             PLATFORM: {platform}\nNICHE: {niche}\n\n\
             Hook: \"{hook}\"\nCaption: \"{caption}\"\nHashtags: {hashtags}\n\n\
             Rate each aspect 0-100 and respond in JSON only:\n\
             {{\"overall\": <0-100>, \"hookStrength\": <0-100>, \"captionQuality\": <0-100>, \
             \"hashtagRelevance\": <0-100>, \"estimatedReach\": \"low|medium|high\", \
             \"suggestions\": [\"up to 3 concrete improvements\"]}}",
            platform = platform,
            niche = request.niche,
            hook = hook,
            caption = caption,
            hashtags = hashtags.join(" "),
        );
        let options = GenerationOptions {
            temperature: Some(0.3),
            max_tokens: Some(512),
            ..Default::default()
        };

        let scored = match self.text.generate(&[ChatMessage::user(prompt)], &options).await {
            Ok(result) => extract_json::<ScorePayload>(&result.content).ok(),
            Err(e) => {
                tracing::warn!(error = %e, "quality scoring failed, using heuristics");
                None
            }
        };

        match scored {
            Some(s) => QualityScore {
                overall: s.overall.clamp(0, 100),
                hook_strength: s.hook_strength.clamp(0, 100),
                caption_quality: s.caption_quality.clamp(0, 100),
                hashtag_relevance: s.hashtag_relevance.clamp(0, 100),
                estimated_reach: match s.estimated_reach.as_str() {
                    "low" | "high" => s.estimated_reach,
                    _ => "medium".to_string(),
                },
                suggestions: s.suggestions,
            },
            None => heuristic_score(hook, caption, hashtags),
        }
    }

    /// Short English prompt for the image tiers, produced by the text chain.
    /// Failure falls back to a template built from the request.
    pub async fn generate_image_prompt(&self, request: &GenerationRequest, hook: &str) -> String {
        let description = request
            .topic
            .clone()
            .unwrap_or_else(|| format!("{} ({})", hook, request.niche));
        let messages = vec![
            ChatMessage::system(
                "You create image generation prompts for social media. Respond with ONLY \
                 the prompt text, no JSON, no quotes, no explanation.",
            ),
            ChatMessage::user(format!(
                "Create an image prompt for: {}. Style: vibrant, eye-catching, social \
                 media ready, vertical composition.",
                description
            )),
        ];
        let options = GenerationOptions {
            temperature: Some(0.7),
            max_tokens: Some(256),
            ..Default::default()
        };

        match self.text.generate(&messages, &options).await {
            Ok(result) => result.content.trim().trim_matches('"').to_string(),
            Err(_) => format!(
                "Eye-catching social media image about {}, vibrant colors, high contrast",
                description
            ),
        }
    }
}

fn default_aspect_ratio(platform: PlatformKind) -> &'static str {
    match platform {
        PlatformKind::Facebook => "16:9",
        PlatformKind::TikTok | PlatformKind::Instagram => "9:16",
    }
}

fn script_prompt(request: &GenerationRequest) -> String {
    format!(
        "Write a short-form video script in {language} for the {niche} niche.\n\
         Tone: {tone}. Audience: {audience}. Content pillars: {pillars}.{topic}\n\
         Respond in JSON: {{\"script\": \"...\", \"hook\": \"...\", \"caption\": \"...\", \
         \"hashtags\": [\"#...\"], \"callToAction\": \"...\"}}",
        language = request.language,
        niche = request.niche,
        tone = request.tone.as_str(),
        audience = request.target_audience,
        pillars = request.content_pillars.join(", "),
        topic = request
            .topic
            .as_deref()
            .map(|t| format!(" Topic: {}.", t))
            .unwrap_or_default(),
    )
}

fn caption_prompt(request: &GenerationRequest, platform: PlatformKind) -> String {
    format!(
        "Write a {platform} caption in {language} for the {niche} niche.\n\
         Tone: {tone}. Audience: {audience}. Describe: {description}.\n\
         Respond in JSON: {{\"hook\": \"...\", \"caption\": \"...\", \
         \"hashtags\": [\"#...\"], \"callToAction\": \"...\"}}",
        platform = platform,
        language = request.language,
        niche = request.niche,
        tone = request.tone.as_str(),
        audience = request.target_audience,
        description = request
            .topic
            .clone()
            .unwrap_or_else(|| request.content_pillars.join(", ")),
    )
}

/// Deterministic scoring used when the model scorer is unavailable.
fn heuristic_score(hook: &str, caption: &str, hashtags: &[String]) -> QualityScore {
    let mut hook_score = 40;
    if hook.len() > 10 {
        hook_score += 20;
    }
    if hook.contains('?') || hook.contains('!') {
        hook_score += 15;
    }
    if hook.len() < 100 {
        hook_score += 10;
    }

    let mut caption_score = 40;
    if caption.len() > 50 {
        caption_score += 15;
    }
    if caption.len() < 500 {
        caption_score += 10;
    }
    if caption.contains('?') || caption.contains('!') {
        caption_score += 10;
    }

    let mut hashtag_score = 40;
    if hashtags.len() >= 5 && hashtags.len() <= 15 {
        hashtag_score += 30;
    } else if !hashtags.is_empty() {
        hashtag_score += 15;
    }

    let overall =
        (hook_score as f64 * 0.35 + caption_score as f64 * 0.35 + hashtag_score as f64 * 0.3)
            .round() as i64;

    let mut suggestions = Vec::new();
    if hook_score < 60 {
        suggestions.push("Strengthen the hook to grab attention in the first 3 seconds".to_string());
    }
    if caption_score < 60 {
        suggestions.push("Add a clearer call to action to the caption".to_string());
    }
    if hashtag_score < 60 {
        suggestions.push("Use 5 to 15 hashtags mixing trending and niche tags".to_string());
    }

    QualityScore {
        overall,
        hook_strength: hook_score,
        caption_quality: caption_score,
        hashtag_relevance: hashtag_score,
        estimated_reach: if overall > 70 {
            "high".to_string()
        } else if overall > 45 {
            "medium".to_string()
        } else {
            "low".to_string()
        },
        suggestions,
    }
}
