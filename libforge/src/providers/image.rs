//! Image generation waterfall
//!
//! Five tiers in fixed order: Together's synchronous FLUX endpoint, the
//! Gemini image models (tried variant by variant), the keyless Pollinations
//! endpoint, the Stable Horde community queue, and finally a locally
//! synthesized branded placeholder that cannot fail. Each tier's output must
//! clear a byte floor before it is accepted, and the horde path additionally
//! a pixel-dimension floor before its upscale; the hook-text overlay at the
//! end is cosmetic and its failure is swallowed.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::{imageops, Rgba, RgbaImage};
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::config::{MediaConfig, ProvidersConfig};
use crate::error::{ProviderError, Result};
use crate::platforms::urlencode;

/// Outputs smaller than this are error pages, not images.
pub const MIN_IMAGE_BYTES: usize = 1000;

/// Anything narrower or shorter than this is a degenerate render, not a
/// usable image.
pub const MIN_IMAGE_DIMENSION: u32 = 256;

const GEMINI_IMAGE_MODELS: [&str; 2] = [
    "gemini-2.0-flash-exp-image-generation",
    "gemini-2.5-flash-image",
];

const HORDE_API: &str = "https://stablehorde.net/api/v2";
const HORDE_ANON_KEY: &str = "0000000000";
const HORDE_POLL_INTERVAL: Duration = Duration::from_secs(4);
const HORDE_POLL_CEILING: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    /// Target dimensions for a named aspect ratio. Unknown ratios fall back
    /// to 16:9.
    pub fn for_aspect_ratio(aspect_ratio: &str) -> Self {
        match aspect_ratio {
            "1:1" => Self { width: 1080, height: 1080 },
            "9:16" => Self { width: 1080, height: 1920 },
            "4:5" => Self { width: 1080, height: 1350 },
            _ => Self { width: 1200, height: 675 },
        }
    }

    /// Anonymous Stable Horde caps generation at 512px; pick the closest
    /// shape and upscale afterwards.
    pub fn horde_generation_size(&self) -> Dimensions {
        let ratio = self.width as f64 / self.height as f64;
        if ratio > 1.3 {
            Dimensions { width: 512, height: 320 }
        } else if ratio < 0.7 {
            Dimensions { width: 320, height: 512 }
        } else {
            Dimensions { width: 512, height: 512 }
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Optional context that shapes the placeholder and the overlay.
#[derive(Debug, Clone, Default)]
pub struct ImageContext {
    pub hook: Option<String>,
    pub niche: Option<String>,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait ImageTier: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, dims: Dimensions) -> Result<GeneratedImage>;
}

fn tier_error(tier: &str, reason: impl Into<String>) -> ProviderError {
    ProviderError::Attempt {
        provider: tier.to_string(),
        reason: reason.into(),
    }
}

fn check_byte_floor(tier: &str, bytes: &[u8]) -> Result<()> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(tier_error(tier, format!("image too small ({} bytes)", bytes.len())).into());
    }
    Ok(())
}

/// Decode and reject degenerate pixel sizes. Bytes that do not decode at all
/// fail the same way; both send the waterfall to the next tier.
fn check_dimension_floor(tier: &str, bytes: &[u8]) -> Result<()> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| tier_error(tier, format!("undecodable image: {}", e)))?;
    if img.width() < MIN_IMAGE_DIMENSION || img.height() < MIN_IMAGE_DIMENSION {
        return Err(tier_error(
            tier,
            format!("degenerate image ({}x{})", img.width(), img.height()),
        )
        .into());
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Tier 1: Together FLUX (synchronous API)
// ----------------------------------------------------------------------

pub struct TogetherTier {
    api_key: String,
    client: reqwest::Client,
}

impl TogetherTier {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ImageTier for TogetherTier {
    fn name(&self) -> &str {
        "together"
    }

    async fn generate(&self, prompt: &str, dims: Dimensions) -> Result<GeneratedImage> {
        let response = self
            .client
            .post("https://api.together.xyz/v1/images/generations")
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(60))
            .json(&json!({
                "model": "black-forest-labs/FLUX.1-schnell-Free",
                "prompt": format!("{}. No text, no words, no letters in the image.", prompt),
                "width": dims.width,
                "height": dims.height,
                "steps": 4,
                "n": 1,
                "response_format": "b64_json",
            }))
            .send()
            .await
            .map_err(|e| tier_error("together", e.to_string()))?;

        if !response.status().is_success() {
            return Err(tier_error("together", format!("HTTP {}", response.status())).into());
        }

        #[derive(Deserialize)]
        struct TogetherResponse {
            data: Vec<TogetherDatum>,
        }
        #[derive(Deserialize)]
        struct TogetherDatum {
            b64_json: Option<String>,
        }

        let parsed: TogetherResponse = response
            .json()
            .await
            .map_err(|e| tier_error("together", e.to_string()))?;

        let b64 = parsed
            .data
            .first()
            .and_then(|d| d.b64_json.as_deref())
            .ok_or_else(|| tier_error("together", "no image data in response"))?;

        let bytes = BASE64
            .decode(b64)
            .map_err(|e| tier_error("together", e.to_string()))?;
        check_byte_floor("together", &bytes)?;

        Ok(GeneratedImage {
            bytes,
            width: dims.width,
            height: dims.height,
        })
    }
}

// ----------------------------------------------------------------------
// Tier 2: Gemini image models, tried variant by variant
// ----------------------------------------------------------------------

pub struct GeminiImageTier {
    api_key: String,
    client: reqwest::Client,
}

impl GeminiImageTier {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn try_model(
        &self,
        model: &str,
        prompt: &str,
    ) -> std::result::Result<Vec<u8>, String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            model, self.api_key
        );

        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(90))
            .json(&json!({
                "contents": [{
                    "parts": [{
                        "text": format!(
                            "Generate a high-quality social media image: {}. No text or words in the image.",
                            prompt
                        ),
                    }],
                }],
                "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] },
            }))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
        let parts = body["candidates"][0]["content"]["parts"]
            .as_array()
            .ok_or("no parts in response")?;

        for part in parts {
            let mime = part["inlineData"]["mimeType"].as_str().unwrap_or("");
            if let Some(data) = part["inlineData"]["data"].as_str() {
                if mime.starts_with("image/") {
                    let bytes = BASE64.decode(data).map_err(|e| e.to_string())?;
                    if bytes.len() < MIN_IMAGE_BYTES {
                        return Err("returned image too small".to_string());
                    }
                    return Ok(bytes);
                }
            }
        }

        Err("no image part in response".to_string())
    }
}

#[async_trait]
impl ImageTier for GeminiImageTier {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, prompt: &str, dims: Dimensions) -> Result<GeneratedImage> {
        let mut reasons = Vec::new();

        for model in GEMINI_IMAGE_MODELS {
            match self.try_model(model, prompt).await {
                Ok(bytes) => {
                    return Ok(GeneratedImage {
                        bytes,
                        width: dims.width,
                        height: dims.height,
                    })
                }
                Err(reason) => {
                    tracing::debug!(model, %reason, "gemini image model failed");
                    reasons.push(format!("{}: {}", model, reason));
                }
            }
        }

        Err(tier_error("gemini", reasons.join("; ")).into())
    }
}

// ----------------------------------------------------------------------
// Tier 3: Pollinations (keyless)
// ----------------------------------------------------------------------

pub struct PollinationsTier {
    client: reqwest::Client,
}

impl PollinationsTier {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for PollinationsTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageTier for PollinationsTier {
    fn name(&self) -> &str {
        "pollinations"
    }

    async fn generate(&self, prompt: &str, dims: Dimensions) -> Result<GeneratedImage> {
        let seed: u32 = rand::thread_rng().gen_range(0..100_000);
        let url = format!(
            "https://image.pollinations.ai/prompt/{}?width={}&height={}&seed={}&model=flux&nologo=true",
            urlencode(prompt),
            dims.width,
            dims.height,
            seed
        );

        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(90))
            .send()
            .await
            .map_err(|e| tier_error("pollinations", e.to_string()))?;

        if !response.status().is_success() {
            return Err(tier_error("pollinations", format!("HTTP {}", response.status())).into());
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| tier_error("pollinations", e.to_string()))?
            .to_vec();
        check_byte_floor("pollinations", &bytes)?;

        Ok(GeneratedImage {
            bytes,
            width: dims.width,
            height: dims.height,
        })
    }
}

// ----------------------------------------------------------------------
// Tier 4: Stable Horde (submit, poll, fetch)
// ----------------------------------------------------------------------

/// One check-endpoint response, reduced to the fields the loop reads.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HordeCheck {
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub faulted: bool,
    #[serde(default = "default_true")]
    pub is_possible: bool,
}

fn default_true() -> bool {
    true
}

/// What the poll loop should do after a check response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStep {
    /// Job finished; fetch the result.
    Finished,
    /// Keep waiting.
    Continue,
    /// Terminal: the job faulted on the worker side.
    Faulted,
    /// Terminal: no worker can pick the job up.
    NoWorkers,
}

/// Pure interpretation of a check response. Terminal conditions win over
/// completion so a faulted-and-done job still fails.
pub fn interpret_check(check: &HordeCheck) -> PollStep {
    if check.faulted {
        PollStep::Faulted
    } else if !check.is_possible {
        PollStep::NoWorkers
    } else if check.done {
        PollStep::Finished
    } else {
        PollStep::Continue
    }
}

pub struct StableHordeTier {
    client: reqwest::Client,
}

impl StableHordeTier {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for StableHordeTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageTier for StableHordeTier {
    fn name(&self) -> &str {
        "stable_horde"
    }

    async fn generate(&self, prompt: &str, dims: Dimensions) -> Result<GeneratedImage> {
        let err = |reason: String| tier_error("stable_horde", reason);
        let gen_dims = dims.horde_generation_size();

        let submit = self
            .client
            .post(format!("{}/generate/async", HORDE_API))
            .header("apikey", HORDE_ANON_KEY)
            .timeout(Duration::from_secs(15))
            .json(&json!({
                "prompt": format!(
                    "{}, highly detailed, cinematic lighting, professional quality, no text no words no letters",
                    prompt
                ),
                "params": {
                    "steps": 20,
                    "width": gen_dims.width,
                    "height": gen_dims.height,
                    "cfg_scale": 7,
                    "sampler_name": "k_euler",
                },
                "nsfw": true,
                "censor_nsfw": false,
                "r2": true,
            }))
            .send()
            .await
            .map_err(|e| err(e.to_string()))?;

        if !submit.status().is_success() {
            return Err(err(format!("submit HTTP {}", submit.status())).into());
        }

        #[derive(Deserialize)]
        struct SubmitResponse {
            id: Option<String>,
        }
        let job_id = submit
            .json::<SubmitResponse>()
            .await
            .map_err(|e| err(e.to_string()))?
            .id
            .ok_or_else(|| err("no job id in submit response".to_string()))?;

        // Poll until done or the ceiling passes; an unreachable check
        // endpoint just waits for the next tick.
        let deadline = tokio::time::Instant::now() + HORDE_POLL_CEILING;
        loop {
            tokio::time::sleep(HORDE_POLL_INTERVAL).await;
            if tokio::time::Instant::now() >= deadline {
                break;
            }

            let check = match self
                .client
                .get(format!("{}/generate/check/{}", HORDE_API, job_id))
                .timeout(Duration::from_secs(10))
                .send()
                .await
            {
                Ok(r) if r.status().is_success() => match r.json::<HordeCheck>().await {
                    Ok(c) => c,
                    Err(_) => continue,
                },
                _ => continue,
            };

            match interpret_check(&check) {
                PollStep::Finished => break,
                PollStep::Continue => continue,
                PollStep::Faulted => return Err(err("generation faulted".to_string()).into()),
                PollStep::NoWorkers => {
                    return Err(err("no workers available".to_string()).into())
                }
            }
        }

        #[derive(Deserialize)]
        struct StatusResponse {
            #[serde(default)]
            done: bool,
            #[serde(default)]
            generations: Vec<Generation>,
        }
        #[derive(Deserialize)]
        struct Generation {
            img: Option<String>,
            #[serde(default)]
            censored: bool,
        }

        let status = self
            .client
            .get(format!("{}/generate/status/{}", HORDE_API, job_id))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| err(e.to_string()))?;

        if !status.status().is_success() {
            return Err(err(format!("status HTTP {}", status.status())).into());
        }

        let status: StatusResponse = status.json().await.map_err(|e| err(e.to_string()))?;

        if status.generations.first().map(|g| g.censored).unwrap_or(false) {
            return Err(err("image was censored by NSFW filter".to_string()).into());
        }
        if !status.done || status.generations.is_empty() {
            return Err(err("generation not complete within ceiling".to_string()).into());
        }

        let img_url = status
            .generations
            .first()
            .and_then(|g| g.img.clone())
            .ok_or_else(|| err("no image URL in status".to_string()))?;

        let image_response = self
            .client
            .get(&img_url)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| err(e.to_string()))?;

        if !image_response.status().is_success() {
            return Err(err(format!("image fetch HTTP {}", image_response.status())).into());
        }

        let bytes = image_response
            .bytes()
            .await
            .map_err(|e| err(e.to_string()))?
            .to_vec();
        check_byte_floor("stable_horde", &bytes)?;
        check_dimension_floor("stable_horde", &bytes)?;

        let resized = resample_cover(&bytes, dims)?;
        Ok(GeneratedImage {
            bytes: resized,
            width: dims.width,
            height: dims.height,
        })
    }
}

/// Resize to fill the target, cropping overflow around the center, and
/// re-encode as PNG.
pub fn resample_cover(bytes: &[u8], target: Dimensions) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| tier_error("resample", e.to_string()))?
        .to_rgba8();
    let (w, h) = (img.width(), img.height());

    let scale = f64::max(
        target.width as f64 / w as f64,
        target.height as f64 / h as f64,
    );
    let scaled_w = (w as f64 * scale).ceil() as u32;
    let scaled_h = (h as f64 * scale).ceil() as u32;

    let scaled = imageops::resize(&img, scaled_w, scaled_h, imageops::FilterType::Lanczos3);
    let x = (scaled_w.saturating_sub(target.width)) / 2;
    let y = (scaled_h.saturating_sub(target.height)) / 2;
    let cropped = imageops::crop_imm(&scaled, x, y, target.width, target.height).to_image();

    encode_png(&cropped)
}

fn encode_png(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img.clone())
        .write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| tier_error("encode", e.to_string()))?;
    Ok(out.into_inner())
}

// ----------------------------------------------------------------------
// Tier 5: local branded placeholder (never fails)
// ----------------------------------------------------------------------

const THEMES: [([u8; 3], [u8; 3], [u8; 3]); 6] = [
    ([0x63, 0x66, 0xf1], [0xa8, 0x55, 0xf7], [0xc4, 0xb5, 0xfd]),
    ([0x0e, 0xa5, 0xe9], [0x63, 0x66, 0xf1], [0x93, 0xc5, 0xfd]),
    ([0xf4, 0x3f, 0x5e], [0xf9, 0x73, 0x16], [0xfd, 0xa4, 0xaf]),
    ([0x10, 0xb9, 0x81], [0x0e, 0xa5, 0xe9], [0x6e, 0xe7, 0xb7]),
    ([0x8b, 0x5c, 0xf6], [0xec, 0x48, 0x99], [0xc0, 0x84, 0xfc]),
    ([0xf5, 0x9e, 0x0b], [0xef, 0x44, 0x44], [0xfc, 0xd3, 0x4d]),
];

/// Synthesize the branded gradient placeholder at exactly the requested
/// dimensions. Pure pixel work, no I/O.
pub fn local_placeholder(dims: Dimensions, _context: &ImageContext) -> GeneratedImage {
    let theme = THEMES[rand::thread_rng().gen_range(0..THEMES.len())];
    let mut img = RgbaImage::new(dims.width, dims.height);

    // Diagonal gradient from the first theme color to the second.
    let max = (dims.width + dims.height) as f64;
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let t = (x + y) as f64 / max;
        let r = lerp(theme.0[0], theme.1[0], t);
        let g = lerp(theme.0[1], theme.1[1], t);
        let b = lerp(theme.0[2], theme.1[2], t);
        *pixel = Rgba([r, g, b, 255]);
    }

    // Decorative accent circles.
    draw_circle(
        &mut img,
        (dims.width as f64 * 0.8) as i64,
        (dims.height as f64 * 0.2) as i64,
        (dims.height as f64 * 0.35) as i64,
        theme.2,
        0.15,
    );
    draw_circle(
        &mut img,
        (dims.width as f64 * 0.15) as i64,
        (dims.height as f64 * 0.75) as i64,
        (dims.height as f64 * 0.25) as i64,
        theme.2,
        0.10,
    );

    // Darkening gradient at the bottom for readability of a later overlay.
    darken_bottom(&mut img, 0.6);

    let bytes = encode_png(&img).unwrap_or_default();
    GeneratedImage {
        bytes,
        width: dims.width,
        height: dims.height,
    }
}

fn lerp(a: u8, b: u8, t: f64) -> u8 {
    (a as f64 + (b as f64 - a as f64) * t).round().clamp(0.0, 255.0) as u8
}

fn draw_circle(img: &mut RgbaImage, cx: i64, cy: i64, radius: i64, color: [u8; 3], alpha: f64) {
    let r2 = radius * radius;
    let (w, h) = (img.width() as i64, img.height() as i64);
    for y in (cy - radius).max(0)..(cy + radius).min(h) {
        for x in (cx - radius).max(0)..(cx + radius).min(w) {
            let dx = x - cx;
            let dy = y - cy;
            if dx * dx + dy * dy <= r2 {
                let p = img.get_pixel_mut(x as u32, y as u32);
                for (c, overlay) in p.0.iter_mut().take(3).zip(color) {
                    *c = lerp(*c, overlay, alpha);
                }
            }
        }
    }
}

fn darken_bottom(img: &mut RgbaImage, max_opacity: f64) {
    let h = img.height();
    let start = h / 2;
    for y in start..h {
        let t = (y - start) as f64 / (h - start) as f64;
        let opacity = t * max_opacity;
        for x in 0..img.width() {
            let p = img.get_pixel_mut(x, y);
            for c in p.0.iter_mut().take(3) {
                *c = lerp(*c, 0, opacity);
            }
        }
    }
}

// ----------------------------------------------------------------------
// Hook-text overlay (cosmetic)
// ----------------------------------------------------------------------

/// Word-wrap a hook into display lines of at most `max_chars` characters,
/// capped at four lines.
pub fn wrap_hook(hook: &str, max_chars: usize) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in hook.split_whitespace() {
        let candidate_len = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if candidate_len > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
            current = word.to_string();
        } else if current.is_empty() {
            current = word.to_string();
        } else {
            current.push(' ');
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines.truncate(4);
    lines
}

/// Composite a darkening gradient and the wrapped hook text onto the bottom
/// of the image. Requires a configured overlay font; without one only the
/// gradient is applied.
pub fn apply_hook_overlay(
    bytes: &[u8],
    hook: &str,
    font_path: Option<&str>,
) -> Result<Vec<u8>> {
    use ab_glyph::{Font, FontVec, PxScale, ScaleFont};

    let mut img = image::load_from_memory(bytes)
        .map_err(|e| tier_error("overlay", e.to_string()))?
        .to_rgba8();
    let (width, height) = (img.width(), img.height());

    darken_bottom(&mut img, 0.85);

    if let Some(path) = font_path {
        let font_data =
            std::fs::read(path).map_err(|e| tier_error("overlay", e.to_string()))?;
        let font =
            FontVec::try_from_vec(font_data).map_err(|e| tier_error("overlay", e.to_string()))?;

        let font_size = (width as f32 * 0.04).clamp(24.0, 48.0);
        let padding = (width as f32 * 0.05) as u32;
        let max_chars = ((width - padding * 2) as f32 / (font_size * 0.55)) as usize;
        let lines = wrap_hook(hook, max_chars.max(8));

        let scale = PxScale::from(font_size);
        let scaled = font.as_scaled(scale);
        let line_height = (font_size * 1.3) as u32;
        let block_height = lines.len() as u32 * line_height + padding;
        let mut y_cursor = height.saturating_sub(block_height);

        for line in &lines {
            let mut x_cursor = padding as f32;
            for ch in line.chars() {
                let glyph_id = scaled.glyph_id(ch);
                let glyph = glyph_id.with_scale_and_position(
                    scale,
                    ab_glyph::point(x_cursor, y_cursor as f32 + scaled.ascent()),
                );
                let advance = scaled.h_advance(glyph_id);
                if let Some(outlined) = font.outline_glyph(glyph) {
                    let bounds = outlined.px_bounds();
                    outlined.draw(|gx, gy, coverage| {
                        let px = bounds.min.x as i64 + gx as i64;
                        let py = bounds.min.y as i64 + gy as i64;
                        if px >= 0 && py >= 0 && (px as u32) < width && (py as u32) < height {
                            let p = img.get_pixel_mut(px as u32, py as u32);
                            for c in p.0.iter_mut().take(3) {
                                *c = lerp(*c, 255, coverage as f64);
                            }
                        }
                    });
                }
                x_cursor += advance;
            }
            y_cursor += line_height;
        }
    }

    encode_png(&img)
}

// ----------------------------------------------------------------------
// The waterfall engine
// ----------------------------------------------------------------------

pub struct ImageEngine {
    tiers: Vec<Box<dyn ImageTier>>,
    overlay_font: Option<String>,
}

impl ImageEngine {
    /// Build the standard waterfall from configured keys. Keyless tiers are
    /// always present; the local placeholder is implicit and unconditional.
    pub fn from_config(providers: &ProvidersConfig, media: &MediaConfig) -> Self {
        let mut tiers: Vec<Box<dyn ImageTier>> = Vec::new();

        if let Some(key) = &providers.together_api_key {
            tiers.push(Box::new(TogetherTier::new(key)));
        }
        if let Some(key) = &providers.gemini_api_key {
            tiers.push(Box::new(GeminiImageTier::new(key)));
        }
        tiers.push(Box::new(PollinationsTier::new()));
        tiers.push(Box::new(StableHordeTier::new()));

        Self {
            tiers,
            overlay_font: media.overlay_font.clone(),
        }
    }

    pub fn with_tiers(tiers: Vec<Box<dyn ImageTier>>, overlay_font: Option<String>) -> Self {
        Self {
            tiers,
            overlay_font,
        }
    }

    pub fn tier_names(&self) -> Vec<&str> {
        self.tiers.iter().map(|t| t.name()).collect()
    }

    /// Run the waterfall. Always returns an image: when every tier fails the
    /// local placeholder takes over, so the only error path is a broken
    /// overlay input, which is swallowed.
    pub async fn generate(
        &self,
        prompt: &str,
        aspect_ratio: &str,
        context: &ImageContext,
    ) -> GeneratedImage {
        let dims = Dimensions::for_aspect_ratio(aspect_ratio);
        let mut errors: Vec<String> = Vec::new();
        let mut result: Option<GeneratedImage> = None;

        for tier in &self.tiers {
            match tier.generate(prompt, dims).await {
                Ok(image) => {
                    tracing::debug!(tier = tier.name(), bytes = image.bytes.len(), "image tier succeeded");
                    result = Some(image);
                    break;
                }
                Err(e) => {
                    tracing::warn!(tier = tier.name(), error = %e, "image tier failed");
                    errors.push(format!("{}: {}", tier.name(), e));
                }
            }
        }

        let mut image = result.unwrap_or_else(|| {
            if !errors.is_empty() {
                tracing::warn!(
                    errors = %errors.join(" | "),
                    "all image tiers failed, using local placeholder"
                );
            }
            local_placeholder(dims, context)
        });

        if let Some(hook) = &context.hook {
            match apply_hook_overlay(&image.bytes, hook, self.overlay_font.as_deref()) {
                Ok(composited) => image.bytes = composited,
                Err(e) => {
                    tracing::warn!(error = %e, "hook overlay failed, using image as-is");
                }
            }
        }

        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeTier {
        name: String,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ImageTier for FakeTier {
        fn name(&self) -> &str {
            &self.name
        }

        async fn generate(&self, _prompt: &str, dims: Dimensions) -> Result<GeneratedImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(tier_error(&self.name, "down").into());
            }
            Ok(GeneratedImage {
                bytes: vec![0u8; MIN_IMAGE_BYTES + 1],
                width: dims.width,
                height: dims.height,
            })
        }
    }

    fn fake(name: &str, fail: bool, calls: &Arc<AtomicUsize>) -> Box<dyn ImageTier> {
        Box::new(FakeTier {
            name: name.to_string(),
            fail,
            calls: calls.clone(),
        })
    }

    #[test]
    fn test_dimensions_for_aspect_ratio() {
        assert_eq!(
            Dimensions::for_aspect_ratio("9:16"),
            Dimensions { width: 1080, height: 1920 }
        );
        assert_eq!(
            Dimensions::for_aspect_ratio("unknown"),
            Dimensions { width: 1200, height: 675 }
        );
    }

    #[test]
    fn test_horde_generation_size_buckets() {
        let landscape = Dimensions { width: 1200, height: 675 }.horde_generation_size();
        assert_eq!(landscape, Dimensions { width: 512, height: 320 });
        let portrait = Dimensions { width: 1080, height: 1920 }.horde_generation_size();
        assert_eq!(portrait, Dimensions { width: 320, height: 512 });
        let square = Dimensions { width: 1080, height: 1080 }.horde_generation_size();
        assert_eq!(square, Dimensions { width: 512, height: 512 });
    }

    #[test]
    fn test_interpret_check_terminal_states_win() {
        let faulted = HordeCheck { done: true, faulted: true, is_possible: true };
        assert_eq!(interpret_check(&faulted), PollStep::Faulted);

        let stranded = HordeCheck { done: false, faulted: false, is_possible: false };
        assert_eq!(interpret_check(&stranded), PollStep::NoWorkers);

        let done = HordeCheck { done: true, faulted: false, is_possible: true };
        assert_eq!(interpret_check(&done), PollStep::Finished);

        let pending = HordeCheck { done: false, faulted: false, is_possible: true };
        assert_eq!(interpret_check(&pending), PollStep::Continue);
    }

    #[test]
    fn test_wrap_hook_respects_width_and_line_cap() {
        let lines = wrap_hook("one two three four five six seven eight", 9);
        assert!(lines.iter().all(|l| l.chars().count() <= 9));
        assert!(lines.len() <= 4);
        assert_eq!(lines[0], "one two");
    }

    #[test]
    fn test_local_placeholder_exact_dimensions() {
        let dims = Dimensions { width: 320, height: 180 };
        let placeholder = local_placeholder(dims, &ImageContext::default());
        assert_eq!(placeholder.width, 320);
        assert_eq!(placeholder.height, 180);
        assert!(placeholder.bytes.len() >= MIN_IMAGE_BYTES);

        let decoded = image::load_from_memory(&placeholder.bytes).unwrap();
        assert_eq!(decoded.width(), 320);
        assert_eq!(decoded.height(), 180);
    }

    #[test]
    fn test_dimension_floor_rejects_degenerate_images() {
        // A technically valid PNG far below the pixel floor must not be
        // accepted and upscaled to target size.
        let tiny = local_placeholder(Dimensions { width: 2, height: 2 }, &ImageContext::default());
        let err = check_dimension_floor("stable_horde", &tiny.bytes).unwrap_err();
        assert!(err.to_string().contains("2x2"));

        // Undecodable bytes fail the same check.
        assert!(check_dimension_floor("stable_horde", &[0u8; 2048]).is_err());

        let ok = local_placeholder(
            Dimensions { width: 512, height: 512 },
            &ImageContext::default(),
        );
        assert!(check_dimension_floor("stable_horde", &ok.bytes).is_ok());
    }

    #[test]
    fn test_resample_cover_hits_target_shape() {
        let src = local_placeholder(Dimensions { width: 512, height: 320 }, &ImageContext::default());
        let resized = resample_cover(&src.bytes, Dimensions { width: 300, height: 300 }).unwrap();
        let decoded = image::load_from_memory(&resized).unwrap();
        assert_eq!(decoded.width(), 300);
        assert_eq!(decoded.height(), 300);
    }

    #[tokio::test]
    async fn test_waterfall_short_circuits_on_first_success() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let engine = ImageEngine::with_tiers(
            vec![fake("together", false, &first), fake("gemini", false, &second)],
            None,
        );

        let image = engine
            .generate("a sunset", "1:1", &ImageContext::default())
            .await;

        assert_eq!(image.width, 1080);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_waterfall_falls_through_to_placeholder() {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = ImageEngine::with_tiers(
            vec![
                fake("together", true, &calls),
                fake("gemini", true, &calls),
                fake("pollinations", true, &calls),
                fake("stable_horde", true, &calls),
            ],
            None,
        );

        let image = engine
            .generate("a sunset", "16:9", &ImageContext::default())
            .await;

        // Every tier was tried once, then the placeholder delivered at the
        // exact requested dimensions.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(image.width, 1200);
        assert_eq!(image.height, 675);
        let decoded = image::load_from_memory(&image.bytes).unwrap();
        assert_eq!(decoded.width(), 1200);
    }

    #[tokio::test]
    async fn test_overlay_failure_is_swallowed() {
        let calls = Arc::new(AtomicUsize::new(0));
        // Tier returns junk bytes that cannot be decoded for the overlay.
        let engine = ImageEngine::with_tiers(vec![fake("together", false, &calls)], None);

        let context = ImageContext {
            hook: Some("Stop scrolling".to_string()),
            ..Default::default()
        };
        let image = engine.generate("a sunset", "1:1", &context).await;
        // The junk image survives untouched.
        assert_eq!(image.bytes.len(), MIN_IMAGE_BYTES + 1);
    }
}
