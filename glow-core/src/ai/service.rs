use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::client::{AiClient, AiMessage, AiRequest, ContentBlock};
use super::parse::{
    self, GeneratedRoutine, PhotoComparison, ProductInsight, RoutineStep, SkinAnalysis,
};
use super::{AiError, AiGateway};

pub const SKIN_ANALYSIS_TIMEOUT: Duration = Duration::from_secs(10);
pub const ROUTINE_GENERATION_TIMEOUT: Duration = Duration::from_secs(30);
pub const PRODUCT_INSIGHT_TIMEOUT: Duration = Duration::from_secs(15);
pub const COMPARISON_TIMEOUT: Duration = Duration::from_secs(15);

const ANALYSIS_SYSTEM: &str = "You are a skincare assistant. Reply with JSON only.";

/// Product details sent for a suitability check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductInfo {
    pub name: String,
    pub brand: Option<String>,
    pub ingredients: Vec<String>,
}

/// AI-backed features. Every call goes through the shared gateway.
#[derive(Clone)]
pub struct AiService {
    gateway: AiGateway,
    client: Arc<dyn AiClient>,
    model: String,
}

impl AiService {
    pub fn new(gateway: AiGateway, client: Arc<dyn AiClient>, model: impl Into<String>) -> Self {
        Self {
            gateway,
            client,
            model: model.into(),
        }
    }

    fn request(&self, content: Vec<ContentBlock>, max_tokens: u32, temperature: f32) -> AiRequest {
        AiRequest {
            model: self.model.clone(),
            messages: vec![AiMessage::user(content)],
            system: Some(ANALYSIS_SYSTEM.to_string()),
            max_tokens,
            temperature,
        }
    }

    /// Send through the gateway and parse the text. Parse failures are not
    /// retried.
    async fn call<T, P>(
        &self,
        label: &str,
        timeout: Duration,
        request: AiRequest,
        parse: P,
    ) -> Result<T, AiError>
    where
        P: FnOnce(&str) -> Result<T, AiError>,
    {
        let client = self.client.clone();
        let text = self
            .gateway
            .execute(label, timeout, move || {
                let client = client.clone();
                let request = request.clone();
                async move { client.complete(request).await }
            })
            .await?;
        parse(&text)
    }

    pub async fn analyze_skin(&self, photo_jpeg: &[u8]) -> Result<SkinAnalysis, AiError> {
        let request = self.request(
            vec![
                ContentBlock::jpeg(photo_jpeg),
                ContentBlock::text(
                    "Analyze the skin in this photo. Respond with \
                     {\"skinType\": \"oily|dry|combination|normal|sensitive\", \
                     \"concerns\": [string], \"confidence\": 0-1}.",
                ),
            ],
            1024,
            0.2,
        );
        let analysis = self
            .call("skin analysis", SKIN_ANALYSIS_TIMEOUT, request, parse::parse_skin_analysis)
            .await?;
        info!(
            skin_type = analysis.skin_type.as_str(),
            concerns = analysis.concerns.len(),
            "Skin analysis complete"
        );
        Ok(analysis)
    }

    /// Generated routines, or the built-in templates if generation fails
    /// for any reason.
    pub async fn generate_routines(
        &self,
        profile: &SkinAnalysis,
        goals: &[String],
    ) -> Vec<GeneratedRoutine> {
        match self.try_generate_routines(profile, goals).await {
            Ok(routines) => routines,
            Err(e) => {
                warn!("Routine generation failed, using templates: {}", e);
                fallback_routines()
            }
        }
    }

    pub async fn try_generate_routines(
        &self,
        profile: &SkinAnalysis,
        goals: &[String],
    ) -> Result<Vec<GeneratedRoutine>, AiError> {
        let prompt = format!(
            "Create 3 routines mixing face-yoga exercises and product steps for \
             {} skin with concerns [{}] and goals [{}]. Respond with a JSON array of \
             {{\"title\", \"description\", \"focusArea\", \"estimatedDurationMinutes\", \
             \"benefits\": [string], \"steps\": [{{\"type\": \"exercise|product\", \
             \"title\", \"instructions\", \"durationSeconds\"}}]}}.",
            profile.skin_type.as_str(),
            profile.concerns.join(", "),
            goals.join(", "),
        );
        let request = self.request(vec![ContentBlock::text(prompt)], 4096, 0.7);
        let routines = self
            .call(
                "routine generation",
                ROUTINE_GENERATION_TIMEOUT,
                request,
                parse::parse_routines,
            )
            .await?;
        info!("Generated {} routines", routines.len());
        Ok(routines)
    }

    pub async fn product_insight(
        &self,
        product: &ProductInfo,
        profile: &SkinAnalysis,
    ) -> Result<ProductInsight, AiError> {
        let prompt = format!(
            "Rate how suitable \"{}\"{} (ingredients: {}) is for {} skin with concerns [{}]. \
             Respond with {{\"suitabilityScore\": 0-100, \"suitabilityLabel\", \"summary\", \
             \"pros\": [string], \"cons\": [string], \"usageTips\": [string], \
             \"alternatives\": [string]}}.",
            product.name,
            product
                .brand
                .as_deref()
                .map(|b| format!(" by {}", b))
                .unwrap_or_default(),
            if product.ingredients.is_empty() {
                "unknown".to_string()
            } else {
                product.ingredients.join(", ")
            },
            profile.skin_type.as_str(),
            profile.concerns.join(", "),
        );
        let request = self.request(vec![ContentBlock::text(prompt)], 2048, 0.3);
        self.call(
            "product insight",
            PRODUCT_INSIGHT_TIMEOUT,
            request,
            parse::parse_product_insight,
        )
        .await
    }

    pub async fn compare_photos(
        &self,
        before_jpeg: &[u8],
        after_jpeg: &[u8],
    ) -> Result<PhotoComparison, AiError> {
        let request = self.request(
            vec![
                ContentBlock::text("Before:"),
                ContentBlock::jpeg(before_jpeg),
                ContentBlock::text("After:"),
                ContentBlock::jpeg(after_jpeg),
                ContentBlock::text(
                    "Compare the skin between these photos. Respond with \
                     {\"overallAssessment\": \"improved|stable|declined\", \
                     \"changeAreas\": [string], \"confidenceScore\": 0-1, \"summary\"}.",
                ),
            ],
            2048,
            0.2,
        );
        self.call(
            "photo comparison",
            COMPARISON_TIMEOUT,
            request,
            parse::parse_photo_comparison,
        )
        .await
    }
}

/// The three routines offered when generation is unavailable.
pub fn fallback_routines() -> Vec<GeneratedRoutine> {
    fn routine(
        title: &str,
        description: &str,
        focus: &str,
        benefits: &[&str],
        steps: Vec<RoutineStep>,
    ) -> GeneratedRoutine {
        GeneratedRoutine {
            title: title.to_string(),
            description: description.to_string(),
            focus_area: focus.to_string(),
            estimated_duration_minutes: GeneratedRoutine::minutes_for_steps(&steps),
            benefits: benefits.iter().map(|b| b.to_string()).collect(),
            steps,
        }
    }

    vec![
        routine(
            "Morning Glow Routine",
            "Wake up the face and prep skin for the day.",
            "overall",
            &["Reduces morning puffiness", "Boosts circulation"],
            vec![
                RoutineStep::product("Cleanse", "Wash with a gentle cleanser and pat dry.", 60),
                RoutineStep::exercise(
                    "Forehead Smoother",
                    "Place fingers on the forehead and sweep outward with light pressure.",
                    60,
                ),
                RoutineStep::exercise(
                    "Cheek Lift",
                    "Smile wide, press fingertips on the cheekbones and lift upward.",
                    60,
                ),
                RoutineStep::product("Moisturize & Protect", "Apply moisturizer, then SPF.", 60),
            ],
        ),
        routine(
            "Evening Restore Routine",
            "Release tension and support overnight repair.",
            "relaxation",
            &["Releases jaw tension", "Supports skin barrier"],
            vec![
                RoutineStep::product("Double Cleanse", "Remove makeup, then cleanse.", 90),
                RoutineStep::exercise(
                    "Jaw Release",
                    "Open the mouth slowly, hold, then massage the jaw hinge in circles.",
                    60,
                ),
                RoutineStep::exercise(
                    "Eye Circle Massage",
                    "Tap ring fingers gently around the eye socket.",
                    60,
                ),
                RoutineStep::product("Night Treatment", "Apply serum and night cream.", 60),
            ],
        ),
        routine(
            "Quick Refresh",
            "A short reset for any time of day.",
            "overall",
            &["Fast energy boost"],
            vec![
                RoutineStep::exercise("Face Tapping", "Tap fingertips lightly across the face.", 30),
                RoutineStep::exercise(
                    "Neck Stretch",
                    "Tilt the head back and push the lower lip forward.",
                    30,
                ),
                RoutineStep::product("Hydrating Mist", "Mist the face and let it absorb.", 30),
            ],
        ),
    ]
}
