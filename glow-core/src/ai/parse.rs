//! Turning model output into typed results.
//!
//! The model is asked for JSON but may wrap it in a markdown fence, add prose
//! around it, or return fields out of range. Parsing is lenient: anything
//! missing or malformed falls back to a safe default. Only text with no JSON
//! in it at all is an error.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::AiError;

/// Pull the JSON payload out of a model response.
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        // Skip the info string (`json`, `JSON`, ...) up to the newline.
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        let body = match body.find("```") {
            Some(end) => &body[..end],
            None => body,
        };
        let body = body.trim();
        if !body.is_empty() {
            return Some(body);
        }
    }

    let open = trimmed.find(['{', '['])?;
    let close_char = if trimmed[open..].starts_with('{') { '}' } else { ']' };
    let close = trimmed.rfind(close_char)?;
    (close > open).then(|| &trimmed[open..=close])
}

pub fn parse_json(text: &str) -> Result<Value, AiError> {
    let json = extract_json(text)
        .ok_or_else(|| AiError::Parse("no JSON found in response".to_string()))?;
    serde_json::from_str(json).map_err(|e| AiError::Parse(e.to_string()))
}

fn field<'a>(obj: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| obj.get(*n)).filter(|v| !v.is_null())
}

fn string_field(obj: &Value, names: &[&str]) -> Option<String> {
    field(obj, names)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Numbers, or strings like `"85"` / `"85%"`.
fn number_field(obj: &Value, names: &[&str]) -> Option<f64> {
    let n: f64 = match field(obj, names)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn string_list(obj: &Value, names: &[&str]) -> Vec<String> {
    match field(obj, names) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

/// A 0..=1 confidence. Values in (1, 100] are read as percentages.
fn unit_confidence(raw: Option<f64>) -> f64 {
    match raw {
        Some(v) if v > 1.0 && v <= 100.0 => v / 100.0,
        Some(v) => v.clamp(0.0, 1.0),
        None => 0.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkinType {
    Oily,
    Dry,
    Combination,
    #[default]
    Normal,
    Sensitive,
}

impl SkinType {
    fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "oily" => SkinType::Oily,
            "dry" => SkinType::Dry,
            "combination" | "combo" => SkinType::Combination,
            "sensitive" => SkinType::Sensitive,
            _ => SkinType::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SkinType::Oily => "oily",
            SkinType::Dry => "dry",
            SkinType::Combination => "combination",
            SkinType::Normal => "normal",
            SkinType::Sensitive => "sensitive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkinAnalysis {
    pub skin_type: SkinType,
    pub concerns: Vec<String>,
    /// 0.0..=1.0
    pub confidence: f64,
}

impl SkinAnalysis {
    pub fn from_value(v: &Value) -> Self {
        Self {
            skin_type: string_field(v, &["skinType", "skin_type"])
                .map(|s| SkinType::parse(&s))
                .unwrap_or_default(),
            concerns: string_list(v, &["concerns"]),
            confidence: unit_confidence(number_field(v, &["confidence"])),
        }
    }
}

pub fn parse_skin_analysis(text: &str) -> Result<SkinAnalysis, AiError> {
    let value = parse_json(text)?;
    if !value.is_object() {
        return Err(AiError::Parse("skin analysis is not an object".into()));
    }
    Ok(SkinAnalysis::from_value(&value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Exercise,
    Product,
}

const DEFAULT_STEP_SECONDS: u32 = 60;
const MIN_STEP_SECONDS: u32 = 10;
const MAX_STEP_SECONDS: u32 = 600;
const MAX_ROUTINE_MINUTES: u32 = 120;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineStep {
    pub kind: StepKind,
    pub title: String,
    pub instructions: String,
    pub duration_seconds: u32,
}

impl RoutineStep {
    pub fn exercise(title: &str, instructions: &str, duration_seconds: u32) -> Self {
        Self {
            kind: StepKind::Exercise,
            title: title.to_string(),
            instructions: instructions.to_string(),
            duration_seconds,
        }
    }

    pub fn product(title: &str, instructions: &str, duration_seconds: u32) -> Self {
        Self {
            kind: StepKind::Product,
            ..Self::exercise(title, instructions, duration_seconds)
        }
    }

    fn from_value(v: &Value, index: usize) -> Self {
        let kind = match string_field(v, &["type", "kind", "stepType"]).as_deref() {
            Some(k) if k.eq_ignore_ascii_case("product") => StepKind::Product,
            _ => StepKind::Exercise,
        };
        let duration = number_field(v, &["durationSeconds", "duration_seconds", "duration"])
            .map(|d| d.round().clamp(MIN_STEP_SECONDS as f64, MAX_STEP_SECONDS as f64) as u32)
            .unwrap_or(DEFAULT_STEP_SECONDS);

        Self {
            kind,
            title: string_field(v, &["title", "name"])
                .unwrap_or_else(|| format!("Step {}", index + 1)),
            instructions: string_field(v, &["instructions", "description"]).unwrap_or_default(),
            duration_seconds: duration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedRoutine {
    pub title: String,
    pub description: String,
    pub focus_area: String,
    pub estimated_duration_minutes: u32,
    pub benefits: Vec<String>,
    pub steps: Vec<RoutineStep>,
}

impl GeneratedRoutine {
    /// Whole minutes covering every step, at least one.
    pub fn minutes_for_steps(steps: &[RoutineStep]) -> u32 {
        let seconds: u32 = steps.iter().map(|s| s.duration_seconds).sum();
        seconds.div_ceil(60).max(1)
    }

    fn from_value(v: &Value) -> Option<Self> {
        let steps: Vec<RoutineStep> = match field(v, &["steps"]) {
            Some(Value::Array(items)) => items
                .iter()
                .filter(|s| s.is_object())
                .enumerate()
                .map(|(i, s)| RoutineStep::from_value(s, i))
                .collect(),
            _ => Vec::new(),
        };
        if steps.is_empty() {
            return None;
        }

        let minutes = number_field(v, &["estimatedDurationMinutes", "estimated_duration_minutes"])
            .map(|m| m.round().clamp(1.0, MAX_ROUTINE_MINUTES as f64) as u32)
            .unwrap_or_else(|| Self::minutes_for_steps(&steps));

        Some(Self {
            title: string_field(v, &["title", "name"]).unwrap_or_else(|| "Custom Routine".into()),
            description: string_field(v, &["description"]).unwrap_or_default(),
            focus_area: string_field(v, &["focusArea", "focus_area"])
                .unwrap_or_else(|| "overall".into()),
            estimated_duration_minutes: minutes,
            benefits: string_list(v, &["benefits"]),
            steps,
        })
    }
}

/// Routines from either a bare array or `{"routines": [...]}`.
/// Routines without usable steps are dropped.
pub fn parse_routines(text: &str) -> Result<Vec<GeneratedRoutine>, AiError> {
    let value = parse_json(text)?;
    let items = match &value {
        Value::Array(items) => items,
        Value::Object(_) => match value.get("routines") {
            Some(Value::Array(items)) => items,
            _ => return Err(AiError::Parse("no routines array in response".into())),
        },
        _ => return Err(AiError::Parse("routines response is not JSON".into())),
    };

    let routines: Vec<GeneratedRoutine> =
        items.iter().filter_map(GeneratedRoutine::from_value).collect();
    if routines.is_empty() {
        return Err(AiError::Parse("no usable routines in response".into()));
    }
    Ok(routines)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInsight {
    /// 0..=100
    pub suitability_score: u8,
    pub suitability_label: String,
    pub summary: String,
    pub pros: Vec<String>,
    pub cons: Vec<String>,
    pub usage_tips: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternatives: Option<Vec<String>>,
}

pub fn suitability_label(score: u8) -> &'static str {
    match score {
        80..=100 => "Excellent Match",
        60..=79 => "Good Match",
        40..=59 => "Fair Match",
        _ => "Poor Match",
    }
}

impl ProductInsight {
    fn from_value(v: &Value) -> Self {
        let score = number_field(v, &["suitabilityScore", "suitability_score"])
            .map(|s| s.round().clamp(0.0, 100.0) as u8)
            .unwrap_or(50);
        let alternatives = string_list(v, &["alternatives"]);

        Self {
            suitability_score: score,
            suitability_label: string_field(v, &["suitabilityLabel", "suitability_label"])
                .unwrap_or_else(|| suitability_label(score).to_string()),
            summary: string_field(v, &["summary"]).unwrap_or_default(),
            pros: string_list(v, &["pros"]),
            cons: string_list(v, &["cons"]),
            usage_tips: string_list(v, &["usageTips", "usage_tips"]),
            alternatives: (!alternatives.is_empty()).then_some(alternatives),
        }
    }
}

pub fn parse_product_insight(text: &str) -> Result<ProductInsight, AiError> {
    let value = parse_json(text)?;
    if !value.is_object() {
        return Err(AiError::Parse("product insight is not an object".into()));
    }
    Ok(ProductInsight::from_value(&value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallAssessment {
    Improved,
    #[default]
    Stable,
    Declined,
}

impl OverallAssessment {
    fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "improved" | "improvement" | "better" => OverallAssessment::Improved,
            "declined" | "worse" | "worsened" => OverallAssessment::Declined,
            _ => OverallAssessment::Stable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoComparison {
    pub overall_assessment: OverallAssessment,
    pub change_areas: Vec<String>,
    /// 0.0..=1.0
    pub confidence_score: f64,
    pub summary: String,
}

impl PhotoComparison {
    fn from_value(v: &Value) -> Self {
        let change_areas = match field(v, &["changeAreas", "change_areas"]) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Object(_) => {
                        let area = string_field(item, &["area", "name"])?;
                        Some(match string_field(item, &["description", "change"]) {
                            Some(desc) => format!("{}: {}", area, desc),
                            None => area,
                        })
                    }
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        };

        Self {
            overall_assessment: string_field(v, &["overallAssessment", "overall_assessment"])
                .map(|s| OverallAssessment::parse(&s))
                .unwrap_or_default(),
            change_areas,
            confidence_score: unit_confidence(number_field(
                v,
                &["confidenceScore", "confidence_score", "confidence"],
            )),
            summary: string_field(v, &["summary"]).unwrap_or_default(),
        }
    }
}

pub fn parse_photo_comparison(text: &str) -> Result<PhotoComparison, AiError> {
    let value = parse_json(text)?;
    if !value.is_object() {
        return Err(AiError::Parse("photo comparison is not an object".into()));
    }
    Ok(PhotoComparison::from_value(&value))
}
