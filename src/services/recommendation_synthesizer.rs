//! 配餐推荐合成 - 业务能力层
//!
//! 一次文本模型调用生成全部配餐，再对模型输出做强制后处理，保证：
//! - 每瓶酒都有非空的 `coursePairing`
//! - `overallExplanation` 非空

use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, warn};

use crate::clients::InferenceService;
use crate::config::SynthesisFailurePolicy;
use crate::error::AppResult;
use crate::models::wine::{field_str, json_str};
use crate::models::{Course, DetectedWine, Recommendation, Tier, WineMatch};
use crate::services::ResponseParser;
use crate::utils::logging::truncate_text;

/// 没有任何菜品时使用的配餐标签
pub const GENERIC_COURSE_LABEL: &str = "General Meal";
/// 兜底配餐的单瓶说明
pub const GENERIC_WINE_EXPLANATION: &str =
    "This wine would complement the flavors of this course well.";
/// 模型没给出总体说明时使用
pub const GENERIC_OVERALL_EXPLANATION: &str =
    "These wines were selected to complement the flavors and characteristics of your meal courses.";
/// 模型没给出 wines 数组时使用
pub const FALLBACK_OVERALL_EXPLANATION: &str =
    "Here are some wine recommendations for your meal based on the available wines.";
/// 模型输出无法解析时使用
pub const PARSE_FAILURE_OVERALL_EXPLANATION: &str =
    "Based on the wines detected, here are some recommendations that should pair well with your meal.";

const SIMPLE_INSTRUCTION: &str = "You are a top-tier wine expert providing wine recommendations for a meal. You are thorough, precise, and confident in your recommendations. ALWAYS provide a pairing for EVERY wine and course combination, even if the pairing data is limited.

IMPORTANT: NEVER respond that you cannot make a recommendation or that you lack information. If specific details are missing, use your expert knowledge to make reasonable assumptions based on wine types, known characteristics, and general pairing principles.

You MUST return a valid JSON object with a 'wines' array of wine matches. Each wine match MUST include: name, year, type, and the specific course it pairs best with as 'coursePairing'.";

const STANDARD_INSTRUCTION: &str = "You are a top-tier wine expert providing wine recommendations for a meal. You are thorough, precise, and confident in your recommendations. ALWAYS provide a pairing for EVERY wine and course combination, even if the pairing data is limited.

IMPORTANT: NEVER respond that you cannot make a recommendation or that you lack information. If specific details are missing, use your expert knowledge to make reasonable assumptions based on wine types, known characteristics, and general pairing principles.

You MUST return a valid JSON object with an 'overallExplanation' field and a 'wines' array with matches. Each wine match MUST include: name, year, type, region, grape, the specific course it pairs best with as 'coursePairing', and a short, persuasive 'explanation' of why they match well together.";

const DETAILED_INSTRUCTION: &str = "You are a top-tier wine sommelier providing detailed wine recommendations for a meal. You are thorough, precise, and confident in your recommendations. ALWAYS provide a pairing for EVERY wine and course combination, even if the pairing data is limited.

IMPORTANT: NEVER respond that you cannot make a recommendation or that you lack information. If specific details are missing, use your expert knowledge to make reasonable assumptions based on wine types, known characteristics, and general pairing principles.

You MUST return a valid JSON object with:
1. An 'overallExplanation' field that provides comprehensive pairing theory and thoughtful conclusions
2. A 'wines' array with matches where each entry includes: name, year, type, region, grape, the specific course it pairs best with as 'coursePairing', and a detailed, persuasive 'explanation' of why they match well together, including flavor profiles and food pairing principles.

Ensure your response reads like a professional sommelier's analysis with a confident, authoritative tone throughout.";

/// 各档位固定的系统指令
pub fn instruction_for(tier: Tier) -> &'static str {
    match tier {
        Tier::Simple => SIMPLE_INSTRUCTION,
        Tier::Standard => STANDARD_INSTRUCTION,
        Tier::Detailed => DETAILED_INSTRUCTION,
    }
}

/// 配餐推荐合成服务
///
/// 职责：
/// - 每次调用只请求一次文本模型
/// - 解析模型输出并补齐缺失的配餐与说明
/// - 按配置的策略处理无法解析的输出
pub struct RecommendationSynthesizer {
    text: Arc<dyn InferenceService>,
    parser: ResponseParser,
    policy: SynthesisFailurePolicy,
}

impl RecommendationSynthesizer {
    pub fn new(text: Arc<dyn InferenceService>, policy: SynthesisFailurePolicy) -> Self {
        Self {
            text,
            parser: ResponseParser::new(),
            policy,
        }
    }

    /// 根据识别出的酒、菜品和档位生成推荐
    pub async fn synthesize(
        &self,
        wines: &[DetectedWine],
        courses: &[Course],
        tier: Tier,
    ) -> AppResult<Recommendation> {
        let user_message = build_user_message(wines, courses, tier);

        info!(
            "🤖 正在生成配餐推荐 (档位: {}, {} 瓶酒, {} 道菜)...",
            tier,
            wines.len(),
            courses.len()
        );
        let response = self
            .text
            .complete(Some(instruction_for(tier)), &user_message, None)
            .await?;
        debug!("推荐模型响应: {}", truncate_text(&response, 200));

        match self.parser.extract(&response) {
            Ok(parsed) => Ok(reconcile(&parsed, wines, courses)),
            Err(e) => match self.policy {
                SynthesisFailurePolicy::Graceful => {
                    warn!("⚠️ 推荐响应无法解析，使用兜底推荐: {}", e);
                    Ok(Recommendation {
                        wines: fallback_matches(wines, courses),
                        overall_explanation: PARSE_FAILURE_OVERALL_EXPLANATION.to_string(),
                    })
                }
                SynthesisFailurePolicy::Strict => Err(e.into()),
            },
        }
    }
}

/// 构建用户消息：菜品 JSON + 酒的文本列表
fn build_user_message(wines: &[DetectedWine], courses: &[Course], tier: Tier) -> String {
    let placeholder;
    let prompt_courses = if courses.is_empty() {
        placeholder = [Course {
            title: GENERIC_COURSE_LABEL.to_string(),
            description: "No specific course details provided".to_string(),
            dish_type: "Mixed".to_string(),
            portion_size: "Medium".to_string(),
            taste: "Varied".to_string(),
            accompaniment: String::new(),
        }];
        &placeholder[..]
    } else {
        courses
    };
    let courses_json = serde_json::to_string_pretty(prompt_courses).unwrap_or_default();

    let wines_list = if wines.is_empty() {
        "No wines were detected in the images.".to_string()
    } else {
        wines
            .iter()
            .map(DetectedWine::render_for_prompt)
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    format!(
        r#"Here are the courses in a meal:

{}

Here are the available wines:

{}

Please recommend which wines would pair best with these courses. I need you to match every wine with a course that it would pair well with. The recommendation should be returned as JSON with an 'overallExplanation' field and a 'wines' array with matches. Each wine match should include all wine details and which course it pairs with. The recommendation level is: {}.

IMPORTANT:
1. Make definitive recommendations even if you have to make reasonable assumptions
2. Match each wine to a specific course
3. Provide a complete explanation for each pairing
4. Always format your response as valid JSON that can be parsed"#,
        courses_json, wines_list, tier
    )
}

/// 第 i 瓶酒轮转搭配第 i mod N 道菜
pub fn round_robin_pairing(index: usize, courses: &[Course]) -> String {
    if courses.is_empty() {
        GENERIC_COURSE_LABEL.to_string()
    } else {
        courses[index % courses.len()].title.clone()
    }
}

/// 完全兜底：每瓶识别出的酒按轮转规则配菜，附通用说明
pub fn fallback_matches(wines: &[DetectedWine], courses: &[Course]) -> Vec<WineMatch> {
    wines
        .iter()
        .enumerate()
        .map(|(index, wine)| WineMatch {
            wine: wine.clone(),
            course_pairing: round_robin_pairing(index, courses),
            explanation: Some(GENERIC_WINE_EXPLANATION.to_string()),
        })
        .collect()
}

/// 把解析后的模型输出整理为满足不变量的推荐
///
/// 顶层是数组时视为 wines 数组。
pub fn reconcile(parsed: &JsonValue, wines: &[DetectedWine], courses: &[Course]) -> Recommendation {
    let empty = Map::new();
    let (entries, obj) = match parsed {
        JsonValue::Array(items) => (Some(items.as_slice()), &empty),
        JsonValue::Object(obj) => (
            obj.get("wines").and_then(JsonValue::as_array).map(Vec::as_slice),
            obj,
        ),
        _ => (None, &empty),
    };

    let matches = match entries {
        Some(entries) if !entries.is_empty() => entries
            .iter()
            .enumerate()
            .map(|(index, entry)| match_from_entry(index, entry, courses))
            .collect(),
        _ => {
            warn!("⚠️ 推荐响应中没有 wines 数组，按菜品轮转生成兜底配餐");
            fallback_matches(wines, courses)
        }
    };

    // 没有 wines 数组时仍保留模型给出的非空总体说明，只在缺失时用兜底句
    let overall_explanation = field_str(obj, &["overallExplanation"]).unwrap_or_else(|| {
        if entries.map_or(true, |e| e.is_empty()) {
            FALLBACK_OVERALL_EXPLANATION.to_string()
        } else {
            GENERIC_OVERALL_EXPLANATION.to_string()
        }
    });

    Recommendation {
        wines: matches,
        overall_explanation,
    }
}

/// 单条模型输出：保留模型给出的配菜提示，否则按位置轮转
fn match_from_entry(index: usize, entry: &JsonValue, courses: &[Course]) -> WineMatch {
    match entry {
        JsonValue::Object(obj) => WineMatch {
            wine: DetectedWine::from_json(obj),
            course_pairing: field_str(obj, &["coursePairing", "course"])
                .unwrap_or_else(|| round_robin_pairing(index, courses)),
            explanation: field_str(obj, &["explanation"]),
        },
        other => WineMatch {
            wine: json_str(other).map(DetectedWine::named).unwrap_or_default(),
            course_pairing: round_robin_pairing(index, courses),
            explanation: None,
        },
    }
}
