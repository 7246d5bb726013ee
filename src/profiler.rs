use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::ai::AIProvider;
use crate::error::ProfilerError;
use crate::models::{CandidateProfile, PositionSuggestion};

const MIN_CV_CHARS: usize = 50;
const MAX_TOKENS: u32 = 8192;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuggestionConstraints {
    pub max_results: usize,
    pub min_score: f32,
}

impl Default for SuggestionConstraints {
    fn default() -> Self {
        Self {
            max_results: 3,
            min_score: 70.0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PositionsEnvelope {
    #[serde(default)]
    positions: Vec<PositionSuggestion>,
}

pub struct CandidateProfiler<'a> {
    provider: &'a dyn AIProvider,
}

impl<'a> CandidateProfiler<'a> {
    pub fn new(provider: &'a dyn AIProvider) -> Self {
        Self { provider }
    }

    pub async fn profile(&self, cv_text: &str) -> Result<CandidateProfile, ProfilerError> {
        let trimmed = cv_text.trim();
        if trimmed.chars().count() < MIN_CV_CHARS {
            return Err(ProfilerError::InsufficientText(trimmed.chars().count()));
        }

        debug!(model = self.provider.model_name(), "requesting candidate profile");
        let response = self.ask(&profile_prompt(trimmed)).await?;
        let profile: CandidateProfile = parse_model_json(&response)?;
        info!("analyzed CV for {}", profile.display_name());
        Ok(profile)
    }

    pub async fn suggest_positions(
        &self,
        profile: &CandidateProfile,
        locations: &[String],
        constraints: SuggestionConstraints,
    ) -> Result<Vec<PositionSuggestion>, ProfilerError> {
        let prompt = positions_prompt(profile, locations, constraints)?;
        let response = self.ask(&prompt).await?;
        let envelope: PositionsEnvelope = parse_model_json(&response)?;

        let produced = envelope.positions.len();
        let kept = filter_suggestions(envelope.positions, constraints);
        if kept.len() < produced {
            warn!(
                "{} of {} suggested positions dropped (score below {} or over the limit of {})",
                produced - kept.len(),
                produced,
                constraints.min_score,
                constraints.max_results
            );
        }
        Ok(kept)
    }

    async fn ask(&self, prompt: &str) -> Result<String, ProfilerError> {
        self.provider
            .complete(prompt, MAX_TOKENS)
            .await
            .map_err(|e| ProfilerError::Provider(format!("{:#}", e)))
    }
}

/// Keep model order: drop low scores, then cut to the limit.
pub fn filter_suggestions(
    suggestions: Vec<PositionSuggestion>,
    constraints: SuggestionConstraints,
) -> Vec<PositionSuggestion> {
    suggestions
        .into_iter()
        .filter(|s| s.score >= constraints.min_score)
        .take(constraints.max_results)
        .collect()
}

fn fence_pattern() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*\s*\n?(.*?)\n?\s*```$").ok())
        .as_ref()
}

/// Models like to wrap JSON in ```json fences.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    match fence_pattern()
        .and_then(|re| re.captures(trimmed))
        .and_then(|c| c.get(1))
    {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

fn parse_model_json<T: for<'de> Deserialize<'de>>(response: &str) -> Result<T, ProfilerError> {
    let body = strip_code_fence(response);
    serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(120).collect();
        ProfilerError::MalformedModelResponse(format!("{} (response began: {:?})", e, preview))
    })
}

fn profile_prompt(cv_text: &str) -> String {
    format!(
        r#"Analyze the following CV and extract structured information in JSON format.

CV Content:
{cv_text}

Return ONLY a JSON object with this shape:
{{
    "personal_info": {{
        "name": "Full name from CV",
        "email": "Email address if found",
        "phone": "Phone number if found"
    }},
    "skills": ["list of technical and soft skills"],
    "experience_years": "total years of experience as number",
    "job_titles": ["list of previous job titles"],
    "industries": ["list of industries worked in"],
    "education": ["degrees and certifications"],
    "key_achievements": ["notable achievements"],
    "preferred_roles": ["suggested job roles based on experience"],
    "salary_range": {{
        "min": "estimated minimum salary",
        "max": "estimated maximum salary"
    }},
    "summary": "Brief professional summary"
}}

Focus on technical skills, years of experience, and suggest 3-5 most suitable job positions.
For salary ranges, consider the experience level and industry standards."#
    )
}

fn positions_prompt(
    profile: &CandidateProfile,
    locations: &[String],
    constraints: SuggestionConstraints,
) -> Result<String, ProfilerError> {
    let profile_json = serde_json::to_string_pretty(profile)
        .map_err(|e| ProfilerError::Provider(format!("could not encode profile: {}", e)))?;
    let years = profile
        .experience_years
        .map(|y| y.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let max = constraints.max_results;
    let min_score = constraints.min_score;
    let locations = locations.join(", ");

    Ok(format!(
        r#"Based on the CV analysis data below and preferred locations, suggest exactly {max} most suitable job positions.

CV Data:
{profile_json}

Preferred Locations:
{locations}

Job Preferences:
- Minimum match score: {min_score}%
- Focus on roles matching experience level

Return ONLY a JSON object with exactly {max} positions, best match first:
{{
    "positions": [
        {{
            "title": "Job Title",
            "keywords": ["keyword1", "keyword2", "keyword3"],
            "seniority_level": "entry/mid/senior",
            "match_score": 95,
            "reason": "Why this position matches",
            "expected_salary_range": {{
                "min": "minimum expected salary",
                "max": "maximum expected salary"
            }}
        }}
    ]
}}

Focus on positions that:
1. Match the candidate's skills and experience level
2. Are available in the specified locations
3. Have high demand in current job market
4. Align with career progression
5. Meet the minimum match score of {min_score}%

Consider the candidate's experience years: {years}"#
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedProvider {
        replies: Mutex<Vec<Result<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AIProvider for ScriptedProvider {
        async fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies.lock().unwrap().remove(0)
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    const CV: &str = "Jane Roe, data analyst with five years of Python and SQL experience in retail.";

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[tokio::test]
    async fn test_profile_parses_fenced_json() {
        let provider = ScriptedProvider::new(vec![Ok(
            "```json\n{\"personal_info\": {\"name\": \"Jane Roe\"}, \"skills\": [\"Python\", \"SQL\"]}\n```".into(),
        )]);
        let profile = CandidateProfiler::new(&provider).profile(CV).await.unwrap();
        assert_eq!(profile.display_name(), "Jane Roe");
        assert!(profile.skills.contains("SQL"));
        assert!(provider.prompts.lock().unwrap()[0].contains(CV));
    }

    #[tokio::test]
    async fn test_short_cv_is_rejected_without_calling_the_model() {
        let provider = ScriptedProvider::new(vec![]);
        let err = CandidateProfiler::new(&provider).profile("  too short ").await.unwrap_err();
        assert!(matches!(err, ProfilerError::InsufficientText(9)));
        assert!(provider.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_and_failed_responses() {
        let provider = ScriptedProvider::new(vec![
            Ok("Sure! Here is the profile you asked for.".into()),
            Err(anyhow!("quota exceeded")),
        ]);
        let profiler = CandidateProfiler::new(&provider);
        assert!(matches!(
            profiler.profile(CV).await.unwrap_err(),
            ProfilerError::MalformedModelResponse(_)
        ));
        match profiler.profile(CV).await.unwrap_err() {
            ProfilerError::Provider(msg) => assert!(msg.contains("quota exceeded")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_suggestions_filtered_then_truncated_in_model_order() {
        let reply = r#"{"positions": [
            {"title": "Data Analyst", "match_score": 85},
            {"title": "BI Developer", "match_score": 60},
            {"title": "Data Engineer", "match_score": 78},
            {"title": "Analytics Engineer", "match_score": 92},
            {"title": "ML Engineer", "match_score": 71}
        ]}"#;
        let provider = ScriptedProvider::new(vec![Ok(reply.into())]);
        let constraints = SuggestionConstraints { max_results: 3, min_score: 70.0 };
        let suggestions = CandidateProfiler::new(&provider)
            .suggest_positions(&CandidateProfile::default(), &["Remote".into()], constraints)
            .await
            .unwrap();

        let titles: Vec<&str> = suggestions.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Data Analyst", "Data Engineer", "Analytics Engineer"]);
        assert!(suggestions.iter().all(|s| s.score >= 70.0));

        let prompt = provider.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("suggest exactly 3"));
        assert!(prompt.contains("Remote"));
        assert!(prompt.contains("experience years: unknown"));
    }

    #[test]
    fn test_filter_never_exceeds_limit() {
        let suggestion = |score: f32| PositionSuggestion {
            title: format!("Role {score}"),
            keywords: vec![],
            seniority: Default::default(),
            score,
            justification: String::new(),
            salary_band: Default::default(),
        };
        let all: Vec<_> = (0..10).map(|i| suggestion(90.0 - i as f32)).collect();
        let kept = filter_suggestions(all, SuggestionConstraints { max_results: 2, min_score: 0.0 });
        assert_eq!(kept.len(), 2);
        let none = filter_suggestions(vec![suggestion(50.0)], SuggestionConstraints::default());
        assert!(none.is_empty());
    }
}
