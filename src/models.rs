use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

// --- Candidate data produced by the profiler ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SalaryBand {
    #[serde(default, deserialize_with = "lenient_string")]
    pub min: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub max: Option<String>,
}

impl fmt::Display for SalaryBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.min, &self.max) {
            (Some(min), Some(max)) => write!(f, "{} - {}", min, max),
            (Some(min), None) => write!(f, "{}+", min),
            (None, Some(max)) => write!(f, "up to {}", max),
            (None, None) => write!(f, "not specified"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactInfo {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub phone: Option<String>,
}

/// Structured view of a CV. Field names follow the JSON the profiler asks
/// the model for, so the same value can be fed back into the position prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateProfile {
    #[serde(default, rename = "personal_info")]
    pub contact: ContactInfo,
    #[serde(default, deserialize_with = "lenient_string_set")]
    pub skills: BTreeSet<String>,
    #[serde(default, deserialize_with = "lenient_years")]
    pub experience_years: Option<f32>,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub job_titles: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub industries: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub education: Vec<String>,
    #[serde(default, rename = "key_achievements", deserialize_with = "lenient_string_list")]
    pub achievements: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub preferred_roles: Vec<String>,
    #[serde(default, rename = "salary_range")]
    pub salary_band: SalaryBand,
    #[serde(default, deserialize_with = "lenient_string")]
    pub summary: Option<String>,
}

impl CandidateProfile {
    pub fn display_name(&self) -> &str {
        self.contact.name.as_deref().unwrap_or("Job Seeker")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Seniority {
    Entry,
    #[default]
    Mid,
    Senior,
}

impl Seniority {
    /// Models answer with anything from "junior" to "Staff / Principal".
    pub fn parse_lenient(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        if ["entry", "junior", "graduate", "intern", "trainee"]
            .iter()
            .any(|w| lower.contains(w))
        {
            Seniority::Entry
        } else if ["senior", "lead", "principal", "staff", "head", "director"]
            .iter()
            .any(|w| lower.contains(w))
        {
            Seniority::Senior
        } else {
            Seniority::Mid
        }
    }
}

impl<'de> Deserialize<'de> for Seniority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::String(s) => Seniority::parse_lenient(&s),
            _ => Seniority::default(),
        })
    }
}

impl fmt::Display for Seniority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Seniority::Entry => "entry",
            Seniority::Mid => "mid",
            Seniority::Senior => "senior",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSuggestion {
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub keywords: Vec<String>,
    #[serde(default, rename = "seniority_level")]
    pub seniority: Seniority,
    #[serde(default, rename = "match_score", deserialize_with = "lenient_score")]
    pub score: f32,
    #[serde(default, rename = "reason")]
    pub justification: String,
    #[serde(default, rename = "expected_salary_range")]
    pub salary_band: SalaryBand,
}

// --- Campaign work units ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTarget {
    pub position: String,
    pub location: String,
}

impl fmt::Display for SearchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' in {}", self.position, self.location)
    }
}

/// Suggestion order first, then location order.
pub fn search_targets(suggestions: &[PositionSuggestion], locations: &[String]) -> Vec<SearchTarget> {
    suggestions
        .iter()
        .flat_map(|s| {
            locations.iter().map(move |loc| SearchTarget {
                position: s.title.clone(),
                location: loc.clone(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobListing {
    pub title: String,
    pub company: String,
    pub location: String,
    pub url: String,
    pub source: String,
}

// --- Persisted records ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Found,
    Applied,
    Failed,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 4] = [
        ApplicationStatus::Applied,
        ApplicationStatus::Pending,
        ApplicationStatus::Found,
        ApplicationStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Found => "found",
            ApplicationStatus::Applied => "applied",
            ApplicationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(ApplicationStatus::Pending),
            "found" => Ok(ApplicationStatus::Found),
            "applied" => Ok(ApplicationStatus::Applied),
            "failed" => Ok(ApplicationStatus::Failed),
            other => Err(format!(
                "unknown status '{}' (expected pending, found, applied or failed)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: i64,
    pub title: String,
    pub company: String,
    pub url: String,
    pub location: Option<String>,
    pub source: Option<String>,
    pub applied: bool,
    pub applied_at: Option<String>,
    pub status: ApplicationStatus,
    pub requirements: Vec<String>,
    pub missing_info: Vec<String>,
    pub created_at: String,
}

// --- Answers used to fill application fields ---

/// Field key -> answer. Blank answers are treated as absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplicantAnswers(BTreeMap<String, String>);

impl ApplicantAnswers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if !value.trim().is_empty() {
            self.0.insert(key.to_string(), value.trim().to_string());
        }
    }

    /// Only fills keys that are still missing.
    pub fn insert_fallback(&mut self, key: &str, value: Option<&str>) {
        if self.get(key).is_none() {
            if let Some(v) = value {
                self.insert(key, v);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// --- Counters ---

/// Counters for a single search target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetTally {
    pub total_found: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub blocked: usize,
    pub failed: usize,
    pub held: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CampaignResult {
    pub total_found: usize,
    pub applications_attempted: usize,
    pub applications_succeeded: usize,
    pub applications_blocked: usize,
}

impl CampaignResult {
    pub fn absorb(&mut self, tally: &TargetTally) {
        self.total_found += tally.total_found;
        self.applications_attempted += tally.attempted;
        self.applications_succeeded += tally.succeeded;
        self.applications_blocked += tally.blocked;
    }
}

// --- Lenient deserializers for model output ---

pub(crate) fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() { None } else { Some(s.to_string()) }
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(value_to_string(Value::deserialize(d)?))
}

fn lenient_string_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => items.into_iter().filter_map(value_to_string).collect(),
        Value::String(s) => s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        _ => Vec::new(),
    })
}

fn lenient_string_set<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeSet<String>, D::Error> {
    Ok(lenient_string_list(d)?.into_iter().collect())
}

/// Leading number of a string such as "5+", "7.5 years", "10".
fn leading_number(s: &str) -> Option<f32> {
    let digits: String = s
        .trim()
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.trim_end_matches('.').parse::<f32>().ok()
}

fn lenient_years<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f32>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_f64().map(|v| v as f32),
        Value::String(s) => leading_number(&s),
        _ => None,
    }
    .filter(|v| v.is_finite() && *v >= 0.0))
}

fn lenient_score<'de, D: Deserializer<'de>>(d: D) -> Result<f32, D::Error> {
    let raw = match Value::deserialize(d)? {
        Value::Number(n) => n.as_f64().map(|v| v as f32),
        Value::String(s) => leading_number(&s),
        _ => None,
    };
    Ok(raw.filter(|v| v.is_finite()).unwrap_or(0.0).clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_tolerates_loose_model_output() {
        let json = r#"{
            "personal_info": {"name": "Jane Roe", "email": "jane@example.com", "phone": null},
            "skills": ["Python", "SQL", "Python"],
            "experience_years": "5+",
            "job_titles": "Analyst, Data Engineer",
            "salary_range": {"min": 50000, "max": "70000"}
        }"#;
        let profile: CandidateProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.display_name(), "Jane Roe");
        assert_eq!(profile.contact.phone, None);
        assert_eq!(profile.skills.len(), 2);
        assert_eq!(profile.experience_years, Some(5.0));
        assert_eq!(profile.job_titles, vec!["Analyst", "Data Engineer"]);
        assert_eq!(profile.salary_band.min.as_deref(), Some("50000"));
        assert_eq!(profile.salary_band.to_string(), "50000 - 70000");
    }

    #[test]
    fn test_unknown_years_is_absent() {
        let profile: CandidateProfile =
            serde_json::from_str(r#"{"experience_years": "unknown"}"#).unwrap();
        assert_eq!(profile.experience_years, None);
    }

    #[test]
    fn test_suggestion_score_and_seniority_parsing() {
        let json = r#"{"title": "Data Analyst", "keywords": ["SQL"], "seniority_level": "Junior",
                       "match_score": "85%", "reason": "fits"}"#;
        let s: PositionSuggestion = serde_json::from_str(json).unwrap();
        assert_eq!(s.score, 85.0);
        assert_eq!(s.seniority, Seniority::Entry);

        let s: PositionSuggestion =
            serde_json::from_str(r#"{"title": "X", "match_score": 140, "seniority_level": "Staff"}"#)
                .unwrap();
        assert_eq!(s.score, 100.0);
        assert_eq!(s.seniority, Seniority::Senior);
    }

    #[test]
    fn test_search_targets_cross_product_order() {
        let suggestion = |title: &str| PositionSuggestion {
            title: title.to_string(),
            keywords: vec![],
            seniority: Seniority::Mid,
            score: 80.0,
            justification: String::new(),
            salary_band: SalaryBand::default(),
        };
        let targets = search_targets(
            &[suggestion("A"), suggestion("B")],
            &["Remote".to_string(), "Milan".to_string()],
        );
        let pairs: Vec<(&str, &str)> = targets
            .iter()
            .map(|t| (t.position.as_str(), t.location.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![("A", "Remote"), ("A", "Milan"), ("B", "Remote"), ("B", "Milan")]
        );
    }

    #[test]
    fn test_status_round_trip_from_str() {
        for status in ApplicationStatus::ALL {
            assert_eq!(status.as_str().parse::<ApplicationStatus>().unwrap(), status);
        }
        assert!("rejected".parse::<ApplicationStatus>().is_err());
    }

    #[test]
    fn test_answers_ignore_blank_values() {
        let mut answers = ApplicantAnswers::new();
        answers.insert("phone", "   ");
        assert_eq!(answers.get("phone"), None);
        answers.insert_fallback("phone", Some("+1 555"));
        answers.insert_fallback("phone", Some("+44 000"));
        assert_eq!(answers.get("phone"), Some("+1 555"));
    }

    #[test]
    fn test_campaign_result_accumulates() {
        let mut result = CampaignResult::default();
        let tally = TargetTally { total_found: 12, attempted: 3, succeeded: 2, blocked: 1, ..Default::default() };
        result.absorb(&tally);
        result.absorb(&tally);
        assert_eq!(result.total_found, 24);
        assert_eq!(result.applications_attempted, 6);
        assert_eq!(result.applications_succeeded, 4);
        assert_eq!(result.applications_blocked, 2);
    }
}
