use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::ConfigError;
use crate::models::{lenient_string, value_to_string, ApplicantAnswers, CandidateProfile};
use crate::pacing::PacingConfig;
use crate::profiler::SuggestionConstraints;
use crate::session::{Credentials, SessionOptions};
use crate::site::SiteProfile;
use crate::vocabulary::Vocabulary;
use crate::workflow::{SuccessPolicy, WorkflowConfig};

pub const DEFAULT_CONFIG_PATH: &str = "user_config.json";
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";

/// Answers for application forms. Anything beyond the named fields is kept
/// as an extra answer under its own key.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PersonalInfo {
    #[serde(deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub email: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub phone: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub years_experience: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub expected_salary: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub cover_letter: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct JobPreferences {
    pub max_jobs_per_search: usize,
    pub min_match_score: f32,
    pub model: String,
}

impl Default for JobPreferences {
    fn default() -> Self {
        Self {
            max_jobs_per_search: 3,
            min_match_score: 70.0,
            model: "gemini".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub auto_submit: bool,
    pub max_applications_per_search: usize,
    pub max_pages: usize,
    pub max_modal_steps: usize,
    pub navigation_retries: usize,
    pub success_policy: SuccessPolicy,
    pub headless: bool,
    pub navigation_timeout_secs: u64,
    pub modal_timeout_secs: u64,
    pub details_timeout_secs: u64,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        let workflow = WorkflowConfig::default();
        Self {
            auto_submit: workflow.auto_submit,
            max_applications_per_search: workflow.max_applications_per_target,
            max_pages: workflow.max_pages,
            max_modal_steps: workflow.max_modal_steps,
            navigation_retries: workflow.navigation_retries,
            success_policy: workflow.success_policy,
            headless: false,
            navigation_timeout_secs: workflow.navigation_timeout.as_secs(),
            modal_timeout_secs: workflow.modal_timeout.as_secs(),
            details_timeout_secs: workflow.details_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub personal_info: PersonalInfo,
    pub preferred_locations: Vec<String>,
    pub job_preferences: JobPreferences,
    pub application_settings: ApplicationSettings,
    pub pacing: PacingConfig,
    pub vocabulary: Vocabulary,
    pub site: SiteProfile,
}

impl UserConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: UserConfig = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Every problem at once, so the user can fix the file in one pass.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        let info = &self.personal_info;
        if info.email.is_none() && info.phone.is_none() {
            problems.push("personal_info needs an email or a phone".to_string());
        }
        if self.locations().is_empty() {
            problems.push("preferred_locations must name at least one location".to_string());
        }
        let score = self.job_preferences.min_match_score;
        if !(0.0..=100.0).contains(&score) {
            problems.push(format!("job_preferences.min_match_score must be within 0..=100 (got {})", score));
        }
        if self.job_preferences.max_jobs_per_search == 0 {
            problems.push("job_preferences.max_jobs_per_search must be at least 1".to_string());
        }
        if self.application_settings.max_applications_per_search == 0 {
            problems.push("application_settings.max_applications_per_search must be at least 1".to_string());
        }
        if self.application_settings.max_pages == 0 {
            problems.push("application_settings.max_pages must be at least 1".to_string());
        }
        if self.application_settings.max_modal_steps == 0 {
            problems.push("application_settings.max_modal_steps must be at least 1".to_string());
        }
        problems.extend(self.pacing.validate());

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    /// Trimmed, non-empty locations in file order.
    pub fn locations(&self) -> Vec<String> {
        self.preferred_locations
            .iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect()
    }

    /// Configured answers first. The profile only fills contact details and
    /// experience the config leaves out; salary always comes from the config.
    pub fn answers(&self, profile: &CandidateProfile) -> ApplicantAnswers {
        let info = &self.personal_info;
        let mut answers = ApplicantAnswers::new();

        for (key, value) in [
            ("name", &info.name),
            ("email", &info.email),
            ("phone", &info.phone),
            ("years_experience", &info.years_experience),
            ("expected_salary", &info.expected_salary),
            ("cover_letter", &info.cover_letter),
        ] {
            if let Some(v) = value {
                answers.insert(key, v.as_str());
            }
        }
        for (key, value) in &info.extra {
            if let Some(v) = value_to_string(value.clone()) {
                answers.insert(key, v);
            }
        }

        let years = profile.experience_years.map(|y| format!("{}", y.round() as i64));
        answers.insert_fallback("name", profile.contact.name.as_deref());
        answers.insert_fallback("email", profile.contact.email.as_deref());
        answers.insert_fallback("phone", profile.contact.phone.as_deref());
        answers.insert_fallback("years_experience", years.as_deref());
        answers
    }

    pub fn suggestion_constraints(&self) -> SuggestionConstraints {
        SuggestionConstraints {
            max_results: self.job_preferences.max_jobs_per_search,
            min_score: self.job_preferences.min_match_score,
        }
    }

    pub fn workflow_config(&self) -> WorkflowConfig {
        let s = &self.application_settings;
        WorkflowConfig {
            max_applications_per_target: s.max_applications_per_search,
            max_pages: s.max_pages,
            max_modal_steps: s.max_modal_steps,
            navigation_retries: s.navigation_retries,
            navigation_timeout: Duration::from_secs(s.navigation_timeout_secs),
            modal_timeout: Duration::from_secs(s.modal_timeout_secs),
            details_timeout: Duration::from_secs(s.details_timeout_secs),
            success_policy: s.success_policy,
            auto_submit: s.auto_submit,
            ..WorkflowConfig::default()
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            headless: self.application_settings.headless,
            allowed_domain: Some(self.site.allowed_domain.clone()).filter(|d| !d.is_empty()),
            ..SessionOptions::default()
        }
    }
}

/// Pull `.env` into the process environment. Skipped under test so runs
/// stay hermetic; existing variables always win.
pub fn load_dotenv() {
    if !cfg!(test) {
        dotenvy::dotenv().ok();
    }
}

/// Values that never go in the config file.
#[derive(Debug, Clone)]
pub struct Environment {
    pub credentials: Option<Credentials>,
    pub webdriver_url: String,
}

impl Environment {
    pub fn load() -> Self {
        load_dotenv();
        Self::from_vars(
            std::env::var("LINKEDIN_USERNAME").ok(),
            std::env::var("LINKEDIN_PASSWORD").ok(),
            std::env::var("WEBDRIVER_URL").ok(),
        )
    }

    pub fn from_vars(username: Option<String>, password: Option<String>, webdriver_url: Option<String>) -> Self {
        let present = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        let credentials = match (present(username), present(password)) {
            (Some(identifier), Some(secret)) => Some(Credentials { identifier, secret }),
            _ => None,
        };
        Self {
            credentials,
            webdriver_url: present(webdriver_url).unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string()),
        }
    }
}

/// Written by `init`.
pub const EXAMPLE_CONFIG: &str = r#"{
  "personal_info": {
    "name": "Jane Roe",
    "email": "jane.roe@example.com",
    "phone": "+39 333 123 4567",
    "years_experience": 5,
    "expected_salary": "45000",
    "cover_letter": ""
  },
  "preferred_locations": ["Milan, Italy", "Remote"],
  "job_preferences": {
    "max_jobs_per_search": 3,
    "min_match_score": 70,
    "model": "gemini"
  },
  "application_settings": {
    "auto_submit": true,
    "max_applications_per_search": 10,
    "max_pages": 2,
    "max_modal_steps": 5,
    "navigation_retries": 3,
    "success_policy": "optimistic",
    "headless": false
  },
  "pacing": {
    "enabled": true,
    "candidate": {"min": 3, "max": 5},
    "target": {"min": 3, "max": 5},
    "action": {"min": 1, "max": 3},
    "settle": {"min": 2, "max": 4}
  }
}
"#;
