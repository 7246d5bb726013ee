use chrono::{DateTime, Local};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::Path;
use tracing::warn;

use crate::models::{ApplicantAnswers, CandidateProfile, PositionSuggestion};
use crate::site::SiteProfile;

const RULE: &str = "=================================================================";
const REASON_CHARS: usize = 100;
const SUMMARY_SKILLS: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchLink {
    pub position: String,
    pub location: String,
    pub score: f32,
    pub reason: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct ManualReport {
    pub generated_for: String,
    pub generated_at: DateTime<Local>,
    pub experience_years: Option<f32>,
    pub skills: Vec<String>,
    pub education: Vec<String>,
    pub locations: Vec<String>,
    pub links: Vec<SearchLink>,
    pub phone: Option<String>,
    pub years_experience: Option<String>,
    pub expected_salary: Option<String>,
    /// Every suggestion keyword, deduplicated and sorted.
    pub keywords: Vec<String>,
}

impl ManualReport {
    /// Links follow suggestion order, then location order.
    pub fn build(
        profile: &CandidateProfile,
        suggestions: &[PositionSuggestion],
        locations: &[String],
        answers: &ApplicantAnswers,
        site: &SiteProfile,
    ) -> Self {
        let mut links = Vec::new();
        for suggestion in suggestions {
            for location in locations {
                let url = match site.manual_search_url(&suggestion.title, &suggestion.keywords, location) {
                    Ok(url) => url,
                    Err(e) => {
                        warn!("no search link for {} in {}: {}", suggestion.title, location, e);
                        continue;
                    }
                };
                links.push(SearchLink {
                    position: suggestion.title.clone(),
                    location: location.clone(),
                    score: suggestion.score,
                    reason: suggestion.justification.clone(),
                    url,
                });
            }
        }

        let keywords: BTreeSet<String> = suggestions
            .iter()
            .flat_map(|s| s.keywords.iter())
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();

        Self {
            generated_for: profile.display_name().to_string(),
            generated_at: Local::now(),
            experience_years: profile.experience_years,
            skills: profile.skills.iter().cloned().collect(),
            education: profile.education.clone(),
            locations: locations.to_vec(),
            links,
            phone: answers.get("phone").map(str::to_string),
            years_experience: answers.get("years_experience").map(str::to_string),
            expected_salary: answers.get("expected_salary").map(str::to_string),
            keywords: keywords.into_iter().collect(),
        }
    }

    pub fn render(&self) -> String {
        let na = |v: &Option<String>| v.clone().unwrap_or_else(|| "N/A".to_string());
        let mut out = String::new();

        let _ = writeln!(out, "{}", RULE);
        let _ = writeln!(out, "                    JOB SEARCH REPORT");
        let _ = writeln!(out, "{}", RULE);
        let _ = writeln!(out, "Generated for: {}", self.generated_for);
        let _ = writeln!(out, "Date: {}", self.generated_at.format("%Y-%m-%d %H:%M"));
        let _ = writeln!(out);

        let _ = writeln!(out, "PROFILE SUMMARY");
        let _ = writeln!(out, "---------------");
        let experience = self
            .experience_years
            .map(|y| format!("{} years", y))
            .unwrap_or_else(|| "N/A".to_string());
        let top_skills: Vec<&str> = self.skills.iter().take(SUMMARY_SKILLS).map(String::as_str).collect();
        let _ = writeln!(out, "Experience: {}", experience);
        let _ = writeln!(out, "Key Skills: {}", top_skills.join(", "));
        let _ = writeln!(out, "Education: {}", self.education.join(", "));
        let _ = writeln!(out, "Target Salary: {}", self.expected_salary.as_deref().unwrap_or("Not specified"));
        let _ = writeln!(out, "Target Locations: {}", self.locations.join(", "));
        let _ = writeln!(out);

        let _ = writeln!(out, "TOP MATCHED POSITIONS ({})", self.links.len());
        let _ = writeln!(out, "{}", "=".repeat(24));
        for (i, link) in self.links.iter().enumerate() {
            let reason: String = link.reason.chars().take(REASON_CHARS).collect();
            let ellipsis = if link.reason.chars().count() > REASON_CHARS { "..." } else { "" };
            let _ = writeln!(out);
            let _ = writeln!(out, "{}. {} in {}", i + 1, link.position, link.location);
            let _ = writeln!(out, "   Match Score: {:.0}%", link.score);
            let _ = writeln!(out, "   Why it matches: {}{}", reason, ellipsis);
            let _ = writeln!(out, "   Search: {}", link.url);
            let _ = writeln!(
                out,
                "   Application ready: Phone: {}, Experience: {} years",
                na(&self.phone),
                na(&self.years_experience)
            );
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "MANUAL APPLICATION WORKFLOW");
        let _ = writeln!(out, "{}", "=".repeat(27));
        let _ = writeln!(out, "1. Open the search links above");
        let _ = writeln!(out, "2. Pick listings with the \"Easy Apply\" button");
        let _ = writeln!(out, "3. Click \"Easy Apply\"");
        let _ = writeln!(out, "4. Fill any required fields:");
        let _ = writeln!(out, "   - Phone: {}", na(&self.phone));
        let _ = writeln!(out, "   - Years of Experience: {}", na(&self.years_experience));
        let _ = writeln!(out, "   - Expected Salary: {}", na(&self.expected_salary));
        let _ = writeln!(out, "5. Click \"Submit application\"");
        let _ = writeln!(out, "6. Repeat; listings from the last 24-48 hours respond best");
        let _ = writeln!(out);

        let _ = writeln!(out, "KEYWORDS TO USE");
        let _ = writeln!(out, "{}", "=".repeat(15));
        let _ = writeln!(out, "{}", self.keywords.join(", "));
        let _ = writeln!(out);

        let _ = writeln!(out, "SKILLS FOR YOUR PROFILE");
        let _ = writeln!(out, "{}", "=".repeat(23));
        let _ = writeln!(out, "{}", self.skills.join(", "));

        out
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContactInfo;

    fn suggestion(title: &str, score: f32, keywords: &[&str]) -> PositionSuggestion {
        PositionSuggestion {
            title: title.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            seniority: Default::default(),
            score,
            justification: "Strong SQL background".to_string(),
            salary_band: Default::default(),
        }
    }

    fn profile() -> CandidateProfile {
        CandidateProfile {
            contact: ContactInfo {
                name: Some("Jane Roe".into()),
                ..ContactInfo::default()
            },
            skills: ["SQL", "Python"].iter().map(|s| s.to_string()).collect(),
            experience_years: Some(5.0),
            ..CandidateProfile::default()
        }
    }

    #[test]
    fn test_one_link_per_pair_in_order() {
        let suggestions = vec![
            suggestion("Data Analyst", 88.0, &["SQL", "Tableau"]),
            suggestion("BI Developer", 75.0, &["Power BI", "SQL"]),
        ];
        let locations = vec!["Milan".to_string(), "Remote".to_string()];
        let mut answers = ApplicantAnswers::new();
        answers.insert("phone", "+39 333 0000");

        let report = ManualReport::build(&profile(), &suggestions, &locations, &answers, &SiteProfile::default());

        let pairs: Vec<(&str, &str)> = report
            .links
            .iter()
            .map(|l| (l.position.as_str(), l.location.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("Data Analyst", "Milan"),
                ("Data Analyst", "Remote"),
                ("BI Developer", "Milan"),
                ("BI Developer", "Remote"),
            ]
        );
        assert!(report.links[0].url.contains("sortBy=DD"));
        assert_eq!(report.keywords, vec!["Power BI", "SQL", "Tableau"]);
        assert_eq!(report.phone.as_deref(), Some("+39 333 0000"));
    }

    #[test]
    fn test_render_and_write() {
        let suggestions = vec![suggestion("Data Analyst", 88.0, &["SQL"])];
        let report = ManualReport::build(
            &profile(),
            &suggestions,
            &["Remote".to_string()],
            &ApplicantAnswers::new(),
            &SiteProfile::default(),
        );
        let text = report.render();
        assert!(text.contains("JOB SEARCH REPORT"));
        assert!(text.contains("Generated for: Jane Roe"));
        assert!(text.contains("1. Data Analyst in Remote"));
        assert!(text.contains("Match Score: 88%"));
        assert!(text.contains("   - Phone: N/A"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("job_search_report.txt");
        report.write(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), text);
    }
}
