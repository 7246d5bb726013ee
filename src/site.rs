use serde::{Deserialize, Serialize};
use url::Url;

use crate::models::SearchTarget;
use crate::session::{Descriptor, LoginForm, ProbeChain};

/// Query parameters that only carry tracking state.
const TRACKING_PARAMS: &[&str] = &[
    "refid", "trackingid", "trk", "trkinfo", "ebp", "lipi", "lici", "midtoken", "midsig",
    "originalsubdomain", "fbclid", "gclid",
];

/// One fillable application field and whether an unanswered one blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    /// Key into the applicant answers, reported verbatim as missing info.
    pub key: String,
    pub chain: ProbeChain,
    /// Optional rules still block when the page marks the field required.
    #[serde(default)]
    pub required: bool,
}

impl FieldRule {
    fn new(key: &str, required: bool, chain: Vec<Descriptor>) -> Self {
        Self {
            key: key.to_string(),
            chain: ProbeChain::new(chain),
            required,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteProfile {
    pub name: String,
    pub search_url: String,
    pub allowed_domain: String,
    pub login: LoginForm,
    pub result_items: ProbeChain,
    pub listing_link: ProbeChain,
    pub listing_company: ProbeChain,
    pub listing_location: ProbeChain,
    /// Sub-elements of a result item that may carry the apply label.
    pub affordance_markers: ProbeChain,
    pub apply_buttons: ProbeChain,
    pub dialog: ProbeChain,
    /// Controls scanned for submit/progress labels inside the dialog.
    pub actionable: ProbeChain,
    pub primary_actions: ProbeChain,
    /// Closes a dialog left open after an attempt.
    pub dismiss: ProbeChain,
    /// Confirms throwing away a half-filled application.
    pub discard: ProbeChain,
    pub next_page: ProbeChain,
    /// Evidence that an application went through.
    pub confirmation: ProbeChain,
    pub fields: Vec<FieldRule>,
}

impl Default for SiteProfile {
    fn default() -> Self {
        let css = Descriptor::css;
        let attr = Descriptor::attr;

        Self {
            name: "linkedin".to_string(),
            search_url: "https://www.linkedin.com/jobs/search/".to_string(),
            allowed_domain: "linkedin.com".to_string(),
            login: LoginForm {
                url: "https://www.linkedin.com/login".to_string(),
                identifier: ProbeChain::new(vec![css("#username"), css("input[name='session_key']")]),
                secret: ProbeChain::new(vec![css("#password"), css("input[name='session_password']")]),
                submit: ProbeChain::new(vec![
                    css("button[type='submit']"),
                    css(".login__form_action_container button"),
                ]),
                landmark: ProbeChain::new(vec![css(".global-nav"), css("#global-nav")]),
                landmark_timeout_secs: 10,
            },
            result_items: ProbeChain::new(vec![
                css(".jobs-search-results__list-item"),
                css(".scaffold-layout__list-item"),
                css(".job-card-container"),
                Descriptor::tag("li"),
            ]),
            listing_link: ProbeChain::new(vec![
                css(".job-card-container__link"),
                css(".job-card-list__title"),
                css(".artdeco-entity-lockup__title a"),
                css(".job-search-card__title a"),
                Descriptor::tag("a"),
            ]),
            listing_company: ProbeChain::new(vec![
                css(".job-card-container__primary-description"),
                css(".artdeco-entity-lockup__subtitle"),
                css(".job-search-card__subtitle a"),
                css("[data-testid='job-company-name']"),
            ]),
            listing_location: ProbeChain::new(vec![
                css(".job-card-container__metadata-item"),
                css(".artdeco-entity-lockup__caption"),
                css(".job-search-card__location"),
                css("[data-testid='job-location']"),
            ]),
            affordance_markers: ProbeChain::new(vec![
                css(".job-card-container__apply-method"),
                css(".artdeco-button__text"),
                css(".job-search-card__easy-apply-button"),
                attr("aria-label", "easy apply"),
            ]),
            apply_buttons: ProbeChain::new(vec![
                css(".jobs-apply-button"),
                css(".jobs-s-apply button"),
                css("button[data-testid='jobs-apply-button']"),
                css(".jobs-apply-button--top-card button"),
                css(".artdeco-button--primary"),
            ]),
            dialog: ProbeChain::new(vec![
                css(".jobs-easy-apply-modal"),
                css(".artdeco-modal"),
                Descriptor::role("dialog"),
            ]),
            actionable: ProbeChain::new(vec![Descriptor::tag("button"), Descriptor::role("button")]),
            primary_actions: ProbeChain::new(vec![css(".artdeco-button--primary")]),
            dismiss: ProbeChain::new(vec![
                css(".artdeco-modal__dismiss"),
                css("button[aria-label='Dismiss']"),
            ]),
            discard: ProbeChain::new(vec![
                css("button[data-control-name='discard_application_confirm_btn']"),
                css("[data-test-dialog-primary-btn]"),
            ]),
            next_page: ProbeChain::new(vec![
                css("button[aria-label='Next page']"),
                css(".artdeco-pagination__button--next"),
                attr("aria-label", "next page"),
            ]),
            confirmation: ProbeChain::new(vec![
                css("[data-test-modal-id='post-apply-modal']"),
                css(".artdeco-inline-feedback--success"),
                css(".jpac-modal-header"),
            ]),
            fields: vec![
                FieldRule::new(
                    "phone",
                    false,
                    vec![
                        css("input[type='tel']"),
                        attr("name", "phoneNumber"),
                        attr("name", "phone"),
                        attr("id", "phoneNumber"),
                        attr("placeholder", "phone"),
                    ],
                ),
                FieldRule::new(
                    "years_experience",
                    true,
                    vec![attr("name", "experience"), attr("id", "experience")],
                ),
                FieldRule::new(
                    "expected_salary",
                    true,
                    vec![attr("name", "salary"), attr("id", "salary")],
                ),
                FieldRule::new(
                    "cover_letter",
                    true,
                    vec![attr("name", "coverLetter"), attr("id", "cover-letter"), attr("name", "cover")],
                ),
            ],
        }
    }
}

impl SiteProfile {
    /// Results for a target, restricted to quick-apply listings.
    pub fn search_url(&self, target: &SearchTarget) -> Result<String, url::ParseError> {
        Url::parse_with_params(
            &self.search_url,
            &[
                ("keywords", target.position.as_str()),
                ("location", target.location.as_str()),
                ("f_AL", "true"),
            ],
        )
        .map(String::from)
    }

    /// Human-facing search link: title plus the top three keywords, newest first.
    pub fn manual_search_url(
        &self,
        title: &str,
        keywords: &[String],
        location: &str,
    ) -> Result<String, url::ParseError> {
        let terms: Vec<&str> = std::iter::once(title)
            .chain(keywords.iter().take(3).map(String::as_str))
            .filter(|t| !t.trim().is_empty())
            .collect();
        Url::parse_with_params(
            &self.search_url,
            &[
                ("keywords", terms.join(" ").as_str()),
                ("location", location),
                ("f_AL", "true"),
                ("sortBy", "DD"),
            ],
        )
        .map(String::from)
    }

    /// True when `url` is on the allowed domain or one of its subdomains.
    pub fn is_allowed(&self, url: &str) -> bool {
        host_matches(url, &self.allowed_domain)
    }
}

pub fn host_matches(url: &str, domain: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    let domain = domain.trim_start_matches('.').to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{}", domain))
}

/// Resolve `href` against `base`, then drop the fragment and tracking
/// parameters. The result is the record key for a listing.
pub fn canonical_url(href: &str, base: Option<&str>) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("javascript:") {
        return None;
    }
    let mut url = match Url::parse(href) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(base?).ok()?.join(href).ok()?,
        Err(_) => return None,
    };
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    url.set_fragment(None);
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let key = k.to_ascii_lowercase();
            !TRACKING_PARAMS.contains(&key.as_str()) && !key.starts_with("utm_")
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    Some(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_url_is_filtered_to_quick_apply() {
        let site = SiteProfile::default();
        let url = site
            .search_url(&SearchTarget {
                position: "Data Analyst".into(),
                location: "Milan, Italy".into(),
            })
            .unwrap();
        assert_eq!(
            url,
            "https://www.linkedin.com/jobs/search/?keywords=Data+Analyst&location=Milan%2C+Italy&f_AL=true"
        );
    }

    #[test]
    fn test_manual_search_url_uses_top_three_keywords() {
        let site = SiteProfile::default();
        let keywords: Vec<String> = ["SQL", "Python", "Tableau", "Excel"].iter().map(|s| s.to_string()).collect();
        let url = site.manual_search_url("Data Analyst", &keywords, "Remote").unwrap();
        assert!(url.contains("keywords=Data+Analyst+SQL+Python+Tableau&"));
        assert!(!url.contains("Excel"));
        assert!(url.ends_with("&sortBy=DD"));
    }

    #[test]
    fn test_canonical_url_strips_tracking_and_fragment() {
        let canonical = canonical_url(
            "/jobs/view/3812345678/?refId=abc&trackingId=xyz%3D%3D&trk=flagship&eBP=1#apply",
            Some("https://www.linkedin.com/jobs/search/?keywords=x"),
        )
        .unwrap();
        assert_eq!(canonical, "https://www.linkedin.com/jobs/view/3812345678/");

        let kept = canonical_url("https://www.linkedin.com/jobs/search/?currentJobId=42&utm_source=mail", None).unwrap();
        assert_eq!(kept, "https://www.linkedin.com/jobs/search/?currentJobId=42");

        assert_eq!(canonical_url("javascript:void(0)", None), None);
        assert_eq!(canonical_url("/relative/only", None), None);
    }

    #[test]
    fn test_allowed_domain() {
        let site = SiteProfile::default();
        assert!(site.is_allowed("https://www.linkedin.com/feed/"));
        assert!(site.is_allowed("https://linkedin.com/"));
        assert!(!site.is_allowed("https://notlinkedin.com/"));
        assert!(!site.is_allowed("https://linkedin.com.evil.example/"));
        assert!(!site.is_allowed("about:blank"));
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let site: SiteProfile = serde_json::from_str(
            r#"{"dialog": [{"by": "css", "value": ".my-modal"}]}"#,
        )
        .unwrap();
        assert_eq!(site.dialog, ProbeChain::single(Descriptor::css(".my-modal")));
        assert_eq!(site.search_url, SiteProfile::default().search_url);
        assert_eq!(site.fields.len(), 4);
    }
}
