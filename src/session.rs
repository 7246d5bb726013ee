use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::SessionError;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One way of locating elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum Descriptor {
    Css(String),
    XPath(String),
    Tag(String),
    Role(String),
    /// Attribute whose value contains a substring, case-insensitively.
    AttrContains { name: String, contains: String },
}

impl Descriptor {
    pub fn css(s: &str) -> Self {
        Descriptor::Css(s.to_string())
    }

    pub fn tag(s: &str) -> Self {
        Descriptor::Tag(s.to_string())
    }

    pub fn role(s: &str) -> Self {
        Descriptor::Role(s.to_string())
    }

    pub fn attr(name: &str, contains: &str) -> Self {
        Descriptor::AttrContains {
            name: name.to_string(),
            contains: contains.to_string(),
        }
    }

    /// CSS rendering for backends that only speak selectors. `None` for XPath.
    pub fn to_css(&self) -> Option<String> {
        match self {
            Descriptor::Css(css) => Some(css.clone()),
            Descriptor::Tag(tag) => Some(tag.clone()),
            Descriptor::Role(role) => Some(format!("[role='{}']", role)),
            Descriptor::AttrContains { name, contains } => {
                Some(format!("[{}*='{}' i]", name, contains.replace('\'', "\\'")))
            }
            Descriptor::XPath(_) => None,
        }
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Descriptor::XPath(xpath) => write!(f, "xpath:{}", xpath),
            other => write!(f, "{}", other.to_css().unwrap_or_default()),
        }
    }
}

/// Ordered alternatives. The first descriptor that yields any visible,
/// enabled element wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProbeChain(pub Vec<Descriptor>);

impl ProbeChain {
    pub fn new(descriptors: Vec<Descriptor>) -> Self {
        ProbeChain(descriptors)
    }

    pub fn single(descriptor: Descriptor) -> Self {
        ProbeChain(vec![descriptor])
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Each descriptor as its own single-element chain, in priority order.
    pub fn alternatives(&self) -> impl Iterator<Item = ProbeChain> + '_ {
        self.0.iter().cloned().map(ProbeChain::single)
    }
}

/// Where a probe runs.
#[derive(Debug)]
pub enum Scope<'a, E> {
    Document,
    Within(&'a E),
}

impl<E> Clone for Scope<'_, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for Scope<'_, E> {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Click,
    /// Clear, then type.
    Type(String),
    /// Choose the option whose visible text best matches.
    Select(String),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Click => "click",
            Action::Type(_) => "type",
            Action::Select(_) => "select",
        }
    }
}

/// What the workflow needs to know about an element at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementSnapshot {
    pub tag: String,
    pub text: String,
    pub value: Option<String>,
}

impl ElementSnapshot {
    pub fn is_select(&self) -> bool {
        self.tag.eq_ignore_ascii_case("select")
    }

    pub fn has_value(&self) -> bool {
        self.value.as_deref().is_some_and(|v| !v.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    pub viewport: (u32, u32),
    #[serde(with = "secs")]
    pub request_timeout: Duration,
    pub headless: bool,
    pub user_agent: Option<String>,
    /// Hide the usual automation markers from the page.
    pub mask_automation: bool,
    /// Navigations must end on this domain (or a subdomain of it).
    pub allowed_domain: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            viewport: (1920, 1080),
            request_timeout: Duration::from_secs(15),
            headless: false,
            user_agent: Some(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                    .to_string(),
            ),
            mask_automation: true,
            allowed_domain: None,
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub identifier: String,
    pub secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// The login ritual of a site: where to go, what to fill, what proves success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginForm {
    pub url: String,
    pub identifier: ProbeChain,
    pub secret: ProbeChain,
    pub submit: ProbeChain,
    pub landmark: ProbeChain,
    pub landmark_timeout_secs: u64,
}

/// A live automation surface. One per run, owned by the campaign.
#[async_trait]
pub trait InteractiveSession: Send + Sync {
    type Element: Clone + Send + Sync;

    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), SessionError>;

    async fn current_url(&self) -> Option<String>;

    /// Never fails: nothing found is an empty vector.
    async fn find_all(
        &self,
        scope: Scope<'_, Self::Element>,
        chain: &ProbeChain,
    ) -> Vec<Self::Element>;

    async fn snapshot(&self, element: &Self::Element) -> ElementSnapshot;

    async fn attribute(&self, element: &Self::Element, name: &str) -> Option<String>;

    async fn act(&mut self, element: &Self::Element, action: &Action) -> Result<(), SessionError>;

    /// Idempotent.
    async fn close(&mut self) -> Result<(), SessionError>;

    async fn find_first(
        &self,
        scope: Scope<'_, Self::Element>,
        chain: &ProbeChain,
    ) -> Option<Self::Element> {
        self.find_all(scope, chain).await.into_iter().next()
    }

    /// Poll until the chain resolves or the timeout passes. A zero timeout
    /// checks exactly once.
    async fn wait_for(&self, chain: &ProbeChain, timeout: Duration) -> Option<Self::Element> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(found) = self.find_first(Scope::Document, chain).await {
                return Some(found);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return None;
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Identifier, secret, submit, then wait for the post-login landmark.
    /// Every failure is reported as `Authentication`: a wrong password and a
    /// changed page look the same from here.
    async fn authenticate(
        &mut self,
        credentials: &Credentials,
        form: &LoginForm,
    ) -> Result<(), SessionError> {
        let timeout = Duration::from_secs(form.landmark_timeout_secs);

        self.navigate(&form.url, timeout)
            .await
            .map_err(|e| SessionError::Authentication(e.to_string()))?;

        let identifier = self
            .wait_for(&form.identifier, timeout)
            .await
            .ok_or_else(|| SessionError::Authentication("identifier field not found".into()))?;
        self.act(&identifier, &Action::Type(credentials.identifier.clone()))
            .await
            .map_err(|e| SessionError::Authentication(e.to_string()))?;

        let secret = self
            .find_first(Scope::Document, &form.secret)
            .await
            .ok_or_else(|| SessionError::Authentication("secret field not found".into()))?;
        self.act(&secret, &Action::Type(credentials.secret.clone()))
            .await
            .map_err(|e| SessionError::Authentication(e.to_string()))?;

        let submit = self
            .find_first(Scope::Document, &form.submit)
            .await
            .ok_or_else(|| SessionError::Authentication("submit control not found".into()))?;
        self.act(&submit, &Action::Click)
            .await
            .map_err(|e| SessionError::Authentication(e.to_string()))?;

        debug!("login submitted, waiting for landmark");
        if self.wait_for(&form.landmark, timeout).await.is_none() {
            return Err(SessionError::Authentication(format!(
                "post-login landmark did not appear within {:?}",
                timeout
            )));
        }

        info!("authenticated as {}", credentials.identifier);
        Ok(())
    }
}

/// Acquires sessions. Failing here is recoverable: the campaign falls back to
/// the manual report.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    type Session: InteractiveSession;

    async fn open(&self, options: &SessionOptions) -> Result<Self::Session, SessionError>;
}

/// Index of the option that best answers `wanted`: an option containing the
/// answer wins, otherwise the closest by normalized edit distance.
pub fn best_option_match(options: &[String], wanted: &str) -> Option<usize> {
    let wanted = wanted.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }

    let candidates: Vec<(usize, String)> = options
        .iter()
        .enumerate()
        .map(|(i, o)| (i, o.trim().to_lowercase()))
        .filter(|(_, o)| !o.is_empty())
        .collect();

    if let Some((i, _)) = candidates.iter().find(|(_, o)| *o == wanted) {
        return Some(*i);
    }

    if let Some((i, _)) = candidates.iter().find(|(_, o)| {
        o.split(|c: char| !c.is_alphanumeric())
            .any(|word| word == wanted)
    }) {
        return Some(*i);
    }

    candidates
        .iter()
        .map(|(i, o)| (*i, strsim::normalized_levenshtein(o, &wanted)))
        .filter(|(_, score)| *score >= 0.5)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
}
