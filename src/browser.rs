use async_trait::async_trait;
use serde_json::json;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thirtyfour::prelude::*;
use thirtyfour::ChromiumLikeCapabilities;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::SessionError;
use crate::session::{
    best_option_match, Action, Descriptor, ElementSnapshot, InteractiveSession, ProbeChain, Scope,
    SessionLauncher, SessionOptions,
};
use crate::site::host_matches;

const HIDE_WEBDRIVER: &str =
    "Object.defineProperty(navigator, 'webdriver', { get: () => undefined });";
const SCRIPT_CLICK: &str = "arguments[0].click();";
const SCRIPT_TYPE: &str = "arguments[0].value = arguments[1]; \
    arguments[0].dispatchEvent(new Event('input', { bubbles: true })); \
    arguments[0].dispatchEvent(new Event('change', { bubbles: true }));";
const SCRIPT_SELECT: &str = "arguments[0].selectedIndex = arguments[1]; \
    arguments[0].dispatchEvent(new Event('change', { bubbles: true }));";

/// Opens Chrome sessions through a running chromedriver.
pub struct WebDriverLauncher {
    server_url: String,
}

impl WebDriverLauncher {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
        }
    }
}

/// Chrome switches for a set of session options.
fn chrome_args(options: &SessionOptions) -> Vec<String> {
    let (width, height) = options.viewport;
    let mut args = vec![
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-extensions".to_string(),
        format!("--window-size={},{}", width, height),
    ];
    if options.mask_automation {
        args.push("--disable-blink-features=AutomationControlled".to_string());
    }
    if let Some(agent) = &options.user_agent {
        args.push(format!("--user-agent={}", agent));
    }
    args
}

#[async_trait]
impl SessionLauncher for WebDriverLauncher {
    type Session = WebDriverSession;

    async fn open(&self, options: &SessionOptions) -> Result<WebDriverSession, SessionError> {
        let start = |e: WebDriverError| SessionError::SessionStart(e.to_string());

        let mut caps = DesiredCapabilities::chrome();
        for arg in chrome_args(options) {
            caps.add_arg(&arg).map_err(start)?;
        }
        if options.headless {
            caps.set_headless().map_err(start)?;
        }

        let driver = WebDriver::new(self.server_url.as_str(), caps)
            .await
            .map_err(|e| {
                SessionError::SessionStart(format!("no WebDriver at {}: {}", self.server_url, e))
            })?;
        driver
            .set_page_load_timeout(options.request_timeout)
            .await
            .map_err(start)?;
        driver.set_implicit_wait_timeout(Duration::ZERO).await.map_err(start)?;

        info!(
            "browser session started ({})",
            if options.headless { "headless" } else { "windowed" }
        );
        Ok(WebDriverSession {
            driver: Some(driver),
            allowed_domain: options.allowed_domain.clone(),
            mask_automation: options.mask_automation,
        })
    }
}

pub struct WebDriverSession {
    /// `None` once closed.
    driver: Option<WebDriver>,
    allowed_domain: Option<String>,
    mask_automation: bool,
}

fn is_stale_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("stale") || message.contains("no such element")
}

fn action_error(action: &Action, e: WebDriverError) -> SessionError {
    let message = e.to_string();
    if is_stale_message(&message) {
        SessionError::Detached
    } else {
        SessionError::action(action.name(), message)
    }
}

/// Native attempt first; if it failed for any reason other than a stale
/// element, one scripted attempt. Both messages end up in the error.
async fn with_script_fallback<E, F, Fut>(
    action: &'static str,
    native: Result<(), E>,
    scripted: F,
) -> Result<(), SessionError>
where
    E: fmt::Display,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    let first = match native {
        Ok(()) => return Ok(()),
        Err(e) => e.to_string(),
    };
    if is_stale_message(&first) {
        return Err(SessionError::Detached);
    }
    debug!("native {} failed ({}), retrying through script", action, first);
    scripted().await.map_err(|e| {
        let second = e.to_string();
        if is_stale_message(&second) {
            SessionError::Detached
        } else {
            SessionError::action(action, format!("{}; scripted retry: {}", first, second))
        }
    })
}

/// A landing URL is acceptable on the allowed domain or, when no domain is
/// configured, on the host that was asked for.
fn landing_allowed(landed: &str, requested: &str, allowed_domain: Option<&str>) -> bool {
    if let Some(domain) = allowed_domain {
        return host_matches(landed, domain);
    }
    let requested_host = Url::parse(requested)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()));
    match requested_host {
        Some(host) => host_matches(landed, &host),
        None => landed == requested,
    }
}

fn by(descriptor: &Descriptor) -> By {
    match descriptor {
        Descriptor::XPath(xpath) => By::XPath(xpath.as_str()),
        Descriptor::Tag(tag) => By::Tag(tag.as_str()),
        other => By::Css(other.to_css().unwrap_or_default().as_str()),
    }
}

impl WebDriverSession {
    fn driver(&self) -> Result<&WebDriver, SessionError> {
        self.driver.as_ref().ok_or(SessionError::Closed)
    }

    fn check_domain(&self, url: &str) -> Result<(), SessionError> {
        match &self.allowed_domain {
            Some(domain) if !host_matches(url, domain) => Err(SessionError::navigation(
                url,
                format!("outside the allowed domain {}", domain),
            )),
            _ => Ok(()),
        }
    }

    async fn usable(el: &WebElement) -> bool {
        el.is_displayed().await.unwrap_or(false) && el.is_enabled().await.unwrap_or(false)
    }

    async fn click(&self, driver: &WebDriver, el: &WebElement) -> Result<(), SessionError> {
        // Overlays intercept native clicks; a script click goes through.
        let native = el.click().await;
        with_script_fallback("click", native, move || async move {
            let arg = el.to_json()?;
            driver.execute(SCRIPT_CLICK, vec![arg]).await.map(|_| ())
        })
        .await
    }

    async fn type_text(&self, driver: &WebDriver, el: &WebElement, text: &str) -> Result<(), SessionError> {
        let native = match el.clear().await {
            Ok(()) => el.send_keys(text).await,
            Err(e) => Err(e),
        };
        with_script_fallback("type", native, move || async move {
            let arg = el.to_json()?;
            driver
                .execute(SCRIPT_TYPE, vec![arg, json!(text)])
                .await
                .map(|_| ())
        })
        .await
    }

    async fn select(
        &self,
        driver: &WebDriver,
        el: &WebElement,
        wanted: &str,
        action: &Action,
    ) -> Result<(), SessionError> {
        let options = el
            .find_all(By::Tag("option"))
            .await
            .map_err(|e| action_error(action, e))?;
        let mut labels = Vec::with_capacity(options.len());
        for option in &options {
            labels.push(option.text().await.unwrap_or_default());
        }
        let index = best_option_match(&labels, wanted)
            .ok_or_else(|| SessionError::action("select", format!("no option matches '{}'", wanted)))?;
        debug!("selecting '{}' for '{}'", labels[index], wanted);

        let native = options[index].click().await;
        with_script_fallback("select", native, move || async move {
            let arg = el.to_json()?;
            driver
                .execute(SCRIPT_SELECT, vec![arg, json!(index)])
                .await
                .map(|_| ())
        })
        .await
    }
}

#[async_trait]
impl InteractiveSession for WebDriverSession {
    type Element = WebElement;

    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), SessionError> {
        self.check_domain(url)?;
        let driver = self.driver()?;

        match tokio::time::timeout(timeout, driver.goto(url)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(SessionError::navigation(url, e.to_string())),
            Err(_) => return Err(SessionError::navigation_timeout(url, timeout)),
        }

        if self.mask_automation {
            if let Err(e) = driver.execute(HIDE_WEBDRIVER, Vec::new()).await {
                debug!("could not mask navigator.webdriver: {}", e);
            }
        }

        // Redirects can land somewhere else entirely.
        if let Some(landed) = self.current_url().await {
            if !landing_allowed(&landed, url, self.allowed_domain.as_deref()) {
                return Err(SessionError::navigation(url, format!("redirected to {}", landed)));
            }
        }
        Ok(())
    }

    async fn current_url(&self) -> Option<String> {
        let driver = self.driver.as_ref()?;
        driver.current_url().await.ok().map(|u| u.to_string())
    }

    async fn find_all(&self, scope: Scope<'_, WebElement>, chain: &ProbeChain) -> Vec<WebElement> {
        let Some(driver) = self.driver.as_ref() else {
            return Vec::new();
        };

        for descriptor in chain.descriptors() {
            let found = match scope {
                Scope::Document => driver.find_all(by(descriptor)).await,
                Scope::Within(root) => root.find_all(by(descriptor)).await,
            };
            let elements = match found {
                Ok(elements) => elements,
                Err(e) => {
                    debug!("probe {} failed: {}", descriptor, e);
                    continue;
                }
            };

            let mut usable = Vec::new();
            for el in elements {
                if Self::usable(&el).await {
                    usable.push(el);
                }
            }
            if !usable.is_empty() {
                return usable;
            }
        }
        Vec::new()
    }

    async fn snapshot(&self, element: &WebElement) -> ElementSnapshot {
        ElementSnapshot {
            tag: element.tag_name().await.unwrap_or_default(),
            text: element.text().await.unwrap_or_default(),
            value: element.value().await.ok().flatten(),
        }
    }

    async fn attribute(&self, element: &WebElement, name: &str) -> Option<String> {
        element.attr(name).await.ok().flatten()
    }

    async fn act(&mut self, element: &WebElement, action: &Action) -> Result<(), SessionError> {
        let driver = self.driver()?;
        match action {
            Action::Click => self.click(driver, element).await,
            Action::Type(text) => self.type_text(driver, element, text).await,
            Action::Select(wanted) => self.select(driver, element, wanted, action).await,
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        let Some(driver) = self.driver.take() else {
            return Ok(());
        };
        match driver.quit().await {
            Ok(()) => {
                info!("browser session closed");
                Ok(())
            }
            Err(e) => {
                warn!("browser did not shut down cleanly: {}", e);
                Err(SessionError::action("close", e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::SiteProfile;

    #[test]
    fn test_chrome_args_follow_options() {
        let options = SessionOptions {
            viewport: (1280, 800),
            user_agent: None,
            mask_automation: false,
            ..SessionOptions::default()
        };
        let args = chrome_args(&options);
        assert!(args.contains(&"--window-size=1280,800".to_string()));
        assert!(!args.iter().any(|a| a.contains("AutomationControlled")));
        assert!(!args.iter().any(|a| a.starts_with("--user-agent")));

        let masked = chrome_args(&SessionOptions::default());
        assert!(masked.contains(&"--disable-blink-features=AutomationControlled".to_string()));
        assert!(masked.iter().any(|a| a.starts_with("--user-agent=Mozilla")));
    }

    #[tokio::test]
    async fn test_script_fallback_runs_once_after_a_native_failure() {
        let calls = std::cell::Cell::new(0);
        let calls = &calls;

        let ok = with_script_fallback("click", Ok::<(), String>(()), move || async move {
            calls.set(calls.get() + 1);
            Ok(())
        })
        .await;
        assert!(ok.is_ok());
        assert_eq!(calls.get(), 0);

        let intercepted = Err("element click intercepted: other element would receive the click".to_string());
        let retried = with_script_fallback("type", intercepted, move || async move {
            calls.set(calls.get() + 1);
            Ok(())
        })
        .await;
        assert!(retried.is_ok());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_script_fallback_reports_both_failures() {
        let err = with_script_fallback("select", Err("not interactable".to_string()), || async {
            Err::<(), _>("javascript error".to_string())
        })
        .await
        .unwrap_err();
        match err {
            SessionError::Action { action, reason } => {
                assert_eq!(action, "select");
                assert!(reason.contains("not interactable"));
                assert!(reason.contains("javascript error"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stale_element_is_not_retried() {
        let calls = std::cell::Cell::new(0);
        let calls = &calls;
        let err = with_script_fallback(
            "click",
            Err("stale element reference: element is not attached".to_string()),
            move || async move {
                calls.set(calls.get() + 1);
                Ok(())
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SessionError::Detached));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_landing_checks_the_allowed_domain() {
        let search = "https://www.linkedin.com/jobs/search/";
        assert!(landing_allowed("https://www.linkedin.com/jobs/view/1/", search, Some("linkedin.com")));
        assert!(!landing_allowed("https://evil.example/", search, Some("linkedin.com")));
    }

    #[test]
    fn test_landing_without_allowed_domain_stays_on_requested_host() {
        let search = "https://www.linkedin.com/jobs/search/";
        assert!(landing_allowed("https://www.linkedin.com/feed/", search, None));
        assert!(landing_allowed("https://linkedin.com/checkpoint/", search, None));
        assert!(!landing_allowed("https://evil.example/", search, None));
        assert!(!landing_allowed("https://linkedin.com.evil.example/", search, None));
        assert!(landing_allowed("about:blank", "about:blank", None));
    }

    #[tokio::test]
    #[ignore] // needs chromedriver on WEBDRIVER_URL
    async fn test_live_session_opens_and_closes() {
        let url = std::env::var("WEBDRIVER_URL").unwrap_or_else(|_| "http://localhost:9515".into());
        let launcher = WebDriverLauncher::new(url);
        let options = SessionOptions {
            headless: true,
            allowed_domain: Some("linkedin.com".into()),
            ..SessionOptions::default()
        };
        let mut session = launcher.open(&options).await.unwrap();

        let err = session
            .navigate("https://example.com/", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Navigation { .. }));

        let site = SiteProfile::default();
        session.navigate(&site.search_url, Duration::from_secs(30)).await.unwrap();
        session.close().await.unwrap();
        session.close().await.unwrap();
        assert!(matches!(
            session.navigate(&site.search_url, Duration::from_secs(1)).await,
            Err(SessionError::Closed)
        ));
    }
}
