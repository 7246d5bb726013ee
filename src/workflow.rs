//! The quick-apply state machine for one search target.

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::{Database, InsertOutcome};
use crate::error::SessionError;
use crate::models::{ApplicantAnswers, ApplicationStatus, JobListing, SearchTarget, TargetTally};
use crate::pacing::{Pacer, Pause};
use crate::session::{Action, ElementSnapshot, InteractiveSession, ProbeChain, Scope};
use crate::site::{canonical_url, SiteProfile};
use crate::vocabulary::{ActionKind, Vocabulary};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const MAX_TITLE_CHARS: usize = 100;

/// What to report when the step cap runs out without a submit control.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessPolicy {
    /// Assume the last click sent the application.
    #[default]
    Optimistic,
    /// Only succeed if the confirmation landmark is on screen.
    RequireConfirmation,
}

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Successful applications per target before moving on.
    pub max_applications_per_target: usize,
    pub max_pages: usize,
    pub max_modal_steps: usize,
    pub navigation_retries: usize,
    /// Multiplied by the attempt number between navigation retries.
    pub navigation_backoff: Duration,
    pub navigation_timeout: Duration,
    /// How long the listing details may take to show an apply button.
    pub details_timeout: Duration,
    pub modal_timeout: Duration,
    pub success_policy: SuccessPolicy,
    /// When off, stop in front of the submit control and leave the record found.
    pub auto_submit: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_applications_per_target: 10,
            max_pages: 2,
            max_modal_steps: 5,
            navigation_retries: 3,
            navigation_backoff: Duration::from_secs(2),
            navigation_timeout: Duration::from_secs(30),
            details_timeout: Duration::from_secs(8),
            modal_timeout: Duration::from_secs(10),
            success_policy: SuccessPolicy::Optimistic,
            auto_submit: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Success,
    /// Ready to send, but auto-submit is off.
    Held,
    /// Required fields without an answer, keyed by field rule.
    Blocked(Vec<String>),
    Failed(String),
}

impl ApplyOutcome {
    fn label(&self) -> &'static str {
        match self {
            ApplyOutcome::Success => "success",
            ApplyOutcome::Held => "held",
            ApplyOutcome::Blocked(_) => "blocked",
            ApplyOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyState {
    SearchingResults { page: usize },
    InspectingListing { index: usize },
    AwaitingApplyAffordance,
    ApplyModalOpen,
    StepSubmitOrAdvance { step: usize },
    Terminal(&'static str),
}

/// What one modal step decided.
enum StepMove {
    Advanced,
    Finished(ApplyOutcome),
    Stuck,
}

pub struct ApplyWorkflow<'a> {
    pub site: &'a SiteProfile,
    pub vocabulary: &'a Vocabulary,
    pub answers: &'a ApplicantAnswers,
    pub config: &'a WorkflowConfig,
    pub pacer: &'a Pacer,
    pub store: &'a Database,
    pub cancel: &'a CancellationToken,
}

impl ApplyWorkflow<'_> {
    /// Search one (position, location) pair and apply to what qualifies.
    pub async fn run_target<S: InteractiveSession>(
        &self,
        session: &mut S,
        target: &SearchTarget,
    ) -> Result<TargetTally, SessionError> {
        let url = self
            .site
            .search_url(target)
            .map_err(|e| SessionError::navigation(&self.site.search_url, e.to_string()))?;
        self.navigate_with_retry(session, &url).await?;

        let mut tally = TargetTally::default();
        let mut page = 1;

        loop {
            self.enter(ApplyState::SearchingResults { page });
            let candidates = session.find_all(Scope::Document, &self.site.result_items).await;
            info!("page {}: {} candidate elements for {}", page, candidates.len(), target);
            if candidates.is_empty() {
                break;
            }

            for (index, candidate) in candidates.iter().enumerate() {
                if self.cap_reached(&tally) || self.cancel.is_cancelled() {
                    break;
                }
                tally.total_found += 1;
                self.enter(ApplyState::InspectingListing { index });

                let outcome = match self.process_candidate(session, candidate, target).await {
                    Ok(Some(outcome)) => outcome,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("candidate {} skipped: {:#}", index + 1, e);
                        continue;
                    }
                };

                tally.attempted += 1;
                match outcome {
                    ApplyOutcome::Success => tally.succeeded += 1,
                    ApplyOutcome::Held => tally.held += 1,
                    ApplyOutcome::Blocked(_) => tally.blocked += 1,
                    ApplyOutcome::Failed(_) => tally.failed += 1,
                }
                self.pacer.pause(Pause::Candidate, self.cancel).await;
            }

            if self.cap_reached(&tally) || self.cancel.is_cancelled() || page >= self.config.max_pages {
                break;
            }
            if !self.next_page(session).await {
                break;
            }
            page += 1;
        }

        info!(
            "{}: found {}, attempted {}, applied {}, blocked {}, failed {}, held {}",
            target, tally.total_found, tally.attempted, tally.succeeded, tally.blocked, tally.failed, tally.held
        );
        Ok(tally)
    }

    fn cap_reached(&self, tally: &TargetTally) -> bool {
        tally.succeeded >= self.config.max_applications_per_target
    }

    fn enter(&self, state: ApplyState) {
        debug!(?state, "workflow state");
    }

    async fn navigate_with_retry<S: InteractiveSession>(
        &self,
        session: &mut S,
        url: &str,
    ) -> Result<(), SessionError> {
        let attempts = self.config.navigation_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match session.navigate(url, self.config.navigation_timeout).await {
                Ok(()) => {
                    self.pacer.pause(Pause::Settle, self.cancel).await;
                    return Ok(());
                }
                Err(e) => {
                    warn!("navigation attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = Some(e);
                    if attempt < attempts && !self.cancel.is_cancelled() {
                        let backoff = self.config.navigation_backoff * attempt as u32;
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = self.cancel.cancelled() => {}
                        }
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SessionError::navigation(url, "no attempt made")))
    }

    async fn next_page<S: InteractiveSession>(&self, session: &mut S) -> bool {
        let Some(next) = session.find_first(Scope::Document, &self.site.next_page).await else {
            debug!("no next page control");
            return false;
        };
        if let Err(e) = session.act(&next, &Action::Click).await {
            warn!("could not open the next results page: {}", e);
            return false;
        }
        self.pacer.pause(Pause::Settle, self.cancel).await;
        true
    }

    /// `Ok(None)` means the candidate was not eligible and nothing was attempted.
    async fn process_candidate<S: InteractiveSession>(
        &self,
        session: &mut S,
        candidate: &S::Element,
        target: &SearchTarget,
    ) -> anyhow::Result<Option<ApplyOutcome>> {
        if !self.has_affordance(session, candidate).await {
            return Ok(None);
        }

        let link = session
            .find_first(Scope::Within(candidate), &self.site.listing_link)
            .await;
        let base = session.current_url().await;
        let href = match &link {
            Some(link) => session.attribute(link, "href").await,
            None => None,
        };
        let mut listing_url = href
            .and_then(|h| canonical_url(&h, base.as_deref()))
            .filter(|u| self.site.is_allowed(u));
        let listing = self.read_listing(session, candidate, link.as_ref(), target).await;

        // Without an href the details view is the only source of a URL.
        let mut opened = false;
        if listing_url.is_none() {
            self.open_details(session, link.as_ref().unwrap_or(candidate)).await;
            opened = true;
            listing_url = session
                .current_url()
                .await
                .and_then(|u| canonical_url(&u, None))
                .filter(|u| self.site.is_allowed(u));
        }
        let url = listing_url.context("listing has no resolvable URL")?;
        let listing = JobListing { url, ..listing };

        let id = match self.store.insert_listing(&listing, ApplicationStatus::Found)? {
            InsertOutcome::Inserted(id) => {
                debug!("stored new listing {} ({})", id, listing.url);
                id
            }
            InsertOutcome::Duplicate(id) => {
                let already_applied = self
                    .store
                    .get_record(id)?
                    .is_some_and(|r| r.applied);
                if already_applied {
                    info!("already applied to {} at {}, skipping", listing.title, listing.company);
                    return Ok(None);
                }
                id
            }
        };

        if !opened {
            self.open_details(session, link.as_ref().unwrap_or(candidate)).await;
        }

        let outcome = self.apply(session).await;
        self.enter(ApplyState::Terminal(outcome.label()));
        match &outcome {
            ApplyOutcome::Success => info!("applied: {} at {}", listing.title, listing.company),
            ApplyOutcome::Held => info!("ready but not submitted: {} at {}", listing.title, listing.company),
            ApplyOutcome::Blocked(keys) => info!(
                "blocked on {}: {} at {}",
                keys.join(", "),
                listing.title,
                listing.company
            ),
            ApplyOutcome::Failed(reason) => {
                info!("failed: {} at {} ({})", listing.title, listing.company, reason)
            }
        }

        if let Err(e) = self.persist(id, &outcome) {
            warn!("could not record outcome for {}: {:#}", listing.url, e);
        }
        self.dismiss_dialog(session).await;
        Ok(Some(outcome))
    }

    async fn has_affordance<S: InteractiveSession>(&self, session: &S, candidate: &S::Element) -> bool {
        let snapshot = session.snapshot(candidate).await;
        if self.vocabulary.matches(ActionKind::ApplyAffordance, &snapshot.text) {
            return true;
        }
        for marker in session
            .find_all(Scope::Within(candidate), &self.site.affordance_markers)
            .await
        {
            if self.labelled(session, &marker, ActionKind::ApplyAffordance).await {
                return true;
            }
        }
        false
    }

    /// Text or aria-label matches the given vocabulary.
    async fn labelled<S: InteractiveSession>(&self, session: &S, element: &S::Element, kind: ActionKind) -> bool {
        let text = session.snapshot(element).await.text;
        if self.vocabulary.matches(kind, &text) {
            return true;
        }
        session
            .attribute(element, "aria-label")
            .await
            .is_some_and(|label| self.vocabulary.matches(kind, &label))
    }

    async fn read_listing<S: InteractiveSession>(
        &self,
        session: &S,
        candidate: &S::Element,
        link: Option<&S::Element>,
        target: &SearchTarget,
    ) -> JobListing {
        let first_line = |s: ElementSnapshot| {
            s.text
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(|l| l.chars().take(MAX_TITLE_CHARS).collect::<String>())
        };

        let mut title = None;
        if let Some(link) = link {
            title = first_line(session.snapshot(link).await);
        }
        if title.is_none() {
            title = first_line(session.snapshot(candidate).await);
        }

        let company = match session
            .find_first(Scope::Within(candidate), &self.site.listing_company)
            .await
        {
            Some(el) => first_line(session.snapshot(&el).await),
            None => None,
        };
        let location = match session
            .find_first(Scope::Within(candidate), &self.site.listing_location)
            .await
        {
            Some(el) => first_line(session.snapshot(&el).await),
            None => None,
        };

        JobListing {
            title: title.unwrap_or_else(|| target.position.clone()),
            company: company.unwrap_or_else(|| "Unknown Company".to_string()),
            location: location.unwrap_or_else(|| target.location.clone()),
            url: String::new(),
            source: self.site.name.clone(),
        }
    }

    async fn open_details<S: InteractiveSession>(&self, session: &mut S, element: &S::Element) {
        if let Err(e) = session.act(element, &Action::Click).await {
            warn!("could not open listing details: {}", e);
        }
        self.pacer.pause(Pause::Settle, self.cancel).await;
    }

    /// From the opened listing to a terminal outcome.
    async fn apply<S: InteractiveSession>(&self, session: &mut S) -> ApplyOutcome {
        self.enter(ApplyState::AwaitingApplyAffordance);
        let Some(button) = self.find_apply_button(session).await else {
            return ApplyOutcome::Failed("no apply button".into());
        };
        if let Err(e) = session.act(&button, &Action::Click).await {
            return ApplyOutcome::Failed(format!("apply button: {}", e));
        }
        self.pacer.pause(Pause::Action, self.cancel).await;

        self.enter(ApplyState::ApplyModalOpen);
        if session
            .wait_for(&self.site.dialog, self.config.modal_timeout)
            .await
            .is_none()
        {
            return ApplyOutcome::Failed("application dialog did not open".into());
        }

        for step in 1..=self.config.max_modal_steps {
            self.enter(ApplyState::StepSubmitOrAdvance { step });
            let Some(dialog) = session.find_first(Scope::Document, &self.site.dialog).await else {
                debug!("dialog closed after step {}", step - 1);
                break;
            };
            match self.step(session, &dialog).await {
                StepMove::Advanced => self.pacer.pause(Pause::Action, self.cancel).await,
                StepMove::Finished(outcome) => return outcome,
                StepMove::Stuck => {
                    debug!("nothing to click at step {}", step);
                    break;
                }
            }
        }

        self.exhausted(session).await
    }

    /// Apply-button chain in priority order, accepting only elements whose
    /// label is in the apply vocabulary.
    async fn find_apply_button<S: InteractiveSession>(&self, session: &S) -> Option<S::Element> {
        let deadline = tokio::time::Instant::now() + self.config.details_timeout;
        loop {
            for chain in self.site.apply_buttons.alternatives() {
                for element in session.find_all(Scope::Document, &chain).await {
                    if self.labelled(session, &element, ActionKind::ApplyAffordance).await {
                        return Some(element);
                    }
                }
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return None;
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn step<S: InteractiveSession>(&self, session: &mut S, dialog: &S::Element) -> StepMove {
        let gaps = self.fill_fields(session, dialog).await;
        if !gaps.is_empty() {
            return StepMove::Finished(ApplyOutcome::Blocked(gaps));
        }

        let mut submit = None;
        let mut progress = None;
        for control in session
            .find_all(Scope::Within(dialog), &self.site.actionable)
            .await
        {
            let label = self.label_of(session, &control).await;
            if label.is_empty() || self.vocabulary.matches(ActionKind::ApplyAffordance, &label) {
                continue;
            }
            match self.vocabulary.classify_step_action(&label) {
                Some(ActionKind::TerminalSubmit) if submit.is_none() => submit = Some((control, label)),
                Some(ActionKind::Progress) if progress.is_none() => progress = Some((control, label)),
                _ => {}
            }
        }

        if let Some((control, label)) = submit {
            if !self.config.auto_submit {
                debug!("holding before '{}'", label);
                return StepMove::Finished(ApplyOutcome::Held);
            }
            debug!("submitting with '{}'", label);
            let clicked = session.act(&control, &Action::Click).await;
            return after_click(clicked, StepMove::Finished(ApplyOutcome::Success), "submit");
        }

        if let Some((control, label)) = progress {
            debug!("advancing with '{}'", label);
            let clicked = session.act(&control, &Action::Click).await;
            return after_click(clicked, StepMove::Advanced, &label);
        }

        let Some(primary) = session
            .find_first(Scope::Within(dialog), &self.site.primary_actions)
            .await
        else {
            return StepMove::Stuck;
        };
        debug!("no labelled control, falling back to the primary action");
        let clicked = session.act(&primary, &Action::Click).await;
        after_click(clicked, StepMove::Advanced, "primary action")
    }

    /// Fill every empty field that has an answer. Returns the keys of
    /// required fields left empty for lack of one.
    async fn fill_fields<S: InteractiveSession>(&self, session: &mut S, dialog: &S::Element) -> Vec<String> {
        let mut gaps: Vec<String> = Vec::new();

        for rule in &self.site.fields {
            for field in session.find_all(Scope::Within(dialog), &rule.chain).await {
                let snapshot = session.snapshot(&field).await;
                if is_filled(&snapshot) {
                    continue;
                }

                match self.answers.get(&rule.key) {
                    Some(answer) => {
                        let action = if snapshot.is_select() {
                            Action::Select(answer.to_string())
                        } else {
                            Action::Type(answer.to_string())
                        };
                        match session.act(&field, &action).await {
                            Ok(()) => debug!("filled {}", rule.key),
                            Err(e) => warn!("could not fill {}: {}", rule.key, e),
                        }
                    }
                    None => {
                        let required = rule.required || self.marked_required(session, &field).await;
                        if required && !gaps.contains(&rule.key) {
                            gaps.push(rule.key.clone());
                        }
                    }
                }
            }
        }
        gaps
    }

    async fn marked_required<S: InteractiveSession>(&self, session: &S, field: &S::Element) -> bool {
        let flag = |v: Option<String>| v.is_some_and(|v| !v.eq_ignore_ascii_case("false"));
        flag(session.attribute(field, "required").await)
            || flag(session.attribute(field, "aria-required").await)
    }

    async fn label_of<S: InteractiveSession>(&self, session: &S, element: &S::Element) -> String {
        let text = session.snapshot(element).await.text.trim().to_string();
        if !text.is_empty() {
            return text;
        }
        session
            .attribute(element, "aria-label")
            .await
            .map(|l| l.trim().to_string())
            .unwrap_or_default()
    }

    async fn exhausted<S: InteractiveSession>(&self, session: &S) -> ApplyOutcome {
        if !self.config.auto_submit {
            return ApplyOutcome::Held;
        }
        match self.config.success_policy {
            SuccessPolicy::Optimistic => {
                debug!("step budget spent, assuming the application went through");
                ApplyOutcome::Success
            }
            SuccessPolicy::RequireConfirmation => {
                if self.confirmed(session).await {
                    ApplyOutcome::Success
                } else {
                    ApplyOutcome::Failed("no confirmation after the last step".into())
                }
            }
        }
    }

    async fn confirmed<S: InteractiveSession>(&self, session: &S) -> bool {
        !self.site.confirmation.is_empty()
            && session
                .find_first(Scope::Document, &self.site.confirmation)
                .await
                .is_some()
    }

    fn persist(&self, id: i64, outcome: &ApplyOutcome) -> anyhow::Result<()> {
        match outcome {
            ApplyOutcome::Success => self.store.mark_applied(id, Utc::now()),
            ApplyOutcome::Blocked(keys) => self.store.record_missing_info(id, keys),
            ApplyOutcome::Failed(_) => self.store.set_status(id, ApplicationStatus::Failed),
            ApplyOutcome::Held => Ok(()),
        }
    }

    /// Best effort: close whatever dialog the attempt left behind.
    async fn dismiss_dialog<S: InteractiveSession>(&self, session: &mut S) {
        if session.find_first(Scope::Document, &self.site.dialog).await.is_none() {
            return;
        }
        let Some(close) = first_match(session, &self.site.dismiss).await else {
            return;
        };
        if session.act(&close, &Action::Click).await.is_err() {
            return;
        }
        if let Some(discard) = first_match(session, &self.site.discard).await {
            let _ = session.act(&discard, &Action::Click).await;
        }
    }
}

/// A control that went away under the click most likely did its job, so
/// the next step re-scans the dialog instead of failing the candidate.
fn after_click(clicked: Result<(), SessionError>, landed: StepMove, control: &str) -> StepMove {
    match clicked {
        Ok(()) => landed,
        Err(e) if e.is_soft() => {
            debug!("'{}' detached during the click, re-scanning", control);
            StepMove::Advanced
        }
        Err(e) => StepMove::Finished(ApplyOutcome::Failed(format!("{}: {}", control, e))),
    }
}

async fn first_match<S: InteractiveSession>(session: &S, chain: &ProbeChain) -> Option<S::Element> {
    if chain.is_empty() {
        return None;
    }
    session.find_first(Scope::Document, chain).await
}

/// A select still showing its placeholder counts as empty.
fn is_filled(snapshot: &ElementSnapshot) -> bool {
    if !snapshot.has_value() {
        return false;
    }
    let value = snapshot.value.as_deref().unwrap_or_default().trim().to_lowercase();
    !(snapshot.is_select() && value.starts_with("select"))
}
