use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::db::Database;
use crate::error::CampaignError;
use crate::manual::ManualReport;
use crate::models::{search_targets, ApplicantAnswers, CampaignResult, CandidateProfile, PositionSuggestion};
use crate::pacing::{Pacer, Pause};
use crate::session::{Credentials, InteractiveSession, SessionLauncher, SessionOptions};
use crate::site::SiteProfile;
use crate::vocabulary::Vocabulary;
use crate::workflow::{ApplyWorkflow, WorkflowConfig};

#[derive(Debug, Clone, PartialEq)]
pub enum RunMode {
    Automated,
    /// No session was usable; the manual report was written instead.
    Degraded { reason: String, report_path: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CampaignOutcome {
    pub result: CampaignResult,
    pub mode: RunMode,
    pub interrupted: bool,
}

pub struct CampaignRunner<'a, L: SessionLauncher> {
    pub launcher: &'a L,
    pub options: &'a SessionOptions,
    /// `None` runs without logging in.
    pub credentials: Option<&'a Credentials>,
    pub site: &'a SiteProfile,
    pub vocabulary: &'a Vocabulary,
    pub workflow: &'a WorkflowConfig,
    pub pacer: &'a Pacer,
    pub store: &'a Database,
    pub cancel: &'a CancellationToken,
    /// Where the manual report goes in degraded mode.
    pub report_path: &'a Path,
}

impl<L: SessionLauncher> CampaignRunner<'_, L> {
    pub async fn run(
        &self,
        profile: &CandidateProfile,
        suggestions: &[PositionSuggestion],
        locations: &[String],
        answers: &ApplicantAnswers,
    ) -> Result<CampaignOutcome, CampaignError> {
        let targets = search_targets(suggestions, locations);
        info!("{} search targets", targets.len());

        let mut session = match self.launcher.open(self.options).await {
            Ok(session) => session,
            Err(e) => {
                warn!("browser session unavailable: {}", e);
                return self.degrade(e.to_string(), profile, suggestions, locations, answers);
            }
        };

        if let Some(credentials) = self.credentials {
            if let Err(e) = session.authenticate(credentials, &self.site.login).await {
                warn!("{}", e);
                if let Err(close_err) = session.close().await {
                    warn!("closing session after failed login: {}", close_err);
                }
                return self.degrade(e.to_string(), profile, suggestions, locations, answers);
            }
        } else {
            info!("no credentials configured, searching without logging in");
        }

        let workflow = ApplyWorkflow {
            site: self.site,
            vocabulary: self.vocabulary,
            answers,
            config: self.workflow,
            pacer: self.pacer,
            store: self.store,
            cancel: self.cancel,
        };

        let mut result = CampaignResult::default();
        for (i, target) in targets.iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }
            if i > 0 {
                self.pacer.pause(Pause::Target, self.cancel).await;
                if self.cancel.is_cancelled() {
                    break;
                }
            }

            info!("[{}/{}] searching {}", i + 1, targets.len(), target);
            match workflow.run_target(&mut session, target).await {
                Ok(tally) => result.absorb(&tally),
                Err(e) => warn!("skipping {}: {}", target, e),
            }
        }

        let interrupted = self.cancel.is_cancelled();
        if interrupted {
            info!("run interrupted, stopping after the current step");
        }
        if let Err(e) = session.close().await {
            warn!("closing browser session: {}", e);
        }

        Ok(CampaignOutcome {
            result,
            mode: RunMode::Automated,
            interrupted,
        })
    }

    fn degrade(
        &self,
        reason: String,
        profile: &CandidateProfile,
        suggestions: &[PositionSuggestion],
        locations: &[String],
        answers: &ApplicantAnswers,
    ) -> Result<CampaignOutcome, CampaignError> {
        let report = ManualReport::build(profile, suggestions, locations, answers, self.site);
        report
            .write(self.report_path)
            .map_err(|source| CampaignError::ReportWrite {
                reason: reason.clone(),
                path: self.report_path.to_path_buf(),
                source,
            })?;
        info!("manual search report written to {}", self.report_path.display());

        Ok(CampaignOutcome {
            result: CampaignResult::default(),
            mode: RunMode::Degraded {
                reason,
                report_path: self.report_path.to_path_buf(),
            },
            interrupted: self.cancel.is_cancelled(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_session::{FakeLauncher, FakeSession};
    use crate::models::ApplicationStatus;
    use crate::session::Descriptor;
    use std::time::Duration;

    struct Fixture {
        options: SessionOptions,
        site: SiteProfile,
        vocabulary: Vocabulary,
        workflow: WorkflowConfig,
        pacer: Pacer,
        store: Database,
        cancel: CancellationToken,
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let mut site = SiteProfile::default();
            site.login.landmark_timeout_secs = 0;
            Self {
                options: SessionOptions::default(),
                site,
                vocabulary: Vocabulary::default(),
                workflow: WorkflowConfig {
                    navigation_backoff: Duration::ZERO,
                    details_timeout: Duration::ZERO,
                    modal_timeout: Duration::ZERO,
                    ..WorkflowConfig::default()
                },
                pacer: Pacer::disabled(),
                store: Database::open_in_memory().unwrap(),
                cancel: CancellationToken::new(),
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn report_path(&self) -> PathBuf {
            self.dir.path().join("job_search_report.txt")
        }

        async fn run(
            &self,
            launcher: &FakeLauncher,
            credentials: Option<&Credentials>,
            report_path: &Path,
        ) -> Result<CampaignOutcome, CampaignError> {
            let runner = CampaignRunner {
                launcher,
                options: &self.options,
                credentials,
                site: &self.site,
                vocabulary: &self.vocabulary,
                workflow: &self.workflow,
                pacer: &self.pacer,
                store: &self.store,
                cancel: &self.cancel,
                report_path,
            };
            runner
                .run(&CandidateProfile::default(), &suggestions(), &locations(), &ApplicantAnswers::new())
                .await
        }
    }

    fn suggestions() -> Vec<PositionSuggestion> {
        vec![PositionSuggestion {
            title: "Data Analyst".into(),
            keywords: vec!["SQL".into()],
            seniority: Default::default(),
            score: 85.0,
            justification: "SQL heavy".into(),
            salary_band: Default::default(),
        }]
    }

    fn locations() -> Vec<String> {
        vec!["Milan".into(), "Remote".into()]
    }

    /// One quick-apply listing whose dialog submits in a single step.
    fn session_with_listing() -> FakeSession {
        let mut session = FakeSession::new();
        let item = session.add(None, "li", "", &[Descriptor::css(".jobs-search-results__list-item")]);
        let link = session.add(Some(item), "a", "Data Analyst", &[Descriptor::css(".job-card-container__link")]);
        session.set_attribute(link, "href", "https://www.linkedin.com/jobs/view/77/");
        session.add(Some(item), "span", "Easy Apply", &[Descriptor::css(".job-card-container__apply-method")]);
        let apply = session.add(None, "button", "Easy Apply", &[Descriptor::css(".jobs-apply-button")]);
        let dialog = session.add(None, "div", "", &[Descriptor::css(".jobs-easy-apply-modal")]);
        session.set_visible(dialog, false);
        session.on_click_show(apply, &[dialog]);
        let submit = session.add(Some(dialog), "button", "Submit application", &[Descriptor::tag("button")]);
        session.on_click_hide(submit, &[dialog]);
        session
    }

    #[tokio::test]
    async fn test_unavailable_browser_writes_manual_report() {
        let f = Fixture::new();
        let launcher = FakeLauncher::unavailable();
        let path = f.report_path();
        let outcome = f.run(&launcher, None, &path).await.unwrap();

        match &outcome.mode {
            RunMode::Degraded { reason, report_path } => {
                assert!(reason.contains("chromedriver not found"));
                assert_eq!(report_path, &path);
            }
            other => panic!("expected degraded mode, got {other:?}"),
        }
        assert_eq!(outcome.result, CampaignResult::default());
        let report = std::fs::read_to_string(&path).unwrap();
        assert!(report.contains("1. Data Analyst in Milan"));
        assert!(report.contains("2. Data Analyst in Remote"));
        assert_eq!(launcher.closes(), 0);
    }

    #[tokio::test]
    async fn test_failed_login_degrades_and_closes_once() {
        let f = Fixture::new();
        let launcher = FakeLauncher::with(FakeSession::new());
        let credentials = Credentials {
            identifier: "me@example.com".into(),
            secret: "wrong".into(),
        };
        let path = f.report_path();
        let outcome = f.run(&launcher, Some(&credentials), &path).await.unwrap();

        assert!(matches!(outcome.mode, RunMode::Degraded { .. }));
        assert!(path.exists());
        assert_eq!(launcher.closes(), 1);
    }

    #[tokio::test]
    async fn test_automated_run_accumulates_over_targets() {
        let f = Fixture::new();
        let launcher = FakeLauncher::with(session_with_listing());
        let outcome = f.run(&launcher, None, &f.report_path()).await.unwrap();

        assert_eq!(outcome.mode, RunMode::Automated);
        assert!(!outcome.interrupted);
        // The second location shows the same listing, already applied.
        assert_eq!(outcome.result.total_found, 2);
        assert_eq!(outcome.result.applications_attempted, 1);
        assert_eq!(outcome.result.applications_succeeded, 1);
        assert_eq!(launcher.closes(), 1);
        assert_eq!(f.store.list_records(Some(ApplicationStatus::Applied)).unwrap().len(), 1);
        assert!(!f.report_path().exists());
    }

    #[tokio::test]
    async fn test_failing_target_contributes_nothing() {
        let f = Fixture::new();
        let mut session = session_with_listing();
        session.failing_navigations = f.workflow.navigation_retries;
        let launcher = FakeLauncher::with(session);
        let outcome = f.run(&launcher, None, &f.report_path()).await.unwrap();

        assert_eq!(outcome.result.total_found, 1);
        assert_eq!(outcome.result.applications_succeeded, 1);
        assert_eq!(launcher.closes(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_still_closes_the_session() {
        let f = Fixture::new();
        f.cancel.cancel();
        let launcher = FakeLauncher::with(session_with_listing());
        let outcome = f.run(&launcher, None, &f.report_path()).await.unwrap();

        assert!(outcome.interrupted);
        assert_eq!(outcome.result, CampaignResult::default());
        assert_eq!(launcher.closes(), 1);
        assert_eq!(f.store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unwritable_report_is_an_error() {
        let f = Fixture::new();
        let blocker = f.dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();
        let path = blocker.join("report.txt");

        let err = f.run(&FakeLauncher::unavailable(), None, &path).await.unwrap_err();
        let CampaignError::ReportWrite { reason, path: failed, .. } = err;
        assert!(reason.contains("chromedriver"));
        assert_eq!(failed, path);
    }
}
