use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const VOCABULARY_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Opens the quick-apply flow ("Easy Apply").
    ApplyAffordance,
    /// Sends the application.
    TerminalSubmit,
    /// Moves the modal to its next step.
    Progress,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    pub version: u32,
    pub phrases: BTreeMap<ActionKind, BTreeMap<String, Vec<String>>>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        let mut vocab = Vocabulary {
            version: VOCABULARY_VERSION,
            phrases: BTreeMap::new(),
        };

        vocab.add(ActionKind::ApplyAffordance, "en", &["easy apply"]);
        vocab.add(ActionKind::ApplyAffordance, "it", &["candidatura facile", "candidatura semplice"]);
        vocab.add(ActionKind::ApplyAffordance, "fr", &["candidature simplifiée"]);
        vocab.add(ActionKind::ApplyAffordance, "de", &["einfach bewerben"]);
        vocab.add(ActionKind::ApplyAffordance, "es", &["solicitud sencilla"]);

        vocab.add(ActionKind::TerminalSubmit, "en", &["submit", "send"]);
        vocab.add(ActionKind::TerminalSubmit, "it", &["invia"]);
        vocab.add(ActionKind::TerminalSubmit, "fr", &["envoyer", "soumettre"]);
        vocab.add(ActionKind::TerminalSubmit, "de", &["absenden", "senden"]);
        vocab.add(ActionKind::TerminalSubmit, "es", &["enviar"]);

        vocab.add(ActionKind::Progress, "en", &["next", "continue", "review", "advance"]);
        vocab.add(ActionKind::Progress, "it", &["avanti", "continua", "rivedi", "verifica"]);
        vocab.add(ActionKind::Progress, "fr", &["suivant", "continuer", "vérifier"]);
        vocab.add(ActionKind::Progress, "de", &["weiter", "überprüfen"]);
        vocab.add(ActionKind::Progress, "es", &["siguiente", "continuar", "revisar"]);

        vocab
    }
}

impl Vocabulary {
    pub fn add(&mut self, kind: ActionKind, locale: &str, phrases: &[&str]) {
        self.phrases
            .entry(kind)
            .or_default()
            .entry(locale.to_string())
            .or_default()
            .extend(phrases.iter().map(|p| p.to_lowercase()));
    }

    pub fn phrases_for(&self, kind: ActionKind) -> impl Iterator<Item = &str> {
        self.phrases
            .get(&kind)
            .into_iter()
            .flat_map(|locales| locales.values())
            .flatten()
            .map(String::as_str)
    }

    pub fn matches(&self, kind: ActionKind, text: &str) -> bool {
        let lower = text.trim().to_lowercase();
        if lower.is_empty() {
            return false;
        }
        self.phrases_for(kind)
            .any(|phrase| !phrase.is_empty() && lower.contains(&phrase.to_lowercase()))
    }

    /// Terminal submit wins over progress: "Submit and continue" sends.
    pub fn classify_step_action(&self, text: &str) -> Option<ActionKind> {
        if self.matches(ActionKind::TerminalSubmit, text) {
            Some(ActionKind::TerminalSubmit)
        } else if self.matches(ActionKind::Progress, text) {
            Some(ActionKind::Progress)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_affordance_is_case_insensitive_and_localized() {
        let vocab = Vocabulary::default();
        assert!(vocab.matches(ActionKind::ApplyAffordance, "Data Analyst\nAcme\nEASY APPLY"));
        assert!(vocab.matches(ActionKind::ApplyAffordance, "Candidatura facile"));
        assert!(!vocab.matches(ActionKind::ApplyAffordance, "Apply on company website"));
        assert!(!vocab.matches(ActionKind::ApplyAffordance, "   "));
    }

    #[test]
    fn test_classify_step_action() {
        let vocab = Vocabulary::default();
        assert_eq!(vocab.classify_step_action("Submit application"), Some(ActionKind::TerminalSubmit));
        assert_eq!(vocab.classify_step_action("Invia candidatura"), Some(ActionKind::TerminalSubmit));
        assert_eq!(vocab.classify_step_action("Continue to next step"), Some(ActionKind::Progress));
        assert_eq!(vocab.classify_step_action("Review"), Some(ActionKind::Progress));
        assert_eq!(vocab.classify_step_action("Dismiss"), None);
    }

    #[test]
    fn test_custom_table_from_json() {
        let json = r#"{
            "version": 2,
            "phrases": {
                "apply_affordance": {"nl": ["eenvoudig solliciteren"]},
                "terminal_submit": {"nl": ["verzenden"]},
                "progress": {"nl": ["volgende"]}
            }
        }"#;
        let vocab: Vocabulary = serde_json::from_str(json).unwrap();
        assert_eq!(vocab.version, 2);
        assert!(vocab.matches(ActionKind::ApplyAffordance, "Eenvoudig solliciteren"));
        assert!(!vocab.matches(ActionKind::ApplyAffordance, "Easy Apply"));
        assert_eq!(vocab.classify_step_action("Volgende"), Some(ActionKind::Progress));
    }
}
