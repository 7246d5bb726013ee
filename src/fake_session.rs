//! Scripted in-memory document for workflow tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::SessionError;
use crate::session::{
    Action, Descriptor, ElementSnapshot, InteractiveSession, ProbeChain, Scope, SessionLauncher,
    SessionOptions,
};

pub type NodeId = usize;

#[derive(Debug, Clone)]
enum Effect {
    Show(Vec<NodeId>),
    Hide(Vec<NodeId>),
    Detach,
    /// The click lands, but the handle reports itself stale afterwards.
    ReportDetached,
}

#[derive(Debug, Clone)]
struct FakeNode {
    parent: Option<NodeId>,
    tag: String,
    text: String,
    descriptors: Vec<Descriptor>,
    attributes: HashMap<String, String>,
    value: Option<String>,
    visible: bool,
    enabled: bool,
    detached: bool,
    on_click: Vec<Effect>,
}

#[derive(Debug, Default)]
pub struct FakeSession {
    nodes: Vec<FakeNode>,
    pub url: String,
    pub navigations: Vec<String>,
    /// Upcoming navigations that fail before one succeeds.
    pub failing_navigations: usize,
    pub clicks: Vec<NodeId>,
    pub typed: Vec<(NodeId, String)>,
    pub close_calls: Arc<AtomicUsize>,
}

impl FakeSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        parent: Option<NodeId>,
        tag: &str,
        text: &str,
        descriptors: &[Descriptor],
    ) -> NodeId {
        self.nodes.push(FakeNode {
            parent,
            tag: tag.to_string(),
            text: text.to_string(),
            descriptors: descriptors.to_vec(),
            attributes: HashMap::new(),
            value: None,
            visible: true,
            enabled: true,
            detached: false,
            on_click: Vec::new(),
        });
        self.nodes.len() - 1
    }

    pub fn set_visible(&mut self, id: NodeId, visible: bool) {
        self.nodes[id].visible = visible;
    }

    pub fn set_enabled(&mut self, id: NodeId, enabled: bool) {
        self.nodes[id].enabled = enabled;
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) {
        self.nodes[id].attributes.insert(name.to_string(), value.to_string());
    }

    pub fn set_value(&mut self, id: NodeId, value: &str) {
        self.nodes[id].value = Some(value.to_string());
    }

    pub fn on_click_show(&mut self, id: NodeId, targets: &[NodeId]) {
        self.nodes[id].on_click.push(Effect::Show(targets.to_vec()));
    }

    pub fn on_click_hide(&mut self, id: NodeId, targets: &[NodeId]) {
        self.nodes[id].on_click.push(Effect::Hide(targets.to_vec()));
    }

    pub fn on_click_detach(&mut self, id: NodeId) {
        self.nodes[id].on_click.push(Effect::Detach);
    }

    pub fn on_click_report_detached(&mut self, id: NodeId) {
        self.nodes[id].on_click.push(Effect::ReportDetached);
    }

    pub fn value_of(&self, id: NodeId) -> Option<String> {
        self.nodes[id].value.clone()
    }

    pub fn was_clicked(&self, id: NodeId) -> bool {
        self.clicks.contains(&id)
    }

    fn displayed(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(i) = current {
            let node = &self.nodes[i];
            if node.detached || !node.visible {
                return false;
            }
            current = node.parent;
        }
        true
    }

    fn descends_from(&self, id: NodeId, ancestor: NodeId) -> bool {
        let mut current = self.nodes[id].parent;
        while let Some(i) = current {
            if i == ancestor {
                return true;
            }
            current = self.nodes[i].parent;
        }
        false
    }

    /// Visible text includes the text of displayed descendants.
    fn visible_text(&self, id: NodeId) -> String {
        let mut parts = vec![self.nodes[id].text.clone()];
        for (child, _) in self.nodes.iter().enumerate().filter(|(_, n)| n.parent == Some(id)) {
            if self.displayed(child) {
                parts.push(self.visible_text(child));
            }
        }
        parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl InteractiveSession for FakeSession {
    type Element = NodeId;

    async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), SessionError> {
        if self.failing_navigations > 0 {
            self.failing_navigations -= 1;
            return Err(SessionError::navigation(url, "scripted failure"));
        }
        self.navigations.push(url.to_string());
        self.url = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> Option<String> {
        if self.url.is_empty() { None } else { Some(self.url.clone()) }
    }

    async fn find_all(&self, scope: Scope<'_, NodeId>, chain: &ProbeChain) -> Vec<NodeId> {
        for descriptor in chain.descriptors() {
            let found: Vec<NodeId> = (0..self.nodes.len())
                .filter(|&id| self.nodes[id].descriptors.contains(descriptor))
                .filter(|&id| match scope {
                    Scope::Document => true,
                    Scope::Within(root) => self.descends_from(id, *root),
                })
                .filter(|&id| self.displayed(id) && self.nodes[id].enabled)
                .collect();
            if !found.is_empty() {
                return found;
            }
        }
        Vec::new()
    }

    async fn snapshot(&self, element: &NodeId) -> ElementSnapshot {
        let node = &self.nodes[*element];
        if node.detached {
            return ElementSnapshot::default();
        }
        ElementSnapshot {
            tag: node.tag.clone(),
            text: self.visible_text(*element),
            value: node.value.clone(),
        }
    }

    async fn attribute(&self, element: &NodeId, name: &str) -> Option<String> {
        self.nodes[*element].attributes.get(name).cloned()
    }

    async fn act(&mut self, element: &NodeId, action: &Action) -> Result<(), SessionError> {
        let id = *element;
        if self.nodes[id].detached {
            return Err(SessionError::Detached);
        }
        match action {
            Action::Click => {
                self.clicks.push(id);
                let mut stale = false;
                for effect in self.nodes[id].on_click.clone() {
                    match effect {
                        Effect::Show(targets) => targets.iter().for_each(|t| self.nodes[*t].visible = true),
                        Effect::Hide(targets) => targets.iter().for_each(|t| self.nodes[*t].visible = false),
                        Effect::Detach => self.nodes[id].detached = true,
                        Effect::ReportDetached => stale = true,
                    }
                }
                if stale {
                    return Err(SessionError::Detached);
                }
            }
            Action::Type(text) | Action::Select(text) => {
                self.typed.push((id, text.clone()));
                self.nodes[id].value = Some(text.clone());
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out one prepared session, or fails like a missing driver.
pub struct FakeLauncher {
    session: std::sync::Mutex<Option<FakeSession>>,
    pub close_calls: Arc<AtomicUsize>,
}

impl FakeLauncher {
    pub fn with(session: FakeSession) -> Self {
        let close_calls = session.close_calls.clone();
        Self {
            session: std::sync::Mutex::new(Some(session)),
            close_calls,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            session: std::sync::Mutex::new(None),
            close_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn closes(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionLauncher for FakeLauncher {
    type Session = FakeSession;

    async fn open(&self, _options: &SessionOptions) -> Result<FakeSession, SessionError> {
        self.session
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or_else(|| SessionError::SessionStart("chromedriver not found".into()))
    }
}
