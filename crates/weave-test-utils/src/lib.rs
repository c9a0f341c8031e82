//! Testing utilities for the Weave workspace
//!
//! [`ScriptedGenerator`] answers generation calls from a script of rules and
//! records every request for assertions. [`fixtures`] holds canned responses
//! for each pipeline call.

#![allow(missing_docs)]

pub mod fixtures;

use async_trait::async_trait;
use parking_lot::Mutex;
use weave_gateway::{GatewayError, GenerationRequest, GenerationResponse, TextGenerator, TokenUsage};

/// One scripted answer
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String, TokenUsage),
    Fail(GatewayError),
}

#[derive(Debug)]
struct Rule {
    label: String,
    content: Option<String>,
    replies: Vec<Reply>,
    served: usize,
}

impl Rule {
    fn matches(&self, request: &GenerationRequest) -> bool {
        request.label.starts_with(&self.label)
            && self
                .content
                .as_deref()
                .map_or(true, |needle| request.content.contains(needle))
    }

    /// Next reply; the last one repeats once the sequence is exhausted
    fn next(&mut self) -> Option<Reply> {
        let reply = self.replies.get(self.served.min(self.replies.len().checked_sub(1)?))?.clone();
        self.served += 1;
        Some(reply)
    }
}

/// Generator answering from a script
///
/// A rule matches when the request label starts with the rule's label and,
/// if the rule names one, the request content contains its needle. Rules
/// added later take precedence, so a test can start from a standard script
/// and override single calls.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn rule(mut self, label: &str, content: Option<&str>, replies: Vec<Reply>) -> Self {
        self.rules.get_mut().push(Rule {
            label: label.to_string(),
            content: content.map(str::to_string),
            replies,
            served: 0,
        });
        self
    }

    /// Always answer `label` with `text`
    #[must_use]
    pub fn reply(self, label: &str, text: impl Into<String>) -> Self {
        self.rule(label, None, vec![Reply::Text(text.into(), TokenUsage::new(100, 50))])
    }

    #[must_use]
    pub fn reply_with_usage(self, label: &str, text: impl Into<String>, usage: TokenUsage) -> Self {
        self.rule(label, None, vec![Reply::Text(text.into(), usage)])
    }

    /// Answer `label` for requests whose content contains `needle`
    #[must_use]
    pub fn reply_for(self, label: &str, needle: &str, text: impl Into<String>) -> Self {
        self.rule(label, Some(needle), vec![Reply::Text(text.into(), TokenUsage::new(100, 50))])
    }

    /// Answer successive calls in order, repeating the last
    #[must_use]
    pub fn sequence<I, S>(self, label: &str, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let replies = texts
            .into_iter()
            .map(|t| Reply::Text(t.into(), TokenUsage::new(100, 50)))
            .collect();
        self.rule(label, None, replies)
    }

    /// Fail every call to `label`
    #[must_use]
    pub fn fail(self, label: &str, error: GatewayError) -> Self {
        self.rule(label, None, vec![Reply::Fail(error)])
    }

    /// Fail calls to `label` whose content contains `needle`
    #[must_use]
    pub fn fail_for(self, label: &str, needle: &str, error: GatewayError) -> Self {
        self.rule(label, Some(needle), vec![Reply::Fail(error)])
    }

    /// Every request received, in arrival order
    #[must_use]
    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().clone()
    }

    /// Requests whose label starts with `prefix`
    #[must_use]
    pub fn calls_with_label(&self, prefix: &str) -> Vec<GenerationRequest> {
        self.calls
            .lock()
            .iter()
            .filter(|r| r.label.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Requests whose label starts with `prefix` and content contains `needle`
    #[must_use]
    pub fn calls_for(&self, prefix: &str, needle: &str) -> Vec<GenerationRequest> {
        self.calls_with_label(prefix)
            .into_iter()
            .filter(|r| r.content.contains(needle))
            .collect()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, GatewayError> {
        self.calls.lock().push(request.clone());
        let reply = self
            .rules
            .lock()
            .iter_mut()
            .rev()
            .find(|rule| rule.matches(request))
            .and_then(Rule::next);
        match reply {
            Some(Reply::Text(text, usage)) => Ok(GenerationResponse { text, usage }),
            Some(Reply::Fail(error)) => Err(error),
            None => Err(GatewayError::Api {
                status: 404,
                message: format!("no scripted reply for '{}'", request.label),
            }),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn later_rules_win_and_sequences_repeat() {
        let scripted = ScriptedGenerator::new()
            .sequence("judge", ["first", "second"])
            .reply_for("judge", "Story: story.b", "override");

        let a = GenerationRequest::new("judge", "", "Story: story.a");
        let b = GenerationRequest::new("judge", "", "Story: story.b");
        assert_eq!(scripted.generate(&a).await.unwrap().text, "first");
        assert_eq!(scripted.generate(&b).await.unwrap().text, "override");
        assert_eq!(scripted.generate(&a).await.unwrap().text, "second");
        assert_eq!(scripted.generate(&a).await.unwrap().text, "second");
        assert_eq!(scripted.calls_for("judge", "story.a").len(), 3);
    }

    #[tokio::test]
    async fn unscripted_calls_fail() {
        let scripted = ScriptedGenerator::new();
        let err = scripted
            .generate(&GenerationRequest::new("discovery", "", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Api { status: 404, .. }));
        assert_eq!(scripted.calls().len(), 1);
    }
}
