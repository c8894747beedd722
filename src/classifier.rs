use anyhow::{Context, Result};
use regex::RegexBuilder;
use tracing::debug;

use crate::config::RoutingConfig;
use crate::event::InboundEvent;

/// Attachment fallback marker of a firing alert.
const ALERT_FIRING_MARKER: &str = "FIRING";
/// Attachment body marker requesting a voice call.
const ALERT_CALL_MARKER: &str = "call_voip = true";

/// Escalation actions for one admitted event. Rules fire independently,
/// so several actions can be set at once; `forward` stays a single flag
/// even when both the tag and the mention rule match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionSet {
    /// Post an escalation notice to the broadcast channel.
    pub forward: bool,
    /// Ring the configured endpoints through the Asterisk backend.
    pub quick_call: bool,
    /// Place calls through the Twilio backend.
    pub twilio_call: bool,
}

impl ActionSet {
    pub fn is_empty(&self) -> bool {
        !self.forward && !self.quick_call && !self.twilio_call
    }
}

/// Pure decision logic: given one admitted event, decide which
/// escalation actions apply. No I/O, no state.
pub struct Classifier {
    tag: regex::Regex,
    bot_user_id: String,
    routing: RoutingConfig,
}

impl Classifier {
    /// The support tag is compiled verbatim as a case-insensitive
    /// pattern; an invalid pattern is a configuration error.
    pub fn new(support_tag: &str, bot_user_id: String, routing: RoutingConfig) -> Result<Self> {
        let tag = RegexBuilder::new(support_tag)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("Invalid support tag pattern: {}", support_tag))?;
        Ok(Self {
            tag,
            bot_user_id,
            routing,
        })
    }

    pub fn classify(&self, event: &InboundEvent) -> ActionSet {
        let mut actions = ActionSet::default();

        let text = match event.text.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => {
                debug!("Message has no text, no actions");
                return actions;
            }
        };

        if self.is_dev_call(event) {
            actions.quick_call = true;
            actions.twilio_call = true;
        }

        if self.tag.is_match(text) {
            debug!("Support tag found in message");
            actions.forward = true;
        }

        if text.contains(&self.bot_user_id) {
            debug!("Bot is mentioned in message");
            actions.forward = true;
        }

        // Checked on its own; the mention rule does not gate it.
        if self.routing.vip_channels.iter().any(|c| c == &event.channel) {
            debug!("Message is in VIP channel {}", event.channel);
            actions.quick_call = true;
        }

        actions
    }

    /// A dev-call is a firing alert posted by the configured alert bot
    /// into the configured alert channel, with an attachment asking for
    /// a voice call.
    fn is_dev_call(&self, event: &InboundEvent) -> bool {
        if self.routing.dev_call_channel.is_empty()
            || event.channel != self.routing.dev_call_channel
        {
            return false;
        }
        if event.bot_id.as_deref() != Some(self.routing.dev_call_bot_id.as_str()) {
            return false;
        }
        event.attachments.iter().any(|a| {
            a.fallback
                .as_deref()
                .is_some_and(|f| f.contains(ALERT_FIRING_MARKER))
                && a.text
                    .as_deref()
                    .is_some_and(|t| t.contains(ALERT_CALL_MARKER))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Attachment;

    fn make_routing() -> RoutingConfig {
        RoutingConfig {
            vip_channels: vec!["C0VIP".to_string()],
            dev_call_channel: "C0DEVCALL".to_string(),
            dev_call_bot_id: "B0ALERTS".to_string(),
        }
    }

    fn make_classifier() -> Classifier {
        Classifier::new("help", "SUPPORTBOT".to_string(), make_routing()).unwrap()
    }

    fn make_event(channel: &str, text: &str) -> InboundEvent {
        InboundEvent {
            event_type: "message".to_string(),
            subtype: None,
            channel: channel.to_string(),
            user: Some("U9".to_string()),
            bot_id: None,
            ts: "1700000100.000100".to_string(),
            text: Some(text.to_string()),
            attachments: Vec::new(),
        }
    }

    #[test]
    fn test_tag_match_is_case_insensitive() {
        let classifier = make_classifier();
        let actions = classifier.classify(&make_event("C9", "I need HELP please"));
        assert!(actions.forward);
        assert!(!actions.quick_call);
        assert!(!actions.twilio_call);
    }

    #[test]
    fn test_tag_used_as_verbatim_pattern() {
        let classifier =
            Classifier::new("supp.rt", "SUPPORTBOT".to_string(), make_routing()).unwrap();
        assert!(classifier.classify(&make_event("C9", "support!")).forward);
        assert!(classifier.classify(&make_event("C9", "suppart!")).forward);
    }

    #[test]
    fn test_invalid_tag_pattern_rejected() {
        assert!(Classifier::new("c++", "SUPPORTBOT".to_string(), make_routing()).is_err());
    }

    #[test]
    fn test_mention_match() {
        let classifier = make_classifier();
        let actions = classifier.classify(&make_event("C9", "ping <@SUPPORTBOT> now"));
        assert!(actions.forward);
    }

    #[test]
    fn test_no_match_yields_nothing() {
        let classifier = make_classifier();
        assert!(classifier.classify(&make_event("C9", "just chatting")).is_empty());
    }

    #[test]
    fn test_empty_text_yields_no_actions() {
        let classifier = make_classifier();
        let mut event = make_event("C0VIP", "");
        assert!(classifier.classify(&event).is_empty());
        event.text = None;
        assert!(classifier.classify(&event).is_empty());
    }

    #[test]
    fn test_vip_channel_triggers_quick_call_only() {
        let classifier = make_classifier();
        let actions = classifier.classify(&make_event("C0VIP", "anything at all"));
        assert!(actions.quick_call);
        assert!(!actions.twilio_call);
        assert!(!actions.forward);
    }

    #[test]
    fn test_vip_fires_alongside_mention() {
        // The legacy if/else made the mention match suppress the VIP
        // check; the two rules are independent here.
        let classifier = make_classifier();
        let actions = classifier.classify(&make_event("C0VIP", "hey <@SUPPORTBOT>"));
        assert!(actions.forward);
        assert!(actions.quick_call);
    }

    #[test]
    fn test_tag_and_mention_set_forward_once() {
        let classifier = make_classifier();
        let actions = classifier.classify(&make_event("C9", "need <@SUPPORTBOT> help now"));
        assert_eq!(
            actions,
            ActionSet {
                forward: true,
                quick_call: false,
                twilio_call: false
            }
        );
    }

    fn make_alert_event(fallback: &str, body: &str) -> InboundEvent {
        let mut event = make_event("C0DEVCALL", "alert");
        event.subtype = Some("bot_message".to_string());
        event.user = None;
        event.bot_id = Some("B0ALERTS".to_string());
        event.attachments = vec![Attachment {
            fallback: Some(fallback.to_string()),
            text: Some(body.to_string()),
        }];
        event
    }

    #[test]
    fn test_dev_call_fires_both_backends() {
        let classifier = make_classifier();
        let actions = classifier.classify(&make_alert_event("[FIRING:1] alert", "call_voip = true"));
        assert!(actions.quick_call);
        assert!(actions.twilio_call);
        assert!(!actions.forward);
    }

    #[test]
    fn test_dev_call_requires_both_markers() {
        let classifier = make_classifier();
        assert!(classifier
            .classify(&make_alert_event("[RESOLVED] alert", "call_voip = true"))
            .is_empty());
        assert!(classifier
            .classify(&make_alert_event("[FIRING:1] alert", "call_voip = false"))
            .is_empty());
    }

    #[test]
    fn test_dev_call_requires_configured_channel_and_bot() {
        let classifier = make_classifier();

        let mut event = make_alert_event("[FIRING:1] alert", "call_voip = true");
        event.channel = "C9".to_string();
        assert!(classifier.classify(&event).is_empty());

        let mut event = make_alert_event("[FIRING:1] alert", "call_voip = true");
        event.bot_id = Some("B0OTHER".to_string());
        assert!(classifier.classify(&event).is_empty());
    }
}
