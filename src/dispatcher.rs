use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::classifier::{ActionSet, Classifier};
use crate::event::InboundEvent;
use crate::slack::{BotIdentity, Notifier, PostOptions, SlackClient};
use crate::twilio::TwilioClient;
use crate::voip::AriClient;

/// Message subtype that marks bot-originated posts.
const BOT_MESSAGE_SUBTYPE: &str = "bot_message";

/// Why an event was dropped before classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DropReason {
    #[error("event type is not a message: {0}")]
    NotAMessage(String),
    #[error("message was sent by the bot itself")]
    OwnMessage,
    #[error("unhandled message subtype: {0}")]
    UnhandledSubtype(String),
    #[error("bot message from channel outside the relay allow-list: {0}")]
    RelayNotAllowed(String),
    #[error("message with ts={0} already processed")]
    Duplicate(String),
    #[error("invalid timestamp: {0}")]
    BadTimestamp(String),
    #[error("message predates process start: ts={0}")]
    Stale(String),
    #[error("message has no text")]
    NoText,
}

/// Bounded record of already-processed message timestamps. Oldest
/// entries are evicted once capacity is reached.
pub struct DedupStore {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl DedupStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Records `ts` and returns true, or returns false if it was
    /// already present.
    pub fn insert(&mut self, ts: &str) -> bool {
        if self.seen.contains(ts) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(ts.to_string());
        self.order.push_back(ts.to_string());
        true
    }
}

/// Side-effect surface for classified actions, split out so dispatch
/// logic can be tested against a recording implementation. Every method
/// is independent; a failure in one never implies anything about the
/// others.
#[async_trait]
pub trait EscalationSink: Send + Sync {
    async fn forward(&self, event: &InboundEvent) -> Result<()>;
    async fn quick_call(&self) -> Result<()>;
    async fn twilio_call(&self) -> Result<()>;
}

/// Production sink: forwards through the Slack Web API and rings the
/// two telephony backends.
pub struct Escalator {
    slack: Arc<SlackClient>,
    voip: AriClient,
    twilio: TwilioClient,
    target_channel: String,
    escalation_group: String,
}

impl Escalator {
    pub fn new(
        slack: Arc<SlackClient>,
        voip: AriClient,
        twilio: TwilioClient,
        target_channel: String,
        escalation_group: String,
    ) -> Self {
        Self {
            slack,
            voip,
            twilio,
            target_channel,
            escalation_group,
        }
    }
}

#[async_trait]
impl EscalationSink for Escalator {
    async fn forward(&self, event: &InboundEvent) -> Result<()> {
        let permalink = self.slack.get_permalink(&event.channel, &event.ts).await?;
        let text = format!(
            "@{} - You got a <{}|message>",
            self.escalation_group, permalink
        );
        self.slack
            .post_message(&self.target_channel, &text, PostOptions::escalation())
            .await?;
        info!("Message forwarded to channel {}", self.target_channel);
        Ok(())
    }

    async fn quick_call(&self) -> Result<()> {
        self.voip.quick_call().await
    }

    async fn twilio_call(&self) -> Result<()> {
        self.twilio.call_all().await
    }
}

/// Owns the per-event admission pipeline: filters out non-messages,
/// self-messages, disallowed subtypes, duplicates and stale events,
/// then runs the classifier and executes the resulting actions.
pub struct Dispatcher {
    identity: BotIdentity,
    /// Unix seconds at process start; older messages never escalate.
    start_time: f64,
    relay_channels: Vec<String>,
    dedup: DedupStore,
    classifier: Classifier,
    sink: Arc<dyn EscalationSink>,
}

impl Dispatcher {
    pub fn new(
        identity: BotIdentity,
        start_time: f64,
        relay_channels: Vec<String>,
        dedup_capacity: usize,
        classifier: Classifier,
        sink: Arc<dyn EscalationSink>,
    ) -> Self {
        Self {
            identity,
            start_time,
            relay_channels,
            dedup: DedupStore::new(dedup_capacity),
            classifier,
            sink,
        }
    }

    /// Handles one inbound event to completion. Never returns an error:
    /// failures are logged so the next event is unaffected.
    pub async fn handle_event(&mut self, event: InboundEvent) {
        if let Err(reason) = self.admit(&event) {
            match reason {
                DropReason::BadTimestamp(_) => error!("Dropping event: {}", reason),
                _ => debug!("Dropping event: {}", reason),
            }
            return;
        }

        info!(
            "Message in channel {} from user {}: {}",
            event.channel,
            event.user.as_deref().unwrap_or("unknown"),
            event.text.as_deref().unwrap_or("")
        );

        let actions = self.classifier.classify(&event);
        if actions.is_empty() {
            debug!("No escalation actions for this message");
            return;
        }
        self.execute(&event, actions).await;
    }

    /// Admission filter, applied strictly in order; the first failing
    /// condition wins. Records the timestamp in the dedup store before
    /// any further processing.
    fn admit(&mut self, event: &InboundEvent) -> Result<(), DropReason> {
        if event.event_type != "message" {
            return Err(DropReason::NotAMessage(event.event_type.clone()));
        }

        if event.user.as_deref() == Some(self.identity.user_id.as_str()) {
            return Err(DropReason::OwnMessage);
        }
        if !self.identity.bot_id.is_empty()
            && event.bot_id.as_deref() == Some(self.identity.bot_id.as_str())
        {
            return Err(DropReason::OwnMessage);
        }

        if let Some(subtype) = event.subtype.as_deref() {
            if subtype != BOT_MESSAGE_SUBTYPE {
                return Err(DropReason::UnhandledSubtype(subtype.to_string()));
            }
            if !self.relay_channels.iter().any(|c| c == &event.channel) {
                return Err(DropReason::RelayNotAllowed(event.channel.clone()));
            }
        }

        if !self.dedup.insert(&event.ts) {
            return Err(DropReason::Duplicate(event.ts.clone()));
        }

        let ts: f64 = event
            .ts
            .parse()
            .map_err(|_| DropReason::BadTimestamp(event.ts.clone()))?;
        if ts < self.start_time {
            return Err(DropReason::Stale(event.ts.clone()));
        }

        if event.text.as_deref().map_or(true, str::is_empty) {
            return Err(DropReason::NoText);
        }

        Ok(())
    }

    /// Executes the action set. Each action's failure is isolated: it is
    /// logged and the remaining actions still run.
    async fn execute(&self, event: &InboundEvent, actions: ActionSet) {
        if actions.forward {
            if let Err(e) = self.sink.forward(event).await {
                error!("Error forwarding message: {:#}", e);
            }
        }
        if actions.quick_call {
            if let Err(e) = self.sink.quick_call().await {
                error!("Quick call failed: {:#}", e);
            }
        }
        if actions.twilio_call {
            if let Err(e) = self.sink.twilio_call().await {
                error!("Twilio call failed: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoutingConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// Records executed actions; `fail_forward` makes `forward` return
    /// an error after recording the attempt.
    #[derive(Default)]
    struct RecordingSink {
        forwards: Mutex<Vec<String>>,
        quick_calls: AtomicUsize,
        twilio_calls: AtomicUsize,
        fail_forward: bool,
    }

    #[async_trait]
    impl EscalationSink for RecordingSink {
        async fn forward(&self, event: &InboundEvent) -> Result<()> {
            self.forwards.lock().await.push(event.ts.clone());
            if self.fail_forward {
                anyhow::bail!("permalink lookup failed");
            }
            Ok(())
        }

        async fn quick_call(&self) -> Result<()> {
            self.quick_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn twilio_call(&self) -> Result<()> {
            self.twilio_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn make_identity() -> BotIdentity {
        BotIdentity {
            name: "supportbot".to_string(),
            user_id: "SUPPORTBOT".to_string(),
            bot_id: "B0SELF".to_string(),
        }
    }

    fn make_routing() -> RoutingConfig {
        RoutingConfig {
            vip_channels: vec!["C0VIP".to_string()],
            dev_call_channel: "C0DEVCALL".to_string(),
            dev_call_bot_id: "B0ALERTS".to_string(),
        }
    }

    fn make_dispatcher(sink: Arc<RecordingSink>, start_time: f64) -> Dispatcher {
        let classifier =
            Classifier::new("help", "SUPPORTBOT".to_string(), make_routing()).unwrap();
        Dispatcher::new(
            make_identity(),
            start_time,
            vec!["C0DEVCALL".to_string()],
            16,
            classifier,
            sink,
        )
    }

    fn make_event(ts: &str, text: &str) -> InboundEvent {
        InboundEvent {
            event_type: "message".to_string(),
            subtype: None,
            channel: "C9".to_string(),
            user: Some("U9".to_string()),
            bot_id: None,
            ts: ts.to_string(),
            text: Some(text.to_string()),
            attachments: Vec::new(),
        }
    }

    const START: f64 = 1_700_000_000.0;

    #[tokio::test]
    async fn test_duplicate_ts_is_dropped() {
        let sink = Arc::new(RecordingSink::default());
        let mut dispatcher = make_dispatcher(sink.clone(), START);

        let event = make_event("1700000100.000100", "need help now");
        dispatcher.handle_event(event.clone()).await;
        dispatcher.handle_event(event).await;

        assert_eq!(sink.forwards.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_event_dropped_before_classification() {
        let sink = Arc::new(RecordingSink::default());
        let mut dispatcher = make_dispatcher(sink.clone(), START);

        dispatcher
            .handle_event(make_event("1699999999.000001", "need help now"))
            .await;

        assert!(sink.forwards.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_bad_timestamp_dropped_without_panic() {
        let sink = Arc::new(RecordingSink::default());
        let mut dispatcher = make_dispatcher(sink.clone(), START);

        dispatcher
            .handle_event(make_event("not-a-number", "need help now"))
            .await;

        assert!(sink.forwards.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_non_message_event_dropped() {
        let sink = Arc::new(RecordingSink::default());
        let mut dispatcher = make_dispatcher(sink.clone(), START);

        let mut event = make_event("1700000100.000100", "need help now");
        event.event_type = "reaction_added".to_string();
        dispatcher.handle_event(event).await;

        assert!(sink.forwards.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_own_messages_dropped() {
        let sink = Arc::new(RecordingSink::default());
        let mut dispatcher = make_dispatcher(sink.clone(), START);

        let mut event = make_event("1700000100.000100", "need help now");
        event.user = Some("SUPPORTBOT".to_string());
        dispatcher.handle_event(event).await;

        let mut event = make_event("1700000101.000100", "need help now");
        event.bot_id = Some("B0SELF".to_string());
        dispatcher.handle_event(event).await;

        assert!(sink.forwards.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_subtype_filtering() {
        let sink = Arc::new(RecordingSink::default());
        let mut dispatcher = make_dispatcher(sink.clone(), START);

        // Channel-join style subtype: always dropped.
        let mut event = make_event("1700000100.000100", "need help now");
        event.subtype = Some("channel_join".to_string());
        dispatcher.handle_event(event).await;
        assert!(sink.forwards.lock().await.is_empty());

        // Bot message outside the relay allow-list: dropped.
        let mut event = make_event("1700000101.000100", "need help now");
        event.subtype = Some("bot_message".to_string());
        dispatcher.handle_event(event).await;
        assert!(sink.forwards.lock().await.is_empty());

        // Bot message in an allowed relay channel: admitted.
        let mut event = make_event("1700000102.000100", "need help now");
        event.subtype = Some("bot_message".to_string());
        event.channel = "C0DEVCALL".to_string();
        dispatcher.handle_event(event).await;
        assert_eq!(sink.forwards.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_text_dropped() {
        let sink = Arc::new(RecordingSink::default());
        let mut dispatcher = make_dispatcher(sink.clone(), START);

        dispatcher.handle_event(make_event("1700000100.000100", "")).await;

        let mut event = make_event("1700000101.000100", "unused");
        event.text = None;
        dispatcher.handle_event(event).await;

        assert!(sink.forwards.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_tag_and_mention_forward_exactly_once() {
        let sink = Arc::new(RecordingSink::default());
        let mut dispatcher = make_dispatcher(sink.clone(), START);

        dispatcher
            .handle_event(make_event("1700000100.000100", "need @SUPPORTBOT help now"))
            .await;

        assert_eq!(sink.forwards.lock().await.len(), 1);
        assert_eq!(sink.quick_calls.load(Ordering::SeqCst), 0);
        assert_eq!(sink.twilio_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_forward_failure_does_not_block_calls() {
        let sink = Arc::new(RecordingSink {
            fail_forward: true,
            ..Default::default()
        });
        let mut dispatcher = make_dispatcher(sink.clone(), START);

        // VIP channel + tag: forward and quick call both fire.
        let mut event = make_event("1700000100.000100", "need help now");
        event.channel = "C0VIP".to_string();
        dispatcher.handle_event(event).await;

        assert_eq!(sink.forwards.lock().await.len(), 1);
        assert_eq!(sink.quick_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dev_call_alert_rings_both_backends_once() {
        let sink = Arc::new(RecordingSink::default());
        let mut dispatcher = make_dispatcher(sink.clone(), START);

        let mut event = make_event("1700000100.000100", "alert");
        event.channel = "C0DEVCALL".to_string();
        event.subtype = Some("bot_message".to_string());
        event.user = None;
        event.bot_id = Some("B0ALERTS".to_string());
        event.attachments = vec![crate::event::Attachment {
            fallback: Some("[FIRING:1] alert".to_string()),
            text: Some("call_voip = true".to_string()),
        }];
        dispatcher.handle_event(event).await;

        assert_eq!(sink.quick_calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.twilio_calls.load(Ordering::SeqCst), 1);
        assert!(sink.forwards.lock().await.is_empty());
    }

    #[test]
    fn test_dedup_store_evicts_oldest() {
        let mut store = DedupStore::new(2);
        assert!(store.insert("1"));
        assert!(store.insert("2"));
        assert!(!store.insert("2"));
        // "3" pushes out "1", the oldest entry; "2" is still remembered.
        assert!(store.insert("3"));
        assert!(store.insert("1"));
        assert!(!store.insert("3"));
    }
}
