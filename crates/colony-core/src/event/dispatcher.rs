use std::collections::HashSet;
use std::fmt;

use serde_json::Value;

use crate::event::error::EventSystemError;
use crate::event::MANAGER_EVENT_ROOT;
use crate::plugin_system::capability::{is_event_handled, CapabilityPath};
use crate::plugin_system::instance::InstanceId;

/// Which kind of source an event comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventChannel {
    /// Events fired by plugins through `generate_event`
    Plugin,
    /// Events fired by the manager through `notify_handlers`
    Manager,
}

impl EventChannel {
    /// Manager channel for patterns under `plugin_manager`, plugin channel otherwise.
    pub fn for_pattern(pattern: &str) -> Self {
        if is_event_handled(MANAGER_EVENT_ROOT, pattern) {
            EventChannel::Manager
        } else {
            EventChannel::Plugin
        }
    }
}

/// A plugin instance interested in events matching `pattern`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub pattern: String,
    pub instance: InstanceId,
    /// Positional arity of the handler, when declared
    pub arity: Option<usize>,
}

/// Pad `args` with a trailing `Null` when the handler expects exactly one more argument.
pub fn pad_arguments(args: &[Value], arity: Option<usize>) -> Vec<Value> {
    let mut padded = args.to_vec();
    if arity == Some(args.len() + 1) {
        padded.push(Value::Null);
    }
    padded
}

/// Subscription index, one FIFO list per channel.
#[derive(Default)]
pub struct EventIndex {
    plugin_handlers: Vec<Subscription>,
    manager_handlers: Vec<Subscription>,
}

impl fmt::Debug for EventIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventIndex")
            .field("plugin_handlers_count", &self.plugin_handlers.len())
            .field("manager_handlers_count", &self.manager_handlers.len())
            .finish()
    }
}

impl EventIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, channel: EventChannel) -> &Vec<Subscription> {
        match channel {
            EventChannel::Plugin => &self.plugin_handlers,
            EventChannel::Manager => &self.manager_handlers,
        }
    }

    fn channel_mut(&mut self, channel: EventChannel) -> &mut Vec<Subscription> {
        match channel {
            EventChannel::Plugin => &mut self.plugin_handlers,
            EventChannel::Manager => &mut self.manager_handlers,
        }
    }

    /// Append a subscription. Returns `false` when the exact subscription already exists.
    pub fn subscribe(
        &mut self,
        channel: EventChannel,
        pattern: &str,
        instance: InstanceId,
        arity: Option<usize>,
    ) -> Result<bool, EventSystemError> {
        if CapabilityPath::parse(pattern).is_empty() {
            return Err(EventSystemError::HandlerRegistrationFailed {
                pattern: pattern.to_string(),
                reason: "empty event pattern".to_string(),
            });
        }
        let handlers = self.channel_mut(channel);
        if handlers
            .iter()
            .any(|s| s.instance == instance && s.pattern == pattern)
        {
            return Ok(false);
        }
        handlers.push(Subscription {
            pattern: pattern.to_string(),
            instance,
            arity,
        });
        Ok(true)
    }

    /// Drop every subscription of `instance` on both channels. Returns how many were removed.
    pub fn unsubscribe_instance(&mut self, instance: InstanceId) -> usize {
        let before = self.plugin_handlers.len() + self.manager_handlers.len();
        self.plugin_handlers.retain(|s| s.instance != instance);
        self.manager_handlers.retain(|s| s.instance != instance);
        before - (self.plugin_handlers.len() + self.manager_handlers.len())
    }

    /// Subscriptions matching `event_name`, in registration order.
    ///
    /// An instance with several matching patterns appears once, under its
    /// earliest subscription.
    pub fn handlers_for(&self, channel: EventChannel, event_name: &str) -> Vec<Subscription> {
        let mut seen = HashSet::new();
        self.channel(channel)
            .iter()
            .filter(|s| is_event_handled(&s.pattern, event_name))
            .filter(|s| seen.insert(s.instance))
            .cloned()
            .collect()
    }

    pub fn subscriptions_of(&self, instance: InstanceId) -> Vec<Subscription> {
        self.plugin_handlers
            .iter()
            .chain(self.manager_handlers.iter())
            .filter(|s| s.instance == instance)
            .cloned()
            .collect()
    }

    pub fn len(&self, channel: EventChannel) -> usize {
        self.channel(channel).len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugin_handlers.is_empty() && self.manager_handlers.is_empty()
    }
}
