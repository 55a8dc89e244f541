use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Alert, Priority};
use crate::capability::{
    AlertTone, AudioAlert, Clock, EngineCapabilities, NotificationChannel, PresentOptions,
};
use crate::events::{EngineEvent, EventBus};
use crate::monitor::DndStatus;
use crate::storage::DispatchConfig;

/// Where an alert ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryPath {
    /// Presented through the OS notification channel.
    System,
    /// Handed to the application as a banner event.
    InApp,
}

/// Chooses the delivery path and alert profile for each alert.
///
/// Never fails: a missing or failing channel falls back to an in-app
/// banner, and an `AlarmFired` event is emitted on every path.
#[derive(Clone)]
pub struct NotificationDispatcher {
    channel: Option<Arc<dyn NotificationChannel>>,
    audio: Option<Arc<dyn AudioAlert>>,
    dnd: DndStatus,
    events: EventBus,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
}

impl NotificationDispatcher {
    pub fn new(caps: &EngineCapabilities, dnd: DndStatus, config: DispatchConfig) -> Self {
        Self {
            channel: caps.channel.clone(),
            audio: caps.audio.clone(),
            dnd,
            events: caps.events.clone(),
            clock: caps.clock.clone(),
            config,
        }
    }

    pub fn dispatch(&self, alert: &Alert) -> DeliveryPath {
        let priority = alert.priority();
        let path = if self.dnd.is_active() {
            debug!(kind = alert.kind.label(), "do-not-disturb active, banner only");
            DeliveryPath::InApp
        } else {
            self.present(alert, priority)
        };

        self.play_tone(priority);

        let at = self.clock.now();
        if path == DeliveryPath::InApp {
            self.events.emit(EngineEvent::BannerRequested {
                kind: alert.kind.clone(),
                title: alert.title.clone(),
                body: alert.body.clone(),
                step_name: alert.step_name.clone(),
                bake_id: alert.bake_id.clone(),
                at,
            });
        }
        self.events.emit(EngineEvent::AlarmFired {
            kind: alert.kind.clone(),
            step_name: alert.step_name.clone(),
            bake_id: alert.bake_id.clone(),
            delivery: path,
            at,
        });
        path
    }

    fn present(&self, alert: &Alert, priority: Priority) -> DeliveryPath {
        let Some(channel) = &self.channel else {
            debug!(kind = alert.kind.label(), "no notification channel, banner fallback");
            return DeliveryPath::InApp;
        };
        match channel.present(&alert.title, &alert.body, &self.options(alert, priority)) {
            Ok(()) => DeliveryPath::System,
            Err(e) => {
                warn!(kind = alert.kind.label(), error = %e, "notification channel failed, banner fallback");
                DeliveryPath::InApp
            }
        }
    }

    fn options(&self, alert: &Alert, priority: Priority) -> PresentOptions {
        match priority {
            Priority::High => PresentOptions {
                icon: self.config.icon.clone(),
                tag: alert.tag(),
                require_interaction: true,
                vibration_pattern: self.config.high_priority_vibration.clone(),
                silent: false,
            },
            Priority::Low => PresentOptions {
                icon: self.config.icon.clone(),
                tag: alert.tag(),
                require_interaction: false,
                vibration_pattern: self.config.low_priority_vibration.clone(),
                silent: !self.config.low_priority_sound,
            },
        }
    }

    fn play_tone(&self, priority: Priority) {
        let Some(audio) = &self.audio else {
            return;
        };
        match priority {
            Priority::High => audio.play(AlertTone::Urgent),
            Priority::Low if self.config.low_priority_sound => audio.play(AlertTone::Gentle),
            Priority::Low => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{
        FixedPlatform, ManualClock, RecordingAudio, RecordingChannel, TimerPrimitive,
    };
    use crate::events::drain;
    use crate::notify::AlertKind;
    use crate::storage::MemoryStore;

    struct Fixture {
        channel: Arc<RecordingChannel>,
        audio: Arc<RecordingAudio>,
        dnd: DndStatus,
        events: EventBus,
        dispatcher: NotificationDispatcher,
    }

    fn fixture(with_channel: bool, config: DispatchConfig) -> Fixture {
        let clock = Arc::new(ManualClock::new("2026-03-01T10:00:00Z".parse().unwrap()));
        let channel = Arc::new(RecordingChannel::new());
        let audio = Arc::new(RecordingAudio::new());
        let events = EventBus::default();
        let caps = EngineCapabilities {
            clock: clock.clone(),
            timers: Some(clock as Arc<dyn TimerPrimitive>),
            store: Arc::new(MemoryStore::new()),
            channel: with_channel.then(|| channel.clone() as Arc<dyn NotificationChannel>),
            audio: Some(audio.clone() as Arc<dyn AudioAlert>),
            platform: Arc::new(FixedPlatform::new()),
            events: events.clone(),
        };
        let dnd = DndStatus::new();
        let dispatcher = NotificationDispatcher::new(&caps, dnd.clone(), config);
        Fixture {
            channel,
            audio,
            dnd,
            events,
            dispatcher,
        }
    }

    fn start_alert() -> Alert {
        Alert::new(AlertKind::Start, "Bulk", Some("b1".into()))
    }

    #[test]
    fn high_priority_goes_to_system_channel() {
        let f = fixture(true, DispatchConfig::default());
        let mut rx = f.events.subscribe();

        assert_eq!(f.dispatcher.dispatch(&start_alert()), DeliveryPath::System);

        let presented = f.channel.presented();
        assert_eq!(presented.len(), 1);
        assert!(presented[0].options.require_interaction);
        assert_eq!(presented[0].options.vibration_pattern, vec![300, 100, 300, 100, 300]);
        assert_eq!(f.audio.played(), vec![AlertTone::Urgent]);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            EngineEvent::AlarmFired { delivery: DeliveryPath::System, step_name, .. } if step_name == "Bulk"
        ));
    }

    #[test]
    fn low_priority_is_silent_by_default() {
        let f = fixture(true, DispatchConfig::default());
        let alert = Alert::new(AlertKind::HeadsUp, "Bulk", Some("b1".into()));
        f.dispatcher.dispatch(&alert);

        let presented = f.channel.presented();
        assert!(presented[0].options.silent);
        assert!(!presented[0].options.require_interaction);
        assert!(f.audio.played().is_empty());
    }

    #[test]
    fn low_priority_sound_override() {
        let config = DispatchConfig {
            low_priority_sound: true,
            ..DispatchConfig::default()
        };
        let f = fixture(true, config);
        f.dispatcher
            .dispatch(&Alert::new(AlertKind::Bedtime, "Cold proof", None));
        assert!(!f.channel.presented()[0].options.silent);
        assert_eq!(f.audio.played(), vec![AlertTone::Gentle]);
    }

    #[test]
    fn dnd_banner_only_but_still_audible_for_high() {
        let f = fixture(true, DispatchConfig::default());
        f.dnd.set(true);
        let mut rx = f.events.subscribe();

        assert_eq!(f.dispatcher.dispatch(&start_alert()), DeliveryPath::InApp);
        assert!(f.channel.presented().is_empty());
        assert_eq!(f.audio.played(), vec![AlertTone::Urgent]);

        let events = drain(&mut rx);
        assert!(matches!(events[0], EngineEvent::BannerRequested { .. }));
        assert!(matches!(
            events[1],
            EngineEvent::AlarmFired { delivery: DeliveryPath::InApp, .. }
        ));
    }

    #[test]
    fn failing_or_absent_channel_falls_back_to_banner() {
        let f = fixture(true, DispatchConfig::default());
        f.channel.set_failing(true);
        assert_eq!(f.dispatcher.dispatch(&start_alert()), DeliveryPath::InApp);

        let absent = fixture(false, DispatchConfig::default());
        let mut rx = absent.events.subscribe();
        assert_eq!(absent.dispatcher.dispatch(&start_alert()), DeliveryPath::InApp);
        assert_eq!(drain(&mut rx).len(), 2);
    }
}
