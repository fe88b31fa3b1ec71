//! Engine events for observers outside the main loop
//!
//! The display context subscribes to [`EVENT_CHANNEL`] and redraws from the
//! events alone, so it never touches engine state directly.

use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    pubsub::{PubSubChannel, Subscriber},
};

/// Channel capacity for pub-sub events
pub const EVENT_CHANNEL_CAPACITY: usize = 8;

/// Number of subscribers that can listen to engine events
/// - Subscriber 0: display task
/// - Subscriber 1: wireless notification task
pub const EVENT_SUBSCRIBERS: usize = 2;

/// Number of publishers (just the engine loop)
pub const EVENT_PUBLISHERS: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OdometerEvent {
    /// Rotations were counted
    Rotation { lifetime: u32, session: u32 },
    /// This boot's session identity was settled
    SessionDecided { session_id: u32, merged: bool },
    /// A record was committed to flash
    Saved { session_id: u32, write_index: u32 },
    /// A record failed write verification
    SaveFailed { session_id: u32, write_index: u32 },
    /// The companion app acknowledged a session
    SessionReported { session_id: u32 },
    /// A fresh live session began after the previous one was reported
    SessionStarted { session_id: u32 },
}

pub type EventChannel = PubSubChannel<
    CriticalSectionRawMutex,
    OdometerEvent,
    EVENT_CHANNEL_CAPACITY,
    EVENT_SUBSCRIBERS,
    EVENT_PUBLISHERS,
>;

pub type EventSubscriber<'a> = Subscriber<
    'a,
    CriticalSectionRawMutex,
    OdometerEvent,
    EVENT_CHANNEL_CAPACITY,
    EVENT_SUBSCRIBERS,
    EVENT_PUBLISHERS,
>;

pub static EVENT_CHANNEL: EventChannel = PubSubChannel::new();

/// Publish without waiting; the oldest queued event is dropped when a
/// subscriber lags.
pub fn publish(event: OdometerEvent) {
    EVENT_CHANNEL.immediate_publisher().publish_immediate(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_sees_events_in_order() {
        let channel = EventChannel::new();
        let mut subscriber = channel.subscriber().unwrap();
        let publisher = channel.immediate_publisher();

        publisher.publish_immediate(OdometerEvent::Saved {
            session_id: 1,
            write_index: 1,
        });
        publisher.publish_immediate(OdometerEvent::SessionReported { session_id: 1 });

        assert_eq!(
            subscriber.try_next_message_pure(),
            Some(OdometerEvent::Saved {
                session_id: 1,
                write_index: 1
            })
        );
        assert_eq!(
            subscriber.try_next_message_pure(),
            Some(OdometerEvent::SessionReported { session_id: 1 })
        );
        assert_eq!(subscriber.try_next_message_pure(), None);
    }

    #[test]
    fn test_lagging_subscriber_keeps_newest() {
        let channel = EventChannel::new();
        let mut subscriber = channel.subscriber().unwrap();
        let publisher = channel.immediate_publisher();

        for session in 0..(EVENT_CHANNEL_CAPACITY as u32 + 2) {
            publisher.publish_immediate(OdometerEvent::Rotation {
                lifetime: session,
                session,
            });
        }

        let mut last = None;
        while let Some(event) = subscriber.try_next_message_pure() {
            last = Some(event);
        }
        assert_eq!(
            last,
            Some(OdometerEvent::Rotation {
                lifetime: EVENT_CHANNEL_CAPACITY as u32 + 1,
                session: EVENT_CHANNEL_CAPACITY as u32 + 1
            })
        );
    }
}
