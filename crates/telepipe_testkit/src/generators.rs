//! Property-based test generators using proptest.

use proptest::prelude::*;
use telepipe::{RawBatchEvent, TrackingConsent};

/// Strategy for event payloads (never empty).
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..512)
}

/// Strategy for events, with metadata half of the time.
pub fn event_strategy() -> impl Strategy<Value = RawBatchEvent> {
    (
        payload_strategy(),
        prop::option::of(prop::collection::vec(any::<u8>(), 0..64)),
    )
        .prop_map(|(data, metadata)| match metadata {
            Some(metadata) => RawBatchEvent::with_metadata(data, metadata),
            None => RawBatchEvent::new(data),
        })
}

/// Strategy for short event sequences.
pub fn events_strategy(max: usize) -> impl Strategy<Value = Vec<RawBatchEvent>> {
    prop::collection::vec(event_strategy(), 1..=max.max(1))
}

/// Strategy for any consent value.
pub fn consent_strategy() -> impl Strategy<Value = TrackingConsent> {
    prop_oneof![
        Just(TrackingConsent::Pending),
        Just(TrackingConsent::Granted),
        Just(TrackingConsent::NotGranted),
    ]
}

/// Strategy for HTTP status codes, including unusual ones.
pub fn status_code_strategy() -> impl Strategy<Value = u16> {
    prop_oneof![
        3 => prop_oneof![Just(200u16), Just(202)],
        1 => 300u16..400,
        2 => 400u16..500,
        2 => 500u16..600,
        1 => 100u16..200,
        1 => 600u16..1000,
    ]
}

/// Strategy for valid feature names.
pub fn feature_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,15}").expect("Invalid regex")
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn payloads_are_never_empty(payload in payload_strategy()) {
            prop_assert!(!payload.is_empty());
        }

        #[test]
        fn feature_names_are_plain(name in feature_name_strategy()) {
            prop_assert!(!name.starts_with('.'));
            prop_assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        }
    }
}
