//! End-to-end persistence: writes, consent, rotation, damage and quotas.

use proptest::prelude::*;
use std::fs;
use std::sync::Arc;
use telepipe::{
    AesGcmEncryption, EncryptionKey, Feature, RawBatchEvent, Rejection, Submission,
};
use telepipe_testkit::prelude::*;

fn batch_files(test: &TestPipeline, dir: &str) -> Vec<String> {
    file_names(&test.root().join(dir))
        .into_iter()
        .filter(|name| !name.ends_with("_metadata"))
        .collect()
}

#[test]
fn events_round_trip_in_order() {
    let test = TestPipeline::new(TrackingConsent::Granted);
    let logs = test.register("logs");

    test.write_all(&logs, &[b"first", b"second", b"third"]);
    test.age_batches();

    let batches = drain_batches(&logs);
    assert_eq!(batches.len(), 1);
    assert_eq!(
        payloads(&batches),
        vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]
    );
}

#[test]
fn fresh_batches_are_not_readable() {
    let test = TestPipeline::new(TrackingConsent::Granted);
    let logs = test.register("logs");

    test.write_all(&logs, &[b"fresh"]);
    assert!(logs.read_next_batch().unwrap().is_none());

    test.age_batches();
    assert!(logs.read_next_batch().unwrap().is_some());
}

#[test]
fn pending_events_migrate_in_order_once_granted() {
    let test = TestPipeline::new(TrackingConsent::Pending);
    let logs = test.register("logs");

    test.write_all(&logs, &[b"a", b"b", b"c"]);
    test.age_batches();
    assert!(drain_batches(&logs).is_empty());
    assert!(!batch_files(&test, "logs-pending-v2").is_empty());

    test.set_consent(TrackingConsent::Granted);

    let batches = drain_batches(&logs);
    assert_eq!(
        payloads(&batches),
        vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
    );
    assert!(batch_files(&test, "logs-pending-v2").is_empty());
}

#[test]
fn refused_consent_deletes_pending_events_and_rejects_writes() {
    let test = TestPipeline::new(TrackingConsent::Pending);
    let logs = test.register("logs");
    test.write_all(&logs, &[b"a", b"b"]);

    test.set_consent(TrackingConsent::NotGranted);
    test.flush().unwrap();

    assert!(batch_files(&test, "logs-pending-v2").is_empty());
    assert_eq!(
        logs.write_event(RawBatchEvent::new(b"c".to_vec()), None),
        Submission::Rejected(Rejection::ConsentNotGranted)
    );

    test.set_consent(TrackingConsent::Granted);
    test.age_batches();
    assert!(drain_batches(&logs).is_empty());
}

#[test]
fn granted_data_stays_when_consent_is_withdrawn() {
    let test = TestPipeline::new(TrackingConsent::Granted);
    let logs = test.register("logs");
    test.write_all(&logs, &[b"kept"]);

    test.set_consent(TrackingConsent::Pending);
    test.age_batches();

    assert_eq!(payloads(&drain_batches(&logs)), vec![b"kept".to_vec()]);
}

#[test]
fn writes_right_after_registration_are_kept() {
    for _ in 0..20 {
        let test = TestPipeline::new(TrackingConsent::Pending);
        let logs = test.register("logs");
        test.write_all(&logs, &[b"first"]);

        assert_eq!(batch_files(&test, "logs-pending-v2").len(), 1);
    }
}

#[test]
fn writes_queued_before_a_withdrawal_are_kept() {
    let test = TestPipeline::new(TrackingConsent::Granted);
    let logs = test.register("logs");

    let events: Vec<Vec<u8>> = (0..20u8).map(|i| vec![b'a' + i]).collect();
    for event in &events {
        assert!(logs
            .write_event(RawBatchEvent::new(event.clone()), None)
            .is_queued());
    }
    test.set_consent(TrackingConsent::NotGranted);
    test.flush().unwrap();
    assert!(batch_files(&test, "logs-pending-v2").is_empty());

    test.set_consent(TrackingConsent::Granted);
    test.age_batches();
    assert_eq!(payloads(&drain_batches(&logs)), events);
}

#[test]
fn batches_rotate_on_max_batch_size() {
    let test = TestPipeline::new(TrackingConsent::Granted);
    let logs = test.register_with("logs", test_persistence().max_batch_size(150));

    let payload = [7u8; 100];
    test.write_all(&logs, &[&payload, &payload, &payload]);
    test.age_batches();

    let batches = drain_batches(&logs);
    assert_eq!(batches.len(), 3);
    assert!(batches.iter().all(|b| b.events.len() == 1));
    assert!(batches.windows(2).all(|w| w[0].id < w[1].id));
}

#[test]
fn batches_rotate_on_item_count() {
    let test = TestPipeline::new(TrackingConsent::Granted);
    let logs = test.register_with("logs", test_persistence().max_items_per_batch(2));

    test.write_all(&logs, &[b"1", b"2", b"3", b"4", b"5"]);
    test.age_batches();

    let batches = drain_batches(&logs);
    let sizes: Vec<usize> = batches.iter().map(|b| b.events.len()).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
}

#[test]
fn truncated_tail_yields_the_valid_prefix() {
    let test = TestPipeline::new(TrackingConsent::Granted);
    let logs = test.register("logs");
    test.write_all(&logs, &[b"intact", b"damaged"]);
    test.age_batches();

    let names = batch_files(&test, "logs-v2");
    assert_eq!(names.len(), 1);
    let path = test.root().join("logs-v2").join(&names[0]);
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

    let batches = drain_batches(&logs);
    assert_eq!(payloads(&batches), vec![b"intact".to_vec()]);
    let entry = test.logger.find("is corrupted after 1 events").unwrap();
    assert!(entry.targets.contains(&telepipe::LogTarget::User));
}

#[test]
fn over_quota_purges_oldest_batches() {
    let test = TestPipeline::new(TrackingConsent::Granted);
    let config = test_persistence()
        .max_items_per_batch(1)
        .max_disk_space(1)
        .cleanup_frequency(Duration::ZERO);
    let logs = test.register_with("logs", config);

    test.write_all(&logs, &[b"e1", b"e2", b"e3", b"e4"]);
    test.age_batches();

    assert_eq!(payloads(&drain_batches(&logs)), vec![b"e4".to_vec()]);
    assert!(test.logger.contains("Too much disk space used"));
}

#[test]
fn oversized_events_are_refused_at_write_time() {
    let test = TestPipeline::new(TrackingConsent::Granted);
    let logs = test.register_with("logs", test_persistence().max_item_size(8));

    test.write_all(&logs, &[b"this payload is too large", b"ok"]);
    test.age_batches();

    assert_eq!(payloads(&drain_batches(&logs)), vec![b"ok".to_vec()]);
    let entry = test.logger.find("Can't write data with size").unwrap();
    assert!(entry.targets.contains(&telepipe::LogTarget::User));
}

#[test]
fn encrypted_feature_round_trips_without_plaintext_on_disk() {
    let test = TestPipeline::new(TrackingConsent::Granted);
    let encryption = Arc::new(AesGcmEncryption::new(&EncryptionKey::generate()));
    let logs = test
        .register_feature(
            Feature::new("logs", test.default_request_factory("Logs Request", "/logs"))
                .with_persistence_config(test_persistence())
                .with_encryption(encryption),
        )
        .unwrap();

    let secret = b"card number 4111 1111 1111 1111";
    assert!(logs
        .write_event(RawBatchEvent::new(secret.to_vec()), Some(b"session-1".to_vec()))
        .is_queued());
    logs.flush().unwrap();
    test.age_batches();

    for name in file_names(&test.root().join("logs-v2")) {
        let raw = fs::read(test.root().join("logs-v2").join(name)).unwrap();
        assert!(!raw.windows(secret.len()).any(|w| w == secret));
        assert!(!raw.windows(9).any(|w| w == b"session-1"));
    }

    let batches = drain_batches(&logs);
    assert_eq!(payloads(&batches), vec![secret.to_vec()]);
    assert_eq!(batches[0].metadata.as_deref(), Some(&b"session-1"[..]));
}

#[test]
fn write_scope_sees_previous_metadata() {
    let test = TestPipeline::new(TrackingConsent::Granted);
    let logs = test.register("logs");

    for _ in 0..3 {
        assert!(logs
            .with_write_scope(|writer| {
                let count = writer
                    .current_metadata()
                    .map_or(0, |m| u32::from_be_bytes(m.try_into().unwrap()));
                let next = (count + 1).to_be_bytes();
                let _ = writer.write(RawBatchEvent::new(b"view".to_vec()), Some(&next));
            })
            .is_queued());
    }
    logs.flush().unwrap();
    test.age_batches();

    let batches = drain_batches(&logs);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].events.len(), 3);
    assert_eq!(batches[0].metadata, Some(3u32.to_be_bytes().to_vec()));
}

#[test]
fn clear_all_data_removes_every_batch() {
    let test = TestPipeline::new(TrackingConsent::Pending);
    let logs = test.register("logs");
    test.write_all(&logs, &[b"pending"]);
    test.set_consent(TrackingConsent::Granted);
    test.write_all(&logs, &[b"granted"]);

    test.clear_all_data().unwrap();
    test.flush().unwrap();
    test.age_batches();

    assert!(drain_batches(&logs).is_empty());
    assert!(batch_files(&test, "logs-pending-v2").is_empty());
}

#[test]
fn persisted_batches_survive_a_restart() {
    let test = TestPipeline::new(TrackingConsent::Granted);
    let logs = test.register("logs");
    test.write_all(&logs, &[b"before restart"]);
    test.stop();
    drop(logs);

    let reopened = test.open_secondary(TrackingConsent::Granted);
    let logs = reopened.register("logs");
    reopened.clock.advance(Duration::from_secs(60));

    assert_eq!(
        payloads(&drain_batches(&logs)),
        vec![b"before restart".to_vec()]
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn arbitrary_events_round_trip(events in events_strategy(20)) {
        let test = TestPipeline::new(TrackingConsent::Granted);
        let logs = test.register("logs");
        for event in &events {
            prop_assert!(logs.write_event(event.clone(), None).is_queued());
        }
        logs.flush().unwrap();
        test.age_batches();

        let batches = drain_batches(&logs);
        let read: Vec<RawBatchEvent> = batches.into_iter().flat_map(|b| b.events).collect();
        prop_assert_eq!(read, events);
    }
}
