//! Datastore entries and the block layout they are stored in.

use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::mpsc;
use std::sync::Arc;
use telepipe::{Cbor, CoreError};
use telepipe_codec::{decode_blocks, encode_blocks, CodecError, TlvBlock, TlvBlockType, VersionedRecord};
use telepipe_testkit::prelude::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Session {
    id: String,
    views: u32,
}

fn session() -> Session {
    Session {
        id: "a1b2".into(),
        views: 3,
    }
}

#[test]
fn value_round_trips_with_version() {
    let test = TestPipeline::new(TrackingConsent::Granted);
    test.register("rum");
    let store = test.datastore("rum").unwrap();

    store.set_value("last-session", &session(), 2, &Cbor).unwrap();
    let content = store.value::<Session>("last-session", Some(2), &Cbor).unwrap().unwrap();

    assert_eq!(content.version, 2);
    assert_eq!(content.data, session());
    assert_eq!(store.keys(), vec!["last-session".to_string()]);
    assert!(store.dir().ends_with("rum/datastore_v0"));
}

#[test]
fn version_mismatch_deletes_the_entry() {
    let test = TestPipeline::new(TrackingConsent::Granted);
    test.register("rum");
    let store = test.datastore("rum").unwrap();
    store.set_value("last-session", &session(), 1, &Cbor).unwrap();

    let read = store.value::<Session>("last-session", Some(2), &Cbor).unwrap();

    assert!(read.is_none());
    assert!(!store.dir().join("last-session").exists());
    assert!(test.logger.contains("has version 1 instead of 2"));
}

#[test]
fn any_version_is_accepted_without_expectation() {
    let test = TestPipeline::new(TrackingConsent::Granted);
    test.register("rum");
    let store = test.datastore("rum").unwrap();
    store.set_value("last-session", &session(), 7, &Cbor).unwrap();

    let content = store.value::<Session>("last-session", None, &Cbor).unwrap().unwrap();
    assert_eq!(content.version, 7);
}

#[test]
fn malformed_entry_is_an_error() {
    let test = TestPipeline::new(TrackingConsent::Granted);
    test.register("rum");
    let store = test.datastore("rum").unwrap();
    fs::create_dir_all(store.dir()).unwrap();
    let only_data = encode_blocks(&[TlvBlock::new(TlvBlockType::Data, b"x".to_vec())]).unwrap();
    fs::write(store.dir().join("broken"), only_data).unwrap();

    let err = store.value::<Session>("broken", None, &Cbor).unwrap_err();

    assert!(matches!(
        err,
        CoreError::Codec(CodecError::InvalidBlockCount {
            expected: 2,
            actual: 1
        })
    ));
    assert!(test.logger.contains("Datastore entry broken is malformed"));
}

#[test]
fn undecodable_data_reads_as_absent() {
    let test = TestPipeline::new(TrackingConsent::Granted);
    test.register("rum");
    let store = test.datastore("rum").unwrap();
    store.set_value("last-session", "not a session", 0, &Cbor).unwrap();

    assert!(store
        .value::<Session>("last-session", Some(0), &Cbor)
        .unwrap()
        .is_none());
}

#[test]
fn keys_must_be_plain_file_names() {
    let test = TestPipeline::new(TrackingConsent::Granted);
    test.register("rum");
    let store = test.datastore("rum").unwrap();

    assert!(store.set_value("../escape", &session(), 0, &Cbor).is_err());
    assert!(store.value::<Session>("a/b", None, &Cbor).is_err());
}

#[test]
fn async_calls_run_in_submission_order() {
    let test = TestPipeline::new(TrackingConsent::Granted);
    test.register("rum");
    let store = test.datastore("rum").unwrap();
    let (tx, rx) = mpsc::channel();

    let set_tx = tx.clone();
    store
        .set_value_async("last-session", session(), 1, Arc::new(Cbor), move |result| {
            set_tx.send(format!("set {}", result.is_ok())).unwrap();
        })
        .unwrap();
    let get_tx = tx.clone();
    store
        .value_async::<Session, _>("last-session", Some(1), Arc::new(Cbor), move |result| {
            let views = result.unwrap().map(|c| c.data.views);
            get_tx.send(format!("get {views:?}")).unwrap();
        })
        .unwrap();
    store
        .remove_value_async("last-session", move |result| {
            tx.send(format!("remove {}", result.is_ok())).unwrap();
        })
        .unwrap();

    let order: Vec<String> = (0..3)
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    assert_eq!(order, vec!["set true", "get Some(3)", "remove true"]);
    assert!(store.keys().is_empty());
}

#[test]
fn clear_all_data_empties_the_datastore() {
    let test = TestPipeline::new(TrackingConsent::Granted);
    test.register("rum");
    let store = test.datastore("rum").unwrap();
    store.set_value("a", &1u32, 0, &Cbor).unwrap();
    store.set_value("b", &2u32, 0, &Cbor).unwrap();

    test.clear_all_data().unwrap();
    test.flush().unwrap();

    assert!(wait_until(Duration::from_secs(5), || store.keys().is_empty()));
}

#[test]
fn records_reject_swapped_blocks() {
    let swapped = encode_blocks(&[
        TlvBlock::new(TlvBlockType::Data, b"payload".to_vec()),
        TlvBlock::new(TlvBlockType::VersionCode, 1u32.to_be_bytes().to_vec()),
    ])
    .unwrap();

    assert_eq!(
        VersionedRecord::decode(&swapped).unwrap_err(),
        CodecError::UnexpectedBlockOrder {
            index: 0,
            expected: TlvBlockType::VersionCode,
            found: TlvBlockType::Data,
        }
    );
}

#[test]
fn record_layout_is_version_then_data() {
    let bytes = VersionedRecord::new(9, b"abc".to_vec()).encode().unwrap();
    let blocks = decode_blocks(&bytes).unwrap();

    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].block_type, TlvBlockType::VersionCode);
    assert_eq!(blocks[0].data, 9u32.to_be_bytes().to_vec());
    assert_eq!(blocks[1].block_type, TlvBlockType::Data);
    assert_eq!(blocks[1].data, b"abc".to_vec());
}
