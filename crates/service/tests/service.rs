use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
    thread,
};

use anyhow::Result;
use async_trait::async_trait;
use pollster::FutureExt;
use quic_bridge_service::{
    KvError, KvStore,
    directory::{DirectoryError, RoutingDirectory},
    translator::{SsrcPolicy, Translator, TranslatorOptions},
};

/// In-memory collaborator standing in for the external cache service.
#[derive(Default)]
struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    unreachable: bool,
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        if self.unreachable {
            return Err(KvError("store unreachable".to_string()));
        }

        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        if self.unreachable {
            return Err(KvError("store unreachable".to_string()));
        }

        Ok(self.values.lock().unwrap().get(key).cloned())
    }
}

#[test]
fn test_directory_last_writer_wins() -> Result<()> {
    let directory = RoutingDirectory::new(None);

    let first: SocketAddr = "10.0.0.1:5000".parse()?;
    let second: SocketAddr = "10.0.0.2:6000".parse()?;

    directory.record(0x12345678, first).block_on()?;
    directory.record(0x12345678, second).block_on()?;

    let entry = directory.lookup(0x12345678).block_on()?.unwrap();
    assert_eq!(entry.endpoint, second);

    // Unknown streams are a defined miss, not an error.
    assert!(directory.lookup(0xcafebabe).block_on()?.is_none());
    assert_eq!(directory.len(), 1);

    Ok(())
}

#[test]
fn test_directory_persists_through_collaborator() -> Result<()> {
    let store = Arc::new(MemoryStore::default());

    let writer = RoutingDirectory::new(Some(store.clone()));
    let endpoint: SocketAddr = "192.168.1.10:40000".parse()?;

    writer.record(42, endpoint).block_on()?;
    assert_eq!(
        store.values.lock().unwrap().get("42"),
        Some(&"192.168.1.10:40000".to_string())
    );

    // A different directory over the same store resolves the stream
    // and warms its local map.
    let reader = RoutingDirectory::new(Some(store.clone()));
    assert!(reader.is_empty());

    let entry = reader.lookup(42).block_on()?.unwrap();
    assert_eq!(entry.endpoint, endpoint);
    assert_eq!(reader.len(), 1);

    Ok(())
}

#[test]
fn test_directory_unavailable_store() -> Result<()> {
    let store = Arc::new(MemoryStore {
        unreachable: true,
        ..Default::default()
    });

    let directory = RoutingDirectory::new(Some(store));
    let endpoint: SocketAddr = "10.0.0.1:5000".parse()?;

    assert!(matches!(
        directory.record(7, endpoint).block_on(),
        Err(DirectoryError::Unavailable)
    ));

    // The local map still resolves what it has already seen.
    assert_eq!(
        directory.lookup(7).block_on()?.unwrap().endpoint,
        endpoint
    );

    assert!(matches!(
        directory.lookup(8).block_on(),
        Err(DirectoryError::Unavailable)
    ));

    Ok(())
}

#[test]
fn test_directory_latest_tracks_activity() -> Result<()> {
    let directory = RoutingDirectory::new(None);

    directory.record(1, "10.0.0.1:5000".parse()?).block_on()?;
    directory.record(2, "10.0.0.2:5000".parse()?).block_on()?;
    assert_eq!(directory.latest().unwrap().0, 2);

    directory.record(1, "10.0.0.1:5000".parse()?).block_on()?;
    assert_eq!(directory.latest().unwrap().0, 1);

    Ok(())
}

#[test]
fn test_translator_sequence_numbers_are_gapless_under_concurrency() {
    let directory = Arc::new(RoutingDirectory::new(None));
    let translator = Arc::new(Translator::new(TranslatorOptions::default(), directory));

    let sequences = Arc::new(Mutex::new(Vec::new()));

    let captured = sequences.clone();
    translator.set_reverse_handler(move |bytes| {
        let seq = u16::from_be_bytes([bytes[2], bytes[3]]);
        captured.lock().unwrap().push(seq);
    });

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let translator = translator.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    translator.translate_quic_to_rtp(&[0u8; 32]);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    // Every call advanced the counter by exactly one: no sequence
    // number skipped, none duplicated.
    let mut sequences = sequences.lock().unwrap().clone();
    sequences.sort_unstable();

    assert_eq!(sequences, (1u16..=800).collect::<Vec<u16>>());
}

#[test]
fn test_translator_echo_policy_stamps_latest_stream() -> Result<()> {
    let directory = Arc::new(RoutingDirectory::new(None));
    let translator = Translator::new(
        TranslatorOptions {
            ssrc_policy: SsrcPolicy::Echo,
            ..Default::default()
        },
        directory.clone(),
    );

    let ssrcs = Arc::new(Mutex::new(Vec::new()));

    let captured = ssrcs.clone();
    translator.set_reverse_handler(move |bytes| {
        let ssrc = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        captured.lock().unwrap().push(ssrc);
    });

    // Nothing recorded yet: falls back to the fixed gateway SSRC.
    translator.translate_quic_to_rtp(&[0u8; 16]);

    directory.record(0xaaaa, "10.0.0.1:5000".parse()?).block_on()?;
    translator.translate_quic_to_rtp(&[0u8; 16]);

    directory.record(0xbbbb, "10.0.0.2:5000".parse()?).block_on()?;
    translator.translate_quic_to_rtp(&[0u8; 16]);

    assert_eq!(
        ssrcs.lock().unwrap().clone(),
        vec![0x12345678, 0xaaaa, 0xbbbb]
    );

    Ok(())
}

#[test]
fn test_translator_forward_path_is_a_pass_through() {
    let directory = Arc::new(RoutingDirectory::new(None));
    let translator = Translator::new(TranslatorOptions::default(), directory);

    // Dropped without a handler, delivered untouched with one.
    translator.translate_rtp_to_quic(&[1, 2, 3]);

    let payloads = Arc::new(Mutex::new(Vec::new()));

    let captured = payloads.clone();
    translator.set_forward_handler(move |payload| {
        captured.lock().unwrap().push(payload.to_vec());
    });

    translator.translate_rtp_to_quic(&[1, 2, 3]);

    assert_eq!(payloads.lock().unwrap().clone(), vec![vec![1, 2, 3]]);
}

#[test]
fn test_translator_oversized_payload_is_dropped() {
    let directory = Arc::new(RoutingDirectory::new(None));
    let translator = Translator::new(TranslatorOptions::default(), directory);

    let count = Arc::new(Mutex::new(0usize));

    let captured = count.clone();
    translator.set_reverse_handler(move |_| {
        *captured.lock().unwrap() += 1;
    });

    translator.translate_quic_to_rtp(&[0u8; 1489]);
    assert_eq!(*count.lock().unwrap(), 0);

    translator.translate_quic_to_rtp(&[0u8; 1488]);
    assert_eq!(*count.lock().unwrap(), 1);
}
