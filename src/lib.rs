pub mod cache;
pub mod config;
pub mod quic;
pub mod server;
pub mod statistics;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use bytes::Bytes;
use codec::rtp::RtpPacket;
use service::{
    KvStore,
    directory::RoutingDirectory,
    translator::{Translator, TranslatorOptions},
};
use tokio::{sync::mpsc::unbounded_channel, task::JoinSet};

use self::{
    cache::RedisStore,
    config::Config,
    quic::{QuicClient, QuicClientOptions},
    server::{RtpListener, RtpListenerOptions},
    statistics::Statistics,
};

#[rustfmt::skip]
pub(crate) static SOFTWARE: &str = concat!(
    "quic-bridge.",
    env!("CARGO_PKG_VERSION")
);

/// In order to let the integration tests use the gateway crate and
/// start it directly, a function is opened to replace the main
/// function.
pub async fn startup(config: Arc<Config>) -> Result<()> {
    log::info!("{} starting", SOFTWARE);

    let statistics = Statistics::default();

    // The persistent collaborator is optional; without it the routing
    // directory lives in this process only.
    let store: Option<Arc<dyn KvStore>> = match &config.cache {
        Some(cache) => Some(Arc::new(RedisStore::new(&cache.uri).await?)),
        None => None,
    };

    let directory = Arc::new(RoutingDirectory::new(store));
    let translator = Arc::new(Translator::new(
        TranslatorOptions {
            ssrc_policy: config.reverse.ssrc_policy,
            ssrc: config.reverse.ssrc,
            payload_type: config.reverse.payload_type,
            timestamp_increment: config.reverse.timestamp_increment,
        },
        directory.clone(),
    ));

    let quic = Arc::new(QuicClient::new(QuicClientOptions {
        server: config.quic.server,
        server_name: config.quic.server_name(),
        alpn: config.quic.alpn.clone(),
        idle_timeout: Duration::from_secs(config.quic.idle_timeout),
        peer_stream_limit: config.quic.peer_stream_limit,
        ca: config.quic.ca.clone(),
        insecure_skip_verify: config.quic.insecure_skip_verify,
    }));

    quic.initialize().await?;
    quic.start().await?;

    let srtp_key = if config.srtp.enable {
        match config.srtp.key() {
            Some(key) => Some(key),
            None => anyhow::bail!("srtp is enabled but no key material is configured"),
        }
    } else {
        None
    };

    // One listener per port in the configured range. A port that
    // cannot be bound is skipped, it must not keep the others from
    // starting.
    let mut listeners = Vec::with_capacity(config.rtp.port_range.size());
    for port in config.rtp.port_range.iter() {
        let listener = Arc::new(RtpListener::new(RtpListenerOptions {
            srtp_key: srtp_key.clone(),
            mtu: config.rtp.mtu,
            directory: directory.clone(),
            statistics: statistics.clone(),
        })?);

        if let Err(e) = listener.start(config.rtp.listen, port).await {
            log::warn!("port is unavailable: port={}, error={}", port, e);
            continue;
        }

        listeners.push(listener);
    }

    if listeners.is_empty() {
        anyhow::bail!("no rtp listener could be started");
    }

    // RTP to QUIC: listeners strip received packets down to their
    // payloads and hand them to the translator.
    for listener in &listeners {
        let translator = translator.clone();
        listener.set_packet_handler(move |payload, _| {
            translator.translate_rtp_to_quic(payload);
        });
    }

    // QUIC to RTP: inbound buffers are synthesized back into RTP
    // packets by the translator.
    {
        let translator = translator.clone();
        quic.set_data_handler(move |bytes| {
            translator.translate_quic_to_rtp(bytes);
        });
    }

    // The translator handlers run inside reactor callbacks, so both
    // bridge into their network adapter through a channel instead of
    // blocking there.
    let (forward_tx, mut forward_rx) = unbounded_channel::<Bytes>();
    translator.set_forward_handler(move |payload| {
        if forward_tx.send(Bytes::copy_from_slice(payload)).is_err() {
            log::warn!("forward worker is gone, dropping payload: size={}", payload.len());
        }
    });

    let (reverse_tx, mut reverse_rx) = unbounded_channel::<Bytes>();
    translator.set_reverse_handler(move |packet| {
        if reverse_tx.send(Bytes::copy_from_slice(packet)).is_err() {
            log::warn!("reverse worker is gone, dropping packet: size={}", packet.len());
        }
    });

    let mut workers = JoinSet::new();

    {
        let quic = quic.clone();
        workers.spawn(async move {
            while let Some(payload) = forward_rx.recv().await {
                if let Err(e) = quic.send_data(&payload).await {
                    log::warn!("quic send failed: error={}, size={}", e, payload.len());
                }
            }
        });
    }

    {
        let directory = directory.clone();
        // Reverse traffic leaves through the first bound socket.
        let listener = listeners[0].clone();

        workers.spawn(async move {
            while let Some(packet) = reverse_rx.recv().await {
                // The stamped SSRC decides which origin receives the
                // packet; an unroutable packet is dropped, retrying is
                // left to the layers around the gateway.
                let Ok(view) = RtpPacket::decode(&packet) else {
                    continue;
                };

                let entry = match directory.lookup(view.header.ssrc).await {
                    Ok(Some(it)) => it,
                    Ok(None) => {
                        log::warn!(
                            "no route for reverse packet: ssrc={:#010x}",
                            view.header.ssrc
                        );

                        continue;
                    }
                    Err(e) => {
                        log::warn!("routing directory unavailable: error={}", e);
                        continue;
                    }
                };

                if let Err(e) = listener.send_to(&packet, entry.endpoint).await {
                    log::warn!(
                        "reverse send failed: addr={}, error={}",
                        entry.endpoint,
                        e
                    );
                }
            }
        });
    }

    // Run until a shutdown signal arrives or a worker dies.
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("shutdown signal received");
        }
        _ = workers.join_next() => {}
    }

    // Stop order does not matter, every stop is idempotent.
    for listener in &listeners {
        listener.stop();
    }

    quic.stop().await;
    workers.abort_all();

    Ok(())
}
