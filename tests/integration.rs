//! Integration tests against an in-process mock Tor control server.
//!
//! The mock (see `support/mod.rs`) speaks real control-protocol framing, so
//! these tests exercise the full client stack: connection, authentication
//! (including the SAFECOOKIE challenge), configuration round trips, event
//! subscription and reconciliation, onion-service publication, and teardown.

mod support;

use std::sync::Arc;
use std::time::Duration;
use support::{MockTorOptions, MockTorServer, MOCK_SERVICE_ID};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tor_conductor::{
    AddOnionRequest, Event, EventType, KeyAlgo, KeyVal, ListenConf, OnionKey, OnionPort, Signal,
    Tor, TorClient, TorControlError,
};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

async fn client_for(server: &MockTorServer) -> TorClient {
    TorClient::connect(&server.addr.to_string()).await.unwrap()
}

async fn tor_for(server: &MockTorServer) -> Tor {
    Tor::connect(&server.addr.to_string(), "").await.unwrap()
}

// ============================================================================
// Connection & authentication
// ============================================================================

mod authentication {
    use super::*;

    #[tokio::test]
    async fn test_protocol_info() {
        let server = MockTorServer::start().await;
        let client = client_for(&server).await;
        let info = client.protocol_info().await.unwrap();
        assert_eq!(info.auth_methods, vec!["NULL"]);
        assert_eq!(info.tor_version, "0.4.7.10");
        assert_eq!(info.cookie_file, None);
        // Cached: a second call must not hit the wire again.
        let before = server.commands.lock().unwrap().len();
        client.protocol_info().await.unwrap();
        assert_eq!(server.commands.lock().unwrap().len(), before);
    }

    #[tokio::test]
    async fn test_authenticate_null() {
        let server = MockTorServer::start().await;
        let client = client_for(&server).await;
        assert!(!client.is_authenticated());
        client.authenticate("").await.unwrap();
        assert!(client.is_authenticated());
        assert!(server.saw_command("AUTHENTICATE"));
    }

    #[tokio::test]
    async fn test_authenticate_password() {
        let server = MockTorServer::start_with(MockTorOptions {
            auth_methods: "HASHEDPASSWORD".to_string(),
            password: Some("opensesame".to_string()),
            ..Default::default()
        })
        .await;
        let client = client_for(&server).await;
        client.authenticate("opensesame").await.unwrap();
        assert!(client.is_authenticated());
    }

    #[tokio::test]
    async fn test_authenticate_wrong_password() {
        let server = MockTorServer::start_with(MockTorOptions {
            auth_methods: "HASHEDPASSWORD".to_string(),
            password: Some("opensesame".to_string()),
            ..Default::default()
        })
        .await;
        let client = client_for(&server).await;
        let err = client.authenticate("wrong").await.unwrap_err();
        assert!(matches!(
            err,
            TorControlError::CommandRejected { code: 515, .. }
        ));
        assert!(!client.is_authenticated());
    }

    #[tokio::test]
    async fn test_authenticate_safecookie() {
        let cookie: Vec<u8> = (0u8..32).collect();
        let cookie_file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(cookie_file.path(), &cookie).unwrap();
        let server = MockTorServer::start_with(MockTorOptions {
            auth_methods: "COOKIE,SAFECOOKIE".to_string(),
            cookie_file: Some(cookie_file.path().to_path_buf()),
            cookie,
            ..Default::default()
        })
        .await;
        let client = client_for(&server).await;
        client.authenticate("").await.unwrap();
        assert!(client.is_authenticated());
        assert!(server.saw_command("AUTHCHALLENGE SAFECOOKIE"));
    }

    #[tokio::test]
    async fn test_authenticate_safecookie_server_hash_mismatch() {
        let cookie: Vec<u8> = (0u8..32).collect();
        let cookie_file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(cookie_file.path(), &cookie).unwrap();
        let server = MockTorServer::start_with(MockTorOptions {
            auth_methods: "SAFECOOKIE".to_string(),
            cookie_file: Some(cookie_file.path().to_path_buf()),
            cookie,
            corrupt_server_hash: true,
            ..Default::default()
        })
        .await;
        let client = client_for(&server).await;
        let err = client.authenticate("").await.unwrap_err();
        assert!(matches!(err, TorControlError::AuthServerHashMismatch));
        assert!(!client.is_authenticated());
    }

    #[tokio::test]
    async fn test_authenticate_legacy_cookie() {
        let cookie = vec![7u8; 32];
        let cookie_file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(cookie_file.path(), &cookie).unwrap();
        let server = MockTorServer::start_with(MockTorOptions {
            auth_methods: "COOKIE".to_string(),
            cookie_file: Some(cookie_file.path().to_path_buf()),
            cookie,
            ..Default::default()
        })
        .await;
        let client = client_for(&server).await;
        client.authenticate("").await.unwrap();
        assert!(client.is_authenticated());
        assert!(!server.saw_command("AUTHCHALLENGE"));
    }
}

// ============================================================================
// Configuration
// ============================================================================

mod configuration {
    use super::*;

    #[tokio::test]
    async fn test_set_get_reset_conf_round_trip() {
        let server = MockTorServer::start().await;
        let client = client_for(&server).await;
        client.authenticate("").await.unwrap();

        client
            .set_conf(&[
                KeyVal::new("LogMessageDomains", "1"),
                KeyVal::new("ProtocolWarnings", "1"),
            ])
            .await
            .unwrap();

        let entries = client
            .get_conf(&["LogMessageDomains", "ProtocolWarnings"])
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|kv| kv.val == "1"));

        client
            .reset_conf(&[
                KeyVal::new("LogMessageDomains", ""),
                KeyVal::new("ProtocolWarnings", ""),
            ])
            .await
            .unwrap();

        let entries = client
            .get_conf(&["LogMessageDomains", "ProtocolWarnings"])
            .await
            .unwrap();
        assert!(entries.iter().all(|kv| kv.val == "0"));
    }

    #[tokio::test]
    async fn test_get_conf_explicit_empty_value() {
        let server = MockTorServer::start().await;
        let client = client_for(&server).await;
        let entries = client.get_conf(&["ContactInfo"]).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].val, "");
        assert!(entries[0].val_set_and_empty);
        assert!(entries[0].val_set());
    }

    #[tokio::test]
    async fn test_get_conf_unknown_key() {
        let server = MockTorServer::start().await;
        let client = client_for(&server).await;
        let err = client.get_conf(&["NoSuchOption"]).await.unwrap_err();
        assert!(matches!(
            err,
            TorControlError::CommandRejected { code: 552, .. }
        ));
    }

    #[tokio::test]
    async fn test_load_conf_data_block() {
        let server = MockTorServer::start().await;
        let client = client_for(&server).await;
        client
            .load_conf("SocksPort 9050\n.starts-with-dot\n")
            .await
            .unwrap();
        assert!(server.saw_command("+LOADCONF"));
    }

    #[tokio::test]
    async fn test_save_conf() {
        let server = MockTorServer::start().await;
        let client = client_for(&server).await;
        client.save_conf(true).await.unwrap();
        assert!(server.saw_command("SAVECONF FORCE"));
    }
}

// ============================================================================
// Information queries & signals
// ============================================================================

mod information {
    use super::*;

    #[tokio::test]
    async fn test_get_version() {
        let server = MockTorServer::start().await;
        let client = client_for(&server).await;
        let version = client.get_version().await.unwrap();
        assert_eq!((version.major, version.minor), (0, 4));
        assert_eq!(version.version_string, "0.4.7.10");
    }

    #[tokio::test]
    async fn test_get_info_unknown_key() {
        let server = MockTorServer::start().await;
        let client = client_for(&server).await;
        assert!(client.get_info(&["no-such-key"]).await.is_err());
    }

    #[tokio::test]
    async fn test_signals() {
        let server = MockTorServer::start().await;
        let client = client_for(&server).await;
        client.signal(Signal::Heartbeat).await.unwrap();
        client.new_identity().await.unwrap();
        assert!(server.saw_command("SIGNAL HEARTBEAT"));
        assert!(server.saw_command("SIGNAL NEWNYM"));
    }

    #[tokio::test]
    async fn test_map_addresses() {
        let server = MockTorServer::start().await;
        let client = client_for(&server).await;
        let mapped = client
            .map_addresses(&[
                KeyVal::new("1.2.3.4", "torproject.org"),
                KeyVal::new("5.6.7.8", "example.com"),
            ])
            .await
            .unwrap();
        assert_eq!(mapped.len(), 2);
        assert_eq!(mapped[0], KeyVal::new("1.2.3.4", "torproject.org"));
        assert_eq!(mapped[1], KeyVal::new("5.6.7.8", "example.com"));
    }
}

// ============================================================================
// Events
// ============================================================================

mod events {
    use super::*;

    #[tokio::test]
    async fn test_set_events_reconciliation() {
        let server = MockTorServer::start().await;
        let client = client_for(&server).await;
        let (tx1, _rx1) = tokio::sync::mpsc::channel(8);
        let (tx2, _rx2) = tokio::sync::mpsc::channel(8);

        client
            .add_event_listener(tx1.clone(), &[EventType::Circuit, EventType::AddrMap])
            .await
            .unwrap();
        assert_eq!(
            server.last_set_events().unwrap(),
            "SETEVENTS ADDRMAP CIRC"
        );

        client
            .add_event_listener(tx2.clone(), &[EventType::Circuit])
            .await
            .unwrap();
        assert_eq!(
            server.last_set_events().unwrap(),
            "SETEVENTS ADDRMAP CIRC"
        );

        client
            .remove_event_listener(&tx1, &[EventType::AddrMap])
            .await
            .unwrap();
        assert_eq!(server.last_set_events().unwrap(), "SETEVENTS CIRC");

        client
            .remove_event_listener(&tx1, &[EventType::Circuit])
            .await
            .unwrap();
        client
            .remove_event_listener(&tx2, &[EventType::Circuit])
            .await
            .unwrap();
        assert_eq!(server.last_set_events().unwrap(), "SETEVENTS");
        assert!(client.subscribed_events().is_empty());
    }

    #[tokio::test]
    async fn test_event_wait_for_bandwidth() {
        let server = MockTorServer::start().await;
        let client = Arc::new(client_for(&server).await);
        let cancel = CancellationToken::new();
        let event = timeout(
            TEST_TIMEOUT,
            client.event_wait(&[EventType::Bandwidth], &cancel, |event| {
                Ok(matches!(event, Event::Bandwidth(_)))
            }),
        )
        .await
        .unwrap()
        .unwrap();
        match event {
            Event::Bandwidth(bw) => {
                assert_eq!(bw.bytes_read, 1024);
                assert_eq!(bw.bytes_written, 2048);
            }
            other => panic!("Expected Bandwidth event, got {:?}", other),
        }
        // The wait must have unsubscribed on its way out.
        assert_eq!(server.last_set_events().unwrap(), "SETEVENTS");
    }

    #[tokio::test]
    async fn test_async_chan_receives_raw_events() {
        let server = MockTorServer::start().await;
        let client = Arc::new(client_for(&server).await);
        let (raw_tx, mut raw_rx) = tokio::sync::mpsc::channel(8);
        client.add_async_chan(raw_tx);

        // Subscribing triggers the mock's canned BW event; pump it.
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        client
            .add_event_listener(tx, &[EventType::Bandwidth])
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let pump = {
            let client = client.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { client.handle_events(cancel).await })
        };

        let raw = timeout(TEST_TIMEOUT, raw_rx.recv()).await.unwrap().unwrap();
        assert!(raw.is_async());
        assert_eq!(raw.reply, "BW 1024 2048");

        cancel.cancel();
        timeout(TEST_TIMEOUT, pump).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_event_wait_predicate_error() {
        let server = MockTorServer::start().await;
        let client = Arc::new(client_for(&server).await);
        let cancel = CancellationToken::new();
        let err = timeout(
            TEST_TIMEOUT,
            client.event_wait(&[EventType::Bandwidth], &cancel, |_| {
                Err(TorControlError::InvalidArgument("nope".to_string()))
            }),
        )
        .await
        .unwrap()
        .unwrap_err();
        assert!(matches!(err, TorControlError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_event_wait_cancellation() {
        let server = MockTorServer::start().await;
        let client = Arc::new(client_for(&server).await);
        let cancel = CancellationToken::new();
        cancel.cancel();
        // Subscribe to a code the mock never fires; cancellation must end it.
        let err = timeout(
            TEST_TIMEOUT,
            client.event_wait(&[EventType::Guard], &cancel, |_| Ok(true)),
        )
        .await
        .unwrap()
        .unwrap_err();
        assert!(matches!(err, TorControlError::Cancelled));
    }
}

// ============================================================================
// Onion services
// ============================================================================

mod onion_services {
    use super::*;

    #[tokio::test]
    async fn test_add_and_del_onion() {
        let server = MockTorServer::start().await;
        let client = client_for(&server).await;
        let resp = client
            .add_onion(&AddOnionRequest::new(
                OnionKey::Generate(KeyAlgo::Ed25519V3),
                vec![OnionPort::new(80, Some("127.0.0.1:8080"))],
            ))
            .await
            .unwrap();
        assert_eq!(resp.service_id, MOCK_SERVICE_ID);
        assert!(matches!(resp.key, Some(OnionKey::Ed25519(_))));
        client.del_onion(&resp.service_id).await.unwrap();
        assert!(server.saw_command(&format!("DELONION {}", MOCK_SERVICE_ID)));
    }

    #[tokio::test]
    async fn test_add_onion_discard_pk() {
        let server = MockTorServer::start().await;
        let client = client_for(&server).await;
        let mut req = AddOnionRequest::new(
            OnionKey::Generate(KeyAlgo::Ed25519V3),
            vec![OnionPort::new(80, Some("127.0.0.1:8080"))],
        );
        req.flags.push("DiscardPK".to_string());
        let resp = client.add_onion(&req).await.unwrap();
        assert_eq!(resp.service_id, MOCK_SERVICE_ID);
        assert!(resp.key.is_none());
    }

    #[tokio::test]
    async fn test_listen_publishes_and_serves() {
        let server = MockTorServer::start().await;
        let tor = tor_for(&server).await;
        let cancel = CancellationToken::new();
        let mut onion = timeout(
            TEST_TIMEOUT,
            tor.listen(
                &cancel,
                ListenConf {
                    remote_ports: vec![80],
                    discard_key: true,
                    ..Default::default()
                },
            ),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(onion.id, MOCK_SERVICE_ID);
        assert_eq!(onion.remote_ports, vec![80]);
        assert_eq!(
            onion.onion_addr(),
            format!("{}.onion:80", MOCK_SERVICE_ID)
        );
        // The network was enabled for publication.
        assert!(server.saw_command("SETCONF DisableNetwork=0"));

        // The local accept side works: connect and exchange a byte.
        let local_port = {
            let addonion = server
                .commands
                .lock()
                .unwrap()
                .iter()
                .find(|c| c.starts_with("ADDONION"))
                .cloned()
                .unwrap();
            let port_arg = addonion
                .split_whitespace()
                .find(|t| t.starts_with("Port="))
                .unwrap()
                .to_string();
            let target = port_arg.split_once(',').unwrap().1.to_string();
            target.rsplit_once(':').unwrap().1.parse::<u16>().unwrap()
        };
        let mut outbound = tokio::net::TcpStream::connect(("127.0.0.1", local_port))
            .await
            .unwrap();
        let mut inbound = onion.accept().await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut outbound, b"x")
            .await
            .unwrap();
        let mut byte = [0u8; 1];
        tokio::io::AsyncReadExt::read_exact(&mut inbound, &mut byte)
            .await
            .unwrap();
        assert_eq!(&byte, b"x");

        onion.close().await.unwrap();
        assert!(server.saw_command("DELONION"));
    }

    #[tokio::test]
    async fn test_listen_fails_when_all_uploads_fail() {
        let server = MockTorServer::start_with(MockTorOptions {
            fail_hs_uploads: true,
            ..Default::default()
        })
        .await;
        let tor = tor_for(&server).await;
        let cancel = CancellationToken::new();
        let err = timeout(
            TEST_TIMEOUT,
            tor.listen(
                &cancel,
                ListenConf {
                    remote_ports: vec![80],
                    ..Default::default()
                },
            ),
        )
        .await
        .unwrap()
        .unwrap_err();
        match err {
            TorControlError::PublicationFailed(reasons) => {
                assert_eq!(reasons.len(), 2);
                assert!(reasons.iter().all(|r| r.contains("UPLOAD_REJECTED")));
            }
            other => panic!("Expected PublicationFailed, got {:?}", other),
        }
        // The failed service was torn down.
        assert!(server.saw_command("DELONION"));
    }

    #[tokio::test]
    async fn test_listen_no_wait_skips_publication() {
        let server = MockTorServer::start().await;
        let tor = tor_for(&server).await;
        let cancel = CancellationToken::new();
        let mut onion = tor
            .listen(
                &cancel,
                ListenConf {
                    remote_ports: vec![80],
                    no_wait: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!server.saw_command("SETCONF DisableNetwork=0"));
        onion.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_forward() {
        let server = MockTorServer::start().await;
        let tor = tor_for(&server).await;
        let cancel = CancellationToken::new();
        let mut conf = tor_conductor::ForwardConf {
            no_wait: true,
            ..Default::default()
        };
        conf.port_forwards
            .insert("127.0.0.1:8080".to_string(), vec![80, 8080]);
        let mut fwd = tor.forward(&cancel, conf).await.unwrap();
        assert_eq!(fwd.onion_addr(), format!("{}.onion", MOCK_SERVICE_ID));
        assert!(server.saw_command("ADDONION"));
        fwd.close().await.unwrap();
        assert!(server.saw_command("DELONION"));
    }
}

// ============================================================================
// Dialer
// ============================================================================

mod dialer {
    use super::*;

    #[tokio::test]
    async fn test_dialer_resolves_socks_address() {
        let server = MockTorServer::start().await;
        let tor = tor_for(&server).await;
        let dialer = tor.dialer(None).await.unwrap();
        assert_eq!(dialer.proxy_address(), "127.0.0.1:9050");
    }

    #[tokio::test]
    async fn test_dialer_with_explicit_address() {
        let server = MockTorServer::start().await;
        let tor = tor_for(&server).await;
        let dialer = tor
            .dialer(Some(tor_conductor::DialConf {
                proxy_address: Some("127.0.0.1:19050".to_string()),
                proxy_auth: Some(tor_conductor::ProxyAuth::new("iso", "creds")),
            }))
            .await
            .unwrap();
        assert_eq!(dialer.proxy_address(), "127.0.0.1:19050");
        // No GETINFO needed when the address is explicit.
        assert!(!server.saw_command("GETINFO net/listeners/socks"));
    }
}

// ============================================================================
// Teardown
// ============================================================================

mod teardown {
    use super::*;

    #[tokio::test]
    async fn test_close_sends_quit() {
        let server = MockTorServer::start().await;
        let mut tor = tor_for(&server).await;
        tor.close().await.unwrap();
        assert!(server.saw_command("QUIT"));
        // An attached Tor is never halted.
        assert!(!server.saw_command("SIGNAL HALT"));
        assert!(tor.control().is_err());
        // Close is idempotent.
        tor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_client_close_unblocks_async_consumers() {
        let server = MockTorServer::start().await;
        let client = client_for(&server).await;
        let (tx, mut rx) = tokio::sync::mpsc::channel::<tor_conductor::Reply>(1);
        client.add_async_chan(tx);
        client.close().await.unwrap();
        // Our sender was dropped by close, so the channel reports closed.
        assert!(timeout(TEST_TIMEOUT, rx.recv()).await.unwrap().is_none());
    }
}
