//! Integration tests for pairing-wallet
//!
//! These tests drive the public API end to end:
//! - Session lifecycle through the coordinator and the loopback wallet
//! - Transfers and message signing through an approved session
//! - Chain RPC reads against a mock node
//! - Amount conversion

use pairing_wallet::{
    coordinator::{CoordinatorConfig, CoordinatorState, SessionCoordinator},
    error::WalletError,
    pairing::{loopback::LoopbackPairingClient, loopback::LoopbackWallet, DisconnectReason, PairingUri},
    rpc::{ChainRpcClient, FALLBACK_BALANCE},
    session::Metadata,
    submitter::{is_valid_address, TransactionSubmitter},
    units::{format_ether, format_ether_display, parse_ether},
};
use primitive_types::U256;
use serde_json::json;
use std::{sync::Arc, time::Duration};

const WALLET_ADDRESS: &str = "0x71C7656EC7ab88b098defB751B7401B5f6d8976F";
const RECIPIENT: &str = "0x8ba1f109551bD432803012645Ac136ddd64DBA72";

fn app_metadata() -> Metadata {
    Metadata {
        name: "Integration Test App".to_string(),
        description: "Drives the coordinator".to_string(),
        url: "https://example.com".to_string(),
        icons: vec![],
    }
}

fn setup(
    approval_timeout: Duration,
) -> (Arc<SessionCoordinator<LoopbackPairingClient>>, LoopbackWallet) {
    let (client, wallet) = LoopbackPairingClient::new(
        Metadata {
            name: "Loopback Wallet".to_string(),
            ..Default::default()
        },
        vec![WALLET_ADDRESS.to_string()],
    );
    let config =
        CoordinatorConfig::new("integration", app_metadata()).with_approval_timeout(approval_timeout);
    (Arc::new(SessionCoordinator::new(Arc::new(client), config)), wallet)
}

fn ether(n: u64) -> U256 {
    U256::from(n) * U256::exp10(18)
}

// ============================================================================
// Session Lifecycle Tests
// ============================================================================

mod session_lifecycle {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_connect_approve_after_two_seconds_then_disconnect() {
        let (coordinator, wallet) = setup(Duration::from_secs(300));
        let start = tokio::time::Instant::now();

        // 1. Initialize
        assert_eq!(coordinator.initialize().await.unwrap(), CoordinatorState::Ready);

        // 2. Connect yields a pairing URI
        let proposal = coordinator.connect_default().await.unwrap();
        let uri = PairingUri::parse(&proposal.uri).unwrap();
        assert_eq!(uri.relay_protocol, "irn");

        // 3. Wallet approves after 2s
        wallet.approve_after(Duration::from_secs(2));
        let session = coordinator.await_approval().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(300));

        // 4. Exactly one account, on mainnet
        let accounts = session.accounts();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].address, WALLET_ADDRESS);
        assert_eq!(accounts[0].chain_id(), "eip155:1");
        assert_eq!(session.peer.name, "Loopback Wallet");
        assert_eq!(coordinator.state(), CoordinatorState::Connected);

        // 5. Disconnect returns to Ready
        coordinator
            .disconnect(DisconnectReason::user_disconnected())
            .await
            .unwrap();
        assert_eq!(coordinator.state(), CoordinatorState::Ready);
        assert!(coordinator.session().is_none());
        assert!(wallet.sessions().is_empty());

        // A new connection may follow
        coordinator.connect_default().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_connect_is_in_flight() {
        let (coordinator, _wallet) = setup(Duration::from_secs(300));
        coordinator.initialize().await.unwrap();

        let first = coordinator.connect_default().await.unwrap();
        let err = coordinator.connect_default().await.unwrap_err();
        assert!(matches!(err, WalletError::ProposalInFlight));

        // The first proposal is untouched
        assert_eq!(coordinator.state(), CoordinatorState::Proposing);
        assert_eq!(coordinator.snapshot().pending_uri, Some(first.uri));
    }

    #[tokio::test]
    async fn test_connect_while_awaiting_is_in_flight() {
        let (coordinator, wallet) = setup(Duration::from_secs(300));
        coordinator.initialize().await.unwrap();
        coordinator.connect_default().await.unwrap();

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.await_approval().await })
        };
        let mut snapshots = coordinator.subscribe();
        snapshots
            .wait_for(|s| s.state == CoordinatorState::AwaitingApproval)
            .await
            .unwrap();

        let err = coordinator.connect_default().await.unwrap_err();
        assert!(matches!(err, WalletError::ProposalInFlight));

        wallet.approve().unwrap();
        waiter.await.unwrap().unwrap();
        assert_eq!(coordinator.state(), CoordinatorState::Connected);
    }

    #[tokio::test]
    async fn test_proposal_ids_increase() {
        let (coordinator, wallet) = setup(Duration::from_secs(300));
        coordinator.initialize().await.unwrap();

        let first = coordinator.connect_default().await.unwrap();
        wallet.reject("no").unwrap();
        assert!(coordinator.await_approval().await.is_err());

        let second = coordinator.connect_default().await.unwrap();
        assert!(second.id > first.id);
        assert_ne!(second.uri, first.uri);
    }

    #[tokio::test]
    async fn test_session_delete_event() {
        let (coordinator, wallet) = setup(Duration::from_secs(300));
        coordinator.initialize().await.unwrap();
        coordinator.connect_default().await.unwrap();
        wallet.approve().unwrap();
        let session = coordinator.await_approval().await.unwrap();

        let mut snapshots = coordinator.subscribe();
        wallet.delete_session(&session.topic).unwrap();
        snapshots
            .wait_for(|s| s.state == CoordinatorState::Ready)
            .await
            .unwrap();

        assert!(coordinator.session().is_none());
        assert_eq!(coordinator.state(), CoordinatorState::Ready);
    }

    #[tokio::test]
    async fn test_events_for_other_topics_are_ignored() {
        let (coordinator, wallet) = setup(Duration::from_secs(300));
        coordinator.initialize().await.unwrap();
        coordinator.connect_default().await.unwrap();
        wallet.approve().unwrap();
        let session = coordinator.await_approval().await.unwrap();

        // A second, unrelated session on the wallet side
        wallet.restore_session(pairing_wallet::session::Session {
            topic: "other".to_string(),
            ..(*session).clone()
        });
        wallet.emit_event(&session.topic, "eip155:1", "chainChanged", json!(1));
        wallet.delete_session("other").unwrap();

        // Follow with a matching update so there is something to wait for
        let mut namespaces = session.namespaces.clone();
        namespaces.get_mut("eip155").unwrap().events.push("message".to_string());
        let mut snapshots = coordinator.subscribe();
        wallet.update_session(&session.topic, namespaces).unwrap();
        snapshots.changed().await.unwrap();

        let current = coordinator.session().unwrap();
        assert_eq!(current.topic, session.topic);
        assert!(current.namespaces["eip155"].events.contains(&"message".to_string()));
        assert_eq!(coordinator.state(), CoordinatorState::Connected);
    }

    #[tokio::test]
    async fn test_rejected_proposal() {
        let (coordinator, wallet) = setup(Duration::from_secs(300));
        coordinator.initialize().await.unwrap();
        coordinator.connect_default().await.unwrap();

        wallet.reject("User rejected").unwrap();
        let err = coordinator.await_approval().await.unwrap_err();
        assert!(matches!(err, WalletError::WalletRejected(_)));
        assert_eq!(coordinator.state(), CoordinatorState::Ready);
        assert!(coordinator.session().is_none());
    }

    #[tokio::test]
    async fn test_restore_then_shutdown_then_restore() {
        let (client, wallet) = LoopbackPairingClient::new(Metadata::default(), vec![WALLET_ADDRESS.to_string()]);
        let client = Arc::new(client);
        let config = CoordinatorConfig::new("integration", app_metadata());

        let first = SessionCoordinator::new(client.clone(), config.clone());
        first.initialize().await.unwrap();
        first.connect_default().await.unwrap();
        wallet.approve().unwrap();
        let session = first.await_approval().await.unwrap();

        first.shutdown().await;
        assert_eq!(first.state(), CoordinatorState::Disconnected);
        assert!(first.session().is_none());

        // The pairing client kept the session
        let second = SessionCoordinator::new(client, config);
        assert_eq!(second.initialize().await.unwrap(), CoordinatorState::Connected);
        assert_eq!(second.session().unwrap().topic, session.topic);
    }
}

// ============================================================================
// Abandoned Approval Tests
// ============================================================================

mod abandoned_approval {
    use super::*;

    #[tokio::test]
    async fn test_cancelled_wait_discards_late_approval() {
        let (coordinator, wallet) = setup(Duration::from_secs(300));
        coordinator.initialize().await.unwrap();
        coordinator.connect_default().await.unwrap();

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.await_approval().await })
        };
        let mut snapshots = coordinator.subscribe();
        snapshots
            .wait_for(|s| s.state == CoordinatorState::AwaitingApproval)
            .await
            .unwrap();

        assert!(coordinator.cancel_proposal().await);
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, WalletError::ProposalCancelled));

        // The wallet answers too late
        assert!(wallet.approve().is_err());
        assert!(coordinator.session().is_none());
        assert_eq!(coordinator.state(), CoordinatorState::Ready);
        assert!(wallet.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_new_proposal_after_cancel_can_be_approved() {
        let (coordinator, wallet) = setup(Duration::from_secs(300));
        coordinator.initialize().await.unwrap();
        coordinator.connect_default().await.unwrap();
        assert!(coordinator.cancel_proposal().await);

        coordinator.connect_default().await.unwrap();
        assert_eq!(wallet.pending_proposals(), 1);
        wallet.approve().unwrap();

        let session = coordinator.await_approval().await.unwrap();
        assert_eq!(session.primary_address().as_deref(), Some(WALLET_ADDRESS));
        assert_eq!(coordinator.state(), CoordinatorState::Connected);
        assert_eq!(wallet.pending_proposals(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_proposal_discards_late_approval() {
        let (coordinator, wallet) = setup(Duration::from_secs(10));
        coordinator.initialize().await.unwrap();
        coordinator.connect_default().await.unwrap();

        let late = wallet.approve_after(Duration::from_secs(30));
        let err = coordinator.await_approval().await.unwrap_err();
        assert!(matches!(err, WalletError::ProposalExpired));
        assert_eq!(coordinator.state(), CoordinatorState::Ready);

        assert!(late.await.unwrap().is_err());
        assert!(coordinator.session().is_none());
        assert_eq!(coordinator.state(), CoordinatorState::Ready);
    }

    #[tokio::test]
    async fn test_shutdown_while_waiting() {
        let (coordinator, wallet) = setup(Duration::from_secs(300));
        coordinator.initialize().await.unwrap();
        coordinator.connect_default().await.unwrap();

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.await_approval().await })
        };
        let mut snapshots = coordinator.subscribe();
        snapshots
            .wait_for(|s| s.state == CoordinatorState::AwaitingApproval)
            .await
            .unwrap();

        coordinator.shutdown().await;
        assert!(waiter.await.unwrap().is_err());
        assert_eq!(coordinator.state(), CoordinatorState::Disconnected);
        assert!(wallet.approve().is_err());
        assert_eq!(wallet.live_subscribers(), 0);
    }
}

// ============================================================================
// Transaction Submission Tests
// ============================================================================

mod submission {
    use super::*;

    async fn connected() -> (
        Arc<SessionCoordinator<LoopbackPairingClient>>,
        LoopbackWallet,
        TransactionSubmitter<LoopbackPairingClient>,
    ) {
        let (coordinator, wallet) = setup(Duration::from_secs(300));
        coordinator.initialize().await.unwrap();
        coordinator.connect_default().await.unwrap();
        wallet.approve().unwrap();
        coordinator.await_approval().await.unwrap();
        let submitter = TransactionSubmitter::new(coordinator.client(), "eip155:1");
        (coordinator, wallet, submitter)
    }

    #[tokio::test]
    async fn test_send_through_session() {
        let (coordinator, wallet, submitter) = connected().await;
        let session = coordinator.session();

        let hash = submitter
            .send(session.as_deref(), WALLET_ADDRESS, RECIPIENT, "0.25", ether(1))
            .await
            .unwrap();
        assert!(hash.starts_with("0x"));

        let requests = wallet.requests();
        assert_eq!(requests.len(), 1);
        let tx = &requests[0].request.params[0];
        assert_eq!(tx["from"], WALLET_ADDRESS);
        assert_eq!(tx["to"], RECIPIENT);
        assert_eq!(tx["value"], "0x3782dace9d90000");
        assert_eq!(tx["gas"], "0x5208");
    }

    #[tokio::test]
    async fn test_insufficient_balance_issues_no_request() {
        let (coordinator, wallet, submitter) = connected().await;
        let session = coordinator.session();

        for amount in ["1.5", "2", "1.000000000000000001"] {
            let err = submitter
                .send(session.as_deref(), WALLET_ADDRESS, RECIPIENT, amount, ether(1))
                .await
                .unwrap_err();
            assert!(matches!(err, WalletError::InsufficientBalance { .. }), "{}", amount);
        }
        assert!(wallet.requests().is_empty());
    }

    #[tokio::test]
    async fn test_send_after_disconnect() {
        let (coordinator, wallet, submitter) = connected().await;
        coordinator.disconnect(DisconnectReason::default()).await.unwrap();

        let err = submitter
            .send(coordinator.session().as_deref(), WALLET_ADDRESS, RECIPIENT, "0.1", ether(1))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::NoActiveSession));
        assert!(wallet.requests().is_empty());
    }

    #[tokio::test]
    async fn test_wallet_refuses_transfer() {
        let (coordinator, wallet, submitter) = connected().await;
        wallet.reject_next_request("User rejected the request");

        let err = submitter
            .send(coordinator.session().as_deref(), WALLET_ADDRESS, RECIPIENT, "0.1", ether(1))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::WalletRejected(_)));
        // Session survives a refusal
        assert_eq!(coordinator.state(), CoordinatorState::Connected);
    }

    #[tokio::test]
    async fn test_sign_message() {
        let (coordinator, wallet, submitter) = connected().await;
        let signature = submitter
            .sign_message(coordinator.session().as_deref(), WALLET_ADDRESS, "hello")
            .await
            .unwrap();
        assert!(signature.starts_with("0x"));
        assert_eq!(wallet.requests()[0].request.params, json!(["hello", WALLET_ADDRESS]));
    }

    #[test]
    fn test_address_property() {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let bytes: [u8; 20] = rng.gen();
            let address = format!("0x{}", hex::encode(bytes));
            assert!(is_valid_address(&address));
            assert!(is_valid_address(&address.to_uppercase().replacen("0X", "0x", 1)));

            // One character short or long, or missing the prefix
            assert!(!is_valid_address(&address[..41]));
            assert!(!is_valid_address(&format!("{}a", address)));
            assert!(!is_valid_address(&address[2..]));
            assert!(!is_valid_address(&address.replacen('0', "g", 2)));
        }
    }
}

// ============================================================================
// Chain RPC Tests
// ============================================================================

mod chain_rpc {
    use super::*;
    use wiremock::{
        matchers::{body_partial_json, method},
        Mock, MockServer, ResponseTemplate,
    };

    async fn mock_result(server: &MockServer, rpc_method: &str, result: serde_json::Value) {
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"jsonrpc": "2.0", "method": rpc_method})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": result})),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_get_balance() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "eth_getBalance",
                "params": [WALLET_ADDRESS, "latest"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": "0x1bc16d674ec80000"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let rpc = ChainRpcClient::new(server.uri()).unwrap();
        let balance = rpc.get_balance(WALLET_ADDRESS).await.unwrap();
        assert_eq!(balance.wei, ether(2));
        assert_eq!(balance.formatted, "2.0000");
    }

    #[tokio::test]
    async fn test_gas_price_nonce_and_chain_id() {
        let server = MockServer::start().await;
        mock_result(&server, "eth_gasPrice", json!("0x6fc23ac00")).await;
        mock_result(&server, "eth_getTransactionCount", json!("0x2a")).await;
        mock_result(&server, "eth_chainId", json!("0x1")).await;

        let rpc = ChainRpcClient::new(server.uri()).unwrap();
        assert_eq!(rpc.get_gas_price().await.unwrap(), U256::from(30_000_000_000u64));
        assert_eq!(rpc.get_transaction_count(WALLET_ADDRESS).await.unwrap(), 42);
        assert_eq!(rpc.chain_id().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_json_rpc_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": -32000, "message": "header not found"}
            })))
            .mount(&server)
            .await;

        let rpc = ChainRpcClient::new(server.uri()).unwrap();
        match rpc.get_balance(WALLET_ADDRESS).await.unwrap_err() {
            WalletError::RpcError(msg) => assert!(msg.contains("header not found")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_http_error_and_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let rpc = ChainRpcClient::new(server.uri()).unwrap();
        assert!(matches!(
            rpc.get_gas_price().await.unwrap_err(),
            WalletError::RpcError(_)
        ));
        assert_eq!(rpc.balance_or_fallback(WALLET_ADDRESS).await, FALLBACK_BALANCE);
    }

    #[tokio::test]
    async fn test_malformed_result() {
        let server = MockServer::start().await;
        mock_result(&server, "eth_getBalance", json!("lots")).await;
        mock_result(&server, "eth_gasPrice", json!(12)).await;

        let rpc = ChainRpcClient::new(server.uri()).unwrap();
        assert!(matches!(
            rpc.get_balance(WALLET_ADDRESS).await.unwrap_err(),
            WalletError::RpcError(_)
        ));
        assert!(matches!(
            rpc.get_gas_price().await.unwrap_err(),
            WalletError::RpcError(_)
        ));
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": "0x0"}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let rpc = ChainRpcClient::with_timeout(server.uri(), Duration::from_millis(200)).unwrap();
        match rpc.get_gas_price().await.unwrap_err() {
            WalletError::RpcError(msg) => assert!(msg.contains("timed out")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

// ============================================================================
// Amount Conversion Tests
// ============================================================================

mod amounts {
    use super::*;

    #[test]
    fn test_round_trip_through_base_units() {
        for wei in [
            U256::zero(),
            U256::one(),
            U256::from(123_456_789u64),
            ether(1),
            ether(1_000_000) + U256::from(7u64),
        ] {
            assert_eq!(parse_ether(&format_ether(wei)).unwrap(), wei);
        }
    }

    #[test]
    fn test_display_uses_four_decimals() {
        assert_eq!(format_ether_display(parse_ether("0.123449").unwrap()), "0.1234");
        assert_eq!(format_ether_display(parse_ether("0.12345").unwrap()), "0.1235");
        assert_eq!(format_ether_display(U256::zero()), FALLBACK_BALANCE);
    }
}
