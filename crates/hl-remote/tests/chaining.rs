//! Session lifecycle and sessions chained through tunnels

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncReadExt;

use hl_core::testing::{self, MockConnector, MockTransport};
use hl_core::{CommandError, Credentials, HlError, Transport, TransportError};
use hl_remote::{ForwardRequest, SessionBuilder, StateMode};

#[tokio::test]
async fn test_connect_seeds_state() {
    let hop = Arc::new(MockTransport::new("box"));
    let session = SessionBuilder::new(hop.clone(), Arc::new(MockConnector::new())).build();
    assert!(!session.is_connected());

    session.connect().await.unwrap();
    assert!(session.is_connected());
    assert_eq!(hop.connect_calls(), 1);
    assert_eq!(session.state().uid(), Some(1000));
    assert_eq!(session.state().cwd(), "/home/test");
    assert!(session.state().has_sudo());

    assert!(matches!(session.ensure_root(), Err(HlError::PermissionDenied(_))));
    assert!(session.ensure_sudo().is_ok());

    // Already connected hops are not dialed again
    session.connect().await.unwrap();
    assert_eq!(hop.connect_calls(), 1);
}

#[tokio::test]
async fn test_connect_as_root_without_sudo() {
    let hop = Arc::new(MockTransport::new("box"));
    hop.respond("id -u", "0\n", "", 0);
    hop.respond("sudo -n true", "", "sudo: a password is required\n", 1);
    let session = SessionBuilder::new(hop, Arc::new(MockConnector::new())).build();

    session.connect().await.unwrap();
    assert!(session.ensure_root().is_ok());
    assert!(matches!(session.ensure_sudo(), Err(HlError::PermissionDenied(_))));
}

#[tokio::test]
async fn test_execute_applies_state() {
    let (session, hop, _) = common::session("box");
    session.state().set_cwd("/srv");
    session.state().env_set("RUST_LOG", "debug");

    session.execute("ls").await.unwrap();

    let (command, ctx) = hop.executed().pop().unwrap();
    assert_eq!(command, "ls");
    assert_eq!(ctx.cwd, "/srv");
    assert_eq!(ctx.env.get("RUST_LOG").map(String::as_str), Some("debug"));
}

#[tokio::test]
async fn test_run_maps_failures() {
    let (session, hop, _) = common::session("box");
    hop.respond("cat /etc/shadow", "", "cat: /etc/shadow: Permission denied\n", 1);
    hop.respond("stat /nope", "", "stat: cannot stat '/nope': No such file or directory\n", 1);

    let err = session.run("cat /etc/shadow").await.unwrap_err();
    assert!(matches!(err, HlError::Command(CommandError::PermissionDenied(_))));

    let err = session.run("stat /nope").await.unwrap_err();
    match err {
        HlError::Command(CommandError::NotFound(result)) => assert_eq!(result.exit_code, 1),
        other => panic!("unexpected error: {other}"),
    }

    let ok = session.run("true").await.unwrap();
    assert!(ok.success());
}

#[tokio::test]
async fn test_capabilities() {
    let (session, _, _) = common::session("box");
    let caps = session.capabilities();
    assert!(caps.has_protocol("ssh"));
    assert!(caps.has_action("connect_tunnel"));
    assert!(!caps.has_protocol("winrm"));

    assert!(session.protocol("ssh").is_ok());
    assert!(matches!(
        session.protocol("winrm"),
        Err(HlError::ProtocolNotAvailable(name)) if name == "winrm"
    ));
}

#[tokio::test]
async fn test_invalid_hop_index() {
    let (session, _, _) = common::session("box");
    let err = session.execute_on(3, "ls").await.unwrap_err();
    assert!(matches!(err, TransportError::InvalidHop { index: 3, depth: 1 }));
}

#[tokio::test]
async fn test_connect_tunnel_builds_deeper_session() {
    let (bastion, hop, connector) = common::session("bastion");
    common::auth_destinations(&hop, "hunter2");

    let tunnel = bastion.tunnels().forward(0, "10.0.0.8", 22).await.unwrap();
    let inner = bastion
        .tunnels()
        .connect_tunnel(&tunnel, Credentials::password("ops", "hunter2"), StateMode::Forked)
        .await
        .unwrap();

    assert_eq!(inner.depth(), 2);
    assert_eq!(bastion.depth(), 1);
    assert!(inner.is_connected());

    let hops = inner.hops();
    assert_eq!(hops[0].host, "bastion");
    assert_eq!(hops[1].host, "10.0.0.8");
    assert_eq!(hops[1].port, 22);
    assert_eq!(hops[1].user, "ops");

    assert!(inner.parent().unwrap().ptr_eq(&bastion));
    let children = bastion.children();
    assert_eq!(children.len(), 1);
    assert!(children[0].ptr_eq(&inner));

    // Commands go to the new hop, the parent's hop stays reachable
    let created = connector.created();
    assert_eq!(created.len(), 1);
    inner.execute("hostname").await.unwrap();
    assert_eq!(created[0].executed().last().unwrap().0, "hostname");
    inner.execute_on(0, "uptime").await.unwrap();
    assert_eq!(hop.executed().last().unwrap().0, "uptime");
}

#[tokio::test]
async fn test_connect_tunnel_bad_credentials() {
    let (bastion, hop, connector) = common::session("bastion");
    common::auth_destinations(&hop, "hunter2");

    let tunnel = bastion.tunnels().forward(0, "10.0.0.8", 22).await.unwrap();
    let err = bastion
        .tunnels()
        .connect_tunnel(&tunnel, Credentials::password("ops", "wrong"), StateMode::Shared)
        .await
        .unwrap_err();

    match err {
        TransportError::AuthenticationError { user, host } => {
            assert_eq!(user, "ops");
            assert_eq!(host, "10.0.0.8");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(bastion.depth(), 1);
    assert!(bastion.children().is_empty());
    assert!(connector.created().is_empty());
    assert!(tunnel.is_running());
}

#[tokio::test]
async fn test_connect_tunnel_over_severed_hop() {
    let (bastion, hop, _) = common::session("bastion");
    common::auth_destinations(&hop, "hunter2");

    let tunnel = bastion.tunnels().forward(0, "10.0.0.8", 22).await.unwrap();
    hop.sever();

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        bastion.tunnels().connect_tunnel(
            &tunnel,
            Credentials::password("ops", "hunter2"),
            StateMode::Shared,
        ),
    )
    .await
    .expect("connect_tunnel hung on a dead hop")
    .unwrap_err();
    assert!(matches!(err, TransportError::ConnectionUnavailable(_)));
    assert_eq!(bastion.depth(), 1);
}

#[tokio::test]
async fn test_connect_tunnel_on_stopped_tunnel() {
    let (bastion, hop, _) = common::session("bastion");
    common::auth_destinations(&hop, "hunter2");

    let tunnel = bastion.tunnels().forward(0, "10.0.0.8", 22).await.unwrap();
    bastion.tunnels().stop(&tunnel);

    let err = bastion
        .tunnels()
        .connect_tunnel(&tunnel, Credentials::password("ops", "hunter2"), StateMode::Shared)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::ConnectionUnavailable(_)));
}

#[tokio::test]
async fn test_connect_tunnel_handshake_timeout() {
    let mut config = common::fast_config();
    config.handshake_timeout = Duration::from_millis(200);
    let (bastion, hop, _) = common::session_with("bastion", config);

    // Destination that reads but never answers
    let requests = hop.take_direct_requests().unwrap();
    testing::serve_destinations(requests, |request| async move {
        let mut stream = request.stream;
        let mut buf = [0u8; 256];
        while let Ok(n) = stream.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
    });

    let tunnel = bastion.tunnels().forward(0, "10.0.0.8", 22).await.unwrap();
    let err = bastion
        .tunnels()
        .connect_tunnel(&tunnel, Credentials::password("ops", "hunter2"), StateMode::Shared)
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(bastion.depth(), 1);
}

#[tokio::test]
async fn test_shared_state_follows_parent() {
    let (bastion, hop, _) = common::session("bastion");
    common::auth_destinations(&hop, "hunter2");
    bastion.state().set_cwd("/opt");

    let tunnel = bastion.tunnels().forward(0, "10.0.0.8", 22).await.unwrap();
    let inner = bastion
        .tunnels()
        .connect_tunnel(&tunnel, Credentials::password("ops", "hunter2"), StateMode::Shared)
        .await
        .unwrap();

    assert!(inner.state().shares_with(bastion.state()));
    inner.state().env_set("TERM", "xterm");
    assert_eq!(bastion.state().env_get("TERM").as_deref(), Some("xterm"));
    assert_eq!(inner.state().tunnels().len(), 1);
}

#[tokio::test]
async fn test_forked_state_is_independent() {
    let (bastion, hop, _) = common::session("bastion");
    common::auth_destinations(&hop, "hunter2");
    bastion.state().set_cwd("/opt");

    let tunnel = bastion.tunnels().forward(0, "10.0.0.8", 22).await.unwrap();
    let inner = bastion
        .tunnels()
        .connect_tunnel(&tunnel, Credentials::password("ops", "hunter2"), StateMode::Forked)
        .await
        .unwrap();

    assert!(!inner.state().shares_with(bastion.state()));
    assert_eq!(inner.state().cwd(), "/opt");
    inner.state().set_cwd("/tmp");
    assert_eq!(bastion.state().cwd(), "/opt");

    // The parent's tunnel is not listed in the fork
    assert!(inner.state().tunnels().is_empty());
    assert_eq!(bastion.state().tunnels().len(), 1);
}

#[tokio::test]
async fn test_disconnect_tears_down_innermost_first() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (bastion, hop, connector) = common::session("a");
    hop.log_teardown_into(log.clone());
    common::auth_destinations(&hop, "hunter2");

    let tunnel = bastion.tunnels().forward(0, "10.0.0.8", 22).await.unwrap();
    let inner = bastion
        .tunnels()
        .connect_tunnel(&tunnel, Credentials::password("ops", "hunter2"), StateMode::Forked)
        .await
        .unwrap();
    connector.created()[0].log_teardown_into(log.clone());

    bastion.disconnect().await.unwrap();

    assert_eq!(*log.lock(), vec!["10.0.0.8".to_string(), "a".to_string()]);
    assert!(!inner.is_connected());
    assert!(!bastion.is_connected());
    assert!(!tunnel.is_running());
    assert!(bastion.tunnels().is_empty());
}

#[tokio::test]
async fn test_disconnect_reaches_dropped_child() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (bastion, hop, connector) = common::session("a");
    hop.log_teardown_into(log.clone());
    common::auth_destinations(&hop, "hunter2");

    let tunnel = bastion.tunnels().forward(0, "10.0.0.8", 22).await.unwrap();
    let inner = bastion
        .tunnels()
        .connect_tunnel(&tunnel, Credentials::password("ops", "hunter2"), StateMode::Shared)
        .await
        .unwrap();
    let child_hop = connector.created()[0].clone();
    child_hop.log_teardown_into(log.clone());

    // The child routes a tunnel through the bastion's own hop, then goes away
    let child_tunnel = inner
        .tunnels()
        .forward_with(ForwardRequest::new(0, "10.0.0.9", 80).via(0))
        .await
        .unwrap();
    assert_eq!(child_tunnel.hop_id(), hop.id());
    drop(inner);
    assert!(child_tunnel.is_running());

    bastion.disconnect().await.unwrap();

    assert!(!child_tunnel.is_running());
    assert!(!tunnel.is_running());
    assert!(!child_hop.is_connected());
    assert!(bastion.state().tunnels().is_empty());
    assert_eq!(*log.lock(), vec!["10.0.0.8".to_string(), "a".to_string()]);
    assert!(bastion.children().is_empty());
}

#[tokio::test]
async fn test_disconnect_reaches_dropped_forked_child() {
    let (bastion, hop, connector) = common::session("a");
    common::auth_destinations(&hop, "hunter2");

    let tunnel = bastion.tunnels().forward(0, "10.0.0.8", 22).await.unwrap();
    let inner = bastion
        .tunnels()
        .connect_tunnel(&tunnel, Credentials::password("ops", "hunter2"), StateMode::Forked)
        .await
        .unwrap();

    // Only the fork lists this tunnel
    let child_tunnel = inner
        .tunnels()
        .forward_with(ForwardRequest::new(0, "10.0.0.9", 80).via(0))
        .await
        .unwrap();
    assert!(bastion.state().tunnels().get(&child_tunnel.id()).is_none());
    drop(inner);

    bastion.disconnect().await.unwrap();

    assert!(!child_tunnel.is_running());
    assert!(!connector.created()[0].is_connected());
    assert_eq!(hop.disconnect_calls(), 1);
}

#[tokio::test]
async fn test_disconnect_reaches_dropped_grandchild() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (bastion, hop, connector) = common::session("a");
    hop.log_teardown_into(log.clone());
    common::auth_destinations(&hop, "hunter2");

    let tunnel = bastion.tunnels().forward(0, "10.0.0.8", 22).await.unwrap();
    let middle = bastion
        .tunnels()
        .connect_tunnel(&tunnel, Credentials::password("ops", "hunter2"), StateMode::Forked)
        .await
        .unwrap();
    let middle_hop = connector.created()[0].clone();
    middle_hop.log_teardown_into(log.clone());
    common::auth_destinations(&middle_hop, "hunter2");

    let deeper = middle.tunnels().forward(0, "10.0.0.9", 22).await.unwrap();
    let innermost = middle
        .tunnels()
        .connect_tunnel(&deeper, Credentials::password("ops", "hunter2"), StateMode::Forked)
        .await
        .unwrap();
    assert_eq!(innermost.depth(), 3);
    let innermost_hop = connector.created()[1].clone();
    innermost_hop.log_teardown_into(log.clone());

    drop(innermost);
    drop(middle);
    bastion.disconnect().await.unwrap();

    assert!(!deeper.is_running());
    assert_eq!(
        *log.lock(),
        vec!["10.0.0.9".to_string(), "10.0.0.8".to_string(), "a".to_string()]
    );
}

#[tokio::test]
async fn test_child_disconnect_keeps_parent() {
    let (bastion, hop, connector) = common::session("a");
    common::auth_destinations(&hop, "hunter2");

    let tunnel = bastion.tunnels().forward(0, "10.0.0.8", 22).await.unwrap();
    let inner = bastion
        .tunnels()
        .connect_tunnel(&tunnel, Credentials::password("ops", "hunter2"), StateMode::Shared)
        .await
        .unwrap();

    inner.disconnect().await.unwrap();

    assert!(!connector.created()[0].is_connected());
    assert!(bastion.is_connected());
    assert_eq!(hop.disconnect_calls(), 0);
    // The bastion's tunnel belongs to the bastion
    assert!(tunnel.is_running());
    assert_eq!(bastion.tunnels().len(), 1);
}

#[tokio::test]
async fn test_forward_through_outer_hop() {
    let (session, outer, _) = common::session("outer");
    let inner = MockTransport::connected("inner");
    session.add_ssh_layer(inner.clone());
    assert_eq!(session.depth(), 2);

    let mut outer_requests = outer.take_direct_requests().unwrap();
    let tunnel = session
        .tunnels()
        .forward_with(ForwardRequest::new(0, "10.0.0.5", 80).via(0))
        .await
        .unwrap();
    assert_eq!(tunnel.hop_id(), outer.id());

    let _client = tokio::net::TcpStream::connect(("127.0.0.1", tunnel.local_port()))
        .await
        .unwrap();
    let request = tokio::time::timeout(Duration::from_secs(5), outer_requests.recv())
        .await
        .expect("channel not opened on the outer hop")
        .unwrap();
    assert_eq!(request.host, "10.0.0.5");

    // Default routing uses the innermost hop
    let default = session.tunnels().forward(0, "10.0.0.6", 80).await.unwrap();
    assert_eq!(default.hop_id(), inner.id());
}
