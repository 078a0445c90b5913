//! File transfer through sessions

mod common;

use hl_core::{Credentials, HlError};
use hl_remote::StateMode;

#[tokio::test]
async fn test_scp_requires_expansion() {
    let (session, _, _) = common::session("box");

    assert!(!session.capabilities().has_protocol("scp"));
    assert!(matches!(
        session.protocol("scp"),
        Err(HlError::ProtocolNotAvailable(name)) if name == "scp"
    ));
    assert!(matches!(session.scp(), Err(HlError::ProtocolNotAvailable(_))));

    session.expand_scp();
    session.expand_scp();

    let caps = session.capabilities();
    assert!(caps.has_protocol("scp"));
    assert!(caps.has_protocol("ssh"));
    assert!(caps.has_action("upload"));
    assert!(caps.has_action("download"));
    assert!(session.protocol("scp").is_ok());
}

#[tokio::test]
async fn test_upload_then_download() {
    let (session, hop, _) = common::session("box");
    session.expand_scp();
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("deploy.tar");
    std::fs::write(&local, vec![7u8; 3 * 1024 * 1024 + 17]).unwrap();

    let scp = session.scp().unwrap();
    let up = scp.upload(&local, "/opt/deploy.tar").await.unwrap();
    assert_eq!(up.bytes_transferred, 3 * 1024 * 1024 + 17);
    assert_eq!(hop.file("/opt/deploy.tar").unwrap().len(), 3 * 1024 * 1024 + 17);

    let back = dir.path().join("copy.tar");
    let down = scp.download("/opt/deploy.tar", &back).await.unwrap();
    assert_eq!(down.bytes_transferred, up.bytes_transferred);
    assert_eq!(std::fs::read(&back).unwrap(), std::fs::read(&local).unwrap());
}

#[tokio::test]
async fn test_chained_session_transfers_on_its_own_hop() {
    let (bastion, hop, connector) = common::session("bastion");
    common::auth_destinations(&hop, "hunter2");
    bastion.expand_scp();

    let tunnel = bastion.tunnels().forward(0, "10.0.0.8", 22).await.unwrap();
    let inner = bastion
        .tunnels()
        .connect_tunnel(&tunnel, Credentials::password("ops", "hunter2"), StateMode::Forked)
        .await
        .unwrap();
    assert!(inner.scp().is_err());

    let inner_hop = connector.created()[0].clone();
    inner_hop.put_file("/etc/hostname", "db-1\n");
    inner.expand_scp();

    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("hostname");
    inner
        .scp()
        .unwrap()
        .download("/etc/hostname", &local)
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(&local).unwrap(), "db-1\n");
    assert!(hop.file("/etc/hostname").is_none());
}
