//! Session lifecycle and per-request cancellation.

use persona_mcp::config::TransportKind;
use persona_mcp::mcp::protocol::RequestId;
use persona_mcp::mcp::session::{ClientHello, Session, SessionState};
use persona_mcp::AppError;

fn hello() -> ClientHello {
    ClientHello {
        protocol_version: "2024-11-05".into(),
        ..ClientHello::default()
    }
}

#[test]
fn gated_transports_require_initialize_first() {
    for kind in [TransportKind::Sse, TransportKind::HttpStream] {
        let session = Session::new(kind);
        assert!(matches!(
            session.ensure_ready("tools/call"),
            Err(AppError::Protocol(_))
        ));
        assert!(session.ensure_ready("initialize").is_ok());
    }
}

#[test]
fn initialize_unlocks_other_methods_once() {
    let session = Session::new(TransportKind::Sse);
    session.mark_initialized(hello()).expect("first initialize");
    assert_eq!(session.state(), SessionState::Initialized);
    assert!(session.ensure_ready("tools/list").is_ok());
    assert_eq!(
        session.hello().map(|h| h.protocol_version),
        Some("2024-11-05".to_owned())
    );
    assert!(session.mark_initialized(hello()).is_err());
}

#[test]
fn closed_session_refuses_everything() {
    let session = Session::new(TransportKind::Stdio);
    session.close();
    assert!(session.is_closed());
    assert!(session.ensure_ready("ping").is_err());
    assert!(session.ensure_ready("initialize").is_err());
    assert!(session.mark_initialized(hello()).is_err());
}

#[test]
fn cancelling_one_request_leaves_the_others_running() {
    let session = Session::with_id("s-1", TransportKind::HttpStream);
    let first = session.register(&RequestId::from(1)).expect("registered");
    let second = session.register(&RequestId::from("two")).expect("registered");
    assert_eq!(session.in_flight(), 2);

    assert!(session.cancel_request(&RequestId::from(1)));
    assert!(first.is_cancelled());
    assert!(!second.is_cancelled());

    session.finish(&RequestId::from(1));
    assert!(!session.cancel_request(&RequestId::from(1)));
    session.finish(&RequestId::from("two"));
    assert_eq!(session.in_flight(), 0);
    assert_eq!(session.id(), "s-1");
}

#[test]
fn session_ids_are_unique() {
    let a = Session::new(TransportKind::Sse);
    let b = Session::new(TransportKind::Sse);
    assert_ne!(a.id(), b.id());
    assert_eq!(a.transport(), TransportKind::Sse);
}
