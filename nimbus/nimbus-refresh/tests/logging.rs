//! Global subscriber installation

use nimbus_refresh::init_tracing;

#[test]
fn test_init_tracing_only_once() {
    assert!(init_tracing("debug").is_ok());
    tracing::info!("subscriber installed");

    // a second global subscriber is refused
    assert!(init_tracing("info").is_err());
}
