use emuexec_core::{logging, version};

#[test]
fn version_is_non_empty() {
    assert!(!version().is_empty());
}

#[test]
fn init_tracing_is_idempotent() {
    logging::init_tracing(false);
    logging::init_tracing(true);
    assert_eq!(logging::default_directive(true), "emuexec=debug");
    assert_eq!(logging::default_directive(false), "emuexec=info");
}
