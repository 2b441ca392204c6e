use agent_courier::AppError;

#[test]
fn display_prefixes_kind() {
    assert_eq!(AppError::Security("nope".into()).to_string(), "security: nope");
    assert_eq!(AppError::Timeout("30s".into()).to_string(), "timeout: 30s");
}

#[test]
fn boundary_failures_are_transient() {
    assert!(AppError::Transport(String::new()).is_transient());
    assert!(AppError::Auth(String::new()).is_transient());
    assert!(AppError::Protocol(String::new()).is_transient());
    assert!(AppError::Timeout(String::new()).is_transient());
    assert!(!AppError::Security(String::new()).is_transient());
    assert!(!AppError::Config(String::new()).is_transient());
    assert!(!AppError::State(String::new()).is_transient());
}

#[test]
fn conversions_pick_matching_variant() {
    let json: AppError = serde_json::from_str::<u8>("x").unwrap_err().into();
    assert!(matches!(json, AppError::Protocol(_)));

    let toml: AppError = toml::from_str::<toml::Value>("= 1").unwrap_err().into();
    assert!(matches!(toml, AppError::Config(_)));

    let io: AppError = std::io::Error::other("disk gone").into();
    assert!(matches!(io, AppError::Io(msg) if msg.contains("disk gone")));
}
