//! Credential loading: keychain first, environment variable fallback.
//!
//! These tests mutate process-global env vars and must run serially.

use agent_courier::config::GlobalConfig;
use agent_courier::AppError;

fn make_config() -> (tempfile::TempDir, GlobalConfig) {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        r#"
workspace_root = '{}'
allowed_roots = ["src"]

[comms]
base_url = "http://localhost:8080"
agent_id = "courier"
credential = "courier_test_comms_key"
env_key = "COURIER_TEST_COMMS_KEY"

[[mailboxes]]
id = "ceo"
credential = "courier_test_ceo_key"
env_key = "COURIER_TEST_CEO_KEY"
"#,
        temp.path().to_str().expect("utf8 path")
    );
    let config = GlobalConfig::from_toml_str(&toml).expect("config parses");
    (temp, config)
}

#[tokio::test]
#[serial_test::serial]
#[allow(unsafe_code)]
async fn env_var_fallback_populates_keys() {
    let (_temp, mut config) = make_config();
    unsafe {
        std::env::set_var("COURIER_TEST_COMMS_KEY", "comms-secret");
        std::env::set_var("COURIER_TEST_CEO_KEY", "ceo-secret");
    }

    let result = config.load_credentials().await;

    unsafe {
        std::env::remove_var("COURIER_TEST_COMMS_KEY");
        std::env::remove_var("COURIER_TEST_CEO_KEY");
    }
    assert!(result.is_ok(), "load_credentials should succeed with env vars");
    assert_eq!(config.comms.api_key, "comms-secret");
    assert_eq!(config.mailboxes[0].api_key, "ceo-secret");
}

#[tokio::test]
#[serial_test::serial]
#[allow(unsafe_code)]
async fn missing_mailbox_key_names_both_sources() {
    let (_temp, mut config) = make_config();
    unsafe {
        std::env::set_var("COURIER_TEST_COMMS_KEY", "comms-secret");
        std::env::remove_var("COURIER_TEST_CEO_KEY");
    }

    let result = config.load_credentials().await;

    unsafe {
        std::env::remove_var("COURIER_TEST_COMMS_KEY");
    }
    match result {
        Err(AppError::Config(msg)) => {
            assert!(msg.contains("courier_test_ceo_key"), "{msg}");
            assert!(msg.contains("COURIER_TEST_CEO_KEY"), "{msg}");
        }
        other => panic!("expected config error, got {other:?}"),
    }
}

#[tokio::test]
#[serial_test::serial]
#[allow(unsafe_code)]
async fn blank_env_value_is_treated_as_missing() {
    let (_temp, mut config) = make_config();
    unsafe {
        std::env::set_var("COURIER_TEST_COMMS_KEY", "   ");
    }

    let result = config.load_credentials().await;

    unsafe {
        std::env::remove_var("COURIER_TEST_COMMS_KEY");
    }
    assert!(matches!(result, Err(AppError::Config(_))));
}
