use reviewdesk::config::ConfigLoader;
use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

const CRYPTO_KEY_B64: &str = "YWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWE=";

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    unsafe {
        for key in [
            "REVIEWDESK_PROFILE",
            "REVIEWDESK_API_BIND_ADDR",
            "REVIEWDESK_LOG_LEVEL",
            "REVIEWDESK_CRYPTO_KEY",
            "REVIEWDESK_OPERATOR_TOKEN",
            "REVIEWDESK_OPERATOR_TOKENS",
            "REVIEWDESK_SYNC_COOLDOWN_SECONDS",
            "REVIEWDESK_OAUTH_STATE_TTL_SECONDS",
        ] {
            env::remove_var(key);
        }
    }
}

fn base_env() {
    unsafe {
        env::set_var("REVIEWDESK_CRYPTO_KEY", CRYPTO_KEY_B64);
        env::set_var("REVIEWDESK_OPERATOR_TOKEN", "test-token");
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

fn empty_dir_loader() -> (TempDir, ConfigLoader) {
    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    (temp_dir, loader)
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();
    base_env();

    let (_dir, loader) = empty_dir_loader();
    let cfg = loader.load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.sync.cooldown_seconds, 300);
    assert_eq!(cfg.oauth_state_ttl_seconds, 600);
    assert_eq!(cfg.operator_tokens, vec!["test-token".to_string()]);
    assert_eq!(cfg.crypto_key.as_ref().map(Vec::len), Some(32));
    assert_eq!(
        cfg.google_redirect_uri(),
        "http://localhost:8080/oauth/google/callback"
    );
    cfg.bind_addr().expect("default bind addr parses");
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "REVIEWDESK_API_BIND_ADDR=127.0.0.1:3000\n");
    write_env_file(
        &temp_dir,
        ".env.test",
        "REVIEWDESK_API_BIND_ADDR=192.168.0.10:5000\nREVIEWDESK_SYNC_COOLDOWN_SECONDS=60\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "REVIEWDESK_API_BIND_ADDR=10.0.0.5:6000\n",
    );
    // Selects the profile before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        &format!(
            "REVIEWDESK_PROFILE=test\nREVIEWDESK_API_BIND_ADDR=127.0.0.1:4000\n\
             REVIEWDESK_OPERATOR_TOKENS=a, b ,\nREVIEWDESK_CRYPTO_KEY={CRYPTO_KEY_B64}\n\
             REVIEWDESK_GOOGLE_CLIENT_ID=id\nREVIEWDESK_GOOGLE_CLIENT_SECRET=secret\n\
             REVIEWDESK_AI_API_KEY=ai\n"
        ),
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    assert_eq!(cfg.sync.cooldown_seconds, 60);
    assert_eq!(cfg.operator_tokens, vec!["a".to_string(), "b".to_string()]);
    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();
    base_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "REVIEWDESK_API_BIND_ADDR=127.0.0.1:3000\n",
    );
    unsafe {
        env::set_var("REVIEWDESK_API_BIND_ADDR", "0.0.0.0:9090");
    }

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with env override");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9090");

    clear_env();
}

#[test]
fn invalid_bind_addr_returns_error() {
    let _guard = env_guard();
    clear_env();
    base_env();
    unsafe {
        env::set_var("REVIEWDESK_API_BIND_ADDR", "not-an-addr");
    }

    let (_dir, loader) = empty_dir_loader();
    let err = loader.load().expect_err("invalid bind addr should fail");
    assert!(format!("{}", err).contains("invalid api bind address"));

    clear_env();
}

#[test]
fn missing_secrets_are_rejected() {
    let _guard = env_guard();
    clear_env();

    let (_dir, loader) = empty_dir_loader();
    let err = loader.load().expect_err("crypto key is required");
    assert!(format!("{}", err).contains("REVIEWDESK_CRYPTO_KEY"));

    unsafe {
        env::set_var("REVIEWDESK_CRYPTO_KEY", CRYPTO_KEY_B64);
    }
    let err = loader.load().expect_err("operator token is required");
    assert!(format!("{}", err).contains("operator tokens"));

    clear_env();
}

#[test]
fn out_of_range_values_are_rejected() {
    let _guard = env_guard();
    clear_env();
    base_env();
    unsafe {
        env::set_var("REVIEWDESK_OAUTH_STATE_TTL_SECONDS", "5");
    }

    let (_dir, loader) = empty_dir_loader();
    let err = loader.load().expect_err("ttl below the minimum");
    assert!(format!("{}", err).contains("oauth state ttl"));

    unsafe {
        env::remove_var("REVIEWDESK_OAUTH_STATE_TTL_SECONDS");
        env::set_var("REVIEWDESK_SYNC_COOLDOWN_SECONDS", "7200");
    }
    let err = loader.load().expect_err("cooldown above the maximum");
    assert!(format!("{}", err).contains("sync cooldown"));

    clear_env();
}
