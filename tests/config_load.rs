// tests/config_load.rs
//
// Config discovery (env var, then config/ fallbacks), secret resolution and
// validation messages. These tests change the process env and CWD, so they
// run serially.

use std::{env, fs};

use serial_test::serial;
use tracker_notify::config::{self, ENV_CONFIG_PATH};
use tracker_notify::{builtin_sinks, builtin_sources, ConfigError};

const FULL: &str = r#"
[scheduler]
concurrency = 2
default_interval_secs = 900

[retry]
base_delay_ms = 500
max_delay_ms = 8000
max_attempts = 4
inline_budget_secs = 20

[store]
backend = "memory"

[status]
bind = "127.0.0.1:0"

[reporting]
sink = "ops"

[[sources]]
id = "rutracker"
kind = "rss"
endpoint = "https://tracker.example/rss"
interval_secs = 600
options = { cookie = "env:TN_TEST_COOKIE" }

[[sources]]
id = "anilibria"
kind = "anilibria"
endpoint = "https://www.anilibria.tv/public/api/index.php"
options = { releases = ["kabukichou-sherlock"] }

[[sinks]]
id = "tg"
kind = "telegram"
options = { token = "env:TN_TEST_TG_TOKEN", chat_id = 12345 }

[[sinks]]
id = "ops"
kind = "log"

[[subscriptions]]
source = "*"
sinks = ["tg"]
"#;

struct CwdGuard(std::path::PathBuf);

impl Drop for CwdGuard {
    fn drop(&mut self) {
        let _ = env::set_current_dir(&self.0);
    }
}

fn enter_tempdir() -> (tempfile::TempDir, CwdGuard) {
    let guard = CwdGuard(env::current_dir().unwrap());
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    (tmp, guard)
}

#[test]
#[serial]
fn env_path_wins_and_secrets_are_resolved() {
    let (tmp, _cwd) = enter_tempdir();
    env::set_var("TN_TEST_COOKIE", "session=abc");
    env::set_var("TN_TEST_TG_TOKEN", "123:xyz");

    let path = tmp.path().join("custom.toml");
    fs::write(&path, FULL).unwrap();
    env::set_var(ENV_CONFIG_PATH, &path);

    let cfg = config::load_default().unwrap();
    env::remove_var(ENV_CONFIG_PATH);

    assert_eq!(cfg.scheduler.concurrency, 2);
    assert_eq!(cfg.sources[0].options["cookie"], "session=abc");
    assert_eq!(cfg.sinks[0].options["token"], "123:xyz");
    assert_eq!(cfg.retry_policy().inline_budget.map(|d| d.as_secs()), Some(20));
    cfg.validate(&builtin_sources(), &builtin_sinks()).unwrap();
}

#[test]
#[serial]
fn falls_back_to_config_dir_then_json() {
    let (_tmp, _cwd) = enter_tempdir();
    env::remove_var(ENV_CONFIG_PATH);

    assert!(matches!(config::load_default(), Err(ConfigError::Invalid(_))));

    fs::create_dir_all("config").unwrap();
    fs::write(
        "config/tracker-notify.json",
        r#"{"sources":[{"id":"j","kind":"rss","endpoint":"http://x"}]}"#,
    )
    .unwrap();
    assert_eq!(config::load_default().unwrap().sources[0].id, "j");

    fs::write(
        "config/tracker-notify.toml",
        "[[sources]]\nid = \"t\"\nkind = \"rss\"\nendpoint = \"http://x\"\n",
    )
    .unwrap();
    assert_eq!(config::load_default().unwrap().sources[0].id, "t");
}

#[test]
#[serial]
fn missing_secret_is_reported_by_name() {
    let (tmp, _cwd) = enter_tempdir();
    env::remove_var("TN_TEST_COOKIE");
    env::set_var("TN_TEST_TG_TOKEN", "123:xyz");

    let path = tmp.path().join("cfg.toml");
    fs::write(&path, FULL).unwrap();
    match config::load_from(&path) {
        Err(ConfigError::MissingEnv(var)) => assert_eq!(var, "TN_TEST_COOKIE"),
        other => panic!("expected MissingEnv, got {other:?}"),
    }
}

#[test]
#[serial]
fn validation_names_the_offender() {
    env::set_var("TN_TEST_COOKIE", "c");
    env::set_var("TN_TEST_TG_TOKEN", "t");
    let base = || {
        let mut c = config::AppConfig::parse(FULL, "toml").unwrap();
        c.resolve_secrets().unwrap();
        c
    };
    let check = |c: &config::AppConfig| {
        c.validate(&builtin_sources(), &builtin_sinks())
            .unwrap_err()
            .to_string()
    };

    let mut dup = base();
    dup.sources[1].id = "rutracker".into();
    assert!(check(&dup).contains("duplicate source id `rutracker`"));

    let mut typo = base();
    typo.subscriptions[0].sinks = vec!["gt".into()];
    assert!(check(&typo).contains("`gt`"));

    let mut zero = base();
    zero.sources[0].interval_secs = Some(0);
    assert!(check(&zero).contains("interval"));

    let mut reporting = base();
    reporting.reporting.sink = Some("nobody".into());
    assert!(check(&reporting).contains("reporting sink"));

    let mut kind = base();
    kind.sources[0].kind = "rs".into();
    assert!(check(&kind).contains("unknown kind `rs`"));
}

#[test]
#[serial]
fn malformed_document_is_a_parse_error() {
    let (tmp, _cwd) = enter_tempdir();
    let path = tmp.path().join("broken.toml");
    fs::write(&path, "[[sources]\nid = ").unwrap();
    assert!(matches!(config::load_from(&path), Err(ConfigError::Parse(_))));
}
