// tests/config_loading.rs
use std::{env, fs};

use chrono::{TimeZone, Utc};

use election_harvester::config::{
    finish, from_json_str, from_toml_str, load_default, load_from, CursorStoreConfig,
    SourceConfig, ENV_BLUESKY_PASSWORD, ENV_CONFIG_PATH, ENV_ES_PASSWORD, ENV_ES_URL,
    ENV_ES_USER, ENV_MASTODON_TOKEN,
};

const TOML: &str = r##"
keywords = ["auspol", "#ausvotes"]

[elastic]
url = "https://es.internal:9200"
user = "harvester"
password = "ENV"

[cursor_store]
kind = "elastic"

[runtime]
time_budget_secs = 55
batch_size = 100

[window]
since = "2025-03-28T00:00:00Z"
until = "2025-05-03T23:59:59Z"

[[harvesters]]
name = "mastodon-au"
kind = "mastodon"
index = "mastodon_posts"
base_url = "https://aus.social"
hashtag = "auspol"
access_token = "ENV"

[[harvesters]]
name = "bluesky-au"
kind = "bluesky"
index = "bluesky_posts"
handle = "harvester.bsky.social"
query = "auspol"
enabled = false
"##;

fn clear_env() {
    for k in [
        ENV_CONFIG_PATH,
        ENV_ES_URL,
        ENV_ES_USER,
        ENV_ES_PASSWORD,
        ENV_MASTODON_TOKEN,
        ENV_BLUESKY_PASSWORD,
    ] {
        env::remove_var(k);
    }
}

#[serial_test::serial]
#[test]
fn toml_file_with_env_secrets() {
    clear_env();
    env::set_var(ENV_ES_PASSWORD, "es-secret");
    env::set_var(ENV_MASTODON_TOKEN, "masto-token");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("harvest.toml");
    fs::write(&path, TOML).unwrap();

    let cfg = load_from(&path).expect("config loads");
    assert_eq!(cfg.elastic.url, "https://es.internal:9200");
    assert_eq!(cfg.elastic.password.as_deref(), Some("es-secret"));
    assert_eq!(cfg.cursor_store, CursorStoreConfig::Elastic);
    assert_eq!(cfg.runtime.time_budget_secs, Some(55));
    assert_eq!(cfg.runtime.batch_size, 100);
    assert_eq!(cfg.runtime.page_size, 40);
    assert_eq!(
        cfg.window.since,
        Some(Utc.with_ymd_and_hms(2025, 3, 28, 0, 0, 0).unwrap())
    );

    let masto = &cfg.harvesters[0];
    assert!(matches!(
        &masto.source,
        SourceConfig::Mastodon { access_token: Some(t), .. } if t == "masto-token"
    ));

    // disabled harvesters keep the marker; BLUESKY_APP_PASSWORD is not needed
    let bsky = &cfg.harvesters[1];
    assert!(!bsky.enabled);
    assert!(matches!(
        &bsky.source,
        SourceConfig::Bluesky { app_password, .. } if app_password == "ENV"
    ));

    clear_env();
}

#[serial_test::serial]
#[test]
fn missing_secret_names_the_harvester() {
    clear_env();
    env::set_var(ENV_ES_PASSWORD, "es-secret");

    let err = finish(from_toml_str(TOML).unwrap()).unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("mastodon-au"), "{msg}");
    assert!(msg.contains(ENV_MASTODON_TOKEN), "{msg}");

    clear_env();
}

#[serial_test::serial]
#[test]
fn env_overrides_elastic_endpoint() {
    clear_env();
    env::set_var(ENV_ES_URL, "http://127.0.0.1:9200");
    env::set_var(ENV_ES_USER, "ops");

    let cfg = finish(
        from_toml_str(
            r#"
            [[harvesters]]
            name = "reddit-au"
            kind = "reddit"
            index = "reddit_posts"
            query = "ausvotes"
            "#,
        )
        .unwrap(),
    )
    .unwrap();
    assert_eq!(cfg.elastic.url, "http://127.0.0.1:9200");
    assert_eq!(cfg.elastic.user.as_deref(), Some("ops"));

    clear_env();
}

#[test]
fn json_format_is_accepted() {
    let cfg = from_json_str(
        r#"{
            "keywords": ["auspol"],
            "cursor_store": { "kind": "file", "dir": "/var/lib/harvest" },
            "enrich": { "neutral_label": "medium", "location_fallback": "unresolved" },
            "harvesters": [
                { "name": "reddit-au", "kind": "reddit", "index": "reddit_posts",
                  "subreddit": "AustralianPolitics", "query": "election" }
            ]
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.enrich.neutral_label, "medium");
    assert_eq!(
        cfg.cursor_store,
        CursorStoreConfig::File {
            dir: "/var/lib/harvest".into()
        }
    );
    assert!(matches!(
        &cfg.harvesters[0].source,
        SourceConfig::Reddit { subreddit, .. } if subreddit == "AustralianPolitics"
    ));
    cfg.validate().unwrap();
}

#[test]
fn validation_rejects_bad_settings() {
    let base = r#"
        [[harvesters]]
        name = "reddit-au"
        kind = "reddit"
        index = "reddit_posts"
        query = "ausvotes"
    "#;

    let bad = [
        (
            "[enrich.partition]\nmorning_start = 12\nafternoon_start = 6\nevening_start = 18\n",
            "partition",
        ),
        (
            "[enrich]\npositive_threshold = -0.5\nnegative_threshold = 0.5\n",
            "positive_threshold",
        ),
        ("[runtime]\nbatch_size = 0\n", "batch_size"),
        ("[runtime]\nmax_attempts = 0\n", "max_attempts"),
        (
            "[window]\nsince = \"2025-05-04T00:00:00Z\"\nuntil = \"2025-05-03T00:00:00Z\"\n",
            "window.since",
        ),
    ];
    for (section, needle) in bad {
        let cfg = from_toml_str(&format!("{section}\n{base}")).unwrap();
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains(needle), "expected `{needle}` in `{err}`");
    }

    let dup = from_toml_str(&format!("{base}\n{base}")).unwrap();
    assert!(dup.validate().unwrap_err().to_string().contains("duplicate"));

    let bad_name = from_toml_str(&base.replace("reddit-au", "reddit au")).unwrap();
    assert!(bad_name.validate().is_err());
}

#[serial_test::serial]
#[test]
fn default_uses_env_then_fallbacks() {
    clear_env();
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();

    // 1) nothing anywhere
    assert!(load_default().is_err());

    // 2) ./config/harvest.json
    let cfg_dir = tmp.path().join("config");
    fs::create_dir_all(&cfg_dir).unwrap();
    fs::write(
        cfg_dir.join("harvest.json"),
        r#"{"keywords":["from-json"]}"#,
    )
    .unwrap();
    assert_eq!(load_default().unwrap().keywords, ["from-json"]);

    // 3) ./config/harvest.toml wins over json
    fs::write(cfg_dir.join("harvest.toml"), r#"keywords = ["from-toml"]"#).unwrap();
    assert_eq!(load_default().unwrap().keywords, ["from-toml"]);

    // 4) env path wins over both
    let p_env = tmp.path().join("elsewhere.toml");
    fs::write(&p_env, r#"keywords = ["from-env"]"#).unwrap();
    env::set_var(ENV_CONFIG_PATH, p_env.display().to_string());
    assert_eq!(load_default().unwrap().keywords, ["from-env"]);

    // 5) env path that does not exist is an error, not a fallback
    env::set_var(ENV_CONFIG_PATH, tmp.path().join("nope.toml").display().to_string());
    assert!(load_default().is_err());

    clear_env();
    env::set_current_dir(&old).unwrap();
}
