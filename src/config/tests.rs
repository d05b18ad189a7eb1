use super::*;
use crate::cache::BackendKind;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_run_memory_store_with_default_tiers() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    assert_eq!(settings.store, StoreBackend::Memory);
    assert_eq!(settings.cache, CacheConfig::default());
    assert_eq!(settings.pagination, PageLimits::default());
    assert_eq!(settings.redis.channel, DEFAULT_CHANNEL);
    assert!(settings.redis.url.is_none());
}

#[test]
fn postgres_store_requires_database_url() {
    let mut raw = RawSettings::default();
    raw.apply_serve_overrides(&ServeOverrides {
        store: Some("postgres".to_string()),
        ..Default::default()
    });
    let err = Settings::from_raw(raw.clone()).unwrap_err();
    assert!(matches!(err, LoadError::Invalid { key: "database.url", .. }));

    raw.database.url = Some("postgres://localhost/newsdeck".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.store, StoreBackend::Postgres);
}

#[test]
fn duplicate_tier_names_are_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.tiers = Some(vec![
        TierConfig::memory("hot", 60, 10),
        TierConfig::redis("hot", 600),
    ]);
    let err = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(err, LoadError::Invalid { key: "cache.tiers", .. }));
}

#[test]
fn default_limit_must_fit_under_max() {
    let mut raw = RawSettings::default();
    raw.pagination.default_limit = Some(50);
    raw.pagination.max_limit = Some(25);
    let err = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "pagination.default_limit",
            ..
        }
    ));
}

#[test]
fn max_limit_is_bounded() {
    let mut raw = RawSettings::default();
    raw.pagination.max_limit = Some(u32::MAX);
    let err = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "pagination.max_limit",
            ..
        }
    ));
}

#[test]
fn zero_tier_timeouts_are_rejected() {
    for tier in [
        TierConfig {
            timeout_ms: Some(0),
            ..TierConfig::memory("hot", 60, 10)
        },
        TierConfig {
            sweep_timeout_ms: Some(0),
            ..TierConfig::redis("shared", 600)
        },
    ] {
        let mut raw = RawSettings::default();
        raw.cache.tiers = Some(vec![tier]);
        let err = Settings::from_raw(raw).unwrap_err();
        assert!(matches!(err, LoadError::Invalid { key: "cache.tiers", .. }));
    }
}

#[test]
fn tiers_deserialize_from_config_sources() {
    let raw: RawSettings = Config::builder()
        .add_source(File::from_str(
            r#"
            [cache]
            key_prefix = "staging:"
            single_flight = false

            [[cache.tiers]]
            name = "local"
            backend = "memory"
            ttl_seconds = 30
            capacity = 128

            [[cache.tiers]]
            name = "shared"
            backend = "redis"
            ttl_seconds = 600
            timeout_ms = 100
            "#,
            config::FileFormat::Toml,
        ))
        .build()
        .expect("config builds")
        .try_deserialize()
        .expect("raw settings deserialize");

    let settings = Settings::from_raw(raw).expect("valid settings");
    let cache = settings.cache;
    assert_eq!(cache.key_prefix, "staging:");
    assert!(!cache.single_flight);
    assert_eq!(cache.tiers.len(), 2);
    assert_eq!(cache.tiers[0].capacity, 128);
    assert_eq!(cache.tiers[1].backend, BackendKind::Redis);
    assert_eq!(cache.tiers[1].timeout(), Duration::from_millis(100));
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["newsdeck"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_purge_arguments() {
    let args = CliArgs::parse_from([
        "newsdeck",
        "purge",
        "--namespace",
        "articles.list",
        "--redis-url",
        "redis://cache:6379",
    ]);

    match args.command.expect("purge command") {
        Command::Purge(purge) => {
            assert_eq!(purge.namespace, "articles.list");
            assert_eq!(purge.redis.redis_url.as_deref(), Some("redis://cache:6379"));
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "newsdeck",
        "serve",
        "--server-port",
        "9000",
        "--store",
        "memory",
        "--cache-enabled",
        "false",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_port, Some(9000));
            assert_eq!(serve.overrides.store.as_deref(), Some("memory"));
            assert_eq!(serve.overrides.cache_enabled, Some(false));
        }
        other => panic!("unexpected command: {other:?}"),
    }
}
