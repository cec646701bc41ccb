//! Factory registry resolution and service routing over a custom factory.

mod common;

use common::{MockFactory, SLOW, mock_config};
use multidb_pool::db::{ConnectionFactory, FactoryRegistry, SqlFactory};
use multidb_pool::error::{DbError, QueryErrorKind};
use multidb_pool::models::{BackendConfig, BackendKind, StatementKind};
use multidb_pool::{QueryService, ServiceOptions};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_default_registry_resolves_builtin_backends() {
    let registry = FactoryRegistry::with_default_backends();
    for (name, kind) in [
        ("mysql", BackendKind::MySql),
        ("MariaDB", BackendKind::MySql),
        ("postgresql", BackendKind::Postgres),
        ("pg", BackendKind::Postgres),
        ("sqlite3", BackendKind::Sqlite),
        ("redis", BackendKind::Redis),
        ("mongodb", BackendKind::Mongo),
    ] {
        let factory = registry.resolve(name).unwrap();
        assert_eq!(factory.kind(), kind, "resolving {}", name);
    }
}

#[test]
fn test_resolved_factories_build_matching_connections() {
    let registry = FactoryRegistry::with_default_backends();
    let postgres = registry.resolve("postgres").unwrap();
    let mysql = registry.resolve("mysql").unwrap();
    assert!(!Arc::ptr_eq(&postgres, &mysql));

    let pg_conn = postgres
        .create_connection(&BackendConfig::new("postgres").with_host("localhost"))
        .unwrap();
    assert_eq!(pg_conn.backend(), BackendKind::Postgres);
    assert!(!pg_conn.is_connected());

    let my_conn = mysql
        .create_connection(&BackendConfig::new("mysql").with_host("localhost"))
        .unwrap();
    assert_eq!(my_conn.backend(), BackendKind::MySql);
}

#[test]
fn test_unsupported_backend() {
    let registry = FactoryRegistry::with_default_backends();
    let err = registry.resolve("nosuch").unwrap_err();
    assert!(matches!(err, DbError::UnsupportedBackend { .. }));
    assert_eq!(err.to_body().kind, "unsupported_backend");

    // Known kind, but no factory registered for it.
    let sql_only = FactoryRegistry::builder()
        .register(SqlFactory::postgres())
        .build();
    let err = sql_only.resolve("mongodb").unwrap_err();
    assert!(matches!(err, DbError::UnsupportedBackend { .. }));
}

#[test]
fn test_builder_registers_custom_factory() {
    let registry = FactoryRegistry::builder()
        .register(MockFactory::new())
        .build();
    assert_eq!(registry.backends(), vec![BackendKind::Sqlite]);
    assert!(registry.contains(BackendKind::Sqlite));
    assert!(!registry.contains(BackendKind::MySql));
    assert!(registry.resolve("mysql").is_err());
}

#[test]
fn test_factories_reject_bad_config_before_connecting() {
    let registry = FactoryRegistry::with_default_backends();

    let no_host = BackendConfig::new("postgres").with_database("app");
    assert!(matches!(
        registry.resolve("postgres").unwrap().validate(&no_host),
        Err(DbError::Configuration { .. })
    ));

    let zero_port = BackendConfig::new("mysql").with_host("localhost").with_port(0);
    assert!(matches!(
        registry.resolve("mysql").unwrap().validate(&zero_port),
        Err(DbError::Configuration { .. })
    ));

    let no_database = BackendConfig::new("mongodb").with_host("localhost");
    assert!(matches!(
        registry.resolve("mongodb").unwrap().validate(&no_database),
        Err(DbError::Configuration { .. })
    ));

    let bad_db_index = BackendConfig::new("redis")
        .with_host("localhost")
        .with_database("zero");
    assert!(matches!(
        registry.resolve("redis").unwrap().validate(&bad_db_index),
        Err(DbError::Configuration { .. })
    ));
}

#[test]
fn test_classification_per_backend() {
    let registry = FactoryRegistry::with_default_backends();
    let sql = registry.resolve("sqlite").unwrap();
    assert_eq!(sql.classify("  -- note\n(SELECT 1)"), StatementKind::Query);
    assert_eq!(sql.classify("pragma table_info(t)"), StatementKind::Query);
    assert_eq!(sql.classify("INSERT INTO t VALUES (1)"), StatementKind::Execute);

    let redis = registry.resolve("redis").unwrap();
    assert_eq!(redis.classify("GET key"), StatementKind::Query);
    assert_eq!(redis.classify("SET key value"), StatementKind::Execute);

    let mongo = registry.resolve("mongo").unwrap();
    assert_eq!(mongo.classify(r#"{"find": "users", "filter": {}}"#), StatementKind::Query);
    assert_eq!(
        mongo.classify(r#"{"update": "users", "updates": []}"#),
        StatementKind::Execute
    );
}

fn mock_service(factory: &MockFactory, options: ServiceOptions) -> QueryService {
    let registry = FactoryRegistry::builder()
        .register_arc(factory.shared() as Arc<dyn ConnectionFactory>)
        .build();
    QueryService::new(registry, options)
}

#[tokio::test]
async fn test_service_routes_and_releases() {
    let factory = MockFactory::new();
    let service = mock_service(&factory, ServiceOptions::default());
    let config = mock_config();

    let rows = service
        .execute("sqlite", &config, "SELECT anything", &[])
        .await
        .unwrap()
        .into_rows()
        .unwrap()
        .into_rows();
    assert_eq!(rows[0]["statement"], "SELECT anything");

    let exec = service
        .execute("sqlite", &config, "UPDATE t SET x = 1", &[])
        .await
        .unwrap()
        .into_exec()
        .unwrap();
    assert_eq!(exec.affected_rows, 1);

    let forced = service
        .query("sqlite", &config, "UPDATE t SET x = 1", &[])
        .await
        .unwrap();
    assert!(forced.into_rows().is_some());

    let statuses = service.pool_status().await;
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].1.in_use, 0);
    assert_eq!(statuses[0].1.current_size, 1);
    assert_eq!(factory.stats.created(), 1);
}

#[tokio::test]
async fn test_service_discards_connection_lost_mid_query() {
    let factory = MockFactory::new();
    let service = mock_service(&factory, ServiceOptions::default());

    let err = service
        .query("sqlite", &mock_config(), common::BREAK, &[])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DbError::Query {
            kind: QueryErrorKind::ConnectionLost,
            ..
        }
    ));

    let statuses = service.pool_status().await;
    assert_eq!(statuses[0].1.current_size, 0);
    assert_eq!(factory.stats.live(), 0);
}

#[tokio::test]
async fn test_service_query_timeout_discards_connection() {
    let factory = MockFactory::new();
    let service = mock_service(
        &factory,
        ServiceOptions {
            query_timeout: Duration::from_millis(50),
            ..ServiceOptions::default()
        },
    );

    let err = service
        .query("sqlite", &mock_config(), SLOW, &[])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DbError::Query {
            kind: QueryErrorKind::Timeout,
            ..
        }
    ));
    assert_eq!(service.pool_status().await[0].1.current_size, 0);
}
