mod common;

use std::sync::Arc;

use apollo_client::{ConfigFileChangeListener, ConfigManager};
use apollo_core::{ApolloError, ConfigFileChangeEvent, ConfigFileFormat, PropertyChangeType};
use apollo_mockserver::MockConfigService;
use common::{eventually, settings, with_timeout, APP_ID};
use parking_lot::Mutex;
use tempfile::TempDir;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn yaml_namespace_is_flattened_and_tracked() {
    let cache = TempDir::new().unwrap();
    let server = MockConfigService::new();
    server.set_content(APP_ID, "application.yaml", "server:\n  port: 8080\nhosts:\n  - a\n  - b\n");

    let manager = ConfigManager::with_transport(settings(&cache, &server), server.clone()).unwrap();
    let config = with_timeout(manager.config("application.yaml")).await.unwrap();
    let file = with_timeout(manager.config_file("application", ConfigFileFormat::Yaml))
        .await
        .unwrap();

    assert_eq!(config.get_int_property("server.port", 0), 8080);
    assert_eq!(config.get_property("hosts[1]", None).as_deref(), Some("b"));
    assert_eq!(file.namespace(), "application.yaml");
    assert!(file.content().unwrap().contains("port: 8080"));
    assert_eq!(server.config_fetch_count(APP_ID, "application.yaml"), 1);

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let listener: Arc<ConfigFileChangeListener> =
        Arc::new(move |event: &ConfigFileChangeEvent| sink.lock().push(event.clone()));
    file.add_change_listener(listener);

    server.modify_content(APP_ID, "application.yaml", "server:\n  port: 9090\n");

    assert!(eventually(|| config.get_int_property("server.port", 0) == 9090).await);
    assert!(eventually(|| events.lock().len() == 1).await);
    assert_eq!(config.get_property("hosts[1]", None), None);

    let event = events.lock()[0].clone();
    assert_eq!(event.namespace, "application.yaml");
    assert_eq!(event.change_type, PropertyChangeType::Modified);
    assert_eq!(event.new_value.as_deref(), Some("server:\n  port: 9090\n"));
    assert_eq!(file.as_properties().unwrap().get("server.port"), Some("9090"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn json_file_flattens_nested_values() {
    let cache = TempDir::new().unwrap();
    let server = MockConfigService::new();
    server.set_content(APP_ID, "feature.json", r#"{"flags":{"beta":true},"limit":5}"#);

    let manager = ConfigManager::with_transport(settings(&cache, &server), server.clone()).unwrap();
    let file = with_timeout(manager.config_file("feature", ConfigFileFormat::Json))
        .await
        .unwrap();

    let flat = file.as_properties().unwrap();
    assert_eq!(flat.get("flags.beta"), Some("true"));
    assert_eq!(flat.get("limit"), Some("5"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn xml_file_exposes_raw_content_only() {
    let cache = TempDir::new().unwrap();
    let server = MockConfigService::new();
    server.set_content(APP_ID, "datasources.xml", "<datasources><ds id=\"main\"/></datasources>");

    let manager = ConfigManager::with_transport(settings(&cache, &server), server.clone()).unwrap();
    let file = with_timeout(manager.config_file("datasources", ConfigFileFormat::Xml))
        .await
        .unwrap();
    let again = with_timeout(manager.config_file("datasources.xml", ConfigFileFormat::Xml))
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&file, &again));
    assert!(file.has_content());
    assert_eq!(
        file.content().as_deref(),
        Some("<datasources><ds id=\"main\"/></datasources>")
    );
    assert!(matches!(file.as_properties(), Err(ApolloError::Unsupported(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn properties_file_shares_the_plain_namespace() {
    let cache = TempDir::new().unwrap();
    let server = MockConfigService::new();
    server.set_configs(APP_ID, "application", [("k", "v")]);

    let manager = ConfigManager::with_transport(settings(&cache, &server), server.clone()).unwrap();
    let config = with_timeout(manager.app_config()).await.unwrap();
    let file = with_timeout(manager.config_file("application", ConfigFileFormat::Properties))
        .await
        .unwrap();

    assert_eq!(config.get_property("k", None).as_deref(), Some("v"));
    assert_eq!(file.content().as_deref(), Some("k=v\n"));
    assert_eq!(file.as_properties().unwrap().get("k"), Some("v"));
    assert_eq!(server.config_fetch_count(APP_ID, "application"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_file_namespace_has_no_content() {
    let cache = TempDir::new().unwrap();
    let server = MockConfigService::new();

    let manager = ConfigManager::with_transport(settings(&cache, &server), server.clone()).unwrap();
    let file = with_timeout(manager.config_file("absent", ConfigFileFormat::Txt))
        .await
        .unwrap();

    assert!(!file.has_content());
    assert!(file.content().is_none());
}
