//! Store behavior shared by every backend. The Postgres variants need a
//! database reachable through `DATABASE_URL` and are ignored by default.

use chrono::{Duration, Utc};
use image_builder::storage::{
    BlueprintWrite, MemoryStore, NewCompose, Page, PostgresStore, Store, StoreError,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

const PAGE: Page = Page {
    limit: 100,
    offset: 0,
};

fn unique_org() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

fn compose(org: &str, age_days: i64) -> NewCompose {
    NewCompose {
        id: Uuid::new_v4(),
        org_id: org.to_string(),
        account_number: "500000".into(),
        email: "user@user.user".into(),
        image_name: Some(format!("image-{}", age_days)),
        request: json!({
            "distribution": "rhel-94",
            "image_requests": [{"architecture": "x86_64", "image_type": "aws"}]
        }),
        client_id: Some("api".into()),
        blueprint_version_id: None,
        created_at: Utc::now() - Duration::days(age_days),
    }
}

async fn postgres() -> Arc<dyn Store> {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    Arc::new(PostgresStore::connect(&url, 2, true).await.unwrap())
}

async fn check_compose_window(store: Arc<dyn Store>) {
    let org = unique_org();
    let recent = compose(&org, 2);
    let recent_id = recent.id;
    let older = compose(&org, 20);
    let older_id = older.id;
    store.insert_compose(recent).await.unwrap();
    store.insert_compose(older).await.unwrap();
    store.insert_compose(compose(&org, 21)).await.unwrap();

    let (items, count) = store
        .get_composes(&org, Duration::days(14), PAGE)
        .await
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, recent_id);

    let (items, count) = store
        .get_composes(&org, Duration::days(30), Page { limit: 2, offset: 0 })
        .await
        .unwrap();
    assert_eq!(count, 3);
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].id, recent_id);
    assert_eq!(items[1].id, older_id);

    assert_eq!(
        store.get_compose_image_type(recent_id, &org).await.unwrap(),
        "aws"
    );
}

async fn check_org_isolation(store: Arc<dyn Store>) {
    let org = unique_org();
    let other = unique_org();
    let mine = compose(&org, 0);
    let id = mine.id;
    store.insert_compose(mine).await.unwrap();

    assert!(matches!(
        store.get_compose(id, &other).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.delete_compose(id, &other).await,
        Err(StoreError::NotFound(_))
    ));
    let (items, count) = store
        .get_composes(&other, Duration::days(14), PAGE)
        .await
        .unwrap();
    assert!(items.is_empty());
    assert_eq!(count, 0);

    store.delete_compose(id, &org).await.unwrap();
    assert!(store.get_compose(id, &org).await.is_err());
    assert_eq!(
        store
            .count_composes_since(&org, Duration::days(14))
            .await
            .unwrap(),
        1
    );
}

async fn check_clones(store: Arc<dyn Store>) {
    let org = unique_org();
    let parent = compose(&org, 0);
    let parent_id = parent.id;
    store.insert_compose(parent).await.unwrap();

    let missing_parent = store
        .insert_clone(Uuid::new_v4(), Uuid::new_v4(), json!({"region": "us-east-2"}))
        .await;
    assert!(missing_parent.is_err());

    let clone_id = Uuid::new_v4();
    store
        .insert_clone(parent_id, clone_id, json!({"region": "us-east-2"}))
        .await
        .unwrap();

    let clone = store.get_clone(clone_id, &org).await.unwrap();
    assert_eq!(clone.compose_id, parent_id);
    assert_eq!(clone.request["region"], "us-east-2");
    assert!(store.get_clone(clone_id, &unique_org()).await.is_err());

    let (clones, count) = store
        .get_clones_for_compose(parent_id, &org, PAGE)
        .await
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(clones[0].id, clone_id);
}

async fn check_blueprint_versions(store: Arc<dyn Store>) {
    let org = unique_org();
    let id = Uuid::new_v4();
    let first = BlueprintWrite {
        id,
        version_id: Uuid::new_v4(),
        org_id: org.clone(),
        account_number: "500000".into(),
        name: "web".into(),
        description: "first".into(),
        body: json!({"distribution": "rhel-94", "image_requests": []}),
    };
    store.insert_blueprint(first.clone()).await.unwrap();

    let second_version = Uuid::new_v4();
    let version = store
        .update_blueprint(BlueprintWrite {
            version_id: second_version,
            name: "web-v2".into(),
            description: "second".into(),
            ..first.clone()
        })
        .await
        .unwrap();
    assert_eq!(version, 2);

    let entry = store.get_blueprint(id, &org, None).await.unwrap();
    assert_eq!(entry.version, 2);
    assert_eq!(entry.version_id, second_version);
    assert_eq!(entry.name, "web-v2");

    let entry = store.get_blueprint(id, &org, Some(1)).await.unwrap();
    assert_eq!(entry.version, 1);
    assert_eq!(entry.version_id, first.version_id);
    assert_eq!(entry.name, "web-v2");
    assert!(matches!(
        store.get_blueprint(id, &org, Some(3)).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.get_blueprint(id, &unique_org(), Some(1)).await,
        Err(StoreError::NotFound(_))
    ));

    let mut linked = compose(&org, 0);
    linked.blueprint_version_id = Some(second_version);
    store.insert_compose(linked).await.unwrap();
    let (composes, count) = store
        .get_blueprint_composes(&org, id, Some(2), Duration::days(14), PAGE)
        .await
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(composes[0].blueprint_id, Some(id));
    assert_eq!(composes[0].blueprint_version, Some(2));
    let (_, count) = store
        .get_blueprint_composes(&org, id, Some(1), Duration::days(14), PAGE)
        .await
        .unwrap();
    assert_eq!(count, 0);

    let foreign = BlueprintWrite {
        org_id: unique_org(),
        ..first
    };
    assert!(matches!(
        store.update_blueprint(foreign).await,
        Err(StoreError::NotFound(_))
    ));
    assert_eq!(store.get_blueprint(id, &org, None).await.unwrap().version, 2);
}

#[tokio::test]
async fn test_memory_compose_window() {
    check_compose_window(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn test_memory_org_isolation() {
    check_org_isolation(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn test_memory_clones() {
    check_clones(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn test_memory_blueprint_versions() {
    check_blueprint_versions(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
#[ignore] // Requires a PostgreSQL database
async fn test_postgres_compose_window() {
    check_compose_window(postgres().await).await;
}

#[tokio::test]
#[ignore] // Requires a PostgreSQL database
async fn test_postgres_org_isolation() {
    check_org_isolation(postgres().await).await;
}

#[tokio::test]
#[ignore] // Requires a PostgreSQL database
async fn test_postgres_clones() {
    check_clones(postgres().await).await;
}

#[tokio::test]
#[ignore] // Requires a PostgreSQL database
async fn test_postgres_blueprint_versions() {
    check_blueprint_versions(postgres().await).await;
}
