//! SQLite store against real compiled queries.

use quarry_core::{extract_indexes, QuarryError, StoreError};
use quarry_query::{ComparisonOp, MemberRef, Predicate, Query, SqlCompiler};
use quarry_sqlite::SqliteStore;
use quarry_storage::{StoreClient, StoreProvider};
use quarry_test_utils::fixtures::{my_item_schema, GuidItem, MyItem, StringItem};
use quarry_test_utils::{init_tracing, Structure, StructureId, StructureSchema};

async fn ready_store() -> (SqliteStore, Box<dyn StoreClient>, StructureSchema) {
    init_tracing();
    let store = SqliteStore::in_memory().unwrap();
    store.create_database_if_not_exists().await.unwrap();
    let client = store.connect().await.unwrap();
    let schema = my_item_schema();
    client.upsert_schema(&schema).await.unwrap();
    (store, client, schema)
}

async fn insert<T: Structure>(client: &dyn StoreClient, schema: &StructureSchema, item: &T) {
    let id = item.structure_id().unwrap();
    let json = serde_json::to_value(item).unwrap();
    let indexes = extract_indexes(schema, &json).unwrap();
    client
        .insert(schema, &id, &json.to_string(), &indexes)
        .await
        .unwrap();
}

async fn seed(client: &dyn StoreClient, schema: &StructureSchema, items: &[MyItem]) {
    for item in items {
        insert(client, schema, item).await;
    }
}

async fn query_ids(client: &dyn StoreClient, schema: &StructureSchema, query: &Query) -> Vec<i32> {
    let compiled = SqlCompiler::default().compile_query(schema, query).unwrap();
    client
        .execute_query(schema, &compiled)
        .await
        .unwrap()
        .iter()
        .map(|json| serde_json::from_str::<MyItem>(json).unwrap().structure_id.unwrap())
        .collect()
}

#[tokio::test]
async fn test_database_lifecycle() {
    let store = SqliteStore::in_memory().unwrap();
    assert!(!store.database_exists().await.unwrap());
    assert!(store.initialize_existing().await.is_err());

    store.create_database_if_not_exists().await.unwrap();
    assert!(store.database_exists().await.unwrap());
    store.initialize_existing().await.unwrap();

    let client = store.connect().await.unwrap();
    client.upsert_schema(&my_item_schema()).await.unwrap();
    store.ensure_new_database().await.unwrap();
    assert!(store.database_exists().await.unwrap());
    assert!(client.row_count(&my_item_schema()).await.is_err());

    store.drop_database_if_exists().await.unwrap();
    assert!(!store.database_exists().await.unwrap());
}

#[tokio::test]
async fn test_upsert_requires_database() {
    let store = SqliteStore::in_memory().unwrap();
    let client = store.connect().await.unwrap();
    assert!(matches!(
        client.upsert_schema(&my_item_schema()).await,
        Err(QuarryError::Store(StoreError::DatabaseFailed { .. }))
    ));
}

#[tokio::test]
async fn test_upsert_is_idempotent() {
    let (_store, client, schema) = ready_store().await;
    seed(client.as_ref(), &schema, &[MyItem::new(1, 1).with_id(1)]).await;
    client.upsert_schema(&schema).await.unwrap();
    assert_eq!(client.row_count(&schema).await.unwrap(), 1);
}

#[tokio::test]
async fn test_id_reads() {
    let (_store, client, schema) = ready_store().await;
    seed(
        client.as_ref(),
        &schema,
        &[MyItem::new(1, 1).with_id(1), MyItem::new(2, 2).with_id(2)],
    )
    .await;

    let one = client.fetch_by_id(&schema, &StructureId::Identity(1)).await.unwrap();
    assert_eq!(serde_json::from_str::<MyItem>(&one.unwrap()).unwrap().int1, 1);
    assert!(client
        .fetch_by_id(&schema, &StructureId::Identity(9))
        .await
        .unwrap()
        .is_none());

    let mut many = client
        .fetch_by_ids(
            &schema,
            &[StructureId::Identity(2), StructureId::Identity(9), StructureId::Identity(1)],
        )
        .await
        .unwrap();
    many.sort_by(|a, b| a.id.cmp(&b.id));
    let ids: Vec<_> = many.iter().map(|s| s.id.clone()).collect();
    assert_eq!(ids, vec![StructureId::Identity(1), StructureId::Identity(2)]);

    assert!(client.exists_by_id(&schema, &StructureId::Identity(2)).await.unwrap());
    assert!(!client.exists_by_id(&schema, &StructureId::Identity(3)).await.unwrap());
    assert_eq!(client.row_count(&schema).await.unwrap(), 2);
    assert_eq!(client.fetch_all_ordered(&schema).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_member_to_member_equality() {
    let (_store, client, schema) = ready_store().await;
    seed(
        client.as_ref(),
        &schema,
        &[
            MyItem::new(1, 1).with_id(1),
            MyItem::new(1, 2).with_id(2),
            MyItem::new(3, 3).with_id(3),
        ],
    )
    .await;

    let equal = Query::new()
        .filter(Predicate::members(
            MemberRef::integer("Int1"),
            ComparisonOp::Eq,
            MemberRef::integer("Int2"),
        ))
        .order_by(MemberRef::integer("Int1"));
    assert_eq!(query_ids(client.as_ref(), &schema, &equal).await, vec![1, 3]);

    let lower = Query::new().filter(Predicate::members(
        MemberRef::integer("Int1"),
        ComparisonOp::Lt,
        MemberRef::integer("Int2"),
    ));
    assert_eq!(query_ids(client.as_ref(), &schema, &lower).await, vec![2]);
}

#[tokio::test]
async fn test_sorting_and_paging() {
    let (_store, client, schema) = ready_store().await;
    let items: Vec<MyItem> = (1..=6).map(|i| MyItem::new(i as i64 * 10, 0).with_id(i)).collect();
    seed(client.as_ref(), &schema, &items).await;

    let query = Query::new()
        .order_by_desc(MemberRef::integer("Int1"))
        .page(1, 2);
    assert_eq!(query_ids(client.as_ref(), &schema, &query).await, vec![5, 4]);

    let first = Query::new().order_by(MemberRef::integer("Int1")).take(3);
    assert_eq!(query_ids(client.as_ref(), &schema, &first).await, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_string_match_treats_wildcards_literally() {
    let (_store, client, schema) = ready_store().await;
    seed(
        client.as_ref(),
        &schema,
        &[
            MyItem::new(1, 0).with_id(1).named("100% cotton"),
            MyItem::new(2, 0).with_id(2).named("1000 cotton"),
        ],
    )
    .await;

    let query = Query::new().filter(Predicate::contains(MemberRef::string("Name"), "0% c"));
    assert_eq!(query_ids(client.as_ref(), &schema, &query).await, vec![1]);
}

#[tokio::test]
async fn test_any_element_and_filtered_counts() {
    let (_store, client, schema) = ready_store().await;
    seed(
        client.as_ref(),
        &schema,
        &[
            MyItem::new(1, 0).with_id(1).tagged(&["red", "blue"]),
            MyItem::new(2, 0).with_id(2).tagged(&["green"]),
            MyItem::new(3, 0).with_id(3).tagged(&["blue"]),
        ],
    )
    .await;

    let blue = Predicate::any_element(MemberRef::string("Tags"), ComparisonOp::Eq, "blue");
    let compiler = SqlCompiler::default();
    let filter = compiler.compile_where(&schema, Some(&blue)).unwrap();

    assert_eq!(client.row_count_by_filter(&schema, &filter).await.unwrap(), 2);
    assert_eq!(
        client.ids_by_filter(&schema, &filter).await.unwrap(),
        vec![StructureId::Identity(1), StructureId::Identity(3)]
    );

    let unfiltered = compiler.compile_where(&schema, None).unwrap();
    assert_eq!(client.row_count_by_filter(&schema, &unfiltered).await.unwrap(), 3);
}

#[tokio::test]
async fn test_update_replaces_index_rows() {
    let (_store, client, schema) = ready_store().await;
    seed(client.as_ref(), &schema, &[MyItem::new(1, 5).with_id(1)]).await;

    let updated = MyItem::new(7, 5).with_id(1);
    let json = serde_json::to_value(&updated).unwrap();
    let indexes = extract_indexes(&schema, &json).unwrap();
    client
        .update(&schema, &StructureId::Identity(1), &json.to_string(), &indexes)
        .await
        .unwrap();

    let old = Query::new().filter(Predicate::eq(MemberRef::integer("Int1"), 1));
    assert!(query_ids(client.as_ref(), &schema, &old).await.is_empty());
    let new = Query::new().filter(Predicate::eq(MemberRef::integer("Int1"), 7));
    assert_eq!(query_ids(client.as_ref(), &schema, &new).await, vec![1]);

    let missing = client
        .update(&schema, &StructureId::Identity(2), &json.to_string(), &indexes)
        .await;
    assert!(matches!(
        missing,
        Err(QuarryError::Store(StoreError::NotFound { .. }))
    ));
}

#[tokio::test]
async fn test_deletes_report_counts() {
    let (_store, client, schema) = ready_store().await;
    let items: Vec<MyItem> = (1..=5).map(|i| MyItem::new(i as i64, 0).with_id(i)).collect();
    seed(client.as_ref(), &schema, &items).await;

    let deleted = client
        .delete_by_ids(&schema, &[StructureId::Identity(1), StructureId::Identity(42)])
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    let deleted = client
        .delete_by_id_interval(&schema, &StructureId::Identity(2), &StructureId::Identity(3))
        .await
        .unwrap();
    assert_eq!(deleted, 2);

    let remaining = client
        .fetch_by_id_interval(&schema, &StructureId::Identity(1), &StructureId::Identity(10))
        .await
        .unwrap();
    assert_eq!(remaining.len(), 2);

    let query = Query::new().filter(Predicate::lt(MemberRef::integer("Int1"), 4));
    assert!(query_ids(client.as_ref(), &schema, &query).await.is_empty());
}

#[tokio::test]
async fn test_identities_skip_explicit_ids() {
    let (_store, client, schema) = ready_store().await;
    assert_eq!(client.reserve_identities(&schema, 3).await.unwrap(), 1);
    assert_eq!(client.reserve_identities(&schema, 1).await.unwrap(), 4);

    seed(client.as_ref(), &schema, &[MyItem::new(0, 0).with_id(10)]).await;
    assert_eq!(client.reserve_identities(&schema, 1).await.unwrap(), 11);
}

#[tokio::test]
async fn test_identities_rejected_for_guid_ids() {
    let (_store, client, _) = ready_store().await;
    let schema = GuidItem::schema().unwrap();
    client.upsert_schema(&schema).await.unwrap();
    assert!(matches!(
        client.reserve_identities(&schema, 1).await,
        Err(QuarryError::Unsupported(_))
    ));
}

#[tokio::test]
async fn test_guid_ids_round_trip() {
    let (_store, client, _) = ready_store().await;
    let schema = GuidItem::schema().unwrap();
    client.upsert_schema(&schema).await.unwrap();

    let mut item = GuidItem::new(5);
    item.structure_id = Some(uuid::Uuid::now_v7());
    insert(client.as_ref(), &schema, &item).await;

    let found = client
        .fetch_by_ids(&schema, &[item.structure_id().unwrap()])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, item.structure_id().unwrap());
}

#[tokio::test]
async fn test_unique_member_is_enforced() {
    let (_store, client, _) = ready_store().await;
    let schema = StringItem::schema().unwrap();
    client.upsert_schema(&schema).await.unwrap();

    insert(client.as_ref(), &schema, &StringItem::new("a", "same")).await;
    let second = StringItem::new("b", "same");
    let json = serde_json::to_value(&second).unwrap();
    let indexes = extract_indexes(&schema, &json).unwrap();
    let result = client
        .insert(&schema, &second.structure_id().unwrap(), &json.to_string(), &indexes)
        .await;
    assert!(matches!(result, Err(QuarryError::Store(StoreError::QueryFailed { .. }))));
    assert_eq!(client.row_count(&schema).await.unwrap(), 1);
}

#[tokio::test]
async fn test_closed_client_rejects_calls() {
    let (store, client, schema) = ready_store().await;
    client.close().await.unwrap();
    assert!(client.is_closed());
    assert!(matches!(
        client.row_count(&schema).await,
        Err(QuarryError::Store(StoreError::ConnectionClosed))
    ));

    let other = store.connect().await.unwrap();
    assert_eq!(other.row_count(&schema).await.unwrap(), 0);
}
