//! Quarry Test Utilities
//!
//! Centralized test infrastructure for the Quarry workspace:
//! - Fixture structure types
//! - Recording fetcher and failing cache entry doubles
//! - Proptest generators for ids and predicate trees
//! - Tracing setup for tests

// Re-export core types for convenience
pub use quarry_core::{
    CacheConsumeMode, DataTypeCode, IdType, QuarryError, QuarryResult, QueryValue, SchemaBuilder,
    Structure, StructureId, StructureKey, StructureSchema,
};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use quarry_core::CacheError;
use quarry_storage::{CacheEntry, CacheStats, MemoryCacheEntry, StructureFetcher};
use std::collections::HashMap;
use std::sync::Mutex;

// ============================================================================
// TRACING
// ============================================================================

static TRACING: Lazy<()> = Lazy::new(|| {
    let filter = tracing_subscriber::EnvFilter::try_from_env("QUARRY_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
});

/// Install a test subscriber once per process. Filter via `QUARRY_LOG`.
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Structure types used across the test suites.

    use super::*;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    /// Identity-keyed structure with two comparable integer members.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct MyItem {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub structure_id: Option<i32>,
        pub int1: i64,
        pub int2: i64,
        pub name: String,
        pub score: f64,
        #[serde(default)]
        pub tags: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub created_at: Option<DateTime<Utc>>,
    }

    impl MyItem {
        pub fn new(int1: i64, int2: i64) -> Self {
            Self {
                structure_id: None,
                int1,
                int2,
                name: format!("item-{}-{}", int1, int2),
                score: int1 as f64,
                tags: Vec::new(),
                created_at: None,
            }
        }

        pub fn with_id(mut self, id: i32) -> Self {
            self.structure_id = Some(id);
            self
        }

        pub fn named(mut self, name: impl Into<String>) -> Self {
            self.name = name.into();
            self
        }

        pub fn tagged(mut self, tags: &[&str]) -> Self {
            self.tags = tags.iter().map(|t| t.to_string()).collect();
            self
        }

        pub fn scored(mut self, score: f64) -> Self {
            self.score = score;
            self
        }

        pub fn created(mut self, at: DateTime<Utc>) -> Self {
            self.created_at = Some(at);
            self
        }
    }

    impl Structure for MyItem {
        const NAME: &'static str = "MyItem";
        const ID_TYPE: IdType = IdType::Identity;

        fn describe(schema: SchemaBuilder) -> SchemaBuilder {
            schema
                .member("Int1", DataTypeCode::Integer)
                .member("Int2", DataTypeCode::Integer)
                .member("Name", DataTypeCode::String)
                .member("Score", DataTypeCode::Fractal)
                .enumerable_member("Tags", DataTypeCode::String)
                .member("CreatedAt", DataTypeCode::DateTime)
        }

        fn structure_id(&self) -> Option<StructureId> {
            self.structure_id.map(StructureId::Identity)
        }
    }

    /// GUID-keyed structure.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct GuidItem {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub structure_id: Option<Uuid>,
        pub value: i64,
        #[serde(default)]
        pub active: bool,
    }

    impl GuidItem {
        pub fn new(value: i64) -> Self {
            Self {
                structure_id: None,
                value,
                active: true,
            }
        }
    }

    impl Structure for GuidItem {
        const NAME: &'static str = "GuidItem";
        const ID_TYPE: IdType = IdType::Guid;

        fn describe(schema: SchemaBuilder) -> SchemaBuilder {
            schema
                .member("Value", DataTypeCode::Integer)
                .member("Active", DataTypeCode::Bool)
        }

        fn structure_id(&self) -> Option<StructureId> {
            self.structure_id.map(StructureId::Guid)
        }
    }

    /// String-keyed structure in a namespace.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct StringItem {
        pub structure_id: String,
        pub value: String,
    }

    impl StringItem {
        pub fn new(id: impl Into<String>, value: impl Into<String>) -> Self {
            Self {
                structure_id: id.into(),
                value: value.into(),
            }
        }
    }

    impl Structure for StringItem {
        const NAME: &'static str = "StringItem";
        const NAMESPACE: &'static str = "catalog";
        const ID_TYPE: IdType = IdType::String;

        fn describe(schema: SchemaBuilder) -> SchemaBuilder {
            schema.unique_member("Value", DataTypeCode::String)
        }

        fn structure_id(&self) -> Option<StructureId> {
            Some(StructureId::String(self.structure_id.clone()))
        }
    }

    /// Schema of [`MyItem`].
    pub fn my_item_schema() -> StructureSchema {
        match MyItem::schema() {
            Ok(schema) => schema,
            Err(e) => panic!("MyItem schema must build: {}", e),
        }
    }

    pub fn my_item_key() -> StructureKey {
        MyItem::key()
    }
}

// ============================================================================
// DOUBLES
// ============================================================================

pub mod doubles {
    //! Fetcher and cache entry doubles for cache layer tests.

    use super::*;

    /// One call made against a [`RecordingFetcher`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum FetchCall {
        Fetch(StructureId),
        FetchMany(Vec<StructureId>),
        Exists(StructureId),
    }

    /// In-memory fetcher that records every call.
    #[derive(Debug, Default)]
    pub struct RecordingFetcher {
        rows: Mutex<HashMap<StructureId, String>>,
        calls: Mutex<Vec<FetchCall>>,
        fail_with: Mutex<Option<QuarryError>>,
    }

    impl RecordingFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_rows<I, P>(rows: I) -> Self
        where
            I: IntoIterator<Item = (StructureId, P)>,
            P: Into<String>,
        {
            let fetcher = Self::new();
            for (id, payload) in rows {
                fetcher.insert(id, payload);
            }
            fetcher
        }

        pub fn insert(&self, id: StructureId, payload: impl Into<String>) {
            self.lock_rows().insert(id, payload.into());
        }

        /// Make every following call fail with `error`.
        pub fn fail_with(&self, error: QuarryError) {
            *self.fail_with.lock().unwrap_or_else(|e| e.into_inner()) = Some(error);
        }

        pub fn calls(&self) -> Vec<FetchCall> {
            self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }

        pub fn clear_calls(&self) {
            self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
        }

        /// Ids passed to `fetch` or `fetch_many`, flattened in call order.
        pub fn fetched_ids(&self) -> Vec<StructureId> {
            self.calls()
                .into_iter()
                .flat_map(|call| match call {
                    FetchCall::Fetch(id) => vec![id],
                    FetchCall::FetchMany(ids) => ids,
                    FetchCall::Exists(_) => Vec::new(),
                })
                .collect()
        }

        fn lock_rows(&self) -> std::sync::MutexGuard<'_, HashMap<StructureId, String>> {
            self.rows.lock().unwrap_or_else(|e| e.into_inner())
        }

        fn record(&self, call: FetchCall) -> QuarryResult<()> {
            self.calls
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(call);
            match self.fail_with.lock().unwrap_or_else(|e| e.into_inner()).clone() {
                Some(error) => Err(error),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl StructureFetcher for RecordingFetcher {
        async fn fetch(&self, id: &StructureId) -> QuarryResult<Option<String>> {
            self.record(FetchCall::Fetch(id.clone()))?;
            Ok(self.lock_rows().get(id).cloned())
        }

        async fn fetch_many(&self, ids: &[StructureId]) -> QuarryResult<Vec<(StructureId, String)>> {
            self.record(FetchCall::FetchMany(ids.to_vec()))?;
            let rows = self.lock_rows();
            // Reverse order so callers cannot rely on the store's ordering.
            Ok(ids
                .iter()
                .rev()
                .filter_map(|id| rows.get(id).map(|p| (id.clone(), p.clone())))
                .collect())
        }

        async fn exists(&self, id: &StructureId) -> QuarryResult<bool> {
            self.record(FetchCall::Exists(id.clone()))?;
            Ok(self.lock_rows().contains_key(id))
        }
    }

    /// Cache entry backed by a [`MemoryCacheEntry`] whose operations can be
    /// made to fail.
    #[derive(Debug)]
    pub struct FailingCacheEntry {
        inner: MemoryCacheEntry,
        fail_clear: bool,
        fail_get: bool,
        fail_put: bool,
    }

    impl FailingCacheEntry {
        pub fn new(structure: StructureKey) -> Self {
            Self {
                inner: MemoryCacheEntry::new(structure),
                fail_clear: false,
                fail_get: false,
                fail_put: false,
            }
        }

        pub fn failing_clear(mut self) -> Self {
            self.fail_clear = true;
            self
        }

        pub fn failing_get(mut self) -> Self {
            self.fail_get = true;
            self
        }

        pub fn failing_put(mut self) -> Self {
            self.fail_put = true;
            self
        }

        fn failure(&self, operation: &str) -> CacheError {
            CacheError::Backend {
                structure: self.inner.structure().to_string(),
                reason: format!("injected {} failure", operation),
            }
        }
    }

    #[async_trait]
    impl CacheEntry for FailingCacheEntry {
        fn structure(&self) -> &StructureKey {
            self.inner.structure()
        }

        async fn get(&self, id: &StructureId) -> Result<Option<String>, CacheError> {
            if self.fail_get {
                return Err(self.failure("get"));
            }
            self.inner.get(id).await
        }

        async fn get_many(&self, ids: &[StructureId]) -> Result<Vec<Option<String>>, CacheError> {
            if self.fail_get {
                return Err(self.failure("get"));
            }
            self.inner.get_many(ids).await
        }

        async fn put(&self, id: StructureId, payload: String) -> Result<(), CacheError> {
            if self.fail_put {
                return Err(self.failure("put"));
            }
            self.inner.put(id, payload).await
        }

        async fn put_many(&self, items: Vec<(StructureId, String)>) -> Result<(), CacheError> {
            if self.fail_put {
                return Err(self.failure("put"));
            }
            self.inner.put_many(items).await
        }

        async fn generation(&self) -> Result<u64, CacheError> {
            self.inner.generation().await
        }

        async fn put_many_if_generation(
            &self,
            generation: u64,
            items: Vec<(StructureId, String)>,
        ) -> Result<bool, CacheError> {
            if self.fail_put {
                return Err(self.failure("put"));
            }
            self.inner.put_many_if_generation(generation, items).await
        }

        async fn remove(&self, id: &StructureId) -> Result<(), CacheError> {
            self.inner.remove(id).await
        }

        async fn clear(&self) -> Result<(), CacheError> {
            if self.fail_clear {
                return Err(self.failure("clear"));
            }
            self.inner.clear().await
        }

        async fn stats(&self) -> Result<CacheStats, CacheError> {
            self.inner.stats().await
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for ids and predicate trees over [`fixtures::MyItem`].

    use super::*;
    use proptest::prelude::*;
    use quarry_query::{ComparisonOp, MemberRef, Predicate, StringOp};
    use uuid::Uuid;

    pub fn arb_identity_id() -> impl Strategy<Value = StructureId> {
        (1..=i32::MAX).prop_map(StructureId::Identity)
    }

    pub fn arb_guid_id() -> impl Strategy<Value = StructureId> {
        any::<u128>()
            .prop_filter("nil GUID", |v| *v != 0)
            .prop_map(|v| StructureId::Guid(Uuid::from_u128(v)))
    }

    pub fn arb_string_id() -> impl Strategy<Value = StructureId> {
        "[a-z][a-z0-9-]{0,15}".prop_map(StructureId::String)
    }

    pub fn arb_structure_id() -> impl Strategy<Value = StructureId> {
        prop_oneof![
            arb_identity_id(),
            (1..=i64::MAX).prop_map(StructureId::BigIdentity),
            arb_guid_id(),
            arb_string_id(),
        ]
    }

    /// Small identity ids so batches collide with cached ones.
    pub fn arb_id_batch() -> impl Strategy<Value = Vec<StructureId>> {
        prop::collection::vec((1..20i32).prop_map(StructureId::Identity), 0..16)
    }

    pub fn arb_comparison_op() -> impl Strategy<Value = ComparisonOp> {
        prop_oneof![
            Just(ComparisonOp::Eq),
            Just(ComparisonOp::Ne),
            Just(ComparisonOp::Lt),
            Just(ComparisonOp::Lte),
            Just(ComparisonOp::Gt),
            Just(ComparisonOp::Gte),
        ]
    }

    pub fn arb_string_op() -> impl Strategy<Value = StringOp> {
        prop_oneof![
            Just(StringOp::Contains),
            Just(StringOp::StartsWith),
            Just(StringOp::EndsWith),
        ]
    }

    fn arb_leaf() -> impl Strategy<Value = Predicate> {
        prop_oneof![
            (prop_oneof![Just("Int1"), Just("Int2")], arb_comparison_op(), any::<i64>()).prop_map(
                |(member, op, value)| Predicate::compare(MemberRef::integer(member), op, value)
            ),
            (arb_comparison_op(), -1.0e6..1.0e6f64)
                .prop_map(|(op, value)| Predicate::compare(MemberRef::fractal("Score"), op, value)),
            (arb_string_op(), "[a-z%_]{0,8}").prop_map(|(op, value)| Predicate::StringMatch {
                member: MemberRef::string("Name"),
                op,
                value,
            }),
            arb_comparison_op().prop_map(|op| Predicate::members(
                MemberRef::integer("Int1"),
                op,
                MemberRef::integer("Int2"),
            )),
            prop::collection::vec(any::<i64>(), 0..5)
                .prop_map(|values| Predicate::in_set(MemberRef::integer("Int1"), values)),
            "[a-z]{1,6}".prop_map(|tag| Predicate::any_element(
                MemberRef::string("Tags"),
                ComparisonOp::Eq,
                tag,
            )),
        ]
    }

    /// Predicate trees that compile against the `MyItem` schema.
    pub fn arb_predicate() -> impl Strategy<Value = Predicate> {
        arb_leaf().prop_recursive(4, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 1..4).prop_map(Predicate::And),
                prop::collection::vec(inner.clone(), 1..4).prop_map(Predicate::Or),
                inner.prop_map(|p| Predicate::Not(Box::new(p))),
            ]
        })
    }

    pub fn arb_query_value() -> impl Strategy<Value = QueryValue> {
        prop_oneof![
            Just(QueryValue::Null),
            any::<i64>().prop_map(QueryValue::Integer),
            any::<bool>().prop_map(QueryValue::Bool),
            "[a-zA-Z0-9 ]{0,12}".prop_map(QueryValue::String),
        ]
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for Quarry error variants.

    use super::*;

    #[track_caller]
    pub fn assert_query_error<T: std::fmt::Debug>(result: &QuarryResult<T>) {
        match result {
            Err(QuarryError::Query(_)) => {}
            other => panic!("Expected Query error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_unsupported<T: std::fmt::Debug>(result: &QuarryResult<T>) {
        match result {
            Err(QuarryError::Unsupported(_)) => {}
            other => panic!("Expected Unsupported error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_cache_error<T: std::fmt::Debug>(result: &QuarryResult<T>) {
        match result {
            Err(QuarryError::Cache(_)) => {}
            other => panic!("Expected Cache error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &QuarryResult<T>) {
        match result {
            Err(QuarryError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }
}
