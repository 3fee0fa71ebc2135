//! In-memory repository: the reference implementation of [`Repository`]
//!
//! Keeps the global commit order as a `Vec<Record>` and each named stream
//! as an ordered list of indices into it, so linked events are shared
//! rather than copied. Every write validates and appends under a single
//! write lock per store instance.

use super::{ReadStart, Repository};
use crate::error::{EventStoreError, Result};
use crate::types::{Record, Stream, GLOBAL_STREAM};
use crate::version::{ExpectedVersion, ResolvedVersion};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Storage {
    /// Global commit order
    records: Vec<Record>,

    /// event id → index in `records`
    index: HashMap<String, usize>,

    /// stream name → indices in `records`, position order
    streams: HashMap<String, Vec<usize>>,

    /// Stream names in creation order
    stream_names: Vec<String>,
}

impl Storage {
    fn last_position(&self, stream: &Stream) -> Option<u64> {
        self.streams
            .get(stream.name())
            .and_then(|members| members.len().checked_sub(1))
            .map(|p| p as u64)
    }

    fn check_version(&self, stream: &Stream, resolved: ResolvedVersion) -> Result<Option<u64>> {
        if stream.is_global() {
            return Ok(None);
        }
        let actual = self.last_position(stream);
        match resolved {
            ResolvedVersion::Last(expected) if !resolved.accepts(actual) => {
                Err(EventStoreError::WrongExpectedEventVersion {
                    stream: stream.name().to_string(),
                    expected,
                    actual,
                })
            }
            _ => Ok(actual),
        }
    }

    fn index_of(&self, event_id: &str) -> Result<usize> {
        self.index
            .get(event_id)
            .copied()
            .ok_or_else(|| EventStoreError::EventNotFound(event_id.to_string()))
    }

    fn members(&self, stream: &Stream) -> &[usize] {
        self.streams
            .get(stream.name())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn members_mut(&mut self, stream: &Stream) -> &mut Vec<usize> {
        if !self.streams.contains_key(stream.name()) {
            self.stream_names.push(stream.name().to_string());
        }
        self.streams.entry(stream.name().to_string()).or_default()
    }

    /// Take `count` records from `members`, starting after the cursor
    fn page<I>(&self, members: I, start: &ReadStart, count: usize) -> Result<Vec<Record>>
    where
        I: Iterator<Item = usize> + Clone,
    {
        let skip = match start {
            ReadStart::Head => 0,
            ReadStart::After(event_id) => {
                let target = self.index_of(event_id)?;
                members
                    .clone()
                    .position(|i| i == target)
                    .ok_or_else(|| EventStoreError::EventNotFound(event_id.clone()))?
                    + 1
            }
        };

        Ok(members
            .skip(skip)
            .take(count)
            .map(|i| self.records[i].clone())
            .collect())
    }
}

/// Reference in-memory event log
///
/// Safe under concurrent `Any`/explicit-version writers. `Auto` resolves
/// the expected position in a separate step before the write lock is
/// taken (and yields in between), so concurrent `Auto` writers race just
/// as they would against any other adapter without an external lock.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    storage: RwLock<Storage>,
}

impl InMemoryRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed records
    pub async fn len(&self) -> usize {
        self.storage.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn resolve(&self, stream: &Stream, expected_version: ExpectedVersion) -> Result<ResolvedVersion> {
        let resolved = {
            let storage = self.storage.read().await;
            expected_version.resolve_for(stream, |s| storage.last_position(s))?
        };
        // Let interleaving writers run between resolution and the write path
        tokio::task::yield_now().await;
        Ok(resolved)
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn append_to_stream(
        &self,
        records: Vec<Record>,
        stream: &Stream,
        expected_version: ExpectedVersion,
    ) -> Result<()> {
        let resolved = self.resolve(stream, expected_version).await?;
        let mut storage = self.storage.write().await;

        let actual = storage.check_version(stream, resolved)?;
        if records.is_empty() {
            return Ok(());
        }

        {
            let mut batch = HashSet::new();
            for record in &records {
                if storage.index.contains_key(&record.event_id)
                    || !batch.insert(record.event_id.as_str())
                {
                    return Err(EventStoreError::EventDuplicatedInStream {
                        event_id: record.event_id.clone(),
                        stream: stream.name().to_string(),
                    });
                }
            }
        }

        let count = records.len();
        let mut appended = Vec::with_capacity(count);
        for record in records {
            let idx = storage.records.len();
            storage.index.insert(record.event_id.clone(), idx);
            storage.records.push(record);
            appended.push(idx);
        }
        if !stream.is_global() {
            storage.members_mut(stream).extend(appended);
        }

        tracing::debug!(
            stream = %stream,
            count,
            first_position = resolved.next_position(actual, 0),
            "Records appended"
        );
        Ok(())
    }

    async fn link_to_stream(
        &self,
        event_ids: &[String],
        stream: &Stream,
        expected_version: ExpectedVersion,
    ) -> Result<()> {
        let resolved = self.resolve(stream, expected_version).await?;
        let mut storage = self.storage.write().await;

        storage.check_version(stream, resolved)?;

        let mut linked = Vec::with_capacity(event_ids.len());
        for event_id in event_ids {
            let idx = storage.index_of(event_id)?;
            let already_member = stream.is_global() || storage.members(stream).contains(&idx);
            if already_member || linked.contains(&idx) {
                return Err(EventStoreError::EventDuplicatedInStream {
                    event_id: event_id.clone(),
                    stream: stream.name().to_string(),
                });
            }
            linked.push(idx);
        }

        // An empty batch never creates the stream
        if linked.is_empty() || stream.is_global() {
            return Ok(());
        }
        let count = linked.len();
        storage.members_mut(stream).extend(linked);

        tracing::debug!(stream = %stream, count, "Events linked");
        Ok(())
    }

    async fn delete_stream(&self, stream: &Stream) -> Result<()> {
        if stream.is_global() {
            return Err(EventStoreError::IncorrectStreamData(
                "The global stream cannot be deleted".to_string(),
            ));
        }

        let mut storage = self.storage.write().await;
        if storage.streams.remove(stream.name()).is_some() {
            storage.stream_names.retain(|name| name != stream.name());
            tracing::debug!(stream = %stream, "Stream deleted");
        }
        Ok(())
    }

    async fn has_event(&self, event_id: &str) -> Result<bool> {
        Ok(self.storage.read().await.index.contains_key(event_id))
    }

    async fn read_event(&self, event_id: &str) -> Result<Record> {
        let storage = self.storage.read().await;
        let idx = storage.index_of(event_id)?;
        Ok(storage.records[idx].clone())
    }

    async fn read_events_forward(
        &self,
        stream: &Stream,
        start: &ReadStart,
        count: usize,
    ) -> Result<Vec<Record>> {
        if stream.is_global() {
            return self.read_all_streams_forward(start, count).await;
        }
        let storage = self.storage.read().await;
        storage.page(storage.members(stream).iter().copied(), start, count)
    }

    async fn read_events_backward(
        &self,
        stream: &Stream,
        start: &ReadStart,
        count: usize,
    ) -> Result<Vec<Record>> {
        if stream.is_global() {
            return self.read_all_streams_backward(start, count).await;
        }
        let storage = self.storage.read().await;
        storage.page(storage.members(stream).iter().rev().copied(), start, count)
    }

    async fn read_all_streams_forward(
        &self,
        start: &ReadStart,
        count: usize,
    ) -> Result<Vec<Record>> {
        let storage = self.storage.read().await;
        storage.page(0..storage.records.len(), start, count)
    }

    async fn read_all_streams_backward(
        &self,
        start: &ReadStart,
        count: usize,
    ) -> Result<Vec<Record>> {
        let storage = self.storage.read().await;
        storage.page((0..storage.records.len()).rev(), start, count)
    }

    async fn get_all_streams(&self) -> Result<Vec<Stream>> {
        let storage = self.storage.read().await;
        let mut streams = Vec::with_capacity(storage.stream_names.len() + 1);
        streams.push(GLOBAL_STREAM);
        for name in &storage.stream_names {
            streams.push(Stream::new(name.as_str())?);
        }
        Ok(streams)
    }

    async fn streams_of(&self, event_id: &str) -> Result<Vec<Stream>> {
        let storage = self.storage.read().await;
        let Some(idx) = storage.index.get(event_id).copied() else {
            return Ok(Vec::new());
        };
        storage
            .stream_names
            .iter()
            .filter(|name| storage.streams[name.as_str()].contains(&idx))
            .map(|name| Stream::new(name.as_str()))
            .collect()
    }

    async fn position_in_stream(&self, event_id: &str, stream: &Stream) -> Result<u64> {
        let storage = self.storage.read().await;
        let idx = storage.index_of(event_id)?;
        storage
            .members(stream)
            .iter()
            .position(|&i| i == idx)
            .map(|p| p as u64)
            .ok_or_else(|| {
                EventStoreError::EventNotFound(format!("{} in stream '{}'", event_id, stream))
            })
    }

    async fn global_position(&self, event_id: &str) -> Result<u64> {
        let storage = self.storage.read().await;
        Ok(storage.index_of(event_id)? as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;

    fn record(id: &str, event_type: &str) -> Record {
        Record::new(id, event_type, "{}", "{}", Utc::now(), None)
    }

    fn stream(name: &str) -> Stream {
        Stream::new(name).unwrap()
    }

    fn ids(records: &[Record]) -> Vec<&str> {
        records.iter().map(|r| r.event_id.as_str()).collect()
    }

    async fn seeded() -> InMemoryRepository {
        let repo = InMemoryRepository::new();
        repo.append_to_stream(
            vec![record("a1", "A"), record("a2", "A"), record("a3", "A")],
            &stream("a"),
            ExpectedVersion::NoStream,
        )
        .await
        .unwrap();
        repo.append_to_stream(
            vec![record("b1", "B"), record("b2", "B")],
            &stream("b"),
            ExpectedVersion::NoStream,
        )
        .await
        .unwrap();
        repo
    }

    #[tokio::test]
    async fn test_append_with_explicit_versions() {
        let repo = InMemoryRepository::new();
        let orders = stream("orders-1");

        repo.append_to_stream(vec![record("e1", "Created")], &orders, ExpectedVersion::NoStream)
            .await
            .unwrap();
        repo.append_to_stream(vec![record("e2", "Updated")], &orders, ExpectedVersion::Exact(0))
            .await
            .unwrap();

        assert_eq!(repo.position_in_stream("e1", &orders).await.unwrap(), 0);
        assert_eq!(repo.position_in_stream("e2", &orders).await.unwrap(), 1);

        let err = repo
            .append_to_stream(vec![record("e3", "Created")], &orders, ExpectedVersion::NoStream)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EventStoreError::WrongExpectedEventVersion {
                expected: None,
                actual: Some(1),
                ..
            }
        ));
        assert!(!repo.has_event("e3").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_version_aborts_whole_batch() {
        let repo = seeded().await;
        let err = repo
            .append_to_stream(
                vec![record("a4", "A"), record("a5", "A")],
                &stream("a"),
                ExpectedVersion::Exact(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EventStoreError::WrongExpectedEventVersion { .. }));

        let records = repo
            .read_events_forward(&stream("a"), &ReadStart::Head, 10)
            .await
            .unwrap();
        assert_eq!(ids(&records), vec!["a1", "a2", "a3"]);
        assert_eq!(repo.len().await, 5);
    }

    #[tokio::test]
    async fn test_auto_version_appends_after_last() {
        let repo = seeded().await;
        repo.append_to_stream(vec![record("a4", "A")], &stream("a"), ExpectedVersion::Auto)
            .await
            .unwrap();
        repo.append_to_stream(vec![record("c1", "C")], &stream("c"), ExpectedVersion::Auto)
            .await
            .unwrap();

        assert_eq!(repo.position_in_stream("a4", &stream("a")).await.unwrap(), 3);
        assert_eq!(repo.position_in_stream("c1", &stream("c")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicated_event_ids() {
        let repo = seeded().await;

        let same_stream = repo
            .append_to_stream(vec![record("a1", "A")], &stream("a"), ExpectedVersion::Any)
            .await;
        assert!(matches!(
            same_stream,
            Err(EventStoreError::EventDuplicatedInStream { .. })
        ));

        let other_stream = repo
            .append_to_stream(vec![record("a1", "A")], &stream("z"), ExpectedVersion::Any)
            .await;
        assert!(matches!(
            other_stream,
            Err(EventStoreError::EventDuplicatedInStream { .. })
        ));

        let within_batch = repo
            .append_to_stream(
                vec![record("n1", "N"), record("n1", "N")],
                &stream("n"),
                ExpectedVersion::Any,
            )
            .await;
        assert!(matches!(
            within_batch,
            Err(EventStoreError::EventDuplicatedInStream { .. })
        ));

        assert_eq!(repo.len().await, 5);
        assert!(!repo.has_event("n1").await.unwrap());
        assert_eq!(repo.get_all_streams().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_global_stream_append() {
        let repo = InMemoryRepository::new();
        repo.append_to_stream(vec![record("g1", "G")], &GLOBAL_STREAM, ExpectedVersion::Any)
            .await
            .unwrap();

        let err = repo
            .append_to_stream(vec![record("g2", "G")], &GLOBAL_STREAM, ExpectedVersion::NoStream)
            .await
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidExpectedVersion(_)));

        assert_eq!(repo.global_position("g1").await.unwrap(), 0);
        assert!(repo.streams_of("g1").await.unwrap().is_empty());
        assert_eq!(repo.get_all_streams().await.unwrap(), vec![GLOBAL_STREAM]);
    }

    #[tokio::test]
    async fn test_link_is_a_reference() {
        let repo = InMemoryRepository::new();
        repo.append_to_stream(
            vec![Record::new("e1", "Created", r#"{"sku":"x"}"#, r#"{"k":1}"#, Utc::now(), None)],
            &stream("orders-1"),
            ExpectedVersion::NoStream,
        )
        .await
        .unwrap();

        repo.link_to_stream(&["e1".to_string()], &stream("archive"), ExpectedVersion::NoStream)
            .await
            .unwrap();

        let linked = repo
            .read_events_forward(&stream("archive"), &ReadStart::Head, 10)
            .await
            .unwrap();
        assert_eq!(linked, vec![repo.read_event("e1").await.unwrap()]);

        // Links don't add global membership
        assert_eq!(repo.len().await, 1);
        assert_eq!(
            repo.streams_of("e1").await.unwrap(),
            vec![stream("orders-1"), stream("archive")]
        );
    }

    #[tokio::test]
    async fn test_link_failures() {
        let repo = seeded().await;

        let missing = repo
            .link_to_stream(&["nope".to_string()], &stream("x"), ExpectedVersion::Any)
            .await;
        assert!(matches!(missing, Err(EventStoreError::EventNotFound(_))));

        let already_member = repo
            .link_to_stream(&["a1".to_string()], &stream("a"), ExpectedVersion::Any)
            .await;
        assert!(matches!(
            already_member,
            Err(EventStoreError::EventDuplicatedInStream { .. })
        ));

        let into_global = repo
            .link_to_stream(&["a1".to_string()], &GLOBAL_STREAM, ExpectedVersion::Any)
            .await;
        assert!(matches!(
            into_global,
            Err(EventStoreError::EventDuplicatedInStream { .. })
        ));

        let wrong_version = repo
            .link_to_stream(&["b1".to_string()], &stream("a"), ExpectedVersion::Exact(0))
            .await;
        assert!(matches!(
            wrong_version,
            Err(EventStoreError::WrongExpectedEventVersion { .. })
        ));

        // Partially valid batch leaves the target untouched
        let partial = repo
            .link_to_stream(
                &["b1".to_string(), "missing".to_string()],
                &stream("x"),
                ExpectedVersion::Any,
            )
            .await;
        assert!(partial.is_err());
        assert!(repo
            .read_events_forward(&stream("x"), &ReadStart::Head, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_read_stream_pagination() {
        let repo = seeded().await;
        let a = stream("a");

        let page = repo.read_events_forward(&a, &ReadStart::Head, 2).await.unwrap();
        assert_eq!(ids(&page), vec!["a1", "a2"]);

        let page = repo
            .read_events_forward(&a, &ReadStart::after("a2"), 2)
            .await
            .unwrap();
        assert_eq!(ids(&page), vec!["a3"]);

        let page = repo.read_events_backward(&a, &ReadStart::Head, 2).await.unwrap();
        assert_eq!(ids(&page), vec!["a3", "a2"]);

        let page = repo
            .read_events_backward(&a, &ReadStart::after("a2"), 5)
            .await
            .unwrap();
        assert_eq!(ids(&page), vec!["a1"]);

        let missing = repo
            .read_events_forward(&stream("missing"), &ReadStart::Head, 5)
            .await
            .unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_cursor() {
        let repo = seeded().await;

        let unknown = repo
            .read_events_forward(&stream("a"), &ReadStart::after("zzz"), 2)
            .await;
        assert!(matches!(unknown, Err(EventStoreError::EventNotFound(_))));

        // Known event, but not a member of this stream
        let foreign = repo
            .read_events_forward(&stream("a"), &ReadStart::after("b1"), 2)
            .await;
        assert!(matches!(foreign, Err(EventStoreError::EventNotFound(_))));

        let global = repo.read_all_streams_backward(&ReadStart::after("zzz"), 2).await;
        assert!(matches!(global, Err(EventStoreError::EventNotFound(_))));
    }

    #[tokio::test]
    async fn test_read_all_streams_in_commit_order() {
        let repo = seeded().await;

        let page = repo.read_all_streams_forward(&ReadStart::Head, 4).await.unwrap();
        assert_eq!(ids(&page), vec!["a1", "a2", "a3", "b1"]);

        let page = repo
            .read_all_streams_forward(&ReadStart::after("a3"), 10)
            .await
            .unwrap();
        assert_eq!(ids(&page), vec!["b1", "b2"]);

        let page = repo.read_all_streams_backward(&ReadStart::Head, 3).await.unwrap();
        assert_eq!(ids(&page), vec!["b2", "b1", "a3"]);

        let via_global = repo
            .read_events_forward(&GLOBAL_STREAM, &ReadStart::Head, 10)
            .await
            .unwrap();
        assert_eq!(via_global.len(), 5);
    }

    #[tokio::test]
    async fn test_delete_stream() {
        let repo = seeded().await;

        repo.delete_stream(&stream("a")).await.unwrap();
        repo.delete_stream(&stream("a")).await.unwrap();
        repo.delete_stream(&stream("never-existed")).await.unwrap();

        assert!(repo
            .read_events_forward(&stream("a"), &ReadStart::Head, 10)
            .await
            .unwrap()
            .is_empty());
        // Records survive in the global stream
        assert!(repo.has_event("a1").await.unwrap());
        assert_eq!(repo.len().await, 5);
        assert_eq!(
            repo.get_all_streams().await.unwrap(),
            vec![GLOBAL_STREAM, stream("b")]
        );

        // A deleted stream starts over
        repo.append_to_stream(vec![record("a9", "A")], &stream("a"), ExpectedVersion::NoStream)
            .await
            .unwrap();
        assert_eq!(repo.position_in_stream("a9", &stream("a")).await.unwrap(), 0);

        assert!(matches!(
            repo.delete_stream(&GLOBAL_STREAM).await,
            Err(EventStoreError::IncorrectStreamData(_))
        ));
    }

    #[tokio::test]
    async fn test_last_stream_event() {
        let repo = seeded().await;
        let last = repo.last_stream_event(&stream("b")).await.unwrap().unwrap();
        assert_eq!(last.event_id, "b2");
        assert!(repo.last_stream_event(&stream("none")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_event_not_found() {
        let repo = InMemoryRepository::new();
        assert!(matches!(
            repo.read_event("missing").await,
            Err(EventStoreError::EventNotFound(_))
        ));
        assert!(matches!(
            repo.global_position("missing").await,
            Err(EventStoreError::EventNotFound(_))
        ));
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_append_does_not_create_stream() {
        let repo = InMemoryRepository::new();
        repo.append_to_stream(vec![], &stream("ghost"), ExpectedVersion::NoStream)
            .await
            .unwrap();

        assert_eq!(repo.get_all_streams().await.unwrap(), vec![GLOBAL_STREAM]);
        assert!(repo.last_stream_event(&stream("ghost")).await.unwrap().is_none());

        // The version check still applies to an empty batch
        repo.append_to_stream(vec![record("g1", "A")], &stream("ghost"), ExpectedVersion::NoStream)
            .await
            .unwrap();
        assert!(matches!(
            repo.append_to_stream(vec![], &stream("ghost"), ExpectedVersion::NoStream)
                .await,
            Err(EventStoreError::WrongExpectedEventVersion { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_link_does_not_create_stream() {
        let repo = InMemoryRepository::new();
        repo.append_to_stream(vec![record("e1", "A")], &GLOBAL_STREAM, ExpectedVersion::Any)
            .await
            .unwrap();

        repo.link_to_stream(&[], &GLOBAL_STREAM, ExpectedVersion::Any)
            .await
            .unwrap();
        repo.link_to_stream(&[], &stream("archive"), ExpectedVersion::Any)
            .await
            .unwrap();

        assert_eq!(repo.get_all_streams().await.unwrap(), vec![GLOBAL_STREAM]);
        assert!(matches!(
            repo.position_in_stream("e1", &GLOBAL_STREAM).await,
            Err(EventStoreError::EventNotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_any_appends_stay_gapless() {
        let repo = Arc::new(InMemoryRepository::new());
        let shared = stream("shared");

        let mut handles = Vec::new();
        for writer in 0..8 {
            let repo = repo.clone();
            let shared = shared.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    repo.append_to_stream(
                        vec![record(&format!("w{}-{}", writer, i), "W")],
                        &shared,
                        ExpectedVersion::Any,
                    )
                    .await
                    .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let records = repo
            .read_events_forward(&shared, &ReadStart::Head, 1_000)
            .await
            .unwrap();
        assert_eq!(records.len(), 200);
        for (expected, record) in records.iter().enumerate() {
            let position = repo
                .position_in_stream(&record.event_id, &shared)
                .await
                .unwrap();
            assert_eq!(position, expected as u64);
        }
    }

    #[tokio::test]
    async fn test_concurrent_auto_appends_can_conflict() {
        let repo = Arc::new(InMemoryRepository::new());
        let shared = stream("shared");

        let mut handles = Vec::new();
        for writer in 0..10 {
            let repo = repo.clone();
            let shared = shared.clone();
            handles.push(tokio::spawn(async move {
                repo.append_to_stream(
                    vec![record(&format!("w{}", writer), "W")],
                    &shared,
                    ExpectedVersion::Auto,
                )
                .await
            }));
        }

        let mut successes = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => successes += 1,
                Err(EventStoreError::WrongExpectedEventVersion { .. }) => conflicts += 1,
                Err(other) => panic!("unexpected error: {}", other),
            }
        }

        assert!(conflicts > 0);
        let records = repo
            .read_events_forward(&shared, &ReadStart::Head, 100)
            .await
            .unwrap();
        assert_eq!(records.len(), successes);
    }
}
