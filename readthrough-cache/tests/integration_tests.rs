//! Integration tests for the resource cache

use parking_lot::Mutex;
use readthrough_cache::prelude::*;
use readthrough_cache::{MemoryTemplate, ReadOptions, ResourceProperty, TransformConfig};
use readthrough_types::{ReadQuery, ResourceWithMeta};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Template that holds on to every read until the test answers it
#[derive(Default)]
struct Deferred {
    rows: Mutex<Vec<Value>>,
    reads: AtomicUsize,
    failures: AtomicUsize,
    pending: Mutex<Vec<(ReadRequest, TemplateControls)>>,
}

impl Deferred {
    fn with_rows(rows: Vec<Value>) -> Arc<Self> {
        let template = Deferred::default();
        *template.rows.lock() = rows;
        Arc::new(template)
    }

    fn set_rows(&self, rows: Vec<Value>) {
        *self.rows.lock() = rows;
    }

    /// Fail the next `count` reads synchronously
    fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    fn answer(&self, request: &ReadRequest, controls: &TemplateControls) {
        let rows = self.rows.lock().clone();
        let response = MemoryTemplate::new("id", rows).respond(request).unwrap();
        controls.put(response);
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn answer_all(&self) {
        let pending = std::mem::take(&mut *self.pending.lock());
        let rows = self.rows.lock().clone();
        for (request, controls) in pending {
            let response = MemoryTemplate::new("id", rows.clone())
                .respond(&request)
                .unwrap();
            controls.put(response);
        }
    }

    fn reject_all(&self, reason: &str) {
        let pending = std::mem::take(&mut *self.pending.lock());
        for (_, controls) in pending {
            controls.reject(reason);
        }
    }

    fn take_pending(&self) -> Vec<(ReadRequest, TemplateControls)> {
        std::mem::take(&mut *self.pending.lock())
    }
}

impl Template for Deferred {
    fn id_key(&self) -> &str {
        "id"
    }

    fn read(&self, request: ReadRequest, controls: TemplateControls) -> Result<(), ReadError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ReadError::failed("backend unavailable"));
        }
        self.pending.lock().push((request, controls));
        Ok(())
    }
}

/// Template whose reads fail synchronously a set number of times
struct Flaky {
    failures: AtomicUsize,
}

impl Template for Flaky {
    fn id_key(&self) -> &str {
        "id"
    }

    fn read(&self, request: ReadRequest, controls: TemplateControls) -> Result<(), ReadError> {
        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(ReadError::failed("backend unavailable"));
        }
        let data = (request.offset..request.offset + request.size)
            .map(|n| json!({ "id": n }))
            .collect();
        controls.put(ReadResponse::new(data));
        Ok(())
    }
}

fn counting() -> (Invalidator, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let invalidator = Invalidator::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (invalidator, calls)
}

fn abc() -> Vec<Value> {
    vec![json!({ "id": "a" }), json!({ "id": "b" }), json!({ "id": "c" })]
}

fn query(value: Value) -> ReadQuery {
    match value {
        Value::Object(map) => map,
        _ => panic!("query must be an object"),
    }
}

#[test]
fn test_first_read_loads_then_resolves() {
    let cache = ResourceCache::new();
    let (invalidator, calls) = counting();
    let consumer = cache.consumer("list", invalidator);
    let source = Deferred::with_rows(abc());
    let template = ResourceTemplate::fixed(source.clone());
    let options = ReadOptionsData::new(1, 3);

    assert_eq!(consumer.get_or_read(&template, &options).unwrap(), None);
    assert_eq!(source.reads(), 1);

    source.answer_all();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let page = consumer.get_or_read(&template, &options).unwrap();
    assert_eq!(page, Some(abc()));
    assert_eq!(source.reads(), 1);
}

#[test]
fn test_at_most_one_fetch_per_window() {
    let cache = ResourceCache::new();
    let first = cache.consumer("first", Invalidator::noop());
    let second = cache.consumer("second", Invalidator::noop());
    let source = Deferred::with_rows(abc());
    let template = ResourceTemplate::fixed(source.clone());
    let options = ReadOptionsData::new(1, 3);

    assert_eq!(first.get_or_read(&template, &options).unwrap(), None);
    assert_eq!(first.get_or_read(&template, &options).unwrap(), None);
    assert_eq!(second.get_or_read(&template, &options).unwrap(), None);
    second.get_or_read_meta(&template, &options).unwrap();

    assert_eq!(source.reads(), 1);
    assert_eq!(cache.metrics().deduplicated, 2);
}

#[test]
fn test_each_waiting_consumer_notified_once() {
    let cache = ResourceCache::new();
    let (first_invalidator, first_calls) = counting();
    let (second_invalidator, second_calls) = counting();
    let first = cache.consumer("first", first_invalidator);
    let second = cache.consumer("second", second_invalidator);
    let source = Deferred::with_rows(abc());
    let template = ResourceTemplate::fixed(source.clone());
    let options = ReadOptionsData::new(1, 3);

    first.get_or_read(&template, &options).unwrap();
    second.get_or_read_meta(&template, &options).unwrap();
    source.answer_all();

    assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    assert_eq!(second_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_pages_are_independent() {
    let cache = ResourceCache::new();
    let consumer = cache.consumer("list", Invalidator::noop());
    let rows: Vec<Value> = (0..6).map(|n| json!({ "id": n })).collect();
    let source = Deferred::with_rows(rows);
    let template = ResourceTemplate::fixed(source.clone());
    let page_one = ReadOptionsData::new(1, 3);
    let page_two = ReadOptionsData::new(2, 3);

    assert_eq!(consumer.get_or_read(&template, &page_one).unwrap(), None);
    assert_eq!(consumer.get_or_read(&template, &page_two).unwrap(), None);
    assert_eq!(source.reads(), 2);

    // answer only the second page
    let mut pending = source.take_pending();
    let (request, controls) = pending.remove(1);
    assert_eq!(request.offset, 3);
    let rows: Vec<Value> = (3..6).map(|n| json!({ "id": n })).collect();
    controls.put(ReadResponse::new(rows.clone()).with_total(6));

    assert_eq!(consumer.get_or_read(&template, &page_two).unwrap(), Some(rows));
    assert_eq!(consumer.get_or_read(&template, &page_one).unwrap(), None);

    let meta = consumer.get_meta(&template, &page_two).unwrap();
    assert_eq!(meta.meta.total, Some(6));
    assert_eq!(source.reads(), 2);
}

#[test]
fn test_positional_identity_is_stable() {
    let cache = ResourceCache::new();
    let consumer = cache.consumer("list", Invalidator::noop());
    let source = Deferred::with_rows(abc());
    let template = ResourceTemplate::fixed(source.clone());
    let options = ReadOptionsData::new(1, 3);

    consumer.get_or_read(&template, &options).unwrap();
    source.answer_all();

    // a smaller window over the same positions is served from the cache
    let first_two = consumer
        .get_or_read(&template, &ReadOptionsData::new(1, 2))
        .unwrap();
    assert_eq!(first_two, Some(abc()[..2].to_vec()));
    assert_eq!(source.reads(), 1);
}

#[test]
fn test_query_key_order_does_not_matter() {
    let cache = ResourceCache::new();
    let consumer = cache.consumer("list", Invalidator::noop());
    let source = Deferred::with_rows(abc());
    let template = ResourceTemplate::fixed(source.clone());

    let forward = ReadOptionsData::new(1, 3).with_query(query(json!({ "a": 1, "b": 2 })));
    let mut reversed_query = ReadQuery::new();
    reversed_query.insert("b".to_string(), json!(2));
    reversed_query.insert("a".to_string(), json!(1));
    let reversed = ReadOptionsData::new(1, 3).with_query(reversed_query);

    consumer.get_or_read(&template, &forward).unwrap();
    assert_eq!(consumer.get_or_read(&template, &reversed).unwrap(), None);
    assert_eq!(source.reads(), 1);
}

#[test]
fn test_shrinking_result_orphans_and_resets() {
    let cache = ResourceCache::new();
    let consumer = cache.consumer("list", Invalidator::noop());
    let source = Deferred::with_rows(abc());
    let template = ResourceTemplate::fixed(source.clone());

    consumer
        .get_or_read(&template, &ReadOptionsData::new(1, 3))
        .unwrap();
    source.answer_all();

    // the source shrinks; reading positions 2..4 orphans both
    source.set_rows(abc()[..2].to_vec());
    assert_eq!(
        consumer
            .get_or_read(&template, &ReadOptionsData::new(2, 2))
            .unwrap(),
        None
    );
    source.answer_all();
    assert_eq!(cache.metrics().orphaned, 2);

    // orphaned positions are left out of plain reads
    let page = consumer
        .get_or_read(&template, &ReadOptionsData::new(1, 3))
        .unwrap();
    assert_eq!(page, Some(abc()[..2].to_vec()));
    assert_eq!(source.reads(), 2);

    // a window mixing orphaned and unseen positions re-reads all of them
    source.set_rows(vec![
        json!({ "id": "a" }),
        json!({ "id": "b" }),
        json!({ "id": "d" }),
        json!({ "id": "e" }),
    ]);
    let wide = ReadOptionsData::new(1, 5);
    assert_eq!(consumer.get_or_read(&template, &wide).unwrap(), None);
    assert_eq!(source.reads(), 3);

    let loading = consumer.get_or_read_meta(&template, &wide).unwrap();
    let statuses: Vec<ReadStatus> = loading.data.iter().map(|item| item.status).collect();
    assert_eq!(
        statuses,
        vec![
            ReadStatus::Read,
            ReadStatus::Read,
            ReadStatus::Reading,
            ReadStatus::Reading,
            ReadStatus::Reading,
        ]
    );

    source.answer_all();
    let page = consumer.get_or_read(&template, &wide).unwrap().unwrap();
    let ids: Vec<&Value> = page.iter().map(|row| &row["id"]).collect();
    assert_eq!(ids, vec!["a", "b", "d", "e"]);

    let narrow = consumer
        .get_or_read(&template, &ReadOptionsData::new(1, 3))
        .unwrap()
        .unwrap();
    assert_eq!(narrow[2], json!({ "id": "d" }));
}

#[test]
fn test_meta_always_has_one_entry_per_position() {
    let cache = ResourceCache::new();
    let consumer = cache.consumer("list", Invalidator::noop());
    let source = Deferred::with_rows(abc());
    let template = ResourceTemplate::fixed(source.clone());
    let options = ReadOptionsData::new(1, 5);

    let unread = consumer.get_meta(&template, &options).unwrap();
    assert_eq!(unread.data.len(), 5);
    assert_eq!(unread.meta.status, ReadStatus::Unread);

    let reading = consumer.get_or_read_meta(&template, &options).unwrap();
    assert_eq!(reading.data.len(), 5);
    assert_eq!(reading.meta.status, ReadStatus::Reading);

    source.answer_all();
    let read = consumer.get_or_read_meta(&template, &options).unwrap();
    assert_eq!(read.data.len(), 5);
    assert!(read.is_read());
    assert_eq!(read.values().count(), 3);
    assert_eq!(read.meta.total, Some(3));
}

#[test]
fn test_meta_snapshot() {
    let cache = ResourceCache::new();
    let consumer = cache.consumer("list", Invalidator::noop());
    let source = Deferred::with_rows(abc());
    let template = ResourceTemplate::fixed(source.clone());

    consumer
        .get_or_read(&template, &ReadOptionsData::new(1, 1))
        .unwrap();
    source.answer_all();

    let meta: ResourceWithMeta = consumer
        .get_or_read_meta(&template, &ReadOptionsData::new(1, 2))
        .unwrap();
    insta::assert_json_snapshot!(meta, @r###"
    {
      "data": [
        {
          "value": {
            "id": "a"
          },
          "status": "read"
        },
        {
          "value": null,
          "status": "reading"
        }
      ],
      "meta": {
        "status": "reading"
      }
    }
    "###);
}

#[test]
fn test_get_never_reads() {
    let cache = ResourceCache::new();
    let consumer = cache.consumer("list", Invalidator::noop());
    let source = Deferred::with_rows(abc());
    let template = ResourceTemplate::fixed(source.clone());
    let options = ReadOptionsData::new(1, 3);

    assert_eq!(
        consumer.get(&template, &options).unwrap(),
        Some(vec![None, None, None])
    );
    assert_eq!(source.reads(), 0);

    consumer.get_or_read(&template, &options).unwrap();
    assert_eq!(consumer.get(&template, &options).unwrap(), None);
    assert_eq!(
        consumer.get_meta(&template, &options).unwrap().meta.status,
        ReadStatus::Reading
    );

    source.answer_all();
    let values = consumer.get(&template, &options).unwrap().unwrap();
    assert!(values.iter().all(Option::is_some));
    assert_eq!(source.reads(), 1);
}

#[test]
fn test_rejection_is_reported_once_then_retried() {
    let cache = ResourceCache::new();
    let (invalidator, calls) = counting();
    let consumer = cache.consumer("list", invalidator);
    let source = Deferred::with_rows(abc());
    let template = ResourceTemplate::fixed(source.clone());
    let options = ReadOptionsData::new(1, 3);

    consumer.get_or_read(&template, &options).unwrap();
    source.reject_all("timed out");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        consumer.get_meta(&template, &options).unwrap().meta.error,
        Some("timed out".to_string())
    );

    let err = consumer.get_or_read(&template, &options).unwrap_err();
    assert!(matches!(err, ResourceError::ReadFailed { ref message } if message == "timed out"));

    assert_eq!(consumer.get_or_read(&template, &options).unwrap(), None);
    assert_eq!(source.reads(), 2);

    source.answer_all();
    assert_eq!(consumer.get_or_read(&template, &options).unwrap(), Some(abc()));
    assert_eq!(cache.metrics().failed, 1);
}

#[test]
fn test_synchronous_read_error_propagates() {
    let cache = ResourceCache::new();
    let consumer = cache.consumer("list", Invalidator::noop());
    let template = ResourceTemplate::fixed(Arc::new(Flaky {
        failures: AtomicUsize::new(1),
    }));
    let options = ReadOptionsData::new(1, 2);

    let err = consumer.get_or_read(&template, &options).unwrap_err();
    assert!(matches!(err, ResourceError::Read(ReadError::Failed(_))));

    let page = consumer.get_or_read(&template, &options).unwrap();
    assert_eq!(page, Some(vec![json!({ "id": 0 }), json!({ "id": 1 })]));
    assert_eq!(cache.metrics().reads, 2);
}

fn abcde() -> Vec<Value> {
    ["a", "b", "c", "d", "e"]
        .iter()
        .map(|id| json!({ "id": id }))
        .collect()
}

#[test]
fn test_failed_overlapping_read_keeps_positions_in_flight() {
    let cache = ResourceCache::new();
    let first = cache.consumer("first", Invalidator::noop());
    let second = cache.consumer("second", Invalidator::noop());
    let source = Deferred::with_rows(abcde());
    let template = ResourceTemplate::fixed(source.clone());

    // positions 0..4 are being read
    assert_eq!(first.get_or_read(&template, &ReadOptionsData::new(1, 4)).unwrap(), None);

    // positions 3..6 overlap at 3; this read fails on the spot
    source.fail_next(1);
    let err = second
        .get_or_read(&template, &ReadOptionsData::new(2, 3))
        .unwrap_err();
    assert!(matches!(err, ResourceError::Read(_)));
    assert_eq!(source.reads(), 2);

    let fourth = ReadOptionsData::new(4, 1);
    let meta = second.get_meta(&template, &fourth).unwrap();
    assert_eq!(meta.data[0].status, ReadStatus::Reading);

    // position 3 still belongs to the first read
    assert_eq!(second.get_or_read(&template, &fourth).unwrap(), None);
    assert_eq!(source.reads(), 2);

    source.answer_all();
    assert_eq!(
        second.get_or_read(&template, &fourth).unwrap(),
        Some(vec![json!({ "id": "d" })])
    );
    assert_eq!(source.reads(), 2);
}

#[test]
fn test_rejected_overlapping_read_keeps_positions_in_flight() {
    let cache = ResourceCache::new();
    let first = cache.consumer("first", Invalidator::noop());
    let (invalidator, second_calls) = counting();
    let second = cache.consumer("second", invalidator);
    let source = Deferred::with_rows(abcde());
    let template = ResourceTemplate::fixed(source.clone());
    let overlapping = ReadOptionsData::new(2, 3);
    let fourth = ReadOptionsData::new(4, 1);

    first.get_or_read(&template, &ReadOptionsData::new(1, 4)).unwrap();
    second.get_or_read(&template, &overlapping).unwrap();
    let mut pending = source.take_pending();
    assert_eq!(pending.len(), 2);

    let (_, rejected) = pending.pop().unwrap();
    rejected.reject("busy");

    // only positions 4 and 5 were released
    let meta = second.get_meta(&template, &overlapping).unwrap();
    let statuses: Vec<_> = meta.data.iter().map(|item| item.status).collect();
    assert_eq!(
        statuses,
        vec![ReadStatus::Reading, ReadStatus::Unread, ReadStatus::Unread]
    );
    assert_eq!(second.get_or_read(&template, &fourth).unwrap(), None);
    assert_eq!(source.reads(), 2);
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);

    let (request, controls) = pending.pop().unwrap();
    source.answer(&request, &controls);
    assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        second.get_or_read(&template, &fourth).unwrap(),
        Some(vec![json!({ "id": "d" })])
    );

    let err = second.get_or_read(&template, &overlapping).unwrap_err();
    assert!(matches!(err, ResourceError::ReadFailed { ref message } if message == "busy"));
}

#[test]
fn test_synchronous_error_drops_the_waiting_subscription() {
    let cache = ResourceCache::new();
    let (invalidator, failed_calls) = counting();
    let failed = cache.consumer("failed", invalidator);
    let other = cache.consumer("other", Invalidator::noop());
    let template = ResourceTemplate::fixed(Arc::new(Flaky {
        failures: AtomicUsize::new(1),
    }));
    let options = ReadOptionsData::new(1, 2);

    assert!(failed.get_or_read(&template, &options).is_err());
    assert!(other.get_or_read(&template, &options).unwrap().is_some());

    assert_eq!(failed_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_overflowing_page_is_an_error() {
    let cache = ResourceCache::new();
    let consumer = cache.consumer("list", Invalidator::noop());
    let template = memory_template("id", abc());

    let err = consumer
        .get_or_read(&template, &ReadOptionsData::new(u64::MAX / 2, 4))
        .unwrap_err();
    assert!(matches!(err, ResourceError::InvalidWindow { .. }));
}

#[test]
fn test_put_from_another_thread() {
    let cache = ResourceCache::new();
    let (invalidator, calls) = counting();
    let consumer = cache.consumer("list", invalidator);
    let source = Deferred::with_rows(abc());
    let template = ResourceTemplate::fixed(source.clone());
    let options = ReadOptionsData::new(1, 3);

    consumer.get_or_read(&template, &options).unwrap();

    let worker = {
        let source = source.clone();
        std::thread::spawn(move || source.answer_all())
    };
    worker.join().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(consumer.get_or_read(&template, &options).unwrap(), Some(abc()));
}

#[test]
fn test_dropped_consumer_is_not_invalidated() {
    let cache = ResourceCache::new();
    let (invalidator, calls) = counting();
    let consumer = cache.consumer("list", invalidator);
    let source = Deferred::with_rows(abc());
    let template = ResourceTemplate::fixed(source.clone());

    consumer
        .get_or_read(&template, &ReadOptionsData::new(1, 3))
        .unwrap();
    drop(consumer);

    source.answer_all();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_transform_maps_query_and_rows() {
    let cache = ResourceCache::new();
    let consumer = cache.consumer("list", Invalidator::noop());
    let template = memory_template(
        "uid",
        vec![
            json!({ "uid": 1, "title": "Alpha" }),
            json!({ "uid": 2, "title": "Beta" }),
            json!({ "uid": 3, "title": "Alphabet" }),
        ],
    )
    .with_transform(TransformConfig::new().map("name", "title").map("key", "uid"));

    let options = ReadOptionsData::new(1, 10).with_query(query(json!({ "name": "alpha" })));
    let page = consumer.get_or_read(&template, &options).unwrap().unwrap();

    assert_eq!(
        page,
        vec![
            json!({ "key": 1, "name": "Alpha" }),
            json!({ "key": 3, "name": "Alphabet" }),
        ]
    );
}

#[test]
fn test_create_options_shared_setter() {
    let cache = ResourceCache::new();
    let (invalidator, calls) = counting();
    let consumer = cache.consumer("list", invalidator);

    let first = consumer.create_options(shallow_merge(), Some("grid"));
    let second = consumer.create_options(shallow_merge(), Some("grid"));
    assert_eq!(first, second);
    assert_eq!(first.current(), ReadOptionsData::new(1, 30));

    let updated = second.set(PartialReadOptions::new().page(2));
    assert_eq!(updated.page, 2);
    assert_eq!(first.current().page, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_options_drive_reads() {
    let cache = ResourceCache::new();
    let (invalidator, calls) = counting();
    let consumer = cache.consumer("list", invalidator);
    let rows: Vec<Value> = (0..5).map(|n| json!({ "id": n })).collect();
    let template = memory_template("id", rows);

    let options: ReadOptions = consumer.create_options(shallow_merge(), None);
    options.set(PartialReadOptions::new().size(2));
    options.set(PartialReadOptions::new().page(3));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let page = consumer
        .get_or_read(&template, &consumer.options(&options))
        .unwrap();
    assert_eq!(page, Some(vec![json!({ "id": 4 })]));
}

#[test]
fn test_bind_resource_with_borrowed_options() {
    let cache = ResourceCache::new();
    let (owner_invalidator, _) = counting();
    let (bound_invalidator, bound_calls) = counting();
    let owner = cache.consumer("owner", owner_invalidator);
    let bound = cache.consumer("bound", bound_invalidator);

    let options = owner.create_options(shallow_merge(), None);
    let resource = Resource::new(memory_template("id", abc())).with_options(options.clone());

    bound.bind_resource(Some(ResourceProperty::from(resource.clone())));
    assert_eq!(bound_calls.load(Ordering::SeqCst), 1);

    // rebinding the same resource does not invalidate
    bound.bind_resource(Some(resource.clone().into()));
    assert_eq!(bound_calls.load(Ordering::SeqCst), 1);

    // the owner's option changes reach the bound consumer
    options.set(PartialReadOptions::new().page(2));
    assert_eq!(bound_calls.load(Ordering::SeqCst), 2);

    // binding a different template invalidates
    let replaced = Resource::new(memory_template("id", abc())).with_options(options.clone());
    bound.bind_resource(Some(replaced.into()));
    assert_eq!(bound_calls.load(Ordering::SeqCst), 3);

    drop(bound);
    options.set(PartialReadOptions::new().page(3));
    assert_eq!(bound_calls.load(Ordering::SeqCst), 3);
}
