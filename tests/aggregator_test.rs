use tracewrap::aggregator::{Aggregator, Outcome};
use tracewrap::events::{Event, EventBody, Source};
use tracewrap::provider::Provider;

fn file_read_start(path: &str, ts: i64) -> Event {
    let mut e = Event::new(
        "sess1",
        Source::Proxy,
        EventBody::FileReadStart {
            path: path.to_string(),
        },
    );
    e.timestamp = ts;
    e
}

fn file_read_complete(path: &str, ts: i64) -> Event {
    let mut e = Event::new(
        "sess1",
        Source::Proxy,
        EventBody::FileReadComplete {
            path: path.to_string(),
            size: 128,
        },
    );
    e.timestamp = ts;
    e
}

#[test]
fn file_complete_correlates_with_matching_start_by_path() {
    let mut agg = Aggregator::new();
    let start_id = match agg.ingest(file_read_start("/tmp/a.txt", 1_000)) {
        Outcome::Kept(e) => e.id.unwrap(),
        _ => panic!("expected Kept"),
    };

    match agg.ingest(file_read_complete("/tmp/a.txt", 1_500)) {
        Outcome::Kept(e) => assert_eq!(e.correlations, vec![start_id]),
        _ => panic!("expected Kept"),
    }
}

#[test]
fn file_complete_does_not_correlate_across_different_paths() {
    let mut agg = Aggregator::new();
    agg.ingest(file_read_start("/tmp/a.txt", 1_000));

    match agg.ingest(file_read_complete("/tmp/b.txt", 1_500)) {
        Outcome::Kept(e) => assert!(e.correlations.is_empty()),
        _ => panic!("expected Kept"),
    }
}

#[test]
fn events_without_an_id_get_a_deterministic_one_assigned() {
    let mut agg = Aggregator::new();
    let first = match agg.ingest(file_read_start("/tmp/a.txt", 1_000)) {
        Outcome::Kept(e) => e,
        _ => panic!("expected Kept"),
    };
    assert!(first.id.is_some());
}

#[test]
fn https_connect_complete_correlates_by_request_id_not_host_port() {
    let mut agg = Aggregator::new();

    let start_a = Event::new(
        "sess1",
        Source::Proxy,
        EventBody::HttpsConnectStart {
            request_id: "req-a".to_string(),
            host: "api.example.com".to_string(),
            port: 443,
            detected_provider: Provider::Null,
        },
    );
    let start_b = Event::new(
        "sess1",
        Source::Proxy,
        EventBody::HttpsConnectStart {
            request_id: "req-b".to_string(),
            host: "api.example.com".to_string(),
            port: 443,
            detected_provider: Provider::Null,
        },
    );
    let id_a = match agg.ingest(start_a) {
        Outcome::Kept(e) => e.id.unwrap(),
        _ => panic!(),
    };
    let _id_b = match agg.ingest(start_b) {
        Outcome::Kept(e) => e.id.unwrap(),
        _ => panic!(),
    };

    let complete_a = Event::new(
        "sess1",
        Source::Proxy,
        EventBody::HttpsConnectComplete {
            request_id: "req-a".to_string(),
            host: "api.example.com".to_string(),
            port: 443,
            detected_provider: Provider::Null,
            duration_ms: 10,
            status: 200,
        },
    );
    match agg.ingest(complete_a) {
        Outcome::Kept(e) => assert_eq!(e.correlations, vec![id_a]),
        _ => panic!("expected Kept"),
    }
}

#[test]
fn identical_start_events_within_one_second_are_deduplicated() {
    let mut agg = Aggregator::new();
    assert!(matches!(
        agg.ingest(file_read_start("/tmp/a.txt", 1_000)),
        Outcome::Kept(_)
    ));
    assert!(matches!(
        agg.ingest(file_read_start("/tmp/a.txt", 1_400)),
        Outcome::Duplicate
    ));
}
