use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use iothub_link::stream::memory::{ScriptedEventSource, ScriptedNotificationSource, Step};
use iothub_link::stream::{
    Cell, Event, InvocationState, Notification, ServiceProtocol, StreamConfig, StreamingController, TelemetryRequest,
    Termination, NOTIFICATION_COLUMNS, TELEMETRY_COLUMNS,
};

fn fast_controller() -> StreamingController {
    StreamingController::new(StreamConfig {
        batch_size: 100,
        poll_interval_ms: 10,
        row_buffer: 16,
    })
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap()
}

fn events(start: i64, count: i64) -> Vec<Event> {
    (start..start + count)
        .map(|n| Event {
            offset: (n * 64).to_string(),
            sequence_number: n,
            enqueued_time: t0(),
            device_id: Some("thermo-1".to_string()),
            payload: format!("{{\"n\":{n}}}").into_bytes(),
            properties: BTreeMap::from([("seq".to_string(), json!(n))]),
        })
        .collect()
}

fn request(start_time: Option<&str>) -> TelemetryRequest {
    TelemetryRequest::new(
        "plant-events",
        "Endpoint=sb://ihsuprod.servicebus.windows.net/;SharedAccessKeyName=service;SharedAccessKey=k",
        None,
        start_time,
    )
    .unwrap()
}

fn recorded_hook() -> (Arc<Mutex<Vec<Termination>>>, impl FnOnce(Termination) + Send + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |t: Termination| sink.lock().unwrap().push(t))
}

#[test]
fn telemetry_batches_arrive_in_order() {
    let source = ScriptedEventSource::from_batches(vec![events(0, 3), Vec::new(), events(3, 5), events(8, 1)]);
    let controller = fast_controller();
    let stream = controller.read_messages(&source, &request(None)).unwrap();

    assert_eq!(stream.columns(), TELEMETRY_COLUMNS);
    let mut seqs = Vec::new();
    for _ in 0..9 {
        let row = stream.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(row.conforms(TELEMETRY_COLUMNS));
        seqs.push(row.get(1).and_then(Cell::as_int).unwrap());
    }
    assert_eq!(seqs, (0..9).collect::<Vec<_>>());

    stream.cancel();
    stream.join().unwrap();
    assert_eq!(stream.state(), InvocationState::ClosedClean);
    assert_eq!(source.stats().closes(), 1);
}

#[test]
fn cancel_closes_source_once_without_error() {
    let source = ScriptedEventSource::from_batches(Vec::new());
    let controller = fast_controller();
    let stream = controller.read_messages(&source, &request(None)).unwrap();
    let (seen, hook) = recorded_hook();
    stream.on_close(hook).unwrap();
    assert!(stream.on_close(|_| {}).is_err());

    stream.cancel();
    stream.cancel();
    assert!(!stream.is_open());
    assert_eq!(stream.recv().unwrap(), None);
    stream.join().unwrap();

    assert_eq!(source.stats().closes(), 1);
    assert_eq!(*seen.lock().unwrap(), vec![Termination::Clean]);
}

#[test]
fn open_failure_is_synchronous_and_starts_nothing() {
    let source = ScriptedEventSource::from_batches(vec![events(0, 1)]).failing_open("unauthorized");
    let controller = fast_controller();

    let err = controller.read_messages(&source, &request(None)).unwrap_err();
    assert!(err.is_source_unavailable());
    assert!(format!("{err}").contains("unauthorized"));
    assert_eq!(controller.active(), 0);
    assert_eq!(source.stats().opens(), 0);
    assert_eq!(source.stats().closes(), 0);
}

#[test]
fn mid_stream_failure_reaches_caller_after_buffered_rows() {
    let source = ScriptedEventSource::new(vec![Step::Batch(events(0, 2)), Step::Fail("link detached".to_string())]);
    let controller = fast_controller();
    let stream = controller.read_messages(&source, &request(None)).unwrap();
    let (seen, hook) = recorded_hook();
    stream.on_close(hook).unwrap();

    assert!(stream.recv().unwrap().is_some());
    assert!(stream.recv().unwrap().is_some());
    let err = stream.recv().unwrap_err();
    assert!(err.is_stream_failure());
    assert!(format!("{err}").contains("link detached"));

    // Reported once.
    assert!(stream.join().is_ok());
    assert_eq!(stream.state(), InvocationState::ClosedError);
    assert_eq!(source.stats().closes(), 1);
    assert_eq!(*seen.lock().unwrap(), vec![Termination::Error]);
}

#[test]
fn close_failure_is_swallowed() {
    let source = ScriptedEventSource::from_batches(Vec::new()).failing_close("already gone");
    let controller = fast_controller();
    let stream = controller.read_messages(&source, &request(None)).unwrap();
    stream.cancel();
    assert!(stream.join().is_ok());
    assert_eq!(stream.state(), InvocationState::ClosedClean);
    assert_eq!(source.stats().closes(), 1);
}

#[test]
fn date_only_start_time_reaches_source_as_midnight() {
    let source = ScriptedEventSource::from_batches(Vec::new());
    let controller = fast_controller();
    let stream = controller.read_messages(&source, &request(Some("2023-05-01"))).unwrap();
    stream.cancel();
    stream.join().unwrap();

    let calls = source.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].start, Some(Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap()));
    assert_eq!(calls[0].partition_id.as_deref(), Some("0"));
    assert!(calls[0].target.ends_with(";EntityPath=plant-events"));
}

#[test]
fn unparseable_start_time_means_now() {
    let source = ScriptedEventSource::from_batches(Vec::new());
    let controller = fast_controller();
    let before = Utc::now();
    let stream = controller.read_messages(&source, &request(Some("yesterday"))).unwrap();
    stream.cancel();
    stream.join().unwrap();

    let start = source.calls()[0].start.unwrap();
    assert!(start >= before);
}

#[test]
fn dropping_the_stream_cancels_it() {
    let source = ScriptedEventSource::from_batches(Vec::new());
    let controller = fast_controller();
    let stream = controller.read_messages(&source, &request(None)).unwrap();
    drop(stream);
    controller.shutdown();
    assert_eq!(controller.active(), 0);
    assert_eq!(source.stats().closes(), 1);
}

#[test]
fn notifications_stream_rows_over_requested_protocol() {
    let note = |n: i64| Notification {
        enqueued_time: t0(),
        device_id: format!("cam-{n}"),
        blob_uri: format!("https://store.blob.core.windows.net/up/cam-{n}/img.jpg"),
        blob_name: format!("cam-{n}/img.jpg"),
        last_updated_time: t0(),
        blob_size_bytes: 1024 * n,
    };
    let source = ScriptedNotificationSource::from_batches(vec![vec![note(1), note(2)], vec![note(3)]]);
    let controller = fast_controller();
    let stream = controller
        .file_upload_notifications(&source, "HostName=plant.azure-devices.net", ServiceProtocol::AmqpsWs)
        .unwrap();

    assert_eq!(stream.columns(), NOTIFICATION_COLUMNS);
    let mut devices = Vec::new();
    for _ in 0..3 {
        let row = stream.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(row.conforms(NOTIFICATION_COLUMNS));
        devices.push(row.get(1).and_then(Cell::as_str).unwrap().to_string());
    }
    assert_eq!(devices, vec!["cam-1", "cam-2", "cam-3"]);

    stream.cancel();
    stream.join().unwrap();
    let calls = source.calls();
    assert_eq!(calls[0].protocol, Some(ServiceProtocol::AmqpsWs));
    assert_eq!(calls[0].target, "HostName=plant.azure-devices.net");
    assert_eq!(source.stats().closes(), 1);
}

#[test]
fn shutdown_stops_every_invocation() {
    let telemetry = ScriptedEventSource::from_batches(Vec::new());
    let uploads = ScriptedNotificationSource::from_batches(Vec::new());
    let controller = fast_controller();
    let a = controller.read_messages(&telemetry, &request(None)).unwrap();
    let b = controller
        .file_upload_notifications(&uploads, "HostName=h", ServiceProtocol::Amqps)
        .unwrap();
    assert_eq!(controller.active(), 2);

    controller.shutdown();

    assert_eq!(controller.active(), 0);
    assert_eq!(a.state(), InvocationState::ClosedClean);
    assert_eq!(b.state(), InvocationState::ClosedClean);
    assert_eq!(telemetry.stats().closes() + uploads.stats().closes(), 2);
}
