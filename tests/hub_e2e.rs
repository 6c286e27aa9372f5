use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::{json, Map, Value as Json};
use tempfile::TempDir;

use iothub_link::hub::actions;
use iothub_link::hub::{ConnectionString, HubRegistry, MethodClient, ServiceClientFactory};
use iothub_link::stream::memory::{ScriptedEventSource, ScriptedNotificationSource};
use iothub_link::stream::{Cell, Event, EventStreamSource, NotificationStreamSource, StreamConfig};
use iothub_link::twin::TwinBackend;
use iothub_link::{LinkConfig, SourceError};

#[derive(Default)]
struct TwinService {
    patches: Mutex<Vec<(String, Json)>>,
}

impl TwinBackend for TwinService {
    fn update_twin(&self, device_id: &str, patch: &Json) -> Result<(), SourceError> {
        self.patches.lock().unwrap().push((device_id.to_string(), patch.clone()));
        Ok(())
    }
}

struct NoMethods;

impl MethodClient for NoMethods {
    fn invoke(&self, _device_id: &str, method: &str, _payload: &Json, _timeout: Duration) -> Result<Json, SourceError> {
        Err(SourceError::unavailable(format!("method '{method}' not implemented")))
    }
}

struct Service {
    twins: Arc<TwinService>,
    events: Arc<ScriptedEventSource>,
    uploads: Arc<ScriptedNotificationSource>,
}

impl ServiceClientFactory for Service {
    fn twin_client(&self, _connection: &ConnectionString) -> Result<Arc<dyn TwinBackend>, SourceError> {
        Ok(self.twins.clone())
    }

    fn method_client(&self, _connection: &ConnectionString) -> Result<Arc<dyn MethodClient>, SourceError> {
        Ok(Arc::new(NoMethods))
    }

    fn event_source(&self) -> Arc<dyn EventStreamSource> {
        self.events.clone()
    }

    fn notification_source(&self) -> Arc<dyn NotificationStreamSource> {
        self.uploads.clone()
    }
}

fn service(events: Vec<Vec<Event>>) -> Arc<Service> {
    Arc::new(Service {
        twins: Arc::new(TwinService::default()),
        events: Arc::new(ScriptedEventSource::from_batches(events)),
        uploads: Arc::new(ScriptedNotificationSource::from_batches(Vec::new())),
    })
}

fn params(v: Json) -> Map<String, Json> {
    v.as_object().cloned().unwrap()
}

const CS: &str = "HostName=plant.azure-devices.net;SharedAccessKeyName=iothubowner;SharedAccessKey=c2VjcmV0";

#[test]
fn add_hub_read_messages_and_persist() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("link.json");
    let event = Event {
        offset: "0".to_string(),
        sequence_number: 1,
        enqueued_time: Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap(),
        device_id: None,
        payload: b"hello".to_vec(),
        properties: BTreeMap::new(),
    };
    let svc = service(vec![vec![event]]);
    let mut registry = HubRegistry::open(&path, svc.clone()).unwrap();

    registry
        .invoke(actions::ADD_IOT_HUB, &params(json!({"Name": "plant", "Connection String": CS})))
        .unwrap();

    let stream = registry
        .invoke_hub(
            "plant",
            actions::READ_MESSAGES,
            &params(json!({
                "EventHub Compatible Name": "plant-events",
                "EventHub Compatible Endpoint": "Endpoint=sb://ihsuprod.servicebus.windows.net/",
                "Partition ID": "1",
                "Start Time": "2023-05-01T12",
            })),
        )
        .unwrap()
        .into_stream()
        .unwrap();

    let row = stream.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
    assert_eq!(row.get(4).and_then(Cell::as_str), Some("hello"));
    assert!(row.get(3).unwrap().is_null());
    stream.cancel();
    stream.join().unwrap();

    let calls = svc.events.calls();
    let call = &calls[0];
    assert_eq!(call.partition_id.as_deref(), Some("1"));
    assert_eq!(call.start, Some(Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap()));

    let saved = LinkConfig::load(&path).unwrap();
    assert_eq!(saved.hubs.len(), 1);
    assert_eq!(saved.hubs[0].connection_string, CS);
    registry.shutdown();
}

#[test]
fn remote_device_twin_round_trip() {
    let svc = service(Vec::new());
    let mut registry = HubRegistry::new(StreamConfig::default(), svc.clone());
    registry.add_hub("plant", CS).unwrap();
    registry
        .invoke_hub("plant", actions::ADD_REMOTE_DEVICE, &params(json!({"Device ID": "thermo-1"})))
        .unwrap();

    let hub = registry.hub("plant").unwrap();
    let device = hub.remote_device("thermo-1").unwrap();
    device
        .add_property(&[], &params(json!({"Name": "settings", "Value Type": "Map"})))
        .unwrap();
    device
        .add_property(&["settings"], &params(json!({"Name": "interval", "Value Type": "Number"})))
        .unwrap();
    device
        .add_property(&["settings"], &params(json!({"Name": "label"})))
        .unwrap();
    {
        let mut twin = device.write().unwrap();
        let settings = twin.resolve(&["settings"]).unwrap();
        twin.remove(settings, "label").unwrap();
    }

    let patch = hub.sync_device_twin("thermo-1").unwrap();
    assert_eq!(patch, json!({"settings": {"interval": 0.0, "label": null}}));

    // Tombstones were consumed by the successful sync.
    let second = hub.sync_device_twin("thermo-1").unwrap();
    assert_eq!(second, json!({"settings": {"interval": 0.0}}));

    let patches = svc.twins.patches.lock().unwrap();
    assert_eq!(patches.len(), 2);
    assert_eq!(patches[0].0, "thermo-1");
}

#[test]
fn device_ids_are_unique_per_hub() {
    let mut registry = HubRegistry::new(StreamConfig::default(), service(Vec::new()));
    registry.add_hub("plant", CS).unwrap();
    registry
        .invoke_hub("plant", actions::CREATE_LOCAL_DEVICE, &params(json!({"Device ID": "sim"})))
        .unwrap();
    let err = registry
        .invoke_hub("plant", actions::ADD_REMOTE_DEVICE, &params(json!({"Device ID": "sim"})))
        .unwrap_err();
    assert!(err.is_input());

    let hub = registry.hub("plant").unwrap();
    assert_eq!(
        hub.local_device("sim").unwrap().protocol(),
        iothub_link::hub::DeviceProtocol::Mqtt
    );
    assert!(hub
        .invoke_method("sim", "reboot", &Json::Null, Duration::from_secs(1))
        .unwrap_err()
        .is_input());
}

#[test]
fn hub_actions_are_declared() {
    let mut registry = HubRegistry::new(StreamConfig::default(), service(Vec::new()));
    let hub = registry.add_hub("plant", CS).unwrap();
    let declared = hub.actions();
    let names: Vec<&str> = declared.iter().map(|a| a.name).collect();
    assert_eq!(
        names,
        vec![
            "Edit",
            "Read Messages",
            "Get File Upload Notifications",
            "Add Remote Device",
            "Create Local Device"
        ]
    );
    let edit = &declared[0];
    assert_eq!(edit.param("Connection String").unwrap().default.as_deref(), Some(CS));
}
