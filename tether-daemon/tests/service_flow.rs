use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use tether_daemon::audit::AuditLog;
use tether_daemon::error::MechanismError;
use tether_daemon::ipc::{IpcServer, Request, Response};
use tether_daemon::mechanism::{
    DeviceEnumerator, MechanismOutput, PairingMechanism, RawDeviceRow,
};
use tether_daemon::names::NameStore;
use tether_daemon::orchestrator::PairingOrchestrator;
use tether_daemon::{DeviceIdentity, DeviceService};

const QUIET: Duration = Duration::from_millis(50);

struct FixedEnumerator {
    rows: Option<Vec<RawDeviceRow>>,
}

#[async_trait]
impl DeviceEnumerator for FixedEnumerator {
    fn id(&self) -> String {
        "fixed".to_string()
    }

    async fn enumerate(&self) -> Result<Vec<RawDeviceRow>, MechanismError> {
        self.rows
            .clone()
            .ok_or_else(|| MechanismError::failed("adapter missing"))
    }
}

struct ScriptedMechanism {
    name: &'static str,
    result: Result<&'static str, &'static str>,
    calls: AtomicUsize,
}

#[async_trait]
impl PairingMechanism for ScriptedMechanism {
    fn id(&self) -> String {
        self.name.to_string()
    }

    async fn pair(&self, _identity: &DeviceIdentity) -> Result<MechanismOutput, MechanismError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.result {
            Ok(out) => Ok(MechanismOutput::message(out)),
            Err(err) => Err(MechanismError::Failed {
                message: "exit status 1".into(),
                stdout: String::new(),
                stderr: err.into(),
            }),
        }
    }

    async fn unpair(&self, identity: &DeviceIdentity) -> Result<MechanismOutput, MechanismError> {
        self.pair(identity).await
    }
}

fn headset_row() -> RawDeviceRow {
    RawDeviceRow {
        reported_name: "Headset".into(),
        status: "OK".into(),
        raw_address: "AABBCCDDEEFF".into(),
        numeric_address: Some(0xAABBCCDDEEFF),
    }
}

async fn build_service(
    dir: &TempDir,
    rows: Option<Vec<RawDeviceRow>>,
    mechanisms: Vec<Arc<dyn PairingMechanism>>,
    quiet_period: Duration,
) -> DeviceService {
    let store = Arc::new(NameStore::open(dir.path().join("devices.json")).await.unwrap());
    let orchestrator =
        PairingOrchestrator::new(mechanisms, Arc::new(AuditLog::new(dir.path().join("bt.log"))));
    DeviceService::new(
        store,
        orchestrator,
        vec![Arc::new(FixedEnumerator { rows }) as Arc<dyn DeviceEnumerator>],
        quiet_period,
        "Saved",
    )
}

#[tokio::test]
async fn listing_merges_live_devices_with_saved_names() {
    let dir = TempDir::new().unwrap();
    let service = build_service(&dir, Some(vec![headset_row()]), Vec::new(), QUIET).await;
    std::fs::write(
        dir.path().join("devices.json"),
        r#"{ "names": { "11:22:33:44:55:66": "Old Keyboard" } }"#,
    )
    .unwrap();

    let devices = service.list_devices().await.unwrap();

    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].identity.as_str(), "aa:bb:cc:dd:ee:ff");
    assert_eq!(devices[0].display_name, "Headset");
    assert!(!devices[0].known_only);
    assert_eq!(devices[1].identity.as_str(), "11:22:33:44:55:66");
    assert_eq!(devices[1].display_name, "Old Keyboard");
    assert_eq!(devices[1].status, "Saved");
    assert!(devices[1].known_only);
}

#[tokio::test]
async fn corrupt_store_still_lists_live_devices() {
    let dir = TempDir::new().unwrap();
    let service = build_service(&dir, Some(vec![headset_row()]), Vec::new(), QUIET).await;
    std::fs::write(dir.path().join("devices.json"), "][").unwrap();

    let devices = service.list_devices().await.unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].display_name, "Headset");
    assert!(service.read_names().await.is_err());
}

#[tokio::test]
async fn enumeration_failure_is_reported() {
    let dir = TempDir::new().unwrap();
    let service = build_service(&dir, None, Vec::new(), QUIET).await;

    let err = service.list_devices().await.unwrap_err();
    assert_eq!(err.failures.len(), 1);
    assert!(err.to_string().contains("adapter missing"));
}

#[tokio::test]
async fn rename_lands_after_quiet_period_and_shows_in_listing() {
    let dir = TempDir::new().unwrap();
    let service = build_service(&dir, Some(vec![headset_row()]), Vec::new(), QUIET).await;

    assert!(service.rename_device("AA-BB-CC-DD-EE-FF", "Desk").ok);
    assert!(service.rename_device("aabbccddeeff", "Desk Headset").ok);
    tokio::time::sleep(Duration::from_millis(400)).await;

    let devices = service.list_devices().await.unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].display_name, "Desk Headset");
    assert_eq!(devices[0].reported_name, "Headset");

    let reports = service.drain_rename_reports().await;
    assert_eq!(reports.len(), 1);
    assert!(reports[0].saved);
    assert!(service.drain_rename_reports().await.is_empty());
}

#[tokio::test]
async fn clearing_names_drops_pending_renames() {
    let dir = TempDir::new().unwrap();
    let service = build_service(&dir, Some(Vec::new()), Vec::new(), QUIET).await;

    service.rename_device("11:22:33:44:55:66", "Keyboard");
    assert_eq!(service.status().pending_renames, 1);
    assert!(service.clear_all_names().await.ok);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(service.read_names().await.unwrap().is_empty());
    assert!(service.list_devices().await.unwrap().is_empty());
}

#[tokio::test]
async fn pairing_falls_back_and_unpair_failure_has_one_reason() {
    let dir = TempDir::new().unwrap();
    let broken = Arc::new(ScriptedMechanism {
        name: "broken",
        result: Err("Failed: adapter busy"),
        calls: AtomicUsize::new(0),
    });
    let working = Arc::new(ScriptedMechanism {
        name: "working",
        result: Ok("Paired"),
        calls: AtomicUsize::new(0),
    });
    let service = build_service(
        &dir,
        Some(Vec::new()),
        vec![
            broken.clone() as Arc<dyn PairingMechanism>,
            working.clone() as Arc<dyn PairingMechanism>,
        ],
        QUIET,
    )
    .await;

    let paired = service.pair("AABBCCDDEEFF").await;
    assert!(paired.ok);
    assert_eq!(paired.message.as_deref(), Some("Paired"));
    assert_eq!(broken.calls.load(Ordering::SeqCst), 1);

    let other_dir = TempDir::new().unwrap();
    let lonely = build_service(
        &other_dir,
        Some(Vec::new()),
        vec![broken.clone() as Arc<dyn PairingMechanism>],
        QUIET,
    )
    .await;
    let unpaired = lonely.unpair("AABBCCDDEEFF").await;
    assert!(!unpaired.ok);
    assert_eq!(
        unpaired.message.as_deref(),
        Some("Failed to unpair device. Reason: Failed: adapter busy")
    );

    let audit = std::fs::read_to_string(dir.path().join("bt.log")).unwrap();
    assert!(audit.contains("Attempting pair via broken"));
}

async fn roundtrip(
    reader: &mut BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    raw: &str,
) -> Response {
    writer.write_all(raw.as_bytes()).await.unwrap();
    writer.write_all(b"\n").await.unwrap();
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    serde_json::from_str(line.trim()).unwrap()
}

#[tokio::test]
async fn ipc_round_trip_and_shutdown() {
    let dir = TempDir::new().unwrap();
    // Long enough that the rename below is still pending at shutdown.
    let service = Arc::new(
        build_service(&dir, Some(vec![headset_row()]), Vec::new(), Duration::from_secs(30)).await,
    );
    let socket = dir.path().join("tether.sock");
    let server = IpcServer::new(UnixListener::bind(&socket).unwrap(), service.clone());
    let server_task = tokio::spawn(server.run());

    let (read_half, mut writer) = UnixStream::connect(&socket).await.unwrap().into_split();
    let mut reader = BufReader::new(read_half);

    match roundtrip(&mut reader, &mut writer, r#"{"type":"ListDevices"}"#).await {
        Response::DeviceList { devices } => {
            assert_eq!(devices.len(), 1);
            assert_eq!(devices[0].identity.as_str(), "aa:bb:cc:dd:ee:ff");
        }
        other => panic!("unexpected {other:?}"),
    }

    match roundtrip(&mut reader, &mut writer, "not json").await {
        Response::Error { message } => assert!(message.starts_with("Invalid request")),
        other => panic!("unexpected {other:?}"),
    }

    let rename = serde_json::to_string(&Request::RenameDevice {
        identity: "aa:bb:cc:dd:ee:ff".into(),
        name: "Never Saved".into(),
    })
    .unwrap();
    assert!(matches!(
        roundtrip(&mut reader, &mut writer, &rename).await,
        Response::Success { .. }
    ));

    match roundtrip(&mut reader, &mut writer, r#"{"type":"Shutdown"}"#).await {
        Response::Success { message } => assert_eq!(message, "Daemon stopping"),
        other => panic!("unexpected {other:?}"),
    }

    tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();

    // The pending rename was discarded with the server.
    assert_eq!(service.status().pending_renames, 0);
    assert!(service.read_names().await.unwrap().is_empty());
}
