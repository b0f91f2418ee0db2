/*!
 * Native BlueZ D-Bus mechanism
 * Device listing, pairing and removal through org.bluez on the system bus
 */

use async_trait::async_trait;
use dbus::arg::{prop_cast, PropMap};
use dbus::nonblock::stdintf::org_freedesktop_dbus::ObjectManager;
use dbus::nonblock::{Proxy, SyncConnection};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{DeviceEnumerator, MechanismOutput, PairingMechanism, RawDeviceRow};
use crate::error::MechanismError;
use crate::identity::DeviceIdentity;

const BLUEZ_SERVICE: &str = "org.bluez";
const DEVICE_INTERFACE: &str = "org.bluez.Device1";
const ADAPTER_INTERFACE: &str = "org.bluez.Adapter1";

type ManagedObjects = HashMap<dbus::Path<'static>, HashMap<String, PropMap>>;

struct BusConnection {
    conn: Arc<SyncConnection>,
    io: JoinHandle<()>,
}

/// Lazily connected system-bus session. The bus being unreachable makes this
/// mechanism unavailable rather than failed.
pub struct BluezSession {
    adapter: String,
    timeout: Duration,
    bus: Mutex<Option<BusConnection>>,
}

#[derive(Debug, Clone)]
struct BluezDevice {
    path: dbus::Path<'static>,
    adapter: dbus::Path<'static>,
    paired: bool,
}

impl BluezSession {
    pub fn new(adapter: &str, timeout: Duration) -> Self {
        Self {
            adapter: adapter.to_string(),
            timeout,
            bus: Mutex::new(None),
        }
    }

    fn adapter_path(&self) -> String {
        format!("/org/bluez/{}", self.adapter)
    }

    async fn connection(&self) -> Result<Arc<SyncConnection>, MechanismError> {
        let mut bus = self.bus.lock().await;

        if let Some(existing) = bus.as_ref() {
            if !existing.io.is_finished() {
                return Ok(existing.conn.clone());
            }
            tracing::info!("System bus connection was lost, reconnecting");
        }

        let (resource, conn) = dbus_tokio::connection::new_system_sync()
            .map_err(|e| MechanismError::Unavailable(format!("system bus: {}", e)))?;

        let io = tokio::spawn(async move {
            let err = resource.await;
            tracing::warn!("System bus connection closed: {}", err);
        });

        *bus = Some(BusConnection {
            conn: conn.clone(),
            io,
        });
        Ok(conn)
    }

    async fn managed_objects(&self) -> Result<ManagedObjects, MechanismError> {
        let conn = self.connection().await?;
        let proxy = Proxy::new(BLUEZ_SERVICE, "/", self.timeout, conn);
        proxy
            .get_managed_objects()
            .await
            .map_err(|e| dbus_failure("GetManagedObjects", e))
    }

    async fn find_device(&self, identity: &DeviceIdentity) -> Result<BluezDevice, MechanismError> {
        let objects = self.managed_objects().await?;
        let adapter_prefix = format!("{}/", self.adapter_path());

        objects
            .into_iter()
            .filter(|(path, _)| path.starts_with(&adapter_prefix))
            .find_map(|(path, interfaces)| {
                let props = interfaces.get(DEVICE_INTERFACE)?;
                let address = prop_cast::<String>(props, "Address")?;
                if DeviceIdentity::normalize(address) != *identity {
                    return None;
                }
                let adapter = prop_cast::<dbus::Path<'static>>(props, "Adapter")
                    .cloned()
                    .or_else(|| dbus::Path::new(self.adapter_path()).ok())?;
                Some(BluezDevice {
                    path,
                    adapter,
                    paired: prop_cast::<bool>(props, "Paired").copied().unwrap_or(false),
                })
            })
            .ok_or_else(|| MechanismError::Failed {
                message: "device lookup failed".to_string(),
                stdout: String::new(),
                stderr: format!("Device {} not found on {}", identity, self.adapter),
            })
    }
}

#[async_trait]
impl PairingMechanism for BluezSession {
    fn id(&self) -> String {
        format!("bluez:{}", self.adapter)
    }

    async fn is_available(&self) -> bool {
        self.connection().await.is_ok()
    }

    async fn pair(&self, identity: &DeviceIdentity) -> Result<MechanismOutput, MechanismError> {
        let device = self.find_device(identity).await?;
        if device.paired {
            return Ok(MechanismOutput::message("Already paired"));
        }

        let conn = self.connection().await?;
        let proxy = Proxy::new(BLUEZ_SERVICE, device.path.clone(), self.timeout, conn);
        let (): () = proxy
            .method_call(DEVICE_INTERFACE, "Pair", ())
            .await
            .map_err(|e| dbus_failure("Pair", e))?;

        tracing::info!("Paired {} via {}", identity, device.path);
        Ok(MechanismOutput::message("Paired"))
    }

    async fn unpair(&self, identity: &DeviceIdentity) -> Result<MechanismOutput, MechanismError> {
        let device = self.find_device(identity).await?;
        if !device.paired {
            return Ok(MechanismOutput::message("Not paired"));
        }

        let conn = self.connection().await?;
        let proxy = Proxy::new(BLUEZ_SERVICE, device.adapter.clone(), self.timeout, conn);
        let (): () = proxy
            .method_call(ADAPTER_INTERFACE, "RemoveDevice", (device.path.clone(),))
            .await
            .map_err(|e| dbus_failure("RemoveDevice", e))?;

        tracing::info!("Removed {} from {}", identity, device.adapter);
        Ok(MechanismOutput::message("Unpaired"))
    }
}

#[async_trait]
impl DeviceEnumerator for BluezSession {
    fn id(&self) -> String {
        PairingMechanism::id(self)
    }

    async fn enumerate(&self) -> Result<Vec<RawDeviceRow>, MechanismError> {
        let objects = self.managed_objects().await?;
        let adapter_prefix = format!("{}/", self.adapter_path());

        let mut rows: Vec<(String, RawDeviceRow)> = objects
            .iter()
            .filter(|(path, _)| path.starts_with(&adapter_prefix))
            .filter_map(|(path, interfaces)| {
                let row = row_from_properties(interfaces.get(DEVICE_INTERFACE)?)?;
                Some((path.to_string(), row))
            })
            .collect();

        // GetManagedObjects is a hash map; keep listings stable between calls.
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }
}

fn row_from_properties(props: &PropMap) -> Option<RawDeviceRow> {
    let address = prop_cast::<String>(props, "Address")?.clone();
    let reported_name = prop_cast::<String>(props, "Alias")
        .or_else(|| prop_cast::<String>(props, "Name"))
        .cloned()
        .unwrap_or_else(|| address.clone());

    let connected = prop_cast::<bool>(props, "Connected").copied().unwrap_or(false);
    let paired = prop_cast::<bool>(props, "Paired").copied().unwrap_or(false);
    let status = match (connected, paired) {
        (true, _) => "OK",
        (false, true) => "Paired",
        (false, false) => "Unknown",
    };

    let numeric_address = DeviceIdentity::normalize(&address)
        .compact_upper()
        .and_then(|hex| u64::from_str_radix(&hex, 16).ok());

    Some(RawDeviceRow {
        reported_name,
        status: status.to_string(),
        raw_address: address,
        numeric_address,
    })
}

fn dbus_failure(call: &str, err: dbus::Error) -> MechanismError {
    MechanismError::Failed {
        message: format!("{} failed", call),
        stdout: String::new(),
        stderr: format!(
            "{}: {}",
            err.name().unwrap_or("org.freedesktop.DBus.Error"),
            err.message().unwrap_or("no message")
        ),
    }
}
