use std::collections::HashMap;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use msgapi_server::{
    ApiListener, AuthenticationKey, DeviceDelegates, DeviceHandle, PendingConnection, Result,
    UserDelegates, UserHandle,
};
use msgapi_transport::WebSocketSender;
use tracing::{info, warn};

use crate::cmd::{Api, ServeArgs};
use crate::exit::{server_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};
use crate::output::{print_listening, OutputFormat};

/// Push/close handle of a connection being served.
enum ActiveConnection {
    Device(DeviceHandle<WebSocketSender>),
    User(UserHandle<WebSocketSender>),
}

impl ActiveConnection {
    fn close(&self) {
        let result = match self {
            ActiveConnection::Device(handle) => handle.close(),
            ActiveConnection::User(handle) => handle.close(),
        };
        if let Err(err) = result {
            warn!(error = %err, "failed closing connection");
        }
    }
}

/// Live connections by id. Workers remove their own entry when they finish,
/// which drops the last socket handle held outside the worker.
type Registry = Arc<Mutex<HashMap<usize, ActiveConnection>>>;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let key = match args.api {
        Api::Device => Some(args.key.ok_or_else(|| {
            CliError::new(USAGE, "the device API requires --key (or MSGAPI_DEVICE_KEY)")
        })?),
        Api::User => None,
    };

    let listener = ApiListener::bind(&args.addr)
        .map_err(|err| server_error("bind failed", err))?
        .with_max_message_size(args.max_message_size);
    let addr = listener
        .local_addr()
        .map_err(|err| server_error("bind failed", err))?;
    info!(%addr, api = args.api.name(), max_message_size = args.max_message_size, "listening");
    print_listening(addr, args.api.name(), format);

    let running = Arc::new(AtomicBool::new(true));
    let registry: Registry = Arc::default();
    install_ctrlc_handler(running.clone(), registry.clone(), addr)?;

    let mut workers = Vec::new();
    let mut accepted = 0usize;
    while running.load(Ordering::SeqCst) {
        if args.count.is_some_and(|count| accepted >= count) {
            break;
        }

        let pending = match listener.accept() {
            Ok(pending) => pending,
            Err(_) if !running.load(Ordering::SeqCst) => break,
            Err(err) => {
                warn!(error = %err, "accept failed");
                thread::sleep(ACCEPT_BACKOFF);
                continue;
            }
        };
        if !running.load(Ordering::SeqCst) {
            break;
        }

        accepted += 1;
        reap_finished(&mut workers);
        let worker = Worker {
            id: accepted,
            registry: Arc::clone(&registry),
            running: Arc::clone(&running),
        };
        match worker.spawn(pending, key.clone()) {
            Ok(handle) => workers.push(handle),
            Err(err) => warn!(error = %err, "failed to start connection thread"),
        }
    }

    for worker in workers {
        if worker.join().is_err() {
            warn!("connection thread panicked");
        }
    }
    info!("server stopped");
    Ok(SUCCESS)
}

/// Join workers that already returned so their handles do not pile up.
fn reap_finished(workers: &mut Vec<JoinHandle<()>>) {
    let (finished, live): (Vec<_>, Vec<_>) =
        workers.drain(..).partition(|worker| worker.is_finished());
    *workers = live;
    for worker in finished {
        if worker.join().is_err() {
            warn!("connection thread panicked");
        }
    }
}

/// Everything one connection thread needs besides the socket.
struct Worker {
    id: usize,
    registry: Registry,
    running: Arc<AtomicBool>,
}

impl Worker {
    fn spawn(
        self,
        pending: PendingConnection,
        key: Option<AuthenticationKey>,
    ) -> std::io::Result<JoinHandle<()>> {
        let api = if key.is_some() { "device" } else { "user" };
        thread::Builder::new()
            .name(format!("{api}-{}", self.id))
            .spawn(move || {
                let peer = pending.peer_addr();
                let result = match &key {
                    Some(key) => self.serve_device(pending, key),
                    None => self.serve_user(pending),
                };
                report(api, peer, result);
            })
    }

    /// Upgrade, authenticate and serve one device.
    fn serve_device(&self, pending: PendingConnection, key: &AuthenticationKey) -> Result<()> {
        let mut device = pending.upgrade_device(device_delegates())?;
        let _registration = self.register(ActiveConnection::Device(device.handle()));
        device.run(key)
    }

    /// Upgrade and serve one user.
    fn serve_user(&self, pending: PendingConnection) -> Result<()> {
        let mut user = pending.upgrade_user(user_delegates())?;
        let _registration = self.register(ActiveConnection::User(user.handle()));
        user.run()
    }

    fn register(&self, connection: ActiveConnection) -> Registration {
        // Shutdown may have swept the registry while this upgrade was running.
        if !self.running.load(Ordering::SeqCst) {
            connection.close();
        }
        match self.registry.lock() {
            Ok(mut active) => {
                active.insert(self.id, connection);
            }
            Err(_) => {
                warn!("connection registry poisoned; connection will not be closed on shutdown")
            }
        }
        Registration {
            registry: Arc::clone(&self.registry),
            id: self.id,
        }
    }
}

/// Removes a connection from the registry when dropped.
struct Registration {
    registry: Registry,
    id: usize,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Ok(mut active) = self.registry.lock() {
            active.remove(&self.id);
        }
    }
}

fn report(api: &'static str, peer: SocketAddr, result: Result<()>) {
    match result {
        Ok(()) => info!(api, %peer, "connection closed"),
        Err(err) if err.is_peer_closed() => info!(api, %peer, reason = %err, "peer disconnected"),
        Err(err) => warn!(api, %peer, error = %err, "connection failed"),
    }
}

fn device_delegates() -> DeviceDelegates {
    DeviceDelegates::new()
        .on_update(|values| {
            let measurements: usize = values.values().map(Vec::len).sum();
            info!(sensors = values.len(), measurements, "update received");
            Ok(())
        })
        .on_add_sensor(|sensor| {
            info!(
                name = %sensor.name,
                unit = %sensor.unit,
                port = sensor.port,
                factor = sensor.factor,
                "sensor added"
            );
            Ok(())
        })
        .on_remove_sensor(|name| {
            info!(%name, "sensor removed");
            Ok(())
        })
        .on_update_metadata(|metadata| {
            info!(name = ?metadata.name, sensors = metadata.sensors.len(), "metadata updated");
            Ok(())
        })
}

fn user_delegates() -> UserDelegates {
    UserDelegates::new().on_get_values(|since, with_metadata| {
        info!(?since, with_metadata, "values requested");
        Ok(())
    })
}

fn install_ctrlc_handler(
    running: Arc<AtomicBool>,
    registry: Registry,
    addr: SocketAddr,
) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
        if let Ok(active) = registry.lock() {
            for connection in active.values() {
                connection.close();
            }
        }
        // Wake the blocking accept so the loop sees the flag.
        let _ = TcpStream::connect(addr);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use msgapi_server::{authenticate_client, DEVICE_PROTOCOL};
    use msgapi_transport::websocket::{self, UpgradeConfig};
    use msgapi_transport::{CloseCode, Transport, TransportError};

    use super::*;

    fn worker(id: usize, running: bool) -> Worker {
        Worker {
            id,
            registry: Registry::default(),
            running: Arc::new(AtomicBool::new(running)),
        }
    }

    #[test]
    fn finished_connection_leaves_the_registry() {
        let listener = ApiListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let key = AuthenticationKey::new(b"registry-key".to_vec());
        let worker = worker(7, true);
        let registry = Arc::clone(&worker.registry);

        let client_key = key.clone();
        let client = thread::spawn(move || {
            let mut client =
                websocket::connect(addr, Some(DEVICE_PROTOCOL), &UpgradeConfig::default())
                    .unwrap();
            authenticate_client(&mut client, &client_key).unwrap();
            client
        });
        let handle = worker.spawn(listener.accept().unwrap(), Some(key)).unwrap();

        let client = client.join().unwrap();
        assert!(registry.lock().unwrap().contains_key(&7));

        client.close(CloseCode::GoingAway, "done").unwrap();
        handle.join().unwrap();
        assert!(registry.lock().unwrap().is_empty());
    }

    #[test]
    fn connection_upgraded_during_shutdown_is_closed() {
        let listener = ApiListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let worker = worker(1, false);
        let registry = Arc::clone(&worker.registry);

        let client = thread::spawn(move || {
            let mut client =
                websocket::connect(addr, Some(DEVICE_PROTOCOL), &UpgradeConfig::default())
                    .unwrap();
            client.receive()
        });
        let key = AuthenticationKey::new(b"registry-key".to_vec());
        let handle = worker.spawn(listener.accept().unwrap(), Some(key)).unwrap();

        assert!(matches!(
            client.join().unwrap(),
            Err(TransportError::Closed { code: Some(1001), .. })
        ));
        handle.join().unwrap();
        assert!(registry.lock().unwrap().is_empty());
    }

    #[test]
    fn reaping_keeps_live_workers() {
        let (release, wait) = std::sync::mpsc::channel::<()>();
        let mut workers = vec![
            thread::spawn(|| {}),
            thread::spawn(move || {
                let _ = wait.recv();
            }),
        ];
        while !workers[0].is_finished() {
            thread::yield_now();
        }

        reap_finished(&mut workers);
        assert_eq!(workers.len(), 1);

        release.send(()).unwrap();
        for worker in workers {
            worker.join().unwrap();
        }
    }
}
