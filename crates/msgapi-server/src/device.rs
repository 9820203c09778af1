//! Device API server (`v2.device.msg`).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use msgapi_envelope::command::{
    ADD_SENSOR, REMOVE_SENSOR, REQUEST_REALTIME_UPDATES, UPDATE, UPDATE_METADATA,
};
use msgapi_envelope::{
    AddSensorArgs, DeviceMetadata, ErrorValue, MessageIn, RemoveSensorArgs, SensorValues,
    UpdateArgs,
};
use msgapi_transport::{MessageSender, Transport};
use tracing::info;

use crate::auth::{authenticate, AuthState, AuthenticationKey};
use crate::connection::{Connection, Pusher};
use crate::dispatch::{decode_then, run_loop, DelegateResult, ReplyClock};
use crate::error::{Result, ServerError};

type UpdateFn = Box<dyn FnMut(SensorValues) -> DelegateResult + Send>;
type AddSensorFn = Box<dyn FnMut(AddSensorArgs) -> DelegateResult + Send>;
type RemoveSensorFn = Box<dyn FnMut(String) -> DelegateResult + Send>;
type UpdateMetadataFn = Box<dyn FnMut(DeviceMetadata) -> DelegateResult + Send>;

/// Business operations behind the Device commands.
///
/// Every delegate is optional. A known command without a delegate is
/// answered with `OperationFailed("not supported")`.
#[derive(Default)]
pub struct DeviceDelegates {
    update: Option<UpdateFn>,
    add_sensor: Option<AddSensorFn>,
    remove_sensor: Option<RemoveSensorFn>,
    update_metadata: Option<UpdateMetadataFn>,
}

impl DeviceDelegates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle `update`: new measurements keyed by sensor id.
    pub fn on_update<F>(mut self, delegate: F) -> Self
    where
        F: FnMut(SensorValues) -> DelegateResult + Send + 'static,
    {
        self.update = Some(Box::new(delegate));
        self
    }

    /// Handle `addSensor`.
    pub fn on_add_sensor<F>(mut self, delegate: F) -> Self
    where
        F: FnMut(AddSensorArgs) -> DelegateResult + Send + 'static,
    {
        self.add_sensor = Some(Box::new(delegate));
        self
    }

    /// Handle `removeSensor`; the delegate receives the sensor name.
    pub fn on_remove_sensor<F>(mut self, delegate: F) -> Self
    where
        F: FnMut(String) -> DelegateResult + Send + 'static,
    {
        self.remove_sensor = Some(Box::new(delegate));
        self
    }

    /// Handle `updateMetadata`.
    pub fn on_update_metadata<F>(mut self, delegate: F) -> Self
    where
        F: FnMut(DeviceMetadata) -> DelegateResult + Send + 'static,
    {
        self.update_metadata = Some(Box::new(delegate));
        self
    }

    fn route(&mut self, message: &MessageIn) -> DelegateResult {
        match message.command.as_str() {
            UPDATE => decode_then(message, self.update.as_deref_mut(), |f, args: UpdateArgs| {
                f(args.values)
            }),
            ADD_SENSOR => decode_then(
                message,
                self.add_sensor.as_deref_mut(),
                |f, args: AddSensorArgs| f(args),
            ),
            REMOVE_SENSOR => decode_then(
                message,
                self.remove_sensor.as_deref_mut(),
                |f, args: RemoveSensorArgs| f(args.name),
            ),
            UPDATE_METADATA => decode_then(
                message,
                self.update_metadata.as_deref_mut(),
                |f, args: DeviceMetadata| f(args),
            ),
            other => Err(ErrorValue::bad_command(other)),
        }
    }
}

impl fmt::Debug for DeviceDelegates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceDelegates")
            .field("update", &self.update.is_some())
            .field("add_sensor", &self.add_sensor.is_some())
            .field("remove_sensor", &self.remove_sensor.is_some())
            .field("update_metadata", &self.update_metadata.is_some())
            .finish()
    }
}

/// Server side of one Device connection.
#[derive(Debug)]
pub struct DeviceServer<T: Transport> {
    conn: Connection<T>,
    delegates: DeviceDelegates,
    auth_state: AuthState,
    authenticated: Arc<AtomicBool>,
}

impl<T: Transport> DeviceServer<T> {
    pub fn new(conn: Connection<T>, delegates: DeviceDelegates) -> Self {
        Self {
            conn,
            delegates,
            auth_state: AuthState::NotStarted,
            authenticated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn connection(&self) -> &Connection<T> {
        &self.conn
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth_state
    }

    /// Authenticate the device, then serve commands until the connection ends.
    ///
    /// Returns `Ok(())` when the owner closes the connection through
    /// [`DeviceServer::close`] or a [`DeviceHandle`]. Every other exit is an
    /// error, and the transport has been closed with a protocol-error code.
    pub fn run(&mut self, key: &AuthenticationKey) -> Result<()> {
        let result = self.serve(key);
        self.conn.finish(result)
    }

    fn serve(&mut self, key: &AuthenticationKey) -> Result<()> {
        if self.auth_state != AuthState::Authenticated {
            authenticate(&mut self.conn, key, &mut self.auth_state)?;
            self.authenticated.store(true, Ordering::SeqCst);
        }

        info!(protocol = self.conn.protocol(), delegates = ?self.delegates, "serving device");
        let delegates = &mut self.delegates;
        let mut clock = ReplyClock::system();
        run_loop(&mut self.conn, &mut clock, |message| delegates.route(message))
    }

    /// A cloneable handle for pushes and shutdown from other threads.
    pub fn handle(&self) -> DeviceHandle<T::Sender> {
        DeviceHandle {
            pusher: self.conn.pusher(),
            authenticated: Arc::clone(&self.authenticated),
        }
    }

    /// Ask the device to stream realtime values for the named sensors.
    pub fn request_realtime_updates(&self, sensors: &[String]) -> Result<()> {
        self.handle().request_realtime_updates(sensors)
    }

    /// Close the connection with a going-away code.
    pub fn close(&self) -> Result<()> {
        self.conn.close()
    }
}

/// Push and shutdown handle of a [`DeviceServer`].
#[derive(Debug, Clone)]
pub struct DeviceHandle<S> {
    pusher: Pusher<S>,
    authenticated: Arc<AtomicBool>,
}

impl<S: MessageSender> DeviceHandle<S> {
    /// Ask the device to stream realtime values for the named sensors.
    ///
    /// Fails with [`ServerError::NotAuthenticated`] until the handshake has
    /// completed, since the device only expects handshake text before that.
    pub fn request_realtime_updates(&self, sensors: &[String]) -> Result<()> {
        if !self.authenticated.load(Ordering::SeqCst) {
            return Err(ServerError::NotAuthenticated);
        }
        self.pusher.push(REQUEST_REALTIME_UPDATES, &sensors)
    }

    /// Close the connection; a running [`DeviceServer::run`] returns `Ok(())`.
    pub fn close(&self) -> Result<()> {
        self.pusher.close()
    }
}
