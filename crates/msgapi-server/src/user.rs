//! User API server (`v5.user.msg`).
//!
//! User connections perform no handshake here; whoever accepted the
//! upgrade is responsible for deciding the user may connect.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use msgapi_envelope::command::{GET_VALUES, METADATA, UPDATE};
use msgapi_envelope::{ErrorValue, GetValuesArgs, MessageIn, MetadataPush, SensorValues};
use msgapi_transport::{MessageSender, Transport};
use tracing::info;

use crate::connection::{Connection, Pusher};
use crate::dispatch::{decode_then, run_loop, DelegateResult, ReplyClock};
use crate::error::Result;

type GetValuesFn = Box<dyn FnMut(SystemTime, bool) -> DelegateResult + Send>;

/// Business operations behind the User commands.
#[derive(Default)]
pub struct UserDelegates {
    get_values: Option<GetValuesFn>,
}

impl UserDelegates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle `getValues`: the delegate receives the lower time bound and
    /// whether metadata should be sent along with the values.
    pub fn on_get_values<F>(mut self, delegate: F) -> Self
    where
        F: FnMut(SystemTime, bool) -> DelegateResult + Send + 'static,
    {
        self.get_values = Some(Box::new(delegate));
        self
    }

    fn route(&mut self, message: &MessageIn) -> DelegateResult {
        match message.command.as_str() {
            GET_VALUES => decode_then(
                message,
                self.get_values.as_deref_mut(),
                |f, args: GetValuesArgs| {
                    let since = since_from_unix_ms(args.since_unix_ms)?;
                    f(since, args.with_metadata)
                },
            ),
            other => Err(ErrorValue::bad_command(other)),
        }
    }
}

impl fmt::Debug for UserDelegates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserDelegates")
            .field("get_values", &self.get_values.is_some())
            .finish()
    }
}

/// Convert a `sinceUnixMs` value to a point in time.
///
/// Fractional milliseconds are dropped.
pub fn since_from_unix_ms(ms: f64) -> std::result::Result<SystemTime, ErrorValue> {
    if !ms.is_finite() {
        return Err(ErrorValue::invalid_input("sinceUnixMs must be a finite number"));
    }

    let whole = ms.trunc();
    let out_of_range = || ErrorValue::invalid_input(format!("sinceUnixMs out of range: {ms}"));
    if whole.abs() >= u64::MAX as f64 {
        return Err(out_of_range());
    }

    let offset = Duration::from_millis(whole.abs() as u64);
    let since = if whole >= 0.0 {
        UNIX_EPOCH.checked_add(offset)
    } else {
        UNIX_EPOCH.checked_sub(offset)
    };
    since.ok_or_else(out_of_range)
}

/// Server side of one User connection.
#[derive(Debug)]
pub struct UserServer<T: Transport> {
    conn: Connection<T>,
    delegates: UserDelegates,
}

impl<T: Transport> UserServer<T> {
    pub fn new(conn: Connection<T>, delegates: UserDelegates) -> Self {
        Self { conn, delegates }
    }

    pub fn connection(&self) -> &Connection<T> {
        &self.conn
    }

    /// Serve commands until the connection ends.
    ///
    /// Returns `Ok(())` only when the owner closed the connection.
    pub fn run(&mut self) -> Result<()> {
        info!(protocol = self.conn.protocol(), delegates = ?self.delegates, "serving user");
        let delegates = &mut self.delegates;
        let mut clock = ReplyClock::system();
        let result = run_loop(&mut self.conn, &mut clock, |message| delegates.route(message));
        self.conn.finish(result)
    }

    pub fn handle(&self) -> UserHandle<T::Sender> {
        UserHandle {
            pusher: self.conn.pusher(),
        }
    }

    /// Push new values, keyed by device id then sensor id.
    pub fn send_update(&self, values: &HashMap<String, SensorValues>) -> Result<()> {
        self.conn.pusher().push(UPDATE, values)
    }

    /// Push device metadata.
    pub fn send_metadata(&self, metadata: &MetadataPush) -> Result<()> {
        self.conn.pusher().push(METADATA, metadata)
    }

    pub fn close(&self) -> Result<()> {
        self.conn.close()
    }
}

/// Push and shutdown handle of a [`UserServer`].
#[derive(Debug, Clone)]
pub struct UserHandle<S> {
    pusher: Pusher<S>,
}

impl<S: MessageSender> UserHandle<S> {
    pub fn send_update(&self, values: &HashMap<String, SensorValues>) -> Result<()> {
        self.pusher.push(UPDATE, values)
    }

    pub fn send_metadata(&self, metadata: &MetadataPush) -> Result<()> {
        self.pusher.push(METADATA, metadata)
    }

    pub fn close(&self) -> Result<()> {
        self.pusher.close()
    }
}
