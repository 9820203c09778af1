use std::time::{SystemTime, UNIX_EPOCH};

use msgapi_envelope::{ErrorValue, MessageIn, MessageOut};
use msgapi_transport::Transport;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::connection::Connection;
use crate::error::Result;

/// Outcome of a delegate call. An `Err` is sent to the peer verbatim.
pub type DelegateResult = std::result::Result<(), ErrorValue>;

/// Source of `now` values for success replies.
///
/// Values handed out on one connection never go backwards, even if the
/// wall clock does.
#[derive(Debug)]
pub(crate) struct ReplyClock {
    last: i64,
    source: fn() -> i64,
}

impl ReplyClock {
    pub(crate) fn system() -> Self {
        Self::with_source(system_now_ms)
    }

    pub(crate) fn with_source(source: fn() -> i64) -> Self {
        Self {
            last: i64::MIN,
            source,
        }
    }

    pub(crate) fn now_ms(&mut self) -> i64 {
        let now = (self.source)().max(self.last);
        self.last = now;
        now
    }
}

fn system_now_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
        Err(before_epoch) => {
            i64::try_from(before_epoch.duration().as_millis()).map_or(i64::MIN, |ms| -ms)
        }
    }
}

/// Decode `args` for a known command, then hand them to its delegate.
///
/// A decode failure wins over a missing delegate, so malformed input is
/// reported as such on every deployment.
pub(crate) fn decode_then<A, D, F>(
    message: &MessageIn,
    delegate: Option<&mut D>,
    call: F,
) -> DelegateResult
where
    A: DeserializeOwned,
    D: ?Sized,
    F: FnOnce(&mut D, A) -> DelegateResult,
{
    let args: A = message
        .decode_args()
        .map_err(|err| ErrorValue::invalid_input(err.to_string()))?;
    let Some(delegate) = delegate else {
        return Err(ErrorValue::not_supported());
    };
    call(delegate, args)
}

/// Receive, route and reply until the connection fails.
///
/// Every inbound envelope gets exactly one reply before the next receive.
/// Only fatal errors leave the loop.
pub(crate) fn run_loop<T, R>(
    conn: &mut Connection<T>,
    clock: &mut ReplyClock,
    mut route: R,
) -> Result<()>
where
    T: Transport,
    R: FnMut(&MessageIn) -> DelegateResult,
{
    loop {
        let message = conn.receive()?;
        trace!(command = %message.command, "command received");

        let reply = match route(&message) {
            Ok(()) => MessageOut::ack(clock.now_ms()),
            Err(error) => {
                debug!(
                    command = %message.command,
                    kind = %error.kind(),
                    message = error.message(),
                    "command rejected"
                );
                MessageOut::error(error)
            }
        };
        conn.send(&reply)?;
    }
}
