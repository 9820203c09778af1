//! Accept one device, log what it sends, and ask it for realtime updates.
//!
//! Run with:
//!   cargo run --example device-server -p msgapi
//!
//! In another terminal:
//!   cargo run -p msgapi --features cli -- device --addr 127.0.0.1:9123 \
//!     --key 64656d6f --json '{"command":"update","args":{"values":{}}}'

use std::sync::mpsc;

use msgapi::server::{ApiListener, AuthenticationKey, DeviceDelegates};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let key = AuthenticationKey::new(b"demo".to_vec());
    let listener = ApiListener::bind("127.0.0.1:9123")?;
    eprintln!("Listening on {}", listener.local_addr()?);

    let (updated, first_update) = mpsc::channel();
    let delegates = DeviceDelegates::new()
        .on_update(move |values| {
            for (sensor, measurements) in &values {
                eprintln!("{sensor}: {} measurement(s)", measurements.len());
            }
            let _ = updated.send(());
            Ok(())
        })
        .on_add_sensor(|sensor| {
            eprintln!("sensor added: {} [{}] on port {}", sensor.name, sensor.unit, sensor.port);
            Ok(())
        });

    let mut device = listener.accept_device(delegates)?;
    let handle = device.handle();
    let worker = std::thread::spawn(move || device.run(&key));

    // Pushes are only valid once the device has authenticated.
    if first_update.recv().is_ok() {
        if let Err(err) = handle.request_realtime_updates(&["s1".to_string()]) {
            eprintln!("Realtime request failed: {err}");
        }
    }

    match worker.join() {
        Ok(Ok(())) => eprintln!("Connection closed"),
        Ok(Err(err)) => eprintln!("Device disconnected: {err}"),
        Err(_) => eprintln!("Device thread panicked"),
    }
    Ok(())
}
