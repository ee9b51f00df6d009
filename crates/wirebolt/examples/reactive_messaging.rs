//! Reactive layer: a scheduled heartbeat plus an automatic ping reply,
//! wired through an in-process channel instead of a socket.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use wirebolt::{FieldSpec, Protocol, Record, Schema, Value};

fn main() -> wirebolt::Result<()> {
    env_logger::init();

    let heartbeat = Schema::builder("Heartbeat")
        .field("seq", FieldSpec::u32())
        .build()?;
    let ping = Schema::builder("Ping")
        .field("token", FieldSpec::u16())
        .build()?;
    let pong = Schema::builder("Pong")
        .field("token", FieldSpec::u16())
        .build()?;

    let protocol = Protocol::new();
    protocol.register(&heartbeat)?;
    protocol.register(&ping)?;
    protocol.register(&pong)?;

    let (tx, rx) = mpsc::channel::<Vec<u8>>();

    // Heartbeat every 100 ms, bumping its counter before each send.
    let beat_tx = tx.clone();
    let handle = protocol.schedule_message_with(
        Record::new(&heartbeat).with("seq", 0u32),
        Duration::from_millis(100),
        move |bytes| {
            let _ = beat_tx.send(bytes.to_vec());
        },
        |record| {
            let next = record.get("seq").and_then(Value::as_u64).unwrap_or(0) + 1;
            record.set("seq", next);
        },
    )?;

    // Every Ping triggers a Pong echoing the token.
    let pong_tx = tx.clone();
    protocol.register_auto_reply_with(
        |incoming| incoming.type_name() == "Ping",
        Record::new(&pong).with("token", 0u16),
        move |bytes| {
            let _ = pong_tx.send(bytes.to_vec());
        },
        |incoming, reply| {
            if let Some(token) = incoming.get("token").cloned() {
                reply.set("token", token);
            }
        },
    )?;

    let incoming = Record::new(&ping).with("token", 0xABCDu16);
    let fired = protocol.check_auto_replies(&incoming);
    println!("auto-replies fired: {fired}");

    thread::sleep(Duration::from_millis(350));
    protocol.cancel_scheduled(handle);
    drop(tx);

    while let Ok(frame) = rx.try_recv() {
        if let Some((decoded, _)) = protocol.decode(&frame, "loopback") {
            if let Some(record) = decoded.into_message() {
                println!("sent frame: {record:?}");
            }
        }
    }

    Ok(())
}
