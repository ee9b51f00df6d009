//! Streaming reassembly: feed a protocol arbitrary fragments, per source,
//! and receive complete messages once the last chunk arrives.

use wirebolt::{FieldSpec, Protocol, Record, Schema};

fn main() -> wirebolt::Result<()> {
    env_logger::init();

    let event = Schema::builder("Event")
        .field("seq", FieldSpec::u64())
        .field("label", FieldSpec::string())
        .build()?;

    let protocol = Protocol::new();
    protocol.register(&event)?;

    // Two messages back to back, as a TCP peer might deliver them.
    let mut stream = Vec::new();
    for seq in 0..2u64 {
        let mut msg = Record::new(&event)
            .with("seq", seq)
            .with("label", format!("event-{seq}"));
        stream.extend(protocol.encode(&mut msg)?);
    }

    // Deliver in awkward 5-byte reads; the protocol buffers fragments
    // under the caller-chosen source id and hands back any remainder.
    let source = "10.0.0.7:9000";
    let mut carry: Vec<u8> = Vec::new();
    for chunk in stream.chunks(5) {
        carry.extend_from_slice(chunk);
        loop {
            match protocol.decode(&carry, source) {
                None => {
                    println!("... buffered ({} bytes pending)", protocol.pending_len(source));
                    carry.clear();
                    break;
                }
                Some((decoded, rest)) => {
                    match decoded.into_message() {
                        Some(record) => println!("got {record:?}"),
                        None => println!("dropped garbage"),
                    }
                    carry = rest;
                    if carry.is_empty() {
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
