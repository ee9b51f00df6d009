//! Basic usage: declare message shapes, frame them through a protocol and
//! decode them back, with a CRC-32 footer guarding the body.

use wirebolt::{
    FieldSpec, Protocol, Record, Schema, Value, ValueSource, crc32, json,
};

fn main() -> wirebolt::Result<()> {
    env_logger::init();

    // A nested header populated from the enclosing message.
    let header = Schema::builder("Header")
        .field("version", FieldSpec::u8().static_value(1u8))
        .field("payload_length", FieldSpec::u32())
        .build()?;

    let reading = Schema::builder("SensorReading")
        .field(
            "header",
            FieldSpec::composite(&header)
                .assign("header.payload_length", ValueSource::length_of("payload")),
        )
        .field("sensor_id", FieldSpec::string())
        .field("temperature", FieldSpec::f32())
        .field("payload", FieldSpec::bytes())
        .build()?;

    let protocol = Protocol::new();
    protocol.register(&reading)?;
    protocol.set_footers(vec![(
        "crc",
        FieldSpec::u32().compute(|ctx| Ok(Value::UInt(u64::from(crc32(ctx.payload()))))),
    )])?;

    let mut msg = Record::new(&reading)
        .with("header", Record::new(&header))
        .with("sensor_id", "probe-7")
        .with("temperature", 21.5f32)
        .with("payload", b"raw sample data".to_vec());

    let wire = protocol.encode(&mut msg)?;
    println!("encoded {} bytes: {:02X?}", wire.len(), &wire[..16.min(wire.len())]);
    println!("header.payload_length = {:?}", msg.resolve_str("header.payload_length"));

    match protocol.decode(&wire, "demo") {
        Some((decoded, rest)) => {
            println!("remainder: {} bytes", rest.len());
            if let Some(record) = decoded.into_message() {
                println!("decoded: {}", json::to_json_string_pretty(&record)?);
            }
        }
        None => println!("incomplete, waiting for more bytes"),
    }

    // Tampered input is quarantined instead of erroring the read loop.
    let mut tampered = protocol.encode(&mut msg)?;
    let last_payload_byte = tampered.len() - 5;
    tampered[last_payload_byte] ^= 0xFF;
    if let Some((decoded, _)) = protocol.decode(&tampered, "demo") {
        if let Some(invalid) = decoded.into_invalid() {
            println!("tamper detected: {invalid}");
        }
    }

    Ok(())
}
