//! Engine bridge backed by the in-memory buck converter.
//!
//! Speaks the same framed protocol as a real bridge so `RemoteEngine` can be
//! tested without a Java installation. Extra flags script the mock:
//! `--shadow COMPONENT:KEY` and `--fail-statistic OPERATION:SIGNAL`.

use std::io::ErrorKind;
use std::net::TcpListener;

use gecko_remote::mock::MockEngine;
use gecko_remote::protocol::{
    encode_frame, read_frame, write_framed, EngineRequest, RequestEnvelope, ResponseEnvelope,
};
use gecko_remote::Operation;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut bind_addr = "127.0.0.1:0".to_string();
    let mut engine = MockEngine::buck_converter();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--bind-addr" => bind_addr = args.next().ok_or("--bind-addr needs a value")?,
            "--gecko-port" => {
                let port = args.next().ok_or("--gecko-port needs a value")?;
                debug!(%port, "gecko port ignored by the mock");
            }
            "--shadow" => {
                let value = args.next().ok_or("--shadow needs a value")?;
                let (component, key) = value.split_once(':').ok_or("expected COMPONENT:KEY")?;
                engine.shadow_parameter(component, key);
            }
            "--fail-statistic" => {
                let value = args.next().ok_or("--fail-statistic needs a value")?;
                let (operation, signal) =
                    value.split_once(':').ok_or("expected OPERATION:SIGNAL")?;
                let operation: Operation = operation.parse()?;
                engine.fail_statistic(operation, signal);
            }
            other => warn!(arg = other, "ignoring unknown argument"),
        }
    }

    let listener = TcpListener::bind(&bind_addr)?;
    let addr = listener.local_addr()?;
    println!("listening on {addr}");

    let (mut stream, peer) = listener.accept()?;
    stream.set_nodelay(true)?;
    info!(%peer, "client connected");

    loop {
        let frame = match read_frame(&mut stream) {
            Ok(frame) => frame,
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err.into()),
        };
        let envelope: RequestEnvelope = serde_json::from_slice(&frame)?;
        let shutdown = envelope.payload == EngineRequest::Shutdown;
        debug!(id = envelope.id, request = ?envelope.payload, "request");

        let response = ResponseEnvelope {
            id: envelope.id,
            payload: envelope.payload.apply(&mut engine),
        };
        write_framed(&mut stream, &encode_frame(&response)?)?;
        if shutdown {
            info!("shutdown requested");
            break;
        }
    }
    Ok(())
}
