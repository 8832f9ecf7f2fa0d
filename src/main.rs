//! Host entry point: wires the transport, the protocol framer, the
//! supervisor control loop and the optional web API together.
//!
//! The control task is the single owner of the Protocol and the Supervisor;
//! the transport reader, the web handlers and the poll tick all reach it
//! through channels, keeping the core strictly single-threaded.

use engrave_rs::config::{self, Config};
use engrave_rs::hal::SimHal;
use engrave_rs::motion::kinematics;
use engrave_rs::protocol::{CompletedLine, LineStatus, Protocol, RealtimeCommand};
use engrave_rs::supervisor::Supervisor;
use engrave_rs::web::{self, ControlRequest, StatusResponse};

use std::env;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_serial::SerialPortBuilderExt;

/// Events the protocol callbacks forward to the control loop.
enum ProtoEvent {
    Line(CompletedLine),
    Realtime(RealtimeCommand),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = env::args().collect();
    let config_path = args.get(1).map(String::as_str).unwrap_or("engraver.toml");

    let config = if std::path::Path::new(config_path).exists() {
        config::load_config(config_path)?
    } else {
        tracing::info!("no config file at {config_path}, using defaults");
        Config::default()
    };

    tracing::info!(
        machine = config.machine.machine_name.as_deref().unwrap_or("engraver"),
        kinematics = %config.machine.kinematics,
        "starting engrave-rs"
    );

    let kin = kinematics::from_config(&config.machine);
    let hal = SimHal::wall_clock();
    let supervisor = Supervisor::new(config.clone(), kin, Box::new(hal));

    let (byte_tx, byte_rx) = mpsc::channel::<Vec<u8>>(32);
    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<String>();
    let (control_tx, control_rx) = mpsc::channel::<ControlRequest>(16);

    // Transport: serial when configured, stdio otherwise.
    match &config.serial {
        Some(serial) => {
            let port = tokio_serial::new(&serial.port, serial.baud).open_native_async()?;
            tracing::info!(port = %serial.port, baud = serial.baud, "serial transport up");
            let (reader, writer) = tokio::io::split(port);
            spawn_reader(reader, byte_tx);
            spawn_writer(writer, reply_rx);
        }
        None => {
            tracing::info!("stdio transport up");
            spawn_reader(tokio::io::stdin(), byte_tx);
            spawn_writer(tokio::io::stdout(), reply_rx);
        }
    }

    if config.web.enabled {
        let router = web::create_router(control_tx.clone());
        let listener = tokio::net::TcpListener::bind(&config.web.bind_addr).await?;
        tracing::info!("web API listening on http://{}", listener.local_addr()?);
        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, router).await {
                tracing::error!("web server failed: {err}");
            }
        });
    }
    drop(control_tx);

    let control = tokio::spawn(control_loop(
        config,
        supervisor,
        byte_rx,
        control_rx,
        reply_tx,
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
        result = control => {
            result?;
        }
    }

    Ok(())
}

/// Single-threaded round robin over transport bytes, web requests and the
/// periodic poll tick.
async fn control_loop(
    config: Config,
    mut supervisor: Supervisor,
    mut byte_rx: mpsc::Receiver<Vec<u8>>,
    mut control_rx: mpsc::Receiver<ControlRequest>,
    reply_tx: mpsc::UnboundedSender<String>,
) {
    let mut protocol = Protocol::new(config.protocol.clone());

    // The callbacks run inside `feed`, so pushing into an unbounded channel
    // preserves byte order between real-time commands and lines.
    let (event_tx, event_rx) = std::sync::mpsc::channel::<ProtoEvent>();
    let line_tx = event_tx.clone();
    protocol.set_line_callback(Box::new(move |text, status| {
        let _ = line_tx.send(ProtoEvent::Line(CompletedLine {
            text: text.to_string(),
            status,
        }));
    }));
    protocol.set_realtime_callback(Box::new(move |cmd| {
        let _ = event_tx.send(ProtoEvent::Realtime(cmd));
    }));

    let mut tick = tokio::time::interval(tokio::time::Duration::from_millis(1));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            chunk = byte_rx.recv() => {
                let Some(chunk) = chunk else {
                    tracing::info!("transport closed, control loop exiting");
                    return;
                };
                for part in chunk.chunks(config.protocol.rx_chunk.max(1)) {
                    protocol.feed(part);
                    dispatch_events(&event_rx, &mut supervisor, &reply_tx);
                }
            }
            Some(request) = control_rx.recv() => {
                handle_control_request(request, &mut supervisor);
            }
            _ = tick.tick() => {
                supervisor.poll();
            }
        }
    }
}

fn dispatch_events(
    event_rx: &std::sync::mpsc::Receiver<ProtoEvent>,
    supervisor: &mut Supervisor,
    reply_tx: &mpsc::UnboundedSender<String>,
) {
    while let Ok(event) = event_rx.try_recv() {
        match event {
            ProtoEvent::Line(line) => {
                let reply = match supervisor.process_completed(&line) {
                    Ok(()) => "ok".to_string(),
                    Err(err) => format!("error: {err}"),
                };
                let _ = reply_tx.send(reply);
            }
            ProtoEvent::Realtime(cmd) => {
                if let Some(report) = supervisor.handle_realtime(cmd) {
                    let _ = reply_tx.send(report);
                }
            }
        }
    }
}

fn handle_control_request(request: ControlRequest, supervisor: &mut Supervisor) {
    match request {
        ControlRequest::GetStatus { respond_to } => {
            let mpos = supervisor.machine_position();
            let wpos = supervisor.work_position();
            let _ = respond_to.send(StatusResponse {
                state: supervisor.state().name().to_string(),
                alarm: supervisor.alarm() as u8,
                mpos: [mpos.x, mpos.y, mpos.z],
                wpos: [wpos.x, wpos.y, wpos.z],
                feedrate: supervisor.gcode().feedrate,
                spindle_speed: supervisor.gcode().spindle_speed,
                lines_processed: supervisor.lines_processed(),
                errors: supervisor.errors(),
                report: supervisor.status_report(),
            });
        }
        ControlRequest::SubmitLine { line, respond_to } => {
            let result = supervisor
                .process_completed(&CompletedLine {
                    text: line,
                    status: LineStatus::Ok,
                })
                .map_err(|err| err.to_string());
            let _ = respond_to.send(result);
        }
    }
}

fn spawn_reader<R>(mut reader: R, byte_tx: mpsc::Sender<Vec<u8>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if byte_tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::error!("transport read failed: {err}");
                    break;
                }
            }
        }
    });
}

fn spawn_writer<W>(mut writer: W, mut reply_rx: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(reply) = reply_rx.recv().await {
            if writer.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
            if writer.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = writer.flush().await;
        }
    });
}
