use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::SimulationEngine;
use crate::error::{RemoteError, RemoteResult};
use crate::protocol::{
    encode_frame, read_frame, write_framed, EngineRequest, EngineResponse, RequestEnvelope,
    ResponseEnvelope,
};

/// Origin stream for captured log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Single captured log line with its source.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub stream: LogStream,
    pub line: String,
}

/// Handle to a running engine bridge process with an open connection.
pub struct RemoteEngine {
    child: Child,
    stream: Option<TcpStream>,
    next_id: u64,
    log_buffer: Arc<Mutex<Vec<LogLine>>>,
    log_collector: Option<thread::JoinHandle<()>>,
}

impl RemoteEngine {
    /// Spawn the bridge process and connect to the address it announces.
    pub fn spawn(config: EngineConfig) -> RemoteResult<Self> {
        let mut cmd = Command::new(&config.binary_path);
        let mut args = config.extra_args.clone();
        args.push("--gecko-port".to_string());
        args.push(config.gecko_port.to_string());
        let has_bind_arg = args
            .iter()
            .any(|arg| arg == "--bind-addr" || arg.starts_with("--bind-addr="));
        if !has_bind_arg {
            args.push("--bind-addr".to_string());
            args.push("127.0.0.1:0".to_string());
        }
        cmd.args(args);

        if let Some(dir) = &config.working_directory {
            cmd.current_dir(dir);
        }
        cmd.envs(config.child_env());
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|err| RemoteError::engine_start(err.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RemoteError::engine_start("failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RemoteError::engine_start("failed to capture stderr"))?;

        let (log_tx, log_rx) = mpsc::channel();
        spawn_log_reader(stdout, LogStream::Stdout, log_tx.clone());
        spawn_log_reader(stderr, LogStream::Stderr, log_tx);

        let log_buffer = Arc::new(Mutex::new(Vec::new()));
        let address = match wait_for_listen_address(
            &mut child,
            &log_rx,
            &log_buffer,
            config.startup_timeout,
        ) {
            Ok(address) => address,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
        };
        let log_collector = spawn_log_collector(log_rx, log_buffer.clone());

        let stream = match connect(address) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%address, error = %err, "could not connect to engine, stopping it");
                let _ = child.kill();
                let _ = child.wait();
                return Err(err.into());
            }
        };
        info!(%address, binary = %config.binary_path.display(), "connected to engine");

        Ok(Self {
            child,
            stream: Some(stream),
            next_id: 1,
            log_buffer,
            log_collector: Some(log_collector),
        })
    }

    /// Send one request and block until its response arrives.
    pub fn send(&mut self, request: EngineRequest) -> RemoteResult<EngineResponse> {
        let id = self.next_id;
        self.next_id += 1;
        let stream = self.stream.as_mut().ok_or(RemoteError::ConnectionClosed)?;

        let framed = encode_frame(&RequestEnvelope {
            id,
            payload: request,
        })?;
        // Any failure past this point leaves the stream out of step.
        match exchange(stream, &framed, id) {
            Ok(response) => Ok(response),
            Err(err) => {
                self.stream = None;
                Err(err)
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// OS process id of the engine.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Exit status of the engine process, if it has already exited.
    pub fn exit_status(&mut self) -> RemoteResult<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Return all captured log lines across streams.
    pub fn all_logs(&self) -> Vec<LogLine> {
        self.log_buffer
            .lock()
            .map(|buffer| buffer.clone())
            .unwrap_or_default()
    }

    /// Stop the engine and wait for the process to exit.
    pub fn close(mut self) -> RemoteResult<()> {
        self.terminate()
    }

    fn terminate(&mut self) -> RemoteResult<()> {
        if self.stream.is_some() {
            let _ = self.send(EngineRequest::Shutdown);
        }
        self.stream.take();
        let start = Instant::now();
        let timeout = Duration::from_secs(2);
        while start.elapsed() < timeout {
            if let Some(status) = self.child.try_wait()? {
                debug!(%status, "engine exited");
                self.join_workers();
                return Ok(());
            }
            thread::sleep(Duration::from_millis(10));
        }

        // Force terminate if graceful shutdown did not complete.
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.join_workers();
        Ok(())
    }

    fn join_workers(&mut self) {
        if let Some(handle) = self.log_collector.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RemoteEngine {
    fn drop(&mut self) {
        let _ = self.terminate();
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

impl SimulationEngine for RemoteEngine {
    fn open_file(&mut self, path: &Path) -> RemoteResult<()> {
        self.send(EngineRequest::OpenFile {
            path: path_arg(path),
        })?
        .into_ack()
    }

    fn save_file_as(&mut self, path: &Path) -> RemoteResult<()> {
        self.send(EngineRequest::SaveFileAs {
            path: path_arg(path),
        })?
        .into_ack()
    }

    fn run_simulation(&mut self) -> RemoteResult<()> {
        self.send(EngineRequest::RunSimulation)?.into_ack()
    }

    fn shutdown(&mut self) -> RemoteResult<()> {
        let response = self.send(EngineRequest::Shutdown)?;
        self.stream.take();
        response.into_ack()
    }

    fn set_dt(&mut self, value: f64) -> RemoteResult<()> {
        self.send(EngineRequest::SetDt { value })?.into_ack()
    }

    fn set_tend(&mut self, value: f64) -> RemoteResult<()> {
        self.send(EngineRequest::SetTend { value })?.into_ack()
    }

    fn set_dt_pre(&mut self, value: f64) -> RemoteResult<()> {
        self.send(EngineRequest::SetDtPre { value })?.into_ack()
    }

    fn set_tend_pre(&mut self, value: f64) -> RemoteResult<()> {
        self.send(EngineRequest::SetTendPre { value })?.into_ack()
    }

    fn get_dt(&mut self) -> RemoteResult<f64> {
        self.send(EngineRequest::GetDt)?.into_value()
    }

    fn get_tend(&mut self) -> RemoteResult<f64> {
        self.send(EngineRequest::GetTend)?.into_value()
    }

    fn get_dt_pre(&mut self) -> RemoteResult<f64> {
        self.send(EngineRequest::GetDtPre)?.into_value()
    }

    fn get_tend_pre(&mut self) -> RemoteResult<f64> {
        self.send(EngineRequest::GetTendPre)?.into_value()
    }

    fn get_global_parameter(&mut self, name: &str) -> RemoteResult<f64> {
        self.send(EngineRequest::GetGlobalParameter {
            name: name.to_string(),
        })?
        .into_value()
    }

    fn set_global_parameter(&mut self, name: &str, value: f64) -> RemoteResult<()> {
        self.send(EngineRequest::SetGlobalParameter {
            name: name.to_string(),
            value,
        })?
        .into_ack()
    }

    fn accessible_parameters(&mut self, component: &str) -> RemoteResult<Vec<String>> {
        self.send(EngineRequest::AccessibleParameters {
            component: component.to_string(),
        })?
        .into_names()
    }

    fn get_parameter(&mut self, component: &str, key: &str) -> RemoteResult<f64> {
        self.send(EngineRequest::GetParameter {
            component: component.to_string(),
            key: key.to_string(),
        })?
        .into_value()
    }

    fn set_parameters(
        &mut self,
        component: &str,
        keys: &[String],
        values: &[f64],
    ) -> RemoteResult<()> {
        self.send(EngineRequest::SetParameters {
            component: component.to_string(),
            keys: keys.to_vec(),
            values: values.to_vec(),
        })?
        .into_ack()
    }

    fn circuit_elements(&mut self) -> RemoteResult<Vec<String>> {
        self.send(EngineRequest::CircuitElements)?.into_names()
    }

    fn do_operation(
        &mut self,
        component: &str,
        operation: &str,
        argument: &str,
    ) -> RemoteResult<()> {
        self.send(EngineRequest::DoOperation {
            component: component.to_string(),
            operation: operation.to_string(),
            argument: argument.to_string(),
        })?
        .into_ack()
    }

    fn signal_data(
        &mut self,
        node: &str,
        start: f64,
        end: f64,
        skip: usize,
    ) -> RemoteResult<Vec<f64>> {
        self.send(EngineRequest::SignalData {
            node: node.to_string(),
            start,
            end,
            skip,
        })?
        .into_values()
    }

    fn time_array(
        &mut self,
        node: &str,
        start: f64,
        end: f64,
        skip: usize,
    ) -> RemoteResult<Vec<f64>> {
        self.send(EngineRequest::TimeArray {
            node: node.to_string(),
            start,
            end,
            skip,
        })?
        .into_values()
    }

    fn signal_avg(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64> {
        let node = node.to_string();
        self.send(EngineRequest::SignalAvg { node, start, end })?
            .into_value()
    }

    fn signal_rms(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64> {
        let node = node.to_string();
        self.send(EngineRequest::SignalRms { node, start, end })?
            .into_value()
    }

    fn signal_max(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64> {
        let node = node.to_string();
        self.send(EngineRequest::SignalMax { node, start, end })?
            .into_value()
    }

    fn signal_min(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64> {
        let node = node.to_string();
        self.send(EngineRequest::SignalMin { node, start, end })?
            .into_value()
    }

    fn signal_thd(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64> {
        let node = node.to_string();
        self.send(EngineRequest::SignalThd { node, start, end })?
            .into_value()
    }

    fn signal_ripple(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64> {
        let node = node.to_string();
        self.send(EngineRequest::SignalRipple { node, start, end })?
            .into_value()
    }

    fn signal_shape(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64> {
        let node = node.to_string();
        self.send(EngineRequest::SignalShape { node, start, end })?
            .into_value()
    }
}

fn connect(address: SocketAddr) -> io::Result<TcpStream> {
    let stream = TcpStream::connect(address)?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Write one framed request and read the response that answers it.
fn exchange<S: Read + Write>(stream: &mut S, framed: &[u8], id: u64) -> RemoteResult<EngineResponse> {
    write_framed(stream, framed)?;
    let frame = read_frame(stream).map_err(|_| RemoteError::ConnectionClosed)?;
    let response: ResponseEnvelope = serde_json::from_slice(&frame)?;
    if response.id != id {
        return Err(RemoteError::unexpected(format!(
            "response id {} does not match request {id}",
            response.id
        )));
    }
    Ok(response.payload)
}

fn spawn_log_reader<R: Read + Send + 'static>(
    reader: R,
    stream: LogStream,
    tx: mpsc::Sender<LogLine>,
) {
    thread::spawn(move || {
        let buf_reader = BufReader::new(reader);
        for line in buf_reader.lines().map_while(Result::ok) {
            let _ = tx.send(LogLine {
                stream,
                line: line.trim().to_string(),
            });
        }
    });
}

fn wait_for_listen_address(
    child: &mut Child,
    log_rx: &mpsc::Receiver<LogLine>,
    log_buffer: &Arc<Mutex<Vec<LogLine>>>,
    timeout: Duration,
) -> RemoteResult<SocketAddr> {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if let Some(status) = child.try_wait()? {
            return Err(RemoteError::EngineExited(status));
        }

        match log_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(line) => {
                if let Ok(mut buffer) = log_buffer.lock() {
                    buffer.push(line.clone());
                }
                if let Some(addr) = parse_listen_line(&line.line)? {
                    return Ok(addr);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    Err(RemoteError::StartupTimeout(timeout))
}

/// Extract the address from a `listening on <addr>` line.
///
/// Lines without the marker yield `None`; a marker followed by garbage is an
/// error.
fn parse_listen_line(line: &str) -> RemoteResult<Option<SocketAddr>> {
    let needle = "listening on";
    let lower = line.to_ascii_lowercase();
    let Some(idx) = lower.find(needle) else {
        return Ok(None);
    };
    let after = line[idx + needle.len()..].trim();
    after
        .parse()
        .map(Some)
        .map_err(|_| RemoteError::ListenParse(line.to_string()))
}

fn spawn_log_collector(
    log_rx: mpsc::Receiver<LogLine>,
    buffer: Arc<Mutex<Vec<LogLine>>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while let Ok(line) = log_rx.recv() {
            if let Ok(mut guard) = buffer.lock() {
                guard.push(line);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_line_is_parsed() {
        let addr = parse_listen_line("INFO bridge: Listening on 127.0.0.1:43100")
            .unwrap()
            .unwrap();
        assert_eq!(addr.port(), 43100);
    }

    #[test]
    fn unrelated_lines_are_skipped() {
        assert!(parse_listen_line("loading GeckoCIRCUITS.jar").unwrap().is_none());
    }

    #[test]
    fn malformed_address_is_an_error() {
        let err = parse_listen_line("listening on somewhere").unwrap_err();
        assert!(matches!(err, RemoteError::ListenParse(_)));
    }

    struct Duplex {
        input: io::Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn answer(id: u64, payload: EngineResponse) -> Vec<u8> {
        encode_frame(&ResponseEnvelope { id, payload }).unwrap()
    }

    #[test]
    fn exchange_returns_the_matching_response() {
        let mut stream = Duplex {
            input: io::Cursor::new(answer(4, EngineResponse::Value(0.05))),
            output: Vec::new(),
        };
        let request = encode_frame(&RequestEnvelope {
            id: 4,
            payload: EngineRequest::GetTend,
        })
        .unwrap();
        let response = exchange(&mut stream, &request, 4).unwrap();
        assert_eq!(response, EngineResponse::Value(0.05));
        assert_eq!(stream.output, request);
    }

    #[test]
    fn exchange_rejects_a_foreign_response_id() {
        let mut stream = Duplex {
            input: io::Cursor::new(answer(9, EngineResponse::Ack)),
            output: Vec::new(),
        };
        let err = exchange(&mut stream, b"\0\0\0\0", 4).unwrap_err();
        assert!(matches!(err, RemoteError::UnexpectedResponse(_)));
    }

    #[cfg(unix)]
    #[test]
    fn out_of_step_response_closes_the_connection() {
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            read_frame(&mut peer).unwrap();
            write_framed(&mut peer, &answer(99, EngineResponse::Ack)).unwrap();
        });

        let mut engine = RemoteEngine {
            child: Command::new("true").spawn().unwrap(),
            stream: Some(TcpStream::connect(address).unwrap()),
            next_id: 1,
            log_buffer: Arc::default(),
            log_collector: None,
        };
        let err = engine.send(EngineRequest::GetDt).unwrap_err();
        assert!(matches!(err, RemoteError::UnexpectedResponse(_)));
        assert!(!engine.is_connected());
        let err = engine.send(EngineRequest::GetDt).unwrap_err();
        assert!(matches!(err, RemoteError::ConnectionClosed));
        server.join().unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn refused_connection_stops_the_bridge() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pid_file = tmp.path().join("bridge.pid");
        let script = format!(
            "echo $$ > '{}'; echo listening on 127.0.0.1:1; exec sleep 30",
            pid_file.display()
        );
        let config = EngineConfig::new("/bin/sh").with_arg("-c").with_arg(script);

        let err = RemoteEngine::spawn(config).err().expect("connect should fail");
        assert!(matches!(err, RemoteError::Io(_)), "unexpected error {err:?}");

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let proc_dir = std::path::PathBuf::from(format!("/proc/{}", pid.trim()));
        assert!(!proc_dir.exists(), "bridge {} still running", pid.trim());
    }

    #[test]
    fn missing_binary_fails_to_start() {
        let config = EngineConfig::new("/definitely/not/a/bridge");
        let err = RemoteEngine::spawn(config).err().expect("spawn should fail");
        assert!(matches!(err, RemoteError::EngineStart(_)));
    }
}
