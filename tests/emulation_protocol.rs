//! Remote emulation protocol tests
//!
//! Drives `HwEmulationStage` against the in-process mock host:
//! - configuration is checked before any connection
//! - the remote session is released exactly once after it was opened
//! - nothing is released when the connection itself fails

use std::fs;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use stagewright::remote::{MockConnector, MockFailure, TransportError};
use stagewright::{
    CancelToken, DriverError, ErrorKind, ExecLimits, ExecutionContext, HwEmulationStage, Source,
    Stage, Stream,
};
use tempfile::TempDir;

const WDB: &str = "/tmp/mock.1/xilinx_u50_gen3x16_xdma_201920_3-0-kernel.wdb";

struct Fixture {
    dir: TempDir,
    kernel: PathBuf,
    host_cpp: PathBuf,
    xrt: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let kernel = dir.path().join("kernel.xclbin");
        let host_cpp = dir.path().join("host.cpp");
        let xrt = dir.path().join("xrt.ini");
        fs::write(&kernel, b"xclbin bytes").unwrap();
        fs::write(&host_cpp, b"int main() { return 0; }\n").unwrap();
        fs::write(&xrt, b"[Emulation]\ndebug_mode=batch\n").unwrap();
        Self {
            dir,
            kernel,
            host_cpp,
            xrt,
        }
    }

    fn context(&self) -> ExecutionContext {
        ExecutionContext::from_value(json!({
            "stages": {"wdb": {
                "host": self.host_cpp.to_str().unwrap(),
                "xrt": self.xrt.to_str().unwrap(),
                "ssh_host": "fpga01",
                "ssh_username": "builder",
            }}
        }))
    }

    fn stage(&self, ctx: &ExecutionContext, mock: &MockConnector, limits: ExecLimits) -> HwEmulationStage {
        HwEmulationStage::with_parts(ctx, Arc::new(mock.clone()), limits).unwrap()
    }
}

fn read_stream(source: Source) -> (Vec<u8>, Option<PathBuf>) {
    let mut stream = source.into_stream().unwrap();
    let backing = stream.backing_path().map(PathBuf::from);
    (stream.read_all().unwrap(), backing)
}

// =============================================================================
// Configuration checks
// =============================================================================

mod configuration_tests {
    use super::*;

    #[test]
    fn test_missing_host_source_opens_no_connection() {
        let fixture = Fixture::new();
        let ctx = ExecutionContext::from_value(json!({
            "stages": {"wdb": {"ssh_host": "fpga01"}}
        }));
        let mock = MockConnector::new();
        let stage = fixture.stage(&ctx, &mock, ExecLimits::none());

        let err = stage.run(Source::Path(fixture.kernel.clone())).unwrap_err();
        match &err {
            DriverError::MissingDynamicConfiguration(key) => assert_eq!(key, "wdb.host"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.exit_code(), 1);
        assert_eq!(mock.calls().connects, 0);
        assert_eq!(mock.calls().closes, 0);
    }

    #[test]
    fn test_missing_ssh_host_opens_no_connection() {
        let fixture = Fixture::new();
        let ctx = ExecutionContext::from_value(json!({
            "stages": {"wdb": {"host": fixture.host_cpp.to_str().unwrap()}}
        }));
        let mock = MockConnector::new();
        let stage = fixture.stage(&ctx, &mock, ExecLimits::none());

        let err = stage.run(Source::Path(fixture.kernel.clone())).unwrap_err();
        assert!(
            matches!(&err, DriverError::MissingDynamicConfiguration(key) if key == "wdb.ssh_host"),
            "unexpected error: {err}"
        );
        assert_eq!(mock.calls().connects, 0);
    }

    #[test]
    fn test_invalid_ssh_port_fails_before_connecting() {
        let fixture = Fixture::new();
        let ctx = ExecutionContext::from_value(json!({
            "stages": {"wdb": {
                "host": fixture.host_cpp.to_str().unwrap(),
                "ssh_host": "fpga01",
                "ssh_port": 65536,
            }}
        }));
        let mock = MockConnector::new();

        let err = HwEmulationStage::with_parts(&ctx, Arc::new(mock.clone()), ExecLimits::none())
            .err()
            .expect("out-of-range port is rejected");
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("wdb.ssh_port"));
        assert_eq!(mock.calls().connects, 0);
    }

    #[test]
    fn test_directory_input_is_rejected_before_connecting() {
        let fixture = Fixture::new();
        let ctx = fixture.context();
        let mock = MockConnector::new();
        let stage = fixture.stage(&ctx, &mock, ExecLimits::none());

        let input = Source::Directory(stagewright_source::Directory::new(fixture.dir.path()));
        let err = stage.run(input).unwrap_err();
        assert!(matches!(err, DriverError::Conversion(_)));
        assert_eq!(mock.calls().connects, 0);
    }
}

// =============================================================================
// Successful run
// =============================================================================

mod happy_path_tests {
    use super::*;

    #[test]
    fn test_full_protocol() {
        let fixture = Fixture::new();
        let ctx = fixture.context();
        let mock = MockConnector::new();
        mock.remote_file(WDB, b"waveform".to_vec());
        let stage = fixture.stage(&ctx, &mock, ExecLimits::none());

        let output = stage.run(Source::Path(fixture.kernel.clone())).unwrap();
        let (bytes, backing) = read_stream(output);
        assert_eq!(bytes, b"waveform");

        // The local copy is left for the caller.
        let backing = backing.expect("download keeps its backing file");
        assert!(backing.exists());
        assert_eq!(backing.file_name().unwrap(), "kernel.wdb");
        fs::remove_dir_all(backing.parent().unwrap()).unwrap();

        let calls = mock.calls();
        assert_eq!(calls.connects, 1);
        assert_eq!(calls.closes, 1);

        let remote_names: Vec<&str> = calls.puts.iter().map(|(_, r)| r.as_str()).collect();
        assert_eq!(
            remote_names,
            vec![
                "/tmp/mock.1/kernel.xclbin",
                "/tmp/mock.1/host.cpp",
                "/tmp/mock.1/xrt.ini",
            ]
        );
        assert_eq!(calls.puts[1].0, fixture.host_cpp);
        assert_eq!(calls.gets, vec![WDB.to_string()]);

        assert_eq!(calls.execs.len(), 5);
        assert_eq!(calls.execs[0], "mktemp -d");
        assert!(calls.execs[1].starts_with("cd /tmp/mock.1 && g++"));
        assert!(calls.execs[2].contains("emconfigutil --platform xilinx_u50_gen3x16_xdma_201920_3"));
        assert!(calls.execs[3].contains("XCL_EMULATION_MODE=hw_emu ./host kernel.xclbin"));
        assert_eq!(calls.execs[4], "rm -rf /tmp/mock.1");
        assert!(!mock.remote_dir_exists("/tmp/mock.1"));
    }

    #[test]
    fn test_stream_input_is_materialised() {
        let fixture = Fixture::new();
        let ctx = fixture.context();
        let mock = MockConnector::new();
        mock.remote_file(WDB, b"w".to_vec());
        let stage = fixture.stage(&ctx, &mock, ExecLimits::none());

        let input = Source::Stream(Stream::new(Cursor::new(b"xclbin from a pipe".to_vec())));
        let (bytes, backing) = read_stream(stage.run(input).unwrap());
        assert_eq!(bytes, b"w");
        if let Some(parent) = backing.as_deref().and_then(|p| p.parent()) {
            fs::remove_dir_all(parent).unwrap();
        }

        let calls = mock.calls();
        assert_eq!(calls.puts.len(), 3);
        assert_ne!(calls.puts[0].0, fixture.kernel);
    }

    #[test]
    fn test_close_failure_does_not_fail_stage() {
        let fixture = Fixture::new();
        let ctx = fixture.context();
        let mock = MockConnector::new();
        mock.remote_file(WDB, b"w".to_vec());
        mock.fail(MockFailure::Close);
        let stage = fixture.stage(&ctx, &mock, ExecLimits::none());

        let (bytes, backing) = read_stream(stage.run(Source::Path(fixture.kernel.clone())).unwrap());
        assert_eq!(bytes, b"w");
        if let Some(parent) = backing.as_deref().and_then(|p| p.parent()) {
            fs::remove_dir_all(parent).unwrap();
        }
        assert_eq!(mock.calls().closes, 1);
    }
}

// =============================================================================
// Failures after the session is open
// =============================================================================

mod release_tests {
    use super::*;

    #[test]
    fn test_compile_failure_still_cleans_up_once() {
        let fixture = Fixture::new();
        let ctx = fixture.context();
        let mock = MockConnector::new();
        mock.fail(MockFailure::Exec("g++".into()));
        let stage = fixture.stage(&ctx, &mock, ExecLimits::none());

        let err = stage.run(Source::Path(fixture.kernel.clone())).unwrap_err();
        match &err {
            DriverError::StepFailure { command, stderr } => {
                assert!(command.contains("g++"));
                assert!(stderr.contains("injected failure"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.exit_code(), 2);

        let calls = mock.calls();
        assert_eq!(calls.closes, 1);
        assert!(!calls.execs.iter().any(|c| c.contains("emconfigutil")));
        assert_eq!(calls.execs.last().map(String::as_str), Some("rm -rf /tmp/mock.1"));
        assert!(!mock.remote_dir_exists("/tmp/mock.1"));
    }

    #[test]
    fn test_connect_failure_never_cleans_up() {
        let fixture = Fixture::new();
        let ctx = fixture.context();
        let mock = MockConnector::new();
        mock.fail(MockFailure::Connect);
        let stage = fixture.stage(&ctx, &mock, ExecLimits::none());

        let err = stage.run(Source::Path(fixture.kernel.clone())).unwrap_err();
        assert!(matches!(
            err,
            DriverError::Transport(TransportError::ConnectionFailed(ref host)) if host == "builder@fpga01"
        ));
        assert_eq!(err.exit_code(), 3);

        let calls = mock.calls();
        assert_eq!(calls.connects, 1);
        assert_eq!(calls.closes, 0);
        assert!(calls.execs.is_empty());
    }

    #[test]
    fn test_provision_failure_closes_without_rm() {
        let fixture = Fixture::new();
        let ctx = fixture.context();
        let mock = MockConnector::new();
        mock.fail(MockFailure::Exec("mktemp".into()));
        let stage = fixture.stage(&ctx, &mock, ExecLimits::none());

        assert!(stage.run(Source::Path(fixture.kernel.clone())).is_err());

        let calls = mock.calls();
        assert_eq!(calls.closes, 1);
        assert_eq!(calls.execs, vec!["mktemp -d".to_string()]);
    }

    #[test]
    fn test_upload_failure_cleans_up() {
        let fixture = Fixture::new();
        let ctx = fixture.context();
        let mock = MockConnector::new();
        mock.fail(MockFailure::Put);
        let stage = fixture.stage(&ctx, &mock, ExecLimits::none());

        let err = stage.run(Source::Path(fixture.kernel.clone())).unwrap_err();
        assert!(matches!(err, DriverError::Transport(TransportError::Transfer(_))));
        assert_eq!(mock.calls().closes, 1);
        assert!(!mock.remote_dir_exists("/tmp/mock.1"));
    }

    #[test]
    fn test_missing_artifact_cleans_up() {
        let fixture = Fixture::new();
        let ctx = fixture.context();
        let mock = MockConnector::new();
        let stage = fixture.stage(&ctx, &mock, ExecLimits::none());

        let err = stage.run(Source::Path(fixture.kernel.clone())).unwrap_err();
        assert!(matches!(err, DriverError::Transport(TransportError::Transfer(_))));

        let calls = mock.calls();
        assert_eq!(calls.gets, vec![WDB.to_string()]);
        assert_eq!(calls.closes, 1);
    }

    #[test]
    fn test_cancelled_run_cleans_up() {
        let fixture = Fixture::new();
        let ctx = fixture.context();
        let mock = MockConnector::new();
        let token = CancelToken::new();
        token.cancel();
        let stage = fixture.stage(&ctx, &mock, ExecLimits::none().with_cancel(token));

        let err = stage.run(Source::Path(fixture.kernel.clone())).unwrap_err();
        assert!(matches!(err, DriverError::Transport(TransportError::Cancelled)));

        let calls = mock.calls();
        assert_eq!(calls.closes, 1);
        // Workspace setup and removal are not subject to the limits.
        assert_eq!(calls.execs.first().map(String::as_str), Some("mktemp -d"));
        assert_eq!(calls.execs.last().map(String::as_str), Some("rm -rf /tmp/mock.1"));
    }

    #[test]
    fn test_stage_is_reusable_after_failure() {
        let fixture = Fixture::new();
        let ctx = fixture.context();
        let mock = MockConnector::new();
        let stage = fixture.stage(&ctx, &mock, ExecLimits::none());

        // First run has no artifact to download.
        assert!(stage.run(Source::Path(fixture.kernel.clone())).is_err());

        mock.remote_file("/tmp/mock.2/xilinx_u50_gen3x16_xdma_201920_3-0-kernel.wdb", b"second".to_vec());
        let (bytes, backing) = read_stream(stage.run(Source::Path(fixture.kernel.clone())).unwrap());
        assert_eq!(bytes, b"second");
        if let Some(parent) = backing.as_deref().and_then(|p| p.parent()) {
            fs::remove_dir_all(parent).unwrap();
        }

        let calls = mock.calls();
        assert_eq!(calls.connects, 2);
        assert_eq!(calls.closes, 2);
    }
}
